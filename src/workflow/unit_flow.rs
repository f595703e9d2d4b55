//! 提交单元处理流程 - 流程层
//!
//! 核心职责：定义"一个学生"的完整提交流程
//!
//! 流程顺序：
//! 1. Resolving：找到或创建该学生的提交
//! 2. Uploading：逐个上传文件（单元内顺序执行，同一题后传覆盖先传）
//! 3. 占位：没有收到文件的题目写入占位内容（可选）
//! 4. Finalizing：至少上传成功一个文件才定稿
//!
//! 每个文件的结果都在发生时写入 Reporter。只有认证失败以 `Err` 返回。

use crate::clients::{AssessmentSelector, LmsClient, SubmissionHandle};
use crate::error::SubmissionError;
use crate::infrastructure::RetryPolicy;
use crate::models::{BoundFile, Outcome, OutcomeStatus, Stage, SubmissionUnit};
use crate::services::SubmissionState;
use crate::workflow::unit_ctx::{RunContext, UnitCtx};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 单元处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitResult {
    /// 已定稿
    Finalized,
    /// 没有文件上传成功，提交保持未定稿
    LeftOpen,
    /// 找不到学生或提交
    Unresolved,
    FinalizeFailed,
    /// 运行被取消，剩余文件由编排层补记
    Aborted,
}

/// 提交单元处理流程
///
/// - 编排一个学生的 resolve → upload → finalize
/// - 不持有任何并发资源
/// - 只依赖 `LmsClient` 能力
pub struct UnitFlow {
    lms: Arc<dyn LmsClient>,
    selector: AssessmentSelector,
    retry: RetryPolicy,
    /// 所有题目标题（配置顺序）
    question_titles: Vec<String>,
    /// 没有文件的题目使用的占位内容
    placeholder: Option<String>,
}

impl UnitFlow {
    pub fn new(
        lms: Arc<dyn LmsClient>,
        selector: AssessmentSelector,
        retry: RetryPolicy,
        question_titles: Vec<String>,
        placeholder: Option<String>,
    ) -> Self {
        Self {
            lms,
            selector,
            retry,
            question_titles,
            placeholder,
        }
    }

    pub async fn run(
        &self,
        unit: &SubmissionUnit,
        ctx: &UnitCtx,
        run: &RunContext,
    ) -> Result<UnitResult, SubmissionError> {
        if run.cancel.is_cancelled() {
            return Ok(UnitResult::Aborted);
        }
        let reporter = &run.reporter;
        let key = unit.key();

        info!("{} 👤 {} <{}>，{} 个文件", ctx, unit.identity.name, unit.identity.email, unit.files.len());

        // ========== 阶段 1: Resolving ==========
        let label = format!("{} 查找提交", ctx);
        let resolved = self
            .retry
            .run(&label, &run.cancel, || {
                self.lms.find_or_create_submission(&self.selector, &unit.identity)
            })
            .await;

        let handle = match resolved {
            Ok(handle) => handle,
            Err(SubmissionError::Cancelled) => return Ok(UnitResult::Aborted),
            Err(e) if e.is_fatal() => {
                error!("{} ❌ {}", ctx, e);
                self.record_all_failed(unit, run, &e.to_string());
                return Err(e);
            }
            Err(e) => {
                warn!("{} ❌ 无法找到提交: {}", ctx, e);
                self.record_all_failed(unit, run, &e.to_string());
                reporter.set_submission_state(key, SubmissionState::Unresolved, Some(e.to_string()));
                return Ok(UnitResult::Unresolved);
            }
        };

        // ========== 阶段 2: Uploading ==========
        let mut uploaded = 0usize;
        for bound in &unit.files {
            match self.upload_file(&handle, bound, ctx, run).await {
                Ok(()) => {
                    uploaded += 1;
                    reporter.record(Outcome::new(
                        Stage::Upload,
                        Some(key),
                        &bound.relative_path,
                        OutcomeStatus::Uploaded,
                        &bound.binding.question_title,
                    ));
                }
                Err(SubmissionError::Cancelled) => {
                    reporter.set_submission_state(
                        key,
                        SubmissionState::LeftOpen,
                        Some(SubmissionError::Cancelled.to_string()),
                    );
                    return Ok(UnitResult::Aborted);
                }
                Err(e) => {
                    warn!("{} ❌ {} 上传失败: {}", ctx, bound.relative_path, e);
                    reporter.record(Outcome::failed(
                        Stage::Upload,
                        Some(key),
                        &bound.relative_path,
                        e.to_string(),
                    ));
                    if e.is_fatal() {
                        return Err(e);
                    }
                }
            }
        }

        // ========== 阶段 3: 占位 ==========
        let missing = self.missing_questions(unit);
        if !missing.is_empty() {
            warn!("{} ⚠️ 以下题目没有收到文件: {:?}", ctx, missing);
            reporter.note_missing_questions(key, missing.clone());
            if let Some(content) = &self.placeholder {
                for title in &missing {
                    match self.upload_placeholder(&handle, title, content, ctx, run).await {
                        Ok(()) => info!("{} 📝 已为 '{}' 写入占位内容", ctx, title),
                        Err(SubmissionError::Cancelled) => return Ok(UnitResult::Aborted),
                        Err(e) => {
                            warn!("{} ❌ '{}' 占位内容上传失败: {}", ctx, title, e);
                            reporter.record(Outcome::failed(
                                Stage::Upload,
                                Some(key),
                                format!("<placeholder:{}>", title),
                                e.to_string(),
                            ));
                            if e.is_fatal() {
                                return Err(e);
                            }
                        }
                    }
                }
            }
        }

        // ========== 阶段 4: Finalizing ==========
        if uploaded == 0 {
            warn!("{} ⚠️ 没有文件上传成功，提交保持未定稿", ctx);
            reporter.set_submission_state(
                key,
                SubmissionState::LeftOpen,
                Some("no file uploaded; submission left open".to_string()),
            );
            return Ok(UnitResult::LeftOpen);
        }

        let label = format!("{} 定稿", ctx);
        let finalized = self
            .retry
            .run(&label, &run.cancel, || self.lms.finalize_submission(&handle))
            .await;

        match finalized {
            Ok(()) => {
                info!("{} ✅ 已上传 {}/{} 个文件并定稿", ctx, uploaded, unit.files.len());
                reporter.set_submission_state(key, SubmissionState::Finalized, None);
                Ok(UnitResult::Finalized)
            }
            Err(SubmissionError::Cancelled) => Ok(UnitResult::Aborted),
            Err(e) if e.is_fatal() => {
                reporter.set_submission_state(key, SubmissionState::FinalizeFailed, Some(e.to_string()));
                Err(e)
            }
            Err(e) => {
                warn!("{} ❌ 定稿失败: {}", ctx, e);
                reporter.set_submission_state(key, SubmissionState::FinalizeFailed, Some(e.to_string()));
                Ok(UnitResult::FinalizeFailed)
            }
        }
    }

    /// 读取并上传一个文件
    async fn upload_file(
        &self,
        handle: &SubmissionHandle,
        bound: &BoundFile,
        ctx: &UnitCtx,
        run: &RunContext,
    ) -> Result<(), SubmissionError> {
        let content = read_text(bound).await?;
        let title = &bound.binding.question_title;
        let label = format!("{} 上传 {}", ctx, bound.relative_path);

        self.retry
            .run(&label, &run.cancel, || {
                self.lms
                    .upload_answer(handle, title, &bound.binding.filename, &content)
            })
            .await?;

        info!("{} ✓ {} → {}", ctx, bound.relative_path, title);
        Ok(())
    }

    async fn upload_placeholder(
        &self,
        handle: &SubmissionHandle,
        title: &str,
        content: &str,
        ctx: &UnitCtx,
        run: &RunContext,
    ) -> Result<(), SubmissionError> {
        let label = format!("{} 占位 {}", ctx, title);
        let filename = format!("<placeholder:{}>", title);
        self.retry
            .run(&label, &run.cancel, || {
                self.lms.upload_answer(handle, title, &filename, content)
            })
            .await
    }

    /// 本单元没有任何文件绑定到的题目（配置顺序）
    fn missing_questions(&self, unit: &SubmissionUnit) -> Vec<String> {
        let covered = unit.question_titles();
        self.question_titles
            .iter()
            .filter(|title| !covered.contains(&title.as_str()))
            .cloned()
            .collect()
    }

    fn record_all_failed(&self, unit: &SubmissionUnit, run: &RunContext, detail: &str) {
        run.reporter.record_all(unit.files.iter().map(|bound| {
            Outcome::failed(Stage::Upload, Some(unit.key()), &bound.relative_path, detail)
        }));
    }
}

/// 以 UTF-8 文本读取文件
async fn read_text(bound: &BoundFile) -> Result<String, SubmissionError> {
    let path = bound.file.path().ok_or_else(|| SubmissionError::UnreadableFile {
        path: bound.relative_path.clone().into(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a local file"),
    })?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| SubmissionError::UnreadableFile {
            path: path.to_path_buf(),
            source,
        })?;
    String::from_utf8(bytes).map_err(|e| SubmissionError::UnreadableFile {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })
}
