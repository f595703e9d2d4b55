//! 批量上传 - 编排层
//!
//! 以有界并发处理所有提交单元。任一单元遇到认证失败时取消整个运行：
//! 进行中的单元在下一个请求处停下，排队中的单元不再启动，
//! 所有尚未尝试的文件统一记为 `skipped`。

use crate::error::SubmissionError;
use crate::models::{OutcomeStatus, SubmissionUnit};
use crate::workflow::{RunContext, UnitCtx, UnitFlow, UnitResult};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// 上传统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub finalized: usize,
    pub left_open: usize,
    pub unresolved: usize,
    pub finalize_failed: usize,
    pub aborted: usize,
}

impl UploadStats {
    fn add(&mut self, result: UnitResult) {
        match result {
            UnitResult::Finalized => self.finalized += 1,
            UnitResult::LeftOpen => self.left_open += 1,
            UnitResult::Unresolved => self.unresolved += 1,
            UnitResult::FinalizeFailed => self.finalize_failed += 1,
            UnitResult::Aborted => self.aborted += 1,
        }
    }
}

/// 批量上传器
pub struct Uploader {
    flow: Arc<UnitFlow>,
    concurrency: usize,
}

impl Uploader {
    pub fn new(flow: UnitFlow, concurrency: usize) -> Self {
        Self {
            flow: Arc::new(flow),
            concurrency: concurrency.max(1),
        }
    }

    /// 上传所有提交单元
    ///
    /// # 返回
    /// 统计信息；遇到认证失败时返回该错误（此时剩余文件已记为 `skipped`）
    pub async fn upload(
        &self,
        units: &[SubmissionUnit],
        run: &RunContext,
    ) -> Result<UploadStats, SubmissionError> {
        let total = units.len();
        info!("📤 开始上传 {} 个提交单元 (并发 {})", total, self.concurrency);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (idx, unit) in units.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => {
                    warn!("🛑 运行已取消，剩余 {} 个单元不再启动", total - idx);
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("上传并发池已关闭: {}", e);
                        break;
                    }
                },
            };

            let flow = self.flow.clone();
            let unit = unit.clone();
            let run = run.clone();
            let ctx = UnitCtx::new(unit.key(), idx + 1, total);

            tasks.spawn(async move {
                let _permit = permit;
                let result = flow.run(&unit, &ctx, &run).await;
                if let Err(e) = &result {
                    if e.is_fatal() {
                        error!("{} 🛑 致命错误，取消本次运行: {}", ctx, e);
                        run.cancel.cancel();
                    }
                }
                result
            });
        }

        let mut stats = UploadStats::default();
        let mut fatal: Option<SubmissionError> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => stats.add(result),
                Ok(Err(e)) => {
                    stats.aborted += 1;
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => error!("上传任务执行失败: {}", e),
            }
        }

        if run.cancel.is_cancelled() {
            run.reporter.fill_missing(
                units,
                OutcomeStatus::Skipped,
                &SubmissionError::Cancelled.to_string(),
            );
        }

        info!(
            "✓ 上传结束: 定稿 {} / 未定稿 {} / 无法解析 {} / 定稿失败 {} / 中止 {}",
            stats.finalized, stats.left_open, stats.unresolved, stats.finalize_failed, stats.aborted
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{AssessmentSelector, FakeLms};
    use crate::infrastructure::RetryPolicy;
    use crate::models::{BoundFile, FileReference, Identity, QuestionBinding};
    use crate::services::Reporter;
    use std::path::Path;

    fn unit(dir: &Path, key: &str, name: &str, files: &[&str]) -> SubmissionUnit {
        let mut unit = SubmissionUnit::new(Identity::new(key, name, format!("{}@example.com", key)));
        for file in files {
            let path = dir.join(key).join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, format!("# {}\n", file)).unwrap();
            unit.files.push(BoundFile {
                file: FileReference::local(*file, path),
                binding: QuestionBinding {
                    filename: file.to_string(),
                    question_title: "Question 1A".into(),
                },
                relative_path: format!("{}/{}", key, file),
            });
        }
        unit
    }

    fn uploader(lms: FakeLms, concurrency: usize) -> Uploader {
        let flow = UnitFlow::new(
            Arc::new(lms),
            AssessmentSelector {
                course_id: 1,
                category: "PE".into(),
                title: "PE1".into(),
            },
            RetryPolicy::immediate(0),
            vec!["Question 1A".into()],
            None,
        );
        Uploader::new(flow, concurrency)
    }

    #[tokio::test]
    async fn test_all_units_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let units = vec![
            unit(dir.path(), "plab1001", "A", &["PE_1A.py"]),
            unit(dir.path(), "plab1002", "B", &["PE_1A.py"]),
            unit(dir.path(), "plab1003", "C", &["PE_1A.py"]),
        ];
        let lms = FakeLms::new()
            .with_account("A", "plab1001@example.com")
            .with_account("B", "plab1002@example.com")
            .with_account("C", "plab1003@example.com")
            .with_questions(&["Question 1A"]);
        let run = RunContext::new(Arc::new(Reporter::new()));

        let stats = uploader(lms.clone(), 2).upload(&units, &run).await.unwrap();

        assert_eq!(stats.finalized, 3);
        assert_eq!(lms.uploads().len(), 3);
        assert_eq!(run.reporter.finish(None).counts.uploaded, 3);
    }

    #[tokio::test]
    async fn test_auth_failure_skips_remaining_files() {
        let dir = tempfile::tempdir().unwrap();
        let units = vec![
            unit(dir.path(), "plab1001", "A", &["PE_1A.py", "PE_1A_v2.py"]),
            unit(dir.path(), "plab1002", "B", &["PE_1A.py"]),
            unit(dir.path(), "plab1003", "C", &["PE_1A.py"]),
        ];
        let lms = FakeLms::new()
            .with_account("A", "plab1001@example.com")
            .with_account("B", "plab1002@example.com")
            .with_account("C", "plab1003@example.com")
            .with_questions(&["Question 1A"])
            .with_auth_failure_on_upload(1);
        let run = RunContext::new(Arc::new(Reporter::new()));

        let err = uploader(lms.clone(), 1)
            .upload(&units, &run)
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(run.cancel.is_cancelled());
        let result = run.reporter.finish(None);
        assert_eq!(result.outcomes.len(), 4);
        assert_eq!(result.counts.failed, 1);
        assert_eq!(result.counts.skipped, 3);
        assert!(result
            .with_status(OutcomeStatus::Skipped)
            .all(|o| o.detail == "run aborted: authentication failed"));
        assert_eq!(lms.upload_calls(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_with_parallel_units_records_each_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let files = ["PE_1A.py", "PE_1A_v2.py", "PE_1A_v3.py"];
        let units = vec![
            unit(dir.path(), "plab1001", "A", &files),
            unit(dir.path(), "plab1002", "B", &files),
            unit(dir.path(), "plab1003", "C", &files),
        ];
        let lms = FakeLms::new()
            .with_account("A", "plab1001@example.com")
            .with_account("B", "plab1002@example.com")
            .with_account("C", "plab1003@example.com")
            .with_questions(&["Question 1A"])
            .with_auth_failure_on_upload(3);
        let run = RunContext::new(Arc::new(Reporter::new()));

        let err = uploader(lms.clone(), 2)
            .upload(&units, &run)
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        let result = run.reporter.finish(None);

        // 每个文件恰好一条结果
        let mut seen: Vec<&str> = result.outcomes.iter().map(|o| o.file.as_str()).collect();
        assert_eq!(seen.len(), 9);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 9);

        // 取消之后不会再出现上传成功
        assert_eq!(lms.uploads().len(), 2);
        assert_eq!(result.counts.uploaded, 2);
        assert!(result.counts.failed >= 1);
        assert_eq!(result.counts.uploaded + result.counts.failed + result.counts.skipped, 9);
        assert!(lms.finalized().is_empty());
    }
}
