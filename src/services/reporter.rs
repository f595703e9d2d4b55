//! 结果汇总与报告输出
//!
//! `Reporter` 是各阶段共享的追加式结果收集器；运行结束时生成不可变的
//! `PipelineResult`，按扩展名写成 JSON 或 CSV。

use crate::config::ReportFormat;
use crate::error::AppError;
use crate::models::{Identity, Outcome, OutcomeStatus, Stage, SubmissionUnit};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

/// 学生在 LMS 上的提交状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    /// 未尝试（dry-run 或运行中止）
    #[default]
    NotAttempted,
    /// 找不到 / 无法创建提交
    Unresolved,
    /// 已定稿
    Finalized,
    /// 没有任何文件上传成功，提交保持未定稿
    LeftOpen,
    FinalizeFailed,
}

/// 单个文件在报告中的条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub file: String,
    pub stage: Stage,
    pub status: OutcomeStatus,
    pub detail: String,
}

/// 单个学生的汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentitySummary {
    pub key: String,
    pub name: String,
    pub email: String,
    pub submission: SubmissionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_detail: Option<String>,
    /// 没有收到任何文件的题目
    pub missing_questions: Vec<String>,
    pub files: Vec<FileEntry>,
}

/// 各状态计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub done: usize,
}

impl StatusCounts {
    fn add(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Uploaded => self.uploaded += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Done => self.done += 1,
        }
    }
}

/// 一次运行的最终结果
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub generated_at: DateTime<Utc>,
    pub identities_processed: usize,
    pub counts: StatusCounts,
    /// 致命错误：出错阶段和原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub identities: Vec<IdentitySummary>,
    pub outcomes: Vec<Outcome>,
}

impl PipelineResult {
    /// 某个学生的汇总
    pub fn identity(&self, key: &str) -> Option<&IdentitySummary> {
        self.identities.iter().find(|s| s.key == key)
    }

    /// 按状态筛选结果
    pub fn with_status(&self, status: OutcomeStatus) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(move |o| o.status == status)
    }

    /// 写出报告
    pub fn write(&self, path: &Path, format: ReportFormat) -> Result<(), AppError> {
        let to_report_err = |source: io::Error| AppError::Report {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(to_report_err)?;
        }
        let file = fs::File::create(path).map_err(to_report_err)?;

        match format {
            ReportFormat::Json => {
                let mut writer = io::BufWriter::new(file);
                serde_json::to_writer_pretty(&mut writer, self)
                    .map_err(|e| to_report_err(e.into()))?;
                writer.flush().map_err(to_report_err)?;
            }
            ReportFormat::Csv => {
                let mut writer = csv::Writer::from_writer(file);
                for outcome in &self.outcomes {
                    writer
                        .serialize(CsvRow::from(outcome))
                        .map_err(|e| to_report_err(e.into()))?;
                }
                writer.flush().map_err(to_report_err)?;
            }
        }

        info!("📝 报告已写入 {}", path.display());
        Ok(())
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    stage: Stage,
    identity_key: &'a str,
    file: &'a str,
    status: OutcomeStatus,
    detail: &'a str,
}

impl<'a> From<&'a Outcome> for CsvRow<'a> {
    fn from(outcome: &'a Outcome) -> Self {
        Self {
            stage: outcome.stage,
            identity_key: outcome.identity_key.as_deref().unwrap_or(""),
            file: &outcome.file,
            status: outcome.status,
            detail: &outcome.detail,
        }
    }
}

#[derive(Debug, Clone)]
struct IdentityState {
    identity: Identity,
    submission: SubmissionState,
    submission_detail: Option<String>,
    missing_questions: Vec<String>,
}

/// 结果收集器（线程安全，追加式）
#[derive(Debug, Default)]
pub struct Reporter {
    outcomes: Mutex<Vec<Outcome>>,
    identities: Mutex<BTreeMap<String, IdentityState>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: Outcome) {
        self.outcomes.lock().push(outcome);
    }

    pub fn record_all(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.outcomes.lock().extend(outcomes);
    }

    /// 登记一个进入上传阶段的学生
    pub fn register_identity(&self, identity: &Identity) {
        self.identities
            .lock()
            .entry(identity.key.clone())
            .or_insert_with(|| IdentityState {
                identity: identity.clone(),
                submission: SubmissionState::NotAttempted,
                submission_detail: None,
                missing_questions: Vec::new(),
            });
    }

    pub fn note_missing_questions(&self, key: &str, titles: Vec<String>) {
        if let Some(state) = self.identities.lock().get_mut(key) {
            state.missing_questions = titles;
        }
    }

    pub fn set_submission_state(&self, key: &str, state: SubmissionState, detail: Option<String>) {
        if let Some(entry) = self.identities.lock().get_mut(key) {
            entry.submission = state;
            entry.submission_detail = detail;
        }
    }

    /// 为还没有上传结果的文件补一条结果（用于中止和 dry-run）
    pub fn fill_missing(&self, units: &[SubmissionUnit], status: OutcomeStatus, detail: &str) {
        let mut outcomes = self.outcomes.lock();
        let recorded: HashSet<(String, String)> = outcomes
            .iter()
            .filter(|o| o.stage == Stage::Upload)
            .filter_map(|o| Some((o.identity_key.clone()?, o.file.clone())))
            .collect();

        for unit in units {
            for bound in &unit.files {
                let id = (unit.identity.key.clone(), bound.relative_path.clone());
                if !recorded.contains(&id) {
                    outcomes.push(Outcome::new(
                        Stage::Upload,
                        Some(unit.key()),
                        &bound.relative_path,
                        status,
                        detail,
                    ));
                }
            }
        }
    }

    /// 当前已记录的结果数
    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().is_empty()
    }

    /// 生成最终结果，结果按 (阶段, 学生, 文件) 排序
    pub fn finish(&self, aborted: Option<String>) -> PipelineResult {
        let mut outcomes = self.outcomes.lock().clone();
        outcomes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut counts = StatusCounts::default();
        for outcome in &outcomes {
            counts.add(outcome.status);
        }

        let identities: Vec<IdentitySummary> = self
            .identities
            .lock()
            .values()
            .map(|state| IdentitySummary {
                key: state.identity.key.clone(),
                name: state.identity.name.clone(),
                email: state.identity.email.clone(),
                submission: state.submission,
                submission_detail: state.submission_detail.clone(),
                missing_questions: state.missing_questions.clone(),
                files: outcomes
                    .iter()
                    .filter(|o| o.identity_key.as_deref() == Some(state.identity.key.as_str()))
                    .map(|o| FileEntry {
                        file: o.file.clone(),
                        stage: o.stage,
                        status: o.status,
                        detail: o.detail.clone(),
                    })
                    .collect(),
            })
            .collect();

        PipelineResult {
            generated_at: Utc::now(),
            identities_processed: identities.len(),
            counts,
            aborted,
            identities,
            outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundFile, FileReference, QuestionBinding};

    fn unit(key: &str, files: &[&str]) -> SubmissionUnit {
        let mut unit = SubmissionUnit::new(Identity::new(key, "Name", "mail@example.com"));
        for file in files {
            unit.files.push(BoundFile {
                file: FileReference::local(*file, format!("/tmp/{}", file)),
                binding: QuestionBinding {
                    filename: file.to_string(),
                    question_title: "Q".into(),
                },
                relative_path: format!("{}/{}", key, file),
            });
        }
        unit
    }

    #[test]
    fn test_finish_sorts_and_counts() {
        let reporter = Reporter::new();
        reporter.record(Outcome::new(
            Stage::Upload,
            Some("b"),
            "b/x.py",
            OutcomeStatus::Uploaded,
            "ok",
        ));
        reporter.record(Outcome::done(Stage::Download, "b.zip", "saved"));
        reporter.record(Outcome::failed(Stage::Match, None, "z/y.py", "unmapped file"));

        let result = reporter.finish(None);

        let stages: Vec<Stage> = result.outcomes.iter().map(|o| o.stage).collect();
        assert_eq!(stages, vec![Stage::Download, Stage::Match, Stage::Upload]);
        assert_eq!(result.counts.uploaded, 1);
        assert_eq!(result.counts.failed, 1);
        assert_eq!(result.counts.done, 1);
    }

    #[test]
    fn test_fill_missing_only_touches_unrecorded_files() {
        let reporter = Reporter::new();
        let units = vec![unit("plab1001", &["PE_1A.py", "PE_1B.py"])];
        reporter.register_identity(&units[0].identity);
        reporter.record(Outcome::new(
            Stage::Upload,
            Some("plab1001"),
            "plab1001/PE_1A.py",
            OutcomeStatus::Uploaded,
            "ok",
        ));

        reporter.fill_missing(&units, OutcomeStatus::Skipped, "run aborted: authentication failed");
        let result = reporter.finish(Some("upload: authentication failed".into()));

        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.counts.skipped, 1);
        let summary = result.identity("plab1001").unwrap();
        assert_eq!(summary.files.len(), 2);
        assert_eq!(summary.submission, SubmissionState::NotAttempted);
        assert!(result.aborted.is_some());
    }

    #[test]
    fn test_writes_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::new();
        let identity = Identity::new("plab1001", "John Doe", "john@example.com");
        reporter.register_identity(&identity);
        reporter.note_missing_questions("plab1001", vec!["Question 1B".into()]);
        reporter.set_submission_state("plab1001", SubmissionState::Finalized, None);
        reporter.record(Outcome::new(
            Stage::Upload,
            Some("plab1001"),
            "plab1001/PE_1A.py",
            OutcomeStatus::Uploaded,
            "Question 1A",
        ));
        let result = reporter.finish(None);

        let json_path = dir.path().join("out/report.json");
        result.write(&json_path, ReportFormat::Json).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json["identities"][0]["submission"], "finalized");
        assert_eq!(json["identities"][0]["missing_questions"][0], "Question 1B");
        assert_eq!(json["outcomes"][0]["status"], "uploaded");

        let csv_path = dir.path().join("report.csv");
        result.write(&csv_path, ReportFormat::Csv).unwrap();
        let text = fs::read_to_string(&csv_path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("stage,identity_key,file,status,detail"));
        assert_eq!(
            lines.next(),
            Some("upload,plab1001,plab1001/PE_1A.py,uploaded,Question 1A")
        );
    }
}
