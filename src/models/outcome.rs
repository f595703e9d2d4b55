//! 处理结果
//!
//! 每个被尝试处理的文件（或压缩包）在对应阶段恰好记录一条 Outcome。

use serde::Serialize;
use std::fmt;

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Extract,
    Match,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Download => "download",
            Stage::Extract => "extract",
            Stage::Match => "match",
            Stage::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// 终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// 已上传到 LMS
    Uploaded,
    /// 未尝试（运行被中止或 dry-run）
    Skipped,
    Failed,
    /// 下载 / 解压阶段成功完成
    Done,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutcomeStatus::Uploaded => "uploaded",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub stage: Stage,
    /// 所属学生（下载 / 解压阶段以及无法映射的文件为 None）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<String>,
    pub file: String,
    pub status: OutcomeStatus,
    pub detail: String,
}

impl Outcome {
    pub fn new(
        stage: Stage,
        identity_key: Option<&str>,
        file: impl Into<String>,
        status: OutcomeStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            identity_key: identity_key.map(str::to_string),
            file: file.into(),
            status,
            detail: detail.into(),
        }
    }

    pub fn failed(
        stage: Stage,
        identity_key: Option<&str>,
        file: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(stage, identity_key, file, OutcomeStatus::Failed, detail)
    }

    pub fn done(stage: Stage, file: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(stage, None, file, OutcomeStatus::Done, detail)
    }

    /// 报告排序键：阶段 → 学生 → 文件
    pub fn sort_key(&self) -> (Stage, &str, &str) {
        (
            self.stage,
            self.identity_key.as_deref().unwrap_or(""),
            self.file.as_str(),
        )
    }
}
