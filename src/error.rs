//! 错误类型
//!
//! 按流水线阶段划分错误：
//! - 可隔离的错误（单个文件 / 单个压缩包 / 单个学生）在最小工作单元处转换为 `Outcome`
//! - 致命错误（配置、名单、认证）向上传播到流水线，终止本次运行

use std::path::PathBuf;
use thiserror::Error;

/// 应用程序错误类型
///
/// 只有致命错误才会以 `AppError` 的形式到达流水线顶层。
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误
    #[error("configuration stage failed: {0}")]
    Config(#[from] ConfigError),
    /// 目录索引抓取 / 下载错误
    #[error("download stage failed: {0}")]
    Fetch(#[from] FetchError),
    /// 解压错误
    #[error("extract stage failed: {0}")]
    Extract(#[from] ExtractError),
    /// 名单映射错误
    #[error("roster stage failed: {0}")]
    Mapping(#[from] MappingError),
    /// 文件匹配错误
    #[error("match stage failed: {0}")]
    Match(#[from] MatchError),
    /// LMS 提交错误
    #[error("upload stage failed: {0}")]
    Submission(#[from] SubmissionError),
    /// 报告写入错误
    #[error("report stage failed: cannot write {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    /// 出错的阶段名称（用于日志和报告中的 `aborted` 字段）
    pub fn stage(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::Fetch(_) => "download",
            AppError::Extract(_) => "extract",
            AppError::Mapping(_) => "roster",
            AppError::Match(_) => "match",
            AppError::Submission(_) => "upload",
            AppError::Report { .. } => "report",
        }
    }
}

/// 配置错误（致命，流水线启动前终止）
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("cannot read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid regex in `{field}`: {source}")]
    InvalidRegex {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid glob in `{field}`: {source}")]
    InvalidGlob {
        field: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

/// 抓取 / 下载错误（按文件隔离；目录索引根页面失败时为致命）
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("received HTML page for {url}, check credentials or URL")]
    HtmlResponse { url: String },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 解压错误（按压缩包隔离）
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("corrupt archive")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("cannot extract {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 名单映射错误（致命：身份正确性影响后续每一个提交单元）
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("roster table not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("cannot read roster table: {0}")]
    Csv(#[from] csv::Error),

    #[error("roster column `{column}` not found in headers {headers:?}")]
    MissingColumn { column: String, headers: Vec<String> },

    #[error("duplicate roster key `{key}` on lines {first_line} and {second_line}")]
    DuplicateKey {
        key: String,
        first_line: u64,
        second_line: u64,
    },
}

/// 匹配错误（按文件隔离；`BaseDir` 为致命）
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("unmapped file")]
    UnmappedFile { key: String },

    #[error("unmapped file (no submission key in path)")]
    NoKey { path: PathBuf },

    #[error("no question binding")]
    NoBinding { filename: String },

    #[error("base directory {} is unusable: {reason}", path.display())]
    BaseDir { path: PathBuf, reason: String },
}

/// LMS 提交错误
///
/// 只有 `Auth` 是致命的：失效的凭据会影响后续所有学生。
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no LMS account for {name} <{email}>")]
    NoAccount { name: String, email: String },

    #[error("{what} not found on LMS")]
    NotFound { what: String },

    #[error("transient LMS failure: {0}")]
    Transient(String),

    #[error("LMS rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unreadable file {}: {source}", path.display())]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("submission {submission_id} is in state '{state}', expected 'attempting'")]
    UnexpectedState { submission_id: u64, state: String },

    #[error("auto-grading of submission {submission_id} did not finish within {waited_secs}s")]
    GradingTimeout { submission_id: u64, waited_secs: u64 },

    #[error("{what} job failed: {reason}")]
    JobFailed { what: String, reason: String },

    #[error("run aborted: authentication failed")]
    Cancelled,
}

impl SubmissionError {
    /// 是否为致命错误（需要取消整个运行）
    pub fn is_fatal(&self) -> bool {
        matches!(self, SubmissionError::Auth(_))
    }

    /// 是否值得重试（超时、5xx）
    pub fn is_transient(&self) -> bool {
        matches!(self, SubmissionError::Transient(_))
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_auth_is_fatal() {
        assert!(SubmissionError::Auth("bad token".into()).is_fatal());
        assert!(!SubmissionError::Transient("503".into()).is_fatal());
        assert!(!SubmissionError::Cancelled.is_fatal());
        assert!(!SubmissionError::GradingTimeout {
            submission_id: 1,
            waited_secs: 3600
        }
        .is_fatal());
        assert!(!SubmissionError::NoAccount {
            name: "John Doe".into(),
            email: "john@example.com".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_outcome_details_are_stable() {
        assert_eq!(
            MatchError::UnmappedFile {
                key: "plab9999".into()
            }
            .to_string(),
            "unmapped file"
        );
        assert_eq!(
            MatchError::NoBinding {
                filename: "notes.txt".into()
            }
            .to_string(),
            "no question binding"
        );
    }

    #[test]
    fn test_app_error_names_stage() {
        let err: AppError = SubmissionError::Auth("401".into()).into();
        assert_eq!(err.stage(), "upload");
        assert!(err.to_string().starts_with("upload stage failed"));
    }
}
