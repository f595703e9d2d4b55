//! 程序配置文件
//!
//! 配置来自一个 TOML 文档，凭据类字段可以被环境变量覆盖。

use crate::error::ConfigError;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// 顶层配置
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// 存放（解压后）学生文件的根目录
    pub base_dir: PathBuf,
    /// 选取学生文件的 glob，例如 `**/*.py`
    pub file_pattern: String,
    /// 报告输出路径（`.json` 或 `.csv`）
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    /// 名单表配置
    pub fname_user_map: RosterConfig,
    /// 文件名 → 题目标题
    #[serde(default)]
    pub file_question_map: IndexMap<String, String>,
    /// LMS 账号与目标测验
    pub lms: LmsConfig,
    /// 可选：从目录索引批量下载
    #[serde(default)]
    pub batch_download: Option<BatchDownloadConfig>,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub operational: OperationalConfig,
}

/// 名单表（CSV）的列配置
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RosterConfig {
    pub csv: PathBuf,
    pub key: String,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LmsConfig {
    #[serde(default = "default_lms_base_url")]
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub course_id: u64,
    pub assessment_category: String,
    pub assessment_title: String,
}

impl fmt::Debug for LmsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmsConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("course_id", &self.course_id)
            .field("assessment_category", &self.assessment_category)
            .field("assessment_title", &self.assessment_title)
            .finish()
    }
}

fn default_lms_base_url() -> String {
    "https://coursemology.org".to_string()
}

/// 目录索引的 HTTP Basic 认证
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 批量下载配置
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchDownloadConfig {
    /// 目录索引地址
    pub base_url: String,
    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,
    /// 作用于文件显示名的正则（不区分大小写）
    pub filter_pattern: String,
    /// 下载目录
    pub destination: PathBuf,
    /// 是否递归进入子目录
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_recursive() -> bool {
    true
}

/// 解压配置
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractConfig {
    /// 解压目标目录，默认与压缩包所在目录相同
    #[serde(default)]
    pub target_dir: Option<PathBuf>,
    /// 每个压缩包解压到 `<target>/<stem>/`
    #[serde(default)]
    pub with_stem: bool,
    /// 解压成功后删除源压缩包
    #[serde(default)]
    pub remove_archives: bool,
}

/// 提交键的推导方式
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyStrategy {
    /// 文件所在目录名，例如 `plab1001/PE_1A.py` → `plab1001`
    #[default]
    ParentDir,
    /// 对文件名做正则匹配，取命名分组 `key`，否则取第 1 个分组
    RegexCapture { pattern: String },
    /// 去掉扩展名的文件名，例如 `plab1001.py` → `plab1001`
    FileStem,
}

/// 题目绑定方式
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BindingStrategy {
    /// 文件名与 `file_question_map` 的键完全相同（区分大小写）
    #[default]
    ExactFilename,
    /// `file_question_map` 的键是正则，从文件名开头匹配，按配置顺序取第一个
    Regex,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchingConfig {
    #[serde(default)]
    pub key_strategy: KeyStrategy,
    #[serde(default)]
    pub binding_strategy: BindingStrategy,
}

/// 运行参数
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationalConfig {
    /// 同时下载的文件数量
    pub download_concurrency: usize,
    /// 同时上传的学生数量
    pub upload_concurrency: usize,
    /// 单个网络请求超时（秒）
    pub request_timeout_secs: u64,
    /// 临时性失败的最大重试次数
    pub max_retries: u32,
    /// 初始退避时间（毫秒），每次重试乘以 `backoff_factor`
    pub backoff_ms: u64,
    pub backoff_factor: u64,
    pub max_backoff_ms: u64,
    /// 没有文件的题目用此内容占位（例如 `# No submission`）
    pub no_submission_content: Option<String>,
    /// LMS 后台任务（强制提交 / 撤回提交）的最长等待时间（秒）
    pub job_timeout_seconds: u64,
    /// 等待自动评分完成的最长时间（秒）
    pub grading_max_wait_seconds: u64,
    /// 查询评分状态的间隔（秒）
    pub grading_poll_interval_seconds: u64,
}

impl Default for OperationalConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 8,
            upload_concurrency: 4,
            request_timeout_secs: 30,
            max_retries: 3,
            backoff_ms: 500,
            backoff_factor: 2,
            max_backoff_ms: 10_000,
            no_submission_content: None,
            job_timeout_seconds: 3600,
            grading_max_wait_seconds: 3600,
            grading_poll_interval_seconds: 5,
        }
    }
}

/// 报告格式，由 `report_path` 的扩展名决定
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
}

impl ReportFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            _ => None,
        }
    }
}

impl Config {
    /// 读取并校验配置文件
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        Ok(config)
    }

    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 用环境变量覆盖凭据和并发数
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("UPLOADER_LMS_USERNAME") {
            self.lms.username = v;
        }
        if let Ok(v) = std::env::var("UPLOADER_LMS_PASSWORD") {
            self.lms.password = v;
        }
        if let Some(download) = self.batch_download.as_mut() {
            if let (Ok(username), Ok(password)) = (
                std::env::var("UPLOADER_INDEX_USERNAME"),
                std::env::var("UPLOADER_INDEX_PASSWORD"),
            ) {
                download.basic_auth = Some(BasicAuth { username, password });
            }
        }
        self.operational.download_concurrency = std::env::var("UPLOADER_DOWNLOAD_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(self.operational.download_concurrency);
        self.operational.upload_concurrency = std::env::var("UPLOADER_UPLOAD_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(self.operational.upload_concurrency);
        self
    }

    /// 报告格式（未配置报告路径时为 None）
    pub fn report_format(&self) -> Option<ReportFormat> {
        self.report_path.as_deref().and_then(ReportFormat::from_path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.file_pattern.trim().is_empty() {
            return Err(invalid("file_pattern", "must not be empty"));
        }
        globset::GlobBuilder::new(&self.file_pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| ConfigError::InvalidGlob {
                field: "file_pattern".to_string(),
                source,
            })?;

        if let Some(path) = &self.report_path {
            if ReportFormat::from_path(path).is_none() {
                return Err(invalid(
                    "report_path",
                    "unsupported extension, expected .json or .csv",
                ));
            }
        }

        if let Some(download) = &self.batch_download {
            regex::RegexBuilder::new(&download.filter_pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| ConfigError::InvalidRegex {
                    field: "batch_download.filter_pattern".to_string(),
                    source,
                })?;
            url::Url::parse(&download.base_url)
                .map_err(|e| invalid("batch_download.base_url", &e.to_string()))?;
        }

        if let KeyStrategy::RegexCapture { pattern } = &self.matching.key_strategy {
            regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
                field: "matching.key_strategy.pattern".to_string(),
                source,
            })?;
        }

        if self.matching.binding_strategy == BindingStrategy::Regex {
            for pattern in self.file_question_map.keys() {
                regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
                    field: format!("file_question_map.\"{}\"", pattern),
                    source,
                })?;
            }
        }

        let op = &self.operational;
        if op.download_concurrency == 0 {
            return Err(invalid("operational.download_concurrency", "must be at least 1"));
        }
        if op.upload_concurrency == 0 {
            return Err(invalid("operational.upload_concurrency", "must be at least 1"));
        }
        if op.request_timeout_secs == 0 {
            return Err(invalid("operational.request_timeout_secs", "must be at least 1"));
        }
        if op.backoff_factor == 0 {
            return Err(invalid("operational.backoff_factor", "must be at least 1"));
        }
        if op.grading_poll_interval_seconds == 0 {
            return Err(invalid(
                "operational.grading_poll_interval_seconds",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
