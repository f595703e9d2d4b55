//! 业务能力层
//!
//! 每个服务只描述"我能做什么"：抓取、下载、解压、名单、匹配、汇总。
//! 服务之间互不调用，由编排层串联。

pub mod downloader;
pub mod extractor;
pub mod identity_map;
pub mod matcher;
pub mod reporter;
pub mod scraper;

pub use downloader::{DownloadReport, Downloader};
pub use extractor::Extractor;
pub use identity_map::IdentityMap;
pub use matcher::{KeyRule, MatchReport, Matcher, QuestionBindings};
pub use reporter::{PipelineResult, Reporter, SubmissionState};
pub use scraper::Scraper;
