//! # Submission Uploader
//!
//! 把学生作业文件批量上传到 LMS 的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有网络资源，只暴露能力
//! - `HttpFetcher` - GET 能力（reqwest 实现 + 测试替身）
//! - `RetryPolicy` - 临时性失败的退避重试
//!
//! ### ② 业务能力层（Services / Clients）
//! - `services/` - 描述"我能做什么"，互不调用
//! - `Scraper` / `Downloader` / `Extractor` - 目录索引抓取、下载、解压
//! - `IdentityMap` / `Matcher` - 名单与文件匹配
//! - `Reporter` - 结果汇总与报告
//! - `clients/` - `LmsClient` 提交能力（HTTP 实现 + 内存替身）
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个学生"的完整提交流程
//! - `UnitCtx` / `RunContext` - 上下文封装
//! - `UnitFlow` - 流程编排（resolve → upload → placeholder → finalize）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 流水线，管理阶段顺序和报告
//! - `orchestrator/uploader` - 批量上传器，管理并发和取消

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{AssessmentSelector, FakeLms, HttpLmsClient, LmsClient};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{HttpFetcher, MockFetcher};
pub use models::{Outcome, OutcomeStatus, Stage};
pub use orchestrator::{App, PipelineRun};
pub use services::PipelineResult;
pub use workflow::{UnitCtx, UnitFlow};
