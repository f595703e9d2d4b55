//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责阶段调度和并发控制，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `pipeline` - 流水线
//! - 管理应用生命周期（初始化、运行、写报告）
//! - 按顺序调度 下载 → 解压 → 匹配 → 上传
//! - 处理阶段短路和致命错误
//!
//! ### `uploader` - 批量上传器
//! - 控制上传并发数量（Semaphore）
//! - 认证失败时取消运行并补记剩余文件
//!
//! ## 层次关系
//!
//! ```text
//! pipeline (处理整次运行)
//!     ↓
//! uploader (处理 Vec<SubmissionUnit>)
//!     ↓
//! workflow::UnitFlow (处理单个学生)
//!     ↓
//! services / clients (能力层)
//!     ↓
//! infrastructure (HTTP、重试)
//! ```

pub mod pipeline;
pub mod uploader;

pub use pipeline::{App, PipelineRun};
pub use uploader::{UploadStats, Uploader};
