//! 提交单元处理上下文
//!
//! 封装"我正在处理第几个学生、是谁"这一信息，以及整次运行共享的取消信号和结果收集器。

use crate::services::Reporter;
use std::fmt::Display;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 提交单元上下文
#[derive(Debug, Clone)]
pub struct UnitCtx {
    /// 提交键
    pub key: String,

    /// 单元序号（从 1 开始，仅用于日志显示）
    pub index: usize,

    /// 单元总数
    pub total: usize,
}

impl UnitCtx {
    pub fn new(key: impl Into<String>, index: usize, total: usize) -> Self {
        Self {
            key: key.into(),
            index,
            total,
        }
    }
}

impl Display for UnitCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[学生 {} ({}/{})]", self.key, self.index, self.total)
    }
}

/// 运行级上下文，显式传递，不使用全局状态
#[derive(Debug, Clone)]
pub struct RunContext {
    pub cancel: CancellationToken,
    pub reporter: Arc<Reporter>,
}

impl RunContext {
    pub fn new(reporter: Arc<Reporter>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            reporter,
        }
    }
}
