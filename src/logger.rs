//! 日志初始化
//!
//! `RUST_LOG` 优先；未设置时默认 info，`--verbose` 时为 debug。

use tracing_subscriber::{fmt, EnvFilter};

/// 以默认级别初始化日志
pub fn init() {
    init_with_verbosity(false);
}

/// 初始化日志
///
/// 重复调用是安全的（测试中每个用例都可能调用）。
pub fn init_with_verbosity(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
