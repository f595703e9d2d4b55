//! 日志工具模块
//!
//! 提供运行横幅、阶段分隔和最终统计的输出函数
use crate::config::Config;
use crate::services::reporter::PipelineResult;
use std::path::Path;
use tracing::{info, warn};

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 已加载的配置
/// - `dry_run`: 是否只演练不上传
pub fn log_startup(config: &Config, dry_run: bool) {
    info!("{}", "=".repeat(60));
    info!(
        "🚀 程序启动 - 学生作业上传 ({})",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("📁 作业目录: {}", config.base_dir.display());
    info!("🔎 文件模式: {}", config.file_pattern);
    info!(
        "🎯 目标测验: {} / {} (课程 {})",
        config.lms.assessment_category, config.lms.assessment_title, config.lms.course_id
    );
    info!(
        "📊 并发数: 下载 {} / 上传 {}",
        config.operational.download_concurrency, config.operational.upload_concurrency
    );
    if dry_run {
        info!("💡 dry-run 模式：匹配完成后停止，不会连接 LMS");
    }
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始
///
/// # 参数
/// - `stage`: 阶段名称
/// - `detail`: 附加说明
pub fn log_stage_start(stage: &str, detail: &str) {
    info!("\n{}", "─".repeat(60));
    info!("📦 阶段: {} - {}", stage, detail);
    info!("{}", "─".repeat(60));
}

/// 记录阶段被跳过
pub fn log_stage_skipped(stage: &str, reason: &str) {
    warn!("⏭️ 跳过阶段 {}: {}", stage, reason);
}

/// 打印最终统计信息
///
/// # 参数
/// - `result`: 流水线结果
/// - `report_path`: 报告路径（未配置时只输出日志）
pub fn print_final_stats(result: &PipelineResult, report_path: Option<&Path>) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("👥 处理学生: {}", result.identities_processed);
    info!("✅ 已上传: {}", result.counts.uploaded);
    info!("⏭️ 已跳过: {}", result.counts.skipped);
    info!("❌ 失败: {}", result.counts.failed);
    info!("📥 下载 / 解压完成: {}", result.counts.done);
    if let Some(reason) = &result.aborted {
        warn!("🛑 运行中止: {}", reason);
    }
    info!("{}", "=".repeat(60));
    match report_path {
        Some(path) => info!("\n报告已保存至: {}", path.display()),
        None => info!("\n未配置 report_path，报告仅输出到日志"),
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
