use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use submission_uploader::{logger, App, Config};

/// 把学生作业文件批量上传到 LMS
#[derive(Debug, Parser)]
#[command(name = "submission-uploader", version, about)]
struct Cli {
    /// 配置文件（TOML）
    config: PathBuf,

    /// 匹配完成后停止，不连接 LMS（仍会写出报告）
    #[arg(long)]
    dry_run: bool,

    /// 输出 debug 级别日志
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    logger::init_with_verbosity(cli.verbose);

    // 加载配置
    let config = Config::load(&cli.config)
        .with_context(|| format!("configuration stage failed: {}", cli.config.display()))?
        .with_env_overrides();

    // 初始化并运行应用
    App::initialize(config, cli.dry_run)?.run().await?;

    Ok(())
}
