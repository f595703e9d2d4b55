//! 流水线 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，按顺序串联所有阶段：
//!
//! 1. **名单**：加载名单表（失败即终止）
//! 2. **抓取 + 下载**（可选）：列出目录索引中的文件并下载
//! 3. **解压**：只处理本次下载成功的压缩包；没有下载成功的文件、
//!    或所有压缩包都解压失败时，跳过后续阶段（不会上传 `base_dir` 中的旧文件）
//! 4. **匹配**：枚举 `base_dir`，生成提交单元；没有单元时跳过上传
//! 5. **上传**：有界并发地提交到 LMS（dry-run 时跳过）
//! 6. **报告**：无论是否中止都会生成结果并写出报告

use crate::clients::{AssessmentSelector, HttpLmsClient, LmsClient};
use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::{HttpFetcher, ReqwestFetcher, RetryPolicy};
use crate::models::OutcomeStatus;
use crate::orchestrator::uploader::Uploader;
use crate::services::extractor::is_zip;
use crate::services::{
    Downloader, Extractor, IdentityMap, KeyRule, Matcher, PipelineResult, QuestionBindings,
    Reporter, Scraper,
};
use crate::utils::logging::{log_stage_skipped, log_stage_start, log_startup, print_final_stats};
use crate::workflow::{RunContext, UnitFlow};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// 一次运行的结果：汇总结果，以及导致中止的致命错误
#[derive(Debug)]
pub struct PipelineRun {
    pub result: PipelineResult,
    pub fatal: Option<AppError>,
}

/// 应用主结构
pub struct App {
    config: Config,
    dry_run: bool,
    fetcher: Arc<dyn HttpFetcher>,
    lms: Arc<dyn LmsClient>,
}

impl App {
    /// 初始化应用（创建 HTTP 客户端，不会立即联网）
    pub fn initialize(config: Config, dry_run: bool) -> Result<Self> {
        let timeout = Duration::from_secs(config.operational.request_timeout_secs);
        let fetcher = ReqwestFetcher::new(timeout).context("无法创建 HTTP 客户端")?;
        let lms =
            HttpLmsClient::new(&config.lms, &config.operational).context("无法创建 LMS 客户端")?;
        Ok(Self::with_clients(
            config,
            dry_run,
            Arc::new(fetcher),
            Arc::new(lms),
        ))
    }

    /// 使用指定的客户端创建应用
    pub fn with_clients(
        config: Config,
        dry_run: bool,
        fetcher: Arc<dyn HttpFetcher>,
        lms: Arc<dyn LmsClient>,
    ) -> Self {
        Self {
            config,
            dry_run,
            fetcher,
            lms,
        }
    }

    /// 运行流水线，致命错误以 `Err` 返回（报告已经写出）
    pub async fn run(&self) -> Result<PipelineResult, AppError> {
        let PipelineRun { result, fatal } = self.execute().await;
        match fatal {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    /// 运行流水线并返回完整结果
    pub async fn execute(&self) -> PipelineRun {
        log_startup(&self.config, self.dry_run);

        let reporter = Arc::new(Reporter::new());
        let run = RunContext::new(reporter.clone());

        let fatal = self.run_stages(&run).await.err();
        if let Some(e) = &fatal {
            error!("🛑 运行中止: {}", e);
        }

        let mut result = reporter.finish(fatal.as_ref().map(|e| e.to_string()));
        let mut fatal = fatal;

        if let (Some(path), Some(format)) = (&self.config.report_path, self.config.report_format()) {
            if let Err(e) = result.write(path, format) {
                error!("❌ {}", e);
                if fatal.is_none() {
                    result.aborted = Some(e.to_string());
                    fatal = Some(e);
                }
            }
        }

        print_final_stats(&result, self.config.report_path.as_deref());
        PipelineRun { result, fatal }
    }

    async fn run_stages(&self, run: &RunContext) -> Result<(), AppError> {
        let config = &self.config;

        // ========== 名单 ==========
        let roster = &config.fname_user_map;
        let identities = IdentityMap::load(&roster.csv, &roster.key, &roster.name, &roster.email)?;
        let key_rule = KeyRule::from_strategy(&config.matching.key_strategy)?;
        let bindings =
            QuestionBindings::from_config(&config.file_question_map, config.matching.binding_strategy)?;

        // ========== 抓取 + 下载 + 解压 ==========
        if let Some(batch) = &config.batch_download {
            log_stage_start("download", &batch.base_url);
            let filter = Scraper::compile_filter(&batch.filter_pattern).map_err(|source| {
                crate::error::ConfigError::InvalidRegex {
                    field: "batch_download.filter_pattern".to_string(),
                    source,
                }
            })?;
            let scraper = Scraper::new(self.fetcher.clone(), batch.basic_auth.clone(), batch.recursive);
            let files = scraper.list(&batch.base_url, &filter).await?;

            let downloader = Downloader::new(self.fetcher.clone(), config.operational.download_concurrency);
            let downloads = downloader
                .fetch(&files, &batch.destination, batch.basic_auth.as_ref())
                .await?;
            run.reporter.record_all(downloads.outcomes.iter().cloned());

            if downloads.downloaded().is_empty() {
                log_stage_skipped("extract", "没有下载成功的文件");
                log_stage_skipped("match", "下载阶段没有产出可用文件");
                return Ok(());
            }

            log_stage_start("extract", &config.base_dir.display().to_string());
            let extractor = Extractor::from_config(&config.extract).with_default_target(&config.base_dir);
            let outcomes = extractor.extract_archives(downloads.downloaded()).await;
            let extracted = outcomes
                .iter()
                .filter(|o| o.status == OutcomeStatus::Done)
                .count();
            run.reporter.record_all(outcomes);

            // 非压缩包的下载文件直接参与匹配
            let plain = downloads.downloaded().iter().filter(|p| !is_zip(p)).count();
            if extracted + plain == 0 {
                log_stage_skipped("match", "所有压缩包都解压失败");
                return Ok(());
            }
        }

        // ========== 匹配 ==========
        log_stage_start("match", &config.file_pattern);
        let matched = Matcher::new(key_rule).match_units(
            &config.base_dir,
            &config.file_pattern,
            &bindings,
            &identities,
        )?;
        run.reporter.record_all(matched.outcomes.iter().cloned());

        if matched.units.is_empty() {
            log_stage_skipped("upload", "没有可上传的提交单元");
            return Ok(());
        }
        for unit in &matched.units {
            run.reporter.register_identity(&unit.identity);
        }

        if self.dry_run {
            log_stage_skipped("upload", "dry-run");
            let titles = bindings.titles();
            for unit in &matched.units {
                let covered = unit.question_titles();
                let missing: Vec<String> = titles
                    .iter()
                    .filter(|t| !covered.contains(&t.as_str()))
                    .cloned()
                    .collect();
                run.reporter.note_missing_questions(unit.key(), missing);
            }
            run.reporter
                .fill_missing(&matched.units, OutcomeStatus::Skipped, "dry run");
            return Ok(());
        }

        // ========== 上传 ==========
        log_stage_start("upload", &config.lms.assessment_title);
        let flow = UnitFlow::new(
            self.lms.clone(),
            AssessmentSelector {
                course_id: config.lms.course_id,
                category: config.lms.assessment_category.clone(),
                title: config.lms.assessment_title.clone(),
            },
            RetryPolicy::from_config(&config.operational),
            bindings.titles(),
            config.operational.no_submission_content.clone(),
        );
        let stats = Uploader::new(flow, config.operational.upload_concurrency)
            .upload(&matched.units, run)
            .await?;
        info!("✓ {} 名学生已定稿", stats.finalized);

        Ok(())
    }
}
