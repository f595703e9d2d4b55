//! 提交状态对齐 - 客户端层
//!
//! 只有处于 `attempting` 状态的提交才能写入答案。上传前按以下顺序处理：
//!
//! 1. `unstarted`：强制提交，等待后台任务完成
//! 2. `submitted`：轮询直到自动评分结束，最多等待 `grading_max_wait_seconds`
//! 3. `graded` / `published`：撤回提交，等待后台任务完成
//! 4. 确认最终状态为 `attempting`，否则该学生的提交失败

use crate::config::OperationalConfig;
use crate::error::SubmissionError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 提交的工作流状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Unstarted,
    /// 缺省：旧版接口不返回状态字段
    #[default]
    Attempting,
    Submitted,
    Graded,
    Published,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::Unstarted => "unstarted",
            WorkflowState::Attempting => "attempting",
            WorkflowState::Submitted => "submitted",
            WorkflowState::Graded => "graded",
            WorkflowState::Published => "published",
            WorkflowState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// 后台任务状态
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Completed,
    Errored {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// 等待后台任务和自动评分的时间参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradingWait {
    pub job_timeout: Duration,
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl GradingWait {
    pub fn from_config(config: &OperationalConfig) -> Self {
        Self {
            job_timeout: Duration::from_secs(config.job_timeout_seconds),
            max_wait: Duration::from_secs(config.grading_max_wait_seconds),
            poll_interval: Duration::from_secs(config.grading_poll_interval_seconds),
        }
    }

    /// 评分轮询次数上限
    fn max_polls(&self) -> u128 {
        self.max_wait.as_millis() / self.poll_interval.as_millis().max(1)
    }
}

/// 单个提交的管理操作（真实客户端和测试替身各自实现）
#[async_trait]
pub(crate) trait SubmissionAdmin: Send + Sync {
    /// 重新读取提交状态
    async fn refresh(&self) -> Result<WorkflowState, SubmissionError>;

    /// 强制提交，返回后台任务地址
    async fn force_submit(&self) -> Result<String, SubmissionError>;

    /// 撤回提交，返回后台任务地址
    async fn unsubmit(&self) -> Result<String, SubmissionError>;

    async fn job_status(&self, job_url: &str) -> Result<JobStatus, SubmissionError>;
}

/// 把提交调整到 `attempting` 状态
///
/// # 参数
/// - `admin`: 提交管理操作
/// - `submission_id`: 提交 ID（用于日志和错误信息）
/// - `current`: 当前状态
/// - `wait`: 等待参数
///
/// # 返回
/// 最终状态（总是 `Attempting`）；无法对齐时返回错误
pub(crate) async fn ensure_attempting(
    admin: &dyn SubmissionAdmin,
    submission_id: u64,
    current: WorkflowState,
    wait: &GradingWait,
) -> Result<WorkflowState, SubmissionError> {
    let mut state = current;

    if state == WorkflowState::Unstarted {
        info!("📨 提交 {} 尚未开始，强制提交", submission_id);
        let job = admin.force_submit().await?;
        wait_for_job(admin, &job, "force submit", wait).await?;
        state = admin.refresh().await?;
    }

    if state == WorkflowState::Submitted {
        state = wait_for_grading(admin, submission_id, wait).await?;
    }

    if matches!(state, WorkflowState::Graded | WorkflowState::Published) {
        info!("↩️ 提交 {} 处于 {} 状态，撤回提交", submission_id, state);
        let job = admin.unsubmit().await?;
        wait_for_job(admin, &job, "unsubmit", wait).await?;
        state = admin.refresh().await?;
    }

    if state != WorkflowState::Attempting {
        warn!("❌ 提交 {} 状态为 {}，无法写入答案", submission_id, state);
        return Err(SubmissionError::UnexpectedState {
            submission_id,
            state: state.to_string(),
        });
    }
    Ok(state)
}

/// 轮询直到提交离开 `submitted` 状态
async fn wait_for_grading(
    admin: &dyn SubmissionAdmin,
    submission_id: u64,
    wait: &GradingWait,
) -> Result<WorkflowState, SubmissionError> {
    info!(
        "⏳ 等待提交 {} 自动评分完成 (最多 {}s)",
        submission_id,
        wait.max_wait.as_secs()
    );
    for poll in 0..wait.max_polls() {
        let state = admin.refresh().await?;
        if state != WorkflowState::Submitted {
            debug!("提交 {} 评分完成 (第 {} 次查询): {}", submission_id, poll + 1, state);
            return Ok(state);
        }
        tokio::time::sleep(wait.poll_interval).await;
    }
    Err(SubmissionError::GradingTimeout {
        submission_id,
        waited_secs: wait.max_wait.as_secs(),
    })
}

/// 等待后台任务完成，超过 `job_timeout` 视为失败
async fn wait_for_job(
    admin: &dyn SubmissionAdmin,
    job_url: &str,
    what: &str,
    wait: &GradingWait,
) -> Result<(), SubmissionError> {
    match tokio::time::timeout(wait.job_timeout, poll_job(admin, job_url, what, wait)).await {
        Ok(result) => result,
        Err(_) => Err(SubmissionError::JobFailed {
            what: what.to_string(),
            reason: format!("timed out after {}s", wait.job_timeout.as_secs()),
        }),
    }
}

async fn poll_job(
    admin: &dyn SubmissionAdmin,
    job_url: &str,
    what: &str,
    wait: &GradingWait,
) -> Result<(), SubmissionError> {
    loop {
        match admin.job_status(job_url).await? {
            JobStatus::Completed => return Ok(()),
            JobStatus::Errored { message } => {
                return Err(SubmissionError::JobFailed {
                    what: what.to_string(),
                    reason: message.unwrap_or_else(|| "job errored".to_string()),
                })
            }
            JobStatus::Submitted | JobStatus::Unknown => {
                tokio::time::sleep(wait.poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// 按脚本返回状态的提交
    #[derive(Default)]
    struct Scripted {
        states: Mutex<VecDeque<WorkflowState>>,
        jobs: Mutex<VecDeque<JobStatus>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl Scripted {
        fn new(states: &[WorkflowState], jobs: Vec<JobStatus>) -> Self {
            Self {
                states: Mutex::new(states.iter().copied().collect()),
                jobs: Mutex::new(jobs.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl SubmissionAdmin for Scripted {
        async fn refresh(&self) -> Result<WorkflowState, SubmissionError> {
            self.calls.lock().push("refresh");
            let mut states = self.states.lock();
            // 脚本用完后保持最后一个状态
            let state = if states.len() > 1 {
                states.pop_front()
            } else {
                states.front().copied()
            };
            Ok(state.unwrap_or_default())
        }

        async fn force_submit(&self) -> Result<String, SubmissionError> {
            self.calls.lock().push("force_submit");
            Ok("/jobs/1".to_string())
        }

        async fn unsubmit(&self) -> Result<String, SubmissionError> {
            self.calls.lock().push("unsubmit");
            Ok("/jobs/2".to_string())
        }

        async fn job_status(&self, _job_url: &str) -> Result<JobStatus, SubmissionError> {
            self.calls.lock().push("job");
            Ok(self.jobs.lock().pop_front().unwrap_or(JobStatus::Completed))
        }
    }

    fn wait() -> GradingWait {
        GradingWait {
            job_timeout: Duration::from_millis(200),
            max_wait: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
        }
    }

    use super::WorkflowState::*;

    #[tokio::test]
    async fn test_attempting_needs_no_calls() {
        let admin = Scripted::new(&[], vec![]);
        let state = ensure_attempting(&admin, 1, Attempting, &wait()).await.unwrap();
        assert_eq!(state, Attempting);
        assert!(admin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unstarted_is_force_submitted_graded_and_unsubmitted() {
        let admin = Scripted::new(
            &[Submitted, Submitted, Published, Attempting],
            vec![JobStatus::Submitted, JobStatus::Completed, JobStatus::Completed],
        );

        let state = ensure_attempting(&admin, 1, Unstarted, &wait()).await.unwrap();

        assert_eq!(state, Attempting);
        assert_eq!(
            admin.calls(),
            vec![
                "force_submit",
                "job",
                "job",
                "refresh",
                "refresh",
                "refresh",
                "unsubmit",
                "job",
                "refresh",
            ]
        );
    }

    #[tokio::test]
    async fn test_graded_submission_is_unsubmitted() {
        let admin = Scripted::new(&[Attempting], vec![]);
        let state = ensure_attempting(&admin, 1, Graded, &wait()).await.unwrap();
        assert_eq!(state, Attempting);
        assert_eq!(admin.calls(), vec!["unsubmit", "job", "refresh"]);
    }

    #[tokio::test]
    async fn test_grading_that_never_finishes_times_out() {
        let admin = Scripted::new(&[Submitted], vec![]);

        let err = ensure_attempting(&admin, 7, Submitted, &wait())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SubmissionError::GradingTimeout {
                submission_id: 7,
                ..
            }
        ));
        assert!(!err.is_fatal());
        assert!(!err.is_transient());
        // 50ms / 10ms
        assert_eq!(admin.calls().len(), 5);
    }

    #[tokio::test]
    async fn test_errored_job_fails_submission() {
        let admin = Scripted::new(
            &[],
            vec![JobStatus::Errored {
                message: Some("forbidden".into()),
            }],
        );

        let err = ensure_attempting(&admin, 1, Published, &wait())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "unsubmit job failed: forbidden");
    }

    #[tokio::test]
    async fn test_stuck_job_times_out() {
        let admin = Scripted::new(&[], vec![JobStatus::Submitted; 100]);

        let err = ensure_attempting(&admin, 1, Unstarted, &wait())
            .await
            .unwrap_err();

        assert!(matches!(err, SubmissionError::JobFailed { ref reason, .. } if reason.starts_with("timed out")));
    }

    #[tokio::test]
    async fn test_state_still_wrong_after_reconciling_is_an_error() {
        let admin = Scripted::new(&[Published], vec![]);

        let err = ensure_attempting(&admin, 3, Published, &wait())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SubmissionError::UnexpectedState { submission_id: 3, ref state } if state == "published"
        ));
    }

    #[test]
    fn test_states_parse_from_api_names() {
        let state: WorkflowState = serde_json::from_str("\"published\"").unwrap();
        assert_eq!(state, Published);
        let state: WorkflowState = serde_json::from_str("\"rejected\"").unwrap();
        assert_eq!(state, Unknown);

        let job: JobStatus = serde_json::from_str(r#"{"status":"errored","message":"boom"}"#).unwrap();
        assert_eq!(
            job,
            JobStatus::Errored {
                message: Some("boom".into())
            }
        );
        let job: JobStatus = serde_json::from_str(r#"{"status":"completed","redirect_url":"/x"}"#).unwrap();
        assert_eq!(job, JobStatus::Completed);
    }
}
