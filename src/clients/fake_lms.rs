//! 内存中的 LMS 替身
//!
//! 供测试和本地演练使用：可以预置学生账号、题目，以及认证失败 / 临时失败 / 拒绝等情形，
//! 并记录每一次上传和定稿。

use crate::clients::submission_state::{
    ensure_attempting, GradingWait, JobStatus, SubmissionAdmin, WorkflowState,
};
use crate::clients::{AnswerSlot, AssessmentSelector, LmsClient, SubmissionHandle};
use crate::error::SubmissionError;
use crate::models::Identity;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 替身里的后台任务立即完成，评分在第一次查询时结束
const FAKE_WAIT: GradingWait = GradingWait {
    job_timeout: Duration::from_secs(1),
    max_wait: Duration::from_secs(1),
    poll_interval: Duration::from_millis(1),
};

/// 一次记录下来的上传
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeUpload {
    pub identity_key: String,
    pub question_title: String,
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Default)]
struct FakeState {
    uploads: Vec<FakeUpload>,
    finalized: Vec<String>,
    upload_calls: usize,
    /// 文件名 → 剩余的临时失败次数
    transient: HashMap<String, u32>,
    /// 文件名 → 拒绝原因
    rejected: HashMap<String, String>,
    finalize_failures: HashMap<String, String>,
    /// 账号 ID → 已有提交的状态
    workflow: HashMap<u64, WorkflowState>,
}

#[derive(Debug, Clone)]
struct FakeAccount {
    id: u64,
    name: String,
    email: String,
}

/// 内存 LMS
#[derive(Debug, Clone, Default)]
pub struct FakeLms {
    accounts: Vec<FakeAccount>,
    questions: Vec<String>,
    /// 第 n 次（从 1 开始）及之后的上传返回认证失败
    auth_fails_from_upload: Option<usize>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeLms {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加学生账号
    pub fn with_account(mut self, name: &str, email: &str) -> Self {
        let id = self.accounts.len() as u64 + 1;
        self.accounts.push(FakeAccount {
            id,
            name: name.to_string(),
            email: email.to_string(),
        });
        self
    }

    /// 设置测验中的题目标题
    pub fn with_questions(mut self, titles: &[&str]) -> Self {
        self.questions = titles.iter().map(|t| t.to_string()).collect();
        self
    }

    /// 第 `nth` 次上传开始返回认证失败
    pub fn with_auth_failure_on_upload(mut self, nth: usize) -> Self {
        self.auth_fails_from_upload = Some(nth.max(1));
        self
    }

    /// 上传某个文件时先失败 `times` 次（临时性错误）
    pub fn with_transient_failures(self, filename: &str, times: u32) -> Self {
        self.state.lock().transient.insert(filename.to_string(), times);
        self
    }

    /// 上传某个文件时总是被拒绝
    pub fn with_rejected_upload(self, filename: &str, message: &str) -> Self {
        self.state
            .lock()
            .rejected
            .insert(filename.to_string(), message.to_string());
        self
    }

    /// 定稿某个学生时失败
    pub fn with_finalize_failure(self, identity_key: &str, message: &str) -> Self {
        self.state
            .lock()
            .finalize_failures
            .insert(identity_key.to_string(), message.to_string());
        self
    }

    /// 预置某个学生已有提交的状态（按邮箱）
    pub fn with_submission_state(self, email: &str, state: WorkflowState) -> Self {
        if let Some(account) = self
            .accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
        {
            self.state.lock().workflow.insert(account.id, state);
        }
        self
    }

    /// 某个学生提交的当前状态（没有预置时为 `attempting`）
    pub fn submission_state(&self, email: &str) -> WorkflowState {
        self.accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .and_then(|a| self.state.lock().workflow.get(&a.id).copied())
            .unwrap_or_default()
    }

    pub fn uploads(&self) -> Vec<FakeUpload> {
        self.state.lock().uploads.clone()
    }

    pub fn finalized(&self) -> Vec<String> {
        self.state.lock().finalized.clone()
    }

    pub fn upload_calls(&self) -> usize {
        self.state.lock().upload_calls
    }

    fn find_account(&self, identity: &Identity) -> Option<&FakeAccount> {
        self.accounts
            .iter()
            .find(|a| !identity.email.is_empty() && a.email.eq_ignore_ascii_case(&identity.email))
            .or_else(|| self.accounts.iter().find(|a| a.name == identity.name))
    }
}

#[async_trait]
impl LmsClient for FakeLms {
    async fn find_or_create_submission(
        &self,
        selector: &AssessmentSelector,
        identity: &Identity,
    ) -> Result<SubmissionHandle, SubmissionError> {
        let account = self
            .find_account(identity)
            .ok_or_else(|| SubmissionError::NoAccount {
                name: identity.name.clone(),
                email: identity.email.clone(),
            })?;

        let current = self.state.lock().workflow.get(&account.id).copied();
        if let Some(current) = current {
            let admin = FakeAdmin {
                lms: self,
                account_id: account.id,
            };
            ensure_attempting(&admin, account.id, current, &FAKE_WAIT).await?;
        }

        let answers = self
            .questions
            .iter()
            .enumerate()
            .map(|(i, title)| {
                (
                    title.clone(),
                    AnswerSlot {
                        answer_id: account.id * 100 + i as u64,
                        file_id: None,
                        filename: None,
                    },
                )
            })
            .collect();

        Ok(SubmissionHandle {
            course_id: selector.course_id,
            assessment_id: 1,
            submission_id: account.id,
            course_user_id: account.id,
            identity_key: identity.key.clone(),
            answers,
        })
    }

    async fn upload_answer(
        &self,
        handle: &SubmissionHandle,
        question_title: &str,
        filename: &str,
        content: &str,
    ) -> Result<(), SubmissionError> {
        let mut state = self.state.lock();
        state.upload_calls += 1;

        if let Some(nth) = self.auth_fails_from_upload {
            if state.upload_calls >= nth {
                return Err(SubmissionError::Auth("401 Unauthorized (answer)".to_string()));
            }
        }
        if let Some(remaining) = state.transient.get_mut(filename) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SubmissionError::Transient("503 Service Unavailable".to_string()));
            }
        }
        if let Some(message) = state.rejected.get(filename) {
            return Err(SubmissionError::Rejected {
                status: 422,
                message: message.clone(),
            });
        }
        handle.answer_for(question_title)?;

        state.uploads.push(FakeUpload {
            identity_key: handle.identity_key.clone(),
            question_title: question_title.to_string(),
            filename: filename.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn finalize_submission(&self, handle: &SubmissionHandle) -> Result<(), SubmissionError> {
        let mut state = self.state.lock();
        if let Some(message) = state.finalize_failures.get(&handle.identity_key) {
            return Err(SubmissionError::Rejected {
                status: 422,
                message: message.clone(),
            });
        }
        state.finalized.push(handle.identity_key.clone());
        Ok(())
    }
}

/// 替身提交的状态流转：强制提交 → submitted → 评分后 published → 撤回 → attempting
struct FakeAdmin<'a> {
    lms: &'a FakeLms,
    account_id: u64,
}

impl FakeAdmin<'_> {
    fn set(&self, state: WorkflowState) {
        self.lms.state.lock().workflow.insert(self.account_id, state);
    }
}

#[async_trait]
impl SubmissionAdmin for FakeAdmin<'_> {
    async fn refresh(&self) -> Result<WorkflowState, SubmissionError> {
        let mut state = self.lms.state.lock();
        let current = state.workflow.entry(self.account_id).or_default();
        if *current == WorkflowState::Submitted {
            *current = WorkflowState::Published;
        }
        Ok(*current)
    }

    async fn force_submit(&self) -> Result<String, SubmissionError> {
        self.set(WorkflowState::Submitted);
        Ok(format!("/jobs/force_submit/{}", self.account_id))
    }

    async fn unsubmit(&self) -> Result<String, SubmissionError> {
        self.set(WorkflowState::Attempting);
        Ok(format!("/jobs/unsubmit/{}", self.account_id))
    }

    async fn job_status(&self, _job_url: &str) -> Result<JobStatus, SubmissionError> {
        Ok(JobStatus::Completed)
    }
}
