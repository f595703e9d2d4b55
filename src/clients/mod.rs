//! LMS 客户端
//!
//! 上传流程只依赖 `LmsClient` 这三个操作，真实实现和测试替身都实现它。

pub mod fake_lms;
pub mod http_lms;
pub mod submission_state;

use crate::error::SubmissionError;
use crate::models::Identity;
use async_trait::async_trait;
use std::collections::HashMap;

pub use fake_lms::{FakeLms, FakeUpload};
pub use http_lms::HttpLmsClient;
pub use submission_state::{GradingWait, WorkflowState};

/// 目标测验
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentSelector {
    pub course_id: u64,
    pub category: String,
    pub title: String,
}

/// 提交中某道题的答案位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSlot {
    pub answer_id: u64,
    /// 编程题答案中已有的文件（上传时覆盖它）
    pub file_id: Option<u64>,
    pub filename: Option<String>,
}

/// 一个学生在目标测验下的提交
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionHandle {
    pub course_id: u64,
    pub assessment_id: u64,
    pub submission_id: u64,
    pub course_user_id: u64,
    pub identity_key: String,
    /// 题目标题 → 答案位置
    pub answers: HashMap<String, AnswerSlot>,
}

impl SubmissionHandle {
    pub fn answer_for(&self, question_title: &str) -> Result<&AnswerSlot, SubmissionError> {
        self.answers
            .get(question_title)
            .ok_or_else(|| SubmissionError::NotFound {
                what: format!("question '{}'", question_title),
            })
    }
}

/// LMS 提交能力
#[async_trait]
pub trait LmsClient: Send + Sync {
    /// 找到学生的提交，不存在时创建
    async fn find_or_create_submission(
        &self,
        selector: &AssessmentSelector,
        identity: &Identity,
    ) -> Result<SubmissionHandle, SubmissionError>;

    /// 上传一道题的答案（同一道题后上传的覆盖先上传的）
    async fn upload_answer(
        &self,
        handle: &SubmissionHandle,
        question_title: &str,
        filename: &str,
        content: &str,
    ) -> Result<(), SubmissionError>;

    /// 定稿提交
    async fn finalize_submission(&self, handle: &SubmissionHandle) -> Result<(), SubmissionError>;
}
