//! 提交单元：一个学生在本次运行中要上传的全部文件

use crate::models::{FileReference, Identity};
use serde::Serialize;

/// 文件名 → 题目标题
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionBinding {
    /// 实际匹配到的文件名
    pub filename: String,
    pub question_title: String,
}

/// 已绑定题目的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundFile {
    pub file: FileReference,
    pub binding: QuestionBinding,
    /// 相对 base_dir 的路径，用作报告中的文件标识
    pub relative_path: String,
}

/// 提交单元
///
/// 不变式：`files` 中每个文件恰好绑定一道题，顺序与发现顺序一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionUnit {
    pub identity: Identity,
    pub files: Vec<BoundFile>,
}

impl SubmissionUnit {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            files: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.identity.key
    }

    /// 本单元覆盖到的题目标题（去重，保持顺序）
    pub fn question_titles(&self) -> Vec<&str> {
        let mut titles: Vec<&str> = Vec::new();
        for bound in &self.files {
            let title = bound.binding.question_title.as_str();
            if !titles.contains(&title) {
                titles.push(title);
            }
        }
        titles
    }
}
