//! 文件引用
//!
//! 远程目录索引中的一个链接，或本地磁盘上的一个文件。发现后不再修改。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// 文件位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileLocation {
    Remote(String),
    Local(PathBuf),
}

/// 文件引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReference {
    /// 显示名（文件名，不含目录）
    pub name: String,
    pub location: FileLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl FileReference {
    pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: FileLocation::Remote(url.into()),
            size: None,
            modified: None,
        }
    }

    pub fn local(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: FileLocation::Local(path.into()),
            size: None,
            modified: None,
        }
    }

    /// 附带大小和修改时间
    pub fn with_metadata(mut self, size: Option<u64>, modified: Option<DateTime<Utc>>) -> Self {
        self.size = size;
        self.modified = modified;
        self
    }

    pub fn url(&self) -> Option<&str> {
        match &self.location {
            FileLocation::Remote(url) => Some(url),
            FileLocation::Local(_) => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            FileLocation::Local(path) => Some(path),
            FileLocation::Remote(_) => None,
        }
    }

    /// 用于日志和报告的位置描述
    pub fn display_location(&self) -> String {
        match &self.location {
            FileLocation::Remote(url) => url.clone(),
            FileLocation::Local(path) => path.display().to_string(),
        }
    }
}
