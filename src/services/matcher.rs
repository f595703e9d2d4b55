//! 文件匹配
//!
//! 在 `base_dir` 下按 glob 枚举学生文件，推导提交键、查名单、绑定题目，
//! 最后按学生分组成提交单元。
//!
//! ## 规则
//!
//! - 枚举结果按相对路径排序，同样的目录内容总是得到同样的结果
//! - 键不在名单中 → `failed` "unmapped file"
//! - 文件名没有题目绑定 → `failed` "no question binding"
//! - 提交单元按键排序，单元内文件保持枚举顺序；同一题的多个文件全部保留

use crate::config::{BindingStrategy, KeyStrategy};
use crate::error::{ConfigError, MatchError};
use crate::models::{BoundFile, FileReference, Outcome, QuestionBinding, Stage, SubmissionUnit};
use crate::services::IdentityMap;
use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobMatcher};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 提交键推导规则（已编译）
#[derive(Debug, Clone)]
pub enum KeyRule {
    ParentDir,
    RegexCapture(Regex),
    FileStem,
}

impl KeyRule {
    pub fn from_strategy(strategy: &KeyStrategy) -> Result<Self, ConfigError> {
        Ok(match strategy {
            KeyStrategy::ParentDir => KeyRule::ParentDir,
            KeyStrategy::FileStem => KeyRule::FileStem,
            KeyStrategy::RegexCapture { pattern } => {
                KeyRule::RegexCapture(Regex::new(pattern).map_err(|source| {
                    ConfigError::InvalidRegex {
                        field: "matching.key_strategy.pattern".to_string(),
                        source,
                    }
                })?)
            }
        })
    }

    /// 从相对路径推导提交键
    pub fn derive(&self, relative: &Path) -> Option<String> {
        let key = match self {
            KeyRule::ParentDir => relative
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned()),
            KeyRule::FileStem => relative
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned()),
            KeyRule::RegexCapture(re) => {
                let filename = relative.file_name()?.to_string_lossy().into_owned();
                let caps = re.captures(&filename)?;
                let found = caps.name("key").or_else(|| caps.get(1));
                found.map(|m| m.as_str().to_string())
            }
        };
        key.filter(|key| !key.is_empty())
    }
}

/// 文件名 → 题目标题
#[derive(Debug, Clone)]
pub enum QuestionBindings {
    /// 文件名完全相同（区分大小写）
    Exact(IndexMap<String, String>),
    /// 从文件名开头匹配，按配置顺序取第一个
    Regex(Vec<(Regex, String)>),
}

impl QuestionBindings {
    pub fn from_config(
        map: &IndexMap<String, String>,
        strategy: BindingStrategy,
    ) -> Result<Self, ConfigError> {
        match strategy {
            BindingStrategy::ExactFilename => Ok(QuestionBindings::Exact(map.clone())),
            BindingStrategy::Regex => {
                let mut rules = Vec::with_capacity(map.len());
                for (pattern, title) in map {
                    let re = Regex::new(&format!("^(?:{})", pattern)).map_err(|source| {
                        ConfigError::InvalidRegex {
                            field: format!("file_question_map.\"{}\"", pattern),
                            source,
                        }
                    })?;
                    rules.push((re, title.clone()));
                }
                Ok(QuestionBindings::Regex(rules))
            }
        }
    }

    pub fn resolve(&self, filename: &str) -> Option<QuestionBinding> {
        let title = match self {
            QuestionBindings::Exact(map) => map.get(filename)?,
            QuestionBindings::Regex(rules) => {
                &rules.iter().find(|(re, _)| re.is_match(filename))?.1
            }
        };
        Some(QuestionBinding {
            filename: filename.to_string(),
            question_title: title.clone(),
        })
    }

    /// 所有题目标题（去重，配置顺序）
    pub fn titles(&self) -> Vec<String> {
        let all: Vec<&String> = match self {
            QuestionBindings::Exact(map) => map.values().collect(),
            QuestionBindings::Regex(rules) => rules.iter().map(|(_, t)| t).collect(),
        };
        let mut titles: Vec<String> = Vec::new();
        for title in all {
            if !titles.contains(title) {
                titles.push(title.clone());
            }
        }
        titles
    }
}

/// 匹配结果
#[derive(Debug, Default)]
pub struct MatchReport {
    /// 按键排序的提交单元
    pub units: Vec<SubmissionUnit>,
    /// 被排除文件的 `failed` 结果
    pub outcomes: Vec<Outcome>,
    /// 符合 glob 的文件总数
    pub discovered: usize,
}

/// 文件匹配器
pub struct Matcher {
    key_rule: KeyRule,
}

impl Matcher {
    pub fn new(key_rule: KeyRule) -> Self {
        Self { key_rule }
    }

    /// 枚举、匹配并分组
    ///
    /// # 参数
    /// - `base_dir`: 学生文件根目录
    /// - `pattern`: 相对 `base_dir` 的 glob（`/` 分隔）
    /// - `bindings`: 题目绑定
    /// - `identities`: 名单
    ///
    /// # 返回
    /// `base_dir` 不存在或不是目录时报错，其余问题都记录为单个文件的结果
    pub fn match_units(
        &self,
        base_dir: &Path,
        pattern: &str,
        bindings: &QuestionBindings,
        identities: &IdentityMap,
    ) -> Result<MatchReport, MatchError> {
        if !base_dir.is_dir() {
            return Err(MatchError::BaseDir {
                path: base_dir.to_path_buf(),
                reason: if base_dir.exists() {
                    "not a directory".to_string()
                } else {
                    "does not exist".to_string()
                },
            });
        }
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| MatchError::BaseDir {
                path: base_dir.to_path_buf(),
                reason: format!("invalid file pattern: {}", e),
            })?
            .compile_matcher();

        let files = discover(base_dir, &glob);
        info!(
            "🔎 {} 下找到 {} 个匹配 {} 的文件",
            base_dir.display(),
            files.len(),
            pattern
        );

        let mut report = MatchReport {
            discovered: files.len(),
            ..Default::default()
        };
        let mut units: BTreeMap<String, SubmissionUnit> = BTreeMap::new();

        for found in files {
            let shown = found.relative_display();

            let Some(key) = self.key_rule.derive(&found.relative) else {
                let err = MatchError::NoKey {
                    path: found.relative.clone(),
                };
                warn!("❌ {}: {}", shown, err);
                report
                    .outcomes
                    .push(Outcome::failed(Stage::Match, None, &shown, err.to_string()));
                continue;
            };

            let Some(identity) = identities.get(&key) else {
                let err = MatchError::UnmappedFile { key: key.clone() };
                warn!("❌ {} (键 {}): {}", shown, key, err);
                report
                    .outcomes
                    .push(Outcome::failed(Stage::Match, None, &shown, err.to_string()));
                continue;
            };

            let filename = found.file_name();
            let Some(binding) = bindings.resolve(&filename) else {
                let err = MatchError::NoBinding {
                    filename: filename.clone(),
                };
                warn!("[学生 {}] ❌ {}: {}", key, shown, err);
                report.outcomes.push(Outcome::failed(
                    Stage::Match,
                    Some(key.as_str()),
                    &shown,
                    err.to_string(),
                ));
                continue;
            };

            debug!("[学生 {}] {} → {}", key, shown, binding.question_title);
            units
                .entry(key)
                .or_insert_with(|| SubmissionUnit::new(identity.clone()))
                .files
                .push(BoundFile {
                    file: found.into_file_ref(filename),
                    binding,
                    relative_path: shown,
                });
        }

        report.units = units.into_values().collect();
        info!(
            "✓ 匹配完成: {} 个提交单元，{} 个文件被排除",
            report.units.len(),
            report.outcomes.len()
        );
        Ok(report)
    }
}

struct DiscoveredFile {
    absolute: PathBuf,
    relative: PathBuf,
    size: Option<u64>,
    modified: Option<DateTime<Utc>>,
}

impl DiscoveredFile {
    fn relative_display(&self) -> String {
        relative_slash_path(&self.relative)
    }

    fn file_name(&self) -> String {
        self.relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn into_file_ref(self, name: String) -> FileReference {
        FileReference::local(name, self.absolute).with_metadata(self.size, self.modified)
    }
}

fn relative_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 枚举所有匹配 glob 的普通文件，按相对路径排序
fn discover(base_dir: &Path, glob: &GlobMatcher) -> Vec<DiscoveredFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(base_dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("⚠️ 无法访问目录项: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(base_dir) else {
            continue;
        };
        if !glob.is_match(relative_slash_path(relative)) {
            continue;
        }

        let metadata = entry.metadata().ok();
        files.push(DiscoveredFile {
            absolute: entry.path().to_path_buf(),
            relative: relative.to_path_buf(),
            size: metadata.as_ref().map(|m| m.len()),
            modified: metadata
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
        });
    }

    files.sort_by_key(|f| f.relative_display());
    files
}
