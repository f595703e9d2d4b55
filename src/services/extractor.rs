//! 压缩包解压
//!
//! 逐个展开 zip 压缩包。损坏的压缩包记录为 `failed`（"corrupt archive"），
//! 其余压缩包照常处理。会逃出目标目录的条目被跳过。

use crate::config::ExtractConfig;
use crate::error::ExtractError;
use crate::models::{Outcome, Stage};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 解压器
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    target_dir: Option<PathBuf>,
    with_stem: bool,
    remove_archives: bool,
}

impl Extractor {
    pub fn from_config(config: &ExtractConfig) -> Self {
        Self {
            target_dir: config.target_dir.clone(),
            with_stem: config.with_stem,
            remove_archives: config.remove_archives,
        }
    }

    /// 未配置 `target_dir` 时使用的目标目录
    pub fn with_default_target(mut self, dir: &Path) -> Self {
        if self.target_dir.is_none() {
            self.target_dir = Some(dir.to_path_buf());
        }
        self
    }

    /// 解压目录下（不递归）所有 `.zip` 文件，按文件名排序
    pub async fn extract_all(&self, dir: &Path) -> Result<Vec<Outcome>, ExtractError> {
        let mut archives = Vec::new();
        let entries = fs::read_dir(dir).map_err(|source| ExtractError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && is_zip(&path) {
                archives.push(path);
            }
        }
        archives.sort();
        Ok(self.extract_archives(&archives).await)
    }

    /// 解压给定的压缩包，每个压缩包一条结果
    ///
    /// 非 zip 文件直接忽略（不产生结果）。
    pub async fn extract_archives(&self, archives: &[PathBuf]) -> Vec<Outcome> {
        let archives: Vec<PathBuf> = archives.iter().filter(|p| is_zip(p)).cloned().collect();
        if archives.is_empty() {
            return Vec::new();
        }
        info!("🗜️ 开始解压 {} 个压缩包", archives.len());

        let extractor = self.clone();
        let result =
            tokio::task::spawn_blocking(move || extractor.extract_archives_blocking(&archives))
                .await;

        match result {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!("❌ 解压任务执行失败: {}", e);
                Vec::new()
            }
        }
    }

    fn extract_archives_blocking(&self, archives: &[PathBuf]) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(archives.len());
        for archive in archives {
            let name = archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| archive.display().to_string());
            let target = self.target_for(archive);

            match extract_one(archive, &target) {
                Ok(count) => {
                    info!("✓ 已解压 {} → {} ({} 个文件)", name, target.display(), count);
                    if self.remove_archives {
                        if let Err(e) = fs::remove_file(archive) {
                            warn!("⚠️ 无法删除压缩包 {}: {}", archive.display(), e);
                        }
                    }
                    outcomes.push(Outcome::done(
                        Stage::Extract,
                        name,
                        format!("{} entries extracted to {}", count, target.display()),
                    ));
                }
                Err(e) => {
                    warn!("❌ 解压失败 {}: {}", name, e);
                    outcomes.push(Outcome::failed(Stage::Extract, None, name, e.to_string()));
                }
            }
        }
        outcomes
    }

    fn target_for(&self, archive: &Path) -> PathBuf {
        let base = match &self.target_dir {
            Some(dir) => dir.clone(),
            None => archive
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        if self.with_stem {
            match archive.file_stem() {
                Some(stem) => base.join(stem),
                None => base,
            }
        } else {
            base
        }
    }
}

/// 是否为 zip 压缩包（按扩展名判断）
pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// 解压一个压缩包，返回写出的文件数
fn extract_one(archive: &Path, target: &Path) -> Result<usize, ExtractError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| ExtractError::Io { path, source }
    };
    let corrupt = |source: zip::result::ZipError| ExtractError::Corrupt {
        path: archive.to_path_buf(),
        source,
    };

    let file = fs::File::open(archive).map_err(io_err(archive))?;
    let mut zip = zip::ZipArchive::new(file).map_err(corrupt)?;
    fs::create_dir_all(target).map_err(io_err(target))?;

    let mut written = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(corrupt)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("⚠️ 跳过不安全的条目: {}", entry.name());
            continue;
        };
        let out_path = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(io_err(&out_path))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let mut out = fs::File::create(&out_path).map_err(io_err(&out_path))?;
        io::copy(&mut entry, &mut out).map_err(|source| {
            if source.kind() == io::ErrorKind::InvalidData {
                ExtractError::Corrupt {
                    path: archive.to_path_buf(),
                    source: zip::result::ZipError::Io(source),
                }
            } else {
                ExtractError::Io {
                    path: out_path.clone(),
                    source,
                }
            }
        })?;
        written += 1;
    }
    Ok(written)
}
