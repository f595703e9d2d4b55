//! 批量下载
//!
//! 有界并发地下载远程文件到目标目录。单个文件失败只记录为 `failed`，不影响其他文件。
//! 同名文件按输入顺序写入，后写覆盖先写。

use crate::config::BasicAuth;
use crate::error::FetchError;
use crate::infrastructure::HttpFetcher;
use crate::models::{FileReference, Outcome, Stage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// 下载结果
#[derive(Debug, Default)]
pub struct DownloadReport {
    /// 每个输入文件一条，顺序与输入一致
    pub outcomes: Vec<Outcome>,
    downloaded: Vec<PathBuf>,
}

impl DownloadReport {
    /// 成功写入磁盘的本地路径（去重，按首次写入顺序）
    pub fn downloaded(&self) -> &[PathBuf] {
        &self.downloaded
    }
}

/// 按完成顺序编号的下载进度
struct DownloadProgress {
    completed: AtomicUsize,
    total: usize,
}

impl DownloadProgress {
    fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    /// 记录一次完成，返回 `[下载 k/total]`
    fn tick(&self) -> String {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        format!("[下载 {}/{}]", done, self.total)
    }
}

/// 下载器
pub struct Downloader {
    fetcher: Arc<dyn HttpFetcher>,
    concurrency: usize,
}

impl Downloader {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
        }
    }

    /// 下载全部文件
    ///
    /// # 参数
    /// - `refs`: 远程文件引用
    /// - `destination`: 目标目录（不存在时创建）
    /// - `auth`: 可选的 Basic 认证
    ///
    /// # 返回
    /// 每个文件的处理结果；只有目标目录无法创建时才整体失败
    pub async fn fetch(
        &self,
        refs: &[FileReference],
        destination: &Path,
        auth: Option<&BasicAuth>,
    ) -> Result<DownloadReport, FetchError> {
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|source| FetchError::Write {
                path: destination.to_path_buf(),
                source,
            })?;

        let total = refs.len();
        info!("📥 开始下载 {} 个文件到 {}", total, destination.display());

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let progress = Arc::new(DownloadProgress::new(total));
        let mut handles = Vec::with_capacity(total);

        for file in refs {
            let semaphore = semaphore.clone();
            let progress = progress.clone();
            let fetcher = self.fetcher.clone();
            let auth = auth.cloned();
            let url = file.url().map(str::to_string);
            let name = file.name.clone();

            let handle = tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => match url {
                        Some(url) => fetch_body(fetcher.as_ref(), &url, auth.as_ref())
                            .await
                            .map_err(|e| e.to_string()),
                        None => Err("not a remote file".to_string()),
                    },
                    Err(e) => Err(format!("download pool closed: {}", e)),
                };

                // 进度按完成顺序输出，写盘仍按输入顺序
                let label = progress.tick();
                match &result {
                    Ok(body) => info!("{} ✓ {} ({} bytes)", label, name, body.len()),
                    Err(message) => warn!("{} ❌ {} 下载失败: {}", label, name, message),
                }
                result
            });
            handles.push(handle);
        }

        let mut report = DownloadReport::default();

        for (file, handle) in refs.iter().zip(handles) {
            let body = match handle.await {
                Ok(Ok(body)) => body,
                Ok(Err(message)) => {
                    report
                        .outcomes
                        .push(Outcome::failed(Stage::Download, None, &file.name, message));
                    continue;
                }
                Err(e) => {
                    error!("❌ {} 下载任务执行失败: {}", file.name, e);
                    report.outcomes.push(Outcome::failed(
                        Stage::Download,
                        None,
                        &file.name,
                        format!("download task failed: {}", e),
                    ));
                    continue;
                }
            };

            let Some(local_name) = sanitize_file_name(&file.name) else {
                warn!("❌ 文件名不可用: {}", file.name);
                report.outcomes.push(Outcome::failed(
                    Stage::Download,
                    None,
                    &file.name,
                    "unusable file name",
                ));
                continue;
            };

            let path = destination.join(&local_name);
            match tokio::fs::write(&path, &body).await {
                Ok(()) => {
                    debug!("已写入 {} → {}", file.name, path.display());
                    report.outcomes.push(Outcome::done(
                        Stage::Download,
                        &file.name,
                        path.display().to_string(),
                    ));
                    if !report.downloaded.contains(&path) {
                        report.downloaded.push(path);
                    }
                }
                Err(source) => {
                    let err = FetchError::Write { path, source };
                    warn!("❌ {}", err);
                    report.outcomes.push(Outcome::failed(
                        Stage::Download,
                        None,
                        &file.name,
                        err.to_string(),
                    ));
                }
            }
        }

        info!(
            "✓ 下载完成: 成功 {}/{}",
            report.downloaded.len(),
            total
        );
        Ok(report)
    }
}

/// 下载一个文件；非 2xx 或 HTML 页面视为失败
async fn fetch_body(
    fetcher: &dyn HttpFetcher,
    url: &str,
    auth: Option<&BasicAuth>,
) -> Result<Vec<u8>, FetchError> {
    let response = fetcher.get(url, auth).await?;
    if !response.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status,
        });
    }
    if response.is_html() {
        return Err(FetchError::HtmlResponse {
            url: url.to_string(),
        });
    }
    Ok(response.body)
}

/// 去掉路径分隔符，拒绝 `.` / `..`
fn sanitize_file_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MockFetcher;
    use crate::models::OutcomeStatus;

    #[tokio::test]
    async fn test_progress_is_numbered_by_completion() {
        let progress = Arc::new(DownloadProgress::new(4));
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let progress = progress.clone();
            tasks.spawn(async move { progress.tick() });
        }

        let mut labels = Vec::new();
        while let Some(label) = tasks.join_next().await {
            labels.push(label.unwrap());
        }
        labels.sort();
        assert_eq!(
            labels,
            vec!["[下载 1/4]", "[下载 2/4]", "[下载 3/4]", "[下载 4/4]"]
        );
    }

    #[tokio::test]
    async fn test_failed_download_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new();
        fetcher.add_file("http://host/a.zip", b"aaa");
        fetcher.add_response("http://host/b.zip", 500, None, b"boom");
        fetcher.add_file("http://host/c.zip", b"ccc");

        let refs = vec![
            FileReference::remote("a.zip", "http://host/a.zip"),
            FileReference::remote("b.zip", "http://host/b.zip"),
            FileReference::remote("c.zip", "http://host/c.zip"),
        ];

        let report = Downloader::new(Arc::new(fetcher), 2)
            .fetch(&refs, dir.path(), None)
            .await
            .unwrap();

        let statuses: Vec<OutcomeStatus> = report.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![OutcomeStatus::Done, OutcomeStatus::Failed, OutcomeStatus::Done]
        );
        assert!(report.outcomes[1].detail.contains("500"));
        assert_eq!(report.downloaded().len(), 2);
        assert_eq!(std::fs::read(dir.path().join("c.zip")).unwrap(), b"ccc");
        assert!(!dir.path().join("b.zip").exists());
    }

    #[tokio::test]
    async fn test_html_response_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new();
        fetcher.add_html("http://host/a.zip", "<html>login</html>");

        let refs = vec![FileReference::remote("a.zip", "http://host/a.zip")];
        let report = Downloader::new(Arc::new(fetcher), 1)
            .fetch(&refs, dir.path(), None)
            .await
            .unwrap();

        assert_eq!(report.outcomes[0].status, OutcomeStatus::Failed);
        assert!(report.outcomes[0].detail.contains("check credentials"));
        assert!(report.downloaded().is_empty());
    }

    #[tokio::test]
    async fn test_same_name_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new();
        fetcher.add_file("http://host/x/a.zip", b"first");
        fetcher.add_file("http://host/y/a.zip", b"second");

        let refs = vec![
            FileReference::remote("a.zip", "http://host/x/a.zip"),
            FileReference::remote("a.zip", "http://host/y/a.zip"),
        ];
        let report = Downloader::new(Arc::new(fetcher), 4)
            .fetch(&refs, &dir.path().join("nested"), None)
            .await
            .unwrap();

        assert_eq!(report.downloaded().len(), 1);
        assert_eq!(
            std::fs::read(dir.path().join("nested/a.zip")).unwrap(),
            b"second"
        );
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b.zip").as_deref(), Some("a_b.zip"));
        assert_eq!(sanitize_file_name(".."), None);
    }
}
