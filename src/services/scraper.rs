//! 目录索引抓取
//!
//! 读取 HTTP 目录索引页面（Apache/nginx autoindex 风格），列出其中符合过滤正则的文件。
//!
//! ## 规则
//!
//! - 按文档顺序收集 `<a href>`
//! - 丢弃 `../`、`/`、`#…`、`?…` 链接以及索引范围之外的链接
//! - 以 `/` 结尾的链接视为子目录：从不作为文件返回，递归模式下按广度优先继续抓取
//! - 结果按首次出现去重

use crate::config::BasicAuth;
use crate::error::FetchError;
use crate::infrastructure::HttpFetcher;
use crate::models::FileReference;
use percent_encoding::percent_decode_str;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// 目录索引抓取器
pub struct Scraper {
    fetcher: Arc<dyn HttpFetcher>,
    auth: Option<BasicAuth>,
    recursive: bool,
}

impl Scraper {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, auth: Option<BasicAuth>, recursive: bool) -> Self {
        Self {
            fetcher,
            auth,
            recursive,
        }
    }

    /// 编译过滤正则（不区分大小写）
    pub fn compile_filter(pattern: &str) -> Result<Regex, regex::Error> {
        regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
    }

    /// 列出索引中所有显示名匹配 `filter` 的文件
    ///
    /// # 参数
    /// - `index_url`: 索引页面地址（自动补全末尾的 `/`）
    /// - `filter`: 作用于显示名的正则
    ///
    /// # 返回
    /// 按发现顺序排列的远程文件引用；根页面不可达或返回非 2xx 时报错
    pub async fn list(
        &self,
        index_url: &str,
        filter: &Regex,
    ) -> Result<Vec<FileReference>, FetchError> {
        let root = normalize_index_url(index_url)?;
        info!("🔍 抓取目录索引: {}", root);

        let mut queue: VecDeque<Url> = VecDeque::from([root.clone()]);
        let mut visited: HashSet<String> = HashSet::new();
        let mut seen_files: HashSet<String> = HashSet::new();
        let mut files = Vec::new();

        while let Some(page_url) = queue.pop_front() {
            if !visited.insert(page_url.to_string()) {
                continue;
            }
            let is_root = page_url == root;

            let html = match self.fetch_page(&page_url).await {
                Ok(Some(html)) => html,
                Ok(None) => continue,
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    warn!("⚠️ 子目录抓取失败，已跳过: {}", e);
                    continue;
                }
            };

            let links = extract_links(&html, &page_url, &root);
            debug!("{} 中找到 {} 个链接", page_url, links.len());

            for link in links {
                if link.path().ends_with('/') {
                    if self.recursive && !visited.contains(link.as_str()) {
                        queue.push_back(link);
                    }
                    continue;
                }

                let name = display_name(&link);
                if name.is_empty() || !filter.is_match(&name) {
                    continue;
                }
                if seen_files.insert(link.to_string()) {
                    files.push(FileReference::remote(name, link.to_string()));
                }
            }
        }

        info!("✓ 目录索引中找到 {} 个匹配文件", files.len());
        Ok(files)
    }

    /// 抓取一个索引页面；非 HTML 响应返回 None
    async fn fetch_page(&self, url: &Url) -> Result<Option<String>, FetchError> {
        let response = self.fetcher.get(url.as_str(), self.auth.as_ref()).await?;
        if !response.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        if !response.is_html() {
            warn!("⚠️ {} 不是 HTML 页面，已跳过", url);
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&response.body).into_owned()))
    }
}

fn normalize_index_url(index_url: &str) -> Result<Url, FetchError> {
    let mut text = index_url.trim().to_string();
    if !text.ends_with('/') {
        text.push('/');
    }
    Url::parse(&text).map_err(|e| FetchError::InvalidUrl {
        url: index_url.to_string(),
        reason: e.to_string(),
    })
}

/// 提取页面中所有位于索引范围内的链接（文档顺序）
///
/// HTML 再不规范也不会报错，最坏情况是没有链接。
fn extract_links(html: &str, page_url: &Url, root: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .map(str::trim)
        .filter(|href| !is_navigation_link(href))
        .filter_map(|href| page_url.join(href).ok())
        .filter(|url| url != root && in_scope(root, url))
        .collect()
}

fn is_navigation_link(href: &str) -> bool {
    href.is_empty()
        || href == "../"
        || href == ".."
        || href == "/"
        || href.starts_with('#')
        || href.starts_with('?')
}

/// 同协议、同主机（含端口），且路径位于索引路径之下
fn in_scope(root: &Url, target: &Url) -> bool {
    if root.scheme() != target.scheme()
        || root.host_str() != target.host_str()
        || root.port_or_known_default() != target.port_or_known_default()
    {
        return false;
    }
    let base_path = root.path().trim_end_matches('/');
    let target_path = target.path().trim_end_matches('/');
    target_path.starts_with(&format!("{}/", base_path))
}

/// URL 路径最后一段，百分号解码
fn display_name(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("");
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
