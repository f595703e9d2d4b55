//! HTTP 抓取能力
//!
//! 目录索引抓取和文件下载共用的最小 HTTP 接口。`MockFetcher` 用于测试，
//! 按 URL 返回预置响应并记录调用。

use crate::config::BasicAuth;
use crate::error::FetchError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// HTTP 响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 是否为 HTML 页面
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().starts_with("text/html"))
            .unwrap_or(false)
    }
}

/// GET 请求能力
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// 发起 GET 请求
    ///
    /// 非 2xx 状态码不算错误，由调用方判断。
    async fn get(&self, url: &str, auth: Option<&BasicAuth>) -> Result<FetchResponse, FetchError>;
}

/// 基于 reqwest 的实现
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// 创建带超时的客户端
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str, auth: Option<&BasicAuth>) -> Result<FetchResponse, FetchError> {
        debug!("GET {}", url);

        let mut request = self.client.get(url);
        if let Some(auth) = auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = request.send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(map_err)?.to_vec();

        debug!("GET {} -> {} ({} bytes)", url, status, body.len());

        Ok(FetchResponse {
            status,
            content_type,
            body,
        })
    }
}

/// 测试用的预置响应抓取器
///
/// 未登记的 URL 返回 404。
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, Result<FetchResponse, String>>>>,
    calls: Arc<Mutex<Vec<MockFetch>>>,
}

/// 一次记录下来的调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockFetch {
    pub url: String,
    pub username: Option<String>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个 HTML 页面
    pub fn add_html(&self, url: &str, html: &str) {
        self.add_response(url, 200, Some("text/html; charset=utf-8"), html.as_bytes());
    }

    /// 登记一个二进制文件
    pub fn add_file(&self, url: &str, body: &[u8]) {
        self.add_response(url, 200, Some("application/octet-stream"), body);
    }

    /// 登记任意状态码的响应
    pub fn add_response(&self, url: &str, status: u16, content_type: Option<&str>, body: &[u8]) {
        self.responses.lock().insert(
            url.to_string(),
            Ok(FetchResponse {
                status,
                content_type: content_type.map(str::to_string),
                body: body.to_vec(),
            }),
        );
    }

    /// 登记传输层错误
    pub fn add_transport_error(&self, url: &str, message: &str) {
        self.responses
            .lock()
            .insert(url.to_string(), Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<MockFetch> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl HttpFetcher for MockFetcher {
    async fn get(&self, url: &str, auth: Option<&BasicAuth>) -> Result<FetchResponse, FetchError> {
        self.calls.lock().push(MockFetch {
            url: url.to_string(),
            username: auth.map(|a| a.username.clone()),
        });

        let response = self.responses.lock().get(url).cloned();
        match response {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(FetchError::Transport {
                url: url.to_string(),
                message,
            }),
            None => Ok(FetchResponse {
                status: 404,
                content_type: Some("text/plain".to_string()),
                body: b"not found".to_vec(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_calls_and_defaults_to_404() {
        let fetcher = MockFetcher::new();
        fetcher.add_file("http://host/a.zip", b"PK");

        let auth = BasicAuth {
            username: "tutor".into(),
            password: "pw".into(),
        };
        let hit = fetcher.get("http://host/a.zip", Some(&auth)).await.unwrap();
        let miss = fetcher.get("http://host/b.zip", None).await.unwrap();

        assert!(hit.is_success());
        assert!(!hit.is_html());
        assert_eq!(miss.status, 404);
        assert_eq!(fetcher.call_count(), 2);
        assert_eq!(fetcher.calls()[0].username.as_deref(), Some("tutor"));
    }

    #[test]
    fn test_html_detection_ignores_charset_and_case() {
        let response = FetchResponse {
            status: 200,
            content_type: Some("Text/HTML; charset=UTF-8".into()),
            body: Vec::new(),
        };
        assert!(response.is_html());
    }
}
