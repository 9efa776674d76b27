// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::utils::text_encoding::decode_bytes;
use crate::utils::validators::{self, ValidationError};

/// 单次下载允许跟随的最大重定向次数
const MAX_REDIRECTS: usize = 5;

/// 允许的文本类Content-Type
///
/// 缺失或 application/octet-stream 的响应按尽力而为放行
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "text/plain",
    "text/markdown",
    "text/html",
    "text/csv",
    "text/xml",
    "text/x-markdown",
    "application/json",
    "application/xml",
    "application/xhtml+xml",
];

/// 下载错误类型
#[derive(Error, Debug)]
pub enum DownloadError {
    /// 初始URL未通过SSRF验证
    #[error("URL blocked by SSRF check: {0}")]
    UnsafeUrl(ValidationError),
    /// 重定向目标未通过SSRF验证
    #[error("Redirect to {url} blocked by SSRF check: {reason}")]
    UnsafeRedirect {
        url: String,
        reason: ValidationError,
    },
    /// 重定向次数超限
    #[error("Exceeded maximum of {MAX_REDIRECTS} redirects")]
    TooManyRedirects,
    /// 重定向缺少或携带无效的Location头
    #[error("Invalid redirect location: {0}")]
    InvalidRedirect(String),
    /// 响应体超出大小上限
    #[error("Download exceeded limit of {0} bytes")]
    TooLarge(u64),
    /// 下载超时
    #[error("Download timed out after {0} seconds")]
    Timeout(u64),
    /// 非2xx响应
    #[error("HTTP error status {0}")]
    HttpStatus(u16),
    /// 非文本类Content-Type
    #[error("Unsupported Content-Type '{0}': only plain-text and Markdown documents are accepted")]
    UnsupportedContentType(String),
    /// 网络或协议错误
    #[error("Request failed: {0}")]
    Request(String),
}

/// 下载完成的文档
#[derive(Debug, Clone)]
pub struct DownloadedDocument {
    /// 解码后的文档文本
    pub text: String,
    /// 跟随重定向后的最终URL
    pub final_url: String,
    /// 响应声明的Content-Type（不含参数）
    pub content_type: Option<String>,
}

/// 下载引擎
///
/// 对用户提供的URL执行SSRF安全的文档抓取。初始URL和每一个
/// 重定向目标都重新通过完整的验证流水线；响应体按字节上限
/// 流式读取，超限立即中止而不是无界缓冲。
pub struct DownloadEngine {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: u64,
    allowed_domains: Vec<String>,
    exempt_hosts: Vec<String>,
}

impl DownloadEngine {
    /// 创建新的下载引擎实例
    ///
    /// # 参数
    ///
    /// * `timeout` - 整体下载超时
    /// * `max_bytes` - 响应体大小上限
    /// * `allowed_domains` - 域名允许列表，为空时不限制
    /// * `exempt_hosts` - 跳过SSRF检查的主机名列表
    pub fn new(
        timeout: Duration,
        max_bytes: u64,
        allowed_domains: Vec<String>,
        exempt_hosts: Vec<String>,
    ) -> Self {
        // 重定向由本引擎手动跟随，每一跳都要重新验证
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            client,
            timeout,
            max_bytes,
            allowed_domains,
            exempt_hosts,
        }
    }

    /// 抓取文档
    ///
    /// # 参数
    ///
    /// * `url` - 文档URL
    ///
    /// # 返回值
    ///
    /// * `Ok(DownloadedDocument)` - 解码后的文档
    /// * `Err(DownloadError)` - 验证、传输或大小限制失败
    pub async fn fetch(&self, url: &str) -> Result<DownloadedDocument, DownloadError> {
        tokio::time::timeout(self.timeout, self.fetch_inner(url))
            .await
            .map_err(|_| DownloadError::Timeout(self.timeout.as_secs()))?
    }

    async fn fetch_inner(&self, url: &str) -> Result<DownloadedDocument, DownloadError> {
        let mut current = url.to_string();

        for hop in 0..=MAX_REDIRECTS {
            let validated = validators::validate_url(
                &current,
                &self.allowed_domains,
                &self.exempt_hosts,
            )
            .await
            .map_err(|reason| {
                if hop == 0 {
                    DownloadError::UnsafeUrl(reason)
                } else {
                    DownloadError::UnsafeRedirect {
                        url: current.clone(),
                        reason,
                    }
                }
            })?;

            let response = self
                .client
                .get(validated.clone())
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        DownloadError::Timeout(self.timeout.as_secs())
                    } else {
                        DownloadError::Request(e.to_string())
                    }
                })?;

            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        DownloadError::InvalidRedirect("missing Location header".to_string())
                    })?;
                current = resolve_redirect(&validated, location)?;
                continue;
            }

            return self.read_body(response, current).await;
        }

        Err(DownloadError::TooManyRedirects)
    }

    async fn read_body(
        &self,
        mut response: reqwest::Response,
        final_url: String,
    ) -> Result<DownloadedDocument, DownloadError> {
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16()));
        }

        let raw_content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let mime = raw_content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        if !mime.is_empty()
            && mime != "application/octet-stream"
            && !ALLOWED_CONTENT_TYPES.contains(&mime.as_str())
        {
            return Err(DownloadError::UnsupportedContentType(mime));
        }

        // Content-Length 不可信，但允许在读取响应体之前提前退出
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(DownloadError::TooLarge(self.max_bytes));
            }
        }

        let charset = raw_content_type
            .split(';')
            .skip(1)
            .filter_map(|p| p.trim().strip_prefix("charset="))
            .next()
            .map(|c| c.trim_matches('"').to_string());

        let mut body: Vec<u8> = Vec::new();
        let mut received: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloadError::Request(e.to_string()))?
        {
            received += chunk.len() as u64;
            if received > self.max_bytes {
                return Err(DownloadError::TooLarge(self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        info!("Downloaded {} bytes from {}", body.len(), final_url);

        Ok(DownloadedDocument {
            text: decode_bytes(&body, charset.as_deref()),
            final_url,
            content_type: if mime.is_empty() { None } else { Some(mime) },
        })
    }
}

/// 将重定向Location解析为绝对URL
fn resolve_redirect(base: &Url, location: &str) -> Result<String, DownloadError> {
    base.join(location)
        .map(|u| u.to_string())
        .map_err(|e| DownloadError::InvalidRedirect(e.to_string()))
}
