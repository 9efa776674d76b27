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

use chrono::Utc;
use futures::StreamExt;
use metrics::{counter, histogram};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use crate::domain::models::webhook::{WebhookEvent, WebhookStatus};
use crate::domain::repositories::webhook_event_repository::WebhookEventRepository;
use crate::utils::retry_policy::RetryPolicy;
use crate::utils::signature::compute_webhook_signature;
use crate::utils::validators;

/// Webhook工作器
///
/// 轮询待投递事件并POST到回调URL。回调目标和文档URL一样
/// 不可信，发送前通过同一条SSRF验证流水线。投递按
/// at-least-once 语义执行：失败按退避策略重试，重试耗尽的
/// 事件进入死信状态并记录日志，任务的终态不受影响。
#[derive(Clone)]
pub struct WebhookWorker<R: WebhookEventRepository> {
    /// 事件仓库
    repo: Arc<R>,
    /// 签名密钥，为空时不签名
    secret: Option<String>,
    /// HTTP客户端
    client: Client,
    /// 重试退避策略
    retry_policy: RetryPolicy,
    /// 单次投递超时
    delivery_timeout: Duration,
    /// 域名允许列表
    allowed_domains: Vec<String>,
    /// SSRF豁免主机名
    exempt_hosts: Vec<String>,
}

impl<R: WebhookEventRepository> WebhookWorker<R> {
    /// 创建新的Webhook工作器实例
    ///
    /// # 参数
    ///
    /// * `repo` - 事件仓库
    /// * `secret` - 签名密钥，为空时不附加签名头
    /// * `delivery_timeout` - 单次投递超时
    /// * `allowed_domains` - 域名允许列表
    /// * `exempt_hosts` - SSRF豁免主机名
    pub fn new(
        repo: Arc<R>,
        secret: Option<String>,
        delivery_timeout: Duration,
        allowed_domains: Vec<String>,
        exempt_hosts: Vec<String>,
    ) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("Extractrs-Webhook/0.1.0"),
        );
        Self {
            repo,
            secret: secret.filter(|s| !s.is_empty()),
            client: Client::builder()
                .default_headers(headers)
                .build()
                .expect("reqwest client"),
            retry_policy: RetryPolicy::standard(),
            delivery_timeout,
            allowed_domains,
            exempt_hosts,
        }
    }

    /// 运行Webhook工作器
    ///
    /// 启动投递循环，定期处理到期的待投递事件
    pub async fn run(&self) {
        info!("Webhook worker started");
        loop {
            if let Err(e) = self.process_pending_webhooks().await {
                error!("Error processing webhooks: {}", e);
            }
            sleep(Duration::from_secs(5)).await;
        }
    }

    /// 处理到期的待投递事件
    pub async fn process_pending_webhooks(&self) -> anyhow::Result<()> {
        // Batch size
        let batch_size = 50;

        let events = self.repo.find_pending(batch_size).await?;

        if events.is_empty() {
            return Ok(());
        }

        info!("Processing {} pending webhooks", events.len());

        // Process in parallel with bounded concurrency
        let worker = self;
        futures::stream::iter(events)
            .for_each_concurrent(10, |event| {
                let w = worker;
                async move {
                    if let Err(e) = w.deliver_webhook(event).await {
                        error!("Failed to deliver webhook: {}", e);
                    }
                }
            })
            .await;

        Ok(())
    }

    async fn deliver_webhook(&self, mut event: WebhookEvent) -> anyhow::Result<()> {
        info!("Delivering webhook {} to {}", event.id, event.callback_url);
        counter!("webhook_delivery_attempts_total").increment(1);

        // 回调目标和文档URL同样不可信
        if let Err(e) = validators::validate_url(
            &event.callback_url,
            &self.allowed_domains,
            &self.exempt_hosts,
        )
        .await
        {
            error!(
                "Webhook URL blocked by SSRF check ({}): {}",
                event.callback_url, e
            );
            event.status = WebhookStatus::Dead;
            event.error_message = Some(e.to_string());
            self.repo.update(&event).await?;
            counter!("webhook_delivery_failed_total", "reason" => "ssrf_blocked").increment(1);
            return Ok(());
        }

        let start = std::time::Instant::now();

        let body = serde_json::to_vec(&event.payload)?;
        let headers = self.build_headers(&event, &body);

        let response = self
            .client
            .post(&event.callback_url)
            .headers(headers)
            .body(body)
            .timeout(self.delivery_timeout)
            .send()
            .await;

        let duration = start.elapsed();
        histogram!("webhook_delivery_duration_seconds").record(duration.as_secs_f64());

        match response {
            Ok(resp) => {
                // Record response status
                event.response_status = Some(resp.status().as_u16() as i32);

                if resp.status().is_success() {
                    event.status = WebhookStatus::Delivered;
                    event.delivered_at = Some(Utc::now());

                    info!("Webhook {} delivered successfully", event.id);
                    self.repo.update(&event).await?;
                    counter!("webhook_delivery_success_total").increment(1);
                } else {
                    // Non-success status code
                    error!(
                        "Webhook {} delivery failed with status: {}",
                        event.id,
                        resp.status()
                    );
                    self.handle_failure(event).await?;
                    counter!("webhook_delivery_failed_total", "reason" => "http_error")
                        .increment(1);
                }
            }
            Err(e) => {
                // Network or other error
                error!("Webhook {} delivery failed with error: {}", event.id, e);
                event.error_message = Some(e.to_string());
                self.handle_failure(event).await?;
                counter!("webhook_delivery_failed_total", "reason" => "network_error").increment(1);
            }
        }

        Ok(())
    }

    /// 组装投递请求头
    ///
    /// 调用方提供的请求头先写入，Content-Type 与签名头最后
    /// 写入，调用方无法覆盖它们
    fn build_headers(&self, event: &WebhookEvent, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(extra) = &event.extra_headers {
            for (name, value) in extra {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
        }

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        if let Some(secret) = &self.secret {
            let timestamp = Utc::now().timestamp();
            let signature = compute_webhook_signature(secret, timestamp, body);
            if let (Ok(ts_value), Ok(sig_value)) = (
                HeaderValue::from_str(&timestamp.to_string()),
                HeaderValue::from_str(&signature),
            ) {
                headers.insert(HeaderName::from_static("x-webhook-timestamp"), ts_value);
                headers.insert(HeaderName::from_static("x-webhook-signature"), sig_value);
            }
        }

        headers
    }

    async fn handle_failure(&self, mut event: WebhookEvent) -> anyhow::Result<()> {
        let new_attempt_count = event.attempt_count + 1;

        if new_attempt_count >= event.max_retries {
            event.status = WebhookStatus::Dead; // Dead Letter Queue equivalent
            info!(
                "Webhook moved to dead letter state after {} retries",
                event.max_retries
            );
            counter!("webhook_dead_letter_total").increment(1);
        } else {
            event.status = WebhookStatus::Failed;
            event.attempt_count = new_attempt_count;
            event.next_retry_at =
                Some(self.retry_policy.next_retry_time(new_attempt_count as u32, Utc::now()));
        }

        self.repo.update(&event).await?;
        Ok(())
    }
}
