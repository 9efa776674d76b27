// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use extractrs::domain::models::webhook::{WebhookEvent, WebhookStatus};
use extractrs::domain::repositories::webhook_event_repository::WebhookEventRepository;
use extractrs::infrastructure::repositories::webhook_event_repo_impl::InMemoryWebhookEventRepository;
use extractrs::utils::signature::verify_webhook_signature;
use extractrs::workers::webhook_worker::WebhookWorker;

fn worker(
    repo: Arc<InMemoryWebhookEventRepository>,
    secret: Option<&str>,
) -> WebhookWorker<InMemoryWebhookEventRepository> {
    // 本地mock服务器跑在环回地址上，测试通过豁免列表放行
    WebhookWorker::new(
        repo,
        secret.map(String::from),
        Duration::from_secs(5),
        vec![],
        vec!["127.0.0.1".to_string()],
    )
}

fn event(callback_url: String, max_retries: i32) -> WebhookEvent {
    WebhookEvent::new(
        Uuid::new_v4(),
        callback_url,
        None,
        serde_json::json!({ "state": "SUCCESS", "result": { "entities": [] } }),
        max_retries,
    )
}

#[tokio::test]
async fn test_delivery_carries_verifiable_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let repo = Arc::new(InMemoryWebhookEventRepository::new());
    let created = repo
        .create(&event(format!("{}/hook", server.uri()), 3))
        .await
        .unwrap();

    worker(repo.clone(), Some("shared-secret"))
        .process_pending_webhooks()
        .await
        .unwrap();

    let delivered = repo.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(delivered.status, WebhookStatus::Delivered);
    assert!(delivered.delivered_at.is_some());
    assert_eq!(delivered.response_status, Some(200));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let received = &requests[0];

    assert_eq!(
        received.headers.get("content-type").unwrap(),
        "application/json"
    );
    let timestamp: i64 = received
        .headers
        .get("x-webhook-timestamp")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let signature = received
        .headers
        .get("x-webhook-signature")
        .unwrap()
        .to_str()
        .unwrap();

    // 接收方用同一密钥对 "{timestamp}.{body}" 校验
    assert!(verify_webhook_signature(
        "shared-secret",
        timestamp,
        &received.body,
        signature,
        Utc::now().timestamp(),
    ));
    assert!(!verify_webhook_signature(
        "wrong-secret",
        timestamp,
        &received.body,
        signature,
        Utc::now().timestamp(),
    ));
}

#[tokio::test]
async fn test_failed_delivery_schedules_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let repo = Arc::new(InMemoryWebhookEventRepository::new());
    let created = repo
        .create(&event(format!("{}/hook", server.uri()), 3))
        .await
        .unwrap();

    worker(repo.clone(), None)
        .process_pending_webhooks()
        .await
        .unwrap();

    let failed = repo.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(failed.status, WebhookStatus::Failed);
    assert_eq!(failed.attempt_count, 1);
    assert_eq!(failed.response_status, Some(500));
    assert!(failed.next_retry_at.unwrap() > Utc::now());
}

#[tokio::test]
async fn test_retries_exhausted_moves_to_dead_letter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let repo = Arc::new(InMemoryWebhookEventRepository::new());
    let created = repo
        .create(&event(format!("{}/hook", server.uri()), 1))
        .await
        .unwrap();

    worker(repo.clone(), None)
        .process_pending_webhooks()
        .await
        .unwrap();

    let dead = repo.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(dead.status, WebhookStatus::Dead);
    // 死信事件不再被投递循环选中
    assert!(repo.find_pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsafe_callback_blocked_without_network_call() {
    let repo = Arc::new(InMemoryWebhookEventRepository::new());
    let created = repo
        .create(&event(
            "http://169.254.169.254/latest/meta-data".to_string(),
            3,
        ))
        .await
        .unwrap();

    // 豁免列表为空，SSRF检查生效
    let blocked_worker = WebhookWorker::new(
        repo.clone(),
        None,
        Duration::from_secs(5),
        vec![],
        vec![],
    );
    blocked_worker.process_pending_webhooks().await.unwrap();

    let blocked = repo.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(blocked.status, WebhookStatus::Dead);
    assert!(blocked.error_message.unwrap().contains("private"));
}
