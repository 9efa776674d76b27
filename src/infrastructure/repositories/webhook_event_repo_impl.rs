// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::models::webhook::{WebhookEvent, WebhookStatus};
use crate::domain::repositories::task_repository::RepositoryError;
use crate::domain::repositories::webhook_event_repository::WebhookEventRepository;

/// 内存Webhook事件仓库
///
/// 投递队列的进程内实现。跨进程崩溃的投递不保证恰好一次，
/// at-least-once 加幂等重试是对外契约。
pub struct InMemoryWebhookEventRepository {
    events: DashMap<Uuid, WebhookEvent>,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
        }
    }
}

impl Default for InMemoryWebhookEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn create(&self, event: &WebhookEvent) -> Result<WebhookEvent, RepositoryError> {
        self.events.insert(event.id, event.clone());
        Ok(event.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<WebhookEvent>, RepositoryError> {
        Ok(self.events.get(&id).map(|e| e.clone()))
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<WebhookEvent>, RepositoryError> {
        let now = Utc::now();
        let mut due: Vec<WebhookEvent> = self
            .events
            .iter()
            .filter(|entry| match entry.value().status {
                WebhookStatus::Pending => true,
                WebhookStatus::Failed => entry
                    .value()
                    .next_retry_at
                    .map(|at| at <= now)
                    .unwrap_or(true),
                _ => false,
            })
            .map(|entry| entry.value().clone())
            .collect();

        due.sort_by_key(|e| e.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn update(&self, event: &WebhookEvent) -> Result<WebhookEvent, RepositoryError> {
        if !self.events.contains_key(&event.id) {
            return Err(RepositoryError::NotFound);
        }
        let mut updated = event.clone();
        updated.updated_at = Utc::now();
        self.events.insert(updated.id, updated.clone());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> WebhookEvent {
        WebhookEvent::new(
            Uuid::new_v4(),
            "https://example.com/hook".to_string(),
            None,
            serde_json::json!({"state": "SUCCESS"}),
            3,
        )
    }

    #[tokio::test]
    async fn test_pending_events_are_due_immediately() {
        let repo = InMemoryWebhookEventRepository::new();
        repo.create(&event()).await.unwrap();
        assert_eq!(repo.find_pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_event_waits_for_retry_time() {
        let repo = InMemoryWebhookEventRepository::new();
        let mut failing = event();
        failing.status = WebhookStatus::Failed;
        failing.next_retry_at = Some(Utc::now() + chrono::Duration::minutes(5));
        repo.create(&failing).await.unwrap();

        assert!(repo.find_pending(10).await.unwrap().is_empty());

        failing.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
        repo.update(&failing).await.unwrap();
        assert_eq!(repo.find_pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delivered_and_dead_events_excluded() {
        let repo = InMemoryWebhookEventRepository::new();
        let mut delivered = event();
        delivered.status = WebhookStatus::Delivered;
        let mut dead = event();
        dead.status = WebhookStatus::Dead;
        repo.create(&delivered).await.unwrap();
        repo.create(&dead).await.unwrap();

        assert!(repo.find_pending(10).await.unwrap().is_empty());
    }
}
