// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::webhook::WebhookEvent;
use crate::domain::repositories::task_repository::RepositoryError;
use async_trait::async_trait;
use uuid::Uuid;

/// Webhook事件仓库特质
///
/// 定义待投递回调事件的数据访问接口
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// 创建新事件
    async fn create(&self, event: &WebhookEvent) -> Result<WebhookEvent, RepositoryError>;
    /// 根据ID查找事件
    async fn find_by_id(&self, id: Uuid) -> Result<Option<WebhookEvent>, RepositoryError>;
    /// 查找到期的待投递事件（Pending，或 Failed 且已到重试时间）
    async fn find_pending(&self, limit: usize) -> Result<Vec<WebhookEvent>, RepositoryError>;
    /// 更新事件
    async fn update(&self, event: &WebhookEvent) -> Result<WebhookEvent, RepositoryError>;
}
