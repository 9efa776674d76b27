// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Webhook事件实体
///
/// 表示一条待投递的回调通知，携带目标URL、载荷、投递状态
/// 和重试计划。事件在任务到达终态时创建，由投递工作器按
/// at-least-once 语义发送。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// 事件唯一标识符
    pub id: Uuid,
    /// 关联的任务ID
    pub task_id: Uuid,
    /// 回调URL，事件投递的目标地址
    pub callback_url: String,
    /// 调用方提供的附加请求头
    pub extra_headers: Option<HashMap<String, String>>,
    /// 事件载荷，序列化后的终态任务
    pub payload: serde_json::Value,
    /// 事件状态，跟踪投递进度
    pub status: WebhookStatus,
    /// 已尝试投递次数
    pub attempt_count: i32,
    /// 最大重试次数
    pub max_retries: i32,
    /// 最后一次投递的HTTP响应状态
    pub response_status: Option<i32>,
    /// 投递失败时的错误描述
    pub error_message: Option<String>,
    /// 计划的下一次重试时间点
    pub next_retry_at: Option<DateTime<Utc>>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
    /// 成功投递的时间戳
    pub delivered_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    /// 为终态任务创建一条待投递事件
    pub fn new(
        task_id: Uuid,
        callback_url: String,
        extra_headers: Option<HashMap<String, String>>,
        payload: serde_json::Value,
        max_retries: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id,
            callback_url,
            extra_headers,
            payload,
            status: WebhookStatus::Pending,
            attempt_count: 0,
            max_retries,
            response_status: None,
            error_message: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        }
    }
}

/// Webhook状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    /// 待处理，事件已创建但尚未发送
    #[default]
    Pending,
    /// 已投递，事件已成功发送到目标URL
    Delivered,
    /// 发送失败，仍在重试中
    Failed,
    /// 死信，已达到最大重试次数
    Dead,
}
