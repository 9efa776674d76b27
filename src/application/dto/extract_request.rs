// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::models::extraction::{
    ExtractionConfig, ExtractionRequest, DEFAULT_CONSENSUS_THRESHOLD,
};

fn default_passes() -> u32 {
    1
}

/// 提取请求DTO
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractRequestDto {
    pub document_url: Option<String>,
    pub raw_text: Option<String>,
    /// 模型标识符列表，缺省时使用配置的默认模型
    pub providers: Option<Vec<String>>,
    #[serde(default = "default_passes")]
    pub passes: u32,
    pub idempotency_key: Option<String>,
    pub consensus_threshold: Option<f64>,
    pub callback_url: Option<String>,
    pub callback_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub extraction_config: ExtractionConfig,
}

impl ExtractRequestDto {
    /// 转换为领域请求，缺省字段用系统默认值补齐
    pub fn into_request(self, default_provider: &str) -> ExtractionRequest {
        ExtractionRequest {
            document_url: self.document_url,
            raw_text: self.raw_text,
            providers: self
                .providers
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| vec![default_provider.to_string()]),
            passes: self.passes,
            idempotency_key: self.idempotency_key,
            consensus_threshold: self
                .consensus_threshold
                .unwrap_or(DEFAULT_CONSENSUS_THRESHOLD),
            callback_url: self.callback_url,
            callback_headers: self.callback_headers,
            config: self.extraction_config,
        }
    }
}

/// 批量提取请求DTO
#[derive(Debug, Deserialize, Serialize)]
pub struct BatchExtractRequestDto {
    /// 批次唯一标识
    pub batch_id: String,
    /// 待提取的文档列表
    pub documents: Vec<ExtractRequestDto>,
    /// 批次级回调URL，覆盖单个文档的配置
    pub callback_url: Option<String>,
    /// 批次级回调附加请求头
    pub callback_headers: Option<HashMap<String, String>>,
}

/// 任务提交响应DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskSubmitResponse {
    pub task_id: Uuid,
    pub status: String,
    pub message: String,
}

/// 批量提交响应DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchTaskSubmitResponse {
    pub batch_id: String,
    pub task_ids: Vec<Uuid>,
    pub status: String,
    pub message: String,
}

/// 任务撤销响应DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskRevokeResponse {
    pub task_id: Uuid,
    pub status: String,
    pub message: String,
}
