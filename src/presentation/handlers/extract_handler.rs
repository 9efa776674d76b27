// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{http::StatusCode, response::IntoResponse, Extension, Json};
use std::sync::Arc;

use crate::application::dto::extract_request::{
    BatchExtractRequestDto, BatchTaskSubmitResponse, ExtractRequestDto, TaskSubmitResponse,
};
use crate::application::use_cases::submit_extraction::SubmitExtractionUseCase;
use crate::config::settings::Settings;
use crate::presentation::errors::AppError;
use crate::utils::errors::ExtractionError;

/// 提交单个提取任务
///
/// 接受 `raw_text` 或 `document_url` 之一，可附带回调URL。
/// 返回可用于轮询的任务ID；携带幂等键的重复提交返回原任务ID。
pub async fn create_extraction(
    Extension(use_case): Extension<Arc<SubmitExtractionUseCase>>,
    Extension(settings): Extension<Arc<Settings>>,
    Json(payload): Json<ExtractRequestDto>,
) -> Result<impl IntoResponse, AppError> {
    let request = payload.into_request(&settings.extraction.default_provider);
    let source = request
        .document_url
        .clone()
        .unwrap_or_else(|| "<raw_text>".to_string());

    let outcome = use_case.execute(request, None).await?;

    let message = if outcome.deduplicated {
        "Duplicate request - returning existing task".to_string()
    } else {
        format!("Extraction submitted for {}", source)
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskSubmitResponse {
            task_id: outcome.task_id,
            status: "submitted".to_string(),
            message,
        }),
    ))
}

/// 提交批量提取
///
/// 每个文档创建一个任务并返回全部任务ID，调用方可以独立
/// 轮询或重试单个文档。批次级回调URL覆盖单个文档的配置。
pub async fn create_batch_extraction(
    Extension(use_case): Extension<Arc<SubmitExtractionUseCase>>,
    Extension(settings): Extension<Arc<Settings>>,
    Json(payload): Json<BatchExtractRequestDto>,
) -> Result<impl IntoResponse, AppError> {
    if payload.documents.is_empty() {
        return Err(ExtractionError::Validation(
            "'documents' must not be empty".to_string(),
        )
        .into());
    }

    let document_count = payload.documents.len();
    let mut task_ids = Vec::with_capacity(document_count);

    for document in payload.documents {
        let mut request = document.into_request(&settings.extraction.default_provider);
        if payload.callback_url.is_some() {
            request.callback_url = payload.callback_url.clone();
            request.callback_headers = payload.callback_headers.clone();
        }

        let outcome = use_case
            .execute(request, Some(payload.batch_id.clone()))
            .await?;
        task_ids.push(outcome.task_id);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchTaskSubmitResponse {
            batch_id: payload.batch_id.clone(),
            task_ids,
            status: "submitted".to_string(),
            message: format!(
                "Batch '{}' submitted with {} document(s)",
                payload.batch_id, document_count
            ),
        }),
    ))
}
