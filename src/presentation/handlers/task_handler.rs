// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{extract::Path, http::StatusCode, response::IntoResponse, Extension, Json};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::dto::extract_request::TaskRevokeResponse;
use crate::domain::repositories::task_repository::TaskRepository;
use crate::presentation::errors::AppError;

/// 查询任务状态
///
/// 返回任务的当前状态，终态任务附带结果或错误详情
pub async fn get_task_status(
    Extension(repository): Extension<Arc<dyn TaskRepository>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    match repository.find_by_id(id).await? {
        Some(task) => Ok(Json(json!({
            "task_id": task.id,
            "state": task.state,
            "result": task.result,
            "error": task.error_detail,
            "created_at": task.created_at,
            "completed_at": task.completed_at,
        }))
        .into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Task not found" })),
        )
            .into_response()),
    }
}

/// 撤销任务
///
/// Pending 或 Started 的任务转为 Revoked；已处于终态的任务
/// 不受影响
pub async fn revoke_task(
    Extension(repository): Extension<Arc<dyn TaskRepository>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let applied = repository.mark_revoked(id).await?;

    let response = if applied {
        TaskRevokeResponse {
            task_id: id,
            status: "revoked".to_string(),
            message: "Task revocation applied".to_string(),
        }
    } else {
        TaskRevokeResponse {
            task_id: id,
            status: "unchanged".to_string(),
            message: "Task already reached a terminal state".to_string(),
        }
    };

    Ok(Json(response))
}
