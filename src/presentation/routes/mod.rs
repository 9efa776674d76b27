// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::presentation::handlers::{extract_handler, task_handler};

/// 创建应用路由
///
/// # 返回值
///
/// 返回配置好的路由
pub fn routes() -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/version", get(version));

    let api_routes = Router::new()
        .route("/v1/extract", post(extract_handler::create_extraction))
        .route(
            "/v1/extract/batch",
            post(extract_handler::create_batch_extraction),
        )
        .route(
            "/v1/tasks/{id}",
            get(task_handler::get_task_status).delete(task_handler::revoke_task),
        );

    public_routes.merge(api_routes)
}

/// 健康检查
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// 版本信息
async fn version() -> Json<serde_json::Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}
