// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::extraction::ExtractionResult;
use crate::domain::models::task::Task;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 存储后端错误
    #[error("Storage error: {0}")]
    Storage(String),
    /// 记录未找到
    #[error("Record not found")]
    NotFound,
    /// 记录序列化/反序列化失败
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// 任务仓库特质
///
/// 定义任务记录的数据访问接口。任务的所有权在
/// `acquire_next` 的 Pending → Started 转换处被认领，
/// 同一任务在任意时刻至多被一个工作器持有。
///
/// 终态转换方法返回 `bool`：`true` 表示转换生效，`false`
/// 表示任务已处于终态（例如执行期间被撤销），调用方应当
/// 丢弃手头的结果。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建新任务并将其加入待处理队列
    async fn create(&self, task: &Task) -> Result<Task, RepositoryError>;

    /// 根据ID查找任务
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, RepositoryError>;

    /// 认领下一个待处理任务
    ///
    /// 原子地将队首的 Pending 任务转换为 Started 并返回；
    /// 已撤销的排队任务被跳过。没有可认领任务时返回 None。
    async fn acquire_next(&self, worker_id: Uuid) -> Result<Option<Task>, RepositoryError>;

    /// 标记任务成功并记录结果
    async fn mark_success(
        &self,
        id: Uuid,
        result: ExtractionResult,
    ) -> Result<bool, RepositoryError>;

    /// 标记任务失败并记录错误详情
    async fn mark_failure(&self, id: Uuid, error_detail: String) -> Result<bool, RepositoryError>;

    /// 撤销任务
    ///
    /// Pending 或 Started 的任务转换为 Revoked；已处于终态的
    /// 任务不受影响（返回 `false`）。
    async fn mark_revoked(&self, id: Uuid) -> Result<bool, RepositoryError>;
}
