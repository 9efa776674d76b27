// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::task_repository::RepositoryError;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// 幂等记录仓库特质
///
/// 维护幂等键到任务ID的映射。对同一个键，至多创建一个
/// 存活的任务：并发提交竞争写入时恰好一方胜出，败者读到
/// 胜者的任务ID。记录的TTL与任务结果的TTL一致。
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// 查询幂等键对应的已有任务ID
    async fn get(&self, key: &str) -> Result<Option<Uuid>, RepositoryError>;

    /// 原子地写入幂等记录
    ///
    /// 键不存在时写入并返回 `None`（本次提交胜出）；键已
    /// 存在时不做修改，返回已有的任务ID。
    async fn put_if_absent(
        &self,
        key: &str,
        task_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<Uuid>, RepositoryError>;
}
