// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::models::extraction::ExtractionResult;
use crate::domain::models::task::{Task, TaskState};
use crate::domain::repositories::task_repository::{RepositoryError, TaskRepository};
use crate::infrastructure::cache::redis_client::RedisClient;

/// Redis任务键前缀
const TASK_KEY_PREFIX: &str = "task:";
/// Redis待处理任务队列键
const TASK_QUEUE_KEY: &str = "task_queue";

/// 内存任务仓库
///
/// 单进程模式与测试使用。认领和终态转换在 DashMap 条目锁
/// 内完成，保证同一任务不会被两个工作器同时持有。
pub struct InMemoryTaskRepository {
    tasks: DashMap<Uuid, Task>,
    queue: Mutex<VecDeque<Uuid>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> Result<Task, RepositoryError> {
        self.tasks.insert(task.id, task.clone());
        self.queue
            .lock()
            .map_err(|_| RepositoryError::Storage("queue lock poisoned".to_string()))?
            .push_back(task.id);
        Ok(task.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, RepositoryError> {
        Ok(self.tasks.get(&id).map(|t| t.clone()))
    }

    async fn acquire_next(&self, _worker_id: Uuid) -> Result<Option<Task>, RepositoryError> {
        loop {
            let next = {
                let mut queue = self
                    .queue
                    .lock()
                    .map_err(|_| RepositoryError::Storage("queue lock poisoned".to_string()))?;
                queue.pop_front()
            };
            let Some(id) = next else {
                return Ok(None);
            };

            if let Some(mut entry) = self.tasks.get_mut(&id) {
                // 入队后被撤销的任务直接跳过
                if entry.state == TaskState::Pending {
                    entry.state = TaskState::Started;
                    entry.started_at = Some(Utc::now());
                    return Ok(Some(entry.clone()));
                }
            }
        }
    }

    async fn mark_success(
        &self,
        id: Uuid,
        result: ExtractionResult,
    ) -> Result<bool, RepositoryError> {
        let Some(mut entry) = self.tasks.get_mut(&id) else {
            return Err(RepositoryError::NotFound);
        };
        if entry.state != TaskState::Started {
            return Ok(false);
        }
        entry.state = TaskState::Success;
        entry.result = Some(result);
        entry.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_failure(&self, id: Uuid, error_detail: String) -> Result<bool, RepositoryError> {
        let Some(mut entry) = self.tasks.get_mut(&id) else {
            return Err(RepositoryError::NotFound);
        };
        if entry.state != TaskState::Started {
            return Ok(false);
        }
        entry.state = TaskState::Failure;
        entry.error_detail = Some(error_detail);
        entry.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_revoked(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let Some(mut entry) = self.tasks.get_mut(&id) else {
            return Err(RepositoryError::NotFound);
        };
        if entry.state.is_terminal() {
            return Ok(false);
        }
        entry.state = TaskState::Revoked;
        entry.completed_at = Some(Utc::now());
        Ok(true)
    }
}

/// Redis任务仓库
///
/// 任务记录以JSON形式存储在 `task:{id}` 下并带结果TTL，
/// 待处理队列为Redis列表。认领通过队列弹出实现：一个任务ID
/// 只会被弹出一次，弹出后的 Pending → Started 转换由认领方
/// 独占执行。
pub struct RedisTaskRepository {
    client: RedisClient,
    result_expires: usize,
}

impl RedisTaskRepository {
    /// 创建新的Redis任务仓库实例
    ///
    /// # 参数
    ///
    /// * `client` - Redis客户端
    /// * `result_expires` - 任务记录TTL（秒）
    pub fn new(client: RedisClient, result_expires: usize) -> Self {
        Self {
            client,
            result_expires,
        }
    }

    fn task_key(id: Uuid) -> String {
        format!("{}{}", TASK_KEY_PREFIX, id)
    }

    async fn load(&self, id: Uuid) -> Result<Option<Task>, RepositoryError> {
        let raw = self
            .client
            .get(&Self::task_key(id))
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, task: &Task) -> Result<(), RepositoryError> {
        let raw = serde_json::to_string(task)?;
        self.client
            .set(&Self::task_key(task.id), &raw, self.result_expires)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))
    }
}

#[async_trait]
impl TaskRepository for RedisTaskRepository {
    async fn create(&self, task: &Task) -> Result<Task, RepositoryError> {
        self.store(task).await?;
        self.client
            .lpush(TASK_QUEUE_KEY, &task.id.to_string())
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(task.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, RepositoryError> {
        self.load(id).await
    }

    async fn acquire_next(&self, _worker_id: Uuid) -> Result<Option<Task>, RepositoryError> {
        loop {
            let popped = self
                .client
                .rpop(TASK_QUEUE_KEY)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;
            let Some(raw_id) = popped else {
                return Ok(None);
            };
            let Ok(id) = Uuid::parse_str(&raw_id) else {
                continue;
            };

            match self.load(id).await? {
                Some(task) if task.state == TaskState::Pending => {
                    let started = task
                        .start()
                        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
                    self.store(&started).await?;
                    return Ok(Some(started));
                }
                // 记录已过期或任务已被撤销，继续取下一个
                _ => continue,
            }
        }
    }

    async fn mark_success(
        &self,
        id: Uuid,
        result: ExtractionResult,
    ) -> Result<bool, RepositoryError> {
        let Some(task) = self.load(id).await? else {
            return Err(RepositoryError::NotFound);
        };
        if task.state != TaskState::Started {
            return Ok(false);
        }
        let completed = task
            .succeed(result)
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        self.store(&completed).await?;
        Ok(true)
    }

    async fn mark_failure(&self, id: Uuid, error_detail: String) -> Result<bool, RepositoryError> {
        let Some(task) = self.load(id).await? else {
            return Err(RepositoryError::NotFound);
        };
        if task.state != TaskState::Started {
            return Ok(false);
        }
        let failed = task
            .fail(error_detail)
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        self.store(&failed).await?;
        Ok(true)
    }

    async fn mark_revoked(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let Some(task) = self.load(id).await? else {
            return Err(RepositoryError::NotFound);
        };
        if task.state.is_terminal() {
            return Ok(false);
        }
        let revoked = task
            .revoke()
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        self.store(&revoked).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::extraction::{ExtractionRequest, ResultMetadata};

    fn task() -> Task {
        Task::new(ExtractionRequest {
            raw_text: Some("Acme Corporation retained Beta LLC.".to_string()),
            ..ExtractionRequest::default()
        })
    }

    fn result() -> ExtractionResult {
        ExtractionResult {
            entities: vec![],
            metadata: ResultMetadata {
                provider_label: "gpt-4o".to_string(),
                tokens_used: None,
                processing_time_ms: 1,
                cache_hit: false,
            },
        }
    }

    #[tokio::test]
    async fn test_acquire_claims_pending_task() {
        let repo = InMemoryTaskRepository::new();
        let created = repo.create(&task()).await.unwrap();

        let claimed = repo.acquire_next(Uuid::new_v4()).await.unwrap().unwrap();
        assert_eq!(claimed.id, created.id);
        assert_eq!(claimed.state, TaskState::Started);

        // 队列已空
        assert!(repo.acquire_next(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_acquire_skips_revoked_task() {
        let repo = InMemoryTaskRepository::new();
        let created = repo.create(&task()).await.unwrap();
        assert!(repo.mark_revoked(created.id).await.unwrap());

        assert!(repo.acquire_next(Uuid::new_v4()).await.unwrap().is_none());
        let stored = repo.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Revoked);
    }

    #[tokio::test]
    async fn test_mark_success_discarded_after_revoke() {
        let repo = InMemoryTaskRepository::new();
        let created = repo.create(&task()).await.unwrap();
        repo.acquire_next(Uuid::new_v4()).await.unwrap().unwrap();

        // 执行期间被撤销，结果必须被丢弃
        assert!(repo.mark_revoked(created.id).await.unwrap());
        assert!(!repo.mark_success(created.id, result()).await.unwrap());

        let stored = repo.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Revoked);
        assert!(stored.result.is_none());
    }

    #[tokio::test]
    async fn test_revoke_terminal_task_is_noop() {
        let repo = InMemoryTaskRepository::new();
        let created = repo.create(&task()).await.unwrap();
        repo.acquire_next(Uuid::new_v4()).await.unwrap().unwrap();
        assert!(repo.mark_success(created.id, result()).await.unwrap());

        assert!(!repo.mark_revoked(created.id).await.unwrap());
        let stored = repo.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Success);
    }

    #[tokio::test]
    async fn test_mark_unknown_task_is_not_found() {
        let repo = InMemoryTaskRepository::new();
        assert!(matches!(
            repo.mark_failure(Uuid::new_v4(), "x".to_string()).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
