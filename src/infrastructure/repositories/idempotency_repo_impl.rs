// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::domain::repositories::idempotency_repository::IdempotencyRepository;
use crate::domain::repositories::task_repository::RepositoryError;
use crate::infrastructure::cache::redis_client::RedisClient;

/// Redis幂等键前缀
const IDEMPOTENCY_KEY_PREFIX: &str = "idempotency:";

/// 内存幂等记录仓库
///
/// 写入竞争通过 DashMap 条目级API原子化：并发提交同一个键
/// 时恰好一方占据条目，其余读到胜者的任务ID
pub struct InMemoryIdempotencyRepository {
    records: DashMap<String, (Uuid, Instant)>,
}

impl InMemoryIdempotencyRepository {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl Default for InMemoryIdempotencyRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryIdempotencyRepository {
    async fn get(&self, key: &str) -> Result<Option<Uuid>, RepositoryError> {
        match self.records.get(key) {
            Some(entry) if Instant::now() < entry.value().1 => Ok(Some(entry.value().0)),
            _ => Ok(None),
        }
    }

    async fn put_if_absent(
        &self,
        key: &str,
        task_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<Uuid>, RepositoryError> {
        let expires_at = Instant::now() + ttl;
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let (existing, existing_expiry) = *occupied.get();
                if Instant::now() < existing_expiry {
                    Ok(Some(existing))
                } else {
                    // 过期记录被新提交覆盖
                    occupied.insert((task_id, expires_at));
                    Ok(None)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert((task_id, expires_at));
                Ok(None)
            }
        }
    }
}

/// Redis幂等记录仓库
///
/// 依赖 `SET NX EX` 保证对同一个键恰好一次写入胜出
pub struct RedisIdempotencyRepository {
    client: RedisClient,
}

impl RedisIdempotencyRepository {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    fn record_key(key: &str) -> String {
        format!("{}{}", IDEMPOTENCY_KEY_PREFIX, key)
    }
}

#[async_trait]
impl IdempotencyRepository for RedisIdempotencyRepository {
    async fn get(&self, key: &str) -> Result<Option<Uuid>, RepositoryError> {
        let raw = self
            .client
            .get(&Self::record_key(key))
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(raw.and_then(|r| Uuid::parse_str(&r).ok()))
    }

    async fn put_if_absent(
        &self,
        key: &str,
        task_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<Uuid>, RepositoryError> {
        let record_key = Self::record_key(key);
        let ttl_seconds = ttl.as_secs().max(1) as usize;

        // 两次尝试覆盖写入与读取之间记录刚好过期的窗口
        for _ in 0..2 {
            let won = self
                .client
                .set_nx_ex(&record_key, &task_id.to_string(), ttl_seconds)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;
            if won {
                return Ok(None);
            }
            if let Some(existing) = self.get(key).await? {
                return Ok(Some(existing));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_writer_wins() {
        let repo = InMemoryIdempotencyRepository::new();
        let winner = Uuid::new_v4();
        let loser = Uuid::new_v4();
        let ttl = Duration::from_secs(60);

        assert_eq!(repo.put_if_absent("key", winner, ttl).await.unwrap(), None);
        assert_eq!(
            repo.put_if_absent("key", loser, ttl).await.unwrap(),
            Some(winner)
        );
        assert_eq!(repo.get("key").await.unwrap(), Some(winner));
    }

    #[tokio::test]
    async fn test_expired_record_is_replaced() {
        let repo = InMemoryIdempotencyRepository::new();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();

        assert_eq!(
            repo.put_if_absent("key", old, Duration::ZERO).await.unwrap(),
            None
        );
        assert_eq!(repo.get("key").await.unwrap(), None);
        assert_eq!(
            repo.put_if_absent("key", new, Duration::from_secs(60))
                .await
                .unwrap(),
            None
        );
        assert_eq!(repo.get("key").await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn test_concurrent_submissions_single_winner() {
        use std::sync::Arc;

        let repo = Arc::new(InMemoryIdempotencyRepository::new());
        let ttl = Duration::from_secs(60);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let candidate = Uuid::new_v4();
                match repo.put_if_absent("shared", candidate, ttl).await.unwrap() {
                    None => candidate,
                    Some(winner) => winner,
                }
            }));
        }

        let mut observed = std::collections::HashSet::new();
        for handle in handles {
            observed.insert(handle.await.unwrap());
        }
        // 所有并发提交观察到同一个胜者
        assert_eq!(observed.len(), 1);
    }
}
