// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::models::extraction::{ExtractionResult, FewShotExample};
use crate::infrastructure::cache::redis_client::RedisClient;

/// 缓存键前缀，保持键空间有序
const CACHE_KEY_PREFIX: &str = "extraction_cache:";

/// 参与缓存键的文本长度上限
///
/// 超长文本先做一次SHA-256压缩，避免拼接时的内存峰值
const TEXT_HASH_THRESHOLD: usize = 50_000;

/// 派生提取结果的确定性缓存键
///
/// 按固定顺序拼接所有影响提取输出的参数：规范化文档文本、
/// 提示词、少样本示例的顺序无关规范化序列化、排序后的提供商
/// 列表、温度、轮数和共识阈值，以 `\0` 连接后取SHA-256的
/// 十六进制摘要。提示词或任一调优参数的变化都会产生不同的
/// 键，不会出现跨版本的陈旧命中。
pub fn cache_key(
    text: &str,
    prompt_description: &str,
    examples: &[FewShotExample],
    providers: &[String],
    temperature: Option<f64>,
    passes: u32,
    consensus_threshold: f64,
) -> String {
    let text_component = if text.len() > TEXT_HASH_THRESHOLD {
        hex::encode(Sha256::digest(text.as_bytes()))
    } else {
        text.to_string()
    };

    // 示例按序列化形式排序，使键对示例列表的顺序不敏感
    let mut serialized_examples: Vec<String> = examples
        .iter()
        .map(|e| serde_json::to_string(e).unwrap_or_default())
        .collect();
    serialized_examples.sort();

    let mut sorted_providers: Vec<&str> = providers.iter().map(|p| p.as_str()).collect();
    sorted_providers.sort_unstable();

    let parts = [
        text_component,
        prompt_description.to_string(),
        serialized_examples.join(","),
        sorted_providers.join(","),
        temperature.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string()),
        passes.to_string(),
        consensus_threshold.to_string(),
    ];

    hex::encode(Sha256::digest(parts.join("\0").as_bytes()))
}

/// 缓存后端特质
///
/// 后端的过期由其自身强制（Redis TTL / 内存条目时间戳），
/// 本组件不做主动扫描
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// 获取缓存值
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// 写入缓存值并指定TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// 内存缓存后端
///
/// 单进程模式下使用，条目带过期时间戳，读取时惰性清理
pub struct MemoryCacheStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value();
            if Instant::now() < *expires_at {
                return Ok(Some(value.clone()));
            }
        }
        // 过期条目惰性移除
        self.entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

/// Redis缓存后端
pub struct RedisCacheStore {
    client: RedisClient,
}

impl RedisCacheStore {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.client.get(&format!("{}{}", CACHE_KEY_PREFIX, key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.client
            .set(
                &format!("{}{}", CACHE_KEY_PREFIX, key),
                value,
                ttl.as_secs() as usize,
            )
            .await
    }
}

/// 提取结果缓存
///
/// 位于模型调用层之上，缓存完整的提取结果。命中时跳过整条
/// 提取流水线。后端可插拔：Redis、进程内存或禁用（所有读取
/// 未命中，所有写入为空操作）。后端故障降级为强制未命中并
/// 记录日志，永远不会让任务失败。
pub struct ResultCache {
    store: Option<Arc<dyn CacheStore>>,
    ttl: Duration,
}

impl ResultCache {
    /// 创建启用的缓存实例
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        info!("Extraction cache initialised (ttl={}s)", ttl.as_secs());
        Self {
            store: Some(store),
            ttl,
        }
    }

    /// 创建禁用的缓存实例
    pub fn disabled() -> Self {
        info!("Extraction cache disabled");
        Self {
            store: None,
            ttl: Duration::ZERO,
        }
    }

    /// 缓存是否启用
    pub fn enabled(&self) -> bool {
        self.store.is_some()
    }

    /// 查询缓存的提取结果
    ///
    /// 后端错误与反序列化失败均视为未命中
    pub async fn get(&self, key: &str) -> Option<ExtractionResult> {
        let store = self.store.as_ref()?;

        let raw = match store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Extraction cache GET failed for {:.12}...: {}", key, e);
                None
            }
        };

        match raw.and_then(|r| serde_json::from_str::<ExtractionResult>(&r).ok()) {
            Some(result) => {
                counter!("extraction_cache_hits_total").increment(1);
                info!("Extraction cache HIT (key={:.12}...)", key);
                Some(result)
            }
            None => {
                counter!("extraction_cache_misses_total").increment(1);
                debug!("Extraction cache MISS (key={:.12}...)", key);
                None
            }
        }
    }

    /// 写入提取结果
    pub async fn put(&self, key: &str, result: &ExtractionResult) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let serialized = match serde_json::to_string(result) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize cache entry: {}", e);
                return;
            }
        };

        if let Err(e) = store.set(key, &serialized, self.ttl).await {
            warn!("Extraction cache SET failed for {:.12}...: {}", key, e);
        } else {
            debug!(
                "Extraction cache SET (key={:.12}..., ttl={}s)",
                key,
                self.ttl.as_secs()
            );
        }
    }
}
