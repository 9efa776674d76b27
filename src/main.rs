// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use axum::Extension;
use extractrs::application::use_cases::submit_extraction::SubmitExtractionUseCase;
use extractrs::config::settings::Settings;
use extractrs::domain::repositories::idempotency_repository::IdempotencyRepository;
use extractrs::domain::repositories::task_repository::TaskRepository;
use extractrs::domain::repositories::webhook_event_repository::WebhookEventRepository;
use extractrs::domain::services::extraction_service::{ExtractionDefaults, ExtractionService};
use extractrs::domain::services::provider::{ChatCompletionProvider, ProviderRegistry};
use extractrs::engines::download_engine::DownloadEngine;
use extractrs::infrastructure::cache::redis_client::RedisClient;
use extractrs::infrastructure::cache::result_cache::{
    MemoryCacheStore, RedisCacheStore, ResultCache,
};
use extractrs::infrastructure::repositories::idempotency_repo_impl::{
    InMemoryIdempotencyRepository, RedisIdempotencyRepository,
};
use extractrs::infrastructure::repositories::task_repo_impl::{
    InMemoryTaskRepository, RedisTaskRepository,
};
use extractrs::infrastructure::repositories::webhook_event_repo_impl::InMemoryWebhookEventRepository;
use extractrs::presentation::routes;
use extractrs::queue::task_queue::{RepositoryTaskQueue, TaskQueue};
use extractrs::utils::retry_policy::RetryPolicy;
use extractrs::utils::telemetry;
use extractrs::workers::manager::WorkerManager;
use extractrs::workers::webhook_worker::WebhookWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting extractrs...");

    // Initialize Prometheus Metrics
    extractrs::infrastructure::metrics::init_metrics();

    // 2. Load configuration
    let settings = Arc::new(Settings::new()?);
    info!("Configuration loaded");

    let allowed_domains = settings.security.allowed_url_domains.clone();
    let exempt_hosts = settings.security.ssrf_exempt_hostnames.clone();

    // 3. Select shared stores: Redis when configured, in-process otherwise
    let redis_client = match settings.redis.url.as_deref() {
        Some(url) if !url.is_empty() => {
            let client = RedisClient::new(url).await?;
            info!("Redis client initialized");
            Some(client)
        }
        _ => {
            info!("No Redis URL configured; running with in-process stores");
            None
        }
    };

    let result_expires = settings.task.result_expires;
    let (task_repository, idempotency): (Arc<dyn TaskRepository>, Arc<dyn IdempotencyRepository>) =
        match &redis_client {
            Some(client) => (
                Arc::new(RedisTaskRepository::new(
                    client.clone(),
                    result_expires as usize,
                )),
                Arc::new(RedisIdempotencyRepository::new(client.clone())),
            ),
            None => (
                Arc::new(InMemoryTaskRepository::new()),
                Arc::new(InMemoryIdempotencyRepository::new()),
            ),
        };

    let webhook_events = Arc::new(InMemoryWebhookEventRepository::new());

    // 4. Result cache
    let cache = if !settings.cache.enabled || settings.cache.backend == "none" {
        ResultCache::disabled()
    } else {
        let ttl = Duration::from_secs(settings.cache.ttl);
        match (settings.cache.backend.as_str(), &redis_client) {
            ("redis", Some(client)) => {
                ResultCache::new(Arc::new(RedisCacheStore::new(client.clone())), ttl)
            }
            ("redis", None) => {
                warn!("cache.backend is 'redis' but no Redis URL is configured; using memory");
                ResultCache::new(Arc::new(MemoryCacheStore::new()), ttl)
            }
            _ => ResultCache::new(Arc::new(MemoryCacheStore::new()), ttl),
        }
    };

    // 5. Provider registry, explicitly constructed and injected at startup
    let chat_provider = Arc::new(ChatCompletionProvider::new(
        settings.llm.api_key.clone(),
        settings.llm.api_base_url.clone(),
        Duration::from_secs(settings.llm.timeout),
    ));
    let registry = Arc::new(ProviderRegistry::new().with_default(chat_provider));

    let downloader = Arc::new(DownloadEngine::new(
        Duration::from_secs(settings.download.timeout),
        settings.download.max_bytes,
        allowed_domains.clone(),
        exempt_hosts.clone(),
    ));

    let service = Arc::new(ExtractionService::new(
        registry,
        Arc::new(cache),
        downloader,
        ExtractionDefaults {
            prompt_description:
                extractrs::domain::models::extraction::DEFAULT_PROMPT_DESCRIPTION.to_string(),
            max_workers: settings.extraction.default_max_workers,
            max_char_buffer: settings.extraction.default_max_char_buffer,
        },
        RetryPolicy::fast(),
        allowed_domains.clone(),
        exempt_hosts.clone(),
    ));

    let queue: Arc<dyn TaskQueue> =
        Arc::new(RepositoryTaskQueue::new(task_repository.clone()));

    let use_case = Arc::new(SubmitExtractionUseCase::new(
        queue.clone(),
        idempotency,
        Duration::from_secs(result_expires),
        allowed_domains.clone(),
        exempt_hosts.clone(),
    ));

    // 6. Start extraction workers
    let webhook_events_dyn: Arc<dyn WebhookEventRepository> = webhook_events.clone();
    let mut manager = WorkerManager::new(
        queue.clone(),
        task_repository.clone(),
        webhook_events_dyn,
        service,
        settings.workers.batch_concurrency,
        Duration::from_secs(settings.task.time_limit),
        Duration::from_secs(settings.task.soft_time_limit),
        settings.webhook.max_retries,
    );
    manager.start_workers(settings.workers.count).await;
    info!("Started {} extraction workers", settings.workers.count);

    // 7. Start webhook delivery worker
    let webhook_worker = WebhookWorker::new(
        webhook_events.clone(),
        Some(settings.webhook.secret.clone()),
        Duration::from_secs(settings.webhook.timeout),
        allowed_domains.clone(),
        exempt_hosts.clone(),
    );
    tokio::spawn(async move {
        webhook_worker.run().await;
    });

    // 8. Serve HTTP API
    let app = routes::routes()
        .layer(Extension(use_case))
        .layer(Extension(settings.clone()))
        .layer(Extension(task_repository.clone()))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    tokio::select! {
        result = async { axum::serve(listener, app).await } => { result?; }
        _ = manager.wait_for_shutdown() => {}
    }

    Ok(())
}
