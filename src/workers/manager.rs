// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::domain::repositories::task_repository::TaskRepository;
use crate::domain::repositories::webhook_event_repository::WebhookEventRepository;
use crate::domain::services::extraction_service::ExtractionService;
use crate::queue::task_queue::TaskQueue;
use crate::workers::extract_worker::ExtractWorker;

/// 工作管理器
pub struct WorkerManager {
    queue: Arc<dyn TaskQueue>,
    repository: Arc<dyn TaskRepository>,
    webhook_events: Arc<dyn WebhookEventRepository>,
    service: Arc<ExtractionService>,
    batch_limiter: Arc<Semaphore>,
    task_time_limit: Duration,
    task_soft_time_limit: Duration,
    webhook_max_retries: i32,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerManager {
    /// 创建新的工作管理器实例
    ///
    /// # 参数
    ///
    /// * `queue` - 任务队列
    /// * `repository` - 任务仓库
    /// * `webhook_events` - Webhook事件仓库
    /// * `service` - 提取服务
    /// * `batch_concurrency` - 批量任务的最大并发执行数
    /// * `task_time_limit` - 任务执行硬性时间上限
    /// * `task_soft_time_limit` - 任务执行软性时间上限
    /// * `webhook_max_retries` - Webhook投递最大重试次数
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        repository: Arc<dyn TaskRepository>,
        webhook_events: Arc<dyn WebhookEventRepository>,
        service: Arc<ExtractionService>,
        batch_concurrency: usize,
        task_time_limit: Duration,
        task_soft_time_limit: Duration,
        webhook_max_retries: i32,
    ) -> Self {
        Self {
            queue,
            repository,
            webhook_events,
            service,
            batch_limiter: Arc::new(Semaphore::new(batch_concurrency.max(1))),
            task_time_limit,
            task_soft_time_limit,
            webhook_max_retries,
            handles: Vec::new(),
        }
    }

    /// 启动工作进程
    ///
    /// 创建并启动指定数量的提取工作进程
    ///
    /// # 参数
    ///
    /// * `count` - 要启动的工作进程数量
    pub async fn start_workers(&mut self, count: usize) {
        for _ in 0..count {
            let worker = ExtractWorker::new(
                self.repository.clone(),
                self.webhook_events.clone(),
                self.service.clone(),
                self.batch_limiter.clone(),
                self.task_time_limit,
                self.task_soft_time_limit,
                self.webhook_max_retries,
            );

            let queue = self.queue.clone();
            // We spawn the worker loop on a separate task to avoid blocking the main thread
            // or the loop that spawns workers.
            let handle = tokio::spawn(async move {
                worker.run(queue).await;
            });
            self.handles.push(handle);
        }
    }

    /// 等待关闭信号并关闭工作进程
    ///
    /// 监听关闭信号并优雅地关闭所有工作进程
    pub async fn wait_for_shutdown(&mut self) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }

        info!("Shutting down workers...");
        for handle in &self.handles {
            handle.abort();
        }

        info!("Workers shut down successfully");
    }
}
