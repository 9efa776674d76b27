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

use anyhow::Result;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::task::Task;
use crate::domain::models::webhook::WebhookEvent;
use crate::domain::repositories::task_repository::TaskRepository;
use crate::domain::repositories::webhook_event_repository::WebhookEventRepository;
use crate::domain::services::extraction_service::ExtractionService;
use crate::queue::task_queue::TaskQueue;

/// 提取工作者
///
/// 从队列认领任务并驱动提取流水线。同一任务在任意时刻只被
/// 一个工作器执行（认领发生在 Pending → Started 转换处）；
/// 批量提交的任务在执行前先获取批量并发信号量。
pub struct ExtractWorker {
    repository: Arc<dyn TaskRepository>,
    webhook_events: Arc<dyn WebhookEventRepository>,
    service: Arc<ExtractionService>,
    batch_limiter: Arc<Semaphore>,
    task_time_limit: Duration,
    task_soft_time_limit: Duration,
    webhook_max_retries: i32,
    worker_id: Uuid,
}

impl ExtractWorker {
    /// 创建新的提取工作器实例
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        webhook_events: Arc<dyn WebhookEventRepository>,
        service: Arc<ExtractionService>,
        batch_limiter: Arc<Semaphore>,
        task_time_limit: Duration,
        task_soft_time_limit: Duration,
        webhook_max_retries: i32,
    ) -> Self {
        Self {
            repository,
            webhook_events,
            service,
            batch_limiter,
            task_time_limit,
            task_soft_time_limit,
            webhook_max_retries,
            worker_id: Uuid::new_v4(),
        }
    }

    /// 运行提取工作器
    pub async fn run(&self, queue: Arc<dyn TaskQueue>) {
        info!("Extract worker {} started", self.worker_id);

        loop {
            match queue.dequeue(self.worker_id).await {
                Ok(Some(task)) => {
                    if let Err(e) = self.process_task(task).await {
                        error!("Error processing task: {}", e);
                    }
                }
                Ok(None) => sleep(Duration::from_secs(1)).await,
                Err(e) => {
                    error!("Error dequeuing task: {}", e);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn process_task(&self, task: Task) -> Result<()> {
        // 批量任务受并发信号量约束，超出限制的在此排队
        let _permit = if task.batch_id.is_some() {
            Some(self.batch_limiter.acquire().await?)
        } else {
            None
        };

        info!("Processing task");

        let outcome = {
            let work = tokio::time::timeout(self.task_time_limit, self.service.run(&task.request));
            tokio::pin!(work);
            tokio::select! {
                result = &mut work => result,
                _ = sleep(self.task_soft_time_limit) => {
                    warn!(
                        "Task {} exceeded soft time limit of {} seconds",
                        task.id,
                        self.task_soft_time_limit.as_secs()
                    );
                    work.await
                }
            }
        };

        match outcome {
            Ok(Ok(result)) => {
                if self.repository.mark_success(task.id, result).await? {
                    counter!("tasks_completed_total").increment(1);
                    self.enqueue_webhook(task.id).await;
                } else {
                    // 执行期间被撤销，结果直接丢弃
                    info!("Discarding result for task {}: already terminal", task.id);
                }
            }
            Ok(Err(e)) => {
                warn!("Task {} failed: {}", task.id, e);
                if self.repository.mark_failure(task.id, e.to_string()).await? {
                    counter!("tasks_failed_total").increment(1);
                    self.enqueue_webhook(task.id).await;
                }
            }
            Err(_) => {
                let detail = format!(
                    "Task exceeded time limit of {} seconds",
                    self.task_time_limit.as_secs()
                );
                warn!("Task {} timed out", task.id);
                if self.repository.mark_failure(task.id, detail).await? {
                    counter!("tasks_failed_total").increment(1);
                    self.enqueue_webhook(task.id).await;
                }
            }
        }

        Ok(())
    }

    /// 为终态任务记录一条待投递的回调事件
    ///
    /// 事件创建失败只记录日志，绝不影响任务的终态转换
    async fn enqueue_webhook(&self, task_id: Uuid) {
        let task = match self.repository.find_by_id(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to load task {} for webhook: {}", task_id, e);
                return;
            }
        };

        let Some(callback_url) = task.request.callback_url.clone() else {
            return;
        };

        let payload = match serde_json::to_value(&task) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize task {} for webhook: {}", task_id, e);
                return;
            }
        };

        let event = WebhookEvent::new(
            task.id,
            callback_url,
            task.request.callback_headers.clone(),
            payload,
            self.webhook_max_retries,
        );

        if let Err(e) = self.webhook_events.create(&event).await {
            error!("Failed to create webhook event for task {}: {}", task_id, e);
        }
    }
}
