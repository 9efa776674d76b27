// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use uuid::Uuid;

use extractrs::application::use_cases::submit_extraction::SubmitExtractionUseCase;
use extractrs::domain::models::extraction::{Entity, ExtractionRequest};
use extractrs::domain::models::task::{Task, TaskState};
use extractrs::domain::repositories::task_repository::TaskRepository;
use extractrs::domain::repositories::webhook_event_repository::WebhookEventRepository;
use extractrs::domain::services::extraction_service::{ExtractionDefaults, ExtractionService};
use extractrs::domain::services::provider::{
    ExtractionProvider, PassOutput, PassRequest, ProviderError, ProviderRegistry,
};
use extractrs::engines::download_engine::DownloadEngine;
use extractrs::infrastructure::cache::result_cache::ResultCache;
use extractrs::infrastructure::repositories::idempotency_repo_impl::InMemoryIdempotencyRepository;
use extractrs::infrastructure::repositories::task_repo_impl::InMemoryTaskRepository;
use extractrs::infrastructure::repositories::webhook_event_repo_impl::InMemoryWebhookEventRepository;
use extractrs::queue::task_queue::{RepositoryTaskQueue, TaskQueue};
use extractrs::utils::retry_policy::RetryPolicy;
use extractrs::workers::extract_worker::ExtractWorker;

/// 固定返回一组实体的测试提供商，记录并发执行峰值
struct StaticProvider {
    entities: Vec<Entity>,
    fail: bool,
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl StaticProvider {
    fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            fail: false,
            delay: Duration::ZERO,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionProvider for StaticProvider {
    async fn run(&self, _request: PassRequest<'_>) -> Result<PassOutput, ProviderError> {
        if self.fail {
            return Err(ProviderError::Fatal("invalid model configuration".to_string()));
        }

        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        Ok(PassOutput {
            entities: self.entities.clone(),
            tokens_used: Some(42),
            processing_time_ms: 1,
        })
    }
}

fn entity(class: &str, text: &str) -> Entity {
    Entity {
        extraction_class: class.to_string(),
        extraction_text: text.to_string(),
        attributes: BTreeMap::new(),
        char_start: None,
        char_end: None,
        confidence_score: None,
    }
}

/// 进程内编排测试环境
struct Harness {
    repository: Arc<InMemoryTaskRepository>,
    webhook_events: Arc<InMemoryWebhookEventRepository>,
    queue: Arc<dyn TaskQueue>,
    use_case: SubmitExtractionUseCase,
    service: Arc<ExtractionService>,
    batch_limiter: Arc<Semaphore>,
    task_time_limit: Duration,
}

impl Harness {
    fn new(provider: Arc<dyn ExtractionProvider>, batch_concurrency: usize) -> Self {
        let repository = Arc::new(InMemoryTaskRepository::new());
        let queue: Arc<dyn TaskQueue> = Arc::new(RepositoryTaskQueue::new(repository.clone()));

        let registry = Arc::new(ProviderRegistry::new().register("test-model", provider));
        let service = Arc::new(ExtractionService::new(
            registry,
            Arc::new(ResultCache::disabled()),
            Arc::new(DownloadEngine::new(
                Duration::from_secs(5),
                1024,
                vec![],
                vec![],
            )),
            ExtractionDefaults {
                prompt_description: "Extract entities.".to_string(),
                max_workers: 10,
                max_char_buffer: 1000,
            },
            RetryPolicy {
                max_retries: 0,
                ..RetryPolicy::fast()
            },
            vec![],
            vec![],
        ));

        // 测试环境没有对外DNS，回调域名走豁免列表
        let use_case = SubmitExtractionUseCase::new(
            queue.clone(),
            Arc::new(InMemoryIdempotencyRepository::new()),
            Duration::from_secs(60),
            vec![],
            vec!["hooks.example.com".to_string()],
        );

        Self {
            repository,
            webhook_events: Arc::new(InMemoryWebhookEventRepository::new()),
            queue,
            use_case,
            service,
            batch_limiter: Arc::new(Semaphore::new(batch_concurrency)),
            task_time_limit: Duration::from_secs(5),
        }
    }

    fn spawn_worker(&self) -> tokio::task::JoinHandle<()> {
        let worker = ExtractWorker::new(
            self.repository.clone(),
            self.webhook_events.clone(),
            self.service.clone(),
            self.batch_limiter.clone(),
            self.task_time_limit,
            self.task_time_limit,
            3,
        );
        let queue = self.queue.clone();
        tokio::spawn(async move { worker.run(queue).await })
    }

    async fn wait_terminal(&self, task_id: Uuid) -> Task {
        for _ in 0..200 {
            let task = self
                .repository
                .find_by_id(task_id)
                .await
                .unwrap()
                .expect("task exists");
            if task.state.is_terminal() {
                return task;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("task {} never reached a terminal state", task_id);
    }
}

fn request() -> ExtractionRequest {
    ExtractionRequest {
        raw_text: Some("Acme Corporation retained Beta LLC.".to_string()),
        providers: vec!["test-model".to_string()],
        ..ExtractionRequest::default()
    }
}

#[tokio::test]
async fn test_submit_and_execute_to_success() {
    let harness = Harness::new(
        Arc::new(StaticProvider::new(vec![entity("party", "Acme Corporation")])),
        4,
    );
    let worker = harness.spawn_worker();

    let outcome = harness.use_case.execute(request(), None).await.unwrap();
    let task = harness.wait_terminal(outcome.task_id).await;
    worker.abort();

    assert_eq!(task.state, TaskState::Success);
    assert!(task.completed_at.is_some());
    assert!(task.error_detail.is_none());

    let result = task.result.unwrap();
    assert_eq!(result.entities.len(), 1);
    assert_eq!(result.entities[0].extraction_text, "Acme Corporation");
    assert_eq!(result.metadata.provider_label, "test-model");
    assert_eq!(result.metadata.tokens_used, Some(42));
    assert!(!result.metadata.cache_hit);
}

#[tokio::test]
async fn test_fatal_provider_error_fails_task() {
    let harness = Harness::new(Arc::new(StaticProvider::failing()), 4);
    let worker = harness.spawn_worker();

    let outcome = harness.use_case.execute(request(), None).await.unwrap();
    let task = harness.wait_terminal(outcome.task_id).await;
    worker.abort();

    assert_eq!(task.state, TaskState::Failure);
    assert!(task.result.is_none());
    let detail = task.error_detail.unwrap();
    assert!(detail.contains("invalid model configuration"), "{}", detail);
}

#[tokio::test]
async fn test_cancel_pending_task_never_transitions_further() {
    let harness = Harness::new(
        Arc::new(StaticProvider::new(vec![entity("party", "Acme Corporation")])),
        4,
    );

    // 工作器启动之前撤销
    let outcome = harness.use_case.execute(request(), None).await.unwrap();
    assert!(harness.repository.mark_revoked(outcome.task_id).await.unwrap());

    let worker = harness.spawn_worker();
    sleep(Duration::from_millis(200)).await;
    worker.abort();

    let task = harness
        .repository
        .find_by_id(outcome.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.state, TaskState::Revoked);
    assert!(task.result.is_none());
}

#[tokio::test]
async fn test_cancel_completed_task_is_noop() {
    let harness = Harness::new(
        Arc::new(StaticProvider::new(vec![entity("party", "Acme Corporation")])),
        4,
    );
    let worker = harness.spawn_worker();

    let outcome = harness.use_case.execute(request(), None).await.unwrap();
    let task = harness.wait_terminal(outcome.task_id).await;
    worker.abort();
    assert_eq!(task.state, TaskState::Success);

    assert!(!harness.repository.mark_revoked(outcome.task_id).await.unwrap());
    let unchanged = harness
        .repository
        .find_by_id(outcome.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.state, TaskState::Success);
    assert!(unchanged.result.is_some());
}

#[tokio::test]
async fn test_concurrent_idempotent_submissions_create_one_task() {
    let harness = Arc::new(Harness::new(
        Arc::new(StaticProvider::new(vec![entity("party", "Acme Corporation")])),
        4,
    ));

    let mut handles = Vec::new();
    for _ in 0..12 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let mut keyed = request();
            keyed.idempotency_key = Some("invoice-7".to_string());
            harness.use_case.execute(keyed, None).await.unwrap().task_id
        }));
    }

    let mut task_ids = std::collections::HashSet::new();
    for handle in handles {
        task_ids.insert(handle.await.unwrap());
    }
    assert_eq!(task_ids.len(), 1);

    // 队列中恰好一个任务
    assert!(harness
        .repository
        .acquire_next(Uuid::new_v4())
        .await
        .unwrap()
        .is_some());
    assert!(harness
        .repository
        .acquire_next(Uuid::new_v4())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_batch_execution_bounded_by_semaphore() {
    let provider = Arc::new(
        StaticProvider::new(vec![entity("party", "Acme Corporation")])
            .with_delay(Duration::from_millis(40)),
    );
    let harness = Harness::new(provider.clone(), 1);

    // 多个工作器竞争，批量信号量仍将执行并发压到1
    let workers: Vec<_> = (0..4).map(|_| harness.spawn_worker()).collect();

    let mut task_ids = Vec::new();
    for i in 0..4 {
        let mut doc = request();
        doc.raw_text = Some(format!("Document {} about Acme Corporation.", i));
        let outcome = harness
            .use_case
            .execute(doc, Some("batch-1".to_string()))
            .await
            .unwrap();
        task_ids.push(outcome.task_id);
    }

    for task_id in task_ids {
        let task = harness.wait_terminal(task_id).await;
        assert_eq!(task.state, TaskState::Success);
        assert_eq!(task.batch_id.as_deref(), Some("batch-1"));
    }
    for worker in workers {
        worker.abort();
    }

    assert_eq!(provider.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_task_time_limit_forces_failure() {
    let provider = Arc::new(
        StaticProvider::new(vec![entity("party", "Acme Corporation")])
            .with_delay(Duration::from_millis(500)),
    );
    let mut harness = Harness::new(provider, 4);
    harness.task_time_limit = Duration::from_millis(50);
    let worker = harness.spawn_worker();

    let outcome = harness.use_case.execute(request(), None).await.unwrap();
    let task = harness.wait_terminal(outcome.task_id).await;
    worker.abort();

    assert_eq!(task.state, TaskState::Failure);
    assert!(task.error_detail.unwrap().contains("time limit"));
}

#[tokio::test]
async fn test_webhook_event_recorded_for_terminal_task() {
    let harness = Harness::new(
        Arc::new(StaticProvider::new(vec![entity("party", "Acme Corporation")])),
        4,
    );
    let worker = harness.spawn_worker();

    let mut with_callback = request();
    with_callback.callback_url = Some("https://hooks.example.com/done".to_string());
    let outcome = harness.use_case.execute(with_callback, None).await.unwrap();
    harness.wait_terminal(outcome.task_id).await;

    // 事件在终态转换之后异步入队
    let mut events = Vec::new();
    for _ in 0..50 {
        events = harness.webhook_events.find_pending(10).await.unwrap();
        if !events.is_empty() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    worker.abort();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].task_id, outcome.task_id);
    assert_eq!(events[0].payload["state"], "SUCCESS");
    assert_eq!(
        events[0].callback_url,
        "https://hooks.example.com/done"
    );
}
