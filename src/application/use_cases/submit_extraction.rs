// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::domain::models::extraction::ExtractionRequest;
use crate::domain::models::task::Task;
use crate::domain::repositories::idempotency_repository::IdempotencyRepository;
use crate::queue::task_queue::TaskQueue;
use crate::utils::errors::ExtractionError;
use crate::utils::validators;

/// 原始文本长度上限（约10MB文本）
const MAX_RAW_TEXT_CHARS: usize = 10_000_000;

/// 幂等键长度上限
const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 256;

/// 模型标识符格式：字母数字开头，仅含字母、数字、点、
/// 下划线、斜杠和连字符
static PROVIDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_./-]*$").expect("provider regex"));

/// 指向二进制内容的文件扩展名
///
/// 系统只接受纯文本/Markdown，二进制格式在发起下载之前
/// 就被拒绝
const BINARY_EXTENSIONS: &[&str] = &[
    ".pdf", ".docx", ".doc", ".xlsx", ".xls", ".pptx", ".ppt", ".odt", ".ods", ".odp", ".rtf",
    ".zip", ".tar", ".gz", ".rar", ".7z", ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp",
    ".svg", ".mp3", ".mp4", ".wav", ".avi", ".mov", ".exe", ".dll", ".bin",
];

/// 提交结果
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// 任务ID（新建或已有）
    pub task_id: Uuid,
    /// 是否命中幂等去重（返回的是已有任务）
    pub deduplicated: bool,
}

/// 提取任务提交用例
///
/// 将经过形状校验的提取请求转化为一个待执行的任务：
/// 幂等去重、请求验证、出站URL的同步SSRF验证、任务创建
/// 与入队。提交是同步且快速的，提取执行异步进行。
pub struct SubmitExtractionUseCase {
    queue: Arc<dyn TaskQueue>,
    idempotency: Arc<dyn IdempotencyRepository>,
    result_expires: Duration,
    allowed_domains: Vec<String>,
    exempt_hosts: Vec<String>,
}

impl SubmitExtractionUseCase {
    /// 创建新的提交用例实例
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        idempotency: Arc<dyn IdempotencyRepository>,
        result_expires: Duration,
        allowed_domains: Vec<String>,
        exempt_hosts: Vec<String>,
    ) -> Self {
        Self {
            queue,
            idempotency,
            result_expires,
            allowed_domains,
            exempt_hosts,
        }
    }

    /// 提交一个提取请求
    ///
    /// # 参数
    ///
    /// * `request` - 提取请求
    /// * `batch_id` - 所属批次ID（批量提交时）
    ///
    /// # 返回值
    ///
    /// * `Ok(SubmitOutcome)` - 任务ID，幂等命中时为已有任务
    /// * `Err(ExtractionError)` - 验证或SSRF检查失败，未创建任务
    pub async fn execute(
        &self,
        request: ExtractionRequest,
        batch_id: Option<String>,
    ) -> Result<SubmitOutcome, ExtractionError> {
        // 1. 幂等检查：存活记录直接返回原任务
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self
                .idempotency
                .get(key)
                .await
                .map_err(|e| ExtractionError::Validation(e.to_string()))?
            {
                info!("Idempotent hit: key={} -> task={}", key, existing);
                return Ok(SubmitOutcome {
                    task_id: existing,
                    deduplicated: true,
                });
            }
        }

        // 2. 请求验证：失败则快速返回，不创建任务
        validate_request(&request)?;

        if let Some(url) = &request.document_url {
            validators::validate_url(url, &self.allowed_domains, &self.exempt_hosts).await?;
        }
        if let Some(url) = &request.callback_url {
            validators::validate_url(url, &self.allowed_domains, &self.exempt_hosts).await?;
        }

        // 3. 创建并入队
        let mut task = Task::new(request);
        task.batch_id = batch_id;

        // 并发提交同一个幂等键时恰好一方胜出，败者观察到
        // 胜者的任务ID且不产生任何副作用
        if let Some(key) = &task.request.idempotency_key {
            match self
                .idempotency
                .put_if_absent(key, task.id, self.result_expires)
                .await
                .map_err(|e| ExtractionError::Validation(e.to_string()))?
            {
                None => {}
                Some(existing) => {
                    info!("Idempotent race lost: key={} -> task={}", key, existing);
                    return Ok(SubmitOutcome {
                        task_id: existing,
                        deduplicated: true,
                    });
                }
            }
        }

        let created = self
            .queue
            .enqueue(task)
            .await
            .map_err(|e| ExtractionError::Validation(e.to_string()))?;

        counter!("tasks_submitted_total").increment(1);
        info!(
            "Extraction submitted for {} (task={})",
            created.request.document_url.as_deref().unwrap_or("<raw_text>"),
            created.id
        );

        Ok(SubmitOutcome {
            task_id: created.id,
            deduplicated: false,
        })
    }
}

/// 验证提取请求
///
/// 检查输入互斥性、轮数范围、提供商格式、文本长度、
/// 幂等键字符集和调优参数范围
fn validate_request(request: &ExtractionRequest) -> Result<(), ExtractionError> {
    match (&request.raw_text, &request.document_url) {
        (None, None) => {
            return Err(ExtractionError::Validation(
                "One of 'raw_text' or 'document_url' must be provided".to_string(),
            ));
        }
        (Some(_), Some(_)) => {
            return Err(ExtractionError::Validation(
                "'raw_text' and 'document_url' are mutually exclusive".to_string(),
            ));
        }
        _ => {}
    }

    if !(1..=5).contains(&request.passes) {
        return Err(ExtractionError::Validation(format!(
            "'passes' must be between 1 and 5, got {}",
            request.passes
        )));
    }

    if request.providers.is_empty() {
        return Err(ExtractionError::Validation(
            "'providers' must not be empty".to_string(),
        ));
    }
    for provider in &request.providers {
        if provider.len() < 2 || provider.len() > 128 || !PROVIDER_RE.is_match(provider) {
            return Err(ExtractionError::Validation(format!(
                "Invalid provider id '{}'",
                provider
            )));
        }
    }

    if !(0.0..=1.0).contains(&request.consensus_threshold) {
        return Err(ExtractionError::Validation(format!(
            "'consensus_threshold' must be within [0, 1], got {}",
            request.consensus_threshold
        )));
    }

    if let Some(text) = &request.raw_text {
        if text.chars().count() > MAX_RAW_TEXT_CHARS {
            return Err(ExtractionError::Validation(format!(
                "'raw_text' exceeds maximum of {} characters",
                MAX_RAW_TEXT_CHARS
            )));
        }
    }

    if let Some(url) = &request.document_url {
        if let Some(extension) = binary_extension(url) {
            return Err(ExtractionError::Validation(format!(
                "Unsupported file type '{}': 'document_url' must point to a plain-text or \
                 Markdown resource",
                extension
            )));
        }
    }

    if let Some(key) = &request.idempotency_key {
        if key.is_empty()
            || key.len() > MAX_IDEMPOTENCY_KEY_LENGTH
            || !key.bytes().all(|b| (0x21..=0x7e).contains(&b))
        {
            return Err(ExtractionError::Validation(
                "'idempotency_key' must be 1-256 printable ASCII characters".to_string(),
            ));
        }
    }

    let config = &request.config;
    if let Some(workers) = config.max_workers {
        if !(1..=100).contains(&workers) {
            return Err(ExtractionError::Validation(
                "'max_workers' must be between 1 and 100".to_string(),
            ));
        }
    }
    if let Some(buffer) = config.max_char_buffer {
        if buffer < 100 {
            return Err(ExtractionError::Validation(
                "'max_char_buffer' must be at least 100".to_string(),
            ));
        }
    }
    if let Some(temperature) = config.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ExtractionError::Validation(
                "'temperature' must be within [0, 2]".to_string(),
            ));
        }
    }
    if let Some(window) = config.context_window_chars {
        if window < 1000 {
            return Err(ExtractionError::Validation(
                "'context_window_chars' must be at least 1000".to_string(),
            ));
        }
    }

    Ok(())
}

/// 提取URL路径中已知的二进制扩展名
fn binary_extension(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    BINARY_EXTENSIONS
        .iter()
        .find(|ext| path.ends_with(*ext))
        .copied()
}
