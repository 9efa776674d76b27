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

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::domain::models::extraction::{
    default_examples, Entity, ExtractionRequest, ExtractionResult, FewShotExample, ResultMetadata,
};
use crate::domain::services::consensus_service::merge_consensus;
use crate::domain::services::pass_merger::{merge_passes, passes_converged};
use crate::domain::services::provider::{
    ExtractionProvider, PassRequest, ProviderError, ProviderRegistry,
};
use crate::engines::download_engine::DownloadEngine;
use crate::infrastructure::cache::result_cache::{cache_key, ResultCache};
use crate::utils::errors::ExtractionError;
use crate::utils::retry_policy::RetryPolicy;
use crate::utils::validators;

/// 提取参数默认值
#[derive(Debug, Clone)]
pub struct ExtractionDefaults {
    /// 默认提示词
    pub prompt_description: String,
    /// 默认最大并行工作线程数
    pub max_workers: u32,
    /// 默认分块字符缓冲大小
    pub max_char_buffer: u32,
}

/// 单个提供商的执行结果
struct ProviderOutcome {
    provider_id: String,
    entities: Vec<Entity>,
    tokens_used: Option<u64>,
}

/// 提取服务
///
/// 任务执行的核心流水线：解析输入（必要时下载文档）、查询
/// 结果缓存、按提供商并发地执行多轮提取（轮次间串行以支持
/// 提前停止）、做轮次合并与跨提供商共识合并，最后回填缓存。
pub struct ExtractionService {
    registry: Arc<ProviderRegistry>,
    cache: Arc<ResultCache>,
    downloader: Arc<DownloadEngine>,
    defaults: ExtractionDefaults,
    retry_policy: RetryPolicy,
    allowed_domains: Vec<String>,
    exempt_hosts: Vec<String>,
}

impl ExtractionService {
    /// 创建新的提取服务实例
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: Arc<ResultCache>,
        downloader: Arc<DownloadEngine>,
        defaults: ExtractionDefaults,
        retry_policy: RetryPolicy,
        allowed_domains: Vec<String>,
        exempt_hosts: Vec<String>,
    ) -> Self {
        Self {
            registry,
            cache,
            downloader,
            defaults,
            retry_policy,
            allowed_domains,
            exempt_hosts,
        }
    }

    /// 执行一次完整的提取
    ///
    /// # 参数
    ///
    /// * `request` - 已通过提交校验的提取请求
    ///
    /// # 返回值
    ///
    /// * `Ok(ExtractionResult)` - 最终合并结果
    /// * `Err(ExtractionError)` - 不可恢复的执行失败
    pub async fn run(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResult, ExtractionError> {
        let started = Instant::now();
        let source = request.document_url.as_deref().unwrap_or("<raw_text>");

        info!(
            "Starting extraction for {} (providers={:?}, passes={})",
            source, request.providers, request.passes
        );

        // 1. 解析输入
        let text = if let Some(url) = &request.document_url {
            // 纵深防御：任务可能不是经由提交路径入队的，
            // 工作器在下载前重新验证URL
            validators::validate_url(url, &self.allowed_domains, &self.exempt_hosts).await?;
            info!("Downloading document from {}", url);
            self.downloader.fetch(url).await?.text
        } else {
            request.raw_text.clone().unwrap_or_default()
        };

        // 2. 组装提示词与示例
        let prompt_description = request
            .config
            .prompt_description
            .clone()
            .unwrap_or_else(|| self.defaults.prompt_description.clone());
        let examples: Vec<FewShotExample> = request
            .config
            .examples
            .clone()
            .unwrap_or_else(default_examples);

        // 3. 缓存查询
        let key = if self.cache.enabled() {
            let key = cache_key(
                &text,
                &prompt_description,
                &examples,
                &request.providers,
                request.config.temperature,
                request.passes,
                request.consensus_threshold,
            );
            if let Some(mut cached) = self.cache.get(&key).await {
                cached.metadata.cache_hit = true;
                cached.metadata.processing_time_ms = started.elapsed().as_millis() as u64;
                info!(
                    "Extraction cache HIT for {} - returning in {} ms",
                    source, cached.metadata.processing_time_ms
                );
                return Ok(cached);
            }
            Some(key)
        } else {
            None
        };

        // 4. 按提供商并发执行
        // 提供商之间相互独立，可以并发；同一提供商的轮次必须
        // 串行，提前停止依赖上一轮的输出
        let outcomes: Vec<ProviderOutcome> = futures::future::try_join_all(
            request
                .providers
                .iter()
                .map(|provider_id| self.run_provider(provider_id, &text, &prompt_description, &examples, request)),
        )
        .await?;

        // 5. 合并
        let tokens_used = outcomes
            .iter()
            .filter_map(|o| o.tokens_used)
            .reduce(|a, b| a + b);

        let (entities, provider_label) = if outcomes.len() >= 2 {
            let per_provider: Vec<(String, Vec<Entity>)> = outcomes
                .into_iter()
                .map(|o| (o.provider_id, o.entities))
                .collect();
            merge_consensus(&per_provider, request.consensus_threshold)?
        } else {
            let first = outcomes.into_iter().next().ok_or_else(|| {
                ExtractionError::Validation("providers must not be empty".to_string())
            })?;
            (first.entities, first.provider_id)
        };

        let result = ExtractionResult {
            entities,
            metadata: ResultMetadata {
                provider_label,
                tokens_used,
                processing_time_ms: started.elapsed().as_millis() as u64,
                cache_hit: false,
            },
        };

        // 6. 回填缓存
        if let Some(key) = key {
            self.cache.put(&key, &result).await;
        }

        info!(
            "Extraction completed for {} - {} entities in {} ms",
            source,
            result.entities.len(),
            result.metadata.processing_time_ms
        );

        Ok(result)
    }

    /// 对单个提供商执行多轮提取并做轮次合并
    async fn run_provider(
        &self,
        provider_id: &str,
        text: &str,
        prompt_description: &str,
        examples: &[FewShotExample],
        request: &ExtractionRequest,
    ) -> Result<ProviderOutcome, ExtractionError> {
        let provider = self.registry.resolve(provider_id)?;

        let mut pass_outputs: Vec<Vec<Entity>> = Vec::new();
        let mut tokens_used: Option<u64> = None;

        for pass_number in 1..=request.passes {
            let pass_request = PassRequest {
                text,
                model_id: provider_id,
                prompt_description,
                examples,
                temperature: request.config.temperature,
                max_workers: request
                    .config
                    .max_workers
                    .unwrap_or(self.defaults.max_workers),
                max_char_buffer: request
                    .config
                    .max_char_buffer
                    .unwrap_or(self.defaults.max_char_buffer),
                additional_context: request.config.additional_context.as_deref(),
                context_window_chars: request.config.context_window_chars,
            };

            let output = self
                .run_pass_with_retry(provider.as_ref(), pass_request, provider_id, pass_number)
                .await?;

            if let Some(tokens) = output.tokens_used {
                tokens_used = Some(tokens_used.unwrap_or(0) + tokens);
            }
            pass_outputs.push(output.entities);

            // 连续两轮输出稳定即停止发起后续轮次
            let executed = pass_outputs.len();
            if executed >= 2 && passes_converged(&pass_outputs[executed - 2], &pass_outputs[executed - 1])
            {
                info!(
                    "Pass outputs converged for {} after {} of {} passes",
                    provider_id, executed, request.passes
                );
                break;
            }
        }

        let passes_run = pass_outputs.len();
        Ok(ProviderOutcome {
            provider_id: provider_id.to_string(),
            entities: merge_passes(&pass_outputs, passes_run),
            tokens_used,
        })
    }

    /// 执行一轮提取，可重试错误按退避策略重试
    async fn run_pass_with_retry(
        &self,
        provider: &dyn ExtractionProvider,
        pass_request: PassRequest<'_>,
        provider_id: &str,
        pass_number: u32,
    ) -> Result<crate::domain::services::provider::PassOutput, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            match provider.run(pass_request.clone()).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && self.retry_policy.should_retry(attempt) => {
                    attempt += 1;
                    let backoff = self.retry_policy.calculate_backoff(attempt);
                    warn!(
                        "Retryable error from {} (pass {}, attempt {}): {} - backing off {:?}",
                        provider_id, pass_number, attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
