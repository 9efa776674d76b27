// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::domain::models::extraction::{Entity, FewShotExample};

/// 提供商错误类型
///
/// 区分可重试错误（限流、瞬时网络故障）和致命错误
/// （无效模型ID、格式错误的响应）。可重试错误由工作器层
/// 在有限次数内透明重试。
#[derive(Error, Debug)]
pub enum ProviderError {
    /// 可重试的瞬时错误
    #[error("Retryable provider error: {0}")]
    Retryable(String),
    /// 致命错误，重试没有意义
    #[error("Provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// 判断错误是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable(_))
    }
}

/// 单轮提取请求
///
/// 一次针对单个提供商、单轮的提取能力调用所需的全部参数
#[derive(Debug, Clone)]
pub struct PassRequest<'a> {
    /// 待提取的文档文本
    pub text: &'a str,
    /// 模型标识符
    pub model_id: &'a str,
    /// 提取提示词
    pub prompt_description: &'a str,
    /// 少样本示例
    pub examples: &'a [FewShotExample],
    /// 采样温度
    pub temperature: Option<f64>,
    /// 最大并行工作线程数
    pub max_workers: u32,
    /// 分块字符缓冲大小
    pub max_char_buffer: u32,
    /// 追加到提示词的额外上下文
    pub additional_context: Option<&'a str>,
    /// 上下文窗口字符数
    pub context_window_chars: Option<u32>,
}

/// 单轮提取输出
#[derive(Debug, Clone)]
pub struct PassOutput {
    /// 提取到的实体
    pub entities: Vec<Entity>,
    /// 消耗的令牌数
    pub tokens_used: Option<u64>,
    /// 本轮耗时（毫秒）
    pub processing_time_ms: u64,
}

/// 提取能力特质
///
/// 对单个模型执行一轮提取。实现必须是无状态且可并发调用的。
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// 执行一轮提取
    async fn run(&self, request: PassRequest<'_>) -> Result<PassOutput, ProviderError>;
}

/// 提供商注册表
///
/// 在进程启动时显式构造并注入编排器，生命周期随进程
/// 启停，不使用进程级全局状态。未注册的模型ID回退到
/// 默认提供商（若配置）。
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ExtractionProvider>>,
    default_provider: Option<Arc<dyn ExtractionProvider>>,
}

impl ProviderRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: None,
        }
    }

    /// 注册模型ID到提供商实现的映射
    pub fn register(mut self, model_id: impl Into<String>, provider: Arc<dyn ExtractionProvider>) -> Self {
        self.providers.insert(model_id.into(), provider);
        self
    }

    /// 设置未注册模型ID的回退提供商
    pub fn with_default(mut self, provider: Arc<dyn ExtractionProvider>) -> Self {
        self.default_provider = Some(provider);
        self
    }

    /// 解析模型ID对应的提供商
    ///
    /// # 返回值
    ///
    /// * `Ok(provider)` - 已注册或回退的提供商
    /// * `Err(ProviderError::Fatal)` - 未知模型且无回退
    pub fn resolve(&self, model_id: &str) -> Result<Arc<dyn ExtractionProvider>, ProviderError> {
        self.providers
            .get(model_id)
            .or(self.default_provider.as_ref())
            .cloned()
            .ok_or_else(|| ProviderError::Fatal(format!("Unknown model id: {}", model_id)))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 聊天补全提取提供商
///
/// 基于 OpenAI 兼容的 chat/completions 接口实现提取能力。
/// 提示词由提取描述、额外上下文和少样本示例组装而成，模型
/// 被要求只返回实体数组的 JSON。
pub struct ChatCompletionProvider {
    api_key: Option<String>,
    api_base_url: String,
    client: reqwest::Client,
}

/// 模型返回的原始实体条目
#[derive(Debug, Deserialize)]
struct RawEntity {
    extraction_class: String,
    extraction_text: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl ChatCompletionProvider {
    /// 创建新的聊天补全提供商实例
    ///
    /// # 参数
    ///
    /// * `api_key` - API密钥，缺失时所有调用返回致命错误
    /// * `api_base_url` - API基础URL
    /// * `timeout` - 单次调用超时
    pub fn new(
        api_key: Option<String>,
        api_base_url: String,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            api_key,
            api_base_url,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client"),
        }
    }

    fn build_prompt(request: &PassRequest<'_>, text: &str) -> String {
        let examples_json =
            serde_json::to_string(request.examples).unwrap_or_else(|_| "[]".to_string());
        let mut prompt = format!(
            "{}\n\nReturn ONLY a JSON array of entities. Each entity is an object with \
             \"extraction_class\", \"extraction_text\" (an exact substring of the source text) \
             and \"attributes\" (a string-to-string map). No markdown formatting.",
            request.prompt_description
        );
        if let Some(context) = request.additional_context {
            prompt.push_str("\n\nAdditional context: ");
            prompt.push_str(context);
        }
        prompt.push_str("\n\nExamples:\n");
        prompt.push_str(&examples_json);
        prompt.push_str("\n\nText:\n");
        prompt.push_str(text);
        prompt
    }
}

/// 在字符边界处安全截断文本
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// 去除模型输出中可能存在的 Markdown 代码围栏
fn strip_code_fences(content: &str) -> &str {
    content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// 将模型返回的原始条目转换为带偏移量的实体
fn convert_entities(raw: Vec<RawEntity>, source_text: &str) -> Vec<Entity> {
    raw.into_iter()
        .map(|item| {
            // 偏移量尽力而为：模型被要求返回原样子串，找不到时留空
            let (char_start, char_end) = match source_text.find(&item.extraction_text) {
                Some(byte_idx) => {
                    let start = source_text[..byte_idx].chars().count();
                    let end = start + item.extraction_text.chars().count();
                    (Some(start), Some(end))
                }
                None => (None, None),
            };
            Entity {
                extraction_class: item.extraction_class,
                extraction_text: item.extraction_text,
                attributes: item.attributes,
                char_start,
                char_end,
                confidence_score: None,
            }
        })
        .collect()
}

#[async_trait]
impl ExtractionProvider for ChatCompletionProvider {
    async fn run(&self, request: PassRequest<'_>) -> Result<PassOutput, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::Fatal("LLM API key not configured".to_string()))?;

        let start = Instant::now();

        let text = match request.context_window_chars {
            Some(limit) => truncate_chars(request.text, limit as usize),
            None => request.text,
        };

        let request_body = json!({
            "model": request.model_id,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a structured entity extraction assistant. You output only valid JSON."
                },
                {
                    "role": "user",
                    "content": Self::build_prompt(&request, text)
                }
            ],
            "temperature": request.temperature.unwrap_or(0.0)
        });

        let url = format!("{}/chat/completions", self.api_base_url);
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ProviderError::Retryable(format!("Request to LLM API failed: {}", e))
                } else {
                    ProviderError::Fatal(format!("Request to LLM API failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("LLM API returned {}: {}", status, body);
            // 限流和服务端错误值得重试，其余视为致命
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(ProviderError::Retryable(message))
            } else {
                Err(ProviderError::Fatal(message))
            };
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Fatal(format!("Failed to parse LLM API response: {}", e)))?;

        let tokens_used = body
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|t| t.as_u64());

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ProviderError::Fatal("Invalid response format from LLM API".to_string())
            })?;

        let raw: Vec<RawEntity> = serde_json::from_str(strip_code_fences(content))
            .map_err(|e| ProviderError::Fatal(format!("Failed to parse extracted JSON: {}", e)))?;

        Ok(PassOutput {
            entities: convert_entities(raw, request.text),
            tokens_used,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_fences("[]"), "[]");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }

    #[test]
    fn test_convert_entities_computes_offsets() {
        let raw = vec![RawEntity {
            extraction_class: "party".to_string(),
            extraction_text: "Acme Corp".to_string(),
            attributes: BTreeMap::new(),
        }];
        let entities = convert_entities(raw, "Contract with Acme Corp.");
        assert_eq!(entities[0].char_start, Some(14));
        assert_eq!(entities[0].char_end, Some(23));
    }

    #[test]
    fn test_convert_entities_missing_substring() {
        let raw = vec![RawEntity {
            extraction_class: "party".to_string(),
            extraction_text: "Paraphrased Inc".to_string(),
            attributes: BTreeMap::new(),
        }];
        let entities = convert_entities(raw, "Contract with Acme Corp.");
        assert_eq!(entities[0].char_start, None);
        assert_eq!(entities[0].char_end, None);
    }

    #[test]
    fn test_registry_resolves_exact_then_default() {
        struct Noop;
        #[async_trait]
        impl ExtractionProvider for Noop {
            async fn run(&self, _request: PassRequest<'_>) -> Result<PassOutput, ProviderError> {
                Ok(PassOutput {
                    entities: vec![],
                    tokens_used: None,
                    processing_time_ms: 0,
                })
            }
        }

        let registry = ProviderRegistry::new().register("gpt-4o", Arc::new(Noop));
        assert!(registry.resolve("gpt-4o").is_ok());
        assert!(registry.resolve("unknown").is_err());

        let registry = registry.with_default(Arc::new(Noop));
        assert!(registry.resolve("unknown").is_ok());
    }
}
