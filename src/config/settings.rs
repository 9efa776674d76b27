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

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// 应用程序配置设置
///
/// 包含服务器、Redis、工作器、任务、安全、下载、缓存、
/// 提取和Webhook等所有配置项
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// 服务器配置
    pub server: ServerSettings,
    /// Redis配置
    pub redis: RedisSettings,
    /// 工作器配置
    pub workers: WorkerSettings,
    /// 任务配置
    pub task: TaskSettings,
    /// 安全配置
    pub security: SecuritySettings,
    /// 文档下载配置
    pub download: DownloadSettings,
    /// 结果缓存配置
    pub cache: CacheSettings,
    /// 提取默认参数配置
    pub extraction: ExtractionSettings,
    /// Webhook配置
    pub webhook: WebhookSettings,
    /// LLM提供商配置
    pub llm: LlmSettings,
}

/// 服务器配置设置
#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    /// 服务器监听主机地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
}

/// Redis配置设置
#[derive(Debug, Deserialize)]
pub struct RedisSettings {
    /// Redis连接URL，缺省时使用进程内存储（单进程模式）
    pub url: Option<String>,
}

/// 工作器配置设置
#[derive(Debug, Deserialize)]
pub struct WorkerSettings {
    /// 提取工作器数量
    pub count: usize,
    /// 批量任务的最大并发执行数
    pub batch_concurrency: usize,
}

/// 任务配置设置
#[derive(Debug, Deserialize)]
pub struct TaskSettings {
    /// 任务执行硬性时间上限（秒），超过后任务强制失败
    pub time_limit: u64,
    /// 任务执行软性时间上限（秒），超过后记录告警
    pub soft_time_limit: u64,
    /// 任务记录与幂等记录的TTL（秒）
    pub result_expires: u64,
}

/// 安全配置设置
#[derive(Debug, Deserialize)]
pub struct SecuritySettings {
    /// 出站URL的域名允许列表，为空时不限制
    pub allowed_url_domains: Vec<String>,
    /// 跳过SSRF检查的主机名列表（仅用于受控环境）
    pub ssrf_exempt_hostnames: Vec<String>,
}

/// 文档下载配置设置
#[derive(Debug, Deserialize)]
pub struct DownloadSettings {
    /// 下载超时（秒）
    pub timeout: u64,
    /// 响应体大小上限（字节）
    pub max_bytes: u64,
}

/// 结果缓存配置设置
#[derive(Debug, Deserialize)]
pub struct CacheSettings {
    /// 是否启用结果缓存
    pub enabled: bool,
    /// 缓存后端（redis / memory / none）
    pub backend: String,
    /// 缓存条目TTL（秒）
    pub ttl: u64,
}

/// 提取默认参数配置设置
#[derive(Debug, Deserialize)]
pub struct ExtractionSettings {
    /// 默认模型标识符
    pub default_provider: String,
    /// 默认最大并行工作线程数
    pub default_max_workers: u32,
    /// 默认分块字符缓冲大小
    pub default_max_char_buffer: u32,
}

/// Webhook配置设置
#[derive(Debug, Deserialize)]
pub struct WebhookSettings {
    /// Webhook签名密钥，为空时不签名
    pub secret: String,
    /// 单次投递超时（秒）
    pub timeout: u64,
    /// 最大重试次数
    pub max_retries: i32,
}

/// LLM提供商配置设置
#[derive(Debug, Deserialize)]
pub struct LlmSettings {
    /// LLM API密钥
    pub api_key: Option<String>,
    /// LLM API基础URL
    pub api_base_url: String,
    /// 单次提供商调用超时（秒）
    pub timeout: u64,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 从环境变量加载配置，支持默认值
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Config::builder()
            // Start with default settings
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            // Default Redis settings (absent URL => in-process storage)
            .set_default("redis.url", None::<String>)?
            // Default worker settings
            .set_default("workers.count", 4)?
            .set_default("workers.batch_concurrency", 4)?
            // Default task settings
            .set_default("task.time_limit", 3600)?
            .set_default("task.soft_time_limit", 3300)?
            .set_default("task.result_expires", 86400)?
            // Default security settings
            .set_default("security.allowed_url_domains", Vec::<String>::new())?
            .set_default("security.ssrf_exempt_hostnames", Vec::<String>::new())?
            // Default download settings
            .set_default("download.timeout", 30)?
            .set_default("download.max_bytes", 50_000_000)?
            // Default cache settings
            .set_default("cache.enabled", true)?
            .set_default("cache.backend", "memory")?
            .set_default("cache.ttl", 86400)?
            // Default extraction settings
            .set_default("extraction.default_provider", "gpt-4o")?
            .set_default("extraction.default_max_workers", 10)?
            .set_default("extraction.default_max_char_buffer", 1000)?
            // Default webhook settings
            .set_default("webhook.secret", "")?
            .set_default("webhook.timeout", 30)?
            .set_default("webhook.max_retries", 3)?
            // Default LLM settings
            .set_default("llm.api_base_url", "https://api.openai.com/v1")?
            .set_default("llm.timeout", 120)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("EXTRACTRS").separator("__"));

        builder.build()?.try_deserialize()
    }
}
