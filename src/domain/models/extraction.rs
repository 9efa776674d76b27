// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// 默认提取提示词
///
/// 当调用方未提供 `prompt_description` 时使用
pub const DEFAULT_PROMPT_DESCRIPTION: &str = "Extract key contract entities in order of appearance. \
     Use exact text for extractions. Do not paraphrase or overlap entities. \
     Provide meaningful attributes for each entity to add context.";

/// 默认共识相似度阈值
pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.6;

/// 提取请求
///
/// 一个提取工作单元的完整输入。`raw_text` 与 `document_url`
/// 互斥且必须提供其一；`providers` 为非空有序列表，长度 ≥2 时
/// 启用共识模式。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    /// 待提取文档的URL
    pub document_url: Option<String>,
    /// 直接提交的原始文本
    pub raw_text: Option<String>,
    /// 模型标识符的有序列表
    pub providers: Vec<String>,
    /// 提取轮数（1-5）
    pub passes: u32,
    /// 调用方提供的幂等键
    pub idempotency_key: Option<String>,
    /// 共识相似度阈值，仅在 providers ≥2 时有意义
    pub consensus_threshold: f64,
    /// Webhook回调URL
    pub callback_url: Option<String>,
    /// Webhook附加请求头
    pub callback_headers: Option<HashMap<String, String>>,
    /// 提取调优配置
    pub config: ExtractionConfig,
}

impl Default for ExtractionRequest {
    fn default() -> Self {
        Self {
            document_url: None,
            raw_text: None,
            providers: vec!["gpt-4o".to_string()],
            passes: 1,
            idempotency_key: None,
            consensus_threshold: DEFAULT_CONSENSUS_THRESHOLD,
            callback_url: None,
            callback_headers: None,
            config: ExtractionConfig::default(),
        }
    }
}

/// 提取调优配置
///
/// 所有可识别的调优选项都在此枚举，未知键被拒绝以捕获
/// 调用方的拼写错误。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionConfig {
    /// 自定义提取提示词
    pub prompt_description: Option<String>,
    /// 少样本示例
    pub examples: Option<Vec<FewShotExample>>,
    /// 最大并行提取工作线程数（1-100）
    pub max_workers: Option<u32>,
    /// 分块字符缓冲大小（≥100）
    pub max_char_buffer: Option<u32>,
    /// 追加到提示词的额外上下文
    pub additional_context: Option<String>,
    /// LLM采样温度（0-2）
    pub temperature: Option<f64>,
    /// 上下文窗口字符数（≥1000）
    pub context_window_chars: Option<u32>,
}

/// 少样本示例
///
/// 一段示例文本及其期望的提取结果，用于引导模型输出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewShotExample {
    /// 示例文本
    pub text: String,
    /// 期望从示例文本中提取的条目
    pub extractions: Vec<ExampleExtraction>,
}

/// 示例提取条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleExtraction {
    /// 提取类别标签
    pub extraction_class: String,
    /// 原文片段
    pub extraction_text: String,
    /// 补充属性
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// 提取实体
///
/// 一条提取结果。`extraction_text` 必须是源文本的原样子串；
/// `confidence_score` 仅在多轮提取时存在，表示该实体在实际
/// 执行的轮次中出现的比例。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// 提取类别标签
    pub extraction_class: String,
    /// 原文片段
    pub extraction_text: String,
    /// 补充属性
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// 源文本起始偏移
    pub char_start: Option<usize>,
    /// 源文本结束偏移
    pub char_end: Option<usize>,
    /// 置信度分数，取值 (0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
}

impl Entity {
    /// 跨轮次/跨提供商比较时使用的相等键
    ///
    /// 偏移量不参与比较，因为偏移量会随分块产生无意义的漂移
    pub fn key(&self) -> (&str, &str) {
        (&self.extraction_class, &self.extraction_text)
    }
}

/// 结果元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// 提供商标签，共识模式下为 "consensus(id1, id2, ...)"
    pub provider_label: String,
    /// 消耗的令牌数，提供商未上报时为空
    pub tokens_used: Option<u64>,
    /// 处理耗时（毫秒）
    pub processing_time_ms: u64,
    /// 是否命中结果缓存
    pub cache_hit: bool,
}

/// 提取结果
///
/// 实体的有序序列加上执行元数据，是任务成功后对外暴露的
/// 最终载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// 提取到的实体，保持首次出现的顺序
    pub entities: Vec<Entity>,
    /// 执行元数据
    pub metadata: ResultMetadata,
}

/// 默认少样本示例
///
/// 面向合同实体提取场景，调用方未提供示例时使用
pub fn default_examples() -> Vec<FewShotExample> {
    vec![FewShotExample {
        text: "This Agreement ('Agreement') is entered into as of January 15, 2025, \
               by and between Acme Corporation, a Delaware corporation ('Seller'), \
               and Global Industries LLC ('Buyer'). The total purchase price shall \
               be $2,500,000 payable within 30 days of closing."
            .to_string(),
        extractions: vec![
            ExampleExtraction {
                extraction_class: "party".to_string(),
                extraction_text: "Acme Corporation".to_string(),
                attributes: BTreeMap::from([
                    ("role".to_string(), "Seller".to_string()),
                    ("jurisdiction".to_string(), "Delaware".to_string()),
                    ("entity_type".to_string(), "corporation".to_string()),
                ]),
            },
            ExampleExtraction {
                extraction_class: "party".to_string(),
                extraction_text: "Global Industries LLC".to_string(),
                attributes: BTreeMap::from([("role".to_string(), "Buyer".to_string())]),
            },
            ExampleExtraction {
                extraction_class: "date".to_string(),
                extraction_text: "January 15, 2025".to_string(),
                attributes: BTreeMap::from([("type".to_string(), "effective_date".to_string())]),
            },
            ExampleExtraction {
                extraction_class: "monetary_amount".to_string(),
                extraction_text: "$2,500,000".to_string(),
                attributes: BTreeMap::from([("type".to_string(), "purchase_price".to_string())]),
            },
            ExampleExtraction {
                extraction_class: "term".to_string(),
                extraction_text: "30 days".to_string(),
                attributes: BTreeMap::from([
                    ("type".to_string(), "payment_term".to_string()),
                    ("reference".to_string(), "closing".to_string()),
                ]),
            },
        ],
    }]
}
