// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

use crate::domain::services::consensus_service::ConsensusError;
use crate::domain::services::provider::ProviderError;
use crate::engines::download_engine::DownloadError;
use crate::utils::validators::ValidationError;

/// 提取任务错误分类
///
/// 任务执行过程中可能出现的全部错误。`Validation`、
/// `Ssrf` 和 `Consensus` 在提交时同步暴露给调用方；
/// `Download` 和致命的 `Provider` 错误将任务转入失败终态。
/// 缓存后端错误不在此列：缓存不可用降级为强制未命中，
/// 永远不会使任务失败。
///
/// 错误消息对用户可见，不得包含API密钥或内部URL。
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// 请求形状错误，快速失败且不创建任务
    #[error("Validation error: {0}")]
    Validation(String),

    /// URL未通过SSRF安全流水线，在任何网络调用之前失败
    #[error("URL blocked by SSRF check: {0}")]
    Ssrf(#[from] ValidationError),

    /// 文档下载失败（超时/超限/HTTP错误）
    #[error("Document download failed: {0}")]
    Download(#[from] DownloadError),

    /// 提取能力调用失败
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// 共识配置错误
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}
