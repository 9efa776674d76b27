// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含提取编排的核心算法与能力接口：
/// - similarity：词级Jaccard相似度
/// - pass_merger：多轮提取结果合并与提前停止判定
/// - consensus_service：跨提供商共识合并
/// - provider：提取能力接口与提供商注册表
/// - extraction_service：任务执行流水线
pub mod consensus_service;
pub mod extraction_service;
pub mod pass_merger;
pub mod provider;
pub mod similarity;
