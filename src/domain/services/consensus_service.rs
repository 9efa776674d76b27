// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

use crate::domain::models::extraction::Entity;
use crate::domain::services::similarity::jaccard_similarity;

/// 共识配置错误类型
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// 共识合并至少需要两个提供商的结果
    #[error("Consensus merge requires at least 2 provider results, got {0}")]
    InsufficientProviders(usize),
}

/// 跨提供商共识合并
///
/// 以第一个提供商的实体作为候选种子集。候选实体只有在其余
/// 每个提供商的结果中都存在同类别、且文本相似度达到阈值的
/// 实体时才被保留。保留的实体沿用种子的文本、属性和偏移量
/// （先写者胜出），置信度取各一致副本的平均值（若存在）。
///
/// # 参数
///
/// * `per_provider` - 按请求顺序排列的 (提供商ID, 实体列表)
/// * `threshold` - 最低 Jaccard 相似度，取值 `[0, 1]`
///
/// # 返回值
///
/// * `Ok((entities, label))` - 达成共识的实体与 `consensus(...)` 标签
/// * `Err(ConsensusError)` - 提供商结果少于两个
pub fn merge_consensus(
    per_provider: &[(String, Vec<Entity>)],
    threshold: f64,
) -> Result<(Vec<Entity>, String), ConsensusError> {
    if per_provider.len() < 2 {
        return Err(ConsensusError::InsufficientProviders(per_provider.len()));
    }

    let (_, seed_entities) = &per_provider[0];
    let others = &per_provider[1..];

    let mut agreed: Vec<Entity> = Vec::new();

    for candidate in seed_entities {
        let mut agreeing_scores: Vec<f64> = Vec::new();
        if let Some(score) = candidate.confidence_score {
            agreeing_scores.push(score);
        }

        let mut retained = true;
        for (_, other_entities) in others {
            // 只在同类别实体中寻找最佳匹配
            let best = other_entities
                .iter()
                .filter(|e| e.extraction_class == candidate.extraction_class)
                .map(|e| {
                    (
                        jaccard_similarity(&candidate.extraction_text, &e.extraction_text),
                        e,
                    )
                })
                .max_by(|(a, _), (b, _)| a.total_cmp(b));

            match best {
                Some((similarity, matched)) if similarity >= threshold => {
                    if let Some(score) = matched.confidence_score {
                        agreeing_scores.push(score);
                    }
                }
                _ => {
                    retained = false;
                    break;
                }
            }
        }

        if retained {
            let mut entity = candidate.clone();
            entity.confidence_score = if agreeing_scores.is_empty() {
                None
            } else {
                Some(agreeing_scores.iter().sum::<f64>() / agreeing_scores.len() as f64)
            };
            agreed.push(entity);
        }
    }

    let label = format!(
        "consensus({})",
        per_provider
            .iter()
            .map(|(id, _)| id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok((agreed, label))
}
