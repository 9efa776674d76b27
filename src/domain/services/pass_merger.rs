// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{HashMap, HashSet};

use crate::domain::models::extraction::Entity;

/// 合并多轮独立提取的输出
///
/// 跨轮次按 `(extraction_class, extraction_text)` 分组；每组
/// 保留首次出现的属性和偏移量，`confidence_score` 为该实体
/// 出现的轮数除以实际执行的轮数。实体顺序保持首次出现的顺序。
///
/// 单轮提取（`passes_run == 1`）不产生置信度分数。
///
/// # 参数
///
/// * `pass_outputs` - 各轮提取的实体列表，每轮一个
/// * `passes_run` - 实际执行的轮数（提前停止后可小于请求轮数）
pub fn merge_passes(pass_outputs: &[Vec<Entity>], passes_run: usize) -> Vec<Entity> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut merged: HashMap<(String, String), (Entity, usize)> = HashMap::new();

    for pass in pass_outputs {
        // 同一轮内重复出现的实体只计一次
        let mut seen_this_pass: HashSet<(String, String)> = HashSet::new();
        for entity in pass {
            let key = (
                entity.extraction_class.clone(),
                entity.extraction_text.clone(),
            );
            if !seen_this_pass.insert(key.clone()) {
                continue;
            }
            match merged.get_mut(&key) {
                Some((_, count)) => *count += 1,
                None => {
                    order.push(key.clone());
                    merged.insert(key, (entity.clone(), 1));
                }
            }
        }
    }

    order
        .into_iter()
        .map(|key| {
            let (mut entity, count) = merged.remove(&key).expect("key recorded on insert");
            entity.confidence_score = if passes_run > 1 {
                Some(count as f64 / passes_run as f64)
            } else {
                None
            };
            entity
        })
        .collect()
}

/// 判断两轮输出作为 `(class, text)` 集合是否完全相等
///
/// 连续两轮输出稳定意味着继续执行不会改变合并结果，
/// 编排器据此提前停止发起后续轮次。
pub fn passes_converged(a: &[Entity], b: &[Entity]) -> bool {
    let keys = |entities: &[Entity]| -> HashSet<(String, String)> {
        entities
            .iter()
            .map(|e| (e.extraction_class.clone(), e.extraction_text.clone()))
            .collect()
    };
    keys(a) == keys(b)
}
