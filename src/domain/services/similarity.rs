// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashSet;

/// 将文本规范化后切分为小写词元集合
fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect()
}

/// 计算两段文本的词级 Jaccard 相似度
///
/// 对小写词元集合计算 `|A ∩ B| / |A ∪ B|`，返回值落在
/// `[0, 1]`。两段文本均为空时返回 1.0，仅一方为空时返回 0.0。
/// 纯函数，无状态、无副作用。
///
/// # 参数
///
/// * `a` - 第一段文本
/// * `b` - 第二段文本
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words_a = word_set(a);
    let words_b = word_set(b);

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }

    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 1.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    intersection as f64 / union as f64
}
