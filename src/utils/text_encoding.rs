// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use tracing::debug;

/// 将下载的字节流解码为UTF-8文本
///
/// 优先使用响应声明的字符集；声明缺失或无法识别时退回
/// chardetng 检测。解码总是尽力而为（无效序列替换为
/// U+FFFD），不会因为不可解码的字节而失败。
///
/// # 参数
///
/// * `input` - 原始字节
/// * `declared_charset` - Content-Type 中声明的字符集标签
pub fn decode_bytes(input: &[u8], declared_charset: Option<&str>) -> String {
    if let Some(label) = declared_charset {
        if let Some(encoding) = Encoding::for_label(label.trim().as_bytes()) {
            let (text, _, had_errors) = encoding.decode(input);
            if had_errors {
                debug!("Lossy decode with declared charset {}", label);
            }
            return text.into_owned();
        }
        debug!("Unrecognized charset label: {}", label);
    }

    // 快速路径：绝大多数文档是合法UTF-8
    if let Ok(text) = std::str::from_utf8(input) {
        return text.to_string();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(input, true);
    let encoding = detector.guess(None, true);
    let (text, _, _) = encoding.decode(input);
    text.into_owned()
}
