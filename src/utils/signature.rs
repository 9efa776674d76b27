// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// 重放窗口：时间戳偏离当前时间超过该秒数的请求被拒绝
pub const REPLAY_TOLERANCE_SECS: i64 = 300;

/// 计算Webhook载荷的HMAC-SHA256签名
///
/// 签名覆盖 `"{timestamp}." + body`，接收方校验时间戳
/// 可以防御重放攻击。这是外部方依赖的精确线上契约。
///
/// # 参数
///
/// * `secret` - 共享签名密钥
/// * `timestamp` - Unix时间戳（秒）
/// * `body` - 原始请求体字节
///
/// # 返回值
///
/// 十六进制编码的签名
pub fn compute_webhook_signature(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// 校验Webhook签名
///
/// 时间戳偏离 `now` 超过重放窗口的请求即便签名正确也被
/// 拒绝。签名比较走HMAC验证路径（常数时间）。
///
/// # 参数
///
/// * `secret` - 共享签名密钥
/// * `timestamp` - 请求头中的时间戳
/// * `body` - 原始请求体字节
/// * `signature_hex` - 请求头中的十六进制签名
/// * `now` - 当前Unix时间戳（秒）
pub fn verify_webhook_signature(
    secret: &str,
    timestamp: i64,
    body: &[u8],
    signature_hex: &str,
    now: i64,
) -> bool {
    if (now - timestamp).abs() > REPLAY_TOLERANCE_SECS {
        return false;
    }

    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}
