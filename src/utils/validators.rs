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

use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// URL长度上限，超过即拒绝
pub const MAX_URL_LENGTH: usize = 2048;

/// DNS解析超时，防止恶意慢速DNS拖住工作器
const DNS_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// 无条件拒绝的主机名，不依赖DNS解析结果
const BLOCKED_HOSTNAMES: &[&str] = &["localhost"];

/// 验证错误类型
#[derive(Error, Debug)]
pub enum ValidationError {
    /// URL无法解析
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// URL超长
    #[error("URL exceeds maximum length of {MAX_URL_LENGTH} characters")]
    UrlTooLong,
    /// 非http/https协议
    #[error("Invalid scheme '{0}': only http and https are allowed")]
    InvalidScheme(String),
    /// 主机名在拒绝列表中
    #[error("Hostname '{0}' is not allowed")]
    BlockedHostname(String),
    /// 主机名不在允许的域名列表中
    #[error("Domain '{0}' is not in the allowed domains list")]
    DomainNotAllowed(String),
    /// DNS解析失败或超时
    #[error("DNS resolution failed for host '{0}'")]
    ResolutionFailed(String),
    /// 解析到私有/保留地址
    #[error("URL resolves to a private or reserved IP address")]
    PrivateAddress,
}

/// 检查IP地址是否可以安全地发起出站请求
///
/// 拒绝环回、私有（RFC1918）、链路本地、运营商级NAT、
/// 广播、文档保留段，以及对应的IPv6地址段。
pub fn is_safe_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            // 100.64.0.0/10 运营商级NAT
            let is_cgnat = octets[0] == 100 && (64..128).contains(&octets[1]);
            !ipv4.is_loopback()
                && !ipv4.is_private()
                && !ipv4.is_link_local()
                && !ipv4.is_broadcast()
                && !ipv4.is_documentation()
                && !ipv4.is_unspecified()
                && !is_cgnat
        }
        IpAddr::V6(ipv6) => {
            let segments = ipv6.segments();
            // fc00::/7 唯一本地地址
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // fe80::/10 链路本地地址
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            // ::ffff:0:0/96 IPv4映射地址按映射的IPv4检查
            if let Some(mapped) = ipv6.to_ipv4_mapped() {
                return is_safe_ip(IpAddr::V4(mapped));
            }
            !ipv6.is_loopback() && !ipv6.is_unspecified() && !is_unique_local && !is_link_local
        }
    }
}

/// 验证URL是否可以安全地由服务端抓取
///
/// 依次检查：URL长度、协议、主机名拒绝列表、域名允许列表
/// （支持子域匹配）、DNS解析结果中的私有地址。初始URL和
/// 每一个重定向目标都必须通过同一条流水线。
///
/// `exempt_hosts` 中的主机名跳过拒绝列表和私有地址检查，
/// 用于受控环境（本地集成测试、内网联调）。
///
/// 已知局限（记录在案，暂不修复）：DNS在验证时解析，不能
/// 防御验证与连接之间更换DNS应答的重绑定攻击。
///
/// # 参数
///
/// * `url` - 待验证的URL字符串
/// * `allowed_domains` - 域名允许列表，为空时不限制
/// * `exempt_hosts` - 跳过SSRF检查的主机名列表
///
/// # 返回值
///
/// * `Ok(Url)` - 通过验证的解析后URL
/// * `Err(ValidationError)` - 任一检查失败
pub async fn validate_url(
    url: &str,
    allowed_domains: &[String],
    exempt_hosts: &[String],
) -> Result<Url, ValidationError> {
    if url.len() > MAX_URL_LENGTH {
        return Err(ValidationError::UrlTooLong);
    }

    let parsed = Url::parse(url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::InvalidScheme(parsed.scheme().to_string()));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ValidationError::InvalidUrl("missing hostname".to_string()))?
        .to_lowercase();

    let exempt = exempt_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host));

    if !exempt && BLOCKED_HOSTNAMES.contains(&host.as_str()) {
        return Err(ValidationError::BlockedHostname(host));
    }

    if !allowed_domains.is_empty()
        && !allowed_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    {
        return Err(ValidationError::DomainNotAllowed(host));
    }

    if exempt {
        return Ok(parsed);
    }

    let lookup = tokio::time::timeout(
        DNS_RESOLVE_TIMEOUT,
        tokio::net::lookup_host((host.as_str(), 0u16)),
    )
    .await
    .map_err(|_| {
        warn!("DNS resolution timed out for host: {}", host);
        ValidationError::ResolutionFailed(host.clone())
    })?
    .map_err(|_| {
        warn!("DNS resolution failed for host: {}", host);
        ValidationError::ResolutionFailed(host.clone())
    })?;

    for addr in lookup {
        if !is_safe_ip(addr.ip()) {
            warn!("Blocked SSRF attempt: {} resolved to {}", host, addr.ip());
            return Err(ValidationError::PrivateAddress);
        }
    }

    Ok(parsed)
}
