pub mod error;
pub mod tls;

pub use error::Error;

use std::borrow::Cow;

use anyhow::Result;
use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

// ─── Base64 ───

/// 宽容解码：依次尝试 STANDARD / URL_SAFE_NO_PAD / STANDARD_NO_PAD，
/// 输入中的空白全部忽略
pub fn decode_base64_loose(content: &str) -> Result<Vec<u8>> {
    let clean: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&clean)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(&clean))
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(&clean))?;
    Ok(bytes)
}

/// 宽容解码为 UTF-8 字符串
pub fn decode_base64_str(content: &str) -> Result<String> {
    Ok(String::from_utf8(decode_base64_loose(content)?)?)
}

pub fn encode_base64(content: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(content)
}

/// 是否只由 base64 字母表组成（含 URL-safe 变体）
pub fn looks_like_base64(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return false;
    }
    trimmed.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_' | '\n' | '\r')
    })
}

// ─── URL 片段 ───

/// 拆分 host:port，支持 `[::1]:443` 形式的 IPv6
pub fn parse_host_port(s: &str) -> Result<(String, u16)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, port_with_bracket) = rest
            .split_once(']')
            .ok_or_else(|| anyhow::anyhow!("invalid IPv6 address: {}", s))?;
        let port_str = port_with_bracket
            .strip_prefix(':')
            .ok_or_else(|| anyhow::anyhow!("missing port after IPv6: {}", s))?;
        Ok((host.to_string(), port_str.parse()?))
    } else {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("missing port in: {}", s))?;
        Ok((host.to_string(), port.parse()?))
    }
}

/// 百分号解码，非法序列原样返回
pub fn url_decode(s: &str) -> Cow<'_, str> {
    match percent_decode_str(s).decode_utf8() {
        Ok(Cow::Borrowed(b)) => Cow::Borrowed(b),
        Ok(Cow::Owned(o)) => Cow::Owned(o),
        Err(_) => Cow::Borrowed(s),
    }
}

pub fn url_encode(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

/// 解析 `k=v&k2=v2` 查询串，键值都做百分号解码
pub fn parse_query_params(s: &str) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    if s.is_empty() {
        return map;
    }
    for pair in s.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            map.insert(url_decode(k).to_string(), url_decode(v).to_string());
        }
    }
    map
}

// ─── 时间 ───

pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
