//! 规范节点模型
//!
//! 所有订阅格式解析后都归一到 [`Node`]。解析期校验不变量
//! `server != "" && 1 <= port <= 65535 && protocol 已知`，不满足的节点
//! 直接丢弃（ValidationError）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::Error;

// ─── 协议 ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Shadowsocks,
    Shadowsocksr,
    Trojan,
    Hysteria2,
    Http,
    Https,
    Socks5,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Shadowsocksr => "shadowsocksr",
            Protocol::Trojan => "trojan",
            Protocol::Hysteria2 => "hysteria2",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Socks5 => "socks5",
        }
    }

    /// URI scheme（合成链接时使用）
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Shadowsocks => "ss",
            Protocol::Shadowsocksr => "ssr",
            other => other.as_str(),
        }
    }

    /// 带别名的解析：`ss`、`hy2`、`socks` 等都能认出来
    pub fn from_alias(s: &str) -> Option<Protocol> {
        match s.to_ascii_lowercase().as_str() {
            "vmess" => Some(Protocol::Vmess),
            "vless" => Some(Protocol::Vless),
            "ss" | "shadowsocks" => Some(Protocol::Shadowsocks),
            "ssr" | "shadowsocksr" => Some(Protocol::Shadowsocksr),
            "trojan" => Some(Protocol::Trojan),
            "hysteria2" | "hy2" => Some(Protocol::Hysteria2),
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            "socks5" | "socks" => Some(Protocol::Socks5),
            _ => None,
        }
    }

    pub fn all() -> &'static [Protocol] {
        &[
            Protocol::Vmess,
            Protocol::Vless,
            Protocol::Shadowsocks,
            Protocol::Shadowsocksr,
            Protocol::Trojan,
            Protocol::Hysteria2,
            Protocol::Http,
            Protocol::Https,
            Protocol::Socks5,
        ]
    }

    /// 订阅体里可能出现的 URI 前缀（探测格式用）
    pub fn uri_prefixes() -> &'static [&'static str] {
        &[
            "vmess://",
            "vless://",
            "ss://",
            "ssr://",
            "trojan://",
            "hysteria2://",
            "hy2://",
            "http://",
            "https://",
            "socks5://",
            "socks://",
        ]
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── 协议参数 ───

/// 各协议自己的字段，serde tag 区分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProxySettings {
    Vmess {
        uuid: String,
        #[serde(default)]
        alter_id: u16,
        /// tcp / ws / grpc / h2
        #[serde(default)]
        transport: Option<String>,
        #[serde(default)]
        ws_path: Option<String>,
        #[serde(default)]
        ws_host: Option<String>,
        #[serde(default)]
        tls: bool,
        #[serde(default)]
        sni: Option<String>,
    },
    Vless {
        uuid: String,
        #[serde(default)]
        transport: Option<String>,
        #[serde(default)]
        security: Option<String>,
        #[serde(default)]
        encryption: Option<String>,
        #[serde(default)]
        sni: Option<String>,
        #[serde(default)]
        fingerprint: Option<String>,
        #[serde(default)]
        alpn: Option<String>,
        #[serde(default)]
        ws_path: Option<String>,
        #[serde(default)]
        ws_host: Option<String>,
        #[serde(default)]
        flow: Option<String>,
    },
    Shadowsocks {
        method: String,
        password: String,
        #[serde(default)]
        plugin: Option<String>,
    },
    Shadowsocksr {
        method: String,
        password: String,
        protocol: String,
        #[serde(default)]
        proto_param: Option<String>,
        obfs: String,
        #[serde(default)]
        obfs_param: Option<String>,
    },
    Trojan {
        password: String,
        #[serde(default)]
        sni: Option<String>,
        #[serde(default)]
        allow_insecure: bool,
    },
    Hysteria2 {
        auth: String,
        #[serde(default)]
        sni: Option<String>,
        #[serde(default)]
        insecure: bool,
        #[serde(default)]
        obfs: Option<String>,
        #[serde(default)]
        obfs_password: Option<String>,
        #[serde(default)]
        up_mbps: Option<u64>,
        #[serde(default)]
        down_mbps: Option<u64>,
    },
    Http {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        tls: bool,
    },
    Socks5 {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
}

impl ProxySettings {
    /// TLS 的 SNI（如有）
    pub fn sni(&self) -> Option<&str> {
        match self {
            ProxySettings::Vmess { sni, .. }
            | ProxySettings::Vless { sni, .. }
            | ProxySettings::Trojan { sni, .. }
            | ProxySettings::Hysteria2 { sni, .. } => sni.as_deref(),
            _ => None,
        }
    }
}

// ─── 地理 / 探测 ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    /// 两字母国家码，解析不出来时为 None（归入 Others）
    pub country_code: Option<String>,
    pub country_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

impl GeoInfo {
    /// 解析失败的占位：国家码空、名字 "Others"
    pub fn others() -> Self {
        GeoInfo {
            country_code: None,
            country_name: "Others".to_string(),
            city: None,
            org: None,
            asn: None,
            resolved_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub status: ProbeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub probed_at: DateTime<Utc>,
}

// ─── 节点 ───

/// 去重指纹：(server, port, protocol)
pub type Fingerprint = (String, u16, Protocol);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub protocol: Protocol,
    pub display_name: String,
    /// 重命名前的原始名字（位置纠正时保留）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_display_name: Option<String>,
    pub server: String,
    pub port: u16,
    pub settings: ProxySettings,
    #[serde(default)]
    pub source_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeInfo>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 原始广告 URI，重新发布时原样输出
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Node {
    pub fn new(
        protocol: Protocol,
        display_name: impl Into<String>,
        server: impl Into<String>,
        port: u16,
        settings: ProxySettings,
    ) -> Self {
        let server = server.into();
        let mut display_name = display_name.into();
        if display_name.trim().is_empty() {
            display_name = format!("{} {}:{}", protocol.as_str().to_uppercase(), server, port);
        }
        let id = node_id(&server, port, protocol, &display_name);
        Node {
            id,
            protocol,
            display_name,
            raw_display_name: None,
            server,
            port,
            settings,
            source_tag: String::new(),
            geo: None,
            probe: None,
            tags: Vec::new(),
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        (self.server.clone(), self.port, self.protocol)
    }

    /// §3 不变量；port=0 会在解析成 u16 前被拒掉，这里再兜一次底
    pub fn validate(&self) -> Result<(), Error> {
        if self.server.trim().is_empty() {
            return Err(Error::Validation(format!(
                "node '{}' has empty server",
                self.display_name
            )));
        }
        if self.port == 0 {
            return Err(Error::Validation(format!(
                "node '{}' has port 0",
                self.display_name
            )));
        }
        Ok(())
    }

    /// 最终分类后的国家码（探测纠正优先于名字推断）
    pub fn country_code(&self) -> Option<&str> {
        self.geo.as_ref().and_then(|g| g.country_code.as_deref())
    }

    pub fn is_up(&self) -> bool {
        matches!(
            self.probe,
            Some(ProbeInfo {
                status: ProbeStatus::Up,
                ..
            })
        )
    }
}

/// 节点 id：指纹 + 名字的 blake3 截断
fn node_id(server: &str, port: u16, protocol: Protocol, name: &str) -> String {
    let material = format!("{}:{}:{}:{}", server, port, protocol.as_str(), name);
    let hash = blake3::hash(material.as_bytes());
    hash.to_hex()[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trojan_node(server: &str, port: u16) -> Node {
        Node::new(
            Protocol::Trojan,
            "t1",
            server,
            port,
            ProxySettings::Trojan {
                password: "p".into(),
                sni: None,
                allow_insecure: false,
            },
        )
    }

    #[test]
    fn display_name_default() {
        let node = Node::new(
            Protocol::Shadowsocks,
            "",
            "1.2.3.4",
            8388,
            ProxySettings::Shadowsocks {
                method: "aes-256-gcm".into(),
                password: "p".into(),
                plugin: None,
            },
        );
        assert_eq!(node.display_name, "SHADOWSOCKS 1.2.3.4:8388");
    }

    #[test]
    fn validate_rejects_empty_server() {
        assert!(trojan_node("", 443).validate().is_err());
        assert!(trojan_node(" ", 443).validate().is_err());
        assert!(trojan_node("h.example", 443).validate().is_ok());
    }

    #[test]
    fn validate_rejects_port_zero() {
        assert!(trojan_node("h.example", 0).validate().is_err());
    }

    #[test]
    fn fingerprint_includes_protocol() {
        let a = trojan_node("1.1.1.1", 443);
        let mut b = a.clone();
        b.protocol = Protocol::Vmess;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn protocol_aliases() {
        assert_eq!(Protocol::from_alias("hy2"), Some(Protocol::Hysteria2));
        assert_eq!(Protocol::from_alias("SS"), Some(Protocol::Shadowsocks));
        assert_eq!(Protocol::from_alias("socks"), Some(Protocol::Socks5));
        assert_eq!(Protocol::from_alias("wireguard"), None);
    }

    #[test]
    fn id_stable_for_same_input() {
        let a = trojan_node("1.1.1.1", 443);
        let b = trojan_node("1.1.1.1", 443);
        assert_eq!(a.id, b.id);
    }
}
