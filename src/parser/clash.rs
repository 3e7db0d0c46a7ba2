//! Clash / mihomo YAML 容器解码
//!
//! 接受 `proxies:` 列表里的记录，也接受嵌在
//! `proxy-providers.<name>.proxies` 下的记录（有些面板只发 provider 片段）。
//! 记录直接合成规范节点，不经过 URI。

use anyhow::Result;
use tracing::debug;

use crate::node::{Node, Protocol, ProxySettings};

pub fn parse_clash_yaml(content: &str) -> Result<Vec<Node>> {
    let yaml: serde_yml::Value = serde_yml::from_str(content)?;
    let mut nodes = Vec::new();

    if let Some(proxies) = yaml["proxies"].as_sequence() {
        for record in proxies {
            if let Some(node) = parse_clash_record(record) {
                nodes.push(node);
            }
        }
    }

    // proxy-providers.<x>.proxies 兜底
    if nodes.is_empty() {
        if let Some(providers) = yaml["proxy-providers"].as_mapping() {
            for (_key, provider) in providers {
                if let Some(proxies) = provider["proxies"].as_sequence() {
                    for record in proxies {
                        if let Some(node) = parse_clash_record(record) {
                            nodes.push(node);
                        }
                    }
                }
            }
        }
    }

    if nodes.is_empty() {
        anyhow::bail!("clash YAML: no usable proxy records");
    }
    Ok(nodes)
}

/// 单条 Clash 记录 → 节点；类型不认识或字段缺失返回 None
pub fn parse_clash_record(v: &serde_yml::Value) -> Option<Node> {
    let name = v["name"].as_str()?.to_string();
    let type_str = v["type"].as_str()?;
    let server = v["server"].as_str()?.to_string();
    let port = v["port"].as_u64().and_then(|p| u16::try_from(p).ok())?;
    let protocol = Protocol::from_alias(type_str)?;

    let sni = v["sni"]
        .as_str()
        .or_else(|| v["servername"].as_str())
        .map(String::from);
    let skip_cert_verify = v["skip-cert-verify"].as_bool().unwrap_or(false);
    let network = v["network"].as_str().map(String::from);
    let ws_path = v["ws-opts"]["path"].as_str().map(String::from);
    let ws_host = v["ws-opts"]["headers"]["Host"].as_str().map(String::from);

    let settings = match protocol {
        Protocol::Vmess => ProxySettings::Vmess {
            uuid: v["uuid"].as_str()?.to_string(),
            alter_id: v["alterId"].as_u64().unwrap_or(0) as u16,
            transport: network,
            ws_path,
            ws_host,
            tls: v["tls"].as_bool().unwrap_or(false),
            sni,
        },
        Protocol::Vless => ProxySettings::Vless {
            uuid: v["uuid"].as_str()?.to_string(),
            transport: network,
            security: v["tls"]
                .as_bool()
                .unwrap_or(false)
                .then(|| "tls".to_string()),
            encryption: None,
            sni,
            fingerprint: v["client-fingerprint"].as_str().map(String::from),
            alpn: None,
            ws_path,
            ws_host,
            flow: v["flow"].as_str().map(String::from),
        },
        Protocol::Shadowsocks => ProxySettings::Shadowsocks {
            method: v["cipher"].as_str()?.to_string(),
            password: v["password"].as_str()?.to_string(),
            plugin: v["plugin"].as_str().map(String::from),
        },
        Protocol::Shadowsocksr => ProxySettings::Shadowsocksr {
            method: v["cipher"].as_str()?.to_string(),
            password: v["password"].as_str()?.to_string(),
            protocol: v["protocol"].as_str().unwrap_or("origin").to_string(),
            proto_param: v["protocol-param"].as_str().map(String::from),
            obfs: v["obfs"].as_str().unwrap_or("plain").to_string(),
            obfs_param: v["obfs-param"].as_str().map(String::from),
        },
        Protocol::Trojan => ProxySettings::Trojan {
            password: v["password"].as_str()?.to_string(),
            sni,
            allow_insecure: skip_cert_verify,
        },
        Protocol::Hysteria2 => ProxySettings::Hysteria2 {
            auth: v["password"].as_str()?.to_string(),
            sni,
            insecure: skip_cert_verify,
            obfs: v["obfs"].as_str().map(String::from),
            obfs_password: v["obfs-password"].as_str().map(String::from),
            up_mbps: v["up"].as_u64(),
            down_mbps: v["down"].as_u64(),
        },
        Protocol::Http | Protocol::Https => ProxySettings::Http {
            username: v["username"].as_str().map(String::from),
            password: v["password"].as_str().map(String::from),
            tls: v["tls"].as_bool().unwrap_or(protocol == Protocol::Https),
        },
        Protocol::Socks5 => ProxySettings::Socks5 {
            username: v["username"].as_str().map(String::from),
            password: v["password"].as_str().map(String::from),
        },
    };

    let node = Node::new(protocol, name, server, port, settings);
    if let Err(e) = node.validate() {
        debug!(error = %e, "clash record dropped");
        return None;
    }
    Some(node)
}
