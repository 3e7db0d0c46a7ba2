//! JSON 容器解码
//!
//! 三种形态：
//! - Clash 风格记录的数组或 `{"proxies": [...]}`（键与 YAML 容器一致）
//! - sing-box `{"outbounds": [...]}`
//! - SIP008 `{"servers": [...]}`（Shadowsocks 标准订阅）

use anyhow::Result;

use crate::node::{Node, Protocol, ProxySettings};

pub fn parse_json(content: &str) -> Result<Vec<Node>> {
    let v: serde_json::Value = serde_json::from_str(content)?;

    if let Some(servers) = v["servers"].as_array() {
        let nodes = parse_sip008(servers);
        if !nodes.is_empty() {
            return Ok(nodes);
        }
    }
    if let Some(outbounds) = v["outbounds"].as_array() {
        let nodes = parse_singbox(outbounds);
        if !nodes.is_empty() {
            return Ok(nodes);
        }
    }

    // Clash 风格：裸数组或 proxies 键
    let records = v
        .as_array()
        .or_else(|| v["proxies"].as_array())
        .ok_or_else(|| anyhow::anyhow!("JSON: no servers/outbounds/proxies array"))?;
    let mut nodes = Vec::new();
    for record in records {
        // 走 YAML 容器同一套字段映射
        let yaml: serde_yml::Value = serde_yml::from_str(&record.to_string())?;
        if let Some(node) = super::clash::parse_clash_record(&yaml) {
            nodes.push(node);
        }
    }
    if nodes.is_empty() {
        anyhow::bail!("JSON: no usable proxy records");
    }
    Ok(nodes)
}

fn parse_sip008(servers: &[serde_json::Value]) -> Vec<Node> {
    let mut nodes = Vec::new();
    for s in servers {
        let (Some(server), Some(port), Some(password), Some(method)) = (
            s["server"].as_str(),
            s["server_port"].as_u64().and_then(|p| u16::try_from(p).ok()),
            s["password"].as_str(),
            s["method"].as_str(),
        ) else {
            continue;
        };
        let name = s["remarks"].as_str().unwrap_or("").to_string();
        nodes.push(Node::new(
            Protocol::Shadowsocks,
            name,
            server,
            port,
            ProxySettings::Shadowsocks {
                method: method.to_string(),
                password: password.to_string(),
                plugin: None,
            },
        ));
    }
    nodes
}

fn parse_singbox(outbounds: &[serde_json::Value]) -> Vec<Node> {
    let mut nodes = Vec::new();
    for ob in outbounds {
        let type_str = ob["type"].as_str().unwrap_or("");
        // 组和内置出站不是节点
        if matches!(
            type_str,
            "direct" | "block" | "dns" | "selector" | "urltest" | ""
        ) {
            continue;
        }
        let Some(protocol) = Protocol::from_alias(type_str) else {
            continue;
        };
        let (Some(server), Some(port)) = (
            ob["server"].as_str(),
            ob["server_port"].as_u64().and_then(|p| u16::try_from(p).ok()),
        ) else {
            continue;
        };
        let name = ob["tag"].as_str().unwrap_or("").to_string();
        let tls = &ob["tls"];
        let sni = tls["server_name"].as_str().map(String::from);
        let insecure = tls["insecure"].as_bool().unwrap_or(false);
        let tls_enabled = tls["enabled"].as_bool().unwrap_or(false);

        let settings = match protocol {
            Protocol::Vmess => ProxySettings::Vmess {
                uuid: ob["uuid"].as_str().unwrap_or("").to_string(),
                alter_id: ob["alter_id"].as_u64().unwrap_or(0) as u16,
                transport: ob["transport"]["type"].as_str().map(String::from),
                ws_path: ob["transport"]["path"].as_str().map(String::from),
                ws_host: None,
                tls: tls_enabled,
                sni,
            },
            Protocol::Vless => ProxySettings::Vless {
                uuid: ob["uuid"].as_str().unwrap_or("").to_string(),
                transport: ob["transport"]["type"].as_str().map(String::from),
                security: tls_enabled.then(|| "tls".to_string()),
                encryption: None,
                sni,
                fingerprint: None,
                alpn: None,
                ws_path: ob["transport"]["path"].as_str().map(String::from),
                ws_host: None,
                flow: ob["flow"].as_str().map(String::from),
            },
            Protocol::Shadowsocks => ProxySettings::Shadowsocks {
                method: ob["method"].as_str().unwrap_or("").to_string(),
                password: ob["password"].as_str().unwrap_or("").to_string(),
                plugin: None,
            },
            Protocol::Trojan => ProxySettings::Trojan {
                password: ob["password"].as_str().unwrap_or("").to_string(),
                sni,
                allow_insecure: insecure,
            },
            Protocol::Hysteria2 => ProxySettings::Hysteria2 {
                auth: ob["password"].as_str().unwrap_or("").to_string(),
                sni,
                insecure,
                obfs: ob["obfs"]["type"].as_str().map(String::from),
                obfs_password: ob["obfs"]["password"].as_str().map(String::from),
                up_mbps: ob["up_mbps"].as_u64(),
                down_mbps: ob["down_mbps"].as_u64(),
            },
            Protocol::Http | Protocol::Https => ProxySettings::Http {
                username: ob["username"].as_str().map(String::from),
                password: ob["password"].as_str().map(String::from),
                tls: tls_enabled,
            },
            Protocol::Socks5 => ProxySettings::Socks5 {
                username: ob["username"].as_str().map(String::from),
                password: ob["password"].as_str().map(String::from),
            },
            Protocol::Shadowsocksr => continue,
        };

        let node = Node::new(protocol, name, server, port, settings);
        if node.validate().is_ok() {
            nodes.push(node);
        }
    }
    nodes
}
