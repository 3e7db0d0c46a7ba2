//! V2Ray 配置生成（JSON）
//!
//! 只收 V2Ray 核心认识的协议：vmess / vless / trojan / shadowsocks /
//! socks / http。组信息 V2Ray 没有对应概念，首个可用节点作为默认出站。

use anyhow::Result;
use serde_json::json;

use crate::node::{Node, ProxySettings};

pub fn render(nodes: &[Node]) -> Result<String> {
    let outbounds: Vec<serde_json::Value> = nodes.iter().filter_map(v2ray_outbound).collect();
    if outbounds.is_empty() {
        anyhow::bail!("no v2ray-compatible outbounds");
    }

    let doc = json!({
        "log": { "loglevel": "warning" },
        "inbounds": [
            {
                "tag": "socks-in",
                "protocol": "socks",
                "listen": "127.0.0.1",
                "port": 1080,
                "settings": { "udp": true }
            }
        ],
        "outbounds": outbounds,
        "routing": { "rules": [] }
    });

    Ok(serde_json::to_string_pretty(&doc)?)
}

fn v2ray_outbound(node: &Node) -> Option<serde_json::Value> {
    let tag = &node.display_name;
    match &node.settings {
        ProxySettings::Vmess {
            uuid,
            alter_id,
            transport,
            ws_path,
            ws_host,
            tls,
            sni,
            ..
        } => {
            let mut outbound = json!({
                "tag": tag,
                "protocol": "vmess",
                "settings": {
                    "vnext": [{
                        "address": node.server,
                        "port": node.port,
                        "users": [{ "id": uuid, "alterId": alter_id, "security": "auto" }]
                    }]
                }
            });
            outbound["streamSettings"] =
                stream_settings(transport, ws_path, ws_host, *tls, sni);
            Some(outbound)
        }
        ProxySettings::Vless {
            uuid,
            transport,
            security,
            sni,
            ws_path,
            ws_host,
            flow,
            ..
        } => {
            let mut user = json!({ "id": uuid, "encryption": "none" });
            if let Some(flow) = flow {
                user["flow"] = json!(flow);
            }
            let mut outbound = json!({
                "tag": tag,
                "protocol": "vless",
                "settings": {
                    "vnext": [{ "address": node.server, "port": node.port, "users": [user] }]
                }
            });
            outbound["streamSettings"] = stream_settings(
                transport,
                ws_path,
                ws_host,
                security.as_deref() == Some("tls"),
                sni,
            );
            Some(outbound)
        }
        ProxySettings::Trojan {
            password,
            sni,
            allow_insecure,
        } => Some(json!({
            "tag": tag,
            "protocol": "trojan",
            "settings": {
                "servers": [{ "address": node.server, "port": node.port, "password": password }]
            },
            "streamSettings": {
                "network": "tcp",
                "security": "tls",
                "tlsSettings": {
                    "serverName": sni.clone().unwrap_or_else(|| node.server.clone()),
                    "allowInsecure": allow_insecure
                }
            }
        })),
        ProxySettings::Shadowsocks {
            method, password, ..
        } => Some(json!({
            "tag": tag,
            "protocol": "shadowsocks",
            "settings": {
                "servers": [{
                    "address": node.server,
                    "port": node.port,
                    "method": method,
                    "password": password
                }]
            }
        })),
        ProxySettings::Socks5 { username, password } => {
            let mut server = json!({ "address": node.server, "port": node.port });
            if let (Some(u), Some(p)) = (username, password) {
                server["users"] = json!([{ "user": u, "pass": p }]);
            }
            Some(json!({
                "tag": tag,
                "protocol": "socks",
                "settings": { "servers": [server] }
            }))
        }
        ProxySettings::Http {
            username, password, ..
        } => {
            let mut server = json!({ "address": node.server, "port": node.port });
            if let (Some(u), Some(p)) = (username, password) {
                server["users"] = json!([{ "user": u, "pass": p }]);
            }
            Some(json!({
                "tag": tag,
                "protocol": "http",
                "settings": { "servers": [server] }
            }))
        }
        // v2ray 核心没有这两个
        ProxySettings::Shadowsocksr { .. } | ProxySettings::Hysteria2 { .. } => None,
    }
}

fn stream_settings(
    transport: &Option<String>,
    ws_path: &Option<String>,
    ws_host: &Option<String>,
    tls: bool,
    sni: &Option<String>,
) -> serde_json::Value {
    let network = transport.as_deref().unwrap_or("tcp");
    let mut stream = json!({ "network": network });
    if network == "ws" {
        let mut ws = json!({});
        if let Some(path) = ws_path {
            ws["path"] = json!(path);
        }
        if let Some(host) = ws_host {
            ws["headers"] = json!({ "Host": host });
        }
        stream["wsSettings"] = ws;
    }
    if tls {
        stream["security"] = json!("tls");
        if let Some(sni) = sni {
            stream["tlsSettings"] = json!({ "serverName": sni });
        }
    }
    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Protocol;

    #[test]
    fn vmess_ws_outbound() {
        let node = Node::new(
            Protocol::Vmess,
            "v1",
            "h.example",
            443,
            ProxySettings::Vmess {
                uuid: "u".into(),
                alter_id: 0,
                transport: Some("ws".into()),
                ws_path: Some("/ws".into()),
                ws_host: Some("cdn.example".into()),
                tls: true,
                sni: Some("sni.example".into()),
            },
        );
        let rendered = render(std::slice::from_ref(&node)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        let ob = &parsed["outbounds"][0];
        assert_eq!(ob["protocol"], "vmess");
        assert_eq!(ob["streamSettings"]["wsSettings"]["path"], "/ws");
        assert_eq!(ob["streamSettings"]["security"], "tls");
    }

    #[test]
    fn hysteria2_skipped() {
        let node = Node::new(
            Protocol::Hysteria2,
            "h2",
            "h",
            443,
            ProxySettings::Hysteria2 {
                auth: "a".into(),
                sni: None,
                insecure: false,
                obfs: None,
                obfs_password: None,
                up_mbps: None,
                down_mbps: None,
            },
        );
        assert!(render(std::slice::from_ref(&node)).is_err());
    }
}
