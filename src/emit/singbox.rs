//! sing-box 配置生成（JSON）

use anyhow::Result;
use serde_json::json;

use crate::group::{Group, GroupKind, TEST_TOLERANCE_MS, TEST_URL};
use crate::node::{Node, Protocol, ProxySettings};

use super::MASTER_SELECTOR;

pub fn render(groups: &[Group], nodes: &[Node]) -> Result<String> {
    let mut outbounds = Vec::new();

    let mut node_tags = Vec::new();
    for node in nodes {
        if let Some(outbound) = singbox_outbound(node) {
            node_tags.push(node.display_name.clone());
            outbounds.push(outbound);
        }
    }
    if outbounds.is_empty() {
        anyhow::bail!("no sing-box-compatible outbounds");
    }

    let mut group_outbounds = Vec::new();
    let mut master_members: Vec<String> =
        groups.iter().map(|g| g.display_name.clone()).collect();
    master_members.push("direct".to_string());
    group_outbounds.push(json!({
        "type": "selector",
        "tag": MASTER_SELECTOR,
        "outbounds": master_members,
        "default": groups.first().map(|g| g.display_name.clone()),
    }));

    for group in groups {
        match group.kind {
            GroupKind::Meta => {
                let mut members = group.refs.clone();
                if group.include_direct {
                    members.push("direct".to_string());
                }
                group_outbounds.push(json!({
                    "type": "selector",
                    "tag": group.display_name,
                    "outbounds": members,
                }));
            }
            _ => {
                let members: Vec<String> = group
                    .members
                    .iter()
                    .map(|n| n.display_name.clone())
                    .filter(|name| node_tags.contains(name))
                    .collect();
                group_outbounds.push(json!({
                    "type": "urltest",
                    "tag": group.display_name,
                    "outbounds": members,
                    "url": TEST_URL,
                    "interval": "300s",
                    "tolerance": TEST_TOLERANCE_MS,
                }));
            }
        }
    }

    let mut doc = json!({
        "log": { "level": "info" },
        "inbounds": [
            { "type": "mixed", "tag": "mixed-in", "listen": "127.0.0.1", "listen_port": 7890 }
        ],
        "outbounds": [],
        "route": {
            "rules": [],
            "final": MASTER_SELECTOR
        }
    });

    let mut all = group_outbounds;
    all.extend(outbounds);
    all.push(json!({ "type": "direct", "tag": "direct" }));
    doc["outbounds"] = serde_json::Value::Array(all);

    Ok(serde_json::to_string_pretty(&doc)?)
}

fn singbox_outbound(node: &Node) -> Option<serde_json::Value> {
    let mut entry = json!({
        "tag": node.display_name,
        "server": node.server,
        "server_port": node.port,
    });

    match &node.settings {
        ProxySettings::Vmess {
            uuid,
            alter_id,
            tls,
            sni,
            ..
        } => {
            entry["type"] = json!("vmess");
            entry["uuid"] = json!(uuid);
            entry["alter_id"] = json!(alter_id);
            entry["security"] = json!("auto");
            if *tls {
                entry["tls"] = tls_block(sni, false);
            }
        }
        ProxySettings::Vless {
            uuid,
            security,
            sni,
            flow,
            ..
        } => {
            entry["type"] = json!("vless");
            entry["uuid"] = json!(uuid);
            if let Some(flow) = flow {
                entry["flow"] = json!(flow);
            }
            if security.as_deref() == Some("tls") {
                entry["tls"] = tls_block(sni, false);
            }
        }
        ProxySettings::Shadowsocks {
            method, password, ..
        } => {
            entry["type"] = json!("shadowsocks");
            entry["method"] = json!(method);
            entry["password"] = json!(password);
        }
        ProxySettings::Trojan {
            password,
            sni,
            allow_insecure,
        } => {
            entry["type"] = json!("trojan");
            entry["password"] = json!(password);
            entry["tls"] = tls_block(sni, *allow_insecure);
        }
        ProxySettings::Hysteria2 {
            auth,
            sni,
            insecure,
            obfs,
            obfs_password,
            ..
        } => {
            entry["type"] = json!("hysteria2");
            entry["password"] = json!(auth);
            entry["tls"] = tls_block(sni, *insecure);
            if let Some(obfs) = obfs {
                entry["obfs"] = json!({ "type": obfs, "password": obfs_password });
            }
        }
        ProxySettings::Http {
            username, password, ..
        } => {
            entry["type"] = json!("http");
            if let Some(u) = username {
                entry["username"] = json!(u);
            }
            if let Some(p) = password {
                entry["password"] = json!(p);
            }
            if node.protocol == Protocol::Https {
                entry["tls"] = tls_block(&None, false);
            }
        }
        ProxySettings::Socks5 { username, password } => {
            entry["type"] = json!("socks");
            entry["version"] = json!("5");
            if let Some(u) = username {
                entry["username"] = json!(u);
            }
            if let Some(p) = password {
                entry["password"] = json!(p);
            }
        }
        // sing-box 不收 ssr
        ProxySettings::Shadowsocksr { .. } => return None,
    }

    Some(entry)
}

fn tls_block(sni: &Option<String>, insecure: bool) -> serde_json::Value {
    let mut block = json!({ "enabled": true });
    if let Some(sni) = sni {
        block["server_name"] = json!(sni);
    }
    if insecure {
        block["insecure"] = json!(true);
    }
    block
}
