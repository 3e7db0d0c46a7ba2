//! 节点 → 广告 URI（解码器的逆）
//!
//! 组文件优先原样输出 `node.raw`；没有 raw 的节点用这里的模板合成。
//! 合成链接保证安全相关字段（server/port/协议/凭据）无损往返。

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::common::encode_base64;
use crate::node::{Node, ProxySettings};

/// 查询串与 fragment 里保留 . - _ ~，其余非字母数字转义
const URI_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

fn enc(s: &str) -> String {
    utf8_percent_encode(s, URI_SAFE).to_string()
}

/// 组文件一行：raw 优先，否则合成
pub fn node_line(node: &Node) -> String {
    match &node.raw {
        Some(raw) => raw.clone(),
        None => encode_node(node),
    }
}

pub fn encode_node(node: &Node) -> String {
    let host_port = host_port(node);
    let name = enc(&node.display_name);

    match &node.settings {
        ProxySettings::Vmess {
            uuid,
            alter_id,
            transport,
            ws_path,
            ws_host,
            tls,
            sni,
        } => {
            let mut body = serde_json::json!({
                "v": "2",
                "ps": node.display_name,
                "add": node.server,
                "port": node.port.to_string(),
                "id": uuid,
                "aid": alter_id.to_string(),
                "net": transport.as_deref().unwrap_or("tcp"),
                "tls": if *tls { "tls" } else { "none" },
            });
            if let Some(path) = ws_path {
                body["path"] = serde_json::Value::String(path.clone());
            }
            if let Some(host) = ws_host {
                body["host"] = serde_json::Value::String(host.clone());
            }
            if let Some(sni) = sni {
                body["sni"] = serde_json::Value::String(sni.clone());
            }
            format!("vmess://{}", encode_base64(&body.to_string()))
        }
        ProxySettings::Vless {
            uuid,
            transport,
            security,
            encryption,
            sni,
            fingerprint,
            alpn,
            ws_path,
            ws_host,
            flow,
        } => {
            let mut query = vec![
                ("type", transport.clone().unwrap_or_else(|| "tcp".into())),
                ("security", security.clone().unwrap_or_else(|| "none".into())),
            ];
            if let Some(v) = encryption {
                query.push(("encryption", v.clone()));
            }
            push_opt(&mut query, "sni", sni);
            push_opt(&mut query, "fp", fingerprint);
            push_opt(&mut query, "alpn", alpn);
            push_opt(&mut query, "path", ws_path);
            push_opt(&mut query, "host", ws_host);
            push_opt(&mut query, "flow", flow);
            format!(
                "vless://{}@{}?{}#{}",
                uuid,
                host_port,
                render_query(&query),
                name
            )
        }
        ProxySettings::Shadowsocks {
            method, password, ..
        } => {
            let userinfo = encode_base64(&format!("{}:{}", method, password));
            format!("ss://{}@{}#{}", userinfo, host_port, name)
        }
        ProxySettings::Shadowsocksr {
            method,
            password,
            protocol,
            proto_param,
            obfs,
            obfs_param,
        } => {
            let mut query = vec![("remarks", encode_base64(&node.display_name))];
            if let Some(v) = obfs_param {
                query.push(("obfsparam", encode_base64(v)));
            }
            if let Some(v) = proto_param {
                query.push(("protoparam", encode_base64(v)));
            }
            let body = format!(
                "{}:{}:{}:{}:{}:{}/?{}",
                node.server,
                node.port,
                protocol,
                method,
                obfs,
                encode_base64(password),
                query
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("&")
            );
            format!("ssr://{}", encode_base64(&body))
        }
        ProxySettings::Trojan {
            password,
            sni,
            allow_insecure,
        } => {
            let mut query = Vec::new();
            push_opt(&mut query, "sni", sni);
            if *allow_insecure {
                query.push(("allowInsecure", "1".to_string()));
            }
            let qs = if query.is_empty() {
                String::new()
            } else {
                format!("?{}", render_query(&query))
            };
            format!("trojan://{}@{}{}#{}", enc(password), host_port, qs, name)
        }
        ProxySettings::Hysteria2 {
            auth,
            sni,
            insecure,
            obfs,
            obfs_password,
            up_mbps,
            down_mbps,
        } => {
            let mut query = Vec::new();
            push_opt(&mut query, "sni", sni);
            if *insecure {
                query.push(("insecure", "1".to_string()));
            }
            push_opt(&mut query, "obfs", obfs);
            push_opt(&mut query, "obfs-password", obfs_password);
            if let Some(v) = up_mbps {
                query.push(("up", v.to_string()));
            }
            if let Some(v) = down_mbps {
                query.push(("down", v.to_string()));
            }
            let qs = if query.is_empty() {
                String::new()
            } else {
                format!("?{}", render_query(&query))
            };
            format!("hysteria2://{}@{}{}#{}", enc(auth), host_port, qs, name)
        }
        ProxySettings::Http {
            username, password, ..
        } => {
            let scheme = node.protocol.scheme();
            format!(
                "{}://{}{}#{}",
                scheme,
                userinfo(username, password),
                host_port,
                name
            )
        }
        ProxySettings::Socks5 { username, password } => {
            format!(
                "socks5://{}{}#{}",
                userinfo(username, password),
                host_port,
                name
            )
        }
    }
}

fn host_port(node: &Node) -> String {
    if node.server.contains(':') {
        format!("[{}]:{}", node.server, node.port)
    } else {
        format!("{}:{}", node.server, node.port)
    }
}

fn userinfo(username: &Option<String>, password: &Option<String>) -> String {
    match (username, password) {
        (Some(u), Some(p)) => format!("{}:{}@", enc(u), enc(p)),
        (Some(u), None) => format!("{}@", enc(u)),
        _ => String::new(),
    }
}

fn push_opt(query: &mut Vec<(&'static str, String)>, key: &'static str, value: &Option<String>) {
    if let Some(v) = value {
        query.push((key, v.clone()));
    }
}

fn render_query(query: &[(&'static str, String)]) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", k, enc(v)))
        .collect::<Vec<_>>()
        .join("&")
}
