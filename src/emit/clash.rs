//! Clash / mihomo 配置生成
//!
//! 模板里的 `proxies:` 与 `proxy-groups:` 区域被生成内容替换，
//! 全程走结构化 YAML，任何字段都不以 JSON 字符串形式内嵌。

use anyhow::Result;
use serde_json::json;

use crate::group::{Group, GroupKind, TEST_INTERVAL_SECS, TEST_TOLERANCE_MS, TEST_URL};
use crate::node::{Node, Protocol, ProxySettings};

use super::{group_icon, MASTER_SELECTOR};

/// 基础模板：端口、DNS、规则骨架；proxies / proxy-groups 由生成器填充
const MIHOMO_TEMPLATE: &str = r#"
mixed-port: 7890
allow-lan: false
mode: rule
log-level: info
external-controller: 127.0.0.1:9090
dns:
  enable: true
  enhanced-mode: fake-ip
  nameserver:
    - https://223.5.5.5/dns-query
    - https://1.1.1.1/dns-query
proxies: []
proxy-groups: []
rules:
  - GEOIP,LAN,DIRECT
  - MATCH,PLACEHOLDER
"#;

pub fn render(groups: &[Group], nodes: &[Node]) -> Result<String> {
    let mut doc: serde_yml::Value = serde_yml::from_str(MIHOMO_TEMPLATE)?;

    let proxies: Vec<serde_json::Value> = nodes.iter().filter_map(clash_proxy).collect();
    let proxy_names: Vec<String> = nodes
        .iter()
        .filter(|n| clash_proxy(n).is_some())
        .map(|n| n.display_name.clone())
        .collect();

    let mut proxy_groups = Vec::new();

    // 总选择器排头，成员是所有组名 + DIRECT
    let mut master_members: Vec<String> =
        groups.iter().map(|g| g.display_name.clone()).collect();
    master_members.push("DIRECT".to_string());
    proxy_groups.push(json!({
        "name": MASTER_SELECTOR,
        "type": "select",
        "proxies": master_members,
    }));

    for group in groups {
        proxy_groups.push(clash_group(group, &proxy_names));
    }

    doc["proxies"] = serde_yml::to_value(&proxies)?;
    doc["proxy-groups"] = serde_yml::to_value(&proxy_groups)?;
    doc["rules"] = serde_yml::to_value(vec![
        "GEOIP,LAN,DIRECT".to_string(),
        format!("MATCH,{}", MASTER_SELECTOR),
    ])?;

    Ok(serde_yml::to_string(&doc)?)
}

fn clash_group(group: &Group, all_proxy_names: &[String]) -> serde_json::Value {
    let mut entry = match group.kind {
        GroupKind::Meta => {
            let mut members = group.refs.clone();
            if group.include_direct {
                members.push("DIRECT".to_string());
            }
            if group.include_reject {
                members.push("REJECT".to_string());
            }
            json!({
                "name": group.display_name,
                "type": "select",
                "proxies": members,
            })
        }
        _ => {
            let members: Vec<String> = group
                .members
                .iter()
                .map(|n| n.display_name.clone())
                .filter(|name| all_proxy_names.contains(name))
                .collect();
            json!({
                "name": group.display_name,
                "type": "url-test",
                "url": TEST_URL,
                "interval": TEST_INTERVAL_SECS,
                "tolerance": TEST_TOLERANCE_MS,
                "proxies": members,
            })
        }
    };
    if let Some(icon) = group_icon(group) {
        entry["icon"] = serde_json::Value::String(icon.to_string());
    }
    entry
}

/// 节点 → Clash proxy 记录；Clash 不认识的协议返回 None
fn clash_proxy(node: &Node) -> Option<serde_json::Value> {
    let mut entry = json!({
        "name": node.display_name,
        "server": node.server,
        "port": node.port,
    });

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
            entry["type"] = json!("vmess");
            entry["uuid"] = json!(uuid);
            entry["alterId"] = json!(alter_id);
            entry["cipher"] = json!("auto");
            if *tls {
                entry["tls"] = json!(true);
            }
            if let Some(sni) = sni {
                entry["servername"] = json!(sni);
            }
            if let Some(network) = transport {
                entry["network"] = json!(network);
            }
            if ws_path.is_some() || ws_host.is_some() {
                let mut opts = json!({});
                if let Some(path) = ws_path {
                    opts["path"] = json!(path);
                }
                if let Some(host) = ws_host {
                    opts["headers"] = json!({ "Host": host });
                }
                entry["ws-opts"] = opts;
            }
        }
        ProxySettings::Vless {
            uuid,
            transport,
            security,
            sni,
            fingerprint,
            ws_path,
            ws_host,
            flow,
            ..
        } => {
            entry["type"] = json!("vless");
            entry["uuid"] = json!(uuid);
            if security.as_deref() == Some("tls") || security.as_deref() == Some("reality") {
                entry["tls"] = json!(true);
            }
            if let Some(sni) = sni {
                entry["servername"] = json!(sni);
            }
            if let Some(network) = transport {
                entry["network"] = json!(network);
            }
            if let Some(flow) = flow {
                entry["flow"] = json!(flow);
            }
            if let Some(fp) = fingerprint {
                entry["client-fingerprint"] = json!(fp);
            }
            if ws_path.is_some() || ws_host.is_some() {
                let mut opts = json!({});
                if let Some(path) = ws_path {
                    opts["path"] = json!(path);
                }
                if let Some(host) = ws_host {
                    opts["headers"] = json!({ "Host": host });
                }
                entry["ws-opts"] = opts;
            }
        }
        ProxySettings::Shadowsocks {
            method,
            password,
            plugin,
        } => {
            entry["type"] = json!("ss");
            entry["cipher"] = json!(method);
            entry["password"] = json!(password);
            if let Some(plugin) = plugin {
                entry["plugin"] = json!(plugin);
            }
        }
        ProxySettings::Shadowsocksr {
            method,
            password,
            protocol,
            proto_param,
            obfs,
            obfs_param,
        } => {
            entry["type"] = json!("ssr");
            entry["cipher"] = json!(method);
            entry["password"] = json!(password);
            entry["protocol"] = json!(protocol);
            entry["obfs"] = json!(obfs);
            if let Some(v) = proto_param {
                entry["protocol-param"] = json!(v);
            }
            if let Some(v) = obfs_param {
                entry["obfs-param"] = json!(v);
            }
        }
        ProxySettings::Trojan {
            password,
            sni,
            allow_insecure,
        } => {
            entry["type"] = json!("trojan");
            entry["password"] = json!(password);
            if let Some(sni) = sni {
                entry["sni"] = json!(sni);
            }
            if *allow_insecure {
                entry["skip-cert-verify"] = json!(true);
            }
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
            entry["type"] = json!("hysteria2");
            entry["password"] = json!(auth);
            if let Some(sni) = sni {
                entry["sni"] = json!(sni);
            }
            if *insecure {
                entry["skip-cert-verify"] = json!(true);
            }
            if let Some(v) = obfs {
                entry["obfs"] = json!(v);
            }
            if let Some(v) = obfs_password {
                entry["obfs-password"] = json!(v);
            }
            if let Some(v) = up_mbps {
                entry["up"] = json!(v);
            }
            if let Some(v) = down_mbps {
                entry["down"] = json!(v);
            }
        }
        ProxySettings::Http {
            username,
            password,
            tls,
        } => {
            entry["type"] = json!("http");
            if let Some(u) = username {
                entry["username"] = json!(u);
            }
            if let Some(p) = password {
                entry["password"] = json!(p);
            }
            if *tls || node.protocol == Protocol::Https {
                entry["tls"] = json!(true);
            }
        }
        ProxySettings::Socks5 { username, password } => {
            entry["type"] = json!("socks5");
            if let Some(u) = username {
                entry["username"] = json!(u);
            }
            if let Some(p) = password {
                entry["password"] = json!(p);
            }
        }
    }

    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::DEFAULT_SHORTLIST;

    fn sample_nodes() -> Vec<Node> {
        let mut trojan = Node::new(
            Protocol::Trojan,
            "🇭🇰 HK trojan 01",
            "1.1.1.1",
            443,
            ProxySettings::Trojan {
                password: "p".into(),
                sni: Some("h.example".into()),
                allow_insecure: false,
            },
        );
        trojan.geo = Some(crate::node::GeoInfo {
            country_code: Some("HK".into()),
            country_name: "香港".into(),
            ..crate::node::GeoInfo::others()
        });
        let c = crate::classify::classify(&trojan);
        crate::classify::apply_tags(&mut trojan, &c);
        vec![trojan]
    }

    #[test]
    fn renders_structured_yaml() {
        let nodes = sample_nodes();
        let shortlist: Vec<String> = DEFAULT_SHORTLIST.iter().map(|s| s.to_string()).collect();
        let groups = crate::group::build_groups(&nodes, &[], &shortlist);
        let yaml = render(&groups, &nodes).unwrap();

        // 结构化往返：能再解析回来，且 proxies 是真列表
        let parsed: serde_yml::Value = serde_yml::from_str(&yaml).unwrap();
        let proxies = parsed["proxies"].as_sequence().unwrap();
        assert_eq!(proxies.len(), 1);
        assert_eq!(proxies[0]["type"].as_str(), Some("trojan"));
        assert_eq!(proxies[0]["sni"].as_str(), Some("h.example"));

        let pg = parsed["proxy-groups"].as_sequence().unwrap();
        assert_eq!(pg[0]["name"].as_str(), Some(MASTER_SELECTOR));
        // 地区组是 url-test 且带默认拨测参数
        let region = pg
            .iter()
            .find(|g| g["name"].as_str() == Some("🇭🇰 香港节点"))
            .unwrap();
        assert_eq!(region["type"].as_str(), Some("url-test"));
        assert_eq!(region["url"].as_str(), Some(TEST_URL));
        assert_eq!(region["interval"].as_u64(), Some(300));
    }

    #[test]
    fn meta_group_is_selector_with_markers() {
        let nodes = sample_nodes();
        let shortlist: Vec<String> = DEFAULT_SHORTLIST.iter().map(|s| s.to_string()).collect();
        let metas = vec![crate::group::MetaGroupSpec {
            name: "故障转移".into(),
            include_groups: vec!["HK".into()],
            include_direct: true,
            include_reject: false,
            ..Default::default()
        }];
        let groups = crate::group::build_groups(&nodes, &metas, &shortlist);
        let yaml = render(&groups, &nodes).unwrap();
        let parsed: serde_yml::Value = serde_yml::from_str(&yaml).unwrap();
        let pg = parsed["proxy-groups"].as_sequence().unwrap();
        let meta = pg
            .iter()
            .find(|g| g["name"].as_str() == Some("故障转移"))
            .unwrap();
        assert_eq!(meta["type"].as_str(), Some("select"));
        let members: Vec<&str> = meta["proxies"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(members.contains(&"🇭🇰 香港节点"));
        assert!(members.contains(&"DIRECT"));
    }
}
