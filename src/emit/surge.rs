//! Surge 配置生成（ini 风格）
//!
//! 模板的 `[Proxy]` 与 `[Proxy Group]` 区域替换为生成行。
//! Surge 不支持的协议（ssr、vless）跳过。

use anyhow::Result;

use crate::group::{Group, GroupKind, TEST_INTERVAL_SECS, TEST_TOLERANCE_MS, TEST_URL};
use crate::node::{Node, ProxySettings};

use super::MASTER_SELECTOR;

const SURGE_TEMPLATE: &str = r#"[General]
loglevel = notify
dns-server = 223.5.5.5, 1.1.1.1
skip-proxy = 192.168.0.0/16, 10.0.0.0/8, 172.16.0.0/12, localhost, *.local

[Proxy]
{{PROXIES}}

[Proxy Group]
{{PROXY_GROUPS}}

[Rule]
GEOIP,LAN,DIRECT
FINAL,{{MASTER}}
"#;

pub fn render(groups: &[Group], nodes: &[Node]) -> Result<String> {
    let mut proxy_lines = Vec::new();
    let mut usable_names = Vec::new();
    for node in nodes {
        if let Some(line) = surge_proxy(node) {
            usable_names.push(node.display_name.clone());
            proxy_lines.push(line);
        }
    }
    if proxy_lines.is_empty() {
        anyhow::bail!("no surge-compatible proxies");
    }

    let mut group_lines = Vec::new();
    let mut master_members: Vec<String> =
        groups.iter().map(|g| g.display_name.clone()).collect();
    master_members.push("DIRECT".to_string());
    group_lines.push(format!(
        "{} = select, {}",
        MASTER_SELECTOR,
        master_members.join(", ")
    ));

    for group in groups {
        match group.kind {
            GroupKind::Meta => {
                let mut members = group.refs.clone();
                if group.include_direct {
                    members.push("DIRECT".to_string());
                }
                if group.include_reject {
                    members.push("REJECT".to_string());
                }
                if members.is_empty() {
                    continue;
                }
                group_lines.push(format!(
                    "{} = select, {}",
                    group.display_name,
                    members.join(", ")
                ));
            }
            _ => {
                let members: Vec<String> = group
                    .members
                    .iter()
                    .map(|n| n.display_name.clone())
                    .filter(|name| usable_names.contains(name))
                    .collect();
                if members.is_empty() {
                    continue;
                }
                group_lines.push(format!(
                    "{} = url-test, {}, url={}, interval={}, tolerance={}",
                    group.display_name,
                    members.join(", "),
                    TEST_URL,
                    TEST_INTERVAL_SECS,
                    TEST_TOLERANCE_MS
                ));
            }
        }
    }

    Ok(SURGE_TEMPLATE
        .replace("{{PROXIES}}", &proxy_lines.join("\n"))
        .replace("{{PROXY_GROUPS}}", &group_lines.join("\n"))
        .replace("{{MASTER}}", MASTER_SELECTOR))
}

fn surge_proxy(node: &Node) -> Option<String> {
    let name = &node.display_name;
    let server = &node.server;
    let port = node.port;

    let line = match &node.settings {
        ProxySettings::Shadowsocks {
            method, password, ..
        } => format!(
            "{name} = ss, {server}, {port}, encrypt-method={method}, password={password}"
        ),
        ProxySettings::Trojan {
            password,
            sni,
            allow_insecure,
        } => {
            let mut line =
                format!("{name} = trojan, {server}, {port}, password={password}");
            if let Some(sni) = sni {
                line.push_str(&format!(", sni={}", sni));
            }
            if *allow_insecure {
                line.push_str(", skip-cert-verify=true");
            }
            line
        }
        ProxySettings::Vmess {
            uuid,
            transport,
            ws_path,
            ws_host,
            tls,
            sni,
            ..
        } => {
            let mut line = format!("{name} = vmess, {server}, {port}, username={uuid}");
            if *tls {
                line.push_str(", tls=true");
            }
            if let Some(sni) = sni {
                line.push_str(&format!(", sni={}", sni));
            }
            if transport.as_deref() == Some("ws") {
                line.push_str(", ws=true");
                if let Some(path) = ws_path {
                    line.push_str(&format!(", ws-path={}", path));
                }
                if let Some(host) = ws_host {
                    line.push_str(&format!(", ws-headers=Host:{}", host));
                }
            }
            line
        }
        ProxySettings::Hysteria2 {
            auth,
            sni,
            insecure,
            ..
        } => {
            let mut line =
                format!("{name} = hysteria2, {server}, {port}, password={auth}");
            if let Some(sni) = sni {
                line.push_str(&format!(", sni={}", sni));
            }
            if *insecure {
                line.push_str(", skip-cert-verify=true");
            }
            line
        }
        ProxySettings::Http {
            username,
            password,
            tls,
        } => {
            let scheme = if *tls { "https" } else { "http" };
            let mut line = format!("{name} = {scheme}, {server}, {port}");
            if let (Some(u), Some(p)) = (username, password) {
                line.push_str(&format!(", {}, {}", u, p));
            }
            line
        }
        ProxySettings::Socks5 { username, password } => {
            let mut line = format!("{name} = socks5, {server}, {port}");
            if let (Some(u), Some(p)) = (username, password) {
                line.push_str(&format!(", {}, {}", u, p));
            }
            line
        }
        // Surge 没有这两个协议
        ProxySettings::Vless { .. } | ProxySettings::Shadowsocksr { .. } => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::DEFAULT_SHORTLIST;
    use crate::node::Protocol;

    #[test]
    fn trojan_line_and_sections() {
        let mut node = Node::new(
            Protocol::Trojan,
            "🇭🇰 HK trojan 01",
            "1.1.1.1",
            443,
            ProxySettings::Trojan {
                password: "pw".into(),
                sni: Some("h.example".into()),
                allow_insecure: true,
            },
        );
        node.geo = Some(crate::node::GeoInfo {
            country_code: Some("HK".into()),
            country_name: "香港".into(),
            ..crate::node::GeoInfo::others()
        });
        let shortlist: Vec<String> = DEFAULT_SHORTLIST.iter().map(|s| s.to_string()).collect();
        let groups = crate::group::build_groups(std::slice::from_ref(&node), &[], &shortlist);
        let conf = render(&groups, std::slice::from_ref(&node)).unwrap();

        assert!(conf.contains("[Proxy]"));
        assert!(conf.contains(
            "🇭🇰 HK trojan 01 = trojan, 1.1.1.1, 443, password=pw, sni=h.example, skip-cert-verify=true"
        ));
        assert!(conf.contains("[Proxy Group]"));
        assert!(conf.contains("url-test"));
        assert!(conf.contains(&format!("FINAL,{}", MASTER_SELECTOR)));
    }

    #[test]
    fn vless_skipped() {
        let node = Node::new(
            Protocol::Vless,
            "v",
            "h",
            443,
            ProxySettings::Vless {
                uuid: "u".into(),
                transport: None,
                security: None,
                encryption: None,
                sni: None,
                fingerprint: None,
                alpn: None,
                ws_path: None,
                ws_host: None,
                flow: None,
            },
        );
        assert!(surge_proxy(&node).is_none());
    }
}
