//! 订阅格式自动探测与解析
//!
//! 探测顺序（先命中先赢）：
//! 1. `proxies:` + (`rules:` | `proxy-groups:`)，或块序列 `- name/type/server/port` → YAML
//! 2. 合法 JSON → JSON
//! 3. 已知 `proto://` 前缀出现 ≥2 次 → 纯 URI 列表
//! 4. 纯 base64 字母表且解码后含已知前缀 → Base64 信封（递归一次进 URI 列表）
//! 5. 兜底 → 宽松 YAML
//!
//! 探测结果的解码器失败后，按固定顺序把其余解码器都试一遍，
//! 全部失败才报 ParseError。解析出的节点逐个过 §3 不变量，
//! 不合格的 debug 日志后丢弃，不中断订阅。

pub mod clash;
pub mod json;
pub mod uri;

use tracing::debug;

use crate::common::{decode_base64_str, looks_like_base64, Error};
use crate::node::{Node, Protocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFormat {
    Yaml,
    Json,
    UriList,
    Base64,
}

/// 所有解码器的固定尝试顺序
const DECODER_ORDER: [SubFormat; 4] = [
    SubFormat::Yaml,
    SubFormat::Json,
    SubFormat::UriList,
    SubFormat::Base64,
];

pub fn detect_format(content: &str) -> SubFormat {
    let content = content.trim();

    if content.contains("proxies:")
        && (content.contains("rules:") || content.contains("proxy-groups:"))
    {
        return SubFormat::Yaml;
    }
    if looks_like_yaml_node_sequence(content) {
        return SubFormat::Yaml;
    }
    if serde_json::from_str::<serde_json::Value>(content).is_ok() {
        return SubFormat::Json;
    }
    if count_known_prefixes(content) >= 2 {
        return SubFormat::UriList;
    }
    if looks_like_base64(content) {
        if let Ok(decoded) = decode_base64_str(content) {
            if count_known_prefixes(&decoded) >= 1 {
                return SubFormat::Base64;
            }
        }
    }
    SubFormat::Yaml
}

/// 自动探测格式并解析订阅内容
pub fn parse_subscription(content: &str) -> Result<Vec<Node>, Error> {
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::parse(content, "empty subscription body"));
    }

    let detected = detect_format(content);
    let mut tried = vec![detected];
    tried.extend(DECODER_ORDER.iter().copied().filter(|f| *f != detected));

    let mut last_err: Option<String> = None;
    for format in tried {
        match run_decoder(format, content) {
            Ok(nodes) if !nodes.is_empty() => {
                debug!(format = ?format, count = nodes.len(), "subscription parsed");
                return Ok(validate_nodes(nodes));
            }
            Ok(_) => last_err = Some("decoder produced no nodes".to_string()),
            Err(e) => last_err = Some(e.to_string()),
        }
    }

    Err(Error::parse(
        content,
        last_err.unwrap_or_else(|| "no decoder matched".to_string()),
    ))
}

fn run_decoder(format: SubFormat, content: &str) -> anyhow::Result<Vec<Node>> {
    match format {
        SubFormat::Yaml => clash::parse_clash_yaml(content),
        SubFormat::Json => json::parse_json(content),
        SubFormat::UriList => parse_uri_list(content),
        SubFormat::Base64 => {
            let decoded = decode_base64_str(content)?;
            parse_uri_list(&decoded)
        }
    }
}

/// 逐行解析 URI 列表；单行失败记日志继续
pub fn parse_uri_list(content: &str) -> anyhow::Result<Vec<Node>> {
    let mut nodes = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match uri::decode_uri(line) {
            Ok(node) => nodes.push(node),
            Err(e) => debug!(error = %e, "uri line dropped"),
        }
    }
    if nodes.is_empty() {
        anyhow::bail!("no valid proxy URIs found");
    }
    Ok(nodes)
}

/// §3 不变量过滤
fn validate_nodes(nodes: Vec<Node>) -> Vec<Node> {
    nodes
        .into_iter()
        .filter(|node| match node.validate() {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "node dropped at parse time");
                false
            }
        })
        .collect()
}

fn count_known_prefixes(content: &str) -> usize {
    Protocol::uri_prefixes()
        .iter()
        .map(|prefix| content.matches(prefix).count())
        .sum()
}

fn looks_like_yaml_node_sequence(content: &str) -> bool {
    let mut has_name = false;
    let mut has_type = false;
    let mut has_server = false;
    let mut has_port = false;
    for line in content.lines() {
        let t = line.trim_start();
        if t.starts_with("- name:") || t.starts_with("- {") && t.contains("name:") {
            has_name = true;
        }
        if t.starts_with("type:") || t.contains(" type:") {
            has_type = true;
        }
        if t.starts_with("server:") || t.contains(" server:") {
            has_server = true;
        }
        if t.starts_with("port:") || t.contains(" port:") {
            has_port = true;
        }
    }
    has_name && has_type && has_server && has_port
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::encode_base64;

    #[test]
    fn detect_clash_yaml() {
        let content = "proxies:\n  - name: a\nrules:\n  - MATCH,DIRECT";
        assert_eq!(detect_format(content), SubFormat::Yaml);
    }

    #[test]
    fn detect_yaml_block_sequence_without_rules() {
        let content = "- name: a\n  type: ss\n  server: s\n  port: 443";
        assert_eq!(detect_format(content), SubFormat::Yaml);
    }

    #[test]
    fn detect_json() {
        assert_eq!(detect_format(r#"{"servers": []}"#), SubFormat::Json);
    }

    #[test]
    fn detect_uri_list() {
        let content = "trojan://p@a:443#1\ntrojan://p@b:443#2";
        assert_eq!(detect_format(content), SubFormat::UriList);
    }

    #[test]
    fn detect_base64_envelope() {
        let content = encode_base64("trojan://p@a:443#1\nss://YWVzLTI1Ni1nY206cA==@b:443#2");
        assert_eq!(detect_format(&content), SubFormat::Base64);
    }

    #[test]
    fn base64_envelope_parses() {
        // §8 场景 1 的信封：vmess + ss 指向同一 server:port
        let envelope = encode_base64(concat!(
            "vmess://eyJ2IjoiMiIsInBzIjoiQSIsImFkZCI6IjEuMS4xLjEiLCJwb3J0IjoiNDQzIiwiaWQiOiJhYmMiLCJhaWQiOiIwIiwibmV0IjoidGNwIiwidGxzIjoidGxzIn0=",
            "\n",
            "ss://YWVzLTI1Ni1nY206cGFzcw==@1.1.1.1:443#A"
        ));
        let nodes = parse_subscription(&envelope).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].protocol, Protocol::Vmess);
        assert_eq!(nodes[1].protocol, Protocol::Shadowsocks);
        assert_eq!(nodes[0].server, nodes[1].server);
        assert_eq!(nodes[0].port, nodes[1].port);
    }

    #[test]
    fn provider_fragment_via_yaml_fallback() {
        // 没有顶层 proxies:，但 provider 片段能兜出节点（§8 场景 3）
        let content = r#"
proxy-providers:
  x:
    proxies:
      - name: "n"
        type: ss
        server: "s"
        port: 443
        cipher: aes-256-gcm
        password: "p"
"#;
        let nodes = parse_subscription(content).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].display_name, "n");
    }

    #[test]
    fn plain_uri_list_parses() {
        let content = "trojan://p@h.example:443#N1\nhy2://a@h2.example:443#N2\n# comment\n";
        let nodes = parse_subscription(content).unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn bad_lines_dropped_not_fatal() {
        let content = "trojan://p@h.example:443#ok\ngarbage://nope\ntrojan://broken-no-at\n";
        let nodes = parse_subscription(content).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn empty_body_is_parse_error() {
        assert!(parse_subscription("   ").is_err());
    }

    #[test]
    fn undetectable_garbage_is_parse_error() {
        assert!(parse_subscription("!!! total garbage %%%").is_err());
    }
}
