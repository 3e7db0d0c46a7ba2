//! 指纹去重
//!
//! 默认键是 (server, port, protocol)。碰撞时若两边都有探测延迟且开了
//! `prefer_lower_latency` 留低延迟的，否则先到先得。输出保持幸存者的
//! 插入顺序，同样输入结果一致，且幂等。

use indexmap::IndexMap;
use tracing::debug;

use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyField {
    Server,
    Port,
    Protocol,
}

#[derive(Debug, Clone)]
pub struct DedupOptions {
    pub key_fields: Vec<KeyField>,
    pub prefer_lower_latency: bool,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            key_fields: vec![KeyField::Server, KeyField::Port, KeyField::Protocol],
            prefer_lower_latency: true,
        }
    }
}

pub fn dedup(nodes: Vec<Node>, options: &DedupOptions) -> Vec<Node> {
    let before = nodes.len();
    let mut survivors: IndexMap<String, Node> = IndexMap::with_capacity(nodes.len());

    for node in nodes {
        let key = project_key(&node, &options.key_fields);
        match survivors.get_mut(&key) {
            None => {
                survivors.insert(key, node);
            }
            Some(incumbent) => {
                if options.prefer_lower_latency && wins_on_latency(&node, incumbent) {
                    // 原地替换保持插入位置
                    *incumbent = node;
                }
            }
        }
    }

    let out: Vec<Node> = survivors.into_values().collect();
    if out.len() != before {
        debug!(before, after = out.len(), "dedup collapsed nodes");
    }
    out
}

fn project_key(node: &Node, fields: &[KeyField]) -> String {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        match field {
            KeyField::Server => parts.push(node.server.clone()),
            KeyField::Port => parts.push(node.port.to_string()),
            KeyField::Protocol => parts.push(node.protocol.as_str().to_string()),
        }
    }
    parts.join("|")
}

/// 两边都有延迟且挑战者更低才算赢
fn wins_on_latency(challenger: &Node, incumbent: &Node) -> bool {
    let challenger_latency = challenger.probe.as_ref().and_then(|p| p.latency_ms);
    let incumbent_latency = incumbent.probe.as_ref().and_then(|p| p.latency_ms);
    matches!(
        (challenger_latency, incumbent_latency),
        (Some(c), Some(i)) if c < i
    )
}
