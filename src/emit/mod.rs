//! Artifact 物化
//!
//! 两类产物：
//! - `output/groups/<Key>.txt`：每组一份 URI 列表（LF 行尾，结尾不留空行），
//!   优先原样输出 `raw`，否则用逆向模板合成
//! - `output/<client>.{yaml,conf,json}`：各客户端配置
//!
//! "Others" 的规范路径是 `output/groups/Others.txt`，顶层不再写重复的
//! 其他/China 变体；其余组保留顶层旧路径副本。单个产物失败记
//! ConversionError 继续，只要至少写出一个产物这轮就算成功。

pub mod clash;
pub mod singbox;
pub mod surge;
pub mod uri;
pub mod v2ray;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::Error;
use crate::group::{Group, GroupKind};
use crate::node::Node;

/// 客户端配置里排头的总选择器
pub const MASTER_SELECTOR: &str = "🚀 节点选择";

// ─── 图标表 ───

/// 分组图标（客户端面板显示用）
const ICON_BASE: &str = "https://raw.githubusercontent.com/Koolson/Qure/master/IconSet/Color";

static GROUP_ICONS: &[(&str, &str)] = &[
    ("HK", "Hong_Kong.png"),
    ("TW", "Taiwan.png"),
    ("JP", "Japan.png"),
    ("US", "United_States.png"),
    ("SG", "Singapore.png"),
    ("KR", "Korea.png"),
    ("UK", "United_Kingdom.png"),
    ("Others", "World_Map.png"),
    ("Netflix", "Netflix.png"),
    ("OpenAI", "ChatGPT.png"),
    ("Claude", "AI.png"),
    ("Gemini", "Google_Search.png"),
    ("Disney+", "Disney+.png"),
    ("YouTube", "YouTube.png"),
    ("Telegram", "Telegram.png"),
    ("Google", "Google_Search.png"),
    ("TikTok", "TikTok.png"),
    ("Spotify", "Spotify.png"),
    ("HBO", "HBO.png"),
    ("Hulu", "Hulu.png"),
    ("Streaming", "ForeignMedia.png"),
];

pub fn group_icon(group: &Group) -> Option<String> {
    GROUP_ICONS
        .iter()
        .find(|(key, _)| *key == group.key)
        .map(|(_, file)| format!("{}/{}", ICON_BASE, file))
        .or(match group.kind {
            GroupKind::Meta => Some(format!("{}/Static.png", ICON_BASE)),
            _ => None,
        })
}

// ─── 配置 ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Mihomo,
    Surge,
    Singbox,
    V2ray,
}

impl ClientKind {
    pub fn all() -> &'static [ClientKind] {
        &[
            ClientKind::Mihomo,
            ClientKind::Surge,
            ClientKind::Singbox,
            ClientKind::V2ray,
        ]
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ClientKind::Mihomo => "mihomo.yaml",
            ClientKind::Surge => "surge.conf",
            ClientKind::Singbox => "singbox.json",
            ClientKind::V2ray => "v2ray.json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmitConfig {
    pub output_dir: PathBuf,
    pub clients: Vec<ClientKind>,
}

#[derive(Debug, Default)]
pub struct EmitReport {
    pub written: Vec<PathBuf>,
    pub errors: Vec<Error>,
}

// ─── 物化 ───

pub fn emit_all(
    config: &EmitConfig,
    groups: &[Group],
    nodes: &[Node],
) -> Result<EmitReport, Error> {
    let mut report = EmitReport::default();
    let groups_dir = config.output_dir.join("groups");
    if let Err(e) = std::fs::create_dir_all(&groups_dir) {
        return Err(Error::conversion("output dirs", e));
    }

    // 组文件
    for group in groups {
        if group.members.is_empty() {
            debug!(group = group.key, "empty group, no file written");
            continue;
        }
        let content = group_file_content(group);
        let file_name = format!("{}.txt", sanitize_file_name(&group.key));

        let canonical = groups_dir.join(&file_name);
        match std::fs::write(&canonical, &content) {
            Ok(()) => report.written.push(canonical),
            Err(e) => report
                .errors
                .push(Error::conversion(format!("groups/{}", file_name), e)),
        }

        // 顶层旧路径副本；Others 只保留规范路径，避免重复文件
        if group.key != "Others" {
            let legacy = config.output_dir.join(&file_name);
            match std::fs::write(&legacy, &content) {
                Ok(()) => report.written.push(legacy),
                Err(e) => report.errors.push(Error::conversion(file_name.clone(), e)),
            }
        }
    }

    // 客户端配置
    for client in &config.clients {
        let rendered = match client {
            ClientKind::Mihomo => clash::render(groups, nodes),
            ClientKind::Surge => surge::render(groups, nodes),
            ClientKind::Singbox => singbox::render(groups, nodes),
            ClientKind::V2ray => v2ray::render(nodes),
        };
        let path = config.output_dir.join(client.file_name());
        match rendered.and_then(|content| Ok(std::fs::write(&path, content)?)) {
            Ok(()) => report.written.push(path),
            Err(e) => {
                warn!(client = client.file_name(), error = %e, "client config failed");
                report
                    .errors
                    .push(Error::conversion(client.file_name(), e));
            }
        }
    }

    if report.written.is_empty() {
        return Err(Error::conversion("emit", "no artifacts produced"));
    }
    info!(
        written = report.written.len(),
        errors = report.errors.len(),
        "artifacts emitted"
    );
    Ok(report)
}

/// LF 行尾，结尾不留空行
fn group_file_content(group: &Group) -> String {
    group
        .members
        .iter()
        .map(uri::node_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn sanitize_file_name(key: &str) -> String {
    key.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '-' } else { c })
        .collect()
}

/// HTTP 门面读组文件用
pub fn group_file_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir
        .join("groups")
        .join(format!("{}.txt", sanitize_file_name(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify;
    use crate::group::{build_groups, DEFAULT_SHORTLIST};
    use crate::node::{GeoInfo, Protocol, ProxySettings};

    fn classified(name: &str, server: &str, code: &str, raw: Option<&str>) -> Node {
        let mut node = Node::new(
            Protocol::Trojan,
            name,
            server,
            443,
            ProxySettings::Trojan {
                password: "p".into(),
                sni: None,
                allow_insecure: false,
            },
        );
        if let Some(raw) = raw {
            node = node.with_raw(raw);
        }
        node.geo = Some(GeoInfo {
            country_code: Some(code.into()),
            country_name: code.into(),
            ..GeoInfo::others()
        });
        let c = classify::classify(&node);
        classify::apply_tags(&mut node, &c);
        node
    }

    fn shortlist() -> Vec<String> {
        DEFAULT_SHORTLIST.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn group_files_prefer_raw_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let raw = "trojan://p@1.1.1.1:443#original%20name";
        let nodes = vec![classified("🇭🇰 HK 01", "1.1.1.1", "HK", Some(raw))];
        let groups = build_groups(&nodes, &[], &shortlist());
        let config = EmitConfig {
            output_dir: dir.path().to_path_buf(),
            clients: vec![],
        };
        emit_all(&config, &groups, &nodes).unwrap();

        let content = std::fs::read_to_string(dir.path().join("groups/HK.txt")).unwrap();
        assert_eq!(content, raw);
        assert!(!content.ends_with('\n'));
    }

    #[test]
    fn others_has_no_top_level_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = vec![classified("🇩🇪 DE 01", "2.2.2.2", "DE", None)];
        let groups = build_groups(&nodes, &[], &shortlist());
        let config = EmitConfig {
            output_dir: dir.path().to_path_buf(),
            clients: vec![],
        };
        emit_all(&config, &groups, &nodes).unwrap();

        assert!(dir.path().join("groups/Others.txt").exists());
        assert!(!dir.path().join("Others.txt").exists());
        // 普通地区组保留顶层旧副本
        assert!(dir.path().join("DE.txt").exists());
        assert!(dir.path().join("groups/DE.txt").exists());
    }

    #[test]
    fn client_configs_written() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = vec![classified("🇭🇰 HK 01", "1.1.1.1", "HK", None)];
        let groups = build_groups(&nodes, &[], &shortlist());
        let config = EmitConfig {
            output_dir: dir.path().to_path_buf(),
            clients: ClientKind::all().to_vec(),
        };
        let report = emit_all(&config, &groups, &nodes).unwrap();
        assert!(dir.path().join("mihomo.yaml").exists());
        assert!(dir.path().join("surge.conf").exists());
        assert!(dir.path().join("singbox.json").exists());
        assert!(dir.path().join("v2ray.json").exists());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn partial_failure_still_succeeds() {
        // hysteria2-only 的列表让 v2ray 渲染失败，其余产物照常
        let dir = tempfile::tempdir().unwrap();
        let mut node = Node::new(
            Protocol::Hysteria2,
            "🇭🇰 h2",
            "1.1.1.1",
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
        node.geo = Some(GeoInfo {
            country_code: Some("HK".into()),
            country_name: "香港".into(),
            ..GeoInfo::others()
        });
        let nodes = vec![node];
        let groups = build_groups(&nodes, &[], &shortlist());
        let config = EmitConfig {
            output_dir: dir.path().to_path_buf(),
            clients: vec![ClientKind::Mihomo, ClientKind::V2ray],
        };
        let report = emit_all(&config, &groups, &nodes).unwrap();
        assert!(dir.path().join("mihomo.yaml").exists());
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn icon_lookup() {
        let group = Group {
            key: "Netflix".into(),
            display_name: "Netflix".into(),
            kind: GroupKind::Service,
            members: vec![],
            refs: vec![],
            include_direct: false,
            include_reject: false,
        };
        assert!(group_icon(&group).unwrap().ends_with("Netflix.png"));
    }
}
