//! 分组
//!
//! 从分类好的节点推导，绝不手工维护成员：
//! - 地区组：每个出现过的国家码一组，名字 "<旗帜> <国名>节点"
//! - Others：国家码不在短名单 {HK, SG, US, JP, TW} 里的全部节点
//! - 服务组：按服务标签聚合
//! - 元组：声明式表驱动，成员是被引用组的并集（按节点身份去重）

use serde::{Deserialize, Serialize};

use crate::classify::{country_entry, flag};
use crate::node::Node;

/// url-test 型分组的默认拨测参数
pub const TEST_URL: &str = "http://www.gstatic.com/generate_204";
pub const TEST_INTERVAL_SECS: u32 = 300;
pub const TEST_TOLERANCE_MS: u32 = 150;

/// 地区短名单：在单里的国家各自成组，不在的进 Others
pub const DEFAULT_SHORTLIST: &[&str] = &["HK", "SG", "US", "JP", "TW"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Region,
    Service,
    Meta,
}

#[derive(Debug, Clone)]
pub struct Group {
    /// 文件名和引用用的短键（HK / Others / Netflix …）
    pub key: String,
    /// 客户端配置里的显示名
    pub display_name: String,
    pub kind: GroupKind,
    pub members: Vec<Node>,
    /// 元组引用的其他组显示名（客户端配置里渲染成 selector）
    pub refs: Vec<String>,
    pub include_direct: bool,
    pub include_reject: bool,
}

impl Group {
    fn new(key: impl Into<String>, display_name: impl Into<String>, kind: GroupKind) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            kind,
            members: Vec::new(),
            refs: Vec::new(),
            include_direct: false,
            include_reject: false,
        }
    }
}

/// 元组声明：按名字引用其他组，按标签补充，附加 DIRECT/REJECT/自定义成员
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaGroupSpec {
    pub name: String,
    #[serde(default)]
    pub include_groups: Vec<String>,
    #[serde(default)]
    pub include_by_tag: Vec<String>,
    #[serde(default)]
    pub include_direct: bool,
    #[serde(default)]
    pub include_reject: bool,
    #[serde(default)]
    pub include_custom: Vec<String>,
}

/// 从终选节点构建全部分组
pub fn build_groups(nodes: &[Node], metas: &[MetaGroupSpec], shortlist: &[String]) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();

    // 地区组按首次出现顺序
    let mut region_order: Vec<String> = Vec::new();
    for node in nodes {
        if let Some(code) = node_country(node) {
            if !region_order.iter().any(|c| c == &code) {
                region_order.push(code);
            }
        }
    }
    for code in &region_order {
        let name = country_entry(code).map(|e| e.name).unwrap_or(code.as_str());
        let mut group = Group::new(
            code.clone(),
            format!("{} {}节点", flag(code), name),
            GroupKind::Region,
        );
        group.members = nodes
            .iter()
            .filter(|n| node_country(n).as_deref() == Some(code))
            .cloned()
            .collect();
        groups.push(group);
    }

    // Others：国家码不在短名单（含没有国家码的）
    let mut others = Group::new("Others", "Others", GroupKind::Region);
    others.members = nodes
        .iter()
        .filter(|n| match node_country(n) {
            Some(code) => !shortlist.iter().any(|s| s == &code),
            None => true,
        })
        .cloned()
        .collect();
    groups.push(others);

    // 服务组按标签首次出现顺序
    let mut service_order: Vec<String> = Vec::new();
    for node in nodes {
        for tag in &node.tags {
            if is_service_tag(tag) && !service_order.iter().any(|t| t == tag) {
                service_order.push(tag.clone());
            }
        }
    }
    for tag in &service_order {
        let mut group = Group::new(tag.clone(), tag.clone(), GroupKind::Service);
        group.members = nodes
            .iter()
            .filter(|n| n.tags.iter().any(|t| t == tag))
            .cloned()
            .collect();
        groups.push(group);
    }

    // 元组最后展开，能引用上面所有组
    for spec in metas {
        let mut group = Group::new(spec.name.clone(), spec.name.clone(), GroupKind::Meta);
        group.include_direct = spec.include_direct;
        group.include_reject = spec.include_reject;

        let mut seen_ids: Vec<String> = Vec::new();
        for reference in &spec.include_groups {
            let Some(referenced) = groups
                .iter()
                .find(|g| &g.key == reference || &g.display_name == reference)
            else {
                continue;
            };
            group.refs.push(referenced.display_name.clone());
            for node in referenced.members.clone() {
                if !seen_ids.contains(&node.id) {
                    seen_ids.push(node.id.clone());
                    group.members.push(node);
                }
            }
        }
        for tag in &spec.include_by_tag {
            for node in nodes.iter().filter(|n| n.tags.iter().any(|t| t == tag)) {
                if !seen_ids.contains(&node.id) {
                    seen_ids.push(node.id.clone());
                    group.members.push(node.clone());
                }
            }
        }
        groups.push(group);
    }

    groups
}

fn node_country(node: &Node) -> Option<String> {
    node.country_code().map(String::from)
}

/// tags 里混着国家码和协议名，两张表都查不到的才是服务标签
fn is_service_tag(tag: &str) -> bool {
    crate::classify::country_entry(tag).is_none()
        && crate::node::Protocol::from_alias(tag).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify;
    use crate::node::{GeoInfo, Protocol, ProxySettings};

    fn classified(name: &str, server: &str, code: Option<&str>) -> Node {
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
        node.geo = Some(GeoInfo {
            country_code: code.map(String::from),
            country_name: code.unwrap_or("Others").to_string(),
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
    fn region_groups_per_country() {
        let nodes = vec![
            classified("🇭🇰 a", "1.1.1.1", Some("HK")),
            classified("🇺🇸 b", "2.2.2.2", Some("US")),
            classified("🇭🇰 c", "3.3.3.3", Some("HK")),
        ];
        let groups = build_groups(&nodes, &[], &shortlist());
        let hk = groups.iter().find(|g| g.key == "HK").unwrap();
        assert_eq!(hk.display_name, "🇭🇰 香港节点");
        assert_eq!(hk.members.len(), 2);
        assert_eq!(hk.kind, GroupKind::Region);
    }

    #[test]
    fn others_catches_non_shortlist() {
        let nodes = vec![
            classified("🇭🇰 a", "1.1.1.1", Some("HK")),
            classified("🇩🇪 b", "2.2.2.2", Some("DE")),
            classified("c", "3.3.3.3", None),
        ];
        let groups = build_groups(&nodes, &[], &shortlist());
        let others = groups.iter().find(|g| g.key == "Others").unwrap();
        let names: Vec<&str> = others.members.iter().map(|n| n.display_name.as_str()).collect();
        assert_eq!(names, vec!["🇩🇪 b", "c"]);
    }

    #[test]
    fn service_groups_from_tags() {
        let nodes = vec![
            classified("🇺🇸 Netflix a", "1.1.1.1", Some("US")),
            classified("🇯🇵 b", "2.2.2.2", Some("JP")),
            classified("🇸🇬 nflx c", "3.3.3.3", Some("SG")),
        ];
        let groups = build_groups(&nodes, &[], &shortlist());
        let netflix = groups.iter().find(|g| g.key == "Netflix").unwrap();
        assert_eq!(netflix.kind, GroupKind::Service);
        assert_eq!(netflix.members.len(), 2);
    }

    #[test]
    fn meta_group_union_dedups_by_identity() {
        let nodes = vec![
            classified("🇭🇰 Netflix a", "1.1.1.1", Some("HK")),
            classified("🇺🇸 b", "2.2.2.2", Some("US")),
        ];
        let metas = vec![MetaGroupSpec {
            name: "自动选择".into(),
            include_groups: vec!["HK".into(), "US".into(), "Netflix".into()],
            include_direct: true,
            ..MetaGroupSpec::default()
        }];
        let groups = build_groups(&nodes, &metas, &shortlist());
        let meta = groups.iter().find(|g| g.key == "自动选择").unwrap();
        assert_eq!(meta.kind, GroupKind::Meta);
        // HK 的节点同时在 Netflix 组里，但只计一次
        assert_eq!(meta.members.len(), 2);
        assert!(meta.include_direct);
    }

    #[test]
    fn meta_group_by_tag() {
        let nodes = vec![
            classified("🇺🇸 gpt a", "1.1.1.1", Some("US")),
            classified("🇯🇵 b", "2.2.2.2", Some("JP")),
        ];
        let metas = vec![MetaGroupSpec {
            name: "AI".into(),
            include_by_tag: vec!["OpenAI".into()],
            ..MetaGroupSpec::default()
        }];
        let groups = build_groups(&nodes, &metas, &shortlist());
        let ai = groups.iter().find(|g| g.key == "AI").unwrap();
        assert_eq!(ai.members.len(), 1);
    }

    #[test]
    fn unknown_reference_ignored() {
        let nodes = vec![classified("🇺🇸 a", "1.1.1.1", Some("US"))];
        let metas = vec![MetaGroupSpec {
            name: "m".into(),
            include_groups: vec!["不存在".into()],
            ..MetaGroupSpec::default()
        }];
        let groups = build_groups(&nodes, &metas, &shortlist());
        let meta = groups.iter().find(|g| g.key == "m").unwrap();
        assert!(meta.members.is_empty());
    }
}
