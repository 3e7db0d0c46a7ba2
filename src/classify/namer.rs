//! 节点重命名
//!
//! 模板 token：`{country}` `{protocol}` `{tags}` `{number}`。
//! `{country}` 渲染成 "<旗帜> <国家码>"，`{number}` 是终选列表里
//! 按国家递增的两位序号，源名字里的旧编号一律不用。
//! 渲染后折叠空白，空结果退回原名。

use std::collections::HashMap;

use crate::node::{GeoInfo, Node};

use super::{classify, flag};

pub const DEFAULT_NAME_TEMPLATE: &str = "{country} {protocol} {tags} {number}";

/// 终选列表统一重命名，序号按国家各自从 01 起
pub fn rename_all(nodes: &mut [Node], template: &str) {
    let mut counters: HashMap<String, u32> = HashMap::new();

    for node in nodes.iter_mut() {
        let classification = classify(node);
        let country_key = classification
            .country_code
            .clone()
            .unwrap_or_else(|| "Others".to_string());
        let counter = counters.entry(country_key.clone()).or_insert(0);
        *counter += 1;

        let country_token = match &classification.country_code {
            Some(code) => format!("{} {}", flag(code), code),
            None => "Others".to_string(),
        };
        let rendered = template
            .replace("{country}", &country_token)
            .replace("{protocol}", &classification.protocol_label)
            .replace("{tags}", &classification.services.join(" "))
            .replace("{number}", &format!("{:02}", counter));
        let rendered = collapse_whitespace(&rendered);

        if !rendered.is_empty() {
            if node.raw_display_name.is_none() {
                node.raw_display_name = Some(node.display_name.clone());
            }
            node.display_name = rendered;
        }
    }
}

/// 位置纠正：探测出的国家替换名字头部的旗帜，原名存档，geo 更新
pub fn apply_location_correction(node: &mut Node, actual: GeoInfo) {
    if node.raw_display_name.is_none() {
        node.raw_display_name = Some(node.display_name.clone());
    }

    if let Some(code) = actual.country_code.as_deref() {
        let new_flag = flag(code);
        let stripped = strip_leading_flag(&node.display_name);
        node.display_name = collapse_whitespace(&format!("{} {}", new_flag, stripped));
    }
    node.geo = Some(actual);
}

/// 去掉开头的旗帜 emoji（两个区域指示符码点）
fn strip_leading_flag(name: &str) -> &str {
    let mut chars = name.char_indices();
    let Some((_, first)) = chars.next() else {
        return name;
    };
    if !is_regional_indicator(first) {
        return name;
    }
    match chars.next() {
        Some((_, second)) if is_regional_indicator(second) => {
            let rest = chars.next().map(|(i, _)| i).unwrap_or(name.len());
            name[rest..].trim_start()
        }
        _ => name,
    }
}

fn is_regional_indicator(c: char) -> bool {
    ('\u{1F1E6}'..='\u{1F1FF}').contains(&c)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Protocol, ProxySettings};

    fn named(name: &str) -> Node {
        Node::new(
            Protocol::Trojan,
            name,
            "h.example",
            443,
            ProxySettings::Trojan {
                password: "p".into(),
                sni: None,
                allow_insecure: false,
            },
        )
    }

    #[test]
    fn regional_renumbering_ignores_source_numbers() {
        // §8 场景 6：三个美国节点，旧编号乱序
        let mut nodes = vec![
            named("US node 17"),
            named("美国 99"),
            named("🇺🇸 premium 3"),
        ];
        rename_all(&mut nodes, DEFAULT_NAME_TEMPLATE);
        assert!(nodes[0].display_name.ends_with(" 01"), "{}", nodes[0].display_name);
        assert!(nodes[1].display_name.ends_with(" 02"), "{}", nodes[1].display_name);
        assert!(nodes[2].display_name.ends_with(" 03"), "{}", nodes[2].display_name);
        assert_eq!(nodes[0].raw_display_name.as_deref(), Some("US node 17"));
    }

    #[test]
    fn counters_are_per_country() {
        let mut nodes = vec![named("US a"), named("HK b"), named("US c")];
        rename_all(&mut nodes, DEFAULT_NAME_TEMPLATE);
        assert!(nodes[0].display_name.ends_with(" 01"));
        assert!(nodes[1].display_name.ends_with(" 01"));
        assert!(nodes[2].display_name.ends_with(" 02"));
    }

    #[test]
    fn rendered_name_shape() {
        let mut nodes = vec![named("🇭🇰 HK Netflix 12")];
        rename_all(&mut nodes, DEFAULT_NAME_TEMPLATE);
        assert_eq!(nodes[0].display_name, "🇭🇰 HK trojan Netflix 01");
    }

    #[test]
    fn no_country_goes_to_others_bucket() {
        let mut nodes = vec![named("mystery"), named("enigma")];
        rename_all(&mut nodes, DEFAULT_NAME_TEMPLATE);
        assert!(nodes[0].display_name.starts_with("Others"));
        assert!(nodes[1].display_name.ends_with(" 02"));
    }

    #[test]
    fn whitespace_collapsed() {
        let mut nodes = vec![named("US x")];
        rename_all(&mut nodes, "{country}   {protocol}  {tags} {number}");
        assert!(!nodes[0].display_name.contains("  "));
    }

    #[test]
    fn location_correction_swaps_flag() {
        let mut node = named("🇺🇸 fast 01");
        let actual = GeoInfo {
            country_code: Some("JP".into()),
            country_name: "Japan".into(),
            ..GeoInfo::others()
        };
        apply_location_correction(&mut node, actual);
        assert!(node.display_name.starts_with("🇯🇵"), "{}", node.display_name);
        assert!(!node.display_name.contains("🇺🇸"));
        assert_eq!(node.raw_display_name.as_deref(), Some("🇺🇸 fast 01"));
        assert_eq!(node.country_code(), Some("JP"));
    }

    #[test]
    fn location_correction_without_leading_flag_prepends() {
        let mut node = named("fast 01");
        let actual = GeoInfo {
            country_code: Some("SG".into()),
            country_name: "Singapore".into(),
            ..GeoInfo::others()
        };
        apply_location_correction(&mut node, actual);
        assert_eq!(node.display_name, "🇸🇬 fast 01");
    }

    #[test]
    fn strip_leading_flag_only_removes_flag_pairs() {
        assert_eq!(strip_leading_flag("🇺🇸 node"), "node");
        assert_eq!(strip_leading_flag("node 🇺🇸"), "node 🇺🇸");
        assert_eq!(strip_leading_flag(""), "");
    }
}
