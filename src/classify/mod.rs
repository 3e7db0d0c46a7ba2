//! 节点分类：地区、协议、服务标签
//!
//! 三张表：
//! - CountryMap：中英文名字片段、两字母码、旗帜码点 → 国家码
//! - ProtocolMap：协议别名 → 规范协议名
//! - ServiceTagMap：服务别名（netflix/nf/nflx …）→ 规范服务名
//!
//! 匹配大小写不敏感，表内条目按声明顺序先命中先赢（香港、台湾排在
//! 中国前面，避免 "中国香港" 归错）。

pub mod namer;

use std::sync::LazyLock;

use regex::Regex;

use crate::node::Node;

// ─── CountryMap ───

pub struct CountryEntry {
    pub code: &'static str,
    /// 地区组显示名用的本地名
    pub name: &'static str,
    pattern: &'static str,
}

/// 顺序即优先级
static COUNTRIES: &[CountryEntry] = &[
    CountryEntry { code: "HK", name: "香港", pattern: r"(?i)香港|🇭🇰|\bHKG?\b|Hong\s*Kong" },
    CountryEntry { code: "TW", name: "台湾", pattern: r"(?i)台湾|臺灣|🇹🇼|\bTWN?\b|Taiwan|台北" },
    CountryEntry { code: "JP", name: "日本", pattern: r"(?i)日本|🇯🇵|\bJPN?\b|Japan|东京|大阪|Tokyo|Osaka" },
    CountryEntry { code: "US", name: "美国", pattern: r"(?i)美国|🇺🇸|\bUSA?\b|United\s*States|America|洛杉矶|圣何塞|Los\s*Angeles|San\s*Jose" },
    CountryEntry { code: "SG", name: "新加坡", pattern: r"(?i)新加坡|狮城|🇸🇬|\bSGP?\b|Singapore" },
    CountryEntry { code: "KR", name: "韩国", pattern: r"(?i)韩国|首尔|🇰🇷|\bKOR\b|\bKR\b|Korea|Seoul" },
    CountryEntry { code: "UK", name: "英国", pattern: r"(?i)英国|🇬🇧|\bUK\b|\bGBR?\b|United\s*Kingdom|Britain|London" },
    CountryEntry { code: "DE", name: "德国", pattern: r"(?i)德国|🇩🇪|\bDEU?\b|Germany|Frankfurt|法兰克福" },
    CountryEntry { code: "FR", name: "法国", pattern: r"(?i)法国|🇫🇷|\bFRA?\b|France|Paris|巴黎" },
    CountryEntry { code: "NL", name: "荷兰", pattern: r"(?i)荷兰|🇳🇱|\bNLD?\b|Netherlands|Amsterdam" },
    CountryEntry { code: "CA", name: "加拿大", pattern: r"(?i)加拿大|🇨🇦|\bCAN?\b|Canada|Toronto" },
    CountryEntry { code: "AU", name: "澳大利亚", pattern: r"(?i)澳大利亚|澳洲|🇦🇺|\bAUS?\b|Australia|Sydney" },
    CountryEntry { code: "RU", name: "俄罗斯", pattern: r"(?i)俄罗斯|🇷🇺|\bRUS?\b|Russia|Moscow|莫斯科" },
    // 印尼在印度前面，"印度尼西亚" 先被 ID 收走
    CountryEntry { code: "ID", name: "印尼", pattern: r"(?i)印尼|印度尼西亚|🇮🇩|\bIDN?\b|Indonesia|Jakarta" },
    CountryEntry { code: "IN", name: "印度", pattern: r"(?i)印度|🇮🇳|\bIND?\b|India|Mumbai" },
    CountryEntry { code: "TR", name: "土耳其", pattern: r"(?i)土耳其|🇹🇷|\bTUR\b|\bTR\b|Turkey|Istanbul" },
    CountryEntry { code: "MY", name: "马来西亚", pattern: r"(?i)马来西亚|🇲🇾|\bMYS?\b|Malaysia" },
    CountryEntry { code: "TH", name: "泰国", pattern: r"(?i)泰国|🇹🇭|\bTHA?\b|Thailand|Bangkok" },
    CountryEntry { code: "VN", name: "越南", pattern: r"(?i)越南|🇻🇳|\bVNM?\b|Vietnam|Hanoi" },
    CountryEntry { code: "PH", name: "菲律宾", pattern: r"(?i)菲律宾|🇵🇭|\bPHL?\b|Philippines|Manila" },
    CountryEntry { code: "BR", name: "巴西", pattern: r"(?i)巴西|🇧🇷|\bBRA?\b|Brazil" },
    CountryEntry { code: "AR", name: "阿根廷", pattern: r"(?i)阿根廷|🇦🇷|\bARG\b|\bAR\b|Argentina" },
    CountryEntry { code: "IT", name: "意大利", pattern: r"(?i)意大利|🇮🇹|\bITA\b|\bIT\b|Italy|Milan" },
    CountryEntry { code: "ES", name: "西班牙", pattern: r"(?i)西班牙|🇪🇸|\bESP\b|\bES\b|Spain|Madrid" },
    CountryEntry { code: "CN", name: "中国", pattern: r"(?i)中国|🇨🇳|\bCHN\b|\bCN\b|China|回国|江苏|北京|上海|广州|深圳" },
];

static COUNTRY_PATTERNS: LazyLock<Vec<(Regex, &'static CountryEntry)>> = LazyLock::new(|| {
    COUNTRIES
        .iter()
        .map(|entry| {
            let regex = Regex::new(entry.pattern).expect("country pattern must compile");
            (regex, entry)
        })
        .collect()
});

/// 从显示名里找国家码，第一个命中的条目赢
pub fn country_hint(name: &str) -> Option<&'static str> {
    COUNTRY_PATTERNS
        .iter()
        .find(|(regex, _)| regex.is_match(name))
        .map(|(_, entry)| entry.code)
}

pub fn country_entry(code: &str) -> Option<&'static CountryEntry> {
    COUNTRIES.iter().find(|entry| entry.code == code)
}

/// 国家码 → 旗帜 emoji（区域指示符拼接；UK 用 GB 旗）
pub fn flag(code: &str) -> String {
    let code = if code == "UK" { "GB" } else { code };
    code.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(2)
        .map(|c| {
            let offset = c.to_ascii_uppercase() as u32 - 'A' as u32;
            char::from_u32(0x1F1E6 + offset).unwrap_or('🏳')
        })
        .collect()
}

// ─── ProtocolMap ───

static PROTOCOL_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bvmess\b", "vmess"),
        (r"(?i)\bvless\b", "vless"),
        (r"(?i)\bshadowsocksr\b|\bssr\b", "shadowsocksr"),
        (r"(?i)\bshadowsocks\b|\bss\b", "shadowsocks"),
        (r"(?i)\btrojan\b", "trojan"),
        (r"(?i)\bhysteria2\b|\bhy2\b", "hysteria2"),
        (r"(?i)\bsocks5?\b", "socks5"),
        (r"(?i)\bhttps\b", "https"),
        (r"(?i)\bhttp\b", "http"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("protocol pattern must compile"), label))
    .collect()
});

pub fn protocol_hint(name: &str) -> Option<&'static str> {
    PROTOCOL_PATTERNS
        .iter()
        .find(|(regex, _)| regex.is_match(name))
        .map(|(_, label)| *label)
}

// ─── ServiceTagMap ───

static SERVICE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)netflix|\bnflx\b|\bnf\b|奈飞", "Netflix"),
        (r"(?i)open\s*ai|chat\s*gpt|\bgpt\b", "OpenAI"),
        (r"(?i)claude|anthropic", "Claude"),
        (r"(?i)gemini", "Gemini"),
        (r"(?i)disney\s*(\+|plus)?|迪士尼", "Disney+"),
        (r"(?i)youtube|\bytb?\b|油管", "YouTube"),
        (r"(?i)telegram|\btg\b|电报", "Telegram"),
        (r"(?i)google|谷歌", "Google"),
        (r"(?i)tiktok|抖音", "TikTok"),
        (r"(?i)spotify", "Spotify"),
        (r"(?i)\bhbo\b", "HBO"),
        (r"(?i)\bhulu\b", "Hulu"),
        (r"(?i)流媒体|\bstreaming\b|解锁", "Streaming"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("service pattern must compile"), label))
    .collect()
});

/// 所有命中的服务标签（去重保序）
pub fn service_tags(name: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for (regex, label) in SERVICE_PATTERNS.iter() {
        if regex.is_match(name) && !tags.iter().any(|t| t == label) {
            tags.push(label.to_string());
        }
    }
    tags
}

// ─── 数字后缀 ───

static TRAILING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9A-Za-z](\d+)").expect("number pattern must compile"));

/// 名字里最后一个"前面是非字母数字"的整数
pub fn trailing_number(name: &str) -> Option<u32> {
    TRAILING_NUMBER
        .captures_iter(name)
        .last()
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

// ─── 分类 ───

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub country_code: Option<String>,
    pub protocol_label: String,
    pub number: Option<u32>,
    pub services: Vec<String>,
}

/// §4.7 的四步提取
pub fn classify(node: &Node) -> Classification {
    let country_code = country_hint(&node.display_name)
        .map(String::from)
        .or_else(|| node.country_code().map(String::from));
    let protocol_label = protocol_hint(&node.display_name)
        .unwrap_or(node.protocol.as_str())
        .to_string();
    Classification {
        country_code,
        protocol_label,
        number: trailing_number(&node.display_name),
        services: service_tags(&node.display_name),
    }
}

/// 写回 tags：{国家, 协议, 服务}，去重保序
pub fn apply_tags(node: &mut Node, classification: &Classification) {
    let mut tags = Vec::new();
    if let Some(code) = &classification.country_code {
        tags.push(code.clone());
    }
    tags.push(classification.protocol_label.clone());
    for service in &classification.services {
        if !tags.contains(service) {
            tags.push(service.clone());
        }
    }
    node.tags = tags;
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
    fn us_flag_and_token() {
        assert_eq!(country_hint("🇺🇸 Node 1"), Some("US"));
        assert_eq!(country_hint("US 01"), Some("US"));
        assert_eq!(country_hint("美国 高速"), Some("US"));
        // US 不能嵌在别的词里
        assert_eq!(country_hint("Brussels"), None);
        assert_eq!(country_hint("PLUS node"), None);
    }

    #[test]
    fn hk_beats_cn_for_china_hongkong() {
        assert_eq!(country_hint("中国香港 01"), Some("HK"));
        assert_eq!(country_hint("中国 回程"), Some("CN"));
    }

    #[test]
    fn cjk_and_english_fragments() {
        assert_eq!(country_hint("日本东京 NTT"), Some("JP"));
        assert_eq!(country_hint("Tokyo premium"), Some("JP"));
        assert_eq!(country_hint("新加坡 BGP"), Some("SG"));
        assert_eq!(country_hint("首尔 01"), Some("KR"));
        assert_eq!(country_hint("random name"), None);
    }

    #[test]
    fn flag_rendering() {
        assert_eq!(flag("US"), "🇺🇸");
        assert_eq!(flag("HK"), "🇭🇰");
        // UK 映射到 GB 旗
        assert_eq!(flag("UK"), "🇬🇧");
    }

    #[test]
    fn netflix_aliases() {
        for name in ["Netflix 专线", "nf unlock", "NFLX|HK", "奈飞 01"] {
            assert_eq!(service_tags(name), vec!["Netflix".to_string()], "{}", name);
        }
        // 词中缝的 nf 不算
        assert!(service_tags("info node").is_empty());
    }

    #[test]
    fn openai_aliases() {
        assert_eq!(service_tags("ChatGPT ok"), vec!["OpenAI".to_string()]);
        assert_eq!(service_tags("GPT-unlock"), vec!["OpenAI".to_string()]);
    }

    #[test]
    fn multiple_services_ordered() {
        let tags = service_tags("HK Netflix+Disney+ ytb");
        assert_eq!(tags, vec!["Netflix", "Disney+", "YouTube"]);
    }

    #[test]
    fn trailing_number_extraction() {
        assert_eq!(trailing_number("US 01"), Some(1));
        // x7 的 7 前面是字母，不算；最后一个合格的是 12
        assert_eq!(trailing_number("节点-12 测试 x7"), Some(12));
        assert_eq!(trailing_number("no number"), None);
        // 嵌在单词里的数字不算
        assert_eq!(trailing_number("ipv6only"), None);
    }

    #[test]
    fn classify_falls_back_to_geo() {
        let mut node = named("plain name");
        node.geo = Some(crate::node::GeoInfo {
            country_code: Some("SG".into()),
            country_name: "Singapore".into(),
            ..crate::node::GeoInfo::others()
        });
        let c = classify(&node);
        assert_eq!(c.country_code.as_deref(), Some("SG"));
    }

    #[test]
    fn classify_protocol_label_from_name_else_canonical() {
        let node = named("vmess 转发");
        assert_eq!(classify(&node).protocol_label, "vmess");
        let node = named("plain");
        assert_eq!(classify(&node).protocol_label, "trojan");
    }

    #[test]
    fn tags_deduplicated_in_order() {
        let mut node = named("🇺🇸 US trojan Netflix nf 01");
        let c = classify(&node);
        apply_tags(&mut node, &c);
        assert_eq!(node.tags, vec!["US", "trojan", "Netflix"]);
    }
}
