//! 配置模型
//!
//! 全部字段带默认值，空配置文件也能跑（只是没有订阅源可抓）。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::emit::ClientKind;
use crate::fetch::{FetchConfig, DEFAULT_USER_AGENTS};
use crate::group::{MetaGroupSpec, DEFAULT_SHORTLIST};
use crate::locate::ProviderSpec;
use crate::probe::ProbeConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSource>,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub probe: ProbeSection,
    #[serde(default)]
    pub locate: LocateSection,
    #[serde(default)]
    pub classify: ClassifySection,
    #[serde(default)]
    pub group: GroupSection,
    #[serde(default)]
    pub emit: EmitSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub notify: NotifySection,
    /// 终选列表里剔除的辖区
    #[serde(default = "default_cn")]
    pub exclude_country: String,
    /// 出境代理收割的辖区
    #[serde(default = "default_cn")]
    pub egress_country: String,
}

fn default_cn() -> String {
    "CN".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            subscriptions: Vec::new(),
            fetch: FetchSection::default(),
            probe: ProbeSection::default(),
            locate: LocateSection::default(),
            classify: ClassifySection::default(),
            group: GroupSection::default(),
            emit: EmitSection::default(),
            api: ApiSection::default(),
            notify: NotifySection::default(),
            exclude_country: default_cn(),
            egress_country: default_cn(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let mut names = std::collections::HashSet::new();
        for source in &self.subscriptions {
            if source.name.trim().is_empty() {
                anyhow::bail!("subscription with empty name");
            }
            if !names.insert(&source.name) {
                anyhow::bail!("duplicate subscription name: {}", source.name);
            }
            match source.kind {
                SourceKind::Url => {
                    if source.url.as_deref().unwrap_or("").is_empty() {
                        anyhow::bail!("subscription '{}' (kind=url) missing url", source.name);
                    }
                }
                SourceKind::Base64 | SourceKind::SingleUri => {
                    if source.content.as_deref().unwrap_or("").is_empty() {
                        anyhow::bail!("subscription '{}' missing inline content", source.name);
                    }
                }
            }
        }
        if self.probe.concurrency == 0 {
            anyhow::bail!("probe.concurrency must be at least 1");
        }
        if self.fetch.max_retries == 0 {
            anyhow::bail!("fetch.max_retries must be at least 1");
        }
        Ok(())
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            max_retries: self.fetch.max_retries,
            timeout: Duration::from_secs(self.fetch.timeout_secs),
            user_agents: self.fetch.user_agents.clone(),
            egress_fallback_threshold: self.fetch.egress_fallback_threshold,
            rate_limit_pause: Duration::from_secs(self.fetch.rate_limit_pause_secs),
            backoff_base: Duration::from_millis(self.fetch.backoff_base_ms),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            concurrency: self.probe.concurrency,
            timeout: Duration::from_millis(self.probe.timeout_ms),
            test_url: self.probe.test_url.clone(),
            high_latency_floor_ms: self.probe.high_latency_floor_ms,
            verify_location: self.probe.verify_location,
            verify_tls: self.probe.verify_tls,
        }
    }

    /// 服务商池：配置的自定义池优先，`IP_API_URL` 注入的排最前
    pub fn provider_pool(&self) -> Vec<ProviderSpec> {
        let mut pool = Vec::new();
        if let Some(url) = &self.locate.api_url {
            pool.push(ProviderSpec {
                name: "custom".to_string(),
                url_template: url.clone(),
                api_key: self.locate.api_key.clone(),
                rate_limit_per_minute: self.locate.custom_rate_limit,
            });
        }
        match &self.locate.providers {
            Some(providers) => pool.extend(providers.clone()),
            None => pool.extend(crate::locate::default_providers()),
        }
        pool
    }

    pub fn data_dir(&self) -> PathBuf {
        self.emit.data_dir.clone()
    }

    pub fn ip_cache_dir(&self) -> PathBuf {
        self.emit.data_dir.join("ip_cache")
    }

    pub fn egress_cache_path(&self) -> PathBuf {
        self.ip_cache_dir().join("china_proxies.json")
    }

    pub fn sync_status_path(&self) -> PathBuf {
        self.emit.data_dir.join("sync_status.json")
    }
}

// ─── 子段 ───

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Url,
    Base64,
    SingleUri,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSource {
    pub name: String,
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    #[serde(default)]
    pub url: Option<String>,
    /// base64 / single_uri 源的内联内容
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 该源需要出境代理才能访问
    #[serde(default)]
    pub require_regional_egress: bool,
}

fn default_source_kind() -> SourceKind {
    SourceKind::Url
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub max_retries: usize,
    pub timeout_secs: u64,
    pub user_agents: Vec<String>,
    pub egress_fallback_threshold: usize,
    pub rate_limit_pause_secs: u64,
    pub backoff_base_ms: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_secs: 15,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            egress_fallback_threshold: 3,
            rate_limit_pause_secs: 5,
            backoff_base_ms: 400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub test_url: String,
    pub high_latency_floor_ms: u64,
    pub verify_location: bool,
    pub verify_tls: bool,
    /// 终选延迟上限（毫秒）；None 不设限
    pub max_latency_ms: Option<u64>,
    /// 终选节点数上限；None 不设限
    pub max_nodes: Option<usize>,
}

impl Default for ProbeSection {
    fn default() -> Self {
        let base = ProbeConfig::default();
        Self {
            concurrency: base.concurrency,
            timeout_ms: base.timeout.as_millis() as u64,
            test_url: base.test_url,
            high_latency_floor_ms: base.high_latency_floor_ms,
            verify_location: false,
            verify_tls: false,
            max_latency_ms: None,
            max_nodes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocateSection {
    pub cache_ttl_days: i64,
    /// 自定义服务商模板（`{ip}` / `{key}` 占位）
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub custom_rate_limit: u32,
    /// 整池覆盖；None 用内置池
    pub providers: Option<Vec<ProviderSpec>>,
}

impl Default for LocateSection {
    fn default() -> Self {
        Self {
            cache_ttl_days: 7,
            api_url: None,
            api_key: None,
            custom_rate_limit: 30,
            providers: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifySection {
    pub name_template: String,
}

impl Default for ClassifySection {
    fn default() -> Self {
        Self {
            name_template: crate::classify::namer::DEFAULT_NAME_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GroupSection {
    pub shortlist: Vec<String>,
    pub meta_groups: Vec<MetaGroupSpec>,
}

impl Default for GroupSection {
    fn default() -> Self {
        Self {
            shortlist: DEFAULT_SHORTLIST.iter().map(|s| s.to_string()).collect(),
            meta_groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmitSection {
    pub output_dir: PathBuf,
    pub data_dir: PathBuf,
    pub clients: Vec<ClientKind>,
}

impl Default for EmitSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            data_dir: PathBuf::from("data"),
            clients: ClientKind::all().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub listen: String,
    pub port: u16,
    /// 快捷路径指向的已发布产物根 URL
    pub shortcut_base: Option<String>,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: 8787,
            shortcut_base: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    pub bark_url: Option<String>,
    pub bark_title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.exclude_country, "CN");
        assert_eq!(config.egress_country, "CN");
    }

    #[test]
    fn url_source_requires_url() {
        let mut config = AppConfig::default();
        config.subscriptions.push(SubscriptionSource {
            name: "s1".into(),
            kind: SourceKind::Url,
            url: None,
            content: None,
            enabled: true,
            require_regional_egress: false,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut config = AppConfig::default();
        for _ in 0..2 {
            config.subscriptions.push(SubscriptionSource {
                name: "same".into(),
                kind: SourceKind::Base64,
                url: None,
                content: Some("x".into()),
                enabled: true,
                require_regional_egress: false,
            });
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn provider_pool_custom_first() {
        let mut config = AppConfig::default();
        config.locate.api_url = Some("https://geo.example/{ip}".into());
        let pool = config.provider_pool();
        assert_eq!(pool[0].name, "custom");
        assert!(pool.len() > 1);
    }
}
