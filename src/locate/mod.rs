//! IP 地理定位
//!
//! 按序轮转一池定位服务商，每家带独立的分钟级限流计数。
//! 非字面 IP 的主机名直接合成 "Others" 占位，不发网络请求。
//! 命中内存缓存或磁盘分片缓存的也不出网。
//!
//! 锁纪律：查缓存、选服务商、递增计数在同一把锁内完成；
//! HTTP 调用放在锁外，写穿两级缓存时重新拿锁。

pub mod cache;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::common::Error;
use crate::node::GeoInfo;

pub use cache::{DiskCache, GeoCacheEntry};

const RATE_WINDOW: Duration = Duration::from_secs(60);

// ─── 服务商表 ───

/// 声明式响应解析：按序找第一个存在的两字母国家码键
const CODE_KEYS: &[&str] = &["country_code", "countryCode", "country", "country_code2"];
const NAME_KEYS: &[&str] = &["country_name", "countryName", "country"];
const CITY_KEYS: &[&str] = &["city"];
const ORG_KEYS: &[&str] = &["org", "isp"];
const ASN_KEYS: &[&str] = &["asn", "as"];

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    /// `{ip}` 占位；带 `{key}` 的模板需要 api key
    pub url_template: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub rate_limit_per_minute: u32,
}

impl ProviderSpec {
    pub fn requires_key(&self) -> bool {
        self.url_template.contains("{key}")
    }

    fn render_url(&self, ip: &str) -> String {
        let mut url = self.url_template.replace("{ip}", ip);
        if let Some(key) = &self.api_key {
            url = url.replace("{key}", key);
        }
        url
    }
}

/// 内置池：免 key 的公共服务，保守限流
pub fn default_providers() -> Vec<ProviderSpec> {
    vec![
        ProviderSpec {
            name: "ip-api".into(),
            url_template: "http://ip-api.com/json/{ip}".into(),
            api_key: None,
            rate_limit_per_minute: 40,
        },
        ProviderSpec {
            name: "ipapi-co".into(),
            url_template: "https://ipapi.co/{ip}/json/".into(),
            api_key: None,
            rate_limit_per_minute: 25,
        },
        ProviderSpec {
            name: "ipwhois".into(),
            url_template: "https://ipwho.is/{ip}".into(),
            api_key: None,
            rate_limit_per_minute: 30,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Ready,
    Limited,
    NoKey,
    Failed,
}

struct ProviderState {
    spec: ProviderSpec,
    status: ProviderStatus,
    window_start: Instant,
    calls_in_window: u32,
}

impl ProviderState {
    fn new(spec: ProviderSpec) -> Self {
        let status = if spec.requires_key() && spec.api_key.is_none() {
            ProviderStatus::NoKey
        } else {
            ProviderStatus::Ready
        };
        Self {
            spec,
            status,
            window_start: Instant::now(),
            calls_in_window: 0,
        }
    }
}

// ─── 定位器 ───

struct LocatorInner {
    memory: HashMap<String, GeoCacheEntry>,
    providers: Vec<ProviderState>,
    current: usize,
    disk: DiskCache,
}

pub struct IpLocator {
    inner: Mutex<LocatorInner>,
    client: reqwest::Client,
    ttl: chrono::Duration,
}

impl IpLocator {
    pub fn new(providers: Vec<ProviderSpec>, disk: DiskCache, ttl_days: i64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(8))
            .build()
            .unwrap_or_default();
        Self {
            inner: Mutex::new(LocatorInner {
                memory: HashMap::new(),
                providers: providers.into_iter().map(ProviderState::new).collect(),
                current: 0,
                disk,
            }),
            client,
            ttl: chrono::Duration::days(ttl_days),
        }
    }

    /// host → 地理信息
    ///
    /// 域名不做解析，直接归入 Others；字面 IP 走缓存，缓存失效才出网。
    pub async fn locate(&self, host: &str) -> Result<GeoCacheEntry, Error> {
        if host.parse::<std::net::IpAddr>().is_err() {
            return Ok(GeoCacheEntry {
                ip: host.to_string(),
                geo: GeoInfo::others(),
                expires_at: Utc::now() + self.ttl,
            });
        }

        // 临界区：缓存查找 + 服务商推进 + 计数
        let (spec, url) = {
            let mut inner = self.inner.lock().await;

            if let Some(entry) = inner.memory.get(host) {
                if !entry.is_expired() {
                    return Ok(entry.clone());
                }
            }
            if let Some(entry) = inner.disk.get(host) {
                inner.memory.insert(host.to_string(), entry.clone());
                return Ok(entry);
            }

            reset_elapsed_windows(&mut inner.providers);
            let idx = pick_ready_provider(&mut inner)
                .ok_or_else(|| Error::Locate("no geolocation provider available".into()))?;
            inner.providers[idx].calls_in_window += 1;
            let spec = inner.providers[idx].spec.clone();
            let url = spec.render_url(host);
            (spec, url)
        };

        match self.query_provider(&spec, &url).await {
            Ok(geo) => self.write_through(host, geo).await,
            Err(QueryError::RateLimited) => {
                warn!(provider = spec.name, "provider rate limited, advancing");
                let (retry_spec, retry_url) = {
                    let mut inner = self.inner.lock().await;
                    mark_current_limited(&mut inner, &spec.name);
                    let idx = pick_ready_provider(&mut inner)
                        .ok_or_else(|| Error::Locate("all providers limited".into()))?;
                    inner.providers[idx].calls_in_window += 1;
                    let spec = inner.providers[idx].spec.clone();
                    let url = spec.render_url(host);
                    (spec, url)
                };
                // 换一家只重试一次
                match self.query_provider(&retry_spec, &retry_url).await {
                    Ok(geo) => self.write_through(host, geo).await,
                    Err(e) => Err(Error::Locate(format!(
                        "retry via {} failed: {}",
                        retry_spec.name,
                        e.text()
                    ))),
                }
            }
            Err(e) => Err(Error::Locate(format!(
                "{} failed: {}",
                spec.name,
                e.text()
            ))),
        }
    }

    async fn write_through(&self, ip: &str, geo: GeoInfo) -> Result<GeoCacheEntry, Error> {
        let entry = GeoCacheEntry {
            ip: ip.to_string(),
            geo,
            expires_at: Utc::now() + self.ttl,
        };
        let mut inner = self.inner.lock().await;
        inner.memory.insert(ip.to_string(), entry.clone());
        if let Err(e) = inner.disk.put(&entry) {
            warn!(error = %e, "geo disk cache write failed");
        }
        Ok(entry)
    }

    async fn query_provider(&self, spec: &ProviderSpec, url: &str) -> Result<GeoInfo, QueryError> {
        debug!(provider = spec.name, url, "geolocation query");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| QueryError::Other(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(QueryError::RateLimited);
        }
        let body = resp
            .text()
            .await
            .map_err(|e| QueryError::Other(e.to_string()))?;
        // 有些服务限流时返回 200 + 文本提示
        let lowered = body.to_ascii_lowercase();
        if lowered.contains("rate limit") || lowered.contains("too many requests") {
            return Err(QueryError::RateLimited);
        }

        let v: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| QueryError::Other(e.to_string()))?;
        Ok(parse_geo_response(&v))
    }

    /// 维护过程：清磁盘缓存里的过期条目
    pub async fn purge_expired(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.disk.purge_expired().unwrap_or(0)
    }
}

enum QueryError {
    RateLimited,
    Other(String),
}

impl QueryError {
    fn text(&self) -> String {
        match self {
            QueryError::RateLimited => "rate limited".to_string(),
            QueryError::Other(s) => s.clone(),
        }
    }
}

// ─── 内部状态机 ───

fn reset_elapsed_windows(providers: &mut [ProviderState]) {
    for p in providers.iter_mut() {
        if p.window_start.elapsed() >= RATE_WINDOW {
            p.window_start = Instant::now();
            p.calls_in_window = 0;
            if p.status == ProviderStatus::Limited {
                p.status = ProviderStatus::Ready;
            }
        }
    }
}

/// 从 current 开始轮转找 ready 且没打满限额的
fn pick_ready_provider(inner: &mut LocatorInner) -> Option<usize> {
    let count = inner.providers.len();
    for offset in 0..count {
        let idx = (inner.current + offset) % count;
        let p = &inner.providers[idx];
        if p.status == ProviderStatus::Ready && p.calls_in_window < p.spec.rate_limit_per_minute {
            inner.current = idx;
            return Some(idx);
        }
    }
    None
}

fn mark_current_limited(inner: &mut LocatorInner, name: &str) {
    if let Some(p) = inner.providers.iter_mut().find(|p| p.spec.name == name) {
        p.status = ProviderStatus::Limited;
    }
    inner.current = (inner.current + 1) % inner.providers.len().max(1);
}

/// 声明式解析：认得的键里取国家码/名字/城市/机构
pub fn parse_geo_response(v: &serde_json::Value) -> GeoInfo {
    let code = CODE_KEYS.iter().find_map(|key| {
        v[key]
            .as_str()
            .filter(|s| s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic()))
            .map(|s| s.to_ascii_uppercase())
    });
    let name = NAME_KEYS
        .iter()
        .find_map(|key| {
            v[key]
                .as_str()
                .filter(|s| !s.is_empty() && s.len() != 2)
                .map(String::from)
        })
        .or_else(|| code.clone())
        .unwrap_or_else(|| "Others".to_string());

    GeoInfo {
        country_code: code,
        country_name: name,
        city: CITY_KEYS.iter().find_map(|k| v[k].as_str().map(String::from)),
        org: ORG_KEYS.iter().find_map(|k| v[k].as_str().map(String::from)),
        asn: ASN_KEYS.iter().find_map(|k| match &v[k] {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
        resolved_at: Utc::now(),
    }
}
