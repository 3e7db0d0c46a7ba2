//! 多源订阅抓取
//!
//! 在 (重试 × UA) 的笛卡尔积上循环：每 `max_retries` 次换下一个 UA，
//! 每次请求追加 `_t=<epoch-ms>` 击穿中间缓存。达到出境兜底阈值后改走
//! 出境代理轮转拨号。429 额外停顿，失败按 `base · 1.5^(i mod max_retries)`
//! 指数退避。耗尽全部组合返回可在编排器层面继续的 FetchError。

pub mod egress;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::common::{decode_base64_str, looks_like_base64, Error};
use crate::node::Protocol;

use egress::EgressProxyProvider;

/// 默认 UA 轮换表
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "clash-verge/v2.0.0",
    "ClashForAndroid/2.5.12",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36",
    "v2rayN/6.40",
];

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub max_retries: usize,
    pub timeout: Duration,
    pub user_agents: Vec<String>,
    /// 从第几次尝试起走出境代理（0 基）
    pub egress_fallback_threshold: usize,
    /// 429 后的额外停顿
    pub rate_limit_pause: Duration,
    /// 退避基数
    pub backoff_base: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(15),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            egress_fallback_threshold: 3,
            rate_limit_pause: Duration::from_secs(5),
            backoff_base: Duration::from_millis(400),
        }
    }
}

/// 抓取结果
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub body: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub final_url: String,
    /// false 表示内容看不出订阅形状，下游尽力解析
    pub plausible: bool,
}

pub struct Fetcher {
    config: FetchConfig,
    egress: Option<Arc<EgressProxyProvider>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig, egress: Option<Arc<EgressProxyProvider>>) -> Self {
        Self { config, egress }
    }

    /// 抓取一个订阅 URL
    pub async fn fetch(&self, url: &str) -> Result<FetchResponse, Error> {
        self.fetch_with(url, false).await
    }

    /// `prefer_egress` 的源（地域受限）从第一次尝试就走出境代理
    pub async fn fetch_with(&self, url: &str, prefer_egress: bool) -> Result<FetchResponse, Error> {
        let retries = self.config.max_retries.max(1);
        let ua_count = self.config.user_agents.len().max(1);
        let total_attempts = retries * ua_count;
        let threshold = if prefer_egress {
            0
        } else {
            self.config.egress_fallback_threshold
        };
        let mut last_error = String::from("no attempt made");

        for attempt in 0..total_attempts {
            let ua = self
                .config
                .user_agents
                .get(attempt / retries)
                .map(String::as_str)
                .unwrap_or("subforge/0.1");

            let proxy = if attempt >= threshold {
                self.egress
                    .as_ref()
                    .and_then(|p| p.next())
                    .map(str::to_string)
            } else {
                None
            };

            match self.attempt(url, ua, proxy.as_deref()).await {
                Ok(resp) => return Ok(resp),
                Err(AttemptError::RateLimited) => {
                    last_error = "HTTP 429".to_string();
                    debug!(url, attempt, "rate limited, extra pause");
                    tokio::time::sleep(self.config.rate_limit_pause).await;
                }
                Err(AttemptError::Other(e)) => {
                    last_error = e;
                    debug!(url, attempt, error = %last_error, "fetch attempt failed");
                }
            }

            if attempt + 1 < total_attempts {
                tokio::time::sleep(self.backoff(attempt % retries)).await;
            }
        }

        warn!(url, attempts = total_attempts, "all fetch attempts exhausted");
        Err(Error::fetch(url, last_error))
    }

    async fn attempt(
        &self,
        url: &str,
        ua: &str,
        proxy: Option<&str>,
    ) -> Result<FetchResponse, AttemptError> {
        let mut builder = reqwest::Client::builder().timeout(self.config.timeout);
        if let Some(proxy_url) = proxy {
            debug!(url, proxy = proxy_url, "dialing via egress proxy");
            builder = builder.proxy(
                reqwest::Proxy::all(proxy_url)
                    .map_err(|e| AttemptError::Other(format!("bad egress proxy: {}", e)))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| AttemptError::Other(e.to_string()))?;

        let busted = cache_busted(url);
        let resp = client
            .get(&busted)
            .header(USER_AGENT, ua)
            .send()
            .await
            .map_err(|e| AttemptError::Other(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::RateLimited);
        }
        if !status.is_success() {
            return Err(AttemptError::Other(format!("HTTP {}", status.as_u16())));
        }

        let final_url = resp.url().to_string();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|e| AttemptError::Other(e.to_string()))?;

        match validate_body(&body) {
            BodyVerdict::Empty => Err(AttemptError::Other("empty body".to_string())),
            verdict => Ok(FetchResponse {
                body,
                status: status.as_u16(),
                headers,
                final_url,
                plausible: verdict == BodyVerdict::Plausible,
            }),
        }
    }

    fn backoff(&self, exponent: usize) -> Duration {
        let base = self.config.backoff_base.as_millis() as f64;
        let delay = base * 1.5_f64.powi(exponent as i32);
        // 少量抖动，避免多个源同步重试
        let jitter: f64 = rand::thread_rng().gen_range(0.0..0.2);
        Duration::from_millis((delay * (1.0 + jitter)) as u64)
    }
}

enum AttemptError {
    RateLimited,
    Other(String),
}

fn cache_busted(url: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}_t={}", url, sep, crate::common::epoch_millis())
}

// ─── 内容校验 ───

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyVerdict {
    Empty,
    Plausible,
    BestEffort,
}

/// 订阅内容形状校验
///
/// 认得出形状（base64 信封 / 已知 URI 前缀 / Clash 标记 / JSON 括号）
/// 就是 Plausible；非空但看不出形状返回 BestEffort。
pub fn validate_body(body: &str) -> BodyVerdict {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return BodyVerdict::Empty;
    }

    let has_known_prefix = |s: &str| Protocol::uri_prefixes().iter().any(|p| s.contains(p));

    if has_known_prefix(trimmed) {
        return BodyVerdict::Plausible;
    }
    if looks_like_base64(trimmed) {
        if let Ok(decoded) = decode_base64_str(trimmed) {
            if has_known_prefix(&decoded) {
                return BodyVerdict::Plausible;
            }
        }
    }
    if trimmed.contains("proxies:") || trimmed.contains("Proxy:") || trimmed.contains("- name:") {
        return BodyVerdict::Plausible;
    }
    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        return BodyVerdict::Plausible;
    }
    BodyVerdict::BestEffort
}
