//! Bark 推送
//!
//! 推送地址形如 `https://api.day.app/<device-key>`，GET
//! `<base>/<标题>/<正文>` 即送达。失败只记日志，从不影响同步结果。

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::common::url_encode;

use super::events::{Event, EventSink};

pub struct BarkNotifier {
    base_url: String,
    title: String,
    client: reqwest::Client,
}

impl BarkNotifier {
    pub fn new(base_url: impl Into<String>, title: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            title: title.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// `BARK_URL` 没配则返回 None
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("BARK_URL").ok().filter(|s| !s.is_empty())?;
        let title = std::env::var("BARK_TITLE").unwrap_or_else(|_| "subforge".to_string());
        Some(Self::new(url, title))
    }

    pub async fn push(&self, body: &str) {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            url_encode(&self.title),
            url_encode(body)
        );
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("bark notification delivered");
            }
            Ok(resp) => warn!(status = %resp.status(), "bark push rejected"),
            Err(e) => warn!(error = %e, "bark push failed"),
        }
    }
}

#[async_trait]
impl EventSink for BarkNotifier {
    async fn emit(&self, event: &Event) {
        let body = match event {
            // 开始事件不打扰
            Event::SyncStarted { .. } => return,
            Event::SyncCompleted(summary) => {
                let delta = summary.node_count as i64 - summary.previous_node_count as i64;
                format!(
                    "节点 {} ({:+})，地区 {}，协议 {}，耗时 {}s",
                    summary.node_count,
                    delta,
                    summary.regions_count,
                    summary.protocols_count,
                    (summary.fetch_ms + summary.probe_ms + summary.emit_ms) / 1000
                )
            }
            Event::SystemError { message } => format!("同步失败: {}", message),
        };
        self.push(&body).await;
    }
}
