//! 同步编排
//!
//! 单轮入口 [`SyncEngine::run`]，线性推进：
//! 抓取 → 解析 → 去重 → 名字粗分类 → 探测 → 过滤 → 辖区剔除 →
//! 终分类/重命名 → 分组 → 物化 → 出境代理收割 → 状态持久化。
//!
//! 单个订阅源、单条 URI、单个产物的失败都只记录不中断；
//! 整轮失败（SystemError）才向上抛，进程以非零码退出。

pub mod events;
pub mod notify;
pub mod status;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::classify::{self, namer};
use crate::common::Error;
use crate::config::{AppConfig, SourceKind};
use crate::dedup::{dedup, DedupOptions};
use crate::emit::{self, EmitConfig};
use crate::fetch::egress::{self, EgressProxyProvider};
use crate::fetch::Fetcher;
use crate::group;
use crate::locate::{DiskCache, IpLocator};
use crate::node::{GeoInfo, Node, ProbeInfo, ProbeStatus};
use crate::parser;
use crate::probe::{ProbeOutcome, Prober};

use events::{Event, EventSink, LogSink, SyncSummary};
use notify::BarkNotifier;
use status::{Durations, SyncStatus};

pub struct SyncEngine {
    config: AppConfig,
    sinks: Vec<Box<dyn EventSink>>,
}

/// 一轮运行的结果摘要（CLI 输出用）
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub input_node_count: usize,
    pub valid_node_count: usize,
    pub final_node_count: usize,
    pub artifacts_written: usize,
    /// (源名, 错误) 对，该轮被跳过的源
    pub source_errors: Vec<(String, String)>,
}

impl SyncEngine {
    pub fn new(config: AppConfig, sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { config, sinks }
    }

    /// 默认 sink 组合：结构化日志 + 可选 Bark（配置或环境变量）
    pub fn with_default_sinks(config: AppConfig) -> Self {
        let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(LogSink)];
        let bark = match &config.notify.bark_url {
            Some(url) => Some(BarkNotifier::new(
                url.clone(),
                config
                    .notify
                    .bark_title
                    .clone()
                    .unwrap_or_else(|| "subforge".to_string()),
            )),
            None => BarkNotifier::from_env(),
        };
        if let Some(bark) = bark {
            sinks.push(Box::new(bark));
        }
        Self::new(config, sinks)
    }

    pub async fn run(&self) -> Result<SyncOutcome, Error> {
        match self.run_inner().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.emit_event(Event::SystemError {
                    message: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self) -> Result<SyncOutcome, Error> {
        let config = &self.config;
        let previous = SyncStatus::load(&config.sync_status_path());
        let enabled: Vec<_> = config
            .subscriptions
            .iter()
            .filter(|s| s.enabled)
            .collect();
        self.emit_event(Event::SyncStarted {
            source_count: enabled.len(),
        })
        .await;

        // 1. 抓取 + 解析
        let fetch_started = Instant::now();
        let egress_provider =
            Arc::new(EgressProxyProvider::load(&config.egress_cache_path()).map_err(|e| {
                Error::System(format!("egress cache unreadable: {}", e))
            })?);
        let fetcher = Fetcher::new(config.fetch_config(), Some(egress_provider));

        let mut all_nodes: Vec<Node> = Vec::new();
        let mut source_errors: Vec<(String, String)> = Vec::new();
        for source in &enabled {
            let body = match source.kind {
                SourceKind::Url => {
                    let url = source.url.as_deref().unwrap_or_default();
                    match fetcher.fetch_with(url, source.require_regional_egress).await {
                        Ok(resp) => {
                            if !resp.plausible {
                                debug!(source = source.name, "body flagged for best-effort parsing");
                            }
                            resp.body
                        }
                        Err(e) => {
                            warn!(source = source.name, error = %e, "source skipped");
                            source_errors.push((source.name.clone(), e.to_string()));
                            continue;
                        }
                    }
                }
                SourceKind::Base64 | SourceKind::SingleUri => {
                    source.content.clone().unwrap_or_default()
                }
            };

            match parser::parse_subscription(&body) {
                Ok(mut nodes) => {
                    for node in nodes.iter_mut() {
                        node.source_tag = source.name.clone();
                    }
                    info!(source = source.name, count = nodes.len(), "source parsed");
                    all_nodes.extend(nodes);
                }
                Err(e) => {
                    warn!(source = source.name, error = %e, "source unparsable");
                    source_errors.push((source.name.clone(), e.to_string()));
                }
            }
        }
        let fetch_ms = fetch_started.elapsed().as_millis() as u64;
        let input_node_count = all_nodes.len();

        self.snapshot("raw_nodes.json", &all_nodes);

        // 2. 去重
        let mut nodes = dedup(all_nodes, &DedupOptions::default());
        let valid_node_count = nodes.len();

        // 3. 第一遍分类（只有名字可用），给探测器一个国家暗示
        for node in nodes.iter_mut() {
            let c = classify::classify(node);
            classify::apply_tags(node, &c);
        }

        // 4. 探测
        let probe_started = Instant::now();
        let locator = Arc::new(IpLocator::new(
            config.provider_pool(),
            DiskCache::new(config.ip_cache_dir()),
            config.locate.cache_ttl_days,
        ));
        locator.purge_expired().await;

        let prober = Prober::new(config.probe_config(), Some(locator.clone()));
        let outcomes = prober.probe_all(&nodes).await;
        apply_probe_outcomes(&mut nodes, outcomes);
        let probe_ms = probe_started.elapsed().as_millis() as u64;

        self.snapshot("test_report.json", &probe_report(&nodes));

        // 5. 过滤：up、延迟上限、数量上限
        let mut survivors: Vec<Node> = nodes.into_iter().filter(|n| n.is_up()).collect();
        if let Some(max_latency) = config.probe.max_latency_ms {
            survivors.retain(|n| {
                n.probe
                    .as_ref()
                    .and_then(|p| p.latency_ms)
                    .map(|l| l <= max_latency)
                    .unwrap_or(false)
            });
        }
        if let Some(max_nodes) = config.probe.max_nodes {
            survivors.truncate(max_nodes);
        }

        // 6. 补齐 geo（探测没给出的用名字暗示），再剔除排除辖区
        for node in survivors.iter_mut() {
            if node.country_code().is_none() {
                if let Some(code) = classify::country_hint(&node.display_name) {
                    let name = classify::country_entry(code)
                        .map(|e| e.name.to_string())
                        .unwrap_or_else(|| code.to_string());
                    node.geo = Some(GeoInfo {
                        country_code: Some(code.to_string()),
                        country_name: name,
                        ..GeoInfo::others()
                    });
                }
            }
        }
        // 收割池在剔除前留底：排除辖区恰好就是出境辖区，剔完就没得收了
        let harvest_pool = survivors.clone();
        let exclude = config.exclude_country.as_str();
        if !exclude.is_empty() {
            survivors.retain(|n| n.country_code() != Some(exclude));
        }

        // 7. 终分类、按国家重编号、分组
        for node in survivors.iter_mut() {
            let c = classify::classify(node);
            classify::apply_tags(node, &c);
        }
        namer::rename_all(&mut survivors, &config.classify.name_template);
        let groups = group::build_groups(
            &survivors,
            &config.group.meta_groups,
            &config.group.shortlist,
        );

        // 8. 物化；终选为空时跳过生成（gen_time 省略）
        let emit_started = Instant::now();
        let (artifacts_written, gen_time_ms, emit_ms) = if survivors.is_empty() {
            warn!("no surviving nodes, artifact generation skipped");
            (0, None, 0)
        } else {
            let emit_config = EmitConfig {
                output_dir: config.emit.output_dir.clone(),
                clients: config.emit.clients.clone(),
            };
            let report = emit::emit_all(&emit_config, &groups, &survivors)
                .map_err(|e| Error::System(e.to_string()))?;
            for error in &report.errors {
                warn!(error = %error, "artifact conversion failed");
            }
            let elapsed = emit_started.elapsed().as_millis() as u64;
            (report.written.len(), Some(elapsed), elapsed)
        };

        self.snapshot("final_nodes.json", &survivors);

        // 9. 出境代理收割——位置纠正完成之后、辖区剔除前的池子
        if let Err(e) = egress::rewrite_cache(
            &config.egress_cache_path(),
            &harvest_pool,
            &config.egress_country,
        ) {
            warn!(error = %e, "egress cache rewrite failed");
        }

        // 10. 状态持久化 + 完成事件
        let final_node_count = survivors.len();
        let status = SyncStatus {
            last_run_at: chrono::Utc::now(),
            input_node_count,
            valid_node_count,
            final_node_count,
            durations: Durations {
                fetch_ms,
                probe_ms,
                emit_ms,
            },
            gen_time_ms,
        };
        status
            .persist(&config.sync_status_path())
            .map_err(|e| Error::System(format!("sync status persist: {}", e)))?;

        let summary = SyncSummary {
            node_count: final_node_count,
            previous_node_count: previous.map(|p| p.final_node_count).unwrap_or(0),
            regions_count: distinct_regions(&survivors),
            protocols_count: distinct_protocols(&survivors),
            fetch_ms,
            probe_ms,
            emit_ms,
        };
        self.emit_event(Event::SyncCompleted(summary)).await;

        Ok(SyncOutcome {
            input_node_count,
            valid_node_count,
            final_node_count,
            artifacts_written,
            source_errors,
        })
    }

    async fn emit_event(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(&event).await;
        }
    }

    /// 调试快照，写失败只记日志
    fn snapshot<T: serde::Serialize>(&self, name: &str, value: &T) {
        let dir = self.config.data_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(error = %e, "data dir creation failed");
            return;
        }
        let path = dir.join(name);
        match serde_json::to_string_pretty(value) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(path = %path.display(), error = %e, "snapshot write failed");
                }
            }
            Err(e) => warn!(error = %e, "snapshot serialization failed"),
        }
    }
}

/// 探测结果写回节点；位置不符的做旗帜纠正
fn apply_probe_outcomes(nodes: &mut [Node], outcomes: Vec<ProbeOutcome>) {
    for outcome in outcomes {
        let Some(node) = nodes.get_mut(outcome.index) else {
            continue;
        };
        node.probe = Some(ProbeInfo {
            status: outcome.status,
            latency_ms: outcome.latency_ms,
            error: outcome.error,
            probed_at: chrono::Utc::now(),
        });
        match (outcome.location_mismatch, outcome.actual_geo) {
            (true, Some(actual)) => namer::apply_location_correction(node, actual),
            (false, Some(actual)) => node.geo = Some(actual),
            _ => {}
        }
    }
}

#[derive(serde::Serialize)]
struct ProbeReportEntry {
    name: String,
    server: String,
    port: u16,
    protocol: String,
    status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn probe_report(nodes: &[Node]) -> Vec<ProbeReportEntry> {
    nodes
        .iter()
        .filter_map(|n| {
            let probe = n.probe.as_ref()?;
            Some(ProbeReportEntry {
                name: n.display_name.clone(),
                server: n.server.clone(),
                port: n.port,
                protocol: n.protocol.as_str().to_string(),
                status: probe.status,
                latency_ms: probe.latency_ms,
                error: probe.error.clone(),
            })
        })
        .collect()
}

fn distinct_regions(nodes: &[Node]) -> usize {
    let mut codes: Vec<&str> = Vec::new();
    for node in nodes {
        if let Some(code) = node.country_code() {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    }
    codes.len()
}

fn distinct_protocols(nodes: &[Node]) -> usize {
    let mut protocols = Vec::new();
    for node in nodes {
        if !protocols.contains(&node.protocol) {
            protocols.push(node.protocol);
        }
    }
    protocols.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Protocol, ProxySettings};

    fn node(name: &str, server: &str, protocol: Protocol) -> Node {
        Node::new(
            protocol,
            name,
            server,
            443,
            ProxySettings::Trojan {
                password: "p".into(),
                sni: None,
                allow_insecure: false,
            },
        )
    }

    #[test]
    fn outcomes_applied_by_index() {
        let mut nodes = vec![node("a", "1.1.1.1", Protocol::Trojan), node("b", "2.2.2.2", Protocol::Trojan)];
        let outcomes = vec![
            ProbeOutcome {
                index: 1,
                status: ProbeStatus::Up,
                latency_ms: Some(120),
                error: None,
                location_mismatch: false,
                actual_geo: None,
            },
            ProbeOutcome {
                index: 0,
                status: ProbeStatus::Down,
                latency_ms: None,
                error: Some("timeout".into()),
                location_mismatch: false,
                actual_geo: None,
            },
        ];
        apply_probe_outcomes(&mut nodes, outcomes);
        assert!(!nodes[0].is_up());
        assert!(nodes[1].is_up());
        assert_eq!(nodes[1].probe.as_ref().unwrap().latency_ms, Some(120));
    }

    #[test]
    fn mismatch_triggers_flag_correction() {
        let mut nodes = vec![node("🇺🇸 fast", "1.1.1.1", Protocol::Trojan)];
        let outcomes = vec![ProbeOutcome {
            index: 0,
            status: ProbeStatus::Up,
            latency_ms: Some(50),
            error: None,
            location_mismatch: true,
            actual_geo: Some(GeoInfo {
                country_code: Some("JP".into()),
                country_name: "Japan".into(),
                ..GeoInfo::others()
            }),
        }];
        apply_probe_outcomes(&mut nodes, outcomes);
        assert!(nodes[0].display_name.starts_with("🇯🇵"));
        assert_eq!(nodes[0].country_code(), Some("JP"));
        assert_eq!(nodes[0].raw_display_name.as_deref(), Some("🇺🇸 fast"));
    }

    #[test]
    fn distinct_counts() {
        let mut a = node("a", "1.1.1.1", Protocol::Trojan);
        a.geo = Some(GeoInfo {
            country_code: Some("US".into()),
            country_name: "US".into(),
            ..GeoInfo::others()
        });
        let mut b = node("b", "2.2.2.2", Protocol::Vmess);
        b.geo = a.geo.clone();
        let c = node("c", "3.3.3.3", Protocol::Trojan);
        let nodes = vec![a, b, c];
        assert_eq!(distinct_regions(&nodes), 1);
        assert_eq!(distinct_protocols(&nodes), 2);
    }
}
