//! 事件定义与下沉
//!
//! 叶子模块：事件类型和 sink trait 都在这里，通知客户端和编排器
//! 各自 import 本模块，不互相依赖。sink 是编排器的构造参数，
//! 没有全局事件总线。

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    SyncStarted,
    SyncCompleted,
    SystemError,
}

/// 完成事件携带的运行摘要
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub node_count: usize,
    pub previous_node_count: usize,
    pub regions_count: usize,
    pub protocols_count: usize,
    pub fetch_ms: u64,
    pub probe_ms: u64,
    pub emit_ms: u64,
}

#[derive(Debug, Clone)]
pub enum Event {
    SyncStarted { source_count: usize },
    SyncCompleted(SyncSummary),
    SystemError { message: String },
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::SyncStarted { .. } => EventType::SyncStarted,
            Event::SyncCompleted(_) => EventType::SyncCompleted,
            Event::SystemError { .. } => EventType::SystemError,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &Event);
}

/// 默认 sink：结构化日志
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn emit(&self, event: &Event) {
        match event {
            Event::SyncStarted { source_count } => {
                info!(sources = source_count, "sync started");
            }
            Event::SyncCompleted(summary) => {
                let delta = summary.node_count as i64 - summary.previous_node_count as i64;
                info!(
                    nodes = summary.node_count,
                    delta,
                    regions = summary.regions_count,
                    protocols = summary.protocols_count,
                    fetch_ms = summary.fetch_ms,
                    probe_ms = summary.probe_ms,
                    emit_ms = summary.emit_ms,
                    "sync completed"
                );
            }
            Event::SystemError { message } => {
                error!(message = message.as_str(), "sync failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types() {
        assert_eq!(
            Event::SyncStarted { source_count: 1 }.event_type(),
            EventType::SyncStarted
        );
        assert_eq!(
            Event::SystemError {
                message: "x".into()
            }
            .event_type(),
            EventType::SystemError
        );
    }

    #[tokio::test]
    async fn log_sink_does_not_panic() {
        let sink = LogSink;
        sink.emit(&Event::SyncCompleted(SyncSummary::default())).await;
    }
}
