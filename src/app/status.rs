//! 同步状态持久化
//!
//! 每轮结束写 `data/sync_status.json`；下一轮读上一次的
//! `final_node_count` 算增减量给完成通知用。跳过产物生成的轮次
//! `gen_time_ms` 整个省略，不写 0。

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Durations {
    pub fetch_ms: u64,
    pub probe_ms: u64,
    pub emit_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_run_at: DateTime<Utc>,
    pub input_node_count: usize,
    pub valid_node_count: usize,
    pub final_node_count: usize,
    pub durations: Durations,
    /// 产物生成耗时；该轮没有生成时省略
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_time_ms: Option<u64>,
}

impl SyncStatus {
    pub fn load(path: &Path) -> Option<SyncStatus> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(status) => Some(status),
            Err(e) => {
                debug!(error = %e, "sync status unreadable, treating as first run");
                None
            }
        }
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(final_count: usize, gen_time: Option<u64>) -> SyncStatus {
        SyncStatus {
            last_run_at: Utc::now(),
            input_node_count: 100,
            valid_node_count: 80,
            final_node_count: final_count,
            durations: Durations {
                fetch_ms: 1000,
                probe_ms: 5000,
                emit_ms: 50,
            },
            gen_time_ms: gen_time,
        }
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_status.json");
        status(42, Some(50)).persist(&path).unwrap();
        let loaded = SyncStatus::load(&path).unwrap();
        assert_eq!(loaded.final_node_count, 42);
        assert_eq!(loaded.gen_time_ms, Some(50));
    }

    #[test]
    fn gen_time_omitted_when_generation_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_status.json");
        status(0, None).persist(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("gen_time_ms"));
    }

    #[test]
    fn missing_file_is_first_run() {
        assert!(SyncStatus::load(Path::new("/nonexistent/s.json")).is_none());
    }

    #[test]
    fn corrupt_file_is_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_status.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SyncStatus::load(&path).is_none());
    }
}
