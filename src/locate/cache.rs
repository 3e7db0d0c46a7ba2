//! IP 定位磁盘缓存
//!
//! 按 IPv4 第一段分片（IPv6 和解析不出的进 `other` 桶），每片一个
//! JSON 文件，写一次重写一片。条目带 TTL，维护扫描时清掉过期的。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::node::GeoInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCacheEntry {
    pub ip: String,
    pub geo: GeoInfo,
    pub expires_at: DateTime<Utc>,
}

impl GeoCacheEntry {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn get(&self, ip: &str) -> Option<GeoCacheEntry> {
        let shard = self.load_shard(&shard_name(ip)).ok()?;
        let entry = shard.get(ip)?.clone();
        if entry.is_expired() {
            return None;
        }
        Some(entry)
    }

    pub fn put(&self, entry: &GeoCacheEntry) -> Result<()> {
        let name = shard_name(&entry.ip);
        let mut shard = self.load_shard(&name).unwrap_or_default();
        shard.insert(entry.ip.clone(), entry.clone());
        self.write_shard(&name, &shard)
    }

    /// 清掉所有分片里的过期条目，返回清除数量
    pub fn purge_expired(&self) -> Result<usize> {
        let mut purged = 0;
        if !self.dir.exists() {
            return Ok(0);
        }
        for dirent in std::fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            let Some(name) = shard_file_name(&path) else {
                continue;
            };
            let mut shard = self.load_shard(&name).unwrap_or_default();
            let before = shard.len();
            shard.retain(|_, entry| !entry.is_expired());
            if shard.len() != before {
                purged += before - shard.len();
                self.write_shard(&name, &shard)?;
            }
        }
        if purged > 0 {
            debug!(purged, "expired geo cache entries purged");
        }
        Ok(purged)
    }

    fn load_shard(&self, name: &str) -> Result<HashMap<String, GeoCacheEntry>> {
        let path = self.dir.join(format!("{}.json", name));
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_shard(&self, name: &str, shard: &HashMap<String, GeoCacheEntry>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", name));
        std::fs::write(path, serde_json::to_string(shard)?)?;
        Ok(())
    }
}

/// IPv4 取第一段，其余进 other 桶
fn shard_name(ip: &str) -> String {
    if let Ok(std::net::IpAddr::V4(v4)) = ip.parse::<std::net::IpAddr>() {
        return v4.octets()[0].to_string();
    }
    "other".to_string()
}

/// 代理缓存等非分片文件不参与清理
fn shard_file_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    if stem == "other" || stem.parse::<u8>().is_ok() {
        Some(stem.to_string())
    } else {
        None
    }
}
