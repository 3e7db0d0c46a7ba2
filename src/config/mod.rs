//! 配置加载
//!
//! YAML 文件 + 环境变量覆盖。文件不存在按全默认跑。
//! 识别的环境变量：`BARK_URL` `BARK_TITLE` `IP_API_URL` `IP_API_KEY`
//! `LOG_LEVEL`。

pub mod types;

use std::path::Path;

use anyhow::Result;
use tracing::debug;

pub use types::{AppConfig, SourceKind, SubscriptionSource};

pub fn load_config(path: &str) -> Result<AppConfig> {
    let mut config = if Path::new(path).exists() {
        let content = std::fs::read_to_string(path)?;
        serde_yml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("config '{}' invalid: {}", path, e))?
    } else {
        debug!(path, "config file absent, using defaults");
        AppConfig::default()
    };

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = std::env::var("LOG_LEVEL") {
        if !v.is_empty() {
            config.log.level = v;
        }
    }
    if let Ok(v) = std::env::var("BARK_URL") {
        if !v.is_empty() {
            config.notify.bark_url = Some(v);
        }
    }
    if let Ok(v) = std::env::var("BARK_TITLE") {
        if !v.is_empty() {
            config.notify.bark_title = Some(v);
        }
    }
    if let Ok(v) = std::env::var("IP_API_URL") {
        if !v.is_empty() {
            config.locate.api_url = Some(v);
        }
    }
    if let Ok(v) = std::env::var("IP_API_KEY") {
        if !v.is_empty() {
            config.locate.api_key = Some(v);
        }
    }
}
