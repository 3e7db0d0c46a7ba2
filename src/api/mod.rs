//! HTTP 门面
//!
//! 只读地暴露物化产物：
//! - `/groups/{name}` 组 URI 列表（附件下载）
//! - `/mihomo`（旧 `/clash`）`/surge` `/singbox` `/v2ray` 客户端配置
//! - `/api/status` `/api/health` 运行状态
//! - `/gh-proxy/{*rest}` 透明 GET 代理到 raw.githubusercontent.com
//! - `/{HK|US|SG|TW|JP|Others}` 快捷路径
//!
//! 所有响应带宽松 CORS。

pub mod handlers;
pub mod models;

use std::time::Instant;

use anyhow::Result;
use axum::routing::get;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config::AppConfig;

use handlers::AppState;

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/groups/{name}", get(handlers::get_group))
        .route("/mihomo", get(handlers::get_mihomo))
        .route("/clash", get(handlers::get_mihomo))
        .route("/surge", get(handlers::get_surge))
        .route("/singbox", get(handlers::get_singbox))
        .route("/v2ray", get(handlers::get_v2ray))
        .route("/api/status", get(handlers::api_status))
        .route("/api/health", get(handlers::api_health))
        .route("/gh-proxy/{*rest}", get(handlers::gh_proxy))
        .route("/{code}", get(handlers::shortcut))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 启动门面服务器，返回任务句柄
pub fn start(config: &AppConfig) -> Result<JoinHandle<()>> {
    let state = AppState {
        output_dir: config.emit.output_dir.clone(),
        data_dir: config.emit.data_dir.clone(),
        start_time: Instant::now(),
        shortcut_base: config.api.shortcut_base.clone(),
    };
    let app = router(state);
    let bind_addr = format!("{}:{}", config.api.listen, config.api.port);
    info!(addr = bind_addr, "API server starting");

    let handle = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = bind_addr, error = %e, "API server bind failed");
                return;
            }
        };
        info!(addr = bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });

    Ok(handle)
}
