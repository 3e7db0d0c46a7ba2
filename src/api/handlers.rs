use std::path::PathBuf;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use tracing::{debug, warn};

use crate::app::status::SyncStatus;

use super::models::{HealthChecks, HealthResponse, StatusResponse};

/// 快捷路径表：短码 → 已发布的组产物
pub const SHORTCUTS: &[&str] = &["HK", "US", "SG", "TW", "JP", "Others"];

#[derive(Clone)]
pub struct AppState {
    pub output_dir: PathBuf,
    pub data_dir: PathBuf,
    pub start_time: Instant,
    /// 配置后快捷路径 302 到 `<base>/<code>.txt`，否则回落到本地文件
    pub shortcut_base: Option<String>,
}

// ─── 组文件 ───

/// GET /groups/{name}
pub async fn get_group(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    serve_group_file(&state, &name)
}

fn serve_group_file(state: &AppState, name: &str) -> Response {
    let path = crate::emit::group_file_path(&state.output_dir, name);
    match std::fs::read_to_string(&path) {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}.txt\"", name),
                ),
            ],
            body,
        )
            .into_response(),
        Err(_) => {
            debug!(group = name, "group file not found");
            (StatusCode::NOT_FOUND, "group not found").into_response()
        }
    }
}

// ─── 客户端配置 ───

pub async fn get_mihomo(State(state): State<AppState>) -> Response {
    serve_client(&state, "mihomo.yaml", "text/yaml; charset=utf-8")
}

pub async fn get_surge(State(state): State<AppState>) -> Response {
    serve_client(&state, "surge.conf", "text/plain; charset=utf-8")
}

pub async fn get_singbox(State(state): State<AppState>) -> Response {
    serve_client(&state, "singbox.json", "application/json")
}

pub async fn get_v2ray(State(state): State<AppState>) -> Response {
    serve_client(&state, "v2ray.json", "application/json")
}

fn serve_client(state: &AppState, file: &str, content_type: &str) -> Response {
    let path = state.output_dir.join(file);
    match std::fs::read_to_string(&path) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type.to_string())],
            body,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "config not generated yet").into_response(),
    }
}

// ─── 状态 ───

/// GET /api/status
pub async fn api_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.start_time.elapsed().as_secs(),
        environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "production".to_string()),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /api/health；任一子检查 down 则 503
pub async fn api_health(State(state): State<AppState>) -> Response {
    let groups_dir = state.output_dir.join("groups");
    let artifacts = match std::fs::read_dir(&groups_dir) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                "up"
            } else {
                "down"
            }
        }
        Err(_) => "down",
    };
    let sync_status = if SyncStatus::load(&state.data_dir.join("sync_status.json")).is_some() {
        "up"
    } else {
        "down"
    };

    let checks = HealthChecks {
        artifacts,
        sync_status,
    };
    let all_up = checks.all_up();
    let body = HealthResponse {
        status: if all_up { "ok" } else { "degraded" },
        checks,
    };
    let code = if all_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

// ─── gh-proxy ───

/// GET /gh-proxy/{*rest}：透传到 raw.githubusercontent.com
pub async fn gh_proxy(Path(rest): Path<String>) -> Response {
    let upstream = format!("https://raw.githubusercontent.com/{}", rest);
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(20))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "gh-proxy client build failed");
            return (StatusCode::BAD_GATEWAY, "proxy unavailable").into_response();
        }
    };

    match client.get(&upstream).send().await {
        Ok(resp) => {
            let status =
                StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            match resp.bytes().await {
                Ok(bytes) => (
                    status,
                    [(header::CONTENT_TYPE, content_type)],
                    bytes.to_vec(),
                )
                    .into_response(),
                Err(e) => {
                    warn!(error = %e, "gh-proxy body read failed");
                    (StatusCode::BAD_GATEWAY, "upstream read failed").into_response()
                }
            }
        }
        Err(e) => {
            warn!(upstream, error = %e, "gh-proxy upstream failed");
            (StatusCode::BAD_GATEWAY, "upstream unreachable").into_response()
        }
    }
}

// ─── 快捷路径 ───

/// GET /{HK|US|SG|TW|JP|Others}
pub async fn shortcut(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    if !SHORTCUTS.contains(&code.as_str()) {
        return (StatusCode::NOT_FOUND, "unknown shortcut").into_response();
    }
    match &state.shortcut_base {
        Some(base) => {
            let target = format!("{}/{}.txt", base.trim_end_matches('/'), code);
            Redirect::temporary(&target).into_response()
        }
        None => serve_group_file(&state, &code),
    }
}
