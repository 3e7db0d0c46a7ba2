use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime: u64,
    pub environment: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// 组产物目录存在且非空
    pub artifacts: &'static str,
    /// sync_status.json 可读
    pub sync_status: &'static str,
}

impl HealthChecks {
    pub fn all_up(&self) -> bool {
        self.artifacts == "up" && self.sync_status == "up"
    }
}
