use thiserror::Error;

/// 管道错误分类
///
/// 每个阶段有自己的变体，处理策略见各模块：
/// - Fetch / Parse / Validation / Locate / Probe 逐项记录后继续
/// - Conversion 只要至少产出一个 artifact 就不算失败
/// - System 致命，进程以非零码退出
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fetch failed for '{url}': {reason}")]
    Fetch { url: String, reason: String },

    #[error("parse error near '{prefix}': {reason}")]
    Parse { prefix: String, reason: String },

    #[error("invalid node: {0}")]
    Validation(String),

    #[error("geolocation failed: {0}")]
    Locate(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("artifact conversion failed for '{artifact}': {reason}")]
    Conversion { artifact: String, reason: String },

    #[error("system error: {0}")]
    System(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// 构造 Parse 错误，prefix 截断到 32 字符
    pub fn parse(offender: &str, reason: impl Into<String>) -> Self {
        let prefix: String = offender.chars().take(32).collect();
        Error::Parse {
            prefix,
            reason: reason.into(),
        }
    }

    pub fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn conversion(artifact: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Conversion {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        std::io::Error::other(e.to_string())
    }
}
