//! 全局日志安装。
//!
//! # 教案式说明
//! - **意图（Why）**：诊断输出全部走 `tracing`，详细级别由 `-v` 决定，运维仍可用
//!   `RUST_LOG` 覆盖；
//! - **逻辑（How）**：`registry + EnvFilter + fmt` 三层组合，`fmt` 层写入 stderr，
//!   stdout 留给详细级别下的原始数据转储；
//! - **契约（What）**：重复安装返回 [`LoggingError::AlreadyInstalled`]，不会 panic。

use thiserror::Error;
use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
};

use crate::config::Verbosity;

/// 日志安装失败。
#[derive(Debug, Error)]
pub enum LoggingError {
    /// 进程内已经存在全局 Subscriber。
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled(#[source] TryInitError),
}

/// 详细级别对应的默认过滤指令。
pub fn default_directive(verbosity: Verbosity) -> &'static str {
    match verbosity.level() {
        0 => "warn",
        1 => "info",
        _ => "trace",
    }
}

/// `RUST_LOG` 优先，否则按详细级别构造过滤器。
pub fn build_env_filter(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)))
}

/// 安装全局 Subscriber。
pub fn install(verbosity: Verbosity) -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(build_env_filter(verbosity))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(LoggingError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_directives() {
        assert_eq!(default_directive(Verbosity::new(0)), "warn");
        assert_eq!(default_directive(Verbosity::new(1)), "info");
        assert_eq!(default_directive(Verbosity::new(2)), "trace");
    }
}
