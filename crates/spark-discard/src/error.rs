//! 服务端错误分类。
//!
//! # 教案式说明
//! - **意图（Why）**：区分“启动前的配置错误”“资源分配失败”“建立阶段某一步失败”与
//!   “运行期致命传输错误”，让二进制入口统一决定退出码，回调内部不再直接退出进程；
//! - **契约（What）**：所有变体的退出码均为非零，见 [`ServerError::exit_code`]。

use std::{collections::TryReserveError, fmt};

use spark_flow::FlowError;
use thiserror::Error;

use crate::{capability::CapabilityParseError, logging::LoggingError, registry::RegistryError};

/// 建立阶段的步骤，按执行顺序排列。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupStep {
    /// 创建传输上下文。
    InitContext,
    /// 创建 Flow。
    NewFlow,
    /// 读取默认需求。
    GetRequirements,
    /// 写入需求。
    SetRequirements,
    /// 安装初始回调。
    SetOperations,
    /// 请求被动接受。
    Accept,
}

impl SetupStep {
    pub const fn name(self) -> &'static str {
        match self {
            Self::InitContext => "init_ctx",
            Self::NewFlow => "new_flow",
            Self::GetRequirements => "get_property",
            Self::SetRequirements => "set_property",
            Self::SetOperations => "set_operations",
            Self::Accept => "accept",
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 命令行配置错误，发生在创建任何传输资源之前。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 参数不合法（未知选项、多余的位置参数、取值越界等），也包括 `--help`。
    #[error(transparent)]
    Arguments(#[from] clap::Error),
    /// 能力请求串中存在未知名称。
    #[error("error - {0}")]
    Capability(#[from] CapabilityParseError),
}

impl ConfigError {
    /// 是否只是帮助或版本信息请求。
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            Self::Arguments(error) if matches!(
                error.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            )
        )
    }
}

/// 服务端统一错误类型。
#[derive(Debug, Error)]
pub enum ServerError {
    /// 配置错误。
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// 读缓冲区分配失败。
    #[error("failed to allocate a {capacity}-byte read buffer")]
    Allocation {
        capacity: usize,
        #[source]
        source: TryReserveError,
    },
    /// 建立阶段的某一步失败。
    #[error("{step} failed: {source}")]
    Setup {
        step: SetupStep,
        #[source]
        source: FlowError,
    },
    /// 事件循环运行期间的致命传输错误。
    #[error("transport failure: {0}")]
    Transport(#[source] FlowError),
    /// 回调状态机被驱动到非法状态。
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// 日志系统安装失败。
    #[error(transparent)]
    Logging(#[from] LoggingError),
}

impl ServerError {
    /// 进程退出码；成功路径不经过此处，所有失败统一为 `1`。
    pub const fn exit_code(&self) -> u8 {
        1
    }

    /// 建立阶段失败时返回失败的步骤。
    pub fn setup_step(&self) -> Option<SetupStep> {
        match self {
            Self::Setup { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// 底层 Flow 错误（若有）。
    pub fn flow_error(&self) -> Option<&FlowError> {
        match self {
            Self::Setup { source, .. } | Self::Transport(source) => Some(source),
            _ => None,
        }
    }

    pub(crate) fn setup(step: SetupStep) -> impl FnOnce(FlowError) -> Self {
        move |source| Self::Setup { step, source }
    }
}
