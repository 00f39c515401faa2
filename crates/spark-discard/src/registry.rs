//! 单个 Flow 的回调状态机。
//!
//! # 教案式说明
//! - **意图（Why）**：事件循环只按“槽位”派发事件，而槽位的变化必须由调用方显式推送；
//!   把“当前处于哪个阶段、该阶段应安装哪些槽位”集中在一处，避免回调里散落位运算。
//! - **逻辑（How）**：每个状态对应固定的槽位集合；每次合法迁移返回新状态的槽位集合，
//!   调用方随后通过 `set_operations` 推送给事件循环。
//! - **契约（What）**：
//!   - `Idle → AwaitingConnect → Streaming → Closed` 为主路径；
//!   - 任何非终止状态都可因错误直接进入 `Closed`；
//!   - `Closed` 为终止状态，离开它的迁移一律返回 [`RegistryError::IllegalTransition`]。

use spark_flow::{ErrorCode, FlowError, OperationSet, error::SET_OPERATIONS};
use thiserror::Error;
use tracing::trace;

/// 回调状态。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlowState {
    /// 尚未安装回调。
    #[default]
    Idle,
    /// 等待连接建立。
    AwaitingConnect,
    /// 连接已建立，持续读取。
    Streaming,
    /// 已关闭或出错。
    Closed,
}

impl FlowState {
    /// 该状态应安装的槽位集合。
    pub const fn slots(self) -> OperationSet {
        match self {
            Self::Idle | Self::Closed => OperationSet::empty(),
            Self::AwaitingConnect => OperationSet::CONNECTED.with(OperationSet::ERROR),
            Self::Streaming => OperationSet::READABLE.with(OperationSet::ERROR),
        }
    }

    /// 是否为终止状态。
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    const fn allows(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::AwaitingConnect)
                | (Self::AwaitingConnect, Self::Streaming)
                | (Self::Idle | Self::AwaitingConnect | Self::Streaming, Self::Closed)
        )
    }
}

/// 非法的状态迁移。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// 当前状态不允许迁移到目标状态。
    #[error("illegal callback transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// 迁移前的状态。
        from: FlowState,
        /// 请求的目标状态。
        to: FlowState,
    },
}

impl From<RegistryError> for FlowError {
    fn from(error: RegistryError) -> Self {
        FlowError::new(ErrorCode::Internal, SET_OPERATIONS, error.to_string())
    }
}

/// 回调状态机。
#[derive(Clone, Debug, Default)]
pub struct CallbackRegistry {
    state: FlowState,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// 当前应安装的槽位集合。
    pub fn slots(&self) -> OperationSet {
        self.state.slots()
    }

    /// 首次安装：`Idle → AwaitingConnect`。
    pub fn install(&mut self) -> Result<OperationSet, RegistryError> {
        self.transition(FlowState::AwaitingConnect)
    }

    /// 连接建立：`AwaitingConnect → Streaming`。
    pub fn connected(&mut self) -> Result<OperationSet, RegistryError> {
        self.transition(FlowState::Streaming)
    }

    /// 对端关闭：`Streaming → Closed`。
    pub fn closed(&mut self) -> Result<OperationSet, RegistryError> {
        if self.state != FlowState::Streaming {
            return Err(RegistryError::IllegalTransition {
                from: self.state,
                to: FlowState::Closed,
            });
        }
        self.transition(FlowState::Closed)
    }

    /// 错误终止：任意非终止状态 `→ Closed`。
    pub fn fail(&mut self) -> Result<OperationSet, RegistryError> {
        self.transition(FlowState::Closed)
    }

    fn transition(&mut self, next: FlowState) -> Result<OperationSet, RegistryError> {
        if !self.state.allows(next) {
            return Err(RegistryError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        trace!(from = ?self.state, to = ?next, "callback state transition");
        self.state = next;
        Ok(next.slots())
    }
}
