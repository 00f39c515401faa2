//! 传输上下文与事件循环契约。

use crate::{
    capability::CapabilityMask,
    error::{ErrorCode, FlowError, SET_PROPERTY},
    flow::{AcceptEndpoint, FlowId},
    operations::FlowOperations,
};

/// 事件循环的运行模式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunMode {
    /// 持续派发，直到被停止或不再有可派发的 Flow。
    #[default]
    Default,
    /// 阻塞直到派发一个事件后返回。
    Once,
    /// 只派发当前已就绪的事件，不阻塞。
    NoWait,
}

/// `run` 返回时事件循环所处的状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// 没有任何 Flow 在等待事件。
    Idle,
    /// 某个处理器调用了 [`FlowScope::stop`](crate::FlowScope::stop)。
    Stopped,
    /// `Once`/`NoWait` 模式下返回，仍有 Flow 在等待事件。
    Pending,
}

/// 传输上下文：Flow 生命周期、能力协商、被动接受与事件循环的统一入口。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 把协商库的调用面收敛为一个 trait，使服务端逻辑既能运行在真实的 Tokio 后端，
///   也能运行在脚本化的测试后端；
/// - 上下文自身的创建由具体实现的构造函数完成，销毁由 `Drop` 完成。
///
/// ## 契约（What）
/// - `new_flow`：分配新的 Flow，需求位图为后端默认值；
/// - `free_flow`：释放 Flow，返回是否真正发生了释放；对已释放或未知的 Flow 为空操作；
/// - `get_requirements`/`set_requirements`：读取/写入需求位图，写入时拒绝同时“需求 + 禁用”
///   同一属性的位图（[`ErrorCode::BadArgument`]）；
/// - `set_operations`：安装槽位与处理器，替换之前的安装；
/// - `accept`：请求在端点上被动接受连接，成功后由事件循环异步派发 `on_connected`；
/// - `run`：在调用线程上驱动事件循环；处理器返回的错误会终止循环并原样返回。
pub trait TransportContext {
    /// 分配新的 Flow。
    fn new_flow(&mut self) -> Result<FlowId, FlowError>;

    /// 释放 Flow。
    fn free_flow(&mut self, flow: FlowId) -> bool;

    /// Flow 是否仍然存活。
    fn is_live(&self, flow: FlowId) -> bool;

    /// 读取需求位图。
    fn get_requirements(&self, flow: FlowId) -> Result<CapabilityMask, FlowError>;

    /// 写入需求位图。
    fn set_requirements(&mut self, flow: FlowId, requirements: CapabilityMask)
    -> Result<(), FlowError>;

    /// 安装回调集合。
    fn set_operations(&mut self, flow: FlowId, operations: FlowOperations)
    -> Result<(), FlowError>;

    /// 请求被动接受连接。
    fn accept(&mut self, flow: FlowId, endpoint: &AcceptEndpoint) -> Result<(), FlowError>;

    /// 驱动事件循环。
    fn run(&mut self, mode: RunMode) -> Result<RunOutcome, FlowError>;
}

/// 校验需求位图中不存在互斥组合，供各后端的 `set_requirements` 复用。
pub fn validate_requirements(requirements: CapabilityMask) -> Result<(), FlowError> {
    match requirements.conflict() {
        Some((required, banned)) => Err(FlowError::new(
            ErrorCode::BadArgument,
            SET_PROPERTY,
            format!(
                "requirement bit {} conflicts with ban bit {}",
                required.index(),
                banned.index()
            ),
        )),
        None => Ok(()),
    }
}
