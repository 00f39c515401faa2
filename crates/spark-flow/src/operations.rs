//! Flow 回调槽位与事件处理契约。
//!
//! # 模块定位（Why）
//! - 事件循环按“槽位”决定为某个 Flow 派发哪些事件：只有安装了 `READABLE` 槽位的
//!   Flow 才会收到可读通知；
//! - 槽位的变更必须通过显式的 `set_operations` 调用告知事件循环，事件循环不会自行
//!   重新读取处理器的状态。
//!
//! # 核心组成（What）
//! - [`OperationSet`]：槽位位集；
//! - [`FlowHandler`]：每个 Flow 一个的事件处理器，替代裸函数指针；
//! - [`FlowScope`]：派发期间交给处理器的操作面，可读取数据、更新槽位、释放 Flow；
//! - [`FlowOperations`]：首次安装时的“槽位 + 处理器”组合。

use core::fmt;

use crate::{
    error::FlowError,
    flow::{FlowId, FlowInfo},
};

/// 回调槽位位集。
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OperationSet {
    bits: u8,
}

impl OperationSet {
    /// 连接建立。
    pub const CONNECTED: Self = Self { bits: 1 };
    /// 有数据可读（或对端关闭）。
    pub const READABLE: Self = Self { bits: 1 << 1 };
    /// 可写。
    pub const WRITABLE: Self = Self { bits: 1 << 2 };
    /// 传输层致命错误。
    pub const ERROR: Self = Self { bits: 1 << 3 };

    const NAMED: [(Self, &'static str); 4] = [
        (Self::CONNECTED, "on_connected"),
        (Self::READABLE, "on_readable"),
        (Self::WRITABLE, "on_writable"),
        (Self::ERROR, "on_error"),
    ];

    /// 空槽位集。
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// 是否包含 `other` 的全部槽位。
    pub const fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// 并集。
    pub const fn with(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// 差集。
    pub const fn without(self, other: Self) -> Self {
        Self {
            bits: self.bits & !other.bits,
        }
    }

    /// 是否为空。
    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }
}

impl fmt::Debug for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (slot, name) in Self::NAMED {
            if self.contains(slot) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// 派发期间交给处理器的操作面。
///
/// # 教案式说明
/// - **意图（Why）**：处理器需要在回调内部读取数据、调整槽位或释放 Flow，但事件循环
///   此时正持有上下文；以短生命周期的 `&mut dyn FlowScope` 交出受限能力，避免全局状态。
/// - **契约（What）**：
///   - `read` 为有界非阻塞读：最多写入 `buf.len()` 字节；`Ok(0)` 表示对端有序关闭，
///     [`ErrorCode::WouldBlock`](crate::ErrorCode::WouldBlock) 表示暂无数据；
///   - `set_operations` 立即生效，下一次派发按新槽位进行；
///   - `release_flow` 在回调返回后释放 Flow 及其处理器，之后该 [`FlowId`] 失效；
///   - `stop` 请求事件循环在本次派发后返回。
pub trait FlowScope {
    /// 当前 Flow。
    fn flow(&self) -> FlowId;

    /// 协商结果，连接建立前为 `None`。
    fn info(&self) -> Option<&FlowInfo>;

    /// 当前安装的槽位。
    fn operations(&self) -> OperationSet;

    /// 执行一次有界非阻塞读。
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FlowError>;

    /// 显式更新槽位。
    fn set_operations(&mut self, operations: OperationSet) -> Result<(), FlowError>;

    /// 在回调返回后释放 Flow。
    fn release_flow(&mut self);

    /// 请求事件循环返回。
    fn stop(&mut self);
}

/// 每个 Flow 的事件处理器。
///
/// # 契约（What）
/// - 只有安装了对应槽位的事件才会被派发；
/// - 所有方法必须迅速返回，不得阻塞事件循环线程；
/// - 返回 `Err` 表示致命错误：事件循环停止派发并把错误交还给 `run` 的调用方，由其
///   完成有序清理。`on_error` 默认直接向上传播。
pub trait FlowHandler {
    /// 连接建立。
    fn on_connected(&mut self, scope: &mut dyn FlowScope) -> Result<(), FlowError> {
        let _ = scope;
        Ok(())
    }

    /// 有数据可读或对端关闭。
    fn on_readable(&mut self, scope: &mut dyn FlowScope) -> Result<(), FlowError> {
        let _ = scope;
        Ok(())
    }

    /// 可写。
    fn on_writable(&mut self, scope: &mut dyn FlowScope) -> Result<(), FlowError> {
        let _ = scope;
        Ok(())
    }

    /// 传输层致命错误。
    fn on_error(&mut self, scope: &mut dyn FlowScope, error: FlowError) -> Result<(), FlowError> {
        let _ = scope;
        Err(error)
    }
}

/// 首次安装到 Flow 上的回调集合。
pub struct FlowOperations {
    slots: OperationSet,
    handler: Box<dyn FlowHandler>,
}

impl FlowOperations {
    /// 以处理器构造，初始槽位为空。
    pub fn new(handler: impl FlowHandler + 'static) -> Self {
        Self {
            slots: OperationSet::empty(),
            handler: Box::new(handler),
        }
    }

    /// 设置槽位。
    pub fn with_slots(mut self, slots: OperationSet) -> Self {
        self.slots = slots;
        self
    }

    /// 当前槽位。
    pub fn slots(&self) -> OperationSet {
        self.slots
    }

    /// 拆解为槽位与处理器，供后端存储。
    pub fn into_parts(self) -> (OperationSet, Box<dyn FlowHandler>) {
        (self.slots, self.handler)
    }
}

impl fmt::Debug for FlowOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowOperations")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_algebra() {
        let awaiting = OperationSet::CONNECTED.with(OperationSet::ERROR);
        assert!(awaiting.contains(OperationSet::ERROR));
        assert!(!awaiting.contains(OperationSet::READABLE));
        let cleared = awaiting.without(OperationSet::CONNECTED).without(OperationSet::ERROR);
        assert!(cleared.is_empty());
    }

    #[test]
    fn debug_lists_slot_names() {
        let slots = OperationSet::READABLE.with(OperationSet::ERROR);
        assert_eq!(format!("{slots:?}"), "{on_readable, on_error}");
    }
}
