//! 后端共享的 Flow 表。
//!
//! # 教案式说明
//! - **意图（Why）**：Tokio 后端与脚本化后端对 Flow 的记账方式完全一致（需求位图、槽位、
//!   处理器、协商结果），只有 IO 状态不同；抽出泛型表避免两处各写一份生命周期规则。
//! - **逻辑（How）**：`FlowTable<S>` 以 `BTreeMap` 保存条目，`S` 为后端特有的 IO 状态；
//!   派发时通过 [`FlowTable::take_handler`]/[`FlowTable::restore_handler`] 把处理器临时
//!   取出，使处理器与上下文的可变借用互不重叠。
//! - **契约（What）**：标识单调递增、不复用；对未知标识的操作返回
//!   [`ErrorCode::BadArgument`]，`remove` 对未知标识返回 `false`。

use std::collections::BTreeMap;

use crate::{
    capability::CapabilityMask,
    context::validate_requirements,
    error::{ErrorCode, FlowError, GET_PROPERTY, OperationKind, SET_OPERATIONS, SET_PROPERTY},
    flow::{FlowId, FlowInfo},
    operations::{FlowHandler, FlowOperations, OperationSet},
};

/// 单个 Flow 的记账条目。
pub struct FlowEntry<S> {
    requirements: CapabilityMask,
    slots: OperationSet,
    handler: Option<Box<dyn FlowHandler>>,
    info: Option<FlowInfo>,
    /// 后端特有的 IO 状态。
    pub state: S,
}

impl<S> FlowEntry<S> {
    /// 需求位图。
    pub fn requirements(&self) -> CapabilityMask {
        self.requirements
    }

    /// 当前槽位。
    pub fn slots(&self) -> OperationSet {
        self.slots
    }

    /// 更新槽位。
    pub fn set_slots(&mut self, slots: OperationSet) {
        self.slots = slots;
    }

    /// 协商结果。
    pub fn info(&self) -> Option<&FlowInfo> {
        self.info.as_ref()
    }

    /// 写入协商结果。
    pub fn set_info(&mut self, info: FlowInfo) {
        self.info = Some(info);
    }

    /// 是否安装了处理器。
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }
}

/// 后端共享的 Flow 表。
pub struct FlowTable<S> {
    entries: BTreeMap<FlowId, FlowEntry<S>>,
    next_id: u64,
    defaults: CapabilityMask,
}

impl<S> FlowTable<S> {
    /// 以新 Flow 的默认需求位图构造。
    pub fn new(defaults: CapabilityMask) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            defaults,
        }
    }

    /// 新 Flow 的默认需求位图。
    pub fn defaults(&self) -> CapabilityMask {
        self.defaults
    }

    /// 插入新条目并分配标识。
    pub fn insert(&mut self, state: S) -> FlowId {
        let id = FlowId::new(self.next_id);
        self.next_id += 1;
        tracing::trace!(flow = %id, "flow allocated");
        self.entries.insert(
            id,
            FlowEntry {
                requirements: self.defaults,
                slots: OperationSet::empty(),
                handler: None,
                info: None,
                state,
            },
        );
        id
    }

    /// 移除条目，返回是否真正移除。
    pub fn remove(&mut self, flow: FlowId) -> bool {
        let removed = self.entries.remove(&flow).is_some();
        if removed {
            tracing::trace!(%flow, "flow released");
        }
        removed
    }

    /// 是否存在该条目。
    pub fn contains(&self, flow: FlowId) -> bool {
        self.entries.contains_key(&flow)
    }

    /// 存活条目数量。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 只读访问条目。
    pub fn get(&self, flow: FlowId) -> Option<&FlowEntry<S>> {
        self.entries.get(&flow)
    }

    /// 可变访问条目。
    pub fn get_mut(&mut self, flow: FlowId) -> Option<&mut FlowEntry<S>> {
        self.entries.get_mut(&flow)
    }

    /// 按标识升序遍历。
    pub fn iter(&self) -> impl Iterator<Item = (FlowId, &FlowEntry<S>)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// 按标识升序可变遍历。
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FlowId, &mut FlowEntry<S>)> {
        self.entries.iter_mut().map(|(id, entry)| (*id, entry))
    }

    /// 查找条目，未知标识映射为 `BadArgument`。
    pub fn entry(&self, flow: FlowId, operation: OperationKind) -> Result<&FlowEntry<S>, FlowError> {
        self.entries
            .get(&flow)
            .ok_or_else(|| unknown_flow(flow, operation))
    }

    /// 可变查找条目，未知标识映射为 `BadArgument`。
    pub fn entry_mut(
        &mut self,
        flow: FlowId,
        operation: OperationKind,
    ) -> Result<&mut FlowEntry<S>, FlowError> {
        self.entries
            .get_mut(&flow)
            .ok_or_else(|| unknown_flow(flow, operation))
    }

    /// 读取需求位图。
    pub fn requirements(&self, flow: FlowId) -> Result<CapabilityMask, FlowError> {
        self.entry(flow, GET_PROPERTY).map(FlowEntry::requirements)
    }

    /// 校验并写入需求位图。
    pub fn set_requirements(
        &mut self,
        flow: FlowId,
        requirements: CapabilityMask,
    ) -> Result<(), FlowError> {
        validate_requirements(requirements)?;
        self.entry_mut(flow, SET_PROPERTY)?.requirements = requirements;
        Ok(())
    }

    /// 安装槽位与处理器。
    pub fn install(&mut self, flow: FlowId, operations: FlowOperations) -> Result<(), FlowError> {
        let entry = self.entry_mut(flow, SET_OPERATIONS)?;
        let (slots, handler) = operations.into_parts();
        entry.slots = slots;
        entry.handler = Some(handler);
        Ok(())
    }

    /// 派发前取出处理器。
    pub fn take_handler(&mut self, flow: FlowId) -> Option<Box<dyn FlowHandler>> {
        self.entries.get_mut(&flow)?.handler.take()
    }

    /// 派发后归还处理器；若 Flow 已在派发期间被移除则直接丢弃。
    pub fn restore_handler(&mut self, flow: FlowId, handler: Box<dyn FlowHandler>) {
        if let Some(entry) = self.entries.get_mut(&flow)
            && entry.handler.is_none()
        {
            entry.handler = Some(handler);
        }
    }
}

fn unknown_flow(flow: FlowId, operation: OperationKind) -> FlowError {
    FlowError::new(
        ErrorCode::BadArgument,
        operation,
        format!("{flow} is not live"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;

    struct Noop;
    impl FlowHandler for Noop {}

    #[test]
    fn new_flows_inherit_defaults_and_ids_are_not_reused() {
        let defaults = CapabilityMask::from(Capability::OPTIONAL_SECURITY);
        let mut table = FlowTable::new(defaults);
        let first = table.insert(());
        assert_eq!(table.requirements(first).ok(), Some(defaults));
        assert!(table.remove(first));
        assert!(!table.remove(first));
        let second = table.insert(());
        assert_ne!(first, second);
    }

    #[test]
    fn conflicting_requirements_are_rejected() {
        let mut table = FlowTable::new(CapabilityMask::empty());
        let flow = table.insert(());
        let mask = CapabilityMask::empty()
            .with(Capability::TCP_REQUIRED)
            .with(Capability::TCP_BANNED);
        let error = table.set_requirements(flow, mask).unwrap_err();
        assert_eq!(error.code(), ErrorCode::BadArgument);
        assert_eq!(table.requirements(flow).ok(), Some(CapabilityMask::empty()));
    }

    #[test]
    fn handler_is_not_restored_after_reinstall() {
        let mut table = FlowTable::new(CapabilityMask::empty());
        let flow = table.insert(());
        table
            .install(flow, FlowOperations::new(Noop).with_slots(OperationSet::READABLE))
            .unwrap();
        let handler = table.take_handler(flow).unwrap();
        assert!(!table.get(flow).unwrap().has_handler());
        table.restore_handler(flow, handler);
        assert!(table.get(flow).unwrap().has_handler());
        assert_eq!(table.get(flow).unwrap().slots(), OperationSet::READABLE);
    }
}
