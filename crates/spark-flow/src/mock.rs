//! 脚本化的确定性传输上下文，仅在 `test-util` 特性下编译。
//!
//! # 教案式说明
//!
//! ## 意图（Why）
//! - 服务端的读处理状态机需要覆盖“恰好填满缓冲区”“暂无数据”“致命错误”等难以用真实
//!   套接字稳定复现的分支；
//! - 以脚本描述每条入站连接的读结果，测试可以逐条断言回调顺序与释放次数。
//!
//! ## 逻辑（How）
//! - [`MockConnection`] 是一条入站连接的脚本，按 `accept` 的先后顺序分配给 Flow；
//! - 事件循环每次派发一个事件：先为等待中的 Flow 建立连接，再按脚本首步派发可读或错误；
//! - 所有契约调用写入共享的 [`MockJournal`]，上下文被移交给被测代码后仍可检查。
//!
//! ## 契约（What）
//! - `Data` 步骤按缓冲区容量分段读取，剩余部分保留在队首；
//! - `WouldBlock`/`Fail` 在被读取时消费；`Close` 之后的读取恒为 `Ok(0)`，且只通知一次；
//! - `Fault` 作为错误事件派发给 `on_error`；未安装 `ERROR` 槽位时直接从 `run` 返回；
//! - `Once` 与 `NoWait` 在本实现中均为“至多派发一个事件”。

use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    capability::CapabilityMask,
    context::{RunMode, RunOutcome, TransportContext},
    error::{
        ACCEPT, ErrorCode, FlowError, GET_PROPERTY, NEW_FLOW, OperationKind, READ, RUN,
        SET_OPERATIONS, SET_PROPERTY,
    },
    flow::{AcceptEndpoint, FlowId, FlowInfo, TransportProtocol},
    operations::{FlowOperations, FlowScope, OperationSet},
    table::FlowTable,
};

/// 一条入站连接的单个脚本步骤。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockStep {
    /// 可读数据。
    Data(Vec<u8>),
    /// 一次伪就绪：读取返回 `WouldBlock`。
    WouldBlock,
    /// 读取返回指定错误码。
    Fail(ErrorCode),
    /// 对端有序关闭。
    Close,
    /// 传输层致命错误，派发给 `on_error`。
    Fault(ErrorCode),
}

/// 一条入站连接的脚本。
#[derive(Clone, Debug)]
pub struct MockConnection {
    info: FlowInfo,
    steps: VecDeque<MockStep>,
}

impl MockConnection {
    /// 以协商结果构造空脚本。
    pub fn new(info: FlowInfo) -> Self {
        Self {
            info,
            steps: VecDeque::new(),
        }
    }

    /// 来自 `127.0.0.1:40000`、落在本地 `8080` 端口的 IPv4/TCP 连接。
    pub fn tcp_v4() -> Self {
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000);
        Self::new(FlowInfo::new(TransportProtocol::Tcp, local, peer))
    }

    /// 追加可读数据。
    pub fn data(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.steps.push_back(MockStep::Data(bytes.into()));
        self
    }

    /// 追加一次伪就绪。
    pub fn would_block(mut self) -> Self {
        self.steps.push_back(MockStep::WouldBlock);
        self
    }

    /// 追加一次读错误。
    pub fn fail(mut self, code: ErrorCode) -> Self {
        self.steps.push_back(MockStep::Fail(code));
        self
    }

    /// 追加对端关闭。
    pub fn close(mut self) -> Self {
        self.steps.push_back(MockStep::Close);
        self
    }

    /// 追加传输层错误事件。
    pub fn fault(mut self, code: ErrorCode) -> Self {
        self.steps.push_back(MockStep::Fault(code));
        self
    }
}

/// 可注入故障的契约操作。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MockOperation {
    /// `new_flow`。
    NewFlow,
    /// `get_requirements`。
    GetRequirements,
    /// `set_requirements`。
    SetRequirements,
    /// `set_operations`。
    SetOperations,
    /// `accept`。
    Accept,
    /// `run`。
    Run,
}

/// 派发给处理器的事件类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockEvent {
    /// `on_connected`。
    Connected,
    /// `on_readable`。
    Readable,
    /// `on_error`。
    Error(ErrorCode),
}

/// 日志中的一条契约调用记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    /// 分配了 Flow。
    NewFlow(FlowId),
    /// 释放了 Flow；`released` 为是否真正发生释放。
    FreeFlow { flow: FlowId, released: bool },
    /// 读取需求位图。
    GetRequirements(FlowId),
    /// 写入需求位图。
    SetRequirements(FlowId, CapabilityMask),
    /// 安装或更新槽位。
    SetOperations(FlowId, OperationSet),
    /// 请求被动接受。
    Accept(FlowId, AcceptEndpoint),
    /// 执行了一次读取。
    Read {
        flow: FlowId,
        result: Result<usize, ErrorCode>,
    },
    /// 派发了一个事件。
    Dispatch(FlowId, MockEvent),
    /// 进入事件循环。
    Run(RunMode),
}

/// 共享的调用日志。
#[derive(Clone, Debug, Default)]
pub struct MockJournal {
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockJournal {
    fn push(&self, call: MockCall) {
        self.lock().push(call);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MockCall>> {
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 全部调用记录的快照。
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().clone()
    }

    /// 某个 Flow 真正被释放的次数。
    pub fn releases(&self, flow: FlowId) -> usize {
        self.lock()
            .iter()
            .filter(|call| matches!(call, MockCall::FreeFlow { flow: f, released: true } if *f == flow))
            .count()
    }

    /// 某个 Flow 的读取结果序列。
    pub fn reads(&self, flow: FlowId) -> Vec<Result<usize, ErrorCode>> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::Read { flow: f, result } if *f == flow => Some(*result),
                _ => None,
            })
            .collect()
    }

    /// 某个 Flow 的槽位更新序列。
    pub fn operations(&self, flow: FlowId) -> Vec<OperationSet> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::SetOperations(f, slots) if *f == flow => Some(*slots),
                _ => None,
            })
            .collect()
    }

    /// `accept` 请求次数。
    pub fn accepts(&self) -> usize {
        self.lock()
            .iter()
            .filter(|call| matches!(call, MockCall::Accept(..)))
            .count()
    }

    /// 分配过的 Flow，按分配顺序。
    pub fn flows(&self) -> Vec<FlowId> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::NewFlow(flow) => Some(*flow),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug)]
enum MockState {
    Created,
    Accepting,
    Connected {
        steps: VecDeque<MockStep>,
        eof_notified: bool,
    },
}

/// 脚本化的传输上下文。
pub struct MockContext {
    table: FlowTable<MockState>,
    pending: VecDeque<MockConnection>,
    failures: HashMap<MockOperation, ErrorCode>,
    journal: MockJournal,
}

impl MockContext {
    /// 新 Flow 默认需求为空位图。
    pub fn new() -> Self {
        Self::with_defaults(CapabilityMask::empty())
    }

    /// 指定新 Flow 的默认需求位图。
    pub fn with_defaults(defaults: CapabilityMask) -> Self {
        Self {
            table: FlowTable::new(defaults),
            pending: VecDeque::new(),
            failures: HashMap::new(),
            journal: MockJournal::default(),
        }
    }

    /// 排队一条入站连接。
    pub fn connection(mut self, connection: MockConnection) -> Self {
        self.pending.push_back(connection);
        self
    }

    /// 令指定操作以给定错误码失败。
    pub fn fail_on(mut self, operation: MockOperation, code: ErrorCode) -> Self {
        self.failures.insert(operation, code);
        self
    }

    /// 共享日志句柄。
    pub fn journal(&self) -> MockJournal {
        self.journal.clone()
    }

    fn injected(&self, operation: MockOperation, kind: OperationKind) -> Result<(), FlowError> {
        match self.failures.get(&operation) {
            Some(code) => Err(FlowError::new(*code, kind, "injected failure")),
            None => Ok(()),
        }
    }

    fn next_event(&mut self) -> Option<(FlowId, MockEvent)> {
        let has_pending = !self.pending.is_empty();
        let mut found = None;
        for (id, entry) in self.table.iter_mut() {
            let slots = entry.slots();
            let event = match &mut entry.state {
                MockState::Accepting if has_pending => Some(MockEvent::Connected),
                MockState::Connected {
                    steps,
                    eof_notified,
                } => match steps.front() {
                    Some(MockStep::Fault(code)) => Some(MockEvent::Error(*code)),
                    Some(MockStep::Close) if *eof_notified => None,
                    Some(MockStep::Close) if slots.contains(OperationSet::READABLE) => {
                        *eof_notified = true;
                        Some(MockEvent::Readable)
                    }
                    Some(_) if slots.contains(OperationSet::READABLE) => Some(MockEvent::Readable),
                    _ => None,
                },
                _ => None,
            };
            if let Some(event) = event {
                found = Some((id, event));
                break;
            }
        }
        found
    }

    fn dispatch(&mut self, flow: FlowId, event: MockEvent) -> Result<bool, FlowError> {
        tracing::trace!(%flow, ?event, "mock dispatch");
        self.journal.push(MockCall::Dispatch(flow, event));
        let slots = match self.table.get_mut(flow) {
            Some(entry) => {
                if event == MockEvent::Connected
                    && let Some(connection) = self.pending.pop_front()
                {
                    entry.set_info(connection.info);
                    entry.state = MockState::Connected {
                        steps: connection.steps,
                        eof_notified: false,
                    };
                }
                if let (MockEvent::Error(_), MockState::Connected { steps, .. }) =
                    (event, &mut entry.state)
                {
                    steps.pop_front();
                }
                entry.slots()
            }
            None => return Ok(false),
        };

        let error = match event {
            MockEvent::Error(code) => Some(FlowError::new(code, RUN, "scripted transport fault")),
            _ => None,
        };
        let wanted = match event {
            MockEvent::Connected => OperationSet::CONNECTED,
            MockEvent::Readable => OperationSet::READABLE,
            MockEvent::Error(_) => OperationSet::ERROR,
        };
        if !slots.contains(wanted) {
            return match error {
                Some(error) => Err(error),
                None => Ok(false),
            };
        }
        let Some(mut handler) = self.table.take_handler(flow) else {
            return match error {
                Some(error) => Err(error),
                None => Ok(false),
            };
        };

        let mut scope = MockScope {
            table: &mut self.table,
            journal: &self.journal,
            flow,
            release: false,
            stop: false,
        };
        let result = match error {
            Some(error) => handler.on_error(&mut scope, error),
            None if event == MockEvent::Connected => handler.on_connected(&mut scope),
            None => handler.on_readable(&mut scope),
        };
        let (release, stop) = (scope.release, scope.stop);
        if release {
            self.free_flow(flow);
        } else {
            self.table.restore_handler(flow, handler);
        }
        result.map(|()| stop)
    }
}

impl Default for MockContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportContext for MockContext {
    fn new_flow(&mut self) -> Result<FlowId, FlowError> {
        self.injected(MockOperation::NewFlow, NEW_FLOW)?;
        let flow = self.table.insert(MockState::Created);
        self.journal.push(MockCall::NewFlow(flow));
        Ok(flow)
    }

    fn free_flow(&mut self, flow: FlowId) -> bool {
        let released = self.table.remove(flow);
        self.journal.push(MockCall::FreeFlow { flow, released });
        released
    }

    fn is_live(&self, flow: FlowId) -> bool {
        self.table.contains(flow)
    }

    fn get_requirements(&self, flow: FlowId) -> Result<CapabilityMask, FlowError> {
        self.injected(MockOperation::GetRequirements, GET_PROPERTY)?;
        self.journal.push(MockCall::GetRequirements(flow));
        self.table.requirements(flow)
    }

    fn set_requirements(
        &mut self,
        flow: FlowId,
        requirements: CapabilityMask,
    ) -> Result<(), FlowError> {
        self.injected(MockOperation::SetRequirements, SET_PROPERTY)?;
        self.journal.push(MockCall::SetRequirements(flow, requirements));
        self.table.set_requirements(flow, requirements)
    }

    fn set_operations(
        &mut self,
        flow: FlowId,
        operations: FlowOperations,
    ) -> Result<(), FlowError> {
        self.injected(MockOperation::SetOperations, SET_OPERATIONS)?;
        self.journal.push(MockCall::SetOperations(flow, operations.slots()));
        self.table.install(flow, operations)
    }

    fn accept(&mut self, flow: FlowId, endpoint: &AcceptEndpoint) -> Result<(), FlowError> {
        self.injected(MockOperation::Accept, ACCEPT)?;
        self.journal.push(MockCall::Accept(flow, endpoint.clone()));
        let entry = self.table.entry_mut(flow, ACCEPT)?;
        if entry.requirements().candidate_protocols().is_empty() {
            return Err(FlowError::new(
                ErrorCode::Unable,
                ACCEPT,
                "no transport satisfies the requirements",
            ));
        }
        entry.state = MockState::Accepting;
        Ok(())
    }

    fn run(&mut self, mode: RunMode) -> Result<RunOutcome, FlowError> {
        self.injected(MockOperation::Run, RUN)?;
        self.journal.push(MockCall::Run(mode));
        loop {
            let Some((flow, event)) = self.next_event() else {
                return Ok(RunOutcome::Idle);
            };
            if self.dispatch(flow, event)? {
                return Ok(RunOutcome::Stopped);
            }
            if mode != RunMode::Default {
                return Ok(if self.table.is_empty() {
                    RunOutcome::Idle
                } else {
                    RunOutcome::Pending
                });
            }
        }
    }
}

struct MockScope<'a> {
    table: &'a mut FlowTable<MockState>,
    journal: &'a MockJournal,
    flow: FlowId,
    release: bool,
    stop: bool,
}

impl FlowScope for MockScope<'_> {
    fn flow(&self) -> FlowId {
        self.flow
    }

    fn info(&self) -> Option<&FlowInfo> {
        self.table.get(self.flow).and_then(|entry| entry.info())
    }

    fn operations(&self) -> OperationSet {
        self.table
            .get(self.flow)
            .map(|entry| entry.slots())
            .unwrap_or_default()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FlowError> {
        let entry = self.table.entry_mut(self.flow, READ)?;
        let result = match &mut entry.state {
            MockState::Connected { steps, .. } => read_step(steps, buf),
            _ => Err(FlowError::new(
                ErrorCode::BadArgument,
                READ,
                "flow is not connected",
            )),
        };
        self.journal.push(MockCall::Read {
            flow: self.flow,
            result: result.as_ref().map(|n| *n).map_err(FlowError::code),
        });
        result
    }

    fn set_operations(&mut self, operations: OperationSet) -> Result<(), FlowError> {
        self.journal.push(MockCall::SetOperations(self.flow, operations));
        self.table
            .entry_mut(self.flow, SET_OPERATIONS)?
            .set_slots(operations);
        Ok(())
    }

    fn release_flow(&mut self) {
        self.release = true;
    }

    fn stop(&mut self) {
        self.stop = true;
    }
}

fn read_step(steps: &mut VecDeque<MockStep>, buf: &mut [u8]) -> Result<usize, FlowError> {
    match steps.front_mut() {
        None => Err(FlowError::would_block(READ)),
        Some(MockStep::Close) => Ok(0),
        Some(MockStep::Fault(_)) => Err(FlowError::would_block(READ)),
        Some(MockStep::Data(bytes)) => {
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            bytes.drain(..n);
            if bytes.is_empty() {
                steps.pop_front();
            }
            Ok(n)
        }
        Some(MockStep::WouldBlock) => {
            steps.pop_front();
            Err(FlowError::would_block(READ))
        }
        Some(MockStep::Fail(code)) => {
            let code = *code;
            steps.pop_front();
            Err(FlowError::new(code, READ, "scripted read failure"))
        }
    }
}
