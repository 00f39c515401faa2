use std::{collections::HashMap, future::Future, io, net::SocketAddr, pin::Pin, rc::Rc};

use futures::{FutureExt, future::select_all};
use spark_flow::{
    AcceptEndpoint, CapabilityMask, ErrorCode, FlowError, FlowId, FlowInfo,
    FlowOperations, FlowScope, FlowTable, OperationSet, RunMode, RunOutcome, TransportContext,
    TransportProtocol,
    error::{ACCEPT, INIT_CONTEXT, READ, SET_OPERATIONS},
};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::{Builder, Runtime},
};
use tracing::{debug, trace, warn};

use crate::{
    config::TcpContextConfig,
    error::{BIND, PEER, map_io_error},
    listener,
};

enum TcpState {
    Idle,
    Listening(Rc<TcpListener>),
    Connected(TcpStream),
}

enum LoopEvent {
    Accepted(FlowId, io::Result<(TcpStream, SocketAddr)>),
    Readable(FlowId, io::Result<()>),
    Writable(FlowId, io::Result<()>),
}

enum Wait {
    Idle,
    NotReady,
    Ready(LoopEvent),
}

enum Callback {
    Connected,
    Readable,
    Writable,
    Error(FlowError),
}

impl Callback {
    fn slot(&self) -> OperationSet {
        match self {
            Self::Connected => OperationSet::CONNECTED,
            Self::Readable => OperationSet::READABLE,
            Self::Writable => OperationSet::WRITABLE,
            Self::Error(_) => OperationSet::ERROR,
        }
    }
}

type EventFuture<'a> = Pin<Box<dyn Future<Output = LoopEvent> + 'a>>;

/// 运行在 Tokio 单线程运行时上的 TCP 传输上下文。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 为 Flow 契约提供真实网络实现：被动接受 TCP 连接、以非阻塞方式读取、在调用线程上
///   串行派发回调；
/// - 运行时由上下文独占，调用方无需感知 Tokio，`run` 是同步调用。
///
/// ## 逻辑（How）
/// - 每轮循环为所有等待中的 Flow 构造就绪 Future（监听中的 Flow 等待 `accept`，已连接
///   且安装了 `READABLE`/`WRITABLE` 槽位的 Flow 等待对应就绪），以 `select_all`
///   取最先完成者；Future 只借用表项，事件本身不借用，派发时可以独占上下文；
/// - 读取使用 `try_read`，`WouldBlock` 会清除就绪位，下一次就绪时重新通知；
/// - 监听套接字按绑定地址缓存，同一端点上的后续 Flow 复用同一监听器，连接在两次接受
///   之间排队而不是被拒绝。
///
/// ## 契约（What）
/// - `run(Default)` 在没有任何等待中的 Flow 时返回 [`RunOutcome::Idle`]；
/// - `run(Once)` 阻塞直到派发一个事件；`run(NoWait)` 只派发已就绪的事件，
///   没有就绪事件时返回 [`RunOutcome::Pending`]；
/// - 处理器返回的错误终止本次 `run` 并原样返回，Flow 保持存活，由调用方决定释放。
///
/// ## 注意事项（Trade-offs）
/// - 上下文持有 `Rc`，不可跨线程移动；
/// - 对端关闭后套接字持续可读，处理器必须在读到 `Ok(0)` 后撤销 `READABLE` 或释放 Flow。
pub struct TcpContext {
    table: FlowTable<TcpState>,
    listeners: HashMap<SocketAddr, Rc<TcpListener>>,
    config: TcpContextConfig,
    runtime: Runtime,
}

impl TcpContext {
    /// 以默认配置创建上下文。
    pub fn new() -> Result<Self, FlowError> {
        Self::with_config(TcpContextConfig::default())
    }

    /// 以指定配置创建上下文。
    pub fn with_config(config: TcpContextConfig) -> Result<Self, FlowError> {
        let runtime = Builder::new_current_thread()
            .enable_io()
            .build()
            .map_err(|error| map_io_error(INIT_CONTEXT, error))?;
        debug!(
            backlog = config.backlog(),
            defaults = %config.defaults(),
            "tcp context initialised"
        );
        Ok(Self {
            table: FlowTable::new(config.defaults()),
            listeners: HashMap::new(),
            config,
            runtime,
        })
    }

    /// 构造参数。
    pub fn config(&self) -> &TcpContextConfig {
        &self.config
    }

    /// 监听中的 Flow 实际绑定的地址；端口为 `0` 时可据此获知系统分配的端口。
    pub fn listen_addr(&self, flow: FlowId) -> Option<SocketAddr> {
        match &self.table.get(flow)?.state {
            TcpState::Listening(listener) => listener.local_addr().ok(),
            _ => None,
        }
    }

    fn listener_for(&mut self, plan: &listener::BindPlan) -> Result<Rc<TcpListener>, FlowError> {
        if let Some(existing) = self.listeners.get(&plan.addr) {
            return Ok(Rc::clone(existing));
        }
        let std_listener = listener::bind(plan, self.config.backlog())?;
        let _guard = self.runtime.enter();
        let listener =
            Rc::new(TcpListener::from_std(std_listener).map_err(|error| map_io_error(BIND, error))?);
        self.listeners.insert(plan.addr, Rc::clone(&listener));
        Ok(listener)
    }

    fn waiting(&self) -> bool {
        self.table.iter().any(|(_, entry)| match entry.state {
            TcpState::Listening(_) => true,
            TcpState::Connected(_) => {
                let slots = entry.slots();
                slots.contains(OperationSet::READABLE) || slots.contains(OperationSet::WRITABLE)
            }
            TcpState::Idle => false,
        })
    }

    fn wait(&self, block: bool) -> Wait {
        let mut waiters: Vec<EventFuture<'_>> = Vec::new();
        for (flow, entry) in self.table.iter() {
            let slots = entry.slots();
            match &entry.state {
                TcpState::Listening(listener) => waiters.push(Box::pin(async move {
                    LoopEvent::Accepted(flow, listener.accept().await)
                })),
                TcpState::Connected(stream) => {
                    if slots.contains(OperationSet::READABLE) {
                        waiters.push(Box::pin(async move {
                            LoopEvent::Readable(flow, stream.readable().await)
                        }));
                    }
                    if slots.contains(OperationSet::WRITABLE) {
                        waiters.push(Box::pin(async move {
                            LoopEvent::Writable(flow, stream.writable().await)
                        }));
                    }
                }
                TcpState::Idle => {}
            }
        }
        if waiters.is_empty() {
            return Wait::Idle;
        }
        trace!(waiters = waiters.len(), block, "waiting for readiness");

        let next = select_all(waiters).map(|(event, _, _)| event);
        if block {
            Wait::Ready(self.runtime.block_on(next))
        } else {
            let polled = self.runtime.block_on(async {
                tokio::task::yield_now().await;
                next.now_or_never()
            });
            polled.map_or(Wait::NotReady, Wait::Ready)
        }
    }

    fn dispatch(&mut self, event: LoopEvent) -> Result<bool, FlowError> {
        match event {
            LoopEvent::Accepted(flow, Ok((stream, peer))) => {
                let local = match stream.local_addr() {
                    Ok(local) => local,
                    Err(error) => return self.invoke(flow, Callback::Error(map_io_error(PEER, error))),
                };
                let Some(entry) = self.table.get_mut(flow) else {
                    return Ok(false);
                };
                let info = FlowInfo::new(TransportProtocol::Tcp, local, peer);
                entry.set_info(info);
                entry.state = TcpState::Connected(stream);
                debug!(
                    %flow,
                    peer = %info.peer_addr(),
                    local = %info.local_addr(),
                    family = %info.family(),
                    "flow connected"
                );
                self.invoke(flow, Callback::Connected)
            }
            LoopEvent::Accepted(flow, Err(error)) => {
                let error = map_io_error(ACCEPT, error);
                if matches!(error.code(), ErrorCode::Remote | ErrorCode::WouldBlock) {
                    warn!(%flow, %error, "transient accept failure ignored");
                    return Ok(false);
                }
                self.invoke(flow, Callback::Error(error))
            }
            LoopEvent::Readable(flow, Ok(())) => self.invoke(flow, Callback::Readable),
            LoopEvent::Writable(flow, Ok(())) => self.invoke(flow, Callback::Writable),
            LoopEvent::Readable(flow, Err(error)) | LoopEvent::Writable(flow, Err(error)) => {
                self.invoke(flow, Callback::Error(map_io_error(READ, error)))
            }
        }
    }

    /// 取出处理器执行一次回调，返回处理器是否请求停止。
    fn invoke(&mut self, flow: FlowId, callback: Callback) -> Result<bool, FlowError> {
        let installed = self
            .table
            .get(flow)
            .is_some_and(|entry| entry.slots().contains(callback.slot()));
        let handler = if installed {
            self.table.take_handler(flow)
        } else {
            None
        };
        let Some(mut handler) = handler else {
            return match callback {
                Callback::Error(error) => Err(error),
                _ => Ok(false),
            };
        };

        let mut scope = TcpScope {
            table: &mut self.table,
            flow,
            release: false,
            stop: false,
        };
        let result = match callback {
            Callback::Connected => handler.on_connected(&mut scope),
            Callback::Readable => handler.on_readable(&mut scope),
            Callback::Writable => handler.on_writable(&mut scope),
            Callback::Error(error) => handler.on_error(&mut scope, error),
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

impl TransportContext for TcpContext {
    fn new_flow(&mut self) -> Result<FlowId, FlowError> {
        let flow = self.table.insert(TcpState::Idle);
        debug!(%flow, "flow created");
        Ok(flow)
    }

    fn free_flow(&mut self, flow: FlowId) -> bool {
        let released = self.table.remove(flow);
        if released {
            debug!(%flow, "flow freed");
        }
        released
    }

    fn is_live(&self, flow: FlowId) -> bool {
        self.table.contains(flow)
    }

    fn get_requirements(&self, flow: FlowId) -> Result<CapabilityMask, FlowError> {
        self.table.requirements(flow)
    }

    fn set_requirements(
        &mut self,
        flow: FlowId,
        requirements: CapabilityMask,
    ) -> Result<(), FlowError> {
        self.table.set_requirements(flow, requirements)?;
        debug!(%flow, %requirements, "requirements updated");
        Ok(())
    }

    fn set_operations(
        &mut self,
        flow: FlowId,
        operations: FlowOperations,
    ) -> Result<(), FlowError> {
        trace!(%flow, slots = ?operations.slots(), "operations installed");
        self.table.install(flow, operations)
    }

    fn accept(&mut self, flow: FlowId, endpoint: &AcceptEndpoint) -> Result<(), FlowError> {
        let requirements = self.table.entry(flow, ACCEPT)?.requirements();
        let plan = listener::plan_bind(endpoint, requirements)?;
        let listener = self.listener_for(&plan)?;
        let addr = listener
            .local_addr()
            .map_err(|error| map_io_error(BIND, error))?;
        self.table.entry_mut(flow, ACCEPT)?.state = TcpState::Listening(listener);
        debug!(%flow, %endpoint, %addr, "passive accept requested");
        Ok(())
    }

    fn run(&mut self, mode: RunMode) -> Result<RunOutcome, FlowError> {
        debug!(?mode, flows = self.table.len(), "event loop started");
        loop {
            let event = match self.wait(mode != RunMode::NoWait) {
                Wait::Idle => return Ok(RunOutcome::Idle),
                Wait::NotReady => return Ok(RunOutcome::Pending),
                Wait::Ready(event) => event,
            };
            if self.dispatch(event)? {
                debug!("event loop stopped by handler");
                return Ok(RunOutcome::Stopped);
            }
            if mode != RunMode::Default {
                return Ok(if self.waiting() {
                    RunOutcome::Pending
                } else {
                    RunOutcome::Idle
                });
            }
        }
    }
}

struct TcpScope<'a> {
    table: &'a mut FlowTable<TcpState>,
    flow: FlowId,
    release: bool,
    stop: bool,
}

impl FlowScope for TcpScope<'_> {
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
        let entry = self.table.entry(self.flow, READ)?;
        let TcpState::Connected(stream) = &entry.state else {
            return Err(FlowError::new(
                ErrorCode::BadArgument,
                READ,
                "flow is not connected",
            ));
        };
        match stream.try_read(buf) {
            Ok(n) => Ok(n),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                Err(FlowError::would_block(READ))
            }
            Err(error) => Err(map_io_error(READ, error)),
        }
    }

    fn set_operations(&mut self, operations: OperationSet) -> Result<(), FlowError> {
        self.table
            .entry_mut(self.flow, SET_OPERATIONS)?
            .set_slots(operations);
        trace!(flow = %self.flow, slots = ?operations, "operations updated");
        Ok(())
    }

    fn release_flow(&mut self) {
        self.release = true;
    }

    fn stop(&mut self) {
        self.stop = true;
    }
}
