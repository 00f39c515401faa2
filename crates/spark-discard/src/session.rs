//! 丢弃会话：每个 Flow 一个的事件处理器。
//!
//! # 教案式说明
//!
//! ## 意图（Why）
//! - 会话独占读缓冲区、回调状态机与输出设置，不依赖任何全局变量；
//! - 统计信息放在共享的原子计数中，处理器被移交给事件循环之后，启动代码仍可读取。
//!
//! ## 逻辑（How）
//! - `on_connected`：`AwaitingConnect → Streaming`，推送 `READABLE|ERROR` 槽位并记录
//!   协商结果；
//! - `on_readable`：每次通知只读一次，按 [`ReadDisposition`] 分派：
//!   数据记录日志（详细级别下原样转储）、零长度读取撤销槽位并释放 Flow、
//!   `WouldBlock` 直接返回、其他错误向事件循环传播；
//! - `on_error`：进入 `Closed` 并把错误交还给事件循环的调用方。
//!
//! ## 契约（What）
//! - 零长度读取之后不会再发生任何读取，Flow 只释放一次；
//! - 回调从不阻塞。

use std::{
    fmt,
    io::Write,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use spark_flow::{FlowError, FlowHandler, FlowId, FlowOperations, FlowScope};
use tracing::{error, info, trace, warn};

use crate::{
    config::Verbosity,
    error::ServerError,
    reader::{ReadBuffer, ReadDisposition},
    registry::CallbackRegistry,
};

/// 会话统计的共享计数。
#[derive(Debug, Default)]
pub struct SessionStats {
    reads: AtomicU64,
    bytes: AtomicU64,
    would_blocks: AtomicU64,
    peer_closed: AtomicBool,
}

impl SessionStats {
    /// 生成某个 Flow 的统计快照。
    pub fn report(&self, flow: FlowId) -> SessionReport {
        SessionReport {
            flow,
            reads: self.reads.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            would_blocks: self.would_blocks.load(Ordering::Relaxed),
            peer_closed: self.peer_closed.load(Ordering::Relaxed),
        }
    }
}

/// 单个会话结束时的统计。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionReport {
    /// 会话使用的 Flow。
    pub flow: FlowId,
    /// 读到数据的次数。
    pub reads: u64,
    /// 丢弃的总字节数。
    pub bytes: u64,
    /// `WouldBlock` 次数。
    pub would_blocks: u64,
    /// 是否以对端关闭结束。
    pub peer_closed: bool,
}

/// 丢弃会话。
pub struct DiscardSession {
    buffer: ReadBuffer,
    registry: CallbackRegistry,
    verbosity: Verbosity,
    sink: Box<dyn Write>,
    stats: Arc<SessionStats>,
}

impl DiscardSession {
    /// 以预先分配的缓冲区构造会话；`sink` 接收详细级别下的原始数据转储。
    pub fn new(buffer: ReadBuffer, verbosity: Verbosity, sink: Box<dyn Write>) -> Self {
        Self {
            buffer,
            registry: CallbackRegistry::new(),
            verbosity,
            sink,
            stats: Arc::default(),
        }
    }

    /// 共享统计句柄。
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    /// 完成首次安装（`Idle → AwaitingConnect`），返回交给上下文的回调集合。
    pub fn into_operations(mut self) -> Result<FlowOperations, ServerError> {
        let slots = self.registry.install()?;
        Ok(FlowOperations::new(self).with_slots(slots))
    }

    fn teardown(&mut self, scope: &mut dyn FlowScope) -> Result<(), FlowError> {
        let slots = self.registry.closed()?;
        scope.set_operations(slots)?;
        scope.release_flow();
        self.stats.peer_closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl fmt::Debug for DiscardSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscardSession")
            .field("buffer", &self.buffer)
            .field("registry", &self.registry)
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}

impl FlowHandler for DiscardSession {
    fn on_connected(&mut self, scope: &mut dyn FlowScope) -> Result<(), FlowError> {
        trace!("on_connected()");
        let slots = self.registry.connected()?;
        scope.set_operations(slots)?;
        if let Some(info) = scope.info() {
            info!(
                family = %info.family(),
                protocol = %info.protocol(),
                peer = %info.peer_addr(),
                "connected - {} over {}",
                info.protocol(),
                info.family()
            );
        }
        Ok(())
    }

    fn on_readable(&mut self, scope: &mut dyn FlowScope) -> Result<(), FlowError> {
        trace!("on_readable()");
        match ReadDisposition::classify(self.buffer.fill_from(scope)) {
            ReadDisposition::Data(n) => {
                self.stats.reads.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes.fetch_add(n as u64, Ordering::Relaxed);
                info!("received data - {n} byte");
                if self.verbosity.dumps_payload()
                    && let Err(error) = self.buffer.dump(self.sink.as_mut())
                {
                    warn!(%error, "payload dump failed");
                }
                Ok(())
            }
            ReadDisposition::PeerClosed => {
                info!("peer disconnected");
                self.teardown(scope)
            }
            ReadDisposition::WouldBlock => {
                self.stats.would_blocks.fetch_add(1, Ordering::Relaxed);
                info!("on_readable - would block");
                Ok(())
            }
            ReadDisposition::Fatal(read_error) => {
                error!("neat_read error: {}", read_error.code().as_raw());
                self.registry.fail()?;
                Err(read_error)
            }
        }
    }

    fn on_error(&mut self, _scope: &mut dyn FlowScope, error: FlowError) -> Result<(), FlowError> {
        trace!("on_error()");
        error!(%error, "transport error");
        if !self.registry.state().is_terminal() {
            self.registry.fail()?;
        }
        Err(error)
    }
}
