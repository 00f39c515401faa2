//! 服务端启动序列。
//!
//! # 教案式说明
//!
//! ## 意图（Why）
//! - 把“分配缓冲区 → 创建上下文 → 创建 Flow → 合并需求 → 安装回调 → 被动接受 → 运行事件循环”
//!   固定为一条顺序路径，任一步失败都能定位到具体步骤；
//! - 清理顺序与创建顺序相反：先释放 Flow（已释放则为空操作），再销毁上下文。
//!
//! ## 逻辑（How）
//! - 上下文由调用方提供的工厂创建，生产环境为 `TcpContext::new`，测试为脚本化上下文；
//! - [`FlowGuard`] 持有 Flow 标识，在作用域结束时调用 `free_flow`，覆盖成功、建立失败与
//!   运行期错误三种出口；
//! - `Continuous` 模式在每个会话结束后重新创建 Flow 并接受，直到事件循环在 Flow 尚未完成时
//!   就返回（再无事件可派发）。
//!
//! ## 契约（What）
//! - 成功返回每个会话的 [`SessionReport`]；
//! - 建立阶段失败返回 [`ServerError::Setup`]，运行期致命错误返回 [`ServerError::Transport`]。

use std::io::Write;

use spark_flow::{FlowId, RunMode, TransportContext};
use tracing::{debug, info, warn};

use crate::{
    config::{AcceptMode, ServerConfig},
    error::{ServerError, SetupStep},
    reader::ReadBuffer,
    session::{DiscardSession, SessionReport},
};

/// 一次服务的汇总。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServeReport {
    /// 按完成顺序排列的会话统计。
    pub sessions: Vec<SessionReport>,
}

impl ServeReport {
    /// 所有会话丢弃的总字节数。
    pub fn total_bytes(&self) -> u64 {
        self.sessions.iter().map(|session| session.bytes).sum()
    }
}

/// 作用域结束时释放 Flow。
struct FlowGuard<'a, C: TransportContext> {
    ctx: &'a mut C,
    flow: FlowId,
}

impl<C: TransportContext> Drop for FlowGuard<'_, C> {
    fn drop(&mut self) {
        if self.ctx.free_flow(self.flow) {
            debug!(flow = %self.flow, "flow released during cleanup");
        }
    }
}

/// 运行服务端直到会话结束。
///
/// `sinks` 为每个会话提供原始数据转储的输出。
pub fn serve<C, F, S>(
    config: &ServerConfig,
    make_context: F,
    mut sinks: S,
) -> Result<ServeReport, ServerError>
where
    C: TransportContext,
    F: FnOnce() -> Result<C, spark_flow::FlowError>,
    S: FnMut() -> Box<dyn Write>,
{
    let mut buffer = Some(ReadBuffer::with_capacity(config.buffer_size())?);
    let mut ctx = make_context().map_err(ServerError::setup(SetupStep::InitContext))?;
    let mut report = ServeReport::default();

    loop {
        let buffer = match buffer.take() {
            Some(buffer) => buffer,
            None => ReadBuffer::with_capacity(config.buffer_size())?,
        };
        let (session, finished) = serve_one(&mut ctx, config, buffer, sinks())?;
        info!(
            flow = %session.flow,
            reads = session.reads,
            bytes = session.bytes,
            would_blocks = session.would_blocks,
            "session finished"
        );
        report.sessions.push(session);

        if config.accept_mode() == AcceptMode::Single {
            break;
        }
        if !finished {
            warn!("event loop returned before the flow completed, no further accepts");
            break;
        }
    }

    info!(
        sessions = report.sessions.len(),
        bytes = report.total_bytes(),
        "server finished"
    );
    Ok(report)
}

fn serve_one<C: TransportContext>(
    ctx: &mut C,
    config: &ServerConfig,
    buffer: ReadBuffer,
    sink: Box<dyn Write>,
) -> Result<(SessionReport, bool), ServerError> {
    let flow = ctx
        .new_flow()
        .map_err(ServerError::setup(SetupStep::NewFlow))?;
    let mut guard = FlowGuard { ctx, flow };

    let baseline = guard
        .ctx
        .get_requirements(flow)
        .map_err(ServerError::setup(SetupStep::GetRequirements))?;
    let requirements = config.capabilities().apply(baseline);
    guard
        .ctx
        .set_requirements(flow, requirements)
        .map_err(ServerError::setup(SetupStep::SetRequirements))?;

    let session = DiscardSession::new(buffer, config.verbosity(), sink);
    let stats = session.stats();
    guard
        .ctx
        .set_operations(flow, session.into_operations()?)
        .map_err(ServerError::setup(SetupStep::SetOperations))?;
    guard
        .ctx
        .accept(flow, config.endpoint())
        .map_err(ServerError::setup(SetupStep::Accept))?;
    info!(%flow, endpoint = %config.endpoint(), %requirements, "waiting for connection");

    let outcome = guard
        .ctx
        .run(RunMode::Default)
        .map_err(ServerError::Transport)?;
    debug!(%flow, ?outcome, "event loop returned");
    let finished = !guard.ctx.is_live(flow);
    Ok((stats.report(flow), finished))
}
