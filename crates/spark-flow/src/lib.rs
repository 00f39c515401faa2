#![doc = r#"
# spark-flow

## 设计动机（Why）
- **定位**：描述“传输协商库”的调用面：Flow 的生命周期、以位图表达的能力需求、
  按槽位派发的回调与单线程事件循环。
- **架构角色**：服务端逻辑只依赖本 crate 的 trait；真实网络由 `spark-flow-tcp`
  提供，确定性测试由 `test-util` 特性下的 [`mock`] 模块提供。
- **设计理念**：用“每个 Flow 一个处理器对象”替代裸函数指针与共享的用户数据指针，
  处理器的致命错误通过 `Result` 交还给事件循环的调用方，而不是在回调内部退出进程。

## 核心契约（What）
- [`TransportContext`]：上下文级操作（分配/释放 Flow、读写需求位图、安装回调、
  被动接受、驱动事件循环）；
- [`FlowHandler`] 与 [`FlowScope`]：派发期间的回调与受限操作面；
- [`CapabilityMask`]：19 个内建属性位组成的需求位图，互斥组合在写入时被拒绝；
- [`FlowError`]：携带库错误码、失败操作与可选 IO 源错误的统一错误类型。

## 实现策略（How）
- 各后端以 [`FlowTable`] 记账，派发时临时取出处理器，使处理器可通过 `FlowScope`
  安全地借用上下文；
- 所有回调在调用 `run` 的线程上串行执行，契约本身不要求 `Send`。
"#]
#![deny(unsafe_code)]

pub mod capability;
pub mod context;
pub mod error;
pub mod flow;
#[cfg(feature = "test-util")]
pub mod mock;
pub mod operations;
pub mod table;

pub use capability::{Capability, CapabilityMask};
pub use context::{RunMode, RunOutcome, TransportContext, validate_requirements};
pub use error::{ErrorCode, FlowError, OperationKind};
pub use flow::{AcceptEndpoint, AddressFamily, FlowId, FlowInfo, TransportProtocol};
pub use operations::{FlowHandler, FlowOperations, FlowScope, OperationSet};
pub use table::{FlowEntry, FlowTable};
