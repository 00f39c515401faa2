#![doc = r#"
# spark-discard

## 设计动机（Why）
- **定位**：最小的“丢弃”服务端：被动接受一个传输层 Flow，读取并丢弃对端发送的一切，
  直到对端断开；
- **架构角色**：只依赖 `spark-flow` 契约；二进制 `server_discard` 以
  `spark_flow_tcp::TcpContext` 运行，测试以脚本化上下文运行。

## 核心组成（What）
- [`capability`]：`NEAT_PROPERTY_*` 请求串到能力位图的解析；
- [`registry`]：`Idle → AwaitingConnect → Streaming → Closed` 回调状态机；
- [`reader`] 与 [`session`]：定长读缓冲区、读结果分类与每个 Flow 的处理器；
- [`bootstrap`]：启动序列与逆序清理；
- [`config`]、[`logging`]、[`error`]：命令行、日志与错误分类。

## 实现策略（How）
- 回调中的致命错误经由事件循环返回给 [`serve`]，由入口统一清理并选择退出码；
- 统计信息以共享原子计数汇总为 [`ServeReport`]。
"#]
#![deny(unsafe_code)]

pub mod bootstrap;
pub mod capability;
pub mod config;
pub mod error;
pub mod logging;
pub mod reader;
pub mod registry;
pub mod session;

pub use bootstrap::{ServeReport, serve};
pub use capability::{CapabilityParseError, CapabilityRequest, DEFAULT_CAPABILITIES};
pub use config::{AcceptMode, ServerArgs, ServerConfig, Verbosity};
pub use error::{ConfigError, ServerError, SetupStep};
pub use reader::{ReadBuffer, ReadDisposition};
pub use registry::{CallbackRegistry, FlowState, RegistryError};
pub use session::{DiscardSession, SessionReport, SessionStats};
