#![doc = r#"
# spark-flow-tcp

## 设计动机（Why）
- **定位**：`spark-flow` 契约的真实网络实现，只支持被动接受的 TCP Flow；
- **架构角色**：`server_discard` 等二进制通过 [`TcpContext`] 获得“库”的全部能力，
  服务端逻辑本身只依赖 `spark_flow::TransportContext`。

## 核心契约（What）
- 能力位图决定传输协议与地址族：要求 SCTP/UDP、要求消息语义或禁止重传都会使
  `accept` 返回 `Unable`；要求安全层返回 `Security`；
- 所有回调在调用 `run` 的线程上执行，`run` 返回前不会有任何回调并发发生。

## 实现策略（How）
- 独占一个 Tokio current-thread 运行时，`run` 内部以 `block_on` 等待最先就绪的
  Flow，再同步派发回调；
- 监听套接字通过 `socket2` 创建，以便在 `bind` 之前设置 `IPV6_V6ONLY` 与
  `SO_REUSEADDR`。

## 风险与考量（Trade-offs）
- 未实现 TLS、SCTP 与 UDP，相关需求一律视为不可满足；
- 就绪等待每轮重建 Future 列表，Flow 数量较大时开销线性增长。
"#]
#![deny(unsafe_code)]

mod config;
mod context;
mod error;
mod listener;

pub use config::TcpContextConfig;
pub use context::TcpContext;
