#![doc = r#"
# relaynet-core

## 设计动机（Why）
- **定位**：传输无关的连接框架内核，承载会话、连接、注册表、钩子集合与
  服务端执行模型，供 TCP/UDP/Unix 监听器以及转发代理复用；
- **架构角色**：传输 crate 只负责产生原始句柄并交给 [`Server::execute`]，
  代理 crate 通过 [`Events::process`] 接管单连接处理；
- **设计理念**：单连接故障绝不外溢，所有错误以连接为作用域记录在
  [`Connection::last_error`] 并通过 `Closed` 钩子上报。

## 核心契约（What）
- [`Connection::close`] 幂等：活跃标志只翻转一次，出站队列只关闭一次，会话随之失效；
- [`Registry`] 在任意并发下安全，但“判断覆盖后登记”不是原子操作；
- [`Server::finish`] 对每条连接恰好生效一次；
- [`reconnect`] 线性退避，`n` 次失败共休眠 `1 + 2 + … + (n - 1)` 个步长。

## 实现策略（How）
- **运行时**：Tokio 多线程运行时，每条连接一个任务，发送循环与周期任务各占一个任务；
- **取消**：关闭信号 + 套接字 `shutdown` 打断挂起的读写，不依赖上下文传播；
- **调参**：通过 `socket2` 在同一套接字的副本上设置缓冲区、保活与 linger。

## 风险与考量（Trade-offs）
- 接受循环对任何错误都继续重试，监听器失效后会空转直到停止信号；
- UDP 零长度报文与流结束无法区分。
"#]

pub mod addr;
pub mod conn;
pub mod dial;
pub mod error;
pub mod events;
pub mod framing;
pub mod listener;
pub mod options;
pub mod reconnect;
pub mod registry;
pub mod server;
pub mod session;

pub use addr::NetAddr;
pub use conn::{Connection, NetStream, Outbound, TransportKind};
pub use dial::{DialPlan, LocalAddrGroup, local_addrs};
pub use error::{ErrorCategory, NetError, OperationKind};
pub use events::Events;
pub use framing::{ChunkSplitter, LineSplitter, MessageSink, Split, Splitter};
pub use listener::{TransportListener, serve};
pub use options::{KeepAlive, SocketOptions, TcpOptions};
pub use reconnect::{DEFAULT_BACKOFF_STEP, DialClient, discard, reconnect, reconnect_with, send_data};
pub use registry::Registry;
pub use server::Server;
pub use session::{Session, new_session_id};
