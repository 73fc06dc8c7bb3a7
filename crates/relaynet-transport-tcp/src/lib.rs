#![doc = r#"
# relaynet-transport-tcp

## 设计动机（Why）
- 为 `relaynet-core` 的服务端执行模型提供 TCP 监听器与出站客户端；
- 监听端在 POSIX 平台启用端口复用，允许多个进程共享同一监听端口。

## 核心契约（What）
- [`TcpServer`] 实现 [`relaynet_core::TransportListener`]，接受到的连接在显式配置时
  应用保活参数，随后交给 [`relaynet_core::Server::execute`]；
- [`TcpClient`] 实现 [`relaynet_core::DialClient`]，每次拨号成功后立即应用
  [`relaynet_core::TcpOptions`]，调参失败视为本次拨号失败。

## 风险与考量（Trade-offs）
- 端口复用意味着另一个进程可以在同一端口上分走连接，部署时需自行约束。
"#]

mod client;
mod server;

pub use client::TcpClient;
pub use server::{TcpServer, listen_tcp};
