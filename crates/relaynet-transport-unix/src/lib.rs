#![cfg(unix)]
#![doc = r#"
# relaynet-transport-unix

## 设计动机（Why）
- 同机进程间通信使用 Unix 域套接字，省去 TCP 协议栈开销，
  转发代理也可以把后端放在套接字文件之后。

## 核心契约（What）
- [`UnixServer`] 只接受文件路径地址，IP 地址在启动阶段即以
  [`relaynet_core::NetError::AddressKind`] 拒绝；
- 启动时若路径上残留了无人监听的套接字文件则先删除，关闭监听时删除自己创建的文件；
- [`UnixClient`] 只能拨号到路径地址，不支持绑定本地路径。

## 风险与考量（Trade-offs）
- 残留文件的判定依赖一次探测连接，与另一个进程同时启动时存在竞态。
"#]

mod client;
mod server;

pub use client::UnixClient;
pub use server::UnixServer;
