#![doc = r#"
# relaynet-transport-udp

## 设计动机（Why）
- UDP 没有面向连接的 `accept`，这里把“一个绑定在监听地址上的套接字”视为一条逻辑连接，
  使其同样走 `Opened → Active → Closed` 状态机。

## 核心契约（What）
- [`UdpServer`] 同一时刻只持有一个会话：上一个会话任务结束、套接字释放后才在同一地址上重新绑定；
- 会话以零长度报文、截止时间或显式关闭结束；
- 服务端会话向最近一次发来报文的对端回复，[`UdpClient`] 使用已 `connect` 的套接字。

## 风险与考量（Trade-offs）
- 会话之间的空窗期内到达的报文会被内核丢弃；
- 会话关闭即释放套接字，应用在会话结束后继续持有连接引用不会阻塞重新绑定。
"#]

mod client;
mod server;

pub use client::UdpClient;
pub use server::UdpServer;
