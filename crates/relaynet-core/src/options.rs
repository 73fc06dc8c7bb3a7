//! 套接字调参。
//!
//! [`SocketOptions`] 适用于所有传输；[`TcpOptions`] 在其之上增加 `TCP_NODELAY`、
//! `SO_LINGER` 与保活探测，由 TCP 客户端与监听器在连接建立后立即应用。

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::{net::TcpStream, time::Instant};

use crate::{
    conn::Connection,
    error::{CONFIGURE, NetError},
};

/// 通用套接字参数，零值或 `None` 表示保持系统默认。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketOptions {
    pub read_buffer: usize,
    pub write_buffer: usize,
    /// 相对于应用时刻的读写截止时长。
    pub deadline: Option<Duration>,
}

impl SocketOptions {
    pub fn with_read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer = bytes;
        self
    }

    pub fn with_write_buffer(mut self, bytes: usize) -> Self {
        self.write_buffer = bytes;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// 把参数应用到连接上，遇到第一个失败即返回。
    pub fn apply(&self, conn: &Connection) -> Result<(), NetError> {
        if self.read_buffer > 0 {
            conn.set_read_buffer(self.read_buffer)?;
        }
        if self.write_buffer > 0 {
            conn.set_write_buffer(self.write_buffer)?;
        }
        if let Some(deadline) = self.deadline.filter(|d| !d.is_zero()) {
            conn.set_deadline(Some(Instant::now() + deadline));
        }
        Ok(())
    }
}

/// TCP 保活探测参数。
///
/// 空闲 `idle` 后发出第一个探测包，之后每隔 `interval` 探测一次，
/// 最多 `count` 次；总检测时长约为 `idle + (count - 1) * interval`。
/// `idle` 为零表示不启用。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeepAlive {
    pub idle: Duration,
    pub count: u32,
    pub interval: Duration,
}

impl KeepAlive {
    /// 以秒为单位构造。
    pub fn from_secs(idle: u64, count: u32, interval: u64) -> Self {
        Self {
            idle: Duration::from_secs(idle),
            count,
            interval: Duration::from_secs(interval),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.idle.is_zero()
    }

    pub(crate) fn params(&self) -> TcpKeepalive {
        #[allow(unused_mut)]
        let mut params = TcpKeepalive::new().with_time(self.idle);
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "freebsd",
            target_os = "windows"
        ))]
        if !self.interval.is_zero() {
            params = params.with_interval(self.interval);
        }
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "freebsd"
        ))]
        if self.count > 0 {
            params = params.with_retries(self.count);
        }
        params
    }

    /// 在已建立的 TCP 流上启用保活；未启用时什么也不做。
    pub fn apply(&self, stream: &TcpStream) -> Result<(), NetError> {
        if !self.is_enabled() {
            return Ok(());
        }
        SockRef::from(stream)
            .set_tcp_keepalive(&self.params())
            .map_err(|err| NetError::io(CONFIGURE, err))
    }
}

/// TCP 连接参数。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `no_delay` 默认开启，关闭 Nagle 以降低小包延迟；
/// - `linger` 为 `None` 时保持系统默认的异步关闭，`Some(d)` 时关闭阶段最多等待 `d`
///   再以 RST 释放；
/// - `keep_alive` 与 `socket` 见各自类型。
///
/// ## 执行顺序（How）
/// - [`TcpOptions::apply_stream`] 在包装为 [`Connection`] 之前作用于原始流；
/// - [`SocketOptions::apply`] 在包装之后作用于连接（缓冲区与截止时间）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpOptions {
    pub no_delay: bool,
    pub linger: Option<Duration>,
    pub keep_alive: KeepAlive,
    pub socket: SocketOptions,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            no_delay: true,
            linger: None,
            keep_alive: KeepAlive::default(),
            socket: SocketOptions::default(),
        }
    }
}

impl TcpOptions {
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_socket(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }

    /// 应用 TCP 专属参数。
    pub fn apply_stream(&self, stream: &TcpStream) -> Result<(), NetError> {
        stream
            .set_nodelay(self.no_delay)
            .map_err(|err| NetError::io(CONFIGURE, err))?;
        SockRef::from(stream)
            .set_linger(self.linger)
            .map_err(|err| NetError::io(CONFIGURE, err))?;
        self.keep_alive.apply(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test(flavor = "multi_thread")]
    async fn tcp_options_land_on_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (client, _accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = client.expect("connect");

        let options = TcpOptions::default()
            .with_linger(Some(Duration::from_secs(1)))
            .with_keep_alive(KeepAlive::from_secs(30, 3, 5));
        options.apply_stream(&client).expect("apply");

        assert!(client.nodelay().expect("nodelay"));
        let sock = SockRef::from(&client);
        assert_eq!(sock.linger().expect("linger"), Some(Duration::from_secs(1)));
        assert!(sock.keepalive().expect("keepalive"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn socket_options_set_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (client, _accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let conn = Connection::new(client.expect("connect")).expect("wrap");

        SocketOptions::default()
            .with_read_buffer(64 * 1024)
            .with_deadline(Some(Duration::from_secs(30)))
            .apply(&conn)
            .expect("apply");
        assert!(conn.deadline().is_some());
    }

    #[test]
    fn keep_alive_disabled_by_default() {
        assert!(!TcpOptions::default().keep_alive.is_enabled());
        assert!(TcpOptions::default().no_delay);
    }
}
