//! # 重连与客户端辅助
//!
//! ## 核心意图（Why）
//! - 以最小的“可拨号客户端”契约（[`DialClient`]）承载通用的线性退避重连，
//!   TCP、UDP、Unix 客户端以及代理的后端侧都复用同一实现。
//!
//! ## 执行逻辑（How）
//! - 已有活跃连接且未强制：立即返回 0 次尝试；
//! - 强制时先关闭现有连接；
//! - 最多尝试 `retries` 次，第 `n` 次失败后休眠 `n * step` 再发起第 `n + 1` 次，
//!   最后一次失败后不再休眠，因此总延迟为 `(1 + 2 + … + (retries - 1)) * step`；
//! - 退避休眠不可取消。

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{conn::Connection, error::NetError};

/// 默认退避步长。
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(1);

/// 可被重连逻辑驱动的客户端。
#[async_trait]
pub trait DialClient: Send {
    /// 当前持有的连接。
    fn conn(&self) -> Option<Arc<Connection>>;

    /// 安装新连接。
    fn set_conn(&mut self, conn: Arc<Connection>);

    /// 发起一次拨号并完成调参。
    async fn dialing(&mut self) -> Result<Arc<Connection>, NetError>;

    /// 关闭当前连接；没有连接时什么也不做。
    async fn close(&mut self) -> Result<(), NetError> {
        match self.conn() {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }
}

/// 以 [`DEFAULT_BACKOFF_STEP`] 为步长执行 [`reconnect_with`]。
pub async fn reconnect<C>(client: &mut C, force: bool, retries: u32) -> Result<u32, NetError>
where
    C: DialClient + ?Sized,
{
    reconnect_with(client, force, retries, DEFAULT_BACKOFF_STEP).await
}

/// 按需重连，返回拨号尝试次数。
///
/// 全部尝试失败时返回最后一次拨号错误，客户端不会安装任何新连接；
/// `retries` 为 0 且没有活跃连接时返回 [`NetError::LostConnection`]。
pub async fn reconnect_with<C>(
    client: &mut C,
    force: bool,
    retries: u32,
    step: Duration,
) -> Result<u32, NetError>
where
    C: DialClient + ?Sized,
{
    if let Some(conn) = client.conn().filter(|conn| conn.is_active()) {
        if !force {
            return Ok(0);
        }
        if let Err(err) = conn.close().await {
            debug!(error = %err, "closing previous connection before reconnect failed");
        }
    }

    let mut last_error = NetError::LostConnection;
    for attempt in 1..=retries {
        match client.dialing().await {
            Ok(conn) => {
                debug!(attempt, sid = %conn.session_id(), remote = %conn.remote_addr(), "dial succeeded");
                client.set_conn(conn);
                return Ok(attempt);
            }
            Err(err) => {
                warn!(attempt, retries, code = err.code(), error = %err, "dial failed");
                last_error = err;
            }
        }
        if attempt < retries {
            tokio::time::sleep(step * attempt).await;
        }
    }
    Err(last_error)
}

/// 确保连接可用（最多重试 3 次）后单次发送。
pub async fn send_data<C>(client: &mut C, data: &[u8]) -> Result<(), NetError>
where
    C: DialClient + ?Sized,
{
    reconnect(client, false, 3).await?;
    match client.conn() {
        Some(conn) => conn.quick_send(data).await,
        None => Err(NetError::LostConnection),
    }
}

/// 丢弃客户端连接上的全部输入直到对端结束，返回丢弃的字节数。
pub async fn discard<C>(client: &C) -> Result<u64, NetError>
where
    C: DialClient + ?Sized,
{
    match client.conn() {
        Some(conn) => conn.discard().await,
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        addr::NetAddr,
        conn::{NetStream, TransportKind},
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::{net::UdpSocket, time::Instant};

    /// 前 `fail_first` 次拨号失败，之后成功。
    struct Flaky {
        attempts: Arc<AtomicU32>,
        fail_first: u32,
        conn: Option<Arc<Connection>>,
    }

    impl Flaky {
        fn new(fail_first: u32) -> Self {
            Self {
                attempts: Arc::new(AtomicU32::new(0)),
                fail_first,
                conn: None,
            }
        }
    }

    #[async_trait]
    impl DialClient for Flaky {
        fn conn(&self) -> Option<Arc<Connection>> {
            self.conn.clone()
        }

        fn set_conn(&mut self, conn: Arc<Connection>) {
            self.conn = Some(conn);
        }

        async fn dialing(&mut self) -> Result<Arc<Connection>, NetError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(NetError::Dial {
                    kind: TransportKind::Udp,
                    addr: NetAddr::Unnamed.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                });
            }
            let local = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
            let socket = UdpSocket::bind(local).await.map_err(|err| NetError::Bind {
                addr: "127.0.0.1:0".into(),
                source: err,
            })?;
            Ok(Arc::new(Connection::new(NetStream::Udp {
                socket,
                connected: false,
            })?))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn active_client_is_left_alone() {
        let mut client = Flaky::new(0);
        assert_eq!(reconnect(&mut client, false, 3).await.expect("first"), 1);
        assert_eq!(reconnect(&mut client, false, 3).await.expect("second"), 0);
        assert_eq!(client.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_uses_linear_backoff() {
        let mut client = Flaky::new(u32::MAX);
        let started = Instant::now();
        let err = reconnect(&mut client, true, 4).await.expect_err("must fail");
        assert!(matches!(err, NetError::Dial { .. }));
        assert_eq!(client.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2 + 3));
        assert!(client.conn().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn forced_reconnect_replaces_connection() {
        let mut client = Flaky::new(0);
        reconnect(&mut client, false, 1).await.expect("connect");
        let old = client.conn().expect("old");

        let mut client = Flaky {
            attempts: Arc::clone(&client.attempts),
            fail_first: 2,
            conn: Some(Arc::clone(&old)),
        };
        let started = Instant::now();
        let attempts = reconnect(&mut client, true, 3).await.expect("reconnect");
        assert_eq!(attempts, 2);
        assert!(!old.is_active());
        assert!(client.conn().expect("new").is_active());
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_without_connection_is_lost() {
        let mut client = Flaky::new(0);
        assert!(matches!(
            reconnect(&mut client, false, 0).await,
            Err(NetError::LostConnection)
        ));
    }
}
