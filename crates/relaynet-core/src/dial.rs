use std::{
    future::Future,
    io,
    net::{IpAddr, SocketAddr},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use tokio::net::{TcpSocket, TcpStream, UdpSocket};
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

use crate::{
    addr::{NetAddr, unspecified_for},
    conn::{NetStream, TransportKind},
    error::NetError,
};

/// 出站目标：远端地址、可选的本地绑定地址与拨号超时。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `timeout` 为 `None` 时不设超时，直接等待系统拨号结果；
/// - `local` 仅对 TCP/UDP 生效，Unix 拨号不支持绑定本地路径；
/// - 构造后只有远端地址可以通过 [`DialPlan::set_remote`] 修改，用于重新指向后端。
///
/// ## 执行逻辑（How）
/// - 各传输有独立入口（`dial_tcp`/`dial_udp`/`dial_unix`），返回原始 Tokio 句柄，
///   调用方可在包装为连接之前做传输专属调参；
/// - [`DialPlan::dial`] 按类型分派并返回 [`NetStream`]。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialPlan {
    timeout: Option<Duration>,
    local: Option<NetAddr>,
    remote: NetAddr,
}

impl DialPlan {
    /// `timeout_secs` 为 0 表示不设超时。
    pub fn new(remote: NetAddr, local: Option<NetAddr>, timeout_secs: u64) -> Self {
        Self {
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            local,
            remote,
        }
    }

    /// 替换本地绑定地址，常与 [`LocalAddrGroup::next_addr`] 搭配轮换出口地址。
    pub fn with_local(mut self, local: Option<NetAddr>) -> Self {
        self.local = local;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn remote(&self) -> &NetAddr {
        &self.remote
    }

    pub fn local(&self) -> Option<&NetAddr> {
        self.local.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// 把远端改为 `host:port`；解析失败时保持原值。
    pub fn set_remote(&mut self, host: &str, port: u16) -> Result<(), NetError> {
        self.remote = NetAddr::resolve(host, port)?;
        Ok(())
    }

    /// 按传输类型拨号。
    pub async fn dial(&self, kind: TransportKind) -> Result<NetStream, NetError> {
        match kind {
            TransportKind::Tcp => self.dial_tcp().await.map(NetStream::Tcp),
            TransportKind::Udp => self.dial_udp().await.map(|socket| NetStream::Udp {
                socket,
                connected: true,
            }),
            #[cfg(unix)]
            TransportKind::Unix => self.dial_unix().await.map(NetStream::Unix),
            #[cfg(not(unix))]
            TransportKind::Unix => Err(NetError::Unsupported("unix sockets on this platform")),
        }
    }

    pub async fn dial_tcp(&self) -> Result<TcpStream, NetError> {
        let remote = self.remote.expect_inet()?;
        let local = self.local.as_ref().map(NetAddr::expect_inet).transpose()?;
        debug!(%remote, ?local, "dialing tcp");
        let connect = async move {
            match local {
                Some(local) => {
                    let socket = match remote {
                        SocketAddr::V4(_) => TcpSocket::new_v4()?,
                        SocketAddr::V6(_) => TcpSocket::new_v6()?,
                    };
                    socket.bind(local)?;
                    socket.connect(remote).await
                }
                None => TcpStream::connect(remote).await,
            }
        };
        self.bounded(TransportKind::Tcp, connect).await
    }

    pub async fn dial_udp(&self) -> Result<UdpSocket, NetError> {
        let remote = self.remote.expect_inet()?;
        let local = match &self.local {
            Some(local) => local.expect_inet()?,
            None => unspecified_for(remote),
        };
        debug!(%remote, %local, "dialing udp");
        let connect = async move {
            let socket = UdpSocket::bind(local).await?;
            socket.connect(remote).await?;
            Ok(socket)
        };
        self.bounded(TransportKind::Udp, connect).await
    }

    #[cfg(unix)]
    pub async fn dial_unix(&self) -> Result<UnixStream, NetError> {
        if self.local.is_some() {
            return Err(NetError::Unsupported("binding a local unix address"));
        }
        let path = self.remote.expect_unix()?.to_path_buf();
        debug!(path = %path.display(), "dialing unix");
        self.bounded(TransportKind::Unix, UnixStream::connect(path)).await
    }

    async fn bounded<T, F>(&self, kind: TransportKind, connect: F) -> Result<T, NetError>
    where
        F: Future<Output = io::Result<T>>,
    {
        let addr = self.remote.to_string();
        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                Ok(result) => result,
                Err(_) => return Err(NetError::DialTimeout { kind, addr, timeout }),
            },
            None => connect.await,
        };
        result.map_err(|source| NetError::Dial { kind, addr, source })
    }
}

/// 本机非回环的 IPv4 接口地址；枚举失败时返回空列表。
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "freebsd"
))]
pub fn local_addrs() -> Vec<IpAddr> {
    match nix::ifaddrs::getifaddrs() {
        Ok(interfaces) => interfaces
            .filter_map(|ifa| {
                ifa.address
                    .as_ref()
                    .and_then(|addr| addr.as_sockaddr_in())
                    .map(|sin| sin.ip())
            })
            .filter(|ip| !ip.is_loopback())
            .map(IpAddr::V4)
            .collect(),
        Err(err) => {
            debug!(error = %err, "enumerating interface addresses failed");
            Vec::new()
        }
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "freebsd"
)))]
pub fn local_addrs() -> Vec<IpAddr> {
    Vec::new()
}

/// 本地出口地址的循环列表。
///
/// 多网卡主机上依次以不同的本地地址拨号，分摊源端口。列表为空时
/// [`LocalAddrGroup::next_addr`] 返回 `None`，拨号退回由系统选择源地址。
#[derive(Debug, Default)]
pub struct LocalAddrGroup {
    cursor: AtomicUsize,
    addrs: Vec<IpAddr>,
}

impl LocalAddrGroup {
    /// 以本机接口地址构造。
    pub fn new() -> Self {
        Self::from_addrs(local_addrs())
    }

    pub fn from_addrs(addrs: Vec<IpAddr>) -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            addrs,
        }
    }

    pub fn addrs(&self) -> &[IpAddr] {
        &self.addrs
    }

    /// 轮到的下一个本地地址（端口为 0）。
    pub fn next_addr(&self) -> Option<NetAddr> {
        if self.addrs.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.addrs.len();
        Some(NetAddr::Inet(SocketAddr::new(self.addrs[index], 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test(flavor = "multi_thread")]
    async fn tcp_dial_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let remote = listener.local_addr().expect("addr");
        let plan = DialPlan::new(NetAddr::Inet(remote), None, 2);
        let (dialed, accepted) = tokio::join!(plan.dial(TransportKind::Tcp), listener.accept());
        let stream = dialed.expect("dial");
        assert_eq!(stream.kind(), TransportKind::Tcp);
        accepted.expect("accept");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refused_tcp_dial_reports_kind_and_addr() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let remote = listener.local_addr().expect("addr");
        drop(listener);
        let plan = DialPlan::new(NetAddr::Inet(remote), None, 0);
        match plan.dial_tcp().await {
            Err(NetError::Dial { kind, addr, .. }) => {
                assert_eq!(kind, TransportKind::Tcp);
                assert_eq!(addr, remote.to_string());
            }
            other => panic!("expected dial error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn udp_dial_binds_requested_local() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.expect("peer");
        let remote = peer.local_addr().expect("addr");
        let plan = DialPlan::new(
            NetAddr::Inet(remote),
            Some("127.0.0.1:0".parse().expect("local")),
            1,
        );
        let socket = plan.dial_udp().await.expect("dial");
        assert_eq!(socket.peer_addr().expect("peer"), remote);
        assert!(socket.local_addr().expect("local").ip().is_loopback());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn unix_dial_rejects_local_and_ip_targets() {
        let plan = DialPlan::new(
            NetAddr::unix("/tmp/relaynet-none.sock"),
            Some(NetAddr::unix("/tmp/relaynet-local.sock")),
            0,
        );
        assert!(matches!(
            plan.dial_unix().await,
            Err(NetError::Unsupported(_))
        ));

        let plan = DialPlan::new("127.0.0.1:9".parse().expect("addr"), None, 0);
        assert!(matches!(
            plan.dial(TransportKind::Unix).await,
            Err(NetError::AddressKind { .. })
        ));
    }

    #[test]
    fn interface_addrs_are_non_loopback_ipv4() {
        for ip in local_addrs() {
            assert!(ip.is_ipv4(), "{ip} is not ipv4");
            assert!(!ip.is_loopback(), "{ip} is loopback");
        }
    }

    #[test]
    fn group_rotates_through_addresses() {
        let first: IpAddr = "10.0.0.1".parse().expect("ip");
        let second: IpAddr = "10.0.0.2".parse().expect("ip");
        let group = LocalAddrGroup::from_addrs(vec![first, second]);
        let picked: Vec<_> = (0..20).filter_map(|_| group.next_addr()).collect();
        assert_eq!(picked.len(), 20);
        for (i, addr) in picked.iter().enumerate() {
            let expected = if i % 2 == 0 { first } else { second };
            assert_eq!(*addr, NetAddr::Inet(SocketAddr::new(expected, 0)));
        }
        assert_eq!(LocalAddrGroup::from_addrs(Vec::new()).next_addr(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn group_address_feeds_dial_plan() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.expect("peer");
        let remote = peer.local_addr().expect("addr");
        let group = LocalAddrGroup::from_addrs(vec!["127.0.0.1".parse().expect("ip")]);
        let plan = DialPlan::new(NetAddr::Inet(remote), None, 1).with_local(group.next_addr());
        let expected: NetAddr = "127.0.0.1:0".parse().expect("local");
        assert_eq!(plan.local(), Some(&expected));
        let socket = plan.dial_udp().await.expect("dial");
        assert!(socket.local_addr().expect("local").ip().is_loopback());
    }

    #[test]
    fn set_remote_replaces_target() {
        let mut plan = DialPlan::new("127.0.0.1:1".parse().expect("addr"), None, 10);
        plan.set_remote("127.0.0.1", 16379).expect("set");
        assert_eq!(plan.remote().to_string(), "127.0.0.1:16379");
        assert_eq!(plan.timeout(), Some(Duration::from_secs(10)));
    }
}
