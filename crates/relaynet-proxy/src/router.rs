use std::path::PathBuf;

use relaynet_core::{Connection, DialPlan, NetAddr, TransportKind};

/// 静态路由默认使用的拨号超时（秒）。
pub const RELAY_DIAL_TIMEOUT_SECS: u64 = 10;

/// 一条入站连接应被转发到的后端。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayTarget {
    pub kind: TransportKind,
    pub plan: DialPlan,
}

impl RelayTarget {
    pub fn new(kind: TransportKind, plan: DialPlan) -> Self {
        Self { kind, plan }
    }
}

/// 为入站连接选择后端；返回 `None` 表示不转发该连接。
///
/// 路由在连接任务内同步调用，实现不应阻塞。
pub trait Router: Send + Sync {
    fn dispatch(&self, conn: &Connection) -> Option<RelayTarget>;
}

impl<F> Router for F
where
    F: Fn(&Connection) -> Option<RelayTarget> + Send + Sync,
{
    fn dispatch(&self, conn: &Connection) -> Option<RelayTarget> {
        self(conn)
    }
}

/// 把所有连接都转发到同一个后端的静态路由。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relayer {
    target: RelayTarget,
}

impl Relayer {
    pub fn new(kind: TransportKind, remote: NetAddr) -> Self {
        Self {
            target: RelayTarget::new(kind, DialPlan::new(remote, None, RELAY_DIAL_TIMEOUT_SECS)),
        }
    }

    /// 转发到 TCP 后端。
    pub fn tcp(remote: NetAddr) -> Self {
        Self::new(TransportKind::Tcp, remote)
    }

    /// 转发到 Unix 域套接字后端。
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::new(TransportKind::Unix, NetAddr::unix(path))
    }

    /// 依据地址类型选择后端传输：路径走 Unix，IP 走 TCP。
    pub fn toward(remote: NetAddr) -> Self {
        match remote {
            NetAddr::Unix(path) => Self::unix(path),
            other => Self::tcp(other),
        }
    }

    pub fn target(&self) -> &RelayTarget {
        &self.target
    }
}

impl Router for Relayer {
    fn dispatch(&self, _conn: &Connection) -> Option<RelayTarget> {
        Some(self.target.clone())
    }
}
