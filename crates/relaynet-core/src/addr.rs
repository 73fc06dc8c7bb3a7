use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::error::NetError;

/// 监听与拨号共用的网络地址。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 在 TCP、UDP 与 Unix 套接字之间提供一致的地址表达，使 [`Server`](crate::Server)
///   与 [`DialPlan`](crate::DialPlan) 不必关心具体传输；
/// - Unix 监听器要求地址必须是文件系统路径，因此路径地址单独成为一个变体，
///   由监听器在启动阶段显式校验，而不是依赖运行期类型探测。
///
/// ## 契约（What）
/// - `Inet`：IPv4/IPv6 套接字地址，供 TCP 与 UDP 使用；
/// - `Unix`：文件系统路径；
/// - `Unnamed`：未绑定路径的 Unix 对端（例如客户端一侧的匿名套接字）；
/// - `Display` 输出稳定格式：`127.0.0.1:80`、`unix:/tmp/a.sock`、`unix:(unnamed)`。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NetAddr {
    /// IP 套接字地址。
    Inet(SocketAddr),
    /// Unix 套接字路径。
    Unix(PathBuf),
    /// 匿名 Unix 套接字。
    Unnamed,
}

impl NetAddr {
    /// 依据主机名与端口解析 IP 地址，取解析结果中的第一个。
    ///
    /// 空主机名视为 `0.0.0.0`，与监听“所有网卡”的习惯一致。
    pub fn resolve(host: &str, port: u16) -> Result<Self, NetError> {
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(NetAddr::Inet(SocketAddr::new(ip, port)));
        }
        let display = format!("{host}:{port}");
        let mut candidates = (host, port).to_socket_addrs().map_err(|_| NetError::AddressKind {
            expected: "resolvable host",
            addr: display.clone(),
        })?;
        candidates
            .next()
            .map(NetAddr::Inet)
            .ok_or(NetError::AddressKind {
                expected: "resolvable host",
                addr: display,
            })
    }

    /// 构造 Unix 路径地址。
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        NetAddr::Unix(path.into())
    }

    /// 返回 IP 地址，非 IP 地址返回 `None`。
    pub fn as_inet(&self) -> Option<SocketAddr> {
        match self {
            NetAddr::Inet(addr) => Some(*addr),
            _ => None,
        }
    }

    /// 返回 Unix 路径，非路径地址返回 `None`。
    pub fn as_unix(&self) -> Option<&Path> {
        match self {
            NetAddr::Unix(path) => Some(path.as_path()),
            _ => None,
        }
    }

    /// 要求地址为 IP 地址，否则返回 [`NetError::AddressKind`]。
    pub fn expect_inet(&self) -> Result<SocketAddr, NetError> {
        self.as_inet().ok_or_else(|| NetError::AddressKind {
            expected: "ip",
            addr: self.to_string(),
        })
    }

    /// 要求地址为 Unix 路径，否则返回 [`NetError::AddressKind`]。
    pub fn expect_unix(&self) -> Result<&Path, NetError> {
        self.as_unix().ok_or_else(|| NetError::AddressKind {
            expected: "unix path",
            addr: self.to_string(),
        })
    }
}

/// 与 `remote` 同族的通配地址（端口 0），用于未指定本地地址时的 UDP 绑定。
pub(crate) fn unspecified_for(remote: SocketAddr) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddr::Inet(addr) => write!(f, "{addr}"),
            NetAddr::Unix(path) => write!(f, "unix:{}", path.display()),
            NetAddr::Unnamed => f.write_str("unix:(unnamed)"),
        }
    }
}

impl From<SocketAddr> for NetAddr {
    fn from(addr: SocketAddr) -> Self {
        NetAddr::Inet(addr)
    }
}

impl From<PathBuf> for NetAddr {
    fn from(path: PathBuf) -> Self {
        NetAddr::Unix(path)
    }
}

impl FromStr for NetAddr {
    type Err = NetError;

    /// 解析 `host:port`、`[v6]:port`、`unix:/path` 或以 `/` 开头的路径。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(NetAddr::unix(path));
        }
        if s.starts_with('/') {
            return Ok(NetAddr::unix(s));
        }
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(NetAddr::Inet(addr));
        }
        let (host, port) = s.rsplit_once(':').ok_or_else(|| NetError::AddressKind {
            expected: "host:port",
            addr: s.to_owned(),
        })?;
        let port = port.parse::<u16>().map_err(|_| NetError::AddressKind {
            expected: "host:port",
            addr: s.to_owned(),
        })?;
        NetAddr::resolve(host, port)
    }
}
