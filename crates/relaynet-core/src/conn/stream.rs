use std::{
    fmt, io,
    net::SocketAddr,
    sync::Arc,
};

use bytes::BytesMut;
use parking_lot::Mutex;
use socket2::SockRef;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket, tcp},
};

#[cfg(unix)]
use tokio::net::{UnixStream, unix};

use crate::{
    addr::NetAddr,
    error::{LOCAL_ADDR, NetError},
};

/// 单个 UDP 报文的最大长度。
pub(crate) const MAX_DATAGRAM: usize = 64 * 1024;

/// 连接的传输类型标签，在构造时由 [`NetStream`] 的变体决定。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Udp,
    Unix,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
            TransportKind::Unix => "unix",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "udp" => Ok(TransportKind::Udp),
            "unix" => Ok(TransportKind::Unix),
            _ => Err(NetError::Unsupported("transport kind")),
        }
    }
}

/// 已建立（或已接受）的原始传输句柄。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 以显式枚举表达“连接背后是哪种套接字”，连接层据此拆分读写两半并保留
///   一个可用于调参与强制关闭的控制句柄，无需任何运行期类型探测；
///
/// ## 契约（What）
/// - `Udp { connected: true }`：已 `connect` 的客户端套接字，使用 `send`/`recv`；
/// - `Udp { connected: false }`：仅绑定的服务端套接字，使用 `recv_from`，
///   并向最近一次收到报文的对端回复；
/// - `Unix` 变体仅在类 Unix 平台存在。
#[derive(Debug)]
pub enum NetStream {
    Tcp(TcpStream),
    Udp { socket: UdpSocket, connected: bool },
    #[cfg(unix)]
    Unix(UnixStream),
}

impl NetStream {
    /// 变体对应的传输类型。
    pub fn kind(&self) -> TransportKind {
        match self {
            NetStream::Tcp(_) => TransportKind::Tcp,
            NetStream::Udp { .. } => TransportKind::Udp,
            #[cfg(unix)]
            NetStream::Unix(_) => TransportKind::Unix,
        }
    }

    /// 拆分为读半部、写半部与控制句柄。
    pub(crate) fn split(self) -> Result<StreamParts, NetError> {
        match self {
            NetStream::Tcp(stream) => {
                let local = stream.local_addr().map_err(|err| NetError::io(LOCAL_ADDR, err))?;
                let remote = stream.peer_addr().map_err(|err| NetError::io(LOCAL_ADDR, err))?;
                let control = SockRef::from(&stream).try_clone().ok();
                let (read, write) = stream.into_split();
                Ok(StreamParts {
                    kind: TransportKind::Tcp,
                    local: NetAddr::Inet(local),
                    remote: NetAddr::Inet(remote),
                    reader: NetReader::Tcp(read),
                    writer: NetWriter::Tcp(write),
                    control,
                    udp_peer: None,
                })
            }
            NetStream::Udp { socket, connected } => {
                let local = socket.local_addr().map_err(|err| NetError::io(LOCAL_ADDR, err))?;
                let remote = if connected {
                    socket
                        .peer_addr()
                        .map(NetAddr::Inet)
                        .map_err(|err| NetError::io(LOCAL_ADDR, err))?
                } else {
                    NetAddr::Unnamed
                };
                let control = SockRef::from(&socket).try_clone().ok();
                let peer = PeerSlot::default();
                let link = Arc::new(UdpLink {
                    socket,
                    connected,
                    last_peer: Arc::clone(&peer),
                });
                Ok(StreamParts {
                    kind: TransportKind::Udp,
                    local: NetAddr::Inet(local),
                    remote,
                    reader: NetReader::Udp(Arc::clone(&link)),
                    writer: NetWriter::Udp(Arc::clone(&link)),
                    control,
                    udp_peer: Some(peer),
                })
            }
            #[cfg(unix)]
            NetStream::Unix(stream) => {
                let local = stream
                    .local_addr()
                    .map(|addr| unix_addr(addr.as_pathname()))
                    .map_err(|err| NetError::io(LOCAL_ADDR, err))?;
                let remote = stream
                    .peer_addr()
                    .map(|addr| unix_addr(addr.as_pathname()))
                    .map_err(|err| NetError::io(LOCAL_ADDR, err))?;
                let control = SockRef::from(&stream).try_clone().ok();
                let (read, write) = stream.into_split();
                Ok(StreamParts {
                    kind: TransportKind::Unix,
                    local,
                    remote,
                    reader: NetReader::Unix(read),
                    writer: NetWriter::Unix(write),
                    control,
                    udp_peer: None,
                })
            }
        }
    }
}

#[cfg(unix)]
fn unix_addr(path: Option<&std::path::Path>) -> NetAddr {
    match path {
        Some(path) => NetAddr::unix(path),
        None => NetAddr::Unnamed,
    }
}

impl From<TcpStream> for NetStream {
    fn from(stream: TcpStream) -> Self {
        NetStream::Tcp(stream)
    }
}

#[cfg(unix)]
impl From<UnixStream> for NetStream {
    fn from(stream: UnixStream) -> Self {
        NetStream::Unix(stream)
    }
}

pub(crate) struct StreamParts {
    pub(crate) kind: TransportKind,
    pub(crate) local: NetAddr,
    pub(crate) remote: NetAddr,
    pub(crate) reader: NetReader,
    pub(crate) writer: NetWriter,
    pub(crate) control: Option<socket2::Socket>,
    pub(crate) udp_peer: Option<PeerSlot>,
}

/// 未连接 UDP 套接字最近一次收到报文的来源。
///
/// 与套接字分开持有：连接关闭时读写两半连同套接字一起释放，
/// 而 `remote_addr` 仍可读到最后的对端。
pub(crate) type PeerSlot = Arc<Mutex<Option<SocketAddr>>>;

/// 同一 UDP 套接字由读写两侧共享，两侧都释放后套接字随之关闭。
#[derive(Debug)]
pub(crate) struct UdpLink {
    socket: UdpSocket,
    connected: bool,
    last_peer: PeerSlot,
}

impl UdpLink {
    async fn recv_buf(&self, buf: &mut BytesMut) -> io::Result<usize> {
        buf.reserve(MAX_DATAGRAM);
        if self.connected {
            return self.socket.recv_buf(buf).await;
        }
        let (n, peer) = self.socket.recv_buf_from(buf).await?;
        *self.last_peer.lock() = Some(peer);
        Ok(n)
    }

    async fn send(&self, data: &[u8]) -> io::Result<usize> {
        if self.connected {
            return self.socket.send(data).await;
        }
        let peer = *self.last_peer.lock();
        match peer {
            Some(peer) => self.socket.send_to(data, peer).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no datagram received yet, peer unknown",
            )),
        }
    }
}

#[derive(Debug)]
pub(crate) enum NetReader {
    Tcp(tcp::OwnedReadHalf),
    Udp(Arc<UdpLink>),
    #[cfg(unix)]
    Unix(unix::OwnedReadHalf),
}

impl NetReader {
    /// 向 `buf` 追加一次读取的数据，返回 0 表示对端结束。
    ///
    /// UDP 每次读取恰好一个报文；零长度报文同样返回 0。
    pub(crate) async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            NetReader::Tcp(half) => half.read_buf(buf).await,
            NetReader::Udp(link) => link.recv_buf(buf).await,
            #[cfg(unix)]
            NetReader::Unix(half) => half.read_buf(buf).await,
        }
    }
}

#[derive(Debug)]
pub(crate) enum NetWriter {
    Tcp(tcp::OwnedWriteHalf),
    Udp(Arc<UdpLink>),
    #[cfg(unix)]
    Unix(unix::OwnedWriteHalf),
}

impl NetWriter {
    /// 单次写入，返回实际写出的字节数。
    pub(crate) async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            NetWriter::Tcp(half) => half.write(data).await,
            NetWriter::Udp(link) => link.send(data).await,
            #[cfg(unix)]
            NetWriter::Unix(half) => half.write(data).await,
        }
    }

    /// 写出全部数据；UDP 以单个报文发送。
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            NetWriter::Tcp(half) => half.write_all(data).await,
            NetWriter::Udp(link) => {
                let sent = link.send(data).await?;
                if sent < data.len() {
                    return Err(io::Error::from(io::ErrorKind::WriteZero));
                }
                Ok(())
            }
            #[cfg(unix)]
            NetWriter::Unix(half) => half.write_all(data).await,
        }
    }

    /// 半关闭写方向；UDP 无此概念，直接返回成功。
    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            NetWriter::Tcp(half) => half.shutdown().await,
            NetWriter::Udp(_) => Ok(()),
            #[cfg(unix)]
            NetWriter::Unix(half) => half.shutdown().await,
        }
    }
}
