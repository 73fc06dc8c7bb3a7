use std::{future::Future, io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use relaynet_core::{
    Connection, Events, KeepAlive, NetAddr, NetError, Server, SocketOptions, TransportListener,
    serve,
};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// 监听队列长度。
const BACKLOG: i32 = 1024;

/// 以端口复用方式绑定 TCP 监听套接字。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - Tokio 的 `TcpListener::bind` 不暴露 `SO_REUSEPORT`，因此先用 `socket2` 构造原始套接字，
///   完成选项设置后再交给 Tokio。
///
/// ## 逻辑（How）
/// 1. 按地址族创建流式套接字，开启 `SO_REUSEADDR`；
/// 2. POSIX 平台（Solaris/illumos 除外）开启 `SO_REUSEPORT`；
/// 3. 设为非阻塞后 `bind` + `listen`，转换为 Tokio 监听器。
///
/// ## 契约（What）
/// - 必须在 Tokio 运行时内调用；
/// - 任一步骤失败都返回 [`NetError::Bind`]，错误中带有目标地址。
pub fn listen_tcp(addr: SocketAddr) -> Result<TcpListener, NetError> {
    let bind = || -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(BACKLOG)?;
        TcpListener::from_std(socket.into())
    };
    bind().map_err(|source| NetError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// TCP 监听器。
///
/// 保活参数只在显式配置（`idle` 非零）时应用；缓冲区与截止时间在包装为连接后应用。
pub struct TcpServer {
    server: Arc<Server>,
    listener: Option<TcpListener>,
    keep_alive: KeepAlive,
    socket: SocketOptions,
}

impl TcpServer {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            listener: None,
            keep_alive: KeepAlive::default(),
            socket: SocketOptions::default(),
        }
    }

    /// 以主机名与端口构造；空主机名监听所有网卡。
    pub fn bind(host: &str, port: u16) -> Result<Self, NetError> {
        Ok(Self::new(Arc::new(Server::from_host_port(host, port)?)))
    }

    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_socket_options(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }

    /// 服务直到进程退出；只有绑定失败会返回。
    pub async fn run(&mut self, events: &Events) -> Result<(), NetError> {
        serve(self, events, std::future::pending()).await
    }

    /// 服务直到 `stop` 完成，随后关闭监听套接字并结束全部连接。
    pub async fn run_until<S>(&mut self, events: &Events, stop: S) -> Result<(), NetError>
    where
        S: Future<Output = ()> + Send,
    {
        serve(self, events, stop).await
    }
}

#[async_trait]
impl TransportListener for TcpServer {
    fn server(&self) -> &Arc<Server> {
        &self.server
    }

    async fn startup(&mut self, events: &Events) -> Result<(), NetError> {
        let addr = self.server.address().expect_inet()?;
        let listener = listen_tcp(addr)?;
        if let Ok(bound) = listener.local_addr() {
            self.server.set_bound_addr(NetAddr::Inet(bound));
        }
        info!(address = %self.server.bound_addr(), "tcp listener bound");
        self.listener = Some(listener);
        self.server.trigger(events);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Arc<Connection>, NetError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or(NetError::Unsupported("accept before startup"))?;
        let (stream, peer) = listener.accept().await.map_err(NetError::Accept)?;
        self.keep_alive.apply(&stream)?;
        let conn = Connection::new(stream)?;
        self.socket.apply(&conn)?;
        debug!(%peer, sid = %conn.session_id(), "tcp connection accepted");
        Ok(Arc::new(conn))
    }

    fn close_listener(&mut self) {
        if self.listener.take().is_some() {
            debug!(address = %self.server.bound_addr(), "tcp listener closed");
        }
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("server", &self.server)
            .field("listening", &self.listener.is_some())
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}
