use std::{future::Future, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use relaynet_core::{
    Connection, Events, NetAddr, NetError, NetStream, Server, SocketOptions, TransportListener,
    serve,
};
use tokio::{net::UdpSocket, task::JoinHandle};
use tracing::{debug, info};

async fn bind_udp(addr: SocketAddr) -> Result<UdpSocket, NetError> {
    UdpSocket::bind(addr).await.map_err(|source| NetError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// UDP 监听器：每个逻辑会话独占一个绑定在监听地址上的套接字。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// - `startup` 绑定第一个套接字并记下实际地址（端口 0 时由系统分配）；
/// - `accept` 先等待上一个会话任务结束，再取出预绑定的套接字或在记下的地址上重新绑定；
/// - `track` 记录刚启动的会话任务，供下一次 `accept` 等待。
///
/// ## 注意事项
/// - `accept` 被停止信号取消时只会丢弃等待，不会丢失会话句柄。
pub struct UdpServer {
    server: Arc<Server>,
    local: Option<SocketAddr>,
    pending: Option<UdpSocket>,
    previous: Option<JoinHandle<()>>,
    socket: SocketOptions,
}

impl UdpServer {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            local: None,
            pending: None,
            previous: None,
            socket: SocketOptions::default(),
        }
    }

    /// 以主机名与端口构造；空主机名监听所有网卡。
    pub fn bind(host: &str, port: u16) -> Result<Self, NetError> {
        Ok(Self::new(Arc::new(Server::from_host_port(host, port)?)))
    }

    pub fn with_socket_options(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }

    /// 服务直到进程退出；只有绑定失败会返回。
    pub async fn run(&mut self, events: &Events) -> Result<(), NetError> {
        serve(self, events, std::future::pending()).await
    }

    /// 服务直到 `stop` 完成，随后释放套接字并结束当前会话。
    pub async fn run_until<S>(&mut self, events: &Events, stop: S) -> Result<(), NetError>
    where
        S: Future<Output = ()> + Send,
    {
        serve(self, events, stop).await
    }
}

#[async_trait]
impl TransportListener for UdpServer {
    fn server(&self) -> &Arc<Server> {
        &self.server
    }

    async fn startup(&mut self, events: &Events) -> Result<(), NetError> {
        let addr = self.server.address().expect_inet()?;
        let socket = bind_udp(addr).await?;
        let local = socket.local_addr().unwrap_or(addr);
        self.server.set_bound_addr(NetAddr::Inet(local));
        info!(address = %local, "udp listener bound");
        self.local = Some(local);
        self.pending = Some(socket);
        self.server.trigger(events);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Arc<Connection>, NetError> {
        if let Some(previous) = self.previous.as_mut() {
            let _ = previous.await;
            self.previous = None;
        }
        let socket = match self.pending.take() {
            Some(socket) => socket,
            None => {
                let addr = self
                    .local
                    .ok_or(NetError::Unsupported("accept before startup"))?;
                bind_udp(addr).await?
            }
        };
        let conn = Connection::new(NetStream::Udp {
            socket,
            connected: false,
        })?;
        self.socket.apply(&conn)?;
        debug!(local = %conn.local_addr(), sid = %conn.session_id(), "udp session opened");
        Ok(Arc::new(conn))
    }

    async fn track(&mut self, handle: JoinHandle<()>) {
        self.previous = Some(handle);
    }

    fn close_listener(&mut self) {
        self.pending.take();
        if self.local.take().is_some() {
            debug!(address = %self.server.bound_addr(), "udp listener closed");
        }
    }
}

impl std::fmt::Debug for UdpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpServer")
            .field("server", &self.server)
            .field("local", &self.local)
            .field("session_running", &self.previous.is_some())
            .finish()
    }
}
