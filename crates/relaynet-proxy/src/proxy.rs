use std::{future::Future, sync::Arc};

use futures::FutureExt;
use relaynet_core::{
    Connection, DialClient, DialPlan, Events, NetAddr, NetError, Server, TcpOptions,
    TransportKind, events::ProcessHook, reconnect,
};
use relaynet_transport_tcp::{TcpClient, TcpServer};
use relaynet_transport_udp::{UdpClient, UdpServer};
#[cfg(unix)]
use relaynet_transport_unix::{UnixClient, UnixServer};
use tracing::{debug, warn};

use crate::{
    relay::{RelayAction, relay_action, relay_data},
    router::{RelayTarget, Relayer, Router},
};

/// 后端拨号的最大尝试次数。
const RELAY_RETRIES: u32 = 3;

/// 按传输类型构造后端客户端。
fn client_for(
    kind: TransportKind,
    plan: DialPlan,
    options: TcpOptions,
) -> Result<Box<dyn DialClient>, NetError> {
    match kind {
        TransportKind::Tcp => Ok(Box::new(TcpClient::new(plan, options))),
        TransportKind::Udp => Ok(Box::new(UdpClient::new(plan, options.socket))),
        #[cfg(unix)]
        TransportKind::Unix => Ok(Box::new(UnixClient::new(plan, options.socket))),
        #[cfg(not(unix))]
        TransportKind::Unix => Err(NetError::Unsupported("unix sockets on this platform")),
    }
}

/// 转发代理：一个入站监听器加上按路由拨号的后端客户端。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `kind` 决定入站监听器的传输类型；后端传输由路由结果决定；
/// - `options` 同时作用于后端 TCP 客户端与入站 TCP 监听器的保活设置，
///   UDP/Unix 只使用其中的通用套接字参数；
/// - `remote` 是 [`Proxy::run`] 默认转发的目标，未设置时所有入站连接都不转发。
pub struct Proxy {
    kind: TransportKind,
    options: TcpOptions,
    server: Arc<Server>,
    remote: Option<NetAddr>,
}

impl Proxy {
    pub fn new(kind: TransportKind, address: NetAddr) -> Self {
        Self {
            kind,
            options: TcpOptions::default(),
            server: Arc::new(Server::new(address)),
            remote: None,
        }
    }

    /// 以主机名与端口构造 TCP/UDP 入站代理。
    pub fn bind(kind: TransportKind, host: &str, port: u16) -> Result<Self, NetError> {
        Ok(Self::new(kind, NetAddr::resolve(host, port)?))
    }

    pub fn with_options(mut self, options: TcpOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_remote(mut self, remote: NetAddr) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn remote(&self) -> Option<&NetAddr> {
        self.remote.as_ref()
    }

    /// 为目标构造后端客户端，尚未拨号。
    pub fn create_client(&self, target: RelayTarget) -> Result<Box<dyn DialClient>, NetError> {
        client_for(target.kind, target.plan, self.options)
    }

    /// 生成 `process` 钩子：路由 → 构造客户端 → 强制重连 → 执行转发动作 → 关闭客户端。
    ///
    /// 路由返回 `None` 或拨号全部失败时直接返回，入站连接随后由收尾流程关闭；
    /// 拨号错误记录在入站连接上，`closed` 钩子可以读到。
    pub fn create_process(&self, router: Arc<dyn Router>, action: RelayAction) -> ProcessHook {
        let options = self.options;
        Arc::new(move |server: Arc<Server>, conn: Arc<Connection>| {
            let router = Arc::clone(&router);
            let action = Arc::clone(&action);
            async move {
                let Some(target) = router.dispatch(&conn) else {
                    debug!(remote = %conn.remote_addr(), "no relay target, dropping connection");
                    return;
                };
                let backend = target.plan.remote().to_string();
                let mut client = match client_for(target.kind, target.plan, options) {
                    Ok(client) => client,
                    Err(err) => {
                        warn!(%backend, error = %err, "cannot build relay client");
                        conn.record_error(err);
                        return;
                    }
                };
                match reconnect(client.as_mut(), true, RELAY_RETRIES).await {
                    Ok(_) => {
                        if let Some(relay) = client.conn() {
                            action(server, conn, relay).await;
                        }
                    }
                    Err(err) => {
                        warn!(%backend, code = err.code(), error = %err, "relay backend unavailable");
                        conn.record_error(err);
                    }
                }
                if let Err(err) = client.close().await {
                    debug!(error = %err, "closing relay client reported an error");
                }
            }
            .boxed()
        })
    }

    /// 未设置任何数据钩子时，安装转发到 `remote` 的默认处理。
    fn with_default_process(&self, mut events: Events) -> Events {
        if events.has_data_hooks() {
            return events;
        }
        let router: Arc<dyn Router> = match self.remote.clone() {
            Some(remote) => Arc::new(Relayer::toward(remote)),
            None => Arc::new(|_: &Connection| -> Option<RelayTarget> { None }),
        };
        let action = relay_action(|server, orig, relay| async move {
            relay_data(server, orig, relay).await;
        });
        events.process = Some(self.create_process(router, action));
        events
    }

    /// 运行入站监听器直到进程退出；只有绑定失败会返回。
    pub async fn run(&self, events: Events) -> Result<(), NetError> {
        self.run_until(events, std::future::pending()).await
    }

    /// 运行入站监听器直到 `stop` 完成。
    pub async fn run_until<S>(&self, events: Events, stop: S) -> Result<(), NetError>
    where
        S: Future<Output = ()> + Send,
    {
        let events = self.with_default_process(events);
        let server = Arc::clone(&self.server);
        match self.kind {
            TransportKind::Tcp => {
                TcpServer::new(server)
                    .with_keep_alive(self.options.keep_alive)
                    .with_socket_options(self.options.socket)
                    .run_until(&events, stop)
                    .await
            }
            TransportKind::Udp => {
                UdpServer::new(server)
                    .with_socket_options(self.options.socket)
                    .run_until(&events, stop)
                    .await
            }
            #[cfg(unix)]
            TransportKind::Unix => {
                UnixServer::new(server)
                    .with_socket_options(self.options.socket)
                    .run_until(&events, stop)
                    .await
            }
            #[cfg(not(unix))]
            TransportKind::Unix => Err(NetError::Unsupported("unix sockets on this platform")),
        }
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("kind", &self.kind)
            .field("server", &self.server)
            .field("remote", &self.remote)
            .finish()
    }
}
