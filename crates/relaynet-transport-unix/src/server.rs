use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use relaynet_core::{
    Connection, Events, NetError, Server, SocketOptions, TransportListener, serve,
};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// 删除无人监听的残留套接字文件；有进程在监听时保留，由随后的 `bind` 报告地址占用。
async fn remove_stale(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(err) = UnixStream::connect(path).await {
        if err.kind() == io::ErrorKind::ConnectionRefused {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed stale socket file"),
                Err(err) => warn!(path = %path.display(), error = %err, "failed to remove stale socket file"),
            }
        }
    }
}

/// Unix 域套接字监听器。
pub struct UnixServer {
    server: Arc<Server>,
    listener: Option<UnixListener>,
    path: Option<PathBuf>,
    socket: SocketOptions,
}

impl UnixServer {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            listener: None,
            path: None,
            socket: SocketOptions::default(),
        }
    }

    pub fn with_socket_options(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }

    /// 服务直到进程退出；只有绑定失败会返回。
    pub async fn run(&mut self, events: &Events) -> Result<(), NetError> {
        serve(self, events, std::future::pending()).await
    }

    /// 服务直到 `stop` 完成，随后删除套接字文件并结束全部连接。
    pub async fn run_until<S>(&mut self, events: &Events, stop: S) -> Result<(), NetError>
    where
        S: Future<Output = ()> + Send,
    {
        serve(self, events, stop).await
    }
}

#[async_trait]
impl TransportListener for UnixServer {
    fn server(&self) -> &Arc<Server> {
        &self.server
    }

    async fn startup(&mut self, events: &Events) -> Result<(), NetError> {
        let path = self.server.address().expect_unix()?.to_path_buf();
        remove_stale(&path).await;
        let listener = UnixListener::bind(&path).map_err(|source| NetError::Bind {
            addr: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "unix listener bound");
        self.listener = Some(listener);
        self.path = Some(path);
        self.server.trigger(events);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Arc<Connection>, NetError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or(NetError::Unsupported("accept before startup"))?;
        let (stream, _) = listener.accept().await.map_err(NetError::Accept)?;
        let conn = Connection::new(stream)?;
        self.socket.apply(&conn)?;
        debug!(sid = %conn.session_id(), "unix connection accepted");
        Ok(Arc::new(conn))
    }

    fn close_listener(&mut self) {
        self.listener.take();
        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to remove socket file");
                }
            }
            debug!(path = %path.display(), "unix listener closed");
        }
    }
}

impl std::fmt::Debug for UnixServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixServer")
            .field("server", &self.server)
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for UnixServer {
    fn drop(&mut self) {
        self.close_listener();
    }
}
