use std::sync::Arc;

use async_trait::async_trait;
use relaynet_core::{Connection, DialClient, DialPlan, NetError, NetStream, SocketOptions};
use tracing::debug;

/// 可重连的 UDP 客户端，底层是已 `connect` 到远端的套接字。
#[derive(Debug)]
pub struct UdpClient {
    plan: DialPlan,
    options: SocketOptions,
    conn: Option<Arc<Connection>>,
}

impl UdpClient {
    pub fn new(plan: DialPlan, options: SocketOptions) -> Self {
        Self {
            plan,
            options,
            conn: None,
        }
    }

    pub fn plan(&self) -> &DialPlan {
        &self.plan
    }
}

#[async_trait]
impl DialClient for UdpClient {
    fn conn(&self) -> Option<Arc<Connection>> {
        self.conn.clone()
    }

    fn set_conn(&mut self, conn: Arc<Connection>) {
        self.conn = Some(conn);
    }

    async fn dialing(&mut self) -> Result<Arc<Connection>, NetError> {
        let socket = self.plan.dial_udp().await?;
        let conn = Connection::new(NetStream::Udp {
            socket,
            connected: true,
        })?;
        self.options.apply(&conn)?;
        debug!(remote = %conn.remote_addr(), sid = %conn.session_id(), "udp client connected");
        Ok(Arc::new(conn))
    }
}
