use std::sync::Arc;

use async_trait::async_trait;
use relaynet_core::{Connection, DialClient, DialPlan, NetError, SocketOptions};
use tracing::debug;

/// 可重连的 Unix 域套接字客户端。
#[derive(Debug)]
pub struct UnixClient {
    plan: DialPlan,
    options: SocketOptions,
    conn: Option<Arc<Connection>>,
}

impl UnixClient {
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
impl DialClient for UnixClient {
    fn conn(&self) -> Option<Arc<Connection>> {
        self.conn.clone()
    }

    fn set_conn(&mut self, conn: Arc<Connection>) {
        self.conn = Some(conn);
    }

    async fn dialing(&mut self) -> Result<Arc<Connection>, NetError> {
        let stream = self.plan.dial_unix().await?;
        let conn = Connection::new(stream)?;
        self.options.apply(&conn)?;
        debug!(remote = %conn.remote_addr(), sid = %conn.session_id(), "unix client connected");
        Ok(Arc::new(conn))
    }
}
