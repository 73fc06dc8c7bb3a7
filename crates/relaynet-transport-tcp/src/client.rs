use std::sync::Arc;

use async_trait::async_trait;
use relaynet_core::{Connection, DialClient, DialPlan, NetError, TcpOptions};
use tracing::debug;

/// 可重连的 TCP 客户端。
///
/// 每次拨号成功后依次应用 `TCP_NODELAY`、linger、保活与缓冲区/截止时间，
/// 任一步失败都使本次拨号失败，由重连逻辑继续退避重试。
#[derive(Debug)]
pub struct TcpClient {
    plan: DialPlan,
    options: TcpOptions,
    conn: Option<Arc<Connection>>,
}

impl TcpClient {
    pub fn new(plan: DialPlan, options: TcpOptions) -> Self {
        Self {
            plan,
            options,
            conn: None,
        }
    }

    pub fn plan(&self) -> &DialPlan {
        &self.plan
    }

    pub fn plan_mut(&mut self) -> &mut DialPlan {
        &mut self.plan
    }

    pub fn options(&self) -> &TcpOptions {
        &self.options
    }
}

#[async_trait]
impl DialClient for TcpClient {
    fn conn(&self) -> Option<Arc<Connection>> {
        self.conn.clone()
    }

    fn set_conn(&mut self, conn: Arc<Connection>) {
        self.conn = Some(conn);
    }

    async fn dialing(&mut self) -> Result<Arc<Connection>, NetError> {
        let stream = self.plan.dial_tcp().await?;
        self.options.apply_stream(&stream)?;
        let conn = Connection::new(stream)?;
        self.options.socket.apply(&conn)?;
        debug!(remote = %conn.remote_addr(), sid = %conn.session_id(), "tcp client connected");
        Ok(Arc::new(conn))
    }
}
