//! # 传输监听器契约
//!
//! 每种传输实现 [`TransportListener`]：负责绑定、接受连接与关闭监听套接字；
//! 接受到的连接统一交给 [`Server::execute`]。[`serve`] 把这些步骤串成完整的
//! 服务循环：`startup` → `serving` 钩子 → 接受循环 → `shutdown`。
//!
//! 接受循环对任何接受错误都只记录并继续，不区分瞬时错误与监听器已失效；
//! 监听套接字失效后该循环会持续报错空转，直到停止信号到来。

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{conn::Connection, error::NetError, events::Events, server::Server};

#[async_trait]
pub trait TransportListener: Send {
    /// 被包装的服务端。
    fn server(&self) -> &Arc<Server>;

    /// 绑定并开始监听，同时启动周期任务。
    async fn startup(&mut self, events: &Events) -> Result<(), NetError>;

    /// 等待下一条连接。
    async fn accept(&mut self) -> Result<Arc<Connection>, NetError>;

    /// 接管刚启动的连接任务；默认不做任何事。
    async fn track(&mut self, _handle: JoinHandle<()>) {}

    /// 释放监听套接字。
    fn close_listener(&mut self);

    /// 关闭监听套接字，并强制结束仍在处理中的连接。
    async fn shutdown(&mut self, events: &Events) {
        self.close_listener();
        self.server().shutdown(events).await;
    }
}

/// 运行监听器直到 `stop` 完成。
///
/// 只有 `startup` 失败会以错误返回；停止后监听器已经完成 `shutdown`。
pub async fn serve<L, S>(listener: &mut L, events: &Events, stop: S) -> Result<(), NetError>
where
    L: TransportListener + ?Sized,
    S: Future<Output = ()> + Send,
{
    listener.startup(events).await?;
    let server = Arc::clone(listener.server());
    info!(address = %server.address(), "serving");
    if let Some(serving) = &events.serving {
        serving(&server);
    }

    tokio::pin!(stop);
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => {
                    if let Some(handle) = server.execute(events, conn) {
                        listener.track(handle).await;
                    }
                }
                Err(err) => {
                    warn!(address = %server.address(), code = err.code(), error = %err, "accept failed");
                }
            },
        }
    }

    listener.shutdown(events).await;
    Ok(())
}
