//! # 双向字节转发
//!
//! ## 执行逻辑（How）
//! 1. 后台任务复制“出站 → 入站”，后端结束时半关闭入站写方向，让客户端读到 EOF；
//! 2. 当前任务复制“入站 → 出站”，客户端断开或出错时立即结束；
//! 3. 关闭出站连接，打断仍阻塞在后端读取上的后台任务，再等待其退出。
//!
//! ## 注意事项
//! - 两个方向不能对调：主任务必须读取入站一侧，否则客户端断开会被后端方向的等待掩盖；
//! - 函数返回时后台任务已结束，出站连接已关闭，不会遗留任务或套接字。

use std::{future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use relaynet_core::{Connection, NetError, Server};
use tracing::{debug, info};

/// 拿到入站与出站两条连接后执行的转发动作。
pub type RelayAction =
    Arc<dyn Fn(Arc<Server>, Arc<Connection>, Arc<Connection>) -> BoxFuture<'static, ()> + Send + Sync>;

/// 把异步闭包包装为 [`RelayAction`]。
pub fn relay_action<F, Fut>(action: F) -> RelayAction
where
    F: Fn(Arc<Server>, Arc<Connection>, Arc<Connection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |server, orig, relay| action(server, orig, relay).boxed())
}

/// 一次转发在两个方向上复制的字节数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub inbound_to_outbound: u64,
    pub outbound_to_inbound: u64,
}

/// 从 `from` 读到 EOF 或出错为止，逐块写入 `to`。
async fn pump(from: &Connection, to: &Connection) -> (u64, Option<NetError>) {
    let mut total = 0u64;
    loop {
        match from.read_chunk().await {
            Ok(Some(chunk)) => {
                if let Err(err) = to.write_all(&chunk).await {
                    return (total, Some(err));
                }
                total += chunk.len() as u64;
            }
            Ok(None) => return (total, None),
            Err(err) => return (total, Some(err)),
        }
    }
}

/// 默认转发动作：原样复制两个方向的字节。
pub async fn relay_data(
    _server: Arc<Server>,
    orig: Arc<Connection>,
    relay: Arc<Connection>,
) -> RelayStats {
    debug!(
        inbound = %orig.remote_addr(),
        outbound = %relay.remote_addr(),
        "relay started"
    );
    let backward = {
        let orig = Arc::clone(&orig);
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            let (copied, err) = pump(&relay, &orig).await;
            if err.is_none() {
                // 后端已结束，半关闭入站写方向让客户端读到 EOF
                if let Err(err) = orig.shutdown_write().await {
                    debug!(error = %err, "half-closing inbound connection failed");
                }
            }
            (copied, err)
        })
    };

    let (forward, forward_err) = pump(&orig, &relay).await;
    if let Err(err) = relay.close().await {
        debug!(error = %err, "closing outbound connection reported an error");
    }
    let (backward, backward_err) = match backward.await {
        Ok(result) => result,
        Err(err) => {
            debug!(error = %err, "outbound to inbound copy task did not complete");
            (0, None)
        }
    };

    if let Some(err) = forward_err.filter(|err| !err.is_disconnect()) {
        debug!(error = %err, "inbound to outbound copy failed");
        orig.record_error(err);
    }
    if let Some(err) = backward_err.filter(|err| !err.is_disconnect()) {
        debug!(error = %err, "outbound to inbound copy failed");
    }
    let stats = RelayStats {
        inbound_to_outbound: forward,
        outbound_to_inbound: backward,
    };
    info!(
        inbound = %orig.remote_addr(),
        sent = stats.inbound_to_outbound,
        received = stats.outbound_to_inbound,
        "relay finished"
    );
    stats
}
