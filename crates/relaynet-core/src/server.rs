//! # 服务端执行模型
//!
//! ## 角色定位（Why）
//! - 所有传输共享同一套单连接状态机：
//!   `Accepted/Dialed → Opened → Active → Closing → Closed`；
//! - 传输监听器只负责产生连接，随后一律交给 [`Server::execute`]，
//!   处理结束后由 [`Server::finish`] 收尾。
//!
//! ## 执行逻辑（How）
//! 1. `opened` 钩子同步执行，返回错误则直接丢弃连接，不进入处理阶段；
//! 2. 每条连接一个任务：设置了 `process` 时只运行它，否则运行默认循环：
//!    - 设置了 `send`：另起发送任务消费出站队列，并把连接标记为可写；
//!    - 同时设置了 `prepare` 与 `receive`：`prepare` 把输入切分为消息，
//!      接收任务逐条调用 `receive`，第一次得到非空键时驱逐旧连接并登记；
//!    - 只设置了 `send`：丢弃入站字节直到对端结束，保持发送任务存活；
//! 3. 任务退出时运行 `finish`：`closed` 钩子 → 注册表驱逐 → 关闭连接。
//!
//! ## 契约（What）
//! - `finish` 对每条连接恰好生效一次，即使连接任务与 [`Server::shutdown`] 并发；
//! - 任一连接的错误或钩子 panic 都不会影响服务端与其他连接。

use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    addr::NetAddr,
    conn::Connection,
    error::NetError,
    events::{Events, PrepareHook, ReceiveHook},
    framing::MessageSink,
    registry::Registry,
};

/// 分帧结果在接收任务前的排队上限。
const SINK_CAPACITY: usize = 64;

/// 一个监听地址、一个注册表与可选的周期任务。
pub struct Server {
    address: NetAddr,
    bound: Mutex<Option<NetAddr>>,
    tick: Option<Duration>,
    registry: Registry,
    live: DashMap<u64, Arc<Connection>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn new(address: NetAddr) -> Self {
        Self {
            address,
            bound: Mutex::new(None),
            tick: None,
            registry: Registry::new(),
            live: DashMap::new(),
            ticker: Mutex::new(None),
        }
    }

    /// 以主机名与端口构造；空主机名监听所有网卡。
    pub fn from_host_port(host: &str, port: u16) -> Result<Self, NetError> {
        Ok(Self::new(NetAddr::resolve(host, port)?))
    }

    /// 设置 `tick` 钩子的触发周期，零值表示不触发。
    pub fn with_tick(mut self, period: Duration) -> Self {
        self.tick = (!period.is_zero()).then_some(period);
        self
    }

    pub fn address(&self) -> &NetAddr {
        &self.address
    }

    /// 监听器实际绑定的地址；尚未绑定时返回配置地址。
    pub fn bound_addr(&self) -> NetAddr {
        self.bound
            .lock()
            .clone()
            .unwrap_or_else(|| self.address.clone())
    }

    /// 由监听器在绑定成功后调用。
    pub fn set_bound_addr(&self, addr: NetAddr) {
        *self.bound.lock() = Some(addr);
    }

    pub fn tick(&self) -> Option<Duration> {
        self.tick
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 正在处理中的连接数（无论是否已登记）。
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// 启动周期任务；重复调用会替换之前的任务。
    pub fn trigger(&self, events: &Events) {
        let (Some(hook), Some(period)) = (events.tick.clone(), self.tick) else {
            return;
        };
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                hook(SystemTime::now());
            }
        });
        if let Some(previous) = self.ticker.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_ticker(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
    }

    /// 向已登记的连接投递下行消息。
    ///
    /// 只有出站队列正在被消费时才真正入队；返回值表示键是否存在。
    pub fn send_to(&self, key: &str, data: Bytes) -> bool {
        let Some(conn) = self.registry.load(key) else {
            return false;
        };
        if !conn.is_read_only() {
            if let Err(err) = conn.enqueue(data) {
                debug!(%key, error = %err, "send_to on closed connection");
            }
        }
        true
    }

    /// 运行 `opened` 钩子并为连接启动处理任务。
    ///
    /// `opened` 拒绝时返回 `None`，连接随最后一个引用释放而关闭。
    pub fn execute(self: &Arc<Self>, events: &Events, conn: Arc<Connection>) -> Option<JoinHandle<()>> {
        if let Some(opened) = &events.opened {
            if let Err(err) = opened(self.as_ref(), &conn) {
                warn!(
                    kind = %conn.kind(),
                    remote = %conn.remote_addr(),
                    error = %err,
                    "connection rejected by opened hook"
                );
                conn.record_error(err);
                return None;
            }
        }
        debug!(kind = %conn.kind(), sid = %conn.session_id(), remote = %conn.remote_addr(), "connection opened");
        self.live.insert(conn.serial(), Arc::clone(&conn));

        let server = Arc::clone(self);
        let events = events.clone();
        Some(tokio::spawn(async move {
            let sender = match events.process.clone() {
                Some(process) => {
                    let run = process(Arc::clone(&server), Arc::clone(&conn));
                    if AssertUnwindSafe(run).catch_unwind().await.is_err() {
                        warn!(sid = %conn.session_id(), "process hook panicked");
                    }
                    None
                }
                None => server.process_default(&events, &conn).await,
            };
            server.finish(&events, &conn).await;
            if let Some(sender) = sender {
                let _ = sender.await;
            }
        }))
    }

    async fn process_default(
        self: &Arc<Self>,
        events: &Events,
        conn: &Arc<Connection>,
    ) -> Option<JoinHandle<()>> {
        let sender = events.send.clone().and_then(|send| {
            let mut outbound = conn.take_outbound()?;
            conn.set_read_only(false);
            let conn = Arc::clone(conn);
            Some(tokio::spawn(async move {
                while let Some(data) = outbound.recv().await {
                    send(Arc::clone(&conn), data).await;
                }
            }))
        });

        let result = match (&events.prepare, &events.receive) {
            (Some(prepare), Some(receive)) => self.scan(conn, prepare, receive).await,
            _ if sender.is_some() => conn.discard().await.map(|_| ()),
            _ => Ok(()),
        };
        if let Err(err) = result {
            if err.is_disconnect() {
                debug!(sid = %conn.session_id(), error = %err, "connection ended");
            } else {
                warn!(sid = %conn.session_id(), code = err.code(), error = %err, "connection loop failed");
            }
            conn.record_error(err);
        }
        sender
    }

    async fn scan(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        prepare: &PrepareHook,
        receive: &ReceiveHook,
    ) -> Result<(), NetError> {
        let (sink, mut messages) = MessageSink::channel(SINK_CAPACITY);
        let server = Arc::clone(self);
        let receive = Arc::clone(receive);
        let owner = Arc::clone(conn);
        let consumer = tokio::spawn(async move {
            let mut saved = false;
            while let Some(message) = messages.recv().await {
                let key = receive(&owner, message, saved);
                if saved {
                    continue;
                }
                let Some(key) = key.filter(|key| !key.is_empty()) else {
                    continue;
                };
                server.registry.evict_override(&key, &owner).await;
                if server.registry.save(key.clone(), Arc::clone(&owner)) {
                    info!(%key, sid = %owner.session_id(), "connection registered");
                    owner.set_key(key);
                    saved = true;
                }
            }
        });

        let result = prepare(Arc::clone(conn), sink).await;
        if consumer.await.is_err() {
            warn!(sid = %conn.session_id(), "receive hook panicked");
        }
        result
    }

    /// 收尾：`closed` 钩子 → 注册表驱逐 → 关闭连接。重复调用是无操作。
    pub async fn finish(&self, events: &Events, conn: &Arc<Connection>) {
        if !conn.mark_finished() {
            return;
        }
        if let Some(closed) = &events.closed {
            let last = conn.last_error();
            closed(self, conn, last.as_deref());
        }
        if let Some(key) = conn.key() {
            self.registry.remove_if_same(&key, conn);
        }
        self.live.remove(&conn.serial());
        if let Err(err) = conn.close().await {
            debug!(error = %err, "close reported an error");
        }
        debug!(kind = %conn.kind(), remote = %conn.remote_addr(), "connection finished");
    }

    /// 停止周期任务，并对注册表中与仍在处理中的每条连接执行 `finish`。
    pub async fn shutdown(&self, events: &Events) {
        self.stop_ticker();
        self.registry
            .cleanup(|conn| async move { self.finish(events, &conn).await })
            .await;
        let remaining: Vec<Arc<Connection>> = self
            .live
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conn in remaining {
            self.finish(events, &conn).await;
        }
        info!(address = %self.address, "server shut down");
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("tick", &self.tick)
            .field("registered", &self.registry.len())
            .field("live", &self.live.len())
            .finish()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
