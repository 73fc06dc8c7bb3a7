use std::{fmt, future::Future, sync::Arc, time::SystemTime};

use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};

use crate::{
    conn::Connection,
    error::NetError,
    framing::{MessageSink, Splitter},
    server::Server,
};

/// 连接建立后、交换数据前同步执行；返回错误即放弃该连接。
pub type OpenedHook = Arc<dyn Fn(&Server, &Arc<Connection>) -> Result<(), NetError> + Send + Sync>;
/// 把输入切分为消息并推入投递端，流结束或出错时返回。
pub type PrepareHook =
    Arc<dyn Fn(Arc<Connection>, MessageSink) -> BoxFuture<'static, Result<(), NetError>> + Send + Sync>;
/// 处理一条消息，返回应用键；第一次返回非空键时连接被登记。
pub type ReceiveHook = Arc<dyn Fn(&Arc<Connection>, Bytes, bool) -> Option<String> + Send + Sync>;
/// 每条出站消息调用一次。
pub type SendHook = Arc<dyn Fn(Arc<Connection>, Bytes) -> BoxFuture<'static, ()> + Send + Sync>;
/// 处理结束后、注册表驱逐前恰好执行一次。
pub type ClosedHook = Arc<dyn Fn(&Server, &Arc<Connection>, Option<&NetError>) + Send + Sync>;
pub type TickHook = Arc<dyn Fn(SystemTime) + Send + Sync>;
/// 监听地址绑定后执行一次。
pub type ServingHook = Arc<dyn Fn(&Server) + Send + Sync>;
/// 完全替换默认的单连接处理循环。
pub type ProcessHook = Arc<dyn Fn(Arc<Server>, Arc<Connection>) -> BoxFuture<'static, ()> + Send + Sync>;

/// 由应用注入的可选钩子集合。
///
/// # 教案式说明
/// - **意图 (Why)**：以配置对象而非继承层次表达“可插拔行为”，未设置的钩子即无操作；
/// - **契约 (What)**：`process` 一旦设置，服务端不再运行默认的收发循环，
///   `prepare`/`receive`/`send` 全部被忽略（代理模式依赖这一点）；
/// - **用法 (How)**：以 `on_*` 构建器注入闭包，异步钩子直接传入返回 `Future` 的闭包，
///   构建器负责装箱。
#[derive(Clone, Default)]
pub struct Events {
    pub opened: Option<OpenedHook>,
    pub prepare: Option<PrepareHook>,
    pub receive: Option<ReceiveHook>,
    pub send: Option<SendHook>,
    pub closed: Option<ClosedHook>,
    pub tick: Option<TickHook>,
    pub serving: Option<ServingHook>,
    pub process: Option<ProcessHook>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_opened<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Server, &Arc<Connection>) -> Result<(), NetError> + Send + Sync + 'static,
    {
        self.opened = Some(Arc::new(hook));
        self
    }

    pub fn on_prepare<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Connection>, MessageSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), NetError>> + Send + 'static,
    {
        self.prepare = Some(Arc::new(move |conn, sink| hook(conn, sink).boxed()));
        self
    }

    /// 以分帧器工厂构造 `prepare`：每条连接创建一个分帧器并扫描其输入。
    pub fn with_splitter<M, S>(self, make: M) -> Self
    where
        M: Fn(&Connection) -> S + Send + Sync + 'static,
        S: Splitter + 'static,
    {
        self.on_prepare(move |conn: Arc<Connection>, sink: MessageSink| {
            let mut splitter = make(conn.as_ref());
            async move { conn.scan_input(&sink, &mut splitter).await.map(|_| ()) }
        })
    }

    pub fn on_receive<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Connection>, Bytes, bool) -> Option<String> + Send + Sync + 'static,
    {
        self.receive = Some(Arc::new(hook));
        self
    }

    pub fn on_send<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Connection>, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.send = Some(Arc::new(move |conn, data| hook(conn, data).boxed()));
        self
    }

    pub fn on_closed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Server, &Arc<Connection>, Option<&NetError>) + Send + Sync + 'static,
    {
        self.closed = Some(Arc::new(hook));
        self
    }

    pub fn on_tick<F>(mut self, hook: F) -> Self
    where
        F: Fn(SystemTime) + Send + Sync + 'static,
    {
        self.tick = Some(Arc::new(hook));
        self
    }

    pub fn on_serving<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Server) + Send + Sync + 'static,
    {
        self.serving = Some(Arc::new(hook));
        self
    }

    pub fn on_process<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Server>, Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.process = Some(Arc::new(move |server, conn| hook(server, conn).boxed()));
        self
    }

    /// 是否设置了任何数据钩子（`process`、`receive` 或 `send`）。
    pub fn has_data_hooks(&self) -> bool {
        self.process.is_some() || self.receive.is_some() || self.send.is_some()
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("opened", &self.opened.is_some())
            .field("prepare", &self.prepare.is_some())
            .field("receive", &self.receive.is_some())
            .field("send", &self.send.is_some())
            .field("closed", &self.closed.is_some())
            .field("tick", &self.tick.is_some())
            .field("serving", &self.serving.is_some())
            .field("process", &self.process.is_some())
            .finish()
    }
}
