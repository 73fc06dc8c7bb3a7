//! # 连接（Connection）
//!
//! ## 角色定位（Why）
//! - 把一个 TCP/UDP/Unix 句柄包装为传输无关的连接：统一读、写、半关闭、
//!   调参与关闭，并挂载会话、出站队列与最近一次错误；
//! - Tokio 没有“关闭句柄即打断阻塞调用”的语义，因此连接内置关闭信号：
//!   [`Connection::close`] 触发信号后，所有挂起的读写立即以
//!   [`NetError::LostConnection`] 返回并释放各自的锁。
//!
//! ## 结构（How）
//! - 读写两半分别由独立的异步锁保护，读任务与发送任务互不阻塞；
//! - 控制句柄是同一套接字的副本，用于设置缓冲区大小以及关闭时的 `shutdown`；
//! - 每次读写都经由 `run_guarded`，同时等待关闭信号、截止时间与 IO 本身。
//!
//! ## 契约（What）
//! - `active` 只会从 `true` 变为 `false` 一次，第二次 `close` 是无操作；
//! - 出站队列的发送端在关闭时被丢弃，队列恰好关闭一次；
//! - 关闭后会话标识失效，底层套接字随读写两半一并释放，
//!   即使仍有其他持有者保留着 `Arc<Connection>`。

mod reader;
mod stream;

use std::{
    future::Future,
    io,
    net::Shutdown,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc, watch},
    time::Instant,
};
use tracing::debug;

pub use stream::{NetStream, TransportKind};

use self::{
    reader::BufferedReader,
    stream::{NetWriter, PeerSlot},
};
use crate::{
    addr::NetAddr,
    error::{CONFIGURE, NetError, SHUTDOWN, WRITE},
    framing::{MessageSink, Splitter},
    session::Session,
};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// 出站队列的接收端，由发送任务独占。
pub type Outbound = mpsc::UnboundedReceiver<Bytes>;

/// 传输无关的单条连接。
pub struct Connection {
    serial: u64,
    kind: TransportKind,
    local: NetAddr,
    remote: NetAddr,
    reader: AsyncMutex<Option<BufferedReader>>,
    writer: AsyncMutex<Option<NetWriter>>,
    control: Mutex<Option<socket2::Socket>>,
    udp_peer: Option<PeerSlot>,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    outbound_rx: Mutex<Option<Outbound>>,
    active: AtomicBool,
    read_only: AtomicBool,
    finished: AtomicBool,
    session: Session,
    last_error: Mutex<Option<Arc<NetError>>>,
    key: Mutex<Option<String>>,
    closed: watch::Sender<bool>,
    deadline: Mutex<Option<Instant>>,
}

impl Connection {
    /// 包装一个已建立或已接受的句柄，并为其创建新会话。
    pub fn new(stream: impl Into<NetStream>) -> Result<Self, NetError> {
        let parts = stream.into().split()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Ok(Self {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            kind: parts.kind,
            local: parts.local,
            remote: parts.remote,
            reader: AsyncMutex::new(Some(BufferedReader::new(parts.reader))),
            writer: AsyncMutex::new(Some(parts.writer)),
            control: Mutex::new(parts.control),
            udp_peer: parts.udp_peer,
            outbound_tx: Mutex::new(Some(tx)),
            outbound_rx: Mutex::new(Some(rx)),
            active: AtomicBool::new(true),
            read_only: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            session: Session::new(),
            last_error: Mutex::new(None),
            key: Mutex::new(None),
            closed,
            deadline: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// 进程内的连接序号，会话失效后依然不变。
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// 句柄是否仍可用。
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// 会话标识；关闭后为空串。
    pub fn session_id(&self) -> String {
        self.session.id()
    }

    pub fn local_addr(&self) -> NetAddr {
        self.local.clone()
    }

    /// 对端地址。未连接的 UDP 套接字返回最近一次收到报文的来源。
    pub fn remote_addr(&self) -> NetAddr {
        if let (NetAddr::Unnamed, Some(slot)) = (&self.remote, &self.udp_peer) {
            if let Some(peer) = *slot.lock() {
                return NetAddr::Inet(peer);
            }
        }
        self.remote.clone()
    }

    /// 读取到 `out`，返回 0 表示对端结束。
    pub async fn read(&self, out: &mut [u8]) -> Result<usize, NetError> {
        self.run_guarded(async {
            let mut guard = self.reader.lock().await;
            let reader = guard.as_mut().ok_or(NetError::LostConnection)?;
            reader.read(out).await
        })
        .await
    }

    /// 返回接下来的 `n` 个字节但不消费；数据不足时继续从套接字读取。
    pub async fn peek(&self, n: usize) -> Result<Bytes, NetError> {
        self.run_guarded(async {
            let mut guard = self.reader.lock().await;
            let reader = guard.as_mut().ok_or(NetError::LostConnection)?;
            reader.peek(n).await
        })
        .await
    }

    /// 取出当前缓冲的全部数据（必要时先读一次）；对端结束时返回 `None`。
    pub async fn read_chunk(&self) -> Result<Option<Bytes>, NetError> {
        self.run_guarded(async {
            let mut guard = self.reader.lock().await;
            let reader = guard.as_mut().ok_or(NetError::LostConnection)?;
            reader.read_chunk().await
        })
        .await
    }

    /// 按 `splitter` 切分输入并推入 `sink`，直到流结束、出错或消费端退出。
    ///
    /// 返回成功投递的消息数。
    pub async fn scan_input(
        &self,
        sink: &MessageSink,
        splitter: &mut dyn Splitter,
    ) -> Result<u64, NetError> {
        let mut delivered = 0u64;
        loop {
            let frame = self
                .run_guarded(async {
                    let mut guard = self.reader.lock().await;
                    let reader = guard.as_mut().ok_or(NetError::LostConnection)?;
                    reader.next_frame(&mut *splitter).await
                })
                .await?;
            let Some(frame) = frame else {
                return Ok(delivered);
            };
            if !sink.push(frame).await {
                return Ok(delivered);
            }
            delivered += 1;
        }
    }

    /// 丢弃全部输入直到对端结束，返回丢弃的字节数。
    pub async fn discard(&self) -> Result<u64, NetError> {
        let mut total = 0u64;
        while let Some(chunk) = self.read_chunk().await? {
            total += chunk.len() as u64;
        }
        Ok(total)
    }

    /// 单次尽力写入，不重试也不重连。
    ///
    /// 连接已关闭返回 [`NetError::LostConnection`]；写出字节少于 `data.len()`
    /// 返回 [`NetError::ShortWrite`]。超过套接字发送缓冲的大块数据请用
    /// [`Connection::write_all`]。
    pub async fn quick_send(&self, data: &[u8]) -> Result<(), NetError> {
        if !self.is_active() {
            return Err(NetError::LostConnection);
        }
        let sent = self
            .run_guarded(async {
                let mut guard = self.writer.lock().await;
                let writer = guard.as_mut().ok_or(NetError::LostConnection)?;
                writer.write(data).await.map_err(|err| NetError::io(WRITE, err))
            })
            .await?;
        if sent < data.len() {
            return Err(NetError::ShortWrite {
                sent,
                expected: data.len(),
            });
        }
        Ok(())
    }

    /// 写出全部数据。
    pub async fn write_all(&self, data: &[u8]) -> Result<(), NetError> {
        self.run_guarded(async {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(NetError::LostConnection)?;
            writer
                .write_all(data)
                .await
                .map_err(|err| NetError::io(WRITE, err))
        })
        .await
    }

    /// 半关闭写方向，对端随后读到流结束；读方向保持可用。
    pub async fn shutdown_write(&self) -> Result<(), NetError> {
        self.run_guarded(async {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(NetError::LostConnection)?;
            writer
                .shutdown()
                .await
                .map_err(|err| NetError::io(SHUTDOWN, err))
        })
        .await
    }

    /// 把消息放入出站队列；连接关闭后返回 [`NetError::LostConnection`]。
    pub fn enqueue(&self, data: Bytes) -> Result<(), NetError> {
        let guard = self.outbound_tx.lock();
        let tx = guard.as_ref().ok_or(NetError::LostConnection)?;
        tx.send(data).map_err(|_| NetError::LostConnection)
    }

    /// 交出出站队列的接收端，只有第一次调用返回 `Some`。
    pub fn take_outbound(&self) -> Option<Outbound> {
        self.outbound_rx.lock().take()
    }

    /// 出站队列是否无人消费。
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    pub fn set_read_buffer(&self, bytes: usize) -> Result<(), NetError> {
        self.with_control(|sock| sock.set_recv_buffer_size(bytes))
    }

    pub fn set_write_buffer(&self, bytes: usize) -> Result<(), NetError> {
        self.with_control(|sock| sock.set_send_buffer_size(bytes))
    }

    /// 设置读写截止时间；此后每次读写在到期时返回 [`NetError::DeadlineExceeded`]。
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        *self.deadline.lock() = deadline;
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    /// 在控制句柄上执行一次套接字调参。
    pub fn with_control<F>(&self, apply: F) -> Result<(), NetError>
    where
        F: FnOnce(&socket2::Socket) -> io::Result<()>,
    {
        let guard = self.control.lock();
        let sock = guard.as_ref().ok_or(NetError::LostConnection)?;
        apply(sock).map_err(|err| NetError::io(CONFIGURE, err))
    }

    /// 记录最近一次错误，供 `Closed` 钩子读取。
    pub fn record_error(&self, err: NetError) {
        *self.last_error.lock() = Some(Arc::new(err));
    }

    pub fn last_error(&self) -> Option<Arc<NetError>> {
        self.last_error.lock().clone()
    }

    /// 该连接在注册表中的键。
    pub fn key(&self) -> Option<String> {
        self.key.lock().clone()
    }

    pub fn set_key(&self, key: impl Into<String>) {
        *self.key.lock() = Some(key.into());
    }

    /// 标记收尾流程已开始；只有第一次调用返回 `true`。
    pub fn mark_finished(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    /// 关闭连接；重复调用是无操作。
    pub async fn close(&self) -> Result<(), NetError> {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        self.outbound_tx.lock().take();
        self.session.clear();
        self.closed.send_replace(true);

        let mut result = Ok(());
        if let Some(sock) = self.control.lock().take() {
            match sock.shutdown(Shutdown::Both) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
                Err(err) => result = Err(NetError::io(SHUTDOWN, err)),
            }
        }
        self.writer.lock().await.take();
        self.reader.lock().await.take();
        debug!(kind = %self.kind, remote = %self.remote, "connection closed");
        result
    }

    async fn run_guarded<T, F>(&self, io: F) -> Result<T, NetError>
    where
        F: Future<Output = Result<T, NetError>>,
    {
        if !self.is_active() {
            return Err(NetError::LostConnection);
        }
        let deadline = self.deadline();
        if deadline.is_some_and(|at| at <= Instant::now()) {
            return Err(NetError::DeadlineExceeded);
        }
        let closed = wait_closed(self.closed.subscribe());
        let expiry = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(io);
        tokio::select! {
            biased;
            _ = closed => Err(NetError::LostConnection),
            _ = expiry => Err(NetError::DeadlineExceeded),
            result = &mut io => result,
        }
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("active", &self.is_active())
            .field("session", &self.session)
            .finish()
    }
}
