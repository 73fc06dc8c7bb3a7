//! 服务端执行模型的端到端行为：钩子顺序、登记与覆盖、下行推送与停止。

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use parking_lot::Mutex;
use relaynet_core::{Connection, Events, LineSplitter, NetAddr, NetError, Server};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::Instant,
};
use tracing_test::traced_test;

struct Harness {
    server: Arc<Server>,
    listener: TcpListener,
}

impl Harness {
    async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("测试监听器绑定失败")?;
        let addr = listener.local_addr().context("获取监听地址失败")?;
        Ok(Self {
            server: Arc::new(Server::new(NetAddr::Inet(addr))),
            listener,
        })
    }

    /// 建立一对连接：服务端侧包装为 `Connection`，客户端侧保留原始流。
    async fn pair(&self) -> Result<(Arc<Connection>, TcpStream)> {
        let addr = self.listener.local_addr()?;
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), self.listener.accept());
        let client = client.context("客户端连接失败")?;
        let (stream, _) = accepted.context("服务端接受失败")?;
        Ok((Arc::new(Connection::new(stream)?), client))
    }
}

async fn eventually(what: &str, cond: impl Fn() -> bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !cond() {
        if Instant::now() > deadline {
            bail!("等待超时：{what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

async fn expect_eof(stream: &mut TcpStream) -> Result<()> {
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
        .await
        .context("等待对端关闭超时")??;
    if n != 0 {
        bail!("期望 EOF，实际读到 {n} 字节");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn opened_rejection_drops_connection() -> Result<()> {
    let harness = Harness::new().await?;
    let (conn, mut client) = harness.pair().await?;
    let events = Events::new().on_opened(|_, _| Err(NetError::hook("banned peer")));

    assert!(harness.server.execute(&events, conn).is_none());
    assert!(logs_contain("connection rejected by opened hook"));
    assert_eq!(harness.server.live_count(), 0);
    expect_eof(&mut client).await
}

#[tokio::test(flavor = "multi_thread")]
async fn first_key_registers_and_closed_runs_once() -> Result<()> {
    let harness = Harness::new().await?;
    let (conn, mut client) = harness.pair().await?;

    let flags = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicUsize::new(0));
    let events = Events::new()
        .with_splitter(|_| LineSplitter)
        .on_receive({
            let flags = Arc::clone(&flags);
            move |_, message, saved| {
                flags.lock().push(saved);
                Some(String::from_utf8_lossy(&message).into_owned())
            }
        })
        .on_closed({
            let closed = Arc::clone(&closed);
            move |server, conn, _| {
                assert!(server.registry().load("dev-7").is_some());
                assert_eq!(conn.key().as_deref(), Some("dev-7"));
                closed.fetch_add(1, Ordering::SeqCst);
            }
        });

    let task = harness
        .server
        .execute(&events, Arc::clone(&conn))
        .context("连接应被接受")?;
    client.write_all(b"dev-7\nhello\n").await?;
    let server = Arc::clone(&harness.server);
    eventually("两条消息均被处理", || flags.lock().len() == 2).await?;
    assert!(server.registry().load("dev-7").is_some());
    assert_eq!(*flags.lock(), vec![false, true]);

    drop(client);
    tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .context("连接任务未结束")??;
    harness.server.finish(&events, &conn).await;

    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(harness.server.registry().is_empty());
    assert!(!conn.is_active());
    assert_eq!(harness.server.live_count(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnecting_device_evicts_stale_entry() -> Result<()> {
    let harness = Harness::new().await?;
    let events = Events::new()
        .with_splitter(|_| LineSplitter)
        .on_receive(|_, message, _| Some(String::from_utf8_lossy(&message).into_owned()));

    let (first, mut first_client) = harness.pair().await?;
    harness.server.execute(&events, Arc::clone(&first));
    first_client.write_all(b"dev-1\n").await?;
    let registry_server = Arc::clone(&harness.server);
    eventually("第一条连接登记", || {
        registry_server.registry().load("dev-1").is_some()
    })
    .await?;

    let (second, mut second_client) = harness.pair().await?;
    let fresh_sid = second.session_id();
    harness.server.execute(&events, Arc::clone(&second));
    second_client.write_all(b"dev-1\n").await?;
    eventually("新连接取代旧连接", || {
        registry_server
            .registry()
            .load("dev-1")
            .is_some_and(|conn| conn.session_id() == fresh_sid)
    })
    .await?;

    expect_eof(&mut first_client).await?;
    assert!(!first.is_active());
    // 旧连接收尾时不能把新连接从注册表中删掉
    eventually("旧连接收尾", || registry_server.live_count() == 1).await?;
    assert!(registry_server.registry().load("dev-1").is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn send_to_delivers_through_send_hook() -> Result<()> {
    let harness = Harness::new().await?;
    let (conn, mut client) = harness.pair().await?;
    let events = Events::new().on_send(|conn: Arc<Connection>, data: Bytes| async move {
        let _ = conn.quick_send(&data).await;
    });

    harness.server.execute(&events, Arc::clone(&conn));
    let watched = Arc::clone(&conn);
    eventually("发送循环启动", || !watched.is_read_only()).await?;
    assert!(harness.server.registry().save("pusher", Arc::clone(&conn)));

    assert!(harness.server.send_to("pusher", Bytes::from_static(b"push\n")));
    assert!(!harness.server.send_to("nobody", Bytes::from_static(b"x")));

    let mut buf = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(3), client.read_exact(&mut buf))
        .await
        .context("等待下行消息超时")??;
    assert_eq!(&buf, b"push\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_finishes_unregistered_connections() -> Result<()> {
    let harness = Harness::new().await?;
    let closed = Arc::new(AtomicUsize::new(0));
    let events = Events::new()
        .on_process(|_, conn: Arc<Connection>| async move {
            let _ = conn.discard().await;
        })
        .on_closed({
            let closed = Arc::clone(&closed);
            move |_, _, _| {
                closed.fetch_add(1, Ordering::SeqCst);
            }
        });

    let (conn, mut client) = harness.pair().await?;
    let task = harness
        .server
        .execute(&events, Arc::clone(&conn))
        .context("连接应被接受")?;
    assert_eq!(harness.server.live_count(), 1);

    harness.server.shutdown(&events).await;
    expect_eof(&mut client).await?;
    tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .context("连接任务未结束")??;

    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(harness.server.live_count(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn tick_fires_until_stopped() -> Result<()> {
    let server = Server::from_host_port("127.0.0.1", 0)?.with_tick(Duration::from_millis(20));
    let ticks = Arc::new(AtomicUsize::new(0));
    let events = Events::new().on_tick({
        let ticks = Arc::clone(&ticks);
        move |_| {
            ticks.fetch_add(1, Ordering::SeqCst);
        }
    });

    server.trigger(&events);
    eventually("至少两次 tick", || ticks.load(Ordering::SeqCst) >= 2).await?;
    server.stop_ticker();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let frozen = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), frozen);
    Ok(())
}
