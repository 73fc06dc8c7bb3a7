//! TCP 监听器与客户端的端到端行为：接受 → 登记 → 下行推送 → 停止，以及客户端调参与重连。

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use relaynet_core::{
    Connection, DialClient, DialPlan, Events, KeepAlive, LineSplitter, NetAddr, NetError,
    TcpOptions, reconnect_with, send_data,
};
use relaynet_transport_tcp::{TcpClient, TcpServer};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(3);

/// 在后台启动监听器，返回实际绑定地址、停止开关与服务任务。
async fn spawn_server(
    mut server: TcpServer,
    events: Events,
) -> Result<(NetAddr, oneshot::Sender<()>, JoinHandle<Result<(), NetError>>)> {
    let (bound_tx, mut bound_rx) = mpsc::unbounded_channel();
    let events = events.on_serving(move |server| {
        let _ = bound_tx.send(server.bound_addr());
    });
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        server
            .run_until(&events, async move {
                let _ = stop_rx.await;
            })
            .await
    });
    let bound = timeout(WAIT, bound_rx.recv())
        .await
        .context("等待监听器绑定超时")?
        .context("监听器未能启动")?;
    Ok((bound, stop_tx, task))
}

#[tokio::test(flavor = "multi_thread")]
async fn registered_connection_receives_pushed_messages() -> Result<()> {
    let server = TcpServer::bind("127.0.0.1", 0)?;
    let core = Arc::clone(relaynet_core::TransportListener::server(&server));
    let closed = Arc::new(AtomicUsize::new(0));
    let events = Events::new()
        .with_splitter(|_| LineSplitter)
        .on_receive(|_, message, _| Some(String::from_utf8_lossy(&message).into_owned()))
        .on_send(|conn: Arc<Connection>, data: Bytes| async move {
            let _ = conn.quick_send(&data).await;
        })
        .on_closed({
            let closed = Arc::clone(&closed);
            move |_, _, _| {
                closed.fetch_add(1, Ordering::SeqCst);
            }
        });

    let (bound, stop, task) = spawn_server(server, events).await?;
    let addr = bound.expect_inet()?;
    let mut client = TcpStream::connect(addr).await.context("连接监听器失败")?;
    client.write_all(b"meter-42\n").await?;

    let deadline = tokio::time::Instant::now() + WAIT;
    while core.registry().load("meter-42").is_none() {
        if tokio::time::Instant::now() > deadline {
            bail!("连接未按键登记");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(core.send_to("meter-42", Bytes::from_static(b"reading?\n")));

    let mut lines = BufReader::new(&mut client).lines();
    let line = timeout(WAIT, lines.next_line())
        .await
        .context("等待下行消息超时")??;
    assert_eq!(line.as_deref(), Some("reading?"));

    let _ = stop.send(());
    timeout(WAIT, task).await.context("服务任务未退出")???;
    let mut buf = [0u8; 8];
    let n = timeout(WAIT, client.read(&mut buf)).await??;
    assert_eq!(n, 0, "停止后客户端应观察到 EOF");
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(core.registry().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn accepted_sockets_carry_configured_keepalive() -> Result<()> {
    let server = TcpServer::bind("127.0.0.1", 0)?.with_keep_alive(KeepAlive::from_secs(60, 3, 10));
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let events = Events::new().on_process(move |_, conn: Arc<Connection>| {
        let seen_tx = seen_tx.clone();
        async move {
            let probe = conn.with_control(|sock| {
                if sock.keepalive()? {
                    Ok(())
                } else {
                    Err(io::Error::other("keepalive disabled"))
                }
            });
            let _ = seen_tx.send(probe.is_ok());
        }
    });

    let (bound, stop, task) = spawn_server(server, events).await?;
    let _client = TcpStream::connect(bound.expect_inet()?).await?;
    let enabled = timeout(WAIT, seen_rx.recv())
        .await
        .context("处理钩子未运行")?
        .context("通道已关闭")?;
    assert!(enabled, "接受的连接应开启保活");

    let _ = stop.send(());
    timeout(WAIT, task).await???;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn client_send_data_dials_and_tunes_socket() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let plan = DialPlan::new(NetAddr::Inet(addr), None, 2);
    let mut client = TcpClient::new(
        plan,
        TcpOptions::default().with_linger(Some(Duration::from_secs(0))),
    );

    let accept = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await?;
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await?;
        Ok::<_, io::Error>(buf)
    });

    send_data(&mut client, b"hello").await?;
    let received = timeout(WAIT, accept).await???;
    assert_eq!(&received, b"hello");

    let conn = client.conn().context("客户端应持有连接")?;
    assert!(conn.is_active());
    conn.with_control(|sock| {
        assert_eq!(sock.linger()?, Some(Duration::ZERO));
        assert!(sock.tcp_nodelay()?);
        Ok(())
    })?;
    client.close().await?;
    assert!(!conn.is_active());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn client_gives_up_after_bounded_retries() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut client = TcpClient::new(DialPlan::new(NetAddr::Inet(addr), None, 1), TcpOptions::default());
    let err = reconnect_with(&mut client, true, 2, Duration::from_millis(10))
        .await
        .expect_err("目标端口无人监听");
    assert!(matches!(err, NetError::Dial { .. }));
    assert!(client.conn().is_none());
    Ok(())
}
