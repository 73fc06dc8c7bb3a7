//! Unix 监听器：套接字文件生命周期、残留文件清理与客户端往返。
#![cfg(unix)]

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use relaynet_core::{
    Connection, DialClient, DialPlan, Events, NetAddr, NetError, Server, SocketOptions, reconnect,
};
use relaynet_transport_unix::{UnixClient, UnixServer};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(3);

/// 把每个数据块原样写回。
fn echo_events() -> Events {
    Events::new().on_process(|_, conn: Arc<Connection>| async move {
        while let Ok(Some(chunk)) = conn.read_chunk().await {
            if conn.write_all(&chunk).await.is_err() {
                break;
            }
        }
    })
}

async fn spawn_server(
    path: &std::path::Path,
    events: Events,
) -> Result<(oneshot::Sender<()>, JoinHandle<Result<(), NetError>>)> {
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    let events = events.on_serving(move |_| {
        let _ = ready_tx.send(());
    });
    let mut server = UnixServer::new(Arc::new(Server::new(NetAddr::unix(path))));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        server
            .run_until(&events, async move {
                let _ = stop_rx.await;
            })
            .await
    });
    timeout(WAIT, ready_rx.recv())
        .await
        .context("等待监听器绑定超时")?
        .context("监听器未能启动")?;
    Ok((stop_tx, task))
}

#[tokio::test(flavor = "multi_thread")]
async fn client_round_trip_and_socket_file_removed_on_stop() -> Result<()> {
    let dir = tempfile::tempdir().context("创建临时目录失败")?;
    let path = dir.path().join("echo.sock");
    let (stop, task) = spawn_server(&path, echo_events()).await?;
    assert!(path.exists(), "绑定后应存在套接字文件");

    let plan = DialPlan::new(NetAddr::unix(&path), None, 1);
    let mut client = UnixClient::new(plan, SocketOptions::default());
    assert_eq!(reconnect(&mut client, false, 3).await?, 1);
    let conn = client.conn().context("客户端应持有连接")?;
    assert_eq!(conn.remote_addr(), NetAddr::unix(&path));

    conn.quick_send(b"over unix").await?;
    let echoed = timeout(WAIT, conn.peek(9)).await??;
    assert_eq!(&echoed[..], b"over unix");

    let _ = stop.send(());
    timeout(WAIT, task).await???;
    assert!(!path.exists(), "停止后应删除套接字文件");
    let rest = timeout(WAIT, conn.read_chunk()).await??;
    assert_eq!(rest.as_deref(), Some(&b"over unix"[..]));
    assert!(matches!(timeout(WAIT, conn.read_chunk()).await?, Ok(None)));
    client.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_socket_file_is_replaced() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stale.sock");
    // 绑定后直接丢弃监听器，文件残留但无人监听
    drop(std::os::unix::net::UnixListener::bind(&path)?);
    assert!(path.exists());

    let (stop, task) = spawn_server(&path, echo_events()).await?;
    let plan = DialPlan::new(NetAddr::unix(&path), None, 1);
    let mut client = UnixClient::new(plan, SocketOptions::default());
    reconnect(&mut client, false, 1).await?;

    let _ = stop.send(());
    timeout(WAIT, task).await???;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn dialing_missing_socket_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let plan = DialPlan::new(NetAddr::unix(dir.path().join("absent.sock")), None, 1);
    let mut client = UnixClient::new(plan, SocketOptions::default());
    let err = relaynet_core::reconnect_with(&mut client, false, 2, Duration::from_millis(5))
        .await
        .expect_err("路径不存在");
    assert!(matches!(err, NetError::Dial { .. }));
    Ok(())
}
