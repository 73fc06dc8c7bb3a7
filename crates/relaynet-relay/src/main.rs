#![doc = r#"
# relaynet-relay

## 设计动机（Why）
- 后端服务在一组端口之间轮换部署：新版本在下一个端口启动，对外端口保持不变，
  由本程序把对外端口上的连接原样转发到当前后端端口。

## 执行逻辑（How）
1. 读取配置文件中的应用组，按命令行选择后端端口（可能推进并记录端口下标）；
2. 需要运行后端时，先终止配置中记录的上一个后端进程，再启动新后端并记录其进程号；
3. 写回配置；
4. 需要运行转发时，在对外端口上启动 TCP 代理，直到收到 Ctrl-C。

## 风险与考量（Trade-offs）
- 终止旧后端使用 `SIGKILL`，旧后端上尚未完成的请求会被直接丢弃。
"#]

mod backend;
mod cli;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use relaynet_core::{Events, NetAddr, TransportKind};
use relaynet_proxy::{Proxy, Relayer, relay_action, relay_data};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{cli::Cli, config::RelaySetting};

fn build_env_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for ctrl-c, relay runs until killed");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received, stopping relay");
}

async fn run(cli: Cli) -> Result<()> {
    let mut setting = RelaySetting::load(&cli.file)?;
    let app = setting.section_mut(&cli.app)?;
    let in_port = if cli.port > 0 {
        cli.port
    } else {
        app.in_port(cli.current, cli.next, cli.number)
    };
    info!(app = %cli.app, in_port, out_port = app.outport, "backend port selected");

    if cli.runs_backend() {
        if let Err(err) = backend::kill_process(app.pid) {
            warn!(pid = app.pid, error = %err, "failed to kill previous backend");
        }
        if let Err(err) = backend::run_server(app, in_port).await {
            warn!(error = %err, "failed to start backend");
        }
    }
    let host = app.host.clone();
    let out_port = app.outport;
    setting
        .save(&cli.file)
        .with_context(|| format!("保存配置 {} 失败", cli.file.display()))?;

    if cli.runs_relay() {
        let remote = NetAddr::resolve(&host, in_port)?;
        let proxy = Proxy::bind(TransportKind::Tcp, "", out_port)?;
        let action = relay_action(|server, orig, relay| async move {
            relay_data(server, orig, relay).await;
        });
        let mut events = Events::new();
        events.process = Some(proxy.create_process(Arc::new(Relayer::tcp(remote)), action));
        proxy.run_until(events, shutdown_signal()).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(cli.verbose))
        .try_init()
        .map_err(|err| anyhow!(err))?;
    run(cli).await
}
