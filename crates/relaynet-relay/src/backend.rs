//! 后端程序的启动与终止。
//!
//! 启动命令取自配置：`prog` 中的 `$dir` 替换为本程序所在目录，`args` 中的 `$port`、`$host`
//! 替换为选中的端口与配置主机，再按空白拆分为参数。后端程序应自行转入后台并在标准输出
//! 的最后打印进程号，Linux 上据此记录 pid，供下一次启动前终止。

use std::{io, path::PathBuf, process::ExitStatus};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::AppSection;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("spawn `{prog}`: {source}")]
    Spawn {
        prog: String,
        #[source]
        source: io::Error,
    },

    #[error("`{prog}` exited with {status}")]
    Exit { prog: String, status: ExitStatus },

    #[cfg(unix)]
    #[error("kill process {pid}: {source}")]
    Kill {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[cfg(not(unix))]
    #[error("killing process {0} is not supported on this platform")]
    KillUnsupported(i32),
}

/// 本程序可执行文件所在的目录；取不到时退回当前目录。
pub fn run_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .and_then(|dir| dir.canonicalize().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// 展开程序路径中的 `$dir`。
pub fn expand_program(prog: &str, dir: &str) -> String {
    prog.replace("$dir", dir)
}

/// 展开参数中的 `$port` 与 `$host` 并按空白拆分。
pub fn expand_args(args: &str, host: &str, port: u16) -> Vec<String> {
    args.replace("$port", &port.to_string())
        .replace("$host", host)
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// 取输出中最后一个空白分隔的字段作为进程号，解析失败返回 0。
pub fn parse_pid(output: &str) -> i32 {
    output
        .split_whitespace()
        .last()
        .and_then(|field| field.parse().ok())
        .unwrap_or(0)
}

/// 运行后端程序并等待其退出；Linux 上把输出中的进程号记入 `app.pid`。
pub async fn run_server(app: &mut AppSection, port: u16) -> Result<i32, BackendError> {
    let dir = run_dir();
    let prog = expand_program(&app.prog, &dir.to_string_lossy());
    let args = expand_args(&app.args, &app.host, port);
    debug!(%prog, ?args, "starting backend");

    let output = Command::new(&prog)
        .args(&args)
        .output()
        .await
        .map_err(|source| BackendError::Spawn {
            prog: prog.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(BackendError::Exit {
            prog,
            status: output.status,
        });
    }
    if cfg!(target_os = "linux") {
        app.pid = parse_pid(&String::from_utf8_lossy(&output.stdout));
        info!(pid = app.pid, port, "backend started");
    }
    Ok(app.pid)
}

/// 终止上一次启动的后端进程；`pid <= 0` 时什么也不做。
#[cfg(unix)]
pub fn kill_process(pid: i32) -> Result<(), BackendError> {
    use nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    };

    if pid <= 0 {
        return Ok(());
    }
    kill(Pid::from_raw(pid), Signal::SIGKILL).map_err(|source| BackendError::Kill { pid, source })?;
    info!(pid, "previous backend killed");
    Ok(())
}

#[cfg(not(unix))]
pub fn kill_process(pid: i32) -> Result<(), BackendError> {
    if pid <= 0 {
        return Ok(());
    }
    Err(BackendError::KillUnsupported(pid))
}
