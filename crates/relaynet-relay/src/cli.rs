use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// 命令行参数。
///
/// 后端端口三选一：`-p` 直接指定；否则按 `--cr`（当前下标）→ `--nx`（下一个下标并写回配置）
/// → `-n`（指定下标）的优先级从配置的端口列表中选择。
#[derive(Debug, Parser)]
#[command(name = "relaynet-relay", version)]
#[command(about = "端口轮换转发：启动后端程序并把固定出口端口转发到当前后端端口")]
pub struct Cli {
    /// 应用组名称
    #[arg(short = 'a', default_value = "default")]
    pub app: String,

    /// 配置文件路径
    #[arg(short = 'f', default_value = "servers.toml")]
    pub file: PathBuf,

    /// 后端端口，非零时忽略端口列表
    #[arg(short = 'p', default_value_t = 0)]
    pub port: u16,

    /// 后端端口在列表中的下标
    #[arg(short = 'n', default_value_t = 0)]
    pub number: usize,

    /// 使用下一个端口并写回配置（`--nx=false` 关闭）
    #[arg(
        long = "nx",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub next: bool,

    /// 使用当前端口，不更新配置
    #[arg(long = "cr")]
    pub current: bool,

    /// 只运行转发
    #[arg(short = 'r')]
    pub relay: bool,

    /// 只运行后端程序
    #[arg(short = 's')]
    pub server: bool,

    /// 转发与后端程序都运行
    #[arg(long = "rs")]
    pub relay_server: bool,

    /// 输出调试日志
    #[arg(short = 'v')]
    pub verbose: bool,
}

impl Cli {
    pub fn runs_backend(&self) -> bool {
        self.server || self.relay_server
    }

    pub fn runs_relay(&self) -> bool {
        self.relay || self.relay_server
    }
}
