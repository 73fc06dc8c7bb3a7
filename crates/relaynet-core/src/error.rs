//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为连接、注册表、拨号与监听器暴露统一的错误语义，所有错误均以连接为作用域，
//!   不允许任何单条连接的故障波及服务端或其他连接；
//! - 为每类错误提供稳定错误码与 [`ErrorCategory`]，便于日志检索与重试决策。
//!
//! ## 分类（What）
//! - **拨号失败**（[`NetError::Dial`] / [`NetError::DialTimeout`]）：由重连逻辑线性退避后重试；
//! - **短写**（[`NetError::ShortWrite`]）：立即判定连接失败，不重试；
//! - **分帧失败**（[`NetError::Framing`]）：终止当前连接的处理循环；
//! - **接受失败**（[`NetError::Accept`]）：监听循环记录后继续接受；
//! - **关闭失败**：仅通过 `Closed` 钩子的错误参数上报，从不升级。

use std::{io, time::Duration};

use thiserror::Error;

use crate::conn::TransportKind;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const READ: OperationKind = OperationKind {
    code: "relaynet.conn.read_failed",
    message: "read",
};
pub const WRITE: OperationKind = OperationKind {
    code: "relaynet.conn.write_failed",
    message: "write",
};
pub const SHUTDOWN: OperationKind = OperationKind {
    code: "relaynet.conn.shutdown_failed",
    message: "shutdown",
};
pub const CONFIGURE: OperationKind = OperationKind {
    code: "relaynet.conn.configure_failed",
    message: "configure",
};
pub const LOCAL_ADDR: OperationKind = OperationKind {
    code: "relaynet.conn.addr_failed",
    message: "query address",
};

/// 错误的重试分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 建议在给定时长后重试。
    Retryable(Duration),
    /// 超时，由调用方决定是否重试。
    Timeout,
    /// 不应重试。
    NonRetryable,
}

/// relaynet 全部公开操作共享的错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：连接级错误需要跨任务共享（`Closed` 钩子、`last_error`），因此所有变体
///   均为 `Send + Sync + 'static`，连接内部以 `Arc<NetError>` 保存最近一次错误；
/// - **契约 (What)**：`code()` 返回稳定错误码，`category()` 依据底层 `io::ErrorKind` 给出重试建议；
/// - **风险 (Trade-offs)**：`io::Error` 不可克隆，需要共享时请使用 `Arc`。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NetError {
    /// 连接已关闭或从未激活。
    #[error("lost connection")]
    LostConnection,

    /// 单次写入少于请求的字节数。
    #[error("only sent {sent} of {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },

    /// 出站拨号失败。
    #[error("{kind} dial to {addr} failed: {source}")]
    Dial {
        kind: TransportKind,
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 出站拨号超时。
    #[error("{kind} dial to {addr} timed out after {timeout:?}")]
    DialTimeout {
        kind: TransportKind,
        addr: String,
        timeout: Duration,
    },

    /// 监听地址绑定失败。
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 接受入站连接失败。
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// 已建立连接上的 IO 失败。
    #[error("{msg}: {source}", msg = .op.message)]
    Io {
        op: OperationKind,
        #[source]
        source: io::Error,
    },

    /// 由外部分帧器上报的错误。
    #[error("framing error: {0}")]
    Framing(String),

    /// 地址类型与传输不匹配，例如 Unix 监听器收到 IP 地址。
    #[error("address `{addr}` is not a {expected} address")]
    AddressKind { expected: &'static str, addr: String },

    /// 当前传输或平台不支持的操作。
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// 应用钩子拒绝了连接。
    #[error("hook rejected connection: {0}")]
    Hook(String),

    /// 套接字截止时间已过。
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl NetError {
    /// 将 IO 错误包装为指定操作的连接错误。
    pub fn io(op: OperationKind, source: io::Error) -> Self {
        NetError::Io { op, source }
    }

    /// 构造钩子拒绝错误，供 `Opened` 等钩子使用。
    pub fn hook(reason: impl Into<String>) -> Self {
        NetError::Hook(reason.into())
    }

    /// 构造分帧错误。
    pub fn framing(reason: impl Into<String>) -> Self {
        NetError::Framing(reason.into())
    }

    /// 稳定错误码，适合作为日志字段或指标标签。
    pub fn code(&self) -> &'static str {
        match self {
            NetError::LostConnection => "relaynet.conn.lost",
            NetError::ShortWrite { .. } => "relaynet.conn.short_write",
            NetError::Dial { .. } => "relaynet.dial.failed",
            NetError::DialTimeout { .. } => "relaynet.dial.timeout",
            NetError::Bind { .. } => "relaynet.listener.bind_failed",
            NetError::Accept(_) => "relaynet.listener.accept_failed",
            NetError::Io { op, .. } => op.code,
            NetError::Framing(_) => "relaynet.framing.failed",
            NetError::AddressKind { .. } => "relaynet.addr.kind_mismatch",
            NetError::Unsupported(_) => "relaynet.unsupported",
            NetError::Hook(_) => "relaynet.hook.rejected",
            NetError::DeadlineExceeded => "relaynet.conn.deadline",
        }
    }

    /// 依据错误来源给出重试分类。
    pub fn category(&self) -> ErrorCategory {
        match self {
            NetError::Dial { source, .. }
            | NetError::Bind { source, .. }
            | NetError::Accept(source)
            | NetError::Io { source, .. } => categorize_io_error(source),
            NetError::DialTimeout { .. } | NetError::DeadlineExceeded => ErrorCategory::Timeout,
            _ => ErrorCategory::NonRetryable,
        }
    }

    /// 是否为对端正常结束或本端关闭导致的错误，这类错误不需要告警。
    pub fn is_disconnect(&self) -> bool {
        match self {
            NetError::LostConnection => true,
            NetError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::WouldBlock | ErrorKind::Interrupted => {
            ErrorCategory::Retryable(Duration::from_millis(5))
        }
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe => ErrorCategory::Retryable(Duration::from_millis(50)),
        ErrorKind::WriteZero => ErrorCategory::Retryable(Duration::from_millis(10)),
        _ => ErrorCategory::NonRetryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_dial_is_retryable() {
        let err = NetError::Dial {
            kind: TransportKind::Tcp,
            addr: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(err.code(), "relaynet.dial.failed");
        assert!(matches!(err.category(), ErrorCategory::Retryable(_)));
    }

    #[test]
    fn short_write_is_terminal() {
        let err = NetError::ShortWrite {
            sent: 3,
            expected: 8,
        };
        assert_eq!(err.category(), ErrorCategory::NonRetryable);
        assert_eq!(err.to_string(), "only sent 3 of 8 bytes");
        assert!(!err.is_disconnect());
    }

    #[test]
    fn io_error_keeps_operation_code() {
        let err = NetError::io(WRITE, io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(err.code(), "relaynet.conn.write_failed");
        assert!(err.is_disconnect());
        assert!(err.to_string().starts_with("write: "));
    }
}
