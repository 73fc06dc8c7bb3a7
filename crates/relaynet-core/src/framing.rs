//! # 分帧契约
//!
//! 连接层不理解任何应用协议，只负责把缓冲区交给外部分帧器并把切出的消息
//! 推入 [`MessageSink`]。分帧器的语义与“扫描器”一致：
//!
//! - 返回 [`Split::Need`] 表示数据不足，连接会继续读取；
//! - 返回 [`Split::Frame`] 表示切出一条消息，并消费 `advance` 个字节；
//! - 返回 [`Split::Skip`] 表示丢弃若干字节（例如心跳填充）而不产生消息；
//! - 返回错误即终止该连接的处理循环，不影响其他连接。
//!
//! 缓冲区超过 [`Splitter::max_token_size`] 仍无法切出消息时，连接以
//! [`NetError::Framing`] 结束。

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::NetError;

/// 单条消息的默认上限。
pub const MAX_TOKEN_SIZE: usize = 64 * 1024;

/// 分帧器一次调用的结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Split {
    /// 需要更多数据。
    Need,
    /// 切出一条消息并消费 `advance` 个字节。
    Frame { advance: usize, frame: Bytes },
    /// 丢弃若干字节，不产生消息。
    Skip(usize),
}

/// 把字节流切分为离散消息的外部协作者。
pub trait Splitter: Send {
    /// 检查当前缓冲区；`at_eof` 为真时不会再有新数据。
    fn split(&mut self, data: &[u8], at_eof: bool) -> Result<Split, NetError>;

    /// 允许缓冲的最大未切分字节数。
    fn max_token_size(&self) -> usize {
        MAX_TOKEN_SIZE
    }
}

impl<F> Splitter for F
where
    F: FnMut(&[u8], bool) -> Result<Split, NetError> + Send,
{
    fn split(&mut self, data: &[u8], at_eof: bool) -> Result<Split, NetError> {
        self(data, at_eof)
    }
}

/// 按行切分，去掉结尾的 `\n` 与可选的 `\r`；流结束时剩余数据作为最后一行。
#[derive(Clone, Copy, Debug, Default)]
pub struct LineSplitter;

impl Splitter for LineSplitter {
    fn split(&mut self, data: &[u8], at_eof: bool) -> Result<Split, NetError> {
        if let Some(pos) = data.iter().position(|b| *b == b'\n') {
            let line = trim_cr(&data[..pos]);
            return Ok(Split::Frame {
                advance: pos + 1,
                frame: Bytes::copy_from_slice(line),
            });
        }
        if at_eof && !data.is_empty() {
            return Ok(Split::Frame {
                advance: data.len(),
                frame: Bytes::copy_from_slice(trim_cr(data)),
            });
        }
        Ok(Split::Need)
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// 把每次读取到的全部数据作为一条消息，适合无边界的透传场景。
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkSplitter;

impl Splitter for ChunkSplitter {
    fn split(&mut self, data: &[u8], _at_eof: bool) -> Result<Split, NetError> {
        if data.is_empty() {
            return Ok(Split::Need);
        }
        Ok(Split::Frame {
            advance: data.len(),
            frame: Bytes::copy_from_slice(data),
        })
    }
}

/// 分帧结果的投递端，由 `Prepare` 钩子写入、由服务端的接收任务消费。
#[derive(Clone, Debug)]
pub struct MessageSink {
    tx: mpsc::Sender<Bytes>,
}

impl MessageSink {
    /// 创建容量为 `capacity` 的投递通道。
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// 投递一条消息；消费端已退出时返回 `false`。
    pub async fn push(&self, message: Bytes) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// 消费端是否已经退出。
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
