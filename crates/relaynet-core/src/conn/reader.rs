use bytes::{Buf, Bytes, BytesMut};

use super::stream::NetReader;
use crate::{
    error::{NetError, READ},
    framing::{Split, Splitter},
};

/// 单次读取预留的缓冲空间。
const READ_CHUNK: usize = 4096;

/// 连接唯一的读路径：在原始读半部之上累积字节。
///
/// 缓冲区在第一次读取时才分配。所有读取都经由这里完成，因此 `peek` 看过的字节
/// 不会因绕过缓冲而丢失。
#[derive(Debug)]
pub(crate) struct BufferedReader {
    raw: NetReader,
    buf: BytesMut,
    eof: bool,
}

impl BufferedReader {
    pub(crate) fn new(raw: NetReader) -> Self {
        Self {
            raw,
            buf: BytesMut::new(),
            eof: false,
        }
    }

    async fn fill(&mut self) -> Result<usize, NetError> {
        if self.eof {
            return Ok(0);
        }
        self.buf.reserve(READ_CHUNK);
        let n = self
            .raw
            .read_buf(&mut self.buf)
            .await
            .map_err(|err| NetError::io(READ, err))?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    pub(crate) async fn read(&mut self, out: &mut [u8]) -> Result<usize, NetError> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(0);
        }
        let n = out.len().min(self.buf.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        Ok(n)
    }

    pub(crate) async fn peek(&mut self, n: usize) -> Result<Bytes, NetError> {
        while self.buf.len() < n {
            if self.fill().await? == 0 {
                return Err(NetError::io(
                    READ,
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("stream ended after {} of {n} bytes", self.buf.len()),
                    ),
                ));
            }
        }
        Ok(Bytes::copy_from_slice(&self.buf[..n]))
    }

    pub(crate) async fn read_chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.split().freeze()))
    }

    /// 切出下一条消息；流结束且无法再切分时返回 `None`。
    pub(crate) async fn next_frame(
        &mut self,
        splitter: &mut dyn Splitter,
    ) -> Result<Option<Bytes>, NetError> {
        loop {
            match splitter.split(&self.buf, self.eof)? {
                Split::Frame { advance, frame } => {
                    if advance > self.buf.len() {
                        return Err(NetError::framing("splitter advanced past buffered data"));
                    }
                    self.buf.advance(advance);
                    return Ok(Some(frame));
                }
                Split::Skip(n) if n > 0 => {
                    if n > self.buf.len() {
                        return Err(NetError::framing("splitter skipped past buffered data"));
                    }
                    self.buf.advance(n);
                }
                Split::Skip(_) | Split::Need => {
                    if self.eof {
                        return Ok(None);
                    }
                    if self.buf.len() >= splitter.max_token_size() {
                        return Err(NetError::framing("token too long"));
                    }
                    self.fill().await?;
                }
            }
        }
    }
}
