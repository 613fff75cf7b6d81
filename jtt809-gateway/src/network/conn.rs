//! 链路连接管理
//! 单纯的 tcp 读写，以帧为单位，不包含任何业务逻辑

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{self, AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

use super::packet;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Packet error: {0}")]
    Packet(#[from] packet::Error),
    #[error("I/O: {0}")]
    Io(#[from] io::Error),
    #[error("Connection closed by peer")]
    ConnectionReset,
}

/// 读缓冲区初始容量
const READ_BUF_CAPACITY: usize = 4096;

/// 从 socket 读出至少一个完整帧（含起止符）
async fn read_frame_from<R>(stream: &mut R, buf: &mut BytesMut) -> Result<Bytes, Error>
where
    R: AsyncRead + Unpin,
{
    loop {
        match packet::split_frame(buf) {
            Ok(frame) => return Ok(frame),
            Err(packet::Error::InsufficientBytes(_)) => {}
            Err(e) => return Err(Error::Packet(e)),
        }
        // 数据不足，读取更多数据
        let read = stream.read_buf(buf).await?;
        if read == 0 {
            // 对端关闭时缓冲区仍有未闭合的帧头，按残帧处理
            if !buf.is_empty() {
                return Err(Error::Packet(packet::Error::DanglingFrame));
            }
            return Err(Error::ConnectionReset);
        }
    }
}

/// 主链路或从链路的一条 TCP 连接
pub(crate) struct Connection {
    stream: TcpStream,
    read: BytesMut,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read: BytesMut::with_capacity(READ_BUF_CAPACITY),
        }
    }

    /// 读取一个完整帧
    pub(crate) async fn read_frame(&mut self) -> Result<Bytes, Error> {
        read_frame_from(&mut self.stream, &mut self.read).await
    }

    /// 写出一个已编码帧
    pub(crate) async fn write_frame(&mut self, data: &[u8]) -> Result<(), Error> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    /// 拆分为独立的读取端与写入端，供从链路的读循环与写循环使用
    pub(crate) fn into_split(self) -> (FrameReader, OwnedWriteHalf) {
        let (read_half, write_half) = self.stream.into_split();
        (
            FrameReader {
                stream: read_half,
                read: self.read,
            },
            write_half,
        )
    }
}

/// 连接的帧读取端
pub(crate) struct FrameReader {
    stream: OwnedReadHalf,
    read: BytesMut,
}

impl FrameReader {
    pub(crate) async fn read_frame(&mut self) -> Result<Bytes, Error> {
        read_frame_from(&mut self.stream, &mut self.read).await
    }
}
