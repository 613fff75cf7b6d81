//! 网络层
//! 本层只关心连接读写与事件循环，业务处理交给协议层

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use log::{info, warn};
use tokio::{
    net::TcpStream,
    select,
    sync::mpsc::{self, Receiver},
    time::{self, Duration},
};

pub(crate) use conn::Connection;

use crate::protocol::{Dispatcher, LoopAction};

pub(crate) mod conn;
pub mod packet;

/// 每条链路的发送队列容量，写满即丢帧，绝不阻塞读循环
pub(crate) const SEND_QUEUE_CAPACITY: usize = 128;

/// 空闲超时被禁用时使用的哨兵时长
const IDLE_DISABLED: Duration = Duration::from_secs(365 * 24 * 3600);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] conn::Error),
    #[error("Idle timeout")]
    IdleTimeout(#[from] time::error::Elapsed),
}

/// 主链路事件循环，每个被接入的下级平台连接一个
/// * 从 socket 读帧并交给协议层分发
/// * 将协议层经发送队列投递的帧写回 socket
pub(crate) struct MainEventLoop {
    session_id: u64,
    remote_ip: String,
    conn: Connection,
    dispatcher: Dispatcher,
    conn_rx: Receiver<Bytes>,
    idle_timeout: Duration,
}

impl MainEventLoop {
    pub(crate) fn new(
        stream: TcpStream,
        remote_ip: String,
        dispatcher: Dispatcher,
        idle_timeout: Duration,
    ) -> Self {
        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        // conn_tx 由 store 持有，跨链路应答经它送达本连接
        let (conn_tx, conn_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        dispatcher.store.register_session(session_id, conn_tx);
        Self {
            session_id,
            remote_ip,
            conn: Connection::new(stream),
            dispatcher,
            conn_rx,
            idle_timeout: if idle_timeout.is_zero() {
                IDLE_DISABLED
            } else {
                idle_timeout
            },
        }
    }

    pub(crate) fn session_id(&self) -> u64 {
        self.session_id
    }

    /// 开启事件循环，返回即表示连接生命周期结束
    pub(crate) async fn start(mut self) -> Result<(), Error> {
        loop {
            select! {
                read = time::timeout(self.idle_timeout, self.conn.read_frame()) => {
                    let wire = read??;
                    let frame = match packet::decode_frame(&wire) {
                        Ok(frame) => frame,
                        Err(e) => {
                            // 坏帧丢弃，链路继续
                            warn!("decode main frame failed, session={} err={}", self.session_id, e);
                            continue;
                        }
                    };
                    let action = self
                        .dispatcher
                        .handle_main_frame(self.session_id, &self.remote_ip, frame);
                    if let LoopAction::Close(reason) = action {
                        // 关闭前冲刷已入队的应答（如登录失败应答）
                        while let Ok(data) = self.conn_rx.try_recv() {
                            self.conn.write_frame(&data).await.map_err(Error::Connection)?;
                        }
                        info!("closing main link, session={} reason={}", self.session_id, reason);
                        return Ok(());
                    }
                }
                send = self.conn_rx.recv() => {
                    match send {
                        Some(data) => self.conn.write_frame(&data).await.map_err(Error::Connection)?,
                        // 发送端全部释放，说明会话已被剔除
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}
