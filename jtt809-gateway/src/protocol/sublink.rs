//! 从链路维护
//! 主链路登录成功后回拨下级平台声明的地址，完成 0x9001/0x9002 登录交换，
//! 之后由读循环、写循环与心跳循环三个任务共同持有一个取消令牌

use log::{error, info, warn};
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    select,
    sync::mpsc::{self, error::TrySendError},
    time::{interval, sleep, timeout, Duration},
};

use crate::network::packet::{
    self, msg_id, Header, SubLinkHeartbeatRequest, SubLinkLoginRequest, SubLinkLoginResponse,
    DISCONNECT_CANNOT_CONNECT_SUB, DISCONNECT_SUB_LINK_BROKEN,
};
use crate::network::{Connection, SEND_QUEUE_CAPACITY};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::store::SubLinkHandle;

/// 从链路登录交换的总时限
const LOGIN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
/// 重连尝试间隔
const RETRY_INTERVAL: Duration = Duration::from_secs(10);
/// 读循环退出后至重连的等待
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// 从链路心跳周期
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) fn spawn_connect(dispatcher: Dispatcher, user_id: u32, is_reconnect: bool) {
    tokio::spawn(async move {
        connect_with_retry(dispatcher, user_id, is_reconnect).await;
    });
}

/// 带重试的从链路建立，单飞：同一平台同一时刻只有一个重连任务
pub(crate) async fn connect_with_retry(
    dispatcher: Dispatcher,
    user_id: u32,
    is_reconnect: bool,
) {
    if !dispatcher.store.set_reconnecting(user_id, true) {
        info!("sub link already reconnecting, skip, user_id={}", user_id);
        return;
    }
    let exhausted = try_connect(&dispatcher, user_id, is_reconnect).await;
    dispatcher.store.set_reconnecting(user_id, false);

    if exhausted {
        // 初次失败与重连耗尽使用不同错误码
        let error_code = if is_reconnect {
            DISCONNECT_SUB_LINK_BROKEN
        } else {
            DISCONNECT_CANNOT_CONNECT_SUB
        };
        warn!(
            "sub link connection failed, sending 0x9007, user_id={} error_code=0x{:02X}",
            user_id, error_code
        );
        dispatcher.send_sub_disconnect_inform(user_id, error_code);
    }
}

/// 返回 true 表示重试耗尽且应发送 0x9007
async fn try_connect(dispatcher: &Dispatcher, user_id: u32, is_reconnect: bool) -> bool {
    // 初次连接只试一次，重连最多三次
    let max_retries = if is_reconnect { 3 } else { 1 };

    for attempt in 0..max_retries {
        let (_, sub_active) = dispatcher.store.link_status(user_id);
        if sub_active {
            info!("sub link already connected, stop reconnecting, user_id={}", user_id);
            return false;
        }
        let snap = match dispatcher.store.snapshot(user_id) {
            Some(snap) => snap,
            None => return false,
        };
        if snap.main_session_id.is_none() {
            info!("main link not active, stop reconnecting, user_id={}", user_id);
            return false;
        }
        if snap.down_link_ip.is_empty() || snap.down_link_port == 0 {
            warn!(
                "missing sub link address, stop reconnecting, user_id={} ip={} port={}",
                user_id, snap.down_link_ip, snap.down_link_port
            );
            return false;
        }
        if snap.gnss_center_id == 0 {
            warn!("missing gnss center id, stop reconnecting, user_id={}", user_id);
            return false;
        }

        if connect_once(
            dispatcher,
            user_id,
            &snap.down_link_ip,
            snap.down_link_port,
            snap.gnss_center_id,
            snap.verify_code,
        )
        .await
        {
            return false;
        }

        if is_reconnect && attempt + 1 < max_retries {
            sleep(RETRY_INTERVAL).await;
            info!(
                "retrying sub link connection, user_id={} attempt={}",
                user_id,
                attempt + 1
            );
        }
    }
    true
}

/// 一次完整的拨号 + 登录交换；成功则绑定会话并启动后台任务
async fn connect_once(
    dispatcher: &Dispatcher,
    user_id: u32,
    ip: &str,
    port: u16,
    gnss_center_id: u32,
    verify_code: u32,
) -> bool {
    info!("connecting sub link, ip={} port={} user_id={}", ip, port, user_id);

    // 整个登录交换（拨号、发 0x9001、等 0x9002）共用一个时限
    let exchange = timeout(
        LOGIN_EXCHANGE_TIMEOUT,
        login_exchange(dispatcher, ip, port, gnss_center_id, verify_code),
    )
    .await;
    let conn = match exchange {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            error!("sub link login failed, user_id={} err={}", user_id, e);
            return false;
        }
        Err(_) => {
            error!("sub link login timed out, user_id={}", user_id);
            return false;
        }
    };

    info!("sub link connected and logged in, user_id={}", user_id);

    let cancel = dispatcher.shutdown.child_token();
    let (tx, mut rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
    dispatcher.store.bind_sub_session(
        user_id,
        SubLinkHandle {
            tx: tx.clone(),
            cancel: cancel.clone(),
        },
    );

    let (mut reader, mut write_half) = conn.into_split();

    // 写循环：序列化本链路的全部写出
    let write_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            select! {
                _ = write_cancel.cancelled() => return,
                data = rx.recv() => {
                    let data: bytes::Bytes = match data {
                        Some(data) => data,
                        None => return,
                    };
                    if let Err(e) = write_half.write_all(&data).await {
                        warn!("sub link write error, user_id={} err={}", user_id, e);
                        write_cancel.cancel();
                        return;
                    }
                }
            }
        }
    });

    // 读循环：退出即摘除从链路并安排重连
    let read_dispatcher = dispatcher.clone();
    let read_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            select! {
                _ = read_cancel.cancelled() => break,
                read = reader.read_frame() => {
                    let wire = match read {
                        Ok(wire) => wire,
                        Err(e) => {
                            error!("sub link read error, user_id={} err={}", user_id, e);
                            break;
                        }
                    };
                    match packet::decode_frame(&wire) {
                        Ok(frame) => read_dispatcher.handle_sub_frame(user_id, frame),
                        Err(e) => warn!("decode sub frame failed, user_id={} err={}", user_id, e),
                    }
                }
            }
        }
        read_cancel.cancel();
        read_dispatcher.store.close_sub_link(user_id);
        info!("sub link closed, user_id={}", user_id);

        if !read_dispatcher.shutdown.is_cancelled() {
            let reconnect_dispatcher = read_dispatcher.clone();
            tokio::spawn(async move {
                sleep(RECONNECT_DELAY).await;
                let snap = reconnect_dispatcher.store.snapshot(user_id);
                if snap.map(|s| s.main_session_id.is_none()).unwrap_or(true) {
                    info!("skip sub link reconnect, main link not active, user_id={}", user_id);
                    return;
                }
                info!("attempting sub link reconnect, user_id={}", user_id);
                spawn_connect(reconnect_dispatcher, user_id, true);
            });
        }
    });

    // 心跳循环：每 60 秒发送 0x9005，发送失败触发链路关闭
    let beat_dispatcher = dispatcher.clone();
    tokio::spawn(async move {
        let mut ticker = interval(HEARTBEAT_INTERVAL);
        ticker.tick().await; // 首个 tick 立即返回，跳过
        loop {
            select! {
                _ = cancel.cancelled() => {
                    info!("sub heartbeat task stopped, user_id={}", user_id);
                    return;
                }
                _ = ticker.tick() => {
                    let gnss = match beat_dispatcher.store.snapshot(user_id) {
                        Some(snap) if snap.gnss_center_id != 0 => snap.gnss_center_id,
                        _ => {
                            warn!("skip sub heartbeat, snapshot missing, user_id={}", user_id);
                            continue;
                        }
                    };
                    let header = Header {
                        msg_sn: beat_dispatcher.next_sn(),
                        gnss_center_id: gnss,
                        ..Default::default()
                    };
                    let data = match packet::encode_package(&header, &SubLinkHeartbeatRequest) {
                        Ok(data) => data,
                        Err(e) => {
                            warn!("encode sub heartbeat failed, user_id={} err={}", user_id, e);
                            continue;
                        }
                    };
                    match tx.try_send(data) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("sub send queue full, drop heartbeat, user_id={}", user_id);
                        }
                        Err(TrySendError::Closed(_)) => {
                            // 写循环已退出，关闭链路触发读循环收尾与重连
                            warn!("send sub heartbeat failed, closing link, user_id={}", user_id);
                            cancel.cancel();
                            return;
                        }
                    }
                }
            }
        }
    });

    true
}

/// 拨号并完成 0x9001/0x9002 登录交换
async fn login_exchange(
    dispatcher: &Dispatcher,
    ip: &str,
    port: u16,
    gnss_center_id: u32,
    verify_code: u32,
) -> Result<Connection, crate::error::Error> {
    let stream = TcpStream::connect((ip, port)).await?;
    let mut conn = Connection::new(stream);

    let header = Header {
        msg_sn: dispatcher.next_sn(),
        gnss_center_id,
        ..Default::default()
    };
    let req = SubLinkLoginRequest { verify_code };
    let data = packet::encode_package(&header, &req)?;
    conn.write_frame(&data).await?;

    let wire = conn.read_frame().await?;
    let frame = packet::decode_frame(&wire)?;
    if frame.body_id() != msg_id::DOWN_CONNECT_RSP {
        return Err(packet::Error::UnexpectedMsgId(frame.body_id()).into());
    }
    let resp = SubLinkLoginResponse::decode(frame.raw_body)?;
    if resp.result != 0 {
        return Err(crate::error::Error::SubLoginRefused(resp.result));
    }
    Ok(conn)
}
