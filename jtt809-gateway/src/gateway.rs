//! 网关入口
//! 监听主链路、派发连接事件循环、周期巡检链路与车辆状态，并对外提供命令面

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use log::{error, info, warn};
use tokio::{
    net::TcpListener,
    select,
    time::{interval, Duration},
};
use tokio_util::sync::CancellationToken;

use crate::auth::{Account, Authenticator};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::network::packet::{MonitorReason, PlateColor};
use crate::network::MainEventLoop;
use crate::protocol::store::{PlatformSnapshot, PlatformStore, VehicleKey};
use crate::protocol::video::{VideoRequest, VideoStreamInfo};
use crate::protocol::{sublink, Dispatcher};
use crate::{Hook, HookNoop};

/// 链路与车辆巡检周期
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// 主链路断开后从链路的保留时长（分钟）
const SUB_LINK_LINGER_MIN: i64 = 5;
/// 定位超时阈值（分钟）：超过即重新订阅
const POSITION_RESUBSCRIBE_MIN: i64 = 5;
/// 离线阈值（分钟）：超过即剔除车辆
const POSITION_OFFLINE_MIN: i64 = 10;

/// JT/T 809 上级平台网关
pub struct Gateway {
    cfg: Config,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(cfg: Config) -> Result<Self> {
        Self::with_hook(cfg, Arc::new(HookNoop))
    }

    /// 带业务回调构造网关，回调在构造期绑定
    pub fn with_hook(cfg: Config, hook: Arc<dyn Hook>) -> Result<Self> {
        if cfg.accounts.is_empty() {
            return Err(Error::NoAccounts);
        }
        let auth = Arc::new(Authenticator::new(cfg.accounts.clone()));
        let store = Arc::new(PlatformStore::new());
        let shutdown = CancellationToken::new();
        let dispatcher = Dispatcher::new(auth, store, hook, shutdown.clone());
        Ok(Self {
            cfg,
            dispatcher,
            shutdown,
        })
    }

    /// 监听配置地址并阻塞运行，直到 shutdown 被调用
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.cfg.gateway.main_listen).await?;
        self.serve(listener).await
    }

    /// 在给定监听器上运行主链路服务
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("main link listening on {}", listener.local_addr()?);
        let idle_timeout = Duration::from_secs(self.cfg.gateway.idle_timeout_secs);

        // 链路与车辆巡检
        tokio::spawn(health_check_loop(self.dispatcher.clone()));

        loop {
            select! {
                _ = self.shutdown.cancelled() => {
                    info!("gateway shutting down");
                    self.dispatcher.store.shutdown_all();
                    return Ok(());
                }
                accept = listener.accept() => {
                    let (stream, addr) = match accept {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("accept main link error: {}", e);
                            continue;
                        }
                    };
                    let remote_ip = addr.ip().to_string();
                    let event_loop = MainEventLoop::new(
                        stream,
                        remote_ip.clone(),
                        self.dispatcher.clone(),
                        idle_timeout,
                    );
                    let session_id = event_loop.session_id();
                    info!("main link connected, session={} remote_ip={}", session_id, remote_ip);

                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        if let Err(e) = event_loop.start().await {
                            error!("eventloop on session {} exit: {}", session_id, e);
                        }
                        dispatcher.store.remove_session(session_id);
                        info!("session closed, session={}", session_id);
                    });
                }
            }
        }
    }

    /// 触发优雅停机：停止接入、关闭全部从链路与主链路会话
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ---- 命令面 ----

    pub fn list_platforms(&self) -> Vec<PlatformSnapshot> {
        self.dispatcher.store.snapshots()
    }

    pub fn platform(&self, user_id: u32) -> Option<PlatformSnapshot> {
        self.dispatcher.store.snapshot(user_id)
    }

    /// 启动车辆定位信息交换（0x9200/0x9205）
    pub fn start_monitor(
        &self,
        user_id: u32,
        plate: &str,
        color: PlateColor,
        reason: MonitorReason,
    ) -> Result<()> {
        self.dispatcher
            .request_monitor_startup(user_id, plate, color, reason)
    }

    /// 结束车辆定位信息交换（0x9200/0x9206）
    pub fn end_monitor(
        &self,
        user_id: u32,
        plate: &str,
        color: PlateColor,
        reason: MonitorReason,
    ) -> Result<()> {
        self.dispatcher
            .request_monitor_end(user_id, plate, color, reason)
    }

    pub fn request_video_stream(&self, req: &VideoRequest) -> Result<()> {
        self.dispatcher.request_video_stream(req)
    }

    pub fn request_video_stream_by_plate(
        &self,
        plate: &str,
        color: PlateColor,
        channel: u8,
        av_item_type: u8,
        gnss_hex: &str,
    ) -> Result<()> {
        self.dispatcher
            .request_video_stream_by_plate(plate, color, channel, av_item_type, gnss_hex)
    }

    pub fn video_stream_info_by_plate(
        &self,
        plate: &str,
        color: PlateColor,
    ) -> Result<VideoStreamInfo> {
        self.dispatcher.video_stream_info_by_plate(plate, color)
    }

    pub fn video_stream_url_by_plate(
        &self,
        plate: &str,
        color: PlateColor,
        channel: u8,
        av_item_type: u8,
    ) -> Result<String> {
        self.dispatcher
            .video_stream_url_by_plate(plate, color, channel, av_item_type)
    }

    /// 新增或更新账号，返回是否覆盖了已有账号
    pub fn add_account(&self, account: Account) -> bool {
        self.dispatcher.auth.add_account(account)
    }

    /// 删除账号，返回账号是否存在
    pub fn remove_account(&self, user_id: u32) -> bool {
        self.dispatcher.auth.remove_account(user_id)
    }
}

/// 周期巡检：主链路断开超时的从链路释放、从链路断开重连、车辆定位状态
async fn health_check_loop(dispatcher: Dispatcher) {
    let mut ticker = interval(HEALTH_CHECK_INTERVAL);
    ticker.tick().await;
    loop {
        select! {
            _ = dispatcher.shutdown.cancelled() => return,
            _ = ticker.tick() => {
                check_connections(&dispatcher);
                check_vehicle_positions(&dispatcher);
            }
        }
    }
}

fn check_connections(dispatcher: &Dispatcher) {
    let now = Utc::now();
    for snap in dispatcher.store.snapshots() {
        if snap.main_session_id.is_none() {
            // 主链路断开超过保留时长后关闭从链路释放资源
            if snap.sub_connected {
                if let Some(at) = snap.main_disconnected_at {
                    if now.signed_duration_since(at) > ChronoDuration::minutes(SUB_LINK_LINGER_MIN) {
                        warn!(
                            "main link disconnected timeout, closing sub link, user_id={}",
                            snap.user_id
                        );
                        dispatcher.store.close_sub_link(snap.user_id);
                    }
                }
            }
            continue;
        }

        // 主链路在线而从链路缺失时触发重连
        if !snap.sub_connected && !snap.down_link_ip.is_empty() && snap.down_link_port > 0 {
            warn!(
                "sub link disconnected, triggering reconnect, user_id={}",
                snap.user_id
            );
            sublink::spawn_connect(dispatcher.clone(), snap.user_id, true);
        }
    }
}

/// 车辆定位巡检：已注册未定位的订阅或过期剔除、定位超时重订阅、离线剔除
fn check_vehicle_positions(dispatcher: &Dispatcher) {
    let now = Utc::now();
    for snap in dispatcher.store.snapshots() {
        if snap.main_session_id.is_none() || !snap.sub_connected {
            continue;
        }
        for vehicle in &snap.vehicles {
            let key = VehicleKey::new(&vehicle.plate, vehicle.color);
            let Some(position_time) = vehicle.position_time else {
                // 已注册但从未定位的车辆
                if vehicle.last_video_ack.is_none() {
                    if let Some(reg) = &vehicle.registration {
                        if now.signed_duration_since(reg.received_at)
                            > ChronoDuration::minutes(POSITION_OFFLINE_MIN)
                        {
                            dispatcher.store.remove_vehicle(snap.user_id, &key);
                            warn!(
                                "vehicle registration expired, removed, user_id={} plate={}",
                                snap.user_id, vehicle.plate
                            );
                            continue;
                        }
                        match dispatcher.request_monitor_startup(
                            snap.user_id,
                            &vehicle.plate,
                            vehicle.color,
                            MonitorReason::Manual,
                        ) {
                            Ok(()) => info!(
                                "subscribed registered vehicle, user_id={} plate={}",
                                snap.user_id, vehicle.plate
                            ),
                            Err(e) => warn!(
                                "subscribe registered vehicle failed, user_id={} plate={} err={}",
                                snap.user_id, vehicle.plate, e
                            ),
                        }
                    }
                }
                continue;
            };

            let since = now.signed_duration_since(position_time);
            if since > ChronoDuration::minutes(POSITION_OFFLINE_MIN) {
                // 超过十分钟未上报，认定离线并剔除
                dispatcher.store.remove_vehicle(snap.user_id, &key);
                warn!(
                    "vehicle offline, removed, user_id={} plate={} last_position={}",
                    snap.user_id, vehicle.plate, position_time
                );
            } else if since > ChronoDuration::minutes(POSITION_RESUBSCRIBE_MIN) {
                match dispatcher.request_monitor_startup(
                    snap.user_id,
                    &vehicle.plate,
                    vehicle.color,
                    MonitorReason::Manual,
                ) {
                    Ok(()) => info!(
                        "resubscribed vehicle due to position timeout, user_id={} plate={}",
                        snap.user_id, vehicle.plate
                    ),
                    Err(e) => warn!(
                        "resubscribe vehicle failed, user_id={} plate={} err={}",
                        snap.user_id, vehicle.plate, e
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::packet::{
        self, decode_frame, msg_id, sub_id, Header, LoginRequest, LoginResponse,
        SubBusinessPacket, SubLinkLoginRequest, SubLinkLoginResponse, VerifyResult,
    };
    use crate::network::Connection;
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout};

    fn test_config(accounts: Vec<Account>) -> Config {
        Config::new("127.0.0.1:0", accounts)
    }

    fn account() -> Account {
        Account {
            user_id: 10001,
            password: "pass809".into(),
            gnss_center_id: 20190708,
            allow_ips: vec!["*".into()],
        }
    }

    fn login_frame(user_id: u32, password: &str, sub_port: u16) -> bytes::Bytes {
        packet::encode_package(
            &Header {
                msg_sn: 1,
                gnss_center_id: 20190708,
                ..Default::default()
            },
            &LoginRequest {
                user_id,
                password: password.into(),
                down_link_ip: "127.0.0.1".into(),
                down_link_port: sub_port,
                protocol_version: [1, 0, 0],
            },
        )
        .unwrap()
    }

    async fn read_frame(conn: &mut Connection) -> packet::Frame {
        let wire = timeout(Duration::from_secs(5), conn.read_frame())
            .await
            .expect("read timed out")
            .expect("read failed");
        decode_frame(&wire).expect("decode failed")
    }

    #[tokio::test]
    async fn login_ok_dials_sub_link_and_routes_heartbeat_cross_link() {
        // 模拟下级平台的从链路服务端
        let sub_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sub_port = sub_listener.local_addr().unwrap().port();
        let (sub_frames_tx, mut sub_frames_rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            let (stream, _) = sub_listener.accept().await.unwrap();
            let mut conn = Connection::new(stream);
            loop {
                let wire = match conn.read_frame().await {
                    Ok(wire) => wire,
                    Err(_) => return,
                };
                let frame = decode_frame(&wire).unwrap();
                if frame.body_id() == msg_id::DOWN_CONNECT_REQ {
                    let req = SubLinkLoginRequest::decode(frame.raw_body.clone()).unwrap();
                    let resp = packet::encode_package(
                        &frame.header.with_response(msg_id::DOWN_CONNECT_RSP),
                        &SubLinkLoginResponse { result: 0 },
                    )
                    .unwrap();
                    conn.write_frame(&resp).await.unwrap();
                    sub_frames_tx.send((frame.body_id(), req.verify_code)).await.unwrap();
                } else {
                    sub_frames_tx.send((frame.body_id(), 0)).await.unwrap();
                }
            }
        });

        // 启动网关
        let gateway = Gateway::new(test_config(vec![account()])).unwrap();
        let main_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let main_addr = main_listener.local_addr().unwrap();
        let dispatcher = gateway.dispatcher.clone();
        let shutdown = gateway.shutdown.clone();
        tokio::spawn(async move { gateway.serve(main_listener).await.unwrap() });

        // 主链路登录
        let stream = TcpStream::connect(main_addr).await.unwrap();
        let mut client = Connection::new(stream);
        client
            .write_frame(&login_frame(10001, "pass809", sub_port))
            .await
            .unwrap();

        let frame = read_frame(&mut client).await;
        assert_eq!(frame.body_id(), msg_id::LOGIN_RESPONSE);
        // 应答流水号与请求一致
        assert_eq!(frame.header.msg_sn, 1);
        let resp = LoginResponse::decode(frame.raw_body).unwrap();
        assert_eq!(resp.result, VerifyResult::Ok);
        assert_ne!(resp.verify_code, 0);

        // 网关回拨从链路并以校验码登录
        let (body_id, verify_code) = timeout(Duration::from_secs(5), sub_frames_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body_id, msg_id::DOWN_CONNECT_REQ);
        assert_eq!(verify_code, resp.verify_code);

        // 等待从链路绑定完成
        for _ in 0..50 {
            if dispatcher
                .store
                .snapshot(10001)
                .map(|s| s.sub_connected)
                .unwrap_or(false)
            {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
        let snap = dispatcher.store.snapshot(10001).unwrap();
        assert!(snap.main_session_id.is_some());
        assert!(snap.sub_connected);

        // 主链路心跳，应答走从链路
        let hb = packet::encode_package(
            &Header {
                msg_sn: 2,
                gnss_center_id: 20190708,
                ..Default::default()
            },
            &packet::HeartbeatRequest,
        )
        .unwrap();
        client.write_frame(&hb).await.unwrap();

        let (body_id, _) = timeout(Duration::from_secs(5), sub_frames_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body_id, msg_id::HEARTBEAT_RESPONSE);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn login_unregistered_is_rejected_and_closed() {
        let gateway = Gateway::new(test_config(vec![account()])).unwrap();
        let main_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let main_addr = main_listener.local_addr().unwrap();
        let shutdown = gateway.shutdown.clone();
        tokio::spawn(async move { gateway.serve(main_listener).await.unwrap() });

        let stream = TcpStream::connect(main_addr).await.unwrap();
        let mut client = Connection::new(stream);
        client
            .write_frame(&login_frame(99999, "whatever", 9000))
            .await
            .unwrap();

        let frame = read_frame(&mut client).await;
        assert_eq!(frame.body_id(), msg_id::LOGIN_RESPONSE);
        let resp = LoginResponse::decode(frame.raw_body).unwrap();
        assert_eq!(resp.result, VerifyResult::Unregistered);

        // 登录失败后网关关闭连接
        let closed = timeout(Duration::from_secs(5), client.read_frame()).await;
        assert!(matches!(closed, Ok(Err(_))));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn registration_triggers_auto_subscribe() {
        let sub_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sub_port = sub_listener.local_addr().unwrap().port();
        let (sub_tx, mut sub_rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            let (stream, _) = sub_listener.accept().await.unwrap();
            let mut conn = Connection::new(stream);
            loop {
                let wire = match conn.read_frame().await {
                    Ok(wire) => wire,
                    Err(_) => return,
                };
                let frame = decode_frame(&wire).unwrap();
                if frame.body_id() == msg_id::DOWN_CONNECT_REQ {
                    let resp = packet::encode_package(
                        &frame.header.with_response(msg_id::DOWN_CONNECT_RSP),
                        &SubLinkLoginResponse { result: 0 },
                    )
                    .unwrap();
                    conn.write_frame(&resp).await.unwrap();
                } else {
                    sub_tx.send(frame).await.unwrap();
                }
            }
        });

        let gateway = Gateway::new(test_config(vec![account()])).unwrap();
        let main_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let main_addr = main_listener.local_addr().unwrap();
        let shutdown = gateway.shutdown.clone();
        tokio::spawn(async move { gateway.serve(main_listener).await.unwrap() });

        let stream = TcpStream::connect(main_addr).await.unwrap();
        let mut client = Connection::new(stream);
        client
            .write_frame(&login_frame(10001, "pass809", sub_port))
            .await
            .unwrap();
        let _ = read_frame(&mut client).await;

        // 上报车辆注册信息（2019 版字段宽度）
        let reg = packet::VehicleRegistration {
            platform_id: "PLAT0000001".into(),
            producer_id: "PROD1".into(),
            terminal_model: "MODEL1".into(),
            imei: "123456789012345".into(),
            terminal_id: "TID1".into(),
            terminal_sim: "13800138000".into(),
        };
        let body = SubBusinessPacket::new(
            "粤B12345",
            packet::PlateColor::BLUE,
            sub_id::VEHICLE_REGISTER,
            reg.encode(packet::ProtocolEdition::V2019),
        );
        let wire = packet::encode_package(
            &Header {
                msg_sn: 5,
                gnss_center_id: 20190708,
                ..Default::default()
            },
            &packet::RawBody {
                msg_id: msg_id::DYNAMIC_INFO,
                payload: body.encode(),
            },
        )
        .unwrap();
        client.write_frame(&wire).await.unwrap();

        // 两三秒内网关应经从链路下发 0x9200/0x9205 自动订阅
        let frame = timeout(Duration::from_secs(5), sub_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.body_id(), msg_id::DOWN_EXG_MSG);
        let pkt = SubBusinessPacket::decode(frame.raw_body).unwrap();
        assert_eq!(pkt.sub_id, sub_id::MONITOR_STARTUP);
        assert_eq!(pkt.plate, "粤B12345");
        assert_eq!(pkt.payload.as_ref(), &[0x01]);

        shutdown.cancel();
    }
}
