//! 业务分发
//! 按业务 ID 将解码后的帧派发到处理函数：更新状态存储、触发回调、
//! 并按跨链路规则选择应答链路。处理函数本身不做任何 IO，发送只入队

use std::ops::Deref;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::error::{Error, Result};
use crate::network::packet::{
    self, msg_id, sub_id, AlarmInfoPacket, ApplyForMonitorEnd, ApplyForMonitorStartup,
    AuthorizePacket, AuthorizeStartupReq, BatchLocation, Body, Frame, Header, HeartbeatResponse,
    LoginRequest, LogoutResponse, MainDisconnectInform, MonitorAck, MonitorReason, PlateColor,
    PlatformQueryAck, Position, RealTimeVideoStartupAck, SubBusinessPacket, SubDisconnectInform,
    VehicleRegistration, VerifyResult, WarnMsgAdptInfo, WarnMsgInformTips,
};
use crate::protocol::store::PlatformStore;
use crate::protocol::sublink;
use crate::Hook;

/// 事件循环收到帧后的动作
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LoopAction {
    Continue,
    Close(&'static str),
}

/// 应答与请求使用相同链路的业务 ID（主/从链路登录）
fn use_same_link(msg_id: u16) -> bool {
    matches!(msg_id, 0x1001 | 0x1002 | 0x9001 | 0x9002)
}

/// 根据接收链路与业务 ID 选择应答链路，true 表示主链路
pub(crate) fn select_response_link(received_on_main: bool, msg_id: u16) -> bool {
    if use_same_link(msg_id) {
        received_on_main
    } else {
        !received_on_main
    }
}

pub(crate) struct DispatcherInner {
    pub(crate) auth: Arc<Authenticator>,
    pub(crate) store: Arc<PlatformStore>,
    pub(crate) hook: Arc<dyn Hook>,
    pub(crate) shutdown: CancellationToken,
    next_sn: AtomicU32,
}

/// 分发器句柄，廉价克隆后在各任务间传递
#[derive(Clone)]
pub(crate) struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Deref for Dispatcher {
    type Target = DispatcherInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Dispatcher {
    pub(crate) fn new(
        auth: Arc<Authenticator>,
        store: Arc<PlatformStore>,
        hook: Arc<dyn Hook>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                auth,
                store,
                hook,
                shutdown,
                next_sn: AtomicU32::new(1),
            }),
        }
    }

    /// 网关主动发包的流水号
    pub(crate) fn next_sn(&self) -> u32 {
        self.next_sn.fetch_add(1, Ordering::Relaxed)
    }

    // ---- 主链路 ----

    pub(crate) fn handle_main_frame(
        &self,
        session_id: u64,
        remote_ip: &str,
        frame: Frame,
    ) -> LoopAction {
        let user = self.store.user_for_session(session_id);
        if user.is_none() && frame.body_id() != msg_id::LOGIN_REQUEST {
            // 未登录成功前的报文直接忽略
            warn!(
                "ignore message before login, session={} msg_id=0x{:04X}",
                session_id,
                frame.body_id()
            );
            return LoopAction::Continue;
        }
        match frame.body_id() {
            msg_id::LOGIN_REQUEST => self.handle_main_login(session_id, remote_ip, frame),
            msg_id::HEARTBEAT_REQUEST => {
                if let Some(user_id) = user {
                    self.store.record_heartbeat(user_id, true);
                    info!(
                        "main link heartbeat, session={} user_id={}",
                        session_id, user_id
                    );
                    // 心跳应答走从链路（跨链路规则），不可用时降级
                    if let Err(e) =
                        self.send_response_on_link(true, user_id, &frame.header, &HeartbeatResponse)
                    {
                        warn!(
                            "send heartbeat response failed, user_id={} err={}",
                            user_id, e
                        );
                    }
                }
                LoopAction::Continue
            }
            msg_id::LOGOUT_REQUEST => {
                if let Some(user_id) = user {
                    if let Err(e) =
                        self.send_response_on_link(true, user_id, &frame.header, &LogoutResponse)
                    {
                        warn!("send logout response failed, user_id={} err={}", user_id, e);
                    }
                }
                LoopAction::Continue
            }
            msg_id::MAIN_DISCONNECT_INFORM => {
                match MainDisconnectInform::decode(&frame) {
                    Ok(inform) => warn!(
                        "platform disconnect notify, session={} code=0x{:02X}",
                        session_id, inform.error_code
                    ),
                    Err(e) => warn!(
                        "parse disconnect inform failed, session={} err={}",
                        session_id, e
                    ),
                }
                LoopAction::Continue
            }
            _ => {
                if let Some(user_id) = user {
                    self.handle_business(user_id, &frame, true);
                }
                LoopAction::Continue
            }
        }
    }

    fn handle_main_login(&self, session_id: u64, remote_ip: &str, frame: Frame) -> LoopAction {
        let req = match LoginRequest::decode(frame.raw_body.clone()) {
            Ok(req) => req,
            Err(e) => {
                warn!("parse main login failed, session={} err={}", session_id, e);
                return LoopAction::Continue;
            }
        };
        let (_, resp) = self
            .auth
            .authenticate(&req, frame.header.gnss_center_id, remote_ip);
        info!(
            "main login request, session={} user_id={} gnss={} ip={} result={:?}",
            session_id, req.user_id, frame.header.gnss_center_id, remote_ip, resp.result
        );
        if resp.result == VerifyResult::Ok {
            self.store.bind_main_session(
                session_id,
                &req,
                frame.header.gnss_center_id,
                resp.verify_code,
            );

            let hook = self.hook.clone();
            let hook_req = req.clone();
            tokio::spawn(async move { hook.on_login(hook_req.user_id, hook_req, resp).await });

            // 回拨从链路
            sublink::spawn_connect(self.clone(), req.user_id, false);
        }
        // 主链路登录应答在主链路返回（同链路规则）
        match packet::encode_package(&frame.header.with_response(msg_id::LOGIN_RESPONSE), &resp) {
            Ok(data) => self.send_on_session(session_id, data),
            Err(e) => warn!("encode login response failed, err={}", e),
        }
        if resp.result != VerifyResult::Ok {
            // 登录失败后立即断开
            return LoopAction::Close("login failed");
        }
        LoopAction::Continue
    }

    // ---- 从链路 ----

    /// 从链路报文。正常情况下从链路用于接收应答回显，
    /// 主链路断开时下级平台也可能经从链路发送业务请求
    pub(crate) fn handle_sub_frame(&self, user_id: u32, frame: Frame) {
        match frame.body_id() {
            msg_id::DOWN_CONNECT_REQ | msg_id::DOWN_CONNECT_RSP => {
                debug!("sub link login echo, user_id={}", user_id);
            }
            msg_id::MAIN_DISCONNECT_INFORM => match MainDisconnectInform::decode(&frame) {
                Ok(inform) => warn!(
                    "main link disconnect notify, user_id={} code=0x{:02X}",
                    user_id, inform.error_code
                ),
                Err(e) => warn!(
                    "parse main disconnect notify failed, user_id={} err={}",
                    user_id, e
                ),
            },
            _ => self.handle_business(user_id, &frame, false),
        }
    }

    // ---- 业务消息，主从链路共用 ----

    fn handle_business(&self, user_id: u32, frame: &Frame, received_on_main: bool) {
        match frame.body_id() {
            msg_id::DYNAMIC_INFO => self.handle_dynamic_info(user_id, frame),
            msg_id::PLATFORM_INFO => self.handle_platform_info(user_id, frame),
            msg_id::ALARM_INTERACT => self.handle_alarm_interact(user_id, frame),
            msg_id::AUTHORIZE => self.handle_authorize(user_id, frame),
            msg_id::REAL_TIME_VIDEO => self.handle_real_time_video(user_id, frame),
            msg_id::DOWN_HEARTBEAT_RSP => self.store.record_heartbeat(user_id, false),
            other => debug!(
                "unhandled business message, user_id={} link={} msg_id=0x{:04X}",
                user_id,
                if received_on_main { "main" } else { "sub" },
                other
            ),
        }
    }

    fn handle_dynamic_info(&self, user_id: u32, frame: &Frame) {
        let pkt = match SubBusinessPacket::decode(frame.raw_body.clone()) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("parse sub business failed, user_id={} err={}", user_id, e);
                return;
            }
        };
        match pkt.sub_id {
            sub_id::VEHICLE_REGISTER => self.handle_vehicle_register(user_id, &pkt),
            sub_id::REAL_LOCATION => self.handle_real_location(user_id, &pkt),
            sub_id::BATCH_LOCATION => self.handle_batch_location(user_id, &pkt),
            sub_id::MONITOR_STARTUP_ACK => self.handle_monitor_ack(user_id, &pkt, true),
            sub_id::MONITOR_END_ACK => self.handle_monitor_ack(user_id, &pkt, false),
            other => debug!(
                "unhandled dynamic sub business, user_id={} sub_id=0x{:04X}",
                user_id, other
            ),
        }
    }

    fn handle_vehicle_register(&self, user_id: u32, pkt: &SubBusinessPacket) {
        let edition = match VehicleRegistration::edition_for_len(pkt.payload.len()) {
            Ok(edition) => edition,
            Err(e) => {
                warn!(
                    "vehicle registration size mismatch, user_id={} err={}",
                    user_id, e
                );
                return;
            }
        };
        let info = match VehicleRegistration::decode(pkt.payload.clone(), edition) {
            Ok(info) => info,
            Err(e) => {
                warn!(
                    "parse vehicle registration failed, user_id={} err={}",
                    user_id, e
                );
                return;
            }
        };
        self.store
            .update_vehicle_registration(user_id, &pkt.plate, pkt.color, info.clone());
        info!(
            "vehicle registration, user_id={} plate={} platform={}",
            user_id, pkt.plate, info.platform_id
        );

        let hook = self.hook.clone();
        let plate = pkt.plate.clone();
        let color = pkt.color;
        tokio::spawn(async move {
            hook.on_vehicle_registration(user_id, plate, color, info)
                .await
        });

        // 注册后自动订阅该车辆的实时定位数据
        let this = self.clone();
        let plate = pkt.plate.clone();
        tokio::spawn(async move {
            // 稍等片刻，让从链路完成建立
            sleep(Duration::from_secs(2)).await;
            match this.request_monitor_startup(user_id, &plate, color, MonitorReason::Manual) {
                Ok(()) => info!(
                    "auto subscribed vehicle, user_id={} plate={}",
                    user_id, plate
                ),
                Err(e) => warn!(
                    "auto subscribe vehicle failed, user_id={} plate={} err={}",
                    user_id, plate, e
                ),
            }
        });
    }

    fn handle_real_location(&self, user_id: u32, pkt: &SubBusinessPacket) {
        let position = match packet::decode_real_location(pkt.payload.clone()) {
            Ok(position) => position,
            Err(e) => {
                warn!(
                    "parse vehicle position failed, user_id={} err={}",
                    user_id, e
                );
                return;
            }
        };
        self.store
            .update_location(user_id, &pkt.plate, pkt.color, position.clone(), 0);

        let gnss = match &position {
            Position::V2011(pos) => {
                info!(
                    "vehicle location, user_id={} plate={} lon={} lat={}",
                    user_id, pkt.plate, pos.lon, pos.lat
                );
                None
            }
            Position::V2019(pos) => match pos.gnss() {
                Ok(gnss) => {
                    info!(
                        "vehicle location, user_id={} plate={} lon={} lat={}",
                        user_id, pkt.plate, gnss.longitude, gnss.latitude
                    );
                    Some(gnss)
                }
                Err(e) => {
                    debug!("parse embedded gnss failed, user_id={} err={}", user_id, e);
                    None
                }
            },
        };

        let hook = self.hook.clone();
        let plate = pkt.plate.clone();
        let color = pkt.color;
        tokio::spawn(async move {
            hook.on_vehicle_location(user_id, plate, color, position, gnss)
                .await
        });
    }

    fn handle_batch_location(&self, user_id: u32, pkt: &SubBusinessPacket) {
        let batch = match BatchLocation::decode(pkt.payload.clone()) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("parse batch location failed, user_id={} err={}", user_id, e);
                return;
            }
        };
        let count = batch.locations.len() as u32;
        let mut parsed = Vec::with_capacity(batch.locations.len());
        for loc in batch.locations {
            if let Ok(gnss) = loc.gnss() {
                parsed.push(gnss);
            }
            self.store
                .update_location(user_id, &pkt.plate, pkt.color, Position::V2019(loc), count);
        }
        info!(
            "batch vehicle location, user_id={} plate={} count={}",
            user_id, pkt.plate, count
        );

        let hook = self.hook.clone();
        let plate = pkt.plate.clone();
        let color = pkt.color;
        tokio::spawn(async move { hook.on_batch_location(user_id, plate, color, parsed).await });
    }

    fn handle_monitor_ack(&self, user_id: u32, pkt: &SubBusinessPacket, startup: bool) {
        let ack = match MonitorAck::decode(pkt.payload.clone()) {
            Ok(ack) => ack,
            Err(e) => {
                warn!("parse monitor ack failed, user_id={} err={}", user_id, e);
                return;
            }
        };
        info!(
            "monitor {} ack, user_id={} plate={} result={} source_sn={:?}",
            if startup { "startup" } else { "end" },
            user_id,
            pkt.plate,
            ack.result,
            ack.source.map(|s| s.msg_sn)
        );
        let hook = self.hook.clone();
        let plate = pkt.plate.clone();
        let color = pkt.color;
        tokio::spawn(async move {
            if startup {
                hook.on_monitor_startup_ack(user_id, plate, color).await
            } else {
                hook.on_monitor_end_ack(user_id, plate, color).await
            }
        });
    }

    fn handle_platform_info(&self, user_id: u32, frame: &Frame) {
        let pkt = match SubBusinessPacket::decode(frame.raw_body.clone()) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("parse platform info failed, user_id={} err={}", user_id, e);
                return;
            }
        };
        if pkt.sub_id != sub_id::PLATFORM_QUERY_ACK {
            debug!(
                "unhandled platform info sub, user_id={} sub_id=0x{:04X}",
                user_id, pkt.sub_id
            );
            return;
        }
        match PlatformQueryAck::decode(&pkt) {
            Ok(ack) => info!(
                "platform query ack, user_id={} object={} info={}",
                user_id, ack.object_id, ack.info_content
            ),
            Err(e) => warn!(
                "parse platform query ack failed, user_id={} err={}",
                user_id, e
            ),
        }
    }

    fn handle_alarm_interact(&self, user_id: u32, frame: &Frame) {
        let pkt = match AlarmInfoPacket::decode(frame.raw_body.clone()) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("parse alarm info failed, user_id={} err={}", user_id, e);
                return;
            }
        };
        match pkt.sub_id {
            sub_id::WARN_ADPT_INFO => match WarnMsgAdptInfo::decode(pkt.payload) {
                Ok(warn_info) => {
                    info!(
                        "warn msg adpt info, user_id={} type=0x{:04X} plate={}",
                        user_id, warn_info.warn_type.0, warn_info.plate
                    );
                    let hook = self.hook.clone();
                    tokio::spawn(
                        async move { hook.on_warn_msg_adpt_info(user_id, warn_info).await },
                    );
                }
                Err(e) => warn!(
                    "parse warn msg adpt info failed, user_id={} err={}",
                    user_id, e
                ),
            },
            sub_id::WARN_INFORM_TIPS => match WarnMsgInformTips::decode(pkt.payload) {
                Ok(tips) => info!(
                    "warn inform tips, user_id={} type=0x{:04X} content={}",
                    user_id, tips.warn_type.0, tips.warn_content
                ),
                Err(e) => warn!(
                    "parse warn inform tips failed, user_id={} err={}",
                    user_id, e
                ),
            },
            other => debug!(
                "unhandled alarm sub business, user_id={} sub_id=0x{:04X}",
                user_id, other
            ),
        }
    }

    fn handle_authorize(&self, user_id: u32, frame: &Frame) {
        // 0x1700 同时存在带车牌与平台级两种封装
        let pkt = match AuthorizePacket::decode(frame.raw_body.clone()) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("parse authorize msg failed, user_id={} err={}", user_id, e);
                return;
            }
        };
        if pkt.sub_id != sub_id::AUTHORIZE_STARTUP {
            debug!(
                "unhandled authorize sub msg, user_id={} sub_id=0x{:04X}",
                user_id, pkt.sub_id
            );
            return;
        }
        match AuthorizeStartupReq::decode(pkt.payload) {
            Ok(req) => {
                // 时效口令是平台级凭证
                self.store
                    .update_auth_code(user_id, &req.platform_id, &req.authorize_code1);
                info!(
                    "video authorize report, user_id={} platform={}",
                    user_id, req.platform_id
                );
                let hook = self.hook.clone();
                tokio::spawn(async move {
                    hook.on_authorize(user_id, req.platform_id, req.authorize_code1)
                        .await
                });
            }
            Err(e) => warn!(
                "parse authorize startup req failed, user_id={} err={}",
                user_id, e
            ),
        }
    }

    fn handle_real_time_video(&self, user_id: u32, frame: &Frame) {
        let pkt = match SubBusinessPacket::decode(frame.raw_body.clone()) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("parse sub business failed, user_id={} err={}", user_id, e);
                return;
            }
        };
        if pkt.sub_id != sub_id::REAL_VIDEO_STARTUP_ACK {
            debug!(
                "unhandled video sub business, user_id={} sub_id=0x{:04X}",
                user_id, pkt.sub_id
            );
            return;
        }
        match RealTimeVideoStartupAck::decode(pkt.payload.clone()) {
            Ok(ack) => {
                self.store.record_video_ack(
                    user_id,
                    &pkt.plate,
                    pkt.color,
                    ack.result,
                    &ack.server_ip,
                    ack.server_port,
                );
                info!(
                    "video stream ack, user_id={} plate={} server={}:{} result={}",
                    user_id, pkt.plate, ack.server_ip, ack.server_port, ack.result
                );
                if let Some((_, vehicle)) = self.store.find_vehicle(&pkt.plate, pkt.color) {
                    if let Some(stored) = vehicle.last_video_ack {
                        let hook = self.hook.clone();
                        let plate = pkt.plate.clone();
                        let color = pkt.color;
                        tokio::spawn(async move {
                            hook.on_video_response(user_id, plate, color, stored).await
                        });
                    }
                }
            }
            Err(e) => warn!("parse video ack failed, user_id={} err={}", user_id, e),
        }
    }

    // ---- 发送路径 ----

    /// 同链路回包：直接写入指定会话的发送队列
    pub(crate) fn send_on_session(&self, session_id: u64, data: Bytes) {
        match self.store.session_sender(session_id) {
            Some(tx) => {
                if tx.try_send(data).is_err() {
                    // 队列写满即丢帧，不阻塞读循环
                    warn!("main send queue full, drop frame, session={}", session_id);
                }
            }
            None => warn!("session sender missing, session={}", session_id),
        }
    }

    /// 按跨链路规则发送应答，首选链路不可用时降级到另一条
    pub(crate) fn send_response_on_link(
        &self,
        received_on_main: bool,
        user_id: u32,
        request_header: &Header,
        body: &dyn Body,
    ) -> Result<()> {
        let data = packet::encode_package(&request_header.with_response(body.msg_id()), body)?;
        let prefer_main = select_response_link(received_on_main, body.msg_id());
        self.send_preferring(user_id, data, prefer_main)
    }

    /// 下行消息：网关主动发起，优先从链路，不可用时降级到主链路
    pub(crate) fn send_downlink(&self, user_id: u32, body: &dyn Body) -> Result<()> {
        let snap = self
            .store
            .snapshot(user_id)
            .ok_or(Error::PlatformOffline(user_id))?;
        if snap.main_session_id.is_none() {
            return Err(Error::PlatformOffline(user_id));
        }
        let header = Header {
            msg_sn: self.next_sn(),
            gnss_center_id: snap.gnss_center_id,
            ..Default::default()
        };
        let data = packet::encode_package(&header, body)?;
        self.send_preferring(user_id, data, false)
    }

    fn send_preferring(&self, user_id: u32, data: Bytes, prefer_main: bool) -> Result<()> {
        let (first, second) = if prefer_main {
            (
                self.store.main_sender(user_id),
                self.store.sub_sender(user_id),
            )
        } else {
            (
                self.store.sub_sender(user_id),
                self.store.main_sender(user_id),
            )
        };
        if let Some(tx) = first {
            if tx.try_send(data.clone()).is_ok() {
                return Ok(());
            }
            warn!(
                "send on {} link failed, try fallback, user_id={}",
                if prefer_main { "main" } else { "sub" },
                user_id
            );
        }
        if let Some(tx) = second {
            if tx.try_send(data).is_ok() {
                info!(
                    "{} link unavailable, fallback to {} link, user_id={}",
                    if prefer_main { "main" } else { "sub" },
                    if prefer_main { "sub" } else { "main" },
                    user_id
                );
                return Ok(());
            }
        }
        Err(Error::LinkUnavailable(user_id))
    }

    /// 从链路建立失败通知（0x9007），经主链路送达
    pub(crate) fn send_sub_disconnect_inform(&self, user_id: u32, error_code: u8) {
        let snap = match self.store.snapshot(user_id) {
            Some(snap) if snap.main_session_id.is_some() => snap,
            _ => return,
        };
        let header = Header {
            msg_sn: self.next_sn(),
            gnss_center_id: snap.gnss_center_id,
            ..Default::default()
        };
        let inform = SubDisconnectInform { error_code };
        match packet::encode_package(&header, &inform) {
            Ok(data) => {
                if let Err(e) = self.send_preferring(user_id, data, true) {
                    warn!("send 0x9007 failed, user_id={} err={}", user_id, e);
                }
            }
            Err(e) => warn!("encode 0x9007 failed, user_id={} err={}", user_id, e),
        }
    }

    // ---- 下行命令 ----

    pub(crate) fn request_monitor_startup(
        &self,
        user_id: u32,
        plate: &str,
        color: PlateColor,
        reason: MonitorReason,
    ) -> Result<()> {
        self.send_downlink(
            user_id,
            &ApplyForMonitorStartup {
                plate: plate.to_string(),
                color,
                reason,
            },
        )
    }

    pub(crate) fn request_monitor_end(
        &self,
        user_id: u32,
        plate: &str,
        color: PlateColor,
        reason: MonitorReason,
    ) -> Result<()> {
        self.send_downlink(
            user_id,
            &ApplyForMonitorEnd {
                plate: plate.to_string(),
                color,
                reason,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_link_only_for_login_messages() {
        for id in [0x1001u16, 0x1002, 0x9001, 0x9002] {
            assert!(use_same_link(id), "0x{:04X}", id);
        }
        for id in [0x1005u16, 0x1006, 0x1200, 0x9200, 0x1003, 0x9007] {
            assert!(!use_same_link(id), "0x{:04X}", id);
        }
    }

    #[test]
    fn response_link_selection() {
        // 登录类消息走相同链路
        assert!(select_response_link(true, 0x1001));
        assert!(!select_response_link(false, 0x9002));
        // 其余消息走相反链路
        assert!(!select_response_link(true, 0x1006));
        assert!(select_response_link(false, 0x1006));
        assert!(!select_response_link(true, 0x1200));
        assert!(select_response_link(false, 0x9205));
    }
}
