//! 平台与车辆状态存储
//! 唯一的长生命周期共享可变状态，读写都在单把读写锁内完成且不做任何 IO；
//! 对外只暴露深拷贝快照，调用方无需持锁

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::RwLock;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::network::packet::{LoginRequest, PlateColor, Position, VehicleRegistration};

/// 从链路句柄：发送队列 + 取消令牌
/// 替换或摘除时取消令牌随之触发，相关任务与 socket 一并退出
#[derive(Debug, Clone)]
pub(crate) struct SubLinkHandle {
    pub(crate) tx: Sender<Bytes>,
    pub(crate) cancel: CancellationToken,
}

impl SubLinkHandle {
    fn close(&self) {
        self.cancel.cancel();
    }
}

/// 车辆键：车牌 + 颜色
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VehicleKey {
    pub plate: String,
    pub color: PlateColor,
}

impl VehicleKey {
    pub fn new(plate: &str, color: PlateColor) -> Self {
        Self {
            plate: plate.to_string(),
            color,
        }
    }
}

/// 车辆注册记录
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RegistrationRecord {
    #[serde(flatten)]
    pub info: VehicleRegistration,
    pub received_at: DateTime<Utc>,
}

/// 下级平台返回的视频流地址
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VideoAck {
    pub result: u8,
    pub server_ip: String,
    pub server_port: u16,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct VehicleState {
    plate: String,
    color: PlateColor,
    registration: Option<RegistrationRecord>,
    position: Option<Position>,
    position_time: Option<DateTime<Utc>>,
    batch_count: u32,
    last_video_ack: Option<VideoAck>,
}

#[derive(Debug)]
struct PlatformState {
    user_id: u32,
    gnss_center_id: u32,
    down_link_ip: String,
    down_link_port: u16,
    verify_code: u32,
    platform_id: String,
    auth_code: String,
    main_session_id: Option<u64>,
    sub_link: Option<SubLinkHandle>,
    reconnecting: bool,
    last_main_beat: Option<DateTime<Utc>>,
    last_sub_beat: Option<DateTime<Utc>>,
    main_disconnected_at: Option<DateTime<Utc>>,
    vehicles: HashMap<VehicleKey, VehicleState>,
}

impl PlatformState {
    fn new(user_id: u32) -> Self {
        Self {
            user_id,
            gnss_center_id: 0,
            down_link_ip: String::new(),
            down_link_port: 0,
            verify_code: 0,
            platform_id: String::new(),
            auth_code: String::new(),
            main_session_id: None,
            sub_link: None,
            reconnecting: false,
            last_main_beat: None,
            last_sub_beat: None,
            main_disconnected_at: None,
            vehicles: HashMap::new(),
        }
    }

    fn ensure_vehicle(&mut self, plate: &str, color: PlateColor) -> &mut VehicleState {
        self.vehicles
            .entry(VehicleKey::new(plate, color))
            .or_insert_with(|| VehicleState {
                plate: plate.to_string(),
                color,
                registration: None,
                position: None,
                position_time: None,
                batch_count: 0,
                last_video_ack: None,
            })
    }

    fn snapshot(&self) -> PlatformSnapshot {
        PlatformSnapshot {
            user_id: self.user_id,
            gnss_center_id: self.gnss_center_id,
            down_link_ip: self.down_link_ip.clone(),
            down_link_port: self.down_link_port,
            verify_code: self.verify_code,
            platform_id: self.platform_id.clone(),
            auth_code: self.auth_code.clone(),
            main_session_id: self.main_session_id,
            sub_connected: self.sub_link.is_some(),
            last_main_beat: self.last_main_beat,
            last_sub_beat: self.last_sub_beat,
            main_disconnected_at: self.main_disconnected_at,
            vehicles: self
                .vehicles
                .values()
                .map(|v| VehicleSnapshot {
                    plate: v.plate.clone(),
                    color: v.color,
                    registration: v.registration.clone(),
                    position: v.position.clone(),
                    position_time: v.position_time,
                    batch_count: v.batch_count,
                    last_video_ack: v.last_video_ack.clone(),
                })
                .collect(),
        }
    }
}

/// 平台状态的对外视图
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlatformSnapshot {
    pub user_id: u32,
    pub gnss_center_id: u32,
    pub down_link_ip: String,
    pub down_link_port: u16,
    #[serde(skip)]
    pub verify_code: u32,
    pub platform_id: String,
    pub auth_code: String,
    pub main_session_id: Option<u64>,
    pub sub_connected: bool,
    pub last_main_beat: Option<DateTime<Utc>>,
    pub last_sub_beat: Option<DateTime<Utc>>,
    pub main_disconnected_at: Option<DateTime<Utc>>,
    pub vehicles: Vec<VehicleSnapshot>,
}

/// 单车状态的对外视图
#[derive(Debug, Clone, serde::Serialize)]
pub struct VehicleSnapshot {
    pub plate: String,
    pub color: PlateColor,
    pub registration: Option<RegistrationRecord>,
    pub position: Option<Position>,
    pub position_time: Option<DateTime<Utc>>,
    pub batch_count: u32,
    pub last_video_ack: Option<VideoAck>,
}

#[derive(Default)]
struct Inner {
    platforms: HashMap<u32, PlatformState>,
    /// 主链路会话 -> 平台
    session_index: HashMap<u64, u32>,
    /// 所有已注册的主链路发送队列（含未登录会话）
    sessions: HashMap<u64, Sender<Bytes>>,
}

/// 平台状态存储
#[derive(Default)]
pub struct PlatformStore {
    inner: RwLock<Inner>,
}

impl PlatformStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 主链路连接建立即注册发送队列，登录前也可经主链路回包
    pub(crate) fn register_session(&self, session_id: u64, tx: Sender<Bytes>) {
        self.inner.write().sessions.insert(session_id, tx);
    }

    /// 会话关闭：仅清理主链路绑定并记录断开时刻，从链路保持
    pub(crate) fn remove_session(&self, session_id: u64) {
        let mut inner = self.inner.write();
        inner.sessions.remove(&session_id);
        if let Some(user_id) = inner.session_index.remove(&session_id) {
            if let Some(state) = inner.platforms.get_mut(&user_id) {
                if state.main_session_id == Some(session_id) {
                    state.main_session_id = None;
                    state.main_disconnected_at = Some(Utc::now());
                }
            }
        }
    }

    pub(crate) fn user_for_session(&self, session_id: u64) -> Option<u32> {
        self.inner.read().session_index.get(&session_id).copied()
    }

    /// 主链路登录成功后建立会话映射
    pub(crate) fn bind_main_session(
        &self,
        session_id: u64,
        req: &LoginRequest,
        gnss_center_id: u32,
        verify_code: u32,
    ) {
        let mut inner = self.inner.write();
        let state = inner
            .platforms
            .entry(req.user_id)
            .or_insert_with(|| PlatformState::new(req.user_id));
        state.gnss_center_id = gnss_center_id;
        state.down_link_ip = req.down_link_ip.clone();
        state.down_link_port = req.down_link_port;
        state.verify_code = verify_code;
        state.main_session_id = Some(session_id);
        state.main_disconnected_at = None;
        state.last_main_beat = Some(Utc::now());
        inner.session_index.insert(session_id, req.user_id);
    }

    /// 记录从链路连接，替换时旧连接随取消令牌关闭
    pub(crate) fn bind_sub_session(&self, user_id: u32, handle: SubLinkHandle) {
        let mut inner = self.inner.write();
        let state = inner
            .platforms
            .entry(user_id)
            .or_insert_with(|| PlatformState::new(user_id));
        if let Some(old) = state.sub_link.replace(handle) {
            warn!("replacing existing sub link, user_id={}", user_id);
            old.close();
        }
        state.last_sub_beat = Some(Utc::now());
    }

    /// 摘除从链路并触发取消令牌
    pub(crate) fn close_sub_link(&self, user_id: u32) {
        let handle = {
            let mut inner = self.inner.write();
            inner
                .platforms
                .get_mut(&user_id)
                .and_then(|state| state.sub_link.take())
        };
        if let Some(handle) = handle {
            handle.close();
        }
    }

    pub(crate) fn record_heartbeat(&self, user_id: u32, is_main: bool) {
        let mut inner = self.inner.write();
        let state = inner
            .platforms
            .entry(user_id)
            .or_insert_with(|| PlatformState::new(user_id));
        if is_main {
            state.last_main_beat = Some(Utc::now());
        } else {
            state.last_sub_beat = Some(Utc::now());
        }
    }

    /// 单飞重连标志的比较并置位；已在重连中返回 false
    pub(crate) fn set_reconnecting(&self, user_id: u32, flag: bool) -> bool {
        let mut inner = self.inner.write();
        let state = inner
            .platforms
            .entry(user_id)
            .or_insert_with(|| PlatformState::new(user_id));
        if flag && state.reconnecting {
            return false;
        }
        state.reconnecting = flag;
        true
    }

    /// (主链路在线, 从链路在线)
    pub(crate) fn link_status(&self, user_id: u32) -> (bool, bool) {
        let inner = self.inner.read();
        match inner.platforms.get(&user_id) {
            Some(state) => (state.main_session_id.is_some(), state.sub_link.is_some()),
            None => (false, false),
        }
    }

    /// 平台当前主链路会话的发送队列
    pub(crate) fn main_sender(&self, user_id: u32) -> Option<Sender<Bytes>> {
        let inner = self.inner.read();
        let state = inner.platforms.get(&user_id)?;
        let session_id = state.main_session_id?;
        inner.sessions.get(&session_id).cloned()
    }

    /// 指定会话的发送队列（登录应答等同链路回包使用）
    pub(crate) fn session_sender(&self, session_id: u64) -> Option<Sender<Bytes>> {
        self.inner.read().sessions.get(&session_id).cloned()
    }

    pub(crate) fn sub_sender(&self, user_id: u32) -> Option<Sender<Bytes>> {
        let inner = self.inner.read();
        inner
            .platforms
            .get(&user_id)
            .and_then(|state| state.sub_link.as_ref())
            .map(|handle| handle.tx.clone())
    }

    pub(crate) fn update_vehicle_registration(
        &self,
        user_id: u32,
        plate: &str,
        color: PlateColor,
        info: VehicleRegistration,
    ) {
        let mut inner = self.inner.write();
        let state = inner
            .platforms
            .entry(user_id)
            .or_insert_with(|| PlatformState::new(user_id));
        state.ensure_vehicle(plate, color).registration = Some(RegistrationRecord {
            info,
            received_at: Utc::now(),
        });
    }

    /// 写入最新定位，2011 版取报文内时间，2019 版取当前时间
    pub(crate) fn update_location(
        &self,
        user_id: u32,
        plate: &str,
        color: PlateColor,
        position: Position,
        batch_count: u32,
    ) {
        let position_time = match &position {
            Position::V2011(pos) => pos.time,
            Position::V2019(_) => Utc::now(),
        };
        let mut inner = self.inner.write();
        let state = inner
            .platforms
            .entry(user_id)
            .or_insert_with(|| PlatformState::new(user_id));
        let vehicle = state.ensure_vehicle(plate, color);
        vehicle.position = Some(position);
        vehicle.position_time = Some(position_time);
        if batch_count > 0 {
            vehicle.batch_count = batch_count;
        }
    }

    pub(crate) fn record_video_ack(
        &self,
        user_id: u32,
        plate: &str,
        color: PlateColor,
        result: u8,
        server_ip: &str,
        server_port: u16,
    ) {
        let mut inner = self.inner.write();
        let state = inner
            .platforms
            .entry(user_id)
            .or_insert_with(|| PlatformState::new(user_id));
        state.ensure_vehicle(plate, color).last_video_ack = Some(VideoAck {
            result,
            server_ip: server_ip.to_string(),
            server_port,
            received_at: Utc::now(),
        });
    }

    pub(crate) fn update_auth_code(&self, user_id: u32, platform_id: &str, auth_code: &str) {
        let mut inner = self.inner.write();
        let state = inner
            .platforms
            .entry(user_id)
            .or_insert_with(|| PlatformState::new(user_id));
        state.platform_id = platform_id.to_string();
        state.auth_code = auth_code.to_string();
    }

    pub(crate) fn auth_code(&self, user_id: u32) -> Option<(String, String)> {
        let inner = self.inner.read();
        inner
            .platforms
            .get(&user_id)
            .map(|state| (state.platform_id.clone(), state.auth_code.clone()))
    }

    pub(crate) fn remove_vehicle(&self, user_id: u32, key: &VehicleKey) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.platforms.get_mut(&user_id) {
            state.vehicles.remove(key);
        }
    }

    /// 指定平台的深拷贝视图
    pub fn snapshot(&self, user_id: u32) -> Option<PlatformSnapshot> {
        self.inner
            .read()
            .platforms
            .get(&user_id)
            .map(PlatformState::snapshot)
    }

    /// 全部平台的深拷贝视图
    pub fn snapshots(&self) -> Vec<PlatformSnapshot> {
        self.inner
            .read()
            .platforms
            .values()
            .map(PlatformState::snapshot)
            .collect()
    }

    /// 优雅停机：关闭全部从链路并释放全部主链路发送队列
    pub(crate) fn shutdown_all(&self) {
        let mut inner = self.inner.write();
        for state in inner.platforms.values_mut() {
            if let Some(handle) = state.sub_link.take() {
                handle.close();
            }
            state.main_session_id = None;
        }
        inner.sessions.clear();
        inner.session_index.clear();
    }

    /// 按车牌与颜色查找车辆归属平台
    pub fn find_vehicle(&self, plate: &str, color: PlateColor) -> Option<(u32, VehicleSnapshot)> {
        let key = VehicleKey::new(plate, color);
        let inner = self.inner.read();
        for state in inner.platforms.values() {
            if let Some(v) = state.vehicles.get(&key) {
                return Some((
                    state.user_id,
                    VehicleSnapshot {
                        plate: v.plate.clone(),
                        color: v.color,
                        registration: v.registration.clone(),
                        position: v.position.clone(),
                        position_time: v.position_time,
                        batch_count: v.batch_count,
                        last_video_ack: v.last_video_ack.clone(),
                    },
                ));
            }
        }
        None
    }
}
