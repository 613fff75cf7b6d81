//! JT/T 809 上级平台网关库
//! 承载下级平台的主/从链路 TCP 会话，解码并分发业务消息，维护车辆状态镜像，
//! 并通过回调与事件队列向外部系统推送业务事件

use async_trait::async_trait;

use network::packet::{
    GnssData, LoginRequest, LoginResponse, PlateColor, Position, VehicleRegistration,
    WarnMsgAdptInfo,
};

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
mod network;
mod protocol;
pub mod sink;

pub use network::packet;
pub use protocol::store::{
    PlatformSnapshot, PlatformStore, RegistrationRecord, VehicleKey, VehicleSnapshot, VideoAck,
};
pub use protocol::video::{VideoRequest, VideoStreamInfo};

/// 业务事件回调，由使用方实现
/// 每个回调都在独立任务中执行，不会阻塞链路读循环；缺省实现为空操作
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// 下级平台主链路登录成功
    async fn on_login(&self, user_id: u32, req: LoginRequest, resp: LoginResponse) {
        let _ = (user_id, req, resp);
    }

    /// 车辆注册信息上报（0x1200/0x1201）
    async fn on_vehicle_registration(
        &self,
        user_id: u32,
        plate: String,
        color: PlateColor,
        registration: VehicleRegistration,
    ) {
        let _ = (user_id, plate, color, registration);
    }

    /// 车辆实时定位上报（0x1200/0x1202）
    async fn on_vehicle_location(
        &self,
        user_id: u32,
        plate: String,
        color: PlateColor,
        position: Position,
        gnss: Option<GnssData>,
    ) {
        let _ = (user_id, plate, color, position, gnss);
    }

    /// 车辆定位信息补报（0x1200/0x1203）
    async fn on_batch_location(
        &self,
        user_id: u32,
        plate: String,
        color: PlateColor,
        locations: Vec<GnssData>,
    ) {
        let _ = (user_id, plate, color, locations);
    }

    /// 实时音视频请求应答（0x1800/0x1801）
    async fn on_video_response(
        &self,
        user_id: u32,
        plate: String,
        color: PlateColor,
        ack: VideoAck,
    ) {
        let _ = (user_id, plate, color, ack);
    }

    /// 时效口令上报（0x1700/0x1701）
    async fn on_authorize(&self, user_id: u32, platform_id: String, authorize_code: String) {
        let _ = (user_id, platform_id, authorize_code);
    }

    /// 启动车辆定位信息交换应答（0x1200/0x1205）
    async fn on_monitor_startup_ack(&self, user_id: u32, plate: String, color: PlateColor) {
        let _ = (user_id, plate, color);
    }

    /// 结束车辆定位信息交换应答（0x1200/0x1206）
    async fn on_monitor_end_ack(&self, user_id: u32, plate: String, color: PlateColor) {
        let _ = (user_id, plate, color);
    }

    /// 上报报警信息（0x1400/0x1402）
    async fn on_warn_msg_adpt_info(&self, user_id: u32, info: WarnMsgAdptInfo) {
        let _ = (user_id, info);
    }
}

/// 空回调实现
pub struct HookNoop;

#[async_trait]
impl Hook for HookNoop {}
