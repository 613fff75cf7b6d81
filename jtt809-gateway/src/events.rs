//! 业务事件
//! 事件主题、JSON 载荷与信封格式，以及把回调桥接到事件队列的 SinkHook

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use log::warn;

use crate::network::packet::{
    GnssData, LoginRequest, LoginResponse, PlateColor, Position, VehicleRegistration, WarnType,
    WarnMsgAdptInfo,
};
use crate::protocol::store::VideoAck;
use crate::sink::EventQueue;
use crate::Hook;

/// 事件主题，与回调一一对应
pub mod topic {
    pub const LOGIN: &str = "login";
    pub const VEHICLE_REGISTRATION: &str = "vehicle.registration";
    pub const VEHICLE_LOCATION: &str = "vehicle.location";
    pub const VEHICLE_LOCATION_SUPPLEMENTARY: &str = "vehicle.location.supplementary";
    pub const VIDEO_RESPONSE: &str = "video.response";
    pub const AUTHORIZE: &str = "authorize";
    pub const MONITOR_STARTUP_ACK: &str = "monitor.startup.ack";
    pub const MONITOR_END_ACK: &str = "monitor.end.ack";
    pub const WARN_ADPT_INFO: &str = "warn.adpt.info";
}

/// 事件信封
#[derive(Debug, serde::Serialize)]
struct Event<T: serde::Serialize> {
    r#type: &'static str,
    timestamp: String,
    user_id: u32,
    data: T,
}

#[derive(Debug, serde::Serialize)]
struct LoginEventData {
    user_id: u32,
    down_link_ip: String,
    down_link_port: u16,
    result: u8,
}

#[derive(Debug, serde::Serialize)]
struct VehicleRegistrationEventData {
    user_id: u32,
    plate: String,
    color: PlateColor,
    platform_id: String,
    terminal_id: String,
}

#[derive(Debug, serde::Serialize)]
struct VehicleLocationEventData {
    user_id: u32,
    plate: String,
    color: PlateColor,
    latitude: f64,
    longitude: f64,
    altitude: u16,
    speed: u16,
    direction: u16,
    date_time: String,
}

#[derive(Debug, serde::Serialize)]
struct GnssDataItem {
    latitude: f64,
    longitude: f64,
    altitude: u16,
    speed: u16,
    direction: u16,
    date_time: String,
}

#[derive(Debug, serde::Serialize)]
struct LocationSupplementaryEventData {
    user_id: u32,
    plate: String,
    color: PlateColor,
    count: usize,
    devices: Vec<GnssDataItem>,
}

#[derive(Debug, serde::Serialize)]
struct VideoResponseEventData {
    user_id: u32,
    plate: String,
    color: PlateColor,
    server_ip: String,
    server_port: u16,
    result: u8,
}

#[derive(Debug, serde::Serialize)]
struct AuthorizeEventData {
    user_id: u32,
    platform_id: String,
    authorize_code: String,
}

#[derive(Debug, serde::Serialize)]
struct MonitorAckEventData {
    user_id: u32,
    plate: String,
    color: PlateColor,
}

#[derive(Debug, serde::Serialize)]
struct WarnMsgAdptInfoEventData {
    user_id: u32,
    source_platform_id: String,
    warn_type: WarnType,
    warn_time: String,
    vehicle_no: String,
    vehicle_color: PlateColor,
    info_content: String,
}

fn marshal<T: serde::Serialize>(
    topic: &'static str,
    user_id: u32,
    data: T,
) -> serde_json::Result<Bytes> {
    let event = Event {
        r#type: topic,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        user_id,
        data,
    };
    Ok(Bytes::from(serde_json::to_vec(&event)?))
}

fn rfc3339(time: chrono::DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// 将业务回调转换为事件发布的 Hook 实现
/// 事件经有界重试队列异步投递，不会反压链路读循环
pub struct SinkHook {
    queue: EventQueue,
}

impl SinkHook {
    pub fn new(queue: EventQueue) -> Self {
        Self { queue }
    }

    fn publish<T: serde::Serialize>(&self, topic: &'static str, user_id: u32, data: T) {
        match marshal(topic, user_id, data) {
            Ok(payload) => self.queue.publish(topic, payload),
            Err(e) => warn!("marshal event failed, topic={} err={}", topic, e),
        }
    }
}

#[async_trait]
impl Hook for SinkHook {
    async fn on_login(&self, user_id: u32, req: LoginRequest, resp: LoginResponse) {
        self.publish(
            topic::LOGIN,
            user_id,
            LoginEventData {
                user_id,
                down_link_ip: req.down_link_ip,
                down_link_port: req.down_link_port,
                result: resp.result as u8,
            },
        );
    }

    async fn on_vehicle_registration(
        &self,
        user_id: u32,
        plate: String,
        color: PlateColor,
        registration: VehicleRegistration,
    ) {
        self.publish(
            topic::VEHICLE_REGISTRATION,
            user_id,
            VehicleRegistrationEventData {
                user_id,
                plate,
                color,
                platform_id: registration.platform_id,
                terminal_id: registration.terminal_id,
            },
        );
    }

    async fn on_vehicle_location(
        &self,
        user_id: u32,
        plate: String,
        color: PlateColor,
        position: Position,
        gnss: Option<GnssData>,
    ) {
        let data = match (gnss, &position) {
            (Some(gnss), _) => VehicleLocationEventData {
                user_id,
                plate,
                color,
                latitude: gnss.latitude,
                longitude: gnss.longitude,
                altitude: gnss.altitude,
                speed: gnss.speed,
                direction: gnss.direction,
                date_time: rfc3339(gnss.time),
            },
            (None, Position::V2011(pos)) => VehicleLocationEventData {
                user_id,
                plate,
                color,
                latitude: pos.lat as f64 / 1e6,
                longitude: pos.lon as f64 / 1e6,
                altitude: pos.altitude,
                speed: pos.speed,
                direction: pos.direction,
                date_time: rfc3339(pos.time),
            },
            // 2019 版但内嵌 GNSS 无法解析，缺少可用坐标
            (None, Position::V2019(_)) => return,
        };
        self.publish(topic::VEHICLE_LOCATION, user_id, data);
    }

    async fn on_batch_location(
        &self,
        user_id: u32,
        plate: String,
        color: PlateColor,
        locations: Vec<GnssData>,
    ) {
        let devices = locations
            .iter()
            .map(|gnss| GnssDataItem {
                latitude: gnss.latitude,
                longitude: gnss.longitude,
                altitude: gnss.altitude,
                speed: gnss.speed,
                direction: gnss.direction,
                date_time: rfc3339(gnss.time),
            })
            .collect::<Vec<_>>();
        self.publish(
            topic::VEHICLE_LOCATION_SUPPLEMENTARY,
            user_id,
            LocationSupplementaryEventData {
                user_id,
                plate,
                color,
                count: devices.len(),
                devices,
            },
        );
    }

    async fn on_video_response(
        &self,
        user_id: u32,
        plate: String,
        color: PlateColor,
        ack: VideoAck,
    ) {
        self.publish(
            topic::VIDEO_RESPONSE,
            user_id,
            VideoResponseEventData {
                user_id,
                plate,
                color,
                server_ip: ack.server_ip,
                server_port: ack.server_port,
                result: ack.result,
            },
        );
    }

    async fn on_authorize(&self, user_id: u32, platform_id: String, authorize_code: String) {
        self.publish(
            topic::AUTHORIZE,
            user_id,
            AuthorizeEventData {
                user_id,
                platform_id,
                authorize_code,
            },
        );
    }

    async fn on_monitor_startup_ack(&self, user_id: u32, plate: String, color: PlateColor) {
        self.publish(
            topic::MONITOR_STARTUP_ACK,
            user_id,
            MonitorAckEventData {
                user_id,
                plate,
                color,
            },
        );
    }

    async fn on_monitor_end_ack(&self, user_id: u32, plate: String, color: PlateColor) {
        self.publish(
            topic::MONITOR_END_ACK,
            user_id,
            MonitorAckEventData {
                user_id,
                plate,
                color,
            },
        );
    }

    async fn on_warn_msg_adpt_info(&self, user_id: u32, info: WarnMsgAdptInfo) {
        self.publish(
            topic::WARN_ADPT_INFO,
            user_id,
            WarnMsgAdptInfoEventData {
                user_id,
                source_platform_id: info.source_platform_id,
                warn_type: info.warn_type,
                warn_time: rfc3339(info.warn_time),
                vehicle_no: info.plate,
                vehicle_color: info.color,
                info_content: info.info_content,
            },
        );
    }
}
