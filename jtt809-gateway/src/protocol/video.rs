//! 视频控制面
//! 经从链路向下级平台下发实时音视频请求（0x9800/0x9801），
//! 并根据缓存的应答与时效口令拼装直播流地址

use bytes::Bytes;
use log::info;

use crate::error::{Error, Result};
use crate::network::packet::{
    msg_id, DownRealTimeVideoStartupReq, PlateColor, RawBody, SubBusinessPacket,
};
use crate::protocol::dispatcher::Dispatcher;

/// 向下级平台下发的实时音视频请求
#[derive(Debug, Clone, serde::Deserialize)]
pub struct VideoRequest {
    pub user_id: u32,
    pub plate: String,
    #[serde(default)]
    pub color: PlateColor,
    pub channel: u8,
    pub av_item_type: u8,
    /// 36 字节 GNSS 数据的十六进制文本，可选
    #[serde(default)]
    pub gnss_hex: String,
}

/// 拼装直播流地址所需的关键信息
#[derive(Debug, Clone, serde::Serialize)]
pub struct VideoStreamInfo {
    pub server_ip: String,
    pub server_port: u16,
    pub plate: String,
    pub color: PlateColor,
    pub authorize_code: String,
    pub platform_id: String,
    pub result: u8,
}

impl Dispatcher {
    /// 下发实时音视频请求。0x9801 为下行消息，优先从链路发送
    pub(crate) fn request_video_stream(&self, req: &VideoRequest) -> Result<()> {
        let mut color = req.color;
        if color.0 == 0 {
            color = PlateColor::BLUE;
        }
        let (_, auth_code) = self
            .store
            .auth_code(req.user_id)
            .ok_or(Error::PlatformOffline(req.user_id))?;
        if auth_code.is_empty() {
            return Err(Error::MissingAuthCode(req.user_id));
        }
        let gnss_data = if req.gnss_hex.trim().is_empty() {
            None
        } else {
            let data = hex::decode(req.gnss_hex.trim())?;
            if data.len() != 36 {
                return Err(crate::network::packet::Error::BadGnssLength(data.len()).into());
            }
            Some(Bytes::from(data))
        };
        let body = DownRealTimeVideoStartupReq {
            channel: req.channel,
            av_item_type: req.av_item_type,
            authorize_code: auth_code,
            gnss_data,
        };
        let payload = SubBusinessPacket::new(
            &req.plate,
            color,
            crate::network::packet::sub_id::REAL_VIDEO_STARTUP,
            body.encode()?,
        )
        .encode();
        self.send_downlink(
            req.user_id,
            &RawBody {
                msg_id: msg_id::DOWN_REAL_TIME_VIDEO,
                payload,
            },
        )?;
        info!(
            "video request sent, user_id={} plate={} channel={}",
            req.user_id, req.plate, req.channel
        );
        Ok(())
    }

    /// 仅凭车牌与颜色下发实时视频请求，自动定位归属平台
    pub(crate) fn request_video_stream_by_plate(
        &self,
        plate: &str,
        color: PlateColor,
        channel: u8,
        av_item_type: u8,
        gnss_hex: &str,
    ) -> Result<()> {
        let color = normalize_color(color);
        let (user_id, _) =
            self.store
                .find_vehicle(plate, color)
                .ok_or_else(|| Error::VehicleNotFound {
                    plate: plate.to_string(),
                    color,
                })?;
        self.request_video_stream(&VideoRequest {
            user_id,
            plate: plate.to_string(),
            color,
            channel,
            av_item_type,
            gnss_hex: gnss_hex.to_string(),
        })
    }

    /// 拼装直播流所需的服务器地址、车牌与时效口令
    pub(crate) fn video_stream_info_by_plate(
        &self,
        plate: &str,
        color: PlateColor,
    ) -> Result<VideoStreamInfo> {
        let color = normalize_color(color);
        let (user_id, vehicle) =
            self.store
                .find_vehicle(plate, color)
                .ok_or_else(|| Error::VehicleNotFound {
                    plate: plate.to_string(),
                    color,
                })?;
        let ack = vehicle.last_video_ack.ok_or_else(|| Error::NoVideoAck {
            plate: plate.to_string(),
        })?;
        let snap = self
            .store
            .snapshot(user_id)
            .ok_or(Error::PlatformOffline(user_id))?;
        if snap.auth_code.is_empty() {
            return Err(Error::MissingAuthCode(user_id));
        }
        Ok(VideoStreamInfo {
            server_ip: ack.server_ip,
            server_port: ack.server_port,
            plate: vehicle.plate,
            color: vehicle.color,
            authorize_code: snap.auth_code,
            platform_id: snap.platform_id,
            result: ack.result,
        })
    }

    /// 直播流地址：http://ip:port/{车牌}.{颜色}.{通道}.{音视频类型}.{时效口令}
    pub(crate) fn video_stream_url_by_plate(
        &self,
        plate: &str,
        color: PlateColor,
        channel: u8,
        av_item_type: u8,
    ) -> Result<String> {
        let info = self.video_stream_info_by_plate(plate, color)?;
        if info.result != 0 {
            return Err(Error::VideoAckFailed {
                plate: plate.to_string(),
                result: info.result,
            });
        }
        if info.server_ip.is_empty() || info.server_port == 0 {
            return Err(Error::MissingVideoServer {
                plate: plate.to_string(),
            });
        }
        Ok(format!(
            "http://{}:{}/{}.{}.{}.{}.{}",
            info.server_ip,
            info.server_port,
            info.plate,
            info.color,
            channel,
            av_item_type,
            info.authorize_code
        ))
    }
}

fn normalize_color(color: PlateColor) -> PlateColor {
    if color.0 == 0 {
        PlateColor::BLUE
    } else {
        color
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::error::Error;
    use crate::protocol::store::PlatformStore;
    use crate::HookNoop;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(Authenticator::new(Vec::new())),
            Arc::new(PlatformStore::new()),
            Arc::new(HookNoop),
            CancellationToken::new(),
        )
    }

    #[test]
    fn stream_url_requires_video_ack() {
        let d = dispatcher();
        d.store.update_auth_code(10001, "PLAT123", "AC1");
        assert!(matches!(
            d.video_stream_url_by_plate("粤B12345", PlateColor::BLUE, 1, 2),
            Err(Error::VehicleNotFound { .. })
        ));
    }

    #[test]
    fn stream_url_requires_auth_code() {
        let d = dispatcher();
        d.store
            .record_video_ack(10001, "粤B12345", PlateColor::BLUE, 0, "192.168.1.100", 8080);
        assert!(matches!(
            d.video_stream_url_by_plate("粤B12345", PlateColor::BLUE, 1, 2),
            Err(Error::MissingAuthCode(10001))
        ));
    }

    #[test]
    fn stream_url_rejects_failed_ack() {
        let d = dispatcher();
        d.store.update_auth_code(10001, "PLAT123", "AC1");
        d.store
            .record_video_ack(10001, "粤B12345", PlateColor::BLUE, 1, "192.168.1.100", 8080);
        assert!(matches!(
            d.video_stream_url_by_plate("粤B12345", PlateColor::BLUE, 1, 2),
            Err(Error::VideoAckFailed { result: 1, .. })
        ));
    }

    #[test]
    fn stream_url_format() {
        let d = dispatcher();
        d.store.update_auth_code(10001, "PLAT123", "AC1");
        d.store
            .record_video_ack(10001, "粤B12345", PlateColor::BLUE, 0, "192.168.1.100", 8080);
        let url = d
            .video_stream_url_by_plate("粤B12345", PlateColor::BLUE, 1, 2)
            .unwrap();
        assert_eq!(url, "http://192.168.1.100:8080/粤B12345.1.1.2.AC1");

        let info = d
            .video_stream_info_by_plate("粤B12345", PlateColor::BLUE)
            .unwrap();
        assert_eq!(info.platform_id, "PLAT123");
        assert_eq!(info.server_port, 8080);
    }
}
