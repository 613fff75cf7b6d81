//! 车辆定位信息交换请求与应答
//! 0x9200/0x9205、0x9200/0x9206 由上级下发，0x1200/0x1205、0x1200/0x1206 为下级应答

use bytes::{Buf, Bytes};

use super::{msg_id, sub_id, Body, Error, PlateColor, SubBusinessPacket};

/// 启动/结束车辆定位信息交换请求原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorReason {
    /// 车辆进入指定区域
    EnterArea = 0x00,
    /// 人工指定交换
    Manual = 0x01,
    /// 应急状态下车辆定位信息回传
    Emergency = 0x02,
    /// 其它原因
    Other = 0x03,
}

impl From<u8> for MonitorReason {
    fn from(value: u8) -> Self {
        match value {
            0x00 => MonitorReason::EnterArea,
            0x01 => MonitorReason::Manual,
            0x02 => MonitorReason::Emergency,
            _ => MonitorReason::Other,
        }
    }
}

/// 启动车辆定位信息交换请求（0x9200/0x9205）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyForMonitorStartup {
    pub plate: String,
    pub color: PlateColor,
    pub reason: MonitorReason,
}

impl Body for ApplyForMonitorStartup {
    fn msg_id(&self) -> u16 {
        msg_id::DOWN_EXG_MSG
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(SubBusinessPacket::new(
            &self.plate,
            self.color,
            sub_id::MONITOR_STARTUP,
            Bytes::from(vec![self.reason as u8]),
        )
        .encode())
    }
}

/// 结束车辆定位信息交换请求（0x9200/0x9206）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyForMonitorEnd {
    pub plate: String,
    pub color: PlateColor,
    pub reason: MonitorReason,
}

impl Body for ApplyForMonitorEnd {
    fn msg_id(&self) -> u16 {
        msg_id::DOWN_EXG_MSG
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(SubBusinessPacket::new(
            &self.plate,
            self.color,
            sub_id::MONITOR_END,
            Bytes::from(vec![self.reason as u8]),
        )
        .encode())
    }
}

/// 定位信息交换应答（0x1205/0x1206）
/// 部分下级平台在结果字节后附带源消息的业务类型与流水号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorAck {
    pub result: u8,
    pub source: Option<MonitorAckSource>,
}

/// 应答中回带的源消息标识
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorAckSource {
    pub data_type: u16,
    pub msg_sn: u32,
}

pub const MONITOR_ACK_SUCCESS: u8 = 0x00;
pub const MONITOR_ACK_FAILURE: u8 = 0x01;

impl MonitorAck {
    pub fn decode(mut payload: Bytes) -> Result<Self, Error> {
        if payload.is_empty() {
            return Err(Error::Truncated("monitor ack result"));
        }
        let result = payload.get_u8();
        let source = if payload.len() >= 6 {
            Some(MonitorAckSource {
                data_type: payload.get_u16(),
                msg_sn: payload.get_u32(),
            })
        } else {
            None
        };
        Ok(Self { result, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_request_encodes_sub_packet() {
        let req = ApplyForMonitorStartup {
            plate: "粤B12345".into(),
            color: PlateColor::BLUE,
            reason: MonitorReason::Manual,
        };
        let pkt = SubBusinessPacket::decode(req.encode().unwrap()).unwrap();
        assert_eq!(pkt.sub_id, sub_id::MONITOR_STARTUP);
        assert_eq!(pkt.payload.as_ref(), &[0x01]);
        assert_eq!(pkt.plate, "粤B12345");
    }

    #[test]
    fn end_request_encodes_sub_packet() {
        let req = ApplyForMonitorEnd {
            plate: "粤B12345".into(),
            color: PlateColor::YELLOW,
            reason: MonitorReason::Other,
        };
        let pkt = SubBusinessPacket::decode(req.encode().unwrap()).unwrap();
        assert_eq!(pkt.sub_id, sub_id::MONITOR_END);
        assert_eq!(pkt.payload.as_ref(), &[0x03]);
    }

    #[test]
    fn ack_result_only() {
        let ack = MonitorAck::decode(Bytes::from(vec![MONITOR_ACK_SUCCESS])).unwrap();
        assert_eq!(ack.result, MONITOR_ACK_SUCCESS);
        assert!(ack.source.is_none());
    }

    #[test]
    fn ack_with_source() {
        let ack =
            MonitorAck::decode(Bytes::from(vec![0x00, 0x92, 0x05, 0x00, 0x00, 0x00, 0x2A])).unwrap();
        assert_eq!(
            ack.source,
            Some(MonitorAckSource {
                data_type: 0x9205,
                msg_sn: 42
            })
        );
    }

    #[test]
    fn ack_empty_rejected() {
        assert!(MonitorAck::decode(Bytes::new()).is_err());
    }
}
