//! 报警信息交互（0x1400），处理 0x1402 上报报警信息与 0x1403 报警预警消息

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use super::{read_gbk, read_u16, read_u32, read_u64, Error, PlateColor};

/// 报警类型，仅列出网关关心的常用编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct WarnType(pub u16);

impl WarnType {
    pub const OVERSPEED: WarnType = WarnType(0x0001);
    pub const FATIGUE_DRIVING: WarnType = WarnType(0x0002);
    pub const EMERGENCY: WarnType = WarnType(0x0003);
    pub const ROUTE_DEVIATION: WarnType = WarnType(0x000B);
    pub const OVERTIME_DRIVING: WarnType = WarnType(0x000D);
    pub const TIMEOUT_PARKING: WarnType = WarnType(0xA001);
    pub const SUB_PLATFORM_TRANSMIT_ABNORMAL: WarnType = WarnType(0xA005);
    pub const OTHER: WarnType = WarnType(0x00FF);
}

/// 0x1400 主业务体的通用封装：子业务 ID + 长度 + 载荷（无车牌前缀）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmInfoPacket {
    pub sub_id: u16,
    pub payload: Bytes,
}

impl AlarmInfoPacket {
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        let sub_id = read_u16(&mut stream)?;
        let declared = read_u32(&mut stream)?;
        if declared as usize != stream.len() {
            return Err(Error::PayloadLengthMismatch {
                declared,
                actual: stream.len(),
            });
        }
        Ok(Self {
            sub_id,
            payload: stream,
        })
    }
}

/// 0x1402 上报报警信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarnMsgAdptInfo {
    pub source_platform_id: String,
    pub warn_type: WarnType,
    pub warn_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub plate: String,
    pub color: PlateColor,
    pub target_platform_id: String,
    pub drv_line_id: u32,
    pub info_content: String,
}

impl WarnMsgAdptInfo {
    pub fn decode(payload: Bytes) -> Result<Self, Error> {
        decode_warn_body(payload).map(
            |(source, warn_type, warn_time, start, end, plate, color, target, line, info)| Self {
                source_platform_id: source,
                warn_type,
                warn_time,
                start_time: start,
                end_time: end,
                plate,
                color,
                target_platform_id: target,
                drv_line_id: line,
                info_content: info,
            },
        )
    }
}

/// 0x1403 上报报警预警消息，字段布局与 0x1402 一致
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarnMsgInformTips {
    pub source_platform_id: String,
    pub warn_type: WarnType,
    pub warn_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub plate: String,
    pub color: PlateColor,
    pub target_platform_id: String,
    pub drv_line_id: u32,
    pub warn_content: String,
}

impl WarnMsgInformTips {
    pub fn decode(payload: Bytes) -> Result<Self, Error> {
        decode_warn_body(payload).map(
            |(source, warn_type, warn_time, start, end, plate, color, target, line, content)| {
                Self {
                    source_platform_id: source,
                    warn_type,
                    warn_time,
                    start_time: start,
                    end_time: end,
                    plate,
                    color,
                    target_platform_id: target,
                    drv_line_id: line,
                    warn_content: content,
                }
            },
        )
    }
}

type WarnFields = (
    String,
    WarnType,
    DateTime<Utc>,
    DateTime<Utc>,
    DateTime<Utc>,
    String,
    PlateColor,
    String,
    u32,
    String,
);

fn decode_warn_body(payload: Bytes) -> Result<WarnFields, Error> {
    let mut stream = payload;
    let source = read_gbk(&mut stream, 11, "source_platform_id")?;
    let warn_type = WarnType(read_u16(&mut stream)?);
    let warn_time = read_utc_seconds(&mut stream)?;
    let start_time = read_utc_seconds(&mut stream)?;
    let end_time = read_utc_seconds(&mut stream)?;
    let plate = read_gbk(&mut stream, 21, "plate")?;
    let color = PlateColor(super::read_u8(&mut stream)?);
    let target = read_gbk(&mut stream, 11, "target_platform_id")?;
    let drv_line_id = read_u32(&mut stream)?;
    let info_len = read_u32(&mut stream)?;
    if info_len > 1024 {
        return Err(Error::InfoTooLong(info_len));
    }
    if info_len as usize > stream.len() {
        return Err(Error::PayloadLengthMismatch {
            declared: info_len,
            actual: stream.len(),
        });
    }
    let info = read_gbk(&mut stream, info_len as usize, "info_content")?;
    Ok((
        source,
        warn_type,
        warn_time,
        start_time,
        end_time,
        plate,
        color,
        target,
        drv_line_id,
        info,
    ))
}

/// 8 字节 UTC 秒数时间字段
fn read_utc_seconds(stream: &mut Bytes) -> Result<DateTime<Utc>, Error> {
    let secs = read_u64(stream)?;
    Ok(Utc
        .timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH))
}

/// 测试与模拟器使用的 0x1402/0x1403 编码
pub fn encode_warn_body(
    source: &str,
    warn_type: WarnType,
    warn_time: DateTime<Utc>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    plate: &str,
    color: PlateColor,
    target: &str,
    drv_line_id: u32,
    info: &str,
) -> Bytes {
    let info_gbk = super::encode_gbk(info);
    let mut buf = BytesMut::with_capacity(90 + info_gbk.len());
    buf.extend_from_slice(&super::pad_right_gbk(source, 11));
    buf.put_u16(warn_type.0);
    buf.put_u64(warn_time.timestamp() as u64);
    buf.put_u64(start_time.timestamp() as u64);
    buf.put_u64(end_time.timestamp() as u64);
    buf.extend_from_slice(&super::pad_right_gbk(plate, 21));
    buf.put_u8(color.0);
    buf.extend_from_slice(&super::pad_right_gbk(target, 11));
    buf.put_u32(drv_line_id);
    buf.put_u32(info_gbk.len() as u32);
    buf.extend_from_slice(&info_gbk);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::super::sub_id;
    use super::*;

    #[test]
    fn alarm_envelope_roundtrip() {
        let mut buf = BytesMut::new();
        buf.put_u16(sub_id::WARN_ADPT_INFO);
        buf.put_u32(3);
        buf.extend_from_slice(&[1, 2, 3]);
        let pkt = AlarmInfoPacket::decode(buf.freeze()).unwrap();
        assert_eq!(pkt.sub_id, sub_id::WARN_ADPT_INFO);
        assert_eq!(pkt.payload.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn alarm_envelope_length_mismatch() {
        let mut buf = BytesMut::new();
        buf.put_u16(sub_id::WARN_ADPT_INFO);
        buf.put_u32(5);
        buf.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            AlarmInfoPacket::decode(buf.freeze()),
            Err(Error::PayloadLengthMismatch { .. })
        ));
    }

    #[test]
    fn warn_adpt_info_roundtrip() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let payload = encode_warn_body(
            "SRC0000001",
            WarnType::OVERSPEED,
            ts,
            ts,
            ts,
            "粤B12345",
            PlateColor::YELLOW,
            "TGT0000001",
            42,
            "超速 95km/h",
        );
        let info = WarnMsgAdptInfo::decode(payload).unwrap();
        assert_eq!(info.source_platform_id, "SRC0000001");
        assert_eq!(info.warn_type, WarnType::OVERSPEED);
        assert_eq!(info.warn_time, ts);
        assert_eq!(info.plate, "粤B12345");
        assert_eq!(info.drv_line_id, 42);
        assert_eq!(info.info_content, "超速 95km/h");
    }

    #[test]
    fn warn_info_too_long_rejected() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut payload = BytesMut::from(
            &encode_warn_body(
                "SRC",
                WarnType::OTHER,
                ts,
                ts,
                ts,
                "TEST",
                PlateColor::BLUE,
                "TGT",
                0,
                "",
            )[..],
        );
        // 改写 info_len 为 1025
        let len_offset = payload.len() - 4;
        payload[len_offset..].copy_from_slice(&1025u32.to_be_bytes());
        assert!(matches!(
            WarnMsgAdptInfo::decode(payload.freeze()),
            Err(Error::InfoTooLong(1025))
        ));
    }

    #[test]
    fn warn_inform_tips_shares_layout() {
        let ts = Utc.timestamp_opt(1_650_000_000, 0).unwrap();
        let payload = encode_warn_body(
            "SRC",
            WarnType::TIMEOUT_PARKING,
            ts,
            ts,
            ts,
            "TEST123",
            PlateColor::BLUE,
            "TGT",
            7,
            "提示内容",
        );
        let tips = WarnMsgInformTips::decode(payload).unwrap();
        assert_eq!(tips.warn_type, WarnType::TIMEOUT_PARKING);
        assert_eq!(tips.warn_content, "提示内容");
    }
}
