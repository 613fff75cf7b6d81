//! 车辆定位（子业务 0x1202 实时、0x1203 补报）
//! 2011 版为 36 字节定长体；2019 版携带 JT808 定位基础数据与三级平台报警位

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use super::{
    from_bcd, msg_id, pad_right_gbk, read_bytes, read_gbk, read_u16, read_u32, read_u8, sub_id,
    to_bcd, Body, Error, PlateColor, SubBusinessPacket,
};

/// 2011 版车辆定位数据体（36 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct VehiclePosition {
    pub encrypt: u8,
    pub time: DateTime<Utc>,
    /// 1e-6 度
    pub lon: u32,
    /// 1e-6 度
    pub lat: u32,
    /// km/h
    pub speed: u16,
    pub record_speed: u16,
    /// km
    pub mileage: u32,
    /// 0-359
    pub direction: u16,
    /// m
    pub altitude: u16,
    pub state: u32,
    pub alarm: u32,
}

impl VehiclePosition {
    /// 校验经纬度与方向
    pub fn validate(&self) -> Result<(), Error> {
        if self.lon > 180_000_000 {
            return Err(Error::InvalidField {
                field: "lon",
                value: self.lon,
            });
        }
        if self.lat > 90_000_000 {
            return Err(Error::InvalidField {
                field: "lat",
                value: self.lat,
            });
        }
        if self.direction > 359 {
            return Err(Error::InvalidField {
                field: "direction",
                value: self.direction as u32,
            });
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        self.validate()?;
        let mut buf = BytesMut::with_capacity(36);
        buf.put_u8(self.encrypt);
        buf.put_u8(self.time.day() as u8);
        buf.put_u8(self.time.month() as u8);
        buf.put_u16(self.time.year() as u16);
        buf.put_u8(self.time.hour() as u8);
        buf.put_u8(self.time.minute() as u8);
        buf.put_u8(self.time.second() as u8);
        buf.put_u32(self.lon);
        buf.put_u32(self.lat);
        buf.put_u16(self.speed);
        buf.put_u16(self.record_speed);
        buf.put_u32(self.mileage);
        buf.put_u16(self.direction);
        buf.put_u16(self.altitude);
        buf.put_u32(self.state);
        buf.put_u32(self.alarm);
        Ok(buf.freeze())
    }

    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        if stream.len() < 36 {
            return Err(Error::Truncated("position 2011"));
        }
        let encrypt = read_u8(&mut stream)?;
        let day = read_u8(&mut stream)?;
        let month = read_u8(&mut stream)?;
        let year = read_u16(&mut stream)?;
        let hour = read_u8(&mut stream)?;
        let minute = read_u8(&mut stream)?;
        let second = read_u8(&mut stream)?;
        let time = Utc
            .with_ymd_and_hms(
                year as i32,
                month as u32,
                day as u32,
                hour as u32,
                minute as u32,
                second as u32,
            )
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH);
        Ok(Self {
            encrypt,
            time,
            lon: read_u32(&mut stream)?,
            lat: read_u32(&mut stream)?,
            speed: read_u16(&mut stream)?,
            record_speed: read_u16(&mut stream)?,
            mileage: read_u32(&mut stream)?,
            direction: read_u16(&mut stream)?,
            altitude: read_u16(&mut stream)?,
            state: read_u32(&mut stream)?,
            alarm: read_u32(&mut stream)?,
        })
    }
}

/// 2019 版车辆定位数据体：GNSS 原始数据 + 三级平台报警信息
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VehiclePosition2019 {
    pub encrypt: u8,
    #[serde(serialize_with = "serialize_hex")]
    pub gnss_data: Bytes,
    pub platform_id1: String,
    pub alarm1: u32,
    pub platform_id2: String,
    pub alarm2: u32,
    pub platform_id3: String,
    pub alarm3: u32,
}

impl VehiclePosition2019 {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + 4 + self.gnss_data.len() + (11 + 4) * 3);
        buf.put_u8(self.encrypt);
        buf.put_u32(self.gnss_data.len() as u32);
        buf.extend_from_slice(&self.gnss_data);
        buf.extend_from_slice(&pad_right_gbk(&self.platform_id1, 11));
        buf.put_u32(self.alarm1);
        buf.extend_from_slice(&pad_right_gbk(&self.platform_id2, 11));
        buf.put_u32(self.alarm2);
        buf.extend_from_slice(&pad_right_gbk(&self.platform_id3, 11));
        buf.put_u32(self.alarm3);
        buf.freeze()
    }

    /// 从流中消费一条 2019 版定位记录（0x1203 补报复用）
    pub fn decode_stream(stream: &mut Bytes) -> Result<Self, Error> {
        let encrypt = read_u8(stream)?;
        let gnss_len = read_u32(stream)? as usize;
        let gnss_data = read_bytes(stream, gnss_len, "gnss data")?;
        let platform_id1 = read_gbk(stream, 11, "platform_id1")?;
        let alarm1 = read_u32(stream)?;
        let platform_id2 = read_gbk(stream, 11, "platform_id2")?;
        let alarm2 = read_u32(stream)?;
        let platform_id3 = read_gbk(stream, 11, "platform_id3")?;
        let alarm3 = read_u32(stream)?;
        Ok(Self {
            encrypt,
            gnss_data,
            platform_id1,
            alarm1,
            platform_id2,
            alarm2,
            platform_id3,
            alarm3,
        })
    }

    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        Self::decode_stream(&mut stream)
    }

    /// 解析内嵌的 JT808 定位数据
    pub fn gnss(&self) -> Result<GnssData, Error> {
        GnssData::decode(self.gnss_data.clone())
    }
}

/// JT808 定位基础数据（28 字节）+ 附加信息项
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct GnssData {
    pub alarm: u32,
    pub state: u32,
    /// 度
    pub latitude: f64,
    /// 度
    pub longitude: f64,
    /// m
    pub altitude: u16,
    /// 0.1 km/h
    pub speed: u16,
    /// 0-359
    pub direction: u16,
    pub time: DateTime<Utc>,
    /// 附加项 0x01，0.1 km
    pub mileage: Option<u32>,
    /// 附加项 0x02，0.1 L
    pub fuel: Option<u16>,
    /// 附加项 0x03，0.1 km/h
    pub record_speed: Option<u16>,
}

impl GnssData {
    /// 基础数据固定 28 字节，后随 id(1)+len(1)+value 形式的附加项
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        if stream.len() < 28 {
            return Err(Error::Truncated("gnss base"));
        }
        let alarm = read_u32(&mut stream)?;
        let state = read_u32(&mut stream)?;
        let lat_raw = read_u32(&mut stream)?;
        let lon_raw = read_u32(&mut stream)?;
        let altitude = read_u16(&mut stream)?;
        let speed = read_u16(&mut stream)?;
        let direction = read_u16(&mut stream)?;
        let bcd = read_bytes(&mut stream, 6, "gnss time")?;
        let time = Utc
            .with_ymd_and_hms(
                2000 + from_bcd(bcd[0]) as i32,
                from_bcd(bcd[1]) as u32,
                from_bcd(bcd[2]) as u32,
                from_bcd(bcd[3]) as u32,
                from_bcd(bcd[4]) as u32,
                from_bcd(bcd[5]) as u32,
            )
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH);

        let mut gnss = Self {
            alarm,
            state,
            latitude: lat_raw as f64 / 1e6,
            longitude: lon_raw as f64 / 1e6,
            altitude,
            speed,
            direction,
            time,
            mileage: None,
            fuel: None,
            record_speed: None,
        };

        // 附加信息项，未识别的跳过
        while stream.len() >= 2 {
            let id = read_u8(&mut stream)?;
            let len = read_u8(&mut stream)? as usize;
            let mut value = read_bytes(&mut stream, len, "gnss attachment")?;
            match (id, len) {
                (0x01, 4) => gnss.mileage = Some(value.get_u32()),
                (0x02, 2) => gnss.fuel = Some(value.get_u16()),
                (0x03, 2) => gnss.record_speed = Some(value.get_u16()),
                _ => {}
            }
        }
        Ok(gnss)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(28 + 18);
        buf.put_u32(self.alarm);
        buf.put_u32(self.state);
        buf.put_u32((self.latitude * 1e6).round() as u32);
        buf.put_u32((self.longitude * 1e6).round() as u32);
        buf.put_u16(self.altitude);
        buf.put_u16(self.speed);
        buf.put_u16(self.direction);
        buf.put_u8(to_bcd((self.time.year() - 2000).clamp(0, 99) as u8));
        buf.put_u8(to_bcd(self.time.month() as u8));
        buf.put_u8(to_bcd(self.time.day() as u8));
        buf.put_u8(to_bcd(self.time.hour() as u8));
        buf.put_u8(to_bcd(self.time.minute() as u8));
        buf.put_u8(to_bcd(self.time.second() as u8));
        if let Some(mileage) = self.mileage {
            buf.put_u8(0x01);
            buf.put_u8(4);
            buf.put_u32(mileage);
        }
        if let Some(fuel) = self.fuel {
            buf.put_u8(0x02);
            buf.put_u8(2);
            buf.put_u16(fuel);
        }
        if let Some(speed) = self.record_speed {
            buf.put_u8(0x03);
            buf.put_u8(2);
            buf.put_u16(speed);
        }
        buf.freeze()
    }
}

/// 0x1203 车辆定位信息自动补报：count + count 条 2019 版记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLocation {
    pub locations: Vec<VehiclePosition2019>,
}

impl BatchLocation {
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        let count = read_u8(&mut stream)? as usize;
        let mut locations = Vec::with_capacity(count);
        for _ in 0..count {
            locations.push(VehiclePosition2019::decode_stream(&mut stream)?);
        }
        Ok(Self { locations })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.locations.len() as u8);
        for loc in &self.locations {
            buf.extend_from_slice(&loc.encode());
        }
        buf.freeze()
    }
}

/// 实时定位载荷，2011 与 2019 二选一
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Position {
    V2011(VehiclePosition),
    V2019(VehiclePosition2019),
}

/// 主链路车辆动态信息交换（0x1200）业务体，承载 0x1202 实时定位
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleLocationUpload {
    pub plate: String,
    pub color: PlateColor,
    pub position: Position,
}

impl Body for VehicleLocationUpload {
    fn msg_id(&self) -> u16 {
        msg_id::DYNAMIC_INFO
    }

    fn encode(&self) -> Result<Bytes, Error> {
        let payload = match &self.position {
            Position::V2011(pos) => pos.encode()?,
            Position::V2019(pos) => pos.encode(),
        };
        Ok(
            SubBusinessPacket::new(&self.plate, self.color, sub_id::REAL_LOCATION, payload)
                .encode(),
        )
    }
}

fn serialize_hex<S: serde::Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(data))
}

/// 按载荷长度区分 0x1202 的版本：36 字节为 2011 版，其余按 2019 版解析
pub fn decode_real_location(payload: Bytes) -> Result<Position, Error> {
    if payload.len() == 36 {
        Ok(Position::V2011(VehiclePosition::decode(payload)?))
    } else {
        Ok(Position::V2019(VehiclePosition2019::decode(payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{decode_frame, encode_package, Header};
    use super::*;

    fn sample_position() -> VehiclePosition {
        VehiclePosition {
            encrypt: 0,
            time: Utc.with_ymd_and_hms(2024, 5, 12, 15, 4, 5).unwrap(),
            lon: 116_397_000,
            lat: 39_908_000,
            speed: 60,
            record_speed: 61,
            mileage: 123_456,
            direction: 180,
            altitude: 45,
            state: 0x01,
            alarm: 0x02,
        }
    }

    fn sample_gnss() -> GnssData {
        GnssData {
            alarm: 0x10,
            state: 0x03,
            latitude: 39.908,
            longitude: 116.397,
            altitude: 50,
            speed: 605,
            direction: 90,
            time: Utc.with_ymd_and_hms(2024, 1, 24, 10, 11, 12).unwrap(),
            mileage: Some(8888),
            fuel: Some(120),
            record_speed: Some(600),
        }
    }

    #[test]
    fn position_2011_roundtrip() {
        let pos = sample_position();
        let encoded = pos.encode().unwrap();
        assert_eq!(encoded.len(), 36);
        let parsed = VehiclePosition::decode(encoded).unwrap();
        assert_eq!(parsed, pos);
    }

    #[test]
    fn position_validation() {
        let mut pos = sample_position();
        pos.lon = 181_000_000;
        assert!(matches!(
            pos.encode(),
            Err(Error::InvalidField { field: "lon", .. })
        ));
    }

    #[test]
    fn gnss_roundtrip_with_attachments() {
        let gnss = sample_gnss();
        let parsed = GnssData::decode(gnss.encode()).unwrap();
        assert_eq!(parsed, gnss);
        assert_eq!(parsed.mileage, Some(8888));
        assert_eq!(parsed.fuel, Some(120));
        assert_eq!(parsed.record_speed, Some(600));
    }

    #[test]
    fn gnss_base_only() {
        let mut gnss = sample_gnss();
        gnss.mileage = None;
        gnss.fuel = None;
        gnss.record_speed = None;
        let encoded = gnss.encode();
        assert_eq!(encoded.len(), 28);
        let parsed = GnssData::decode(encoded).unwrap();
        assert_eq!(parsed, gnss);
    }

    #[test]
    fn position_2019_roundtrip() {
        let pos = VehiclePosition2019 {
            encrypt: 1,
            gnss_data: sample_gnss().encode(),
            platform_id1: "11000000001".into(),
            alarm1: 1,
            platform_id2: "11000000002".into(),
            alarm2: 2,
            platform_id3: "11000000003".into(),
            alarm3: 3,
        };
        let parsed = VehiclePosition2019::decode(pos.encode()).unwrap();
        assert_eq!(parsed, pos);
        assert_eq!(parsed.gnss().unwrap(), sample_gnss());
    }

    #[test]
    fn batch_location_roundtrip() {
        let record = |alarm| VehiclePosition2019 {
            encrypt: 0,
            gnss_data: sample_gnss().encode(),
            platform_id1: "P1".into(),
            alarm1: alarm,
            platform_id2: String::new(),
            alarm2: 0,
            platform_id3: String::new(),
            alarm3: 0,
        };
        let batch = BatchLocation {
            locations: vec![record(1), record(2)],
        };
        let parsed = BatchLocation::decode(batch.encode()).unwrap();
        assert_eq!(parsed.locations.len(), 2);
        assert_eq!(parsed.locations[1].alarm1, 2);
    }

    #[test]
    fn upload_frame_roundtrip() {
        let upload = VehicleLocationUpload {
            plate: "京A12345".into(),
            color: PlateColor::BLUE,
            position: Position::V2011(sample_position()),
        };
        let wire = encode_package(
            &Header {
                gnss_center_id: 99,
                ..Default::default()
            },
            &upload,
        )
        .unwrap();
        let frame = decode_frame(&wire).unwrap();
        assert_eq!(frame.body_id(), msg_id::DYNAMIC_INFO);
        let pkt = SubBusinessPacket::decode(frame.raw_body).unwrap();
        assert_eq!(pkt.plate, "京A12345");
        assert_eq!(pkt.sub_id, sub_id::REAL_LOCATION);
        match decode_real_location(pkt.payload).unwrap() {
            Position::V2011(pos) => assert_eq!(pos, sample_position()),
            Position::V2019(_) => panic!("expected 2011 position"),
        }
    }
}
