//! 子业务包封装
//! 0x1200/0x9200/0x1300/0x1400/0x1800/0x9800 等主业务的公共载荷形式：
//! 车牌(21) + 颜色(1) + 子业务 ID(2) + 数据长度(4) + 数据。
//! 0x1700 同时存在无车牌形式（子业务 ID 直接开头），两种都要接受。

use bytes::{BufMut, Bytes, BytesMut};

use super::{
    pad_right_gbk, read_bytes, read_gbk, read_u16, read_u32, read_u8, Error, PlateColor,
};

/// 带车牌的子业务包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBusinessPacket {
    pub plate: String,
    pub color: PlateColor,
    pub sub_id: u16,
    pub payload: Bytes,
}

impl SubBusinessPacket {
    pub fn new(plate: &str, color: PlateColor, sub_id: u16, payload: Bytes) -> Self {
        Self {
            plate: plate.to_string(),
            color,
            sub_id,
            payload,
        }
    }

    /// 解析主业务体，校验声明长度与实际载荷一致
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        let plate = read_gbk(&mut stream, 21, "plate")?;
        let color = PlateColor(read_u8(&mut stream)?);
        let sub_id = read_u16(&mut stream)?;
        let declared = read_u32(&mut stream)?;
        if declared as usize != stream.len() {
            return Err(Error::PayloadLengthMismatch {
                declared,
                actual: stream.len(),
            });
        }
        Ok(Self {
            plate,
            color,
            sub_id,
            payload: stream,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(21 + 1 + 2 + 4 + self.payload.len());
        buf.extend_from_slice(&pad_right_gbk(&self.plate, 21));
        buf.put_u8(self.color.0);
        buf.put_u16(self.sub_id);
        buf.put_u32(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// 0x1700 时效口令业务体：平台级，可不带车牌
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizePacket {
    /// 车牌形式时存在
    pub plate: Option<(String, PlateColor)>,
    pub sub_id: u16,
    pub payload: Bytes,
}

impl AuthorizePacket {
    /// 先按车牌形式解析，长度对不上再按无车牌形式解析
    pub fn decode(stream: Bytes) -> Result<Self, Error> {
        if let Ok(pkt) = SubBusinessPacket::decode(stream.clone()) {
            return Ok(Self {
                plate: Some((pkt.plate, pkt.color)),
                sub_id: pkt.sub_id,
                payload: pkt.payload,
            });
        }
        let mut stream = stream;
        let sub_id = read_u16(&mut stream)?;
        let declared = read_u32(&mut stream)?;
        if declared as usize != stream.len() {
            return Err(Error::PayloadLengthMismatch {
                declared,
                actual: stream.len(),
            });
        }
        let payload = read_bytes(&mut stream, declared as usize, "authorize payload")?;
        Ok(Self {
            plate: None,
            sub_id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::sub_id;
    use super::*;

    #[test]
    fn sub_business_roundtrip() {
        let pkt = SubBusinessPacket::new(
            "粤B12345",
            PlateColor::BLUE,
            sub_id::REAL_LOCATION,
            Bytes::from(vec![1, 2, 3, 4]),
        );
        let parsed = SubBusinessPacket::decode(pkt.encode()).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn sub_business_rejects_length_mismatch() {
        let pkt = SubBusinessPacket::new(
            "TEST",
            PlateColor::YELLOW,
            sub_id::REAL_LOCATION,
            Bytes::from(vec![1, 2, 3]),
        );
        let mut wire = BytesMut::from(&pkt.encode()[..]);
        wire.extend_from_slice(&[0xFF]); // 实际多出一个字节
        assert!(matches!(
            SubBusinessPacket::decode(wire.freeze()),
            Err(Error::PayloadLengthMismatch { .. })
        ));
    }

    #[test]
    fn authorize_accepts_both_forms() {
        let payload = Bytes::from(vec![0u8; 139]);

        let with_plate = SubBusinessPacket::new(
            "粤A12345",
            PlateColor::YELLOW,
            sub_id::AUTHORIZE_STARTUP,
            payload.clone(),
        )
        .encode();
        let pkt = AuthorizePacket::decode(with_plate).unwrap();
        assert!(pkt.plate.is_some());
        assert_eq!(pkt.sub_id, sub_id::AUTHORIZE_STARTUP);
        assert_eq!(pkt.payload.len(), 139);

        let mut plateless = BytesMut::new();
        plateless.put_u16(sub_id::AUTHORIZE_STARTUP);
        plateless.put_u32(139);
        plateless.extend_from_slice(&payload);
        let pkt = AuthorizePacket::decode(plateless.freeze()).unwrap();
        assert!(pkt.plate.is_none());
        assert_eq!(pkt.sub_id, sub_id::AUTHORIZE_STARTUP);
        assert_eq!(pkt.payload.len(), 139);
    }
}
