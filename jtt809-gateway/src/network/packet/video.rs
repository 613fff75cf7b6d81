//! JT/T 1078 视频业务在 809 通道上的控制消息
//! 0x1700/0x1701 时效口令上报、0x9800/0x9801 实时音视频请求、0x1800/0x1801 应答

use bytes::{BufMut, Bytes, BytesMut};

use super::{
    decode_gbk, pad_left_gbk, pad_right_gbk, read_bytes, read_gbk, read_u16, read_u8, Error,
};

/// 0x1701 时效口令上报
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeStartupReq {
    /// 11 字节
    pub platform_id: String,
    /// 64 字节
    pub authorize_code1: String,
    /// 64 字节
    pub authorize_code2: String,
}

impl AuthorizeStartupReq {
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        Ok(Self {
            platform_id: read_gbk(&mut stream, 11, "platform_id")?,
            authorize_code1: read_gbk(&mut stream, 64, "authorize_code1")?,
            authorize_code2: read_gbk(&mut stream, 64, "authorize_code2")?,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(11 + 64 + 64);
        buf.extend_from_slice(&pad_right_gbk(&self.platform_id, 11));
        buf.extend_from_slice(&pad_right_gbk(&self.authorize_code1, 64));
        buf.extend_from_slice(&pad_right_gbk(&self.authorize_code2, 64));
        buf.freeze()
    }
}

/// 0x9801 实时音视频请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownRealTimeVideoStartupReq {
    pub channel: u8,
    pub av_item_type: u8,
    /// 64 字节
    pub authorize_code: String,
    /// 36 字节，可选
    pub gnss_data: Option<Bytes>,
}

impl DownRealTimeVideoStartupReq {
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        let channel = read_u8(&mut stream)?;
        let av_item_type = read_u8(&mut stream)?;
        let authorize_code = read_gbk(&mut stream, 64, "authorize_code")?;
        let gnss_data = if stream.len() >= 36 {
            Some(read_bytes(&mut stream, 36, "gnss_data")?)
        } else {
            None
        };
        Ok(Self {
            channel,
            av_item_type,
            authorize_code,
            gnss_data,
        })
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(1 + 1 + 64 + 36);
        buf.put_u8(self.channel);
        buf.put_u8(self.av_item_type);
        buf.extend_from_slice(&pad_right_gbk(&self.authorize_code, 64));
        if let Some(gnss) = &self.gnss_data {
            if gnss.len() != 36 {
                return Err(Error::BadGnssLength(gnss.len()));
            }
            buf.extend_from_slice(gnss);
        }
        Ok(buf.freeze())
    }
}

/// 0x1801 实时音视频请求应答
/// server_ip 为全协议唯一的左侧补零字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealTimeVideoStartupAck {
    pub result: u8,
    /// 32 字节，左侧补零
    pub server_ip: String,
    pub server_port: u16,
}

impl RealTimeVideoStartupAck {
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        let result = read_u8(&mut stream)?;
        let raw_ip = read_bytes(&mut stream, 32, "server_ip")?;
        let server_ip = decode_gbk(&raw_ip)
            .trim_start_matches('\0')
            .to_string();
        let server_port = read_u16(&mut stream)?;
        Ok(Self {
            result,
            server_ip,
            server_port,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + 32 + 2);
        buf.put_u8(self.result);
        buf.extend_from_slice(&pad_left_gbk(&self.server_ip, 32));
        buf.put_u16(self.server_port);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_startup_roundtrip() {
        let req = AuthorizeStartupReq {
            platform_id: "PLAT123".into(),
            authorize_code1: "AUTH_CODE_1".into(),
            authorize_code2: "AUTH_CODE_2".into(),
        };
        let encoded = req.encode();
        assert_eq!(encoded.len(), 11 + 64 + 64);
        let parsed = AuthorizeStartupReq::decode(encoded).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn authorize_startup_short_body() {
        assert!(AuthorizeStartupReq::decode(Bytes::from(vec![1, 2, 3])).is_err());
    }

    #[test]
    fn video_startup_roundtrip_with_gnss() {
        let req = DownRealTimeVideoStartupReq {
            channel: 1,
            av_item_type: 2,
            authorize_code: "AUTH_CODE_REQ".into(),
            gnss_data: Some(Bytes::from((0u8..36).collect::<Vec<_>>())),
        };
        let encoded = req.encode().unwrap();
        assert_eq!(encoded.len(), 102);
        let parsed = DownRealTimeVideoStartupReq::decode(encoded).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn video_startup_without_gnss() {
        let req = DownRealTimeVideoStartupReq {
            channel: 3,
            av_item_type: 0,
            authorize_code: "AC1".into(),
            gnss_data: None,
        };
        let encoded = req.encode().unwrap();
        assert_eq!(encoded.len(), 66);
        let parsed = DownRealTimeVideoStartupReq::decode(encoded).unwrap();
        assert!(parsed.gnss_data.is_none());
    }

    #[test]
    fn video_startup_bad_gnss_rejected() {
        let req = DownRealTimeVideoStartupReq {
            channel: 1,
            av_item_type: 1,
            authorize_code: "AC".into(),
            gnss_data: Some(Bytes::from(vec![0u8; 20])),
        };
        assert!(matches!(req.encode(), Err(Error::BadGnssLength(20))));
    }

    #[test]
    fn video_ack_left_pads_server_ip() {
        let ack = RealTimeVideoStartupAck {
            result: 0,
            server_ip: "192.168.1.100".into(),
            server_port: 8080,
        };
        let encoded = ack.encode();
        assert_eq!(encoded.len(), 35);
        // 左侧补零，IP 文本贴近字段末尾
        assert_eq!(encoded[1], 0);
        assert_eq!(&encoded[encoded.len() - 2 - 13..encoded.len() - 2], b"192.168.1.100");
        let parsed = RealTimeVideoStartupAck::decode(encoded).unwrap();
        assert_eq!(parsed, ack);
    }
}
