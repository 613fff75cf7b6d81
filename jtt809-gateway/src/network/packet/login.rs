//! 主链路登录/注销（0x1001-0x1004）与从链路登录（0x9001/0x9002）

use bytes::{BufMut, Bytes, BytesMut};

use super::{msg_id, pad_right_gbk, read_bytes, read_gbk, read_u16, read_u32, read_u8, Body, Error};

/// 主链路登录应答结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VerifyResult {
    Ok = 0x00,
    IpNotAllowed = 0x01,
    BadPassword = 0x02,
    Unregistered = 0x03,
    GnssCenterMismatch = 0x04,
    Other = 0x05,
}

impl From<u8> for VerifyResult {
    fn from(value: u8) -> Self {
        match value {
            0x00 => VerifyResult::Ok,
            0x01 => VerifyResult::IpNotAllowed,
            0x02 => VerifyResult::BadPassword,
            0x03 => VerifyResult::Unregistered,
            0x04 => VerifyResult::GnssCenterMismatch,
            _ => VerifyResult::Other,
        }
    }
}

/// 主链路登录请求（0x1001）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub user_id: u32,
    /// 长度 8
    pub password: String,
    /// 从链路服务端 IP，长度 32
    pub down_link_ip: String,
    pub down_link_port: u16,
    pub protocol_version: [u8; 3],
}

impl LoginRequest {
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        let user_id = read_u32(&mut stream)?;
        let password = read_gbk(&mut stream, 8, "password")?;
        let down_link_ip = read_gbk(&mut stream, 32, "down_link_ip")?;
        let down_link_port = read_u16(&mut stream)?;
        let version = read_bytes(&mut stream, 3, "protocol_version")?;
        Ok(Self {
            user_id,
            password,
            down_link_ip,
            down_link_port,
            protocol_version: [version[0], version[1], version[2]],
        })
    }
}

impl Body for LoginRequest {
    fn msg_id(&self) -> u16 {
        msg_id::LOGIN_REQUEST
    }

    fn encode(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(51);
        buf.put_u32(self.user_id);
        buf.extend_from_slice(&pad_right_gbk(&self.password, 8));
        buf.extend_from_slice(&pad_right_gbk(&self.down_link_ip, 32));
        buf.put_u16(self.down_link_port);
        buf.extend_from_slice(&self.protocol_version);
        Ok(buf.freeze())
    }
}

/// 主链路登录应答（0x1002）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginResponse {
    pub result: VerifyResult,
    pub verify_code: u32,
}

impl LoginResponse {
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        let result = VerifyResult::from(read_u8(&mut stream)?);
        let verify_code = read_u32(&mut stream)?;
        Ok(Self {
            result,
            verify_code,
        })
    }
}

impl Body for LoginResponse {
    fn msg_id(&self) -> u16 {
        msg_id::LOGIN_RESPONSE
    }

    fn encode(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(self.result as u8);
        buf.put_u32(self.verify_code);
        Ok(buf.freeze())
    }
}

/// 主链路注销请求（0x1003），报文体复用登录请求布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequest {
    pub user_id: u32,
    pub password: String,
}

impl Body for LogoutRequest {
    fn msg_id(&self) -> u16 {
        msg_id::LOGOUT_REQUEST
    }

    fn encode(&self) -> Result<Bytes, Error> {
        LoginRequest {
            user_id: self.user_id,
            password: self.password.clone(),
            down_link_ip: "0".to_string(),
            down_link_port: 0,
            protocol_version: [1, 0, 0],
        }
        .encode()
    }
}

/// 主链路注销应答（0x1004），业务体为空
#[derive(Debug, Clone, Copy, Default)]
pub struct LogoutResponse;

impl Body for LogoutResponse {
    fn msg_id(&self) -> u16 {
        msg_id::LOGOUT_RESPONSE
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::new())
    }
}

/// 从链路连接请求（0x9001），携带主链路登录时下发的校验码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubLinkLoginRequest {
    pub verify_code: u32,
}

impl SubLinkLoginRequest {
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        Ok(Self {
            verify_code: read_u32(&mut stream)?,
        })
    }
}

impl Body for SubLinkLoginRequest {
    fn msg_id(&self) -> u16 {
        msg_id::DOWN_CONNECT_REQ
    }

    fn encode(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(self.verify_code);
        Ok(buf.freeze())
    }
}

/// 从链路连接应答（0x9002），result == 0 表示成功
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubLinkLoginResponse {
    pub result: u8,
}

impl SubLinkLoginResponse {
    pub fn decode(mut stream: Bytes) -> Result<Self, Error> {
        Ok(Self {
            result: read_u8(&mut stream)?,
        })
    }
}

impl Body for SubLinkLoginResponse {
    fn msg_id(&self) -> u16 {
        msg_id::DOWN_CONNECT_RSP
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::from(vec![self.result]))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{decode_frame, encode_package, Header};
    use super::*;

    #[test]
    fn login_request_roundtrip() {
        let req = LoginRequest {
            user_id: 12345,
            password: "password".into(),
            down_link_ip: "127.0.0.1".into(),
            down_link_port: 8080,
            protocol_version: [1, 0, 0],
        };
        let header = Header {
            gnss_center_id: 7,
            ..Default::default()
        };
        let wire = encode_package(&header, &req).unwrap();
        let frame = decode_frame(&wire).unwrap();
        assert_eq!(frame.body_id(), msg_id::LOGIN_REQUEST);
        assert_eq!(frame.raw_body.len(), 51);
        let parsed = LoginRequest::decode(frame.raw_body).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn login_response_roundtrip() {
        let resp = LoginResponse {
            result: VerifyResult::Ok,
            verify_code: 0xAA55,
        };
        let encoded = resp.encode().unwrap();
        assert_eq!(encoded.len(), 5);
        let parsed = LoginResponse::decode(encoded).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn logout_request_reuses_login_layout() {
        let body = LogoutRequest {
            user_id: 100,
            password: "pwd123".into(),
        }
        .encode()
        .unwrap();
        let parsed = LoginRequest::decode(body).unwrap();
        assert_eq!(parsed.user_id, 100);
        assert_eq!(parsed.down_link_ip, "0");
        assert_eq!(parsed.down_link_port, 0);
    }

    #[test]
    fn sub_link_login_roundtrip() {
        let req = SubLinkLoginRequest {
            verify_code: 0xDEADBEEF,
        };
        let parsed = SubLinkLoginRequest::decode(req.encode().unwrap()).unwrap();
        assert_eq!(parsed, req);

        let resp = SubLinkLoginResponse { result: 0 };
        let parsed = SubLinkLoginResponse::decode(resp.encode().unwrap()).unwrap();
        assert_eq!(parsed.result, 0);
    }

    #[test]
    fn verify_result_mapping() {
        assert_eq!(VerifyResult::from(0), VerifyResult::Ok);
        assert_eq!(VerifyResult::from(3), VerifyResult::Unregistered);
        assert_eq!(VerifyResult::from(0x7F), VerifyResult::Other);
    }
}
