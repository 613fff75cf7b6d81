//! 链路断开通知（0x1007 主链路、0x9007 从链路、0x9008 从链路注销）

use bytes::Bytes;

use super::{msg_id, Body, Error, Frame};

/// 0x1007 错误代码
pub const DISCONNECT_MAIN_LINK_BROKEN: u8 = 0x00;
pub const DISCONNECT_MAIN_OTHER: u8 = 0x01;

/// 0x9007 错误代码
pub const DISCONNECT_CANNOT_CONNECT_SUB: u8 = 0x00;
pub const DISCONNECT_SUB_LINK_BROKEN: u8 = 0x01;
pub const DISCONNECT_SUB_OTHER: u8 = 0xFF;

/// 主链路断开通知（0x1007），下级平台经从链路告知主链路异常
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainDisconnectInform {
    pub error_code: u8,
}

impl MainDisconnectInform {
    pub fn decode(frame: &Frame) -> Result<Self, Error> {
        if frame.body_id() != msg_id::MAIN_DISCONNECT_INFORM {
            return Err(Error::UnexpectedMsgId(frame.body_id()));
        }
        match frame.raw_body.first() {
            Some(&code) => Ok(Self { error_code: code }),
            None => Err(Error::Truncated("error_code")),
        }
    }
}

impl Body for MainDisconnectInform {
    fn msg_id(&self) -> u16 {
        msg_id::MAIN_DISCONNECT_INFORM
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::from(vec![self.error_code]))
    }
}

/// 从链路断开通知（0x9007），上级平台经主链路告知从链路异常
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubDisconnectInform {
    pub error_code: u8,
}

impl SubDisconnectInform {
    pub fn decode(frame: &Frame) -> Result<Self, Error> {
        if frame.body_id() != msg_id::SUB_DISCONNECT_INFORM {
            return Err(Error::UnexpectedMsgId(frame.body_id()));
        }
        match frame.raw_body.first() {
            Some(&code) => Ok(Self { error_code: code }),
            None => Err(Error::Truncated("error_code")),
        }
    }
}

impl Body for SubDisconnectInform {
    fn msg_id(&self) -> u16 {
        msg_id::SUB_DISCONNECT_INFORM
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::from(vec![self.error_code]))
    }
}

/// 上级主动关闭从链路通知（0x9008）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubLinkCloseNotify {
    pub reason_code: u8,
}

impl Body for SubLinkCloseNotify {
    fn msg_id(&self) -> u16 {
        msg_id::SUB_CLOSE_NOTIFY
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::from(vec![self.reason_code]))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{decode_frame, encode_package, Header};
    use super::*;

    #[test]
    fn main_disconnect_roundtrip() {
        let wire = encode_package(
            &Header {
                gnss_center_id: 10,
                ..Default::default()
            },
            &MainDisconnectInform {
                error_code: DISCONNECT_MAIN_OTHER,
            },
        )
        .unwrap();
        let frame = decode_frame(&wire).unwrap();
        let inform = MainDisconnectInform::decode(&frame).unwrap();
        assert_eq!(inform.error_code, DISCONNECT_MAIN_OTHER);
    }

    #[test]
    fn sub_disconnect_roundtrip() {
        let wire = encode_package(
            &Header::default(),
            &SubDisconnectInform {
                error_code: DISCONNECT_SUB_LINK_BROKEN,
            },
        )
        .unwrap();
        let frame = decode_frame(&wire).unwrap();
        assert_eq!(frame.body_id(), msg_id::SUB_DISCONNECT_INFORM);
        let inform = SubDisconnectInform::decode(&frame).unwrap();
        assert_eq!(inform.error_code, DISCONNECT_SUB_LINK_BROKEN);
    }

    #[test]
    fn decode_rejects_wrong_msg_id() {
        let wire = encode_package(&Header::default(), &SubLinkCloseNotify { reason_code: 0 }).unwrap();
        let frame = decode_frame(&wire).unwrap();
        assert!(MainDisconnectInform::decode(&frame).is_err());
    }
}
