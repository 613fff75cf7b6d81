//! 链路连接保持（0x1005/0x1006 主链路，0x9005/0x9006 从链路），业务体均为空

use bytes::Bytes;

use super::{msg_id, Body, Error};

/// 主链路连接保持请求（0x1005）
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatRequest;

impl Body for HeartbeatRequest {
    fn msg_id(&self) -> u16 {
        msg_id::HEARTBEAT_REQUEST
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::new())
    }
}

/// 主链路连接保持应答（0x1006）
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatResponse;

impl Body for HeartbeatResponse {
    fn msg_id(&self) -> u16 {
        msg_id::HEARTBEAT_RESPONSE
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::new())
    }
}

/// 从链路连接保持请求（0x9005）
#[derive(Debug, Clone, Copy, Default)]
pub struct SubLinkHeartbeatRequest;

impl Body for SubLinkHeartbeatRequest {
    fn msg_id(&self) -> u16 {
        msg_id::DOWN_HEARTBEAT_REQ
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::new())
    }
}

/// 从链路连接保持应答（0x9006）
#[derive(Debug, Clone, Copy, Default)]
pub struct SubLinkHeartbeatResponse;

impl Body for SubLinkHeartbeatResponse {
    fn msg_id(&self) -> u16 {
        msg_id::DOWN_HEARTBEAT_RSP
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::new())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{decode_frame, encode_package, Header};
    use super::*;

    #[test]
    fn heartbeat_encodes_empty_body() {
        let wire = encode_package(
            &Header {
                gnss_center_id: 77,
                ..Default::default()
            },
            &HeartbeatRequest,
        )
        .unwrap();
        let frame = decode_frame(&wire).unwrap();
        assert_eq!(frame.body_id(), msg_id::HEARTBEAT_REQUEST);
        assert!(frame.raw_body.is_empty());
    }
}
