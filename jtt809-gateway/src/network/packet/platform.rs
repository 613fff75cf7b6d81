//! 平台间消息（0x1300），目前处理 0x1301 平台查岗应答

use bytes::Bytes;

use super::{read_gbk, read_u16, read_u32, read_u8, sub_id, Error, SubBusinessPacket};

/// 0x1301 平台查岗应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformQueryAck {
    pub object_type: u8,
    /// 应答人，16 字节
    pub responder: String,
    /// 应答人电话，20 字节
    pub responder_tel: String,
    /// 查岗对象 ID，20 字节
    pub object_id: String,
    pub source_data_type: u16,
    pub source_msg_sn: u32,
    pub info_content: String,
}

impl PlatformQueryAck {
    pub fn decode(pkt: &SubBusinessPacket) -> Result<Self, Error> {
        if pkt.sub_id != sub_id::PLATFORM_QUERY_ACK {
            return Err(Error::UnexpectedSubId(pkt.sub_id));
        }
        let mut stream = pkt.payload.clone();
        let object_type = read_u8(&mut stream)?;
        let responder = read_gbk(&mut stream, 16, "responder")?;
        let responder_tel = read_gbk(&mut stream, 20, "responder_tel")?;
        let object_id = read_gbk(&mut stream, 20, "object_id")?;
        let source_data_type = read_u16(&mut stream)?;
        let source_msg_sn = read_u32(&mut stream)?;
        let info_len = read_u32(&mut stream)?;
        if info_len as usize > stream.len() {
            return Err(Error::PayloadLengthMismatch {
                declared: info_len,
                actual: stream.len(),
            });
        }
        let info_content = read_gbk(&mut stream, info_len as usize, "info_content")?;
        Ok(Self {
            object_type,
            responder,
            responder_tel,
            object_id,
            source_data_type,
            source_msg_sn,
            info_content,
        })
    }
}
