//! JT/T 809 报文编解码
//! 帧定界、转义、CRC 校验、报文头与各业务体的序列化

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use crc::{Crc, CRC_16_IBM_3740};
use encoding_rs::GBK;

pub use disconnect::*;
pub use heartbeat::*;
pub use location::*;
pub use login::*;
pub use monitor::*;
pub use platform::*;
pub use registration::*;
pub use subbiz::*;
pub use video::*;
pub use warn::*;

pub mod disconnect;
pub mod heartbeat;
pub mod location;
pub mod login;
pub mod monitor;
pub mod platform;
pub mod registration;
pub mod subbiz;
pub mod video;
pub mod warn;

/// 帧起始符
pub const FRAME_HEAD: u8 = 0x5B;
/// 帧结束符
pub const FRAME_TAIL: u8 = 0x5D;

/// 报文头固定部分长度（不含 2019 版时间戳）
pub const HEADER_BASE_LEN: usize = 22;
/// 2019 版报文头附加的 UTC 时间戳长度
pub const HEADER_UTC_LEN: usize = 8;
/// 最小帧长：起始符 + 报文头 + CRC + 结束符
pub const FRAME_MIN_LEN: usize = 1 + HEADER_BASE_LEN + 2 + 1;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

// 报文头时间戳的合法区间，用于推断 2011/2019 头部变体
const EPOCH_MIN: u64 = 946_684_800; // 2000-01-01
const EPOCH_MAX: u64 = 4_102_444_800; // 2100-01-01

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("At least {0} more bytes required")]
    InsufficientBytes(usize),
    #[error("Dangling frame: missing 0x5D terminator")]
    DanglingFrame,
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),
    #[error("Invalid escape sequence 0x{0:02X} 0x{1:02X}")]
    InvalidEscape(u8, u8),
    #[error("Message length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: u32, actual: usize },
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },
    #[error("Body truncated while reading {0}")]
    Truncated(&'static str),
    #[error("Payload length mismatch: declared {declared}, actual {actual}")]
    PayloadLengthMismatch { declared: u32, actual: usize },
    #[error("Unexpected message id: 0x{0:04X}")]
    UnexpectedMsgId(u16),
    #[error("Unexpected sub business id: 0x{0:04X}")]
    UnexpectedSubId(u16),
    #[error("Info content exceeds 1024 bytes: {0}")]
    InfoTooLong(u32),
    #[error("GNSS data must be 36 bytes, got {0}")]
    BadGnssLength(usize),
    #[error("Registration payload size {actual} does not match {edition:?} layout ({expected})")]
    RegistrationSize {
        edition: ProtocolEdition,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: u32 },
}

/// 主业务数据类型
pub mod msg_id {
    pub const LOGIN_REQUEST: u16 = 0x1001;
    pub const LOGIN_RESPONSE: u16 = 0x1002;
    pub const LOGOUT_REQUEST: u16 = 0x1003;
    pub const LOGOUT_RESPONSE: u16 = 0x1004;
    pub const HEARTBEAT_REQUEST: u16 = 0x1005;
    pub const HEARTBEAT_RESPONSE: u16 = 0x1006;
    pub const MAIN_DISCONNECT_INFORM: u16 = 0x1007;
    pub const DYNAMIC_INFO: u16 = 0x1200;
    pub const PLATFORM_INFO: u16 = 0x1300;
    pub const ALARM_INTERACT: u16 = 0x1400;
    pub const AUTHORIZE: u16 = 0x1700;
    pub const REAL_TIME_VIDEO: u16 = 0x1800;
    pub const DOWN_CONNECT_REQ: u16 = 0x9001;
    pub const DOWN_CONNECT_RSP: u16 = 0x9002;
    pub const DOWN_HEARTBEAT_REQ: u16 = 0x9005;
    pub const DOWN_HEARTBEAT_RSP: u16 = 0x9006;
    pub const SUB_DISCONNECT_INFORM: u16 = 0x9007;
    pub const SUB_CLOSE_NOTIFY: u16 = 0x9008;
    pub const DOWN_EXG_MSG: u16 = 0x9200;
    pub const DOWN_REAL_TIME_VIDEO: u16 = 0x9800;
}

/// 子业务数据类型
pub mod sub_id {
    pub const VEHICLE_REGISTER: u16 = 0x1201;
    pub const REAL_LOCATION: u16 = 0x1202;
    pub const BATCH_LOCATION: u16 = 0x1203;
    pub const MONITOR_STARTUP_ACK: u16 = 0x1205;
    pub const MONITOR_END_ACK: u16 = 0x1206;
    pub const PLATFORM_QUERY_ACK: u16 = 0x1301;
    pub const WARN_ADPT_INFO: u16 = 0x1402;
    pub const WARN_INFORM_TIPS: u16 = 0x1403;
    pub const AUTHORIZE_STARTUP: u16 = 0x1701;
    pub const REAL_VIDEO_STARTUP_ACK: u16 = 0x1801;
    pub const MONITOR_STARTUP: u16 = 0x9205;
    pub const MONITOR_END: u16 = 0x9206;
    pub const REAL_VIDEO_STARTUP: u16 = 0x9801;
}

/// 车牌颜色（JT/T 809-2019），保留未知取值
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(transparent)]
pub struct PlateColor(pub u8);

impl PlateColor {
    pub const BLUE: PlateColor = PlateColor(0x01);
    pub const YELLOW: PlateColor = PlateColor(0x02);
    pub const BLACK: PlateColor = PlateColor(0x03);
    pub const WHITE: PlateColor = PlateColor(0x04);
    pub const GREEN: PlateColor = PlateColor(0x05);
    pub const OTHER: PlateColor = PlateColor(0x09);
}

impl std::fmt::Display for PlateColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 协议版本年代，决定 0x1201 等子业务的字段宽度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolEdition {
    V2011,
    V2019,
}

/// 报文头中的协议版本号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            major: 1,
            minor: 0,
            patch: 0,
        }
    }
}

/// 报文头
/// 2019 版在 encrypt_key 之后追加 8 字节 UTC 秒数；timestamp 为 None 表示 2011 版头部
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub msg_sn: u32,
    pub business_type: u16,
    pub gnss_center_id: u32,
    pub version: Version,
    pub encrypt_flag: u8,
    pub encrypt_key: u32,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Header {
    /// 根据请求头构造应答头：流水号、接入码、版本与加密参数原样带回
    pub fn with_response(&self, msg_id: u16) -> Header {
        Header {
            msg_sn: self.msg_sn,
            business_type: msg_id,
            gnss_center_id: self.gnss_center_id,
            version: self.version,
            encrypt_flag: self.encrypt_flag,
            encrypt_key: self.encrypt_key,
            timestamp: self.timestamp,
        }
    }

    fn encoded_len(&self) -> usize {
        match self.timestamp {
            Some(_) => HEADER_BASE_LEN + HEADER_UTC_LEN,
            None => HEADER_BASE_LEN,
        }
    }

    fn write(&self, msg_length: u32, buf: &mut BytesMut) {
        buf.put_u32(msg_length);
        buf.put_u32(self.msg_sn);
        buf.put_u16(self.business_type);
        buf.put_u32(self.gnss_center_id);
        buf.put_u8(self.version.major);
        buf.put_u8(self.version.minor);
        buf.put_u8(self.version.patch);
        buf.put_u8(self.encrypt_flag);
        buf.put_u32(self.encrypt_key);
        if let Some(ts) = self.timestamp {
            buf.put_u64(ts.timestamp() as u64);
        }
    }
}

/// 业务体，每个业务消息实现编码与业务 ID
pub trait Body {
    fn msg_id(&self) -> u16;
    fn encode(&self) -> Result<Bytes, Error>;
}

/// 直接注入已编码业务体
pub struct RawBody {
    pub msg_id: u16,
    pub payload: Bytes,
}

impl Body for RawBody {
    fn msg_id(&self) -> u16 {
        self.msg_id
    }

    fn encode(&self) -> Result<Bytes, Error> {
        Ok(self.payload.clone())
    }
}

/// 解码后的一帧：报文头 + 原始业务体
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub raw_body: Bytes,
}

impl Frame {
    #[inline]
    pub fn body_id(&self) -> u16 {
        self.header.business_type
    }
}

/// 从读缓冲区中切出一个完整帧（含起止符），丢弃帧前杂散字节
/// 数据不足返回 InsufficientBytes，由网络层继续读取
pub(crate) fn split_frame(buf: &mut BytesMut) -> Result<Bytes, Error> {
    let start = match buf.iter().position(|&b| b == FRAME_HEAD) {
        Some(idx) => idx,
        None => {
            buf.clear();
            return Err(Error::InsufficientBytes(1));
        }
    };
    if start > 0 {
        buf.advance(start);
    }
    match buf[1..].iter().position(|&b| b == FRAME_TAIL) {
        Some(idx) => Ok(buf.split_to(idx + 2).freeze()),
        None => Err(Error::InsufficientBytes(1)),
    }
}

/// 转义：0x5A -> 5A 02，0x5B -> 5A 01，0x5D -> 5E 01，0x5E -> 5E 02
pub fn stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    for &b in data {
        match b {
            0x5A => out.extend_from_slice(&[0x5A, 0x02]),
            0x5B => out.extend_from_slice(&[0x5A, 0x01]),
            0x5D => out.extend_from_slice(&[0x5E, 0x01]),
            0x5E => out.extend_from_slice(&[0x5E, 0x02]),
            other => out.push(other),
        }
    }
    out
}

/// 反转义，非法转义序列报错
pub fn destuff(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&b) = iter.next() {
        match b {
            0x5A => match iter.next() {
                Some(0x01) => out.push(0x5B),
                Some(0x02) => out.push(0x5A),
                Some(&n) => return Err(Error::InvalidEscape(0x5A, n)),
                None => return Err(Error::InvalidEscape(0x5A, 0)),
            },
            0x5E => match iter.next() {
                Some(0x01) => out.push(0x5D),
                Some(0x02) => out.push(0x5E),
                Some(&n) => return Err(Error::InvalidEscape(0x5E, n)),
                None => return Err(Error::InvalidEscape(0x5E, 0)),
            },
            other => out.push(other),
        }
    }
    Ok(out)
}

/// 解码一个完整帧：反转义、长度校验、CRC 校验、报文头解析
pub fn decode_frame(wire: &[u8]) -> Result<Frame, Error> {
    if wire.len() < FRAME_MIN_LEN {
        return Err(Error::FrameTooShort(wire.len()));
    }
    if wire[0] != FRAME_HEAD || wire[wire.len() - 1] != FRAME_TAIL {
        return Err(Error::DanglingFrame);
    }
    let inner = destuff(&wire[1..wire.len() - 1])?;
    if inner.len() < HEADER_BASE_LEN + 2 {
        return Err(Error::FrameTooShort(inner.len() + 2));
    }

    let declared = u32::from_be_bytes([inner[0], inner[1], inner[2], inner[3]]);
    let actual = inner.len() + 2;
    if declared as usize != actual {
        return Err(Error::LengthMismatch { declared, actual });
    }

    let crc_offset = inner.len() - 2;
    let expected = u16::from_be_bytes([inner[crc_offset], inner[crc_offset + 1]]);
    let computed = CRC16.checksum(&inner[..crc_offset]);
    if expected != computed {
        return Err(Error::CrcMismatch {
            expected,
            actual: computed,
        });
    }

    let mut stream = Bytes::copy_from_slice(&inner[..crc_offset]);
    stream.advance(4); // msg_length 已校验
    let msg_sn = read_u32(&mut stream)?;
    let business_type = read_u16(&mut stream)?;
    let gnss_center_id = read_u32(&mut stream)?;
    let version = Version {
        major: read_u8(&mut stream)?,
        minor: read_u8(&mut stream)?,
        patch: read_u8(&mut stream)?,
    };
    let encrypt_flag = read_u8(&mut stream)?;
    let encrypt_key = read_u32(&mut stream)?;

    // 2011/2019 头部变体推断：紧随其后的 8 字节若落在合理的 UTC 秒数区间，
    // 视为 2019 版时间戳，否则作为业务体起始
    let timestamp = if stream.len() >= HEADER_UTC_LEN {
        let mut raw = [0u8; HEADER_UTC_LEN];
        raw.copy_from_slice(&stream[..HEADER_UTC_LEN]);
        let secs = u64::from_be_bytes(raw);
        if (EPOCH_MIN..EPOCH_MAX).contains(&secs) {
            stream.advance(HEADER_UTC_LEN);
            Utc.timestamp_opt(secs as i64, 0).single()
        } else {
            None
        }
    } else {
        None
    };

    Ok(Frame {
        header: Header {
            msg_sn,
            business_type,
            gnss_center_id,
            version,
            encrypt_flag,
            encrypt_key,
            timestamp,
        },
        raw_body: stream,
    })
}

/// 编码一个完整帧：业务体编码、补齐头部长度、CRC、转义、加定界符
pub fn encode_package(header: &Header, body: &dyn Body) -> Result<Bytes, Error> {
    let payload = body.encode()?;
    let mut header = header.clone();
    header.business_type = body.msg_id();

    let msg_length = (1 + header.encoded_len() + payload.len() + 2 + 1) as u32;
    let mut inner = BytesMut::with_capacity(msg_length as usize);
    header.write(msg_length, &mut inner);
    inner.extend_from_slice(&payload);
    let crc = CRC16.checksum(&inner);
    inner.put_u16(crc);

    let stuffed = stuff(&inner);
    let mut wire = BytesMut::with_capacity(stuffed.len() + 2);
    wire.put_u8(FRAME_HEAD);
    wire.extend_from_slice(&stuffed);
    wire.put_u8(FRAME_TAIL);
    Ok(wire.freeze())
}

// ---- 字节流读取辅助 ----

pub(crate) fn read_u8(stream: &mut Bytes) -> Result<u8, Error> {
    if stream.is_empty() {
        return Err(Error::Truncated("u8"));
    }
    Ok(stream.get_u8())
}

pub(crate) fn read_u16(stream: &mut Bytes) -> Result<u16, Error> {
    if stream.len() < 2 {
        return Err(Error::Truncated("u16"));
    }
    Ok(stream.get_u16())
}

pub(crate) fn read_u32(stream: &mut Bytes) -> Result<u32, Error> {
    if stream.len() < 4 {
        return Err(Error::Truncated("u32"));
    }
    Ok(stream.get_u32())
}

pub(crate) fn read_u64(stream: &mut Bytes) -> Result<u64, Error> {
    if stream.len() < 8 {
        return Err(Error::Truncated("u64"));
    }
    Ok(stream.get_u64())
}

pub(crate) fn read_bytes(stream: &mut Bytes, n: usize, what: &'static str) -> Result<Bytes, Error> {
    if stream.len() < n {
        return Err(Error::Truncated(what));
    }
    Ok(stream.split_to(n))
}

/// 读取定长 GBK 字段并去除尾部填充
pub(crate) fn read_gbk(stream: &mut Bytes, n: usize, what: &'static str) -> Result<String, Error> {
    let raw = read_bytes(stream, n, what)?;
    Ok(decode_gbk(&raw))
}

// ---- GBK 与 BCD ----

/// UTF-8 字符串转 GBK 字节
pub fn encode_gbk(s: &str) -> Vec<u8> {
    let (out, _, _) = GBK.encode(s);
    out.into_owned()
}

/// GBK 字节转 UTF-8 字符串，去除尾部 \x00
pub fn decode_gbk(src: &[u8]) -> String {
    let (s, _, _) = GBK.decode(src);
    s.trim_end_matches('\0').to_string()
}

/// GBK 编码后右侧补零至定长，超长截断
pub fn pad_right_gbk(s: &str, len: usize) -> Vec<u8> {
    let mut gbk = encode_gbk(s);
    gbk.resize(len, 0);
    gbk
}

/// GBK 编码后左侧补零至定长，超长保留右侧
pub fn pad_left_gbk(s: &str, len: usize) -> Vec<u8> {
    let gbk = encode_gbk(s);
    if gbk.len() >= len {
        return gbk[gbk.len() - len..].to_vec();
    }
    let mut out = vec![0u8; len - gbk.len()];
    out.extend_from_slice(&gbk);
    out
}

pub(crate) fn from_bcd(b: u8) -> u8 {
    (b >> 4) * 10 + (b & 0x0F)
}

pub(crate) fn to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}
