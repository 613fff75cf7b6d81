//! 网关统一错误类型

use crate::network::conn;
use crate::network::packet::{self, PlateColor};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Packet error: {0}")]
    Packet(#[from] packet::Error),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] crate::config::Error),
    #[error("At least one account is required")]
    NoAccounts,
    #[error("Platform {0} not online")]
    PlatformOffline(u32),
    #[error("No available link for platform {0}")]
    LinkUnavailable(u32),
    #[error("Authorize code not reported yet for platform {0}")]
    MissingAuthCode(u32),
    #[error("Vehicle {plate} with color {color} not found")]
    VehicleNotFound { plate: String, color: PlateColor },
    #[error("Vehicle {plate} has no video response yet")]
    NoVideoAck { plate: String },
    #[error("Video ack for {plate} reported failure result {result}")]
    VideoAckFailed { plate: String, result: u8 },
    #[error("Video server address missing for {plate}")]
    MissingVideoServer { plate: String },
    #[error("Invalid gnss hex: {0}")]
    BadGnssHex(#[from] hex::FromHexError),
    #[error("Sub link login refused: result {0}")]
    SubLoginRefused(u8),
}

impl From<conn::Error> for Error {
    fn from(e: conn::Error) -> Self {
        match e {
            conn::Error::Packet(e) => Error::Packet(e),
            conn::Error::Io(e) => Error::Io(e),
            conn::Error::ConnectionReset => Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
