//! 车辆注册信息（子业务 0x1201）
//! 2011 与 2019 版字段宽度不同，按版本解析，长度不符即报错

use bytes::{Bytes, BytesMut};

use super::{pad_right_gbk, read_gbk, Error, ProtocolEdition};

/// 0x1201 各字段宽度
struct FieldWidths {
    platform: usize,
    producer: usize,
    model: usize,
    imei: usize,
    terminal_id: usize,
    sim: usize,
}

impl FieldWidths {
    fn for_edition(edition: ProtocolEdition) -> Self {
        match edition {
            ProtocolEdition::V2011 => Self {
                platform: 11,
                producer: 11,
                model: 20,
                imei: 15,
                terminal_id: 7,
                sim: 12,
            },
            ProtocolEdition::V2019 => Self {
                platform: 11,
                producer: 11,
                model: 30,
                imei: 30,
                terminal_id: 30,
                sim: 13,
            },
        }
    }

    fn total(&self) -> usize {
        self.platform + self.producer + self.model + self.imei + self.terminal_id + self.sim
    }
}

/// 0x1201 注册详情
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VehicleRegistration {
    pub platform_id: String,
    pub producer_id: String,
    pub terminal_model: String,
    pub imei: String,
    pub terminal_id: String,
    pub terminal_sim: String,
}

impl VehicleRegistration {
    pub fn decode(payload: Bytes, edition: ProtocolEdition) -> Result<Self, Error> {
        let widths = FieldWidths::for_edition(edition);
        if payload.len() != widths.total() {
            return Err(Error::RegistrationSize {
                edition,
                expected: widths.total(),
                actual: payload.len(),
            });
        }
        let mut stream = payload;
        Ok(Self {
            platform_id: read_gbk(&mut stream, widths.platform, "platform_id")?,
            producer_id: read_gbk(&mut stream, widths.producer, "producer_id")?,
            terminal_model: read_gbk(&mut stream, widths.model, "terminal_model")?,
            imei: read_gbk(&mut stream, widths.imei, "imei")?,
            terminal_id: read_gbk(&mut stream, widths.terminal_id, "terminal_id")?,
            terminal_sim: read_gbk(&mut stream, widths.sim, "terminal_sim")?,
        })
    }

    /// 根据载荷长度推断版本，两种宽度都不匹配时报 2019 尺寸错误
    pub fn edition_for_len(len: usize) -> Result<ProtocolEdition, Error> {
        if len == FieldWidths::for_edition(ProtocolEdition::V2011).total() {
            Ok(ProtocolEdition::V2011)
        } else if len == FieldWidths::for_edition(ProtocolEdition::V2019).total() {
            Ok(ProtocolEdition::V2019)
        } else {
            Err(Error::RegistrationSize {
                edition: ProtocolEdition::V2019,
                expected: FieldWidths::for_edition(ProtocolEdition::V2019).total(),
                actual: len,
            })
        }
    }

    pub fn encode(&self, edition: ProtocolEdition) -> Bytes {
        let widths = FieldWidths::for_edition(edition);
        let mut buf = BytesMut::with_capacity(widths.total());
        buf.extend_from_slice(&pad_right_gbk(&self.platform_id, widths.platform));
        buf.extend_from_slice(&pad_right_gbk(&self.producer_id, widths.producer));
        buf.extend_from_slice(&pad_right_gbk(&self.terminal_model, widths.model));
        buf.extend_from_slice(&pad_right_gbk(&self.imei, widths.imei));
        buf.extend_from_slice(&pad_right_gbk(&self.terminal_id, widths.terminal_id));
        buf.extend_from_slice(&pad_right_gbk(&self.terminal_sim, widths.sim));
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VehicleRegistration {
        VehicleRegistration {
            platform_id: "Plat1".into(),
            producer_id: "Prod1".into(),
            terminal_model: "Model1".into(),
            imei: "IMEI1".into(),
            terminal_id: "TID1".into(),
            terminal_sim: "SIM1".into(),
        }
    }

    #[test]
    fn roundtrip_2011() {
        let payload = sample().encode(ProtocolEdition::V2011);
        assert_eq!(payload.len(), 76);
        let parsed = VehicleRegistration::decode(payload, ProtocolEdition::V2011).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn roundtrip_2019() {
        let payload = sample().encode(ProtocolEdition::V2019);
        assert_eq!(payload.len(), 125);
        let parsed = VehicleRegistration::decode(payload, ProtocolEdition::V2019).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn edition_mismatch_rejected() {
        let payload = sample().encode(ProtocolEdition::V2011);
        assert!(matches!(
            VehicleRegistration::decode(payload, ProtocolEdition::V2019),
            Err(Error::RegistrationSize { .. })
        ));
    }

    #[test]
    fn edition_inferred_from_len() {
        assert_eq!(
            VehicleRegistration::edition_for_len(76).unwrap(),
            ProtocolEdition::V2011
        );
        assert_eq!(
            VehicleRegistration::edition_for_len(125).unwrap(),
            ProtocolEdition::V2019
        );
        assert!(VehicleRegistration::edition_for_len(100).is_err());
    }
}
