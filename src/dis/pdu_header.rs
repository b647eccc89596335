use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::dis::pdu_error::DecodeError;
use crate::util::buf_ext::WireBufExt;

/// IEEE 1278.1-1995, which is what DIS chat peers speak
pub const PROTOCOL_VERSION_DIS_6: u8 = 6;

/// The PDU kinds this crate knows by name. Only [PduType::Comment] is interpreted, everything
///  else is passed through as 'ignored' - the names are for logging.
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PduType {
    EntityState = 1,
    Fire = 2,
    Detonation = 3,
    Comment = 22,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ProtocolFamily {
    EntityInformation = 1,
    Warfare = 2,
    SimulationManagement = 5,
}

/// The fixed header at the start of every DIS PDU:
///
/// ```ascii
/// 0:  protocol version (u8)
/// 1:  exercise id (u8)
/// 2:  PDU type (u8)
/// 3:  protocol family (u8)
/// 4:  timestamp (u32), see [crate::dis::dis_time]
/// 8:  length of the entire PDU in bytes, including this header (u16)
/// 10: PDU status (u8)
/// 11: padding (u8)
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PduHeader {
    pub protocol_version: u8,
    pub exercise_id: u8,
    pub pdu_type: u8,
    pub protocol_family: u8,
    pub timestamp: u32,
    pub length: u16,
    pub status: u8,
}

impl PduHeader {
    pub const SERIALIZED_LEN: usize = 12;

    const OFFSET_LENGTH: usize = 8;

    pub fn new_comment(exercise_id: u8, timestamp: u32, length: u16) -> PduHeader {
        PduHeader {
            protocol_version: PROTOCOL_VERSION_DIS_6,
            exercise_id,
            pdu_type: PduType::Comment.into(),
            protocol_family: ProtocolFamily::SimulationManagement.into(),
            timestamp,
            length,
            status: 0,
        }
    }

    pub fn known_pdu_type(&self) -> Option<PduType> {
        PduType::try_from(self.pdu_type).ok()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.protocol_version);
        buf.put_u8(self.exercise_id);
        buf.put_u8(self.pdu_type);
        buf.put_u8(self.protocol_family);
        buf.put_u32(self.timestamp);
        buf.put_u16(self.length);
        buf.put_u8(self.status);
        buf.put_u8(0);
    }

    pub fn try_deser(buf: &mut impl Buf) -> Result<PduHeader, DecodeError> {
        buf.ensure_remaining(Self::SERIALIZED_LEN, "PDU header")?;

        let result = PduHeader {
            protocol_version: buf.get_u8(),
            exercise_id: buf.get_u8(),
            pdu_type: buf.get_u8(),
            protocol_family: buf.get_u8(),
            timestamp: buf.get_u32(),
            length: buf.get_u16(),
            status: buf.get_u8(),
        };
        let _padding = buf.get_u8();
        Ok(result)
    }

    /// Reads the declared PDU length from a serialized frame without decoding the rest
    pub fn declared_length(frame: &[u8]) -> Option<u16> {
        let mut raw = frame.get(Self::OFFSET_LENGTH..Self::OFFSET_LENGTH + 2)?;
        raw.read_u16("PDU length").ok()
    }
}
