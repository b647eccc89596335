use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, trace, warn};

use crate::dis::entity_id::EntityId;
use crate::dis::pdu_error::{DatumError, DecodeError, EncodeError};
use crate::dis::pdu_header::{PduHeader, PduType};
use crate::dis::variable_datum::{VariableDatum, PADDING_ALIGNMENT};
use crate::util::buf_ext::WireBufExt;
use crate::util::safe_converter::{PrecheckedCast, SafeCast};

/// Fixed datum records are (id: u32, value: u32). They are never sent by chat peers, but they
///  may be present in Comment PDUs from other applications and must be skipped.
const FIXED_DATUM_LEN: usize = 8;

/// A Comment PDU (simulation management family). The layout after the [PduHeader]:
///
/// ```ascii
/// 0:  originating entity id (3 x u16)
/// 6:  receiving entity id (3 x u16)
/// 12: number of fixed datum records (u32) - always 0 when sending
/// 16: number of variable datum records (u32)
/// 20: fixed datum records, 8 bytes each
/// *:  variable datum records, see [VariableDatum]
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CommentPdu {
    pub exercise_id: u8,
    pub timestamp: u32,
    pub originating_id: EntityId,
    pub receiving_id: EntityId,
    pub variable_datums: Vec<VariableDatum>,
}

impl CommentPdu {
    const BODY_FIXED_LEN: usize = 2 * EntityId::SERIALIZED_LEN + 4 + 4;
    pub const MIN_LEN: usize = PduHeader::SERIALIZED_LEN + Self::BODY_FIXED_LEN;
    pub const MAX_LEN: usize = u16::MAX as usize;

    pub fn serialized_len(&self) -> usize {
        Self::MIN_LEN + self.variable_datums.iter()
            .map(|d| d.serialized_len())
            .sum::<usize>()
    }

    /// Serializes the PDU into a single frame. The header's length field is the exact number of
    ///  bytes of the frame, so that receivers can recover the frame's length independently.
    pub fn encode(&self) -> Result<BytesMut, EncodeError> {
        let len = self.serialized_len();
        if len > Self::MAX_LEN {
            return Err(EncodeError::TooLarge { len, max: Self::MAX_LEN });
        }

        let mut buf = BytesMut::with_capacity(len);
        PduHeader::new_comment(self.exercise_id, self.timestamp, len.prechecked_cast())
            .ser(&mut buf);

        self.originating_id.ser(&mut buf);
        self.receiving_id.ser(&mut buf);
        buf.put_u32(0);
        buf.put_u32(self.variable_datums.len().prechecked_cast());
        for datum in &self.variable_datums {
            datum.ser(&mut buf);
        }

        Ok(buf)
    }

    pub fn datum(&self, id: u32) -> Option<&VariableDatum> {
        self.variable_datums.iter()
            .rev()
            .find(|d| d.id == id)
    }
}

/// A Comment PDU as received, with the records that had to be rejected while decoding it
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DecodedComment {
    pub header: PduHeader,
    pub pdu: CommentPdu,
    pub rejected_datums: Vec<DatumError>,
}

/// The result of decoding a datagram. Peers on a DIS network send all kinds of PDUs, and
///  anything other than a Comment PDU is of no interest - that is not an error.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DecodedPdu {
    Comment(DecodedComment),
    Ignored(PduHeader),
}

impl DecodedPdu {
    pub fn header(&self) -> &PduHeader {
        match self {
            DecodedPdu::Comment(c) => &c.header,
            DecodedPdu::Ignored(h) => h,
        }
    }

    /// Decodes a datagram. This never reads past the datagram, and it never panics on malformed
    ///  input.
    pub fn decode(datagram: &[u8]) -> Result<DecodedPdu, DecodeError> {
        let mut buf = datagram;
        let header = PduHeader::try_deser(&mut buf)?;

        match header.known_pdu_type() {
            Some(PduType::Comment) => {}
            other => {
                trace!(pdu_type = header.pdu_type, known = ?other, "ignoring PDU");
                return Ok(DecodedPdu::Ignored(header));
            }
        }

        let declared_len: usize = header.length.safe_cast();
        if declared_len < CommentPdu::MIN_LEN {
            return Err(DecodeError::LengthTooShort { declared: declared_len, minimum: CommentPdu::MIN_LEN });
        }
        if declared_len > datagram.len() {
            return Err(DecodeError::LengthExceedsDatagram { declared: declared_len, actual: datagram.len() });
        }
        if declared_len < datagram.len() {
            trace!("ignoring {} bytes after the end of the PDU", datagram.len() - declared_len);
        }

        let mut body = &datagram[PduHeader::SERIALIZED_LEN..declared_len];

        let originating_id = EntityId::try_deser(&mut body)?;
        let receiving_id = EntityId::try_deser(&mut body)?;
        let num_fixed: usize = body.read_u32("number of fixed datum records")?.safe_cast();
        let num_variable: usize = body.read_u32("number of variable datum records")?.safe_cast();

        body.skip_bytes(num_fixed.saturating_mul(FIXED_DATUM_LEN), "fixed datum records")?;

        let records = body;
        let mut pos = 0;
        let mut variable_datums = Vec::new();
        let mut rejected_datums = Vec::new();
        for i in 0..num_variable {
            let mut rest = &records[pos..];
            let datum = VariableDatum::try_deser(&mut rest)?;
            let consumed_end = records.len() - rest.len();
            match datum {
                Ok(datum) => {
                    variable_datums.push(datum);
                    pos = consumed_end;
                }
                Err(e) => {
                    warn!(from = %originating_id, "rejecting variable datum record: {}", e);
                    rejected_datums.push(e);
                    pos = realign(records, pos, consumed_end, num_variable - i - 1);
                }
            }
        }
        body = &records[pos..];

        if body.has_remaining() {
            trace!("ignoring {} bytes after the last variable datum record", body.remaining());
        }

        Ok(DecodedPdu::Comment(DecodedComment {
            pdu: CommentPdu {
                exercise_id: header.exercise_id,
                timestamp: header.timestamp,
                originating_id,
                receiving_id,
                variable_datums,
            },
            header,
            rejected_datums,
        }))
    }
}

/// After a rejected record, its declared length cannot be trusted to locate the next record. If
///  the remaining records do not end exactly at the end of the PDU when read from where the
///  declared length says, the next record is assumed to start at the first 8 byte boundary within
///  the rejected record's span from which they do. Without such a boundary, decoding goes on
///  where the declared length says.
fn realign(records: &[u8], record_start: usize, consumed_end: usize, num_remaining: usize) -> usize {
    if records_end_exactly(&records[consumed_end..], num_remaining) {
        return consumed_end;
    }

    let realigned = (record_start + VariableDatum::HEADER_LEN..consumed_end)
        .step_by(PADDING_ALIGNMENT)
        .find(|&candidate| records_end_exactly(&records[candidate..], num_remaining));

    match realigned {
        Some(candidate) => {
            debug!("resuming with the next variable datum record at offset {} instead of {}", candidate, consumed_end);
            candidate
        }
        None => consumed_end,
    }
}

fn records_end_exactly(mut buf: &[u8], num_records: usize) -> bool {
    for _ in 0..num_records {
        if VariableDatum::try_deser(&mut buf).is_err() {
            return false;
        }
    }
    !buf.has_remaining()
}
