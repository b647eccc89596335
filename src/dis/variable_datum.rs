use std::fmt::{Debug, Formatter};

use bytes::{Buf, BufMut, Bytes};

use crate::dis::pdu_error::{DatumError, DecodeError};
use crate::util::buf_ext::WireBufExt;
use crate::util::safe_converter::{PrecheckedCast, SafeCast};

/// Datum id of the record carrying the sender's display name (UTF-8).
pub const DATUM_ID_DISPLAY_NAME: u32 = 600_001;
/// Datum id of the record carrying the chat message text (UTF-8).
pub const DATUM_ID_MESSAGE_TEXT: u32 = 600_002;

/// Variable datum records are padded to a multiple of 64 bits on the wire
pub const PADDING_ALIGNMENT: usize = 8;

/// A variable datum record: an application defined id and an opaque payload.
///
/// On the wire, a record looks like this:
///
/// ```ascii
/// 0: datum id (u32)
/// 4: payload length in *bits* (u32)
/// 8: payload, zero-padded to a multiple of 8 bytes
/// ```
///
/// There is no terminator, the length field is authoritative for the payload.
#[derive(Clone, Eq, PartialEq)]
pub struct VariableDatum {
    pub id: u32,
    pub payload: Bytes,
}

impl Debug for VariableDatum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "VariableDatum{{id:{}, {} bytes}}", self.id, self.payload.len())
    }
}

impl VariableDatum {
    pub const HEADER_LEN: usize = 8;

    pub fn new(id: u32, payload: impl Into<Bytes>) -> VariableDatum {
        VariableDatum {
            id,
            payload: payload.into(),
        }
    }

    pub fn from_text(id: u32, text: &str) -> VariableDatum {
        Self::new(id, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// NB: the caller must ensure that the payload is small enough for the length in bits to
    ///  fit into a u32, which is always the case for records inside a PDU of at most 64k
    pub fn length_in_bits(&self) -> u32 {
        let bits: u32 = self.payload.len().prechecked_cast();
        bits * 8
    }

    pub fn padded_payload_len(payload_len: usize) -> usize {
        payload_len.div_ceil(PADDING_ALIGNMENT) * PADDING_ALIGNMENT
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + Self::padded_payload_len(self.payload.len())
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.id);
        buf.put_u32(self.length_in_bits());
        buf.put_slice(&self.payload);
        buf.put_bytes(0, Self::padded_payload_len(self.payload.len()) - self.payload.len());
    }

    /// Reads a single record. The outer result is about framing: if a record does not fit into
    ///  the buffer, nothing after it can be located either, and the whole PDU is unusable. The
    ///  inner result is about the record itself - if its declared length disagrees with its
    ///  payload, the record is consumed and rejected, and the caller can go on with the next one.
    pub fn try_deser(buf: &mut impl Buf) -> Result<Result<VariableDatum, DatumError>, DecodeError> {
        let id = buf.read_u32("variable datum id")?;
        let declared_bits = buf.read_u32("variable datum length")?;

        let declared_bytes: usize = declared_bits.div_ceil(8).safe_cast();
        let payload = buf.read_bytes(declared_bytes, "variable datum payload")?;

        // the final record's padding is sometimes left out by senders, so this is lenient
        let padding_len = (Self::padded_payload_len(declared_bytes) - declared_bytes).min(buf.remaining());
        let padding = buf.copy_to_bytes(padding_len);

        if declared_bits % 8 != 0 {
            return Ok(Err(DatumError::UnalignedLength { id, declared_bits }));
        }
        if Self::is_text_datum(id) {
            // text is never NUL terminated, so trailing NULs are padding the declared length covers
            let text_len = payload.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
            if text_len < declared_bytes {
                return Ok(Err(DatumError::DeclaredLengthExceedsPayload { id, declared_bytes, payload_bytes: text_len }));
            }
        }
        if padding.iter().any(|&b| b != 0) {
            return Ok(Err(DatumError::PayloadExceedsDeclaredLength { id, declared_bytes }));
        }

        Ok(Ok(VariableDatum { id, payload }))
    }

    fn is_text_datum(id: u32) -> bool {
        id == DATUM_ID_DISPLAY_NAME || id == DATUM_ID_MESSAGE_TEXT
    }

    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
