use thiserror::Error;

/// A datagram that could not be decoded as a PDU at all. The datagram is dropped, and receiving
///  continues with the next one.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("truncated PDU: {field} needs {needed} bytes, only {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("PDU header declares a length of {declared} bytes, but the datagram has only {actual}")]
    LengthExceedsDatagram { declared: usize, actual: usize },

    #[error("PDU header declares a length of {declared} bytes, below the minimum of {minimum}")]
    LengthTooShort { declared: usize, minimum: usize },
}

/// A single variable datum record that was framed correctly but whose declared length does not
///  match its payload. Only the record is dropped, the PDU's other records are still decoded.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DatumError {
    #[error("variable datum {id}: declared length of {declared_bits} bits is not a whole number of bytes")]
    UnalignedLength { id: u32, declared_bits: u32 },

    #[error("variable datum {id}: payload runs past its declared length of {declared_bytes} bytes into the padding")]
    PayloadExceedsDeclaredLength { id: u32, declared_bytes: usize },

    #[error("variable datum {id}: declared length of {declared_bytes} bytes exceeds the {payload_bytes} bytes of text")]
    DeclaredLengthExceedsPayload {
        id: u32,
        declared_bytes: usize,
        payload_bytes: usize,
    },
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum EncodeError {
    #[error("encoded PDU would be {len} bytes, the length field allows at most {max}")]
    TooLarge { len: usize, max: usize },
}
