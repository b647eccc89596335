use bytes::{Buf, Bytes};

use crate::dis::pdu_error::DecodeError;


macro_rules! read_impl {
    ($reader: ident, $ty:ty, $getter: ident) => {
        fn $reader(&mut self, field: &'static str) -> Result<$ty, DecodeError> {
            self.ensure_remaining(std::mem::size_of::<$ty>(), field)?;
            Ok(self.$getter())
        }
    }
}


/// Bounds-checked reads for wire decoding. All multi-byte values are network byte order (BE),
///  as DIS requires.
///
/// The `field` names what was being read, it ends up in the [DecodeError] for diagnostics.
pub trait WireBufExt: Buf {
    fn ensure_remaining(&self, needed: usize, field: &'static str) -> Result<(), DecodeError> {
        if self.remaining() < needed {
            return Err(DecodeError::Truncated {
                field,
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    read_impl!(read_u8, u8, get_u8);
    read_impl!(read_u16, u16, get_u16);
    read_impl!(read_u32, u32, get_u32);

    fn read_bytes(&mut self, len: usize, field: &'static str) -> Result<Bytes, DecodeError> {
        self.ensure_remaining(len, field)?;
        Ok(self.copy_to_bytes(len))
    }

    fn skip_bytes(&mut self, len: usize, field: &'static str) -> Result<(), DecodeError> {
        self.ensure_remaining(len, field)?;
        self.advance(len);
        Ok(())
    }
}

impl <T: Buf> WireBufExt for T {
}
