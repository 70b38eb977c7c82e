//! The fixed-size message header.
//!
//! Every frame is exactly [`MSGHDR_SIZE`] header bytes followed by `psize`
//! payload bytes. Multi-byte fields (`magic`, `token`, `psize`) are network
//! byte order on the wire; the struct holds them in host order.
//!
//! Layout:
//!
//! | Offset | Size | Field   |
//! |--------|------|---------|
//! | 0      | 2    | magic   |
//! | 2      | 1    | msgtype |
//! | 3      | 1    | sotype  |
//! | 4      | 1    | errcode |
//! | 5      | 4    | token   |
//! | 9      | 2    | psize   |
//! | 11     | 1    | flags   |

use crate::{ErrorCode, MsgType, SessionType, MAGIC, MSGHDR_SIZE};

/// A decoded message header.
///
/// The numeric fields are kept raw so that any frame with a valid magic can
/// round-trip through the codec (monitors forward frames verbatim); typed
/// views are available through [`MsgHdr::msg_type`] and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgHdr {
    pub msgtype: u8,
    pub sotype: u8,
    pub errcode: u8,
    pub token: u32,
    pub psize: u16,
    pub flags: u8,
}

/// Error decoding a header from raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// The first two bytes were not the busybus magic.
    BadMagic(u16),
    /// Fewer than [`MSGHDR_SIZE`] bytes available.
    Truncated(usize),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderError::BadMagic(m) => write!(f, "bad magic number: {m:#06x}"),
            HeaderError::Truncated(n) => {
                write!(f, "truncated header: {n} bytes, need {MSGHDR_SIZE}")
            }
        }
    }
}

impl std::error::Error for HeaderError {}

impl MsgHdr {
    /// Create a header for the given message type and error code, all other
    /// fields zeroed.
    pub fn new(msgtype: MsgType, errcode: ErrorCode) -> Self {
        Self {
            msgtype: msgtype as u8,
            errcode: errcode as u8,
            ..Self::default()
        }
    }

    /// Typed view of the `msgtype` field.
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_u8(self.msgtype)
    }

    /// Typed view of the `sotype` field. `None` when zero or unknown.
    pub fn session_type(&self) -> Option<SessionType> {
        SessionType::from_u8(self.sotype)
    }

    /// Typed view of the `errcode` field.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_u8(self.errcode)
    }

    /// Set the payload size, capping at `u16::MAX`.
    pub fn set_psize(&mut self, size: usize) {
        self.psize = size.min(u16::MAX as usize) as u16;
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u8) {
        self.flags |= flag;
    }

    /// Serialize to the exact 12-byte wire shape.
    pub fn to_bytes(&self) -> [u8; MSGHDR_SIZE] {
        let mut b = [0u8; MSGHDR_SIZE];
        b[0..2].copy_from_slice(&MAGIC.to_be_bytes());
        b[2] = self.msgtype;
        b[3] = self.sotype;
        b[4] = self.errcode;
        b[5..9].copy_from_slice(&self.token.to_be_bytes());
        b[9..11].copy_from_slice(&self.psize.to_be_bytes());
        b[11] = self.flags;
        b
    }

    /// Deserialize from wire bytes, validating the magic.
    pub fn from_bytes(b: &[u8]) -> Result<Self, HeaderError> {
        if b.len() < MSGHDR_SIZE {
            return Err(HeaderError::Truncated(b.len()));
        }
        let magic = u16::from_be_bytes([b[0], b[1]]);
        if magic != MAGIC {
            return Err(HeaderError::BadMagic(magic));
        }
        Ok(Self {
            msgtype: b[2],
            sotype: b[3],
            errcode: b[4],
            token: u32::from_be_bytes([b[5], b[6], b[7], b[8]]),
            psize: u16::from_be_bytes([b[9], b[10]]),
            flags: b[11],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags;

    #[test]
    fn header_bytes_are_exact() {
        let mut hdr = MsgHdr::new(MsgType::MethodCall, ErrorCode::Good);
        hdr.token = 0x11223344;
        hdr.set_psize(9);
        hdr.set_flag(flags::HAS_META);

        assert_eq!(
            hdr.to_bytes(),
            [0xBB, 0xC5, 0x07, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44, 0x00, 0x09, 0x01],
        );
    }

    #[test]
    fn header_roundtrip() {
        let mut hdr = MsgHdr::new(MsgType::ProviderReply, ErrorCode::MethodError);
        hdr.sotype = SessionType::Provider as u8;
        hdr.token = u32::MAX;
        hdr.set_psize(4096);
        hdr.set_flag(flags::HAS_META);
        hdr.set_flag(flags::HAS_OBJECT);

        let decoded = MsgHdr::from_bytes(&hdr.to_bytes()).unwrap();
        assert_eq!(decoded, hdr);
        assert_eq!(decoded.msg_type(), Some(MsgType::ProviderReply));
        assert_eq!(decoded.session_type(), Some(SessionType::Provider));
        assert_eq!(decoded.error_code(), Some(ErrorCode::MethodError));
    }

    #[test]
    fn psize_is_capped() {
        let mut hdr = MsgHdr::new(MsgType::MethodCall, ErrorCode::Good);
        hdr.set_psize(2 * u16::MAX as usize);
        assert_eq!(hdr.psize, u16::MAX);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut b = MsgHdr::new(MsgType::Close, ErrorCode::Good).to_bytes();
        b[0] = 0x00;
        b[1] = 0x00;
        assert_eq!(MsgHdr::from_bytes(&b), Err(HeaderError::BadMagic(0)));
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert_eq!(MsgHdr::from_bytes(&[0xBB]), Err(HeaderError::Truncated(1)));
    }

    #[test]
    fn unknown_discriminants_decode_as_none() {
        let mut hdr = MsgHdr::new(MsgType::Close, ErrorCode::Good);
        hdr.msgtype = 200;
        hdr.errcode = 99;
        let decoded = MsgHdr::from_bytes(&hdr.to_bytes()).unwrap();
        assert_eq!(decoded.msg_type(), None);
        assert_eq!(decoded.error_code(), None);
        assert_eq!(decoded.session_type(), None);
    }
}
