//! A whole message: header plus payload.
//!
//! When `HAS_META` is set the payload begins with a NUL-terminated meta
//! string; when `HAS_OBJECT` is set the remainder (after the optional meta)
//! is an object's raw bytes. [`Msg::compose`] assembles the payload and sets
//! flags and `psize` consistently; the extraction helpers mirror it on the
//! receive side.

use crate::{flags, MsgHdr, Object, MAX_PAYLOAD};

/// Error assembling a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgError {
    /// Meta plus object bytes exceed [`MAX_PAYLOAD`].
    PayloadTooLarge(usize),
    /// The meta string contained an interior NUL byte.
    MetaInteriorNul,
}

impl std::fmt::Display for MsgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgError::PayloadTooLarge(n) => {
                write!(f, "payload of {n} bytes exceeds the {MAX_PAYLOAD}-byte limit")
            }
            MsgError::MetaInteriorNul => write!(f, "meta string contains an interior NUL byte"),
        }
    }
}

impl std::error::Error for MsgError {}

/// An owned message, as sent or received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub hdr: MsgHdr,
    pub payload: Vec<u8>,
}

impl Msg {
    /// Assemble a message from optional meta and object, setting the payload
    /// flags and `psize` on the header.
    pub fn compose(mut hdr: MsgHdr, meta: Option<&str>, obj: Option<&Object>) -> Result<Msg, MsgError> {
        let meta_len = match meta {
            Some(m) if m.as_bytes().contains(&0) => return Err(MsgError::MetaInteriorNul),
            Some(m) => m.len() + 1,
            None => 0,
        };
        let obj_len = obj.map_or(0, Object::raw_len);
        let total = meta_len + obj_len;
        if total > MAX_PAYLOAD {
            return Err(MsgError::PayloadTooLarge(total));
        }

        let mut payload = Vec::with_capacity(total);
        if let Some(m) = meta {
            payload.extend_from_slice(m.as_bytes());
            payload.push(0);
            hdr.set_flag(flags::HAS_META);
        }
        if let Some(o) = obj {
            payload.extend_from_slice(o.raw());
            hdr.set_flag(flags::HAS_OBJECT);
        }
        hdr.set_psize(total);

        Ok(Msg { hdr, payload })
    }

    /// A header-only message.
    pub fn bare(hdr: MsgHdr) -> Msg {
        Msg {
            hdr,
            payload: Vec::new(),
        }
    }

    /// The meta string, if `HAS_META` is set and a NUL terminator is present
    /// within the payload.
    pub fn meta(&self) -> Option<&str> {
        if !self.hdr.has_flag(flags::HAS_META) {
            return None;
        }
        let nul = self.payload.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&self.payload[..nul]).ok()
    }

    /// The object bytes, if `HAS_OBJECT` is set (and the meta, when flagged,
    /// is well-formed).
    pub fn object_bytes(&self) -> Option<&[u8]> {
        if !self.hdr.has_flag(flags::HAS_OBJECT) {
            return None;
        }
        let start = if self.hdr.has_flag(flags::HAS_META) {
            self.payload.iter().position(|b| *b == 0)? + 1
        } else {
            0
        };
        self.payload.get(start..)
    }

    /// A fresh object built from the payload's object bytes.
    pub fn object(&self) -> Option<Object> {
        self.object_bytes().map(Object::from_bytes)
    }

    /// The full frame: header bytes followed by the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(crate::MSGHDR_SIZE + self.payload.len());
        out.extend_from_slice(&self.hdr.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}
