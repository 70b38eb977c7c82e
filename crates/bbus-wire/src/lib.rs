#![deny(unsafe_code)]

//! Wire-level types for the busybus protocol.
//!
//! Everything that crosses the socket is defined here: the fixed 12-byte
//! message header ([`MsgHdr`]), the message model with meta/object payload
//! extraction ([`Msg`]), and the typed-object codec ([`Object`]) driven by
//! the description grammar (`i`, `u`, `b`, `s`, `A item`, `( item+ )`).
//!
//! This crate is pure: no I/O, no async. Transports live in `bbus-stream`.

pub mod header;
pub mod message;
pub mod object;

pub use header::{HeaderError, MsgHdr};
pub use message::{Msg, MsgError};
pub use object::{descr_valid, Object, ObjectError, Value};

/// Magic number carried in the first two bytes of every frame.
pub const MAGIC: u16 = 0xBBC5;

/// Size of the serialized message header in bytes.
pub const MSGHDR_SIZE: usize = 12;

/// Biggest allowed payload (meta + object bytes).
pub const MAX_PAYLOAD: usize = 4096;

/// Biggest allowed frame: header plus a full payload.
pub const MAX_FRAME: usize = MSGHDR_SIZE + MAX_PAYLOAD;

/// Connection names longer than this are truncated by the daemon.
pub const MAX_NAME: usize = 32;

/// Message type carried in the `msgtype` header field.
///
/// Discriminants are wire-significant.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Open a session; `sotype` names the client type, meta is the name.
    SessionOpen = 1,
    /// Session accepted.
    SessionOpenOk = 2,
    /// Session rejected; the peer should close.
    SessionOpenReject = 3,
    /// Provider publishes a method; meta is the registration descriptor.
    RegisterMethod = 4,
    /// Provider withdraws a method.
    UnregisterMethod = 5,
    /// Daemon acknowledges (un)registration; `errcode` carries the outcome.
    RegisterAck = 6,
    /// Caller invokes a method; meta is the dotted path, object the argument.
    MethodCall = 7,
    /// Daemon answers a caller; `errcode` carries the outcome.
    MethodReply = 8,
    /// Reserved: caller-originated signal. Not routed.
    ClientSignal = 9,
    /// Daemon forwards a call to a provider; meta is the leaf method name.
    ProviderCall = 10,
    /// Provider answers a forwarded call; token correlates.
    ProviderReply = 11,
    /// Reserved: provider-originated signal. Not routed.
    ProviderSignal = 12,
    /// Graceful session close, either direction.
    Close = 13,
    /// Control command; meta selects the command.
    Control = 14,
    /// Reserved: explicit monitor frame. Monitors receive verbatim copies.
    Monitor = 15,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<MsgType> {
        Some(match v {
            1 => MsgType::SessionOpen,
            2 => MsgType::SessionOpenOk,
            3 => MsgType::SessionOpenReject,
            4 => MsgType::RegisterMethod,
            5 => MsgType::UnregisterMethod,
            6 => MsgType::RegisterAck,
            7 => MsgType::MethodCall,
            8 => MsgType::MethodReply,
            9 => MsgType::ClientSignal,
            10 => MsgType::ProviderCall,
            11 => MsgType::ProviderReply,
            12 => MsgType::ProviderSignal,
            13 => MsgType::Close,
            14 => MsgType::Control,
            15 => MsgType::Monitor,
            _ => return None,
        })
    }
}

/// Session-open type carried in the `sotype` header field.
///
/// Zero means "not a session-open frame"; [`MsgHdr::session_type`] returns
/// `None` for it.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionType {
    Caller = 1,
    Provider = 2,
    Monitor = 3,
    Control = 4,
}

impl SessionType {
    pub fn from_u8(v: u8) -> Option<SessionType> {
        Some(match v {
            1 => SessionType::Caller,
            2 => SessionType::Provider,
            3 => SessionType::Monitor,
            4 => SessionType::Control,
            _ => return None,
        })
    }
}

/// Protocol error code carried in the `errcode` header field.
///
/// Meaningful on replies (`MethodReply`, `RegisterAck`, `Control`).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Success.
    Good = 0,
    /// No method registered under the requested path.
    NoMethod = 1,
    /// The method was found but failed.
    MethodError = 2,
    /// Registration or unregistration failed.
    RegisterError = 3,
}

impl ErrorCode {
    pub fn from_u8(v: u8) -> Option<ErrorCode> {
        Some(match v {
            0 => ErrorCode::Good,
            1 => ErrorCode::NoMethod,
            2 => ErrorCode::MethodError,
            3 => ErrorCode::RegisterError,
            _ => return None,
        })
    }
}

/// Bits for the `flags` header field.
pub mod flags {
    /// Payload begins with a NUL-terminated meta string.
    pub const HAS_META: u8 = 1 << 0;

    /// Payload carries object bytes after the optional meta.
    pub const HAS_OBJECT: u8 = 1 << 1;
}
