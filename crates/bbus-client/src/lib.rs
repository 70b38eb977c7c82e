#![deny(unsafe_code)]

//! Client library for the busybus daemon.
//!
//! Four session types, one struct each: [`Caller`] invokes methods by dotted
//! path, [`Service`] publishes methods and answers forwarded calls,
//! [`Monitor`] receives a copy of every frame the daemon routes, and
//! [`Control`] issues daemon commands.
//!
//! All connections are blocking from the application's point of view: a
//! call sends its frame and then awaits the matching reply on the same
//! socket. Each connection owns its socket, so independent tasks or threads
//! each open their own.

mod caller;
mod control;
mod monitor;
mod service;
mod session;

pub use caller::Caller;
pub use control::Control;
pub use monitor::Monitor;
pub use service::{ListenOutcome, MethodDef, MethodHandler, Service};

use std::io;

use bbus_wire::{MsgError, ObjectError};

/// Error from any client-library operation.
#[derive(Debug)]
pub enum ClientError {
    /// Transport failure.
    Io(io::Error),
    /// The peer hung up.
    ConnectionClosed,
    /// The daemon rejected the session open.
    Rejected,
    /// No reply arrived within the handshake deadline.
    Timeout,
    /// A reply carried a message type that makes no sense here.
    UnexpectedMessage(u8),
    /// The daemon knows no method under the requested path.
    NoMethod,
    /// The method was found but failed.
    MethodError,
    /// Registration or unregistration failed.
    RegisterError,
    /// A reply was missing its meta or object.
    MalformedMessage,
    /// Object codec failure.
    Object(ObjectError),
    /// Frame assembly failure (oversized payload, bad meta).
    Message(MsgError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Io(e) => write!(f, "io error: {e}"),
            ClientError::ConnectionClosed => write!(f, "connection closed"),
            ClientError::Rejected => write!(f, "session open rejected"),
            ClientError::Timeout => write!(f, "timed out waiting for the daemon"),
            ClientError::UnexpectedMessage(t) => write!(f, "unexpected message type {t}"),
            ClientError::NoMethod => write!(f, "no such method"),
            ClientError::MethodError => write!(f, "error calling method"),
            ClientError::RegisterError => write!(f, "error registering method"),
            ClientError::MalformedMessage => write!(f, "malformed message"),
            ClientError::Object(e) => write!(f, "object error: {e}"),
            ClientError::Message(e) => write!(f, "message error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Io(e) => Some(e),
            ClientError::Object(e) => Some(e),
            ClientError::Message(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => ClientError::ConnectionClosed,
            _ => ClientError::Io(e),
        }
    }
}

impl From<ObjectError> for ClientError {
    fn from(e: ObjectError) -> Self {
        ClientError::Object(e)
    }
}

impl From<MsgError> for ClientError {
    fn from(e: MsgError) -> Self {
        ClientError::Message(e)
    }
}
