#![deny(unsafe_code)]

//! Framed transport for the busybus protocol.
//!
//! [`FrameIo`] sends and receives whole frames (12-byte header + payload)
//! over any async byte stream; the [`socket`] module provides the unix
//! socket primitives (listen with stale-file cleanup, accept with peer
//! credentials, connect) and socket-path resolution.

pub mod framing;
pub mod socket;

pub use framing::FrameIo;
pub use socket::{connect, resolve_socket_path, BusListener, Peer};
pub use socket::{DEFAULT_SOCKET_PATH, SOCKPATH_ENV};
