//! Passive traffic monitor.

use std::path::Path;

use bbus_stream::FrameIo;
use bbus_wire::{Msg, SessionType};
use tokio::net::UnixStream;

use crate::session::{close_session, open_session};
use crate::ClientError;

/// A monitor session: receives a verbatim copy of every frame the daemon
/// routes, in observation order. Monitors send nothing but the final close.
pub struct Monitor {
    io: FrameIo<UnixStream>,
}

impl Monitor {
    pub async fn connect(name: &str) -> Result<Self, ClientError> {
        Self::connect_with_path(name, None).await
    }

    pub async fn connect_with_path(name: &str, path: Option<&Path>) -> Result<Self, ClientError> {
        let io = open_session(path, SessionType::Monitor, name).await?;
        Ok(Self { io })
    }

    /// The next observed frame.
    pub async fn next(&mut self) -> Result<Msg, ClientError> {
        self.io.recv().await?.ok_or(ClientError::ConnectionClosed)
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        close_session(&mut self.io).await
    }
}
