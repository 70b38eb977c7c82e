//! The session-open handshake shared by all client types.

use std::path::Path;
use std::time::Duration;

use bbus_stream::{connect, resolve_socket_path, FrameIo};
use bbus_wire::{ErrorCode, Msg, MsgHdr, MsgType, SessionType};
use tokio::net::UnixStream;

use crate::ClientError;

/// How long to wait for the daemon's handshake reply.
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect, send `SO` with our session type and name, and await `SOOK`.
pub(crate) async fn open_session(
    path: Option<&Path>,
    sotype: SessionType,
    name: &str,
) -> Result<FrameIo<UnixStream>, ClientError> {
    let path = resolve_socket_path(path)?;
    let stream = connect(&path).await?;
    let mut io = FrameIo::new(stream);

    let mut hdr = MsgHdr::new(MsgType::SessionOpen, ErrorCode::Good);
    hdr.sotype = sotype as u8;
    io.send(&Msg::compose(hdr, Some(name), None)?).await?;

    let reply = io
        .recv_timeout(HANDSHAKE_TIMEOUT)
        .await?
        .ok_or(ClientError::Timeout)?;
    match reply.hdr.msg_type() {
        Some(MsgType::SessionOpenOk) => {
            tracing::debug!(?sotype, name, "session open");
            Ok(io)
        }
        Some(MsgType::SessionOpenReject) => Err(ClientError::Rejected),
        _ => Err(ClientError::UnexpectedMessage(reply.hdr.msgtype)),
    }
}

/// Send the graceful close message and drop the connection.
pub(crate) async fn close_session(io: &mut FrameIo<UnixStream>) -> Result<(), ClientError> {
    let hdr = MsgHdr::new(MsgType::Close, ErrorCode::Good);
    io.send(&Msg::bare(hdr)).await?;
    Ok(())
}
