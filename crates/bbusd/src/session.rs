//! Accepted-connection handling: the session-open handshake and the
//! per-client reader/writer tasks.
//!
//! After the handshake, a connection is split in two. The reader task
//! feeds every inbound frame to the router's event channel; the writer
//! task drains the client's bounded outbound queue. The router never
//! writes to a socket itself - a client that cannot keep up fills its
//! queue and the router's `try_send` fails immediately, which is what
//! keeps the routing loop from ever blocking on a slow peer.

use std::io;
use std::time::Duration;

use bbus_stream::{FrameIo, Peer};
use bbus_wire::{ErrorCode, Msg, MsgHdr, MsgType, SessionType, MAX_NAME};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AuthHook;
use crate::router::RouterEvent;

/// Daemon-internal session id, never reused within one daemon run.
pub type ClientId = u64;

/// How long a freshly accepted connection gets to complete its handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound frames queued per client before sends start failing.
const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Caller,
    Provider,
    Monitor,
    Control,
}

impl ClientKind {
    fn from_session_type(sotype: SessionType) -> ClientKind {
        match sotype {
            SessionType::Caller => ClientKind::Caller,
            SessionType::Provider => ClientKind::Provider,
            SessionType::Monitor => ClientKind::Monitor,
            SessionType::Control => ClientKind::Control,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClientKind::Caller => "caller",
            ClientKind::Provider => "provider",
            ClientKind::Monitor => "monitor",
            ClientKind::Control => "control",
        }
    }
}

/// The router's view of one live client.
pub struct ClientHandle {
    pub id: ClientId,
    pub kind: ClientKind,
    pub name: String,
    /// Correlation token, assigned by the router for callers; 0 otherwise.
    pub token: u32,
    pub peer: Peer,
    outbound: mpsc::Sender<Vec<u8>>,
    reader: JoinHandle<()>,
}

impl ClientHandle {
    /// Queue a frame for delivery. Fails immediately when the client's
    /// queue is full or its writer is gone; the router treats that as a
    /// failed send.
    pub fn try_send(&self, frame: Vec<u8>) -> bool {
        self.outbound.try_send(frame).is_ok()
    }

    /// Stop reading from this client. The writer drains whatever is queued
    /// and closes the socket once the handle (and with it the queue's
    /// sender) is dropped.
    pub fn stop(&self) {
        self.reader.abort();
    }
}

/// Why a handshake did not produce a session.
#[derive(Debug)]
pub enum HandshakeError {
    Io(io::Error),
    /// Peer closed before completing the handshake.
    Closed,
    /// No session-open frame within the deadline.
    TimedOut,
    /// First frame was not a well-formed session open.
    BadOpen,
    /// The credential hook rejected the peer.
    Unauthorized,
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::Io(e) => write!(f, "io error: {e}"),
            HandshakeError::Closed => write!(f, "peer closed during handshake"),
            HandshakeError::TimedOut => write!(f, "handshake timed out"),
            HandshakeError::BadOpen => write!(f, "invalid session-open frame"),
            HandshakeError::Unauthorized => write!(f, "peer credentials rejected"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Run the server side of the session-open handshake.
///
/// On success the `SOOK` confirmation has been sent and the connection is
/// ready for routing. On any failure a reject is sent when the transport
/// still allows it and the connection should be dropped.
pub async fn handshake(
    io: &mut FrameIo<UnixStream>,
    peer: &Peer,
    auth: Option<&AuthHook>,
) -> Result<(ClientKind, String), HandshakeError> {
    let msg = match io.recv_timeout(HANDSHAKE_TIMEOUT).await {
        Ok(Some(msg)) => msg,
        Ok(None) => return Err(HandshakeError::TimedOut),
        Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
            return Err(HandshakeError::Closed)
        }
        Err(e) => return Err(HandshakeError::Io(e)),
    };

    if msg.hdr.msg_type() != Some(MsgType::SessionOpen) {
        reject(io).await;
        return Err(HandshakeError::BadOpen);
    }
    let sotype = match msg.hdr.session_type() {
        Some(t) => t,
        None => {
            reject(io).await;
            return Err(HandshakeError::BadOpen);
        }
    };
    let name = match msg.meta() {
        Some(m) => truncate_name(m).to_owned(),
        None => {
            reject(io).await;
            return Err(HandshakeError::BadOpen);
        }
    };

    if let Some(hook) = auth {
        if !hook(peer) {
            reject(io).await;
            return Err(HandshakeError::Unauthorized);
        }
    }

    let ok = MsgHdr::new(MsgType::SessionOpenOk, ErrorCode::Good);
    io.send(&Msg::bare(ok)).await.map_err(HandshakeError::Io)?;

    Ok((ClientKind::from_session_type(sotype), name))
}

async fn reject(io: &mut FrameIo<UnixStream>) {
    let hdr = MsgHdr::new(MsgType::SessionOpenReject, ErrorCode::Good);
    if let Err(e) = io.send(&Msg::bare(hdr)).await {
        tracing::debug!(error = %e, "failed to send session-open reject");
    }
}

/// Cap a connection name at [`MAX_NAME`] bytes, on a char boundary.
fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME {
        return name;
    }
    let mut end = MAX_NAME;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Split a handshaken connection into reader/writer tasks and hand the
/// router its handle.
pub fn start_client(
    id: ClientId,
    kind: ClientKind,
    name: String,
    peer: Peer,
    io: FrameIo<UnixStream>,
    events: mpsc::Sender<RouterEvent>,
) -> ClientHandle {
    let (read_half, mut write_half) = io.into_inner().into_split();
    let (outbound, mut queue) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE);

    tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                tracing::debug!(client = id, error = %e, "write failed, dropping outbound queue");
                break;
            }
        }
    });

    let reader = tokio::spawn(async move {
        let mut io = FrameIo::new(read_half);
        loop {
            match io.recv().await {
                Ok(Some(msg)) => {
                    if events.send(RouterEvent::Inbound { id, msg }).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(client = id, error = %e, "receive failed");
                    break;
                }
            }
        }
        let _ = events.send(RouterEvent::Disconnected { id }).await;
    });

    ClientHandle {
        id,
        kind,
        name,
        token: 0,
        peer,
        outbound,
        reader,
    }
}
