//! Method-calling client.

use std::path::Path;

use bbus_stream::FrameIo;
use bbus_wire::{ErrorCode, Msg, MsgHdr, MsgType, Object, SessionType};
use tokio::net::UnixStream;

use crate::session::{close_session, open_session};
use crate::ClientError;

/// A caller session: invokes methods by dotted path and blocks for the
/// reply.
pub struct Caller {
    io: FrameIo<UnixStream>,
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller").finish_non_exhaustive()
    }
}

impl Caller {
    /// Connect to the bus under the given connection name.
    pub async fn connect(name: &str) -> Result<Self, ClientError> {
        Self::connect_with_path(name, None).await
    }

    /// Connect through an explicit socket path instead of the resolved one.
    pub async fn connect_with_path(name: &str, path: Option<&Path>) -> Result<Self, ClientError> {
        let io = open_session(path, SessionType::Caller, name).await?;
        Ok(Self { io })
    }

    /// Call `method` with `arg`, waiting for the reply.
    ///
    /// On success the returned object is the method's result. Daemon-side
    /// failures surface as [`ClientError::NoMethod`],
    /// [`ClientError::MethodError`], or [`ClientError::RegisterError`]
    /// according to the reply's error code.
    pub async fn call(&mut self, method: &str, arg: &Object) -> Result<Object, ClientError> {
        let hdr = MsgHdr::new(MsgType::MethodCall, ErrorCode::Good);
        self.io.send(&Msg::compose(hdr, Some(method), Some(arg))?).await?;

        let reply = self.io.recv().await?.ok_or(ClientError::ConnectionClosed)?;
        if reply.hdr.msg_type() != Some(MsgType::MethodReply) {
            return Err(ClientError::UnexpectedMessage(reply.hdr.msgtype));
        }
        match reply.hdr.error_code() {
            Some(ErrorCode::Good) => reply.object().ok_or(ClientError::MalformedMessage),
            Some(ErrorCode::NoMethod) => Err(ClientError::NoMethod),
            Some(ErrorCode::MethodError) => Err(ClientError::MethodError),
            Some(ErrorCode::RegisterError) => Err(ClientError::RegisterError),
            None => Err(ClientError::MalformedMessage),
        }
    }

    /// Close the session gracefully.
    pub async fn close(mut self) -> Result<(), ClientError> {
        close_session(&mut self.io).await
    }
}
