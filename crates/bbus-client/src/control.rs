//! Control client for daemon administration.

use std::path::Path;

use bbus_stream::FrameIo;
use bbus_wire::{ErrorCode, Msg, MsgHdr, MsgType, SessionType};
use tokio::net::UnixStream;

use crate::session::{close_session, open_session};
use crate::ClientError;

/// A control session: issues daemon commands and reads their replies.
pub struct Control {
    io: FrameIo<UnixStream>,
}

impl Control {
    pub async fn connect(name: &str) -> Result<Self, ClientError> {
        Self::connect_with_path(name, None).await
    }

    pub async fn connect_with_path(name: &str, path: Option<&Path>) -> Result<Self, ClientError> {
        let io = open_session(path, SessionType::Control, name).await?;
        Ok(Self { io })
    }

    async fn command(&mut self, cmd: &str) -> Result<Msg, ClientError> {
        let hdr = MsgHdr::new(MsgType::Control, ErrorCode::Good);
        self.io.send(&Msg::compose(hdr, Some(cmd), None)?).await?;

        let reply = self.io.recv().await?.ok_or(ClientError::ConnectionClosed)?;
        if reply.hdr.msg_type() != Some(MsgType::Control) {
            return Err(ClientError::UnexpectedMessage(reply.hdr.msgtype));
        }
        match reply.hdr.error_code() {
            Some(ErrorCode::Good) => Ok(reply),
            Some(ErrorCode::NoMethod) => Err(ClientError::NoMethod),
            _ => Err(ClientError::MethodError),
        }
    }

    fn string_array(reply: &Msg) -> Result<Vec<String>, ClientError> {
        let mut obj = reply.object().ok_or(ClientError::MalformedMessage)?;
        let n = obj.extract_array_len()?;
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(obj.extract_str()?);
        }
        Ok(out)
    }

    /// All registered method paths, sorted.
    pub async fn list_methods(&mut self) -> Result<Vec<String>, ClientError> {
        let reply = self.command("list-methods").await?;
        Self::string_array(&reply)
    }

    /// All connected clients, as `"<kind>:<name>"` strings.
    pub async fn list_clients(&mut self) -> Result<Vec<String>, ClientError> {
        let reply = self.command("list-clients").await?;
        Self::string_array(&reply)
    }

    /// Ask the daemon to shut down.
    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.command("shutdown").await.map(|_| ())
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        close_session(&mut self.io).await
    }
}
