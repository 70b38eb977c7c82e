//! Service-provider client: publishes methods and answers forwarded calls.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use bbus_stream::FrameIo;
use bbus_wire::{ErrorCode, Msg, MsgHdr, MsgType, Object, SessionType};
use tokio::net::UnixStream;

use crate::session::{close_session, open_session};
use crate::ClientError;

/// A published method's implementation. Receives the argument object
/// (cursor at the start) and returns the result object, or `None` on
/// failure.
pub type MethodHandler = Box<dyn FnMut(&mut Object) -> Option<Object> + Send>;

/// Everything the daemon needs to publish one method.
pub struct MethodDef {
    /// Leaf method name, no dots.
    pub name: String,
    /// Description of the argument object.
    pub arg_descr: String,
    /// Description of the returned object.
    pub ret_descr: String,
    pub handler: MethodHandler,
}

/// Outcome of one [`Service::listen_calls`] round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    /// The timeout elapsed with no incoming call.
    TimedOut,
    /// A call arrived and was answered (successfully or with an error
    /// reported to the daemon).
    Called,
}

/// A provider session publishing methods under one service path.
pub struct Service {
    io: FrameIo<UnixStream>,
    service_path: String,
    handlers: HashMap<String, MethodHandler>,
}

impl Service {
    /// Connect as a provider for the given service path, e.g. `"foo"` or
    /// `"audio.mixer"`. The service path doubles as the connection name.
    pub async fn connect(service_path: &str) -> Result<Self, ClientError> {
        Self::connect_with_path(service_path, None).await
    }

    /// Connect through an explicit socket path instead of the resolved one.
    pub async fn connect_with_path(
        service_path: &str,
        path: Option<&Path>,
    ) -> Result<Self, ClientError> {
        let io = open_session(path, SessionType::Provider, service_path).await?;
        Ok(Self {
            io,
            service_path: service_path.to_owned(),
            handlers: HashMap::new(),
        })
    }

    /// Register a method with the daemon. The full path becomes
    /// `bbus.<service-path>.<name>`.
    pub async fn register(&mut self, def: MethodDef) -> Result<(), ClientError> {
        let meta = format!(
            "{},{},{},{}",
            self.service_path, def.name, def.arg_descr, def.ret_descr,
        );
        let hdr = MsgHdr::new(MsgType::RegisterMethod, ErrorCode::Good);
        self.io.send(&Msg::compose(hdr, Some(&meta), None)?).await?;

        self.expect_ack().await?;
        self.handlers.insert(def.name, def.handler);
        Ok(())
    }

    /// Withdraw a previously registered method.
    pub async fn unregister(&mut self, name: &str) -> Result<(), ClientError> {
        let meta = format!("{},{}", self.service_path, name);
        let hdr = MsgHdr::new(MsgType::UnregisterMethod, ErrorCode::Good);
        self.io.send(&Msg::compose(hdr, Some(&meta), None)?).await?;

        self.expect_ack().await?;
        self.handlers.remove(name);
        Ok(())
    }

    async fn expect_ack(&mut self) -> Result<(), ClientError> {
        let reply = self.io.recv().await?.ok_or(ClientError::ConnectionClosed)?;
        if reply.hdr.msg_type() != Some(MsgType::RegisterAck) {
            return Err(ClientError::UnexpectedMessage(reply.hdr.msgtype));
        }
        match reply.hdr.error_code() {
            Some(ErrorCode::Good) => Ok(()),
            _ => Err(ClientError::RegisterError),
        }
    }

    /// Wait up to `timeout` for one forwarded call and answer it.
    ///
    /// The daemon forwards calls with the leaf method name as meta; the
    /// matching handler runs in place and its result (or failure) goes back
    /// as the reply, carrying the daemon's correlation token.
    pub async fn listen_calls(&mut self, timeout: Duration) -> Result<ListenOutcome, ClientError> {
        let msg = match self.io.recv_timeout(timeout).await? {
            None => return Ok(ListenOutcome::TimedOut),
            Some(msg) => msg,
        };
        if msg.hdr.msg_type() != Some(MsgType::ProviderCall) {
            return Err(ClientError::UnexpectedMessage(msg.hdr.msgtype));
        }

        let name = msg.meta().ok_or(ClientError::MalformedMessage)?.to_owned();
        let mut arg = msg.object().unwrap_or_default();

        let mut hdr = MsgHdr::new(MsgType::ProviderReply, ErrorCode::Good);
        hdr.token = msg.hdr.token;
        let ret = match self.handlers.get_mut(&name) {
            None => {
                tracing::warn!(method = %name, "forwarded call for an unknown method");
                hdr.errcode = ErrorCode::NoMethod as u8;
                None
            }
            Some(handler) => match handler(&mut arg) {
                Some(obj) => Some(obj),
                None => {
                    hdr.errcode = ErrorCode::MethodError as u8;
                    None
                }
            },
        };

        self.io.send(&Msg::compose(hdr, None, ret.as_ref())?).await?;
        Ok(ListenOutcome::Called)
    }

    /// Close the session gracefully. Every method this provider registered
    /// disappears from the daemon's registry.
    pub async fn close(mut self) -> Result<(), ClientError> {
        close_session(&mut self.io).await
    }
}
