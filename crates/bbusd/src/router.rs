//! The routing engine.
//!
//! One task owns all routing state: the method registry, the live-client
//! table, the pending-call map, and the monitor set. It multiplexes the
//! listener, the event channel fed by every client's reader task, and the
//! shutdown flag. Outbound frames go through each client's bounded queue
//! via `try_send`, so the loop itself never waits on a peer.

use std::collections::HashMap;
use std::io;

use bbus_stream::BusListener;
use bbus_wire::{descr_valid, ErrorCode, Msg, MsgHdr, MsgType, Object, ObjectError};
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::methods::LOCAL_METHODS;
use crate::registry::{LocalHandler, MethodEntry, Registry};
use crate::session::{handshake, start_client, ClientHandle, ClientId, ClientKind};

/// Inbound events multiplexed into the router task.
pub enum RouterEvent {
    /// A connection completed its handshake.
    Connected(ClientHandle),
    /// A client sent one frame.
    Inbound { id: ClientId, msg: Msg },
    /// A client's reader stopped (hangup, bad frame, or fatal IO error).
    Disconnected { id: ClientId },
}

/// Events queued from reader tasks before the router drains them.
const EVENT_QUEUE: usize = 256;

/// An outstanding call forwarded to a provider.
struct PendingCall {
    caller: ClientId,
    provider: ClientId,
}

struct Router {
    registry: Registry,
    clients: HashMap<ClientId, ClientHandle>,
    pending: HashMap<u32, PendingCall>,
    monitors: Vec<ClientId>,
    next_token: u32,
    shutdown: watch::Sender<bool>,
}

/// Run the daemon: accept, handshake, and route until the shutdown flag
/// flips.
pub async fn run(
    listener: BusListener,
    cfg: Config,
    shutdown: watch::Sender<bool>,
) -> io::Result<()> {
    let mut router = Router {
        registry: Registry::new(),
        clients: HashMap::new(),
        pending: HashMap::new(),
        monitors: Vec::new(),
        next_token: 0,
        shutdown: shutdown.clone(),
    };

    for (path, handler) in LOCAL_METHODS {
        router
            .registry
            .insert(path, MethodEntry::Local(*handler))
            .map_err(|e| io::Error::other(format!("registering local method {path}: {e}")))?;
    }

    let (events_tx, mut events_rx) = mpsc::channel::<RouterEvent>(EVENT_QUEUE);
    let mut shutdown_rx = shutdown.subscribe();
    let mut next_id: ClientId = 0;

    tracing::info!(path = %listener.path().display(), "bus daemon running");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        let id = next_id;
                        let auth = cfg.auth.clone();
                        let events = events_tx.clone();
                        tokio::spawn(async move {
                            let mut io = bbus_stream::FrameIo::new(stream);
                            match handshake(&mut io, &peer, auth.as_ref()).await {
                                Ok((kind, name)) => {
                                    let handle =
                                        start_client(id, kind, name, peer, io, events.clone());
                                    let _ = events.send(RouterEvent::Connected(handle)).await;
                                }
                                Err(e) => {
                                    tracing::warn!(?peer, error = %e, "handshake failed");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
            Some(event) = events_rx.recv() => {
                router.handle_event(event);
            }
        }
    }

    tracing::info!("bus daemon exiting");
    for (_, client) in router.clients.drain() {
        client.stop();
    }
    if let Err(e) = listener.remove_socket_file() {
        tracing::warn!(error = %e, "could not remove socket file");
    }
    Ok(())
}

impl Router {
    fn handle_event(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Connected(handle) => self.add_client(handle),
            RouterEvent::Disconnected { id } => self.drop_client(id, "peer disconnected"),
            RouterEvent::Inbound { id, msg } => self.dispatch(id, msg),
        }
    }

    fn add_client(&mut self, mut handle: ClientHandle) {
        if handle.kind == ClientKind::Caller {
            handle.token = self.mint_token();
        }
        if handle.kind == ClientKind::Monitor {
            self.monitors.push(handle.id);
        }
        tracing::info!(
            client = handle.id,
            kind = handle.kind.label(),
            name = %handle.name,
            pid = ?handle.peer.pid,
            "client connected",
        );
        self.clients.insert(handle.id, handle);
    }

    /// Tokens are monotonic and skip 0, which marks "no token".
    fn mint_token(&mut self) -> u32 {
        self.next_token = self.next_token.wrapping_add(1);
        if self.next_token == 0 {
            self.next_token = 1;
        }
        self.next_token
    }

    fn drop_client(&mut self, id: ClientId, reason: &str) {
        let Some(client) = self.clients.remove(&id) else {
            // Already gone; late events from its reader are harmless.
            return;
        };
        client.stop();
        self.monitors.retain(|m| *m != id);
        tracing::info!(client = id, kind = client.kind.label(), reason, "client removed");

        match client.kind {
            ClientKind::Provider => {
                let removed = self.registry.remove_provider(id);
                if removed > 0 {
                    tracing::info!(client = id, methods = removed, "unregistered on disconnect");
                }
                // Calls still waiting on this provider will never be
                // answered; fail them now.
                let orphaned: Vec<u32> = self
                    .pending
                    .iter()
                    .filter(|(_, p)| p.provider == id)
                    .map(|(tok, _)| *tok)
                    .collect();
                for token in orphaned {
                    if let Some(call) = self.pending.remove(&token) {
                        tracing::warn!(token, "provider died with a call outstanding");
                        self.reply_caller(call.caller, token, ErrorCode::MethodError, None);
                    }
                }
            }
            ClientKind::Caller => {
                self.pending.retain(|_, p| p.caller != id);
            }
            ClientKind::Monitor | ClientKind::Control => {}
        }
    }

    fn dispatch(&mut self, id: ClientId, msg: Msg) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        let kind = client.kind;

        // Monitors see every frame the router observes, before dispatch.
        self.mirror(&msg.to_bytes());

        let msgtype = msg.hdr.msg_type();
        match (kind, msgtype) {
            (_, Some(MsgType::Close)) => self.drop_client(id, "close requested"),

            (ClientKind::Caller, Some(MsgType::MethodCall)) => self.handle_call(id, msg),

            (ClientKind::Provider, Some(MsgType::RegisterMethod)) => self.handle_register(id, msg),
            (ClientKind::Provider, Some(MsgType::UnregisterMethod)) => {
                self.handle_unregister(id, msg)
            }
            (ClientKind::Provider, Some(MsgType::ProviderReply)) => {
                self.handle_provider_reply(id, msg)
            }

            (ClientKind::Control, Some(MsgType::Control)) => self.handle_control(id, msg),

            _ => {
                tracing::warn!(
                    client = id,
                    kind = kind.label(),
                    msgtype = msg.hdr.msgtype,
                    "unexpected message, dropping client",
                );
                self.drop_client(id, "unexpected message");
            }
        }
    }

    // ---- caller path ----

    fn handle_call(&mut self, caller_id: ClientId, msg: Msg) {
        let Some(method) = msg.meta().map(str::to_owned) else {
            tracing::warn!(client = caller_id, "method call without a method path");
            self.drop_client(caller_id, "malformed call");
            return;
        };
        let token = self
            .clients
            .get(&caller_id)
            .map(|c| c.token)
            .unwrap_or_default();

        enum Target {
            Miss,
            Local(LocalHandler),
            Remote { provider: ClientId, leaf: String },
        }

        let target = match self.registry.lookup(&method) {
            None => Target::Miss,
            Some(MethodEntry::Local(f)) => Target::Local(*f),
            Some(MethodEntry::Remote { provider, leaf }) => Target::Remote {
                provider: *provider,
                leaf: leaf.clone(),
            },
        };

        match target {
            Target::Miss => {
                tracing::debug!(client = caller_id, method = %method, "no such method");
                self.reply_caller(caller_id, token, ErrorCode::NoMethod, None);
            }
            Target::Local(handler) => {
                let mut arg = msg.object().unwrap_or_default();
                match handler(&method, &mut arg) {
                    Some(ret) => {
                        self.reply_caller(caller_id, token, ErrorCode::Good, Some(&ret));
                    }
                    None => {
                        tracing::warn!(method = %method, "local method failed");
                        self.reply_caller(caller_id, token, ErrorCode::MethodError, None);
                    }
                }
            }
            Target::Remote { provider, leaf } => {
                let arg = msg.object().unwrap_or_default();
                let mut hdr = MsgHdr::new(MsgType::ProviderCall, ErrorCode::Good);
                hdr.token = token;
                let forward = match Msg::compose(hdr, Some(&leaf), Some(&arg)) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(method = %method, error = %e, "cannot build provider call");
                        self.reply_caller(caller_id, token, ErrorCode::MethodError, None);
                        return;
                    }
                };
                self.pending.insert(
                    token,
                    PendingCall {
                        caller: caller_id,
                        provider,
                    },
                );
                if !self.send_frame(provider, &forward) {
                    tracing::warn!(method = %method, provider, "provider send failed");
                    self.pending.remove(&token);
                    self.reply_caller(caller_id, token, ErrorCode::MethodError, None);
                }
            }
        }
    }

    fn reply_caller(&mut self, caller: ClientId, token: u32, err: ErrorCode, obj: Option<&Object>) {
        let mut hdr = MsgHdr::new(MsgType::MethodReply, err);
        hdr.token = token;
        let msg = match Msg::compose(hdr, None, obj) {
            Ok(m) => m,
            Err(e) => {
                // An oversized result degrades to a method error.
                tracing::warn!(error = %e, "reply did not fit, degrading to an error reply");
                let mut hdr = MsgHdr::new(MsgType::MethodReply, ErrorCode::MethodError);
                hdr.token = token;
                Msg::bare(hdr)
            }
        };
        if !self.send_frame(caller, &msg) {
            tracing::warn!(client = caller, "reply send failed, dropping caller");
            self.drop_client(caller, "reply send failed");
        }
    }

    // ---- provider path ----

    fn handle_register(&mut self, provider_id: ClientId, msg: Msg) {
        let outcome = match msg.meta().and_then(parse_registration) {
            None => {
                tracing::warn!(client = provider_id, "malformed registration descriptor");
                Err(())
            }
            Some(reg) => {
                let path = format!("bbus.{}.{}", reg.service, reg.method);
                match self.registry.insert(
                    &path,
                    MethodEntry::Remote {
                        provider: provider_id,
                        leaf: reg.method.clone(),
                    },
                ) {
                    Ok(()) => {
                        tracing::info!(client = provider_id, path = %path, "method registered");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!(client = provider_id, path = %path, error = %e, "registration failed");
                        Err(())
                    }
                }
            }
        };
        self.send_ack(provider_id, outcome);
    }

    fn handle_unregister(&mut self, provider_id: ClientId, msg: Msg) {
        let outcome = match msg.meta().and_then(parse_unregistration) {
            None => Err(()),
            Some((service, method)) => {
                let path = format!("bbus.{service}.{method}");
                let owned = matches!(
                    self.registry.lookup(&path),
                    Some(MethodEntry::Remote { provider, .. }) if *provider == provider_id,
                );
                if owned {
                    self.registry.remove(&path);
                    tracing::info!(client = provider_id, path = %path, "method unregistered");
                    Ok(())
                } else {
                    tracing::warn!(client = provider_id, path = %path, "unregistration refused");
                    Err(())
                }
            }
        };
        self.send_ack(provider_id, outcome);
    }

    fn send_ack(&mut self, provider: ClientId, outcome: Result<(), ()>) {
        let errcode = match outcome {
            Ok(()) => ErrorCode::Good,
            Err(()) => ErrorCode::RegisterError,
        };
        let msg = Msg::bare(MsgHdr::new(MsgType::RegisterAck, errcode));
        if !self.send_frame(provider, &msg) {
            tracing::warn!(client = provider, "ack send failed, dropping provider");
            self.drop_client(provider, "ack send failed");
        }
    }

    fn handle_provider_reply(&mut self, provider_id: ClientId, msg: Msg) {
        let token = msg.hdr.token;
        let Some(call) = self.pending.remove(&token) else {
            tracing::warn!(client = provider_id, token, "reply with no pending call, discarding");
            return;
        };
        if call.provider != provider_id {
            tracing::warn!(
                client = provider_id,
                expected = call.provider,
                token,
                "reply from an unexpected provider",
            );
        }

        let errcode = msg.hdr.error_code().unwrap_or(ErrorCode::MethodError);
        let obj = msg.object();
        self.reply_caller(call.caller, token, errcode, obj.as_ref());
    }

    // ---- control path ----

    fn handle_control(&mut self, control_id: ClientId, msg: Msg) {
        let reply = match msg.meta() {
            Some("list-methods") => string_array_reply(self.registry.paths()),
            Some("list-clients") => {
                let mut entries: Vec<String> = self
                    .clients
                    .values()
                    .map(|c| format!("{}:{}", c.kind.label(), c.name))
                    .collect();
                entries.sort();
                string_array_reply(entries)
            }
            Some("shutdown") => {
                tracing::info!(client = control_id, "shutdown requested");
                let _ = self.shutdown.send(true);
                Ok(None)
            }
            Some(other) => {
                tracing::warn!(client = control_id, command = other, "unknown control command");
                return self.send_control_reply(control_id, ErrorCode::NoMethod, None);
            }
            None => {
                tracing::warn!(client = control_id, "control message without a command");
                return self.send_control_reply(control_id, ErrorCode::NoMethod, None);
            }
        };

        match reply {
            Ok(obj) => self.send_control_reply(control_id, ErrorCode::Good, obj.as_ref()),
            Err(e) => {
                tracing::warn!(error = %e, "control reply construction failed");
                self.send_control_reply(control_id, ErrorCode::MethodError, None);
            }
        }
    }

    fn send_control_reply(&mut self, control: ClientId, err: ErrorCode, obj: Option<&Object>) {
        let hdr = MsgHdr::new(MsgType::Control, err);
        let msg = match Msg::compose(hdr, None, obj) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "control reply did not fit");
                Msg::bare(MsgHdr::new(MsgType::Control, ErrorCode::MethodError))
            }
        };
        if !self.send_frame(control, &msg) {
            self.drop_client(control, "control reply send failed");
        }
    }

    // ---- frame delivery ----

    /// Queue a frame for one client, mirroring it to monitors unless the
    /// target itself is a monitor (copies are not re-observed).
    fn send_frame(&mut self, id: ClientId, msg: &Msg) -> bool {
        let frame = msg.to_bytes();
        let to_monitor = self
            .clients
            .get(&id)
            .is_some_and(|c| c.kind == ClientKind::Monitor);
        if !to_monitor {
            self.mirror(&frame);
        }
        match self.clients.get(&id) {
            Some(client) => client.try_send(frame),
            None => false,
        }
    }

    /// Copy a frame to every monitor. Failures are logged and ignored; a
    /// monitor that cannot keep up loses frames, never dispatch.
    fn mirror(&self, frame: &[u8]) {
        for id in &self.monitors {
            if let Some(monitor) = self.clients.get(id) {
                if !monitor.try_send(frame.to_vec()) {
                    tracing::warn!(monitor = id, "monitor queue full, frame dropped");
                }
            }
        }
    }
}

/// A parsed `SRVREG` descriptor.
struct Registration {
    service: String,
    method: String,
}

/// Parse `"<service-path>,<method-name>,<arg-descr>,<ret-descr>"`.
///
/// The method name must be a single non-empty component; registering at the
/// top level is refused so a forwarded call's meta is never empty.
fn parse_registration(meta: &str) -> Option<Registration> {
    let mut parts = meta.split(',');
    let service = parts.next()?;
    let method = parts.next()?;
    let arg_descr = parts.next()?;
    let ret_descr = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if service.is_empty() || service.split('.').any(|c| c.is_empty()) {
        return None;
    }
    if method.is_empty() || method.contains('.') {
        return None;
    }
    if !descr_valid(arg_descr) || !descr_valid(ret_descr) {
        return None;
    }
    Some(Registration {
        service: service.to_owned(),
        method: method.to_owned(),
    })
}

/// Parse `"<service-path>,<method-name>"`.
fn parse_unregistration(meta: &str) -> Option<(&str, &str)> {
    let mut parts = meta.split(',');
    let service = parts.next()?;
    let method = parts.next()?;
    if parts.next().is_some() || service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service, method))
}

/// Build the `As` object carried by enumeration replies.
fn string_array_reply(entries: Vec<String>) -> Result<Option<Object>, ObjectError> {
    let mut obj = Object::new();
    obj.push_array_len(entries.len() as u32);
    for entry in &entries {
        obj.push_str(entry)?;
    }
    Ok(Some(obj))
}
