#![deny(unsafe_code)]

//! The busybus daemon.
//!
//! Clients connect through a local stream socket, open typed sessions
//! (caller, provider, monitor, control), and the daemon routes method calls
//! to the right provider, correlating replies with their original callers
//! through opaque tokens. See `bbus-wire` for the protocol itself and
//! `bbus-client` for the client library.
//!
//! The daemon is a library plus a thin binary so the integration tests can
//! run it in-process against a scratch socket:
//!
//! ```no_run
//! # async fn run() -> std::io::Result<()> {
//! use bbusd::{Config, Daemon};
//!
//! let daemon = Daemon::bind(Config::default())?;
//! let _handle = daemon.shutdown_handle();
//! // ... hand the handle to a signal task, then:
//! daemon.run().await
//! # }
//! ```

mod config;
mod methods;
mod registry;
mod router;
mod session;

pub use config::{AuthHook, Config};

use std::io;
use std::path::Path;

use bbus_stream::{resolve_socket_path, BusListener};
use tokio::sync::watch;

/// A bound, not-yet-running daemon.
pub struct Daemon {
    listener: BusListener,
    cfg: Config,
    shutdown: watch::Sender<bool>,
}

/// Flips the daemon's run flag. Safe to trigger from signal tasks or
/// control handlers; the router observes it between events.
#[derive(Clone)]
pub struct ShutdownHandle(watch::Sender<bool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

impl Daemon {
    /// Resolve the socket path and bind the listener.
    ///
    /// Must be called from within a tokio runtime. Errors here are fatal
    /// startup errors: a bad path or a failing bind.
    pub fn bind(cfg: Config) -> io::Result<Self> {
        let path = resolve_socket_path(cfg.socket_path.as_deref())?;
        let listener = BusListener::bind(&path)?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            listener,
            cfg,
            shutdown,
        })
    }

    /// The path the daemon is listening on.
    pub fn socket_path(&self) -> &Path {
        self.listener.path()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Run until shut down. Consumes the daemon; the socket file is removed
    /// on the way out.
    pub async fn run(self) -> io::Result<()> {
        router::run(self.listener, self.cfg, self.shutdown).await
    }
}
