//! Unix socket primitives for local IPC.

use std::io;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};

/// Default socket path when neither an override nor the environment names one.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/bbus.sock";

/// Environment variable naming an alternative socket path.
pub const SOCKPATH_ENV: &str = "BBUS_SOCKPATH";

/// Longest accepted socket path, in bytes.
pub const MAX_SOCKPATH: usize = 256;

/// Credentials of the process on the other end of an accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub pid: Option<i32>,
    pub uid: u32,
    pub gid: u32,
}

/// Resolve the socket path to use: an explicit override wins over
/// [`SOCKPATH_ENV`], which wins over [`DEFAULT_SOCKET_PATH`].
pub fn resolve_socket_path(override_path: Option<&Path>) -> io::Result<PathBuf> {
    let path = match override_path {
        Some(p) => p.to_path_buf(),
        None => match std::env::var_os(SOCKPATH_ENV) {
            Some(v) => PathBuf::from(v),
            None => PathBuf::from(DEFAULT_SOCKET_PATH),
        },
    };
    if path.as_os_str().len() > MAX_SOCKPATH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("socket path longer than {MAX_SOCKPATH} bytes"),
        ));
    }
    Ok(path)
}

/// A listening bus socket.
pub struct BusListener {
    inner: UnixListener,
    path: PathBuf,
}

impl BusListener {
    /// Bind to `path`, unlinking a stale socket file first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(path: &Path) -> io::Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let inner = UnixListener::bind(path)?;
        Ok(Self {
            inner,
            path: path.to_path_buf(),
        })
    }

    /// Accept one connection, capturing the peer's credentials.
    pub async fn accept(&self) -> io::Result<(UnixStream, Peer)> {
        let (stream, _addr) = self.inner.accept().await?;
        let cred = stream.peer_cred()?;
        Ok((
            stream,
            Peer {
                pid: cred.pid(),
                uid: cred.uid(),
                gid: cred.gid(),
            },
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the socket file. Called on clean daemon shutdown.
    pub fn remove_socket_file(&self) -> io::Result<()> {
        std::fs::remove_file(&self.path)
    }
}

/// Connect to the bus socket at `path`.
pub async fn connect(path: &Path) -> io::Result<UnixStream> {
    UnixStream::connect(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn unique_socket_path(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("bbus-{tag}-{}-{nanos}.sock", std::process::id()))
    }

    #[test]
    fn socket_path_resolution_order() {
        // Runs as a single test because the environment is process-global.
        let explicit = PathBuf::from("/tmp/explicit.sock");

        std::env::remove_var(SOCKPATH_ENV);
        assert_eq!(
            resolve_socket_path(None).unwrap(),
            PathBuf::from(DEFAULT_SOCKET_PATH),
        );

        std::env::set_var(SOCKPATH_ENV, "/tmp/from-env.sock");
        assert_eq!(
            resolve_socket_path(None).unwrap(),
            PathBuf::from("/tmp/from-env.sock"),
        );
        assert_eq!(resolve_socket_path(Some(&explicit)).unwrap(), explicit);
        std::env::remove_var(SOCKPATH_ENV);

        let long = PathBuf::from(format!("/tmp/{}", "x".repeat(MAX_SOCKPATH)));
        let err = resolve_socket_path(Some(&long)).expect_err("overlong path should fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn bind_accept_connect_lifecycle() {
        let path = unique_socket_path("lifecycle");
        let listener = BusListener::bind(&path).expect("bind should succeed");
        assert!(path.exists());

        let server = tokio::spawn(async move {
            let (mut stream, peer) = listener.accept().await.expect("accept should succeed");
            assert_eq!(peer.uid, current_uid());
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.expect("server read");
            assert_eq!(&buf, b"ping");
            stream.write_all(b"pong").await.expect("server write");
            listener
        });

        let mut client = connect(&path).await.expect("connect should succeed");
        client.write_all(b"ping").await.expect("client write");
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.expect("client read");
        assert_eq!(&buf, b"pong");

        let listener = server.await.expect("server task");
        listener.remove_socket_file().expect("socket file removal");
        assert!(!path.exists());
    }

    // The test process's own uid, read without libc.
    fn current_uid() -> u32 {
        let status = std::fs::read_to_string("/proc/self/status").unwrap_or_default();
        status
            .lines()
            .find_map(|l| l.strip_prefix("Uid:"))
            .and_then(|l| l.split_whitespace().next())
            .and_then(|u| u.parse().ok())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_file() {
        let path = unique_socket_path("stale");
        {
            let _stale = BusListener::bind(&path).expect("first bind");
        }
        // The file is left behind once the listener is dropped.
        assert!(path.exists());
        let listener = BusListener::bind(&path).expect("rebind over stale file");
        listener.remove_socket_file().expect("cleanup");
    }
}
