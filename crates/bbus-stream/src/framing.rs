//! Frame-at-a-time IO over async byte streams.
//!
//! A frame is a 12-byte header followed by exactly `psize` payload bytes, so
//! no extra delimiting is needed. This module is generic over the transport
//! type - it works with any `AsyncRead`/`AsyncWrite` stream, including unix
//! sockets, their split halves, and in-memory duplex pipes in tests.

use std::io;
use std::time::Duration;

use bbus_wire::{Msg, MsgHdr, MAX_PAYLOAD, MSGHDR_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A framed connection.
pub struct FrameIo<S> {
    stream: S,
    /// Buffer for encoding outgoing frames to avoid reallocations.
    encode_buf: Vec<u8>,
}

impl<S> FrameIo<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            encode_buf: Vec::with_capacity(256),
        }
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> FrameIo<S>
where
    S: AsyncWrite + Unpin,
{
    /// Send one frame. The header's `psize` must already describe the
    /// payload, which [`Msg::compose`] guarantees.
    pub async fn send(&mut self, msg: &Msg) -> io::Result<()> {
        debug_assert_eq!(msg.hdr.psize as usize, msg.payload.len());

        self.encode_buf.clear();
        self.encode_buf.extend_from_slice(&msg.hdr.to_bytes());
        self.encode_buf.extend_from_slice(&msg.payload);

        tracing::trace!(msgtype = msg.hdr.msgtype, psize = msg.hdr.psize, "frame out");
        self.stream.write_all(&self.encode_buf).await?;
        self.stream.flush().await
    }
}

impl<S> FrameIo<S>
where
    S: AsyncRead + Unpin,
{
    /// Receive one frame.
    ///
    /// Returns `Ok(None)` on a clean EOF at a frame boundary. EOF inside a
    /// frame, a bad magic, or a `psize` beyond the limit are errors.
    pub async fn recv(&mut self) -> io::Result<Option<Msg>> {
        let mut hdr_buf = [0u8; MSGHDR_SIZE];
        let mut filled = 0;
        while filled < MSGHDR_SIZE {
            let n = self.stream.read(&mut hdr_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-header",
                ));
            }
            filled += n;
        }

        let hdr = MsgHdr::from_bytes(&hdr_buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let psize = hdr.psize as usize;
        if psize > MAX_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("payload size {psize} exceeds the {MAX_PAYLOAD}-byte limit"),
            ));
        }

        let mut payload = vec![0u8; psize];
        self.stream.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-frame")
            } else {
                e
            }
        })?;

        tracing::trace!(msgtype = hdr.msgtype, psize = hdr.psize, "frame in");
        Ok(Some(Msg { hdr, payload }))
    }

    /// Receive one frame with a deadline.
    ///
    /// `Ok(None)` means the timeout elapsed with no frame; a peer that
    /// closed the connection surfaces as `ConnectionAborted`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<Msg>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Ok(Some(msg))) => Ok(Some(msg)),
            Ok(Ok(None)) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed",
            )),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbus_wire::{ErrorCode, MsgType, Object, Value};
    use tokio::io::{duplex, AsyncWriteExt};

    fn sample_msg() -> Msg {
        let obj = Object::build("s", &[Value::Str("hello".into())]).unwrap();
        let hdr = MsgHdr::new(MsgType::MethodCall, ErrorCode::Good);
        Msg::compose(hdr, Some("bbus.bbusd.echo"), Some(&obj)).unwrap()
    }

    #[tokio::test]
    async fn send_recv_roundtrip() {
        let (left, right) = duplex(8192);
        let mut tx = FrameIo::new(left);
        let mut rx = FrameIo::new(right);

        let msg = sample_msg();
        tx.send(&msg).await.unwrap();
        let got = rx.recv().await.unwrap().expect("expected a frame");
        assert_eq!(got, msg);
        assert_eq!(got.meta(), Some("bbus.bbusd.echo"));
    }

    #[tokio::test]
    async fn clean_eof_returns_none() {
        let (left, right) = duplex(64);
        drop(left);
        let mut rx = FrameIo::new(right);
        assert!(rx.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_header_is_an_error() {
        let (mut left, right) = duplex(64);
        left.write_all(&[0xBB, 0xC5, 0x07]).await.unwrap();
        drop(left);

        let mut rx = FrameIo::new(right);
        let err = rx.recv().await.expect_err("partial header should fail");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn eof_mid_payload_is_an_error() {
        let (mut left, right) = duplex(64);
        let mut hdr = MsgHdr::new(MsgType::MethodCall, ErrorCode::Good);
        hdr.set_psize(10);
        left.write_all(&hdr.to_bytes()).await.unwrap();
        left.write_all(&[1, 2, 3]).await.unwrap();
        drop(left);

        let mut rx = FrameIo::new(right);
        let err = rx.recv().await.expect_err("partial payload should fail");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn bad_magic_is_rejected() {
        let (mut left, right) = duplex(64);
        let mut bytes = MsgHdr::new(MsgType::MethodCall, ErrorCode::Good).to_bytes();
        bytes[0] = 0x00;
        bytes[1] = 0x00;
        left.write_all(&bytes).await.unwrap();

        let mut rx = FrameIo::new(right);
        let err = rx.recv().await.expect_err("bad magic should fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("magic"));
    }

    #[tokio::test]
    async fn oversized_psize_is_rejected() {
        let (mut left, right) = duplex(64);
        let mut hdr = MsgHdr::new(MsgType::MethodCall, ErrorCode::Good);
        hdr.psize = (MAX_PAYLOAD + 1) as u16;
        left.write_all(&hdr.to_bytes()).await.unwrap();

        let mut rx = FrameIo::new(right);
        let err = rx.recv().await.expect_err("oversized psize should fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn recv_timeout_elapses_to_none() {
        let (_left, right) = duplex(64);
        let mut rx = FrameIo::new(right);
        let got = rx.recv_timeout(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn recv_timeout_reports_closed_peer() {
        let (left, right) = duplex(64);
        drop(left);
        let mut rx = FrameIo::new(right);
        let err = rx
            .recv_timeout(Duration::from_millis(20))
            .await
            .expect_err("closed peer should not look like a timeout");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
