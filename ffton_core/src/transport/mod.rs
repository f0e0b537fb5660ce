//! Reliable byte transport between the two peers.
//!
//! This module provides:
//! - The [`Transport`] trait with best-effort and retry-until-complete I/O
//! - [`RendezvousConnection`], a QUIC connection established from fixed
//!   ports on both sides (UDP hole punching)
//! - [`StreamTransport`], an adapter for any async byte stream

pub mod connection;
pub mod quic;

use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::resolver::ResolveError;

pub use connection::{HandshakeSide, RendezvousConnection};

/// Message reported when the peer address cannot be translated
pub const ADDRESS_TRANSLATION_FAILED: &str = "Address translation failed";

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot set {option}: {reason}")]
    SocketOption {
        option: &'static str,
        reason: &'static str,
    },

    #[error("could not bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Address translation failed: {0}")]
    AddressTranslation(#[source] ResolveError),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error(transparent)]
    Connect(#[from] quinn::ConnectError),

    #[error(transparent)]
    Connection(#[from] quinn::ConnectionError),

    #[error("no connection with the peer within {0:?}")]
    Timeout(Duration),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Write(#[from] quinn::WriteError),

    #[error(transparent)]
    Read(#[from] quinn::ReadError),

    #[error("peer closed the stream")]
    PeerFinished,

    #[error("peer stopped reading (code {0}) before all data was delivered")]
    StoppedEarly(u64),

    #[error(transparent)]
    Stopped(#[from] quinn::StoppedError),

    #[error("peer did not confirm delivery within {0:?}")]
    LingerTimeout(Duration),

    #[error("endpoint closed")]
    EndpointClosed,

    #[error("{0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Errors produced by this crate rather than reported by the transport
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ConnectionError::SocketOption { .. }
                | ConnectionError::AddressTranslation(_)
                | ConnectionError::Timeout(_)
                | ConnectionError::LingerTimeout(_)
                | ConnectionError::Handshake(_)
                | ConnectionError::InvalidState(_)
        )
    }
}

/// Byte-level I/O over an established connection
///
/// Implementors supply the single-call primitives; the reliable variants
/// loop over them until the whole buffer has been moved. Bytes already
/// moved before an error are not rolled back.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// One send call, may accept fewer bytes than offered
    async fn send_best_effort(&mut self, buf: &[u8]) -> Result<usize, ConnectionError>;

    /// One receive call, may return fewer bytes than the buffer holds
    async fn recv_best_effort(&mut self, buf: &mut [u8]) -> Result<usize, ConnectionError>;

    /// Send the whole buffer, returns its length
    async fn send_reliably(&mut self, buf: &[u8]) -> Result<usize, ConnectionError> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.send_best_effort(&buf[offset..]).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            offset += n;
        }
        Ok(buf.len())
    }

    /// Fill the whole buffer, returns its length
    async fn recv_reliably(&mut self, buf: &mut [u8]) -> Result<usize, ConnectionError> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.recv_best_effort(&mut buf[offset..]).await?;
            if n == 0 {
                return Err(ConnectionError::PeerFinished);
            }
            offset += n;
        }
        Ok(buf.len())
    }
}

/// [`Transport`] over any async byte stream (TCP, duplex pipes, ...)
#[derive(Debug)]
pub struct StreamTransport<S> {
    inner: S,
}

impl<S> StreamTransport<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncWrite + Unpin> StreamTransport<S> {
    /// Flush and close the write half so the peer sees end of stream
    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport for StreamTransport<S> {
    async fn send_best_effort(&mut self, buf: &[u8]) -> Result<usize, ConnectionError> {
        Ok(self.inner.write(buf).await?)
    }

    async fn recv_best_effort(&mut self, buf: &mut [u8]) -> Result<usize, ConnectionError> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.inner.read(buf).await? {
            0 => Err(ConnectionError::PeerFinished),
            n => Ok(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Accepts at most `step` bytes per call and fails after `fail_after` calls
    struct Trickle {
        step: usize,
        calls: usize,
        fail_after: Option<usize>,
        sent: Vec<u8>,
        incoming: VecDeque<u8>,
    }

    impl Trickle {
        fn new(step: usize) -> Self {
            Self {
                step,
                calls: 0,
                fail_after: None,
                sent: Vec::new(),
                incoming: VecDeque::new(),
            }
        }

        fn tick(&mut self) -> Result<(), ConnectionError> {
            self.calls += 1;
            match self.fail_after {
                Some(limit) if self.calls > limit => Err(ConnectionError::PeerFinished),
                _ => Ok(()),
            }
        }
    }

    impl Transport for Trickle {
        async fn send_best_effort(&mut self, buf: &[u8]) -> Result<usize, ConnectionError> {
            self.tick()?;
            let n = buf.len().min(self.step);
            self.sent.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        async fn recv_best_effort(&mut self, buf: &mut [u8]) -> Result<usize, ConnectionError> {
            self.tick()?;
            let n = buf.len().min(self.step).min(self.incoming.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.incoming.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_send_reliably_retries_short_sends() {
        let mut transport = Trickle::new(3);
        let payload: Vec<u8> = (0..100).collect();

        let sent = transport.send_reliably(&payload).await.unwrap();

        assert_eq!(sent, 100);
        assert_eq!(transport.sent, payload);
        assert_eq!(transport.calls, 34);
    }

    #[tokio::test]
    async fn test_send_reliably_aborts_on_error_without_rollback() {
        let mut transport = Trickle::new(4);
        transport.fail_after = Some(2);

        let result = transport.send_reliably(&[7u8; 20]).await;

        assert!(matches!(result, Err(ConnectionError::PeerFinished)));
        assert_eq!(transport.sent.len(), 8);
    }

    #[tokio::test]
    async fn test_recv_reliably_fills_buffer() {
        let mut transport = Trickle::new(5);
        transport.incoming.extend(0u8..32);

        let mut buf = [0u8; 32];
        assert_eq!(transport.recv_reliably(&mut buf).await.unwrap(), 32);
        assert_eq!(buf.to_vec(), (0u8..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_recv_reliably_reports_early_end() {
        let mut transport = Trickle::new(5);
        transport.incoming.extend([1u8, 2, 3]);

        let mut buf = [0u8; 8];
        let result = transport.recv_reliably(&mut buf).await;
        assert!(matches!(result, Err(ConnectionError::PeerFinished)));
    }

    #[tokio::test]
    async fn test_stream_transport_over_duplex() {
        let (left, right) = tokio::io::duplex(4);
        let mut left = StreamTransport::new(left);
        let mut right = StreamTransport::new(right);

        let payload = b"a payload longer than the pipe".to_vec();
        let expected = payload.clone();
        let writer = async move {
            left.send_reliably(&payload).await.unwrap();
            left.shutdown().await.unwrap();
        };
        let reader = async move {
            let mut buf = vec![0u8; expected.len()];
            right.recv_reliably(&mut buf).await.unwrap();
            assert_eq!(buf, expected);
            let mut extra = [0u8; 1];
            assert!(matches!(
                right.recv_best_effort(&mut extra).await,
                Err(ConnectionError::PeerFinished)
            ));
        };
        tokio::join!(writer, reader);
    }

    #[test]
    fn test_local_errors_are_distinguished() {
        assert!(ConnectionError::Handshake("bad magic".into()).is_local());
        assert!(!ConnectionError::PeerFinished.is_local());
        assert!(!ConnectionError::Io(io::ErrorKind::BrokenPipe.into()).is_local());
    }
}
