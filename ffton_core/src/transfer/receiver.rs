use std::io;
use std::path::Path;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

use super::constants::MIB;
use super::error::TransferError;
use super::progress::{ProgressCheckpoint, format_transfer_speed, percent};
use super::protocol::recv_prefix;
use super::{FileSummary, FileTransferProtocol, report_digest};
use crate::transport::{ConnectionError, Transport};

impl<T: Transport> FileTransferProtocol<'_, T> {
    /// Receive one file into `path`, creating or truncating it
    ///
    /// Exactly the announced number of bytes is consumed from the
    /// transport; the next file's prefix is never touched.
    pub async fn receive_file(&mut self, path: &Path) -> Result<FileSummary, TransferError> {
        let mut file = File::create(path)
            .await
            .map_err(|source| TransferError::DestinationCreate {
                path: path.to_path_buf(),
                source,
            })?;

        let file_size = recv_prefix(&mut *self.transport, self.settings.prefix_byte_order).await?;
        info!("Receiving {} bytes into '{}'", file_size, path.display());

        let start = Instant::now();
        let mut checkpoint = ProgressCheckpoint::new(self.settings.checkpoint_interval);
        let mut digest = self.digest();

        while checkpoint.total() < file_size {
            let len = self.next_chunk_len(file_size - checkpoint.total());
            let n = match self.transport.recv_best_effort(&mut self.buffer[..len]).await {
                Ok(0) => Err(ConnectionError::PeerFinished),
                other => other,
            }
            .map_err(|source| TransferError::Body {
                path: path.to_path_buf(),
                source,
            })?;

            persist_chunk(&mut file, &self.buffer[..n])
                .await
                .map_err(|source| TransferError::LocalWrite {
                    path: path.to_path_buf(),
                    source,
                })?;
            digest.update(&self.buffer[..n]);

            if let Some(total) = checkpoint.advance(n as u64) {
                info!(
                    "{}MB received ({}%)",
                    total / MIB,
                    percent(total, file_size)
                );
            }
        }

        file.flush()
            .await
            .map_err(|source| TransferError::LocalWrite {
                path: path.to_path_buf(),
                source,
            })?;

        let received = checkpoint.total();
        info!(
            "received {} bytes (100%, {})",
            received,
            format_transfer_speed(received, start.elapsed().as_secs_f64())
        );

        let checksum = report_digest(digest, path);
        Ok(FileSummary {
            path: path.to_path_buf(),
            bytes: received,
            checksum,
        })
    }
}

/// Write the whole chunk, retrying short writes; hard errors are returned
pub async fn persist_chunk<W: AsyncWrite + Unpin>(writer: &mut W, mut chunk: &[u8]) -> io::Result<()> {
    while !chunk.is_empty() {
        let n = writer.write(chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        chunk = &chunk[n..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Writer that accepts at most `step` bytes per call, optionally failing at a byte offset
    struct ShortWriter {
        step: usize,
        fail_at: Option<usize>,
        data: Vec<u8>,
        calls: usize,
    }

    impl AsyncWrite for ShortWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.calls += 1;
            if let Some(limit) = self.fail_at {
                if self.data.len() >= limit {
                    return Poll::Ready(Err(io::Error::other("disk full")));
                }
            }
            let n = buf.len().min(self.step);
            self.data.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_persist_chunk_retries_short_writes() {
        let mut writer = ShortWriter {
            step: 7,
            fail_at: None,
            data: Vec::new(),
            calls: 0,
        };
        let chunk: Vec<u8> = (0..=255).collect();

        persist_chunk(&mut writer, &chunk).await.unwrap();

        assert_eq!(writer.data, chunk);
        assert_eq!(writer.calls, 37);
    }

    #[tokio::test]
    async fn test_persist_chunk_stops_on_hard_error() {
        let mut writer = ShortWriter {
            step: 10,
            fail_at: Some(20),
            data: Vec::new(),
            calls: 0,
        };

        let result = persist_chunk(&mut writer, &[1u8; 50]).await;

        assert!(result.is_err());
        assert_eq!(writer.data.len(), 20);
    }
}
