use std::path::Path;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::info;

use super::constants::MIB;
use super::error::TransferError;
use super::progress::{ProgressCheckpoint, format_transfer_speed};
use super::protocol::send_prefix;
use super::{FileSummary, FileTransferProtocol, report_digest};
use crate::transport::Transport;

impl<T: Transport> FileTransferProtocol<'_, T> {
    /// Send one file: size prefix, then the body in chunks
    ///
    /// Reads never go past the size taken when the file was opened, so a
    /// file that grows meanwhile cannot desynchronize the peer.
    pub async fn send_file(&mut self, path: &Path) -> Result<FileSummary, TransferError> {
        info!("Sending '{}'", path.display());

        let mut file = File::open(path)
            .await
            .map_err(|source| TransferError::SourceOpen {
                path: path.to_path_buf(),
                source,
            })?;
        let file_size = file
            .metadata()
            .await
            .map_err(|source| TransferError::SourceStat {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let declared = i64::try_from(file_size).map_err(|_| TransferError::SourceStat {
            path: path.to_path_buf(),
            source: std::io::Error::other("file size exceeds the 8-byte prefix"),
        })?;

        send_prefix(&mut *self.transport, self.settings.prefix_byte_order, declared).await?;

        let start = Instant::now();
        let mut checkpoint = ProgressCheckpoint::new(self.settings.checkpoint_interval);
        let mut digest = self.digest();

        while checkpoint.total() < file_size {
            let len = self.next_chunk_len(file_size - checkpoint.total());
            let n = file
                .read(&mut self.buffer[..len])
                .await
                .map_err(|source| TransferError::LocalRead {
                    path: path.to_path_buf(),
                    source,
                })?;
            if n == 0 {
                return Err(TransferError::SourceTruncated {
                    path: path.to_path_buf(),
                    sent: checkpoint.total(),
                    declared: file_size,
                });
            }

            self.transport
                .send_reliably(&self.buffer[..n])
                .await
                .map_err(|source| TransferError::Body {
                    path: path.to_path_buf(),
                    source,
                })?;

            digest.update(&self.buffer[..n]);

            if let Some(total) = checkpoint.advance(n as u64) {
                info!("{}MB sent", total / MIB);
            }
        }

        let sent = checkpoint.total();
        info!(
            "{} bytes sent ({})",
            sent,
            format_transfer_speed(sent, start.elapsed().as_secs_f64())
        );

        let checksum = report_digest(digest, path);
        Ok(FileSummary {
            path: path.to_path_buf(),
            bytes: sent,
            checksum,
        })
    }
}
