//! Sequential file transfer over one established connection.
//!
//! This module provides:
//! - Length-prefixed framing of each file
//! - Chunked streaming with partial-I/O retry
//! - Progress checkpoints (log output only, nothing on the wire)
//! - Skip / end-session / fatal handling per file

pub mod constants;
pub mod error;
pub mod hash;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod sender;

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use hash::StreamDigest;

use crate::config::TransferConfig;
use crate::transport::{HandshakeSide, Transport};

pub use error::{Disposition, TransferError};

/// Which half of the transfer this process performs, chosen once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    /// The sender starts the QUIC handshake, the receiver answers it
    pub fn handshake_side(self) -> HandshakeSide {
        match self {
            Role::Sender => HandshakeSide::Dial,
            Role::Receiver => HandshakeSide::Answer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Receiver => f.write_str("receiver"),
        }
    }
}

/// One file to send from, or receive into, `path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileJob {
    pub path: PathBuf,
    pub role: Role,
}

impl FileJob {
    /// Jobs for every path, in the given order
    pub fn plan<I>(role: Role, paths: I) -> Vec<FileJob>
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        paths
            .into_iter()
            .map(|path| FileJob {
                path: path.into(),
                role,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    pub path: PathBuf,
    pub bytes: u64,
    /// BLAKE3 hex digest when checksum logging is enabled
    pub checksum: Option<String>,
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: TransferError,
}

#[derive(Debug)]
pub struct AbortedFile {
    pub path: PathBuf,
    pub error: TransferError,
}

/// Outcome of a session that was not ended by a fatal error
#[derive(Debug, Default)]
pub struct SessionReport {
    pub completed: Vec<FileSummary>,
    pub skipped: Vec<SkippedFile>,
    /// The file whose transfer ended the session early, if any
    pub aborted: Option<AbortedFile>,
}

impl SessionReport {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }

    pub fn total_bytes(&self) -> u64 {
        self.completed.iter().map(|f| f.bytes).sum()
    }
}

/// Drives the sender or receiver role over a [`Transport`]
///
/// The chunk buffer is allocated lazily, never larger than the biggest
/// chunk actually needed, and reused across files.
pub struct FileTransferProtocol<'a, T> {
    transport: &'a mut T,
    settings: TransferConfig,
    buffer: Vec<u8>,
}

impl<'a, T: Transport> FileTransferProtocol<'a, T> {
    pub fn new(transport: &'a mut T, settings: TransferConfig) -> Self {
        Self {
            transport,
            settings,
            buffer: Vec::new(),
        }
    }

    /// Process the jobs strictly in order
    ///
    /// Returns `Err` only for fatal errors. A file that cannot be opened is
    /// skipped; a failure in the middle of a body ends the session early and
    /// is reported in [`SessionReport::aborted`].
    pub async fn run(&mut self, jobs: &[FileJob]) -> Result<SessionReport, TransferError> {
        let mut report = SessionReport::default();

        for job in jobs {
            let result = match job.role {
                Role::Sender => self.send_file(&job.path).await,
                Role::Receiver => self.receive_file(&job.path).await,
            };

            let error = match result {
                Ok(summary) => {
                    report.completed.push(summary);
                    continue;
                }
                Err(e) => e,
            };

            match error.disposition() {
                Disposition::Skip => {
                    warn!("{}, skipping", error);
                    report.skipped.push(SkippedFile {
                        path: job.path.clone(),
                        error,
                    });
                }
                Disposition::EndSession => {
                    error!("{}", error);
                    report.aborted = Some(AbortedFile {
                        path: job.path.clone(),
                        error,
                    });
                    break;
                }
                Disposition::Fatal => {
                    error!("{}", error);
                    return Err(error);
                }
            }
        }

        info!(
            "Session finished: {} completed, {} skipped, {} bytes",
            report.completed.len(),
            report.skipped.len(),
            report.total_bytes()
        );
        Ok(report)
    }

    /// Size of the next chunk: what is left, capped by the configured chunk size
    fn next_chunk_len(&mut self, remaining: u64) -> usize {
        let len = remaining.min(self.settings.chunk_size as u64) as usize;
        if self.buffer.len() < len {
            self.buffer.resize(len, 0);
        }
        len
    }

    fn digest(&self) -> StreamDigest {
        StreamDigest::new(self.settings.verify_checksum)
    }
}

/// Finish a file's digest and log it next to the path
fn report_digest(digest: StreamDigest, path: &Path) -> Option<String> {
    let hex = digest.finish()?;
    info!("BLAKE3 {}  {}", hex, path.display());
    Some(hex)
}
