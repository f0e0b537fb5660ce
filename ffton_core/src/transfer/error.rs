use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::transport::ConnectionError;

/// What a transfer error means for the rest of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Log it and continue with the next file
    Skip,
    /// Stop after this file; the session ends early but not fatally
    EndSession,
    /// Frame boundaries are lost or nothing can be received; stop immediately
    Fatal,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Could not open '{}': {source}", path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not obtain the file size of '{}': {source}", path.display())]
    SourceStat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not open '{}' for writing: {source}", path.display())]
    DestinationCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Length prefix transfer failed: {0}")]
    Framing(#[source] ConnectionError),

    #[error("Peer announced a negative file size ({0})")]
    InvalidPrefix(i64),

    #[error("Network error while transferring '{}': {source}", path.display())]
    Body {
        path: PathBuf,
        #[source]
        source: ConnectionError,
    },

    #[error("Error while reading from '{}': {source}", path.display())]
    LocalRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{}' ended after {sent} of {declared} announced bytes", path.display())]
    SourceTruncated {
        path: PathBuf,
        sent: u64,
        declared: u64,
    },

    #[error("Error while writing to file '{}': {source}", path.display())]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    pub fn disposition(&self) -> Disposition {
        match self {
            TransferError::SourceOpen { .. } | TransferError::SourceStat { .. } => {
                Disposition::Skip
            }
            TransferError::Body { .. }
            | TransferError::LocalRead { .. }
            | TransferError::SourceTruncated { .. }
            | TransferError::LocalWrite { .. } => Disposition::EndSession,
            TransferError::DestinationCreate { .. }
            | TransferError::Framing(_)
            | TransferError::InvalidPrefix(_) => Disposition::Fatal,
        }
    }

    /// True when the failure concerns the length prefix itself
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            TransferError::Framing(_) | TransferError::InvalidPrefix(_)
        )
    }
}
