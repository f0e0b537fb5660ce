use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::endpoint::{Endpoint, Port};
use crate::transfer::{FileJob, FileTransferProtocol, Role, SessionReport, TransferError};
use crate::transport::{ConnectionError, RendezvousConnection};

#[derive(Debug, Error)]
pub enum SessionError {
    /// Setup failed before any file was touched
    #[error("{message}")]
    Connect {
        message: String,
        #[source]
        source: ConnectionError,
    },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Every file went through locally but the peer never confirmed delivery
    #[error("connection closed before the peer confirmed delivery: {0}")]
    Close(#[source] ConnectionError),
}

/// Connect to `peer` from `local_port` and move `files` in the given role
///
/// The connection is closed on every path out of this function, after the
/// last file when the transfer went through. A transfer whose data the
/// peer did not confirm at close is reported as [`SessionError::Close`].
pub async fn run_session(
    role: Role,
    local_port: Port,
    peer: &Endpoint,
    files: &[PathBuf],
    config: &Config,
) -> Result<SessionReport, SessionError> {
    info!(
        "Starting {} session: local port {}, peer {}, {} file(s)",
        role,
        local_port,
        peer,
        files.len()
    );

    let mut connection = RendezvousConnection::new(role.handshake_side(), config.connection.clone());
    if let Err(source) = connection
        .connect_rendezvous(local_port, &peer.host, peer.port)
        .await
    {
        let message = connection
            .last_error()
            .map(str::to_string)
            .unwrap_or_else(|| source.to_string());
        error!("Connect error: {}", message);
        let _ = connection.close().await;
        return Err(SessionError::Connect { message, source });
    }

    let jobs = FileJob::plan(role, files.iter().cloned());
    let result = FileTransferProtocol::new(&mut connection, config.transfer.clone())
        .run(&jobs)
        .await;

    let closed = connection.close().await;
    let report = result?;
    closed.map_err(SessionError::Close)?;
    Ok(report)
}
