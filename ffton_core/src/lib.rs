//! Core of ffton: a point-to-point file transfer over a hole-punched
//! QUIC connection between two peers that both know each other's address.

pub mod config;
pub mod endpoint;
pub mod resolver;
pub mod session;
pub mod transfer;
pub mod transport;

pub use config::Config;
pub use endpoint::{Endpoint, Port, PortError};
pub use session::{SessionError, run_session};
pub use transfer::{FileJob, FileTransferProtocol, Role, SessionReport, TransferError};
pub use transport::{ConnectionError, RendezvousConnection, StreamTransport, Transport};
