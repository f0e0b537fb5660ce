use clap::Parser;
use ffton_core::{Endpoint, Port, PortError, Role};
use std::path::PathBuf;
use thiserror::Error;

/// Point-to-point file transfer over a hole-punched QUIC connection
#[derive(Debug, Parser)]
#[command(name = "ffton", version, about, args_override_self = true)]
pub struct Args {
    /// Send the listed files to the peer
    #[arg(long)]
    pub send: bool,

    /// Receive into the listed files from the peer
    #[arg(long)]
    pub recv: bool,

    /// Log socket-level details
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file (defaults to FFTON_CONFIG or the user config dir)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log a BLAKE3 digest of every completed file
    #[arg(long)]
    pub checksum: bool,

    /// Peer host name or IPv4 address
    pub peer: String,

    /// Peer port
    pub peer_port: String,

    /// Local port, must match what the peer was told
    pub my_port: String,

    /// Files to send, or destinations to receive into, in agreed order
    #[arg(required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("--send and --recv are mutually exclusive")]
    BothRoles,

    #[error("one of --send or --recv is required")]
    NoRole,

    #[error("invalid {which}: {source}")]
    Port {
        which: &'static str,
        #[source]
        source: PortError,
    },
}

impl UsageError {
    pub fn exit_code(&self) -> u8 {
        match self {
            UsageError::BothRoles => 2,
            UsageError::NoRole => 3,
            UsageError::Port { .. } => 4,
        }
    }
}

/// Validated command line, ready to run
#[derive(Debug)]
pub struct Invocation {
    pub role: Role,
    pub peer: Endpoint,
    pub my_port: Port,
    pub files: Vec<PathBuf>,
}

impl Args {
    pub fn validate(&self) -> Result<Invocation, UsageError> {
        let role = match (self.send, self.recv) {
            (true, true) => return Err(UsageError::BothRoles),
            (false, false) => return Err(UsageError::NoRole),
            (true, false) => Role::Sender,
            (false, true) => Role::Receiver,
        };

        let peer_port = parse_port("peer port", &self.peer_port)?;
        let my_port = parse_port("local port", &self.my_port)?;

        Ok(Invocation {
            role,
            peer: Endpoint::new(self.peer.clone(), peer_port),
            my_port,
            files: self.files.clone(),
        })
    }
}

fn parse_port(which: &'static str, text: &str) -> Result<Port, UsageError> {
    text.parse()
        .map_err(|source| UsageError::Port { which, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation, UsageError> {
        let mut argv = vec!["ffton"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap().validate()
    }

    #[test]
    fn test_sender_invocation() {
        let inv = parse(&["--send", "10.0.0.2", "9000", "9001", "a.bin", "b.bin"]).unwrap();
        assert_eq!(inv.role, Role::Sender);
        assert_eq!(inv.peer.host, "10.0.0.2");
        assert_eq!(inv.peer.port.get(), 9000);
        assert_eq!(inv.my_port.get(), 9001);
        assert_eq!(inv.files, vec![PathBuf::from("a.bin"), PathBuf::from("b.bin")]);
    }

    #[test]
    fn test_repeated_role_flag_is_accepted() {
        let inv = parse(&["--recv", "--recv", "peer", "9000", "9001", "f"]).unwrap();
        assert_eq!(inv.role, Role::Receiver);
    }

    #[test]
    fn test_role_errors() {
        let both = parse(&["--send", "--recv", "peer", "9000", "9001", "f"]).unwrap_err();
        assert_eq!(both.exit_code(), 2);

        let neither = parse(&["peer", "9000", "9001", "f"]).unwrap_err();
        assert_eq!(neither.exit_code(), 3);
    }

    #[test]
    fn test_port_errors() {
        for bad in ["80", "70000", "abc"] {
            let err = parse(&["--recv", "peer", bad, "9001", "f"]).unwrap_err();
            assert_eq!(err.exit_code(), 4, "peer port {bad}");
            let err = parse(&["--recv", "peer", "9000", bad, "f"]).unwrap_err();
            assert_eq!(err.exit_code(), 4, "local port {bad}");
        }
    }

    #[test]
    fn test_missing_positionals_fail_to_parse() {
        assert!(Args::try_parse_from(["ffton", "--send", "peer", "9000", "9001"]).is_err());
        assert!(Args::try_parse_from(["ffton", "--send"]).is_err());
    }

    #[test]
    fn test_role_checked_before_ports() {
        let err = parse(&["peer", "80", "9001", "f"]).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
