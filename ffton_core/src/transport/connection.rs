use quinn::{Endpoint, Incoming, RecvStream, SendStream, VarInt};
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::quic::{self, HELLO, SERVER_NAME};
use super::{ADDRESS_TRANSLATION_FAILED, ConnectionError, Transport};
use crate::config::ConnectionConfig;
use crate::endpoint::Port;
use crate::resolver;

/// Datagram sent by the answering side to open its NAT mapping.
/// It lacks the QUIC fixed bit, so the peer's endpoint drops it.
const PUNCH: [u8; 1] = [0];

/// Application close codes: a `close()` that confirmed delivery, versus a
/// connection dropped or closed without that confirmation
const CLOSE_CODE: u32 = 0;
const ABANDON_CODE: u32 = 1;

/// Which side starts the QUIC handshake during a rendezvous
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeSide {
    /// Sends the first handshake packet and opens the transfer stream
    Dial,
    /// Punches towards the peer and accepts its handshake
    Answer,
}

enum Socket {
    Unbound,
    Bound(UdpSocket),
    Open {
        endpoint: Endpoint,
        punch: Option<UdpSocket>,
    },
    Closed,
}

struct Link {
    connection: quinn::Connection,
    send: SendStream,
    recv: RecvStream,
}

/// A single transport connection to the peer
///
/// Lifecycle: unconnected, configured (rendezvous mode, linger), bound,
/// connected, closed. The connection is closed exactly once, either by
/// [`RendezvousConnection::close`] or on drop.
pub struct RendezvousConnection {
    side: HandshakeSide,
    settings: ConnectionConfig,
    rendezvous: bool,
    linger: bool,
    socket: Socket,
    owns_endpoint: bool,
    link: Option<Link>,
    local_error: Option<String>,
    transport_error: Option<String>,
}

impl RendezvousConnection {
    pub fn new(side: HandshakeSide, settings: ConnectionConfig) -> Self {
        Self {
            side,
            settings,
            rendezvous: false,
            linger: false,
            socket: Socket::Unbound,
            owns_endpoint: true,
            link: None,
            local_error: None,
            transport_error: None,
        }
    }

    pub fn side(&self) -> HandshakeSide {
        self.side
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Local UDP port once bound
    pub fn local_port(&self) -> Option<u16> {
        match &self.socket {
            Socket::Bound(socket) => socket.local_addr().ok().map(|a| a.port()),
            Socket::Open { endpoint, .. } => endpoint.local_addr().ok().map(|a| a.port()),
            Socket::Unbound | Socket::Closed => None,
        }
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.connection.remote_address())
    }

    /// Last error message; locally generated errors win over transport errors
    pub fn last_error(&self) -> Option<&str> {
        self.local_error
            .as_deref()
            .or(self.transport_error.as_deref())
    }

    fn track<T>(&mut self, result: Result<T, ConnectionError>) -> Result<T, ConnectionError> {
        if let Err(e) = &result {
            match e {
                ConnectionError::AddressTranslation(_) => {
                    self.local_error = Some(ADDRESS_TRANSLATION_FAILED.to_string());
                }
                e if e.is_local() => self.local_error = Some(e.to_string()),
                e => self.transport_error = Some(e.to_string()),
            }
        }
        result
    }

    fn require_unbound(&self, option: &'static str) -> Result<(), ConnectionError> {
        match self.socket {
            Socket::Unbound => Ok(()),
            _ => Err(ConnectionError::SocketOption {
                option,
                reason: "must be set before bind or connect",
            }),
        }
    }

    pub fn enable_rendezvous_mode(&mut self) -> Result<(), ConnectionError> {
        let result = self.require_unbound("rendezvous mode");
        if result.is_ok() {
            self.rendezvous = true;
            debug!("Rendezvous mode enabled");
        }
        self.track(result)
    }

    pub fn enable_linger(&mut self) -> Result<(), ConnectionError> {
        let result = self.require_unbound("linger");
        if result.is_ok() {
            self.linger = true;
            debug!("Linger enabled");
        }
        self.track(result)
    }

    /// Bind to the wildcard address on `port`
    pub fn bind(&mut self, port: Port) -> Result<(), ConnectionError> {
        let result = self.bind_socket(port.get());
        self.track(result)
    }

    fn bind_socket(&mut self, port: u16) -> Result<(), ConnectionError> {
        if !matches!(self.socket, Socket::Unbound) {
            return Err(ConnectionError::InvalidState("socket is already bound"));
        }
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
            .map_err(|source| ConnectionError::Bind { port, source })?;
        debug!("Bound to {}", socket.local_addr()?);
        self.socket = Socket::Bound(socket);
        Ok(())
    }

    fn open_endpoint(&mut self, backlog: u32) -> Result<(), ConnectionError> {
        if matches!(self.socket, Socket::Unbound) {
            self.bind_socket(0)?;
        }
        match mem::replace(&mut self.socket, Socket::Closed) {
            Socket::Bound(socket) => {
                let punch = if self.rendezvous {
                    Some(socket.try_clone()?)
                } else {
                    None
                };
                let endpoint = quic::make_endpoint(socket, &self.settings, backlog)?;
                self.socket = Socket::Open { endpoint, punch };
                Ok(())
            }
            open @ Socket::Open { .. } => {
                self.socket = open;
                Ok(())
            }
            _ => Err(ConnectionError::InvalidState("connection is closed")),
        }
    }

    /// Start accepting handshakes, at most `backlog` pending at a time
    pub fn listen(&mut self, backlog: u32) -> Result<(), ConnectionError> {
        let result = if matches!(self.socket, Socket::Unbound) {
            Err(ConnectionError::InvalidState("listen requires a bound socket"))
        } else {
            self.open_endpoint(backlog)
        };
        if result.is_ok() {
            info!("Listening on port {:?}", self.local_port());
        }
        self.track(result)
    }

    /// Accept the next incoming connection
    ///
    /// The returned connection shares this one's endpoint; closing it does
    /// not stop the listener.
    pub async fn accept(&mut self) -> Result<RendezvousConnection, ConnectionError> {
        let result = self.accept_inner().await;
        self.track(result)
    }

    async fn accept_inner(&mut self) -> Result<RendezvousConnection, ConnectionError> {
        let Socket::Open { endpoint, .. } = &self.socket else {
            return Err(ConnectionError::InvalidState("accept requires listen"));
        };
        let endpoint = endpoint.clone();

        let incoming = endpoint.accept().await.ok_or(ConnectionError::EndpointClosed)?;
        let link = answer_handshake(incoming).await?;
        info!("Accepted connection from {}", link.connection.remote_address());

        Ok(RendezvousConnection {
            side: HandshakeSide::Answer,
            settings: self.settings.clone(),
            rendezvous: false,
            linger: self.linger,
            socket: Socket::Open {
                endpoint,
                punch: None,
            },
            owns_endpoint: false,
            link: Some(link),
            local_error: None,
            transport_error: None,
        })
    }

    /// Rendezvous setup: mode, linger, bind, connect, stopping at the first failure
    pub async fn connect_rendezvous(
        &mut self,
        local_port: Port,
        peer_host: &str,
        peer_port: Port,
    ) -> Result<(), ConnectionError> {
        self.enable_rendezvous_mode()?;
        self.enable_linger()?;
        self.bind(local_port)?;
        self.connect_active(peer_host, peer_port).await
    }

    /// Resolve the peer and establish the connection from this side
    pub async fn connect_active(
        &mut self,
        peer_host: &str,
        peer_port: Port,
    ) -> Result<(), ConnectionError> {
        let result = self.connect_inner(peer_host, peer_port).await;
        self.track(result)
    }

    async fn connect_inner(
        &mut self,
        peer_host: &str,
        peer_port: Port,
    ) -> Result<(), ConnectionError> {
        if self.link.is_some() {
            return Err(ConnectionError::InvalidState("already connected"));
        }

        let ip = resolver::resolve(peer_host)
            .await
            .map_err(ConnectionError::AddressTranslation)?;
        let peer = SocketAddrV4::new(ip, peer_port.get());

        self.open_endpoint(self.settings.listen_backlog)?;
        let Socket::Open { endpoint, punch } = &self.socket else {
            return Err(ConnectionError::InvalidState("connection is closed"));
        };

        info!(
            "Connecting to {} ({}) as {:?} side, rendezvous={}",
            peer_host, peer, self.side, self.rendezvous
        );
        let start = std::time::Instant::now();

        let link = match self.side {
            HandshakeSide::Dial => dial(endpoint, peer, &self.settings).await?,
            HandshakeSide::Answer => answer(endpoint, punch.as_ref(), peer, &self.settings).await?,
        };

        info!(
            "Connected to {} in {:?}",
            link.connection.remote_address(),
            start.elapsed()
        );
        self.link = Some(link);
        Ok(())
    }

    /// Release the connection; later calls do nothing
    ///
    /// With linger enabled, finishes the send stream and waits until the
    /// peer has acknowledged every byte and finished its own stream, which
    /// it only does once it has stopped reading. The wait lasts as long as
    /// the connection is alive, or up to `linger_timeout_secs` when set.
    /// An error means sent data may not have reached the peer.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let mut result = Ok(());

        if let Some(mut link) = self.link.take() {
            if self.linger {
                result = linger(&mut link, &self.settings).await;
                match &result {
                    Ok(()) => debug!("Peer released the stream"),
                    Err(e) => warn!("Closing before the peer confirmed delivery: {}", e),
                }
            }
            match &result {
                Ok(()) => link.connection.close(VarInt::from_u32(CLOSE_CODE), b"done"),
                Err(_) => link
                    .connection
                    .close(VarInt::from_u32(ABANDON_CODE), b"unconfirmed"),
            }
        }

        if let Socket::Open { endpoint, .. } = mem::replace(&mut self.socket, Socket::Closed) {
            if self.owns_endpoint {
                endpoint.close(VarInt::from_u32(CLOSE_CODE), b"done");
                if self.linger {
                    endpoint.wait_idle().await;
                }
            }
        }

        self.track(result)
    }
}

impl Transport for RendezvousConnection {
    async fn send_best_effort(&mut self, buf: &[u8]) -> Result<usize, ConnectionError> {
        let result = match self.link.as_mut() {
            None => Err(ConnectionError::InvalidState("not connected")),
            Some(_) if buf.is_empty() => Ok(0),
            Some(link) => link.send.write(buf).await.map_err(ConnectionError::from),
        };
        self.track(result)
    }

    async fn recv_best_effort(&mut self, buf: &mut [u8]) -> Result<usize, ConnectionError> {
        let result = match self.link.as_mut() {
            None => Err(ConnectionError::InvalidState("not connected")),
            Some(_) if buf.is_empty() => Ok(0),
            Some(link) => match link.recv.read(buf).await {
                Ok(Some(n)) => Ok(n),
                Ok(None) => Err(ConnectionError::PeerFinished),
                Err(e) => Err(e.into()),
            },
        };
        self.track(result)
    }
}

impl Drop for RendezvousConnection {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.connection.close(VarInt::from_u32(ABANDON_CODE), b"dropped");
        }
        if let Socket::Open { endpoint, .. } = &self.socket {
            if self.owns_endpoint {
                endpoint.close(VarInt::from_u32(ABANDON_CODE), b"dropped");
            }
        }
    }
}

async fn dial(
    endpoint: &Endpoint,
    peer: SocketAddrV4,
    settings: &ConnectionConfig,
) -> Result<Link, ConnectionError> {
    let connecting = endpoint.connect(SocketAddr::V4(peer), SERVER_NAME)?;
    let connection = timeout(settings.handshake_timeout(), connecting)
        .await
        .map_err(|_| ConnectionError::Timeout(settings.handshake_timeout()))??;

    let (mut send, recv) = connection.open_bi().await?;
    send.write_all(HELLO).await?;
    debug!("Transfer stream opened");

    Ok(Link {
        connection,
        send,
        recv,
    })
}

async fn answer(
    endpoint: &Endpoint,
    punch: Option<&UdpSocket>,
    peer: SocketAddrV4,
    settings: &ConnectionConfig,
) -> Result<Link, ConnectionError> {
    let wait = async {
        let mut ticker = tokio::time::interval(settings.punch_interval());
        loop {
            tokio::select! {
                _ = ticker.tick(), if punch.is_some() => {
                    if let Some(socket) = punch {
                        send_punch(socket, peer);
                    }
                }
                incoming = endpoint.accept() => {
                    let Some(incoming) = incoming else {
                        return Err(ConnectionError::EndpointClosed);
                    };
                    let remote = incoming.remote_address();
                    if !accepts_from(*peer.ip(), remote) {
                        warn!("Refusing connection from unexpected peer {}", remote);
                        incoming.refuse();
                        continue;
                    }
                    return answer_handshake(incoming).await;
                }
            }
        }
    };

    timeout(settings.handshake_timeout(), wait)
        .await
        .map_err(|_| ConnectionError::Timeout(settings.handshake_timeout()))?
}

/// Wait until everything sent was acknowledged and the peer finished its stream
async fn linger(link: &mut Link, settings: &ConnectionConfig) -> Result<(), ConnectionError> {
    let _ = link.send.finish();

    let delivered = async {
        match link.send.stopped().await {
            Ok(None) => {}
            Ok(Some(code)) => return Err(ConnectionError::StoppedEarly(code.into_inner())),
            Err(quinn::StoppedError::ConnectionLost(e)) if closed_by_peer(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        match drain(&mut link.recv).await {
            Ok(()) => Ok(()),
            Err(quinn::ReadError::ConnectionLost(e)) if closed_by_peer(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    };

    match settings.linger_timeout() {
        Some(limit) => timeout(limit, delivered)
            .await
            .map_err(|_| ConnectionError::LingerTimeout(limit))?,
        None => delivered.await,
    }
}

/// Discard whatever the peer still sends until it finishes the stream
async fn drain(recv: &mut RecvStream) -> Result<(), quinn::ReadError> {
    while recv.read_chunk(usize::MAX, true).await?.is_some() {}
    Ok(())
}

/// The peer got through its own `close()`, so it is done reading
fn closed_by_peer(error: &quinn::ConnectionError) -> bool {
    matches!(
        error,
        quinn::ConnectionError::ApplicationClosed(close)
            if close.error_code == VarInt::from_u32(CLOSE_CODE)
    )
}

fn send_punch(socket: &UdpSocket, peer: SocketAddrV4) {
    // The socket is non-blocking once quinn owns it; a full buffer only skips one punch
    if let Err(e) = socket.send_to(&PUNCH, peer) {
        debug!("Punch to {} failed: {}", peer, e);
    }
}

async fn answer_handshake(incoming: Incoming) -> Result<Link, ConnectionError> {
    let connection = incoming.await?;
    let (send, mut recv) = connection.accept_bi().await?;

    let mut hello = [0u8; HELLO.len()];
    recv.read_exact(&mut hello).await.map_err(|e| match e {
        quinn::ReadExactError::FinishedEarly(_) => {
            ConnectionError::Handshake("peer closed the stream before greeting".into())
        }
        quinn::ReadExactError::ReadError(e) => ConnectionError::Read(e),
    })?;
    if &hello != HELLO {
        return Err(ConnectionError::Handshake(format!(
            "unexpected greeting {:?}",
            hello
        )));
    }
    debug!("Transfer stream accepted");

    Ok(Link {
        connection,
        send,
        recv,
    })
}

/// An unspecified expected address accepts any peer; the port is not
/// compared because NATs may rewrite it
fn accepts_from(expected: Ipv4Addr, remote: SocketAddr) -> bool {
    if expected.is_unspecified() {
        return true;
    }
    match remote.ip() {
        IpAddr::V4(ip) => ip == expected,
        IpAddr::V6(ip) => ip.to_ipv4_mapped() == Some(expected),
    }
}
