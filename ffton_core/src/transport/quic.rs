use quinn::{ClientConfig, Endpoint, EndpointConfig, ServerConfig, TransportConfig};
use rcgen::generate_simple_self_signed;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::net::UdpSocket;
use std::sync::Arc;

use super::ConnectionError;
use crate::config::ConnectionConfig;

/// ALPN protocol identifier for ffton
pub const ALPN: &[u8] = b"ffton";

/// Name presented in the TLS handshake; certificates are self-signed
pub const SERVER_NAME: &str = "localhost";

/// Written by the dialing side when it opens the transfer stream
pub const HELLO: &[u8; 6] = b"FFTON\x00";

/// Install the ring crypto provider for rustls (no-op when already installed)
pub fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Generate a self-signed certificate for QUIC
pub fn generate_self_signed_cert()
-> Result<(Vec<CertificateDer<'static>>, PrivatePkcs8KeyDer<'static>), ConnectionError> {
    let certified_key = generate_simple_self_signed(vec![SERVER_NAME.to_string()])
        .map_err(|e| ConnectionError::Tls(e.to_string()))?;
    let key = PrivatePkcs8KeyDer::from(certified_key.signing_key.serialize_der());
    let cert_der = CertificateDer::from(certified_key.cert.der().to_vec());
    Ok((vec![cert_der], key))
}

fn transport_config(settings: &ConnectionConfig) -> Result<TransportConfig, ConnectionError> {
    let mut transport_config = TransportConfig::default();
    let idle_timeout = settings
        .idle_timeout()
        .try_into()
        .map_err(|_| ConnectionError::InvalidState("idle timeout out of range"))?;
    transport_config.max_idle_timeout(Some(idle_timeout));
    if settings.keep_alive_secs > 0 {
        transport_config.keep_alive_interval(Some(settings.keep_alive()));
    }
    // Optimize for throughput
    transport_config.stream_receive_window((16 * 1024 * 1024 as u32).into()); // 16 MiB
    transport_config.receive_window((32 * 1024 * 1024 as u32).into()); // 32 MiB
    transport_config.send_window(32 * 1024 * 1024);
    Ok(transport_config)
}

/// Server half: self-signed certificate, at most `backlog` pending handshakes
pub fn make_server_config(
    settings: &ConnectionConfig,
    backlog: u32,
) -> Result<ServerConfig, ConnectionError> {
    let (certs, key) = generate_self_signed_cert()?;

    let mut server_crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key.into())
        .map_err(|e| ConnectionError::Tls(e.to_string()))?;

    server_crypto.alpn_protocols = vec![ALPN.to_vec()];

    let mut server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
            .map_err(|e| ConnectionError::Tls(e.to_string()))?,
    ));
    server_config.transport_config(Arc::new(transport_config(settings)?));
    server_config.max_incoming(backlog.max(1) as usize);

    Ok(server_config)
}

/// Client half: peers are not authenticated, so certificate checks are skipped
pub fn make_client_config(settings: &ConnectionConfig) -> Result<ClientConfig, ConnectionError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AnyPeerCertificate::new()))
        .with_no_client_auth();

    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let mut client_config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| ConnectionError::Tls(e.to_string()))?,
    ));
    client_config.transport_config(Arc::new(transport_config(settings)?));

    Ok(client_config)
}

/// Create an endpoint on an already bound socket, able to both dial and answer
pub fn make_endpoint(
    socket: UdpSocket,
    settings: &ConnectionConfig,
    backlog: u32,
) -> Result<Endpoint, ConnectionError> {
    ensure_crypto_provider();
    socket.set_nonblocking(true)?;

    let server_config = make_server_config(settings, backlog)?;
    let client_config = make_client_config(settings)?;

    let mut endpoint = Endpoint::new(
        EndpointConfig::default(),
        Some(server_config),
        socket,
        Arc::new(quinn::TokioRuntime),
    )?;
    endpoint.set_default_client_config(client_config);

    Ok(endpoint)
}

/// Accepts whatever certificate the peer presents, since peers use throwaway
/// self-signed ones, but still checks the handshake signatures made with it
#[derive(Debug)]
struct AnyPeerCertificate {
    provider: Arc<CryptoProvider>,
}

impl AnyPeerCertificate {
    fn new() -> Self {
        Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }
}

impl ServerCertVerifier for AnyPeerCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
