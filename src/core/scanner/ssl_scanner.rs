// src/core/scanner/ssl_scanner.rs

use std::time::Duration;

use async_trait::async_trait;
use native_tls::TlsConnector;
use strum::IntoEnumIterator;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::tls_hello::attempt_hello;
use crate::core::models::{ProtocolVersion, SupportState, TlsMatrix};
use crate::errors::ProbeError;

pub const TLS_PORT: u16 = 443;

// Library messages that mean the peer refused the protocol itself. Anything
// else (a non-TLS peer, a decode error, an internal fault) is undetermined.
const VERSION_REFUSALS: &[&str] = &[
    "alert protocol version",
    "alert handshake failure",
    "unsupported protocol",
    "no protocols available",
    "protocol version not supported",
];

/// Attempts one handshake pinned to `version`.
///
/// `Ok(())` means the peer completed it, `TlsHandshakeRejected` means the peer
/// refused the version, any other error leaves the version undetermined.
#[async_trait]
pub trait HandshakeProber: Send + Sync {
    async fn attempt(&self, host: &str, version: ProtocolVersion) -> Result<(), ProbeError>;
}

/// Default prober. Pinned versions go through a raw hello exchange; the
/// negotiated entry runs a full `native-tls` handshake with library defaults.
#[derive(Debug, Clone)]
pub struct SystemHandshakeProber {
    pub port: u16,
    pub timeout: Duration,
}

impl SystemHandshakeProber {
    pub fn new(timeout: Duration) -> Self {
        Self { port: TLS_PORT, timeout }
    }
}

#[async_trait]
impl HandshakeProber for SystemHandshakeProber {
    async fn attempt(&self, host: &str, version: ProtocolVersion) -> Result<(), ProbeError> {
        match version {
            ProtocolVersion::Negotiated => timeout(self.timeout, negotiated_handshake(host, self.port))
                .await
                .map_err(|_| ProbeError::Timeout(self.timeout))?,
            pinned => attempt_hello(host, self.port, pinned, self.timeout).await,
        }
    }
}

// Fully async so that dropping the future on timeout also drops the socket.
async fn negotiated_handshake(host: &str, port: u16) -> Result<(), ProbeError> {
    // Posture only: certificate problems must not read as a refused protocol.
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| {
            error!(error = %e, "Failed to create TlsConnector");
            ProbeError::TlsHandshake(format!("TlsConnector Error: {e}"))
        })?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let addr = lookup_host((host, port))
        .await
        .map_err(|e| ProbeError::LookupFailure(e.to_string()))?
        .next()
        .ok_or_else(|| ProbeError::LookupFailure(format!("{host} has no addresses")))?;

    debug!(host, %addr, "Connecting TCP stream for negotiated handshake.");
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ProbeError::Connection(e.to_string()))?;

    match connector.connect(host, stream).await {
        Ok(_) => Ok(()),
        Err(e) => Err(classify_handshake_failure(&e)),
    }
}

/// Only an explicit version refusal counts as rejected; transport errors and
/// library faults stay undetermined.
fn classify_handshake_failure(error: &native_tls::Error) -> ProbeError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(error);
    while let Some(cause) = source {
        if cause.is::<std::io::Error>() {
            return ProbeError::TlsHandshake(error.to_string());
        }
        source = cause.source();
    }
    let message = error.to_string();
    if is_version_refusal(&message) {
        ProbeError::TlsHandshakeRejected(ProtocolVersion::Negotiated)
    } else {
        ProbeError::TlsHandshake(message)
    }
}

pub fn is_version_refusal(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    VERSION_REFUSALS.iter().any(|needle| message.contains(needle))
}

/// Probes every protocol version against `host` and classifies each one.
///
/// Versions are probed one after another, each under its own `per_version`
/// timeout, and a failure for one never stops the rest: the returned matrix
/// always carries every version.
pub async fn build_matrix(prober: &dyn HandshakeProber, host: &str, per_version: Duration) -> TlsMatrix {
    info!(host, "Building TLS capability matrix.");
    let mut matrix = TlsMatrix::indeterminate();

    for version in ProtocolVersion::iter() {
        let outcome = match timeout(per_version, prober.attempt(host, version)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout(per_version)),
        };
        let state = SupportState::from_outcome(&outcome);
        match &outcome {
            Err(e) if state == SupportState::Indeterminate => {
                debug!(host, %version, error = %e, "Handshake attempt errored.");
            }
            _ => debug!(host, %version, ?state, "Handshake attempt classified."),
        }
        matrix.set(version, state);
    }

    let supported = matrix.iter().filter(|(_, s)| s.is_supported()).count();
    info!(host, supported, "TLS capability matrix built.");
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct ScriptedProber {
        outcomes: HashMap<ProtocolVersion, fn() -> Result<(), ProbeError>>,
        stall: Option<ProtocolVersion>,
    }

    #[async_trait]
    impl HandshakeProber for ScriptedProber {
        async fn attempt(&self, _host: &str, version: ProtocolVersion) -> Result<(), ProbeError> {
            if self.stall == Some(version) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            match self.outcomes.get(&version) {
                Some(outcome) => outcome(),
                None => Err(ProbeError::Connection("connection reset by peer".into())),
            }
        }
    }

    fn rejected_ssl3() -> Result<(), ProbeError> {
        Err(ProbeError::TlsHandshakeRejected(ProtocolVersion::Ssl3))
    }

    #[tokio::test]
    async fn modern_only_server() {
        let mut outcomes: HashMap<ProtocolVersion, fn() -> Result<(), ProbeError>> = HashMap::new();
        for v in [ProtocolVersion::Ssl2, ProtocolVersion::Ssl3, ProtocolVersion::Tls10, ProtocolVersion::Tls11] {
            outcomes.insert(v, rejected_ssl3);
        }
        for v in [ProtocolVersion::Tls12, ProtocolVersion::Tls13, ProtocolVersion::Negotiated] {
            outcomes.insert(v, || Ok(()));
        }
        let prober = ScriptedProber { outcomes, stall: None };

        let matrix = build_matrix(&prober, "example.com", Duration::from_secs(1)).await;
        assert_eq!(matrix.get(ProtocolVersion::Ssl2), SupportState::Rejected);
        assert_eq!(matrix.get(ProtocolVersion::Ssl3), SupportState::Rejected);
        assert_eq!(matrix.get(ProtocolVersion::Tls10), SupportState::Rejected);
        assert_eq!(matrix.get(ProtocolVersion::Tls11), SupportState::Rejected);
        assert_eq!(matrix.get(ProtocolVersion::Tls12), SupportState::Supported);
        assert_eq!(matrix.get(ProtocolVersion::Tls13), SupportState::Supported);
    }

    #[tokio::test]
    async fn unreachable_host_is_fully_indeterminate() {
        let prober = ScriptedProber { outcomes: HashMap::new(), stall: None };
        let matrix = build_matrix(&prober, "example.com", Duration::from_secs(1)).await;
        assert_eq!(matrix.len(), ProtocolVersion::iter().count());
        assert!(matrix.iter().all(|(_, s)| s == SupportState::Indeterminate));
    }

    #[tokio::test]
    async fn stalled_version_does_not_block_the_rest() {
        let mut outcomes: HashMap<ProtocolVersion, fn() -> Result<(), ProbeError>> = HashMap::new();
        outcomes.insert(ProtocolVersion::Tls12, || Ok(()));
        outcomes.insert(ProtocolVersion::Tls13, || Ok(()));
        let prober = ScriptedProber { outcomes, stall: Some(ProtocolVersion::Tls10) };

        let started = std::time::Instant::now();
        let matrix = build_matrix(&prober, "example.com", Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(matrix.get(ProtocolVersion::Tls10), SupportState::Indeterminate);
        assert_eq!(matrix.get(ProtocolVersion::Tls12), SupportState::Supported);
        assert_eq!(matrix.get(ProtocolVersion::Tls13), SupportState::Supported);
    }

    #[test]
    fn only_version_refusals_count_as_rejected() {
        assert!(is_version_refusal(
            "error:0A00042E:SSL routines:ssl3_read_bytes:tlsv1 alert protocol version"
        ));
        assert!(is_version_refusal("error:0A000410:SSL routines::sslv3 alert handshake failure"));
        assert!(is_version_refusal("error:0A0000BF:SSL routines::no protocols available"));
        assert!(!is_version_refusal("error:0A00010B:SSL routines:ssl3_get_record:wrong version number"));
        assert!(!is_version_refusal("error:0A0000F4:SSL routines::unexpected message"));
        assert!(!is_version_refusal("packet length too long"));
    }

    #[tokio::test]
    async fn negotiated_handshake_with_plain_http_peer_is_indeterminate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
                let _ = socket.shutdown().await;
            }
        });

        let prober = SystemHandshakeProber { port, timeout: Duration::from_secs(3) };
        let outcome = prober.attempt("127.0.0.1", ProtocolVersion::Negotiated).await;
        assert!(
            !matches!(outcome, Err(ProbeError::TlsHandshakeRejected(_))),
            "plain HTTP peer reported as refusing TLS: {outcome:?}"
        );
        assert_eq!(SupportState::from_outcome(&outcome), SupportState::Indeterminate);
    }

    #[tokio::test]
    async fn negotiated_handshake_gives_up_on_a_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Accept and hold the socket without ever answering.
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(socket);
            }
        });

        let limit = Duration::from_millis(300);
        let prober = SystemHandshakeProber { port, timeout: limit };
        let started = std::time::Instant::now();
        let outcome = prober.attempt("127.0.0.1", ProtocolVersion::Negotiated).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(matches!(outcome, Err(ProbeError::Timeout(d)) if d == limit));
    }

    #[tokio::test]
    async fn negotiated_handshake_to_closed_port_is_indeterminate() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let prober = SystemHandshakeProber { port, timeout: Duration::from_secs(1) };
        let outcome = prober.attempt("127.0.0.1", ProtocolVersion::Negotiated).await;
        assert_eq!(SupportState::from_outcome(&outcome), SupportState::Indeterminate);
    }
}
