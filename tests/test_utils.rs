#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use domain_posture::core::knowledge_base::ParkingRegistry;
use domain_posture::core::models::{HttpResponse, ProtocolVersion, SupportState};
use domain_posture::core::scanner::ScanContext;
use domain_posture::core::scanner::http_scanner::HttpFetcher;
use domain_posture::core::scanner::parking_scanner::ParkingDetector;
use domain_posture::core::scanner::port_scanner::PortProber;
use domain_posture::core::scanner::ssl_scanner::HandshakeProber;
use domain_posture::errors::ProbeError;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// How one fake host behaves on every probe.
#[derive(Debug, Clone, Default)]
pub struct HostProfile {
    pub port80: bool,
    pub port443: bool,
    pub http: Option<(u16, Vec<(&'static str, &'static str)>, &'static str)>,
    pub https: Option<(u16, Vec<(&'static str, &'static str)>, &'static str)>,
    pub tls: BTreeMap<ProtocolVersion, SupportState>,
    pub panic_on_fetch: bool,
}

pub fn response(status: u16, headers: &[(&'static str, &'static str)], body: &str) -> HttpResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    HttpResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: map,
        body: body.as_bytes().to_vec(),
    }
}

/// A scripted internet. Unknown hosts refuse everything.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    hosts: HashMap<String, HostProfile>,
    pub handshakes: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, name: &str, profile: HostProfile) -> Self {
        self.hosts.insert(name.to_string(), profile);
        self
    }

    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortProber for FakeNetwork {
    async fn probe(&self, host: &str, port: u16) -> bool {
        // Give other workers a chance to interleave.
        tokio::task::yield_now().await;
        self.hosts.get(host).is_some_and(|p| match port {
            80 => p.port80,
            443 => p.port443,
            _ => false,
        })
    }
}

#[async_trait]
impl HttpFetcher for FakeNetwork {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, ProbeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let parsed = url::Url::parse(url).map_err(|e| ProbeError::ParseFailure(e.to_string()))?;
        let host = parsed.host_str().unwrap_or_default();
        let profile = self
            .hosts
            .get(host)
            .ok_or_else(|| ProbeError::Connection(format!("dns error: {host}")))?;
        if profile.panic_on_fetch {
            panic!("scripted panic for {host}");
        }
        let scripted = match parsed.scheme() {
            "https" => &profile.https,
            _ => &profile.http,
        };
        match scripted {
            Some((status, headers, body)) => Ok(response(*status, headers, body)),
            None => Err(ProbeError::Timeout(Duration::from_millis(10))),
        }
    }
}

#[async_trait]
impl HandshakeProber for FakeNetwork {
    async fn attempt(&self, host: &str, version: ProtocolVersion) -> Result<(), ProbeError> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        let state = self
            .hosts
            .get(host)
            .and_then(|p| p.tls.get(&version).copied())
            .unwrap_or(SupportState::Indeterminate);
        match state {
            SupportState::Supported => Ok(()),
            SupportState::Rejected => Err(ProbeError::TlsHandshakeRejected(version)),
            SupportState::Indeterminate => Err(ProbeError::Connection("reset by peer".into())),
        }
    }
}

/// Modern server: TLS 1.2, 1.3 and negotiated supported, everything older refused.
pub fn modern_tls() -> BTreeMap<ProtocolVersion, SupportState> {
    use ProtocolVersion::*;
    [
        (Ssl2, SupportState::Rejected),
        (Ssl3, SupportState::Rejected),
        (Tls10, SupportState::Rejected),
        (Tls11, SupportState::Rejected),
        (Tls12, SupportState::Supported),
        (Tls13, SupportState::Supported),
        (Negotiated, SupportState::Supported),
    ]
    .into_iter()
    .collect()
}

pub fn create_test_context(network: Arc<FakeNetwork>) -> ScanContext {
    let timeout = Duration::from_millis(200);
    ScanContext {
        ports: network.clone(),
        http: network.clone(),
        tls: network.clone(),
        parking: Arc::new(ParkingDetector::plain(
            Arc::new(ParkingRegistry::builtin()),
            network,
            timeout,
        )),
        http_timeout: timeout,
        handshake_timeout: timeout,
    }
}
