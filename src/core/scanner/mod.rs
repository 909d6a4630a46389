// src/core/scanner/mod.rs

// One module per probe; this file wires them into the per-domain pipeline.
pub mod dns_scanner;
pub mod headers_scanner;
pub mod http_scanner;
pub mod parking_scanner;
pub mod port_scanner;
pub mod ssl_scanner;
pub mod tls_hello;
pub mod whois_scanner;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use self::dns_scanner::HickoryDns;
use self::headers_scanner::{has_hsts, is_correct_redirect};
use self::http_scanner::{HTTP, HTTPS, HttpFetcher, ReqwestFetcher, connect};
use self::parking_scanner::ParkingDetector;
use self::port_scanner::{PortProber, TcpPortProber};
use self::ssl_scanner::{HandshakeProber, SystemHandshakeProber, build_matrix};
use self::whois_scanner::WhoisClient;
use crate::config::ScanConfig;
use crate::core::knowledge_base::ParkingRegistry;
use crate::core::models::{DomainTarget, ScanRecord, TlsMatrix};
use crate::errors::FatalError;

/// Where a domain's pipeline is. Stages only move forward; `Emitted` is
/// reached even when earlier stages were skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScanStage {
    Pending,
    PortChecked,
    ConnectivityChecked,
    HeadersChecked,
    TlsMatrixBuilt,
    ParkingEvaluated,
    Emitted,
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanStage::Pending => "pending",
            ScanStage::PortChecked => "port-checked",
            ScanStage::ConnectivityChecked => "connectivity-checked",
            ScanStage::HeadersChecked => "headers-checked",
            ScanStage::TlsMatrixBuilt => "tls-matrix-built",
            ScanStage::ParkingEvaluated => "parking-evaluated",
            ScanStage::Emitted => "emitted",
        };
        f.write_str(name)
    }
}

/// Everything a worker needs to scan one domain. Shared read-only by all workers.
pub struct ScanContext {
    pub ports: Arc<dyn PortProber>,
    pub http: Arc<dyn HttpFetcher>,
    pub tls: Arc<dyn HandshakeProber>,
    pub parking: Arc<ParkingDetector>,
    pub http_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl ScanContext {
    /// Wires up the real network collaborators.
    pub fn from_config(config: &ScanConfig, registry: Arc<ParkingRegistry>) -> Result<Self, FatalError> {
        let http: Arc<dyn HttpFetcher> = Arc::new(ReqwestFetcher::new(config)?);
        let parking = if config.whois_enabled {
            ParkingDetector::with_registration(
                registry,
                http.clone(),
                config.http_timeout(),
                Arc::new(HickoryDns::new(config.dns_timeout())),
                Arc::new(WhoisClient::new(config.whois_timeout())),
            )
        } else {
            ParkingDetector::plain(registry, http.clone(), config.http_timeout())
        };
        info!(strategies = ?parking.strategy_names(), "Parking detector ready.");

        Ok(Self {
            ports: Arc::new(TcpPortProber {
                connect_timeout: config.connect_timeout(),
                retry: config.retry_policy(),
            }),
            http,
            tls: Arc::new(SystemHandshakeProber::new(config.handshake_timeout())),
            parking: Arc::new(parking),
            http_timeout: config.http_timeout(),
            handshake_timeout: config.handshake_timeout(),
        })
    }
}

/// Runs the whole pipeline for one domain and returns its record.
///
/// The steps run strictly in order since later ones reuse earlier results.
/// No step can fail the pipeline: every probe error ends up as a `false` or
/// `indeterminate` field.
pub async fn scan_domain(ctx: &ScanContext, target: DomainTarget) -> ScanRecord {
    let host = target.as_str().to_string();
    let mut record = ScanRecord::new(target.clone());
    let mut stage = ScanStage::Pending;
    info!(domain = %target, "Starting domain scan.");

    let port80 = ctx.ports.probe(&host, 80).await;
    let port443 = ctx.ports.probe(&host, 443).await;
    advance(&target, &mut stage, ScanStage::PortChecked);

    let http_page = if port80 {
        connect(ctx.http.as_ref(), &format!("{HTTP}{host}/"), ctx.http_timeout).await.ok()
    } else {
        None
    };
    let https_page = if port443 {
        match connect(ctx.http.as_ref(), &format!("{HTTPS}{host}/"), ctx.http_timeout).await {
            Ok(page) => Some(page),
            Err(e) => {
                warn!(domain = %target, error = %e, "HTTPS fetch failed, HSTS recorded as absent.");
                None
            }
        }
    } else {
        None
    };
    record.http_reachable = http_page.is_some();
    record.https_reachable = https_page.is_some();
    advance(&target, &mut stage, ScanStage::ConnectivityChecked);

    if let Some(page) = &http_page {
        record.https_redirect_ok = is_correct_redirect(page);
    }
    if let Some(page) = &https_page {
        record.hsts_present = has_hsts(page);
    }
    advance(&target, &mut stage, ScanStage::HeadersChecked);

    record.tls_support = if port443 {
        build_matrix(ctx.tls.as_ref(), &host, ctx.handshake_timeout).await
    } else {
        debug!(domain = %target, "Port 443 closed, skipping handshakes.");
        TlsMatrix::indeterminate()
    };
    advance(&target, &mut stage, ScanStage::TlsMatrixBuilt);

    if record.http_reachable || record.https_reachable {
        let page = https_page.as_ref().or(http_page.as_ref());
        record.is_parked = ctx.parking.is_parked(&target, page).await;
    }
    advance(&target, &mut stage, ScanStage::ParkingEvaluated);

    advance(&target, &mut stage, ScanStage::Emitted);
    info!(
        domain = %target,
        http = record.http_reachable,
        https = record.https_reachable,
        hsts = record.hsts_present,
        redirect_ok = record.https_redirect_ok,
        parked = record.is_parked,
        "Domain scan finished."
    );
    record
}

fn advance(target: &DomainTarget, stage: &mut ScanStage, next: ScanStage) {
    let current = *stage;
    debug_assert!(next > current);
    debug!(domain = %target, from = %current, to = %next, "Stage transition.");
    *stage = next;
}
