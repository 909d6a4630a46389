// src/core/models.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::errors::ProbeError;

// --- Target ---

/// A normalized hostname: schema stripped, path dropped, lower-cased, trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DomainTarget(String);

impl DomainTarget {
    /// Normalizes a raw input line. Returns `None` when nothing host-like is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let lowered = trimmed.to_ascii_lowercase();
        let without_schema = lowered
            .strip_prefix("https://")
            .or_else(|| lowered.strip_prefix("http://"))
            .unwrap_or(&lowered);

        let host = without_schema
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .trim()
            .trim_end_matches('.');

        if host.is_empty() {
            return None;
        }
        Some(Self(host.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- TLS capability matrix ---

// Declaration order is the output column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display, Serialize)]
pub enum ProtocolVersion {
    #[strum(serialize = "SSLv2")]
    #[serde(rename = "SSLv2")]
    Ssl2,
    #[strum(serialize = "SSLv3")]
    #[serde(rename = "SSLv3")]
    Ssl3,
    #[strum(serialize = "TLSv1.0")]
    #[serde(rename = "TLSv1.0")]
    Tls10,
    #[strum(serialize = "TLSv1.1")]
    #[serde(rename = "TLSv1.1")]
    Tls11,
    #[strum(serialize = "TLSv1.2")]
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[strum(serialize = "TLSv1.3")]
    #[serde(rename = "TLSv1.3")]
    Tls13,
    #[strum(serialize = "any")]
    #[serde(rename = "any")]
    Negotiated,
}

impl ProtocolVersion {
    /// Output column name.
    pub fn column(self) -> &'static str {
        match self {
            ProtocolVersion::Ssl2 => "sslv2",
            ProtocolVersion::Ssl3 => "sslv3",
            ProtocolVersion::Tls10 => "tlsv1_0",
            ProtocolVersion::Tls11 => "tlsv1_1",
            ProtocolVersion::Tls12 => "tlsv1_2",
            ProtocolVersion::Tls13 => "tlsv1_3",
            ProtocolVersion::Negotiated => "any",
        }
    }

    /// The two-byte version on the wire, for the versions pinned by a raw hello.
    pub fn wire_version(self) -> Option<u16> {
        match self {
            ProtocolVersion::Ssl2 => Some(0x0002),
            ProtocolVersion::Ssl3 => Some(0x0300),
            ProtocolVersion::Tls10 => Some(0x0301),
            ProtocolVersion::Tls11 => Some(0x0302),
            ProtocolVersion::Tls12 => Some(0x0303),
            ProtocolVersion::Tls13 => Some(0x0304),
            ProtocolVersion::Negotiated => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportState {
    Supported,
    Rejected,
    Indeterminate,
}

impl SupportState {
    /// Classifies the outcome of one pinned handshake attempt.
    pub fn from_outcome(outcome: &Result<(), ProbeError>) -> Self {
        match outcome {
            Ok(()) => SupportState::Supported,
            Err(ProbeError::TlsHandshakeRejected(_)) => SupportState::Rejected,
            Err(_) => SupportState::Indeterminate,
        }
    }

    pub fn is_supported(self) -> bool {
        self == SupportState::Supported
    }
}

/// Support state for every `ProtocolVersion`.
///
/// The only constructor fills all keys, and `set` never removes one, so a
/// matrix always has exactly one entry per version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TlsMatrix(BTreeMap<ProtocolVersion, SupportState>);

impl TlsMatrix {
    pub fn indeterminate() -> Self {
        Self(
            ProtocolVersion::iter()
                .map(|version| (version, SupportState::Indeterminate))
                .collect(),
        )
    }

    pub fn set(&mut self, version: ProtocolVersion, state: SupportState) {
        self.0.insert(version, state);
    }

    pub fn get(&self, version: ProtocolVersion) -> SupportState {
        self.0
            .get(&version)
            .copied()
            .unwrap_or(SupportState::Indeterminate)
    }

    /// Entries in output column order.
    pub fn iter(&self) -> impl Iterator<Item = (ProtocolVersion, SupportState)> + '_ {
        self.0.iter().map(|(version, state)| (*version, *state))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for TlsMatrix {
    fn default() -> Self {
        Self::indeterminate()
    }
}

// --- Scan record ---

// One record per input domain, built by a single worker and frozen once it is
// handed to the writer.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRecord {
    pub domain: DomainTarget,
    pub http_reachable: bool,
    pub https_reachable: bool,
    pub is_parked: bool,
    pub hsts_present: bool,
    pub https_redirect_ok: bool,
    pub tls_support: TlsMatrix,
    pub scanned_at: DateTime<Utc>,
}

impl ScanRecord {
    /// A record with every check at its default, as emitted when nothing connects.
    pub fn new(domain: DomainTarget) -> Self {
        Self {
            domain,
            http_reachable: false,
            https_reachable: false,
            is_parked: false,
            hsts_present: false,
            https_redirect_ok: false,
            tls_support: TlsMatrix::indeterminate(),
            scanned_at: Utc::now(),
        }
    }
}

// --- HTTP response ---

// What the connectivity checker hands back. Header lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// --- Parking evidence ---

// Transient evidence gathered by the parking strategies. Discarded once the
// verdict is taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParkingSignal {
    pub matched_origins: BTreeSet<String>,
    pub wildcard_empty_location: bool,
    pub whois_registered: bool,
    pub dns_absent: bool,
}

impl ParkingSignal {
    pub fn is_parked(&self) -> bool {
        !self.matched_origins.is_empty()
            || self.wildcard_empty_location
            || (self.whois_registered && self.dns_absent)
    }
}
