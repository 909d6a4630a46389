// src/core/scanner/whois_scanner.rs

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::ProbeError;

const IANA_WHOIS: &str = "whois.iana.org";
const WHOIS_PORT: u16 = 43;
const MAX_RESPONSE: usize = 64 * 1024;

// Registries phrase "not registered" in many ways; these cover the common ones.
static RE_NOT_FOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(no match for|not found|no data found|no entries found|no object found|status:\s*(free|available)|the queried object does not exist|no information available)",
    )
    .unwrap()
});
static RE_REFER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)^\s*(refer|whois):\s*(\S+)").unwrap());

/// Answers "does a registration record exist for `host`".
#[async_trait]
pub trait WhoisProbe: Send + Sync {
    async fn is_registered(&self, host: &str) -> bool;
}

/// RFC 3912 client. The authoritative server for a TLD is found through IANA
/// once and cached.
pub struct WhoisClient {
    timeout: Duration,
    referrals: RwLock<HashMap<String, String>>,
}

impl WhoisClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            referrals: RwLock::new(HashMap::new()),
        }
    }

    async fn server_for(&self, tld: &str) -> Result<String, ProbeError> {
        let cached = self.referrals.read().ok().and_then(|map| map.get(tld).cloned());
        if let Some(server) = cached {
            return Ok(server);
        }
        let response = query(IANA_WHOIS, tld, self.timeout).await?;
        let server = parse_referral(&response)
            .ok_or_else(|| ProbeError::LookupFailure(format!("IANA has no WHOIS server for .{tld}")))?;
        if let Ok(mut map) = self.referrals.write() {
            map.insert(tld.to_string(), server.clone());
        }
        debug!(tld, server = %server, "Cached WHOIS referral.");
        Ok(server)
    }

    async fn lookup(&self, host: &str) -> Result<bool, ProbeError> {
        let domain = host.strip_prefix("www.").unwrap_or(host);
        let tld = domain
            .rsplit('.')
            .next()
            .filter(|tld| !tld.is_empty() && *tld != domain)
            .ok_or_else(|| ProbeError::LookupFailure(format!("{domain} has no TLD")))?;
        let server = self.server_for(tld).await?;
        let response = query(&server, domain, self.timeout).await?;
        Ok(response_shows_registration(&response))
    }
}

#[async_trait]
impl WhoisProbe for WhoisClient {
    async fn is_registered(&self, host: &str) -> bool {
        match self.lookup(host).await {
            Ok(registered) => {
                debug!(host, registered, "WHOIS lookup finished.");
                registered
            }
            Err(e) => {
                warn!(host, error = %e, "WHOIS lookup failed.");
                false
            }
        }
    }
}

async fn query(server: &str, question: &str, limit: Duration) -> Result<String, ProbeError> {
    let exchange = async {
        let mut stream = TcpStream::connect((server, WHOIS_PORT))
            .await
            .map_err(|e| ProbeError::LookupFailure(format!("{server}: {e}")))?;
        stream
            .write_all(format!("{question}\r\n").as_bytes())
            .await
            .map_err(|e| ProbeError::LookupFailure(e.to_string()))?;

        let mut buf = Vec::new();
        (&mut stream)
            .take(MAX_RESPONSE as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| ProbeError::LookupFailure(e.to_string()))?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    };
    timeout(limit, exchange).await.map_err(|_| ProbeError::Timeout(limit))?
}

/// Pulls the `refer:` (or `whois:`) server out of an IANA response.
pub fn parse_referral(response: &str) -> Option<String> {
    RE_REFER
        .captures(response)
        .and_then(|caps| caps.get(2))
        .map(|server| server.as_str().to_ascii_lowercase())
}

/// True when a registry answered with an actual record.
pub fn response_shows_registration(response: &str) -> bool {
    !response.trim().is_empty() && !RE_NOT_FOUND.is_match(response)
}
