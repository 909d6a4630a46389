// src/core/scanner/dns_scanner.rs

use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tracing::debug;

use crate::errors::ProbeError;

/// Answers "does `host` have an A record".
#[async_trait]
pub trait DnsProbe: Send + Sync {
    async fn has_a_record(&self, host: &str) -> bool;
}

/// `hickory-resolver` backed lookup, shared by every worker.
pub struct HickoryDns {
    resolver: TokioAsyncResolver,
}

impl HickoryDns {
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);
        Self { resolver }
    }

    async fn lookup_a(&self, host: &str) -> Result<usize, ProbeError> {
        let lookup = self
            .resolver
            .ipv4_lookup(host)
            .await
            .map_err(|e| ProbeError::LookupFailure(e.to_string()))?;
        Ok(lookup.iter().count())
    }
}

#[async_trait]
impl DnsProbe for HickoryDns {
    async fn has_a_record(&self, host: &str) -> bool {
        match self.lookup_a(host).await {
            Ok(count) => {
                debug!(host, count, "A record lookup finished.");
                count > 0
            }
            Err(e) => {
                // NXDOMAIN, SERVFAIL and timeouts all count as "no record".
                debug!(host, error = %e, "A record lookup failed.");
                false
            }
        }
    }
}
