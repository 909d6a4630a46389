// src/core/scanner/port_scanner.rs

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::config::RetryPolicy;
use crate::errors::ProbeError;

/// Answers "does `host` accept a TCP connection on `port`".
#[async_trait]
pub trait PortProber: Send + Sync {
    async fn probe(&self, host: &str, port: u16) -> bool;
}

/// The default prober: a plain TCP connect with a timeout and bounded retries.
#[derive(Debug, Clone)]
pub struct TcpPortProber {
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

#[async_trait]
impl PortProber for TcpPortProber {
    async fn probe(&self, host: &str, port: u16) -> bool {
        probe_port(host, port, self.connect_timeout, &self.retry).await
    }
}

/// Tries to open a connection to `host:port`.
///
/// Name resolution failure returns `false` straight away; connection failures
/// are retried `retry.retries` times with the policy's delay in between. Every
/// error is folded into `false`.
pub async fn probe_port(host: &str, port: u16, connect_timeout: Duration, retry: &RetryPolicy) -> bool {
    let addrs = match resolve(host, port, connect_timeout).await {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!(host, port, error = %e, "Port probe: name did not resolve.");
            return false;
        }
    };

    let mut attempt = 0;
    loop {
        match try_connect(host, port, &addrs, connect_timeout).await {
            Ok(()) => {
                debug!(host, port, attempt, "Port is open.");
                return true;
            }
            Err(e) if attempt < retry.retries => {
                attempt += 1;
                let delay = retry.delay_for(attempt);
                debug!(host, port, attempt, ?delay, error = %e, "Port probe failed, retrying.");
                sleep(delay).await;
            }
            Err(e) => {
                debug!(host, port, error = %e, "Port probe gave up.");
                return false;
            }
        }
    }
}

async fn resolve(host: &str, port: u16, limit: Duration) -> Result<Vec<SocketAddr>, ProbeError> {
    let addrs: Vec<SocketAddr> = timeout(limit, lookup_host((host, port)))
        .await
        .map_err(|_| ProbeError::Timeout(limit))?
        .map_err(|e| ProbeError::LookupFailure(e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(ProbeError::LookupFailure(format!("{host} has no addresses")));
    }
    Ok(addrs)
}

async fn try_connect(host: &str, port: u16, addrs: &[SocketAddr], limit: Duration) -> Result<(), ProbeError> {
    let mut last_reason = String::from("no address attempted");
    for addr in addrs {
        match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => return Ok(()),
            Ok(Err(e)) => last_reason = e.to_string(),
            Err(_) => last_reason = format!("connect to {addr} timed out after {limit:?}"),
        }
    }
    Err(ProbeError::UnreachablePort {
        host: host.to_string(),
        port,
        reason: last_reason,
    })
}
