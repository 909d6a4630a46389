// src/core/scanner/http_scanner.rs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::core::models::HttpResponse;
use crate::errors::{ProbeError, FatalError};

pub const HTTP: &str = "http://";
pub const HTTPS: &str = "https://";

/// Issues one GET and hands back the response, or a typed failure.
///
/// Implementations must keep `Connection` and `Timeout` distinct.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, ProbeError>;
}

/// `reqwest`-backed fetcher. Redirects are never followed so the status and
/// `Location` of the first response stay observable. Requests go direct,
/// ignoring proxy environment variables.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ReqwestFetcher {
    pub fn new(config: &ScanConfig) -> Result<Self, FatalError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .no_proxy()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| FatalError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, ProbeError> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let headers = response.headers().clone();

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| classify(e, timeout))? {
            let room = self.max_body_bytes.saturating_sub(body.len());
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= self.max_body_bytes {
                debug!(url, limit = self.max_body_bytes, "Response body truncated.");
                break;
            }
        }

        Ok(HttpResponse { status, headers, body })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> ProbeError {
    if error.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Connection(error.to_string())
    }
}

/// Single GET against `url` with the given timeout.
///
/// Both failure kinds are logged and returned untouched; the pipeline treats
/// either one as "not reachable".
pub async fn connect(fetcher: &dyn HttpFetcher, url: &str, timeout: Duration) -> Result<HttpResponse, ProbeError> {
    match fetcher.get(url, timeout).await {
        Ok(response) => {
            debug!(url, status = %response.status, "Connected.");
            Ok(response)
        }
        Err(e) => {
            match &e {
                ProbeError::Timeout(_) => debug!(url, error = %e, "Request timed out."),
                ProbeError::Connection(_) => debug!(url, error = %e, "Connection failed."),
                other => warn!(url, error = %other, "Unexpected request failure."),
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        port
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let port = serve_once(
            "HTTP/1.1 301 Moved Permanently\r\nLocation: https://example.com/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let fetcher = ReqwestFetcher::new(&ScanConfig::default()).unwrap();
        let response = connect(&fetcher, &format!("http://127.0.0.1:{port}/"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.status.as_u16(), 301);
        assert_eq!(response.headers.get("location").unwrap(), "https://example.com/");
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let fetcher = ReqwestFetcher::new(&ScanConfig::default()).unwrap();
        let err = connect(&fetcher, &format!("http://127.0.0.1:{port}/"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let fetcher = ReqwestFetcher::new(&ScanConfig::default()).unwrap();
        let err = connect(&fetcher, &format!("http://127.0.0.1:{port}/"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Connection(_)));
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn body_is_capped() {
        let port = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\n0123456789",
        )
        .await;

        let config = ScanConfig { max_body_bytes: 4, ..Default::default() };
        let fetcher = ReqwestFetcher::new(&config).unwrap();
        let response = fetcher
            .get(&format!("http://127.0.0.1:{port}/"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.body, b"0123");
    }
}
