// src/core/scanner/parking_scanner.rs

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::Rng;
use rand::distr::Alphanumeric;
use reqwest::header::LOCATION;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use super::dns_scanner::DnsProbe;
use super::http_scanner::{HTTP, HttpFetcher};
use super::whois_scanner::WhoisProbe;
use crate::core::knowledge_base::ParkingRegistry;
use crate::core::models::{DomainTarget, HttpResponse, ParkingSignal};

const WILDCARD_LABEL_LEN: usize = 10;

// Elements whose `src` may pull content from a parking provider.
static RESOURCE_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["script[src]", "img[src]", "iframe[src]"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

/// One independent source of parking evidence.
#[async_trait]
pub trait ParkingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Adds whatever this strategy found to `evidence`. Failures leave it untouched.
    async fn gather(&self, target: &DomainTarget, page: Option<&HttpResponse>, evidence: &mut ParkingSignal);
}

/// Matches the origins of a page's scripts, images and iframes against the
/// parking-provider registry.
pub struct ResourceOriginStrategy {
    registry: Arc<ParkingRegistry>,
}

impl ResourceOriginStrategy {
    pub fn new(registry: Arc<ParkingRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ParkingStrategy for ResourceOriginStrategy {
    fn name(&self) -> &'static str {
        "resource-origin"
    }

    async fn gather(&self, target: &DomainTarget, page: Option<&HttpResponse>, evidence: &mut ParkingSignal) {
        let Some(page) = page else {
            debug!(domain = %target, "No page content, resource-origin signal is empty.");
            return;
        };
        let origins = resource_origins(&page.body_text(), target);
        let matched: BTreeSet<String> = origins
            .iter()
            .filter_map(|host| self.registry.provider_for(host, target.as_str()))
            .map(str::to_string)
            .collect();
        debug!(domain = %target, origins = origins.len(), matched = matched.len(), "Resource origins checked.");
        evidence.matched_origins.extend(matched);
    }
}

/// Requests a random subdomain and looks for the empty `Location` header some
/// catch-all parking setups send back.
pub struct WildcardSubdomainStrategy {
    http: Arc<dyn HttpFetcher>,
    timeout: Duration,
}

impl WildcardSubdomainStrategy {
    pub fn new(http: Arc<dyn HttpFetcher>, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl ParkingStrategy for WildcardSubdomainStrategy {
    fn name(&self) -> &'static str {
        "wildcard-subdomain"
    }

    async fn gather(&self, target: &DomainTarget, _page: Option<&HttpResponse>, evidence: &mut ParkingSignal) {
        let url = format!("{HTTP}{}.{}/", random_label(), target);
        match self.http.get(&url, self.timeout).await {
            Ok(response) => {
                let empty_location = response
                    .headers
                    .get(LOCATION)
                    .is_some_and(|value| value.as_bytes().is_empty());
                debug!(url = %url, status = %response.status, empty_location, "Wildcard probe answered.");
                evidence.wildcard_empty_location |= empty_location;
            }
            Err(e) => debug!(url = %url, error = %e, "Wildcard probe failed."),
        }
    }
}

/// Registered but dark: a WHOIS record exists while no A record resolves.
pub struct RegistrationStrategy {
    dns: Arc<dyn DnsProbe>,
    whois: Arc<dyn WhoisProbe>,
}

impl RegistrationStrategy {
    pub fn new(dns: Arc<dyn DnsProbe>, whois: Arc<dyn WhoisProbe>) -> Self {
        Self { dns, whois }
    }
}

#[async_trait]
impl ParkingStrategy for RegistrationStrategy {
    fn name(&self) -> &'static str {
        "registration-without-resolution"
    }

    async fn gather(&self, target: &DomainTarget, _page: Option<&HttpResponse>, evidence: &mut ParkingSignal) {
        evidence.dns_absent = !self.dns.has_a_record(target.as_str()).await;
        // Only a dark domain can satisfy this signal, so skip WHOIS otherwise.
        if evidence.dns_absent {
            evidence.whois_registered = self.whois.is_registered(target.as_str()).await;
        }
    }
}

/// Runs every configured strategy and turns the evidence into a verdict.
pub struct ParkingDetector {
    strategies: Vec<Box<dyn ParkingStrategy>>,
}

impl ParkingDetector {
    pub fn new(strategies: Vec<Box<dyn ParkingStrategy>>) -> Self {
        Self { strategies }
    }

    /// Resource-origin and wildcard-subdomain signals only.
    pub fn plain(registry: Arc<ParkingRegistry>, http: Arc<dyn HttpFetcher>, timeout: Duration) -> Self {
        Self::new(vec![
            Box::new(ResourceOriginStrategy::new(registry)),
            Box::new(WildcardSubdomainStrategy::new(http, timeout)),
        ])
    }

    /// The plain detector plus the DNS/WHOIS registration signal.
    pub fn with_registration(
        registry: Arc<ParkingRegistry>,
        http: Arc<dyn HttpFetcher>,
        timeout: Duration,
        dns: Arc<dyn DnsProbe>,
        whois: Arc<dyn WhoisProbe>,
    ) -> Self {
        let mut detector = Self::plain(registry, http, timeout);
        detector
            .strategies
            .push(Box::new(RegistrationStrategy::new(dns, whois)));
        detector
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Every strategy runs; any one positive signal marks the domain parked.
    pub async fn is_parked(&self, target: &DomainTarget, page: Option<&HttpResponse>) -> bool {
        let mut evidence = ParkingSignal::default();
        for strategy in &self.strategies {
            strategy.gather(target, page, &mut evidence).await;
        }
        let parked = evidence.is_parked();
        if parked {
            info!(domain = %target, ?evidence, "Domain looks parked.");
        } else {
            debug!(domain = %target, ?evidence, "No parking signal.");
        }
        parked
    }
}

/// Hosts referenced by `script`, `img` and `iframe` sources, resolved against
/// the target so relative and protocol-relative sources are handled.
pub fn resource_origins(html: &str, target: &DomainTarget) -> BTreeSet<String> {
    let Ok(base) = Url::parse(&format!("{HTTP}{target}/")) else {
        return BTreeSet::new();
    };
    let document = Html::parse_document(html);

    RESOURCE_SELECTORS
        .iter()
        .flat_map(|selector| document.select(selector))
        .filter_map(|element| element.value().attr("src"))
        .filter_map(|src| base.join(src.trim()).ok())
        .filter_map(|url| url.host_str().map(str::to_ascii_lowercase))
        .collect()
}

fn random_label() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(WILDCARD_LABEL_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProbeError;
    use reqwest::StatusCode;
    use reqwest::header::{HeaderMap, HeaderValue};

    struct FixedFetcher(Option<HeaderValue>);

    #[async_trait]
    impl HttpFetcher for FixedFetcher {
        async fn get(&self, _url: &str, _timeout: Duration) -> Result<HttpResponse, ProbeError> {
            let mut headers = HeaderMap::new();
            match &self.0 {
                Some(location) => {
                    headers.insert(LOCATION, location.clone());
                    Ok(HttpResponse { status: StatusCode::FOUND, headers, body: Vec::new() })
                }
                None => Err(ProbeError::Connection("dns error".into())),
            }
        }
    }

    struct Dns(bool);

    #[async_trait]
    impl DnsProbe for Dns {
        async fn has_a_record(&self, _host: &str) -> bool {
            self.0
        }
    }

    struct Whois(bool);

    #[async_trait]
    impl WhoisProbe for Whois {
        async fn is_registered(&self, _host: &str) -> bool {
            self.0
        }
    }

    fn target(name: &str) -> DomainTarget {
        DomainTarget::parse(name).unwrap()
    }

    fn page(html: &str) -> HttpResponse {
        HttpResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: html.as_bytes().to_vec(),
        }
    }

    fn detector(location: Option<HeaderValue>, has_a: bool, registered: bool) -> ParkingDetector {
        ParkingDetector::with_registration(
            Arc::new(ParkingRegistry::builtin()),
            Arc::new(FixedFetcher(location)),
            Duration::from_secs(1),
            Arc::new(Dns(has_a)),
            Arc::new(Whois(registered)),
        )
    }

    const PARKED_PAGE: &str = r#"<html><head>
        <script src="https://img.sedo.com/ads.js"></script>
        </head><body><img src="/logo.png"><iframe src="//frames.example.net/x"></iframe></body></html>"#;

    #[test]
    fn origins_cover_all_three_tags() {
        let origins = resource_origins(PARKED_PAGE, &target("example.com"));
        let expected: BTreeSet<String> = ["img.sedo.com", "example.com", "frames.example.net"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(origins, expected);
    }

    #[test]
    fn random_labels_are_short_and_alphanumeric() {
        let label = random_label();
        assert_eq!(label.len(), WILDCARD_LABEL_LEN);
        assert!(label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn provider_resources_alone_mark_parked() {
        let detector = detector(None, true, false);
        assert!(detector.is_parked(&target("example.com"), Some(&page(PARKED_PAGE))).await);
    }

    #[tokio::test]
    async fn empty_location_on_wildcard_alone_marks_parked() {
        let detector = detector(Some(HeaderValue::from_static("")), true, false);
        assert!(detector.is_parked(&target("example.com"), Some(&page("<html></html>"))).await);
    }

    #[tokio::test]
    async fn registered_but_dark_marks_parked() {
        let detector = detector(None, false, true);
        assert!(detector.is_parked(&target("example.com"), None).await);
    }

    #[tokio::test]
    async fn live_domain_without_signals_is_not_parked() {
        let detector = detector(Some(HeaderValue::from_static("https://example.com/")), true, true);
        let html = r#"<script src="https://cdn.jsdelivr.net/app.js"></script>"#;
        assert!(!detector.is_parked(&target("example.com"), Some(&page(html))).await);
    }

    #[tokio::test]
    async fn missing_page_degrades_to_no_resource_signal() {
        let detector = detector(None, true, false);
        assert!(!detector.is_parked(&target("example.com"), None).await);
    }

    #[tokio::test]
    async fn provider_is_not_parked_on_its_own_resources() {
        let html = r#"<script src="https://sedo.com/app.js"></script>"#;
        let detector = detector(None, true, false);
        assert!(!detector.is_parked(&target("sedo.com"), Some(&page(html))).await);
    }

    #[test]
    fn plain_detector_has_no_registration_signal() {
        let plain = ParkingDetector::plain(
            Arc::new(ParkingRegistry::builtin()),
            Arc::new(FixedFetcher(None)),
            Duration::from_secs(1),
        );
        assert_eq!(plain.strategy_names(), vec!["resource-origin", "wildcard-subdomain"]);
    }
}
