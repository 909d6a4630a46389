// src/core/scanner/headers_scanner.rs

use reqwest::StatusCode;
use reqwest::header::{LOCATION, STRICT_TRANSPORT_SECURITY};
use tracing::debug;

use crate::core::models::HttpResponse;

/// Grades the redirect behaviour of a plain-HTTP response.
///
/// Returns `status == 301` compared against `Location starts with https://`.
/// The check flags agreement of the two facts, so a 200 with no `Location`
/// also grades as correct. A missing `Location` counts as not HTTPS.
pub fn is_correct_redirect(response: &HttpResponse) -> bool {
    let location_is_https = response
        .headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|location| location.starts_with("https://"));
    let status_is_redirect = response.status == StatusCode::MOVED_PERMANENTLY;

    debug!(
        status = %response.status,
        location_is_https,
        "Evaluated HTTP to HTTPS redirect."
    );
    status_is_redirect == location_is_https
}

/// True when the HTTPS response carries a `Strict-Transport-Security` header,
/// whatever its value.
pub fn has_hsts(response: &HttpResponse) -> bool {
    let present = response.headers.contains_key(STRICT_TRANSPORT_SECURITY);
    debug!(present, "Checked for HSTS header.");
    present
}
