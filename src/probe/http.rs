//! HTTP probe implementation.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::redirect::Policy;
use reqwest::tls::TlsInfo;

use super::{FactSheet, ProbeError};
use crate::endpoint::Endpoint;

/// Maximum redirects followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Build a pooled HTTP client.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(20)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .tls_info(true)
        .build()
        .map_err(|e| ProbeError::Config(e.to_string()))
}

/// Build the request for an endpoint.
///
/// GraphQL bodies are wrapped as `{"query": <body>}`. A `Host` header is sent
/// as given and so overrides the host taken from the URL.
pub fn build_request(
    client: &reqwest::Client,
    endpoint: &Endpoint,
) -> Result<reqwest::Request, ProbeError> {
    let body = if endpoint.graphql {
        serde_json::json!({ "query": endpoint.body }).to_string()
    } else {
        endpoint.body.clone()
    };

    let mut builder = client
        .request(endpoint.method.clone(), &endpoint.url)
        .body(body);
    for (name, value) in &endpoint.headers {
        builder = builder.header(name, value);
    }

    builder
        .build()
        .map_err(|e| ProbeError::Config(e.to_string()))
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Network(e.to_string())
    }
}

/// Send the endpoint's request and record status, timing, certificate and,
/// when asked for, the body.
pub async fn run_http_call(
    client: &reqwest::Client,
    endpoint: &Endpoint,
    read_body: bool,
    timeout: Duration,
    facts: &mut FactSheet,
) {
    let request = match build_request(client, endpoint) {
        Ok(r) => r,
        Err(e) => {
            facts.add_error(e);
            return;
        }
    };

    let start = Instant::now();
    let response = client.execute(request).await;
    facts.duration = start.elapsed();

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            facts.add_error(transport_error(e, timeout));
            return;
        }
    };

    if let Some(der) = response
        .extensions()
        .get::<TlsInfo>()
        .and_then(|info| info.peer_certificate())
    {
        match certificate_expiration(der, Utc::now()) {
            Ok(remaining) => facts.certificate_expiration = remaining,
            Err(e) => tracing::warn!("Could not read certificate of {}: {}", endpoint.name, e),
        }
    }

    facts.http_status = response.status().as_u16();
    facts.connected = true;

    if read_body {
        match response.bytes().await {
            Ok(bytes) => facts.body = Some(bytes.to_vec()),
            Err(e) => facts.add_error(format!("error reading response body: {}", e)),
        }
    }
}

/// Time left until the leaf certificate's `notAfter`.
pub fn certificate_expiration(der: &[u8], now: DateTime<Utc>) -> Result<chrono::Duration, ProbeError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| ProbeError::Network(format!("invalid peer certificate: {}", e)))?;
    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| ProbeError::Network("certificate expiry out of range".to_string()))?;
    Ok(not_after - now)
}
