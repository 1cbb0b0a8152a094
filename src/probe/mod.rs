//! Probe module for endpoint health checks.
//!
//! Supports HTTP, version-check and DNS endpoints.

mod dns;
mod http;

pub use dns::*;
pub use http::*;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::condition::ConditionResult;
use crate::endpoint::{Endpoint, EndpointType};

/// Default timeout for a single network interaction.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("malformed DNS response: {0}")]
    Dns(String),
}

/// Everything observed during one probe.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactSheet {
    pub http_status: u16,
    pub hostname: String,
    pub ip: String,
    pub connected: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Only present when a condition references `[BODY]`.
    #[serde(skip)]
    pub body: Option<Vec<u8>>,
    #[serde(serialize_with = "serialize_delta_millis")]
    pub certificate_expiration: chrono::Duration,
    pub dns_rcode: String,
    pub version: String,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl FactSheet {
    pub fn add_error(&mut self, error: impl ToString) {
        self.errors.push(error.to_string());
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

fn serialize_delta_millis<S: Serializer>(d: &chrono::Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(d.num_milliseconds())
}

/// Facts plus the outcome of every declared condition, in declared order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    #[serde(flatten)]
    pub facts: FactSheet,
    pub condition_results: Vec<ConditionResult>,
    pub success: bool,
}

/// Runs checks and owns the outbound HTTP connection pools.
///
/// Each endpoint gets its own client so its idle connections can be dropped
/// when the endpoint leaves the active set.
pub struct Prober {
    timeout: Duration,
    clients: RwLock<HashMap<String, reqwest::Client>>,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Prober {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the pooled client for an endpoint.
    async fn client(&self, key: &str) -> Result<reqwest::Client, ProbeError> {
        if let Some(client) = self.clients.read().await.get(key) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(key) {
            return Ok(client.clone());
        }
        let client = build_client(self.timeout)?;
        clients.insert(key.to_string(), client.clone());
        Ok(client)
    }

    /// Drop the connection pool of an endpoint, closing its idle connections.
    ///
    /// Returns whether a pool existed.
    pub async fn close(&self, key: &str) -> bool {
        let removed = self.clients.write().await.remove(key).is_some();
        if removed {
            tracing::debug!("Prober: Closed connection pool for {}", key);
        }
        removed
    }

    /// Number of endpoints that currently hold a connection pool.
    #[cfg(test)]
    pub async fn pool_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Run one check of an endpoint and evaluate its conditions.
    pub async fn check(&self, endpoint: &Endpoint) -> ProbeOutcome {
        let required = endpoint.requirements();
        let endpoint_type = endpoint.endpoint_type();
        let mut facts = FactSheet::default();

        if endpoint_type == EndpointType::Dns {
            facts.hostname = endpoint
                .url
                .strip_suffix(":53")
                .unwrap_or(&endpoint.url)
                .to_string();
        } else {
            match reqwest::Url::parse(&endpoint.url) {
                Ok(url) => facts.hostname = hostname_of(&url),
                Err(e) => facts.add_error(e),
            }
        }

        if endpoint_type == EndpointType::Version {
            facts.version = endpoint.version.clone();
        }

        if required.ip {
            resolve_ip(&mut facts).await;
        }

        if facts.errors.is_empty() {
            match endpoint_type {
                EndpointType::Dns => match &endpoint.dns {
                    Some(dns) => run_dns_query(&endpoint.url, dns, self.timeout, &mut facts).await,
                    None => facts.add_error(ProbeError::Config("missing dns settings".to_string())),
                },
                EndpointType::Http | EndpointType::Version => match self.client(&endpoint.key).await {
                    Ok(client) => {
                        run_http_call(&client, endpoint, required.body, self.timeout, &mut facts).await
                    }
                    Err(e) => facts.add_error(e),
                },
                EndpointType::Unknown => {
                    facts.add_error(ProbeError::Config("unknown endpoint type".to_string()))
                }
            }
        }

        facts.timestamp = Utc::now();
        let condition_results = endpoint.evaluate(&facts);
        let success = facts.errors.is_empty() && condition_results.iter().all(|r| r.success);

        ProbeOutcome {
            facts,
            condition_results,
            success,
        }
    }
}

/// Resolve the hostname to its first IP address.
async fn resolve_ip(facts: &mut FactSheet) {
    let hostname = facts.hostname.clone();
    let lookup = tokio::net::lookup_host((hostname.as_str(), 0)).await;
    match lookup {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => facts.ip = addr.ip().to_string(),
            None => facts.add_error(format!("no addresses found for {}", hostname)),
        },
        Err(e) => facts.add_error(format!("failed to resolve {}: {}", hostname, e)),
    }
}

/// Host part of a URL, with IPv6 addresses unbracketed so they resolve.
fn hostname_of(url: &reqwest::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointConfig;
    use axum::{routing::get, Json, Router};

    fn endpoint(name: &str, url: &str, conditions: &[&str]) -> Endpoint {
        Endpoint::try_from(EndpointConfig {
            name: name.to_string(),
            url: url.to_string(),
            conditions: conditions.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    async fn serve(router: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_health_endpoint_end_to_end() {
        let router = Router::new().route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "UP"})) }),
        );
        let addr = serve(router).await;
        let endpoint = endpoint(
            "health",
            &format!("http://{}/health", addr),
            &["[STATUS] == 200", "[BODY].status == UP", "[RESPONSE_TIME] < 300"],
        );

        let prober = Prober::default();
        let outcome = prober.check(&endpoint).await;

        assert!(outcome.facts.errors.is_empty(), "{:?}", outcome.facts.errors);
        assert_eq!(outcome.facts.http_status, 200);
        assert!(outcome.facts.connected);
        assert_eq!(outcome.facts.hostname, "127.0.0.1");
        assert_eq!(outcome.condition_results.len(), 3);
        assert!(outcome.condition_results.iter().all(|r| r.success));
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_body_is_only_read_when_needed() {
        let router = Router::new().route("/", get(|| async { "hello" }));
        let addr = serve(router).await;
        let prober = Prober::default();

        let status_only = endpoint("a", &format!("http://{}/", addr), &["[STATUS] == 200"]);
        let outcome = prober.check(&status_only).await;
        assert!(outcome.success);
        assert!(outcome.facts.body.is_none());

        let with_body = endpoint("b", &format!("http://{}/", addr), &["[BODY] == hello"]);
        let outcome = prober.check(&with_body).await;
        assert!(outcome.success);
        assert_eq!(outcome.facts.body.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn test_transport_failure_is_recorded() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = endpoint("down", &format!("http://{}/", addr), &["[CONNECTED] == false"]);
        let outcome = Prober::new(Duration::from_millis(500)).check(&endpoint).await;

        assert!(!outcome.facts.errors.is_empty());
        assert!(!outcome.facts.connected);
        // The condition itself holds, but the recorded error fails the check.
        assert!(outcome.condition_results[0].success);
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_ip_resolution_on_demand() {
        let router = Router::new().route("/", get(|| async { "ok" }));
        let addr = serve(router).await;
        let endpoint = endpoint("ip", &format!("http://{}/", addr), &["[IP] == 127.0.0.1"]);

        let outcome = Prober::default().check(&endpoint).await;
        assert_eq!(outcome.facts.ip, "127.0.0.1");
        assert!(outcome.success);
    }

    #[test]
    fn test_hostname_of_strips_ipv6_brackets() {
        let url = reqwest::Url::parse("http://[::1]:8080/health").unwrap();
        assert_eq!(hostname_of(&url), "::1");
        let url = reqwest::Url::parse("https://example.org/").unwrap();
        assert_eq!(hostname_of(&url), "example.org");
    }

    #[tokio::test]
    async fn test_resolve_ip_records_failure() {
        let mut facts = FactSheet {
            hostname: "does-not-exist.invalid".to_string(),
            ..Default::default()
        };
        resolve_ip(&mut facts).await;
        assert!(facts.ip.is_empty());
        assert_eq!(facts.errors.len(), 1);
        assert!(facts.errors[0].contains("does-not-exist.invalid"));
    }

    #[tokio::test]
    async fn test_close_drops_pool() {
        let router = Router::new().route("/", get(|| async { "ok" }));
        let addr = serve(router).await;
        let endpoint = endpoint("pooled", &format!("http://{}/", addr), &["[STATUS] == 200"]);
        let prober = Prober::default();

        prober.check(&endpoint).await;
        assert_eq!(prober.pool_count().await, 1);
        assert!(prober.close(&endpoint.key).await);
        assert_eq!(prober.pool_count().await, 0);
        assert!(!prober.close(&endpoint.key).await);
    }
}
