//! Endpoint declarations.
//!
//! [`EndpointConfig`] is the record read from the configuration file;
//! [`Endpoint`] is its validated form, with defaults applied and conditions
//! parsed.

use std::collections::BTreeMap;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::condition::{Condition, ConditionError, ConditionResult, Requirements};
use crate::probe::{FactSheet, RecordType, MAX_LABEL_LEN};

/// User agent sent unless the endpoint sets its own.
pub const DEFAULT_USER_AGENT: &str = concat!("statustrail/", env!("CARGO_PKG_VERSION"));

/// Endpoint validation errors.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("field `name` is required")]
    MissingName,
    #[error("field `name` must not contain \" or \\")]
    InvalidName,
    #[error("field `url` is required")]
    MissingUrl,
    #[error("field `conditions` must contain at least one condition")]
    MissingConditions,
    #[error("field `conditions`: {condition:?}: {source}")]
    InvalidCondition {
        condition: String,
        #[source]
        source: ConditionError,
    },
    #[error("field `version`: invalid semantic version {0:?}")]
    InvalidVersion(String),
    #[error("field `url`: unknown endpoint type for {0:?}")]
    UnknownType(String),
    #[error("field `url`: {0}")]
    InvalidUrl(String),
    #[error("field `dns`: {0}")]
    InvalidDns(String),
    #[error("field `method`: invalid method {0:?}")]
    InvalidMethod(String),
    #[error("field `headers`: invalid header {0:?}")]
    InvalidHeader(String),
}

/// Kind of probe an endpoint needs, derived from its declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointType {
    Dns,
    Http,
    Version,
    Unknown,
}

impl EndpointType {
    fn of(url: &str, has_dns: bool, version: &str) -> Self {
        if has_dns {
            EndpointType::Dns
        } else if url.starts_with("http://") || url.starts_with("https://") {
            if version.is_empty() {
                EndpointType::Http
            } else {
                EndpointType::Version
            }
        } else {
            EndpointType::Unknown
        }
    }
}

/// DNS query settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DnsConfig {
    #[serde(default)]
    pub query_name: String,
    #[serde(default)]
    pub query_type: String,
}

impl DnsConfig {
    fn validate_and_set_defaults(&mut self) -> Result<(), EndpointError> {
        self.query_type = self.query_type.trim().to_ascii_uppercase();
        if RecordType::parse(&self.query_type).is_none() {
            return Err(EndpointError::InvalidDns(format!(
                "unsupported query-type {:?}",
                self.query_type
            )));
        }
        let name = self.query_name.trim();
        if name.is_empty() {
            return Err(EndpointError::InvalidDns("query-name is required".to_string()));
        }
        if let Some(label) = name.split('.').find(|l| l.len() > MAX_LABEL_LEN) {
            return Err(EndpointError::InvalidDns(format!(
                "query-name label {:?} is longer than {} bytes",
                label, MAX_LABEL_LEN
            )));
        }
        self.query_name = if name.ends_with('.') {
            name.to_string()
        } else {
            format!("{}.", name)
        };
        Ok(())
    }
}

/// An endpoint as written in the configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub dns: Option<DnsConfig>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub graphql: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub conditions: Vec<String>,
}

/// A validated endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    /// Stable identifier derived from the name.
    pub key: String,
    pub url: String,
    pub dns: Option<DnsConfig>,
    pub method: Method,
    pub body: String,
    pub graphql: bool,
    pub headers: BTreeMap<String, String>,
    pub version: String,
    pub enabled: bool,
    pub conditions: Vec<Condition>,
}

/// Convert an endpoint name into its key.
pub fn key_for(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '/' | '_' | '.' | ',' | ' ' => '-',
            other => other,
        })
        .collect()
}

fn has_header(headers: &BTreeMap<String, String>, name: &str) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

impl TryFrom<EndpointConfig> for Endpoint {
    type Error = EndpointError;

    fn try_from(mut config: EndpointConfig) -> Result<Self, Self::Error> {
        if config.method.is_empty() {
            config.method = Method::GET.to_string();
        }
        if !has_header(&config.headers, "User-Agent") {
            config
                .headers
                .insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());
        }
        if config.graphql && !has_header(&config.headers, "Content-Type") {
            config
                .headers
                .insert("Content-Type".to_string(), "application/json".to_string());
        }

        if config.name.is_empty() {
            return Err(EndpointError::MissingName);
        }
        if config.name.contains(['"', '\\']) {
            return Err(EndpointError::InvalidName);
        }
        if config.url.is_empty() {
            return Err(EndpointError::MissingUrl);
        }
        if config.conditions.is_empty() {
            return Err(EndpointError::MissingConditions);
        }

        let conditions = config
            .conditions
            .iter()
            .map(|text| {
                Condition::parse(text).map_err(|source| EndpointError::InvalidCondition {
                    condition: text.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(dns) = config.dns.as_mut() {
            dns.validate_and_set_defaults()?;
        }

        let endpoint_type = EndpointType::of(&config.url, config.dns.is_some(), &config.version);
        match endpoint_type {
            EndpointType::Unknown => return Err(EndpointError::UnknownType(config.url)),
            EndpointType::Version => {
                let bare = config.version.strip_prefix('v').unwrap_or(&config.version);
                if semver::Version::parse(bare).is_err() {
                    return Err(EndpointError::InvalidVersion(config.version));
                }
            }
            _ => {
                if let Some(condition) = conditions.iter().find(|c| c.uses_version()) {
                    return Err(EndpointError::InvalidCondition {
                        condition: condition.to_string(),
                        source: ConditionError::VersionUndeclared,
                    });
                }
            }
        }

        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| EndpointError::InvalidMethod(config.method.clone()))?;
        for (name, value) in &config.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err() {
                return Err(EndpointError::InvalidHeader(name.clone()));
            }
        }
        if endpoint_type != EndpointType::Dns {
            reqwest::Url::parse(&config.url).map_err(|e| EndpointError::InvalidUrl(e.to_string()))?;
        }

        Ok(Endpoint {
            key: key_for(&config.name),
            name: config.name,
            url: config.url,
            dns: config.dns,
            method,
            body: config.body,
            graphql: config.graphql,
            headers: config.headers,
            version: config.version,
            enabled: config.enabled.unwrap_or(true),
            conditions,
        })
    }
}

impl Endpoint {
    pub fn endpoint_type(&self) -> EndpointType {
        EndpointType::of(&self.url, self.dns.is_some(), &self.version)
    }

    /// Facts the probe must collect for any of the conditions.
    pub fn requirements(&self) -> Requirements {
        self.conditions
            .iter()
            .fold(Requirements::default(), |acc, c| acc.merge(c.requirements()))
    }

    /// Evaluate every condition, in declared order.
    pub fn evaluate(&self, facts: &FactSheet) -> Vec<ConditionResult> {
        self.conditions.iter().map(|c| c.evaluate(facts)).collect()
    }

    /// What the dashboard shows under the name: the URL, or the running
    /// version for version endpoints.
    pub fn display_url(&self) -> String {
        if self.version.is_empty() {
            self.url.clone()
        } else {
            format!("Running Version: {}", self.version)
        }
    }
}
