//! IP and header restrictions.
//!
//! # Responsibilities
//! - Reject clients by IP (allow list, block list)
//! - Reject requests whose headers miss a required pattern or hit a blocked one
//!
//! A violation never produces a response: the dispatcher counts it and drops
//! the connection.

use std::collections::{BTreeMap, HashSet};

use axum::http::HeaderMap;
use regex::Regex;
use thiserror::Error;

use crate::config::RestrictionsConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("ip {0} is not allowed")]
    IpNotAllowed(String),

    #[error("ip {0} is blocked")]
    IpBlocked(String),

    #[error("header {0} does not match any allowed pattern")]
    HeaderNotAllowed(String),

    #[error("header {0} matches a blocked pattern")]
    HeaderBlocked(String),
}

/// Compiled restrictions. Build once per config load.
#[derive(Debug, Default)]
pub struct Restrictions {
    allowed_ips: HashSet<String>,
    blocked_ips: HashSet<String>,
    allowed_headers: Vec<(String, Vec<Regex>)>,
    blocked_headers: Vec<(String, Vec<Regex>)>,
}

impl Restrictions {
    /// Patterns that fail to compile are skipped; validation rejects them earlier.
    pub fn from_config(config: &RestrictionsConfig) -> Self {
        Self {
            allowed_ips: config.allowed_ips.iter().cloned().collect(),
            blocked_ips: config.blocked_ips.iter().cloned().collect(),
            allowed_headers: compile(&config.allowed_headers),
            blocked_headers: compile(&config.blocked_headers),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allowed_ips.is_empty()
            && self.blocked_ips.is_empty()
            && self.allowed_headers.is_empty()
            && self.blocked_headers.is_empty()
    }

    pub fn check(&self, ip: &str, headers: &HeaderMap) -> Result<(), Violation> {
        if !self.allowed_ips.is_empty() && !self.allowed_ips.contains(ip) {
            return Err(Violation::IpNotAllowed(ip.to_string()));
        }

        if self.blocked_ips.contains(ip) {
            return Err(Violation::IpBlocked(ip.to_string()));
        }

        for (name, patterns) in &self.allowed_headers {
            let value = header(headers, name);
            if !patterns.iter().any(|re| re.is_match(value)) {
                return Err(Violation::HeaderNotAllowed(name.clone()));
            }
        }

        for (name, patterns) in &self.blocked_headers {
            let Some(value) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            if patterns.iter().any(|re| re.is_match(value)) {
                return Err(Violation::HeaderBlocked(name.clone()));
            }
        }

        Ok(())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn compile(map: &BTreeMap<String, Vec<String>>) -> Vec<(String, Vec<Regex>)> {
    map.iter()
        .map(|(name, patterns)| {
            let compiled = patterns
                .iter()
                .filter_map(|p| match Regex::new(p) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!(header = %name, pattern = %p, error = %e, "Skipping invalid restriction pattern");
                        None
                    }
                })
                .collect();
            (name.to_ascii_lowercase(), compiled)
        })
        .collect()
}
