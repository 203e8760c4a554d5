//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Check restriction patterns compile and redirects are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push(ValidationError::new("name", "must not be empty"));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.limits.request_kb == 0 {
        errors.push(ValidationError::new("limits.request_kb", "must be greater than 0"));
    }
    if config.limits.websocket_kb == 0 {
        errors.push(ValidationError::new("limits.websocket_kb", "must be greater than 0"));
    }

    if config.websocket.enabled && config.websocket.versions.is_empty() {
        errors.push(ValidationError::new("websocket.versions", "must list at least one version"));
    }

    let restrictions = &config.restrictions;
    for (section, map) in [
        ("restrictions.allowed_headers", &restrictions.allowed_headers),
        ("restrictions.blocked_headers", &restrictions.blocked_headers),
    ] {
        for (header, patterns) in map {
            for pattern in patterns {
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(ValidationError::new(
                        format!("{}.{}", section, header),
                        format!("invalid pattern {:?}: {}", pattern, e),
                    ));
                }
            }
        }
    }

    for (index, redirect) in config.redirects.iter().enumerate() {
        for (field, value) in [("from", &redirect.from), ("to", &redirect.to)] {
            match url::Url::parse(value) {
                Ok(url) if url.host_str().is_some() => {}
                _ => errors.push(ValidationError::new(
                    format!("redirects[{}].{}", index, field),
                    format!("{:?} is not an absolute URL", value),
                )),
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RedirectConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "nope".into();
        config.limits.request_kb = 0;
        config
            .restrictions
            .blocked_headers
            .insert("user-agent".into(), vec!["(".into()]);
        config.redirects.push(RedirectConfig {
            from: "old.example.com".into(),
            to: "https://new.example.com".into(),
            preserve_path: true,
            permanent: false,
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "limits.request_kb",
                "restrictions.blocked_headers.user-agent",
                "redirects[0].from",
            ]
        );
    }
}
