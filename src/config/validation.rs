#![allow(clippy::collapsible_if)]

use std::net::SocketAddr;

use crate::{
    config::models::{DirectoryConfig, ENTITY_TOKEN_LIFETIME, ProxyConfig},
    core::{
        resolver::{PortSelection, ResolvedEndpoint},
        route::{MatchId, RouteScheme},
    },
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Proxy configuration validator
pub struct ProxyConfigValidator;

impl ProxyConfigValidator {
    /// Validate the entire configuration, reporting every problem at once
    pub fn validate(config: &ProxyConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.forwarding.activity_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "forwarding.activity_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if config.forwarding.connect_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "forwarding.connect_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        match config.route_scheme {
            RouteScheme::BuildSessionRegion => {
                errors.extend(Self::validate_directory(&config.directory));
                errors.extend(Self::validate_endpoint(config));
            }
            RouteScheme::MatchId => {
                for (match_id, url) in &config.match_servers {
                    if MatchId::new(match_id.as_str()).is_err() {
                        errors.push(ValidationError::InvalidField {
                            field: format!("match_servers.{match_id}"),
                            message: "Match ids must be non-empty and contain no '/'".to_string(),
                        });
                    }
                    if let Err(e) = ResolvedEndpoint::new(url) {
                        errors.push(ValidationError::InvalidField {
                            field: format!("match_servers.{match_id}"),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_directory(directory: &DirectoryConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if directory.title_id.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "directory.title_id".to_string(),
            });
        }
        if directory.secret_key.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "directory.secret_key".to_string(),
            });
        }
        if directory.request_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "directory.request_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if directory.token_refresh_margin() >= ENTITY_TOKEN_LIFETIME {
            errors.push(ValidationError::InvalidField {
                field: "directory.token_refresh_margin_secs".to_string(),
                message: format!(
                    "Must be less than the entity token lifetime of {}s, got {}",
                    ENTITY_TOKEN_LIFETIME.as_secs(),
                    directory.token_refresh_margin_secs
                ),
            });
        }
        if let Some(base_url) = &directory.base_url {
            match url::Url::parse(base_url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
                Ok(url) => errors.push(ValidationError::InvalidField {
                    field: "directory.base_url".to_string(),
                    message: format!("Expected an http(s) URL with a host, got '{url}'"),
                }),
                Err(e) => errors.push(ValidationError::InvalidField {
                    field: "directory.base_url".to_string(),
                    message: format!("Invalid URL format: {e}"),
                }),
            }
        }

        errors
    }

    fn validate_endpoint(config: &ProxyConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !matches!(config.endpoint.scheme.as_str(), "http" | "https") {
            errors.push(ValidationError::InvalidField {
                field: "endpoint.scheme".to_string(),
                message: format!(
                    "Must be 'http' or 'https', got '{}'",
                    config.endpoint.scheme
                ),
            });
        }
        if let PortSelection::Named { name } = &config.endpoint.port_selection {
            if name.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "endpoint.port_selection.name".to_string(),
                });
            }
        }

        errors
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
