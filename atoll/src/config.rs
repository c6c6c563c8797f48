//! Application configuration.
//!
//! Everything reads from `ATOLL_*` environment variables with sensible
//! development defaults, so a bare `AppConfig::from_env()` boots a local
//! server without any setup.

use std::net::SocketAddr;

use crate::error::{ApiError, ApiResult};

/// Configuration for the HTTP and gRPC servers.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind host for both servers
    pub bind: String,
    /// HTTP port
    pub http_port: u16,
    /// gRPC port
    pub grpc_port: u16,
    /// Allowed CORS origins; empty means development mode (allow all)
    pub cors_origins: Vec<String>,
    /// CORS preflight cache duration in seconds
    pub cors_max_age_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            http_port: 8000,
            grpc_port: 9080,
            cors_origins: Vec::new(),
            cors_max_age_secs: 3600,
        }
    }
}

impl AppConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: std::env::var("ATOLL_BIND").unwrap_or(defaults.bind),
            http_port: std::env::var("ATOLL_HTTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.http_port),
            grpc_port: std::env::var("ATOLL_GRPC_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.grpc_port),
            cors_origins: std::env::var("ATOLL_CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            cors_max_age_secs: std::env::var("ATOLL_CORS_MAX_AGE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cors_max_age_secs),
        }
    }

    pub fn http_addr(&self) -> ApiResult<SocketAddr> {
        parse_addr(&self.bind, self.http_port)
    }

    pub fn grpc_addr(&self) -> ApiResult<SocketAddr> {
        parse_addr(&self.bind, self.grpc_port)
    }
}

fn parse_addr(host: &str, port: u16) -> ApiResult<SocketAddr> {
    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_everywhere() {
        let config = AppConfig::default();
        assert_eq!(config.http_addr().unwrap().port(), 8000);
        assert_eq!(config.grpc_addr().unwrap().port(), 9080);
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn bad_bind_host_is_reported() {
        let config = AppConfig {
            bind: "not a host".to_string(),
            ..AppConfig::default()
        };
        assert!(config.http_addr().is_err());
    }
}
