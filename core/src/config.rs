//! Environment-driven configuration, read once at startup.
//!
//! The teacher reads `std::env::var` ad hoc at each call site
//! (`VK_JWT_SECRET`, `VK_DATA_DIR`, `VK_REPO_PATH`, `GATEWAY_HOST_ID`);
//! this implementation consolidates every recognized variable into one
//! typed `Config::from_env()` instead, since §6 names configuration as a
//! first-class concern.

use std::path::PathBuf;

use crate::workflow_worker::DispatchMode;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub bind_port: u16,
    pub dispatch_mode: DispatchMode,
    pub agent_call_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub audit_signing_private_key_path: Option<PathBuf>,
    pub audit_signing_public_key_path: Option<PathBuf>,
    pub agent_token_encryption_key: Option<String>,
    pub data_dir: PathBuf,
    pub shutdown_grace_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let dispatch_mode = match env_or("DISPATCH_MODE", "real").as_str() {
            "mock" => DispatchMode::Mock,
            _ => DispatchMode::Live,
        };

        Self {
            bind_host: env_or("BIND_HOST", "127.0.0.1"),
            bind_port: env_parse_or("BIND_PORT", 3001),
            dispatch_mode,
            agent_call_timeout_ms: env_parse_or("AGENT_CALL_TIMEOUT_MS", 30_000),
            health_check_interval_ms: env_parse_or("HEALTH_CHECK_INTERVAL_MS", 30_000),
            audit_signing_private_key_path: std::env::var("AUDIT_SIGNING_PRIVATE_KEY_PATH")
                .ok()
                .map(PathBuf::from),
            audit_signing_public_key_path: std::env::var("AUDIT_SIGNING_PUBLIC_KEY_PATH")
                .ok()
                .map(PathBuf::from),
            agent_token_encryption_key: std::env::var("AGENT_TOKEN_ENCRYPTION_KEY").ok(),
            data_dir: PathBuf::from(env_or("DATA_DIR", ".orchestrator-data")),
            shutdown_grace_ms: env_parse_or("SHUTDOWN_GRACE_MS", 5_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        std::env::remove_var("BIND_PORT");
        std::env::remove_var("DISPATCH_MODE");
        let config = Config::from_env();
        assert_eq!(config.bind_port, 3001);
        assert_eq!(config.dispatch_mode, DispatchMode::Live);
    }
}
