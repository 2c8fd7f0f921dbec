//! Daemon configuration from environment variables
//!
//! All configuration is read from the environment with defaults; there is no
//! command-line parser.

use suv_engine::constants::daemon::{
    DEFAULT_CONFIG_DIR_NAME, DEFAULT_LOG_LEVEL, DEFAULT_REST_ADDR, PROGRAMS_FILE,
};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Daemon configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Directory holding `programs.yml`
    pub config_dir: PathBuf,

    /// REST listen address, kept as text until `validate`
    pub rest_addr: String,

    /// Log filter
    pub log_level: String,
}

impl DaemonConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            config_dir: Self::parse_config_dir(),
            rest_addr: env::var("SUV_REST_ADDR").unwrap_or_else(|_| DEFAULT_REST_ADDR.to_string()),
            log_level: Self::parse_log_level(),
        }
    }

    fn parse_config_dir() -> PathBuf {
        if let Ok(dir) = env::var("SUV_CONFIG_DIR") {
            return PathBuf::from(dir);
        }
        env::var("HOME")
            .map(|home| PathBuf::from(home).join(DEFAULT_CONFIG_DIR_NAME))
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR_NAME))
    }

    fn parse_log_level() -> String {
        // Priority: SUV_LOG_LEVEL > RUST_LOG > default
        env::var("SUV_LOG_LEVEL")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
    }

    pub fn programs_file(&self) -> PathBuf {
        self.config_dir.join(PROGRAMS_FILE)
    }

    /// Validate configuration and resolve the listen address
    pub fn validate(&self) -> Result<SocketAddr, String> {
        if self.config_dir.as_os_str().is_empty() {
            return Err("SUV_CONFIG_DIR cannot be empty".to_string());
        }
        self.rest_addr
            .parse()
            .map_err(|e| format!("Invalid SUV_REST_ADDR '{}': {}", self.rest_addr, e))
    }
}
