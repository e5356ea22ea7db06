use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::domain::modules::{self, ControlModule};
use crate::stream::DEFAULT_MAX_LINE_BYTES;

pub const DEFAULT_PORT: u16 = 2102;
pub const DEFAULT_MODULE: &str = "controlfunctions";
pub const DEFAULT_STREAM_PREFIX: &str = "keras_";
pub const DEFAULT_HTTP_PREFIX: &str = "control_";
pub const DEFAULT_HTTP_PATH: &str = "/control";
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub debug: bool,
    pub functions_module: String,
    pub stream_prefix: String,
    pub http_port: Option<u16>,
    pub http_path: String,
    pub http_prefix: String,
    pub shutdown_grace: Duration,
    pub max_line_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CONTROL_RPC_PORT must be a valid u16")]
    InvalidPort,
    #[error("CONTROL_RPC_HTTP_PORT must be a valid u16")]
    InvalidHttpPort,
    #[error("CONTROL_RPC_HTTP_PATH must start with '/'")]
    InvalidHttpPath,
    #[error("CONTROL_RPC_DEBUG must be one of: 1, 0, true, false, yes, no, on, off")]
    InvalidDebugFlag,
    #[error("CONTROL_RPC_SHUTDOWN_GRACE_MS must be a whole number of milliseconds")]
    InvalidShutdownGrace,
    #[error("CONTROL_RPC_MAX_LINE_BYTES must be a positive number of bytes")]
    InvalidMaxLineBytes,
    #[error("unknown control function module {name:?} (available: {available})")]
    UnknownModule { name: String, available: String },
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source; `from_env` uses the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = value("CONTROL_RPC_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = value("CONTROL_RPC_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(DEFAULT_PORT);
        let debug = value("CONTROL_RPC_DEBUG")
            .map(|value| parse_flag(&value).ok_or(ConfigError::InvalidDebugFlag))
            .transpose()?
            .unwrap_or(false);
        let functions_module =
            value("CONTROL_RPC_FUNCTIONS").unwrap_or_else(|| DEFAULT_MODULE.to_string());
        // An explicitly empty prefix is meaningful (register everything), so
        // read it without the empty filter.
        let stream_prefix = lookup("CONTROL_RPC_PREFIX")
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| DEFAULT_STREAM_PREFIX.to_string());
        let http_port = value("CONTROL_RPC_HTTP_PORT")
            .map(|value| {
                value
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidHttpPort)
            })
            .transpose()?;
        let http_path = value("CONTROL_RPC_HTTP_PATH").unwrap_or_else(|| DEFAULT_HTTP_PATH.to_string());
        if !http_path.starts_with('/') {
            return Err(ConfigError::InvalidHttpPath);
        }
        let http_prefix = lookup("CONTROL_RPC_HTTP_PREFIX")
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| DEFAULT_HTTP_PREFIX.to_string());
        let shutdown_grace = value("CONTROL_RPC_SHUTDOWN_GRACE_MS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidShutdownGrace)
            })
            .transpose()?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS));
        let max_line_bytes = value("CONTROL_RPC_MAX_LINE_BYTES")
            .map(|value| {
                value
                    .parse::<usize>()
                    .ok()
                    .filter(|bytes| *bytes > 0)
                    .ok_or(ConfigError::InvalidMaxLineBytes)
            })
            .transpose()?
            .unwrap_or(DEFAULT_MAX_LINE_BYTES);

        let config = Self {
            bind_addr,
            bind_port,
            debug,
            functions_module,
            stream_prefix,
            http_port,
            http_path,
            http_prefix,
            shutdown_grace,
            max_line_bytes,
        };

        let _ = config.bind_socket()?;
        let _ = config.module()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        socket(&self.bind_addr, self.bind_port)
    }

    /// Address of the HTTP variant, `None` when it is disabled.
    pub fn http_socket(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.http_port
            .map(|port| socket(&self.bind_addr, port))
            .transpose()
    }

    pub fn module(&self) -> Result<&'static ControlModule, ConfigError> {
        modules::lookup(&self.functions_module).ok_or_else(|| ConfigError::UnknownModule {
            name: self.functions_module.clone(),
            available: modules::available().join(", "),
        })
    }
}

fn socket(addr: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let host = if addr.contains(':') && !addr.starts_with('[') {
        format!("[{addr}]")
    } else {
        addr.to_string()
    };
    format!("{host}:{port}")
        .parse::<SocketAddr>()
        .map_err(|_| ConfigError::InvalidSocket)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn parse_defaults() {
        let config = config_from(&[]).expect("config should parse");
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 2102);
        assert!(!config.debug);
        assert_eq!(config.functions_module, "controlfunctions");
        assert_eq!(config.stream_prefix, "keras_");
        assert_eq!(config.http_port, None);
        assert_eq!(config.http_path, "/control");
        assert_eq!(config.http_prefix, "control_");
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.max_line_bytes, 1024 * 1024);
        assert_eq!(
            config.bind_socket().expect("socket"),
            "127.0.0.1:2102".parse().expect("addr")
        );
        assert!(config.http_socket().expect("http socket").is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("CONTROL_RPC_HOST", "0.0.0.0"),
            ("CONTROL_RPC_PORT", "4000"),
            ("CONTROL_RPC_DEBUG", "yes"),
            ("CONTROL_RPC_PREFIX", "control_"),
            ("CONTROL_RPC_HTTP_PORT", "4001"),
            ("CONTROL_RPC_HTTP_PATH", "/rpc"),
            ("CONTROL_RPC_SHUTDOWN_GRACE_MS", "250"),
            ("CONTROL_RPC_MAX_LINE_BYTES", "4096"),
        ])
        .expect("config should parse");

        assert_eq!(config.bind_port, 4000);
        assert!(config.debug);
        assert_eq!(config.stream_prefix, "control_");
        assert_eq!(
            config.http_socket().expect("http socket"),
            Some("0.0.0.0:4001".parse().expect("addr"))
        );
        assert_eq!(config.http_path, "/rpc");
        assert_eq!(config.shutdown_grace, Duration::from_millis(250));
        assert_eq!(config.max_line_bytes, 4096);
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let config = config_from(&[("CONTROL_RPC_HOST", "::1")]).expect("config should parse");
        assert_eq!(
            config.bind_socket().expect("socket"),
            "[::1]:2102".parse().expect("addr")
        );
    }

    #[test]
    fn empty_prefix_is_kept() {
        let config = config_from(&[("CONTROL_RPC_PREFIX", "")]).expect("config should parse");
        assert_eq!(config.stream_prefix, "");
    }

    #[test]
    fn invalid_port_fails() {
        let err = config_from(&[("CONTROL_RPC_PORT", "70000")]).expect_err("port too large");
        assert!(matches!(err, ConfigError::InvalidPort));
    }

    #[test]
    fn invalid_debug_flag_fails() {
        let err = config_from(&[("CONTROL_RPC_DEBUG", "maybe")]).expect_err("bad flag");
        assert!(matches!(err, ConfigError::InvalidDebugFlag));
    }

    #[test]
    fn zero_line_limit_fails() {
        let err = config_from(&[("CONTROL_RPC_MAX_LINE_BYTES", "0")]).expect_err("zero limit");
        assert!(matches!(err, ConfigError::InvalidMaxLineBytes));
    }

    #[test]
    fn unknown_module_fails() {
        let err = config_from(&[("CONTROL_RPC_FUNCTIONS", "nosuchmodule")])
            .expect_err("unknown module");
        assert!(matches!(err, ConfigError::UnknownModule { .. }));
        assert!(err.to_string().contains("controlfunctions"));
    }

    #[test]
    fn relative_http_path_fails() {
        let err = config_from(&[("CONTROL_RPC_HTTP_PATH", "control")]).expect_err("no slash");
        assert!(matches!(err, ConfigError::InvalidHttpPath));
    }

    #[test]
    fn hostname_is_not_a_bind_address() {
        let err = config_from(&[("CONTROL_RPC_HOST", "localhost")]).expect_err("not an ip");
        assert!(matches!(err, ConfigError::InvalidSocket));
    }
}
