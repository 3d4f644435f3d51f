//! # Service Configuration
//!
//! [`ServiceConfig`] is the immutable description of a runnable service. It is
//! validated once, at construction, and then shared read-only (behind an `Arc`)
//! with every manager and service hook.
//!
//! There are three ways to obtain one:
//!
//! - [`ServiceConfig::builder`] for code-driven setup,
//! - `serde` deserialization (validated through the same rules),
//! - [`ServiceEnv`] for loading from `APP_*` environment variables.

use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building a [`ServiceConfig`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("host must not be empty")]
    EmptyHost,
    #[error("port {0} is outside the range 1-65535")]
    PortOutOfRange(u32),
    #[error("workers must be at least 1")]
    NoWorkers,
    #[error("unknown environment '{0}' (expected development, staging or production)")]
    UnknownEnvironment(String),
    #[error("failed to read configuration from environment: {0}")]
    Env(String),
}

/// Deployment environment of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            _ => Err(ConfigurationError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// Immutable description of a runnable service.
///
/// Fields are private: the only way to get a `ServiceConfig` is through a
/// validating constructor, so every instance in the system satisfies the
/// port, name and worker constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawServiceConfig")]
pub struct ServiceConfig {
    service_name: String,
    host: String,
    port: u16,
    version: String,
    workers: u32,
    debug_mode: bool,
    environment: Environment,
}

impl ServiceConfig {
    /// Starts a builder with defaults for everything except the service name.
    pub fn builder(service_name: impl Into<String>) -> ServiceConfigBuilder {
        ServiceConfigBuilder::new(service_name)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn workers(&self) -> u32 {
        self.workers
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Ordered `(field, value)` pairs, used by the console report.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("service_name", self.service_name.clone()),
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
            ("version", self.version.clone()),
            ("workers", self.workers.to_string()),
            ("debug_mode", self.debug_mode.to_string()),
            ("environment", self.environment.to_string()),
        ]
    }
}

/// Builder for [`ServiceConfig`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ServiceConfigBuilder {
    service_name: String,
    host: String,
    port: u32,
    version: String,
    workers: u32,
    debug_mode: bool,
    environment: String,
}

impl ServiceConfigBuilder {
    fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            version: "0.1.0".to_string(),
            workers: 1,
            debug_mode: false,
            environment: Environment::Development.as_str().to_string(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Accepts a wide integer so out-of-range ports are reported, not truncated.
    pub fn port(mut self, port: u32) -> Self {
        self.port = port;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    pub fn debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn build(self) -> Result<ServiceConfig, ConfigurationError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigurationError::EmptyServiceName);
        }
        if self.host.trim().is_empty() {
            return Err(ConfigurationError::EmptyHost);
        }
        let port = match u16::try_from(self.port) {
            Ok(port) if port > 0 => port,
            _ => return Err(ConfigurationError::PortOutOfRange(self.port)),
        };
        if self.workers == 0 {
            return Err(ConfigurationError::NoWorkers);
        }
        let environment = self.environment.parse()?;

        Ok(ServiceConfig {
            service_name: self.service_name,
            host: self.host,
            port,
            version: self.version,
            workers: self.workers,
            debug_mode: self.debug_mode,
            environment,
        })
    }
}

/// Unvalidated wire shape; `ServiceConfig` deserializes through it.
#[derive(Debug, Deserialize)]
struct RawServiceConfig {
    service_name: String,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u32,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default = "default_workers")]
    workers: u32,
    #[serde(default)]
    debug_mode: bool,
    #[serde(default = "default_environment")]
    environment: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u32 {
    8000
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_workers() -> u32 {
    1
}

fn default_environment() -> String {
    Environment::Development.as_str().to_string()
}

impl TryFrom<RawServiceConfig> for ServiceConfig {
    type Error = ConfigurationError;

    fn try_from(raw: RawServiceConfig) -> Result<Self, Self::Error> {
        ServiceConfig::builder(raw.service_name)
            .host(raw.host)
            .port(raw.port)
            .version(raw.version)
            .workers(raw.workers)
            .debug_mode(raw.debug_mode)
            .environment(raw.environment)
            .build()
    }
}

/// Service configuration read from `APP_*` environment variables.
#[derive(Envconfig, Debug, Clone)]
pub struct ServiceEnv {
    #[envconfig(from = "APP_SERVICE_NAME")]
    pub service_name: String,

    #[envconfig(from = "APP_HOST", default = "127.0.0.1")]
    pub host: String,

    #[envconfig(from = "APP_PORT", default = "8000")]
    pub port: u32,

    #[envconfig(from = "APP_VERSION", default = "0.1.0")]
    pub version: String,

    #[envconfig(from = "APP_WORKERS", default = "1")]
    pub workers: u32,

    #[envconfig(from = "APP_DEBUG", default = "false")]
    pub debug_mode: bool,

    #[envconfig(from = "APP_ENVIRONMENT", default = "development")]
    pub environment: String,
}

impl ServiceEnv {
    /// Reads the process environment and validates the result.
    pub fn load() -> Result<ServiceConfig, ConfigurationError> {
        let env = ServiceEnv::init_from_env().map_err(|e| ConfigurationError::Env(e.to_string()))?;
        env.into_config()
    }

    pub fn into_config(self) -> Result<ServiceConfig, ConfigurationError> {
        ServiceConfig::builder(self.service_name)
            .host(self.host)
            .port(self.port)
            .version(self.version)
            .workers(self.workers)
            .debug_mode(self.debug_mode)
            .environment(self.environment)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn builder() -> ServiceConfigBuilder {
        ServiceConfig::builder("svc")
            .host("localhost")
            .port(8080)
            .version("1.0")
            .workers(1)
            .debug_mode(true)
            .environment("development")
    }

    #[test]
    fn test_valid_config_builds() {
        let config = builder().build().unwrap();
        assert_eq!(config.service_name(), "svc");
        assert_eq!(config.port(), 8080);
        assert_eq!(config.environment(), Environment::Development);
        assert!(config.debug_mode());
    }

    #[test]
    fn test_port_bounds() {
        assert!(builder().port(1).build().is_ok());
        assert!(builder().port(65535).build().is_ok());
        assert_eq!(
            builder().port(0).build(),
            Err(ConfigurationError::PortOutOfRange(0))
        );
        assert_eq!(
            builder().port(65536).build(),
            Err(ConfigurationError::PortOutOfRange(65536))
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = ServiceConfig::builder("  ").build();
        assert_eq!(result, Err(ConfigurationError::EmptyServiceName));
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let result = builder().environment("qa").build();
        assert!(matches!(result, Err(ConfigurationError::UnknownEnvironment(e)) if e == "qa"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert_eq!(builder().workers(0).build(), Err(ConfigurationError::NoWorkers));
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"service_name":"svc","port":9000,"environment":"staging"}"#;
        let config: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.environment(), Environment::Staging);
        assert_eq!(config.host(), "127.0.0.1");

        let bad = r#"{"service_name":"svc","port":70000}"#;
        assert!(serde_json::from_str::<ServiceConfig>(bad).is_err());
    }

    #[test]
    fn test_env_loader() {
        let vars = HashMap::from([
            ("APP_SERVICE_NAME".to_string(), "billing".to_string()),
            ("APP_PORT".to_string(), "9100".to_string()),
            ("APP_ENVIRONMENT".to_string(), "production".to_string()),
        ]);
        let config = ServiceEnv::init_from_hashmap(&vars)
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config.service_name(), "billing");
        assert_eq!(config.port(), 9100);
        assert_eq!(config.workers(), 1);
        assert_eq!(config.environment(), Environment::Production);
    }
}
