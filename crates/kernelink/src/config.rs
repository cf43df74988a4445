//! Session configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::transport::{EngineConnector, EngineEndpoint, SpawnError};
use crate::render::{LiteralSyntax, ScriptSyntax};

pub const ENGINE_ENV: &str = "KERNELINK_ENGINE";
pub const STARTUP_TIMEOUT_ENV: &str = "KERNELINK_STARTUP_TIMEOUT_SECS";

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: {source}")]
    Endpoint {
        var: &'static str,
        #[source]
        source: SpawnError,
    },
    #[error("{var}: expected whole seconds, got '{value}'")]
    Timeout { var: &'static str, value: String },
}

#[derive(Clone)]
pub struct SessionConfig {
    pub connector: Option<Arc<dyn EngineConnector>>,
    pub client_name: String,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub syntax: Arc<dyn LiteralSyntax>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            connector: None,
            client_name: "kernelink".to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            syntax: Arc::new(ScriptSyntax),
        }
    }

    /// Build from `KERNELINK_ENGINE` and `KERNELINK_STARTUP_TIMEOUT_SECS`.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::new();

        if let Some(raw) = lookup(ENGINE_ENV).filter(|v| !v.trim().is_empty()) {
            let endpoint: EngineEndpoint = raw.parse().map_err(|source| ConfigError::Endpoint {
                var: ENGINE_ENV,
                source,
            })?;
            config = config.with_endpoint(endpoint);
        }

        if let Some(raw) = lookup(STARTUP_TIMEOUT_ENV) {
            let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::Timeout {
                var: STARTUP_TIMEOUT_ENV,
                value: raw.clone(),
            })?;
            config = config.with_startup_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn with_endpoint(self, endpoint: EngineEndpoint) -> Self {
        self.with_connector(Arc::new(endpoint))
    }

    pub fn with_connector(mut self, connector: Arc<dyn EngineConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_syntax(mut self, syntax: Arc<dyn LiteralSyntax>) -> Self {
        self.syntax = syntax;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("connector", &self.connector.as_ref().map(|c| c.describe()))
            .field("client_name", &self.client_name)
            .field("startup_timeout", &self.startup_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert!(config.connector.is_none());
        assert_eq!(config.client_name, "kernelink");
        assert_eq!(config.startup_timeout, Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn empty_environment_keeps_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.connector.is_none());
        assert_eq!(config.startup_timeout, DEFAULT_STARTUP_TIMEOUT);
    }

    #[test]
    fn reads_engine_and_timeout() {
        let config = SessionConfig::from_lookup(lookup(&[
            (ENGINE_ENV, "tcp:127.0.0.1:7077"),
            (STARTUP_TIMEOUT_ENV, " 15 "),
        ]))
        .unwrap();
        assert_eq!(
            config.connector.map(|c| c.describe()).as_deref(),
            Some("tcp:127.0.0.1:7077")
        );
        assert_eq!(config.startup_timeout, Duration::from_secs(15));
    }

    #[test]
    fn rejects_bad_values() {
        let err = SessionConfig::from_lookup(lookup(&[(STARTUP_TIMEOUT_ENV, "soon")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "KERNELINK_STARTUP_TIMEOUT_SECS: expected whole seconds, got 'soon'"
        );

        let err = SessionConfig::from_lookup(lookup(&[(ENGINE_ENV, "tcp:nohost")])).unwrap_err();
        assert!(matches!(err, ConfigError::Endpoint { var: ENGINE_ENV, .. }));
    }

    #[test]
    fn builder_overrides() {
        let config = SessionConfig::new()
            .with_endpoint(EngineEndpoint::spawn("node", ["engine.js"]))
            .with_client_name("mllib")
            .with_startup_timeout(Duration::from_millis(250))
            .with_shutdown_timeout(Duration::from_secs(1));
        assert_eq!(config.client_name, "mllib");
        assert_eq!(config.startup_timeout, Duration::from_millis(250));
        assert_eq!(
            config.connector.map(|c| c.describe()).as_deref(),
            Some("node engine.js")
        );
    }
}
