//! Version information for kernelink.

/// Kernelink version from Cargo.toml
pub const KERNELINK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Versions on both ends of a session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VersionInfo {
    /// Client library version.
    pub kernelink: &'static str,
    /// Engine name as reported in its Ready message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Engine version (if reported).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            kernelink: KERNELINK_VERSION,
            engine: None,
            engine_version: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with_engine_version(mut self, version: Option<String>) -> Self {
        self.engine_version = version;
        self
    }
}
