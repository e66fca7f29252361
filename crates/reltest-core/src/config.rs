//! Run configuration
//!
//! [`RunConfig`] is built once at the edge of the process and passed by
//! reference into every entry point. Nothing inside the crate mutates it.

use crate::error::{Error, Result};

/// Default number of pooled engines
pub const DEFAULT_POOL_SIZE: usize = 2;
/// Default engine size requested from the service
pub const DEFAULT_ENGINE_SIZE: &str = "S";
/// Default prefix of pooled engine names
pub const DEFAULT_ENGINE_PREFIX: &str = "reltest";

/// Immutable settings of a test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Explicit engine; bypasses the pool entirely
    pub engine: Option<String>,
    /// Number of engines provisioned when a pool is started
    pub pool_size: usize,
    /// Size of pooled engines
    pub engine_size: String,
    /// Prefix of pooled engine names
    pub engine_prefix: String,
    /// Apply the manifest's dependency directives on install
    pub install_dependencies: bool,
    /// Run each test without suite preparation, prepending the suite
    /// setup script to the test's own steps
    pub self_contained: bool,
    /// Externally owned package prototype; never created nor deleted
    pub package_database: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            engine: None,
            pool_size: DEFAULT_POOL_SIZE,
            engine_size: DEFAULT_ENGINE_SIZE.to_string(),
            engine_prefix: DEFAULT_ENGINE_PREFIX.to_string(),
            install_dependencies: true,
            self_contained: false,
            package_database: None,
        }
    }
}

impl RunConfig {
    /// Use an explicit engine instead of a pool
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_engine_size(mut self, size: impl Into<String>) -> Self {
        self.engine_size = size.into();
        self
    }

    pub fn with_self_contained(mut self, self_contained: bool) -> Self {
        self.self_contained = self_contained;
        self
    }

    /// Reuse an existing package prototype owned by the caller
    pub fn with_package_database(mut self, name: impl Into<String>) -> Self {
        self.package_database = Some(name.into());
        self
    }

    /// Reject settings no run can satisfy
    pub fn validate(&self) -> Result<()> {
        if self.engine.as_deref().is_some_and(str::is_empty) {
            return Err(Error::config("explicit engine name is empty"));
        }
        if self.engine.is_none() && self.pool_size == 0 {
            return Err(Error::config(
                "pool size must be at least 1 when no explicit engine is configured",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_pool_needs_explicit_engine() {
        let config = RunConfig::default().with_pool_size(0);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
        assert!(config.with_engine("eng-1").validate().is_ok());
    }

    #[test]
    fn test_empty_engine_rejected() {
        assert!(RunConfig::default().with_engine("").validate().is_err());
    }
}
