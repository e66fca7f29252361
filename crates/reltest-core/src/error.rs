//! Error types for reltest

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the reltest [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while preparing and running test packages
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid engine/pool setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An engine was requested but no pool was ever started
    #[error(
        "No engine available: start an engine pool before running tests, \
         or configure an explicit engine"
    )]
    PoolNotStarted,

    /// Lower-level pool failure (pool stopped, provisioning failed, ...)
    #[error("Engine pool error: {0}")]
    Pool(String),

    /// A database or engine with this name already exists
    #[error("'{0}' already exists")]
    AlreadyExists(String),

    /// A clone source (or other named resource) does not exist
    #[error("'{0}' not found")]
    NotFound(String),

    /// The database service rejected a request
    #[error("Service error ({status}): {payload}")]
    Service {
        /// HTTP-like status code reported by the service
        status: u16,
        /// Diagnostic payload returned by the service
        payload: String,
    },

    /// A transaction or provisioning wait exceeded its ceiling
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Malformed script or directive
    #[error("Parse error in {}: {message} (directive: {directive})", .file.display())]
    Parse {
        /// Script that owns the offending directive
        file: PathBuf,
        /// The directive line
        directive: String,
        /// What went wrong
        message: String,
    },

    /// A block's abort/error outcome disagrees with its declared expectation
    #[error("Step '{step}' {detail}{}", format_problems(.problems))]
    OutcomeMismatch {
        /// Name of the executed step
        step: String,
        /// Human readable mismatch description
        detail: String,
        /// Problems and abort diagnostics reported by the service
        problems: Vec<String>,
    },

    /// Installing package sources failed
    #[error("Install error: {0}")]
    Install(String),

    /// Error annotated with the package/suite/test it occurred in
    #[error("{context}: {source}")]
    Scope {
        /// Package, suite or test context string
        context: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// I/O errors reading packages and scripts
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid service URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed package manifest
    #[error("Manifest error: {0}")]
    Toml(#[from] toml::de::Error),
}

fn format_problems(problems: &[String]) -> String {
    if problems.is_empty() {
        String::new()
    } else {
        format!("\n  - {}", problems.join("\n  - "))
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a pool error
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    /// Create an install error
    pub fn install(msg: impl Into<String>) -> Self {
        Self::Install(msg.into())
    }

    /// Create a parse error for a directive owned by `file`
    pub fn parse(
        file: impl Into<PathBuf>,
        directive: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Parse {
            file: file.into(),
            directive: directive.into(),
            message: msg.into(),
        }
    }

    /// Wrap this error with a package/suite/test context string
    pub fn in_scope(self, context: impl Into<String>) -> Self {
        Self::Scope {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any scope wrappers and return the underlying error
    pub fn root(&self) -> &Error {
        match self {
            Self::Scope { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Attach scope context to fallible results
pub trait ResultExt<T> {
    /// Wrap the error (if any) with a lazily built context string
    fn scope<C, F>(self, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn scope<C, F>(self, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.in_scope(context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_prefixes_context() {
        let err = Error::NotFound("db-1".to_string())
            .in_scope("package foo")
            .in_scope("run");
        assert_eq!(err.to_string(), "run: package foo: 'db-1' not found");
        assert!(matches!(err.root(), Error::NotFound(name) if name == "db-1"));
    }

    #[test]
    fn test_pool_not_started_hint() {
        let msg = Error::PoolNotStarted.to_string();
        assert!(msg.contains("start an engine pool"));
        assert!(msg.contains("explicit engine"));
    }

    #[test]
    fn test_mismatch_lists_problems() {
        let err = Error::OutcomeMismatch {
            step: "test-foo".to_string(),
            detail: "aborted unexpectedly".to_string(),
            problems: vec!["abort: ic_violation".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Step 'test-foo' aborted unexpectedly\n  - abort: ic_violation"
        );
    }
}
