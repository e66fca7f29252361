//! Collaborator interfaces
//!
//! The database service, engine provisioning, the test-execution runner and
//! the optional non-script test runner are opaque to the harness. This
//! module holds the traits they implement and the values exchanged with
//! them.

use crate::error::Result;
use crate::report::TestReport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Final state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionState {
    Committed,
    Aborted,
}

/// A problem reported for a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Diagnostic category, e.g. `IntegrityConstraintViolation`
    #[serde(rename = "type")]
    pub kind: String,
    /// Error severity (otherwise a warning)
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub message: String,
}

/// Named result relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

/// Transaction submitted to the service
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRequest {
    pub database: String,
    pub engine: String,
    pub query: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,
    pub readonly: bool,
    pub timeout_secs: u64,
}

/// Service answer to a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub transaction_state: TransactionState,
    #[serde(default)]
    pub problems: Vec<Problem>,
    #[serde(default)]
    pub results: Vec<Relation>,
}

impl TransactionResponse {
    /// A committed transaction without problems or results
    pub fn committed() -> Self {
        Self {
            transaction_state: TransactionState::Committed,
            problems: Vec::new(),
            results: Vec::new(),
        }
    }
}

/// Model source installed into a package database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSource {
    /// Logical model name (`graphs/paths`)
    pub name: String,
    pub source: String,
}

/// Dependency descriptor from the package manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Which unexpected problems a step tolerates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowUnexpected {
    #[default]
    None,
    Warning,
    Errors,
}

/// One named, flagged transaction of a test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub name: String,
    pub query: String,
    pub readonly: bool,
    pub allow_unexpected: AllowUnexpected,
    pub expect_abort: bool,
}

/// A full test handed to a [`TestExecutor`]
#[derive(Debug, Clone)]
pub struct TestCase {
    /// `package/suite/test-file` context string
    pub name: String,
    /// Database the test clones before running
    pub prototype: String,
    pub engine: String,
    pub steps: Vec<Step>,
}

/// Database operations of the external service
#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// Create an empty database, returning the confirmed name
    async fn create_database(&self, name: &str) -> Result<String>;

    /// Clone `source` into `target`, returning the confirmed name
    async fn clone_database(&self, source: &str, target: &str) -> Result<String>;

    /// Delete a database
    async fn delete_database(&self, name: &str) -> Result<()>;

    /// Execute one transaction
    async fn execute(&self, request: &TransactionRequest) -> Result<TransactionResponse>;

    /// Transactionally install model sources and dependency directives
    async fn install_models(
        &self,
        database: &str,
        engine: &str,
        models: &[ModelSource],
        dependencies: &[Dependency],
    ) -> Result<TransactionResponse>;
}

/// Engine provisioning of the external service
#[async_trait]
pub trait EngineService: Send + Sync {
    /// Request a new engine
    async fn create_engine(&self, name: &str, size: &str) -> Result<()>;

    /// Wait until the engine accepts transactions
    async fn wait_until_provisioned(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Deprovision an engine
    async fn delete_engine(&self, name: &str) -> Result<()>;
}

/// Executes a test's steps against a fresh clone of its prototype
#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn run_test(&self, case: &TestCase) -> Result<TestReport>;
}

/// Runs the non-script tests of a package
#[async_trait]
pub trait UnitTestRunner: Send + Sync {
    async fn run(&self, package_dir: &Path, database: &str, engine: &str)
    -> Result<Vec<TestReport>>;
}
