//! Reltest - change-driven test orchestration for database packages
//!
//! Reltest runs the script tests of a package against a transactional
//! database service. Package, suite and test each get their own prototype
//! database, derived from the one above it by cloning, so setup runs once
//! per scope and every test starts from an isolated snapshot.
//!
//! # Pieces
//!
//! - [`script`]: splits scripts into transactional blocks at `// %%`
//!   directive lines
//! - [`selector`]: maps changed file paths to the suites and tests that
//!   must run again
//! - [`pool`]: shares a bounded set of provisioned engines
//! - [`database`]: creates, clones, prepares and deletes databases
//! - [`runner`]: drives package -> suite -> test execution
//!
//! The database service is reached through the traits in [`service`];
//! [`http::HttpService`] implements them over REST and
//! [`testing::MockService`] in memory.

pub mod config;
pub mod database;
pub mod error;
pub mod execute;
pub mod executor;
pub mod http;
pub mod layout;
pub mod package;
pub mod pool;
pub mod report;
pub mod runner;
pub mod script;
pub mod selector;
pub mod service;
pub mod testing;

pub use config::RunConfig;
pub use database::{DatabaseManager, PackageState, SuitePreparation};
pub use error::{Error, Result, ResultExt};
pub use executor::ServiceTestExecutor;
pub use http::HttpService;
pub use package::{Package, Suite};
pub use pool::{EngineHandle, EngineKind, EngineLease, EnginePool};
pub use report::{RunSummary, StepResult, TestReport};
pub use runner::TestRunner;
pub use script::{CodeBlock, parse_blocks, read_blocks};
pub use selector::{SuiteSelection, TestSelector, compute_selectors};
pub use service::{
    AllowUnexpected, DatabaseService, EngineService, Step, TestCase, TestExecutor,
    UnitTestRunner,
};
