//! Built-in test executor
//!
//! Runs a [`TestCase`] on the database service itself: the prototype is
//! cloned into a transient database, the steps run in order against the
//! clone, and the clone is deleted afterwards.

use crate::database::{DatabaseManager, database_name};
use crate::error::Result;
use crate::execute::run_steps_reporting;
use crate::report::TestReport;
use crate::service::{DatabaseService, TestCase, TestExecutor};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Prefix of transient test database names
const TEST_DATABASE_PREFIX: &str = "reltest";

/// [`TestExecutor`] backed by a [`DatabaseService`]
pub struct ServiceTestExecutor {
    databases: DatabaseManager,
}

impl ServiceTestExecutor {
    pub fn new(service: Arc<dyn DatabaseService>) -> Self {
        Self {
            databases: DatabaseManager::new(service),
        }
    }
}

#[async_trait]
impl TestExecutor for ServiceTestExecutor {
    async fn run_test(&self, case: &TestCase) -> Result<TestReport> {
        let target = database_name(TEST_DATABASE_PREFIX, "test");
        let clone = self
            .databases
            .clone_database(&case.prototype, &target)
            .await?;
        info!("Running {} on {}", case.name, clone);

        self.databases
            .with_cleanup(&clone, async {
                let steps = run_steps_reporting(
                    self.databases.service(),
                    &clone,
                    &case.engine,
                    &case.steps,
                )
                .await?;
                Ok(TestReport::new(case.name.clone(), steps))
            })
            .await
    }
}
