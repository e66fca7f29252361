//! Orchestration
//!
//! Drives the package -> suite -> test hierarchy:
//!
//! 1. Each package gets a prototype database (created, installed, set up).
//! 2. Each selected suite with a `before-suite.rel` clones the prototype
//!    and runs its setup on the clone.
//! 3. Each selected test runs `before-test`, its own blocks and
//!    `validate-test` against a fresh clone of the suite prototype.
//!
//! Suites and tests run strictly sequentially. Every database created for a
//! scope is deleted when the scope ends.

use crate::config::RunConfig;
use crate::database::{DatabaseManager, database_name};
use crate::error::{Error, Result, ResultExt};
use crate::layout::{is_script_relevant, script_stem};
use crate::package::{Package, Suite};
use crate::pool::EnginePool;
use crate::report::{RunSummary, TestReport};
use crate::script::{read_blocks, to_steps};
use crate::selector::{TestSelector, compute_selectors, selection_for};
use crate::service::{DatabaseService, Step, TestCase, TestExecutor, UnitTestRunner};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs test packages against the database service
pub struct TestRunner {
    config: RunConfig,
    databases: DatabaseManager,
    pool: Arc<EnginePool>,
    executor: Arc<dyn TestExecutor>,
    unit_tests: Option<Arc<dyn UnitTestRunner>>,
}

impl TestRunner {
    pub fn new(
        config: RunConfig,
        service: Arc<dyn DatabaseService>,
        pool: Arc<EnginePool>,
        executor: Arc<dyn TestExecutor>,
    ) -> Self {
        Self {
            config,
            databases: DatabaseManager::new(service),
            pool,
            executor,
            unit_tests: None,
        }
    }

    /// Also run the non-script tests of each package
    pub fn with_unit_tests(mut self, runner: Arc<dyn UnitTestRunner>) -> Self {
        self.unit_tests = Some(runner);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run every package, restricted to the tests affected by `changed`.
    ///
    /// An empty `changed` list runs everything. A non-empty list without
    /// any script path cannot select anything and skips the run. Packages
    /// with no selected test are neither prepared nor counted towards
    /// starting the pool.
    pub async fn run_packages<P, S>(&self, package_dirs: &[P], changed: &[S]) -> Result<RunSummary>
    where
        P: AsRef<Path>,
        S: AsRef<str>,
    {
        self.config.validate()?;

        if !changed.is_empty() && !changed.iter().any(|p| is_script_relevant(p.as_ref())) {
            info!("No script changed among {} path(s), nothing to run", changed.len());
            return Ok(RunSummary::default());
        }
        let selectors = compute_selectors(changed);
        if selectors.is_empty() {
            debug!("Running every suite");
        } else {
            debug!("Selectors: {:?}", selectors);
        }

        let mut packages = Vec::with_capacity(package_dirs.len());
        for dir in package_dirs {
            let package = load_package(dir.as_ref())?;
            if self.has_selected_work(&package, &selectors)? {
                packages.push(package);
            }
        }
        if packages.is_empty() {
            info!("No selected test in {} package(s)", package_dirs.len());
            return Ok(RunSummary::default());
        }

        let owns_pool = self.ensure_pool().await?;
        let mut summary = RunSummary::default();
        let mut outcome = Ok(());
        for package in &packages {
            match self.run_loaded_package(package, &selectors).await {
                Ok(package_summary) => summary.extend(package_summary),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        if owns_pool {
            self.stop_pool().await;
        }

        outcome.map(|()| summary)
    }

    /// Run the selected tests of one package
    pub async fn run_package(
        &self,
        dir: &Path,
        selectors: &BTreeSet<TestSelector>,
    ) -> Result<RunSummary> {
        let package = load_package(dir)?;
        if !self.has_selected_work(&package, selectors)? {
            return Ok(RunSummary::default());
        }
        self.run_loaded_package(&package, selectors).await
    }

    async fn run_loaded_package(
        &self,
        package: &Package,
        selectors: &BTreeSet<TestSelector>,
    ) -> Result<RunSummary> {
        info!("Running package {} ({})", package.name, package.dir.display());

        let result = match &self.config.package_database {
            Some(prototype) => {
                debug!("Using externally owned package database {}", prototype);
                self.run_package_tests(package, prototype, selectors).await
            }
            None => self.run_with_prototype(package, selectors).await,
        };
        result.scope(|| format!("package {}", package.name))
    }

    /// Whether `selectors` pick at least one test of `package`, counting
    /// its non-script tests when a runner for them is configured
    fn has_selected_work(
        &self,
        package: &Package,
        selectors: &BTreeSet<TestSelector>,
    ) -> Result<bool> {
        if self.unit_tests.is_some() && package.unit_test_dir().is_some() {
            return Ok(true);
        }
        let selected = selected_suites(package, selectors)
            .scope(|| format!("package {}", package.name))?;
        if selected.is_empty() {
            info!("Package {}: nothing selected", package.name);
        }
        Ok(!selected.is_empty())
    }

    async fn run_with_prototype(
        &self,
        package: &Package,
        selectors: &BTreeSet<TestSelector>,
    ) -> Result<RunSummary> {
        let name = database_name(&package.name, "package");
        let install_dependencies = self.config.install_dependencies;
        let prototype = self
            .pool
            .with_engine(&self.config, |engine| async move {
                self.databases
                    .prepare_package(package, &name, &engine.name, install_dependencies)
                    .await
            })
            .await?;

        self.databases
            .with_cleanup(
                &prototype,
                self.run_package_tests(package, &prototype, selectors),
            )
            .await
    }

    async fn run_package_tests(
        &self,
        package: &Package,
        prototype: &str,
        selectors: &BTreeSet<TestSelector>,
    ) -> Result<RunSummary> {
        let mut summary = self.run_suites(package, prototype, selectors).await?;

        if let (Some(runner), Some(dir)) = (&self.unit_tests, package.unit_test_dir()) {
            info!("Running non-script tests in {}", dir.display());
            let reports = self
                .pool
                .with_engine(&self.config, |engine| async move {
                    runner.run(&package.dir, prototype, &engine.name).await
                })
                .await
                .scope(|| "non-script tests")?;
            for report in reports {
                summary.record(report);
            }
        }
        Ok(summary)
    }

    /// Run the discovered suites of `package` that `selectors` select
    pub async fn run_suites(
        &self,
        package: &Package,
        prototype: &str,
        selectors: &BTreeSet<TestSelector>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for (suite, tests) in selected_suites(package, selectors)? {
            let tests: Vec<&Path> = tests.iter().map(|p| p.as_path()).collect();
            info!("Running suite '{}' ({} test(s))", suite.key, tests.len());
            let reports = self
                .run_suite(package, &suite, prototype, &tests)
                .await
                .scope(|| format!("suite {}", display_key(&suite.key)))?;
            for report in reports {
                summary.record(report);
            }
        }
        Ok(summary)
    }

    async fn run_suite(
        &self,
        package: &Package,
        suite: &Suite,
        prototype: &str,
        tests: &[&Path],
    ) -> Result<Vec<TestReport>> {
        if self.config.self_contained {
            return self.run_tests(package, suite, prototype, tests).await;
        }

        let name = database_name(&package.name, "suite");
        let prep = self
            .pool
            .with_engine(&self.config, |engine| async move {
                Ok::<_, Error>(
                    self.databases
                        .prepare_suite(suite, prototype, &name, &engine.name)
                        .await,
                )
            })
            .await?;

        let result = match prep.result {
            Ok(suite_prototype) => {
                self.run_tests(package, suite, &suite_prototype, tests)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Some(clone) = prep.clone {
            self.databases.delete(&clone).await;
        }
        result
    }

    async fn run_tests(
        &self,
        package: &Package,
        suite: &Suite,
        prototype: &str,
        tests: &[&Path],
    ) -> Result<Vec<TestReport>> {
        let mut reports = Vec::with_capacity(tests.len());
        for test in tests {
            reports.push(self.run_test(package, suite, test, prototype).await?);
        }
        Ok(reports)
    }

    /// Run one test file against a fresh clone of `prototype`
    pub async fn run_test(
        &self,
        package: &Package,
        suite: &Suite,
        test_file: &Path,
        prototype: &str,
    ) -> Result<TestReport> {
        let context = test_context(package, suite, test_file);

        let body = read_blocks(test_file).scope(|| context.clone())?;
        if body.is_empty() {
            warn!("{}: no blocks to run", context);
            return Ok(TestReport::skipped(context));
        }

        let mut steps = Vec::new();
        if self.config.self_contained {
            if let Some(script) = suite.before_suite() {
                steps.extend(script_steps(&script).scope(|| context.clone())?);
            }
        }
        if let Some(script) = package.before_test(suite) {
            steps.extend(script_steps(&script).scope(|| context.clone())?);
        }
        steps.extend(to_steps(&script_stem(test_file), &body));
        if let Some(script) = package.validate_test(suite) {
            steps.extend(script_steps(&script).scope(|| context.clone())?);
        }

        debug!("{}: {} step(s)", context, steps.len());
        let name = context.clone();
        self.pool
            .with_engine(&self.config, |engine| async move {
                let case = TestCase {
                    name,
                    prototype: prototype.to_string(),
                    engine: engine.name,
                    steps,
                };
                self.executor.run_test(&case).await
            })
            .await
            .scope(|| context)
    }

    /// Run a script's blocks against an existing database
    pub async fn run_script(&self, database: &str, script: &Path) -> Result<()> {
        self.config.validate()?;
        let owns_pool = self.ensure_pool().await?;
        let result = self
            .pool
            .with_engine(&self.config, |engine| async move {
                self.databases
                    .run_script(database, &engine.name, script)
                    .await
            })
            .await;
        if owns_pool {
            self.stop_pool().await;
        }
        result
    }

    /// Start the pool when no explicit engine is configured and nobody
    /// started one yet. Returns whether this call started it.
    async fn ensure_pool(&self) -> Result<bool> {
        if self.config.engine.is_some() || self.pool.is_started() {
            return Ok(false);
        }
        self.pool
            .start(
                self.config.pool_size,
                &self.config.engine_size,
                &self.config.engine_prefix,
            )
            .await?;
        Ok(true)
    }

    async fn stop_pool(&self) {
        let failures = self.pool.stop().await;
        if failures > 0 {
            warn!("{} engine(s) could not be deleted", failures);
        }
    }
}

fn load_package(dir: &Path) -> Result<Package> {
    Package::load(dir).scope(|| format!("package {}", dir.display()))
}

/// Discovered suites of `package` paired with their selected test files,
/// leaving out suites with nothing selected
fn selected_suites(
    package: &Package,
    selectors: &BTreeSet<TestSelector>,
) -> Result<Vec<(Suite, Vec<PathBuf>)>> {
    let mut selected = Vec::new();
    for suite in package.discover_suites()? {
        let Some(selection) = selection_for(selectors, &suite.key) else {
            debug!("Suite '{}' not selected", suite.key);
            continue;
        };
        let tests: Vec<PathBuf> = suite
            .tests
            .iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| selection.includes(n))
            })
            .cloned()
            .collect();
        if !tests.is_empty() {
            selected.push((suite, tests));
        }
    }
    Ok(selected)
}

fn script_steps(script: &Path) -> Result<Vec<Step>> {
    let blocks = read_blocks(script)?;
    Ok(to_steps(&script_stem(script), &blocks))
}

fn display_key(key: &str) -> &str {
    if key.is_empty() { "." } else { key }
}

/// `package/suite/test-file` context string
fn test_context(package: &Package, suite: &Suite, test_file: &Path) -> String {
    let file = test_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if suite.key.is_empty() {
        format!("{}/{}", package.name, file)
    } else {
        format!("{}/{}/{}", package.name, suite.key, file)
    }
}
