//! Database lifecycle
//!
//! Package prototypes are created, installed and set up once; suites clone
//! them when they have their own setup script; tests always run against a
//! fresh clone. Every database created for a scope is deleted when the scope
//! ends, and deletion failures never hide the scope's own result.

use crate::error::{Error, Result};
use crate::execute::{Outcome, run_steps};
use crate::layout::{PRE_INSTALL, PRE_PACKAGE, script_stem};
use crate::package::{Package, Suite};
use crate::script::{read_blocks, to_steps};
use crate::service::{DatabaseService, TransactionState};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Steps of package preparation, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    Created,
    Installed,
    PreScriptRun,
    Ready,
}

/// Unique, service-safe database name: `<prefix>-<kind>-<uuid>`
pub fn database_name(prefix: &str, kind: &str) -> String {
    let prefix: String = prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{}-{}", prefix, kind, Uuid::new_v4().simple())
}

/// Creates, clones and deletes databases through the service
#[derive(Clone)]
pub struct DatabaseManager {
    service: Arc<dyn DatabaseService>,
}

impl DatabaseManager {
    pub fn new(service: Arc<dyn DatabaseService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &dyn DatabaseService {
        self.service.as_ref()
    }

    /// Create a database, returning the confirmed name
    pub async fn create(&self, name: &str) -> Result<String> {
        let created = self.service.create_database(name).await?;
        debug!("Created database {}", created);
        Ok(created)
    }

    /// Clone `source` into `target`, returning the confirmed name
    pub async fn clone_database(&self, source: &str, target: &str) -> Result<String> {
        let created = self.service.clone_database(source, target).await?;
        debug!("Cloned database {} into {}", source, created);
        Ok(created)
    }

    /// Best-effort delete; failures are logged, never returned
    pub async fn delete(&self, name: &str) -> bool {
        match self.service.delete_database(name).await {
            Ok(()) => {
                debug!("Deleted database {}", name);
                true
            }
            Err(e) => {
                warn!("Failed to delete database {}: {}", name, e);
                false
            }
        }
    }

    /// Await `scope`, then delete `name` whatever the outcome
    pub async fn with_cleanup<T, F>(&self, name: &str, scope: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = scope.await;
        self.delete(name).await;
        result
    }

    /// Run a script's blocks, in order, against `database`
    pub async fn run_script(&self, database: &str, engine: &str, script: &Path) -> Result<()> {
        let blocks = read_blocks(script)?;
        let steps = to_steps(&script_stem(script), &blocks);
        info!(
            "Running {} ({} block(s)) on {}",
            script.display(),
            steps.len(),
            database
        );
        run_steps(self.service(), database, engine, &steps)
            .await
            .map_err(|e| e.in_scope(script.display().to_string()))
    }

    /// Create and set up the package prototype `name`.
    ///
    /// On any failure after creation the database is deleted before the
    /// error is returned.
    pub async fn prepare_package(
        &self,
        package: &Package,
        name: &str,
        engine: &str,
        install_dependencies: bool,
    ) -> Result<String> {
        let name = self.create(name).await?;
        log_state(&name, PackageState::Created);

        let setup = async {
            if let Some(script) = package.script(PRE_INSTALL) {
                self.run_script(&name, engine, &script).await?;
            }
            self.install(package, &name, engine, install_dependencies)
                .await?;
            log_state(&name, PackageState::Installed);

            if let Some(script) = package.script(PRE_PACKAGE) {
                self.run_script(&name, engine, &script).await?;
            }
            log_state(&name, PackageState::PreScriptRun);
            Ok::<(), Error>(())
        };

        if let Err(e) = setup.await {
            self.delete(&name).await;
            return Err(e);
        }
        log_state(&name, PackageState::Ready);
        Ok(name)
    }

    async fn install(
        &self,
        package: &Package,
        database: &str,
        engine: &str,
        install_dependencies: bool,
    ) -> Result<()> {
        let dependencies = if install_dependencies {
            package.dependencies.as_slice()
        } else {
            &[]
        };
        info!(
            "Installing {} model(s) and {} dependency directive(s) into {}",
            package.models.len(),
            dependencies.len(),
            database
        );
        let response = self
            .service
            .install_models(database, engine, &package.models, dependencies)
            .await?;

        let outcome = Outcome::classify(&response);
        if response.transaction_state == TransactionState::Aborted || outcome.errored() {
            let mut lines = outcome.problem_lines();
            if response.transaction_state == TransactionState::Aborted {
                lines.insert(0, "transaction aborted".to_string());
            }
            return Err(Error::install(format!(
                "package {} failed to install: {}",
                package.name,
                lines.join("; ")
            )));
        }
        Ok(())
    }

    /// Produce the prototype the tests of `suite` clone.
    ///
    /// Without a suite setup script the package prototype is used as is.
    /// Otherwise it is cloned into `name` and the setup script runs on the
    /// clone. A clone left behind by a failed setup is reported in
    /// [`SuitePreparation::clone`]; deleting it is up to the caller.
    pub async fn prepare_suite(
        &self,
        suite: &Suite,
        prototype: &str,
        name: &str,
        engine: &str,
    ) -> SuitePreparation {
        let Some(script) = suite.before_suite() else {
            return SuitePreparation {
                clone: None,
                result: Ok(prototype.to_string()),
            };
        };

        let clone = match self.clone_database(prototype, name).await {
            Ok(clone) => clone,
            Err(e) => {
                return SuitePreparation {
                    clone: None,
                    result: Err(e),
                };
            }
        };

        let result = self
            .run_script(&clone, engine, &script)
            .await
            .map(|()| clone.clone());
        SuitePreparation {
            clone: Some(clone),
            result,
        }
    }
}

/// Outcome of suite preparation
#[derive(Debug)]
pub struct SuitePreparation {
    /// Suite database created by cloning, if any
    pub clone: Option<String>,
    /// Prototype for the suite's tests
    pub result: Result<String>,
}

fn log_state(database: &str, state: PackageState) {
    debug!("Package database {}: {:?}", database, state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Problem, TransactionResponse};
    use crate::testing::{Call, MockService};
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn manager(service: &Arc<MockService>) -> DatabaseManager {
        DatabaseManager::new(service.clone())
    }

    #[test]
    fn test_database_name_is_sanitized_and_unique() {
        let a = database_name("my.pkg", "suite");
        let b = database_name("my.pkg", "suite");
        assert!(a.starts_with("my_pkg-suite-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_prepare_package_runs_scripts_in_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "model/a.rel", "def a = 1");
        write(tmp.path(), "test/pre-install.rel", "// %% write\ndef pre_install = 1");
        write(tmp.path(), "test/pre-package.rel", "// %% write\ndef pre_package = 1");
        let package = Package::load(tmp.path()).unwrap();

        let service = Arc::new(MockService::new());
        let name = manager(&service)
            .prepare_package(&package, "pkg-db", "eng", true)
            .await
            .unwrap();
        assert_eq!(name, "pkg-db");

        let calls = service.calls();
        assert_eq!(calls[0], Call::CreateDatabase("pkg-db".to_string()));
        assert!(matches!(&calls[1], Call::Execute { query, readonly: false, .. } if query.contains("pre_install")));
        assert!(matches!(&calls[2], Call::Install { models, .. } if models == &vec!["a".to_string()]));
        assert!(matches!(&calls[3], Call::Execute { query, .. } if query.contains("pre_package")));
        assert_eq!(service.databases(), vec!["pkg-db"]);
    }

    #[tokio::test]
    async fn test_prepare_package_deletes_database_on_failure() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "model/a.rel", "def a = 1");
        write(tmp.path(), "test/pre-package.rel", "def boom = 1");
        let package = Package::load(tmp.path()).unwrap();

        let service = Arc::new(MockService::new());
        service.respond_when(
            "boom",
            TransactionResponse {
                transaction_state: TransactionState::Aborted,
                problems: Vec::new(),
                results: Vec::new(),
            },
        );

        let err = manager(&service)
            .prepare_package(&package, "pkg-db", "eng", true)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::OutcomeMismatch { .. }));
        assert!(service.databases().is_empty());
        assert_eq!(
            service.calls().last(),
            Some(&Call::DeleteDatabase("pkg-db".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failed_install_is_reported() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "model/a.rel", "def a = ");
        let package = Package::load(tmp.path()).unwrap();

        let service = Arc::new(MockService::new());
        service.respond_to_install(TransactionResponse {
            transaction_state: TransactionState::Committed,
            problems: vec![Problem {
                kind: "ParseError".to_string(),
                is_error: true,
                message: "unexpected end of input".to_string(),
            }],
            results: Vec::new(),
        });

        let err = manager(&service)
            .prepare_package(&package, "pkg-db", "eng", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected end of input"));
        assert!(service.databases().is_empty());
    }

    #[tokio::test]
    async fn test_delete_failure_is_swallowed() {
        let service = Arc::new(MockService::new());
        let dbs = manager(&service);
        dbs.create("x").await.unwrap();
        service.fail_delete("x");

        let result: Result<u32> = dbs.with_cleanup("x", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);

        let failed: Result<u32> = dbs
            .with_cleanup("x", async { Err(Error::NotFound("y".to_string())) })
            .await;
        assert!(matches!(failed, Err(Error::NotFound(name)) if name == "y"));
    }

    #[tokio::test]
    async fn test_prepare_suite_without_setup_reuses_prototype() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "test/s/test-a.rel", "def a = 1");
        let package = Package::load(tmp.path()).unwrap();
        let suite = &package.discover_suites().unwrap()[0];

        let service = Arc::new(MockService::new());
        let prep = manager(&service)
            .prepare_suite(suite, "proto", "suite-db", "eng")
            .await;
        assert_eq!(prep.clone, None);
        assert_eq!(prep.result.unwrap(), "proto");
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_suite_reports_clone_on_setup_failure() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "test/s/test-a.rel", "def a = 1");
        write(tmp.path(), "test/s/before-suite.rel", "// %% write\ndef broken = 1");
        let package = Package::load(tmp.path()).unwrap();
        let suite = &package.discover_suites().unwrap()[0];

        let service = Arc::new(MockService::new());
        let dbs = manager(&service);
        dbs.create("proto").await.unwrap();
        dbs.service()
            .install_models("proto", "eng", &[], &[])
            .await
            .unwrap();
        service.respond_when(
            "broken",
            TransactionResponse {
                transaction_state: TransactionState::Committed,
                problems: vec![Problem {
                    kind: "UndefinedError".to_string(),
                    is_error: true,
                    message: String::new(),
                }],
                results: Vec::new(),
            },
        );

        let prep = dbs.prepare_suite(suite, "proto", "suite-db", "eng").await;
        assert_eq!(prep.clone.as_deref(), Some("suite-db"));
        assert!(prep.result.is_err());
    }
}
