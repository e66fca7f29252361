//! Engine pool
//!
//! A bounded set of provisioned engines shared by every test of a run.
//! Engines are handed out as [`EngineLease`]s that return themselves to the
//! pool when dropped, so each successful acquire is released exactly once.

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::service::EngineService;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// How long a new engine may take to become usable
pub const PROVISION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Where an engine handle came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Named in the configuration; never returned to a pool
    Explicit,
    /// Borrowed from the pool
    Pooled,
}

/// A compute engine bound to a named backend instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineHandle {
    pub name: String,
    pub kind: EngineKind,
}

impl EngineHandle {
    pub fn explicit(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EngineKind::Explicit,
        }
    }
}

struct PoolState {
    engines: Vec<String>,
    idle: Mutex<Vec<String>>,
    permits: Semaphore,
}

/// Exclusive use of a pooled engine until dropped
pub struct EngineLease {
    handle: EngineHandle,
    state: Arc<PoolState>,
}

impl Deref for EngineLease {
    type Target = EngineHandle;

    fn deref(&self) -> &EngineHandle {
        &self.handle
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        debug!("Releasing engine {}", self.handle.name);
        self.state.idle.lock().push(self.handle.name.clone());
        self.state.permits.add_permits(1);
    }
}

/// Pool of provisioned engines
pub struct EnginePool {
    provisioner: Arc<dyn EngineService>,
    state: RwLock<Option<Arc<PoolState>>>,
}

impl EnginePool {
    pub fn new(provisioner: Arc<dyn EngineService>) -> Self {
        Self {
            provisioner,
            state: RwLock::new(None),
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.read().is_some()
    }

    /// Names of the pooled engines
    pub fn engines(&self) -> Vec<String> {
        self.state
            .read()
            .as_ref()
            .map(|s| s.engines.clone())
            .unwrap_or_default()
    }

    /// Provision `size` engines named `<prefix>-<n>` concurrently.
    ///
    /// If any engine fails to provision, every engine created so far is
    /// deleted before the error is returned.
    pub async fn start(&self, size: usize, engine_size: &str, prefix: &str) -> Result<()> {
        if size == 0 {
            return Err(Error::config("engine pool size must be at least 1"));
        }
        if self.is_started() {
            return Err(Error::pool("engine pool already started"));
        }

        let names: Vec<String> = (1..=size).map(|i| format!("{}-{}", prefix, i)).collect();
        info!("Provisioning {} engine(s) of size {}", size, engine_size);

        let results = join_all(names.iter().map(|name| self.provision(name, engine_size))).await;

        let mut created = Vec::new();
        let mut first_error = None;
        for (name, (was_created, result)) in names.iter().zip(results) {
            if was_created {
                created.push(name.clone());
            }
            if let Err(e) = result {
                warn!("Failed to provision engine {}: {}", name, e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            self.teardown(&created).await;
            return Err(e);
        }

        let state = Arc::new(PoolState {
            idle: Mutex::new(names.iter().rev().cloned().collect()),
            permits: Semaphore::new(names.len()),
            engines: names,
        });
        *self.state.write() = Some(state);
        info!("Engine pool ready");
        Ok(())
    }

    /// Returns whether the engine was created, and the provisioning result
    async fn provision(&self, name: &str, engine_size: &str) -> (bool, Result<()>) {
        if let Err(e) = self.provisioner.create_engine(name, engine_size).await {
            return (false, Err(e));
        }
        let ready = self
            .provisioner
            .wait_until_provisioned(name, PROVISION_TIMEOUT)
            .await;
        (true, ready)
    }

    async fn teardown(&self, engines: &[String]) -> usize {
        let mut failures = 0;
        for name in engines {
            if let Err(e) = self.provisioner.delete_engine(name).await {
                warn!("Failed to delete engine {}: {}", name, e);
                failures += 1;
            }
        }
        failures
    }

    /// Wait for an idle engine
    pub async fn acquire(&self) -> Result<EngineLease> {
        let state = self.state.read().clone().ok_or(Error::PoolNotStarted)?;

        state
            .permits
            .acquire()
            .await
            .map_err(|_| Error::pool("engine pool was stopped"))?
            .forget();

        let name = state.idle.lock().pop();
        match name {
            Some(name) => {
                debug!("Acquired engine {}", name);
                Ok(EngineLease {
                    handle: EngineHandle {
                        name,
                        kind: EngineKind::Pooled,
                    },
                    state,
                })
            }
            None => {
                state.permits.add_permits(1);
                Err(Error::pool("no idle engine despite free permit"))
            }
        }
    }

    /// Return an engine to the pool
    pub fn release(&self, lease: EngineLease) {
        drop(lease);
    }

    /// Deprovision every pooled engine.
    ///
    /// Deletion failures are logged and the remaining engines are still
    /// deleted. Returns the number of engines that could not be deleted.
    pub async fn stop(&self) -> usize {
        let Some(state) = self.state.write().take() else {
            return 0;
        };
        state.permits.close();
        info!("Stopping engine pool ({} engines)", state.engines.len());
        self.teardown(&state.engines).await
    }

    /// Run `f` with an engine.
    ///
    /// An explicit engine in `config` is passed straight through. Otherwise
    /// an engine is borrowed from the pool and returned on every exit path.
    pub async fn with_engine<F, Fut, T>(&self, config: &RunConfig, f: F) -> Result<T>
    where
        F: FnOnce(EngineHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(engine) = &config.engine {
            return f(EngineHandle::explicit(engine.clone())).await;
        }
        let lease = self.acquire().await?;
        let result = f(lease.handle.clone()).await;
        self.release(lease);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockService;

    fn pool(service: &Arc<MockService>) -> EnginePool {
        EnginePool::new(service.clone())
    }

    #[tokio::test]
    async fn test_acquire_without_pool_is_actionable() {
        let service = Arc::new(MockService::new());
        let err = pool(&service).acquire().await.err().unwrap();
        assert!(matches!(err, Error::PoolNotStarted));
    }

    #[tokio::test]
    async fn test_start_acquire_release() {
        let service = Arc::new(MockService::new());
        let pool = pool(&service);
        pool.start(2, "S", "run").await.unwrap();
        assert_eq!(pool.engines(), vec!["run-1", "run-2"]);
        assert_eq!(service.engines(), vec!["run-1", "run-2"]);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.name, b.name);
        assert_eq!(a.kind, EngineKind::Pooled);

        pool.release(a);
        let c = pool.acquire().await.unwrap();
        drop(c);
        drop(b);

        assert_eq!(pool.stop().await, 0);
        assert!(!pool.is_started());
        assert!(service.engines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_until_release() {
        let service = Arc::new(MockService::new());
        let pool = Arc::new(pool(&service));
        pool.start(1, "S", "run").await.unwrap();

        let held = pool.acquire().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_secs(5), pool.acquire()).await;
        assert!(blocked.is_err(), "second acquire should block");

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|l| l.name.clone()) })
        };
        tokio::task::yield_now().await;
        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), "run-1");
    }

    #[tokio::test]
    async fn test_failed_provisioning_tears_down_created_engines() {
        let service = Arc::new(MockService::new());
        service.fail_engine("run-2");
        let pool = pool(&service);

        assert!(pool.start(3, "S", "run").await.is_err());
        assert!(!pool.is_started());
        assert!(service.engines().is_empty());
    }

    #[tokio::test]
    async fn test_stop_continues_past_failures() {
        let service = Arc::new(MockService::new());
        let pool = pool(&service);
        pool.start(3, "S", "run").await.unwrap();
        service.fail_delete("run-1");

        assert_eq!(pool.stop().await, 1);
        assert_eq!(service.engines(), vec!["run-1"]);
    }

    #[tokio::test]
    async fn test_with_engine_explicit_skips_pool() {
        let service = Arc::new(MockService::new());
        let pool = pool(&service);
        let config = RunConfig::default().with_engine("mine");

        let handle = pool
            .with_engine(&config, |engine| async move { Ok(engine) })
            .await
            .unwrap();
        assert_eq!(handle, EngineHandle::explicit("mine"));
    }

    #[tokio::test]
    async fn test_with_engine_releases_on_error() {
        let service = Arc::new(MockService::new());
        let pool = pool(&service);
        pool.start(1, "S", "run").await.unwrap();
        let config = RunConfig::default();

        let result: Result<()> = pool
            .with_engine(&config, |_| async { Err(Error::pool("boom")) })
            .await;
        assert!(result.is_err());

        let again = pool
            .with_engine(&config, |engine| async move { Ok(engine.name) })
            .await
            .unwrap();
        assert_eq!(again, "run-1");
    }
}
