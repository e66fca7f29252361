//! In-memory database service for harness tests
//!
//! [`MockService`] implements both [`DatabaseService`] and [`EngineService`],
//! records every call, and enforces the service rules the harness depends
//! on: names are unique and a database that never received a transaction
//! cannot be cloned.

use crate::error::{Error, Result};
use crate::service::{
    DatabaseService, Dependency, EngineService, ModelSource, TransactionRequest,
    TransactionResponse,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

/// A call received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateDatabase(String),
    CloneDatabase { source: String, target: String },
    DeleteDatabase(String),
    Execute {
        database: String,
        engine: String,
        query: String,
        readonly: bool,
    },
    Install {
        database: String,
        models: Vec<String>,
        dependencies: Vec<String>,
    },
    CreateEngine(String),
    DeleteEngine(String),
}

#[derive(Debug, Default)]
struct Database {
    transactions: usize,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    databases: BTreeMap<String, Database>,
    engines: BTreeSet<String>,
    failing_engines: HashSet<String>,
    failing_deletes: HashSet<String>,
    responses: Vec<(String, TransactionResponse)>,
    install_response: Option<TransactionResponse>,
}

/// Recording in-memory service
#[derive(Default)]
pub struct MockService {
    state: Mutex<State>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer transactions whose query contains `needle` with `response`
    pub fn respond_when(&self, needle: impl Into<String>, response: TransactionResponse) {
        self.state.lock().responses.push((needle.into(), response));
    }

    /// Answer model installs with `response`
    pub fn respond_to_install(&self, response: TransactionResponse) {
        self.state.lock().install_response = Some(response);
    }

    /// Make provisioning of `name` fail
    pub fn fail_engine(&self, name: impl Into<String>) {
        self.state.lock().failing_engines.insert(name.into());
    }

    /// Make deletion of the engine or database `name` fail
    pub fn fail_delete(&self, name: impl Into<String>) {
        self.state.lock().failing_deletes.insert(name.into());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Live databases
    pub fn databases(&self) -> Vec<String> {
        self.state.lock().databases.keys().cloned().collect()
    }

    /// Live engines
    pub fn engines(&self) -> Vec<String> {
        self.state.lock().engines.iter().cloned().collect()
    }

    /// Queries executed against `database`, in order
    pub fn queries_on(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Execute {
                    database: db,
                    query,
                    ..
                } if db == database => Some(query.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl DatabaseService for MockService {
    async fn create_database(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateDatabase(name.to_string()));
        if state.databases.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        state.databases.insert(name.to_string(), Database::default());
        Ok(name.to_string())
    }

    async fn clone_database(&self, source: &str, target: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.calls.push(Call::CloneDatabase {
            source: source.to_string(),
            target: target.to_string(),
        });
        let transactions = match state.databases.get(source) {
            None => return Err(Error::NotFound(source.to_string())),
            Some(db) => db.transactions,
        };
        if transactions == 0 {
            return Err(Error::Service {
                status: 400,
                payload: format!("cannot clone '{}': no transaction committed", source),
            });
        }
        if state.databases.contains_key(target) {
            return Err(Error::AlreadyExists(target.to_string()));
        }
        state
            .databases
            .insert(target.to_string(), Database { transactions });
        Ok(target.to_string())
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::DeleteDatabase(name.to_string()));
        if state.failing_deletes.contains(name) {
            return Err(Error::Service {
                status: 500,
                payload: format!("delete of '{}' failed", name),
            });
        }
        state
            .databases
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn execute(&self, request: &TransactionRequest) -> Result<TransactionResponse> {
        let mut state = self.state.lock();
        state.calls.push(Call::Execute {
            database: request.database.clone(),
            engine: request.engine.clone(),
            query: request.query.clone(),
            readonly: request.readonly,
        });
        let response = state
            .responses
            .iter()
            .find(|(needle, _)| request.query.contains(needle.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(TransactionResponse::committed);
        match state.databases.get_mut(&request.database) {
            Some(db) => db.transactions += 1,
            None => return Err(Error::NotFound(request.database.clone())),
        }
        Ok(response)
    }

    async fn install_models(
        &self,
        database: &str,
        _engine: &str,
        models: &[ModelSource],
        dependencies: &[Dependency],
    ) -> Result<TransactionResponse> {
        let mut state = self.state.lock();
        state.calls.push(Call::Install {
            database: database.to_string(),
            models: models.iter().map(|m| m.name.clone()).collect(),
            dependencies: dependencies.iter().map(|d| d.name.clone()).collect(),
        });
        let response = state
            .install_response
            .clone()
            .unwrap_or_else(TransactionResponse::committed);
        match state.databases.get_mut(database) {
            Some(db) => db.transactions += 1,
            None => return Err(Error::NotFound(database.to_string())),
        }
        Ok(response)
    }
}

#[async_trait]
impl EngineService for MockService {
    async fn create_engine(&self, name: &str, _size: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateEngine(name.to_string()));
        if !state.engines.insert(name.to_string()) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    async fn wait_until_provisioned(&self, name: &str, timeout: Duration) -> Result<()> {
        let state = self.state.lock();
        if state.failing_engines.contains(name) {
            return Err(Error::Timeout(timeout.as_secs()));
        }
        Ok(())
    }

    async fn delete_engine(&self, name: &str) -> Result<()> {
        self.record(Call::DeleteEngine(name.to_string()));
        let mut state = self.state.lock();
        if state.failing_deletes.contains(name) {
            return Err(Error::Service {
                status: 500,
                payload: format!("delete of engine '{}' failed", name),
            });
        }
        state.engines.remove(name);
        Ok(())
    }
}
