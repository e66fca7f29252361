//! REST implementation of the database service
//!
//! Endpoints, relative to the base URL:
//!
//! | Operation            | Request                                   |
//! |----------------------|-------------------------------------------|
//! | create database      | `POST /databases` `{name}`                |
//! | clone database       | `POST /databases` `{name, clone_from}`    |
//! | delete database      | `DELETE /databases/{name}`                |
//! | execute transaction  | `POST /transactions`                      |
//! | install models       | `POST /databases/{name}/models`           |
//! | create engine        | `POST /engines` `{name, size}`            |
//! | engine state         | `GET /engines/{name}`                     |
//! | delete engine        | `DELETE /engines/{name}`                  |
//!
//! 409 answers map to [`Error::AlreadyExists`], 404 to [`Error::NotFound`],
//! and every other failure status to [`Error::Service`].

use crate::error::{Error, Result};
use crate::service::{
    DatabaseService, Dependency, EngineService, ModelSource, TransactionRequest,
    TransactionResponse,
};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Delay between engine state polls
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Engine state reported once an engine accepts transactions
const ENGINE_READY: &str = "PROVISIONED";

/// Engine state reported when provisioning gave up
const ENGINE_FAILED: &str = "PROVISION_FAILED";

#[derive(Debug, Serialize)]
struct CreateDatabaseRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    clone_from: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DatabaseResponse {
    name: String,
}

#[derive(Debug, Serialize)]
struct InstallRequest<'a> {
    engine: &'a str,
    models: &'a [ModelSource],
    dependencies: &'a [Dependency],
}

#[derive(Debug, Serialize)]
struct CreateEngineRequest<'a> {
    name: &'a str,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct EngineResponse {
    state: String,
}

/// Database and engine service over HTTP
#[derive(Debug, Clone)]
pub struct HttpService {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    poll_interval: Duration,
}

impl HttpService {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let client = ClientBuilder::new()
            .user_agent(concat!("reltest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.map(String::from),
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Override the engine state polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn build_request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base_url.join(path)?;
        let mut req = self.client.request(method, url);
        if let Some(ref key) = self.api_key {
            req = req.header("X-API-Key", key);
        }
        Ok(req)
    }

    /// Map failure statuses onto the error taxonomy; `subject` names the
    /// database or engine the request was about
    async fn check(response: Response, subject: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::CONFLICT => Err(Error::AlreadyExists(subject.to_string())),
            StatusCode::NOT_FOUND => Err(Error::NotFound(subject.to_string())),
            _ => {
                let payload = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(Error::Service {
                    status: status.as_u16(),
                    payload,
                })
            }
        }
    }

    async fn post_database(&self, request: &CreateDatabaseRequest<'_>, subject: &str) -> Result<String> {
        let response = self
            .build_request(Method::POST, "/databases")?
            .json(request)
            .send()
            .await?;
        let created: DatabaseResponse = Self::check(response, subject).await?.json().await?;
        Ok(created.name)
    }

    /// Poll until the engine is ready or its provisioning failed
    async fn poll_engine(&self, name: &str) -> Result<()> {
        loop {
            let state = self.engine_state(name).await?;
            debug!("Engine {} is {}", name, state);
            if state == ENGINE_READY {
                return Ok(());
            }
            if state == ENGINE_FAILED {
                return Err(Error::pool(format!("engine {} failed to provision", name)));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn engine_state(&self, name: &str) -> Result<String> {
        let response = self
            .build_request(Method::GET, &format!("/engines/{}", name))?
            .send()
            .await?;
        let engine: EngineResponse = Self::check(response, name).await?.json().await?;
        Ok(engine.state)
    }
}

#[async_trait]
impl DatabaseService for HttpService {
    async fn create_database(&self, name: &str) -> Result<String> {
        let request = CreateDatabaseRequest {
            name,
            clone_from: None,
        };
        self.post_database(&request, name).await
    }

    async fn clone_database(&self, source: &str, target: &str) -> Result<String> {
        let request = CreateDatabaseRequest {
            name: target,
            clone_from: Some(source),
        };
        let response = self
            .build_request(Method::POST, "/databases")?
            .json(&request)
            .send()
            .await?;
        // A missing clone source is the only 404 this request can produce
        let subject = if response.status() == StatusCode::NOT_FOUND {
            source
        } else {
            target
        };
        let created: DatabaseResponse = Self::check(response, subject).await?.json().await?;
        Ok(created.name)
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        let response = self
            .build_request(Method::DELETE, &format!("/databases/{}", name))?
            .send()
            .await?;
        Self::check(response, name).await?;
        Ok(())
    }

    async fn execute(&self, request: &TransactionRequest) -> Result<TransactionResponse> {
        let response = self
            .build_request(Method::POST, "/transactions")?
            .json(request)
            .send()
            .await?;
        Ok(Self::check(response, &request.database).await?.json().await?)
    }

    async fn install_models(
        &self,
        database: &str,
        engine: &str,
        models: &[ModelSource],
        dependencies: &[Dependency],
    ) -> Result<TransactionResponse> {
        let request = InstallRequest {
            engine,
            models,
            dependencies,
        };
        let response = self
            .build_request(Method::POST, &format!("/databases/{}/models", database))?
            .json(&request)
            .send()
            .await?;
        Ok(Self::check(response, database).await?.json().await?)
    }
}

#[async_trait]
impl EngineService for HttpService {
    async fn create_engine(&self, name: &str, size: &str) -> Result<()> {
        let response = self
            .build_request(Method::POST, "/engines")?
            .json(&CreateEngineRequest { name, size })
            .send()
            .await?;
        Self::check(response, name).await?;
        Ok(())
    }

    async fn wait_until_provisioned(&self, name: &str, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.poll_engine(name))
            .await
            .map_err(|_| Error::Timeout(timeout.as_secs()))?
    }

    async fn delete_engine(&self, name: &str) -> Result<()> {
        let response = self
            .build_request(Method::DELETE, &format!("/engines/{}", name))?
            .send()
            .await?;
        Self::check(response, name).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::TransactionState;
    use std::collections::BTreeMap;

    fn service(server: &mockito::ServerGuard) -> HttpService {
        HttpService::new(&server.url(), Some("secret"))
            .unwrap()
            .with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_create_database_sends_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/databases")
            .match_header("X-API-Key", "secret")
            .match_body(mockito::Matcher::Json(serde_json::json!({"name": "db-1"})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name":"db-1"}"#)
            .create_async()
            .await;

        let name = service(&server).create_database("db-1").await.unwrap();
        assert_eq!(name, "db-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_conflict_maps_to_already_exists() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/databases")
            .with_status(409)
            .with_body("exists")
            .create_async()
            .await;

        let err = service(&server).create_database("db-1").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(name) if name == "db-1"));
    }

    #[tokio::test]
    async fn test_clone_of_missing_source_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/databases")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"clone_from": "proto"}),
            ))
            .with_status(404)
            .create_async()
            .await;

        let err = service(&server)
            .clone_database("proto", "copy")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(name) if name == "proto"));
    }

    #[tokio::test]
    async fn test_other_failures_keep_payload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/databases/db-1")
            .with_status(500)
            .with_body("backend unavailable")
            .create_async()
            .await;

        let err = service(&server).delete_database("db-1").await.unwrap_err();
        match err {
            Error::Service { status, payload } => {
                assert_eq!(status, 500);
                assert_eq!(payload, "backend unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_execute_parses_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/transactions")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"database": "db", "readonly": true}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"transaction_state":"ABORTED",
                    "problems":[{"type":"IntegrityConstraintViolation","is_error":true}],
                    "results":[{"name":"abort","rows":[["ic","must hold"]]}]}"#,
            )
            .create_async()
            .await;

        let request = TransactionRequest {
            database: "db".to_string(),
            engine: "eng".to_string(),
            query: "def x = 1".to_string(),
            inputs: BTreeMap::new(),
            readonly: true,
            timeout_secs: 60,
        };
        let response = service(&server).execute(&request).await.unwrap();
        assert_eq!(response.transaction_state, TransactionState::Aborted);
        assert_eq!(response.problems[0].kind, "IntegrityConstraintViolation");
        assert_eq!(response.results[0].name, "abort");
    }

    #[tokio::test]
    async fn test_wait_until_provisioned_polls_state() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/engines/eng-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"state":"PROVISIONED"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/engines/eng-2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"state":"PROVISION_FAILED"}"#)
            .create_async()
            .await;

        let http = service(&server);
        http.wait_until_provisioned("eng-1", Duration::from_secs(5))
            .await
            .unwrap();
        let err = http
            .wait_until_provisioned("eng-2", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Pool(_)));
    }

    #[tokio::test]
    async fn test_wait_until_provisioned_times_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/engines/eng-slow")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"state":"PROVISIONING"}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let err = service(&server)
            .wait_until_provisioned("eng-slow", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
