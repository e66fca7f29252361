//! Per-block execution semantics
//!
//! Every step runs as its own transaction. The service answer is classified
//! as aborted and/or errored and compared with what the step declared.
//! Sequences stop at the first step whose outcome does not match.

use crate::error::{Error, Result};
use crate::report::StepResult;
use crate::service::{
    AllowUnexpected, DatabaseService, Problem, Step, TransactionRequest, TransactionResponse,
    TransactionState,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Upper bound on a single transaction
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Problem category raised by benign constraint violations; never counts as an error
pub const IGNORED_PROBLEM: &str = "IntegrityConstraintViolation";

/// Result relation carrying `(code, message)` rows for aborted transactions
pub const ABORT_RELATION: &str = "abort";

/// Classified service answer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub aborted: bool,
    pub errors: Vec<Problem>,
    pub warnings: Vec<Problem>,
    /// Diagnostic rows found in the abort relation
    pub diagnostics: Vec<String>,
}

impl Outcome {
    pub fn classify(response: &TransactionResponse) -> Self {
        let aborted = response.transaction_state == TransactionState::Aborted;
        let (errors, warnings): (Vec<Problem>, Vec<Problem>) = response
            .problems
            .iter()
            .filter(|p| p.kind != IGNORED_PROBLEM)
            .cloned()
            .partition(|p| p.is_error);

        let diagnostics = if aborted {
            response
                .results
                .iter()
                .filter(|r| r.name == ABORT_RELATION)
                .flat_map(|r| r.rows.iter())
                .map(|row| {
                    row.iter()
                        .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
                        .collect::<Vec<_>>()
                        .join(": ")
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            aborted,
            errors,
            warnings,
            diagnostics,
        }
    }

    pub fn errored(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Problems and abort diagnostics, one line each
    pub fn problem_lines(&self) -> Vec<String> {
        let problems = self.errors.iter().map(|p| ("error", p));
        let warnings = self.warnings.iter().map(|p| ("warning", p));
        problems
            .chain(warnings)
            .map(|(severity, p)| {
                if p.message.is_empty() {
                    format!("{} {}", severity, p.kind)
                } else {
                    format!("{} {}: {}", severity, p.kind, p.message)
                }
            })
            .chain(self.diagnostics.iter().map(|d| format!("abort {}", d)))
            .collect()
    }

    /// Compare with the step's declared expectations.
    ///
    /// Returns the mismatch description on failure.
    pub fn check(&self, step: &Step) -> std::result::Result<(), String> {
        match (self.aborted, step.expect_abort) {
            (true, false) => return Err("aborted unexpectedly".to_string()),
            (false, true) => return Err("was expected to abort but committed".to_string()),
            _ => {}
        }

        if step.allow_unexpected == AllowUnexpected::Errors && !self.errored() {
            return Err("was expected to report errors but reported none".to_string());
        }

        if exact_problem_match_applies(step) {
            if self.errored() {
                return Err("reported unexpected errors".to_string());
            }
            if step.allow_unexpected == AllowUnexpected::None && !self.warnings.is_empty() {
                return Err("reported unexpected warnings".to_string());
            }
        }
        Ok(())
    }
}

/// Deprecated carve-out: once a step expects errors, the exact problem
/// match is skipped and any further warnings or errors are tolerated.
pub fn exact_problem_match_applies(step: &Step) -> bool {
    step.allow_unexpected != AllowUnexpected::Errors
}

/// Run one step as a transaction and classify the answer
pub async fn execute_step(
    service: &dyn DatabaseService,
    database: &str,
    engine: &str,
    step: &Step,
) -> Result<Outcome> {
    let request = TransactionRequest {
        database: database.to_string(),
        engine: engine.to_string(),
        query: step.query.clone(),
        inputs: BTreeMap::new(),
        readonly: step.readonly,
        timeout_secs: TRANSACTION_TIMEOUT.as_secs(),
    };

    debug!(
        "Executing step '{}' on {} (engine {}, readonly={})",
        step.name, database, engine, step.readonly
    );
    let response = tokio::time::timeout(TRANSACTION_TIMEOUT, service.execute(&request))
        .await
        .map_err(|_| Error::Timeout(TRANSACTION_TIMEOUT.as_secs()))??;
    Ok(Outcome::classify(&response))
}

/// Run a step and turn its outcome into a [`StepResult`]
pub async fn run_step(
    service: &dyn DatabaseService,
    database: &str,
    engine: &str,
    step: &Step,
) -> Result<StepResult> {
    let outcome = execute_step(service, database, engine, step).await?;
    let verdict = outcome.check(step);
    Ok(StepResult {
        name: step.name.clone(),
        passed: verdict.is_ok(),
        detail: verdict.err(),
        problems: outcome.problem_lines(),
    })
}

/// Run steps in order, stopping at the first one whose outcome does not
/// match its expectations
pub async fn run_steps_reporting(
    service: &dyn DatabaseService,
    database: &str,
    engine: &str,
    steps: &[Step],
) -> Result<Vec<StepResult>> {
    let mut results = Vec::with_capacity(steps.len());
    for step in steps {
        let result = run_step(service, database, engine, step).await?;
        let passed = result.passed;
        results.push(result);
        if !passed {
            break;
        }
    }
    Ok(results)
}

/// Run setup steps, failing with [`Error::OutcomeMismatch`] on the first
/// mismatching step
pub async fn run_steps(
    service: &dyn DatabaseService,
    database: &str,
    engine: &str,
    steps: &[Step],
) -> Result<()> {
    for step in steps {
        let result = run_step(service, database, engine, step).await?;
        if !result.passed {
            return Err(Error::OutcomeMismatch {
                step: result.name,
                detail: result.detail.unwrap_or_default(),
                problems: result.problems,
            });
        }
    }
    Ok(())
}
