//! Test results

use serde::Serialize;

/// Result of one executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

/// Outcome of a single test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestReport {
    /// `package/suite/test-file`
    pub name: String,
    pub steps: Vec<StepResult>,
    pub skipped: bool,
}

impl TestReport {
    pub fn new(name: impl Into<String>, steps: Vec<StepResult>) -> Self {
        Self {
            name: name.into(),
            steps,
            skipped: false,
        }
    }

    /// A test that had nothing to run
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            skipped: true,
        }
    }

    pub fn passed(&self) -> bool {
        self.steps.iter().all(|s| s.passed)
    }

    /// First failing step, if any
    pub fn failure(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.passed)
    }
}

/// Aggregated results of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub tests: Vec<TestReport>,
}

impl RunSummary {
    pub fn record(&mut self, report: TestReport) {
        if report.skipped {
            tracing::warn!("{}: SKIPPED (no blocks)", report.name);
        } else if let Some(step) = report.failure() {
            tracing::error!(
                "{}: FAIL at step '{}': {}",
                report.name,
                step.name,
                step.detail.as_deref().unwrap_or("failed")
            );
        } else {
            tracing::info!("{}: PASS", report.name);
        }
        self.tests.push(report);
    }

    pub fn extend(&mut self, other: RunSummary) {
        self.tests.extend(other.tests);
    }

    pub fn passed(&self) -> usize {
        self.tests.iter().filter(|t| !t.skipped && t.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.tests.iter().filter(|t| !t.skipped && !t.passed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.tests.iter().filter(|t| t.skipped).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, passed: bool) -> StepResult {
        StepResult {
            name: name.to_string(),
            passed,
            detail: (!passed).then(|| "aborted unexpectedly".to_string()),
            problems: Vec::new(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        summary.record(TestReport::new("p/s/test-a.rel", vec![step("a", true)]));
        summary.record(TestReport::new(
            "p/s/test-b.rel",
            vec![step("1-b", true), step("2-b", false)],
        ));
        summary.record(TestReport::skipped("p/s/test-c.rel"));

        assert_eq!(summary.passed(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.skipped(), 1);
        assert!(!summary.is_success());
        assert_eq!(summary.tests[1].failure().unwrap().name, "2-b");
    }
}
