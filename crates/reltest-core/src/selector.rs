//! Change-driven test selection
//!
//! Maps changed file paths to the suites and tests that must run again.
//! Per suite the selection is a small lattice: nothing selected (absent),
//! a set of specific test files, or every test. Merging only ever moves up,
//! so a model change subsumes specific test selections and once a suite is
//! fully selected it stays that way.

use crate::layout::{
    MODEL_ROOT, RUN_EVERYTHING_MARKERS, SCRIPT_EXTENSION, TEST_ROOT, has_script_extension,
    is_test_file_name,
};
use std::collections::{BTreeMap, BTreeSet};

/// A suite, optionally narrowed to specific test file names
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestSelector {
    /// Suite key, relative to the test root
    pub suite: String,
    /// Test file basenames; empty means every test of the suite
    pub tests: BTreeSet<String>,
}

impl TestSelector {
    /// Select every test of `suite`
    pub fn all(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            tests: BTreeSet::new(),
        }
    }

    /// Select specific tests of `suite`
    pub fn tests<I, S>(suite: impl Into<String>, tests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suite: suite.into(),
            tests: tests.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this selector applies to the discovered suite `suite_key`.
    ///
    /// Matches when the selector's suite is a path suffix of the key.
    pub fn matches(&self, suite_key: &str) -> bool {
        self.suite.is_empty()
            || suite_key == self.suite
            || suite_key.ends_with(&format!("/{}", self.suite))
    }

    fn selection(&self) -> SuiteSelection {
        if self.tests.is_empty() {
            SuiteSelection::All
        } else {
            SuiteSelection::Tests(self.tests.clone())
        }
    }
}

/// What to run in one suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuiteSelection {
    /// Every test
    All,
    /// Only these test file basenames
    Tests(BTreeSet<String>),
}

impl SuiteSelection {
    /// Least upper bound of two selections
    pub fn merge(self, other: SuiteSelection) -> SuiteSelection {
        match (self, other) {
            (SuiteSelection::All, _) | (_, SuiteSelection::All) => SuiteSelection::All,
            (SuiteSelection::Tests(mut a), SuiteSelection::Tests(b)) => {
                a.extend(b);
                SuiteSelection::Tests(a)
            }
        }
    }

    /// Whether the test file `file_name` is selected
    pub fn includes(&self, file_name: &str) -> bool {
        match self {
            SuiteSelection::All => true,
            SuiteSelection::Tests(tests) => tests.contains(file_name),
        }
    }
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.trim_start_matches("./").to_string()
}

/// Remainder of `path` below the first `root/` component, with its position
fn under_root<'a>(path: &'a str, root: &str) -> Option<(usize, &'a str)> {
    let prefix = format!("{}/", root);
    if let Some(rest) = path.strip_prefix(&prefix) {
        return Some((0, rest));
    }
    let infix = format!("/{}/", root);
    path.find(&infix)
        .map(|i| (i + 1, &path[i + infix.len()..]))
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

enum Classified {
    RunEverything,
    Suite(String, SuiteSelection),
    Ignored,
}

fn classify(path: &str) -> Classified {
    let path = normalize(path);
    if RUN_EVERYTHING_MARKERS.contains(&file_name(&path)) {
        return Classified::RunEverything;
    }

    let model = under_root(&path, MODEL_ROOT);
    let test = under_root(&path, TEST_ROOT);
    let model_first = match (&model, &test) {
        (Some((m, _)), Some((t, _))) => m <= t,
        (Some(_), None) => true,
        _ => false,
    };

    if model_first {
        if let Some((_, rest)) = model {
            if has_script_extension(rest) {
                let key = rest
                    .strip_suffix(&format!(".{}", SCRIPT_EXTENSION))
                    .unwrap_or(rest);
                return Classified::Suite(key.to_string(), SuiteSelection::All);
            }
        }
        return Classified::Ignored;
    }

    match test {
        Some((_, rest)) => {
            let (dir, name) = rest.rsplit_once('/').unwrap_or(("", rest));
            let selection = if is_test_file_name(name) {
                SuiteSelection::Tests(BTreeSet::from([name.to_string()]))
            } else {
                SuiteSelection::All
            };
            Classified::Suite(dir.to_string(), selection)
        }
        None => Classified::Ignored,
    }
}

/// Compute the selectors for a batch of changed paths.
///
/// An empty result means no filtering: either nothing relevant changed
/// below the roots, or a run-everything marker changed.
pub fn compute_selectors<S: AsRef<str>>(changed: &[S]) -> BTreeSet<TestSelector> {
    let mut suites: BTreeMap<String, SuiteSelection> = BTreeMap::new();

    for path in changed {
        match classify(path.as_ref()) {
            Classified::RunEverything => return BTreeSet::new(),
            Classified::Suite(key, selection) => {
                let merged = match suites.remove(&key) {
                    Some(existing) => existing.merge(selection),
                    None => selection,
                };
                suites.insert(key, merged);
            }
            Classified::Ignored => {}
        }
    }

    suites
        .into_iter()
        .map(|(suite, selection)| match selection {
            SuiteSelection::All => TestSelector::all(suite),
            SuiteSelection::Tests(tests) => TestSelector { suite, tests },
        })
        .collect()
}

/// What to run of the discovered suite `suite_key`, or `None` when no
/// selector applies. An empty selector set selects everything.
pub fn selection_for(
    selectors: &BTreeSet<TestSelector>,
    suite_key: &str,
) -> Option<SuiteSelection> {
    if selectors.is_empty() {
        return Some(SuiteSelection::All);
    }
    selectors
        .iter()
        .filter(|s| s.matches(suite_key))
        .map(TestSelector::selection)
        .reduce(SuiteSelection::merge)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(selectors: Vec<TestSelector>) -> BTreeSet<TestSelector> {
        selectors.into_iter().collect()
    }

    #[test]
    fn test_markers_short_circuit() {
        for marker in ["test/pre-install.rel", "pkg-rel/test/pre-package.rel"] {
            let paths = ["model/a/b.rel", marker, "test/a/b/test-c.rel"];
            assert!(compute_selectors(&paths).is_empty());
        }
    }

    #[test]
    fn test_model_path_selects_whole_suite() {
        assert_eq!(
            compute_selectors(&["model/A/B.rel"]),
            set(vec![TestSelector::all("A/B")])
        );
    }

    #[test]
    fn test_test_path_selects_file() {
        assert_eq!(
            compute_selectors(&["test/A/B/test-C.rel"]),
            set(vec![TestSelector::tests("A/B", ["test-C.rel"])])
        );
        assert_eq!(
            compute_selectors(&["test/A/c_test.rel"]),
            set(vec![TestSelector::tests("A", ["c_test.rel"])])
        );
    }

    #[test]
    fn test_setup_script_selects_whole_suite() {
        assert_eq!(
            compute_selectors(&["test/A/B/before-suite.rel", "test/A/B/test-C.rel"]),
            set(vec![TestSelector::all("A/B")])
        );
    }

    #[test]
    fn test_model_change_subsumes_specific_tests() {
        let expected = set(vec![TestSelector::all("A/B")]);
        assert_eq!(
            compute_selectors(&["model/A/B.rel", "test/A/B/test-C.rel"]),
            expected
        );
        assert_eq!(
            compute_selectors(&["test/A/B/test-C.rel", "model/A/B.rel"]),
            expected
        );
    }

    #[test]
    fn test_specific_tests_accumulate() {
        assert_eq!(
            compute_selectors(&["test/s/test-a.rel", "test/s/test-b.rel", "test/t/test-a.rel"]),
            set(vec![
                TestSelector::tests("s", ["test-a.rel", "test-b.rel"]),
                TestSelector::tests("t", ["test-a.rel"]),
            ])
        );
    }

    #[test]
    fn test_idempotent() {
        let paths = vec![
            "test/s/test-a.rel",
            "model/m/n.rel",
            "test/s/test-b.rel",
            "README.md",
        ];
        let doubled: Vec<_> = paths.iter().chain(paths.iter()).copied().collect();
        assert_eq!(compute_selectors(&paths), compute_selectors(&doubled));
    }

    #[test]
    fn test_paths_outside_roots_are_ignored() {
        assert!(compute_selectors(&["README.md", "src/lib.rs", "model/notes.md"]).is_empty());
    }

    #[test]
    fn test_package_prefixed_paths() {
        assert_eq!(
            compute_selectors(&["graphs-rel/model/paths.rel", r"graphs-rel\test\paths\test-x.rel"]),
            set(vec![
                TestSelector::all("paths"),
            ])
        );
    }

    #[test]
    fn test_merge_lattice() {
        let a = SuiteSelection::Tests(BTreeSet::from(["x".to_string()]));
        let b = SuiteSelection::Tests(BTreeSet::from(["y".to_string()]));
        assert_eq!(a.clone().merge(SuiteSelection::All), SuiteSelection::All);
        assert_eq!(SuiteSelection::All.merge(a.clone()), SuiteSelection::All);
        assert_eq!(
            a.clone().merge(b),
            SuiteSelection::Tests(BTreeSet::from(["x".to_string(), "y".to_string()]))
        );
        assert_eq!(a.clone().merge(a.clone()), a);
    }

    #[test]
    fn test_selection_for_suffix_match() {
        let selectors = set(vec![
            TestSelector::tests("paths", ["test-x.rel"]),
            TestSelector::all("graphs/cycles"),
        ]);
        assert_eq!(
            selection_for(&selectors, "graphs/paths"),
            Some(SuiteSelection::Tests(BTreeSet::from(["test-x.rel".to_string()])))
        );
        assert_eq!(
            selection_for(&selectors, "graphs/cycles"),
            Some(SuiteSelection::All)
        );
        assert_eq!(selection_for(&selectors, "graphs/subpaths"), None);
        assert_eq!(
            selection_for(&BTreeSet::new(), "anything"),
            Some(SuiteSelection::All)
        );
    }
}
