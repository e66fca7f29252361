//! Package layout conventions
//!
//! Suites are discovered by convention rather than by manifest: any
//! directory under [`TEST_ROOT`] holding at least one test file is a suite.
//! Every name the harness recognizes lives here.

use std::path::{Path, PathBuf};

/// Extension of model and test scripts
pub const SCRIPT_EXTENSION: &str = "rel";
/// Root directory of model sources inside a package
pub const MODEL_ROOT: &str = "model";
/// Root directory of test suites inside a package
pub const TEST_ROOT: &str = "test";
/// Prefix of script test files (`test-foo.rel`)
pub const TEST_PREFIX: &str = "test-";
/// Alternate test file suffix (`foo_test.rel`)
pub const ALT_TEST_SUFFIX: &str = "_test.rel";
/// Decoration stripped from package directory names
pub const PACKAGE_DIR_SUFFIX: &str = "-rel";
/// Package manifest file name
pub const MANIFEST_FILE: &str = "package.toml";
/// Directory of non-script tests inside the test root
pub const UNIT_TEST_DIR: &str = "unit";

/// Package script run before the model sources are installed
pub const PRE_INSTALL: &str = "pre-install.rel";
/// Package setup script run once the sources are installed
pub const PRE_PACKAGE: &str = "pre-package.rel";
/// Suite setup script
pub const BEFORE_SUITE: &str = "before-suite.rel";
/// Per-test setup script
pub const BEFORE_TEST: &str = "before-test.rel";
/// Per-test validation script
pub const VALIDATE_TEST: &str = "validate-test.rel";

/// Line opening a new block in a script; only recognized at column 0
pub const DIRECTIVE_MARKER: &str = "// %%";
/// Line comment token
pub const LINE_COMMENT: &str = "//";

/// Changes to these files invalidate every suite
pub const RUN_EVERYTHING_MARKERS: [&str; 2] = [PRE_INSTALL, PRE_PACKAGE];

/// Whether `file_name` follows the test file naming convention
pub fn is_test_file_name(file_name: &str) -> bool {
    (file_name.starts_with(TEST_PREFIX) && has_script_extension(file_name))
        || file_name.ends_with(ALT_TEST_SUFFIX)
}

/// Whether `path` names a script (`*.rel`)
pub fn has_script_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|ext| ext == SCRIPT_EXTENSION)
}

/// Whether a changed path could influence test selection at all
pub fn is_script_relevant(path: &str) -> bool {
    has_script_extension(path)
}

/// Logical package name for a package directory (`foo-rel` -> `foo`)
pub fn package_name(dir: &Path) -> String {
    let base = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match base.strip_suffix(PACKAGE_DIR_SUFFIX) {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => base,
    }
}

/// File stem used as the source name of a script's blocks
pub fn script_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `dir/name` if it is a regular file
pub fn existing_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let path = dir.join(name);
    path.is_file().then_some(path)
}

/// Suite-relative key of `suite_dir` inside `test_root`, `/`-separated
pub fn suite_key(test_root: &Path, suite_dir: &Path) -> String {
    let rel = suite_dir.strip_prefix(test_root).unwrap_or(suite_dir);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
