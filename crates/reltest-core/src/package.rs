//! Package directories
//!
//! A package holds model sources under `model/`, test suites under `test/`
//! and an optional `package.toml` manifest:
//!
//! ```toml
//! [models]
//! "graphs/paths" = "model/graphs/paths.rel"
//!
//! [[dependencies]]
//! name = "stdlib"
//! version = "1.2"
//! ```

use crate::error::{Error, Result};
use crate::layout::{
    self, BEFORE_SUITE, BEFORE_TEST, MANIFEST_FILE, MODEL_ROOT, SCRIPT_EXTENSION, TEST_ROOT,
    UNIT_TEST_DIR, VALIDATE_TEST,
};
use crate::service::{Dependency, ModelSource};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Contents of `package.toml`
#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    /// Logical model name to source path, relative to the package
    #[serde(default)]
    pub models: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl Manifest {
    /// Load the manifest of `package_dir`, if it has one
    pub fn load(package_dir: &Path) -> Result<Option<Self>> {
        let path = package_dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(toml::from_str(&content)?))
    }
}

/// A test suite: a directory holding at least one test file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    pub dir: PathBuf,
    /// Path of the suite relative to the test root
    pub key: String,
    /// Test files, sorted by name
    pub tests: Vec<PathBuf>,
}

impl Suite {
    pub fn before_suite(&self) -> Option<PathBuf> {
        layout::existing_file(&self.dir, BEFORE_SUITE)
    }
}

/// A loaded package
#[derive(Debug, Clone)]
pub struct Package {
    /// Canonical package directory
    pub dir: PathBuf,
    /// Logical package name
    pub name: String,
    pub models: Vec<ModelSource>,
    pub dependencies: Vec<Dependency>,
}

impl Package {
    /// Resolve `dir` and read its manifest and model sources
    pub fn load(dir: &Path) -> Result<Self> {
        let dir = dir.canonicalize()?;
        let manifest = Manifest::load(&dir)?;

        let (name, models, dependencies) = match manifest {
            Some(manifest) => {
                let mut models = Vec::with_capacity(manifest.models.len());
                for (name, rel) in &manifest.models {
                    let path = dir.join(rel);
                    let source = fs::read_to_string(&path).map_err(|e| {
                        Error::install(format!(
                            "model '{}' ({}): {}",
                            name,
                            path.display(),
                            e
                        ))
                    })?;
                    models.push(ModelSource {
                        name: name.clone(),
                        source,
                    });
                }
                let name = manifest.name.unwrap_or_else(|| layout::package_name(&dir));
                (name, models, manifest.dependencies)
            }
            None => (
                layout::package_name(&dir),
                discover_models(&dir.join(MODEL_ROOT))?,
                Vec::new(),
            ),
        };

        Ok(Self {
            dir,
            name,
            models,
            dependencies,
        })
    }

    pub fn test_root(&self) -> PathBuf {
        self.dir.join(TEST_ROOT)
    }

    /// A package-level script from the test root
    pub fn script(&self, name: &str) -> Option<PathBuf> {
        layout::existing_file(&self.test_root(), name)
    }

    /// `before-test.rel` of the suite, falling back to the package's
    pub fn before_test(&self, suite: &Suite) -> Option<PathBuf> {
        layout::existing_file(&suite.dir, BEFORE_TEST).or_else(|| self.script(BEFORE_TEST))
    }

    /// `validate-test.rel` of the suite, falling back to the package's
    pub fn validate_test(&self, suite: &Suite) -> Option<PathBuf> {
        layout::existing_file(&suite.dir, VALIDATE_TEST).or_else(|| self.script(VALIDATE_TEST))
    }

    /// Directory of non-script tests, if present
    pub fn unit_test_dir(&self) -> Option<PathBuf> {
        let dir = self.test_root().join(UNIT_TEST_DIR);
        dir.is_dir().then_some(dir)
    }

    /// Every directory under the test root holding a test file, sorted by key
    pub fn discover_suites(&self) -> Result<Vec<Suite>> {
        let root = self.test_root();
        let mut suites = Vec::new();
        if root.is_dir() {
            collect_suites(&root, &root, &mut suites)?;
        }
        suites.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(suites)
    }
}

fn collect_suites(root: &Path, dir: &Path, suites: &mut Vec<Suite>) -> Result<()> {
    let mut tests = Vec::new();
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if dir == root && path.file_name().is_some_and(|n| n == UNIT_TEST_DIR) {
                continue;
            }
            subdirs.push(path);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(layout::is_test_file_name)
        {
            tests.push(path);
        }
    }

    if !tests.is_empty() {
        tests.sort();
        suites.push(Suite {
            key: layout::suite_key(root, dir),
            dir: dir.to_path_buf(),
            tests,
        });
    }
    for sub in subdirs {
        collect_suites(root, &sub, suites)?;
    }
    Ok(())
}

/// Every script under `model_root`, named by its relative path without extension
fn discover_models(model_root: &Path) -> Result<Vec<ModelSource>> {
    let mut models = Vec::new();
    if model_root.is_dir() {
        collect_models(model_root, model_root, &mut models)?;
    }
    models.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(models)
}

fn collect_models(root: &Path, dir: &Path, models: &mut Vec<ModelSource>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_models(root, &path, models)?;
        } else if path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION) {
            let name = layout::suite_key(root, &path.with_extension(""));
            models.push(ModelSource {
                name,
                source: fs::read_to_string(&path)?,
            });
        }
    }
    Ok(())
}
