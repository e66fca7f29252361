//! Configuration file
//!
//! ```toml
//! url = "https://db.example.com"
//! default_profile = "ci"
//!
//! [profiles.ci]
//! url = "https://ci.example.com"
//! api_key = "..."
//! pool_size = 4
//! ```
//!
//! Values of the selected profile override the top-level ones.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub engine: Option<String>,
    pub pool_size: Option<usize>,
    pub engine_size: Option<String>,
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
    #[serde(default)]
    pub default_profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_size: Option<String>,
}

/// Connection and engine settings after profile resolution
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Settings {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub engine: Option<String>,
    pub pool_size: Option<usize>,
    pub engine_size: Option<String>,
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_path(),
        };

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_path(),
        };

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reltest")
            .join("config.toml")
    }

    pub fn get_profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn set_profile(&mut self, name: &str, profile: Profile) {
        self.profiles.insert(name.to_string(), profile);
    }

    pub fn remove_profile(&mut self, name: &str) -> bool {
        let removed = self.profiles.remove(name).is_some();
        if removed && self.default_profile.as_deref() == Some(name) {
            self.default_profile = None;
        }
        removed
    }

    /// Profile names, sorted
    pub fn list_profiles(&self) -> Vec<&String> {
        let mut names: Vec<_> = self.profiles.keys().collect();
        names.sort();
        names
    }

    /// Merge the named profile (or the default one) over the top-level
    /// values. Naming a profile that does not exist is an error.
    pub fn resolve(&self, profile: Option<&str>) -> Result<Settings> {
        let mut settings = Settings {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            engine: self.engine.clone(),
            pool_size: self.pool_size,
            engine_size: self.engine_size.clone(),
        };

        let Some(name) = profile.or(self.default_profile.as_deref()) else {
            return Ok(settings);
        };
        let p = self
            .get_profile(name)
            .ok_or_else(|| anyhow!("Profile '{}' not found", name))?;

        settings.url = Some(p.url.clone());
        if p.api_key.is_some() {
            settings.api_key = p.api_key.clone();
        }
        if p.engine.is_some() {
            settings.engine = p.engine.clone();
        }
        if p.pool_size.is_some() {
            settings.pool_size = p.pool_size;
        }
        if p.engine_size.is_some() {
            settings.engine_size = p.engine_size.clone();
        }
        Ok(settings)
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            api_key: None,
            engine: None,
            pool_size: None,
            engine_size: None,
        }
    }
}
