pub mod blocks;
pub mod completion;
pub mod config;
pub mod run;
pub mod selectors;

use anyhow::{Result, anyhow};
use colored::Colorize;
use comfy_table::{Table, presets::UTF8_FULL};
use reltest_cli::config::{Config, Settings};
use reltest_core::HttpService;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OutputContext {
    pub json: bool,
    pub verbose: bool,
}

/// Connection options given on the command line
#[derive(Debug, Clone, Default)]
pub struct Connection {
    pub profile: Option<String>,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub engine: Option<String>,
}

impl Connection {
    /// Resolve the profile and apply command-line overrides on top
    pub fn settings(&self, cfg: &Config) -> Result<Settings> {
        let mut settings = cfg.resolve(self.profile.as_deref())?;
        if self.url.is_some() {
            settings.url = self.url.clone();
        }
        if self.api_key.is_some() {
            settings.api_key = self.api_key.clone();
        }
        if self.engine.is_some() {
            settings.engine = self.engine.clone();
        }
        debug!(
            "Resolved settings: url={:?}, engine={:?}, pool_size={:?}, engine_size={:?}",
            settings.url, settings.engine, settings.pool_size, settings.engine_size
        );
        Ok(settings)
    }
}

/// HTTP client for the configured service
pub fn connect(settings: &Settings) -> Result<Arc<HttpService>> {
    let url = settings.url.as_deref().ok_or_else(|| {
        anyhow!("No service URL configured: pass --url, set RELTEST_URL or add a profile")
    })?;
    debug!("Connecting to {}", url);
    Ok(Arc::new(HttpService::new(url, settings.api_key.as_deref())?))
}

impl OutputContext {
    pub fn print_table(&self, columns: &[&str], rows: Vec<Vec<String>>) {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(columns.to_vec());
        for row in rows {
            table.add_row(row);
        }
        println!("{table}");
    }

    pub fn print_json<T: serde::Serialize>(&self, data: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(data)?);
        Ok(())
    }

    pub fn print_success(&self, message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn print_info(&self, message: &str) {
        println!("{} {}", "ℹ".blue(), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_overrides_profile() {
        let config = Config {
            url: Some("http://local:8080".to_string()),
            api_key: Some("file-key".to_string()),
            engine: Some("file-engine".to_string()),
            ..Default::default()
        };
        let connection = Connection {
            url: Some("http://override:9090".to_string()),
            engine: Some("cli-engine".to_string()),
            ..Default::default()
        };

        let settings = connection.settings(&config).unwrap();
        assert_eq!(settings.url.as_deref(), Some("http://override:9090"));
        assert_eq!(settings.api_key.as_deref(), Some("file-key"));
        assert_eq!(settings.engine.as_deref(), Some("cli-engine"));
    }

    #[test]
    fn test_connect_requires_url() {
        let err = connect(&Settings::default()).unwrap_err();
        assert!(err.to_string().contains("No service URL"));
    }
}
