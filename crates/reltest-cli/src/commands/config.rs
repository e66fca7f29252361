use anyhow::Result;
use clap::{Args, Subcommand};

use super::OutputContext;
use reltest_cli::config::{Config, Profile};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Add or replace a profile
    SetProfile {
        /// Profile name
        name: String,
        /// Service URL
        #[arg(long)]
        url: String,
        /// API key
        #[arg(long)]
        api_key: Option<String>,
        /// Explicit engine
        #[arg(long)]
        engine: Option<String>,
        /// Number of pooled engines
        #[arg(long)]
        pool_size: Option<usize>,
        /// Size of pooled engines
        #[arg(long)]
        engine_size: Option<String>,
        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },
    /// Remove a profile
    RemoveProfile {
        /// Profile name
        name: String,
    },
}

pub fn execute(
    args: ConfigArgs,
    cfg: &Config,
    path: Option<&str>,
    output: &OutputContext,
) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(cfg, path, output),
        ConfigCommands::SetProfile {
            name,
            url,
            api_key,
            engine,
            pool_size,
            engine_size,
            default,
        } => {
            let mut cfg = Config::load(path)?;
            cfg.set_profile(
                &name,
                Profile {
                    url,
                    api_key,
                    engine,
                    pool_size,
                    engine_size,
                },
            );
            if default {
                cfg.default_profile = Some(name.clone());
            }
            cfg.save(path)?;
            output.print_success(&format!("Profile '{}' saved", name));
            Ok(())
        }
        ConfigCommands::RemoveProfile { name } => {
            let mut cfg = Config::load(path)?;
            if cfg.remove_profile(&name) {
                cfg.save(path)?;
                output.print_success(&format!("Profile '{}' removed", name));
            } else {
                output.print_error(&format!("Profile '{}' not found", name));
            }
            Ok(())
        }
    }
}

fn mask(key: &str) -> String {
    format!("{}...", key.chars().take(8).collect::<String>())
}

fn show_config(cfg: &Config, path: Option<&str>, output: &OutputContext) -> Result<()> {
    if output.json {
        let mut redacted = cfg.clone();
        redacted.api_key = redacted.api_key.as_deref().map(mask);
        for profile in redacted.profiles.values_mut() {
            profile.api_key = profile.api_key.as_deref().map(mask);
        }
        return output.print_json(&redacted);
    }

    let file = path
        .map(String::from)
        .unwrap_or_else(|| Config::default_path().display().to_string());
    println!("Current Configuration ({})", file);
    println!("=====================");
    println!("URL:         {}", cfg.url.as_deref().unwrap_or("(not set)"));
    println!(
        "API Key:     {}",
        cfg.api_key
            .as_deref()
            .map(mask)
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!("Engine:      {}", cfg.engine.as_deref().unwrap_or("(pool)"));
    println!(
        "Pool size:   {}",
        cfg.pool_size
            .map(|n| n.to_string())
            .unwrap_or_else(|| "(default)".to_string())
    );
    println!(
        "Engine size: {}",
        cfg.engine_size.as_deref().unwrap_or("(default)")
    );
    println!();
    println!("Profiles: {}", cfg.profiles.len());
    for name in cfg.list_profiles() {
        let is_default = cfg.default_profile.as_ref() == Some(name);
        if is_default {
            println!("  * {} (default)", name);
        } else {
            println!("  - {}", name);
        }
        if output.verbose {
            if let Some(profile) = cfg.get_profile(name) {
                println!("      URL: {}", profile.url);
            }
        }
    }

    Ok(())
}
