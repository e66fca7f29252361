use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{blocks, completion, config as config_cmd, run, selectors, test};
use reltest_cli::config;

/// Change-driven test runner for database packages
#[derive(Parser)]
#[command(name = "reltest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, env = "RELTEST_CONFIG")]
    pub config: Option<String>,

    /// Database service URL
    #[arg(long, env = "RELTEST_URL")]
    pub url: Option<String>,

    /// API key for authentication
    #[arg(long, env = "RELTEST_API_KEY")]
    pub api_key: Option<String>,

    /// Configuration profile name
    #[arg(long, env = "RELTEST_PROFILE")]
    pub profile: Option<String>,

    /// Run on this engine instead of provisioning a pool
    #[arg(long, env = "RELTEST_ENGINE")]
    pub engine: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the tests of one or more packages
    Test(test::TestArgs),
    /// Run a script against an existing database
    Run(run::RunArgs),
    /// Show which suites and tests a set of changed paths selects
    Selectors(selectors::SelectorsArgs),
    /// Show the blocks a script is split into
    Blocks(blocks::BlocksArgs),
    /// Configuration management
    Config(config_cmd::ConfigArgs),
    /// Generate shell completion scripts
    Completion(completion::CompletionArgs),
}

fn init_tracing(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            "reltest=debug,reltest_core=debug,reltest_cli=debug".into()
        } else {
            "reltest=info,reltest_core=info,reltest_cli=info".into()
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::Config::load(cli.config.as_deref())?;

    let output = commands::OutputContext {
        json: cli.json,
        verbose: cli.verbose,
    };

    let connection = commands::Connection {
        profile: cli.profile.clone(),
        url: cli.url.clone(),
        api_key: cli.api_key.clone(),
        engine: cli.engine.clone(),
    };

    match cli.command {
        Commands::Test(args) => test::execute(&cfg, &connection, args, &output).await,
        Commands::Run(args) => run::execute(&cfg, &connection, args, &output).await,
        Commands::Selectors(args) => selectors::execute(args, &output),
        Commands::Blocks(args) => blocks::execute(args, &output),
        Commands::Config(args) => {
            config_cmd::execute(args, &cfg, cli.config.as_deref(), &output)
        }
        Commands::Completion(args) => completion::execute(args),
    }
}
