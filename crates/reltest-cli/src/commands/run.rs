use anyhow::Result;
use clap::Args;
use reltest_cli::config::Config;
use reltest_core::{EnginePool, RunConfig, ServiceTestExecutor, TestRunner};
use std::path::PathBuf;
use std::sync::Arc;

use super::{Connection, OutputContext, connect};

#[derive(Args)]
pub struct RunArgs {
    /// Target database
    #[arg(long, short)]
    pub database: String,

    /// Script to run
    pub script: PathBuf,
}

pub async fn execute(
    cfg: &Config,
    connection: &Connection,
    args: RunArgs,
    output: &OutputContext,
) -> Result<()> {
    let settings = connection.settings(cfg)?;
    let service = connect(&settings)?;

    let mut run_config = RunConfig::default().with_pool_size(1);
    if let Some(engine) = settings.engine {
        run_config = run_config.with_engine(engine);
    }
    if let Some(size) = settings.engine_size {
        run_config = run_config.with_engine_size(size);
    }

    let runner = TestRunner::new(
        run_config,
        service.clone(),
        Arc::new(EnginePool::new(service.clone())),
        Arc::new(ServiceTestExecutor::new(service)),
    );
    runner.run_script(&args.database, &args.script).await?;

    output.print_success(&format!(
        "{} ran on {}",
        args.script.display(),
        args.database
    ));
    Ok(())
}
