use anyhow::Result;
use clap::Args;
use reltest_core::layout::script_stem;
use reltest_core::script::{read_blocks, to_steps};
use reltest_core::service::AllowUnexpected;
use std::path::PathBuf;

use super::OutputContext;

#[derive(Args)]
pub struct BlocksArgs {
    /// Script to parse
    pub script: PathBuf,
}

pub fn execute(args: BlocksArgs, output: &OutputContext) -> Result<()> {
    let blocks = read_blocks(&args.script)?;
    let steps = to_steps(&script_stem(&args.script), &blocks);

    if output.json {
        return output.print_json(&steps);
    }
    if steps.is_empty() {
        output.print_info("Script has no blocks");
        return Ok(());
    }

    let rows = steps
        .iter()
        .map(|step| {
            let mode = if step.readonly { "read" } else { "write" };
            let allow = match step.allow_unexpected {
                AllowUnexpected::None => "-",
                AllowUnexpected::Warning => "warnings",
                AllowUnexpected::Errors => "errors",
            };
            let lines = step.query.lines().count();
            let mut row = vec![
                step.name.clone(),
                mode.to_string(),
                allow.to_string(),
                if step.expect_abort { "yes" } else { "no" }.to_string(),
                lines.to_string(),
            ];
            if output.verbose {
                row.push(step.query.trim_end().to_string());
            }
            row
        })
        .collect();

    let mut columns = vec!["Step", "Mode", "Allows", "Aborts", "Lines"];
    if output.verbose {
        columns.push("Source");
    }
    output.print_table(&columns, rows);
    Ok(())
}
