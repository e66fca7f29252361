use anyhow::Result;
use clap::Args;
use reltest_core::compute_selectors;
use reltest_core::layout::is_script_relevant;

use super::OutputContext;

#[derive(Args)]
pub struct SelectorsArgs {
    /// Changed file paths
    pub paths: Vec<String>,
}

pub fn execute(args: SelectorsArgs, output: &OutputContext) -> Result<()> {
    let selectors = compute_selectors(args.paths.as_slice());

    if output.json {
        let entries: Vec<_> = selectors
            .iter()
            .map(|s| serde_json::json!({ "suite": s.suite, "tests": s.tests }))
            .collect();
        return output.print_json(&entries);
    }

    if selectors.is_empty() {
        if !args.paths.is_empty() && !args.paths.iter().any(|p| is_script_relevant(p)) {
            output.print_info("No script changed: nothing would run");
        } else {
            output.print_info("Every suite would run");
        }
        return Ok(());
    }

    let rows = selectors
        .iter()
        .map(|s| {
            let tests = if s.tests.is_empty() {
                "(all)".to_string()
            } else {
                s.tests.iter().cloned().collect::<Vec<_>>().join(", ")
            };
            vec![s.suite.clone(), tests]
        })
        .collect();
    output.print_table(&["Suite", "Tests"], rows);
    Ok(())
}
