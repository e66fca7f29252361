use anyhow::{Context, Result};
use clap::{Args, Command, CommandFactory};
use clap_complete::{Shell, generate};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Args)]
pub struct CompletionArgs {
    /// Shell to generate the completion script for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write the script to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn execute(args: CompletionArgs) -> Result<()> {
    let mut cmd = crate::Cli::command();
    match args.output {
        Some(path) => {
            let mut file = File::create(&path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            write_completion(args.shell, &mut cmd, &mut file)?;
            eprintln!("Wrote {} completion to {}", args.shell, path.display());
        }
        None => write_completion(args.shell, &mut cmd, &mut io::stdout())?,
    }
    Ok(())
}

fn write_completion(shell: Shell, cmd: &mut Command, out: &mut dyn Write) -> Result<()> {
    let name = cmd.get_name().to_string();
    generate(shell, cmd, name, out);
    out.flush()?;
    Ok(())
}
