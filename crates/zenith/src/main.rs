mod cli;
mod config;
mod console;
mod paths;
mod run;
mod studio;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Generate { prompt }) => run::run_generate(&cli.run, &prompt),
        Some(Command::Split { file }) => run::run_split(&file),
        Some(Command::Presets) => run::run_presets(&cli.run),
        None => run::run_studio(cli.run),
    }
}
