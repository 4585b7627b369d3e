use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "zenith",
    author,
    version,
    about = "Describe a visual effect and watch the generated shader run",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Description of the effect to generate once the window opens.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Run shader source from a local file instead of generating one.
    #[arg(long, value_name = "PATH", conflicts_with = "prompt")]
    pub file: Option<PathBuf>,

    /// Base URL of the generation service (e.g. `http://localhost:4000/api`).
    #[arg(long, env = "ZENITH_API_BASE", value_name = "URL")]
    pub api_base: Option<String>,

    /// Initial window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Ask the service for a fix automatically whenever a build fails.
    #[arg(long)]
    pub auto_fix: bool,

    /// Request timeout for the generation service (seconds or e.g. `90s`, `2m`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Settings file to use instead of the per-user `zenith.toml`.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a shader and print it without opening a window.
    Generate {
        #[arg(value_name = "PROMPT")]
        prompt: String,
    },
    /// Split a source file into its stages and summarise them.
    Split {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// List the example prompts available to `:preset`.
    Presets,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WxH format, e.g. 1280x720".to_string())?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| "invalid width in size specification".to_string())?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| "invalid height in size specification".to_string())?;
    if width == 0 || height == 0 {
        return Err("window dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(trimmed).map_err(|err| format!("invalid duration '{trimmed}': {err}"))
}
