use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{select, unbounded, Sender};
use generator::{
    FixRetryCoordinator, GeneratorClient, GeneratorConfig, Resolution, GENERATE_FAILED_MESSAGE,
};
use renderer::dialect::Dialect;
use renderer::{split_stages, PreviewWindow, StageKind, WindowConfig};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::config::Settings;
use crate::console::{self, ConsoleCommand};
use crate::paths;
use crate::studio::{print_presets, Flow, Studio, StudioEvent};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn settings_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => paths::settings_file(),
    }
}

fn load_settings(args: &RunArgs) -> Result<Settings> {
    let path = settings_path(args.config.as_deref())?;
    let settings = Settings::load(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;
    debug!(path = %path.display(), api_base = %settings.api_base, "settings loaded");
    Ok(settings)
}

fn build_client(args: &RunArgs, settings: &Settings) -> Result<GeneratorClient> {
    let api_base = args.api_base.as_deref().unwrap_or(&settings.api_base);
    let timeout = args.timeout.unwrap_or(settings.request_timeout);
    let config = GeneratorConfig::new(api_base)?.with_timeout(timeout);
    info!(api_base = %config.api_base, timeout = ?config.timeout, "generation service configured");
    GeneratorClient::new(config)
}

/// Opens the preview window and runs the interactive console until either
/// side asks to quit.
pub fn run_studio(args: RunArgs) -> Result<()> {
    let settings = load_settings(&args)?;
    let size = match args.size {
        Some(size) => size,
        None => settings.window_dimensions()?,
    };
    let client = build_client(&args, &settings)?;
    let initial_source = args
        .file
        .as_ref()
        .map(|path| {
            fs::read_to_string(path)
                .with_context(|| format!("reading shader source {}", path.display()))
        })
        .transpose()?;

    let preview = PreviewWindow::spawn(WindowConfig {
        size,
        ..WindowConfig::default()
    })?;
    let render_events = preview.events().clone();

    let (studio_tx, studio_rx) = unbounded();
    spawn_console(studio_tx.clone())?;
    let mut studio = Studio::new(Arc::new(client), preview, studio_tx, settings.presets())
        .with_auto_fix(args.auto_fix || settings.auto_fix);

    println!("Type a description of an effect, or :help for commands.");
    let mut flow = Flow::Continue;
    if let Some(source) = initial_source {
        studio.submit(source)?;
    } else if let Some(prompt) = args.prompt {
        flow = studio.handle(StudioEvent::Command(ConsoleCommand::Prompt(prompt)))?;
    }

    while flow == Flow::Continue {
        flow = select! {
            recv(studio_rx) -> event => match event {
                Ok(event) => studio.handle(event)?,
                Err(_) => Flow::Quit,
            },
            recv(render_events) -> event => match event {
                Ok(event) => studio.on_render(event),
                Err(_) => Flow::Quit,
            },
        };
    }

    info!("shutting down");
    studio.into_preview().shutdown()
}

fn spawn_console(events: Sender<StudioEvent>) -> Result<()> {
    thread::Builder::new()
        .name("zenith-console".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(error = %err, "failed to read console input");
                        break;
                    }
                };
                match console::parse(&line) {
                    Ok(Some(command)) => {
                        if events.send(StudioEvent::Command(command)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => eprintln!("{message}"),
                }
            }
            let _ = events.send(StudioEvent::ConsoleClosed);
        })
        .context("spawning console thread")?;
    Ok(())
}

/// Generates one shader and prints it without opening a window.
pub fn run_generate(args: &RunArgs, prompt: &str) -> Result<()> {
    let settings = load_settings(args)?;
    let client = build_client(args, &settings)?;
    let mut coordinator = FixRetryCoordinator::new();
    match coordinator.request_generate(&client, prompt)? {
        Resolution::Apply(source) => {
            println!("{source}");
            Ok(())
        }
        Resolution::Failed(err) => bail!("{GENERATE_FAILED_MESSAGE} ({err})"),
        Resolution::Stale => bail!("generation response arrived for an outdated request"),
    }
}

pub fn run_split(file: &Path) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("reading shader source {}", file.display()))?;
    let stages = split_stages(&text)?;
    for kind in [StageKind::Vertex, StageKind::Fragment] {
        let source = stages.stage(kind);
        let dialect = Dialect::detect(source);
        let note = if dialect.needs_lowering() {
            ", lowered before compiling"
        } else {
            ""
        };
        println!(
            "{kind:<8} {:>4} lines {:>6} bytes  ({dialect}{note})",
            source.lines().count(),
            source.len()
        );
    }
    Ok(())
}

pub fn run_presets(args: &RunArgs) -> Result<()> {
    let settings = load_settings(args)?;
    print_presets(&settings.presets());
    Ok(())
}
