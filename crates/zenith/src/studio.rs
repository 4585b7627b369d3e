//! Interactive session state: the console, the fix-retry coordinator and the
//! worker threads that talk to the generation service.
//!
//! The studio never touches graphics resources. It submits source text to a
//! [`Preview`] and learns how the build went from [`RenderEvent`]s.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use crossbeam_channel::Sender;
use generator::{
    CycleError, FixRequest, FixRetryCoordinator, GenerateRequest, Resolution, ServiceError,
    ShaderService, Ticket, FIX_FAILED_MESSAGE, GENERATE_FAILED_MESSAGE,
};
use renderer::{BuildFailure, ExecutionState, PreviewWindow, RenderEvent};
use tracing::{debug, info, warn};

use crate::console::{ConsoleCommand, HELP};

/// Where generated source gets built and shown.
pub trait Preview {
    /// `generation` comes back on the matching [`RenderEvent`] so outcomes of
    /// superseded prompts can be told apart.
    fn execute(&self, generation: u64, source: String) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

impl Preview for PreviewWindow {
    fn execute(&self, generation: u64, source: String) -> Result<()> {
        PreviewWindow::execute(self, generation, source)
    }

    fn stop(&self) -> Result<()> {
        PreviewWindow::stop(self)
    }
}

#[derive(Debug)]
pub enum StudioEvent {
    Command(ConsoleCommand),
    ConsoleClosed,
    Generated {
        ticket: Ticket,
        result: Result<String, ServiceError>,
    },
    Fixed {
        ticket: Ticket,
        result: Result<String, ServiceError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Studio<P> {
    service: Arc<dyn ShaderService>,
    coordinator: FixRetryCoordinator,
    preview: P,
    events: Sender<StudioEvent>,
    auto_fix: bool,
    presets: BTreeMap<String, String>,
    render_state: ExecutionState,
    last_source: Option<String>,
    last_failure: Option<BuildFailure>,
}

impl<P: Preview> Studio<P> {
    /// `events` is where worker threads post service responses; the caller
    /// feeds them back through [`Studio::handle`].
    pub fn new(
        service: Arc<dyn ShaderService>,
        preview: P,
        events: Sender<StudioEvent>,
        presets: BTreeMap<String, String>,
    ) -> Self {
        Self {
            service,
            coordinator: FixRetryCoordinator::new(),
            preview,
            events,
            auto_fix: false,
            presets,
            render_state: ExecutionState::Idle,
            last_source: None,
            last_failure: None,
        }
    }

    pub fn with_auto_fix(mut self, auto_fix: bool) -> Self {
        self.auto_fix = auto_fix;
        self
    }

    pub fn preview(&self) -> &P {
        &self.preview
    }

    pub fn into_preview(self) -> P {
        self.preview
    }

    pub fn coordinator(&self) -> &FixRetryCoordinator {
        &self.coordinator
    }

    pub fn render_state(&self) -> ExecutionState {
        self.render_state
    }

    pub fn last_failure(&self) -> Option<&BuildFailure> {
        self.last_failure.as_ref()
    }

    pub fn handle(&mut self, event: StudioEvent) -> Result<Flow> {
        match event {
            StudioEvent::Command(command) => self.on_command(command),
            StudioEvent::ConsoleClosed => {
                debug!("console input closed");
                Ok(Flow::Quit)
            }
            StudioEvent::Generated { ticket, result } => {
                let resolution = self.coordinator.complete_generate(ticket, result);
                self.apply(resolution, GENERATE_FAILED_MESSAGE)?;
                Ok(Flow::Continue)
            }
            StudioEvent::Fixed { ticket, result } => {
                let resolution = self.coordinator.complete_fix(ticket, result);
                self.apply(resolution, FIX_FAILED_MESSAGE)?;
                Ok(Flow::Continue)
            }
        }
    }

    pub fn on_render(&mut self, event: RenderEvent) -> Flow {
        match event {
            RenderEvent::Running { generation, .. } => {
                self.render_state = ExecutionState::Running;
                if !self.is_current(generation) {
                    return Flow::Continue;
                }
                self.last_failure = None;
                println!("Shader running.");
            }
            RenderEvent::BuildFailed { generation, failure } => {
                if !self.is_current(generation) {
                    return Flow::Continue;
                }
                self.render_state = ExecutionState::Failed;
                eprintln!("{}", failure.error);
                let fixable = failure.error.is_fixable();
                self.last_failure = Some(failure);
                if !fixable {
                    eprintln!("This failure is not caused by the shader source and cannot be fixed.");
                } else if self.auto_fix {
                    self.request_fix();
                } else if self.coordinator.remaining_attempts() > 0 {
                    println!(
                        "Type :fix to ask for a repair ({} left).",
                        self.coordinator.remaining_attempts()
                    );
                }
            }
            RenderEvent::Stopped => {
                self.render_state = ExecutionState::Idle;
                self.last_failure = None;
                println!("Stopped.");
            }
            RenderEvent::LoopFailed { reason } => {
                self.render_state = ExecutionState::Idle;
                eprintln!("Rendering stopped: {reason}");
            }
            RenderEvent::Closed => {
                info!("preview window closed");
                return Flow::Quit;
            }
        }
        Flow::Continue
    }

    fn is_current(&self, generation: u64) -> bool {
        let current = self.coordinator.generation();
        if generation != current {
            debug!(generation, current, "ignoring build outcome from an earlier prompt");
        }
        generation == current
    }

    fn on_command(&mut self, command: ConsoleCommand) -> Result<Flow> {
        match command {
            ConsoleCommand::Prompt(description) => self.generate(&description),
            ConsoleCommand::Fix => match self.last_failure.as_ref().map(|f| f.error.is_fixable()) {
                None => println!("Nothing to fix: the last build did not fail."),
                Some(false) => {
                    eprintln!("The last failure cannot be fixed by changing the source.")
                }
                Some(true) => self.request_fix(),
            },
            ConsoleCommand::Stop => self.preview.stop()?,
            ConsoleCommand::Run => match self.last_source.clone() {
                Some(source) => self.submit(source)?,
                None => println!("No source to run yet."),
            },
            ConsoleCommand::Source => match &self.last_source {
                Some(source) => println!("{source}"),
                None => println!("No source yet."),
            },
            ConsoleCommand::Preset(name) => match self.presets.get(&name).cloned() {
                Some(description) => {
                    println!("Preset {name}: {description}");
                    self.generate(&description);
                }
                None => eprintln!("Unknown preset '{name}' (see :presets)."),
            },
            ConsoleCommand::Presets => print_presets(&self.presets),
            ConsoleCommand::Status => self.print_status(),
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn generate(&mut self, description: &str) {
        match self.coordinator.begin_generate(description) {
            Ok(request) => {
                self.last_failure = None;
                println!("Generating shader...");
                self.spawn_generate(request);
            }
            Err(err) => eprintln!("{err}"),
        }
    }

    fn request_fix(&mut self) {
        let Some(failure) = &self.last_failure else {
            return;
        };
        let diagnostic = failure
            .error
            .diagnostic()
            .map(str::to_owned)
            .unwrap_or_else(|| failure.error.to_string());
        match self.coordinator.begin_fix(failure.source.clone(), diagnostic) {
            Ok(request) => {
                println!(
                    "Requesting a fix (attempt {} of {})...",
                    self.coordinator.state().attempts_used + self.coordinator.fixes_in_flight(),
                    self.coordinator.state().max_attempts
                );
                self.spawn_fix(request);
            }
            Err(err @ CycleError::RetryExhausted { .. }) => eprintln!("{err}"),
            Err(err) => warn!(error = %err, "fix request refused"),
        }
    }

    fn apply(&mut self, resolution: Resolution, failure_message: &str) -> Result<()> {
        match resolution {
            Resolution::Apply(source) => self.submit(source)?,
            Resolution::Stale => debug!("ignoring response from an earlier prompt"),
            Resolution::Failed(err) => eprintln!("{failure_message} ({err})"),
        }
        Ok(())
    }

    /// Sends `source` to the preview as-is, without asking the service.
    pub fn submit(&mut self, source: String) -> Result<()> {
        self.last_source = Some(source.clone());
        self.render_state = ExecutionState::Building;
        self.preview.execute(self.coordinator.generation(), source)
    }

    fn spawn_generate(&mut self, request: GenerateRequest) {
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        let ticket = request.ticket;
        let spawned = thread::Builder::new()
            .name("zenith-generate".into())
            .spawn(move || {
                let result = request.send(service.as_ref());
                let _ = events.send(StudioEvent::Generated { ticket, result });
            });
        if let Err(err) = spawned {
            let result = Err(ServiceError::Transport {
                reason: format!("failed to spawn request thread: {err}"),
            });
            let resolution = self.coordinator.complete_generate(ticket, result);
            if let Resolution::Failed(err) = resolution {
                eprintln!("{GENERATE_FAILED_MESSAGE} ({err})");
            }
        }
    }

    fn spawn_fix(&mut self, request: FixRequest) {
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        let ticket = request.ticket;
        let spawned = thread::Builder::new()
            .name("zenith-fix".into())
            .spawn(move || {
                let result = request.send(service.as_ref());
                let _ = events.send(StudioEvent::Fixed { ticket, result });
            });
        if let Err(err) = spawned {
            let result = Err(ServiceError::Transport {
                reason: format!("failed to spawn request thread: {err}"),
            });
            let resolution = self.coordinator.complete_fix(ticket, result);
            if let Resolution::Failed(err) = resolution {
                eprintln!("{FIX_FAILED_MESSAGE} ({err})");
            }
        }
    }

    fn print_status(&self) {
        let cycle = self.coordinator.state();
        println!("renderer:  {}", self.render_state);
        println!(
            "fixes:     {} of {} used, {} in flight",
            cycle.attempts_used,
            cycle.max_attempts,
            self.coordinator.fixes_in_flight()
        );
        println!("auto-fix:  {}", if self.auto_fix { "on" } else { "off" });
        if let Some(failure) = &self.last_failure {
            println!("last error: {}", failure.error);
        }
    }
}

pub fn print_presets(presets: &BTreeMap<String, String>) {
    if presets.is_empty() {
        println!("No presets configured.");
        return;
    }
    let width = presets.keys().map(String::len).max().unwrap_or(0);
    for (name, description) in presets {
        println!("  {name:<width$}  {description}");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::Mutex;
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver};
    use renderer::{BuildError, ParseError, ResourceError, StageKind};

    use super::*;

    #[derive(Default)]
    struct FakePreview {
        executed: RefCell<Vec<(u64, String)>>,
        stops: RefCell<u32>,
    }

    impl Preview for FakePreview {
        fn execute(&self, generation: u64, source: String) -> Result<()> {
            self.executed.borrow_mut().push((generation, source));
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            *self.stops.borrow_mut() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedService {
        prompts: Mutex<Vec<String>>,
        fixes: Mutex<Vec<(String, String)>>,
        fail_generate: bool,
    }

    impl ShaderService for ScriptedService {
        fn generate(&self, description: &str) -> Result<String, ServiceError> {
            self.prompts.lock().unwrap().push(description.to_string());
            if self.fail_generate {
                return Err(ServiceError::Status { status: 503 });
            }
            Ok(format!(
                "```glsl\n// VERTEX SHADER\n// {description}\n// FRAGMENT SHADER\nvoid main() {{}}\n```"
            ))
        }

        fn fix(&self, code: &str, diagnostic: &str) -> Result<String, ServiceError> {
            self.fixes
                .lock()
                .unwrap()
                .push((code.to_string(), diagnostic.to_string()));
            Ok(format!("{code}\n// fixed"))
        }
    }

    struct Harness {
        studio: Studio<FakePreview>,
        service: Arc<ScriptedService>,
        events: Receiver<StudioEvent>,
    }

    impl Harness {
        fn new(service: ScriptedService) -> Self {
            Self::with_auto_fix(service, false)
        }

        fn with_auto_fix(service: ScriptedService, auto_fix: bool) -> Self {
            let service = Arc::new(service);
            let (tx, rx) = unbounded();
            let presets = BTreeMap::from([("ocean".to_string(), "rolling waves".to_string())]);
            let studio = Studio::new(service.clone(), FakePreview::default(), tx, presets)
                .with_auto_fix(auto_fix);
            Self {
                studio,
                service,
                events: rx,
            }
        }

        fn command(&mut self, command: ConsoleCommand) -> Flow {
            self.studio.handle(StudioEvent::Command(command)).unwrap()
        }

        /// Feeds `count` worker responses back into the studio.
        fn pump(&mut self, count: usize) {
            for _ in 0..count {
                let event = self.events.recv_timeout(Duration::from_secs(5)).unwrap();
                self.studio.handle(event).unwrap();
            }
        }

        fn executed(&self) -> Vec<String> {
            let executed = self.studio.preview().executed.borrow();
            executed.iter().map(|(_, source)| source.clone()).collect()
        }

        fn generations(&self) -> Vec<u64> {
            let executed = self.studio.preview().executed.borrow();
            executed.iter().map(|(generation, _)| *generation).collect()
        }

        fn fix_calls(&self) -> usize {
            self.service.fixes.lock().unwrap().len()
        }

        fn fail_last_build(&mut self, diagnostic: &str) {
            let (generation, source) = self
                .studio
                .preview()
                .executed
                .borrow()
                .last()
                .cloned()
                .unwrap_or_default();
            self.fail_build(generation, source, diagnostic);
        }

        fn fail_build(&mut self, generation: u64, source: String, diagnostic: &str) {
            self.studio.on_render(RenderEvent::BuildFailed {
                generation,
                failure: BuildFailure {
                    source,
                    error: BuildError::Compile {
                        stage: StageKind::Fragment,
                        diagnostic: diagnostic.to_string(),
                    },
                },
            });
        }
    }

    #[test]
    fn prompt_result_is_fence_stripped_and_executed() {
        let mut harness = Harness::new(ScriptedService::default());
        harness.command(ConsoleCommand::Prompt("lava lamp".into()));
        harness.pump(1);

        assert_eq!(
            harness.executed(),
            vec!["// VERTEX SHADER\n// lava lamp\n// FRAGMENT SHADER\nvoid main() {}".to_string()]
        );
        assert_eq!(harness.studio.render_state(), ExecutionState::Building);
        harness.studio.on_render(RenderEvent::Running {
            generation: harness.generations()[0],
            source: harness.executed()[0].clone(),
        });
        assert_eq!(harness.studio.render_state(), ExecutionState::Running);
    }

    #[test]
    fn blank_prompt_never_reaches_the_service() {
        let mut harness = Harness::new(ScriptedService::default());
        harness.command(ConsoleCommand::Prompt("   ".into()));
        assert!(harness.events.try_recv().is_err());
        assert!(harness.service.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_generation_executes_nothing() {
        let mut harness = Harness::new(ScriptedService {
            fail_generate: true,
            ..ScriptedService::default()
        });
        harness.command(ConsoleCommand::Prompt("fire".into()));
        harness.pump(1);
        assert!(harness.executed().is_empty());
    }

    #[test]
    fn manual_fix_sends_source_and_verbatim_diagnostic() {
        let mut harness = Harness::new(ScriptedService::default());
        harness.command(ConsoleCommand::Prompt("fire".into()));
        harness.pump(1);
        harness.fail_last_build("ERROR: 0:3: 'foo' : undeclared identifier");
        assert_eq!(harness.fix_calls(), 0);

        harness.command(ConsoleCommand::Fix);
        harness.pump(1);

        let fixes = harness.service.fixes.lock().unwrap().clone();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].0, harness.executed()[0]);
        assert_eq!(fixes[0].1, "ERROR: 0:3: 'foo' : undeclared identifier");
        assert!(harness.executed()[1].ends_with("// fixed"));
        assert_eq!(harness.studio.coordinator().state().attempts_used, 1);
    }

    #[test]
    fn auto_fix_stops_at_the_ceiling() {
        let mut harness = Harness::with_auto_fix(ScriptedService::default(), true);

        harness.command(ConsoleCommand::Prompt("fire".into()));
        harness.pump(1);
        for _ in 0..3 {
            harness.fail_last_build("ERROR: 0:1");
            harness.pump(1);
        }
        assert_eq!(harness.fix_calls(), 3);

        harness.fail_last_build("ERROR: 0:1");
        harness.command(ConsoleCommand::Fix);
        assert!(harness.events.try_recv().is_err());
        assert_eq!(harness.fix_calls(), 3);
        assert_eq!(harness.studio.coordinator().state().attempts_used, 3);

        harness.command(ConsoleCommand::Prompt("water".into()));
        assert_eq!(harness.studio.coordinator().state().attempts_used, 0);
        assert!(harness.studio.last_failure().is_none());
    }

    #[test]
    fn responses_to_superseded_prompts_are_dropped() {
        let mut harness = Harness::new(ScriptedService::default());
        harness.command(ConsoleCommand::Prompt("first".into()));
        harness.command(ConsoleCommand::Prompt("second".into()));
        harness.pump(2);

        let executed = harness.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].contains("// second"));
    }

    #[test]
    fn build_outcomes_from_earlier_prompts_are_ignored() {
        let mut harness = Harness::with_auto_fix(ScriptedService::default(), true);
        harness.command(ConsoleCommand::Prompt("first".into()));
        harness.pump(1);
        let (first_generation, first_source) =
            harness.studio.preview().executed.borrow()[0].clone();

        harness.command(ConsoleCommand::Prompt("second".into()));
        harness.fail_build(first_generation, first_source, "ERROR: 0:2: stale");
        assert!(harness.studio.last_failure().is_none());

        harness.pump(1);
        assert_eq!(harness.studio.coordinator().state().attempts_used, 0);
        assert_eq!(harness.studio.coordinator().fixes_in_flight(), 0);
        assert_eq!(harness.fix_calls(), 0);
        assert!(harness.events.try_recv().is_err());

        let executed = harness.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[1].contains("// second"));
        assert!(harness.generations()[1] > first_generation);

        harness.studio.on_render(RenderEvent::Running {
            generation: first_generation,
            source: executed[0].clone(),
        });
        assert!(harness.studio.last_failure().is_none());
    }

    #[test]
    fn stopping_clears_the_pending_failure() {
        let mut harness = Harness::new(ScriptedService::default());
        harness.command(ConsoleCommand::Prompt("fire".into()));
        harness.pump(1);
        harness.fail_last_build("ERROR: 0:3: 'foo' : undeclared identifier");
        assert!(harness.studio.last_failure().is_some());

        harness.command(ConsoleCommand::Stop);
        harness.studio.on_render(RenderEvent::Stopped);
        assert!(harness.studio.last_failure().is_none());

        harness.command(ConsoleCommand::Fix);
        assert!(harness.events.try_recv().is_err());
        assert_eq!(harness.fix_calls(), 0);
    }

    #[test]
    fn parse_failures_are_fixed_with_their_message() {
        let mut harness = Harness::new(ScriptedService::default());
        harness.studio.on_render(RenderEvent::BuildFailed {
            generation: 0,
            failure: BuildFailure {
                source: "void main() {}".into(),
                error: BuildError::Parse(ParseError::MissingMarker {
                    marker: "// VERTEX SHADER",
                }),
            },
        });
        harness.command(ConsoleCommand::Fix);
        harness.pump(1);

        let expected = BuildError::from(ParseError::MissingMarker {
            marker: "// VERTEX SHADER",
        })
        .to_string();
        let fixes = harness.service.fixes.lock().unwrap().clone();
        assert_eq!(fixes[0].1, expected);
    }

    #[test]
    fn resource_failures_are_not_sent_for_fixing() {
        let mut harness = Harness::with_auto_fix(ScriptedService::default(), true);

        harness.studio.on_render(RenderEvent::BuildFailed {
            generation: 0,
            failure: BuildFailure {
                source: "x".into(),
                error: BuildError::Resource(ResourceError::Context("device lost".into())),
            },
        });
        harness.command(ConsoleCommand::Fix);
        assert_eq!(harness.fix_calls(), 0);
        assert_eq!(harness.studio.coordinator().fixes_in_flight(), 0);
    }

    #[test]
    fn run_stop_and_preset_commands_reach_the_preview() {
        let mut harness = Harness::new(ScriptedService::default());
        harness.command(ConsoleCommand::Run);
        assert!(harness.executed().is_empty());

        harness.command(ConsoleCommand::Preset("ocean".into()));
        harness.pump(1);
        assert_eq!(
            harness.service.prompts.lock().unwrap().as_slice(),
            ["rolling waves".to_string()]
        );

        harness.command(ConsoleCommand::Run);
        assert_eq!(harness.executed().len(), 2);
        assert_eq!(harness.executed()[0], harness.executed()[1]);

        harness.command(ConsoleCommand::Stop);
        assert_eq!(*harness.studio.preview().stops.borrow(), 1);

        harness.command(ConsoleCommand::Preset("missing".into()));
        assert!(harness.events.try_recv().is_err());
    }

    #[test]
    fn quit_and_window_close_end_the_session() {
        let mut harness = Harness::new(ScriptedService::default());
        assert_eq!(harness.command(ConsoleCommand::Quit), Flow::Quit);
        assert_eq!(harness.studio.handle(StudioEvent::ConsoleClosed).unwrap(), Flow::Quit);
        assert_eq!(harness.studio.on_render(RenderEvent::Closed), Flow::Quit);
        assert_eq!(harness.command(ConsoleCommand::Status), Flow::Continue);
    }
}
