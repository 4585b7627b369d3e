use std::fmt;

use tracing::{debug, error, info, warn};

use crate::backend::GraphicsBackend;
use crate::error::{BuildError, ResourceError};
use crate::frame::{FrameBindings, FrameClock, FrameDriver, FrameHandle, FrameOutcome};
use crate::program::build_program;
use crate::runtime::BoxedTimeSource;
use crate::source::split_stages;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    Building,
    Running,
    Failed,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Building => "building",
            ExecutionState::Running => "running",
            ExecutionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Source that failed to build, kept for display and for fix requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    pub source: String,
    pub error: BuildError,
}

/// Owns the current program and its render loop on one surface.
///
/// At most one program is live. A successful build stops the old loop,
/// releases the old program and geometry, then starts the new loop. A failed
/// build changes nothing on screen: whatever was running keeps running, and
/// the state becomes [`ExecutionState::Failed`] until the next execute.
pub struct ExecutionController<B, C>
where
    B: GraphicsBackend,
    C: FrameClock,
{
    backend: B,
    driver: FrameDriver<C>,
    live: Option<FrameBindings>,
    state: ExecutionState,
    failure: Option<BuildFailure>,
    running_source: Option<String>,
}

impl<B, C> ExecutionController<B, C>
where
    B: GraphicsBackend,
    C: FrameClock,
{
    pub fn new(backend: B, clock: C, time: BoxedTimeSource) -> Self {
        Self {
            backend,
            driver: FrameDriver::new(clock, time),
            live: None,
            state: ExecutionState::Idle,
            failure: None,
            running_source: None,
        }
    }

    /// Splits, builds and installs `source`.
    ///
    /// On failure the error is also retained as [`Self::last_failure`].
    pub fn execute(&mut self, source: &str) -> Result<(), BuildError> {
        self.state = ExecutionState::Building;
        debug!(bytes = source.len(), "building program");

        match self.build(source) {
            Ok(bindings) => {
                self.install(bindings);
                self.state = ExecutionState::Running;
                self.failure = None;
                self.running_source = Some(source.to_string());
                info!(program = bindings.program.0, "program running");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, still_running = self.driver.is_running(), "build failed");
                self.state = ExecutionState::Failed;
                self.failure = Some(BuildFailure {
                    source: source.to_string(),
                    error: err.clone(),
                });
                Err(err)
            }
        }
    }

    fn build(&mut self, source: &str) -> Result<FrameBindings, BuildError> {
        let stages = split_stages(source)?;
        let compiled = build_program(&mut self.backend, &stages)?;
        let geometry = match self
            .backend
            .create_quad(compiled.program, compiled.bindings.position)
        {
            Ok(geometry) => geometry,
            Err(err) => {
                self.backend.release_program(compiled.program);
                return Err(err.into());
            }
        };
        Ok(FrameBindings {
            program: compiled.program,
            geometry,
            position: compiled.bindings.position,
            time: compiled.bindings.time,
            resolution: compiled.bindings.resolution,
        })
    }

    fn install(&mut self, bindings: FrameBindings) {
        self.driver.stop();
        self.release_live();
        self.live = Some(bindings);
        self.driver.start(bindings);
    }

    fn release_live(&mut self) {
        if let Some(live) = self.live.take() {
            self.backend.release_geometry(live.geometry);
            self.backend.release_program(live.program);
            debug!(program = live.program.0, "program released");
        }
    }

    /// Runs whichever frame callback is due.
    pub fn on_redraw(&mut self) -> Result<FrameOutcome, ResourceError> {
        match self.driver.clock_mut().take_due() {
            Some(handle) => self.on_frame(handle),
            None => Ok(FrameOutcome::Ignored),
        }
    }

    pub fn on_frame(&mut self, handle: FrameHandle) -> Result<FrameOutcome, ResourceError> {
        match self.driver.on_frame(&mut self.backend, handle) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(error = %err, "render loop stopped");
                self.release_live();
                self.running_source = None;
                self.state = ExecutionState::Idle;
                Err(err)
            }
        }
    }

    /// Stops the loop and releases the program. No draw happens after this
    /// returns.
    pub fn stop(&mut self) {
        self.driver.stop();
        self.release_live();
        self.running_source = None;
        self.failure = None;
        self.state = ExecutionState::Idle;
    }

    /// Releases everything before the surface goes away. Safe to call twice.
    pub fn teardown(&mut self) {
        if self.live.is_some() || self.driver.is_running() {
            info!("tearing down render loop");
        }
        self.stop();
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.driver.is_running()
    }

    pub fn last_failure(&self) -> Option<&BuildFailure> {
        self.failure.as_ref()
    }

    /// Source of the program currently on screen.
    pub fn running_source(&self) -> Option<&str> {
        self.running_source.as_deref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn clock(&self) -> &C {
        self.driver.clock()
    }
}

impl<B, C> Drop for ExecutionController<B, C>
where
    B: GraphicsBackend,
    C: FrameClock,
{
    fn drop(&mut self) {
        self.teardown();
    }
}
