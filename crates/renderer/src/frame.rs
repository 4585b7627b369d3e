//! Self-rescheduling render loop.
//!
//! A [`FrameClock`] hands out one callback at a time. Each callback draws the
//! quad and requests the next one, so the loop runs for as long as a session
//! exists and stops the moment it is taken away.

use tracing::{trace, warn};

use crate::backend::{AttributeLocation, DrawError, GeometryId, GraphicsBackend, ProgramId, UniformLocation};
use crate::error::ResourceError;
use crate::runtime::BoxedTimeSource;

/// Identifies one requested frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

impl FrameHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Source of vsync-aligned frame callbacks.
pub trait FrameClock {
    /// Schedules a callback and returns its handle without blocking.
    fn request_frame(&mut self) -> FrameHandle;
    /// Withdraws a pending callback. Cancelling an already-fired or unknown
    /// handle is a no-op.
    fn cancel_frame(&mut self, handle: FrameHandle);
    /// Takes the callback that is due now, if any.
    fn take_due(&mut self) -> Option<FrameHandle>;
}

/// Everything one frame needs, all as ids owned elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBindings {
    pub program: ProgramId,
    pub geometry: GeometryId,
    pub position: Option<AttributeLocation>,
    pub time: Option<UniformLocation>,
    pub resolution: Option<UniformLocation>,
}

/// A running loop: what it draws and which callback it waits for.
#[derive(Debug)]
struct RenderSession {
    bindings: FrameBindings,
    pending: Option<FrameHandle>,
}

/// What happened when a callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Drawn,
    /// The surface was not ready; the loop continues.
    Skipped,
    /// The handle was stale or no session was running.
    Ignored,
}

pub struct FrameDriver<C> {
    clock: C,
    time: BoxedTimeSource,
    session: Option<RenderSession>,
}

impl<C: FrameClock> FrameDriver<C> {
    pub fn new(clock: C, time: BoxedTimeSource) -> Self {
        Self {
            clock,
            time,
            session: None,
        }
    }

    /// Starts a new loop with a fresh start time, ending any current one first.
    pub fn start(&mut self, bindings: FrameBindings) {
        self.stop();
        self.time.reset();
        let pending = self.clock.request_frame();
        trace!(program = bindings.program.0, frame = pending.raw(), "render loop started");
        self.session = Some(RenderSession {
            bindings,
            pending: Some(pending),
        });
    }

    /// Ends the loop and cancels its pending callback. Returns the bindings
    /// that were running so the caller can release them.
    pub fn stop(&mut self) -> Option<FrameBindings> {
        let session = self.session.take()?;
        if let Some(pending) = session.pending {
            self.clock.cancel_frame(pending);
        }
        trace!(program = session.bindings.program.0, "render loop stopped");
        Some(session.bindings)
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn bindings(&self) -> Option<&FrameBindings> {
        self.session.as_ref().map(|session| &session.bindings)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Runs the callback identified by `handle`.
    ///
    /// A fatal draw error ends the session; the caller still owns the ids and
    /// must release them.
    pub fn on_frame<B>(&mut self, backend: &mut B, handle: FrameHandle) -> Result<FrameOutcome, ResourceError>
    where
        B: GraphicsBackend + ?Sized,
    {
        let Some(session) = self.session.as_mut() else {
            trace!(frame = handle.raw(), "frame fired with no running session");
            return Ok(FrameOutcome::Ignored);
        };
        if session.pending != Some(handle) {
            trace!(frame = handle.raw(), "stale frame ignored");
            return Ok(FrameOutcome::Ignored);
        }
        session.pending = None;

        let display = backend.display_size();
        if display != backend.backing_size() {
            backend.resize_backing(display.0, display.1);
        }
        let (width, height) = backend.backing_size();

        let bindings = session.bindings;
        backend.use_program(bindings.program);
        backend.bind_quad(bindings.geometry);

        let seconds = self.time.seconds();
        if let Some(location) = bindings.time {
            backend.set_uniform_f32(location, seconds);
        }
        if let Some(location) = bindings.resolution {
            backend.set_uniform_vec2(location, [width as f32, height as f32]);
        }

        let outcome = match backend.draw_quad() {
            Ok(()) => FrameOutcome::Drawn,
            Err(DrawError::SurfaceLost) => {
                warn!(width, height, "surface lost; reconfiguring");
                backend.resize_backing(width, height);
                FrameOutcome::Skipped
            }
            Err(DrawError::SurfaceTimeout) => {
                warn!("surface timeout; skipping frame");
                FrameOutcome::Skipped
            }
            Err(DrawError::Fatal(err)) => {
                self.session = None;
                return Err(err);
            }
        };

        session.pending = Some(self.clock.request_frame());
        Ok(outcome)
    }
}
