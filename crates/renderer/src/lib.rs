//! Rendering core for Zenith: turns a generated source blob into a running
//! shader program on a window.
//!
//! ```text
//!   generated text
//!        │ split_stages()
//!        ▼
//!   StagePair ──▶ lower_stage_pair() ──▶ build_program() ──▶ CompiledProgram
//!                                                         │
//!   ExecutionController ◀─────────────────────────────────┘
//!        │ install (stop old loop, release old program, start new loop)
//!        ▼
//!   FrameDriver ──▶ GraphicsBackend::draw_quad() ──▶ FrameClock::request_frame()
//! ```
//!
//! Everything above [`GraphicsBackend`] and [`FrameClock`] is plain logic and
//! is tested against in-memory doubles. [`WgpuBackend`] and [`RedrawClock`]
//! provide the real implementations, and [`PreviewWindow`] runs both on a
//! dedicated window thread.

pub mod backend;
pub mod controller;
pub mod dialect;
pub mod error;
pub mod frame;
mod gpu;
pub mod program;
pub mod runtime;
pub mod source;
mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    AttributeLocation, DrawError, GeometryId, GraphicsBackend, ProgramId, StageId, UniformLocation,
};
pub use controller::{BuildFailure, ExecutionController, ExecutionState};
pub use error::{BuildError, ParseError, ResourceError};
pub use frame::{FrameBindings, FrameClock, FrameDriver, FrameHandle, FrameOutcome};
pub use gpu::WgpuBackend;
pub use program::{build_program, CompiledProgram, ProgramBindings};
pub use runtime::{BoxedTimeSource, FixedTimeSource, SystemTimeSource, TimeSource};
pub use source::{split_stages, StageKind, StagePair, FRAGMENT_MARKER, VERTEX_MARKER};
pub use window::{PreviewWindow, RedrawClock, RenderEvent, WindowConfig};
