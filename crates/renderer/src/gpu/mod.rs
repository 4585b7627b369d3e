//! wgpu implementation of [`GraphicsBackend`](crate::backend::GraphicsBackend).
//!
//! - `context` owns the device and surface for the preview window and
//!   reconfigures the surface on resize.
//! - `reflect` runs the naga GLSL front end for stage diagnostics and reads
//!   attribute and uniform locations out of the parsed modules.
//! - `backend` keeps the resource table behind the opaque ids and records one
//!   render pass per frame.
//!
//! Linking maps onto render pipeline creation inside a validation error scope,
//! so link diagnostics are the text wgpu reports.

mod backend;
mod context;
mod reflect;

pub use backend::WgpuBackend;
