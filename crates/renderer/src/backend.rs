//! Seam between the pipeline logic and the graphics API.
//!
//! Everything above this trait works with opaque ids; the backend owns the
//! actual objects in its resource table. Diagnostics cross the boundary as the
//! driver produced them.

use thiserror::Error;

use crate::error::ResourceError;
use crate::source::StageKind;

/// Compiled but not yet linked stage object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub u64);

/// Linked, executable program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

/// Vertex data for the full-viewport quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub u64);

/// Vertex input slot resolved from a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeLocation(pub u32);

/// Uniform slot resolved from a linked program: block binding plus byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub binding: u32,
    pub offset: u32,
}

/// Outcome of a draw that did not reach the screen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    /// Surface must be reconfigured before the next frame.
    #[error("surface lost or outdated")]
    SurfaceLost,
    /// Frame skipped; the next one may succeed.
    #[error("timed out acquiring the next surface texture")]
    SurfaceTimeout,
    #[error(transparent)]
    Fatal(#[from] ResourceError),
}

/// Operations the pipeline needs from a graphics API.
pub trait GraphicsBackend {
    /// Compiles one stage. `Err` carries the verbatim compiler log.
    fn compile_stage(&mut self, kind: StageKind, source: &str) -> Result<StageId, String>;
    fn release_stage(&mut self, stage: StageId);

    /// Links two compiled stages. `Err` carries the verbatim link log.
    fn link_program(&mut self, vertex: StageId, fragment: StageId) -> Result<ProgramId, String>;
    fn release_program(&mut self, program: ProgramId);

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation>;
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Uploads the 4-vertex strip covering clip space, fed to `position`.
    fn create_quad(
        &mut self,
        program: ProgramId,
        position: Option<AttributeLocation>,
    ) -> Result<GeometryId, ResourceError>;
    fn release_geometry(&mut self, geometry: GeometryId);

    /// Size the surface is shown at, in physical pixels.
    fn display_size(&self) -> (u32, u32);
    /// Size of the drawing buffer.
    fn backing_size(&self) -> (u32, u32);
    /// Resizes the drawing buffer and the viewport together.
    fn resize_backing(&mut self, width: u32, height: u32);

    fn use_program(&mut self, program: ProgramId);
    fn bind_quad(&mut self, geometry: GeometryId);
    fn set_uniform_f32(&mut self, location: UniformLocation, value: f32);
    fn set_uniform_vec2(&mut self, location: UniformLocation, value: [f32; 2]);

    /// Submits one draw of the bound quad with the bound program.
    fn draw_quad(&mut self) -> Result<(), DrawError>;
}
