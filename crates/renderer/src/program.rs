use tracing::{debug, warn};

use crate::backend::{AttributeLocation, GraphicsBackend, ProgramId, UniformLocation};
use crate::dialect::lower_stage_pair;
use crate::error::BuildError;
use crate::source::{StageKind, StagePair};

/// Vertex attribute fed with the quad corners.
pub const POSITION_ATTRIBUTE: &str = "position";
/// Scalar uniform receiving elapsed seconds.
pub const TIME_UNIFORM: &str = "time";
/// `vec2` uniform receiving the drawing buffer size in pixels.
pub const RESOLUTION_UNIFORM: &str = "resolution";

/// Locations of the named inputs the frame loop feeds. Any of them may be
/// absent when the program does not use it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramBindings {
    pub position: Option<AttributeLocation>,
    pub time: Option<UniformLocation>,
    pub resolution: Option<UniformLocation>,
}

/// A linked program together with its resolved bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledProgram {
    pub program: ProgramId,
    pub bindings: ProgramBindings,
}

/// Compiles and links `stages` on `backend`.
///
/// The vertex stage is compiled first and a failure there returns before the
/// fragment stage is looked at. Stage objects never outlive this call: they
/// are released on every failure path and after a successful link.
pub fn build_program<B>(backend: &mut B, stages: &StagePair) -> Result<CompiledProgram, BuildError>
where
    B: GraphicsBackend + ?Sized,
{
    let lowered = lower_stage_pair(stages);

    let vertex = backend
        .compile_stage(StageKind::Vertex, &lowered.vertex)
        .map_err(|diagnostic| compile_error(StageKind::Vertex, diagnostic))?;

    let fragment = match backend.compile_stage(StageKind::Fragment, &lowered.fragment) {
        Ok(fragment) => fragment,
        Err(diagnostic) => {
            backend.release_stage(vertex);
            return Err(compile_error(StageKind::Fragment, diagnostic));
        }
    };

    let linked = backend.link_program(vertex, fragment);
    backend.release_stage(vertex);
    backend.release_stage(fragment);
    let program = linked.map_err(|diagnostic| {
        warn!(%diagnostic, "program link failed");
        BuildError::Link { diagnostic }
    })?;

    let bindings = ProgramBindings {
        position: backend.attribute_location(program, POSITION_ATTRIBUTE),
        time: backend.uniform_location(program, TIME_UNIFORM),
        resolution: backend.uniform_location(program, RESOLUTION_UNIFORM),
    };
    debug!(program = program.0, ?bindings, "program linked");

    Ok(CompiledProgram { program, bindings })
}

fn compile_error(stage: StageKind, diagnostic: String) -> BuildError {
    warn!(%stage, %diagnostic, "shader stage failed to compile");
    BuildError::Compile { stage, diagnostic }
}
