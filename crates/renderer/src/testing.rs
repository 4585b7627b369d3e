//! In-memory backend and clock used by the unit tests.
//!
//! Stage sources script the spy: a line `#error <text>` makes compilation
//! fail with `<text>`, and `#link-error <text>` in either stage makes linking
//! fail. Bindings resolve when their name appears in the linked sources.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::backend::{
    AttributeLocation, DrawError, GeometryId, GraphicsBackend, ProgramId, StageId, UniformLocation,
};
use crate::error::ResourceError;
use crate::frame::{FrameClock, FrameHandle};
use crate::source::StageKind;

#[derive(Debug)]
pub struct SpyBackend {
    next_id: u64,
    stage_sources: HashMap<StageId, String>,
    program_sources: HashMap<ProgramId, String>,
    pub live_stages: BTreeSet<StageId>,
    pub live_programs: BTreeSet<ProgramId>,
    pub live_geometries: BTreeSet<GeometryId>,
    pub compile_attempts: Vec<StageKind>,
    pub compiled_sources: Vec<String>,
    pub known_uniforms: Vec<&'static str>,
    pub display: (u32, u32),
    pub backing: (u32, u32),
    pub resizes: Vec<(u32, u32)>,
    pub used_program: Option<ProgramId>,
    pub bound_geometry: Option<GeometryId>,
    pub uniform_writes: Vec<(UniformLocation, UniformValue)>,
    pub draw_failures: VecDeque<DrawError>,
    pub quad_failure: Option<ResourceError>,
    pub draws: usize,
    pub drawn_programs: Vec<ProgramId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
}

impl SpyBackend {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            stage_sources: HashMap::new(),
            program_sources: HashMap::new(),
            live_stages: BTreeSet::new(),
            live_programs: BTreeSet::new(),
            live_geometries: BTreeSet::new(),
            compile_attempts: Vec::new(),
            compiled_sources: Vec::new(),
            known_uniforms: vec!["time", "resolution"],
            display: (300, 150),
            backing: (300, 150),
            resizes: Vec::new(),
            used_program: None,
            bound_geometry: None,
            uniform_writes: Vec::new(),
            draw_failures: VecDeque::new(),
            quad_failure: None,
            draws: 0,
            drawn_programs: Vec::new(),
        }
    }

    pub fn float_writes(&self) -> Vec<f32> {
        self.uniform_writes
            .iter()
            .filter_map(|(_, value)| match value {
                UniformValue::Float(value) => Some(*value),
                UniformValue::Vec2(_) => None,
            })
            .collect()
    }

    pub fn vec2_writes(&self) -> Vec<[f32; 2]> {
        self.uniform_writes
            .iter()
            .filter_map(|(_, value)| match value {
                UniformValue::Vec2(value) => Some(*value),
                UniformValue::Float(_) => None,
            })
            .collect()
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for SpyBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn directive<'a>(source: &'a str, name: &str) -> Option<&'a str> {
    source
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(name))
        .map(str::trim)
}

impl GraphicsBackend for SpyBackend {
    fn compile_stage(&mut self, kind: StageKind, source: &str) -> Result<StageId, String> {
        self.compile_attempts.push(kind);
        self.compiled_sources.push(source.to_string());
        if let Some(diagnostic) = directive(source, "#error ") {
            return Err(diagnostic.to_string());
        }
        let id = StageId(self.allocate());
        self.live_stages.insert(id);
        self.stage_sources.insert(id, source.to_string());
        Ok(id)
    }

    fn release_stage(&mut self, stage: StageId) {
        assert!(self.live_stages.remove(&stage), "double release of {stage:?}");
        self.stage_sources.remove(&stage);
    }

    fn link_program(&mut self, vertex: StageId, fragment: StageId) -> Result<ProgramId, String> {
        let vertex = self.stage_sources.get(&vertex).cloned().unwrap_or_default();
        let fragment = self.stage_sources.get(&fragment).cloned().unwrap_or_default();
        let combined = format!("{vertex}\n{fragment}");
        if let Some(diagnostic) = directive(&combined, "#link-error ") {
            return Err(diagnostic.to_string());
        }
        let id = ProgramId(self.allocate());
        self.live_programs.insert(id);
        self.program_sources.insert(id, combined);
        Ok(id)
    }

    fn release_program(&mut self, program: ProgramId) {
        assert!(self.live_programs.remove(&program), "double release of {program:?}");
        self.program_sources.remove(&program);
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation> {
        let source = self.program_sources.get(&program)?;
        source.contains(name).then_some(AttributeLocation(0))
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let source = self.program_sources.get(&program)?;
        let binding = self.known_uniforms.iter().position(|known| *known == name)?;
        source.contains(name).then_some(UniformLocation {
            binding: binding as u32,
            offset: 0,
        })
    }

    fn create_quad(
        &mut self,
        program: ProgramId,
        _position: Option<AttributeLocation>,
    ) -> Result<GeometryId, ResourceError> {
        assert!(self.live_programs.contains(&program), "quad for dead program");
        if let Some(err) = self.quad_failure.take() {
            return Err(err);
        }
        let id = GeometryId(self.allocate());
        self.live_geometries.insert(id);
        Ok(id)
    }

    fn release_geometry(&mut self, geometry: GeometryId) {
        assert!(self.live_geometries.remove(&geometry), "double release of {geometry:?}");
    }

    fn display_size(&self) -> (u32, u32) {
        self.display
    }

    fn backing_size(&self) -> (u32, u32) {
        self.backing
    }

    fn resize_backing(&mut self, width: u32, height: u32) {
        self.backing = (width, height);
        self.resizes.push((width, height));
    }

    fn use_program(&mut self, program: ProgramId) {
        assert!(self.live_programs.contains(&program), "using released {program:?}");
        self.used_program = Some(program);
    }

    fn bind_quad(&mut self, geometry: GeometryId) {
        assert!(self.live_geometries.contains(&geometry), "binding released {geometry:?}");
        self.bound_geometry = Some(geometry);
    }

    fn set_uniform_f32(&mut self, location: UniformLocation, value: f32) {
        self.uniform_writes.push((location, UniformValue::Float(value)));
    }

    fn set_uniform_vec2(&mut self, location: UniformLocation, value: [f32; 2]) {
        self.uniform_writes.push((location, UniformValue::Vec2(value)));
    }

    fn draw_quad(&mut self) -> Result<(), DrawError> {
        if let Some(err) = self.draw_failures.pop_front() {
            return Err(err);
        }
        self.draws += 1;
        if let Some(program) = self.used_program {
            self.drawn_programs.push(program);
        }
        Ok(())
    }
}

/// Frame clock driven by hand from tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    next: u64,
    pending: Option<FrameHandle>,
    pub requests: usize,
    pub cancellations: usize,
}

impl ManualClock {
    pub fn pending(&self) -> Option<FrameHandle> {
        self.pending
    }
}

impl FrameClock for ManualClock {
    fn request_frame(&mut self) -> FrameHandle {
        self.next += 1;
        self.requests += 1;
        let handle = FrameHandle::new(self.next);
        self.pending = Some(handle);
        handle
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        if self.pending == Some(handle) {
            self.pending = None;
            self.cancellations += 1;
        }
    }

    fn take_due(&mut self) -> Option<FrameHandle> {
        self.pending.take()
    }
}
