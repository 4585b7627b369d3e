use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::sync::Arc;

use anyhow::Result;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::backend::{
    AttributeLocation, DrawError, GeometryId, GraphicsBackend, ProgramId, StageId, UniformLocation,
};
use crate::error::ResourceError;
use crate::source::StageKind;

use super::context::GpuContext;
use super::reflect::{self, link_interfaces, naga_stage, ProgramInterface, StageInterface};

/// Clip-space corners of the full-viewport quad as a triangle strip.
const QUAD_VERTICES: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
const QUAD_VERTEX_COUNT: u32 = 4;
const UNIFORM_ALIGNMENT: u64 = 16;

struct StageObject {
    kind: StageKind,
    module: wgpu::ShaderModule,
    interface: StageInterface,
}

struct UniformBlock {
    buffer: wgpu::Buffer,
    staging: Vec<u8>,
    dirty: bool,
}

struct ProgramObject {
    pipeline: wgpu::RenderPipeline,
    bind_group: Option<wgpu::BindGroup>,
    blocks: BTreeMap<u32, UniformBlock>,
    interface: ProgramInterface,
}

struct GeometryObject {
    buffer: wgpu::Buffer,
    feeds_position: bool,
}

#[derive(Default)]
struct ResourceTable {
    next_id: u64,
    stages: HashMap<StageId, StageObject>,
    programs: HashMap<ProgramId, ProgramObject>,
    geometries: HashMap<GeometryId, GeometryObject>,
}

impl ResourceTable {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// [`GraphicsBackend`] drawing into a winit window through wgpu.
pub struct WgpuBackend {
    window: Arc<Window>,
    context: GpuContext,
    resources: ResourceTable,
    current_program: Option<ProgramId>,
    current_geometry: Option<GeometryId>,
}

impl WgpuBackend {
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let context = GpuContext::new(Arc::clone(&window))?;
        Ok(Self {
            window,
            context,
            resources: ResourceTable::default(),
            current_program: None,
            current_geometry: None,
        })
    }

    /// Runs `create` inside a validation error scope and returns the
    /// captured error text, if any.
    fn validated<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.context
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.context.device);
        match pollster::block_on(self.context.device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }

    fn create_pipeline(
        &self,
        vertex: &StageObject,
        fragment: &StageObject,
        interface: &ProgramInterface,
    ) -> Result<(wgpu::RenderPipeline, Option<wgpu::BindGroupLayout>), String> {
        let format = self.context.format();
        let position = interface.attributes.get(crate::program::POSITION_ATTRIBUTE).copied();

        self.validated(|device| {
            let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = interface
                .blocks
                .iter()
                .map(|(binding, size)| wgpu::BindGroupLayoutEntry {
                    binding: *binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(u64::from(*size)),
                    },
                    count: None,
                })
                .collect();
            let bind_group_layout = (!layout_entries.is_empty()).then(|| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("zenith uniform layout"),
                    entries: &layout_entries,
                })
            });
            let bind_group_layouts: Vec<&wgpu::BindGroupLayout> =
                bind_group_layout.iter().collect();
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("zenith pipeline layout"),
                bind_group_layouts: &bind_group_layouts,
                push_constant_ranges: &[],
            });

            let attributes: Vec<wgpu::VertexAttribute> = position
                .map(|location| wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x2,
                    offset: 0,
                    shader_location: location,
                })
                .into_iter()
                .collect();
            let buffers: Vec<wgpu::VertexBufferLayout> = if attributes.is_empty() {
                Vec::new()
            } else {
                vec![wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }]
            };

            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("zenith program"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex.module,
                    entry_point: Some("main"),
                    buffers: &buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment.module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });
            (pipeline, bind_group_layout)
        })
    }

    fn create_uniforms(
        &self,
        layout: Option<&wgpu::BindGroupLayout>,
        interface: &ProgramInterface,
    ) -> (Option<wgpu::BindGroup>, BTreeMap<u32, UniformBlock>) {
        let device = &self.context.device;
        let blocks: BTreeMap<u32, UniformBlock> = interface
            .blocks
            .iter()
            .map(|(binding, size)| {
                let size = u64::from(*size).max(1).div_ceil(UNIFORM_ALIGNMENT) * UNIFORM_ALIGNMENT;
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("zenith uniform block"),
                    size,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let block = UniformBlock {
                    buffer,
                    staging: vec![0; size as usize],
                    dirty: true,
                };
                (*binding, block)
            })
            .collect();

        let bind_group = layout.map(|layout| {
            let entries: Vec<wgpu::BindGroupEntry> = blocks
                .iter()
                .map(|(binding, block)| wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: block.buffer.as_entire_binding(),
                })
                .collect();
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("zenith uniform bind group"),
                layout,
                entries: &entries,
            })
        });
        (bind_group, blocks)
    }

    fn write_uniform(&mut self, location: UniformLocation, bytes: &[u8]) {
        let Some(program) = self
            .current_program
            .and_then(|id| self.resources.programs.get_mut(&id))
        else {
            return;
        };
        let Some(block) = program.blocks.get_mut(&location.binding) else {
            return;
        };
        let start = location.offset as usize;
        let Some(slot) = block.staging.get_mut(start..start + bytes.len()) else {
            tracing::warn!(?location, "uniform write outside its block; ignored");
            return;
        };
        slot.copy_from_slice(bytes);
        block.dirty = true;
    }
}

impl GraphicsBackend for WgpuBackend {
    fn compile_stage(&mut self, kind: StageKind, source: &str) -> Result<StageId, String> {
        let module = reflect::parse_stage(kind, source)?;
        let interface = reflect::reflect(&module);

        let shader = self.validated(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(match kind {
                    StageKind::Vertex => "zenith vertex stage",
                    StageKind::Fragment => "zenith fragment stage",
                }),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Owned(source.to_string()),
                    stage: naga_stage(kind),
                    defines: &[],
                },
            })
        })?;

        let id = StageId(self.resources.allocate());
        self.resources.stages.insert(
            id,
            StageObject {
                kind,
                module: shader,
                interface,
            },
        );
        tracing::trace!(stage = id.0, %kind, "stage compiled");
        Ok(id)
    }

    fn release_stage(&mut self, stage: StageId) {
        self.resources.stages.remove(&stage);
    }

    fn link_program(&mut self, vertex: StageId, fragment: StageId) -> Result<ProgramId, String> {
        let (Some(vertex), Some(fragment)) = (
            self.resources.stages.get(&vertex),
            self.resources.stages.get(&fragment),
        ) else {
            return Err("attempted to link a released shader stage".to_string());
        };
        if vertex.kind != StageKind::Vertex || fragment.kind != StageKind::Fragment {
            return Err("shader stages attached in the wrong slots".to_string());
        }

        let interface = link_interfaces(&vertex.interface, &fragment.interface)?;
        let (pipeline, layout) = self.create_pipeline(vertex, fragment, &interface)?;
        let (bind_group, blocks) = self.create_uniforms(layout.as_ref(), &interface);

        let id = ProgramId(self.resources.allocate());
        self.resources.programs.insert(
            id,
            ProgramObject {
                pipeline,
                bind_group,
                blocks,
                interface,
            },
        );
        Ok(id)
    }

    fn release_program(&mut self, program: ProgramId) {
        self.resources.programs.remove(&program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation> {
        let program = self.resources.programs.get(&program)?;
        program
            .interface
            .attributes
            .get(name)
            .map(|location| AttributeLocation(*location))
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let program = self.resources.programs.get(&program)?;
        program.interface.uniforms.get(name).copied()
    }

    fn create_quad(
        &mut self,
        program: ProgramId,
        position: Option<AttributeLocation>,
    ) -> Result<GeometryId, ResourceError> {
        if !self.resources.programs.contains_key(&program) {
            return Err(ResourceError::Allocation {
                what: "quad vertex buffer",
                reason: format!("program {} is not live", program.0),
            });
        }
        let buffer = self
            .validated(|device| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("zenith quad"),
                    contents: bytemuck::cast_slice(&QUAD_VERTICES),
                    usage: wgpu::BufferUsages::VERTEX,
                })
            })
            .map_err(|reason| ResourceError::Allocation {
                what: "quad vertex buffer",
                reason,
            })?;

        let id = GeometryId(self.resources.allocate());
        self.resources.geometries.insert(
            id,
            GeometryObject {
                buffer,
                feeds_position: position.is_some(),
            },
        );
        Ok(id)
    }

    fn release_geometry(&mut self, geometry: GeometryId) {
        self.resources.geometries.remove(&geometry);
        if self.current_geometry == Some(geometry) {
            self.current_geometry = None;
        }
    }

    fn display_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn backing_size(&self) -> (u32, u32) {
        self.context.size()
    }

    fn resize_backing(&mut self, width: u32, height: u32) {
        tracing::debug!(width, height, "resizing surface");
        self.context.resize(width, height);
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
    }

    fn bind_quad(&mut self, geometry: GeometryId) {
        self.current_geometry = Some(geometry);
    }

    fn set_uniform_f32(&mut self, location: UniformLocation, value: f32) {
        self.write_uniform(location, bytemuck::bytes_of(&value));
    }

    fn set_uniform_vec2(&mut self, location: UniformLocation, value: [f32; 2]) {
        self.write_uniform(location, bytemuck::cast_slice(&value));
    }

    fn draw_quad(&mut self) -> Result<(), DrawError> {
        let program_id = self
            .current_program
            .ok_or_else(|| DrawError::Fatal(ResourceError::Context("no program in use".into())))?;
        let program = self.resources.programs.get_mut(&program_id).ok_or_else(|| {
            DrawError::Fatal(ResourceError::Context(format!(
                "program {} was released",
                program_id.0
            )))
        })?;
        let geometry = self
            .current_geometry
            .and_then(|id| self.resources.geometries.get(&id));

        let frame = match self.context.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                return Err(DrawError::SurfaceLost)
            }
            Err(wgpu::SurfaceError::Timeout) => return Err(DrawError::SurfaceTimeout),
            Err(err) => return Err(ResourceError::Surface(err.to_string()).into()),
        };

        for block in program.blocks.values_mut().filter(|block| block.dirty) {
            self.context.queue.write_buffer(&block.buffer, 0, &block.staging);
            block.dirty = false;
        }

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("zenith frame"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("zenith quad pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            if let Some(bind_group) = &program.bind_group {
                pass.set_bind_group(0, bind_group, &[]);
            }
            if let Some(geometry) = geometry.filter(|geometry| geometry.feeds_position) {
                pass.set_vertex_buffer(0, geometry.buffer.slice(..));
            }
            pass.draw(0..QUAD_VERTEX_COUNT, 0..1);
        }

        self.context.queue.submit(Some(encoder.finish()));
        self.window.pre_present_notify();
        frame.present();
        Ok(())
    }
}
