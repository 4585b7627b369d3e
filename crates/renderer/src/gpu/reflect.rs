//! GLSL front end helpers built on naga: stage diagnostics and the binding
//! reflection the wgpu backend uses in place of GL location queries.

use std::collections::{BTreeMap, HashMap};

use wgpu::naga;
use wgpu::naga::front::glsl::{Frontend, Options};
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::backend::UniformLocation;
use crate::source::StageKind;

pub(crate) fn naga_stage(kind: StageKind) -> naga::ShaderStage {
    match kind {
        StageKind::Vertex => naga::ShaderStage::Vertex,
        StageKind::Fragment => naga::ShaderStage::Fragment,
    }
}

/// Parses and validates one stage. The error is the front end's rendered
/// report, suitable for showing verbatim.
pub(crate) fn parse_stage(kind: StageKind, source: &str) -> Result<naga::Module, String> {
    let mut frontend = Frontend::default();
    let module = frontend
        .parse(&Options::from(naga_stage(kind)), source)
        .map_err(|errors| errors.emit_to_string(source))?;
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|error| error.emit_to_string(source))?;
    Ok(module)
}

/// Externally visible inputs of one compiled stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StageInterface {
    /// Vertex inputs by name.
    pub attributes: HashMap<String, u32>,
    /// Uniform buffer size in bytes per binding in set 0.
    pub blocks: BTreeMap<u32, u32>,
    /// Uniform members by name.
    pub uniforms: HashMap<String, UniformLocation>,
    /// Reasons this stage cannot be linked by this backend.
    pub unsupported: Vec<String>,
}

pub(crate) fn reflect(module: &naga::Module) -> StageInterface {
    let mut interface = StageInterface::default();

    for entry in &module.entry_points {
        for argument in &entry.function.arguments {
            if let (Some(name), Some(naga::Binding::Location { location, .. })) =
                (&argument.name, &argument.binding)
            {
                interface.attributes.insert(name.clone(), *location);
            }
        }
    }

    for (_, global) in module.global_variables.iter() {
        let label = global.name.as_deref().unwrap_or("<unnamed>");
        match global.space {
            naga::AddressSpace::Uniform => {
                let Some(binding) = &global.binding else {
                    continue;
                };
                if binding.group != 0 {
                    interface.unsupported.push(format!(
                        "uniform block `{label}` uses set {}; only set 0 is supported",
                        binding.group
                    ));
                    continue;
                }
                let inner = &module.types[global.ty].inner;
                let size = match inner {
                    naga::TypeInner::Struct { members, span } => {
                        for member in members {
                            if let Some(name) = &member.name {
                                interface.uniforms.insert(
                                    name.clone(),
                                    UniformLocation {
                                        binding: binding.binding,
                                        offset: member.offset,
                                    },
                                );
                            }
                        }
                        *span
                    }
                    other => {
                        if let Some(name) = &global.name {
                            interface.uniforms.insert(
                                name.clone(),
                                UniformLocation {
                                    binding: binding.binding,
                                    offset: 0,
                                },
                            );
                        }
                        other.size(module.to_ctx())
                    }
                };
                let slot = interface.blocks.entry(binding.binding).or_insert(0);
                *slot = (*slot).max(size);
            }
            naga::AddressSpace::Handle => interface
                .unsupported
                .push(format!("texture and sampler uniforms are not supported (`{label}`)")),
            naga::AddressSpace::PushConstant | naga::AddressSpace::Storage { .. } => interface
                .unsupported
                .push(format!("`{label}` uses an unsupported resource kind")),
            _ => {}
        }
    }

    interface
}

/// Combined view of both stages of a program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProgramInterface {
    pub attributes: HashMap<String, u32>,
    pub blocks: BTreeMap<u32, u32>,
    pub uniforms: HashMap<String, UniformLocation>,
}

/// Merges the two stage interfaces, failing like a linker would when they
/// disagree or use resources this backend cannot bind.
pub(crate) fn link_interfaces(
    vertex: &StageInterface,
    fragment: &StageInterface,
) -> Result<ProgramInterface, String> {
    let unsupported: Vec<&str> = vertex
        .unsupported
        .iter()
        .chain(&fragment.unsupported)
        .map(String::as_str)
        .collect();
    if !unsupported.is_empty() {
        return Err(unsupported.join("\n"));
    }

    let mut uniforms = vertex.uniforms.clone();
    for (name, location) in &fragment.uniforms {
        match uniforms.get(name) {
            Some(existing) if existing != location => {
                return Err(format!(
                    "uniform `{name}` is declared differently in the vertex and fragment stages"
                ));
            }
            Some(_) => {}
            None => {
                uniforms.insert(name.clone(), *location);
            }
        }
    }

    let mut blocks = vertex.blocks.clone();
    for (binding, size) in &fragment.blocks {
        let slot = blocks.entry(*binding).or_insert(0);
        *slot = (*slot).max(*size);
    }

    Ok(ProgramInterface {
        attributes: vertex.attributes.clone(),
        blocks,
        uniforms,
    })
}
