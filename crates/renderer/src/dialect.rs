//! Lowering of WebGL-style GLSL into the GLSL 450 dialect accepted by the wgpu
//! front end.
//!
//! Generators frequently emit GLSL ES 1.00 (`attribute`, `varying`, loose
//! `uniform` declarations, `gl_FragColor`) and sometimes GLSL ES 3.00
//! (`#version 300 es` with `in`/`out`). Neither is accepted as-is, so the
//! lowering does what a GL driver would do implicitly:
//!
//! 1. `#version`, `#extension` and `precision` statements are blanked.
//! 2. Vertex inputs get explicit locations in order of appearance.
//! 3. Stage interface variables get locations from the sorted union of names
//!    in both stages, so a vertex output and fragment input with the same name
//!    always meet at the same location.
//! 4. Each loose non-opaque `uniform` moves into its own std140 block whose
//!    binding is shared across both stages. Blocks have no instance name, so
//!    the uniform keeps its original identifier.
//! 5. ES 1.00 `gl_FragColor` is renamed to an explicit `location = 0` output;
//!    ES 3.00 fragment outputs get locations in order of appearance.
//!
//! Declarations are rewritten statement by statement in place and the
//! injected header ends with `#line 1`, so driver diagnostics keep pointing at
//! the original lines. Desktop GLSL passes through untouched.

use std::collections::BTreeSet;
use std::fmt;

use crate::source::{StageKind, StagePair};

const ES3_VERSION: u32 = 300;
const FRAG_COLOR: &str = "gl_FragColor";
const FRAG_COLOR_OUTPUT: &str = "zenith_FragColor";

/// Returns the pair rewritten for the GLSL 450 front end.
pub fn lower_stage_pair(pair: &StagePair) -> StagePair {
    let vertex_dialect = Dialect::detect(&pair.vertex);
    let fragment_dialect = Dialect::detect(&pair.fragment);
    if !vertex_dialect.needs_lowering() && !fragment_dialect.needs_lowering() {
        return pair.clone();
    }

    let layout = InterfaceLayout::new(
        &collect_declarations(StageKind::Vertex, vertex_dialect, &pair.vertex),
        &collect_declarations(StageKind::Fragment, fragment_dialect, &pair.fragment),
    );
    StagePair {
        vertex: lower_stage(StageKind::Vertex, vertex_dialect, &pair.vertex, &layout),
        fragment: lower_stage(StageKind::Fragment, fragment_dialect, &pair.fragment, &layout),
    }
}

/// The GLSL flavour a stage is written in, judged by its `#version` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// GLSL ES 1.00: no directive, or a version below 300.
    Legacy,
    /// `#version 300 es` and later ES versions.
    Es3,
    /// Any other directive; handed to the front end unchanged.
    Desktop,
}

impl Dialect {
    pub fn detect(source: &str) -> Self {
        let Some(directive) = source
            .lines()
            .map(str::trim_start)
            .find(|line| line.starts_with("#version"))
        else {
            return Self::Legacy;
        };
        let mut tokens = directive.trim_start_matches("#version").split_whitespace();
        match tokens.next().and_then(|number| number.parse::<u32>().ok()) {
            Some(number) if number >= ES3_VERSION => {
                if tokens.next() == Some("es") {
                    Self::Es3
                } else {
                    Self::Desktop
                }
            }
            _ => Self::Legacy,
        }
    }

    pub fn needs_lowering(self) -> bool {
        self != Self::Desktop
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Legacy => "legacy GLSL ES 1.00",
            Self::Es3 => "GLSL ES 3.00",
            Self::Desktop => "desktop GLSL",
        })
    }
}

/// Storage qualifiers after mapping ES 3.00 `in`/`out` onto their ES 1.00
/// meaning for the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Attribute,
    Varying,
    Uniform,
    FragOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Declaration {
    qualifier: Qualifier,
    /// Interpolation and invariance qualifiers, each followed by a space.
    interpolation: String,
    ty: String,
    names: Vec<String>,
}

impl Declaration {
    fn is_opaque(&self) -> bool {
        ["sampler", "image", "texture"]
            .iter()
            .any(|prefix| self.ty.starts_with(prefix))
    }
}

/// Binding and location assignments shared by both stages.
#[derive(Debug, Default)]
struct InterfaceLayout {
    uniforms: Vec<String>,
    varyings: Vec<String>,
}

impl InterfaceLayout {
    fn new(vertex: &[Declaration], fragment: &[Declaration]) -> Self {
        let mut uniforms: Vec<String> = Vec::new();
        let mut varyings = BTreeSet::new();
        for decl in vertex.iter().chain(fragment.iter()) {
            match decl.qualifier {
                Qualifier::Uniform if !decl.is_opaque() => {
                    for name in &decl.names {
                        let base = base_name(name).to_string();
                        if !uniforms.contains(&base) {
                            uniforms.push(base);
                        }
                    }
                }
                Qualifier::Varying => {
                    varyings.extend(decl.names.iter().map(|name| base_name(name).to_string()));
                }
                _ => {}
            }
        }
        Self {
            uniforms,
            varyings: varyings.into_iter().collect(),
        }
    }

    fn uniform_binding(&self, name: &str) -> Option<usize> {
        let base = base_name(name);
        self.uniforms.iter().position(|candidate| candidate == base)
    }

    fn varying_location(&self, name: &str) -> Option<usize> {
        let base = base_name(name);
        self.varyings.iter().position(|candidate| candidate == base)
    }
}

fn lower_stage(stage: StageKind, dialect: Dialect, source: &str, layout: &InterfaceLayout) -> String {
    if !dialect.needs_lowering() {
        return source.to_string();
    }

    let mut lowering = StageLowering {
        stage,
        dialect,
        layout,
        header: String::from("#version 450\n"),
        next_attribute: 0,
        next_output: 0,
    };
    if lowering.renames_frag_color() {
        lowering.header.push_str(&format!(
            "layout(location = 0) out vec4 {FRAG_COLOR_OUTPUT};\n"
        ));
    }

    let mut body = String::with_capacity(source.len() + 64);
    for line in source.lines() {
        body.push_str(&lowering.line(line));
        body.push('\n');
    }
    format!("{}#line 1\n{body}", lowering.header)
}

struct StageLowering<'a> {
    stage: StageKind,
    dialect: Dialect,
    layout: &'a InterfaceLayout,
    header: String,
    next_attribute: usize,
    next_output: usize,
}

impl StageLowering<'_> {
    fn renames_frag_color(&self) -> bool {
        self.stage == StageKind::Fragment && self.dialect == Dialect::Legacy
    }

    /// Lowers one source line. The result never contains a newline.
    fn line(&mut self, line: &str) -> String {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#version") || trimmed.starts_with("#extension") {
            return String::new();
        }

        let lowered = if trimmed.starts_with('#') {
            line.to_string()
        } else {
            let (code, comment) = split_comment(line);
            let mut lowered = String::with_capacity(line.len());
            for statement in code.split_inclusive(';') {
                lowered.push_str(&self.statement(statement));
            }
            lowered.push_str(comment);
            lowered
        };

        if self.renames_frag_color() {
            replace_identifier(&lowered, FRAG_COLOR, FRAG_COLOR_OUTPUT)
        } else {
            lowered
        }
    }

    fn statement(&mut self, statement: &str) -> String {
        let code = statement.trim_start();
        let indent = &statement[..statement.len() - code.len()];
        let code = code.trim_end();
        if code.starts_with("precision ") && code.ends_with(';') {
            return indent.to_string();
        }
        match parse_declaration(self.stage, self.dialect, code)
            .and_then(|decl| self.rewrite(&decl))
        {
            Some(rewritten) => format!("{indent}{rewritten}"),
            None => statement.to_string(),
        }
    }

    /// Produces the in-place replacement for a declaration, pushing any
    /// uniform blocks into the header. `None` keeps the original text.
    fn rewrite(&mut self, decl: &Declaration) -> Option<String> {
        let ty = &decl.ty;
        let interpolation = &decl.interpolation;
        let mut parts = Vec::with_capacity(decl.names.len());
        match decl.qualifier {
            Qualifier::Uniform => {
                if decl.is_opaque() {
                    return None;
                }
                for name in &decl.names {
                    let binding = self.layout.uniform_binding(name)?;
                    self.header.push_str(&format!(
                        "layout(std140, set = 0, binding = {binding}) uniform ZenithUniform{binding} {{ {ty} {name}; }};\n"
                    ));
                }
            }
            Qualifier::Attribute => {
                if self.stage != StageKind::Vertex {
                    return None;
                }
                for name in &decl.names {
                    let location = self.next_attribute;
                    self.next_attribute += 1;
                    parts.push(format!("layout(location = {location}) {interpolation}in {ty} {name};"));
                }
            }
            Qualifier::Varying => {
                let direction = match self.stage {
                    StageKind::Vertex => "out",
                    StageKind::Fragment => "in",
                };
                for name in &decl.names {
                    let location = self.layout.varying_location(name)?;
                    parts.push(format!(
                        "layout(location = {location}) {interpolation}{direction} {ty} {name};"
                    ));
                }
            }
            Qualifier::FragOutput => {
                for name in &decl.names {
                    let location = self.next_output;
                    self.next_output += 1;
                    parts.push(format!("layout(location = {location}) {interpolation}out {ty} {name};"));
                }
            }
        }
        Some(parts.join(" "))
    }
}

/// Splits a line at its `//` comment, if any.
fn split_comment(line: &str) -> (&str, &str) {
    match line.find("//") {
        Some(index) => line.split_at(index),
        None => (line, ""),
    }
}

/// Every `;`-terminated statement outside preprocessor lines and comments.
fn statements(source: &str) -> impl Iterator<Item = &str> {
    source
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| split_comment(line).0.split_inclusive(';'))
        .map(str::trim)
}

fn collect_declarations(stage: StageKind, dialect: Dialect, source: &str) -> Vec<Declaration> {
    if !dialect.needs_lowering() {
        return Vec::new();
    }
    statements(source)
        .filter_map(|statement| parse_declaration(stage, dialect, statement))
        .collect()
}

/// Parses one declaration statement such as `uniform highp vec2 resolution;`
/// or `flat out int id;`.
fn parse_declaration(stage: StageKind, dialect: Dialect, statement: &str) -> Option<Declaration> {
    let statement = statement.strip_suffix(';')?;
    if statement.contains(|ch: char| matches!(ch, ';' | '{' | '(')) {
        return None;
    }

    let mut tokens = statement.split_whitespace().peekable();
    let mut interpolation = String::new();
    while let Some(token) = tokens.next_if(|token| {
        matches!(*token, "flat" | "smooth" | "noperspective" | "centroid" | "invariant")
    }) {
        interpolation.push_str(token);
        interpolation.push(' ');
    }

    let qualifier = match (dialect, tokens.next()?) {
        (_, "uniform") => Qualifier::Uniform,
        (Dialect::Legacy, "attribute") => Qualifier::Attribute,
        (Dialect::Legacy, "varying") => Qualifier::Varying,
        (Dialect::Es3, "in") => match stage {
            StageKind::Vertex => Qualifier::Attribute,
            StageKind::Fragment => Qualifier::Varying,
        },
        (Dialect::Es3, "out") => match stage {
            StageKind::Vertex => Qualifier::Varying,
            StageKind::Fragment => Qualifier::FragOutput,
        },
        _ => return None,
    };
    let ty = tokens
        .by_ref()
        .find(|token| !matches!(*token, "lowp" | "mediump" | "highp"))?
        .to_string();
    let rest = tokens.collect::<Vec<_>>().join(" ");
    let names = rest
        .split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>();
    if names.is_empty() {
        return None;
    }

    Some(Declaration {
        qualifier,
        interpolation,
        ty,
        names,
    })
}

fn base_name(name: &str) -> &str {
    name.split('[').next().unwrap_or(name).trim()
}

/// Replaces whole-identifier occurrences of `from` with `to`.
fn replace_identifier(line: &str, from: &str, to: &str) -> String {
    let mut result = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(index) = rest.find(from) {
        let before = rest[..index].chars().next_back();
        let after = rest[index + from.len()..].chars().next();
        let is_identifier = |ch: Option<char>| ch.is_some_and(|c| c.is_alphanumeric() || c == '_');
        result.push_str(&rest[..index]);
        if is_identifier(before) || is_identifier(after) {
            result.push_str(from);
        } else {
            result.push_str(to);
        }
        rest = &rest[index + from.len()..];
    }
    result.push_str(rest);
    result
}
