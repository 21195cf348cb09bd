//! Serde model of the embedded pipeline block.
//!
//! Types:
//!
//! - `PipelineConfig` is the root mapping: samplers, programs, plugins, the optional substep
//!   schedule and the offscreen render options.
//! - `SamplerSpec` describes a static image or a framebuffer render target, including the
//!   texture parameters shared by both kinds.
//! - `ProgramSpec` describes one render or compute pass and the samplers it reads.
//! - `SubstepSpec` and `SubstepTask` describe the inner iteration loop.
//! - `PluginSpec` keeps plugin parameters as an opaque YAML value for the runtime to decode.
//! - `SizeSpec` and `Extent3` hold sizes made of literals or `W`/`H` expressions.
//!
//! Functions:
//!
//! - `PipelineConfig::validate` returns human-readable issues for dangling references and
//!   malformed sizes without touching any GPU state.
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::expr::{split_list, Dim, ExprError, Viewport};

/// Output name that targets the host-provided framebuffer.
pub const DEFAULT_OUTPUT: &str = "$default";
/// Entry point used when a shader carries no configuration block.
pub const DEFAULT_ENTRY: &str = "mainImage";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub samplers: Vec<SamplerSpec>,
    #[serde(default)]
    pub programs: Vec<ProgramSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substep: Option<SubstepSpec>,
    #[serde(default)]
    pub offscreen_option: OffscreenOption,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerSpec {
    pub name: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: SamplerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub size: SizeSpec,
    #[serde(default)]
    pub internal_format: InternalFormat,
    #[serde(default = "default_true", alias = "double_buffered")]
    pub double_buffering: bool,
    #[serde(default)]
    pub wrap: WrapMode,
    #[serde(default)]
    pub filter: FilterMode,
    #[serde(default)]
    pub mipmap: bool,
    #[serde(default)]
    pub y_flip: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    #[serde(alias = "image")]
    File,
    Framebuffer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    #[default]
    Clamp,
    Repeat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Color attachment formats accepted for framebuffer samplers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InternalFormat {
    #[default]
    #[serde(rename = "GL_RGBA8")]
    Rgba8,
    #[serde(rename = "GL_R8")]
    R8,
    #[serde(rename = "GL_RG8")]
    Rg8,
    #[serde(rename = "GL_RGBA16F")]
    Rgba16F,
    #[serde(rename = "GL_R32F")]
    R32F,
    #[serde(rename = "GL_RG32F")]
    Rg32F,
    #[serde(rename = "GL_RGBA32F")]
    Rgba32F,
}

impl InternalFormat {
    pub fn is_float(self) -> bool {
        matches!(self, Self::Rgba16F | Self::R32F | Self::Rg32F | Self::Rgba32F)
    }
}

/// Framebuffer size: the viewport (`$default`) or two explicit dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SizeSpec {
    #[default]
    Viewport,
    Explicit([Dim; 2]),
}

impl SizeSpec {
    pub fn resolve(&self, viewport: Viewport) -> Result<Viewport, ExprError> {
        match self {
            SizeSpec::Viewport => Ok(viewport),
            SizeSpec::Explicit([width, height]) => Ok(Viewport::new(
                width.resolve(viewport)?,
                height.resolve(viewport)?,
            )),
        }
    }

    fn check(&self) -> Result<(), ExprError> {
        match self {
            SizeSpec::Viewport => Ok(()),
            SizeSpec::Explicit(dims) => dims.iter().try_for_each(Dim::check),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDims {
    List(Vec<Dim>),
    Text(String),
}

impl<'de> Deserialize<'de> for SizeSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let dims = match RawDims::deserialize(deserializer)? {
            RawDims::Text(text) if text.trim() == DEFAULT_OUTPUT => return Ok(SizeSpec::Viewport),
            RawDims::Text(text) => split_list(&text),
            RawDims::List(dims) => dims,
        };
        let found = dims.len();
        let [width, height]: [Dim; 2] = dims.try_into().map_err(|_| {
            de::Error::custom(format!(
                "size expects '$default' or two dimensions, found {found}"
            ))
        })?;
        Ok(SizeSpec::Explicit([width, height]))
    }
}

impl Serialize for SizeSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            SizeSpec::Viewport => serializer.serialize_str(DEFAULT_OUTPUT),
            SizeSpec::Explicit(dims) => dims.serialize(serializer),
        }
    }
}

/// A three component size, used for compute `global_size` and `local_size`.
///
/// Shorter lists are padded with `1`, so `[64]` means `[64, 1, 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent3(pub [Dim; 3]);

impl Extent3 {
    pub fn literal(x: i64, y: i64, z: i64) -> Self {
        Self([Dim::Literal(x), Dim::Literal(y), Dim::Literal(z)])
    }

    pub fn resolve(&self, viewport: Viewport) -> Result<[u32; 3], ExprError> {
        let [x, y, z] = &self.0;
        Ok([
            x.resolve(viewport)?,
            y.resolve(viewport)?,
            z.resolve(viewport)?,
        ])
    }

    pub fn uses_viewport(&self) -> bool {
        self.0.iter().any(Dim::uses_viewport)
    }

    fn check(&self) -> Result<(), ExprError> {
        self.0.iter().try_for_each(Dim::check)
    }

    fn from_dims(mut dims: Vec<Dim>) -> Result<Self, usize> {
        let found = dims.len();
        if found == 0 || found > 3 {
            return Err(found);
        }
        dims.resize(3, Dim::Literal(1));
        let [x, y, z]: [Dim; 3] = dims.try_into().map_err(|_| found)?;
        Ok(Self([x, y, z]))
    }
}

impl fmt::Display for Extent3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = &self.0;
        write!(f, "[{x}, {y}, {z}]")
    }
}

impl<'de> Deserialize<'de> for Extent3 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let dims = match RawDims::deserialize(deserializer)? {
            RawDims::Text(text) => split_list(&text),
            RawDims::List(dims) => dims,
        };
        Extent3::from_dims(dims).map_err(|found| {
            de::Error::custom(format!("expected 1 to 3 size components, found {found}"))
        })
    }
}

impl Serialize for Extent3 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(3))?;
        for dim in &self.0 {
            seq.serialize_element(dim)?;
        }
        seq.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSpec {
    pub name: String,
    #[serde(rename = "type", alias = "kind", default)]
    pub kind: ProgramKind,
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default)]
    pub samplers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_size: Option<Extent3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_size: Option<Extent3>,
    #[serde(default)]
    pub substep: bool,
}

fn default_output() -> String {
    DEFAULT_OUTPUT.to_string()
}

impl ProgramSpec {
    /// A render pass reading the given samplers and writing `output`.
    pub fn render(name: impl Into<String>, output: impl Into<String>, samplers: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: ProgramKind::Render,
            output: output.into(),
            samplers: samplers.iter().map(|s| s.to_string()).collect(),
            global_size: None,
            local_size: None,
            substep: false,
        }
    }

    pub fn targets_default(&self) -> bool {
        self.output == DEFAULT_OUTPUT
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramKind {
    #[default]
    #[serde(alias = "fragment")]
    Render,
    Compute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstepSpec {
    pub num_iter: u32,
    #[serde(default)]
    pub schedule: Vec<SubstepTask>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SubstepTask {
    Program { name: String },
    Sampler { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_norway::Value,
}

impl PluginSpec {
    /// Texture and cubemap plugins expose their uniform name so programs may list it as an
    /// input.
    pub fn exposed_sampler(&self) -> Option<&str> {
        let kind = self.kind.trim();
        if !kind.eq_ignore_ascii_case("texture") && !kind.eq_ignore_ascii_case("cubemap") {
            return None;
        }
        self.params.get("name").and_then(|name| name.as_str())
    }

    pub fn is_cubemap(&self) -> bool {
        self.kind.trim().eq_ignore_ascii_case("cubemap")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffscreenOption {
    #[serde(default = "default_fps")]
    pub fps: f32,
    #[serde(default = "default_num_frames")]
    pub num_frames: u32,
}

fn default_fps() -> f32 {
    60.0
}

fn default_num_frames() -> u32 {
    1
}

impl Default for OffscreenOption {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            num_frames: default_num_frames(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::default_pipeline()
    }
}

impl PipelineConfig {
    /// Single `mainImage` pass drawing to the default framebuffer with no inputs.
    pub fn default_pipeline() -> Self {
        Self {
            samplers: Vec::new(),
            programs: vec![ProgramSpec::render(DEFAULT_ENTRY, DEFAULT_OUTPUT, &[])],
            plugins: Vec::new(),
            substep: None,
            offscreen_option: OffscreenOption::default(),
        }
    }

    /// A block that decoded to nothing: no samplers and no programs.
    pub fn empty() -> Self {
        Self {
            programs: Vec::new(),
            ..Self::default_pipeline()
        }
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, serde_norway::Error> {
        if input.trim().is_empty() {
            return Ok(Self::empty());
        }
        serde_norway::from_str(input)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_norway::Error> {
        serde_norway::to_string(self)
    }

    pub fn sampler(&self, name: &str) -> Option<&SamplerSpec> {
        self.samplers.iter().find(|sampler| sampler.name == name)
    }

    pub fn program(&self, name: &str) -> Option<&ProgramSpec> {
        self.programs.iter().find(|program| program.name == name)
    }

    /// Returns true when `name` resolves to a sampler or a plugin-exposed texture.
    pub fn is_known_input(&self, name: &str) -> bool {
        self.sampler(name).is_some()
            || self
                .plugins
                .iter()
                .any(|plugin| plugin.exposed_sampler() == Some(name))
    }

    /// Names exposed by cubemap plugins that no declared sampler shadows.
    pub fn cubemap_inputs(&self) -> Vec<String> {
        self.plugins
            .iter()
            .filter(|plugin| plugin.is_cubemap())
            .filter_map(PluginSpec::exposed_sampler)
            .filter(|name| self.sampler(name).is_none())
            .map(str::to_string)
            .collect()
    }

    /// Every sampler name referenced by programs or substep tasks, in declaration order.
    pub fn referenced_samplers(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for program in &self.programs {
            names.extend(program.samplers.iter().map(String::as_str));
            if !program.targets_default() {
                names.push(program.output.as_str());
            }
        }
        if let Some(substep) = &self.substep {
            for task in &substep.schedule {
                if let SubstepTask::Sampler { name } = task {
                    names.push(name.as_str());
                }
            }
        }
        names
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        let mut seen = HashSet::new();
        for sampler in &self.samplers {
            if sampler.name.trim().is_empty() {
                issues.push("sampler with empty name".to_string());
            }
            if sampler.name == DEFAULT_OUTPUT {
                issues.push(format!("sampler name '{DEFAULT_OUTPUT}' is reserved"));
            }
            if !seen.insert(sampler.name.as_str()) {
                issues.push(format!("sampler '{}' is declared twice", sampler.name));
            }
            match sampler.kind {
                SamplerKind::File => {
                    if sampler.file.is_none() {
                        issues.push(format!(
                            "sampler '{}' of type file has no 'file' path",
                            sampler.name
                        ));
                    }
                }
                SamplerKind::Framebuffer => {
                    if let Err(err) = sampler.size.check() {
                        issues.push(format!("sampler '{}' size: {err}", sampler.name));
                    }
                }
            }
        }

        let mut programs_seen = HashSet::new();
        for program in &self.programs {
            if !programs_seen.insert(program.name.as_str()) {
                issues.push(format!("program '{}' is declared twice", program.name));
            }
            if !is_identifier(&program.name) {
                issues.push(format!(
                    "program '{}' is not a valid GLSL function name",
                    program.name
                ));
            }
            for input in &program.samplers {
                if !self.is_known_input(input) {
                    issues.push(format!(
                        "program '{}' references sampler '{}' which is undefined",
                        program.name, input
                    ));
                }
            }
            match program.kind {
                ProgramKind::Render => {
                    if !program.targets_default() {
                        match self.sampler(&program.output) {
                            Some(sampler) if sampler.kind == SamplerKind::Framebuffer => {}
                            Some(_) => issues.push(format!(
                                "program '{}' writes to '{}' which is not a framebuffer",
                                program.name, program.output
                            )),
                            None => issues.push(format!(
                                "program '{}' writes to sampler '{}' which is undefined",
                                program.name, program.output
                            )),
                        }
                    }
                }
                ProgramKind::Compute => {
                    if !program.targets_default() {
                        issues.push(format!(
                            "compute program '{}' cannot declare an output",
                            program.name
                        ));
                    }
                    for (field, extent) in [
                        ("global_size", &program.global_size),
                        ("local_size", &program.local_size),
                    ] {
                        match extent {
                            None => issues.push(format!(
                                "compute program '{}' is missing {field}",
                                program.name
                            )),
                            Some(extent) => {
                                if let Err(err) = extent.check() {
                                    issues.push(format!(
                                        "compute program '{}' {field}: {err}",
                                        program.name
                                    ));
                                }
                            }
                        }
                    }
                }
            }
        }

        if let Some(substep) = &self.substep {
            if substep.num_iter == 0 {
                issues.push("substep.num_iter must be at least 1".to_string());
            }
            for task in &substep.schedule {
                match task {
                    SubstepTask::Program { name } => {
                        if self.program(name).is_none() {
                            issues.push(format!(
                                "substep schedule references program '{name}' which is undefined"
                            ));
                        }
                    }
                    SubstepTask::Sampler { name } => match self.sampler(name) {
                        Some(sampler) if sampler.kind == SamplerKind::Framebuffer => {}
                        Some(_) => issues.push(format!(
                            "substep schedule swaps '{name}' which is not a framebuffer"
                        )),
                        None => issues.push(format!(
                            "substep schedule references sampler '{name}' which is undefined"
                        )),
                    },
                }
            }
        }

        if !(self.offscreen_option.fps > 0.0) {
            issues.push("offscreen_option.fps must be positive".to_string());
        }

        issues
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
