//! Program synthesis: wraps the user's entry functions into complete GLSL stages and hands them
//! to the backend.
//!
//! The user source is shared by every pass. Each pass only differs in the generated preamble,
//! which declares the standard uniforms, one `iSampler<i>` per input and a `main` that forwards
//! to the named entry function.
use std::borrow::Cow;
use std::fmt::Write as _;

use passconfig::{Extent3, ProgramKind, ProgramSpec, Viewport};

use crate::backend::GpuBackend;
use crate::error::{BackendError, PassDiagnostic, PipelineError};
use crate::types::{ProgramId, ShaderId, ShaderStage};

pub const GLSL_VERSION: &str = "#version 430 core";

const STANDARD_UNIFORMS: &str = r"uniform float iTime;
uniform int iFrame;
uniform vec3 iResolution;
uniform vec4 iMouse;
uniform uint iKey;
uniform uint iKeyModifiers;
";

/// Fixed vertex stage for render passes; location 0 receives the fullscreen quad corners.
pub const VERTEX_SHADER: &str = r"#version 430 core
layout (location = 0) in vec2 iVertexPosition;
void main() {
  gl_Position = vec4(iVertexPosition, 0.0, 1.0);
}
";

/// Comments out `#version` lines so the generated one stays first, keeping line numbers intact.
fn sanitize(user: &str) -> Cow<'_, str> {
    if !user
        .lines()
        .any(|line| line.trim_start().starts_with("#version"))
    {
        return Cow::Borrowed(user);
    }
    let mut out = String::with_capacity(user.len() + 8);
    for line in user.lines() {
        if line.trim_start().starts_with("#version") {
            out.push_str("// ");
        }
        out.push_str(line);
        out.push('\n');
    }
    Cow::Owned(out)
}

/// GLSL sampler type a pass input is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Texture2D,
    Cube,
}

impl InputType {
    pub fn glsl(self) -> &'static str {
        match self {
            InputType::Texture2D => "sampler2D",
            InputType::Cube => "samplerCube",
        }
    }
}

fn sampler_parts(inputs: &[InputType]) -> (String, String, String) {
    let mut decls = String::new();
    let mut params = String::new();
    let mut args = String::new();
    for (index, input) in inputs.iter().enumerate() {
        let glsl = input.glsl();
        let _ = writeln!(decls, "uniform {glsl} iSampler{index};");
        let _ = write!(params, ", {glsl}");
        let _ = write!(args, ", iSampler{index}");
    }
    (decls, params, args)
}

/// Fragment stage for a render pass reading `samplers` inputs.
pub fn fragment_source(entry: &str, inputs: &[InputType], user: &str) -> String {
    let (decls, params, args) = sampler_parts(inputs);
    format!(
        "{GLSL_VERSION}\n{STANDARD_UNIFORMS}layout (location = 0) out vec4 iMainFragColor;\n\
         {decls}void {entry}(out vec4, vec2{params});\n\
         void main() {{\n  {entry}(iMainFragColor, vec2(gl_FragCoord){args});\n}}\n\
         #line 1\n{user}",
        user = sanitize(user),
    )
}

/// Compute stage with a fixed workgroup size.
pub fn compute_source(
    entry: &str,
    inputs: &[InputType],
    local_size: [u32; 3],
    user: &str,
) -> String {
    let (decls, params, args) = sampler_parts(inputs);
    let [x, y, z] = local_size;
    format!(
        "{GLSL_VERSION}\n\
         layout (local_size_x = {x}, local_size_y = {y}, local_size_z = {z}) in;\n\
         {STANDARD_UNIFORMS}{decls}void {entry}(uvec3, uvec3{params});\n\
         void main() {{\n  {entry}(gl_GlobalInvocationID, gl_LocalInvocationID{args});\n}}\n\
         #line 1\n{user}",
        user = sanitize(user),
    )
}

/// Stage for raster plugins: the whole user source with `COMPILE_<entry>` defined, so one file
/// can carry the vertex, geometry and fragment code of an overlay behind `#ifdef`s.
pub fn raster_stage_source(entry: &str, user: &str) -> String {
    format!(
        "{GLSL_VERSION}\n#define COMPILE_{entry}\n#line 1\n{user}",
        user = sanitize(user)
    )
}

/// Number of workgroups covering `global` invocations per axis.
pub fn workgroup_count(global: [u32; 3], local: [u32; 3]) -> [u32; 3] {
    [
        global[0].div_ceil(local[0].max(1)),
        global[1].div_ceil(local[1].max(1)),
        global[2].div_ceil(local[2].max(1)),
    ]
}

/// Compiles each stage and links them. Shader objects never outlive this call.
pub fn link_stages<B: GpuBackend + ?Sized>(
    backend: &mut B,
    stages: &[(ShaderStage, String)],
) -> Result<ProgramId, BackendError> {
    fn release<B: GpuBackend + ?Sized>(backend: &mut B, shaders: &[ShaderId]) {
        for shader in shaders {
            backend.delete_shader(*shader);
        }
    }

    let mut shaders: Vec<ShaderId> = Vec::with_capacity(stages.len());
    for (stage, source) in stages {
        match backend.compile_shader(*stage, source) {
            Ok(shader) => shaders.push(shader),
            Err(err) => {
                release(backend, &shaders);
                return Err(err);
            }
        }
    }
    let linked = backend.link_program(&shaders);
    release(backend, &shaders);
    linked
}

/// A linked pass ready for the frame executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    pub name: String,
    pub kind: ProgramKind,
    pub program: ProgramId,
    pub local_size: [u32; 3],
    /// Dispatch size for compute passes; `[1, 1, 1]` for render passes.
    pub groups: [u32; 3],
}

/// Compiled passes of one configuration generation, in declaration order.
#[derive(Debug, Default)]
pub struct ProgramTable {
    programs: Vec<CompiledProgram>,
}

impl ProgramTable {
    pub fn get(&self, name: &str) -> Option<&CompiledProgram> {
        self.programs.iter().find(|program| program.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledProgram> {
        self.programs.iter()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Re-resolves compute dispatch sizes for a new viewport.
    pub fn resize(&mut self, specs: &[ProgramSpec], viewport: Viewport) -> Result<(), PipelineError> {
        for compiled in &mut self.programs {
            let Some(spec) = specs.iter().find(|spec| spec.name == compiled.name) else {
                continue;
            };
            if spec.kind == ProgramKind::Compute {
                let global = resolve_extent(spec, "global_size", spec.global_size.as_ref(), viewport)?;
                compiled.groups = workgroup_count(global, compiled.local_size);
            }
        }
        Ok(())
    }

    pub fn release<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for compiled in self.programs.drain(..) {
            backend.destroy_program(compiled.program);
        }
    }
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub programs: ProgramTable,
    pub diagnostics: Vec<PassDiagnostic>,
}

fn resolve_extent(
    spec: &ProgramSpec,
    field: &str,
    extent: Option<&Extent3>,
    viewport: Viewport,
) -> Result<[u32; 3], PipelineError> {
    let extent = extent.ok_or_else(|| {
        PipelineError::invalid(format!(
            "compute program '{}' is missing {field}",
            spec.name
        ))
    })?;
    extent.resolve(viewport).map_err(|err| {
        PipelineError::invalid(format!("compute program '{}' {field}: {err}", spec.name))
    })
}

struct PlannedProgram<'s> {
    spec: &'s ProgramSpec,
    stages: Vec<(ShaderStage, String)>,
    local_size: [u32; 3],
    groups: [u32; 3],
}

/// Synthesizes and builds the programs of a configuration against one user source.
#[derive(Debug, Clone, Copy)]
pub struct ProgramBuilder<'a> {
    source: &'a str,
    viewport: Viewport,
    cubemaps: &'a [String],
}

impl<'a> ProgramBuilder<'a> {
    pub fn new(source: &'a str, viewport: Viewport) -> Self {
        Self {
            source,
            viewport,
            cubemaps: &[],
        }
    }

    /// Input names bound to cube textures; they are declared as `samplerCube`.
    pub fn with_cubemaps(mut self, names: &'a [String]) -> Self {
        self.cubemaps = names;
        self
    }

    fn input_types(&self, spec: &ProgramSpec) -> Vec<InputType> {
        spec.samplers
            .iter()
            .map(|name| {
                if self.cubemaps.contains(name) {
                    InputType::Cube
                } else {
                    InputType::Texture2D
                }
            })
            .collect()
    }

    /// Generated stage sources for one pass, in link order.
    pub fn stages(&self, spec: &ProgramSpec) -> Result<Vec<(ShaderStage, String)>, PipelineError> {
        Ok(self.plan(spec)?.stages)
    }

    fn plan<'s>(&self, spec: &'s ProgramSpec) -> Result<PlannedProgram<'s>, PipelineError> {
        let inputs = self.input_types(spec);
        match spec.kind {
            ProgramKind::Render => Ok(PlannedProgram {
                spec,
                stages: vec![
                    (ShaderStage::Vertex, VERTEX_SHADER.to_string()),
                    (
                        ShaderStage::Fragment,
                        fragment_source(&spec.name, &inputs, self.source),
                    ),
                ],
                local_size: [1, 1, 1],
                groups: [1, 1, 1],
            }),
            ProgramKind::Compute => {
                let local = resolve_extent(spec, "local_size", spec.local_size.as_ref(), self.viewport)?;
                let global =
                    resolve_extent(spec, "global_size", spec.global_size.as_ref(), self.viewport)?;
                Ok(PlannedProgram {
                    spec,
                    stages: vec![(
                        ShaderStage::Compute,
                        compute_source(&spec.name, &inputs, local, self.source),
                    )],
                    local_size: local,
                    groups: workgroup_count(global, local),
                })
            }
        }
    }

    /// Builds every pass.
    ///
    /// Size expressions are resolved for all passes first; any failure there is a configuration
    /// error and nothing is compiled. Compile and link failures are collected per pass and the
    /// remaining passes are still attempted.
    pub fn build_all<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        specs: &[ProgramSpec],
    ) -> Result<BuildReport, PipelineError> {
        let mut planned = Vec::with_capacity(specs.len());
        let mut issues = Vec::new();
        for spec in specs {
            match self.plan(spec) {
                Ok(plan) => planned.push(plan),
                Err(PipelineError::Configuration(passconfig::ConfigError::Invalid(found))) => {
                    issues.extend(found)
                }
                Err(other) => return Err(other),
            }
        }
        if !issues.is_empty() {
            return Err(PipelineError::Configuration(
                passconfig::ConfigError::Invalid(issues),
            ));
        }

        let mut report = BuildReport::default();
        for plan in planned {
            match link_stages(backend, &plan.stages) {
                Ok(program) => {
                    tracing::debug!(pass = %plan.spec.name, %program, "linked program");
                    report.programs.programs.push(CompiledProgram {
                        name: plan.spec.name.clone(),
                        kind: plan.spec.kind,
                        program,
                        local_size: plan.local_size,
                        groups: plan.groups,
                    });
                }
                Err(err) => {
                    let diagnostic = PassDiagnostic::from_backend(&plan.spec.name, err);
                    tracing::warn!(pass = %plan.spec.name, log = %diagnostic.log, "pass failed to build");
                    report.diagnostics.push(diagnostic);
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use passconfig::Dim;

    const USER: &str = "void mainImage(out vec4 c, vec2 p, sampler2D a, sampler2D b) { c = vec4(1); }\n";

    fn compute(name: &str, global: Extent3, local: Extent3) -> ProgramSpec {
        ProgramSpec {
            kind: ProgramKind::Compute,
            global_size: Some(global),
            local_size: Some(local),
            ..ProgramSpec::render(name, passconfig::DEFAULT_OUTPUT, &[])
        }
    }

    #[test]
    fn fragment_preamble_declares_samplers_positionally() {
        let source = fragment_source("mainImage", &[InputType::Texture2D; 2], USER);
        assert!(source.starts_with("#version 430 core\n"));
        assert!(source.contains("uniform sampler2D iSampler0;\nuniform sampler2D iSampler1;\n"));
        assert!(source.contains("void mainImage(out vec4, vec2, sampler2D, sampler2D);"));
        assert!(source.contains("mainImage(iMainFragColor, vec2(gl_FragCoord), iSampler0, iSampler1);"));
        assert!(source.ends_with(USER));
        assert!(!source.contains("iSampler2"));
    }

    #[test]
    fn fragment_without_inputs_has_plain_signature() {
        let source = fragment_source("mainImage", &[], "");
        assert!(source.contains("void mainImage(out vec4, vec2);"));
        assert!(source.contains("mainImage(iMainFragColor, vec2(gl_FragCoord));"));
        assert!(!source.contains("sampler2D"));
    }

    #[test]
    fn compute_preamble_declares_workgroup() {
        let source = compute_source("step", &[InputType::Texture2D], [8, 4, 1], "");
        assert!(source.contains(
            "layout (local_size_x = 8, local_size_y = 4, local_size_z = 1) in;"
        ));
        assert!(source.contains("void step(uvec3, uvec3, sampler2D);"));
        assert!(source.contains("step(gl_GlobalInvocationID, gl_LocalInvocationID, iSampler0);"));
        assert!(source.contains("uniform uint iKeyModifiers;"));
    }

    #[test]
    fn user_version_directive_is_neutralised() {
        let source = fragment_source("mainImage", &[], "#version 330\nvoid mainImage(out vec4 c, vec2 p) {}\n");
        assert_eq!(source.matches("#version").count(), 2);
        assert!(source.contains("// #version 330\n"));
    }

    #[test]
    fn cubemap_inputs_are_declared_as_sampler_cube() {
        let spec = ProgramSpec::render(
            "mainImage",
            passconfig::DEFAULT_OUTPUT,
            &["albedo", "sky"],
        );
        let cubemaps = vec!["sky".to_string()];
        let stages = ProgramBuilder::new("", Viewport::new(8, 8))
            .with_cubemaps(&cubemaps)
            .stages(&spec)
            .unwrap();
        let fragment = &stages[1].1;
        assert!(fragment.contains("uniform sampler2D iSampler0;\nuniform samplerCube iSampler1;\n"));
        assert!(fragment.contains("void mainImage(out vec4, vec2, sampler2D, samplerCube);"));
    }

    #[test]
    fn raster_stage_defines_compile_guard() {
        let source = raster_stage_source("overlayVS", "void overlayVS() {}");
        assert!(source.starts_with("#version 430 core\n#define COMPILE_overlayVS\n"));
    }

    #[test]
    fn workgroups_round_up() {
        assert_eq!(workgroup_count([100, 64, 1], [16, 16, 1]), [7, 4, 1]);
        assert_eq!(workgroup_count([1, 1, 1], [64, 1, 1]), [1, 1, 1]);
    }

    #[test]
    fn compute_sizes_resolve_against_viewport() {
        let spec = compute(
            "step",
            Extent3([Dim::Expr("W".into()), Dim::Expr("H / 2".into()), Dim::Literal(1)]),
            Extent3::literal(16, 16, 1),
        );
        let mut backend = HeadlessBackend::new();
        let report = ProgramBuilder::new("", Viewport::new(100, 64))
            .build_all(&mut backend, &[spec.clone()])
            .unwrap();
        let compiled = report.programs.get("step").unwrap();
        assert_eq!(compiled.groups, [7, 2, 1]);

        let mut programs = report.programs;
        programs.resize(&[spec], Viewport::new(160, 64)).unwrap();
        assert_eq!(programs.get("step").unwrap().groups, [10, 2, 1]);
    }

    #[test]
    fn bad_size_expression_is_configuration_error() {
        let spec = compute(
            "step",
            Extent3([Dim::Expr("W / 0".into()), Dim::Literal(1), Dim::Literal(1)]),
            Extent3::literal(1, 1, 1),
        );
        let mut backend = HeadlessBackend::new();
        let err = ProgramBuilder::new("", Viewport::new(8, 8))
            .build_all(&mut backend, &[spec])
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert_eq!(backend.resource_counts().total(), 0);
    }

    #[test]
    fn failing_pass_does_not_stop_the_others() {
        let specs = [
            ProgramSpec::render("first", passconfig::DEFAULT_OUTPUT, &[]),
            ProgramSpec::render("broken", passconfig::DEFAULT_OUTPUT, &[]),
            ProgramSpec::render("last", passconfig::DEFAULT_OUTPUT, &[]),
        ];
        let mut backend = HeadlessBackend::new().with_compile_failure("void broken(");
        let report = ProgramBuilder::new("", Viewport::new(8, 8))
            .build_all(&mut backend, &specs)
            .unwrap();

        assert_eq!(report.programs.len(), 2);
        assert!(report.programs.get("broken").is_none());
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].pass, "broken");
        assert_eq!(report.diagnostics[0].stage, Some(ShaderStage::Fragment));

        let counts = backend.resource_counts();
        assert_eq!(counts.shaders, 0);
        assert_eq!(counts.programs, 2);
    }
}
