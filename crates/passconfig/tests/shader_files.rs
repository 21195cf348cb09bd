use std::fs;

use passconfig::{
    load_validated, preprocess_includes, PipelineConfig, ProgramKind, SizeSpec, SubstepTask,
    Viewport,
};
use tempfile::TempDir;

const MAIN: &str = r#"// fluid solver
/*
%%config-start%%
samplers:
  - name: velocity
    type: framebuffer
    internal_format: GL_RG32F
    filter: linear
  - name: pressure
    type: framebuffer
    size: [W / 2, H / 2]
programs:
  - name: advect
    output: velocity
    samplers: [velocity]
  - name: relax
    output: pressure
    samplers: [pressure, velocity]
    substep: true
  - name: particles
    type: compute
    global_size: "[W, H, 1]"
    local_size: [8, 8, 1]
    samplers: [velocity]
  - name: mainImage
    samplers: [velocity, pressure]
substep:
  num_iter: 20
  schedule:
    - { type: program, name: relax }
    - { type: sampler, name: pressure }
%%config-end%%
*/
#include "common.glsl"
void advect(out vec4 c, vec2 p, sampler2D v) { c = texture(v, uv(p)); }
"#;

const COMMON: &str = "vec2 uv(vec2 p) { return p / iResolution.xy; }\n";

#[test]
fn preprocessed_shader_yields_a_valid_config() {
    let dir = TempDir::new().unwrap();
    let main = dir.path().join("fluid.glsl");
    fs::write(&main, MAIN).unwrap();
    fs::write(dir.path().join("common.glsl"), COMMON).unwrap();

    let expanded = preprocess_includes(&main, true).unwrap();
    assert_eq!(expanded.includes.len(), 1);
    assert!(expanded.source.contains("vec2 uv(vec2 p)"));

    let config = load_validated(&expanded.source).unwrap();
    let names: Vec<_> = config.programs.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["advect", "relax", "particles", "mainImage"]);

    let particles = config.program("particles").unwrap();
    assert_eq!(particles.kind, ProgramKind::Compute);
    let viewport = Viewport::new(640, 360);
    assert_eq!(
        particles.global_size.as_ref().unwrap().resolve(viewport).unwrap(),
        [640, 360, 1]
    );

    let pressure = config.sampler("pressure").unwrap();
    assert!(matches!(pressure.size, SizeSpec::Explicit(_)));
    assert_eq!(pressure.size.resolve(viewport).unwrap(), Viewport::new(320, 180));

    let substep = config.substep.as_ref().unwrap();
    assert_eq!(substep.num_iter, 20);
    assert_eq!(
        substep.schedule[1],
        SubstepTask::Sampler {
            name: "pressure".into()
        }
    );
}

#[test]
fn serialized_config_keeps_every_reference_resolvable() {
    let config = load_validated(MAIN).unwrap();
    let yaml = config.to_yaml_string().unwrap();
    let reparsed = PipelineConfig::from_yaml_str(&yaml).unwrap();

    assert_eq!(reparsed, config);
    for name in reparsed.referenced_samplers() {
        assert!(reparsed.sampler(name).is_some(), "{name} does not resolve");
    }
    assert!(reparsed.validate().is_empty());
}
