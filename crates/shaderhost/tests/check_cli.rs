use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const FEEDBACK: &str = r#"/*
%%config-start%%
samplers:
  - name: trail
    type: framebuffer
programs:
  - name: fade
    output: trail
    samplers: [trail]
  - name: mainImage
    samplers: [trail]
offscreen_option:
  fps: 30
  num_frames: 4
%%config-end%%
*/
#include "lib/common.glsl"
void fade(out vec4 c, vec2 p, sampler2D t) { c = 0.95 * texture(t, uv(p)); }
void mainImage(out vec4 c, vec2 p, sampler2D t) { c = texture(t, uv(p)); }
"#;

fn write_shader(dir: &Path, body: &str) -> PathBuf {
    fs::create_dir_all(dir.join("lib")).unwrap();
    fs::write(
        dir.join("lib/common.glsl"),
        "vec2 uv(vec2 p) { return p / iResolution.xy; }\n",
    )
    .unwrap();
    let path = dir.join("feedback.glsl");
    fs::write(&path, body).unwrap();
    path
}

fn shaderhost(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shaderhost"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run shaderhost")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn check_reports_ready_pipeline() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path(), FEEDBACK);
    let output = shaderhost(&["check", shader.to_str().unwrap(), "--size", "64x32"]);
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.contains("status:   Ready"), "{text}");
    assert!(text.contains("sampler trail"), "{text}");
    assert!(text.contains("common.glsl"), "{text}");
}

#[test]
fn check_json_lists_samplers_and_status() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path(), FEEDBACK);
    let output = shaderhost(&["check", shader.to_str().unwrap(), "--json"]);
    assert!(output.status.success(), "{output:?}");
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "ready");
    assert_eq!(report["pipeline"]["programs"], 2);
    assert_eq!(report["pipeline"]["samplers"][0]["name"], "trail");
    assert_eq!(report["viewport"]["width"], 800);
}

#[test]
fn check_fails_on_dangling_sampler() {
    let dir = TempDir::new().unwrap();
    let dangling = FEEDBACK.replace(
        "[trail]\n  - name: mainImage",
        "[ghost]\n  - name: mainImage",
    );
    let shader = write_shader(dir.path(), &dangling);
    let output = shaderhost(&["check", shader.to_str().unwrap()]);
    assert!(!output.status.success());
    let text = stdout(&output);
    assert!(text.contains("status:   Inactive"), "{text}");
    assert!(text.contains("ghost"), "{text}");
}

#[test]
fn check_surfaces_compile_diagnostics() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path(), &format!("{FEEDBACK}#error unfinished\n"));
    let output = shaderhost(&["check", shader.to_str().unwrap()]);
    assert!(!output.status.success());
    let text = stdout(&output);
    assert!(text.contains("status:   Errored"), "{text}");
    assert!(text.contains("[fade]"), "{text}");
    assert!(text.contains("#error unfinished"), "{text}");
}

#[test]
fn simulate_uses_configured_frame_count() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path(), FEEDBACK);
    let output = shaderhost(&["simulate", shader.to_str().unwrap(), "--json", "--size", "8x8"]);
    assert!(output.status.success(), "{output:?}");
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let frames = report["frames"].as_array().unwrap();
    assert_eq!(frames.len(), 4);
    for frame in frames {
        let draws = frame["commands"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|command| command["op"] == "draw_fullscreen")
            .count();
        assert_eq!(draws, 2);
        assert_eq!(frame["outcome"]["swaps"], 1);
    }
    assert_eq!(report["summary"]["drawn"], 4);
}

#[test]
fn simulate_frames_flag_overrides_block() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path(), FEEDBACK);
    let output = shaderhost(&["simulate", shader.to_str().unwrap(), "--frames", "1"]);
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.contains("frame 0: 2 passes, 1 swaps"), "{text}");
    assert!(text.contains("1 of 1 frames drawn"), "{text}");
}

#[test]
fn source_prints_generated_preamble() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path(), FEEDBACK);
    let output = shaderhost(&["source", shader.to_str().unwrap(), "--program", "fade"]);
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.contains("uniform sampler2D iSampler0;"), "{text}");
    assert!(text.contains("void fade(out vec4, vec2, sampler2D);"), "{text}");
    assert!(text.contains("fade(iMainFragColor, vec2(gl_FragCoord), iSampler0);"), "{text}");

    let missing = shaderhost(&["source", shader.to_str().unwrap(), "--program", "nope"]);
    assert!(!missing.status.success());
}

#[test]
fn preprocess_expands_includes() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path(), FEEDBACK);
    let output = shaderhost(&["preprocess", shader.to_str().unwrap(), "--no-line-directives"]);
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.contains("vec2 uv(vec2 p)"), "{text}");
    assert!(!text.contains("#include"), "{text}");
    assert!(!text.contains("#line"), "{text}");
}
