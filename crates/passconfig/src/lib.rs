//! Declarative multipass configuration embedded in GLSL sources.
//!
//! A shader opts into multipass rendering by carrying a YAML block between `%%config-start%%`
//! and `%%config-end%%` markers, usually inside a comment. This crate finds that block, decodes
//! it into a [`PipelineConfig`], evaluates the small `W`/`H` size language used by its fields,
//! and expands `#include` directives in shader files. It never touches the GPU.
mod block;
pub mod expr;
mod include;
mod schema;

pub use block::{extract_block, ConfigBlock, CONFIG_END, CONFIG_START};
pub use expr::{Dim, Expr, ExprError, Viewport};
pub use include::{preprocess_includes, IncludeError, Preprocessed};
pub use schema::{
    Extent3, FilterMode, InternalFormat, OffscreenOption, PipelineConfig, PluginSpec, ProgramKind,
    ProgramSpec, SamplerKind, SamplerSpec, SizeSpec, SubstepSpec, SubstepTask, WrapMode,
    DEFAULT_ENTRY, DEFAULT_OUTPUT,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to decode configuration block starting at line {line}: {error}")]
    Parse {
        line: usize,
        #[source]
        error: serde_norway::Error,
    },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Decodes the embedded block of `source`.
///
/// `Ok(None)` means the source has no block and the built-in single pass applies. Only the
/// structure is checked here; call [`PipelineConfig::validate`] for referential checks.
pub fn parse(source: &str) -> Result<Option<PipelineConfig>, ConfigError> {
    let Some(block) = extract_block(source) else {
        return Ok(None);
    };
    PipelineConfig::from_yaml_str(block.body)
        .map(Some)
        .map_err(|error| ConfigError::Parse {
            line: block.line,
            error,
        })
}

/// Like [`parse`], substituting [`PipelineConfig::default_pipeline`] when no block exists.
pub fn parse_or_default(source: &str) -> Result<PipelineConfig, ConfigError> {
    Ok(parse(source)?.unwrap_or_else(PipelineConfig::default_pipeline))
}

/// Parses and validates in one step, for callers that want every problem up front.
pub fn load_validated(source: &str) -> Result<PipelineConfig, ConfigError> {
    let config = parse_or_default(source)?;
    let issues = config.validate();
    if !issues.is_empty() {
        return Err(ConfigError::Invalid(issues));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_without_block_uses_default_pipeline() {
        let source = "void mainImage(out vec4 c, vec2 p) { c = vec4(1.0); }";
        assert!(parse(source).unwrap().is_none());
        let config = parse_or_default(source).unwrap();
        assert_eq!(config.programs.len(), 1);
        assert_eq!(config.programs[0].name, DEFAULT_ENTRY);
        assert_eq!(config.programs[0].output, DEFAULT_OUTPUT);
        assert!(config.programs[0].samplers.is_empty());
        assert!(config.samplers.is_empty());
    }

    #[test]
    fn decodes_indented_block_inside_comment() {
        let source = r#"
/*
  %%config-start%%
  samplers:
    - name: buf
      type: framebuffer
  programs:
    - name: step
      output: buf
      samplers: [buf]
    - name: present
      output: $default
      samplers: [buf]
  %%config-end%%
*/
void step(out vec4 c, vec2 p, sampler2D s) { c = texelFetch(s, ivec2(p), 0); }
void present(out vec4 c, vec2 p, sampler2D s) { c = texelFetch(s, ivec2(p), 0); }
"#;
        let config = load_validated(source).unwrap();
        let names: Vec<_> = config.programs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["step", "present"]);
    }

    #[test]
    fn malformed_block_reports_its_line() {
        let source = "// a\n%%config-start%%\nprograms: [\n%%config-end%%\n";
        let err = parse(source).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 2, .. }));
    }

    #[test]
    fn validation_errors_are_collected() {
        let source =
            "%%config-start%%\nprograms:\n  - name: a\n    samplers: [x, y]\n%%config-end%%\n";
        match load_validated(source).unwrap_err() {
            ConfigError::Invalid(issues) => assert_eq!(issues.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}
