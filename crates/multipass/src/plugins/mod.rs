//! Auxiliary GPU resources that take part in every frame.
//!
//! Types:
//!
//! - `PluginKind` is the closed set of plugin types, looked up by the `type` string of a
//!   configuration entry through a static registry.
//! - `Plugin` holds one configured instance and dispatches the frame hooks to it.
//! - `PluginHost` owns the instances of one configuration generation and runs the hooks in
//!   order: every `on_begin_draw` before the first pass, `on_bind_program` right after each
//!   program is bound, `on_draw` after the passes and every `on_end_draw` last.
//!
//! Functions:
//!
//! - `PluginHost::configure_all` builds every plugin. Missing files and bad parameters abort
//!   the whole configuration after releasing what was built; an overlay whose stages fail to
//!   compile is skipped and reported as a diagnostic.
mod raster;
mod ssbo;
mod texture;
mod uniform;

use std::fmt;

use passconfig::{PluginSpec, Viewport};
use serde::de::DeserializeOwned;

pub use raster::{AttributeLayout, RasterPlugin};
pub use ssbo::{pad_records, BufferSource, ElementFormat, Fill, SsboPlugin, SsboScriptPlugin};
pub use texture::TexturePlugin;
pub use uniform::UniformPlugin;

use crate::assets::{AssetRoot, ImageLoader};
use crate::backend::GpuBackend;
use crate::error::{PassDiagnostic, PipelineError};
use crate::types::{DefaultFramebuffer, ProgramId, TextureId, TextureTarget};
use crate::uniforms::FrameUniforms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Ssbo,
    SsboScript,
    Raster,
    RasterScript,
    Texture,
    Cubemap,
    Uniform,
}

const REGISTRY: &[(&str, PluginKind)] = &[
    ("ssbo", PluginKind::Ssbo),
    ("ssboscript", PluginKind::SsboScript),
    ("raster", PluginKind::Raster),
    ("rasterscript", PluginKind::RasterScript),
    ("texture", PluginKind::Texture),
    ("cubemap", PluginKind::Cubemap),
    ("uniform", PluginKind::Uniform),
];

impl PluginKind {
    /// Looks up a configuration `type` string, ignoring ASCII case.
    pub fn from_type(name: &str) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name.trim()))
            .map(|(_, kind)| *kind)
    }

    pub fn type_name(self) -> &'static str {
        REGISTRY
            .iter()
            .find(|(_, kind)| *kind == self)
            .map_or("unknown", |(key, _)| key)
    }

    pub fn all() -> impl Iterator<Item = PluginKind> {
        REGISTRY.iter().map(|(_, kind)| *kind)
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// What plugins may read while configuring: the shader source, the viewport and the asset
/// collaborators.
#[derive(Clone, Copy)]
pub struct PluginContext<'a> {
    pub source: &'a str,
    pub viewport: Viewport,
    pub assets: &'a AssetRoot,
    pub images: &'a dyn ImageLoader,
}

impl<'a> PluginContext<'a> {
    pub fn new(
        source: &'a str,
        viewport: Viewport,
        assets: &'a AssetRoot,
        images: &'a dyn ImageLoader,
    ) -> Self {
        Self {
            source,
            viewport,
            assets,
            images,
        }
    }
}

/// Frame state handed to `on_draw`.
#[derive(Debug, Clone, Copy)]
pub struct DrawContext<'a> {
    pub target: DefaultFramebuffer,
    pub viewport: Viewport,
    pub uniforms: &'a FrameUniforms,
}

pub(crate) fn decode_params<T: DeserializeOwned>(
    kind: &str,
    params: &serde_norway::Value,
) -> Result<T, PipelineError> {
    serde_norway::from_value(params.clone())
        .map_err(|err| PipelineError::invalid(format!("{kind} plugin params: {err}")))
}

#[derive(Debug)]
pub enum Plugin {
    Ssbo(SsboPlugin),
    SsboScript(SsboScriptPlugin),
    Raster(RasterPlugin),
    RasterScript(RasterPlugin),
    Texture(TexturePlugin),
    Cubemap(TexturePlugin),
    Uniform(UniformPlugin),
}

impl Plugin {
    pub fn configure<B: GpuBackend + ?Sized>(
        backend: &mut B,
        spec: &PluginSpec,
        ctx: &PluginContext<'_>,
    ) -> Result<Self, PipelineError> {
        let kind = PluginKind::from_type(&spec.kind).ok_or_else(|| {
            PipelineError::invalid(format!("unknown plugin type '{}'", spec.kind))
        })?;
        let params = &spec.params;
        Ok(match kind {
            PluginKind::Ssbo => Plugin::Ssbo(SsboPlugin::configure(backend, params, ctx)?),
            PluginKind::SsboScript => {
                Plugin::SsboScript(SsboScriptPlugin::configure(backend, params, ctx)?)
            }
            PluginKind::Raster => Plugin::Raster(RasterPlugin::configure(backend, params, ctx, false)?),
            PluginKind::RasterScript => {
                Plugin::RasterScript(RasterPlugin::configure(backend, params, ctx, true)?)
            }
            PluginKind::Texture => Plugin::Texture(TexturePlugin::configure(
                backend,
                params,
                ctx,
                TextureTarget::Texture2d,
            )?),
            PluginKind::Cubemap => Plugin::Cubemap(TexturePlugin::configure(
                backend,
                params,
                ctx,
                TextureTarget::Cubemap,
            )?),
            PluginKind::Uniform => Plugin::Uniform(UniformPlugin::configure(params)?),
        })
    }

    pub fn kind(&self) -> PluginKind {
        match self {
            Plugin::Ssbo(_) => PluginKind::Ssbo,
            Plugin::SsboScript(_) => PluginKind::SsboScript,
            Plugin::Raster(_) => PluginKind::Raster,
            Plugin::RasterScript(_) => PluginKind::RasterScript,
            Plugin::Texture(_) => PluginKind::Texture,
            Plugin::Cubemap(_) => PluginKind::Cubemap,
            Plugin::Uniform(_) => PluginKind::Uniform,
        }
    }

    pub fn on_begin_draw<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        match self {
            Plugin::Ssbo(plugin) => plugin.on_begin_draw(backend),
            Plugin::SsboScript(plugin) => plugin.on_begin_draw(backend),
            _ => {}
        }
    }

    pub fn on_bind_program<B: GpuBackend + ?Sized>(&self, backend: &mut B, program: ProgramId) {
        match self {
            Plugin::Texture(plugin) | Plugin::Cubemap(plugin) => {
                plugin.on_bind_program(backend, program)
            }
            Plugin::Uniform(plugin) => plugin.on_bind_program(backend, program),
            _ => {}
        }
    }

    pub fn on_draw<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        draw: &DrawContext<'_>,
        plugins: &[Plugin],
    ) {
        if let Plugin::Raster(plugin) | Plugin::RasterScript(plugin) = self {
            plugin.on_draw(backend, draw, plugins);
        }
    }

    pub fn on_end_draw<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        match self {
            Plugin::Ssbo(plugin) => plugin.on_end_draw(backend),
            Plugin::SsboScript(plugin) => plugin.on_end_draw(backend),
            _ => {}
        }
    }

    pub fn cleanup<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        match self {
            Plugin::Ssbo(plugin) => plugin.cleanup(backend),
            Plugin::SsboScript(plugin) => plugin.cleanup(backend),
            Plugin::Raster(plugin) | Plugin::RasterScript(plugin) => plugin.cleanup(backend),
            Plugin::Texture(plugin) | Plugin::Cubemap(plugin) => plugin.cleanup(backend),
            Plugin::Uniform(_) => {}
        }
    }
}

/// Configured plugins of one generation, in declaration order.
#[derive(Debug, Default)]
pub struct PluginHost {
    plugins: Vec<Plugin>,
    diagnostics: Vec<PassDiagnostic>,
}

impl PluginHost {
    pub fn configure_all<B: GpuBackend + ?Sized>(
        backend: &mut B,
        specs: &[PluginSpec],
        ctx: &PluginContext<'_>,
    ) -> Result<Self, PipelineError> {
        let mut host = Self::default();
        for spec in specs {
            match Plugin::configure(backend, spec, ctx) {
                Ok(plugin) => host.plugins.push(plugin),
                Err(PipelineError::Compile(diagnostics)) => {
                    for diagnostic in &diagnostics {
                        tracing::warn!(plugin = %spec.kind, pass = %diagnostic.pass, "plugin stages failed to build");
                    }
                    host.diagnostics.extend(diagnostics);
                }
                Err(err) => {
                    tracing::warn!(plugin = %spec.kind, error = %err, "plugin configuration failed");
                    host.cleanup(backend);
                    return Err(err);
                }
            }
        }
        Ok(host)
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn diagnostics(&self) -> &[PassDiagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn begin_draw<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        for plugin in &self.plugins {
            plugin.on_begin_draw(backend);
        }
    }

    pub fn bind_program<B: GpuBackend + ?Sized>(&self, backend: &mut B, program: ProgramId) {
        for plugin in &self.plugins {
            plugin.on_bind_program(backend, program);
        }
    }

    pub fn draw<B: GpuBackend + ?Sized>(&self, backend: &mut B, draw: &DrawContext<'_>) {
        for plugin in &self.plugins {
            plugin.on_draw(backend, draw, &self.plugins);
        }
    }

    pub fn end_draw<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        for plugin in &self.plugins {
            plugin.on_end_draw(backend);
        }
    }

    /// Re-resolves viewport dependent draw sizes of raster overlays.
    pub fn resize(&mut self, viewport: Viewport) -> Result<(), PipelineError> {
        for plugin in &mut self.plugins {
            if let Plugin::Raster(raster) | Plugin::RasterScript(raster) = plugin {
                raster.resize(viewport)?;
            }
        }
        Ok(())
    }

    /// Texture a program may list as an input under the plugin's uniform name.
    pub fn exposed_texture(&self, name: &str) -> Option<(TextureId, TextureTarget)> {
        self.plugins.iter().find_map(|plugin| match plugin {
            Plugin::Texture(texture) | Plugin::Cubemap(texture) if texture.name() == name => {
                Some((texture.texture(), texture.target()))
            }
            _ => None,
        })
    }

    /// Sets every `uniform` plugin named `name`. Returns the stored value, if any matched.
    pub fn set_uniform_value(&mut self, name: &str, value: f32) -> Option<f32> {
        let mut stored = None;
        for plugin in &mut self.plugins {
            if let Plugin::Uniform(uniform) = plugin {
                if uniform.name() == name {
                    stored = Some(uniform.set_value(value));
                }
            }
        }
        stored
    }

    pub fn uniform_value(&self, name: &str) -> Option<f32> {
        self.plugins.iter().find_map(|plugin| match plugin {
            Plugin::Uniform(uniform) if uniform.name() == name => Some(uniform.value()),
            _ => None,
        })
    }

    pub fn cleanup<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for plugin in self.plugins.drain(..) {
            plugin.cleanup(backend);
        }
        self.diagnostics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::FsImageLoader;
    use crate::backend::{Command, HeadlessBackend};
    use crate::types::BufferId;

    fn specs(yaml: &str) -> Vec<PluginSpec> {
        passconfig::PipelineConfig::from_yaml_str(yaml).unwrap().plugins
    }

    #[test]
    fn registry_covers_every_kind() {
        for kind in PluginKind::all() {
            assert_eq!(PluginKind::from_type(kind.type_name()), Some(kind));
        }
        assert_eq!(PluginKind::from_type("SSBO"), Some(PluginKind::Ssbo));
        assert_eq!(PluginKind::from_type("shader"), None);
    }

    #[test]
    fn unknown_type_is_configuration_error() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::default();
        let ctx = PluginContext::new("", Viewport::new(4, 4), &assets, &FsImageLoader);
        let err = PluginHost::configure_all(
            &mut backend,
            &specs("plugins:\n  - type: audio\n    params: {}\n"),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn hooks_run_in_frame_order() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::default();
        let ctx = PluginContext::new("", Viewport::new(4, 4), &assets, &FsImageLoader);
        let mut host = PluginHost::configure_all(
            &mut backend,
            &specs(
                r#"
plugins:
  - type: ssbo
    params: { binding: 2, type: size, size: 64 }
  - type: uniform
    params: { name: uGain, default: 0.5, min: 0, max: 1 }
"#,
            ),
            &ctx,
        )
        .unwrap();
        let buffer = match &host.plugins()[0] {
            Plugin::Ssbo(ssbo) => ssbo.buffer(),
            other => panic!("unexpected {other:?}"),
        };

        host.begin_draw(&mut backend);
        host.bind_program(&mut backend, ProgramId(9));
        host.end_draw(&mut backend);
        assert_eq!(
            backend.take_commands(),
            vec![
                Command::BindStorage {
                    binding: 2,
                    buffer: Some(buffer),
                },
                Command::UniformF32 {
                    program: ProgramId(9),
                    name: "uGain".into(),
                    value: 0.5,
                },
                Command::BindStorage {
                    binding: 2,
                    buffer: None::<BufferId>,
                },
                Command::MemoryBarrier,
            ]
        );

        assert_eq!(host.set_uniform_value("uGain", 0.25), Some(0.25));
        assert_eq!(host.set_uniform_value("missing", 1.0), None);

        host.cleanup(&mut backend);
        assert_eq!(backend.resource_counts().total(), 0);
    }

    #[test]
    fn broken_overlay_is_skipped_with_diagnostic() {
        let mut backend = HeadlessBackend::new().with_compile_failure("COMPILE_badVS");
        let assets = AssetRoot::default();
        let ctx = PluginContext::new("", Viewport::new(4, 4), &assets, &FsImageLoader);
        let host = PluginHost::configure_all(
            &mut backend,
            &specs(
                r#"
plugins:
  - type: raster
    params: { vertex_shader: badVS, fragment_shader: fs, primitive: GL_POINTS, count: 1 }
  - type: ssbo
    params: { binding: 0, type: size, size: 16 }
"#,
            ),
            &ctx,
        )
        .unwrap();
        assert_eq!(host.len(), 1);
        assert_eq!(host.diagnostics().len(), 1);
        assert_eq!(host.diagnostics()[0].pass, "raster:badVS");
    }
}
