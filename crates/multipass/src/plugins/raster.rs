//! Rasterized overlay geometry drawn over the default framebuffer after the passes.
//!
//! `raster` draws `count` attribute-less vertices, so the vertex stage builds positions from
//! `gl_VertexID`. `rasterscript` reads interleaved float vertices and `u32` indices from binary
//! files and draws them instanced. Both compile their stages from the shader source with a
//! `COMPILE_<entry>` define selecting the stage code.
use std::collections::BTreeMap;
use std::path::PathBuf;

use passconfig::{Dim, Viewport};
use serde::Deserialize;

use super::{decode_params, DrawContext, Plugin, PluginContext};
use crate::backend::GpuBackend;
use crate::compile::{link_stages, raster_stage_source};
use crate::error::{PassDiagnostic, PipelineError};
use crate::types::{
    Capability, GeometryDesc, GeometryDraw, GeometryId, Primitive, ProgramId, RasterState,
    RenderTarget, ShaderStage, VertexAttribute,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AttributeLayout {
    pub components: u8,
    #[serde(default)]
    pub offset: u32,
    pub stride: u32,
}

#[derive(Debug, Deserialize)]
struct RasterParams {
    vertex_shader: String,
    fragment_shader: String,
    #[serde(default)]
    geometry_shader: Option<String>,
    primitive: Primitive,
    #[serde(default)]
    count: Option<Dim>,
    #[serde(default)]
    capabilities: Vec<Capability>,
    #[serde(default)]
    blend: bool,
    #[serde(default)]
    vertex_data: Option<PathBuf>,
    #[serde(default)]
    index_data: Option<PathBuf>,
    #[serde(default)]
    vertex_attributes: BTreeMap<String, AttributeLayout>,
    #[serde(default)]
    instance_count: Option<Dim>,
}

#[derive(Debug)]
enum DrawSize {
    Arrays { count: Dim },
    Indexed { indices: u32, instances: Dim },
}

#[derive(Debug)]
pub struct RasterPlugin {
    kind: &'static str,
    program: ProgramId,
    geometry: GeometryId,
    primitive: Primitive,
    state: RasterState,
    size: DrawSize,
    draw: GeometryDraw,
}

fn resolve_count(kind: &str, field: &str, dim: &Dim, viewport: Viewport) -> Result<u32, PipelineError> {
    dim.resolve(viewport)
        .map_err(|err| PipelineError::invalid(format!("{kind} plugin {field}: {err}")))
}

impl RasterPlugin {
    /// Configures a `raster` (`scripted == false`) or `rasterscript` plugin.
    ///
    /// Stage compile or link failures come back as [`PipelineError::Compile`].
    pub(crate) fn configure<B: GpuBackend + ?Sized>(
        backend: &mut B,
        params: &serde_norway::Value,
        ctx: &PluginContext<'_>,
        scripted: bool,
    ) -> Result<Self, PipelineError> {
        let kind = if scripted { "rasterscript" } else { "raster" };
        let params: RasterParams = decode_params(kind, params)?;

        let mut vertex_bytes = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let size = if scripted {
            let (Some(vertex_path), Some(index_path)) = (&params.vertex_data, &params.index_data)
            else {
                return Err(PipelineError::invalid(
                    "rasterscript plugin needs vertex_data and index_data",
                ));
            };
            vertex_bytes = ctx.assets.read_bytes(kind, vertex_path)?;
            let index_bytes = ctx.assets.read_bytes(kind, index_path)?;
            if index_bytes.len() % 4 != 0 {
                return Err(PipelineError::allocation(
                    kind,
                    format!("index data of {} bytes is not a u32 array", index_bytes.len()),
                ));
            }
            indices = index_bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect();
            DrawSize::Indexed {
                indices: indices.len() as u32,
                instances: params.instance_count.clone().unwrap_or(Dim::Literal(1)),
            }
        } else {
            let count = params
                .count
                .clone()
                .ok_or_else(|| PipelineError::invalid("raster plugin needs count"))?;
            DrawSize::Arrays { count }
        };

        let mut stages = vec![(
            ShaderStage::Vertex,
            raster_stage_source(&params.vertex_shader, ctx.source),
        )];
        if let Some(entry) = &params.geometry_shader {
            stages.push((ShaderStage::Geometry, raster_stage_source(entry, ctx.source)));
        }
        stages.push((
            ShaderStage::Fragment,
            raster_stage_source(&params.fragment_shader, ctx.source),
        ));

        let label = format!("{kind}:{}", params.vertex_shader);
        let program = link_stages(backend, &stages)
            .map_err(|err| PipelineError::Compile(vec![PassDiagnostic::from_backend(&label, err)]))?;

        let attributes: Vec<VertexAttribute> = params
            .vertex_attributes
            .iter()
            .map(|(name, layout)| VertexAttribute {
                name: name.clone(),
                components: layout.components,
                offset: layout.offset,
                stride: layout.stride,
            })
            .collect();
        let desc = GeometryDesc {
            program,
            vertex_data: &vertex_bytes,
            index_data: &indices,
            attributes: &attributes,
        };
        let geometry = match backend.create_geometry(&desc) {
            Ok(geometry) => geometry,
            Err(err) => {
                backend.destroy_program(program);
                return Err(PipelineError::allocation(label, err));
            }
        };

        let mut plugin = Self {
            kind,
            program,
            geometry,
            primitive: params.primitive,
            state: RasterState {
                capabilities: params.capabilities,
                blend: params.blend,
            },
            size,
            draw: GeometryDraw {
                primitive: params.primitive,
                count: 0,
                indexed: scripted,
                instances: 1,
            },
        };
        if let Err(err) = plugin.resize(ctx.viewport) {
            plugin.cleanup(backend);
            return Err(err);
        }
        Ok(plugin)
    }

    /// Re-resolves vertex and instance counts for a new viewport.
    pub(crate) fn resize(&mut self, viewport: Viewport) -> Result<(), PipelineError> {
        self.draw = match &self.size {
            DrawSize::Arrays { count } => GeometryDraw {
                primitive: self.primitive,
                count: resolve_count(self.kind, "count", count, viewport)?,
                indexed: false,
                instances: 1,
            },
            DrawSize::Indexed { indices, instances } => GeometryDraw {
                primitive: self.primitive,
                count: *indices,
                indexed: true,
                instances: resolve_count(self.kind, "instance_count", instances, viewport)?,
            },
        };
        Ok(())
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn draw_call(&self) -> GeometryDraw {
        self.draw
    }

    pub(crate) fn on_draw<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        draw: &DrawContext<'_>,
        plugins: &[Plugin],
    ) {
        backend.bind_target(RenderTarget::Default(draw.target), draw.viewport);
        backend.use_program(self.program);
        for plugin in plugins {
            plugin.on_bind_program(backend, self.program);
        }
        backend.set_frame_uniforms(self.program, draw.uniforms);
        backend.set_uniform_u32(self.program, "iVertexCount", self.draw.count);
        backend.draw_geometry(self.geometry, self.draw, &self.state);
    }

    pub(crate) fn cleanup<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        backend.destroy_geometry(self.geometry);
        backend.destroy_program(self.program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetRoot, FsImageLoader};
    use crate::backend::HeadlessBackend;
    use tempfile::TempDir;

    fn params(yaml: &str) -> serde_norway::Value {
        serde_norway::from_str(yaml).unwrap()
    }

    #[test]
    fn raster_counts_follow_viewport() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::default();
        let ctx = PluginContext::new("", Viewport::new(10, 4), &assets, &FsImageLoader);
        let mut plugin = RasterPlugin::configure(
            &mut backend,
            &params(
                r#"
vertex_shader: dotsVS
fragment_shader: dotsFS
primitive: GL_POINTS
count: W * H
capabilities: [GL_PROGRAM_POINT_SIZE]
blend: true
"#,
            ),
            &ctx,
            false,
        )
        .unwrap();
        assert_eq!(plugin.draw_call().count, 40);
        assert!(!plugin.draw_call().indexed);
        plugin.resize(Viewport::new(2, 2)).unwrap();
        assert_eq!(plugin.draw_call().count, 4);

        plugin.cleanup(&mut backend);
        assert_eq!(backend.resource_counts().total(), 0);
    }

    #[test]
    fn rasterscript_reads_indices_from_file() {
        let dir = TempDir::new().unwrap();
        let vertices: [f32; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let indices: [u32; 3] = [0, 1, 2];
        std::fs::write(dir.path().join("v.bin"), bytemuck::cast_slice(&vertices)).unwrap();
        std::fs::write(dir.path().join("i.bin"), bytemuck::cast_slice(&indices)).unwrap();

        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::new(dir.path());
        let ctx = PluginContext::new("", Viewport::new(8, 8), &assets, &FsImageLoader);
        let plugin = RasterPlugin::configure(
            &mut backend,
            &params(
                r#"
vertex_shader: meshVS
fragment_shader: meshFS
primitive: GL_TRIANGLES
vertex_data: v.bin
index_data: i.bin
vertex_attributes:
  position: { components: 2, offset: 0, stride: 8 }
instance_count: H
"#,
            ),
            &ctx,
            true,
        )
        .unwrap();
        let draw = plugin.draw_call();
        assert!(draw.indexed);
        assert_eq!(draw.count, 3);
        assert_eq!(draw.instances, 8);
    }

    #[test]
    fn stage_failure_is_a_compile_error() {
        let mut backend = HeadlessBackend::new().with_compile_failure("COMPILE_brokenFS");
        let assets = AssetRoot::default();
        let ctx = PluginContext::new("", Viewport::new(8, 8), &assets, &FsImageLoader);
        let err = RasterPlugin::configure(
            &mut backend,
            &params("vertex_shader: vs\nfragment_shader: brokenFS\nprimitive: GL_LINES\ncount: 2\n"),
            &ctx,
            false,
        )
        .unwrap_err();
        match err {
            PipelineError::Compile(diagnostics) => {
                assert_eq!(diagnostics[0].pass, "raster:vs");
                assert_eq!(diagnostics[0].stage, Some(ShaderStage::Fragment));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(backend.resource_counts().total(), 0);
    }
}
