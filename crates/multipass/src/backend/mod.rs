//! The GPU collaborator seam.
//!
//! The pipeline never talks to a graphics API directly. Everything it needs (allocation,
//! compilation, binding, draw and dispatch) goes through [`GpuBackend`]:
//! - `headless` records every call and tracks live resources; tests and the CLI use it.
//! - `gl` drives OpenGL 4.3 through `glow` with a context the host created.

#[cfg(feature = "gl")]
mod gl;
mod headless;

#[cfg(feature = "gl")]
pub use gl::GlBackend;
pub use headless::{Command, HeadlessBackend};

use passconfig::Viewport;
use serde::Serialize;

use crate::assets::LoadedImage;
use crate::error::BackendError;
use crate::types::{
    BufferId, BufferInit, BufferKind, FramebufferDesc, FramebufferId, GeometryDesc, GeometryDraw,
    GeometryId, ProgramId, RasterState, RenderTarget, ShaderId, ShaderStage, TextureId,
    TextureParams, TextureTarget,
};
use crate::uniforms::FrameUniforms;

/// Imperative GPU API consumed by the pipeline.
///
/// Calls are issued from one thread in program order. Destroying a handle the backend does
/// not know about is a no-op.
pub trait GpuBackend {
    fn create_texture(
        &mut self,
        image: &LoadedImage,
        params: TextureParams,
    ) -> Result<TextureId, BackendError>;

    /// Faces are ordered +X, +Y, +Z, -X, -Y, -Z.
    fn create_cubemap(
        &mut self,
        faces: &[LoadedImage; 6],
        params: TextureParams,
    ) -> Result<TextureId, BackendError>;

    fn destroy_texture(&mut self, texture: TextureId);

    /// Allocates a framebuffer with one color attachment of `desc.size`.
    fn create_framebuffer(&mut self, desc: &FramebufferDesc)
        -> Result<FramebufferId, BackendError>;

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId>;

    /// Releases the framebuffer and its color attachment.
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    fn generate_mipmap(&mut self, texture: TextureId);

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        init: BufferInit<'_>,
    ) -> Result<BufferId, BackendError>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    fn compile_shader(&mut self, stage: ShaderStage, source: &str)
        -> Result<ShaderId, BackendError>;

    fn delete_shader(&mut self, shader: ShaderId);

    fn link_program(&mut self, shaders: &[ShaderId]) -> Result<ProgramId, BackendError>;

    fn destroy_program(&mut self, program: ProgramId);

    fn create_geometry(&mut self, desc: &GeometryDesc<'_>) -> Result<GeometryId, BackendError>;

    fn destroy_geometry(&mut self, geometry: GeometryId);

    /// Binds the draw target and sets the viewport to cover it.
    fn bind_target(&mut self, target: RenderTarget, viewport: Viewport);

    fn use_program(&mut self, program: ProgramId);

    fn set_frame_uniforms(&mut self, program: ProgramId, uniforms: &FrameUniforms);

    fn set_uniform_f32(&mut self, program: ProgramId, name: &str, value: f32);

    fn set_uniform_u32(&mut self, program: ProgramId, name: &str, value: u32);

    /// Binds `texture` to texture unit `unit` and points the sampler uniform `uniform` at it.
    fn bind_texture(
        &mut self,
        program: ProgramId,
        unit: u32,
        uniform: &str,
        texture: TextureId,
        target: TextureTarget,
    );

    /// Draws the fullscreen quad with the current program and target.
    fn draw_fullscreen(&mut self);

    fn dispatch_compute(&mut self, groups: [u32; 3]);

    /// Draws overlay geometry, enabling `state` only for this call.
    fn draw_geometry(&mut self, geometry: GeometryId, draw: GeometryDraw, state: &RasterState);

    fn bind_storage_buffer(&mut self, binding: u32, buffer: Option<BufferId>);

    /// Makes shader storage writes visible to later reads.
    fn memory_barrier(&mut self);

    fn resource_counts(&self) -> ResourceCounts;
}

/// Live GPU objects held by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceCounts {
    pub textures: usize,
    pub framebuffers: usize,
    pub buffers: usize,
    pub shaders: usize,
    pub programs: usize,
    pub geometries: usize,
}

impl ResourceCounts {
    pub fn total(&self) -> usize {
        self.textures
            + self.framebuffers
            + self.buffers
            + self.shaders
            + self.programs
            + self.geometries
    }
}
