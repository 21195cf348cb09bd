use std::collections::HashMap;

use passconfig::{InternalFormat, Viewport};
use serde::Serialize;

use super::{GpuBackend, ResourceCounts};
use crate::assets::LoadedImage;
use crate::error::BackendError;
use crate::types::{
    BufferId, BufferInit, BufferKind, FramebufferDesc, FramebufferId, GeometryDesc, GeometryDraw,
    GeometryId, ProgramId, RasterState, RenderTarget, ShaderId, ShaderStage, TextureId,
    TextureParams, TextureTarget,
};
use crate::uniforms::FrameUniforms;

/// One call recorded by [`HeadlessBackend`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    BindTarget {
        target: RenderTarget,
        viewport: Viewport,
    },
    UseProgram {
        program: ProgramId,
    },
    FrameUniforms {
        program: ProgramId,
        frame: i32,
        time: f32,
    },
    UniformF32 {
        program: ProgramId,
        name: String,
        value: f32,
    },
    UniformU32 {
        program: ProgramId,
        name: String,
        value: u32,
    },
    BindTexture {
        program: ProgramId,
        unit: u32,
        uniform: String,
        texture: TextureId,
        target: TextureTarget,
    },
    GenerateMipmap {
        texture: TextureId,
    },
    DrawFullscreen,
    Dispatch {
        groups: [u32; 3],
    },
    DrawGeometry {
        geometry: GeometryId,
        draw: GeometryDraw,
        state: RasterState,
    },
    BindStorage {
        binding: u32,
        buffer: Option<BufferId>,
    },
    MemoryBarrier,
}

impl Command {
    /// Whether the command produces GPU work (draw or dispatch).
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Command::DrawFullscreen | Command::Dispatch { .. } | Command::DrawGeometry { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub target: TextureTarget,
    pub params: TextureParams,
    pub format: InternalFormat,
    /// Set for framebuffer color attachments.
    pub attachment_of: Option<FramebufferId>,
}

#[derive(Debug, Clone)]
struct ShaderRecord {
    stage: ShaderStage,
}

#[derive(Debug, Clone)]
struct ProgramRecord {
    stages: Vec<ShaderStage>,
}

/// In-memory [`GpuBackend`] that validates handles, counts live objects, and records every
/// binding and draw call.
///
/// Shader sources containing a `#error` directive fail to compile, mirroring what a GLSL
/// preprocessor does with them; nothing else is parsed.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u32,
    textures: HashMap<TextureId, TextureInfo>,
    framebuffers: HashMap<FramebufferId, (TextureId, Viewport)>,
    buffers: HashMap<BufferId, (BufferKind, usize)>,
    shaders: HashMap<ShaderId, ShaderRecord>,
    programs: HashMap<ProgramId, ProgramRecord>,
    geometries: HashMap<GeometryId, ProgramId>,
    commands: Vec<Command>,
    stale_releases: usize,
    current_program: Option<ProgramId>,
    rejected_patterns: Vec<String>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every shader whose source contains `pattern` fail to compile.
    pub fn with_compile_failure(mut self, pattern: impl Into<String>) -> Self {
        self.rejected_patterns.push(pattern.into());
        self
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|cmd| cmd.is_draw()).count()
    }

    /// Destroy calls that referenced unknown or already released handles.
    pub fn stale_releases(&self) -> usize {
        self.stale_releases
    }

    pub fn texture_info(&self, texture: TextureId) -> Option<&TextureInfo> {
        self.textures.get(&texture)
    }

    pub fn framebuffer_size(&self, framebuffer: FramebufferId) -> Option<Viewport> {
        self.framebuffers.get(&framebuffer).map(|(_, size)| *size)
    }

    pub fn buffer_len(&self, buffer: BufferId) -> Option<usize> {
        self.buffers.get(&buffer).map(|(_, len)| *len)
    }

    fn stale(&mut self, what: &str, id: u32) {
        tracing::warn!(kind = what, id, "release of unknown GPU handle");
        self.stale_releases += 1;
    }

    fn check_image(image: &LoadedImage) -> Result<(), BackendError> {
        let expected = image.width as usize * image.height as usize * 4;
        if image.width == 0 || image.height == 0 {
            return Err(BackendError::Allocation(format!(
                "texture size {}x{} is empty",
                image.width, image.height
            )));
        }
        if image.pixels.len() != expected {
            return Err(BackendError::Allocation(format!(
                "expected {expected} bytes of RGBA8 pixels, got {}",
                image.pixels.len()
            )));
        }
        Ok(())
    }

    fn record(&mut self, command: Command) {
        self.commands.push(command);
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_texture(
        &mut self,
        image: &LoadedImage,
        params: TextureParams,
    ) -> Result<TextureId, BackendError> {
        Self::check_image(image)?;
        let id = TextureId(self.allocate_id());
        self.textures.insert(
            id,
            TextureInfo {
                width: image.width,
                height: image.height,
                target: TextureTarget::Texture2d,
                params,
                format: InternalFormat::Rgba8,
                attachment_of: None,
            },
        );
        Ok(id)
    }

    fn create_cubemap(
        &mut self,
        faces: &[LoadedImage; 6],
        params: TextureParams,
    ) -> Result<TextureId, BackendError> {
        for face in faces {
            Self::check_image(face)?;
        }
        let id = TextureId(self.allocate_id());
        self.textures.insert(
            id,
            TextureInfo {
                width: faces[0].width,
                height: faces[0].height,
                target: TextureTarget::Cubemap,
                params,
                format: InternalFormat::Rgba8,
                attachment_of: None,
            },
        );
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        match self.textures.get(&texture) {
            Some(info) if info.attachment_of.is_none() => {
                self.textures.remove(&texture);
            }
            _ => self.stale("texture", texture.0),
        }
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDesc,
    ) -> Result<FramebufferId, BackendError> {
        if desc.size.width == 0 || desc.size.height == 0 {
            return Err(BackendError::Allocation(format!(
                "framebuffer size {} is empty",
                desc.size
            )));
        }
        let framebuffer = FramebufferId(self.allocate_id());
        let texture = TextureId(self.allocate_id());
        self.textures.insert(
            texture,
            TextureInfo {
                width: desc.size.width,
                height: desc.size.height,
                target: TextureTarget::Texture2d,
                params: desc.params,
                format: desc.format,
                attachment_of: Some(framebuffer),
            },
        );
        self.framebuffers.insert(framebuffer, (texture, desc.size));
        Ok(framebuffer)
    }

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.framebuffers
            .get(&framebuffer)
            .map(|(texture, _)| *texture)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        match self.framebuffers.remove(&framebuffer) {
            Some((texture, _)) => {
                self.textures.remove(&texture);
            }
            None => self.stale("framebuffer", framebuffer.0),
        }
    }

    fn generate_mipmap(&mut self, texture: TextureId) {
        self.record(Command::GenerateMipmap { texture });
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        init: BufferInit<'_>,
    ) -> Result<BufferId, BackendError> {
        if init.is_empty() && kind == BufferKind::Storage {
            return Err(BackendError::Allocation(
                "storage buffer size must be greater than zero".into(),
            ));
        }
        let id = BufferId(self.allocate_id());
        self.buffers.insert(id, (kind, init.len()));
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_none() {
            self.stale("buffer", buffer.0);
        }
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderId, BackendError> {
        if let Some((line, directive)) = source
            .lines()
            .enumerate()
            .find(|(_, line)| line.trim_start().starts_with("#error"))
        {
            return Err(BackendError::Compile {
                stage,
                log: format!("0:{}: {}", line + 1, directive.trim()),
            });
        }
        if let Some(pattern) = self
            .rejected_patterns
            .iter()
            .find(|pattern| source.contains(pattern.as_str()))
        {
            return Err(BackendError::Compile {
                stage,
                log: format!("0:0: rejected '{pattern}'"),
            });
        }
        let id = ShaderId(self.allocate_id());
        self.shaders.insert(id, ShaderRecord { stage });
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if self.shaders.remove(&shader).is_none() {
            self.stale("shader", shader.0);
        }
    }

    fn link_program(&mut self, shaders: &[ShaderId]) -> Result<ProgramId, BackendError> {
        let mut stages = Vec::with_capacity(shaders.len());
        for shader in shaders {
            let record = self
                .shaders
                .get(shader)
                .ok_or_else(|| BackendError::Link(format!("unknown shader {shader}")))?;
            stages.push(record.stage);
        }
        let has = |stage| stages.contains(&stage);
        let valid = if has(ShaderStage::Compute) {
            stages.len() == 1
        } else {
            has(ShaderStage::Vertex) && has(ShaderStage::Fragment)
        };
        if !valid {
            return Err(BackendError::Link(format!(
                "incompatible stage set {stages:?}"
            )));
        }
        let id = ProgramId(self.allocate_id());
        self.programs.insert(id, ProgramRecord { stages });
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_none() {
            self.stale("program", program.0);
        }
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn create_geometry(&mut self, desc: &GeometryDesc<'_>) -> Result<GeometryId, BackendError> {
        let Some(program) = self.programs.get(&desc.program) else {
            return Err(BackendError::Allocation(format!(
                "geometry references unknown program {}",
                desc.program
            )));
        };
        if program.stages.contains(&ShaderStage::Compute) {
            return Err(BackendError::Allocation(
                "geometry cannot use a compute program".into(),
            ));
        }
        for attribute in desc.attributes {
            if !(1..=4).contains(&attribute.components) {
                return Err(BackendError::Allocation(format!(
                    "attribute '{}' has {} components",
                    attribute.name, attribute.components
                )));
            }
        }
        let id = GeometryId(self.allocate_id());
        self.geometries.insert(id, desc.program);
        Ok(id)
    }

    fn destroy_geometry(&mut self, geometry: GeometryId) {
        if self.geometries.remove(&geometry).is_none() {
            self.stale("geometry", geometry.0);
        }
    }

    fn bind_target(&mut self, target: RenderTarget, viewport: Viewport) {
        self.record(Command::BindTarget { target, viewport });
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
        self.record(Command::UseProgram { program });
    }

    fn set_frame_uniforms(&mut self, program: ProgramId, uniforms: &FrameUniforms) {
        self.record(Command::FrameUniforms {
            program,
            frame: uniforms.frame,
            time: uniforms.time,
        });
    }

    fn set_uniform_f32(&mut self, program: ProgramId, name: &str, value: f32) {
        self.record(Command::UniformF32 {
            program,
            name: name.to_string(),
            value,
        });
    }

    fn set_uniform_u32(&mut self, program: ProgramId, name: &str, value: u32) {
        self.record(Command::UniformU32 {
            program,
            name: name.to_string(),
            value,
        });
    }

    fn bind_texture(
        &mut self,
        program: ProgramId,
        unit: u32,
        uniform: &str,
        texture: TextureId,
        target: TextureTarget,
    ) {
        self.record(Command::BindTexture {
            program,
            unit,
            uniform: uniform.to_string(),
            texture,
            target,
        });
    }

    fn draw_fullscreen(&mut self) {
        self.record(Command::DrawFullscreen);
    }

    fn dispatch_compute(&mut self, groups: [u32; 3]) {
        self.record(Command::Dispatch { groups });
    }

    fn draw_geometry(&mut self, geometry: GeometryId, draw: GeometryDraw, state: &RasterState) {
        self.record(Command::DrawGeometry {
            geometry,
            draw,
            state: state.clone(),
        });
    }

    fn bind_storage_buffer(&mut self, binding: u32, buffer: Option<BufferId>) {
        self.record(Command::BindStorage { binding, buffer });
    }

    fn memory_barrier(&mut self) {
        self.record(Command::MemoryBarrier);
    }

    fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            textures: self.textures.len(),
            framebuffers: self.framebuffers.len(),
            buffers: self.buffers.len(),
            shaders: self.shaders.len(),
            programs: self.programs.len(),
            geometries: self.geometries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passconfig::{FilterMode, WrapMode};

    fn desc(width: u32, height: u32) -> FramebufferDesc {
        FramebufferDesc {
            size: Viewport::new(width, height),
            format: InternalFormat::Rgba8,
            params: TextureParams {
                wrap: WrapMode::Clamp,
                filter: FilterMode::Linear,
                mipmap: false,
            },
        }
    }

    #[test]
    fn framebuffers_own_their_attachment() {
        let mut backend = HeadlessBackend::new();
        let fb = backend.create_framebuffer(&desc(4, 4)).unwrap();
        let texture = backend.framebuffer_texture(fb).unwrap();
        assert_eq!(backend.texture_info(texture).unwrap().attachment_of, Some(fb));
        assert_eq!(backend.resource_counts().textures, 1);

        backend.destroy_texture(texture);
        assert_eq!(backend.stale_releases(), 1);

        backend.destroy_framebuffer(fb);
        assert_eq!(backend.resource_counts().total(), 0);
    }

    #[test]
    fn error_directive_fails_compilation() {
        let mut backend = HeadlessBackend::new();
        let err = backend
            .compile_shader(ShaderStage::Fragment, "void f() {}\n  #error broken pass\n")
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Compile {
                stage: ShaderStage::Fragment,
                log: "0:2: #error broken pass".into(),
            }
        );
        assert_eq!(backend.resource_counts().shaders, 0);
    }

    #[test]
    fn link_requires_a_complete_stage_set() {
        let mut backend = HeadlessBackend::new();
        let vs = backend.compile_shader(ShaderStage::Vertex, "").unwrap();
        assert!(matches!(
            backend.link_program(&[vs]).unwrap_err(),
            BackendError::Link(_)
        ));
        let fs = backend.compile_shader(ShaderStage::Fragment, "").unwrap();
        let program = backend.link_program(&[vs, fs]).unwrap();
        backend.destroy_program(program);
        backend.destroy_program(program);
        assert_eq!(backend.stale_releases(), 1);
    }

    #[test]
    fn rejects_empty_allocations() {
        let mut backend = HeadlessBackend::new();
        assert!(backend.create_framebuffer(&desc(0, 8)).is_err());
        assert!(backend
            .create_buffer(BufferKind::Storage, BufferInit::Zeroed(0))
            .is_err());
        let image = LoadedImage {
            width: 2,
            height: 2,
            pixels: vec![0; 3],
        };
        assert!(backend
            .create_texture(&image, TextureParams::default())
            .is_err());
        assert_eq!(backend.resource_counts().total(), 0);
    }
}
