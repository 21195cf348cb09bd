//! OpenGL 4.3 backend over `glow`.
//!
//! The host creates the window and the GL context, wraps it in a `glow::Context` and hands it
//! over. Every handle the pipeline sees is a small integer id mapped to the native object here.
use std::collections::HashMap;
use std::num::NonZeroU32;

use glow::HasContext;
use passconfig::{FilterMode, InternalFormat, Viewport, WrapMode};

use super::{GpuBackend, ResourceCounts};
use crate::assets::LoadedImage;
use crate::error::BackendError;
use crate::types::{
    BufferId, BufferInit, BufferKind, Capability, FramebufferDesc, FramebufferId, GeometryDesc,
    GeometryDraw, GeometryId, Primitive, ProgramId, RasterState, RenderTarget, ShaderId,
    ShaderStage, TextureId, TextureParams, TextureTarget,
};
use crate::uniforms::FrameUniforms;

const QUAD_VERTICES: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];
const QUAD_INDICES: [u32; 6] = [2, 0, 1, 0, 2, 3];

/// GL order of the faces `create_cubemap` receives as +X, +Y, +Z, -X, -Y, -Z.
const CUBE_FACES: [u32; 6] = [
    glow::TEXTURE_CUBE_MAP_POSITIVE_X,
    glow::TEXTURE_CUBE_MAP_POSITIVE_Y,
    glow::TEXTURE_CUBE_MAP_POSITIVE_Z,
    glow::TEXTURE_CUBE_MAP_NEGATIVE_X,
    glow::TEXTURE_CUBE_MAP_NEGATIVE_Y,
    glow::TEXTURE_CUBE_MAP_NEGATIVE_Z,
];

struct GlTexture {
    native: glow::NativeTexture,
    target: u32,
    owned_by_framebuffer: bool,
}

struct GlGeometry {
    vao: glow::NativeVertexArray,
    vertex_buffer: Option<glow::NativeBuffer>,
    index_buffer: Option<glow::NativeBuffer>,
}

/// [`GpuBackend`] driving a live OpenGL context.
pub struct GlBackend {
    gl: glow::Context,
    next_id: u32,
    textures: HashMap<TextureId, GlTexture>,
    framebuffers: HashMap<FramebufferId, (glow::NativeFramebuffer, TextureId)>,
    buffers: HashMap<BufferId, glow::NativeBuffer>,
    shaders: HashMap<ShaderId, glow::NativeShader>,
    programs: HashMap<ProgramId, glow::NativeProgram>,
    geometries: HashMap<GeometryId, GlGeometry>,
    quad: GlGeometry,
}

impl GlBackend {
    /// Takes ownership of the host's context and uploads the fullscreen quad.
    pub fn new(gl: glow::Context) -> Result<Self, BackendError> {
        let quad = unsafe { upload_quad(&gl)? };
        Ok(Self {
            gl,
            next_id: 0,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            geometries: HashMap::new(),
            quad,
        })
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    /// Releases the quad and hands the context back. Pipeline resources must already be gone.
    pub fn into_context(self) -> glow::Context {
        unsafe { delete_geometry(&self.gl, &self.quad) };
        self.gl
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn program(&self, program: ProgramId) -> Option<glow::NativeProgram> {
        let native = self.programs.get(&program).copied();
        if native.is_none() {
            tracing::warn!(%program, "uniform upload for unknown program");
        }
        native
    }

    fn location(&self, program: ProgramId, name: &str) -> Option<glow::UniformLocation> {
        let native = self.program(program)?;
        unsafe { self.gl.get_uniform_location(native, name) }
    }
}

fn alloc_err(what: &str, error: String) -> BackendError {
    BackendError::Allocation(format!("{what}: {error}"))
}

fn texel_layout(format: InternalFormat) -> (u32, u32, u32) {
    match format {
        InternalFormat::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        InternalFormat::R8 => (glow::R8, glow::RED, glow::UNSIGNED_BYTE),
        InternalFormat::Rg8 => (glow::RG8, glow::RG, glow::UNSIGNED_BYTE),
        InternalFormat::Rgba16F => (glow::RGBA16F, glow::RGBA, glow::FLOAT),
        InternalFormat::R32F => (glow::R32F, glow::RED, glow::FLOAT),
        InternalFormat::Rg32F => (glow::RG32F, glow::RG, glow::FLOAT),
        InternalFormat::Rgba32F => (glow::RGBA32F, glow::RGBA, glow::FLOAT),
    }
}

fn gl_primitive(primitive: Primitive) -> u32 {
    match primitive {
        Primitive::Points => glow::POINTS,
        Primitive::Lines => glow::LINES,
        Primitive::LineStrip => glow::LINE_STRIP,
        Primitive::LineLoop => glow::LINE_LOOP,
        Primitive::Triangles => glow::TRIANGLES,
        Primitive::TriangleStrip => glow::TRIANGLE_STRIP,
        Primitive::TriangleFan => glow::TRIANGLE_FAN,
    }
}

fn gl_capability(capability: Capability) -> u32 {
    match capability {
        Capability::DepthTest => glow::DEPTH_TEST,
        Capability::CullFace => glow::CULL_FACE,
        Capability::ProgramPointSize => glow::PROGRAM_POINT_SIZE,
    }
}

fn gl_stage(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        ShaderStage::Geometry => glow::GEOMETRY_SHADER,
        ShaderStage::Compute => glow::COMPUTE_SHADER,
    }
}

unsafe fn apply_params(gl: &glow::Context, target: u32, params: TextureParams) {
    let wrap = match params.wrap {
        WrapMode::Repeat => glow::REPEAT,
        WrapMode::Clamp => glow::CLAMP_TO_EDGE,
    };
    let filter = match params.filter {
        FilterMode::Linear => glow::LINEAR,
        FilterMode::Nearest => glow::NEAREST,
    };
    gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, wrap as i32);
    gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, wrap as i32);
    if target == glow::TEXTURE_CUBE_MAP {
        gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_R, wrap as i32);
    }
    gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, filter as i32);
    if params.mipmap {
        let min_filter = match params.filter {
            FilterMode::Linear => glow::LINEAR_MIPMAP_LINEAR,
            FilterMode::Nearest => glow::NEAREST,
        };
        gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, min_filter as i32);
        gl.tex_parameter_i32(target, glow::TEXTURE_BASE_LEVEL, 0);
        gl.tex_parameter_i32(target, glow::TEXTURE_MAX_LEVEL, 10);
    } else {
        gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, filter as i32);
    }
}

unsafe fn upload_quad(gl: &glow::Context) -> Result<GlGeometry, BackendError> {
    let vao = gl
        .create_vertex_array()
        .map_err(|e| alloc_err("quad vertex array", e))?;
    let vbo = gl
        .create_buffer()
        .map_err(|e| alloc_err("quad vertex buffer", e))?;
    let ebo = gl
        .create_buffer()
        .map_err(|e| alloc_err("quad index buffer", e))?;

    gl.bind_vertex_array(Some(vao));
    gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
    gl.buffer_data_u8_slice(
        glow::ARRAY_BUFFER,
        bytemuck::cast_slice(&QUAD_VERTICES),
        glow::STATIC_DRAW,
    );
    gl.enable_vertex_attrib_array(0);
    gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 8, 0);
    gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ebo));
    gl.buffer_data_u8_slice(
        glow::ELEMENT_ARRAY_BUFFER,
        bytemuck::cast_slice(&QUAD_INDICES),
        glow::STATIC_DRAW,
    );
    gl.bind_vertex_array(None);
    gl.bind_buffer(glow::ARRAY_BUFFER, None);
    gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, None);

    Ok(GlGeometry {
        vao,
        vertex_buffer: Some(vbo),
        index_buffer: Some(ebo),
    })
}

unsafe fn delete_geometry(gl: &glow::Context, geometry: &GlGeometry) {
    gl.delete_vertex_array(geometry.vao);
    if let Some(buffer) = geometry.vertex_buffer {
        gl.delete_buffer(buffer);
    }
    if let Some(buffer) = geometry.index_buffer {
        gl.delete_buffer(buffer);
    }
}

impl GpuBackend for GlBackend {
    fn create_texture(
        &mut self,
        image: &LoadedImage,
        params: TextureParams,
    ) -> Result<TextureId, BackendError> {
        let gl = &self.gl;
        let native = unsafe {
            let native = gl
                .create_texture()
                .map_err(|e| alloc_err("texture", e))?;
            gl.bind_texture(glow::TEXTURE_2D, Some(native));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                image.width as i32,
                image.height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(&image.pixels)),
            );
            apply_params(gl, glow::TEXTURE_2D, params);
            if params.mipmap {
                gl.generate_mipmap(glow::TEXTURE_2D);
            }
            gl.bind_texture(glow::TEXTURE_2D, None);
            native
        };
        let id = TextureId(self.allocate_id());
        self.textures.insert(
            id,
            GlTexture {
                native,
                target: glow::TEXTURE_2D,
                owned_by_framebuffer: false,
            },
        );
        Ok(id)
    }

    fn create_cubemap(
        &mut self,
        faces: &[LoadedImage; 6],
        params: TextureParams,
    ) -> Result<TextureId, BackendError> {
        let gl = &self.gl;
        let native = unsafe {
            let native = gl
                .create_texture()
                .map_err(|e| alloc_err("cubemap", e))?;
            gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(native));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            for (face, image) in CUBE_FACES.iter().zip(faces) {
                gl.tex_image_2d(
                    *face,
                    0,
                    glow::RGBA8 as i32,
                    image.width as i32,
                    image.height as i32,
                    0,
                    glow::RGBA,
                    glow::UNSIGNED_BYTE,
                    glow::PixelUnpackData::Slice(Some(&image.pixels)),
                );
            }
            apply_params(gl, glow::TEXTURE_CUBE_MAP, params);
            if params.mipmap {
                gl.generate_mipmap(glow::TEXTURE_CUBE_MAP);
            }
            gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);
            native
        };
        let id = TextureId(self.allocate_id());
        self.textures.insert(
            id,
            GlTexture {
                native,
                target: glow::TEXTURE_CUBE_MAP,
                owned_by_framebuffer: false,
            },
        );
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        match self.textures.get(&texture) {
            Some(entry) if !entry.owned_by_framebuffer => {
                unsafe { self.gl.delete_texture(entry.native) };
                self.textures.remove(&texture);
            }
            _ => tracing::warn!(%texture, "release of unknown texture"),
        }
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDesc,
    ) -> Result<FramebufferId, BackendError> {
        let (internal, format, ty) = texel_layout(desc.format);
        let gl = &self.gl;
        let (framebuffer, texture) = unsafe {
            let texture = gl
                .create_texture()
                .map_err(|e| alloc_err("framebuffer texture", e))?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal as i32,
                desc.size.width as i32,
                desc.size.height as i32,
                0,
                format,
                ty,
                glow::PixelUnpackData::Slice(None),
            );
            apply_params(gl, glow::TEXTURE_2D, desc.params);
            gl.bind_texture(glow::TEXTURE_2D, None);

            let framebuffer = match gl.create_framebuffer() {
                Ok(framebuffer) => framebuffer,
                Err(e) => {
                    gl.delete_texture(texture);
                    return Err(alloc_err("framebuffer", e));
                }
            };
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(framebuffer);
                gl.delete_texture(texture);
                return Err(BackendError::Allocation(format!(
                    "framebuffer {} incomplete: 0x{status:x}",
                    desc.size
                )));
            }
            (framebuffer, texture)
        };

        let framebuffer_id = FramebufferId(self.allocate_id());
        let texture_id = TextureId(self.allocate_id());
        self.textures.insert(
            texture_id,
            GlTexture {
                native: texture,
                target: glow::TEXTURE_2D,
                owned_by_framebuffer: true,
            },
        );
        self.framebuffers
            .insert(framebuffer_id, (framebuffer, texture_id));
        Ok(framebuffer_id)
    }

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.framebuffers.get(&framebuffer).map(|(_, texture)| *texture)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        let Some((native, texture)) = self.framebuffers.remove(&framebuffer) else {
            tracing::warn!(%framebuffer, "release of unknown framebuffer");
            return;
        };
        unsafe { self.gl.delete_framebuffer(native) };
        if let Some(entry) = self.textures.remove(&texture) {
            unsafe { self.gl.delete_texture(entry.native) };
        }
    }

    fn generate_mipmap(&mut self, texture: TextureId) {
        if let Some(entry) = self.textures.get(&texture) {
            unsafe {
                self.gl.bind_texture(entry.target, Some(entry.native));
                self.gl.generate_mipmap(entry.target);
                self.gl.bind_texture(entry.target, None);
            }
        }
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        init: BufferInit<'_>,
    ) -> Result<BufferId, BackendError> {
        let (target, usage) = match kind {
            BufferKind::Storage => (glow::SHADER_STORAGE_BUFFER, glow::DYNAMIC_COPY),
            BufferKind::Vertex => (glow::ARRAY_BUFFER, glow::STATIC_DRAW),
            BufferKind::Index => (glow::ELEMENT_ARRAY_BUFFER, glow::STATIC_DRAW),
        };
        let size = i32::try_from(init.len())
            .map_err(|_| BackendError::Allocation(format!("buffer of {} bytes", init.len())))?;
        let gl = &self.gl;
        let native = unsafe {
            let native = gl.create_buffer().map_err(|e| alloc_err("buffer", e))?;
            gl.bind_buffer(target, Some(native));
            match init {
                BufferInit::Zeroed(_) => {
                    let zeros = vec![0u8; init.len()];
                    gl.buffer_data_u8_slice(target, &zeros, usage);
                }
                BufferInit::Bytes(bytes) => gl.buffer_data_u8_slice(target, bytes, usage),
            }
            gl.bind_buffer(target, None);
            native
        };
        tracing::debug!(?kind, size, "allocated GL buffer");
        let id = BufferId(self.allocate_id());
        self.buffers.insert(id, native);
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        match self.buffers.remove(&buffer) {
            Some(native) => unsafe { self.gl.delete_buffer(native) },
            None => tracing::warn!(%buffer, "release of unknown buffer"),
        }
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderId, BackendError> {
        let gl = &self.gl;
        let native = unsafe {
            let native = gl
                .create_shader(gl_stage(stage))
                .map_err(|e| alloc_err("shader", e))?;
            gl.shader_source(native, source);
            gl.compile_shader(native);
            if !gl.get_shader_compile_status(native) {
                let log = gl.get_shader_info_log(native);
                gl.delete_shader(native);
                return Err(BackendError::Compile { stage, log });
            }
            native
        };
        let id = ShaderId(self.allocate_id());
        self.shaders.insert(id, native);
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if let Some(native) = self.shaders.remove(&shader) {
            unsafe { self.gl.delete_shader(native) };
        }
    }

    fn link_program(&mut self, shaders: &[ShaderId]) -> Result<ProgramId, BackendError> {
        let natives = shaders
            .iter()
            .map(|id| {
                self.shaders
                    .get(id)
                    .copied()
                    .ok_or_else(|| BackendError::Link(format!("unknown shader {id}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let gl = &self.gl;
        let program = unsafe {
            let program = gl
                .create_program()
                .map_err(|e| alloc_err("program", e))?;
            for shader in &natives {
                gl.attach_shader(program, *shader);
            }
            gl.link_program(program);
            for shader in &natives {
                gl.detach_shader(program, *shader);
            }
            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(BackendError::Link(log));
            }
            program
        };
        let id = ProgramId(self.allocate_id());
        self.programs.insert(id, program);
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        match self.programs.remove(&program) {
            Some(native) => unsafe { self.gl.delete_program(native) },
            None => tracing::warn!(%program, "release of unknown program"),
        }
    }

    fn create_geometry(&mut self, desc: &GeometryDesc<'_>) -> Result<GeometryId, BackendError> {
        let program = self.programs.get(&desc.program).copied().ok_or_else(|| {
            BackendError::Allocation(format!("geometry for unknown program {}", desc.program))
        })?;
        let gl = &self.gl;
        let geometry = unsafe {
            let vao = gl
                .create_vertex_array()
                .map_err(|e| alloc_err("vertex array", e))?;
            gl.bind_vertex_array(Some(vao));
            let mut geometry = GlGeometry {
                vao,
                vertex_buffer: None,
                index_buffer: None,
            };
            if !desc.vertex_data.is_empty() {
                let vbo = gl
                    .create_buffer()
                    .map_err(|e| alloc_err("vertex buffer", e))?;
                gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
                gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, desc.vertex_data, glow::STATIC_DRAW);
                geometry.vertex_buffer = Some(vbo);
                for attribute in desc.attributes {
                    let Some(location) = gl.get_attrib_location(program, &attribute.name) else {
                        tracing::warn!(attribute = %attribute.name, "vertex attribute not active in program");
                        continue;
                    };
                    gl.enable_vertex_attrib_array(location);
                    gl.vertex_attrib_pointer_f32(
                        location,
                        i32::from(attribute.components),
                        glow::FLOAT,
                        false,
                        attribute.stride as i32,
                        attribute.offset as i32,
                    );
                }
            }
            if !desc.index_data.is_empty() {
                let ebo = gl
                    .create_buffer()
                    .map_err(|e| alloc_err("index buffer", e))?;
                gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ebo));
                gl.buffer_data_u8_slice(
                    glow::ELEMENT_ARRAY_BUFFER,
                    bytemuck::cast_slice(desc.index_data),
                    glow::STATIC_DRAW,
                );
                geometry.index_buffer = Some(ebo);
            }
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, None);
            geometry
        };
        let id = GeometryId(self.allocate_id());
        self.geometries.insert(id, geometry);
        Ok(id)
    }

    fn destroy_geometry(&mut self, geometry: GeometryId) {
        match self.geometries.remove(&geometry) {
            Some(entry) => unsafe { delete_geometry(&self.gl, &entry) },
            None => tracing::warn!(%geometry, "release of unknown geometry"),
        }
    }

    fn bind_target(&mut self, target: RenderTarget, viewport: Viewport) {
        let native = match target {
            RenderTarget::Default(handle) => NonZeroU32::new(handle.0).map(glow::NativeFramebuffer),
            RenderTarget::Framebuffer(id) => self.framebuffers.get(&id).map(|(fb, _)| *fb),
        };
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, native);
            self.gl
                .viewport(0, 0, viewport.width as i32, viewport.height as i32);
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        let native = self.programs.get(&program).copied();
        unsafe { self.gl.use_program(native) };
    }

    fn set_frame_uniforms(&mut self, program: ProgramId, uniforms: &FrameUniforms) {
        let Some(native) = self.program(program) else {
            return;
        };
        let gl = &self.gl;
        unsafe {
            let loc = |name: &str| gl.get_uniform_location(native, name);
            gl.uniform_1_f32(loc("iTime").as_ref(), uniforms.time);
            gl.uniform_1_i32(loc("iFrame").as_ref(), uniforms.frame);
            let [w, h, aspect] = uniforms.resolution;
            gl.uniform_3_f32(loc("iResolution").as_ref(), w, h, aspect);
            let [x, y, z, m] = uniforms.mouse;
            gl.uniform_4_f32(loc("iMouse").as_ref(), x, y, z, m);
            gl.uniform_1_u32(loc("iKey").as_ref(), uniforms.key);
            gl.uniform_1_u32(loc("iKeyModifiers").as_ref(), uniforms.key_modifiers);
        }
    }

    fn set_uniform_f32(&mut self, program: ProgramId, name: &str, value: f32) {
        let location = self.location(program, name);
        unsafe { self.gl.uniform_1_f32(location.as_ref(), value) };
    }

    fn set_uniform_u32(&mut self, program: ProgramId, name: &str, value: u32) {
        let location = self.location(program, name);
        unsafe { self.gl.uniform_1_u32(location.as_ref(), value) };
    }

    fn bind_texture(
        &mut self,
        program: ProgramId,
        unit: u32,
        uniform: &str,
        texture: TextureId,
        target: TextureTarget,
    ) {
        let Some(entry) = self.textures.get(&texture) else {
            tracing::warn!(%texture, uniform, "binding unknown texture");
            return;
        };
        let native = entry.native;
        let location = self.location(program, uniform);
        let gl = &self.gl;
        unsafe {
            gl.active_texture(glow::TEXTURE0 + unit);
            match target {
                TextureTarget::Texture2d => gl.bind_texture(glow::TEXTURE_2D, Some(native)),
                TextureTarget::Cubemap => {
                    gl.enable(glow::TEXTURE_CUBE_MAP_SEAMLESS);
                    gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(native));
                }
            }
            gl.uniform_1_i32(location.as_ref(), unit as i32);
        }
    }

    fn draw_fullscreen(&mut self) {
        unsafe {
            self.gl.bind_vertex_array(Some(self.quad.vao));
            self.gl.draw_elements(
                glow::TRIANGLES,
                QUAD_INDICES.len() as i32,
                glow::UNSIGNED_INT,
                0,
            );
            self.gl.bind_vertex_array(None);
        }
    }

    fn dispatch_compute(&mut self, groups: [u32; 3]) {
        let [x, y, z] = groups;
        unsafe { self.gl.dispatch_compute(x, y, z) };
    }

    fn draw_geometry(&mut self, geometry: GeometryId, draw: GeometryDraw, state: &RasterState) {
        let Some(entry) = self.geometries.get(&geometry) else {
            tracing::warn!(%geometry, "drawing unknown geometry");
            return;
        };
        let gl = &self.gl;
        unsafe {
            let saved: Vec<(u32, bool)> = state
                .capabilities
                .iter()
                .map(|cap| gl_capability(*cap))
                .chain(state.blend.then_some(glow::BLEND))
                .map(|cap| (cap, gl.is_enabled(cap)))
                .collect();
            for (cap, _) in &saved {
                gl.enable(*cap);
            }
            if state.blend {
                gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            }

            let mode = gl_primitive(draw.primitive);
            let count = draw.count as i32;
            let instances = draw.instances.max(1) as i32;
            gl.bind_vertex_array(Some(entry.vao));
            if draw.indexed {
                gl.draw_elements_instanced(mode, count, glow::UNSIGNED_INT, 0, instances);
            } else {
                gl.draw_arrays_instanced(mode, 0, count, instances);
            }
            gl.bind_vertex_array(None);

            for (cap, was_enabled) in saved {
                if !was_enabled {
                    gl.disable(cap);
                }
            }
        }
    }

    fn bind_storage_buffer(&mut self, binding: u32, buffer: Option<BufferId>) {
        let native = buffer.and_then(|id| self.buffers.get(&id).copied());
        unsafe {
            self.gl
                .bind_buffer_base(glow::SHADER_STORAGE_BUFFER, binding, native)
        };
    }

    fn memory_barrier(&mut self) {
        unsafe { self.gl.memory_barrier(glow::SHADER_STORAGE_BARRIER_BIT) };
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
