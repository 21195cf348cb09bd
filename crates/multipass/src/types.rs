use std::fmt;

use passconfig::{FilterMode, InternalFormat, SamplerSpec, Viewport, WrapMode};
use serde::{Deserialize, Serialize};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle!(
    /// 2D texture or cubemap owned by a backend.
    TextureId
);
handle!(
    /// Framebuffer together with its single color attachment.
    FramebufferId
);
handle!(BufferId);
handle!(ShaderId);
handle!(
    /// Linked program ready for `use_program`.
    ProgramId
);
handle!(
    /// Vertex array plus the vertex and index buffers it references.
    GeometryId
);

/// Framebuffer handle supplied by the host for presenting (0 is the window-system framebuffer).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct DefaultFramebuffer(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Compute => "compute",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureTarget {
    Texture2d,
    Cubemap,
}

/// Sampling state applied to a texture when it is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TextureParams {
    pub wrap: WrapMode,
    pub filter: FilterMode,
    pub mipmap: bool,
}

impl TextureParams {
    pub fn from_sampler(spec: &SamplerSpec) -> Self {
        Self {
            wrap: spec.wrap,
            filter: spec.filter,
            mipmap: spec.mipmap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub size: Viewport,
    pub format: InternalFormat,
    pub params: TextureParams,
}

/// Where a render pass writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderTarget {
    Default(DefaultFramebuffer),
    Framebuffer(FramebufferId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferKind {
    Storage,
    Vertex,
    Index,
}

#[derive(Debug, Clone, Copy)]
pub enum BufferInit<'a> {
    /// Uninitialised storage of the given byte length.
    Zeroed(usize),
    Bytes(&'a [u8]),
}

impl BufferInit<'_> {
    pub fn len(&self) -> usize {
        match self {
            BufferInit::Zeroed(len) => *len,
            BufferInit::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Primitive {
    #[serde(rename = "GL_POINTS")]
    Points,
    #[serde(rename = "GL_LINES")]
    Lines,
    #[serde(rename = "GL_LINE_STRIP")]
    LineStrip,
    #[serde(rename = "GL_LINE_LOOP")]
    LineLoop,
    #[serde(rename = "GL_TRIANGLES")]
    Triangles,
    #[serde(rename = "GL_TRIANGLE_STRIP")]
    TriangleStrip,
    #[serde(rename = "GL_TRIANGLE_FAN")]
    TriangleFan,
}

/// Fixed-function state a raster overlay may switch on for the duration of its draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "GL_DEPTH_TEST")]
    DepthTest,
    #[serde(rename = "GL_CULL_FACE")]
    CullFace,
    #[serde(rename = "GL_PROGRAM_POINT_SIZE")]
    ProgramPointSize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RasterState {
    pub capabilities: Vec<Capability>,
    pub blend: bool,
}

/// Float vertex attribute layout inside an interleaved vertex buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexAttribute {
    pub name: String,
    pub components: u8,
    pub offset: u32,
    pub stride: u32,
}

/// Geometry for a raster overlay. Empty buffers give an attribute-less vertex array for
/// procedural drawing via `gl_VertexID`.
#[derive(Debug, Clone, Copy)]
pub struct GeometryDesc<'a> {
    pub program: ProgramId,
    pub vertex_data: &'a [u8],
    pub index_data: &'a [u32],
    pub attributes: &'a [VertexAttribute],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GeometryDraw {
    pub primitive: Primitive,
    /// Vertex count for array draws, index count for indexed draws.
    pub count: u32,
    pub indexed: bool,
    pub instances: u32,
}
