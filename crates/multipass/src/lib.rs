//! Multipass GLSL pipeline driven by the configuration block embedded in a shader source.
//!
//! The pipeline turns one source file into a set of GPU passes and runs them every frame:
//!
//! ```text
//!   shader source
//!        │ passconfig::parse + validate
//!        ▼
//!   PipelineConfig ──▶ PluginHost::configure_all      (storage buffers, overlays, textures)
//!        │        ──▶ ResourceProvisioner::configure  (images, framebuffer pairs)
//!        │        ──▶ ProgramBuilder::build_all       (synthesized stages, linked programs)
//!        ▼
//!   MultipassPipeline::draw_frame ──▶ FrameExecutor ──▶ GpuBackend
//! ```
//!
//! Everything GPU-side goes through the [`GpuBackend`] trait. [`HeadlessBackend`] records the
//! command stream and tracks live objects, which is what the tests and the `shaderhost` CLI use;
//! [`GlBackend`] (feature `gl`) drives OpenGL 4.3 through `glow` on a context owned by the host.
//! [`MultipassPipeline`] is the explicit context object tying a backend, an image loader and the
//! live configuration generation together.
mod assets;
pub mod backend;
pub mod compile;
mod error;
mod executor;
mod offscreen;
mod pipeline;
pub mod plugins;
mod resources;
mod types;
mod uniforms;

pub use assets::{AssetRoot, FsImageLoader, ImageError, ImageLoader, LoadedImage};
#[cfg(feature = "gl")]
pub use backend::GlBackend;
pub use backend::{Command, GpuBackend, HeadlessBackend, ResourceCounts};
pub use compile::{BuildReport, CompiledProgram, InputType, ProgramBuilder, ProgramTable};
pub use error::{BackendError, BindingError, PassDiagnostic, PipelineError};
pub use executor::{FrameExecutor, FramePlan, FrameStats};
pub use offscreen::{render_offscreen, OffscreenSummary};
pub use pipeline::{ConfigureReport, FrameOutcome, MultipassPipeline, PipelineStatus};
pub use plugins::{Plugin, PluginHost, PluginKind};
pub use resources::{
    FramebufferPair, ResourceProvisioner, ResourceTable, SamplerResource, SamplerSummary,
};
pub use types::{
    BufferId, BufferInit, BufferKind, Capability, DefaultFramebuffer, FramebufferDesc,
    FramebufferId, GeometryDesc, GeometryDraw, GeometryId, Primitive, ProgramId, RasterState,
    RenderTarget, ShaderId, ShaderStage, TextureId, TextureParams, TextureTarget,
    VertexAttribute,
};
pub use uniforms::{FrameInput, FrameUniforms, MouseState};

pub use passconfig;
pub use passconfig::{PipelineConfig, Viewport};
