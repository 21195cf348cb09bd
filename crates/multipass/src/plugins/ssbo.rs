//! Shader storage buffers bound for the whole frame.
use std::path::PathBuf;

use passconfig::Dim;
use serde::Deserialize;

use super::{decode_params, PluginContext};
use crate::backend::GpuBackend;
use crate::error::PipelineError;
use crate::types::{BufferId, BufferInit, BufferKind};

/// Where the initial contents of a storage buffer come from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BufferSource {
    /// Zero-filled buffer of `size` bytes.
    Size { size: Dim },
    /// Raw bytes of a file.
    File { data: PathBuf },
    /// `count` scalars written on the CPU.
    Generate {
        count: Dim,
        #[serde(default)]
        format: ElementFormat,
        #[serde(default)]
        fill: Fill,
        #[serde(default)]
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementFormat {
    #[default]
    F32,
    U32,
    I32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fill {
    #[default]
    Zero,
    Index,
    Constant,
}

/// Largest storage buffer a plugin may request, in bytes.
pub const MAX_BUFFER_BYTES: usize = 1 << 30;

fn check_len(label: &str, len: Option<usize>) -> Result<usize, PipelineError> {
    match len {
        Some(len) if len <= MAX_BUFFER_BYTES => Ok(len),
        Some(len) => Err(PipelineError::allocation(
            label,
            format!("{len} bytes exceeds the {MAX_BUFFER_BYTES} byte buffer limit"),
        )),
        None => Err(PipelineError::allocation(
            label,
            format!("buffer size exceeds the {MAX_BUFFER_BYTES} byte buffer limit"),
        )),
    }
}

impl BufferSource {
    /// Produces the initial bytes. `Size` sources only report a length.
    fn contents(&self, label: &str, ctx: &PluginContext<'_>) -> Result<Contents, PipelineError> {
        match self {
            BufferSource::Size { size } => {
                let len = size
                    .resolve(ctx.viewport)
                    .map_err(|err| PipelineError::allocation(label, err))?;
                check_len(label, Some(len as usize)).map(Contents::Zeroed)
            }
            BufferSource::File { data } => ctx.assets.read_bytes(label, data).map(Contents::Bytes),
            BufferSource::Generate {
                count,
                format,
                fill,
                value,
            } => {
                let count = count
                    .resolve(ctx.viewport)
                    .map_err(|err| PipelineError::allocation(label, err))?;
                let count = count as usize;
                check_len(label, count.checked_mul(std::mem::size_of::<u32>()))?;
                Ok(Contents::Bytes(generate(count, *format, *fill, *value)))
            }
        }
    }
}

enum Contents {
    Zeroed(usize),
    Bytes(Vec<u8>),
}

fn generate(count: usize, format: ElementFormat, fill: Fill, value: f64) -> Vec<u8> {
    let scalar = |index: usize| match fill {
        Fill::Zero => 0.0,
        Fill::Index => index as f64,
        Fill::Constant => value,
    };
    match format {
        ElementFormat::F32 => {
            let values: Vec<f32> = (0..count).map(|i| scalar(i) as f32).collect();
            bytemuck::cast_slice(&values).to_vec()
        }
        ElementFormat::U32 => {
            let values: Vec<u32> = (0..count).map(|i| scalar(i) as u32).collect();
            bytemuck::cast_slice(&values).to_vec()
        }
        ElementFormat::I32 => {
            let values: Vec<i32> = (0..count).map(|i| scalar(i) as i32).collect();
            bytemuck::cast_slice(&values).to_vec()
        }
    }
}

/// Splits `data` into records of `item_size` bytes and zero-pads each one to a multiple of 16,
/// the std430 alignment of `vec3`/`vec4` members.
pub fn pad_records(data: &[u8], item_size: usize) -> Vec<u8> {
    if item_size == 0 {
        return data.to_vec();
    }
    let stride = item_size.div_ceil(16) * 16;
    let mut out = Vec::with_capacity(data.len().div_ceil(item_size) * stride);
    for record in data.chunks(item_size) {
        out.extend_from_slice(record);
        out.resize(out.len() + stride - record.len(), 0);
    }
    out
}

fn allocate<B: GpuBackend + ?Sized>(
    backend: &mut B,
    label: &str,
    source: &BufferSource,
    align16: Option<usize>,
    ctx: &PluginContext<'_>,
) -> Result<BufferId, PipelineError> {
    let contents = source.contents(label, ctx)?;
    let result = match (contents, align16) {
        (Contents::Zeroed(len), _) => backend.create_buffer(BufferKind::Storage, BufferInit::Zeroed(len)),
        (Contents::Bytes(bytes), Some(item)) => {
            let padded_len = if item == 0 {
                Some(bytes.len())
            } else {
                bytes.len().div_ceil(item).checked_mul(item.div_ceil(16) * 16)
            };
            check_len(label, padded_len)?;
            let padded = pad_records(&bytes, item);
            backend.create_buffer(BufferKind::Storage, BufferInit::Bytes(&padded))
        }
        (Contents::Bytes(bytes), None) => {
            backend.create_buffer(BufferKind::Storage, BufferInit::Bytes(&bytes))
        }
    };
    result.map_err(|err| PipelineError::allocation(label, err))
}

#[derive(Debug, Deserialize)]
struct SsboParams {
    binding: u32,
    #[serde(default)]
    align16: Option<usize>,
}

/// One storage buffer at a fixed binding point.
#[derive(Debug)]
pub struct SsboPlugin {
    binding: u32,
    buffer: BufferId,
}

impl SsboPlugin {
    pub(crate) fn configure<B: GpuBackend + ?Sized>(
        backend: &mut B,
        params: &serde_norway::Value,
        ctx: &PluginContext<'_>,
    ) -> Result<Self, PipelineError> {
        let SsboParams { binding, align16 } = decode_params("ssbo", params)?;
        let source: BufferSource = decode_params("ssbo", params)?;
        if align16 == Some(0) {
            return Err(PipelineError::invalid("ssbo plugin align16 must be positive"));
        }
        let label = format!("ssbo binding {binding}");
        let buffer = allocate(backend, &label, &source, align16, ctx)?;
        Ok(Self { binding, buffer })
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub(crate) fn on_begin_draw<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        backend.bind_storage_buffer(self.binding, Some(self.buffer));
    }

    pub(crate) fn on_end_draw<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        backend.bind_storage_buffer(self.binding, None);
        backend.memory_barrier();
    }

    pub(crate) fn cleanup<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        backend.destroy_buffer(self.buffer);
    }
}

#[derive(Debug, Deserialize)]
struct SsboScriptParams {
    bindings: Vec<u32>,
    sources: Vec<BufferSource>,
    #[serde(default)]
    align16: Option<Vec<usize>>,
}

/// Several storage buffers configured together.
#[derive(Debug)]
pub struct SsboScriptPlugin {
    buffers: Vec<(u32, BufferId)>,
}

impl SsboScriptPlugin {
    pub(crate) fn configure<B: GpuBackend + ?Sized>(
        backend: &mut B,
        params: &serde_norway::Value,
        ctx: &PluginContext<'_>,
    ) -> Result<Self, PipelineError> {
        let params: SsboScriptParams = decode_params("ssboscript", params)?;
        let count = params.bindings.len();
        if params.sources.len() != count {
            return Err(PipelineError::invalid(format!(
                "ssboscript plugin has {count} bindings but {} sources",
                params.sources.len()
            )));
        }
        let align16 = params.align16.unwrap_or_else(|| vec![16; count]);
        if align16.len() != count || align16.contains(&0) {
            return Err(PipelineError::invalid(format!(
                "ssboscript plugin align16 needs {count} positive entries"
            )));
        }

        let mut plugin = Self {
            buffers: Vec::with_capacity(count),
        };
        for ((binding, source), item) in params.bindings.iter().zip(&params.sources).zip(align16) {
            let label = format!("ssboscript binding {binding}");
            match allocate(backend, &label, source, Some(item), ctx) {
                Ok(buffer) => plugin.buffers.push((*binding, buffer)),
                Err(err) => {
                    plugin.cleanup(backend);
                    return Err(err);
                }
            }
        }
        Ok(plugin)
    }

    pub fn buffers(&self) -> &[(u32, BufferId)] {
        &self.buffers
    }

    pub(crate) fn on_begin_draw<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        for (binding, buffer) in &self.buffers {
            backend.bind_storage_buffer(*binding, Some(*buffer));
        }
    }

    pub(crate) fn on_end_draw<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        for (binding, _) in &self.buffers {
            backend.bind_storage_buffer(*binding, None);
        }
        backend.memory_barrier();
    }

    pub(crate) fn cleanup<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        for (_, buffer) in &self.buffers {
            backend.destroy_buffer(*buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetRoot, FsImageLoader};
    use crate::backend::HeadlessBackend;
    use passconfig::Viewport;
    use tempfile::TempDir;

    fn params(yaml: &str) -> serde_norway::Value {
        serde_norway::from_str(yaml).unwrap()
    }

    #[test]
    fn pads_each_record_to_sixteen_bytes() {
        let data: Vec<u8> = (1..=24).collect();
        let padded = pad_records(&data, 12);
        assert_eq!(padded.len(), 32);
        assert_eq!(&padded[..12], &data[..12]);
        assert_eq!(&padded[12..16], &[0, 0, 0, 0]);
        assert_eq!(&padded[16..28], &data[12..]);
        assert_eq!(pad_records(&data, 16).len(), 32);
    }

    #[test]
    fn generated_contents_follow_fill_mode() {
        let bytes = generate(3, ElementFormat::U32, Fill::Index, 0.0);
        assert_eq!(bytemuck::cast_slice::<u8, u32>(&bytes), &[0, 1, 2]);
        let bytes = generate(2, ElementFormat::F32, Fill::Constant, 1.5);
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&bytes), &[1.5, 1.5]);
    }

    #[test]
    fn oversized_buffers_are_refused_before_allocating() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::default();
        let ctx = PluginContext::new("", Viewport::new(1920, 1080), &assets, &FsImageLoader);
        for yaml in [
            "binding: 0\ntype: size\nsize: W * H * 1000\n",
            "binding: 0\ntype: generate\ncount: W * H * 1000\nfill: index\n",
        ] {
            let err = SsboPlugin::configure(&mut backend, &params(yaml), &ctx).unwrap_err();
            assert!(
                matches!(err, PipelineError::ResourceAllocation { ref reason, .. } if reason.contains("limit")),
                "{err}"
            );
        }
        assert_eq!(backend.resource_counts().total(), 0);
    }

    #[test]
    fn sized_buffer_evaluates_viewport_expression() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::default();
        let ctx = PluginContext::new("", Viewport::new(8, 4), &assets, &FsImageLoader);
        let plugin = SsboPlugin::configure(
            &mut backend,
            &params("binding: 3\ntype: size\nsize: W * H * 16\n"),
            &ctx,
        )
        .unwrap();
        assert_eq!(plugin.binding(), 3);
        assert_eq!(backend.buffer_len(plugin.buffer()), Some(512));
    }

    #[test]
    fn file_buffer_is_read_relative_to_assets() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("points.bin"), [7u8; 24]).unwrap();
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::new(dir.path());
        let ctx = PluginContext::new("", Viewport::new(8, 4), &assets, &FsImageLoader);
        let plugin = SsboPlugin::configure(
            &mut backend,
            &params("binding: 0\ntype: file\ndata: points.bin\nalign16: 12\n"),
            &ctx,
        )
        .unwrap();
        assert_eq!(backend.buffer_len(plugin.buffer()), Some(32));
    }

    #[test]
    fn script_cleans_up_when_a_source_fails() {
        let dir = TempDir::new().unwrap();
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::new(dir.path());
        let ctx = PluginContext::new("", Viewport::new(8, 4), &assets, &FsImageLoader);
        let err = SsboScriptPlugin::configure(
            &mut backend,
            &params(
                r#"
bindings: [0, 1]
sources:
  - type: generate
    count: W
    format: i32
    fill: index
  - type: file
    data: absent.bin
"#,
            ),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ResourceAllocation { .. }));
        assert_eq!(backend.resource_counts().buffers, 0);
    }

    #[test]
    fn script_requires_matching_lists() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::default();
        let ctx = PluginContext::new("", Viewport::new(8, 4), &assets, &FsImageLoader);
        let err = SsboScriptPlugin::configure(
            &mut backend,
            &params("bindings: [0, 1]\nsources:\n  - type: size\n    size: 64\n"),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
