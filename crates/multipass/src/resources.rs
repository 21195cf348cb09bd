//! Sampler resources: static image textures and framebuffer pairs.
use passconfig::{ExprError, SamplerKind, SamplerSpec, Viewport};
use serde::Serialize;

use crate::assets::{AssetRoot, ImageLoader};
use crate::backend::GpuBackend;
use crate::error::PipelineError;
use crate::types::{FramebufferDesc, FramebufferId, TextureId, TextureParams};

/// Front/back framebuffers of one framebuffer sampler.
///
/// Single-buffered samplers hold one framebuffer in both slots, so front and back alias and
/// swapping does nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferPair {
    buffers: [FramebufferId; 2],
    textures: [TextureId; 2],
    front: usize,
    double_buffered: bool,
    size: Viewport,
    swaps: u64,
}

impl FramebufferPair {
    /// Readable side: what the last completed write produced.
    pub fn front(&self) -> FramebufferId {
        self.buffers[self.front]
    }

    /// Writable side for the current frame or iteration.
    pub fn back(&self) -> FramebufferId {
        self.buffers[1 - self.front]
    }

    pub fn front_texture(&self) -> TextureId {
        self.textures[self.front]
    }

    pub fn back_texture(&self) -> TextureId {
        self.textures[1 - self.front]
    }

    pub fn size(&self) -> Viewport {
        self.size
    }

    pub fn is_double_buffered(&self) -> bool {
        self.double_buffered
    }

    /// Exchanges front and back. Returns false for single-buffered pairs.
    pub fn swap(&mut self) -> bool {
        if !self.double_buffered {
            return false;
        }
        self.front = 1 - self.front;
        self.swaps += 1;
        true
    }

    /// Number of swaps since allocation; its parity gives the current orientation.
    pub fn swap_count(&self) -> u64 {
        self.swaps
    }

    fn allocate<B: GpuBackend + ?Sized>(
        backend: &mut B,
        spec: &SamplerSpec,
        size: Viewport,
    ) -> Result<Self, PipelineError> {
        let desc = FramebufferDesc {
            size,
            format: spec.internal_format,
            params: TextureParams::from_sampler(spec),
        };
        let first = create_framebuffer(backend, &spec.name, &desc)?;
        let second = if spec.double_buffering {
            match create_framebuffer(backend, &spec.name, &desc) {
                Ok(second) => second,
                Err(err) => {
                    backend.destroy_framebuffer(first.0);
                    return Err(err);
                }
            }
        } else {
            first
        };
        Ok(Self {
            buffers: [first.0, second.0],
            textures: [first.1, second.1],
            front: 0,
            double_buffered: spec.double_buffering,
            size,
            swaps: 0,
        })
    }

    fn release<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        backend.destroy_framebuffer(self.buffers[0]);
        if self.double_buffered {
            backend.destroy_framebuffer(self.buffers[1]);
        }
    }
}

fn create_framebuffer<B: GpuBackend + ?Sized>(
    backend: &mut B,
    name: &str,
    desc: &FramebufferDesc,
) -> Result<(FramebufferId, TextureId), PipelineError> {
    let framebuffer = backend
        .create_framebuffer(desc)
        .map_err(|err| PipelineError::allocation(format!("sampler '{name}'"), err))?;
    match backend.framebuffer_texture(framebuffer) {
        Some(texture) => Ok((framebuffer, texture)),
        None => {
            backend.destroy_framebuffer(framebuffer);
            Err(PipelineError::allocation(
                format!("sampler '{name}'"),
                "framebuffer has no color attachment",
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerResource {
    Image { texture: TextureId, size: Viewport },
    Framebuffer(FramebufferPair),
}

impl SamplerResource {
    /// Texture a pass reads when the sampler is one of its inputs.
    pub fn input_texture(&self) -> TextureId {
        match self {
            SamplerResource::Image { texture, .. } => *texture,
            SamplerResource::Framebuffer(pair) => pair.front_texture(),
        }
    }

    pub fn size(&self) -> Viewport {
        match self {
            SamplerResource::Image { size, .. } => *size,
            SamplerResource::Framebuffer(pair) => pair.size(),
        }
    }
}

/// Handle-free description of one table entry, comparable across generations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SamplerSummary {
    pub name: String,
    pub kind: SamplerKind,
    pub size: Viewport,
    pub double_buffered: bool,
}

/// Sampler resources of one configuration generation, in declaration order.
#[derive(Debug, Default)]
pub struct ResourceTable {
    entries: Vec<(String, SamplerResource)>,
}

impl ResourceTable {
    pub fn get(&self, name: &str) -> Option<&SamplerResource> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, resource)| resource)
    }

    pub fn pair(&self, name: &str) -> Option<&FramebufferPair> {
        match self.get(name)? {
            SamplerResource::Framebuffer(pair) => Some(pair),
            SamplerResource::Image { .. } => None,
        }
    }

    pub fn pair_mut(&mut self, name: &str) -> Option<&mut FramebufferPair> {
        self.entries
            .iter_mut()
            .find(|(entry, _)| entry == name)
            .and_then(|(_, resource)| match resource {
                SamplerResource::Framebuffer(pair) => Some(pair),
                SamplerResource::Image { .. } => None,
            })
    }

    pub fn input_texture(&self, name: &str) -> Option<TextureId> {
        self.get(name).map(SamplerResource::input_texture)
    }

    pub(crate) fn slot(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(entry, _)| entry == name)
    }

    pub(crate) fn at(&self, slot: usize) -> Option<&SamplerResource> {
        self.entries.get(slot).map(|(_, resource)| resource)
    }

    pub(crate) fn pair_at_mut(&mut self, slot: usize) -> Option<&mut FramebufferPair> {
        match self.entries.get_mut(slot) {
            Some((_, SamplerResource::Framebuffer(pair))) => Some(pair),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SamplerResource)> {
        self.entries
            .iter()
            .map(|(name, resource)| (name.as_str(), resource))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Swaps every double-buffered pair once and returns how many swapped.
    pub fn swap_all(&mut self) -> usize {
        let mut swapped = 0;
        for (_, resource) in &mut self.entries {
            if let SamplerResource::Framebuffer(pair) = resource {
                if pair.swap() {
                    swapped += 1;
                }
            }
        }
        swapped
    }

    pub fn summary(&self) -> Vec<SamplerSummary> {
        self.iter()
            .map(|(name, resource)| SamplerSummary {
                name: name.to_string(),
                kind: match resource {
                    SamplerResource::Image { .. } => SamplerKind::File,
                    SamplerResource::Framebuffer(_) => SamplerKind::Framebuffer,
                },
                size: resource.size(),
                double_buffered: matches!(
                    resource,
                    SamplerResource::Framebuffer(pair) if pair.is_double_buffered()
                ),
            })
            .collect()
    }

    pub fn release<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for (_, resource) in self.entries.drain(..) {
            match resource {
                SamplerResource::Image { texture, .. } => backend.destroy_texture(texture),
                SamplerResource::Framebuffer(pair) => pair.release(backend),
            }
        }
    }
}

fn size_error(name: &str, err: ExprError) -> PipelineError {
    match err {
        ExprError::NonPositive { .. } | ExprError::Overflow(_) => {
            PipelineError::allocation(format!("sampler '{name}'"), err)
        }
        other => PipelineError::invalid(format!("sampler '{name}' size: {other}")),
    }
}

/// Allocates sampler resources through the backend, loading images through `loader`.
pub struct ResourceProvisioner<'a> {
    loader: &'a dyn ImageLoader,
    assets: &'a AssetRoot,
}

impl<'a> ResourceProvisioner<'a> {
    pub fn new(loader: &'a dyn ImageLoader, assets: &'a AssetRoot) -> Self {
        Self { loader, assets }
    }

    /// Builds a fresh table. On failure everything allocated by this call is released again.
    pub fn configure<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        samplers: &[SamplerSpec],
        viewport: Viewport,
    ) -> Result<ResourceTable, PipelineError> {
        let mut table = ResourceTable::default();
        for spec in samplers {
            match self.allocate(backend, spec, viewport) {
                Ok(resource) => table.entries.push((spec.name.clone(), resource)),
                Err(err) => {
                    tracing::warn!(sampler = %spec.name, error = %err, "sampler allocation failed");
                    table.release(backend);
                    return Err(err);
                }
            }
        }
        tracing::debug!(samplers = table.len(), %viewport, "provisioned samplers");
        Ok(table)
    }

    fn allocate<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        spec: &SamplerSpec,
        viewport: Viewport,
    ) -> Result<SamplerResource, PipelineError> {
        match spec.kind {
            SamplerKind::File => {
                let path = spec.file.as_deref().ok_or_else(|| {
                    PipelineError::invalid(format!("sampler '{}' has no file", spec.name))
                })?;
                let resource = format!("sampler '{}'", spec.name);
                let image = self
                    .assets
                    .load_image(self.loader, &resource, path, spec.y_flip)?;
                let size = Viewport::new(image.width, image.height);
                let texture = backend
                    .create_texture(&image, TextureParams::from_sampler(spec))
                    .map_err(|err| PipelineError::allocation(resource, err))?;
                Ok(SamplerResource::Image { texture, size })
            }
            SamplerKind::Framebuffer => {
                let size = spec
                    .size
                    .resolve(viewport)
                    .map_err(|err| size_error(&spec.name, err))?;
                FramebufferPair::allocate(backend, spec, size).map(SamplerResource::Framebuffer)
            }
        }
    }

    /// Reallocates framebuffers whose resolved size changed. Images are untouched and a
    /// reallocated pair starts over with its first buffer in front.
    pub fn resize<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        table: &mut ResourceTable,
        samplers: &[SamplerSpec],
        viewport: Viewport,
    ) -> Result<usize, PipelineError> {
        let mut reallocated = 0;
        for spec in samplers {
            if spec.kind != SamplerKind::Framebuffer {
                continue;
            }
            let size = spec
                .size
                .resolve(viewport)
                .map_err(|err| size_error(&spec.name, err))?;
            let Some(pair) = table.pair_mut(&spec.name) else {
                continue;
            };
            if pair.size() == size {
                continue;
            }
            let replacement = FramebufferPair::allocate(backend, spec, size)?;
            let old = std::mem::replace(pair, replacement);
            old.release(backend);
            reallocated += 1;
        }
        Ok(reallocated)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::assets::{ImageError, LoadedImage};
    use crate::backend::HeadlessBackend;
    use passconfig::{Dim, SizeSpec};

    struct StubLoader;

    impl ImageLoader for StubLoader {
        fn load(&self, path: &Path, _y_flip: bool) -> Result<LoadedImage, ImageError> {
            if path.ends_with("missing.png") {
                return Err(ImageError::NotFound(path.to_path_buf()));
            }
            Ok(LoadedImage::solid(3, 2, [255, 0, 0, 255]).unwrap())
        }
    }

    fn samplers(yaml: &str) -> Vec<SamplerSpec> {
        passconfig::PipelineConfig::from_yaml_str(yaml)
            .unwrap()
            .samplers
    }

    const SAMPLERS: &str = r#"
samplers:
  - name: noise
    type: file
    file: noise.png
  - name: feedback
    type: framebuffer
  - name: half
    type: framebuffer
    size: [W / 2, H / 2]
    double_buffering: false
"#;

    #[test]
    fn provisions_images_and_framebuffers() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::default();
        let provisioner = ResourceProvisioner::new(&StubLoader, &assets);
        let table = provisioner
            .configure(&mut backend, &samplers(SAMPLERS), Viewport::new(64, 32))
            .unwrap();

        assert_eq!(
            table.summary(),
            vec![
                SamplerSummary {
                    name: "noise".into(),
                    kind: SamplerKind::File,
                    size: Viewport::new(3, 2),
                    double_buffered: false,
                },
                SamplerSummary {
                    name: "feedback".into(),
                    kind: SamplerKind::Framebuffer,
                    size: Viewport::new(64, 32),
                    double_buffered: true,
                },
                SamplerSummary {
                    name: "half".into(),
                    kind: SamplerKind::Framebuffer,
                    size: Viewport::new(32, 16),
                    double_buffered: false,
                },
            ]
        );
        let counts = backend.resource_counts();
        assert_eq!(counts.framebuffers, 3);
        assert_eq!(counts.textures, 4);

        let half = table.pair("half").unwrap();
        assert_eq!(half.front(), half.back());
        let feedback = table.pair("feedback").unwrap();
        assert_ne!(feedback.front(), feedback.back());
    }

    #[test]
    fn swap_all_only_touches_double_buffered_pairs() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::default();
        let mut table = ResourceProvisioner::new(&StubLoader, &assets)
            .configure(&mut backend, &samplers(SAMPLERS), Viewport::new(8, 8))
            .unwrap();
        let before = table.pair("feedback").unwrap().clone();

        assert_eq!(table.swap_all(), 1);
        let after = table.pair("feedback").unwrap();
        assert_eq!(after.front(), before.back());
        assert_eq!(after.back(), before.front());
        assert_eq!(after.front_texture(), before.back_texture());
        assert_eq!(table.pair("half").unwrap().swap_count(), 0);
    }

    #[test]
    fn missing_image_releases_partial_allocations() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::new(PathBuf::from("/shaders"));
        let specs = samplers(
            r#"
samplers:
  - name: first
    type: framebuffer
  - name: gone
    type: file
    file: missing.png
"#,
        );
        let err = ResourceProvisioner::new(&StubLoader, &assets)
            .configure(&mut backend, &specs, Viewport::new(8, 8))
            .unwrap_err();
        match err {
            PipelineError::ResourceAllocation { resource, reason } => {
                assert_eq!(resource, "sampler 'gone'");
                assert!(reason.contains("/shaders/missing.png"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(backend.resource_counts().total(), 0);
    }

    #[test]
    fn size_errors_are_classified() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::default();
        let provisioner = ResourceProvisioner::new(&StubLoader, &assets);
        let mut spec = samplers(SAMPLERS).remove(1);

        spec.size = SizeSpec::Explicit([Dim::Expr("W - 100".into()), Dim::Literal(4)]);
        let err = provisioner
            .configure(&mut backend, &[spec.clone()], Viewport::new(8, 8))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ResourceAllocation { .. }));

        spec.size = SizeSpec::Explicit([Dim::Expr("Q".into()), Dim::Literal(4)]);
        let err = provisioner
            .configure(&mut backend, &[spec], Viewport::new(8, 8))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn resize_reallocates_viewport_sized_framebuffers_only() {
        let mut backend = HeadlessBackend::new();
        let assets = AssetRoot::default();
        let provisioner = ResourceProvisioner::new(&StubLoader, &assets);
        let specs = samplers(SAMPLERS);
        let mut table = provisioner
            .configure(&mut backend, &specs, Viewport::new(8, 8))
            .unwrap();
        let noise = table.input_texture("noise").unwrap();
        let baseline = backend.resource_counts();

        let reallocated = provisioner
            .resize(&mut backend, &mut table, &specs, Viewport::new(16, 8))
            .unwrap();
        assert_eq!(reallocated, 2);
        assert_eq!(table.pair("feedback").unwrap().size(), Viewport::new(16, 8));
        assert_eq!(table.pair("half").unwrap().size(), Viewport::new(8, 4));
        assert_eq!(table.input_texture("noise"), Some(noise));
        assert_eq!(backend.resource_counts(), baseline);

        let unchanged = provisioner
            .resize(&mut backend, &mut table, &specs, Viewport::new(16, 8))
            .unwrap();
        assert_eq!(unchanged, 0);

        table.release(&mut backend);
        assert_eq!(backend.resource_counts().total(), 0);
        assert_eq!(backend.stale_releases(), 0);
    }
}
