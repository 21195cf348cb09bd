//! The pipeline context: one backend, one image loader and at most one live generation.
//!
//! A generation is everything built from one `configure` call (config, plugins, sampler
//! resources, programs). Generations are replaced whole. The previous one stays in place until
//! its replacement has been fully allocated, except when the new source is invalid: then the
//! old generation is released and the pipeline goes inactive.
use passconfig::{PipelineConfig, ProgramKind, Viewport};
use serde::Serialize;

use crate::assets::{AssetRoot, FsImageLoader, ImageLoader};
use crate::backend::{GpuBackend, ResourceCounts};
use crate::compile::{ProgramBuilder, ProgramTable};
use crate::error::{PassDiagnostic, PipelineError};
use crate::executor::{FrameExecutor, FrameStats};
use crate::plugins::{PluginContext, PluginHost};
use crate::resources::{ResourceProvisioner, ResourceTable, SamplerSummary};
use crate::types::DefaultFramebuffer;
use crate::uniforms::FrameInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    /// Nothing configured, or the last source was invalid.
    Inactive,
    Ready,
    /// Some pass or overlay failed to build; frames are skipped until the next configure.
    Errored,
}

/// Summary of a configure call that installed a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigureReport {
    pub status: PipelineStatus,
    /// True when the source had no configuration block.
    pub default_pipeline: bool,
    pub programs: usize,
    pub samplers: Vec<SamplerSummary>,
    pub plugins: usize,
    pub diagnostics: Vec<PassDiagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum FrameOutcome {
    Drawn(FrameStats),
    /// The pipeline is not `Ready`; nothing was issued.
    Skipped,
}

struct Generation {
    source: String,
    config: PipelineConfig,
    plugins: PluginHost,
    resources: ResourceTable,
    programs: ProgramTable,
    viewport: Viewport,
    diagnostics: Vec<PassDiagnostic>,
}

impl Generation {
    fn release<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        self.programs.release(backend);
        self.resources.release(backend);
        self.plugins.cleanup(backend);
    }

    /// Compute workgroup sizes are compiled in, so a viewport dependent one forces a rebuild.
    fn local_size_follows_viewport(&self) -> bool {
        self.config.programs.iter().any(|program| {
            program.kind == ProgramKind::Compute
                && program
                    .local_size
                    .as_ref()
                    .is_some_and(|local| local.uses_viewport())
        })
    }
}

pub struct MultipassPipeline<B: GpuBackend> {
    backend: B,
    images: Box<dyn ImageLoader>,
    assets: AssetRoot,
    generation: Option<Generation>,
    status: PipelineStatus,
    last_error: Option<String>,
}

impl<B: GpuBackend> MultipassPipeline<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            images: Box::new(FsImageLoader),
            assets: AssetRoot::default(),
            generation: None,
            status: PipelineStatus::Inactive,
            last_error: None,
        }
    }

    pub fn with_image_loader(mut self, loader: impl ImageLoader + 'static) -> Self {
        self.images = Box::new(loader);
        self
    }

    /// Directory relative asset paths (images, buffer files) resolve against.
    pub fn with_asset_root(mut self, assets: AssetRoot) -> Self {
        self.assets = assets;
        self
    }

    /// Replaces the live generation with one built from `source`.
    ///
    /// Returns `Err(Configuration)` for an invalid block (the pipeline is then inactive),
    /// `Err(ResourceAllocation)` when resources could not be acquired (the previous generation
    /// keeps drawing) and `Err(Compile)` when the generation was installed but some pass failed
    /// to build (the pipeline is errored and draws nothing).
    pub fn configure(
        &mut self,
        source: &str,
        viewport: Viewport,
    ) -> Result<ConfigureReport, PipelineError> {
        let parsed = passconfig::parse(source).and_then(|config| {
            let (config, default_pipeline) = match config {
                Some(config) => (config, false),
                None => (PipelineConfig::default_pipeline(), true),
            };
            let issues = config.validate();
            if issues.is_empty() {
                Ok((config, default_pipeline))
            } else {
                Err(passconfig::ConfigError::Invalid(issues))
            }
        });
        let (config, default_pipeline) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => return Err(self.deactivate(err.into())),
        };

        let generation = match self.build(source, config, viewport) {
            Ok(generation) => generation,
            Err(err @ PipelineError::Configuration(_)) => return Err(self.deactivate(err)),
            Err(err) => {
                tracing::warn!(error = %err, "configure failed; keeping previous pipeline");
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        if let Some(mut previous) = self.generation.take() {
            previous.release(&mut self.backend);
        }
        let report = ConfigureReport {
            status: if generation.diagnostics.is_empty() {
                PipelineStatus::Ready
            } else {
                PipelineStatus::Errored
            },
            default_pipeline,
            programs: generation.programs.len(),
            samplers: generation.resources.summary(),
            plugins: generation.plugins.len(),
            diagnostics: generation.diagnostics.clone(),
        };
        tracing::info!(
            programs = report.programs,
            samplers = report.samplers.len(),
            plugins = report.plugins,
            %viewport,
            status = ?report.status,
            "pipeline configured"
        );
        self.status = report.status;
        self.generation = Some(generation);

        if report.status == PipelineStatus::Errored {
            let err = PipelineError::Compile(report.diagnostics);
            self.last_error = Some(err.to_string());
            return Err(err);
        }
        self.last_error = None;
        Ok(report)
    }

    fn build(
        &mut self,
        source: &str,
        config: PipelineConfig,
        viewport: Viewport,
    ) -> Result<Generation, PipelineError> {
        let ctx = PluginContext::new(source, viewport, &self.assets, self.images.as_ref());
        let mut plugins = PluginHost::configure_all(&mut self.backend, &config.plugins, &ctx)?;

        let provisioner = ResourceProvisioner::new(self.images.as_ref(), &self.assets);
        let configured = provisioner.configure(&mut self.backend, &config.samplers, viewport);
        let mut resources = match configured {
            Ok(resources) => resources,
            Err(err) => {
                plugins.cleanup(&mut self.backend);
                return Err(err);
            }
        };

        let cubemaps = config.cubemap_inputs();
        let built = ProgramBuilder::new(source, viewport)
            .with_cubemaps(&cubemaps)
            .build_all(&mut self.backend, &config.programs);
        let report = match built {
            Ok(report) => report,
            Err(err) => {
                resources.release(&mut self.backend);
                plugins.cleanup(&mut self.backend);
                return Err(err);
            }
        };

        let mut diagnostics = plugins.diagnostics().to_vec();
        diagnostics.extend(report.diagnostics);
        Ok(Generation {
            source: source.to_string(),
            config,
            plugins,
            resources,
            programs: report.programs,
            viewport,
            diagnostics,
        })
    }

    fn deactivate(&mut self, err: PipelineError) -> PipelineError {
        tracing::warn!(error = %err, "pipeline deactivated");
        if let Some(mut previous) = self.generation.take() {
            previous.release(&mut self.backend);
        }
        self.status = PipelineStatus::Inactive;
        self.last_error = Some(err.to_string());
        err
    }

    /// Follows a viewport change: reallocates framebuffers whose size changed and re-resolves
    /// dispatch and draw counts. A failure releases the generation and leaves the pipeline
    /// inactive.
    pub fn resize(&mut self, viewport: Viewport) -> Result<(), PipelineError> {
        let Some(generation) = self.generation.as_mut() else {
            return Ok(());
        };
        if generation.viewport == viewport {
            return Ok(());
        }
        if generation.local_size_follows_viewport() {
            let source = generation.source.clone();
            return self.configure(&source, viewport).map(|_| ());
        }

        let provisioner = ResourceProvisioner::new(self.images.as_ref(), &self.assets);
        let resized = provisioner
            .resize(
                &mut self.backend,
                &mut generation.resources,
                &generation.config.samplers,
                viewport,
            )
            .and_then(|reallocated| {
                generation
                    .programs
                    .resize(&generation.config.programs, viewport)?;
                generation.plugins.resize(viewport)?;
                Ok(reallocated)
            });
        match resized {
            Ok(reallocated) => {
                generation.viewport = viewport;
                tracing::debug!(%viewport, reallocated, "pipeline resized");
                Ok(())
            }
            Err(err) => Err(self.deactivate(err)),
        }
    }

    /// Draws one frame when the pipeline is ready.
    ///
    /// A binding failure skips the frame and is returned; the pipeline stays ready.
    pub fn draw_frame(
        &mut self,
        target: DefaultFramebuffer,
        input: &FrameInput,
    ) -> Result<FrameOutcome, PipelineError> {
        if self.status != PipelineStatus::Ready {
            return Ok(FrameOutcome::Skipped);
        }
        let Some(generation) = self.generation.as_mut() else {
            return Ok(FrameOutcome::Skipped);
        };
        let Generation {
            config,
            plugins,
            resources,
            programs,
            viewport,
            ..
        } = generation;
        FrameExecutor::new(config, programs, plugins, *viewport)
            .draw_frame(&mut self.backend, resources, target, input)
            .map(FrameOutcome::Drawn)
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    /// Build failures of the live generation.
    pub fn diagnostics(&self) -> &[PassDiagnostic] {
        self.generation
            .as_ref()
            .map_or(&[], |generation| generation.diagnostics.as_slice())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn config(&self) -> Option<&PipelineConfig> {
        self.generation.as_ref().map(|generation| &generation.config)
    }

    pub fn resources(&self) -> Option<&ResourceTable> {
        self.generation.as_ref().map(|generation| &generation.resources)
    }

    pub fn programs(&self) -> Option<&ProgramTable> {
        self.generation.as_ref().map(|generation| &generation.programs)
    }

    pub fn plugins(&self) -> Option<&PluginHost> {
        self.generation.as_ref().map(|generation| &generation.plugins)
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.generation.as_ref().map(|generation| generation.viewport)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn resource_counts(&self) -> ResourceCounts {
        self.backend.resource_counts()
    }

    /// Sets a `uniform` plugin value; returns what was stored after quantizing and clamping.
    pub fn set_uniform_value(&mut self, name: &str, value: f32) -> Option<f32> {
        self.generation
            .as_mut()
            .and_then(|generation| generation.plugins.set_uniform_value(name, value))
    }

    pub fn uniform_value(&self, name: &str) -> Option<f32> {
        self.generation
            .as_ref()
            .and_then(|generation| generation.plugins.uniform_value(name))
    }

    /// Releases every resource of the live generation.
    pub fn shutdown(&mut self) {
        if let Some(mut generation) = self.generation.take() {
            generation.release(&mut self.backend);
            tracing::debug!("pipeline shut down");
        }
        self.status = PipelineStatus::Inactive;
    }

    pub fn into_backend(mut self) -> B {
        self.shutdown();
        self.backend
    }
}
