//! Per-frame pass scheduling.
//!
//! A frame is planned before anything reaches the backend: every program, input, output and
//! swap target named by the configuration is resolved against the current tables. Only a
//! complete plan is executed, so a dangling name costs one skipped frame and leaves every
//! framebuffer pair as it was.
use passconfig::{PipelineConfig, ProgramKind, SubstepTask, Viewport};
use serde::Serialize;

use crate::backend::GpuBackend;
use crate::compile::{CompiledProgram, ProgramTable};
use crate::error::{BindingError, PipelineError};
use crate::plugins::{DrawContext, PluginHost};
use crate::resources::{ResourceTable, SamplerResource};
use crate::types::{DefaultFramebuffer, RenderTarget, TextureId, TextureTarget};
use crate::uniforms::{FrameInput, FrameUniforms};

/// Counters for one executed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Draws and dispatches issued for configured programs.
    pub passes: usize,
    /// Front/back exchanges, from the frame-level swap or from sampler tasks.
    pub swaps: usize,
    pub substep_iterations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Sampler { slot: usize, mipmap: bool },
    Plugin { texture: TextureId, target: TextureTarget },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Default,
    Framebuffer(usize),
    Unbound,
}

#[derive(Debug)]
struct PassPlan<'a> {
    compiled: &'a CompiledProgram,
    inputs: Vec<Input>,
    output: Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    Pass(usize),
    Swap(usize),
}

#[derive(Debug)]
struct SubstepPlan {
    num_iter: u32,
    tasks: Vec<Task>,
    trailing: Vec<usize>,
}

/// Resolved frame; pass indices follow `PipelineConfig::programs`.
#[derive(Debug)]
pub struct FramePlan<'a> {
    passes: Vec<PassPlan<'a>>,
    substep: Option<SubstepPlan>,
}

impl FramePlan<'_> {
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn is_substep(&self) -> bool {
        self.substep.is_some()
    }
}

fn sampler_uniform(unit: usize) -> String {
    format!("iSampler{unit}")
}

/// Drives the passes of one configuration generation.
#[derive(Clone, Copy)]
pub struct FrameExecutor<'a> {
    config: &'a PipelineConfig,
    programs: &'a ProgramTable,
    plugins: &'a PluginHost,
    viewport: Viewport,
}

impl<'a> FrameExecutor<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        programs: &'a ProgramTable,
        plugins: &'a PluginHost,
        viewport: Viewport,
    ) -> Self {
        Self {
            config,
            programs,
            plugins,
            viewport,
        }
    }

    /// Resolves every name the frame will touch.
    pub fn plan(&self, resources: &ResourceTable) -> Result<FramePlan<'a>, BindingError> {
        let mut passes = Vec::with_capacity(self.config.programs.len());
        for spec in &self.config.programs {
            let compiled = self
                .programs
                .get(&spec.name)
                .ok_or_else(|| BindingError::UnknownProgram(spec.name.clone()))?;

            let mut inputs = Vec::with_capacity(spec.samplers.len());
            for name in &spec.samplers {
                let input = if let Some(slot) = resources.slot(name) {
                    let mipmap = matches!(resources.at(slot), Some(SamplerResource::Framebuffer(_)))
                        && self
                            .config
                            .sampler(name)
                            .is_some_and(|sampler| sampler.mipmap);
                    Input::Sampler { slot, mipmap }
                } else if let Some((texture, target)) = self.plugins.exposed_texture(name) {
                    Input::Plugin { texture, target }
                } else {
                    return Err(BindingError::UnknownSampler {
                        program: spec.name.clone(),
                        sampler: name.clone(),
                    });
                };
                inputs.push(input);
            }

            let output = if spec.kind == ProgramKind::Compute {
                Output::Unbound
            } else if spec.targets_default() {
                Output::Default
            } else {
                match resources.slot(&spec.output) {
                    Some(slot) if matches!(resources.at(slot), Some(SamplerResource::Framebuffer(_))) => {
                        Output::Framebuffer(slot)
                    }
                    _ => {
                        return Err(BindingError::UnknownOutput {
                            program: spec.name.clone(),
                            output: spec.output.clone(),
                        })
                    }
                }
            };

            passes.push(PassPlan {
                compiled,
                inputs,
                output,
            });
        }

        let substep = match &self.config.substep {
            None => None,
            Some(substep) => {
                let mut tasks = Vec::with_capacity(substep.schedule.len());
                for task in &substep.schedule {
                    tasks.push(match task {
                        SubstepTask::Program { name } => self
                            .config
                            .programs
                            .iter()
                            .position(|spec| &spec.name == name)
                            .map(Task::Pass)
                            .ok_or_else(|| BindingError::UnknownProgram(name.clone()))?,
                        SubstepTask::Sampler { name } => resources
                            .slot(name)
                            .filter(|slot| {
                                matches!(resources.at(*slot), Some(SamplerResource::Framebuffer(_)))
                            })
                            .map(Task::Swap)
                            .ok_or_else(|| BindingError::UnknownSwap(name.clone()))?,
                    });
                }
                let trailing = self
                    .config
                    .programs
                    .iter()
                    .enumerate()
                    .filter(|(_, spec)| !spec.substep)
                    .map(|(index, _)| index)
                    .collect();
                Some(SubstepPlan {
                    num_iter: substep.num_iter,
                    tasks,
                    trailing,
                })
            }
        };

        Ok(FramePlan { passes, substep })
    }

    /// Executes one frame against `target`.
    ///
    /// Plugin begin hooks run first, then the passes (default order or the substep schedule
    /// followed by the non-substep programs), then plugin overlays, the frame-level swap in
    /// default mode, and plugin end hooks.
    pub fn draw_frame<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        resources: &mut ResourceTable,
        target: DefaultFramebuffer,
        input: &FrameInput,
    ) -> Result<FrameStats, PipelineError> {
        let plan = match self.plan(resources) {
            Ok(plan) => plan,
            Err(err) => {
                tracing::error!(frame = input.frame, error = %err, "frame skipped");
                return Err(err.into());
            }
        };
        let uniforms = FrameUniforms::new(input, self.viewport);
        let mut stats = FrameStats::default();

        self.plugins.begin_draw(backend);
        match &plan.substep {
            None => {
                for pass in &plan.passes {
                    self.run_pass(backend, resources, target, pass, &uniforms);
                    stats.passes += 1;
                }
            }
            Some(substep) => {
                for _ in 0..substep.num_iter {
                    for task in &substep.tasks {
                        match *task {
                            Task::Pass(index) => {
                                self.run_pass(backend, resources, target, &plan.passes[index], &uniforms);
                                stats.passes += 1;
                            }
                            Task::Swap(slot) => {
                                if resources.pair_at_mut(slot).is_some_and(|pair| pair.swap()) {
                                    stats.swaps += 1;
                                }
                            }
                        }
                    }
                    stats.substep_iterations += 1;
                }
                for &index in &substep.trailing {
                    self.run_pass(backend, resources, target, &plan.passes[index], &uniforms);
                    stats.passes += 1;
                }
            }
        }

        self.plugins.draw(
            backend,
            &DrawContext {
                target,
                viewport: self.viewport,
                uniforms: &uniforms,
            },
        );
        if plan.substep.is_none() {
            stats.swaps += resources.swap_all();
        }
        self.plugins.end_draw(backend);

        tracing::debug!(
            frame = input.frame,
            passes = stats.passes,
            swaps = stats.swaps,
            "frame drawn"
        );
        Ok(stats)
    }

    fn run_pass<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        resources: &ResourceTable,
        target: DefaultFramebuffer,
        pass: &PassPlan<'_>,
        uniforms: &FrameUniforms,
    ) {
        let program = pass.compiled.program;
        match pass.output {
            Output::Default => backend.bind_target(RenderTarget::Default(target), self.viewport),
            Output::Framebuffer(slot) => {
                if let Some(SamplerResource::Framebuffer(pair)) = resources.at(slot) {
                    backend.bind_target(RenderTarget::Framebuffer(pair.back()), pair.size());
                }
            }
            Output::Unbound => {}
        }
        backend.use_program(program);
        backend.set_frame_uniforms(program, uniforms);

        for (unit, input) in pass.inputs.iter().enumerate() {
            let (texture, texture_target) = match *input {
                Input::Sampler { slot, mipmap } => {
                    let Some(resource) = resources.at(slot) else {
                        continue;
                    };
                    let texture = resource.input_texture();
                    if mipmap {
                        backend.generate_mipmap(texture);
                    }
                    (texture, TextureTarget::Texture2d)
                }
                Input::Plugin { texture, target } => (texture, target),
            };
            backend.bind_texture(
                program,
                unit as u32,
                &sampler_uniform(unit),
                texture,
                texture_target,
            );
        }
        self.plugins.bind_program(backend, program);

        match pass.compiled.kind {
            ProgramKind::Render => backend.draw_fullscreen(),
            ProgramKind::Compute => backend.dispatch_compute(pass.compiled.groups),
        }
    }
}
