use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use multipass::{
    render_offscreen, AssetRoot, Command, ConfigureReport, DefaultFramebuffer, FrameInput,
    FrameOutcome, HeadlessBackend, MultipassPipeline, OffscreenSummary, PassDiagnostic,
    PipelineError, PipelineStatus, ProgramBuilder,
};
use passconfig::{preprocess_includes, OffscreenOption, Viewport};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::{CheckArgs, PreprocessArgs, SimulateArgs, SourceArgs};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_source(shader: &Path) -> Result<(String, Vec<PathBuf>)> {
    let expanded = preprocess_includes(shader, true)
        .with_context(|| format!("failed to read shader {}", shader.display()))?;
    tracing::debug!(
        shader = %shader.display(),
        includes = expanded.includes.len(),
        "loaded shader source"
    );
    Ok((expanded.source, expanded.includes))
}

fn headless_pipeline(shader: &Path) -> MultipassPipeline<HeadlessBackend> {
    MultipassPipeline::new(HeadlessBackend::new()).with_asset_root(AssetRoot::for_shader(shader))
}

#[derive(Debug, Serialize)]
struct CheckReport {
    shader: PathBuf,
    viewport: Viewport,
    status: PipelineStatus,
    includes: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline: Option<ConfigureReport>,
    diagnostics: Vec<PassDiagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn check(args: CheckArgs) -> Result<()> {
    let (source, includes) = load_source(&args.shader)?;
    let viewport = args.viewport.size;
    let mut pipeline = headless_pipeline(&args.shader);

    let outcome = pipeline.configure(&source, viewport);
    let report = CheckReport {
        shader: args.shader.clone(),
        viewport,
        status: pipeline.status(),
        includes,
        diagnostics: pipeline.diagnostics().to_vec(),
        error: match &outcome {
            Err(PipelineError::Compile(_)) | Ok(_) => None,
            Err(err) => Some(err.to_string()),
        },
        pipeline: outcome.ok(),
    };
    pipeline.shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_check(&report);
    }

    if report.status != PipelineStatus::Ready {
        bail!("pipeline for {} did not activate", args.shader.display());
    }
    Ok(())
}

fn print_check(report: &CheckReport) {
    println!("shader:   {}", report.shader.display());
    println!("viewport: {}", report.viewport);
    println!("status:   {:?}", report.status);
    for include in &report.includes {
        println!("include:  {}", include.display());
    }
    if let Some(pipeline) = &report.pipeline {
        if pipeline.default_pipeline {
            println!("no configuration block; using the single mainImage pass");
        }
        println!("programs: {}", pipeline.programs);
        println!("plugins:  {}", pipeline.plugins);
        for sampler in &pipeline.samplers {
            println!(
                "  sampler {:<16} {:?} {}{}",
                sampler.name,
                sampler.kind,
                sampler.size,
                if sampler.double_buffered { " double-buffered" } else { "" }
            );
        }
    }
    for diagnostic in &report.diagnostics {
        println!("{diagnostic}");
    }
    if let Some(error) = &report.error {
        println!("error: {error}");
    }
}

pub fn source(args: SourceArgs) -> Result<()> {
    let (source, _) = load_source(&args.shader)?;
    let config = passconfig::parse_or_default(&source)
        .with_context(|| format!("invalid configuration in {}", args.shader.display()))?;
    let Some(spec) = config.program(&args.program) else {
        let known: Vec<_> = config.programs.iter().map(|p| p.name.as_str()).collect();
        bail!(
            "program '{}' is not configured (known: {})",
            args.program,
            known.join(", ")
        );
    };
    let cubemaps = config.cubemap_inputs();
    let stages = ProgramBuilder::new(&source, args.viewport.size)
        .with_cubemaps(&cubemaps)
        .stages(spec)
        .with_context(|| format!("failed to synthesize program '{}'", args.program))?;
    for (stage, text) in stages {
        println!("// ---- {stage} stage of {} ----", args.program);
        print!("{text}");
        if !text.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

pub fn preprocess(args: PreprocessArgs) -> Result<()> {
    let expanded = preprocess_includes(&args.shader, !args.no_line_directives)
        .with_context(|| format!("failed to preprocess {}", args.shader.display()))?;
    print!("{}", expanded.source);
    Ok(())
}

#[derive(Debug, Serialize)]
struct FrameRecord {
    frame: u32,
    outcome: FrameOutcome,
    commands: Vec<Command>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    viewport: Viewport,
    option: OffscreenOption,
    summary: OffscreenSummary,
    frames: Vec<FrameRecord>,
}

pub fn simulate(args: SimulateArgs) -> Result<()> {
    let (source, _) = load_source(&args.shader)?;
    let viewport = args.viewport.size;
    let mut pipeline = headless_pipeline(&args.shader);
    pipeline
        .configure(&source, viewport)
        .with_context(|| format!("failed to configure {}", args.shader.display()))?;
    pipeline.backend_mut().clear_commands();

    let configured = pipeline
        .config()
        .map(|config| config.offscreen_option)
        .unwrap_or_default();
    let option = OffscreenOption {
        num_frames: args.frames.unwrap_or(configured.num_frames),
        ..configured
    };

    let mut frames = Vec::new();
    let summary = render_offscreen(
        &mut pipeline,
        DefaultFramebuffer(0),
        option,
        FrameInput::default(),
        |frame, outcome, backend| {
            frames.push(FrameRecord {
                frame,
                outcome: *outcome,
                commands: backend.take_commands(),
            });
            Ok(())
        },
    )?;
    tracing::info!(
        frames = summary.frames,
        drawn = summary.drawn,
        passes = summary.passes,
        "simulation finished"
    );
    let report = SimulationReport {
        viewport,
        option,
        summary,
        frames,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for record in &report.frames {
        match record.outcome {
            FrameOutcome::Drawn(stats) => println!(
                "frame {}: {} passes, {} swaps",
                record.frame, stats.passes, stats.swaps
            ),
            FrameOutcome::Skipped => println!("frame {}: skipped", record.frame),
        }
        for command in &record.commands {
            println!("  {}", serde_json::to_string(command)?);
        }
    }
    println!(
        "{} of {} frames drawn at {} fps",
        report.summary.drawn, report.summary.frames, report.option.fps
    );
    Ok(())
}
