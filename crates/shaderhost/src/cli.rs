use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use passconfig::Viewport;

#[derive(Parser, Debug)]
#[command(
    name = "shaderhost",
    author,
    version,
    about = "Multipass shader host: checks, expands and simulates shaders without a GPU"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Configure the pipeline for a shader and report its status and diagnostics.
    Check(CheckArgs),
    /// Print the generated stage sources of one program.
    Source(SourceArgs),
    /// Print the shader with every `#include` expanded.
    Preprocess(PreprocessArgs),
    /// Render frames on the recording backend and print the issued commands.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
pub struct ViewportArgs {
    /// Viewport the size expressions resolve against (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "800x600")]
    pub size: Viewport,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Shader file carrying an optional configuration block.
    #[arg(value_name = "FILE")]
    pub shader: PathBuf,

    #[command(flatten)]
    pub viewport: ViewportArgs,

    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    #[arg(value_name = "FILE")]
    pub shader: PathBuf,

    /// Program (entry point) whose stages to print.
    #[arg(long, value_name = "NAME", default_value = passconfig::DEFAULT_ENTRY)]
    pub program: String,

    #[command(flatten)]
    pub viewport: ViewportArgs,
}

#[derive(Args, Debug)]
pub struct PreprocessArgs {
    #[arg(value_name = "FILE")]
    pub shader: PathBuf,

    /// Leave out the `#line` directives inserted around included files.
    #[arg(long)]
    pub no_line_directives: bool,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(value_name = "FILE")]
    pub shader: PathBuf,

    /// Number of frames; defaults to `offscreen_option.num_frames` of the shader.
    #[arg(long, value_name = "N")]
    pub frames: Option<u32>,

    #[command(flatten)]
    pub viewport: ViewportArgs,

    /// Emit the frames as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<Viewport, String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, e.g. 1920x1080 (got '{trimmed}')"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{}'", width.trim()))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{}'", height.trim()))?;
    if width == 0 || height == 0 {
        return Err("viewport dimensions must be greater than zero".to_string());
    }
    Ok(Viewport::new(width, height))
}
