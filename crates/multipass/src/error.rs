use std::fmt;
use std::path::Path;

use passconfig::ConfigError;
use serde::Serialize;

use crate::types::ShaderStage;

/// Failures reported by a [`GpuBackend`](crate::backend::GpuBackend).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("{stage} shader failed to compile:\n{log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("program failed to link:\n{0}")]
    Link(String),
    #[error("GPU allocation failed: {0}")]
    Allocation(String),
}

/// Build failure of one pass, kept for display next to the last good frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassDiagnostic {
    pub pass: String,
    pub stage: Option<ShaderStage>,
    pub log: String,
}

impl PassDiagnostic {
    pub(crate) fn from_backend(pass: &str, error: BackendError) -> Self {
        match error {
            BackendError::Compile { stage, log } => Self {
                pass: pass.to_string(),
                stage: Some(stage),
                log,
            },
            BackendError::Link(log) => Self {
                pass: pass.to_string(),
                stage: None,
                log: format!("link failed:\n{log}"),
            },
            BackendError::Allocation(reason) => Self {
                pass: pass.to_string(),
                stage: None,
                log: reason,
            },
        }
    }
}

impl fmt::Display for PassDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "[{}] {stage}: {}", self.pass, self.log.trim_end()),
            None => write!(f, "[{}] {}", self.pass, self.log.trim_end()),
        }
    }
}

/// A name the frame executor could not resolve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("program '{0}' has no compiled program")]
    UnknownProgram(String),
    #[error("program '{program}' reads sampler '{sampler}' which has no resource")]
    UnknownSampler { program: String, sampler: String },
    #[error("program '{program}' writes to '{output}' which is not an allocated framebuffer")]
    UnknownOutput { program: String, output: String },
    #[error("substep schedule swaps '{0}' which is not an allocated framebuffer")]
    UnknownSwap(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("{} pass(es) failed to build:\n{}", .0.len(), join_diagnostics(.0))]
    Compile(Vec<PassDiagnostic>),
    #[error("frame skipped: {0}")]
    RuntimeBinding(#[from] BindingError),
    #[error("failed to allocate {resource}: {reason}")]
    ResourceAllocation { resource: String, reason: String },
}

impl PipelineError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PipelineError::Configuration(ConfigError::Invalid(vec![message.into()]))
    }

    pub(crate) fn allocation(resource: impl Into<String>, reason: impl fmt::Display) -> Self {
        PipelineError::ResourceAllocation {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn missing_file(resource: impl Into<String>, path: &Path) -> Self {
        Self::allocation(resource, format!("file {} not found", path.display()))
    }
}

fn join_diagnostics(diagnostics: &[PassDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
