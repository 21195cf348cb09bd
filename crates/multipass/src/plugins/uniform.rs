use serde::Deserialize;

use super::decode_params;
use crate::backend::GpuBackend;
use crate::error::PipelineError;
use crate::types::ProgramId;

fn default_resolution() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
struct UniformParams {
    name: String,
    default: f32,
    min: f32,
    max: f32,
    #[serde(default = "default_resolution")]
    resolution: u32,
}

/// A scalar `float` uniform set on every program, adjustable by the host at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformPlugin {
    name: String,
    min: f32,
    max: f32,
    resolution: u32,
    value: f32,
}

impl UniformPlugin {
    pub(crate) fn configure(params: &serde_norway::Value) -> Result<Self, PipelineError> {
        let params: UniformParams = decode_params("uniform", params)?;
        if !(params.min <= params.max) || params.resolution == 0 {
            return Err(PipelineError::invalid(format!(
                "uniform plugin '{}' needs min <= max and a positive resolution",
                params.name
            )));
        }
        let mut plugin = Self {
            name: params.name,
            min: params.min,
            max: params.max,
            resolution: params.resolution,
            value: params.default,
        };
        plugin.set_value(params.default);
        Ok(plugin)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// Stores `value` snapped to steps of `1 / resolution` and clamped to `[min, max]`.
    pub fn set_value(&mut self, value: f32) -> f32 {
        let steps = self.resolution as f32;
        self.value = ((value * steps).round() / steps).clamp(self.min, self.max);
        self.value
    }

    pub(crate) fn on_bind_program<B: GpuBackend + ?Sized>(&self, backend: &mut B, program: ProgramId) {
        backend.set_uniform_f32(program, &self.name, self.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(yaml: &str) -> Result<UniformPlugin, PipelineError> {
        UniformPlugin::configure(&serde_norway::from_str(yaml).unwrap())
    }

    #[test]
    fn values_are_quantized_and_clamped() {
        let mut uniform = plugin("name: uGain\ndefault: 0.123\nmin: 0\nmax: 2\n").unwrap();
        assert_eq!(uniform.value(), 0.12);
        assert_eq!(uniform.set_value(5.0), 2.0);
        assert_eq!(uniform.set_value(-1.0), 0.0);

        let mut coarse = plugin("name: uSteps\ndefault: 1\nmin: 0\nmax: 10\nresolution: 2\n").unwrap();
        assert_eq!(coarse.set_value(3.3), 3.5);
    }

    #[test]
    fn rejects_inverted_range() {
        let err = plugin("name: uBad\ndefault: 0\nmin: 1\nmax: 0\n").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
