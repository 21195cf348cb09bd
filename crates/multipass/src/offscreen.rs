use passconfig::OffscreenOption;
use serde::Serialize;

use crate::backend::GpuBackend;
use crate::error::PipelineError;
use crate::executor::FrameStats;
use crate::pipeline::{FrameOutcome, MultipassPipeline};
use crate::types::DefaultFramebuffer;
use crate::uniforms::FrameInput;

/// Totals of an offscreen run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OffscreenSummary {
    pub frames: u32,
    pub drawn: u32,
    pub passes: usize,
    pub swaps: usize,
}

/// Renders `option.num_frames` frames at a fixed rate, then shuts the pipeline down.
///
/// Frame `i` runs at `time = i / fps`; the pointer and key state of `input` are reused for
/// every frame. `on_frame` sees each frame's outcome and the backend right after the frame,
/// which is where a host reads pixels back. The pipeline is shut down even when a frame or the
/// callback fails.
pub fn render_offscreen<B, F>(
    pipeline: &mut MultipassPipeline<B>,
    target: DefaultFramebuffer,
    option: OffscreenOption,
    input: FrameInput,
    mut on_frame: F,
) -> Result<OffscreenSummary, PipelineError>
where
    B: GpuBackend,
    F: FnMut(u32, &FrameOutcome, &mut B) -> Result<(), PipelineError>,
{
    if !(option.fps > 0.0) {
        pipeline.shutdown();
        return Err(PipelineError::invalid(format!(
            "offscreen fps must be positive, got {}",
            option.fps
        )));
    }

    let mut summary = OffscreenSummary::default();
    let result = (0..option.num_frames).try_for_each(|frame| {
        let input = FrameInput {
            frame: frame as i32,
            time: frame as f32 / option.fps,
            ..input
        };
        let outcome = pipeline.draw_frame(target, &input)?;
        summary.frames += 1;
        if let FrameOutcome::Drawn(FrameStats { passes, swaps, .. }) = outcome {
            summary.drawn += 1;
            summary.passes += passes;
            summary.swaps += swaps;
        }
        on_frame(frame, &outcome, pipeline.backend_mut())
    });
    pipeline.shutdown();
    result?;

    tracing::info!(
        frames = summary.frames,
        drawn = summary.drawn,
        fps = option.fps,
        "offscreen render finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, HeadlessBackend};
    use passconfig::Viewport;

    #[test]
    fn renders_each_frame_at_its_timestamp() {
        let mut pipeline = MultipassPipeline::new(HeadlessBackend::new());
        pipeline
            .configure("void mainImage(out vec4 c, vec2 p) { c = vec4(iTime); }\n", Viewport::new(4, 4))
            .unwrap();

        let mut times = Vec::new();
        let summary = render_offscreen(
            &mut pipeline,
            DefaultFramebuffer(0),
            OffscreenOption {
                fps: 4.0,
                num_frames: 3,
            },
            FrameInput::default(),
            |_, _, backend| {
                for command in backend.take_commands() {
                    if let Command::FrameUniforms { time, .. } = command {
                        times.push(time);
                    }
                }
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(times, vec![0.0, 0.25, 0.5]);
        assert_eq!(summary.drawn, 3);
        assert_eq!(summary.passes, 3);
        assert_eq!(pipeline.resource_counts().total(), 0);
    }

    #[test]
    fn callback_failure_still_releases_resources() {
        let mut pipeline = MultipassPipeline::new(HeadlessBackend::new());
        pipeline
            .configure("void mainImage(out vec4 c, vec2 p) { c = vec4(1); }\n", Viewport::new(4, 4))
            .unwrap();
        let err = render_offscreen(
            &mut pipeline,
            DefaultFramebuffer(0),
            OffscreenOption::default(),
            FrameInput::default(),
            |_, _, _| Err(PipelineError::allocation("readback", "no pixels")),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ResourceAllocation { .. }));
        assert_eq!(pipeline.resource_counts().total(), 0);
    }
}
