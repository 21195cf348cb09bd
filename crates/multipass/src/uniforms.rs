use passconfig::Viewport;
use serde::Serialize;

/// Pointer state as reported by the host, in window pixels with a top-left origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MouseState {
    pub down: bool,
    pub press: Option<[f32; 2]>,
    pub release: Option<[f32; 2]>,
    pub position: Option<[f32; 2]>,
}

impl MouseState {
    /// Packs the pointer into the shadertoy `iMouse` layout.
    ///
    /// `xy` is the current position while the button is held and the release position
    /// afterwards. `zw` is the press position. Rows are flipped to a bottom-left origin and `zw`
    /// is negated once the button is up.
    pub fn shadertoy_uniform(&self, height: u32) -> [f32; 4] {
        let bottom = height.saturating_sub(1) as f32;
        let origin = [0.0, bottom];
        let [mz, mw] = self.press.unwrap_or(origin);
        let [mx, my] = if self.down {
            self.position.unwrap_or(origin)
        } else {
            self.release.unwrap_or(origin)
        };
        let (my, mw) = (bottom - my, bottom - mw);
        if self.down {
            [mx, my, mz, mw]
        } else {
            [mx, my, -mz, -mw]
        }
    }
}

/// Host-side inputs for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameInput {
    pub frame: i32,
    pub time: f32,
    pub mouse: MouseState,
    pub key: u32,
    pub key_modifiers: u32,
}

impl FrameInput {
    pub fn at(frame: i32, time: f32) -> Self {
        Self {
            frame,
            time,
            ..Self::default()
        }
    }
}

/// Values written to the standard uniforms of every pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameUniforms {
    pub time: f32,
    pub frame: i32,
    pub resolution: [f32; 3],
    pub mouse: [f32; 4],
    pub key: u32,
    pub key_modifiers: u32,
}

impl FrameUniforms {
    pub fn new(input: &FrameInput, viewport: Viewport) -> Self {
        Self {
            time: input.time,
            frame: input.frame,
            resolution: [
                viewport.width as f32,
                viewport.height as f32,
                viewport.aspect(),
            ],
            mouse: input.mouse.shadertoy_uniform(viewport.height),
            key: input.key,
            key_modifiers: input.key_modifiers,
        }
    }
}
