//! Stencil approximation through scissor rectangles.
//!
//! Geometry drawn with colour writes off and a stencil write op is never
//! rasterized. Its window-space bounding box is remembered instead, tagged
//! with the framebuffer it was drawn into, and later stencil-tested draws on
//! that framebuffer are clipped to the box. There is one mask at a time: a
//! write on another framebuffer replaces it.

use crate::adapter::CompatRuntime;
use crate::gl::consts::{ALWAYS, KEEP};

/// Window rectangle in GL coordinates (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl WindowRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

impl Default for WindowRect {
    fn default() -> Self {
        Self::new(0, 0, 1, 1)
    }
}

/// User scissor as last set through the GL API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScissorState {
    pub enabled: bool,
    /// `false` until the first `scissor` call; the viewport stands in until then.
    pub set: bool,
    pub rect: WindowRect,
}

/// `stencilFunc` / `stencilMask` / `stencilOp` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilOps {
    pub func: u32,
    pub reference: i32,
    pub value_mask: u32,
    pub write_mask: u32,
    pub fail: u32,
    pub zfail: u32,
    pub zpass: u32,
}

impl Default for StencilOps {
    fn default() -> Self {
        Self {
            func: ALWAYS,
            reference: 0,
            value_mask: 0xFF,
            write_mask: 0xFF,
            fail: KEEP,
            zfail: KEEP,
            zpass: KEEP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MaskBounds {
    framebuffer: u32,
    min: [f32; 2],
    max: [f32; 2],
}

/// How a draw interacts with the emulated stencil buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilPass {
    /// Not stencil related.
    None,
    /// Feeds the mask; not rasterized.
    Write,
    /// Clipped to the accumulated mask.
    Read,
}

#[derive(Debug, Default)]
pub struct StencilClip {
    pub ops: StencilOps,
    /// The single live mask; reads on any other framebuffer are dropped.
    bounds: Option<MaskBounds>,
    write_framebuffer: Option<u32>,
}

impl StencilClip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies a draw from the current enable bit and colour mask.
    pub fn classify(&self, stencil_enabled: bool, color_masked_out: bool) -> StencilPass {
        if !stencil_enabled {
            return StencilPass::None;
        }
        let ops = &self.ops;
        let writes = ops.fail != KEEP || ops.zfail != KEEP || ops.zpass != KEEP;
        if color_masked_out && ops.write_mask != 0 && writes {
            return StencilPass::Write;
        }
        if !color_masked_out && ops.func != ALWAYS {
            return StencilPass::Read;
        }
        StencilPass::None
    }

    /// Tracks the write run. The first write pass of a run on a framebuffer
    /// starts a fresh mask; any other draw ends the run.
    pub fn note_pass(&mut self, pass: StencilPass, framebuffer: u32) {
        if pass == StencilPass::Write {
            if self.write_framebuffer != Some(framebuffer) {
                self.clear_for(framebuffer);
                self.write_framebuffer = Some(framebuffer);
            }
        } else {
            self.write_framebuffer = None;
        }
    }

    pub fn is_write_active(&self) -> bool {
        self.write_framebuffer.is_some()
    }

    /// Ends the current write run without touching the mask.
    pub fn end_write_run(&mut self) {
        self.write_framebuffer = None;
    }

    /// Forgets the mask if it belongs to `framebuffer`.
    pub fn clear_for(&mut self, framebuffer: u32) {
        if self.bounds.is_some_and(|b| b.framebuffer == framebuffer) {
            self.bounds = None;
        }
    }

    /// Drops everything, used at frame start.
    pub fn reset(&mut self) {
        self.bounds = None;
        self.write_framebuffer = None;
    }

    /// Drops all state tied to a deleted framebuffer.
    pub fn forget_framebuffer(&mut self, framebuffer: u32) {
        self.clear_for(framebuffer);
        if self.write_framebuffer == Some(framebuffer) {
            self.write_framebuffer = None;
        }
    }

    /// Folds an object-space position into the mask of `framebuffer`.
    pub fn accumulate(&mut self, x: f32, y: f32, projection: &[f32; 16], viewport: WindowRect, framebuffer: u32) {
        let Some([sx, sy]) = project_to_window(x, y, projection, viewport) else {
            return;
        };
        match &mut self.bounds {
            Some(b) if b.framebuffer == framebuffer => {
                b.min = [b.min[0].min(sx), b.min[1].min(sy)];
                b.max = [b.max[0].max(sx), b.max[1].max(sy)];
            }
            slot => {
                *slot = Some(MaskBounds { framebuffer, min: [sx, sy], max: [sx, sy] });
            }
        }
    }

    /// The clip rectangle for a read pass, or `None` if the draw must be
    /// dropped.
    pub fn clip_rect(&self, framebuffer: u32, viewport: WindowRect, scissor: &ScissorState) -> Option<WindowRect> {
        let b = self.bounds.filter(|b| b.framebuffer == framebuffer)?;
        let mut x0 = b.min[0].floor() as i32;
        let mut y0 = b.min[1].floor() as i32;
        let mut x1 = b.max[0].ceil() as i32;
        let mut y1 = b.max[1].ceil() as i32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        if scissor.enabled {
            let limit = if scissor.set { scissor.rect } else { viewport };
            let (sw, sh) = (limit.width.max(1), limit.height.max(1));
            x0 = x0.max(limit.x);
            y0 = y0.max(limit.y);
            x1 = x1.min(limit.x.saturating_add(sw));
            y1 = y1.min(limit.y.saturating_add(sh));
            if x1 <= x0 || y1 <= y0 {
                return None;
            }
        }

        Some(WindowRect::new(x0, y0, x1.saturating_sub(x0).max(1), y1.saturating_sub(y0).max(1)))
    }

    /// Installs the clip for a read pass. Returns `false` if the draw must be
    /// dropped.
    pub fn push_clip<R: CompatRuntime>(
        &self,
        runtime: &mut R,
        framebuffer: u32,
        viewport: WindowRect,
        scissor: &ScissorState,
    ) -> bool {
        let Some(clip) = self.clip_rect(framebuffer, viewport, scissor) else {
            return false;
        };
        runtime.set_scissor(clip.x, clip.y, clip.width, clip.height);
        runtime.set_scissor_enabled(true);
        true
    }

    /// Restores the user scissor after a clipped draw.
    pub fn pop_clip<R: CompatRuntime>(&self, runtime: &mut R, scissor: &ScissorState) {
        if scissor.set {
            let r = scissor.rect;
            runtime.set_scissor(r.x, r.y, r.width, r.height);
        }
        runtime.set_scissor_enabled(scissor.enabled);
    }
}

/// Projects an object-space point through a column-major matrix into window
/// coordinates. `None` when `w` is too close to zero.
pub fn project_to_window(x: f32, y: f32, m: &[f32; 16], viewport: WindowRect) -> Option<[f32; 2]> {
    let clip_x = m[0] * x + m[4] * y + m[12];
    let clip_y = m[1] * x + m[5] * y + m[13];
    let clip_w = m[3] * x + m[7] * y + m[15];
    if clip_w.abs() < 1e-6 {
        return None;
    }
    let (ndc_x, ndc_y) = (clip_x / clip_w, clip_y / clip_w);
    let sx = viewport.x as f32 + (ndc_x * 0.5 + 0.5) * viewport.width.max(1) as f32;
    let sy = viewport.y as f32 + (ndc_y * 0.5 + 0.5) * viewport.height.max(1) as f32;
    Some([sx, sy])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::{Call, MockRuntime};
    use crate::gl::consts::{EQUAL, REPLACE};

    const IDENTITY: [f32; 16] = [
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
    ];

    fn viewport() -> WindowRect {
        WindowRect::new(0, 0, 100, 100)
    }

    fn writing() -> StencilClip {
        let mut clip = StencilClip::new();
        clip.ops.zpass = REPLACE;
        clip
    }

    // ==== classification ====

    #[test]
    fn test_classify_passes() {
        let mut clip = writing();
        assert_eq!(clip.classify(false, true), StencilPass::None);
        assert_eq!(clip.classify(true, true), StencilPass::Write);
        assert_eq!(clip.classify(true, false), StencilPass::None);
        clip.ops.func = EQUAL;
        assert_eq!(clip.classify(true, false), StencilPass::Read);
        clip.ops.write_mask = 0;
        assert_eq!(clip.classify(true, true), StencilPass::None);
    }

    // ==== accumulation ====

    #[test]
    fn test_projection_maps_ndc_to_window() {
        assert_eq!(project_to_window(0.0, 0.0, &IDENTITY, viewport()), Some([50.0, 50.0]));
        assert_eq!(project_to_window(-1.0, 1.0, &IDENTITY, viewport()), Some([0.0, 100.0]));
        let mut degenerate = IDENTITY;
        degenerate[15] = 0.0;
        assert_eq!(project_to_window(0.0, 0.0, &degenerate, viewport()), None);
    }

    #[test]
    fn test_new_write_run_restarts_mask() {
        let mut clip = writing();
        clip.note_pass(StencilPass::Write, 3);
        clip.accumulate(-0.5, -0.5, &IDENTITY, viewport(), 3);
        clip.accumulate(0.5, 0.5, &IDENTITY, viewport(), 3);
        let scissor = ScissorState::default();
        assert_eq!(clip.clip_rect(3, viewport(), &scissor), Some(WindowRect::new(25, 25, 50, 50)));

        clip.note_pass(StencilPass::Read, 3);
        clip.note_pass(StencilPass::Write, 3);
        assert_eq!(clip.clip_rect(3, viewport(), &scissor), None);
    }

    #[test]
    fn test_mask_is_per_framebuffer() {
        let mut clip = writing();
        clip.accumulate(0.0, 0.0, &IDENTITY, viewport(), 1);
        clip.accumulate(0.5, 0.5, &IDENTITY, viewport(), 1);
        assert!(clip.clip_rect(2, viewport(), &ScissorState::default()).is_none());
        clip.forget_framebuffer(1);
        assert!(clip.clip_rect(1, viewport(), &ScissorState::default()).is_none());
    }

    #[test]
    fn test_write_on_other_framebuffer_replaces_mask() {
        let mut clip = writing();
        clip.accumulate(-0.5, -0.5, &IDENTITY, viewport(), 1);
        clip.accumulate(0.5, 0.5, &IDENTITY, viewport(), 1);
        clip.accumulate(0.0, 0.0, &IDENTITY, viewport(), 2);
        clip.accumulate(0.5, 0.5, &IDENTITY, viewport(), 2);
        let scissor = ScissorState::default();
        assert_eq!(clip.clip_rect(1, viewport(), &scissor), None);
        assert_eq!(clip.clip_rect(2, viewport(), &scissor), Some(WindowRect::new(50, 50, 25, 25)));
    }

    // ==== clipping ====

    #[test]
    fn test_clip_intersects_user_scissor() {
        let mut clip = writing();
        clip.accumulate(-0.5, -0.5, &IDENTITY, viewport(), 0);
        clip.accumulate(0.5, 0.5, &IDENTITY, viewport(), 0);
        let scissor = ScissorState { enabled: true, set: true, rect: WindowRect::new(40, 0, 100, 30) };
        assert_eq!(clip.clip_rect(0, viewport(), &scissor), Some(WindowRect::new(40, 25, 35, 5)));

        let disjoint = ScissorState { enabled: true, set: true, rect: WindowRect::new(90, 90, 5, 5) };
        assert_eq!(clip.clip_rect(0, viewport(), &disjoint), None);
    }

    #[test]
    fn test_clip_with_extreme_scissor_coordinates() {
        let mut clip = writing();
        clip.accumulate(-0.5, -0.5, &IDENTITY, viewport(), 0);
        clip.accumulate(0.5, 0.5, &IDENTITY, viewport(), 0);
        let far_x = ScissorState { enabled: true, set: true, rect: WindowRect::new(i32::MAX - 5, 0, 100, 100) };
        assert_eq!(clip.clip_rect(0, viewport(), &far_x), None);
        let far_y = ScissorState { enabled: true, set: true, rect: WindowRect::new(0, i32::MAX - 5, 100, 100) };
        assert_eq!(clip.clip_rect(0, viewport(), &far_y), None);
        let wide = ScissorState { enabled: true, set: true, rect: WindowRect::new(10, 10, i32::MAX, i32::MAX) };
        assert_eq!(clip.clip_rect(0, viewport(), &wide), Some(WindowRect::new(25, 25, 50, 50)));
    }

    #[test]
    fn test_clip_of_unbounded_mask_saturates() {
        let mut clip = writing();
        clip.accumulate(-1.0e12, -1.0e12, &IDENTITY, viewport(), 0);
        clip.accumulate(1.0e12, 1.0e12, &IDENTITY, viewport(), 0);
        assert_eq!(
            clip.clip_rect(0, viewport(), &ScissorState::default()),
            Some(WindowRect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX))
        );
    }

    #[test]
    fn test_push_and_pop_restore_user_scissor() {
        let mut clip = writing();
        clip.accumulate(-0.5, -0.5, &IDENTITY, viewport(), 0);
        clip.accumulate(0.5, 0.5, &IDENTITY, viewport(), 0);
        let scissor = ScissorState { enabled: false, set: true, rect: WindowRect::new(1, 2, 3, 4) };
        let mut runtime = MockRuntime::default();

        assert!(clip.push_clip(&mut runtime, 0, viewport(), &scissor));
        clip.pop_clip(&mut runtime, &scissor);
        assert_eq!(
            runtime.calls,
            vec![
                Call::Scissor([25, 25, 50, 50]),
                Call::ScissorEnabled(true),
                Call::Scissor([1, 2, 3, 4]),
                Call::ScissorEnabled(false),
            ]
        );
    }

    #[test]
    fn test_degenerate_mask_drops_read() {
        let mut clip = writing();
        clip.accumulate(0.0, 0.0, &IDENTITY, viewport(), 0);
        let mut runtime = MockRuntime::default();
        assert!(!clip.push_clip(&mut runtime, 0, viewport(), &ScissorState::default()));
        assert!(runtime.calls.is_empty());
    }
}
