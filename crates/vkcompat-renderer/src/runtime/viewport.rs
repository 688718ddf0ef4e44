//! GL viewport and scissor rectangles in Vulkan's top-left coordinates.

use ash::vk;

/// Rectangle as given to `glViewport` / `glScissor`: origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl GlRect {
    /// Stored sizes are at least one pixel.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width: width.max(1),
            height: height.max(1),
        }
    }
}

/// Top edge in Vulkan space of a span starting at `gl_y` from the bottom.
fn flip_y(gl_y: i32, height: i32, target_height: i32) -> i32 {
    (target_height - (gl_y + height)).max(0)
}

fn target_size(target: vk::Extent2D) -> (i32, i32) {
    (
        (target.width as i32).max(1),
        (target.height as i32).max(1),
    )
}

/// Dynamic viewport for `viewport`, or the whole target when unset.
pub fn vk_viewport(viewport: Option<GlRect>, target: vk::Extent2D) -> vk::Viewport {
    let (width, height) = target_size(target);
    let rect = viewport.unwrap_or(GlRect::new(0, 0, width, height));

    let clamped_width = rect.width.min(width).max(1);
    let clamped_height = rect.height.min(height).max(1);
    let gl_y = rect.y.clamp(0, height - 1);

    vk::Viewport {
        x: rect.x as f32,
        y: flip_y(gl_y, clamped_height, height) as f32,
        width: clamped_width as f32,
        height: clamped_height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Dynamic scissor. With scissoring off, or no rectangle set, it covers the
/// whole target; otherwise the rectangle is clipped to the target.
pub fn vk_scissor(scissor: Option<GlRect>, enabled: bool, target: vk::Extent2D) -> vk::Rect2D {
    let (width, height) = target_size(target);
    let full = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D {
            width: width as u32,
            height: height as u32,
        },
    };
    if !enabled {
        return full;
    }
    let Some(rect) = scissor else {
        return full;
    };

    let x = rect.x.clamp(0, width - 1);
    let clamped_width = rect.width.min(width - x).max(1);
    let gl_y = rect.y.clamp(0, height - 1);
    let clamped_height = rect.height.min(height - gl_y).max(1);

    vk::Rect2D {
        offset: vk::Offset2D {
            x,
            y: flip_y(gl_y, clamped_height, height),
        },
        extent: vk::Extent2D {
            width: clamped_width as u32,
            height: clamped_height as u32,
        },
    }
}
