//! Boundary between the GL state tracker and the render runtime.
//!
//! The tracker only ever talks to a [`CompatRuntime`]; the Vulkan runtime is
//! one implementation and the tests use a recording mock.

use crate::error::Result;

/// Bytes per canonical sprite vertex.
pub const SPRITE_VERTEX_STRIDE: u32 = 24;

/// Byte offsets of the canonical sprite vertex.
///
/// `position: vec2<f32>`, `color: rgba8`, `texcoord: vec2<f32>`, `mix: rgba8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u32,
    pub position_offset: u32,
    pub color_offset: u32,
    pub texcoord_offset: u32,
    pub mix_color_offset: u32,
}

impl VertexLayout {
    pub const SPRITE: VertexLayout = VertexLayout {
        stride: SPRITE_VERTEX_STRIDE,
        position_offset: 0,
        color_offset: 8,
        texcoord_offset: 12,
        mix_color_offset: 20,
    };
}

/// Precompiled shader program used for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    Default,
    ScreenCopy,
    Shield,
    BuildBeam,
}

impl ShaderVariant {
    pub const ALL: [ShaderVariant; 4] = [
        ShaderVariant::Default,
        ShaderVariant::ScreenCopy,
        ShaderVariant::Shield,
        ShaderVariant::BuildBeam,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn bytes(self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// GL blend state as raw enums; the runtime maps them to Vulkan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendState {
    pub enabled: bool,
    pub src_rgb: u32,
    pub dst_rgb: u32,
    pub src_alpha: u32,
    pub dst_alpha: u32,
    pub equation_rgb: u32,
    pub equation_alpha: u32,
    pub constant: [f32; 4],
}

impl Default for BlendState {
    fn default() -> Self {
        use crate::gl::consts::{FUNC_ADD, ONE, ZERO};
        Self {
            enabled: false,
            src_rgb: ONE,
            dst_rgb: ZERO,
            src_alpha: ONE,
            dst_alpha: ZERO,
            equation_rgb: FUNC_ADD,
            equation_alpha: FUNC_ADD,
            constant: [0.0; 4],
        }
    }
}

/// Extra inputs of the Shield and BuildBeam programs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectUniforms {
    pub tex_size: [f32; 2],
    pub inv_size: [f32; 2],
    pub time: f32,
    pub dp: f32,
    pub offset: [f32; 2],
}

/// GL sampler parameters of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerParams {
    pub min_filter: u32,
    pub mag_filter: u32,
    pub wrap_s: u32,
    pub wrap_t: u32,
}

impl Default for SamplerParams {
    fn default() -> Self {
        use crate::gl::consts::{LINEAR, NEAREST_MIPMAP_LINEAR, REPEAT};
        Self {
            min_filter: NEAREST_MIPMAP_LINEAR,
            mag_filter: LINEAR,
            wrap_s: REPEAT,
            wrap_t: REPEAT,
        }
    }
}

/// Full-image texture upload. `pixels` is tightly packed RGBA8888, or
/// `None` to allocate without contents.
#[derive(Debug, Clone, Copy)]
pub struct TextureUpload<'a> {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub pixels: Option<&'a [u8]>,
    pub sampler: SamplerParams,
}

/// Sub-rectangle texture upload, RGBA8888.
#[derive(Debug, Clone, Copy)]
pub struct TextureSubUpload<'a> {
    pub id: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub pixels: Option<&'a [u8]>,
    pub sampler: SamplerParams,
}

/// One canonical draw.
#[derive(Debug, Clone, Copy)]
pub struct SpriteDraw<'a> {
    pub vertices: &'a [u8],
    pub vertex_count: u32,
    pub layout: VertexLayout,
    pub indices: &'a [u8],
    pub index_type: IndexType,
    pub index_count: u32,
    pub texture: u32,
    pub projection: [f32; 16],
    pub variant: ShaderVariant,
    pub effect: Option<EffectUniforms>,
    pub blend: BlendState,
}

/// Operations the state tracker needs from a renderer.
///
/// Frame boundaries and texture creation report native failures; the
/// per-draw calls log and count their own faults.
pub trait CompatRuntime {
    fn begin_frame(&mut self) -> Result<()>;
    fn end_frame(&mut self) -> Result<()>;
    fn dispose(&mut self);

    fn set_clear_color(&mut self, r: f32, g: f32, b: f32, a: f32);
    /// `mask` carries GL clear bits.
    fn clear(&mut self, mask: u32);

    fn set_current_framebuffer(&mut self, framebuffer: u32);
    /// `texture == 0` detaches.
    fn set_framebuffer_color_attachment(&mut self, framebuffer: u32, texture: u32, width: u32, height: u32);
    fn remove_framebuffer(&mut self, framebuffer: u32);

    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn set_scissor(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn set_scissor_enabled(&mut self, enabled: bool);

    fn upload_texture(&mut self, upload: &TextureUpload<'_>) -> Result<()>;
    fn upload_texture_sub_image(&mut self, upload: &TextureSubUpload<'_>) -> Result<()>;
    fn set_texture_sampler(&mut self, texture: u32, sampler: SamplerParams);
    fn destroy_texture(&mut self, texture: u32);

    fn draw_sprite(&mut self, draw: &SpriteDraw<'_>);
}
