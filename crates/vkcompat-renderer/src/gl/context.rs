//! The emulated GL-ES context.
//!
//! `GlContext` owns every object table and forwards the small set of
//! operations that reach the GPU to a [`CompatRuntime`]. Calls never panic
//! and never fail loudly: invalid enums and values land in the sticky error
//! slot, runtime failures are logged.

use std::collections::{BTreeMap, HashSet};

use log::{debug, error, info};

use super::consts::*;
use super::program;
use super::state::{
    ActiveVariable, BufferState, HandleTable, ProgramState, ShaderState, TextureState, VertexArrayState,
};
use super::texture_convert::{self, PixelFormat};
use crate::adapter::{BlendState, CompatRuntime, SamplerParams, TextureSubUpload, TextureUpload};
use crate::config::CompatConfig;
use crate::stencil::{ScissorState, StencilClip, WindowRect};
use crate::submit::decode::pack_color;

/// Packed opaque white.
pub(super) const WHITE: u32 = 0xFFFF_FFFF;
/// Texture id of the built-in 1x1 white texture.
pub const WHITE_TEXTURE: u32 = 0;

const VENDOR_STRING: &str = "vkcompat";
const VERSION_STRING: &str = "OpenGL ES 3.0 (Vulkan compat)";
const GLSL_VERSION_STRING: &str = "GLSL ES 3.00";

/// Per-frame draw counters, reported every 60 frames when tracing.
#[derive(Debug, Default, Clone)]
pub(super) struct FrameStats {
    pub draw_calls: u32,
    pub submitted: u32,
    pub decoded_vertices: u64,
    pub decoded_indices: u64,
    pub stencil_write: u32,
    pub stencil_read: u32,
    pub stencil_clip: u32,
    pub stencil_drop: u32,
    pub flips: u32,
    pub effects: [u32; 4],
    pub skip_mode: u32,
    pub skip_program: u32,
    pub skip_unlinked: u32,
    pub skip_attrib: u32,
    pub skip_read: u32,
}

pub struct GlContext<R: CompatRuntime> {
    pub(super) runtime: R,
    pub(super) config: CompatConfig,
    error: u32,

    pub(super) shaders: HandleTable<ShaderState>,
    pub(super) programs: HandleTable<ProgramState>,
    pub(super) buffers: HandleTable<BufferState>,
    pub(super) textures: HandleTable<TextureState>,
    pub(super) vertex_arrays: HandleTable<VertexArrayState>,
    framebuffers: HandleTable<()>,
    renderbuffers: HandleTable<()>,
    /// Framebuffer id to its colour attachment texture.
    pub(super) attachments: BTreeMap<u32, u32>,
    dumped_textures: HashSet<u32>,

    pub(super) current_program: u32,
    array_buffer: u32,
    pub(super) current_vao: u32,
    pub(super) current_framebuffer: u32,
    current_renderbuffer: u32,
    active_unit: usize,
    pub(super) texture_units: [u32; MAX_TEXTURE_UNITS],
    generic_attribs: [[f32; 4]; MAX_VERTEX_ATTRIBS],

    pub(super) caps: HashSet<u32>,
    pub(super) blend: BlendState,
    pub(super) color_mask: [bool; 4],
    pub(super) viewport: WindowRect,
    pub(super) scissor: ScissorState,
    pub(super) stencil: StencilClip,

    pub(super) stats: FrameStats,
    frame_counter: u64,
}

impl<R: CompatRuntime> GlContext<R> {
    pub fn new(runtime: R, config: &CompatConfig) -> Self {
        let mut vertex_arrays = HandleTable::new();
        vertex_arrays.insert(0, VertexArrayState::new(0));

        let mut ctx = Self {
            runtime,
            config: config.clone(),
            error: NO_ERROR,
            shaders: HandleTable::new(),
            programs: HandleTable::new(),
            buffers: HandleTable::new(),
            textures: HandleTable::new(),
            vertex_arrays,
            framebuffers: HandleTable::new(),
            renderbuffers: HandleTable::new(),
            attachments: BTreeMap::new(),
            dumped_textures: HashSet::new(),
            current_program: 0,
            array_buffer: 0,
            current_vao: 0,
            current_framebuffer: 0,
            current_renderbuffer: 0,
            active_unit: 0,
            texture_units: [0; MAX_TEXTURE_UNITS],
            generic_attribs: [[0.0, 0.0, 0.0, 1.0]; MAX_VERTEX_ATTRIBS],
            caps: HashSet::new(),
            blend: BlendState::default(),
            color_mask: [true; 4],
            viewport: WindowRect::default(),
            scissor: ScissorState::default(),
            stencil: StencilClip::new(),
            stats: FrameStats::default(),
            frame_counter: 0,
        };
        ctx.runtime.set_current_framebuffer(0);
        ctx.upload_white_texture();
        ctx
    }

    fn upload_white_texture(&mut self) {
        let white = [0xFFu8; 4];
        let upload = TextureUpload {
            id: WHITE_TEXTURE,
            width: 1,
            height: 1,
            pixels: Some(&white),
            sampler: SamplerParams { min_filter: NEAREST, mag_filter: NEAREST, wrap_s: REPEAT, wrap_t: REPEAT },
        };
        if let Err(err) = self.runtime.upload_texture(&upload) {
            error!("failed to create the white texture: {err}");
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn config(&self) -> &CompatConfig {
        &self.config
    }

    // ========================================================================
    // Frames
    // ========================================================================

    pub fn begin_frame(&mut self) {
        self.stencil.reset();
        self.stats = FrameStats::default();
        if let Err(err) = self.runtime.begin_frame() {
            error!("begin_frame failed: {err}");
        }
    }

    pub fn end_frame(&mut self) {
        if let Err(err) = self.runtime.end_frame() {
            error!("end_frame failed: {err}");
        }
        self.frame_counter += 1;
        if self.config.trace && self.frame_counter % 60 == 0 {
            self.log_frame_summary();
        }
    }

    fn log_frame_summary(&self) {
        let s = &self.stats;
        info!(
            "frame {} draws={} submitted={} decoded(v={} i={}) stencil(write={} read={} clip={} drop={}) \
             flip={} fx(def={} sc={} sh={} bb={}) skip(mode={} program={} unlinked={} attrib={} read={})",
            self.frame_counter,
            s.draw_calls,
            s.submitted,
            s.decoded_vertices,
            s.decoded_indices,
            s.stencil_write,
            s.stencil_read,
            s.stencil_clip,
            s.stencil_drop,
            s.flips,
            s.effects[0],
            s.effects[1],
            s.effects[2],
            s.effects[3],
            s.skip_mode,
            s.skip_program,
            s.skip_unlinked,
            s.skip_attrib,
            s.skip_read,
        );
    }

    pub fn dispose(&mut self) {
        self.runtime.dispose();
    }

    // ========================================================================
    // Errors and queries
    // ========================================================================

    pub(super) fn set_error(&mut self, error: u32) {
        if self.error == NO_ERROR {
            self.error = error;
        }
    }

    /// Returns and clears the sticky error.
    pub fn get_error(&mut self) -> u32 {
        std::mem::replace(&mut self.error, NO_ERROR)
    }

    pub fn get_string(&self, name: u32) -> &str {
        match name {
            VENDOR => VENDOR_STRING,
            RENDERER => &self.config.backend_name,
            VERSION => VERSION_STRING,
            SHADING_LANGUAGE_VERSION => GLSL_VERSION_STRING,
            _ => "",
        }
    }

    pub fn get_integer(&self, pname: u32) -> i32 {
        let element_buffer = self.vertex_arrays.get(self.current_vao).map_or(0, |v| v.element_buffer);
        match pname {
            ACTIVE_TEXTURE => (TEXTURE0 + self.active_unit as u32) as i32,
            TEXTURE_BINDING_2D => self.texture_units[self.active_unit] as i32,
            ARRAY_BUFFER_BINDING => self.array_buffer as i32,
            ELEMENT_ARRAY_BUFFER_BINDING => element_buffer as i32,
            CURRENT_PROGRAM => self.current_program as i32,
            FRAMEBUFFER_BINDING => self.current_framebuffer as i32,
            RENDERBUFFER_BINDING => self.current_renderbuffer as i32,
            MAX_TEXTURE_IMAGE_UNITS | MAX_COMBINED_TEXTURE_IMAGE_UNITS => MAX_TEXTURE_UNITS as i32,
            MAX_TEXTURE_SIZE => MAX_TEXTURE_DIMENSION,
            MAX_VERTEX_ATTRIBS_QUERY => MAX_VERTEX_ATTRIBS as i32,
            MAX_VERTEX_UNIFORM_VECTORS_QUERY => MAX_VERTEX_UNIFORM_VECTORS,
            MAX_FRAGMENT_UNIFORM_VECTORS_QUERY => MAX_FRAGMENT_UNIFORM_VECTORS,
            MAX_VARYING_VECTORS_QUERY => MAX_VARYING_VECTORS,
            VERTEX_ARRAY_BINDING => self.current_vao as i32,
            _ => 0,
        }
    }

    /// Array form of [`get_integer`](Self::get_integer) that also answers
    /// `VIEWPORT` and `SCISSOR_BOX`.
    pub fn get_integerv(&self, pname: u32, out: &mut [i32]) {
        let rect = match pname {
            VIEWPORT => self.viewport,
            SCISSOR_BOX => self.scissor.rect,
            _ => {
                if let Some(first) = out.first_mut() {
                    *first = self.get_integer(pname);
                }
                return;
            }
        };
        for (slot, value) in out.iter_mut().zip([rect.x, rect.y, rect.width, rect.height]) {
            *slot = value;
        }
    }

    /// Only `COLOR_WRITEMASK` is answered; other names leave `out` untouched.
    pub fn get_booleanv(&self, pname: u32, out: &mut [bool]) {
        if pname == COLOR_WRITEMASK && out.len() >= 4 {
            out[..4].copy_from_slice(&self.color_mask);
        }
    }

    // ========================================================================
    // Capabilities and fixed-function state
    // ========================================================================

    pub fn enable(&mut self, cap: u32) {
        self.caps.insert(cap);
        self.cap_changed(cap, true);
    }

    pub fn disable(&mut self, cap: u32) {
        self.caps.remove(&cap);
        self.cap_changed(cap, false);
    }

    fn cap_changed(&mut self, cap: u32, enabled: bool) {
        match cap {
            SCISSOR_TEST => {
                self.scissor.enabled = enabled;
                self.runtime.set_scissor_enabled(enabled);
            }
            STENCIL_TEST => self.stencil.end_write_run(),
            _ => {}
        }
    }

    pub fn is_enabled(&self, cap: u32) -> bool {
        self.caps.contains(&cap)
    }

    pub fn color_mask(&mut self, red: bool, green: bool, blue: bool, alpha: bool) {
        self.color_mask = [red, green, blue, alpha];
    }

    pub fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.viewport = WindowRect::new(x, y, width.max(1), height.max(1));
        self.runtime.set_viewport(x, y, width, height);
    }

    pub fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.scissor.rect = WindowRect::new(x, y, width.max(1), height.max(1));
        self.scissor.set = true;
        self.runtime.set_scissor(x, y, width, height);
    }

    pub fn stencil_func(&mut self, func: u32, reference: i32, mask: u32) {
        self.stencil.ops.func = func;
        self.stencil.ops.reference = reference;
        self.stencil.ops.value_mask = mask;
    }

    pub fn stencil_func_separate(&mut self, _face: u32, func: u32, reference: i32, mask: u32) {
        self.stencil_func(func, reference, mask);
    }

    pub fn stencil_mask(&mut self, mask: u32) {
        self.stencil.ops.write_mask = mask;
    }

    pub fn stencil_mask_separate(&mut self, _face: u32, mask: u32) {
        self.stencil_mask(mask);
    }

    pub fn stencil_op(&mut self, fail: u32, zfail: u32, zpass: u32) {
        self.stencil.ops.fail = fail;
        self.stencil.ops.zfail = zfail;
        self.stencil.ops.zpass = zpass;
    }

    pub fn stencil_op_separate(&mut self, _face: u32, fail: u32, zfail: u32, zpass: u32) {
        self.stencil_op(fail, zfail, zpass);
    }

    pub fn blend_func(&mut self, src: u32, dst: u32) {
        self.blend_func_separate(src, dst, src, dst);
    }

    pub fn blend_func_separate(&mut self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32) {
        self.blend.src_rgb = src_rgb;
        self.blend.dst_rgb = dst_rgb;
        self.blend.src_alpha = src_alpha;
        self.blend.dst_alpha = dst_alpha;
    }

    pub fn blend_equation(&mut self, mode: u32) {
        self.blend_equation_separate(mode, mode);
    }

    pub fn blend_equation_separate(&mut self, mode_rgb: u32, mode_alpha: u32) {
        self.blend.equation_rgb = mode_rgb;
        self.blend.equation_alpha = mode_alpha;
    }

    pub fn blend_color(&mut self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.blend.constant = [red, green, blue, alpha];
    }

    pub fn clear_color(&mut self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.runtime.set_clear_color(red, green, blue, alpha);
    }

    pub fn clear(&mut self, mask: u32) {
        if mask & STENCIL_BUFFER_BIT != 0 {
            self.stencil.clear_for(self.current_framebuffer);
            self.stencil.end_write_run();
        }
        self.runtime.clear(mask);
    }

    // ========================================================================
    // Textures
    // ========================================================================

    pub fn gen_texture(&mut self) -> u32 {
        let id = self.textures.allocate();
        self.textures.insert(id, TextureState::new(id));
        id
    }

    pub fn delete_texture(&mut self, texture: u32) {
        if texture == 0 {
            return;
        }
        self.textures.remove(texture);
        self.dumped_textures.remove(&texture);
        self.runtime.destroy_texture(texture);

        let detached: Vec<u32> = self
            .attachments
            .iter()
            .filter(|&(_, &t)| t == texture)
            .map(|(&fb, _)| fb)
            .collect();
        for fb in detached {
            self.attachments.remove(&fb);
            self.runtime.set_framebuffer_color_attachment(fb, 0, 0, 0);
        }

        for unit in self.texture_units.iter_mut().filter(|u| **u == texture) {
            *unit = 0;
        }
    }

    pub fn is_texture(&self, texture: u32) -> bool {
        texture != 0 && self.textures.contains(texture)
    }

    /// `texture` is a `TEXTURE0 + n` enum; the unit is clamped to the table.
    pub fn active_texture(&mut self, texture: u32) {
        let unit = i64::from(texture) - i64::from(TEXTURE0);
        self.active_unit = unit.clamp(0, MAX_TEXTURE_UNITS as i64 - 1) as usize;
    }

    pub fn bind_texture(&mut self, target: u32, texture: u32) {
        if texture != 0 {
            self.textures.get_or_insert_with(texture, || TextureState::new(texture)).target = target;
        }
        self.texture_units[self.active_unit] = texture;
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tex_image_2d(
        &mut self,
        target: u32,
        level: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        _border: i32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) {
        if level != 0 || target != TEXTURE_2D {
            return;
        }
        let id = self.texture_units[self.active_unit];
        if id == 0 || width <= 0 || height <= 0 {
            return;
        }
        let Some(pixel_format) = PixelFormat::from_gl(format, ty) else {
            self.set_error(INVALID_ENUM);
            return;
        };
        let (width, height) = (width as u32, height as u32);
        let rgba = pixels.map(|p| texture_convert::to_rgba8888(pixel_format, width, height, p));

        let tracing = self.config.trace;
        let tex = self.textures.get_or_insert_with(id, || TextureState::new(id));
        tex.width = width;
        tex.height = height;
        tex.internal_format = internal_format;
        tex.format = format;
        tex.ty = ty;
        tex.mirror = tracing.then(|| match &rgba {
            Some(bytes) => bytes.to_vec(),
            None => vec![0; width as usize * height as usize * 4],
        });
        let sampler = tex.sampler;

        if tracing {
            if let Some(bytes) = &rgba {
                self.dump_texture(id, width, height, bytes);
            }
        }

        let upload = TextureUpload { id, width, height, pixels: rgba.as_deref(), sampler };
        if let Err(err) = self.runtime.upload_texture(&upload) {
            error!("texture {id} upload ({width}x{height}) failed: {err}");
        }
        self.sync_attachments(id);
    }

    fn dump_texture(&mut self, id: u32, width: u32, height: u32, rgba: &[u8]) {
        let Some(dir) = self.config.texture_dump_dir.as_deref() else {
            return;
        };
        if !self.dumped_textures.insert(id) {
            return;
        }
        match texture_convert::dump_png(dir, id, width, height, rgba) {
            Ok(path) => info!("dumped texture {id} to {}", path.display()),
            Err(err) => error!("failed to dump texture {id}: {err}"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tex_sub_image_2d(
        &mut self,
        target: u32,
        level: i32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) {
        if level != 0 || target != TEXTURE_2D {
            return;
        }
        let Some(pixel_format) = PixelFormat::from_gl(format, ty) else {
            self.set_error(INVALID_ENUM);
            return;
        };
        let id = self.texture_units[self.active_unit];
        let Some(tex) = self.textures.get_mut(id) else {
            return;
        };
        if width <= 0 || height <= 0 || x < 0 || y < 0 {
            return;
        }
        let (x, y, width, height) = (x as u32, y as u32, width as u32, height as u32);
        if x + width > tex.width || y + height > tex.height {
            return;
        }

        let rgba = pixels.map(|p| texture_convert::to_rgba8888(pixel_format, width, height, p));
        let tex_width = tex.width;
        if let (Some(mirror), Some(bytes)) = (tex.mirror.as_mut(), rgba.as_deref()) {
            texture_convert::blit_rgba(mirror, tex_width, x, y, width, height, bytes);
        }
        let sampler = tex.sampler;

        let upload = TextureSubUpload { id, x, y, width, height, pixels: rgba.as_deref(), sampler };
        if let Err(err) = self.runtime.upload_texture_sub_image(&upload) {
            error!("texture {id} sub-image upload failed: {err}");
        }
        self.sync_attachments(id);
    }

    pub fn tex_parameteri(&mut self, target: u32, pname: u32, param: i32) {
        if target != TEXTURE_2D {
            return;
        }
        let id = self.texture_units[self.active_unit];
        if id == 0 {
            return;
        }
        let tex = self.textures.get_or_insert_with(id, || TextureState::new(id));
        let value = param as u32;
        match pname {
            TEXTURE_MIN_FILTER => tex.sampler.min_filter = value,
            TEXTURE_MAG_FILTER => tex.sampler.mag_filter = value,
            TEXTURE_WRAP_S => tex.sampler.wrap_s = value,
            TEXTURE_WRAP_T => tex.sampler.wrap_t = value,
            _ => return,
        }
        let sampler = tex.sampler;
        self.runtime.set_texture_sampler(id, sampler);
    }

    pub fn tex_parameterf(&mut self, target: u32, pname: u32, param: f32) {
        self.tex_parameteri(target, pname, param as i32);
    }

    /// Re-announces every attachment of `texture` after its image changed.
    fn sync_attachments(&mut self, texture: u32) {
        let Some(tex) = self.textures.get(texture) else {
            return;
        };
        for (&fb, _) in self.attachments.iter().filter(|&(_, &t)| t == texture) {
            self.runtime.set_framebuffer_color_attachment(fb, texture, tex.width, tex.height);
        }
    }

    /// RGBA8888 copy of a texture, available while tracing.
    pub fn texture_mirror(&self, texture: u32) -> Option<&[u8]> {
        self.textures.get(texture)?.mirror.as_deref()
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    pub fn gen_buffer(&mut self) -> u32 {
        let id = self.buffers.allocate();
        self.buffers.insert(id, BufferState::new(id));
        id
    }

    pub fn delete_buffer(&mut self, buffer: u32) {
        if buffer == 0 {
            return;
        }
        self.buffers.remove(buffer);
        if self.array_buffer == buffer {
            self.array_buffer = 0;
        }
        for vao in self.vertex_arrays.values_mut() {
            if vao.element_buffer == buffer {
                vao.element_buffer = 0;
            }
            vao.attributes.retain(|_, attrib| attrib.buffer != buffer);
        }
    }

    pub fn is_buffer(&self, buffer: u32) -> bool {
        buffer != 0 && self.buffers.contains(buffer)
    }

    pub fn bind_buffer(&mut self, target: u32, buffer: i32) {
        let Ok(id) = u32::try_from(buffer) else {
            self.set_error(INVALID_VALUE);
            return;
        };
        if id != 0 {
            self.buffers.get_or_insert_with(id, || BufferState::new(id));
        }
        match target {
            ARRAY_BUFFER => self.array_buffer = id,
            ELEMENT_ARRAY_BUFFER => self.current_vao_mut().element_buffer = id,
            _ => {}
        }
    }

    fn bound_buffer_mut(&mut self, target: u32) -> Option<&mut BufferState> {
        let id = match target {
            ARRAY_BUFFER => self.array_buffer,
            ELEMENT_ARRAY_BUFFER => self.vertex_arrays.get(self.current_vao)?.element_buffer,
            _ => 0,
        };
        if id == 0 {
            return None;
        }
        Some(self.buffers.get_or_insert_with(id, || BufferState::new(id)))
    }

    pub fn buffer_data(&mut self, target: u32, size: usize, data: Option<&[u8]>, usage: u32) {
        if let Some(buffer) = self.bound_buffer_mut(target) {
            buffer.usage = usage;
            buffer.store(size, data);
        }
    }

    pub fn buffer_sub_data(&mut self, target: u32, offset: isize, data: &[u8]) {
        let Ok(offset) = usize::try_from(offset) else {
            return;
        };
        if let Some(buffer) = self.bound_buffer_mut(target) {
            buffer.update(offset, data);
        }
    }

    // ========================================================================
    // Vertex arrays and attributes
    // ========================================================================

    pub(super) fn current_vao_mut(&mut self) -> &mut VertexArrayState {
        let id = self.current_vao;
        self.vertex_arrays.get_or_insert_with(id, || VertexArrayState::new(id))
    }

    pub fn gen_vertex_array(&mut self) -> u32 {
        let id = self.vertex_arrays.allocate();
        self.vertex_arrays.insert(id, VertexArrayState::new(id));
        id
    }

    pub fn bind_vertex_array(&mut self, array: u32) {
        self.current_vao = array;
        self.current_vao_mut();
    }

    pub fn delete_vertex_array(&mut self, array: u32) {
        if array == 0 {
            return;
        }
        self.vertex_arrays.remove(array);
        if self.current_vao == array {
            self.current_vao = 0;
        }
    }

    pub fn is_vertex_array(&self, array: u32) -> bool {
        array != 0 && self.vertex_arrays.contains(array)
    }

    pub fn enable_vertex_attrib_array(&mut self, index: u32) {
        self.current_vao_mut().attribute_mut(index).enabled = true;
    }

    pub fn disable_vertex_attrib_array(&mut self, index: u32) {
        self.current_vao_mut().attribute_mut(index).enabled = false;
    }

    /// `offset` is a byte offset into the bound `ARRAY_BUFFER`.
    pub fn vertex_attrib_pointer(&mut self, index: u32, size: u32, ty: u32, normalized: bool, stride: u32, offset: usize) {
        let buffer = self.array_buffer;
        let attrib = self.current_vao_mut().attribute_mut(index);
        attrib.size = size;
        attrib.ty = ty;
        attrib.normalized = normalized;
        attrib.stride = stride;
        attrib.pointer = offset;
        attrib.buffer = buffer;
    }

    pub fn vertex_attrib4f(&mut self, index: u32, x: f32, y: f32, z: f32, w: f32) {
        if let Some(slot) = self.generic_attribs.get_mut(index as usize) {
            *slot = [x, y, z, w];
        }
    }

    pub fn vertex_attrib1f(&mut self, index: u32, x: f32) {
        self.vertex_attrib4f(index, x, 0.0, 0.0, 1.0);
    }

    pub fn vertex_attrib2f(&mut self, index: u32, x: f32, y: f32) {
        self.vertex_attrib4f(index, x, y, 0.0, 1.0);
    }

    pub fn vertex_attrib3f(&mut self, index: u32, x: f32, y: f32, z: f32) {
        self.vertex_attrib4f(index, x, y, z, 1.0);
    }

    pub fn vertex_attrib1fv(&mut self, index: u32, values: &[f32]) {
        if let [x, ..] = *values {
            self.vertex_attrib1f(index, x);
        }
    }

    pub fn vertex_attrib2fv(&mut self, index: u32, values: &[f32]) {
        if let [x, y, ..] = *values {
            self.vertex_attrib2f(index, x, y);
        }
    }

    pub fn vertex_attrib3fv(&mut self, index: u32, values: &[f32]) {
        if let [x, y, z, ..] = *values {
            self.vertex_attrib3f(index, x, y, z);
        }
    }

    pub fn vertex_attrib4fv(&mut self, index: u32, values: &[f32]) {
        if let [x, y, z, w, ..] = *values {
            self.vertex_attrib4f(index, x, y, z, w);
        }
    }

    /// Current generic value of `index` packed to RGBA8.
    pub(super) fn generic_color(&self, index: u32, default: u32) -> u32 {
        match self.generic_attribs.get(index as usize) {
            Some(&[r, g, b, a]) => pack_color(r, g, b, a),
            None => default,
        }
    }

    // ========================================================================
    // Shaders
    // ========================================================================

    pub fn create_shader(&mut self, kind: u32) -> u32 {
        let id = self.shaders.allocate();
        self.shaders.insert(id, ShaderState::new(id, kind));
        id
    }

    pub fn delete_shader(&mut self, shader: u32) {
        self.shaders.remove(shader);
        for program in self.programs.values_mut() {
            program.detach(shader);
        }
    }

    pub fn is_shader(&self, shader: u32) -> bool {
        shader != 0 && self.shaders.contains(shader)
    }

    pub fn shader_source(&mut self, shader: u32, source: &str) {
        if let Some(state) = self.shaders.get_mut(shader) {
            state.source = source.to_string();
        }
    }

    /// Sources are never compiled; a non-blank source counts as success.
    pub fn compile_shader(&mut self, shader: u32) {
        let Some(state) = self.shaders.get_mut(shader) else {
            return;
        };
        state.compiled = !state.source.trim().is_empty();
        state.info_log = if state.compiled { String::new() } else { "Empty source.".to_string() };
    }

    pub fn get_shaderiv(&self, shader: u32, pname: u32) -> i32 {
        let state = self.shaders.get(shader);
        match pname {
            COMPILE_STATUS => i32::from(state.is_some_and(|s| s.compiled)),
            INFO_LOG_LENGTH => state.map_or(0, |s| s.info_log.len() as i32) + 1,
            SHADER_SOURCE_LENGTH => state.map_or(0, |s| s.source.len() as i32) + 1,
            SHADER_TYPE => state.map_or(0, |s| s.kind as i32),
            _ => 0,
        }
    }

    pub fn get_shader_info_log(&self, shader: u32) -> String {
        self.shaders.get(shader).map(|s| s.info_log.clone()).unwrap_or_default()
    }

    // ========================================================================
    // Programs
    // ========================================================================

    pub fn create_program(&mut self) -> u32 {
        let id = self.programs.allocate();
        self.programs.insert(id, ProgramState::new(id));
        id
    }

    pub fn delete_program(&mut self, program: u32) {
        self.programs.remove(program);
        if self.current_program == program {
            self.current_program = 0;
        }
    }

    pub fn is_program(&self, program: u32) -> bool {
        program != 0 && self.programs.contains(program)
    }

    pub fn attach_shader(&mut self, program: u32, shader: u32) {
        if !self.shaders.contains(shader) {
            return;
        }
        if let Some(state) = self.programs.get_mut(program) {
            state.attach(shader);
        }
    }

    pub fn detach_shader(&mut self, program: u32, shader: u32) {
        if let Some(state) = self.programs.get_mut(program) {
            state.detach(shader);
        }
    }

    pub fn bind_attrib_location(&mut self, program: u32, index: u32, name: &str) {
        if let Some(state) = self.programs.get_mut(program) {
            state.bound_attribs.insert(name.to_string(), index as i32);
        }
    }

    pub fn link_program(&mut self, program: u32) {
        let Some(state) = self.programs.get_mut(program) else {
            return;
        };
        if !program::link(state, &self.shaders) {
            debug!("program {program} failed to link: {}", state.info_log);
            return;
        }
        if self.config.trace {
            let mut attributes: Vec<&str> = state.attrib_locations.keys().map(String::as_str).collect();
            let mut uniforms: Vec<&str> = state.uniform_locations.keys().map(String::as_str).collect();
            attributes.sort_unstable();
            uniforms.sort_unstable();
            info!(
                "link program={} effect={:?} attributes=[{}] uniforms=[{}]",
                program,
                state.effect,
                attributes.join(","),
                uniforms.join(",")
            );
        }
    }

    pub fn use_program(&mut self, program: u32) {
        self.current_program = if self.programs.contains(program) { program } else { 0 };
    }

    pub fn get_programiv(&self, program: u32, pname: u32) -> i32 {
        let state = self.programs.get(program);
        match pname {
            LINK_STATUS | VALIDATE_STATUS => i32::from(state.is_some_and(|p| p.linked)),
            ACTIVE_ATTRIBUTES => state.map_or(0, |p| p.attributes.len() as i32),
            ACTIVE_UNIFORMS => state.map_or(0, |p| p.uniforms.len() as i32),
            ATTACHED_SHADERS => state.map_or(0, |p| p.shaders.len() as i32),
            INFO_LOG_LENGTH => state.map_or(0, |p| p.info_log.len() as i32) + 1,
            _ => 0,
        }
    }

    pub fn get_program_info_log(&self, program: u32) -> String {
        self.programs.get(program).map(|p| p.info_log.clone()).unwrap_or_default()
    }

    pub fn get_attrib_location(&self, program: u32, name: &str) -> i32 {
        self.programs
            .get(program)
            .and_then(|p| p.attrib_locations.get(name).copied())
            .unwrap_or(-1)
    }

    pub fn get_uniform_location(&self, program: u32, name: &str) -> i32 {
        self.programs.get(program).map_or(-1, |p| program::uniform_location(p, name))
    }

    pub fn get_active_attrib(&self, program: u32, index: u32) -> Option<&ActiveVariable> {
        self.programs.get(program)?.attributes.get(index as usize)
    }

    pub fn get_active_uniform(&self, program: u32, index: u32) -> Option<&ActiveVariable> {
        self.programs.get(program)?.uniforms.get(index as usize)
    }

    // ========================================================================
    // Uniforms
    // ========================================================================

    fn uniform_target(&mut self, location: i32) -> Option<&mut ProgramState> {
        if location < 0 || self.current_program == 0 {
            return None;
        }
        self.programs.get_mut(self.current_program)
    }

    pub fn uniform1i(&mut self, location: i32, x: i32) {
        if let Some(p) = self.uniform_target(location) {
            p.cells.set_int(location, x);
        }
    }

    pub fn uniform2i(&mut self, location: i32, x: i32, y: i32) {
        if let Some(p) = self.uniform_target(location) {
            p.cells.set_int_vector(location, &[x, y]);
        }
    }

    pub fn uniform3i(&mut self, location: i32, x: i32, y: i32, z: i32) {
        if let Some(p) = self.uniform_target(location) {
            p.cells.set_int_vector(location, &[x, y, z]);
        }
    }

    pub fn uniform4i(&mut self, location: i32, x: i32, y: i32, z: i32, w: i32) {
        if let Some(p) = self.uniform_target(location) {
            p.cells.set_int_vector(location, &[x, y, z, w]);
        }
    }

    fn uniform_floats(&mut self, location: i32, values: &[f32]) {
        if let Some(p) = self.uniform_target(location) {
            p.cells.set_floats(location, values);
        }
    }

    pub fn uniform1f(&mut self, location: i32, x: f32) {
        self.uniform_floats(location, &[x]);
    }

    pub fn uniform2f(&mut self, location: i32, x: f32, y: f32) {
        self.uniform_floats(location, &[x, y]);
    }

    pub fn uniform3f(&mut self, location: i32, x: f32, y: f32, z: f32) {
        self.uniform_floats(location, &[x, y, z]);
    }

    pub fn uniform4f(&mut self, location: i32, x: f32, y: f32, z: f32, w: f32) {
        self.uniform_floats(location, &[x, y, z, w]);
    }

    /// Vector uploads store the first element only.
    fn uniform_fv(&mut self, location: i32, count: i32, components: usize, values: &[f32]) {
        if count <= 0 || values.len() < components {
            return;
        }
        self.uniform_floats(location, &values[..components]);
    }

    pub fn uniform1fv(&mut self, location: i32, count: i32, values: &[f32]) {
        self.uniform_fv(location, count, 1, values);
    }

    pub fn uniform2fv(&mut self, location: i32, count: i32, values: &[f32]) {
        self.uniform_fv(location, count, 2, values);
    }

    pub fn uniform3fv(&mut self, location: i32, count: i32, values: &[f32]) {
        self.uniform_fv(location, count, 3, values);
    }

    pub fn uniform4fv(&mut self, location: i32, count: i32, values: &[f32]) {
        self.uniform_fv(location, count, 4, values);
    }

    pub fn uniform_matrix4fv(&mut self, location: i32, count: i32, _transpose: bool, values: &[f32]) {
        if count <= 0 || values.is_empty() {
            return;
        }
        if let Some(p) = self.uniform_target(location) {
            p.cells.set_mat4(location, values);
        }
    }

    // ========================================================================
    // Framebuffers and renderbuffers
    // ========================================================================

    pub fn gen_framebuffer(&mut self) -> u32 {
        let id = self.framebuffers.allocate();
        self.framebuffers.insert(id, ());
        id
    }

    pub fn bind_framebuffer(&mut self, _target: u32, framebuffer: u32) {
        if self.current_framebuffer != framebuffer {
            self.stencil.end_write_run();
        }
        self.current_framebuffer = framebuffer;
        if framebuffer != 0 {
            self.framebuffers.insert(framebuffer, ());
        }
        self.runtime.set_current_framebuffer(framebuffer);
    }

    pub fn framebuffer_texture_2d(&mut self, _target: u32, attachment: u32, _textarget: u32, texture: u32, _level: i32) {
        let fb = self.current_framebuffer;
        if fb == 0 || attachment != COLOR_ATTACHMENT0 {
            return;
        }
        if texture == 0 {
            self.attachments.remove(&fb);
            self.runtime.set_framebuffer_color_attachment(fb, 0, 0, 0);
            return;
        }
        self.attachments.insert(fb, texture);
        let (width, height) = self.textures.get(texture).map_or((0, 0), |t| (t.width, t.height));
        self.runtime.set_framebuffer_color_attachment(fb, texture, width, height);
    }

    pub fn delete_framebuffer(&mut self, framebuffer: u32) {
        if framebuffer == 0 {
            return;
        }
        self.framebuffers.remove(framebuffer);
        self.attachments.remove(&framebuffer);
        self.stencil.forget_framebuffer(framebuffer);
        self.runtime.remove_framebuffer(framebuffer);
        if self.current_framebuffer == framebuffer {
            self.current_framebuffer = 0;
            self.runtime.set_current_framebuffer(0);
        }
    }

    pub fn is_framebuffer(&self, framebuffer: u32) -> bool {
        framebuffer != 0 && self.framebuffers.contains(framebuffer)
    }

    /// Every colour attachment is treated as complete.
    pub fn check_framebuffer_status(&self, _target: u32) -> u32 {
        FRAMEBUFFER_COMPLETE
    }

    pub fn gen_renderbuffer(&mut self) -> u32 {
        let id = self.renderbuffers.allocate();
        self.renderbuffers.insert(id, ());
        id
    }

    pub fn bind_renderbuffer(&mut self, _target: u32, renderbuffer: u32) {
        self.current_renderbuffer = renderbuffer;
        if renderbuffer != 0 {
            self.renderbuffers.insert(renderbuffer, ());
        }
    }

    pub fn delete_renderbuffer(&mut self, renderbuffer: u32) {
        self.renderbuffers.remove(renderbuffer);
        if self.current_renderbuffer == renderbuffer {
            self.current_renderbuffer = 0;
        }
    }

    pub fn is_renderbuffer(&self, renderbuffer: u32) -> bool {
        renderbuffer != 0 && self.renderbuffers.contains(renderbuffer)
    }

    /// Whether `texture` is the colour attachment of any framebuffer.
    pub(super) fn is_render_target_texture(&self, texture: u32) -> bool {
        self.attachments.values().any(|&t| t == texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::{Call, MockRuntime};

    fn context() -> GlContext<MockRuntime> {
        let mut ctx = GlContext::new(MockRuntime::default(), &CompatConfig::default());
        ctx.runtime_mut().clear_calls();
        ctx
    }

    // ==== construction and queries ====

    #[test]
    fn test_new_uploads_white_texture() {
        let ctx = GlContext::new(MockRuntime::default(), &CompatConfig::default());
        assert_eq!(ctx.runtime().calls[0], Call::CurrentFramebuffer(0));
        assert_eq!(
            ctx.runtime().calls[1],
            Call::Upload { id: WHITE_TEXTURE, width: 1, height: 1, bytes: Some(vec![255; 4]) }
        );
    }

    #[test]
    fn test_get_error_is_sticky_and_drained() {
        let mut ctx = context();
        assert_eq!(ctx.get_error(), NO_ERROR);
        ctx.bind_buffer(ARRAY_BUFFER, -1);
        ctx.set_error(INVALID_OPERATION);
        assert_eq!(ctx.get_error(), INVALID_VALUE);
        assert_eq!(ctx.get_error(), NO_ERROR);
    }

    #[test]
    fn test_strings_and_integers() {
        let mut ctx = context();
        assert_eq!(ctx.get_string(VENDOR), "vkcompat");
        assert_eq!(ctx.get_string(RENDERER), "Vulkan");
        assert_eq!(ctx.get_string(EXTENSIONS), "");
        assert_eq!(ctx.get_integer(MAX_TEXTURE_SIZE), 16384);
        assert_eq!(ctx.get_integer(MAX_COMBINED_TEXTURE_IMAGE_UNITS), 32);
        assert_eq!(ctx.get_integer(MAX_VERTEX_ATTRIBS_QUERY), 16);

        ctx.active_texture(TEXTURE0 + 3);
        assert_eq!(ctx.get_integer(ACTIVE_TEXTURE), (TEXTURE0 + 3) as i32);
        ctx.active_texture(TEXTURE0 + 99);
        assert_eq!(ctx.get_integer(ACTIVE_TEXTURE), (TEXTURE0 + 31) as i32);

        let vao = ctx.gen_vertex_array();
        ctx.bind_vertex_array(vao);
        assert_eq!(ctx.get_integer(VERTEX_ARRAY_BINDING), vao as i32);

        ctx.viewport(0, 0, 640, 0);
        let mut rect = [0; 4];
        ctx.get_integerv(VIEWPORT, &mut rect);
        assert_eq!(rect, [0, 0, 640, 1]);
        assert_eq!(ctx.get_integer(0x1234), 0);

        let mut mask = [true; 4];
        ctx.color_mask(false, true, false, true);
        ctx.get_booleanv(COLOR_WRITEMASK, &mut mask);
        assert_eq!(mask, [false, true, false, true]);
    }

    #[test]
    fn test_scissor_enable_forwards() {
        let mut ctx = context();
        ctx.enable(SCISSOR_TEST);
        ctx.scissor(1, 2, 0, 4);
        assert!(ctx.is_enabled(SCISSOR_TEST));
        assert_eq!(ctx.scissor.rect, WindowRect::new(1, 2, 1, 4));
        assert_eq!(ctx.runtime().calls, vec![Call::ScissorEnabled(true), Call::Scissor([1, 2, 0, 4])]);
    }

    // ==== textures ====

    #[test]
    fn test_rgb565_upload_is_expanded() {
        let mut ctx = context();
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        let pixel = 0xF800u16.to_ne_bytes();
        ctx.tex_image_2d(TEXTURE_2D, 0, RGB, 1, 1, 0, RGB, UNSIGNED_SHORT_5_6_5, Some(&pixel));
        assert_eq!(
            ctx.runtime().calls,
            vec![Call::Upload { id: tex, width: 1, height: 1, bytes: Some(vec![255, 0, 0, 255]) }]
        );
    }

    #[test]
    fn test_unsupported_format_sets_invalid_enum() {
        let mut ctx = context();
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        ctx.tex_image_2d(TEXTURE_2D, 0, RGBA, 1, 1, 0, RGBA, FLOAT, None);
        assert_eq!(ctx.get_error(), INVALID_ENUM);
        assert!(ctx.runtime().calls.is_empty());
    }

    #[test]
    fn test_sub_image_bounds_checked() {
        let mut ctx = context();
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        ctx.tex_image_2d(TEXTURE_2D, 0, RGBA, 2, 2, 0, RGBA, UNSIGNED_BYTE, None);
        ctx.runtime_mut().clear_calls();

        ctx.tex_sub_image_2d(TEXTURE_2D, 0, 1, 1, 2, 1, RGBA, UNSIGNED_BYTE, Some(&[0; 8]));
        assert!(ctx.runtime().calls.is_empty());

        ctx.tex_sub_image_2d(TEXTURE_2D, 0, 1, 1, 1, 1, ALPHA, UNSIGNED_BYTE, Some(&[7]));
        assert_eq!(
            ctx.runtime().calls,
            vec![Call::SubUpload { id: tex, rect: [1, 1, 1, 1], bytes: Some(vec![0, 0, 0, 7]) }]
        );
    }

    #[test]
    fn test_tex_parameter_forwards_sampler() {
        let mut ctx = context();
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        ctx.tex_parameteri(TEXTURE_2D, TEXTURE_WRAP_S, CLAMP_TO_EDGE as i32);
        ctx.tex_parameteri(TEXTURE_2D, 0x1234, 1);
        let expected = SamplerParams { wrap_s: CLAMP_TO_EDGE, ..SamplerParams::default() };
        assert_eq!(ctx.runtime().calls, vec![Call::Sampler(tex, expected)]);
    }

    #[test]
    fn test_delete_texture_detaches_framebuffer_and_units() {
        let mut ctx = context();
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        ctx.tex_image_2d(TEXTURE_2D, 0, RGBA, 4, 4, 0, RGBA, UNSIGNED_BYTE, None);
        let fb = ctx.gen_framebuffer();
        ctx.bind_framebuffer(FRAMEBUFFER, fb);
        ctx.framebuffer_texture_2d(FRAMEBUFFER, COLOR_ATTACHMENT0, TEXTURE_2D, tex, 0);
        ctx.runtime_mut().clear_calls();

        ctx.delete_texture(tex);
        assert_eq!(
            ctx.runtime().calls,
            vec![
                Call::DestroyTexture(tex),
                Call::Attachment { framebuffer: fb, texture: 0, width: 0, height: 0 },
            ]
        );
        assert_eq!(ctx.get_integer(TEXTURE_BINDING_2D), 0);
        assert!(!ctx.is_texture(tex));
    }

    #[test]
    fn test_reupload_resyncs_attachment() {
        let mut ctx = context();
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        let fb = ctx.gen_framebuffer();
        ctx.bind_framebuffer(FRAMEBUFFER, fb);
        ctx.framebuffer_texture_2d(FRAMEBUFFER, COLOR_ATTACHMENT0, TEXTURE_2D, tex, 0);
        ctx.runtime_mut().clear_calls();

        ctx.tex_image_2d(TEXTURE_2D, 0, RGBA, 8, 4, 0, RGBA, UNSIGNED_BYTE, None);
        assert_eq!(
            ctx.runtime().calls.last(),
            Some(&Call::Attachment { framebuffer: fb, texture: tex, width: 8, height: 4 })
        );
    }

    #[test]
    fn test_trace_keeps_mirror() {
        let config = CompatConfig { trace: true, ..CompatConfig::default() };
        let mut ctx = GlContext::new(MockRuntime::default(), &config);
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        ctx.tex_image_2d(TEXTURE_2D, 0, RGBA, 2, 1, 0, RGBA, UNSIGNED_BYTE, None);
        ctx.tex_sub_image_2d(TEXTURE_2D, 0, 1, 0, 1, 1, LUMINANCE, UNSIGNED_BYTE, Some(&[9]));
        assert_eq!(ctx.texture_mirror(tex), Some(&[0, 0, 0, 0, 9, 9, 9, 255][..]));
    }

    // ==== buffers and vertex arrays ====

    #[test]
    fn test_buffer_data_and_sub_data() {
        let mut ctx = context();
        let buf = ctx.gen_buffer();
        ctx.bind_buffer(ARRAY_BUFFER, buf as i32);
        ctx.buffer_data(ARRAY_BUFFER, 4, Some(&[1, 2]), STATIC_DRAW);
        ctx.buffer_sub_data(ARRAY_BUFFER, 3, &[9, 9]);
        ctx.buffer_sub_data(ARRAY_BUFFER, -1, &[5]);
        assert_eq!(ctx.buffers.get(buf).map(|b| b.data.clone()), Some(vec![1, 2, 0, 9]));
        assert_eq!(ctx.get_integer(ARRAY_BUFFER_BINDING), buf as i32);
    }

    #[test]
    fn test_bind_large_application_names() {
        let mut ctx = context();
        ctx.bind_buffer(ARRAY_BUFFER, 0x7FFF_FFF0);
        ctx.buffer_data(ARRAY_BUFFER, 2, Some(&[7, 8]), STATIC_DRAW);
        assert_eq!(ctx.get_integer(ARRAY_BUFFER_BINDING), 0x7FFF_FFF0);
        assert_eq!(ctx.buffers.get(0x7FFF_FFF0).map(|b| b.data.clone()), Some(vec![7, 8]));

        ctx.bind_texture(TEXTURE_2D, 0x7FFF_FFFF);
        assert!(ctx.is_texture(0x7FFF_FFFF));
        ctx.delete_buffer(0x7FFF_FFF0);
        assert!(!ctx.is_buffer(0x7FFF_FFF0));
    }

    #[test]
    fn test_delete_buffer_unbinds_everywhere() {
        let mut ctx = context();
        let buf = ctx.gen_buffer();
        ctx.bind_buffer(ARRAY_BUFFER, buf as i32);
        ctx.bind_buffer(ELEMENT_ARRAY_BUFFER, buf as i32);
        ctx.vertex_attrib_pointer(0, 2, FLOAT, false, 0, 0);
        ctx.delete_buffer(buf);
        assert_eq!(ctx.get_integer(ARRAY_BUFFER_BINDING), 0);
        assert_eq!(ctx.get_integer(ELEMENT_ARRAY_BUFFER_BINDING), 0);
        assert!(ctx.vertex_arrays.get(0).is_some_and(|v| v.attributes.is_empty()));
        assert!(!ctx.is_buffer(buf));
    }

    #[test]
    fn test_vertex_arrays_keep_element_binding() {
        let mut ctx = context();
        let vao = ctx.gen_vertex_array();
        ctx.bind_vertex_array(vao);
        ctx.bind_buffer(ELEMENT_ARRAY_BUFFER, 7);
        ctx.bind_vertex_array(0);
        assert_eq!(ctx.get_integer(ELEMENT_ARRAY_BUFFER_BINDING), 0);
        ctx.bind_vertex_array(vao);
        assert_eq!(ctx.get_integer(ELEMENT_ARRAY_BUFFER_BINDING), 7);
        ctx.delete_vertex_array(vao);
        assert_eq!(ctx.get_integer(VERTEX_ARRAY_BINDING), 0);
        assert!(!ctx.is_vertex_array(vao));
    }

    #[test]
    fn test_generic_attrib_colors() {
        let mut ctx = context();
        assert_eq!(ctx.generic_color(1, WHITE), 0xFF00_0000);
        ctx.vertex_attrib4fv(1, &[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(ctx.generic_color(1, WHITE), 0xFF00_00FF);
        ctx.vertex_attrib2fv(1, &[1.0]);
        assert_eq!(ctx.generic_color(1, WHITE), 0xFF00_00FF);
        assert_eq!(ctx.generic_color(99, WHITE), WHITE);
    }

    // ==== shaders, programs and uniforms ====

    const VS: &str = "attribute vec4 a_position; attribute vec2 a_texCoord0; uniform mat4 u_projTrans; void main(){}";
    const FS: &str = "uniform sampler2D u_texture; uniform vec4 u_tint; void main(){}";

    fn linked(ctx: &mut GlContext<MockRuntime>) -> u32 {
        let vs = ctx.create_shader(VERTEX_SHADER);
        ctx.shader_source(vs, VS);
        ctx.compile_shader(vs);
        let fs = ctx.create_shader(FRAGMENT_SHADER);
        ctx.shader_source(fs, FS);
        ctx.compile_shader(fs);
        let program = ctx.create_program();
        ctx.attach_shader(program, vs);
        ctx.attach_shader(program, fs);
        ctx.link_program(program);
        program
    }

    #[test]
    fn test_compile_empty_source_fails() {
        let mut ctx = context();
        let vs = ctx.create_shader(VERTEX_SHADER);
        ctx.shader_source(vs, "   ");
        ctx.compile_shader(vs);
        assert_eq!(ctx.get_shaderiv(vs, COMPILE_STATUS), 0);
        assert_eq!(ctx.get_shader_info_log(vs), "Empty source.");
        assert_eq!(ctx.get_shaderiv(vs, INFO_LOG_LENGTH), 14);
        assert_eq!(ctx.get_shaderiv(vs, SHADER_TYPE), VERTEX_SHADER as i32);
    }

    #[test]
    fn test_program_queries() {
        let mut ctx = context();
        let program = linked(&mut ctx);
        assert_eq!(ctx.get_programiv(program, LINK_STATUS), 1);
        assert_eq!(ctx.get_programiv(program, ACTIVE_ATTRIBUTES), 2);
        assert_eq!(ctx.get_programiv(program, ACTIVE_UNIFORMS), 3);
        assert_eq!(ctx.get_programiv(program, ATTACHED_SHADERS), 2);
        assert_eq!(ctx.get_attrib_location(program, "a_texCoord0"), 1);
        assert_eq!(ctx.get_uniform_location(program, "u_tint"), 2);
        assert_eq!(ctx.get_active_uniform(program, 1).map(|u| u.ty), Some(SAMPLER_2D));
        assert!(ctx.get_active_attrib(program, 5).is_none());
    }

    #[test]
    fn test_uniform_writes_go_to_current_program() {
        let mut ctx = context();
        let program = linked(&mut ctx);
        ctx.uniform4f(2, 1.0, 2.0, 3.0, 4.0);
        assert!(ctx.programs.get(program).is_some_and(|p| p.cells.floats(2).is_none()));

        ctx.use_program(program);
        ctx.uniform4fv(2, 1, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        ctx.uniform3fv(2, 0, &[9.0, 9.0, 9.0]);
        ctx.uniform1i(-1, 5);
        ctx.uniform_matrix4fv(0, 1, false, &[2.0; 16]);
        let state = ctx.programs.get(program).unwrap();
        assert_eq!(state.cells.floats(2), Some(&[1.0, 2.0, 3.0, 4.0][..]));
        assert_eq!(state.projection(), [2.0; 16]);
    }

    #[test]
    fn test_delete_shader_detaches_everywhere() {
        let mut ctx = context();
        let program = linked(&mut ctx);
        ctx.delete_shader(1);
        assert_eq!(ctx.get_programiv(program, ATTACHED_SHADERS), 1);
        ctx.link_program(program);
        assert_eq!(ctx.get_programiv(program, LINK_STATUS), 0);
        assert_eq!(ctx.get_program_info_log(program), "Missing vertex shader.");
    }

    // ==== framebuffers ====

    #[test]
    fn test_delete_current_framebuffer_rebinds_default() {
        let mut ctx = context();
        let fb = ctx.gen_framebuffer();
        ctx.bind_framebuffer(FRAMEBUFFER, fb);
        assert!(ctx.is_framebuffer(fb));
        ctx.delete_framebuffer(fb);
        assert_eq!(
            ctx.runtime().calls,
            vec![Call::CurrentFramebuffer(fb), Call::RemoveFramebuffer(fb), Call::CurrentFramebuffer(0)]
        );
        assert_eq!(ctx.get_integer(FRAMEBUFFER_BINDING), 0);
        assert_eq!(ctx.check_framebuffer_status(FRAMEBUFFER), FRAMEBUFFER_COMPLETE);
    }

    #[test]
    fn test_framebuffer_texture_on_default_is_ignored() {
        let mut ctx = context();
        let tex = ctx.gen_texture();
        ctx.framebuffer_texture_2d(FRAMEBUFFER, COLOR_ATTACHMENT0, TEXTURE_2D, tex, 0);
        assert!(ctx.runtime().calls.is_empty());
        assert!(!ctx.is_render_target_texture(tex));
    }

    #[test]
    fn test_renderbuffers_are_tracked() {
        let mut ctx = context();
        let rb = ctx.gen_renderbuffer();
        ctx.bind_renderbuffer(RENDERBUFFER, rb);
        assert_eq!(ctx.get_integer(RENDERBUFFER_BINDING), rb as i32);
        ctx.delete_renderbuffer(rb);
        assert!(!ctx.is_renderbuffer(rb));
        assert_eq!(ctx.get_integer(RENDERBUFFER_BINDING), 0);
    }

    // ==== frames ====

    #[test]
    fn test_frame_calls_reach_runtime() {
        let mut ctx = context();
        ctx.begin_frame();
        ctx.clear_color(0.0, 0.0, 0.0, 1.0);
        ctx.clear(COLOR_BUFFER_BIT);
        ctx.end_frame();
        ctx.dispose();
        assert_eq!(
            ctx.runtime().calls,
            vec![
                Call::BeginFrame,
                Call::ClearColor([0.0, 0.0, 0.0, 1.0]),
                Call::Clear(COLOR_BUFFER_BIT),
                Call::EndFrame,
                Call::Dispose,
            ]
        );
    }
}
