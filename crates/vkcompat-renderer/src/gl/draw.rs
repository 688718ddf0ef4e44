//! Draw submission: `drawArrays` / `drawElements` down to one `SpriteDraw`.

use super::consts::*;
use super::context::{GlContext, WHITE};
use super::state::{is_identity, ProgramState, TextureState, VertexAttribState};
use crate::adapter::{BlendState, CompatRuntime, EffectUniforms, SpriteDraw, VertexLayout};
use crate::stencil::{StencilPass, WindowRect};
use crate::submit::batch::{build_batch, ColorSource, VertexSources};
use crate::submit::decode::AttribSource;
use crate::submit::topology;

impl<R: CompatRuntime> GlContext<R> {
    pub fn draw_arrays(&mut self, mode: u32, first: i32, count: i32) {
        self.stats.draw_calls += 1;
        if count <= 0 || first < 0 {
            return;
        }
        let indices = topology::sequential_indices(first as u32, count as usize);
        self.submit_draw(mode, &indices);
    }

    /// `drawElements` with indices in client memory.
    pub fn draw_elements(&mut self, mode: u32, count: i32, ty: u32, indices: &[u8]) {
        self.stats.draw_calls += 1;
        if count <= 0 {
            return;
        }
        if topology::bytes_per_index(ty).is_none() {
            self.set_error(INVALID_ENUM);
            return;
        }
        if let Some(source) = topology::read_indices(indices, count as usize, ty) {
            self.submit_draw(mode, &source);
        }
    }

    /// `drawElements` reading from the bound `ELEMENT_ARRAY_BUFFER` at a
    /// byte offset.
    pub fn draw_elements_offset(&mut self, mode: u32, count: i32, ty: u32, offset: usize) {
        self.stats.draw_calls += 1;
        if count <= 0 {
            return;
        }
        if topology::bytes_per_index(ty).is_none() {
            self.set_error(INVALID_ENUM);
            return;
        }
        let element_buffer = self.vertex_arrays.get(self.current_vao).map_or(0, |v| v.element_buffer);
        let source = self
            .buffers
            .get(element_buffer)
            .and_then(|b| b.data.get(offset..))
            .and_then(|bytes| topology::read_indices(bytes, count as usize, ty));
        match source {
            Some(source) => self.submit_draw(mode, &source),
            None => self.stats.skip_read += 1,
        }
    }

    fn submit_draw(&mut self, mode: u32, source: &[u32]) {
        let Some(triangles) = topology::triangulate(mode, source) else {
            self.stats.skip_mode += 1;
            return;
        };
        let Some(program) = self.programs.get(self.current_program) else {
            self.stats.skip_program += 1;
            return;
        };
        if !program.linked {
            self.stats.skip_unlinked += 1;
            return;
        }

        let bindings = program.bindings;
        let Some(vao) = self.vertex_arrays.get(self.current_vao) else {
            self.stats.skip_attrib += 1;
            return;
        };
        let enabled = |location: Option<u32>| location.and_then(|l| vao.enabled(l)).copied();
        let (Some(position), Some(tex_coord)) = (enabled(bindings.position), enabled(bindings.tex_coord)) else {
            self.stats.skip_attrib += 1;
            return;
        };
        let color = enabled(bindings.color);
        let mix_color = enabled(bindings.mix_color);

        let unit = bindings.texture.and_then(|loc| program.cells.int(loc)).unwrap_or(0);
        let texture = usize::try_from(unit)
            .ok()
            .and_then(|u| self.texture_units.get(u).copied())
            .unwrap_or(0);
        let texture_state = self.textures.get(texture);
        let projection = program.projection();

        // Render-to-texture targets are stored top-down; sampling them with
        // a screen-space projection needs V flipped.
        let flip_v = self.is_render_target_texture(texture)
            && (bindings.projection.is_none()
                || is_identity(&projection)
                || texture_state.is_some_and(|t| smaller_than_viewport(t, self.viewport)));

        let color_masked_out = self.color_mask.iter().all(|&c| !c);
        let framebuffer = self.current_framebuffer;
        let pass = self.stencil.classify(self.caps.contains(&STENCIL_TEST), color_masked_out);
        self.stencil.note_pass(pass, framebuffer);
        if color_masked_out && pass != StencilPass::Write {
            return;
        }

        let resolve = |attrib: &VertexAttribState| {
            let buffer = self.buffers.get(attrib.buffer)?;
            AttribSource::new(
                &buffer.data,
                attrib.pointer,
                attrib.effective_stride(),
                attrib.size,
                attrib.ty,
                attrib.normalized,
            )
        };
        let color_source = match color {
            Some(attrib) => resolve(&attrib).map(ColorSource::Array),
            None => Some(ColorSource::Constant(bindings.color.map_or(WHITE, |loc| self.generic_color(loc, WHITE)))),
        };
        let mix_source = match mix_color {
            Some(attrib) => resolve(&attrib).map(ColorSource::Array),
            None => Some(ColorSource::Constant(bindings.mix_color.map_or(0, |loc| self.generic_color(loc, 0)))),
        };
        let (Some(position), Some(tex_coord), Some(color), Some(mix_color)) =
            (resolve(&position), resolve(&tex_coord), color_source, mix_source)
        else {
            self.stats.skip_read += 1;
            return;
        };
        let sources = VertexSources { position, tex_coord, color, mix_color };
        let Some(batch) = build_batch(&triangles, &sources, flip_v) else {
            self.stats.skip_read += 1;
            return;
        };
        self.stats.decoded_vertices += batch.vertices.len() as u64;
        self.stats.decoded_indices += batch.indices.len() as u64;

        if pass == StencilPass::Write {
            for vertex in &batch.vertices {
                let [x, y] = vertex.position;
                self.stencil.accumulate(x, y, &projection, self.viewport, framebuffer);
            }
            self.stats.stencil_write += 1;
            return;
        }

        let clipped = pass == StencilPass::Read;
        if clipped {
            self.stats.stencil_read += 1;
            if !self.stencil.push_clip(&mut self.runtime, framebuffer, self.viewport, &self.scissor) {
                self.stats.stencil_drop += 1;
                return;
            }
            self.stats.stencil_clip += 1;
        }

        let effect = program.effect;
        let effect_uniforms = effect
            .uses_effect_uniforms()
            .then(|| effect_uniforms(program, texture_state, self.viewport));
        let blend = BlendState { enabled: self.caps.contains(&BLEND), ..self.blend };

        self.runtime.set_current_framebuffer(framebuffer);
        self.runtime.draw_sprite(&SpriteDraw {
            vertices: batch.vertex_bytes(),
            vertex_count: batch.vertices.len() as u32,
            layout: VertexLayout::SPRITE,
            indices: batch.indices.as_bytes(),
            index_type: batch.indices.index_type(),
            index_count: batch.indices.len() as u32,
            texture,
            projection,
            variant: effect.variant(),
            effect: effect_uniforms,
            blend,
        });

        if clipped {
            self.stencil.pop_clip(&mut self.runtime, &self.scissor);
        }
        self.stats.submitted += 1;
        self.stats.effects[effect.index()] += 1;
        if flip_v {
            self.stats.flips += 1;
        }
    }
}

/// Texture size with each side at least 1, so an attachment that was never
/// given storage still counts as a 1x1 image.
fn texture_size(texture: &TextureState) -> (u32, u32) {
    (texture.width.max(1), texture.height.max(1))
}

fn smaller_than_viewport(texture: &TextureState, viewport: WindowRect) -> bool {
    let (w, h) = texture_size(texture);
    i64::from(w) < i64::from(viewport.width) || i64::from(h) < i64::from(viewport.height)
}

/// Inputs of the Shield and BuildBeam programs. Unset uniforms fall back to
/// the bound texture size (or the viewport without one).
fn effect_uniforms(program: &ProgramState, texture: Option<&TextureState>, viewport: WindowRect) -> EffectUniforms {
    let (width, height) = match texture.map(texture_size) {
        Some((w, h)) => (w as f32, h as f32),
        None => (viewport.width.max(1) as f32, viewport.height.max(1) as f32),
    };

    let tex_size = program.uniform_vec2("u_texsize", [width, height]);
    let inverse = |size: f32, fallback: f32| if size.abs() > 1e-6 { 1.0 / size } else { 1.0 / fallback };
    let inv_size = program.uniform_vec2("u_invsize", [inverse(tex_size[0], width), inverse(tex_size[1], height)]);

    EffectUniforms {
        tex_size,
        inv_size,
        time: program.uniform_float("u_time", 0.0),
        dp: program.uniform_float("u_dp", 1.0).max(1e-4),
        offset: program.uniform_vec2("u_offset", [0.0, 0.0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::{Call, MockRuntime, RecordedDraw};
    use crate::adapter::{IndexType, ShaderVariant};
    use crate::config::CompatConfig;
    use crate::gl::state::IDENTITY;
    use crate::submit::batch::SpriteVertex;

    const SPRITE_VS: &str = r#"
        attribute vec4 a_position;
        attribute vec4 a_color;
        attribute vec2 a_texCoord0;
        attribute vec4 a_mix_color;
        uniform mat4 u_projTrans;
        varying vec4 v_color;
        varying vec4 v_mix_color;
        varying vec2 v_texCoords;
        void main(){
            v_color = a_color;
            v_mix_color = a_mix_color;
            v_texCoords = a_texCoord0;
            gl_Position = u_projTrans * a_position;
        }
    "#;

    const SPRITE_FS: &str = r#"
        varying lowp vec4 v_color;
        varying lowp vec4 v_mix_color;
        varying highp vec2 v_texCoords;
        uniform highp sampler2D u_texture;
        void main(){
            vec4 c = texture2D(u_texture, v_texCoords);
            gl_FragColor = v_color * mix(c, vec4(v_mix_color.rgb, c.a), v_mix_color.a);
        }
    "#;

    const SHIELD_FS: &str = r#"
        uniform sampler2D u_texture;
        uniform vec2 u_texsize;
        uniform vec2 u_invsize;
        uniform float u_time;
        uniform float u_dp;
        uniform vec2 u_offset;
        varying vec2 v_texCoords;
        void main(){
            vec2 coords = v_texCoords * u_texsize + u_offset;
            vec2 T = v_texCoords + vec2(sin(coords.y / 3.0 + u_time / 20.0), 0.0) * u_invsize;
            vec4 color = texture2D(u_texture, T);
            vec4 maxed = max(color, texture2D(u_texture, T + u_invsize));
            if(maxed.a > 0.9){
                gl_FragColor = maxed;
            }else{
                color.a = 0.18;
                gl_FragColor = color;
            }
        }
    "#;

    /// Fan of five vertices, interleaved `x, y, u, v`.
    const FAN: [f32; 20] = [
        0.0, 0.0, 0.0, 0.0, //
        10.0, 0.0, 1.0, 0.0, //
        10.0, 10.0, 1.0, 1.0, //
        0.0, 10.0, 0.0, 1.0, //
        -10.0, 10.0, 0.0, 1.0,
    ];

    fn bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    fn program(ctx: &mut GlContext<MockRuntime>, fragment: &str) -> u32 {
        let vs = ctx.create_shader(VERTEX_SHADER);
        ctx.shader_source(vs, SPRITE_VS);
        ctx.compile_shader(vs);
        let fs = ctx.create_shader(FRAGMENT_SHADER);
        ctx.shader_source(fs, fragment);
        ctx.compile_shader(fs);
        let program = ctx.create_program();
        ctx.attach_shader(program, vs);
        ctx.attach_shader(program, fs);
        ctx.link_program(program);
        program
    }

    /// Linked sprite program in use, fan geometry bound to locations 0 and 2.
    fn scene(fragment: &str) -> GlContext<MockRuntime> {
        let mut ctx = GlContext::new(MockRuntime::default(), &CompatConfig::default());
        let program = program(&mut ctx, fragment);
        ctx.use_program(program);

        let buffer = ctx.gen_buffer();
        ctx.bind_buffer(ARRAY_BUFFER, buffer as i32);
        let data = bytes(&FAN);
        ctx.buffer_data(ARRAY_BUFFER, data.len(), Some(&data), STATIC_DRAW);
        ctx.vertex_attrib_pointer(0, 2, FLOAT, false, 16, 0);
        ctx.vertex_attrib_pointer(2, 2, FLOAT, false, 16, 8);
        ctx.enable_vertex_attrib_array(0);
        ctx.enable_vertex_attrib_array(2);
        ctx.viewport(0, 0, 100, 100);
        ctx.runtime_mut().clear_calls();
        ctx
    }

    fn only_draw(ctx: &GlContext<MockRuntime>) -> RecordedDraw {
        let draws = ctx.runtime().draws();
        assert_eq!(draws.len(), 1);
        draws[0].clone()
    }

    fn vertex(draw: &RecordedDraw, index: usize) -> SpriteVertex {
        let start = index * std::mem::size_of::<SpriteVertex>();
        bytemuck::pod_read_unaligned(&draw.vertices[start..start + std::mem::size_of::<SpriteVertex>()])
    }

    fn u16_indices(draw: &RecordedDraw) -> Vec<u16> {
        draw.indices.chunks_exact(2).map(|c| u16::from_ne_bytes([c[0], c[1]])).collect()
    }

    // ==== geometry ====

    #[test]
    fn test_fan_draw() {
        let mut ctx = scene(SPRITE_FS);
        ctx.draw_arrays(TRIANGLE_FAN, 0, 5);

        let draw = only_draw(&ctx);
        assert_eq!(draw.vertex_count, 5);
        assert_eq!(draw.index_count, 9);
        assert_eq!(draw.index_type, IndexType::U16);
        assert_eq!(u16_indices(&draw), vec![0, 1, 2, 0, 2, 3, 0, 3, 4]);
        assert_eq!(draw.variant, ShaderVariant::Default);
        assert_eq!(draw.texture, 0);
        assert_eq!(draw.projection, IDENTITY);
        assert!(draw.effect.is_none());
        assert!(!draw.blend.enabled);

        let v = vertex(&draw, 2);
        assert_eq!(v.position, [10.0, 10.0]);
        assert_eq!(v.tex_coord, [1.0, 1.0]);
        // Generic attributes default to (0, 0, 0, 1).
        assert_eq!(v.color, 0xFF00_0000);
        assert_eq!(v.mix_color, 0xFF00_0000);
    }

    #[test]
    fn test_generic_color_reaches_vertices() {
        let mut ctx = scene(SPRITE_FS);
        ctx.vertex_attrib4f(1, 1.0, 0.0, 0.0, 1.0);
        ctx.vertex_attrib4f(3, 0.0, 0.0, 0.0, 0.0);
        ctx.draw_arrays(TRIANGLES, 0, 3);
        let v = vertex(&only_draw(&ctx), 0);
        assert_eq!(v.color, 0xFF00_00FF);
        assert_eq!(v.mix_color, 0);
    }

    #[test]
    fn test_client_and_buffer_indices() {
        let mut ctx = scene(SPRITE_FS);
        ctx.draw_elements(TRIANGLES, 3, UNSIGNED_BYTE, &[2, 3, 4]);

        let element = ctx.gen_buffer();
        ctx.bind_buffer(ELEMENT_ARRAY_BUFFER, element as i32);
        let indices: Vec<u8> = [9u16, 9, 0, 1, 2].iter().flat_map(|i| i.to_ne_bytes()).collect();
        ctx.buffer_data(ELEMENT_ARRAY_BUFFER, indices.len(), Some(&indices), STATIC_DRAW);
        ctx.draw_elements_offset(TRIANGLES, 3, UNSIGNED_SHORT, 4);

        let draws = ctx.runtime().draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(vertex(draws[0], 0).position, [10.0, 10.0]);
        assert_eq!(u16_indices(draws[0]), vec![0, 1, 2]);
        assert_eq!(vertex(draws[1], 0).position, [0.0, 0.0]);
    }

    #[test]
    fn test_bad_index_type_sets_invalid_enum() {
        let mut ctx = scene(SPRITE_FS);
        ctx.draw_elements(TRIANGLES, 3, FLOAT, &[0; 12]);
        assert_eq!(ctx.get_error(), INVALID_ENUM);
        assert!(ctx.runtime().draws().is_empty());
    }

    #[test]
    fn test_non_triangle_modes_are_skipped() {
        let mut ctx = scene(SPRITE_FS);
        ctx.draw_arrays(LINES, 0, 4);
        ctx.draw_arrays(TRIANGLES, 0, 0);
        assert!(ctx.runtime().draws().is_empty());
        assert_eq!(ctx.stats.skip_mode, 1);
        assert_eq!(ctx.stats.draw_calls, 2);
    }

    #[test]
    fn test_partial_triangle_list_is_skipped() {
        let mut ctx = scene(SPRITE_FS);
        ctx.draw_arrays(TRIANGLES, 0, 4);
        ctx.draw_elements(TRIANGLES, 5, UNSIGNED_BYTE, &[0, 1, 2, 3, 4]);
        assert!(ctx.runtime().draws().is_empty());
        assert_eq!(ctx.stats.skip_mode, 2);
    }

    #[test]
    fn test_unlinked_program_or_disabled_attribute_draws_nothing() {
        let mut ctx = scene(SPRITE_FS);
        ctx.disable_vertex_attrib_array(2);
        ctx.draw_arrays(TRIANGLES, 0, 3);
        assert_eq!(ctx.stats.skip_attrib, 1);

        ctx.enable_vertex_attrib_array(2);
        let unlinked = ctx.create_program();
        ctx.use_program(unlinked);
        ctx.draw_arrays(TRIANGLES, 0, 3);
        assert_eq!(ctx.stats.skip_unlinked, 1);

        ctx.use_program(0);
        ctx.draw_arrays(TRIANGLES, 0, 3);
        assert_eq!(ctx.stats.skip_program, 1);
        assert!(ctx.runtime().draws().is_empty());
    }

    #[test]
    fn test_out_of_range_vertex_drops_draw() {
        let mut ctx = scene(SPRITE_FS);
        ctx.draw_arrays(TRIANGLES, 3, 3);
        assert!(ctx.runtime().draws().is_empty());
        assert_eq!(ctx.stats.skip_read, 1);
    }

    // ==== textures and effects ====

    #[test]
    fn test_texture_unit_comes_from_sampler_uniform() {
        let mut ctx = scene(SPRITE_FS);
        let tex = ctx.gen_texture();
        ctx.active_texture(TEXTURE0 + 3);
        ctx.bind_texture(TEXTURE_2D, tex);
        let location = ctx.get_uniform_location(ctx.get_integer(CURRENT_PROGRAM) as u32, "u_texture");
        ctx.uniform1i(location, 3);
        ctx.draw_arrays(TRIANGLES, 0, 3);
        let draw = only_draw(&ctx);
        assert_eq!(draw.texture, tex);
        assert_eq!(vertex(&draw, 2).tex_coord, [1.0, 1.0]);
    }

    #[test]
    fn test_render_target_texture_is_flipped() {
        let mut ctx = scene(SPRITE_FS);
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        ctx.tex_image_2d(TEXTURE_2D, 0, RGBA, 64, 64, 0, RGBA, UNSIGNED_BYTE, None);
        let fb = ctx.gen_framebuffer();
        ctx.bind_framebuffer(FRAMEBUFFER, fb);
        ctx.framebuffer_texture_2d(FRAMEBUFFER, COLOR_ATTACHMENT0, TEXTURE_2D, tex, 0);
        ctx.bind_framebuffer(FRAMEBUFFER, 0);
        ctx.runtime_mut().clear_calls();

        ctx.draw_arrays(TRIANGLES, 0, 3);
        let draw = only_draw(&ctx);
        assert_eq!(vertex(&draw, 0).tex_coord, [0.0, 1.0]);
        assert_eq!(vertex(&draw, 2).tex_coord, [1.0, 0.0]);
        assert_eq!(ctx.stats.flips, 1);
    }

    #[test]
    fn test_plain_texture_is_not_flipped() {
        let mut ctx = scene(SPRITE_FS);
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        ctx.tex_image_2d(TEXTURE_2D, 0, RGBA, 64, 64, 0, RGBA, UNSIGNED_BYTE, None);
        ctx.runtime_mut().clear_calls();
        ctx.draw_arrays(TRIANGLES, 0, 3);
        assert_eq!(vertex(&only_draw(&ctx), 0).tex_coord, [0.0, 0.0]);
    }

    #[test]
    fn test_shield_effect_uniforms() {
        let mut ctx = scene(SHIELD_FS);
        let program = ctx.get_integer(CURRENT_PROGRAM) as u32;
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        ctx.tex_image_2d(TEXTURE_2D, 0, RGBA, 32, 16, 0, RGBA, UNSIGNED_BYTE, None);
        let dp = ctx.get_uniform_location(program, "u_dp");
        ctx.uniform1f(dp, 2.0);
        ctx.runtime_mut().clear_calls();

        ctx.draw_arrays(TRIANGLES, 0, 3);
        let draw = only_draw(&ctx);
        assert_eq!(draw.variant, ShaderVariant::Shield);
        assert_eq!(
            draw.effect,
            Some(EffectUniforms {
                tex_size: [32.0, 16.0],
                inv_size: [1.0 / 32.0, 1.0 / 16.0],
                time: 0.0,
                dp: 2.0,
                offset: [0.0, 0.0],
            })
        );
        assert_eq!(ctx.stats.effects[2], 1);
    }

    #[test]
    fn test_texture_without_storage_counts_as_one_pixel() {
        let mut ctx = scene(SHIELD_FS);
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        ctx.draw_arrays(TRIANGLES, 0, 3);
        let effect = only_draw(&ctx).effect;
        assert_eq!(effect.map(|e| (e.tex_size, e.inv_size)), Some(([1.0, 1.0], [1.0, 1.0])));

        // A sized projection alone would not flip; the 1x1 attachment is
        // smaller than the 100x100 viewport.
        let mut ctx = scene(SPRITE_FS);
        scale_projection(&mut ctx);
        let tex = ctx.gen_texture();
        ctx.bind_texture(TEXTURE_2D, tex);
        let fb = ctx.gen_framebuffer();
        ctx.bind_framebuffer(FRAMEBUFFER, fb);
        ctx.framebuffer_texture_2d(FRAMEBUFFER, COLOR_ATTACHMENT0, TEXTURE_2D, tex, 0);
        ctx.bind_framebuffer(FRAMEBUFFER, 0);
        ctx.runtime_mut().clear_calls();
        ctx.draw_arrays(TRIANGLES, 0, 3);
        assert_eq!(vertex(&only_draw(&ctx), 0).tex_coord, [0.0, 1.0]);
        assert_eq!(ctx.stats.flips, 1);
    }

    #[test]
    fn test_blend_state_travels_with_draw() {
        let mut ctx = scene(SPRITE_FS);
        ctx.enable(BLEND);
        ctx.blend_func(SRC_ALPHA, ONE_MINUS_SRC_ALPHA);
        ctx.draw_arrays(TRIANGLES, 0, 3);
        let blend = only_draw(&ctx).blend;
        assert!(blend.enabled);
        assert_eq!(blend.src_rgb, SRC_ALPHA);
        assert_eq!(blend.dst_alpha, ONE_MINUS_SRC_ALPHA);
        assert_eq!(blend.equation_rgb, FUNC_ADD);
    }

    // ==== stencil clip ====

    /// Projection mapping the fan's `[-10, 10]` range onto the viewport.
    fn scale_projection(ctx: &mut GlContext<MockRuntime>) {
        let program = ctx.get_integer(CURRENT_PROGRAM) as u32;
        let location = ctx.get_uniform_location(program, "u_projTrans");
        let mut m = IDENTITY;
        m[0] = 0.1;
        m[5] = 0.1;
        ctx.uniform_matrix4fv(location, 1, false, &m);
    }

    #[test]
    fn test_stencil_write_then_read_clips() {
        let mut ctx = scene(SPRITE_FS);
        scale_projection(&mut ctx);
        ctx.enable(STENCIL_TEST);

        ctx.color_mask(false, false, false, false);
        ctx.stencil_func(ALWAYS, 1, 0xFF);
        ctx.stencil_op(KEEP, KEEP, REPLACE);
        ctx.draw_arrays(TRIANGLE_FAN, 0, 5);
        assert!(ctx.runtime().draws().is_empty());
        assert_eq!(ctx.stats.stencil_write, 1);

        ctx.color_mask(true, true, true, true);
        ctx.stencil_func(EQUAL, 1, 0xFF);
        ctx.stencil_op(KEEP, KEEP, KEEP);
        ctx.draw_arrays(TRIANGLES, 0, 3);

        assert_eq!(ctx.runtime().draws().len(), 1);
        assert_eq!(
            ctx.runtime().scissor_calls(),
            vec![&Call::Scissor([0, 50, 100, 50]), &Call::ScissorEnabled(true), &Call::ScissorEnabled(false)]
        );
        assert_eq!(ctx.stats.stencil_clip, 1);
    }

    #[test]
    fn test_stencil_read_restores_user_scissor() {
        let mut ctx = scene(SPRITE_FS);
        scale_projection(&mut ctx);
        ctx.enable(SCISSOR_TEST);
        ctx.scissor(10, 60, 20, 20);
        ctx.enable(STENCIL_TEST);
        ctx.color_mask(false, false, false, false);
        ctx.stencil_op(KEEP, KEEP, REPLACE);
        ctx.draw_arrays(TRIANGLE_FAN, 0, 5);
        ctx.color_mask(true, true, true, true);
        ctx.stencil_op(KEEP, KEEP, KEEP);
        ctx.stencil_func(EQUAL, 1, 0xFF);
        ctx.runtime_mut().clear_calls();

        ctx.draw_arrays(TRIANGLES, 0, 3);
        assert_eq!(
            ctx.runtime().scissor_calls(),
            vec![
                &Call::Scissor([10, 60, 20, 20]),
                &Call::ScissorEnabled(true),
                &Call::Scissor([10, 60, 20, 20]),
                &Call::ScissorEnabled(true),
            ]
        );
    }

    #[test]
    fn test_stencil_read_without_mask_is_dropped() {
        let mut ctx = scene(SPRITE_FS);
        ctx.enable(STENCIL_TEST);
        ctx.stencil_func(EQUAL, 1, 0xFF);
        ctx.draw_arrays(TRIANGLES, 0, 3);
        assert!(ctx.runtime().draws().is_empty());
        assert_eq!(ctx.stats.stencil_drop, 1);
    }

    #[test]
    fn test_masked_draw_without_stencil_write_is_dropped() {
        let mut ctx = scene(SPRITE_FS);
        ctx.color_mask(false, false, false, false);
        ctx.draw_arrays(TRIANGLES, 0, 3);
        assert!(ctx.runtime().draws().is_empty());
        assert_eq!(ctx.stats.stencil_write, 0);
    }
}
