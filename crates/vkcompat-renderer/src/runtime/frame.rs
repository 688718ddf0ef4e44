//! The Vulkan implementation of [`CompatRuntime`]: frame loop, render
//! target switching and sprite submission.

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use log::{debug, error, info, trace, warn};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::commands::CommandManager;
use super::memory::MemoryManager;
use super::pipeline::{BlendKey, PushConstants, SpritePipelineKey, SpritePipelines, TargetKind};
use super::retire::{RetireQueue, Retired};
use super::samplers::SamplerCache;
use super::stream::SpriteStream;
use super::swapchain::{Recreated, Swapchain};
use super::targets::{self, ColorAttachment, RenderTargets, TargetImage};
use super::textures::{GpuTexture, GpuTextureDevice, TextureStaging, TextureTable, UploadOutcome};
use super::viewport::{self, GlRect};
use super::VulkanContext;
use crate::adapter::{CompatRuntime, IndexType, SamplerParams, SpriteDraw, TextureSubUpload, TextureUpload};
use crate::config::CompatConfig;
use crate::error::Result;
use crate::gl::consts::COLOR_BUFFER_BIT;

const TRACE_EVERY_FRAMES: u64 = 60;
const PERF_EVERY_FRAMES: u64 = 120;

/// Every Vulkan object the runtime owns.
///
/// Field order is drop order: the allocator goes before the device it
/// allocated from.
struct GpuState {
    memory: MemoryManager,
    commands: CommandManager,
    samplers: SamplerCache,
    pipelines: SpritePipelines,
    swapchain: Swapchain,
    offscreen_pass: vk::RenderPass,
    textures: TextureTable<GpuTexture>,
    staging: TextureStaging<Allocation>,
    stream: SpriteStream<Allocation>,
    targets: RenderTargets<vk::Framebuffer>,
    retired: RetireQueue<Retired>,
    ctx: VulkanContext,
}

impl GpuState {
    unsafe fn new(ctx: VulkanContext, width: u32, height: u32, config: &CompatConfig) -> Result<Self> {
        let slots = config.frame_slots();
        let mut memory = MemoryManager::new(&ctx)?;
        let mut commands = CommandManager::new(&ctx, slots)?;
        let samplers = SamplerCache::new(&ctx.device);

        let mut pipelines = match SpritePipelines::new(&ctx.device) {
            Ok(pipelines) => pipelines,
            Err(err) => {
                commands.destroy();
                return Err(err);
            }
        };
        let offscreen_pass = match targets::create_offscreen_pass(&ctx.device) {
            Ok(pass) => pass,
            Err(err) => {
                pipelines.destroy();
                commands.destroy();
                return Err(err);
            }
        };
        let mut swapchain = match Swapchain::new(&ctx, &mut commands, width, height, slots) {
            Ok(swapchain) => swapchain,
            Err(err) => {
                ctx.device.destroy_render_pass(offscreen_pass, None);
                pipelines.destroy();
                commands.destroy();
                return Err(err);
            }
        };
        let stream = match SpriteStream::new(
            &mut memory,
            slots,
            config.vertex_ring_bytes,
            config.index_ring_bytes,
            config.max_pooled_buffers_per_bucket,
        ) {
            Ok(stream) => stream,
            Err(err) => {
                ctx.wait_idle();
                swapchain.destroy(&ctx);
                ctx.device.destroy_render_pass(offscreen_pass, None);
                pipelines.destroy();
                commands.destroy();
                return Err(err);
            }
        };

        Ok(Self {
            memory,
            commands,
            samplers,
            pipelines,
            swapchain,
            offscreen_pass,
            textures: TextureTable::default(),
            staging: TextureStaging::default(),
            stream,
            targets: RenderTargets::default(),
            retired: RetireQueue::new(slots),
            ctx,
        })
    }

    fn render_pass(&self, target: TargetKind) -> vk::RenderPass {
        match target {
            TargetKind::Swapchain => self.swapchain.render_pass,
            TargetKind::Offscreen => self.offscreen_pass,
        }
    }

    /// Run `f` with the texture table and a device view whose replaced
    /// objects retire into `retire_slot`.
    fn with_textures<R>(
        &mut self,
        retire_slot: usize,
        wait_idles: &mut u32,
        f: impl FnOnce(&mut TextureTable<GpuTexture>, &mut GpuTextureDevice<'_>) -> R,
    ) -> R {
        let mut device = GpuTextureDevice {
            device: &self.ctx.device,
            memory: &mut self.memory,
            commands: &mut self.commands,
            samplers: &mut self.samplers,
            pipelines: &self.pipelines,
            staging: &mut self.staging,
            retired: self.retired.list(retire_slot),
            wait_idles,
        };
        f(&mut self.textures, &mut device)
    }

    /// Destroy objects no pending command buffer can reference any more.
    unsafe fn destroy_retired(&mut self, items: Vec<Retired>) {
        for item in items {
            match item {
                Retired::Framebuffer(framebuffer) => self.ctx.device.destroy_framebuffer(framebuffer, None),
                Retired::Texture(mut texture) => {
                    self.pipelines.free_texture_set(texture.descriptor_set);
                    self.memory.destroy_image(&mut texture.image);
                }
                Retired::DescriptorSet(set) => self.pipelines.free_texture_set(set),
            }
        }
    }

    /// Tear everything down. The device must be idle.
    unsafe fn destroy(&mut self) {
        let slot = 0;
        let mut wait_idles = 0;
        self.with_textures(slot, &mut wait_idles, |textures, device| textures.destroy_all(device));
        let retired = &mut self.retired;
        self.targets
            .destroy_all(|framebuffer| retired.list(slot).push(Retired::Framebuffer(framebuffer)));
        let pending = self.retired.take_all();
        self.destroy_retired(pending);

        self.pipelines.destroy();
        self.stream.destroy(&mut self.memory);
        self.staging.destroy(&mut self.memory);
        self.samplers.destroy();
        if self.offscreen_pass != vk::RenderPass::null() {
            self.ctx.device.destroy_render_pass(self.offscreen_pass, None);
            self.offscreen_pass = vk::RenderPass::null();
        }
        self.swapchain.destroy(&self.ctx);
        self.commands.destroy();
    }
}

/// The frame being recorded.
#[derive(Debug, Clone, Copy)]
struct FrameState {
    cmd: vk::CommandBuffer,
    image_index: u32,
}

/// What the open render pass has bound, so unchanged state is skipped.
#[derive(Debug, Default, Clone, Copy)]
struct BoundState {
    pipeline: Option<vk::Pipeline>,
    descriptor_set: Option<vk::DescriptorSet>,
    blend_constants: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Copy)]
struct ActivePass {
    framebuffer: u32,
    /// Texture rendered into; `None` for the swapchain.
    texture: Option<u32>,
    target: TargetKind,
    extent: vk::Extent2D,
    bound: BoundState,
}

/// GL-side pass state. Survives across frames like GL state does.
#[derive(Debug, Default)]
struct PassState {
    current_framebuffer: u32,
    viewport: Option<GlRect>,
    scissor: Option<GlRect>,
    scissor_enabled: bool,
    active: Option<ActivePass>,
}

#[derive(Debug, Default)]
struct FrameCounters {
    frames: u64,
    draws: u32,
    skipped: u32,
    wait_idles: u32,
}

/// Vertex and index bytes a draw actually reads, or `None` when either
/// count is zero or the caller supplied fewer bytes than the counts need.
fn draw_bytes<'a>(draw: &SpriteDraw<'a>) -> Option<(&'a [u8], &'a [u8])> {
    if draw.vertex_count == 0 || draw.index_count == 0 {
        return None;
    }
    let vertex_len = draw.vertex_count as usize * draw.layout.stride as usize;
    let index_len = draw.index_count as usize * draw.index_type.bytes() as usize;
    Some((draw.vertices.get(..vertex_len)?, draw.indices.get(..index_len)?))
}

fn vk_index_type(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// GL-ES compatibility runtime rendering through Vulkan into a window.
pub struct VulkanRuntime {
    config: CompatConfig,
    gpu: Option<GpuState>,
    window_extent: vk::Extent2D,
    swapchain_dirty: bool,
    slot: usize,
    slot_count: usize,
    frame: Option<FrameState>,
    clear_color: [f32; 4],
    pass: PassState,
    counters: FrameCounters,
}

impl VulkanRuntime {
    /// Create the device, swapchain and streaming memory for a window of
    /// `width` x `height` pixels.
    ///
    /// # Safety
    /// The window handles must be valid and outlive the runtime.
    pub unsafe fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
        config: &CompatConfig,
    ) -> Result<Self> {
        let ctx = VulkanContext::new(display, window, config.validation)?;
        let gpu = GpuState::new(ctx, width, height, config)?;
        info!(
            "{} runtime ready: {} frame slots, rings {}+{} bytes",
            config.backend_name,
            config.frame_slots(),
            config.vertex_ring_bytes,
            config.index_ring_bytes
        );

        Ok(Self {
            config: config.clone(),
            gpu: Some(gpu),
            window_extent: vk::Extent2D { width, height },
            swapchain_dirty: false,
            slot: 0,
            slot_count: config.frame_slots(),
            frame: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            pass: PassState::default(),
            counters: FrameCounters::default(),
        })
    }

    /// The window's framebuffer changed size; the swapchain is rebuilt at
    /// the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        let extent = vk::Extent2D { width, height };
        if extent != self.window_extent {
            self.window_extent = extent;
            self.swapchain_dirty = true;
        }
    }

    fn retire_slot(&self) -> usize {
        match &self.gpu {
            Some(gpu) => gpu.retired.slot_for(self.slot, self.frame.is_some()),
            None => 0,
        }
    }

    /// Rebuild the swapchain. Returns `false` while the window has no area.
    unsafe fn recreate_swapchain(&mut self) -> Result<bool> {
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(false);
        };
        gpu.ctx.wait_idle();
        self.counters.wait_idles += 1;

        let extent = self.window_extent;
        match gpu
            .swapchain
            .recreate(&gpu.ctx, &mut gpu.commands, extent.width, extent.height)?
        {
            Recreated::Deferred => return Ok(false),
            Recreated::RenderPass => gpu.pipelines.forget_target(TargetKind::Swapchain),
            Recreated::Images => {}
        }
        self.swapchain_dirty = false;
        Ok(true)
    }

    // ========================================================================
    // Render passes
    // ========================================================================

    unsafe fn end_pass(&mut self) {
        if let (Some(frame), Some(gpu)) = (self.frame, self.gpu.as_ref()) {
            if self.pass.active.take().is_some() {
                gpu.ctx.device.cmd_end_render_pass(frame.cmd);
            }
        }
    }

    /// Make sure a pass on the current framebuffer is open. `false` means
    /// there is nothing to render into and the caller should skip.
    unsafe fn ensure_target_bound(&mut self) -> bool {
        let Some(frame) = self.frame else {
            return false;
        };
        let current = self.pass.current_framebuffer;
        if self.pass.active.is_some_and(|active| active.framebuffer == current) {
            return true;
        }
        self.end_pass();

        let retire_slot = self.retire_slot();
        let Some(gpu) = self.gpu.as_mut() else {
            return false;
        };

        let (framebuffer, extent, target, texture) = if current == 0 {
            let Some(&framebuffer) = gpu.swapchain.framebuffers.get(frame.image_index as usize) else {
                return false;
            };
            (framebuffer, gpu.swapchain.extent, TargetKind::Swapchain, None)
        } else {
            let GpuState {
                ctx,
                textures,
                targets: render_targets,
                retired,
                offscreen_pass,
                ..
            } = &mut *gpu;
            let texture = render_targets.attachment(current).map(|attachment| attachment.texture);
            let resolved = render_targets.resolve(
                current,
                |id| {
                    textures.get(id).map(|entry| TargetImage {
                        view: entry.texture.image.view,
                        width: entry.width,
                        height: entry.height,
                    })
                },
                |view, extent| targets::create_framebuffer(&ctx.device, *offscreen_pass, view, extent),
                |old| retired.list(retire_slot).push(Retired::Framebuffer(old)),
            );
            match resolved {
                Ok(Some(bound)) => (bound.framebuffer, bound.extent, TargetKind::Offscreen, texture),
                Ok(None) => return false,
                Err(err) => {
                    error!("offscreen target for framebuffer {current} failed: {err}");
                    return false;
                }
            }
        };

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(gpu.render_pass(target))
            .framebuffer(framebuffer)
            .render_area(full_rect(extent));
        gpu.ctx
            .device
            .cmd_begin_render_pass(frame.cmd, &begin_info, vk::SubpassContents::INLINE);

        self.pass.active = Some(ActivePass {
            framebuffer: current,
            texture,
            target,
            extent,
            bound: BoundState::default(),
        });
        self.apply_viewport();
        self.apply_scissor();
        true
    }

    unsafe fn apply_viewport(&self) {
        if let (Some(frame), Some(active), Some(gpu)) = (self.frame, self.pass.active, self.gpu.as_ref()) {
            let vp = viewport::vk_viewport(self.pass.viewport, active.extent);
            gpu.ctx.device.cmd_set_viewport(frame.cmd, 0, &[vp]);
        }
    }

    unsafe fn apply_scissor(&self) {
        if let (Some(frame), Some(active), Some(gpu)) = (self.frame, self.pass.active, self.gpu.as_ref()) {
            let rect = viewport::vk_scissor(self.pass.scissor, self.pass.scissor_enabled, active.extent);
            gpu.ctx.device.cmd_set_scissor(frame.cmd, 0, &[rect]);
        }
    }

    /// Stop rendering into `texture` and retire framebuffers built on it.
    fn forget_render_texture(&mut self, texture: u32) {
        if self.pass.active.is_some_and(|active| active.texture == Some(texture)) {
            unsafe { self.end_pass() };
        }
        let retire_slot = self.retire_slot();
        if let Some(gpu) = self.gpu.as_mut() {
            let retired = &mut gpu.retired;
            gpu.targets
                .forget_texture(texture, |old| retired.list(retire_slot).push(Retired::Framebuffer(old)));
        }
    }

    // ========================================================================
    // Drawing
    // ========================================================================

    unsafe fn record_sprite(&mut self, draw: &SpriteDraw<'_>) -> bool {
        let Some((vertices, indices)) = draw_bytes(draw) else {
            return false;
        };
        if !self.ensure_target_bound() {
            return false;
        }
        let (Some(frame), Some(mut active), Some(gpu)) = (self.frame, self.pass.active, self.gpu.as_mut()) else {
            return false;
        };

        let Some(entry) = gpu.textures.get(draw.texture) else {
            trace!("draw skipped: texture {} not uploaded", draw.texture);
            return false;
        };
        let descriptor_set = entry.texture.descriptor_set;
        let texture_size = (entry.width, entry.height);

        let key = SpritePipelineKey {
            target: active.target,
            variant: draw.variant,
            layout: draw.layout,
            blend: BlendKey::from(&draw.blend),
        };
        let render_pass = gpu.render_pass(active.target);
        let pipeline = match gpu.pipelines.get_or_create(key, render_pass) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                warn!("no pipeline for {:?}/{:?}: {err}", key.target, key.variant);
                return false;
            }
        };

        let index_align = u64::from(draw.index_type.bytes());
        let Some(streamed) = gpu.stream.push(&mut gpu.memory, vertices, indices, index_align) else {
            return false;
        };

        let device = &gpu.ctx.device;
        let cmd = frame.cmd;
        if active.bound.pipeline != Some(pipeline) {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            active.bound.pipeline = Some(pipeline);
        }
        device.cmd_bind_vertex_buffers(cmd, 0, &[streamed.vertex_buffer], &[streamed.vertex_offset]);
        device.cmd_bind_index_buffer(
            cmd,
            streamed.index_buffer,
            streamed.index_offset,
            vk_index_type(draw.index_type),
        );
        if active.bound.descriptor_set != Some(descriptor_set) {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                gpu.pipelines.pipeline_layout,
                0,
                &[descriptor_set],
                &[],
            );
            active.bound.descriptor_set = Some(descriptor_set);
        }
        if active.bound.blend_constants != Some(draw.blend.constant) {
            device.cmd_set_blend_constants(cmd, &draw.blend.constant);
            active.bound.blend_constants = Some(draw.blend.constant);
        }

        let constants = PushConstants::new(draw.projection, draw.effect.as_ref(), texture_size);
        device.cmd_push_constants(
            cmd,
            gpu.pipelines.pipeline_layout,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            0,
            bytemuck::bytes_of(&constants),
        );
        device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);

        self.pass.active = Some(active);
        true
    }

    fn log_counters(&mut self) {
        let frames = self.counters.frames;
        if self.config.trace && frames % TRACE_EVERY_FRAMES == 0 {
            info!(
                "runtime frame {frames} draws={} skipped={}",
                self.counters.draws, self.counters.skipped
            );
        }
        if self.config.perf && frames % PERF_EVERY_FRAMES == 0 {
            let wait_idles = std::mem::take(&mut self.counters.wait_idles);
            if let Some(gpu) = self.gpu.as_mut() {
                let one_shots = gpu.commands.take_one_shot_count();
                let buckets = gpu.stream.pool().bucket_count();
                let (stream, pool) = gpu.stream.take_stats();
                info!(
                    "perf frame {frames}: waitIdle={wait_idles} oneShots={one_shots} \
                     spills={}({}B) drops={}({}B) pool(hit={} miss={} recycle={} drop={} buckets={buckets}) \
                     pipelines={} samplers={} targets={}",
                    stream.spills,
                    stream.spill_bytes,
                    stream.drops,
                    stream.drop_bytes,
                    pool.hits,
                    pool.misses,
                    pool.recycles,
                    pool.drops,
                    gpu.pipelines.pipeline_count(),
                    gpu.samplers.len(),
                    gpu.targets.cached_count(),
                );
            }
        }
    }
}

impl CompatRuntime for VulkanRuntime {
    fn begin_frame(&mut self) -> Result<()> {
        if self.frame.is_some() || self.gpu.is_none() {
            return Ok(());
        }
        unsafe {
            if self.swapchain_dirty && !self.recreate_swapchain()? {
                return Ok(());
            }

            let slot = self.slot;
            let Some(gpu) = self.gpu.as_mut() else {
                return Ok(());
            };
            gpu.swapchain.wait_slot(&gpu.ctx, slot)?;
            let released = gpu.retired.take(slot);
            gpu.destroy_retired(released);
            gpu.stream.begin_slot(&mut gpu.memory, slot);

            let Some(image_index) = gpu.swapchain.acquire(&gpu.ctx, slot)? else {
                self.swapchain_dirty = true;
                self.recreate_swapchain()?;
                return Ok(());
            };

            gpu.swapchain.reset_slot(&gpu.ctx, slot)?;
            let cmd = gpu.commands.begin_slot(slot)?;
            self.frame = Some(FrameState { cmd, image_index });
        }
        self.pass.active = None;
        self.counters.draws = 0;
        self.counters.skipped = 0;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        let Some(frame) = self.frame else {
            return Ok(());
        };
        unsafe {
            self.end_pass();
            self.frame = None;

            let slot = self.slot;
            let Some(gpu) = self.gpu.as_mut() else {
                return Ok(());
            };
            let sync = &gpu.swapchain.frame_sync[slot];
            gpu.commands
                .submit_slot(slot, sync.image_available, sync.render_finished, sync.in_flight)?;
            if gpu.swapchain.present(&gpu.ctx, slot, frame.image_index)? {
                self.swapchain_dirty = true;
            }
        }

        self.slot = (self.slot + 1) % self.slot_count;
        self.counters.frames += 1;
        self.log_counters();
        Ok(())
    }

    fn dispose(&mut self) {
        let Some(mut gpu) = self.gpu.take() else {
            return;
        };
        gpu.ctx.wait_idle();
        unsafe { gpu.destroy() };
        self.frame = None;
        self.pass.active = None;
        info!("runtime disposed after {} frames", self.counters.frames);
    }

    fn set_clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear_color = [r, g, b, a];
    }

    fn clear(&mut self, mask: u32) {
        if self.frame.is_none() || mask & COLOR_BUFFER_BIT == 0 {
            return;
        }
        unsafe {
            if !self.ensure_target_bound() {
                return;
            }
            let (Some(frame), Some(active), Some(gpu)) = (self.frame, self.pass.active, self.gpu.as_ref()) else {
                return;
            };
            let attachment = vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: self.clear_color,
                    },
                },
            };
            let rect = vk::ClearRect {
                rect: full_rect(active.extent),
                base_array_layer: 0,
                layer_count: 1,
            };
            gpu.ctx.device.cmd_clear_attachments(frame.cmd, &[attachment], &[rect]);
        }
    }

    fn set_current_framebuffer(&mut self, framebuffer: u32) {
        self.pass.current_framebuffer = framebuffer;
    }

    fn set_framebuffer_color_attachment(&mut self, framebuffer: u32, texture: u32, width: u32, height: u32) {
        if self.pass.active.is_some_and(|active| active.framebuffer == framebuffer) {
            unsafe { self.end_pass() };
        }
        let retire_slot = self.retire_slot();
        if let Some(gpu) = self.gpu.as_mut() {
            let retired = &mut gpu.retired;
            let changed = gpu.targets.set_attachment(
                framebuffer,
                ColorAttachment { texture, width, height },
                |old| retired.list(retire_slot).push(Retired::Framebuffer(old)),
            );
            if changed {
                debug!("framebuffer {framebuffer} -> texture {texture} {width}x{height}");
            }
        }
    }

    fn remove_framebuffer(&mut self, framebuffer: u32) {
        if self.pass.active.is_some_and(|active| active.framebuffer == framebuffer) {
            unsafe { self.end_pass() };
        }
        let retire_slot = self.retire_slot();
        if let Some(gpu) = self.gpu.as_mut() {
            let retired = &mut gpu.retired;
            gpu.targets
                .remove(framebuffer, |old| retired.list(retire_slot).push(Retired::Framebuffer(old)));
        }
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.pass.viewport = Some(GlRect::new(x, y, width, height));
        unsafe { self.apply_viewport() };
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.pass.scissor = Some(GlRect::new(x, y, width, height));
        unsafe { self.apply_scissor() };
    }

    fn set_scissor_enabled(&mut self, enabled: bool) {
        self.pass.scissor_enabled = enabled;
        unsafe { self.apply_scissor() };
    }

    fn upload_texture(&mut self, upload: &TextureUpload<'_>) -> Result<()> {
        let retire_slot = self.retire_slot();
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };
        let mut wait_idles = 0;
        let outcome = gpu.with_textures(retire_slot, &mut wait_idles, |textures, device| {
            textures.upload(device, upload)
        });
        self.counters.wait_idles += wait_idles;

        if outcome? == UploadOutcome::Recreated {
            self.forget_render_texture(upload.id);
        }
        Ok(())
    }

    fn upload_texture_sub_image(&mut self, upload: &TextureSubUpload<'_>) -> Result<()> {
        let retire_slot = self.retire_slot();
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };
        let mut wait_idles = 0;
        let outcome = gpu.with_textures(retire_slot, &mut wait_idles, |textures, device| {
            textures.upload_sub(device, upload)
        });
        self.counters.wait_idles += wait_idles;

        if outcome? == UploadOutcome::Ignored {
            trace!("sub-image upload to texture {} ignored", upload.id);
        }
        Ok(())
    }

    fn set_texture_sampler(&mut self, texture: u32, sampler: SamplerParams) {
        let retire_slot = self.retire_slot();
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        let mut wait_idles = 0;
        let result = gpu.with_textures(retire_slot, &mut wait_idles, |textures, device| {
            textures.set_sampler(device, texture, sampler)
        });
        self.counters.wait_idles += wait_idles;
        if let Err(err) = result {
            warn!("sampler update for texture {texture} failed: {err}");
        }
    }

    fn destroy_texture(&mut self, texture: u32) {
        let retire_slot = self.retire_slot();
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        let mut wait_idles = 0;
        let existed = gpu.with_textures(retire_slot, &mut wait_idles, |textures, device| {
            textures.destroy(device, texture)
        });
        self.counters.wait_idles += wait_idles;
        if existed {
            self.forget_render_texture(texture);
        }
    }

    fn draw_sprite(&mut self, draw: &SpriteDraw<'_>) {
        if self.frame.is_none() {
            return;
        }
        if unsafe { self.record_sprite(draw) } {
            self.counters.draws += 1;
        } else {
            self.counters.skipped += 1;
        }
    }
}

impl Drop for VulkanRuntime {
    fn drop(&mut self) {
        self.dispose();
    }
}
