//! Vulkan swapchain, its render pass and per-slot frame synchronization.

use ash::vk;
use log::{info, warn};

use super::commands::{self, CommandManager};
use super::surface::SurfaceSupport;
use super::targets;
use super::VulkanContext;
use crate::error::{RenderError, Result, VkResultExt};

/// Per-slot synchronization primitives.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Result of [`Swapchain::recreate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recreated {
    /// New images; the render pass is unchanged.
    Images,
    /// The surface format changed, so the render pass was rebuilt too.
    RenderPass,
    /// The surface has no area right now; try again later.
    Deferred,
}

/// Vulkan swapchain with its framebuffers and frame slots.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub frame_sync: Vec<FrameSync>,
}

impl Swapchain {
    /// # Safety
    /// `ctx` must outlive the swapchain.
    pub unsafe fn new(
        ctx: &VulkanContext,
        commands: &mut CommandManager,
        width: u32,
        height: u32,
        slot_count: usize,
    ) -> Result<Self> {
        let support = SurfaceSupport::query(ctx)?;
        let format = support.format();
        let extent = support.extent(width, height);
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::Surface(format!(
                "surface has no area ({}x{})",
                extent.width, extent.height
            )));
        }

        let render_pass = targets::create_swapchain_pass(&ctx.device, format.format)?;
        let mut swapchain = Self {
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format,
            extent,
            render_pass,
            frame_sync: Vec::new(),
        };

        let built = Self::create_sync_objects(ctx, slot_count).and_then(|sync| {
            swapchain.frame_sync = sync;
            swapchain.build(ctx, commands, &support, extent)
        });
        if let Err(err) = built {
            swapchain.destroy(ctx);
            return Err(err);
        }

        info!(
            "swapchain {}x{} {:?}, {} images",
            extent.width,
            extent.height,
            format.format,
            swapchain.images.len()
        );
        Ok(swapchain)
    }

    /// Create the swapchain handle, views and framebuffers for `extent`,
    /// retiring the current handle if there is one.
    unsafe fn build(
        &mut self,
        ctx: &VulkanContext,
        commands: &mut CommandManager,
        support: &SurfaceSupport,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let old_swapchain = self.handle;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(support.image_count())
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(support.present_mode())
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = ctx
            .swapchain_loader
            .create_swapchain(&create_info, None)
            .context("vkCreateSwapchainKHR")?;
        if old_swapchain != vk::SwapchainKHR::null() {
            ctx.swapchain_loader.destroy_swapchain(old_swapchain, None);
        }
        self.handle = handle;
        self.extent = extent;

        self.images = ctx
            .swapchain_loader
            .get_swapchain_images(handle)
            .context("vkGetSwapchainImagesKHR")?;

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .subresource_range(commands::COLOR_RANGE);
            let view = ctx
                .device
                .create_image_view(&view_info, None)
                .context("vkCreateImageView")?;
            self.image_views.push(view);
            self.framebuffers
                .push(targets::create_framebuffer(&ctx.device, self.render_pass, view, extent)?);
        }

        // The pass loads its attachment, so images must already be in
        // PRESENT_SRC the first time they are acquired.
        let images = self.images.clone();
        commands.run_single_time(|device, cmd| {
            for &image in &images {
                commands::transition_image_layout(
                    device,
                    cmd,
                    image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                );
            }
        })
    }

    unsafe fn create_sync_objects(ctx: &VulkanContext, slot_count: usize) -> Result<Vec<FrameSync>> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut frame_sync = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let image_available = ctx
                .device
                .create_semaphore(&semaphore_info, None)
                .context("vkCreateSemaphore")?;
            let render_finished = ctx
                .device
                .create_semaphore(&semaphore_info, None)
                .context("vkCreateSemaphore")?;
            let in_flight = ctx.device.create_fence(&fence_info, None).context("vkCreateFence")?;
            frame_sync.push(FrameSync {
                image_available,
                render_finished,
                in_flight,
            });
        }
        Ok(frame_sync)
    }

    /// Block until the slot's previous submission has finished.
    ///
    /// # Safety
    /// `slot` must be a valid frame slot.
    pub unsafe fn wait_slot(&self, ctx: &VulkanContext, slot: usize) -> Result<()> {
        ctx.device
            .wait_for_fences(&[self.frame_sync[slot].in_flight], true, u64::MAX)
            .context("vkWaitForFences")
    }

    /// # Safety
    /// The slot's fence must be signalled.
    pub unsafe fn reset_slot(&self, ctx: &VulkanContext, slot: usize) -> Result<()> {
        ctx.device
            .reset_fences(&[self.frame_sync[slot].in_flight])
            .context("vkResetFences")
    }

    /// Acquire the next image. `None` means the swapchain is out of date.
    ///
    /// # Safety
    /// The slot's image-available semaphore must be unsignalled.
    pub unsafe fn acquire(&self, ctx: &VulkanContext, slot: usize) -> Result<Option<u32>> {
        let result = ctx.swapchain_loader.acquire_next_image(
            self.handle,
            u64::MAX,
            self.frame_sync[slot].image_available,
            vk::Fence::null(),
        );

        match result {
            // Suboptimal still signals the semaphore; present reports it.
            Ok((index, _suboptimal)) => Ok(Some(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(result) => Err(RenderError::Vulkan {
                call: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    /// Present `image_index` once the slot's rendering finishes. Returns
    /// whether the swapchain needs recreating.
    ///
    /// # Safety
    /// The slot's render-finished semaphore must have a pending signal.
    pub unsafe fn present(&self, ctx: &VulkanContext, slot: usize, image_index: u32) -> Result<bool> {
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let wait_semaphores = [self.frame_sync[slot].render_finished];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match ctx.swapchain_loader.queue_present(ctx.present_queue, &present_info) {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(result) => Err(RenderError::Vulkan {
                call: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    /// Rebuild for a new surface size. The device must be idle.
    ///
    /// # Safety
    /// No framebuffer or image of this swapchain may still be in use.
    pub unsafe fn recreate(
        &mut self,
        ctx: &VulkanContext,
        commands: &mut CommandManager,
        width: u32,
        height: u32,
    ) -> Result<Recreated> {
        let support = SurfaceSupport::query(ctx)?;
        let extent = support.extent(width, height);
        if extent.width == 0 || extent.height == 0 {
            return Ok(Recreated::Deferred);
        }

        self.destroy_framebuffers(ctx);

        let format = support.format();
        let outcome = if format.format != self.format.format || format.color_space != self.format.color_space {
            warn!("surface format changed {:?} -> {:?}", self.format.format, format.format);
            ctx.device.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
            self.format = format;
            self.render_pass = targets::create_swapchain_pass(&ctx.device, format.format)?;
            Recreated::RenderPass
        } else {
            Recreated::Images
        };

        self.build(ctx, commands, &support, extent)?;
        info!("swapchain recreated {}x{}", extent.width, extent.height);
        Ok(outcome)
    }

    unsafe fn destroy_framebuffers(&mut self, ctx: &VulkanContext) {
        for framebuffer in self.framebuffers.drain(..) {
            ctx.device.destroy_framebuffer(framebuffer, None);
        }
        for view in self.image_views.drain(..) {
            ctx.device.destroy_image_view(view, None);
        }
        self.images.clear();
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, ctx: &VulkanContext) {
        for sync in self.frame_sync.drain(..) {
            ctx.device.destroy_semaphore(sync.image_available, None);
            ctx.device.destroy_semaphore(sync.render_finished, None);
            ctx.device.destroy_fence(sync.in_flight, None);
        }

        self.destroy_framebuffers(ctx);

        if self.handle != vk::SwapchainKHR::null() {
            ctx.swapchain_loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
        if self.render_pass != vk::RenderPass::null() {
            ctx.device.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
        }
    }
}
