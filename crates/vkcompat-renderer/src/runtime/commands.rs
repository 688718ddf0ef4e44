//! Command buffer management: one primary buffer per frame slot plus
//! one-shot transfer commands.

use ash::vk;

use super::VulkanContext;
use crate::error::{Result, VkResultExt};

/// Command pools and per-slot primary buffers.
pub struct CommandManager {
    pool: vk::CommandPool,
    slots: Vec<vk::CommandBuffer>,
    transient_pool: vk::CommandPool,
    device: ash::Device,
    queue: vk::Queue,
    /// One-shot submissions since the last [`CommandManager::take_one_shot_count`].
    one_shots: u32,
}

impl CommandManager {
    /// # Safety
    /// `ctx` must outlive the manager.
    pub unsafe fn new(ctx: &VulkanContext, slot_count: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = ctx
            .device
            .create_command_pool(&pool_info, None)
            .context("vkCreateCommandPool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(slot_count as u32);
        let slots = ctx
            .device
            .allocate_command_buffers(&alloc_info)
            .context("vkAllocateCommandBuffers")?;

        let transient_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let transient_pool = ctx
            .device
            .create_command_pool(&transient_info, None)
            .context("vkCreateCommandPool")?;

        Ok(Self {
            pool,
            slots,
            transient_pool,
            device: ctx.device.clone(),
            queue: ctx.graphics_queue,
            one_shots: 0,
        })
    }

    /// Reset and begin recording the slot's primary buffer.
    ///
    /// # Safety
    /// The slot's previous submission must have completed.
    pub unsafe fn begin_slot(&self, slot: usize) -> Result<vk::CommandBuffer> {
        let cmd = self.slots[slot];
        self.device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .context("vkResetCommandBuffer")?;

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device
            .begin_command_buffer(cmd, &begin_info)
            .context("vkBeginCommandBuffer")?;
        Ok(cmd)
    }

    /// End recording and submit the slot, signalling `fence` on completion.
    ///
    /// # Safety
    /// The slot must be recording and the semaphores/fence unsignalled.
    pub unsafe fn submit_slot(
        &self,
        slot: usize,
        wait_semaphore: vk::Semaphore,
        signal_semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let cmd = self.slots[slot];
        self.device.end_command_buffer(cmd).context("vkEndCommandBuffer")?;

        let wait_semaphores = [wait_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [signal_semaphore];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        self.device
            .queue_submit(self.queue, &[submit_info], fence)
            .context("vkQueueSubmit")
    }

    /// Record `record` into a throwaway buffer, submit it and wait for the
    /// queue to drain.
    ///
    /// # Safety
    /// Everything `record` touches must stay alive until this returns.
    pub unsafe fn run_single_time<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.transient_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = self
            .device
            .allocate_command_buffers(&alloc_info)
            .context("vkAllocateCommandBuffers")?;
        let cmd = buffers[0];

        let result = self.record_and_wait(cmd, record);
        self.device.free_command_buffers(self.transient_pool, &buffers);
        self.one_shots += 1;
        result
    }

    unsafe fn record_and_wait<F>(&self, cmd: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device
            .begin_command_buffer(cmd, &begin_info)
            .context("vkBeginCommandBuffer")?;

        record(&self.device, cmd);

        self.device.end_command_buffer(cmd).context("vkEndCommandBuffer")?;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        self.device
            .queue_submit(self.queue, &[submit_info], vk::Fence::null())
            .context("vkQueueSubmit")?;
        self.device.queue_wait_idle(self.queue).context("vkQueueWaitIdle")
    }

    pub fn take_one_shot_count(&mut self) -> u32 {
        std::mem::take(&mut self.one_shots)
    }

    /// # Safety
    /// No command buffer from these pools may still be executing.
    pub unsafe fn destroy(&mut self) {
        self.device.destroy_command_pool(self.pool, None);
        self.device.destroy_command_pool(self.transient_pool, None);
        self.pool = vk::CommandPool::null();
        self.transient_pool = vk::CommandPool::null();
        self.slots.clear();
    }
}

/// Access masks and stages for a layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub fn transition_masks(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> TransitionMasks {
    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    };
    TransitionMasks {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    }
}

/// Record a colour image layout transition.
///
/// # Safety
/// `cmd` must be recording and outside a render pass.
pub unsafe fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let masks = transition_masks(old_layout, new_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    device.cmd_pipeline_barrier(
        cmd,
        masks.src_stage,
        masks.dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

/// Copy tightly packed RGBA8 rows from `buffer` into an image region.
///
/// # Safety
/// `image` must be in TRANSFER_DST_OPTIMAL.
pub unsafe fn copy_buffer_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    buffer_offset: u64,
    image: vk::Image,
    offset: vk::Offset2D,
    extent: vk::Extent2D,
) {
    let region = vk::BufferImageCopy::default()
        .buffer_offset(buffer_offset)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D {
            x: offset.x,
            y: offset.y,
            z: 0,
        })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });

    device.cmd_copy_buffer_to_image(cmd, buffer, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);
}

/// Single mip, single layer colour subresource.
pub const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};
