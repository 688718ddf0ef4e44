//! GPU memory management using gpu-allocator.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocatorDebugSettings, MemoryLocation};
use parking_lot::Mutex;
use std::sync::Arc;

use super::stream::{HostBuffer, HostBufferAllocator, HostBufferUsage};
use super::VulkanContext;
use crate::error::{RenderError, Result, VkResultExt};

/// Colour image with its view and memory.
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Option<Allocation>,
    pub extent: vk::Extent2D,
}

/// Memory manager wrapping gpu-allocator.
pub struct MemoryManager {
    allocator: Arc<Mutex<Allocator>>,
    device: ash::Device,
}

impl MemoryManager {
    /// # Safety
    /// `ctx` must outlive the manager.
    pub unsafe fn new(ctx: &VulkanContext) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: ctx.device.clone(),
            physical_device: ctx.physical_device,
            debug_settings: debug_settings(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            device: ctx.device.clone(),
        })
    }

    /// Create a host-visible buffer that stays mapped for its whole life.
    ///
    /// # Safety
    /// The device must be alive.
    pub unsafe fn create_host_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<(vk::Buffer, Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = self.device.create_buffer(&buffer_info, None).context("vkCreateBuffer")?;
        let requirements = self.device.get_buffer_memory_requirements(handle);

        let allocation = match self.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                self.device.destroy_buffer(handle, None);
                return Err(err.into());
            }
        };

        if let Err(err) = self
            .device
            .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
            .context("vkBindBufferMemory")
        {
            self.free(allocation);
            self.device.destroy_buffer(handle, None);
            return Err(err);
        }

        Ok((handle, allocation))
    }

    /// Create a sampled RGBA8 image that can also be a transfer target and a
    /// colour attachment.
    ///
    /// # Safety
    /// The device must be alive.
    pub unsafe fn create_color_image(&self, extent: vk::Extent2D, name: &str) -> Result<Image> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = self.device.create_image(&image_info, None).context("vkCreateImage")?;
        let requirements = self.device.get_image_memory_requirements(handle);

        let allocation = match self.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                self.device.destroy_image(handle, None);
                return Err(err.into());
            }
        };

        if let Err(err) = self
            .device
            .bind_image_memory(handle, allocation.memory(), allocation.offset())
            .context("vkBindImageMemory")
        {
            self.free(allocation);
            self.device.destroy_image(handle, None);
            return Err(err);
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(super::commands::COLOR_RANGE);

        let view = match self.device.create_image_view(&view_info, None).context("vkCreateImageView") {
            Ok(view) => view,
            Err(err) => {
                self.free(allocation);
                self.device.destroy_image(handle, None);
                return Err(err);
            }
        };

        Ok(Image {
            handle,
            view,
            allocation: Some(allocation),
            extent,
        })
    }

    /// # Safety
    /// The image must no longer be in use by the GPU.
    pub unsafe fn destroy_image(&self, image: &mut Image) {
        self.device.destroy_image_view(image.view, None);
        self.device.destroy_image(image.handle, None);
        if let Some(allocation) = image.allocation.take() {
            self.free(allocation);
        }
        image.view = vk::ImageView::null();
        image.handle = vk::Image::null();
    }

    /// # Safety
    /// The buffer must no longer be in use by the GPU.
    pub unsafe fn destroy_buffer(&self, handle: vk::Buffer, allocation: Allocation) {
        self.device.destroy_buffer(handle, None);
        self.free(allocation);
    }

    fn free(&self, allocation: Allocation) {
        if let Err(err) = self.allocator.lock().free(allocation) {
            log::warn!("failed to free GPU allocation: {err}");
        }
    }
}

fn debug_settings() -> AllocatorDebugSettings {
    let mut settings = AllocatorDebugSettings::default();
    settings.log_memory_information = cfg!(debug_assertions);
    settings.log_leaks_on_shutdown = true;
    settings
}

/// Format of every texture and offscreen target.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

fn buffer_usage(usage: HostBufferUsage) -> vk::BufferUsageFlags {
    match usage {
        HostBufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        HostBufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        HostBufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
    }
}

fn buffer_name(usage: HostBufferUsage) -> &'static str {
    match usage {
        HostBufferUsage::Vertex => "sprite vertices",
        HostBufferUsage::Index => "sprite indices",
        HostBufferUsage::Staging => "texture staging",
    }
}

// Buffers handed out here are only released by the stream and staging
// owners after the frame fences that cover them have signalled.
impl HostBufferAllocator for MemoryManager {
    type Memory = Allocation;

    fn allocate(&mut self, capacity: u64, usage: HostBufferUsage) -> Result<HostBuffer<Allocation>> {
        let (handle, memory) = unsafe { self.create_host_buffer(capacity, buffer_usage(usage), buffer_name(usage))? };
        Ok(HostBuffer {
            handle,
            capacity,
            usage,
            memory,
        })
    }

    fn write(&mut self, buffer: &mut HostBuffer<Allocation>, offset: u64, bytes: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + bytes.len();
        let mapped = buffer
            .memory
            .mapped_slice_mut()
            .ok_or_else(|| RenderError::Allocation(format!("{} is not host mapped", buffer_name(buffer.usage))))?;
        let target = mapped.get_mut(start..end).ok_or_else(|| {
            RenderError::Allocation(format!(
                "write of {} bytes at {offset} overruns {} byte buffer",
                bytes.len(),
                buffer.capacity
            ))
        })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    fn release(&mut self, buffer: HostBuffer<Allocation>) {
        unsafe { self.destroy_buffer(buffer.handle, buffer.memory) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags() {
        assert_eq!(buffer_usage(HostBufferUsage::Vertex), vk::BufferUsageFlags::VERTEX_BUFFER);
        assert_eq!(buffer_usage(HostBufferUsage::Index), vk::BufferUsageFlags::INDEX_BUFFER);
        assert_eq!(buffer_usage(HostBufferUsage::Staging), vk::BufferUsageFlags::TRANSFER_SRC);
    }

    #[test]
    fn test_allocator_debug_settings() {
        let settings = debug_settings();
        assert!(settings.log_leaks_on_shutdown);
        assert_eq!(settings.log_memory_information, cfg!(debug_assertions));
    }
}
