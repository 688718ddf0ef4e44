//! Surface capability queries and swapchain parameter selection.

use ash::vk;

use super::VulkanContext;
use crate::error::{Result, VkResultExt};

/// What the surface supports right now; refreshed on every swapchain build.
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// # Safety
    /// The context's surface must still be alive.
    pub unsafe fn query(ctx: &VulkanContext) -> Result<Self> {
        let capabilities = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
            .context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;

        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
            .context("vkGetPhysicalDeviceSurfaceFormatsKHR")?;

        let present_modes = ctx
            .surface_loader
            .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
            .context("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        choose_surface_format(&self.formats)
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        choose_present_mode(&self.present_modes)
    }

    pub fn extent(&self, width: u32, height: u32) -> vk::Extent2D {
        choose_extent(&self.capabilities, width, height)
    }

    pub fn image_count(&self) -> u32 {
        choose_image_count(&self.capabilities)
    }
}

/// B8G8R8A8_UNORM when offered, otherwise whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
        .or_else(|| formats.first())
        .copied()
        .unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
}

/// FIFO is guaranteed to be available and gives vsync.
pub fn choose_present_mode(_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

/// The surface's own extent when it defines one, else the window size clamped.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width.max(capabilities.min_image_extent.width),
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height.max(capabilities.min_image_extent.height),
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}
