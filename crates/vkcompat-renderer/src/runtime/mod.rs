//! Vulkan backend of the compatibility layer.

pub mod commands;
pub mod context;
pub mod frame;
pub mod memory;
pub mod pipeline;
pub mod retire;
pub mod samplers;
pub mod stream;
pub mod surface;
pub mod swapchain;
pub mod targets;
pub mod textures;
pub mod viewport;

pub use context::VulkanContext;
pub use frame::VulkanRuntime;

use ash::vk;
use std::ffi::CStr;

/// Lowest instance and device version the runtime runs on.
pub const REQUIRED_VK_VERSION: u32 = vk::make_api_version(0, 1, 1, 0);

/// Application name for the Vulkan instance.
pub const APP_NAME: &CStr = c"vkcompat";

/// Engine name for the Vulkan instance.
pub const ENGINE_NAME: &CStr = c"vkcompat-renderer";

pub const ENGINE_VERSION: u32 = vk::make_api_version(0, 1, 0, 0);
