//! Error type for setup-time and frame-level failures.

use std::fmt;

use ash::vk;
use thiserror::Error;

/// A packed Vulkan API version, displayed as `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VkVersion(pub u32);

impl fmt::Display for VkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            vk::api_version_major(self.0),
            vk::api_version_minor(self.0),
            vk::api_version_patch(self.0)
        )
    }
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("{call} failed: {result:?}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("GPU memory allocation failed: {0}")]
    Allocation(String),

    #[error("Vulkan {required} required, but the loader only offers {found}")]
    UnsupportedVersion { required: VkVersion, found: VkVersion },

    #[error("no Vulkan device with graphics and present support")]
    NoSuitableDevice,

    #[error("SPIR-V for {0} was not built (glslc missing at build time?)")]
    MissingShader(&'static str),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("texture {0} does not exist")]
    UnknownTexture(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl From<gpu_allocator::AllocationError> for RenderError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        RenderError::Allocation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Attaches the failing entry point to a raw `vk::Result`.
pub trait VkResultExt<T> {
    fn context(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn context(self, call: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::Vulkan { call, result })
    }
}
