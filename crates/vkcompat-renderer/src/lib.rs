#![allow(clippy::too_many_arguments)]
// GL-ES 2.0/3.0 compatibility layer over Vulkan

// GL surface
pub mod gl;
pub mod effect;
pub mod stencil;
pub mod submit;

// Boundary and backend
pub mod adapter;
pub mod runtime;

pub mod config;
pub mod error;
pub mod logging;

pub use adapter::CompatRuntime;
pub use config::CompatConfig;
pub use error::{RenderError, Result};
pub use gl::GlContext;
pub use runtime::VulkanRuntime;
