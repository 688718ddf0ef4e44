//! Emulated OpenGL ES 2.0/3.0 state machine.

pub mod consts;
pub mod context;
pub mod draw;
pub mod program;
pub mod state;
pub mod texture_convert;

pub use context::GlContext;
