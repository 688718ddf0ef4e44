//! Logger setup for embedders.
//!
//! The crate itself only speaks the `log` facade; `init_logging` installs
//! `env_logger` as the backend when the embedder does not bring its own.

mod init;

pub use init::{init_logging, LoggingConfig};
