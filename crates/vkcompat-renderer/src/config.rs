//! Immutable configuration shared by the GL state tracker and the runtime.

use std::path::PathBuf;

/// Streaming ring size per frame slot for vertex bytes.
pub const DEFAULT_VERTEX_RING_BYTES: u64 = 32 * 1024 * 1024;
/// Streaming ring size per frame slot for index bytes.
pub const DEFAULT_INDEX_RING_BYTES: u64 = 16 * 1024 * 1024;
/// Idle host buffers kept per (usage, capacity) bucket.
pub const DEFAULT_MAX_POOLED_PER_BUCKET: usize = 8;
/// Frame slots in flight.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Configuration built once by the embedder and handed to both halves of
/// the compatibility layer.
#[derive(Debug, Clone)]
pub struct CompatConfig {
    /// Per-frame draw/stencil/effect summaries every 60 frames.
    pub trace: bool,
    /// Streaming and pool counters every 120 frames.
    pub perf: bool,
    /// Enable `VK_LAYER_KHRONOS_validation` and route its messages to `log`.
    pub validation: bool,
    /// Reported through `GL_RENDERER`.
    pub backend_name: String,
    pub vertex_ring_bytes: u64,
    pub index_ring_bytes: u64,
    pub max_pooled_buffers_per_bucket: usize,
    pub frames_in_flight: usize,
    /// When set together with `trace`, first uploads of each texture are
    /// written here as PNG files.
    pub texture_dump_dir: Option<PathBuf>,
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            trace: false,
            perf: false,
            validation: false,
            backend_name: "Vulkan".to_string(),
            vertex_ring_bytes: DEFAULT_VERTEX_RING_BYTES,
            index_ring_bytes: DEFAULT_INDEX_RING_BYTES,
            max_pooled_buffers_per_bucket: DEFAULT_MAX_POOLED_PER_BUCKET,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            texture_dump_dir: None,
        }
    }
}

impl CompatConfig {
    /// Defaults overridden by `VKCOMPAT_*` environment variables.
    ///
    /// `VKCOMPAT_TRACE`, `VKCOMPAT_PERF` and `VKCOMPAT_VALIDATION` are
    /// switched on by presence. `VKCOMPAT_TEXTURE_DUMP_DIR` names a directory.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        config.trace = lookup("VKCOMPAT_TRACE").is_some();
        config.perf = lookup("VKCOMPAT_PERF").is_some();
        config.validation = lookup("VKCOMPAT_VALIDATION").is_some();
        config.texture_dump_dir = lookup("VKCOMPAT_TEXTURE_DUMP_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        config
    }

    /// Frame slots actually used; at least one.
    pub fn frame_slots(&self) -> usize {
        self.frames_in_flight.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CompatConfig::default();
        assert!(!config.trace);
        assert!(!config.perf);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.max_pooled_buffers_per_bucket, 8);
        assert_eq!(config.vertex_ring_bytes, 32 * 1024 * 1024);
        assert_eq!(config.index_ring_bytes, 16 * 1024 * 1024);
        assert!(config.texture_dump_dir.is_none());
    }

    #[test]
    fn test_presence_switches() {
        let vars: HashMap<&str, &str> = [("VKCOMPAT_TRACE", ""), ("VKCOMPAT_VALIDATION", "1")]
            .into_iter()
            .collect();
        let config = CompatConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert!(config.trace);
        assert!(!config.perf);
        assert!(config.validation);
    }

    #[test]
    fn test_blank_dump_dir_is_ignored() {
        let config = CompatConfig::from_lookup(|k| {
            (k == "VKCOMPAT_TEXTURE_DUMP_DIR").then(|| "  ".to_string())
        });
        assert!(config.texture_dump_dir.is_none());

        let config = CompatConfig::from_lookup(|k| {
            (k == "VKCOMPAT_TEXTURE_DUMP_DIR").then(|| "/tmp/dump".to_string())
        });
        assert_eq!(config.texture_dump_dir, Some(PathBuf::from("/tmp/dump")));
    }

    #[test]
    fn test_frame_slots_never_zero() {
        let config = CompatConfig {
            frames_in_flight: 0,
            ..CompatConfig::default()
        };
        assert_eq!(config.frame_slots(), 1);
    }
}
