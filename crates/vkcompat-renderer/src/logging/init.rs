use std::sync::Once;

/// Filter used when neither the config nor `RUST_LOG` names one.
const DEFAULT_FILTER: &str = "info";

/// How the embedder wants the renderer's log output.
///
/// `env_filter` takes `env_logger` directives and wins over `RUST_LOG`, e.g.
/// `"vkcompat_renderer=debug,gpu_allocator=warn"` to see texture uploads and
/// target changes without allocator chatter. The frame summaries enabled by
/// `VKCOMPAT_TRACE` and `VKCOMPAT_PERF` are logged at `info`, so a filter
/// stricter than that silences them even when the variables are set.
/// Validation layer messages arrive on the `vkcompat_renderer::runtime::context`
/// target at the level matching their severity.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

fn resolve_filter(config: &LoggingConfig, rust_log: Option<String>) -> String {
    config
        .env_filter
        .clone()
        .or(rust_log)
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

static INIT: Once = Once::new();

/// Installs `env_logger` for the renderer once per process.
///
/// Does nothing if the embedder already installed a logger, or on any call
/// after the first.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = resolve_filter(config, std::env::var("RUST_LOG").ok());
        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&filter);
        builder.write_style(config.write_style);

        if builder.try_init().is_ok() {
            log::debug!("vkcompat logging initialized with filter {filter:?}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_precedence() {
        let explicit = LoggingConfig {
            env_filter: Some("vkcompat_renderer=debug".into()),
            ..LoggingConfig::default()
        };
        assert_eq!(resolve_filter(&explicit, Some("warn".into())), "vkcompat_renderer=debug");

        let config = LoggingConfig::default();
        assert_eq!(resolve_filter(&config, Some("warn".into())), "warn");
        assert_eq!(resolve_filter(&config, None), "info");
        assert_eq!(resolve_filter(&config, Some("  ".into())), "info");
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig {
            env_filter: Some("warn".into()),
            ..LoggingConfig::default()
        };
        init_logging(&config);
        init_logging(&config);
        init_logging(&LoggingConfig::default());
    }
}
