//! Logging initialization for the webhook services.
//!
//! Thin wrapper over the observability crate so every binary entry point
//! tags its lines with a consistent service name.

/// Initialize logging for the main `webhooks` service.
///
/// `RUST_LOG` still wins over `level` when set.
pub fn init_logging(level: &str) {
    init_logging_for_service("webhooks", level);
}

/// Initialize logging with a custom service name.
pub fn init_logging_for_service(service_name: &str, level: &str) {
    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        also_stderr: true,
        ..Default::default()
    });
}
