pub mod config;
pub mod engine;
pub mod models;
pub mod services;

pub use config::AuthzConfig;
pub use engine::AuthzEngine;
pub use services::AuthError;

/// Install tracing for the service from its configuration.
pub fn init_observability(config: &AuthzConfig) {
    service_core::observability::init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );
}
