use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::error::AppError;

/// Map the repeatable `-v` flag onto a default level threshold.
pub fn verbosity_level(count: u8) -> LevelFilter {
    match count {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

/// Install a global tracing subscriber at the requested verbosity.
///
/// `RUST_LOG` still takes precedence over the flag-derived default, so a
/// deployment can raise individual targets without restarting with `-v`.
pub fn init(verbosity: u8) -> Result<(), AppError> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(verbosity_level(verbosity).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt::layer().compact().with_target(true).with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| AppError::telemetry(format!("failed to install tracing subscriber: {err}")))
}
