use thiserror::Error;

use crate::routes::build::BuildError;

/// Top-level application error; every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to build routes: {0}")]
    Routes(#[from] BuildError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("failed to bind {address}:{port}: {source}")]
    Bind {
        address: String,
        port: u16,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

impl AppError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn bind(address: &str, port: u16, source: std::io::Error) -> Self {
        Self::Bind {
            address: address.to_string(),
            port,
            source,
        }
    }
}
