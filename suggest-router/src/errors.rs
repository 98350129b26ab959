use crate::config::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SuggestRouterError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to build provider {provider}: {reason}")]
    ProviderSetup { provider: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
