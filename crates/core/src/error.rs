use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum SkipperError {
    #[error("Could not resolve {what} for {video_id}: {reason}")]
    ResolutionFailure {
        what: &'static str,
        video_id: String,
        reason: String,
    },

    #[error("{origin} unavailable: {reason}")]
    SourceUnavailable { origin: &'static str, reason: String },

    #[error("Inference failed: {reason}")]
    InferenceFailure { reason: String },

    #[error("Scheduler race: {reason}")]
    ScheduleRace { reason: String },

    #[error("Store error: {reason}")]
    StoreFailed { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Missing API key: {env_var} environment variable is not set")]
    MissingApiKey { env_var: String },
}

impl From<ProviderError> for SkipperError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MissingApiKey { env_var, .. } => SkipperError::MissingApiKey { env_var },
        }
    }
}

impl SkipperError {
    pub(crate) fn source_unavailable(origin: &'static str, reason: impl ToString) -> Self {
        SkipperError::SourceUnavailable {
            origin,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn inference(reason: impl ToString) -> Self {
        SkipperError::InferenceFailure {
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SkipperError>;
