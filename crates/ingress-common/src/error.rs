//! Error types for the ingress services.

use thiserror::Error;

/// Result type alias using IngressError.
pub type IngressResult<T> = Result<T, IngressError>;

/// Primary error type for ingress and station sync operations.
#[derive(Debug, Error)]
pub enum IngressError {
    // === Classification Errors ===
    #[error("Invalid provider address: {0}")]
    InvalidProviderAddress(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    // === Station Sync Errors ===
    #[error("Enrichment source missing: {0}")]
    EnrichmentSourceMissing(String),

    #[error("Upsert failed: {0}")]
    UpsertFailure(String),

    // === Collaborator Errors ===
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Decode error: {0}")]
    Decode(String),

    // === Infrastructure Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl IngressError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            IngressError::InvalidProviderAddress(_) => "invalid_provider_address",
            IngressError::MalformedPayload(_) => "malformed_payload",
            IngressError::EnrichmentSourceMissing(_) => "enrichment_source_missing",
            IngressError::UpsertFailure(_) => "upsert_failure",
            IngressError::StorageError(_) => "storage",
            IngressError::QueueError(_) => "queue",
            IngressError::HttpError(_) => "http",
            IngressError::Serialization(_) => "serialization",
            IngressError::Decode(_) => "decode",
            IngressError::Configuration(_) => "configuration",
            IngressError::InternalError(_) => "internal",
        }
    }

    /// Whether the error is a per-message classification outcome rather
    /// than a failure of the surrounding infrastructure.
    pub fn is_classification(&self) -> bool {
        matches!(
            self,
            IngressError::InvalidProviderAddress(_) | IngressError::MalformedPayload(_)
        )
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            IngressError::InvalidProviderAddress(_)
            | IngressError::MalformedPayload(_)
            | IngressError::Decode(_) => 400,

            IngressError::EnrichmentSourceMissing(_) => 404,

            IngressError::UpsertFailure(_)
            | IngressError::HttpError(_) => 502,

            IngressError::QueueError(_)
            | IngressError::StorageError(_) => 503,

            _ => 500,
        }
    }
}

// Conversion from common error types
impl From<std::io::Error> for IngressError {
    fn from(err: std::io::Error) -> Self {
        IngressError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for IngressError {
    fn from(err: serde_json::Error) -> Self {
        IngressError::Serialization(format!("JSON error: {}", err))
    }
}
