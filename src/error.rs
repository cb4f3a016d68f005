use std::time::Duration;
use thiserror::Error;

/// Failures the sync engine distinguishes. Everything else travels as a plain
/// `anyhow::Error` and is treated as a transient remote failure.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("authentication with {service} failed: {reason}")]
    Authentication { service: String, reason: String },

    #[error("library entry {catalog_id} not found in source library")]
    Lookup { catalog_id: String },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("rate_limited: retry_after={retry_after:?}")]
    RateLimited { retry_after: Option<u64> },
}

impl SyncError {
    pub fn auth(service: &str, reason: impl std::fmt::Display) -> Self {
        SyncError::Authentication {
            service: service.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether a call that failed with this error may be issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Timeout { .. } | SyncError::RateLimited { .. })
    }
}

/// True if `err` carries a `SyncError::Authentication` anywhere in its chain.
pub fn is_auth_error(err: &anyhow::Error) -> bool {
    err.chain().any(|c| {
        matches!(
            c.downcast_ref::<SyncError>(),
            Some(SyncError::Authentication { .. })
        )
    })
}

/// Errors not tagged as a non-retryable `SyncError` are assumed transient.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<SyncError>() {
        Some(e) => e.is_retryable(),
        None => true,
    }
}

/// Server-provided back-off hint, if the failure was a rate limit.
pub fn retry_after_secs(err: &anyhow::Error) -> Option<u64> {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::RateLimited { retry_after }) => *retry_after,
        _ => None,
    }
}
