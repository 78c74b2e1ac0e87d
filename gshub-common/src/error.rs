use thiserror::Error;

/// Failure taxonomy shared by the orchestrator and the HTTP boundary.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Malformed identifier or payload. Never reaches the gateway.
    #[error("{0}")]
    InvalidInput(String),

    /// Unknown or not-owned instance/plan/service.
    #[error("{0}")]
    NotFound(String),

    /// Gateway call failed. `message` is stable and safe to show, `detail` is the provider text.
    #[error("{message}: {detail}")]
    ProviderFailure { message: String, detail: String },

    /// Repository or ledger write/read failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// Control plane and provider disagree (e.g. zero-row delete after a successful terminate).
    #[error("inconsistency: {0}")]
    Inconsistency(String),
}

impl LifecycleError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        LifecycleError::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        LifecycleError::NotFound(msg.into())
    }

    pub fn provider(message: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        LifecycleError::ProviderFailure {
            message: message.into(),
            detail: detail.to_string(),
        }
    }

    /// Message that can be echoed to the caller without leaking provider internals.
    pub fn public_message(&self) -> String {
        match self {
            LifecycleError::InvalidInput(m) | LifecycleError::NotFound(m) => m.clone(),
            LifecycleError::ProviderFailure { message, .. } => message.clone(),
            LifecycleError::PersistenceFailure(_) => "Internal storage error".to_string(),
            LifecycleError::Inconsistency(_) => "Internal consistency error".to_string(),
        }
    }
}

impl From<sqlx::Error> for LifecycleError {
    fn from(err: sqlx::Error) -> Self {
        LifecycleError::PersistenceFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_detail_is_kept_out_of_public_message() {
        let err = LifecycleError::provider("Unable to start instance", "status=500 body=boom");
        assert_eq!(err.public_message(), "Unable to start instance");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn sqlx_errors_become_persistence_failures() {
        let err: LifecycleError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, LifecycleError::PersistenceFailure(_)));
        assert_eq!(err.public_message(), "Internal storage error");
    }
}
