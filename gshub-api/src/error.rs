use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gshub_common::LifecycleError;
use gshub_orchestrator::RolloutError;
use thiserror::Error;

/// Every failure an HTTP handler can return. Rendered as `{"error": "<message>"}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Rollout(#[from] RolloutError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
}

impl ApiError {
    /// Wrap a lifecycle error and log it with the acting principal. Provider detail only goes to
    /// the log.
    pub fn logged(err: LifecycleError, principal: &str) -> Self {
        match &err {
            LifecycleError::InvalidInput(_) | LifecycleError::NotFound(_) => {
                tracing::info!("[{}] {}", principal, err)
            }
            LifecycleError::ProviderFailure { .. } => tracing::warn!("[{}] {}", principal, err),
            LifecycleError::PersistenceFailure(_) | LifecycleError::Inconsistency(_) => {
                tracing::error!("[{}] {}", principal, err)
            }
        }
        ApiError::Lifecycle(err)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Lifecycle(e) => match e {
                LifecycleError::InvalidInput(_) | LifecycleError::ProviderFailure { .. } => {
                    StatusCode::BAD_REQUEST
                }
                LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
                LifecycleError::PersistenceFailure(_) | LifecycleError::Inconsistency(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Rollout(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Lifecycle(e) => e.public_message(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({ "error": self.public_message() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_map_to_http_codes() {
        let cases = [
            (LifecycleError::invalid("Invalid instance id"), StatusCode::BAD_REQUEST),
            (LifecycleError::not_found("Instance not found"), StatusCode::NOT_FOUND),
            (
                LifecycleError::provider("Unable to stop instance", "boom"),
                StatusCode::BAD_REQUEST,
            ),
            (
                LifecycleError::PersistenceFailure("pool timed out".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn persistence_detail_is_not_echoed() {
        let err = ApiError::from(LifecycleError::PersistenceFailure(
            "password authentication failed for user gshub".into(),
        ));
        assert_eq!(err.public_message(), "Internal storage error");
    }

    #[test]
    fn rollout_errors_are_server_errors() {
        let err = ApiError::from(RolloutError::Dispatch("throttled".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.public_message().contains("dispatch"));
    }
}
