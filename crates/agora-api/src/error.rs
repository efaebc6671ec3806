use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Error taxonomy for the REST surface. Every variant maps to the uniform
/// `{success: false, message}` envelope with its status code; control-channel
/// errors never come through here (they are typed frames on the socket).
#[derive(Debug, Error)]
pub enum ApiError {
    /// Rejected input, no persistence side effect
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid bearer token
    #[error("Authentication required.")]
    Unauthorized,

    /// Authenticated but not allowed to touch the resource
    #[error("{0}")]
    Forbidden(String),

    /// Unknown conversation/notification/identity, no partial state change
    #[error("{0}")]
    NotFound(String),

    /// Storage failure; logged in full, surfaced as a generic message
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(e) => {
                error!("internal error: {:#}", e);
                "An unexpected error occurred.".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(serde_json::json!({
            "success": false,
            "message": message,
        }));
        (self.status(), body).into_response()
    }
}

/// Run blocking DB work off the async runtime, mapping both the join error
/// and the query error into the taxonomy.
pub async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed: {e}"))
        })?
        .map_err(ApiError::from)
}
