use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Request failures visible to clients
///
/// An uninstalled CRD is deliberately not one of these; it is served as data.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("namespace and name filters cannot be combined with a uid")]
    UidWithFilter,
    #[error("no resource with uid {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::UidWithFilter => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (code, self.to_string()).into_response()
    }
}
