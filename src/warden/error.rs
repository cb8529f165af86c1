use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::security::Error;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("internal error: {err:#}");
        }
        let body = self.response();
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
