use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::Response,
};
use tracing::instrument;

use super::{consumed_response, issued_response, CodeRequest, SessionResponse};
use crate::security::{Result, Security, SessionKind, ValidatedSession};
use crate::warden::context::Client;

#[utoipa::path(
    post,
    path= "/v1/captcha/request",
    responses (
        (status = 201, description = "Captcha issued; the token is set as a cookie", body = SessionResponse, content_type = "application/json"),
    ),
    tag= "captcha"
)]
#[instrument(skip(security, context))]
pub async fn request(State(security): State<Security>, Client(context): Client) -> Result<Response> {
    let issued = security.request_captcha(&context).await?;
    Ok(issued_response(
        security.config().cookie(),
        &issued,
        StatusCode::CREATED,
    ))
}

#[utoipa::path(
    post,
    path= "/v1/captcha/attempt",
    request_body = CodeRequest,
    responses (
        (status = 200, description = "Captcha solved; the session is consumed", body = SessionResponse, content_type = "application/json"),
        (status = 401, description = "Wrong code, attempts exhausted, or session no longer valid", body = crate::security::ErrorResponse),
    ),
    tag= "captcha"
)]
pub async fn attempt(
    State(security): State<Security>,
    Extension(validated): Extension<ValidatedSession>,
) -> Response {
    consumed_response(security.config().cookie(), SessionKind::Captcha, &validated)
}
