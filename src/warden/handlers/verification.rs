use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

use super::{consumed_response, issued_response, valid_email, CodeRequest, SessionResponse};
use crate::security::{Result, Security, SessionKind, ValidatedSession, Verification};
use crate::warden::context::Client;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerificationRequest {
    email: Option<String>,
    /// Only honored when username login is enabled.
    username: Option<String>,
}

#[utoipa::path(
    post,
    path= "/v1/verification/request",
    request_body = VerificationRequest,
    responses (
        (status = 201, description = "Code sent; the two-step token is set as a cookie", body = SessionResponse, content_type = "application/json"),
        (status = 400, description = "Missing or malformed identifier"),
        (status = 404, description = "Account not found", body = crate::security::ErrorResponse),
    ),
    tag= "verification"
)]
#[instrument(skip(security, context))]
pub async fn request(
    State(security): State<Security>,
    Client(context): Client,
    payload: Option<Json<VerificationRequest>>,
) -> Result<Response> {
    let Some(Json(request)) = payload else {
        return Ok((StatusCode::BAD_REQUEST, "Missing payload").into_response());
    };

    let mut context = context;
    match (request.email, request.username) {
        (Some(email), _) if valid_email(email.trim()) => {
            context = context.with_email(email.trim());
        }
        (Some(_), _) => {
            return Ok((StatusCode::BAD_REQUEST, "Invalid email").into_response());
        }
        (None, Some(username)) if !username.trim().is_empty() => {
            context = context.with_username(username.trim());
        }
        (None, _) => {
            return Ok((StatusCode::BAD_REQUEST, "Missing email").into_response());
        }
    }

    let issued = security
        .request_two_step_verification(&context, None, Verification::NotRequired)
        .await?;
    Ok(issued_response(
        security.config().cookie(),
        &issued,
        StatusCode::CREATED,
    ))
}

#[utoipa::path(
    post,
    path= "/v1/verification/attempt",
    request_body = CodeRequest,
    responses (
        (status = 200, description = "Code accepted; the two-step session is consumed", body = SessionResponse, content_type = "application/json"),
        (status = 401, description = "Wrong code, attempts exhausted, or session no longer valid", body = crate::security::ErrorResponse),
    ),
    tag= "verification"
)]
pub async fn attempt(
    State(security): State<Security>,
    Extension(validated): Extension<ValidatedSession>,
) -> Response {
    consumed_response(security.config().cookie(), SessionKind::TwoStep, &validated)
}

#[utoipa::path(
    post,
    path= "/v1/verification/account",
    request_body = CodeRequest,
    responses (
        (status = 200, description = "Account verified", body = SessionResponse, content_type = "application/json"),
        (status = 401, description = "Wrong code, attempts exhausted, or session no longer valid", body = crate::security::ErrorResponse),
        (status = 403, description = "Account already verified", body = crate::security::ErrorResponse),
    ),
    tag= "verification"
)]
#[instrument(skip(security, context, payload))]
pub async fn account(
    State(security): State<Security>,
    Client(context): Client,
    payload: Option<Json<CodeRequest>>,
) -> Result<Response> {
    let code = payload.map(|Json(request)| request.code).unwrap_or_default();
    let validated = security.verify_account(&context, &code).await?;
    Ok(consumed_response(
        security.config().cookie(),
        SessionKind::TwoStep,
        &validated,
    ))
}
