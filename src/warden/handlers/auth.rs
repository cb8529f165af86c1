use axum::{
    extract::{Extension, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

use super::{issued_response, SessionResponse};
use crate::security::{Result, Security, SessionKind, ValidatedSession};
use crate::warden::{context::Client, cookie};

#[derive(ToSchema, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Email, or username when username login is enabled.
    #[serde(alias = "email", alias = "username")]
    identifier: String,
    password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

#[utoipa::path(
    post,
    path= "/v1/auth/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Authenticated; the session token is set as a cookie", body = SessionResponse, content_type = "application/json"),
        (status = 401, description = "Wrong password, disabled or unverified account", body = crate::security::ErrorResponse),
        (status = 404, description = "Account not found", body = crate::security::ErrorResponse),
    ),
    tag= "auth"
)]
#[instrument(skip(security, context, payload))]
pub async fn login(
    State(security): State<Security>,
    Client(context): Client,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response> {
    let Some(Json(request)) = payload else {
        return Ok((StatusCode::BAD_REQUEST, "Missing payload").into_response());
    };
    let password = SecretString::from(request.password);
    let issued = security
        .login(&context, request.identifier.trim(), &password)
        .await?;
    Ok(issued_response(
        security.config().cookie(),
        &issued,
        StatusCode::OK,
    ))
}

#[utoipa::path(
    post,
    path= "/v1/auth/logout",
    responses (
        (status = 200, description = "Session deactivated and cookie cleared", body = SessionResponse, content_type = "application/json"),
        (status = 401, description = "Session already inactive or expired", body = crate::security::ErrorResponse),
    ),
    tag= "auth"
)]
#[instrument(skip(security, context))]
pub async fn logout(State(security): State<Security>, Client(context): Client) -> Result<Response> {
    let session = security.logout(&context).await?;
    let mut headers = HeaderMap::new();
    if let Ok(value) = cookie::clear_cookie(security.config().cookie(), SessionKind::Authentication)
    {
        headers.insert(SET_COOKIE, value);
    }
    Ok((headers, Json(SessionResponse::from(&session))).into_response())
}

#[utoipa::path(
    post,
    path= "/v1/auth/refresh",
    responses (
        (status = 200, description = "Session extended; a new token is set as a cookie", body = SessionResponse, content_type = "application/json"),
        (status = 403, description = "Session refresh is disabled", body = crate::security::ErrorResponse),
    ),
    tag= "auth"
)]
#[instrument(skip(security, context))]
pub async fn refresh(State(security): State<Security>, Client(context): Client) -> Result<Response> {
    let issued = security.refresh(&context).await?;
    Ok(issued_response(
        security.config().cookie(),
        &issued,
        StatusCode::OK,
    ))
}

#[utoipa::path(
    get,
    path= "/v1/auth/session",
    responses (
        (status = 200, description = "Current session and account", body = SessionResponse, content_type = "application/json"),
        (status = 401, description = "Session invalid, expired or bearer not allowed", body = crate::security::ErrorResponse),
    ),
    tag= "auth"
)]
pub async fn session(Extension(validated): Extension<ValidatedSession>) -> Json<SessionResponse> {
    Json(SessionResponse::from(&validated))
}
