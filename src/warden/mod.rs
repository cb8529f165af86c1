use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::security::Security;

pub mod context;
pub mod cookie;
pub mod handlers;
pub mod middleware;

mod error;

use handlers::{auth, captcha, health, verification};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login,
        auth::logout,
        auth::refresh,
        auth::session,
        verification::request,
        verification::attempt,
        verification::account,
        captcha::request,
        captcha::attempt,
    ),
    components(schemas(
        health::Health,
        handlers::SessionResponse,
        handlers::AccountResponse,
        handlers::CodeRequest,
        auth::LoginRequest,
        verification::VerificationRequest,
        crate::security::ErrorResponse,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "auth", description = "Login, logout and session refresh"),
        (name = "verification", description = "Two-step verification"),
        (name = "captcha", description = "Captcha challenges"),
    )
)]
pub struct ApiDoc;

/// Build the application router around a wired [`Security`].
#[must_use]
pub fn router(security: Security) -> Router {
    let authenticated = Router::new()
        .route("/v1/auth/session", get(auth::session))
        .route_layer(from_fn_with_state(
            security.clone(),
            middleware::require_authentication,
        ));

    let two_step = Router::new()
        .route("/v1/verification/attempt", post(verification::attempt))
        .route_layer(from_fn_with_state(
            security.clone(),
            middleware::require_two_step,
        ));

    let captcha = Router::new()
        .route("/v1/captcha/attempt", post(captcha::attempt))
        .route_layer(from_fn_with_state(
            security.clone(),
            middleware::require_captcha,
        ));

    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/logout", post(auth::logout))
        .route("/v1/auth/refresh", post(auth::refresh))
        .route("/v1/verification/request", post(verification::request))
        .route("/v1/verification/account", post(verification::account))
        .route("/v1/captcha/request", post(captcha::request))
        .merge(authenticated)
        .merge(two_step)
        .merge(captcha)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(security)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, security: Security) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let app = router(security).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
