//! Route guards.
//!
//! Each guard runs one session check and, on success, stores the
//! [`ValidatedSession`] in the request extensions for the handler. A failed
//! check short-circuits with the error response.
//!
//! Challenge guards read the code from the JSON body (`{"code": "..."}`) and
//! hand the buffered body on unchanged.

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::context::{peer_ip, request_context};
use super::handlers::CodeRequest;
use crate::security::{RequestContext, Security, SessionKind};

const MAX_CODE_BODY: usize = 16 * 1024;

fn context(security: &Security, request: &Request) -> RequestContext {
    request_context(
        request.headers(),
        peer_ip(request.extensions()),
        security.config(),
    )
}

pub async fn require_authentication(
    State(security): State<Security>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = context(&security, &request);
    match security.authenticate(&context).await {
        Ok(validated) => {
            request.extensions_mut().insert(validated);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

pub async fn require_two_step(
    State(security): State<Security>,
    request: Request,
    next: Next,
) -> Response {
    require_challenge(security, SessionKind::TwoStep, request, next).await
}

pub async fn require_captcha(
    State(security): State<Security>,
    request: Request,
    next: Next,
) -> Response {
    require_challenge(security, SessionKind::Captcha, request, next).await
}

async fn require_challenge(
    security: Security,
    kind: SessionKind,
    request: Request,
    next: Next,
) -> Response {
    let context = context(&security, &request);
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_CODE_BODY).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!("unreadable {kind} body: {err}");
            Bytes::new()
        }
    };
    let code = submitted_code(&bytes);

    let result = if kind == SessionKind::TwoStep {
        security.two_step_verification(&context, &code).await
    } else {
        security.captcha(&context, &code).await
    };

    match result {
        Ok(validated) => {
            let mut request = Request::from_parts(parts, Body::from(bytes));
            request.extensions_mut().insert(validated);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Code from a JSON body; a missing or malformed body submits an empty code.
fn submitted_code(bytes: &[u8]) -> String {
    serde_json::from_slice::<CodeRequest>(bytes)
        .map(|request| request.code)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{
        store::{AccountStore, MemoryStore, SessionStore},
        ErrorResponse, SecurityConfig, ValidatedSession,
    };
    use axum::{
        http::{header::CONTENT_TYPE, StatusCode},
        middleware::from_fn_with_state,
        routing::{get, post},
        Extension, Router,
    };
    use secrecy::SecretString;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn security() -> anyhow::Result<Security> {
        let store = Arc::new(MemoryStore::new());
        Security::new(
            SecurityConfig::new(SecretString::from("middleware-secret".to_string())),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            store as Arc<dyn AccountStore>,
        )
    }

    async fn reached(Extension(validated): Extension<ValidatedSession>) -> String {
        validated.session.id.to_string()
    }

    async fn error_body(response: Response) -> anyhow::Result<ErrorResponse> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[test]
    fn submitted_code_defaults_to_empty() {
        assert_eq!(submitted_code(br#"{"code":"123456"}"#), "123456");
        assert_eq!(submitted_code(b"not json"), "");
        assert_eq!(submitted_code(b""), "");
    }

    #[tokio::test]
    async fn authentication_guard_short_circuits_without_token() -> anyhow::Result<()> {
        let security = security()?;
        let app = Router::new()
            .route("/private", get(reached))
            .route_layer(from_fn_with_state(security.clone(), require_authentication))
            .with_state(security);

        let response = app
            .oneshot(Request::builder().uri("/private").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_body(response).await?.error_type, "NotFoundError");
        Ok(())
    }

    #[tokio::test]
    async fn captcha_guard_passes_valid_code_through() -> anyhow::Result<()> {
        let security = security()?;
        let issued = security.request_captcha(&RequestContext::new()).await?;
        let code = issued.code.clone().unwrap_or_default();
        let app = Router::new()
            .route("/guarded", post(reached))
            .route_layer(from_fn_with_state(security.clone(), require_captcha))
            .with_state(security);

        let request = Request::builder()
            .method("POST")
            .uri("/guarded")
            .header(CONTENT_TYPE, "application/json")
            .header("token_captcha", issued.token.as_str())
            .body(Body::from(format!(r#"{{"code":"{code}"}}"#)))?;
        let response = app.clone().oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(bytes, issued.session.id.to_string().as_bytes());

        // consumed: the same token cannot pass twice
        let request = Request::builder()
            .method("POST")
            .uri("/guarded")
            .header("token_captcha", issued.token.as_str())
            .body(Body::from(format!(r#"{{"code":"{code}"}}"#)))?;
        let response = app.oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_body(response).await?.error_type, "InvalidError");
        Ok(())
    }

    #[tokio::test]
    async fn captcha_guard_rejects_wrong_code() -> anyhow::Result<()> {
        let security = security()?;
        let issued = security.request_captcha(&RequestContext::new()).await?;
        let app = Router::new()
            .route("/guarded", post(reached))
            .route_layer(from_fn_with_state(security.clone(), require_captcha))
            .with_state(security);

        let request = Request::builder()
            .method("POST")
            .uri("/guarded")
            .header("token_captcha", issued.token.as_str())
            .body(Body::empty())?;
        let response = app.oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_body(response).await?.error_type, "ChallengeError");
        Ok(())
    }
}
