//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use super::auth::{Claims, JwtAuth};
use crate::context::AppContext;
use crate::error::WardlineError;

/// Header naming a session to revoke at logout
pub const SESSION_HEADER: &str = "x-session-id";

/// Validates the bearer token and that the session it was issued with is
/// still live and belongs to the token's subject
pub async fn auth_middleware(
    State(ctx): State<Arc<AppContext>>,
    mut request: Request,
    next: Next,
) -> Result<Response, WardlineError> {
    let token = bearer_token(request.headers())?;
    let claims = authorize(&ctx, &token).await?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Result<String, WardlineError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| WardlineError::Unauthorized("Access token required".into()))?;

    JwtAuth::extract_bearer_token(auth_header)
        .map_err(|e| WardlineError::Unauthorized(e.to_string()))
}

/// Claims of `token` once its session has been checked
///
/// Store errors skip the session check and are logged.
pub async fn authorize(ctx: &AppContext, token: &str) -> Result<Claims, WardlineError> {
    let claims = ctx
        .jwt
        .validate_token(token)
        .map_err(|_| WardlineError::Unauthorized("Invalid or expired token".into()))?;

    match ctx.sessions.fetch(&claims.sid).await {
        Ok(Some(session)) if session.subject_id == claims.sub => Ok(claims),
        Ok(Some(session)) => {
            warn!(
                session_id = %claims.sid,
                token_subject = %claims.sub,
                session_subject = %session.subject_id,
                "Token presented with another subject's session"
            );
            Err(WardlineError::Unauthorized("Session does not match token".into()))
        }
        Ok(None) => Err(WardlineError::Unauthorized("Session revoked or expired".into())),
        Err(e) => {
            warn!(session_id = %claims.sid, "Session check skipped: {}", e);
            Ok(claims)
        }
    }
}
