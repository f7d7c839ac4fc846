use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use ember_gateway::auth::{bearer_token, decode_token};

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate JWT from Authorization header.
/// On success the `Claims` are available to handlers as an `Extension`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

    let claims = decode_token(&state.jwt_secret, token)
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".into()))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
