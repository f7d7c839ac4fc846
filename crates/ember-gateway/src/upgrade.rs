use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::error;

use crate::auth::{bearer_token, decode_token};
use crate::connection::handle_connection;
use crate::relay::Relay;

#[derive(Clone)]
struct HerfState {
    relay: Relay,
    jwt_secret: Arc<str>,
}

#[derive(Deserialize)]
struct HerfQuery {
    token: Option<String>,
}

/// `GET /herf`: the relay socket. Browsers cannot set headers on a
/// WebSocket, so the token may also come as `?token=`.
pub fn router(relay: Relay, jwt_secret: &str) -> Router {
    Router::new().route("/herf", get(herf_upgrade)).with_state(HerfState {
        relay,
        jwt_secret: Arc::from(jwt_secret),
    })
}

async fn herf_upgrade(
    State(state): State<HerfState>,
    Query(query): Query<HerfQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // Authenticate before anything else so a bad token never opens a socket
    let token = bearer_token(&headers).map(str::to_owned).or(query.token);
    let Some(claims) = token.and_then(|t| decode_token(&state.jwt_secret, &t)) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let user_id = claims.sub;
    let user = match state
        .relay
        .db()
        .run_blocking(move |db| db.get_user_by_id(user_id))
        .await
    {
        Ok(Some(user)) => user.summary(),
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => {
            error!("Herf upgrade lookup failed: {:#}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_connection(socket, state.relay, user)),
        Err(rejection) => rejection.into_response(),
    }
}
