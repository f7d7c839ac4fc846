use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use ember_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, UserProfile};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::users::load_profile;

const MIN_PASSWORD_LEN: usize = 8;

pub fn valid_username(username: &str) -> bool {
    (3..=32).contains(&username.len())
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    if !valid_username(&req.username) {
        return Err(ApiError::bad_request(
            "Username must be 3-32 letters, digits or underscores",
        ));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 8 characters"));
    }

    let username = req.username.clone();
    if state
        .blocking(move |db| db.get_user_by_username(&username))
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("Username already taken".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let username = req.username.clone();
    let display_name = req.display_name.clone();
    state
        .blocking(move |db| db.create_user(user_id, &username, &password_hash, display_name.as_deref()))
        .await?;

    let token = create_token(&state.jwt_secret, user_id, &req.username)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let invalid = || ApiError::Unauthorized("Invalid username or password".into());

    let username = req.username.clone();
    let user = state
        .blocking(move |db| db.get_user_by_username(&username))
        .await?
        .ok_or_else(invalid)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} is corrupt: {}", user.id, e))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    let token = create_token(&state.jwt_secret, user.id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserProfile>> {
    let user_id = claims.sub;
    let profile = state
        .blocking(move |db| {
            let Some(user) = db.get_user_by_id(user_id)? else {
                return Ok(None);
            };
            load_profile(db, user).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    Ok(Json(profile))
}

/// HS256 token valid for 30 days.
pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::testing::TestApp;

    #[test]
    fn username_rules() {
        assert!(valid_username("briar_root"));
        assert!(!valid_username("ab"));
        assert!(!valid_username("has space"));
        assert!(!valid_username(&"x".repeat(33)));
    }

    #[tokio::test]
    async fn register_login_me() {
        let app = TestApp::new();

        let (status, body) = app
            .post(
                "/auth/register",
                None,
                json!({ "username": "meerschaum", "password": "correct horse", "display_name": "Meer" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, _) = app
            .post(
                "/auth/register",
                None,
                json!({ "username": "MEERSCHAUM", "password": "another one" }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = app
            .post("/auth/login", None, json!({ "username": "meerschaum", "password": "wrong pass" }))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app
            .post("/auth/login", None, json!({ "username": "meerschaum", "password": "correct horse" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "meerschaum");

        let (status, body) = app.get("/auth/me", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["display_name"], "Meer");
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let app = TestApp::new();
        let (status, body) = app.get("/auth/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Missing bearer token");

        let (status, _) = app.get("/auth/me", Some("garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
