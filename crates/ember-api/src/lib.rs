//! REST surface for Ember: accounts, social graph, clubs, posts, reviews,
//! direct messages, events, herf sessions, notifications, uploads and reports.

pub mod auth;
pub mod clubs;
pub mod error;
pub mod events;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod reports;
pub mod reviews;
pub mod sessions;
pub mod state;
pub mod uploads;
pub mod users;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
};
use serde_json::{Value, json};

pub use error::{ApiError, ApiResult};
pub use state::{AppState, AppStateInner};

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// All REST routes. Everything except auth, health and upload downloads
/// sits behind `require_auth`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/uploads/{id}", get(uploads::download))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        // Users
        .route("/users/me", patch(users::update_me))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}/follow", post(users::follow).delete(users::unfollow))
        .route("/users/{id}/followers", get(users::followers))
        .route("/users/{id}/following", get(users::following))
        // Clubs
        .route("/clubs", post(clubs::create_club).get(clubs::list_clubs))
        .route("/clubs/{id}", get(clubs::get_club))
        .route("/clubs/{id}/join", post(clubs::join_club))
        .route("/clubs/{id}/leave", post(clubs::leave_club))
        .route("/clubs/{id}/members", get(clubs::list_members))
        .route("/clubs/{id}/invite", post(clubs::invite))
        // Posts
        .route("/posts", post(posts::create_post).get(posts::list_posts))
        .route("/posts/{id}", get(posts::get_post).delete(posts::delete_post))
        .route("/posts/{id}/comments", post(posts::create_comment).get(posts::list_comments))
        // Reviews
        .route("/reviews", post(reviews::create_review).get(reviews::list_reviews))
        // Direct messages
        .route("/messages", post(messages::send_message).get(messages::list_conversations))
        .route("/messages/{user_id}", get(messages::get_conversation))
        // Events
        .route("/events", post(events::create_event).get(events::list_events))
        .route("/events/{id}", get(events::get_event))
        .route("/events/{id}/rsvp", post(events::rsvp))
        // Herf sessions
        .route("/sessions", post(sessions::create_session).get(sessions::list_sessions))
        .route("/sessions/{id}", get(sessions::get_session))
        .route("/sessions/{id}/join", post(sessions::join_session))
        .route("/sessions/{id}/leave", post(sessions::leave_session))
        .route("/sessions/{id}/end", post(sessions::end_session))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route(
            "/notifications/preferences",
            get(notifications::get_preferences).put(notifications::update_preferences),
        )
        .route("/notifications/push/subscribe", post(notifications::push_subscribe))
        .route("/notifications/push/unsubscribe", post(notifications::push_unsubscribe))
        .route("/notifications/{id}", delete(notifications::delete_notification))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        // Uploads
        .route(
            "/uploads",
            post(uploads::upload).layer(DefaultBodyLimit::max(uploads::MAX_UPLOAD_SIZE)),
        )
        // Reports
        .route("/reports", post(reports::create_report))
        .route("/reports/mine", get(reports::my_reports))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    use ember_db::Database;
    use ember_notify::{BestEffort, DisabledPushTransport, Notifier};

    use crate::state::{AppState, AppStateInner};

    pub struct TestApp {
        pub state: AppState,
        router: Router,
        _uploads: TempDir,
    }

    impl TestApp {
        pub fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let notifier = Notifier::new(db.clone(), Arc::new(DisabledPushTransport), BestEffort::tracing());
            let uploads = tempfile::tempdir().unwrap();
            let state: AppState = Arc::new(AppStateInner {
                db,
                jwt_secret: "test-secret".into(),
                notifier,
                upload_dir: uploads.path().to_path_buf(),
            });
            Self {
                router: crate::router(state.clone()),
                state,
                _uploads: uploads,
            }
        }

        /// Creates the account directly and returns (id, bearer token).
        pub fn signup(&self, username: &str) -> (Uuid, String) {
            let id = Uuid::new_v4();
            self.state.db.create_user(id, username, "unused-hash", None).unwrap();
            let token = crate::auth::create_token(&self.state.jwt_secret, id, username).unwrap();
            (id, token)
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }

        fn request(method: Method, path: &str, token: Option<&str>) -> axum::http::request::Builder {
            let builder = Request::builder().method(method).uri(path);
            match token {
                Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {}", token)),
                None => builder,
            }
        }

        async fn json(&self, method: Method, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
            let request = Self::request(method, path, token)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            self.send(request).await
        }

        pub async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
            let request = Self::request(Method::GET, path, token).body(Body::empty()).unwrap();
            self.send(request).await
        }

        pub async fn delete(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
            let request = Self::request(Method::DELETE, path, token).body(Body::empty()).unwrap();
            self.send(request).await
        }

        pub async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
            self.json(Method::POST, path, token, body).await
        }

        pub async fn patch(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
            self.json(Method::PATCH, path, token, body).await
        }

        pub async fn put(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
            self.json(Method::PUT, path, token, body).await
        }

        pub async fn post_bytes(
            &self,
            path: &str,
            token: Option<&str>,
            content_type: &str,
            bytes: Vec<u8>,
        ) -> (StatusCode, Value) {
            let request = Self::request(Method::POST, path, token)
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(bytes))
                .unwrap();
            self.send(request).await
        }

        /// Unauthenticated GET returning the raw body and its content type.
        pub async fn get_raw(&self, path: &str) -> (StatusCode, Option<String>, Vec<u8>) {
            let request = Self::request(Method::GET, path, None).body(Body::empty()).unwrap();
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, content_type, bytes.to_vec())
        }

        /// Fire-and-forget notifications land eventually; poll for them.
        pub async fn wait_for_notifications(&self, user_id: Uuid, expected: u32) {
            for _ in 0..100 {
                if self.state.db.count_notifications(user_id).unwrap() >= expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!(
                "expected {} notifications for {}, found {}",
                expected,
                user_id,
                self.state.db.count_notifications(user_id).unwrap()
            );
        }
    }
}
