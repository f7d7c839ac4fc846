use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use ember_db::models::NotificationRow;
use ember_types::api::{
    Claims, Page, PushSubscribeRequest, PushUnsubscribeRequest, UnreadCountResponse,
    UpdatePreferencesRequest,
};
use ember_types::models::{Notification, NotificationPreferences};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_ENDPOINT_LEN: usize = 2048;

#[derive(Debug, Deserialize)]
pub struct NotificationFilter {
    #[serde(default)]
    pub unread: bool,
}

fn notification(row: NotificationRow) -> Notification {
    Notification {
        id: row.id,
        category: row.category,
        title: row.title,
        body: row.body,
        link_url: row.link_url,
        read: row.read,
        created_at: row.created_at,
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(filter): Query<NotificationFilter>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<Notification>>> {
    let page = page.clamped();
    let user_id = claims.sub;
    let rows = state
        .blocking(move |db| db.list_notifications(user_id, filter.unread, page.limit, page.offset))
        .await?;
    Ok(Json(rows.into_iter().map(notification).collect()))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let user_id = claims.sub;
    let count = state
        .blocking(move |db| db.unread_notification_count(user_id))
        .await?;
    Ok(Json(UnreadCountResponse { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let user_id = claims.sub;
    // Someone else's notification looks the same as a missing one
    let found = state
        .blocking(move |db| db.mark_notification_read(notification_id, user_id))
        .await?;
    if !found {
        return Err(ApiError::not_found("Notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let user_id = claims.sub;
    state
        .blocking(move |db| db.mark_all_notifications_read(user_id))
        .await?;
    Ok(Json(UnreadCountResponse { count: 0 }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let user_id = claims.sub;
    let deleted = state
        .blocking(move |db| db.delete_notification(notification_id, user_id))
        .await?;
    if !deleted {
        return Err(ApiError::not_found("Notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_preferences(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<NotificationPreferences>> {
    let user_id = claims.sub;
    let prefs = state
        .blocking(move |db| db.get_or_create_preferences(user_id))
        .await?;
    Ok(Json(prefs))
}

pub async fn update_preferences(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePreferencesRequest>,
) -> ApiResult<Json<NotificationPreferences>> {
    let user_id = claims.sub;
    let prefs = state
        .blocking(move |db| {
            let mut prefs = db.get_or_create_preferences(user_id)?;
            req.apply(&mut prefs);
            db.save_preferences(user_id, &prefs)?;
            Ok(prefs)
        })
        .await?;
    Ok(Json(prefs))
}

pub async fn push_subscribe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PushSubscribeRequest>,
) -> ApiResult<StatusCode> {
    let endpoint = req.endpoint.trim().to_string();
    if !endpoint.starts_with("https://") || endpoint.len() > MAX_ENDPOINT_LEN {
        return Err(ApiError::bad_request("Push endpoint must be an https URL"));
    }
    if req.keys.p256dh.is_empty() || req.keys.auth.is_empty() {
        return Err(ApiError::bad_request("Push keys are required"));
    }

    let user_id = claims.sub;
    state
        .blocking(move |db| {
            db.upsert_push_subscription(Uuid::new_v4(), user_id, &endpoint, &req.keys.p256dh, &req.keys.auth)
        })
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn push_unsubscribe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PushUnsubscribeRequest>,
) -> ApiResult<StatusCode> {
    let user_id = claims.sub;
    state
        .blocking(move |db| db.delete_push_subscription_by_endpoint(user_id, &req.endpoint))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::testing::TestApp;

    async fn followed_twice(app: &TestApp) -> (uuid::Uuid, String) {
        let (target_id, target) = app.signup("target");
        for name in ["fan_one", "fan_two"] {
            let (_, fan) = app.signup(name);
            app.post(&format!("/users/{}/follow", target_id), Some(&fan), json!({})).await;
        }
        (target_id, target)
    }

    #[tokio::test]
    async fn read_flow() {
        let app = TestApp::new();
        let (_, target) = followed_twice(&app).await;

        let (_, count) = app.get("/notifications/unread-count", Some(&target)).await;
        assert_eq!(count["count"], 2);

        let (_, list) = app.get("/notifications", Some(&target)).await;
        let first = list[0]["id"].as_str().unwrap().to_string();
        assert_eq!(list[0]["category"], "NEW_FOLLOWER");

        let (status, _) = app
            .post(&format!("/notifications/{}/read", first), Some(&target), json!({}))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, unread) = app.get("/notifications?unread=true", Some(&target)).await;
        assert_eq!(unread.as_array().unwrap().len(), 1);

        app.post("/notifications/read-all", Some(&target), json!({})).await;
        let (_, count) = app.get("/notifications/unread-count", Some(&target)).await;
        assert_eq!(count["count"], 0);

        let (status, _) = app.delete(&format!("/notifications/{}", first), Some(&target)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, list) = app.get("/notifications", Some(&target)).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn others_notifications_are_not_found() {
        let app = TestApp::new();
        let (_, target) = followed_twice(&app).await;
        let (_, snoop) = app.signup("snoop");

        let (_, list) = app.get("/notifications", Some(&target)).await;
        let id = list[0]["id"].as_str().unwrap().to_string();

        let (status, _) = app.post(&format!("/notifications/{}/read", id), Some(&snoop), json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.delete(&format!("/notifications/{}", id), Some(&snoop)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preferences_materialize_and_gate_dispatch() {
        let app = TestApp::new();
        let (alice_id, alice) = app.signup("alice");
        let (_, bob) = app.signup("bob");

        assert!(app.state.db.get_preferences(alice_id).unwrap().is_none());
        let (_, prefs) = app.get("/notifications/preferences", Some(&alice)).await;
        assert_eq!(prefs["new_follower"], true);
        assert_eq!(prefs["push_enabled"], false);
        assert!(app.state.db.get_preferences(alice_id).unwrap().is_some());

        let (status, prefs) = app
            .put("/notifications/preferences", Some(&alice), json!({ "new_follower": false }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(prefs["new_follower"], false);
        assert_eq!(prefs["new_message"], true);

        app.post(&format!("/users/{}/follow", alice_id), Some(&bob), json!({})).await;
        assert_eq!(app.state.db.count_notifications(alice_id).unwrap(), 0);

        let (status, _) = app
            .put("/notifications/preferences", Some(&alice), json!({ "not_a_switch": true }))
            .await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn push_subscriptions_rebind_by_endpoint() {
        let app = TestApp::new();
        let (alice_id, alice) = app.signup("alice");
        let (bob_id, bob) = app.signup("bob");
        let body = json!({
            "endpoint": "https://push.example.net/sub/abc",
            "keys": { "p256dh": "BPubKey", "auth": "secret" }
        });

        let (status, _) = app.post("/notifications/push/subscribe", Some(&alice), body.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = app.post("/notifications/push/subscribe", Some(&bob), body).await;
        assert_eq!(status, StatusCode::CREATED);

        assert!(app.state.db.push_subscriptions_for(alice_id).unwrap().is_empty());
        assert_eq!(app.state.db.push_subscriptions_for(bob_id).unwrap().len(), 1);

        let (status, _) = app
            .post(
                "/notifications/push/unsubscribe",
                Some(&bob),
                json!({ "endpoint": "https://push.example.net/sub/abc" }),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(app.state.db.push_subscriptions_for(bob_id).unwrap().is_empty());

        let (status, _) = app
            .post(
                "/notifications/push/subscribe",
                Some(&bob),
                json!({ "endpoint": "http://insecure", "keys": { "p256dh": "k", "auth": "a" } }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
