use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use ember_db::Database;
use ember_db::models::UserRow;
use ember_db::queries::ProfileUpdate;
use ember_types::api::{Claims, FollowResponse, Page, UpdateProfileRequest, UserProfile};
use ember_types::models::{NotificationCategory, NotificationPayload, UserSummary};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_DISPLAY_NAME: usize = 64;
const MAX_BIO: usize = 500;
const MAX_FIELD: usize = 200;

pub(crate) fn load_profile(db: &Database, user: UserRow) -> anyhow::Result<UserProfile> {
    let (follower_count, following_count) = db.follow_counts(user.id)?;
    Ok(UserProfile {
        id: user.id,
        username: user.username,
        display_name: user.display_name,
        bio: user.bio,
        avatar_url: user.avatar_url,
        location: user.location,
        follower_count,
        following_count,
        created_at: user.created_at,
    })
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<UserProfile>> {
    let profile = state
        .blocking(move |db| match db.get_user_by_username(&username)? {
            Some(user) => load_profile(db, user).map(Some),
            None => Ok(None),
        })
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    Ok(Json(profile))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<UserProfile>> {
    let too_long = |field: &Option<String>, max: usize| field.as_ref().is_some_and(|v| v.chars().count() > max);
    if too_long(&req.display_name, MAX_DISPLAY_NAME) {
        return Err(ApiError::bad_request("Display name is too long"));
    }
    if too_long(&req.bio, MAX_BIO) {
        return Err(ApiError::bad_request("Bio is too long"));
    }
    if too_long(&req.avatar_url, MAX_FIELD) || too_long(&req.location, MAX_FIELD) {
        return Err(ApiError::bad_request("Field is too long"));
    }

    let user_id = claims.sub;
    let profile = state
        .blocking(move |db| {
            db.update_profile(
                user_id,
                &ProfileUpdate {
                    display_name: req.display_name.as_deref(),
                    bio: req.bio.as_deref(),
                    avatar_url: req.avatar_url.as_deref(),
                    location: req.location.as_deref(),
                },
            )?;
            match db.get_user_by_id(user_id)? {
                Some(user) => load_profile(db, user).map(Some),
                None => Ok(None),
            }
        })
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    Ok(Json(profile))
}

pub async fn follow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(target_id): Path<Uuid>,
) -> ApiResult<Json<FollowResponse>> {
    if target_id == claims.sub {
        return Err(ApiError::bad_request("You cannot follow yourself"));
    }

    let follower_id = claims.sub;
    let created = state
        .blocking(move |db| {
            if db.get_user_by_id(target_id)?.is_none() {
                return Ok(None);
            }
            db.follow(follower_id, target_id).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    // Awaited, but never fails the follow
    if created {
        let payload = NotificationPayload::new(
            NotificationCategory::NewFollower,
            "New follower",
            format!("{} started following you", claims.username),
        )
        .with_link(format!("/users/{}", claims.username));
        state.notifier.dispatch(target_id, payload).await;
    }

    Ok(Json(FollowResponse { following: true }))
}

pub async fn unfollow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(target_id): Path<Uuid>,
) -> ApiResult<Json<FollowResponse>> {
    let follower_id = claims.sub;
    state.blocking(move |db| db.unfollow(follower_id, target_id)).await?;
    Ok(Json(FollowResponse { following: false }))
}

pub async fn followers(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<UserSummary>>> {
    let page = page.clamped();
    let users = state
        .blocking(move |db| db.followers(user_id, page.limit, page.offset))
        .await?;
    Ok(Json(users))
}

pub async fn following(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<UserSummary>>> {
    let page = page.clamped();
    let users = state
        .blocking(move |db| db.following(user_id, page.limit, page.offset))
        .await?;
    Ok(Json(users))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn follow_notifies_once_and_counts() {
        let app = TestApp::new();
        let (alice, alice_token) = app.signup("alice");
        let (bob, _) = app.signup("bob");

        let (status, body) = app.post(&format!("/users/{}/follow", bob), Some(&alice_token), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["following"], true);

        // Second follow is a no-op, no second notification
        app.post(&format!("/users/{}/follow", bob), Some(&alice_token), json!({})).await;
        assert_eq!(app.state.db.count_notifications(bob).unwrap(), 1);

        let (_, profile) = app.get("/users/bob", Some(&alice_token)).await;
        assert_eq!(profile["follower_count"], 1);

        let (_, list) = app.get(&format!("/users/{}/followers", bob), Some(&alice_token)).await;
        assert_eq!(list[0]["id"], alice.to_string());

        let (status, _) = app
            .delete(&format!("/users/{}/follow", bob), Some(&alice_token))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, profile) = app.get("/users/bob", Some(&alice_token)).await;
        assert_eq!(profile["follower_count"], 0);
    }

    #[tokio::test]
    async fn cannot_follow_self_or_ghosts() {
        let app = TestApp::new();
        let (alice, token) = app.signup("alice");

        let (status, _) = app.post(&format!("/users/{}/follow", alice), Some(&token), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post(&format!("/users/{}/follow", uuid::Uuid::new_v4()), Some(&token), json!({}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn profile_patch_keeps_unset_fields() {
        let app = TestApp::new();
        let (_, token) = app.signup("alice");

        app.patch("/users/me", Some(&token), json!({ "bio": "Virginia flakes only" })).await;
        let (status, body) = app
            .patch("/users/me", Some(&token), json!({ "location": "Asheville" }))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bio"], "Virginia flakes only");
        assert_eq!(body["location"], "Asheville");
    }
}
