use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use ember_db::models::EventRow;
use ember_db::queries::NewEvent;
use ember_types::api::{Claims, CreateEventRequest, EventResponse, Page, RsvpRequest};
use ember_types::models::{NotificationCategory, NotificationPayload};

use crate::error::{ApiError, ApiResult};
use crate::posts::{ensure_visible, validated_text};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub upcoming: bool,
}

fn event_response(row: EventRow) -> EventResponse {
    EventResponse {
        id: row.id,
        host_id: row.host_id,
        club_id: row.club_id,
        title: row.title,
        description: row.description,
        location: row.location,
        starts_at: row.starts_at,
        going_count: row.going_count,
        created_at: row.created_at,
    }
}

pub async fn create_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateEventRequest>,
) -> ApiResult<impl IntoResponse> {
    let title = validated_text(&req.title, "Title", 120)?;
    if req.starts_at <= Utc::now() {
        return Err(ApiError::bad_request("Event must start in the future"));
    }

    let host_id = claims.sub;
    let club = match req.club_id {
        Some(club_id) => {
            let (club, role) = state
                .blocking(move |db| Ok((db.get_club(club_id)?, db.club_member_role(club_id, host_id)?)))
                .await?;
            let club = club.ok_or_else(|| ApiError::not_found("Club"))?;
            if role.is_none() {
                return Err(ApiError::forbidden("Only members can host club events"));
            }
            Some(club)
        }
        None => None,
    };

    let event_id = Uuid::new_v4();
    let event = state
        .blocking(move |db| {
            db.create_event(&NewEvent {
                id: event_id,
                host_id,
                club_id: req.club_id,
                title: &title,
                description: req.description.as_deref(),
                location: req.location.as_deref(),
                starts_at: req.starts_at,
            })?;
            db.get_event(event_id)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;

    if let Some(club) = club {
        let payload = NotificationPayload::new(
            NotificationCategory::NewPostInClub,
            format!("New event in {}", club.name),
            format!("{} scheduled {}", claims.username, event.title),
        )
        .with_link(format!("/events/{}", event_id));
        let notifier = state.notifier.clone();
        state.notifier.best_effort().spawn("club event fan-out", async move {
            notifier.notify_club_members(club.id, host_id, payload).await;
            Ok(())
        });
    }

    Ok((StatusCode::CREATED, Json(event_response(event))))
}

pub async fn list_events(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(filter): Query<EventFilter>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<EventResponse>>> {
    let page = page.clamped();
    let from = filter.upcoming.then(Utc::now);
    let viewer = claims.sub;
    let events = state
        .blocking(move |db| db.list_events(viewer, from, page.limit, page.offset))
        .await?;
    Ok(Json(events.into_iter().map(event_response).collect()))
}

pub async fn get_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Json<EventResponse>> {
    let event = state
        .blocking(move |db| db.get_event(event_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    ensure_visible(&state, event.club_id, claims.sub).await?;
    Ok(Json(event_response(event)))
}

pub async fn rsvp(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<RsvpRequest>,
) -> ApiResult<Json<EventResponse>> {
    let event = state
        .blocking(move |db| db.get_event(event_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    ensure_visible(&state, event.club_id, claims.sub).await?;

    let user_id = claims.sub;
    let event = state
        .blocking(move |db| {
            db.upsert_rsvp(event_id, user_id, req.status)?;
            db.get_event(event_id)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    Ok(Json(event_response(event)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use serde_json::json;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn events_must_start_in_the_future() {
        let app = TestApp::new();
        let (_, token) = app.signup("host");

        let (status, _) = app
            .post(
                "/events",
                Some(&token),
                json!({ "title": "Yesterday's herf", "starts_at": Utc::now() - Duration::hours(1) }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rsvp_updates_going_count() {
        let app = TestApp::new();
        let (_, host) = app.signup("host");
        let (_, guest) = app.signup("guest");

        let (status, event) = app
            .post(
                "/events",
                Some(&host),
                json!({ "title": "Porch smoke", "starts_at": Utc::now() + Duration::days(3) }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let event_id = event["id"].as_str().unwrap().to_string();

        let (_, event) = app
            .post(&format!("/events/{}/rsvp", event_id), Some(&guest), json!({ "status": "going" }))
            .await;
        assert_eq!(event["going_count"], 1);

        let (_, event) = app
            .post(&format!("/events/{}/rsvp", event_id), Some(&guest), json!({ "status": "maybe" }))
            .await;
        assert_eq!(event["going_count"], 0);

        let (_, upcoming) = app.get("/events?upcoming=true", Some(&guest)).await;
        assert_eq!(upcoming.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn private_club_events_are_hidden_from_outsiders() {
        let app = TestApp::new();
        let (_, owner) = app.signup("owner");
        let (_, outsider) = app.signup("outsider");

        let (_, club) = app
            .post("/clubs", Some(&owner), json!({ "name": "Back Room", "is_private": true }))
            .await;
        let club_id = club["id"].as_str().unwrap().to_string();
        let (status, event) = app
            .post(
                "/events",
                Some(&owner),
                json!({
                    "title": "Secret smoke",
                    "location": "My house",
                    "starts_at": Utc::now() + Duration::days(2),
                    "club_id": club_id
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let event_id = event["id"].as_str().unwrap().to_string();

        let (status, _) = app.get(&format!("/events/{}", event_id), Some(&outsider)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (_, listed) = app.get("/events", Some(&outsider)).await;
        assert!(listed.as_array().unwrap().is_empty());

        let (_, listed) = app.get("/events", Some(&owner)).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn club_event_notifies_other_members() {
        let app = TestApp::new();
        let (_, owner) = app.signup("owner");
        let (member_id, member) = app.signup("member");

        let (_, club) = app.post("/clubs", Some(&owner), json!({ "name": "Cob Corner" })).await;
        let club_id = club["id"].as_str().unwrap().to_string();
        app.post(&format!("/clubs/{}/join", club_id), Some(&member), json!({})).await;

        let (status, _) = app
            .post(
                "/events",
                Some(&owner),
                json!({
                    "title": "Corn cob night",
                    "starts_at": Utc::now() + Duration::days(1),
                    "club_id": club_id
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        app.wait_for_notifications(member_id, 1).await;
    }
}
