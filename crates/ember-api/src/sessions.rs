use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use ember_db::Database;
use ember_db::models::SessionRow;
use ember_db::queries::NewSession;
use ember_types::api::{Claims, CreateSessionRequest, Page, SessionResponse};
use ember_types::models::{SessionStatus, UserSummary};

use crate::error::{ApiError, ApiResult};
use crate::posts::validated_text;
use crate::state::AppState;

const DEFAULT_CAPACITY: u32 = 10;
const MIN_CAPACITY: u32 = 2;
const MAX_CAPACITY: u32 = 50;

fn load_session(db: &Database, session_id: Uuid) -> anyhow::Result<Option<SessionResponse>> {
    let Some(row) = db.get_session(session_id)? else {
        return Ok(None);
    };
    let participants = db.session_participants(session_id)?;
    Ok(Some(session_response(row, participants)))
}

fn session_response(row: SessionRow, participants: Vec<UserSummary>) -> SessionResponse {
    SessionResponse {
        id: row.id,
        host_id: row.host_id,
        club_id: row.club_id,
        title: row.title,
        description: row.description,
        capacity: row.capacity,
        is_private: row.is_private,
        status: row.status,
        participants,
        created_at: row.created_at,
    }
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let title = validated_text(&req.title, "Title", 120)?;
    let capacity = req.capacity.unwrap_or(DEFAULT_CAPACITY);
    if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
        return Err(ApiError::bad_request(format!(
            "Capacity must be between {} and {}",
            MIN_CAPACITY, MAX_CAPACITY
        )));
    }

    let host_id = claims.sub;
    if let Some(club_id) = req.club_id {
        let (club, role) = state
            .blocking(move |db| Ok((db.get_club(club_id)?, db.club_member_role(club_id, host_id)?)))
            .await?;
        club.ok_or_else(|| ApiError::not_found("Club"))?;
        if role.is_none() {
            return Err(ApiError::forbidden("Only members can host club sessions"));
        }
    }

    let session_id = Uuid::new_v4();
    let session = state
        .blocking(move |db| {
            db.create_session(&NewSession {
                id: session_id,
                host_id,
                club_id: req.club_id,
                title: &title,
                description: req.description.as_deref(),
                capacity,
                is_private: req.is_private,
            })?;
            load_session(db, session_id)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("Session"))?;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<SessionResponse>>> {
    let page = page.clamped();
    let viewer = claims.sub;
    let sessions = state
        .blocking(move |db| {
            db.list_open_sessions(viewer, page.limit, page.offset)?
                .into_iter()
                .map(|row| {
                    let participants = db.session_participants(row.id)?;
                    Ok(session_response(row, participants))
                })
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await?;
    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    let viewer = claims.sub;
    let (session, allowed) = state
        .blocking(move |db| Ok((load_session(db, session_id)?, db.may_enter_session(session_id, viewer)?)))
        .await?;
    let session = session.ok_or_else(|| ApiError::not_found("Session"))?;
    if !allowed {
        return Err(ApiError::forbidden("This session is private"));
    }
    Ok(Json(session))
}

pub async fn join_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    enum Outcome {
        Missing,
        Ended,
        Denied,
        Full,
        Joined(Option<SessionResponse>),
    }

    let user_id = claims.sub;
    let outcome = state
        .blocking(move |db| {
            let Some(session) = db.get_session(session_id)? else {
                return Ok(Outcome::Missing);
            };
            if session.status == SessionStatus::Ended {
                return Ok(Outcome::Ended);
            }
            if !db.may_enter_session(session_id, user_id)? {
                return Ok(Outcome::Denied);
            }
            if !db.add_session_participant(session_id, user_id, session.capacity)? {
                return Ok(Outcome::Full);
            }
            load_session(db, session_id).map(Outcome::Joined)
        })
        .await?;

    match outcome {
        Outcome::Missing | Outcome::Joined(None) => Err(ApiError::not_found("Session")),
        Outcome::Ended => Err(ApiError::bad_request("Session has ended")),
        Outcome::Denied => Err(ApiError::forbidden("This session is private")),
        Outcome::Full => Err(ApiError::Conflict("Session is full".into())),
        Outcome::Joined(Some(session)) => Ok(Json(session)),
    }
}

pub async fn leave_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let user_id = claims.sub;
    let session = state
        .blocking(move |db| db.get_session(session_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Session"))?;
    if session.host_id == user_id {
        return Err(ApiError::bad_request("The host ends the session instead of leaving"));
    }

    let removed = state
        .blocking(move |db| db.remove_session_participant(session_id, user_id))
        .await?;
    if !removed {
        return Err(ApiError::not_found("Participation"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn end_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let session = state
        .blocking(move |db| db.get_session(session_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Session"))?;
    if session.host_id != claims.sub {
        return Err(ApiError::forbidden("Only the host can end the session"));
    }

    state
        .blocking(move |db| db.set_session_status(session_id, SessionStatus::Ended))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn capacity_is_enforced() {
        let app = TestApp::new();
        let (_, host) = app.signup("host");
        let (_, second) = app.signup("second");
        let (_, third) = app.signup("third");

        let (status, _) = app
            .post("/sessions", Some(&host), json!({ "title": "Too small", "capacity": 1 }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, session) = app
            .post("/sessions", Some(&host), json!({ "title": "Two chairs", "capacity": 2 }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(session["participants"].as_array().unwrap().len(), 1);
        let id = session["id"].as_str().unwrap().to_string();

        let (status, session) = app.post(&format!("/sessions/{}/join", id), Some(&second), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["participants"].as_array().unwrap().len(), 2);

        // Rejoining is idempotent even when full
        let (status, _) = app.post(&format!("/sessions/{}/join", id), Some(&second), json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app.post(&format!("/sessions/{}/join", id), Some(&third), json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn private_sessions_admit_club_members() {
        let app = TestApp::new();
        let (_, host) = app.signup("host");
        let (_, member) = app.signup("member");
        let (_, stranger) = app.signup("stranger");

        let (_, club) = app.post("/clubs", Some(&host), json!({ "name": "Latakia Lounge" })).await;
        let club_id = club["id"].as_str().unwrap().to_string();
        app.post(&format!("/clubs/{}/join", club_id), Some(&member), json!({})).await;

        let (_, session) = app
            .post(
                "/sessions",
                Some(&host),
                json!({ "title": "Members herf", "club_id": club_id, "is_private": true }),
            )
            .await;
        let id = session["id"].as_str().unwrap().to_string();

        let (status, _) = app.post(&format!("/sessions/{}/join", id), Some(&stranger), json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.post(&format!("/sessions/{}/join", id), Some(&member), json!({})).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn private_sessions_are_hidden_from_outsiders() {
        let app = TestApp::new();
        let (_, host) = app.signup("host");
        let (_, stranger) = app.signup("stranger");

        let (_, session) = app
            .post("/sessions", Some(&host), json!({ "title": "Back porch", "is_private": true }))
            .await;
        let id = session["id"].as_str().unwrap().to_string();
        app.post("/sessions", Some(&host), json!({ "title": "Open porch" })).await;

        let (status, _) = app.get(&format!("/sessions/{}", id), Some(&stranger)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (_, listed) = app.get("/sessions", Some(&stranger)).await;
        let titles: Vec<&str> = listed
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["Open porch"]);

        let (status, own) = app.get(&format!("/sessions/{}", id), Some(&host)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(own["participants"].as_array().unwrap().len(), 1);
        let (_, listed) = app.get("/sessions", Some(&host)).await;
        assert_eq!(listed.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn only_host_ends_and_ended_sessions_close() {
        let app = TestApp::new();
        let (_, host) = app.signup("host");
        let (_, guest) = app.signup("guest");

        let (_, session) = app.post("/sessions", Some(&host), json!({ "title": "Short one" })).await;
        let id = session["id"].as_str().unwrap().to_string();
        assert_eq!(session["capacity"], 10);

        let (status, _) = app.post(&format!("/sessions/{}/end", id), Some(&guest), json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.post(&format!("/sessions/{}/end", id), Some(&host), json!({})).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = app.post(&format!("/sessions/{}/join", id), Some(&guest), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Session has ended");

        let (_, open) = app.get("/sessions", Some(&guest)).await;
        assert!(open.as_array().unwrap().is_empty());
    }
}
