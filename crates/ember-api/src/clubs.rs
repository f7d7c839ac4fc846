use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use ember_db::models::{ClubMemberRow, ClubRow};
use ember_types::api::{Claims, ClubInviteRequest, ClubMemberResponse, ClubResponse, CreateClubRequest, Page};
use ember_types::models::{ClubRole, NotificationCategory, NotificationPayload};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn club_response(row: ClubRow) -> ClubResponse {
    ClubResponse {
        id: row.id,
        name: row.name,
        description: row.description,
        is_private: row.is_private,
        owner_id: row.owner_id,
        member_count: row.member_count,
        created_at: row.created_at,
    }
}

fn member_response(row: ClubMemberRow) -> ClubMemberResponse {
    ClubMemberResponse {
        user: row.user,
        role: row.role,
        joined_at: row.joined_at,
    }
}

pub async fn create_club(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateClubRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.name.trim().to_string();
    if !(3..=64).contains(&name.chars().count()) {
        return Err(ApiError::bad_request("Club name must be 3-64 characters"));
    }

    let club_id = Uuid::new_v4();
    let owner_id = claims.sub;
    let club = state
        .blocking(move |db| {
            if db.get_club_by_name(&name)?.is_some() {
                return Ok(None);
            }
            db.create_club(club_id, owner_id, &name, req.description.as_deref(), req.is_private)?;
            db.get_club(club_id)
        })
        .await?
        .ok_or_else(|| ApiError::Conflict("A club with that name already exists".into()))?;

    Ok((StatusCode::CREATED, Json(club_response(club))))
}

pub async fn list_clubs(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<ClubResponse>>> {
    let page = page.clamped();
    let clubs = state
        .blocking(move |db| db.list_clubs(page.limit, page.offset))
        .await?;
    Ok(Json(clubs.into_iter().map(club_response).collect()))
}

pub async fn get_club(
    State(state): State<AppState>,
    Path(club_id): Path<Uuid>,
) -> ApiResult<Json<ClubResponse>> {
    let club = state
        .blocking(move |db| db.get_club(club_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Club"))?;
    Ok(Json(club_response(club)))
}

pub async fn join_club(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(club_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let user_id = claims.sub;
    let (club, role, invited) = state
        .blocking(move |db| {
            let club = db.get_club(club_id)?;
            let role = db.club_member_role(club_id, user_id)?;
            let invited = db.has_club_invite(club_id, user_id)?;
            Ok((club, role, invited))
        })
        .await?;

    let club = club.ok_or_else(|| ApiError::not_found("Club"))?;
    if role.is_some() {
        return Err(ApiError::Conflict("Already a member".into()));
    }
    if club.is_private && !invited {
        return Err(ApiError::forbidden("This club is invite-only"));
    }

    state
        .blocking(move |db| db.add_club_member(club_id, user_id, ClubRole::Member))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave_club(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(club_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let user_id = claims.sub;
    let role = state
        .blocking(move |db| db.club_member_role(club_id, user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Membership"))?;

    if role == ClubRole::Owner {
        return Err(ApiError::bad_request("The owner cannot leave the club"));
    }

    state
        .blocking(move |db| db.remove_club_member(club_id, user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(club_id): Path<Uuid>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<ClubMemberResponse>>> {
    let page = page.clamped();
    let user_id = claims.sub;
    let (club, role) = state
        .blocking(move |db| Ok((db.get_club(club_id)?, db.club_member_role(club_id, user_id)?)))
        .await?;

    let club = club.ok_or_else(|| ApiError::not_found("Club"))?;
    if club.is_private && role.is_none() {
        return Err(ApiError::forbidden("Members of private clubs are hidden"));
    }

    let members = state
        .blocking(move |db| db.club_members(club_id, page.limit, page.offset))
        .await?;
    Ok(Json(members.into_iter().map(member_response).collect()))
}

pub async fn invite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(club_id): Path<Uuid>,
    Json(req): Json<ClubInviteRequest>,
) -> ApiResult<StatusCode> {
    let inviter = claims.sub;
    let invitee = req.user_id;
    let (club, inviter_role, invitee_exists, invitee_role) = state
        .blocking(move |db| {
            Ok((
                db.get_club(club_id)?,
                db.club_member_role(club_id, inviter)?,
                db.get_user_by_id(invitee)?.is_some(),
                db.club_member_role(club_id, invitee)?,
            ))
        })
        .await?;

    let club = club.ok_or_else(|| ApiError::not_found("Club"))?;
    if !inviter_role.is_some_and(|role| role.can_invite()) {
        return Err(ApiError::forbidden("Only club admins can invite"));
    }
    if !invitee_exists {
        return Err(ApiError::not_found("User"));
    }
    if invitee_role.is_some() {
        return Err(ApiError::Conflict("Already a member".into()));
    }

    state
        .blocking(move |db| db.create_club_invite(club_id, invitee, inviter))
        .await?;

    let payload = NotificationPayload::new(
        NotificationCategory::ClubInvite,
        "Club invitation",
        format!("{} invited you to join {}", claims.username, club.name),
    )
    .with_link(format!("/clubs/{}", club_id));
    state.notifier.dispatch(invitee, payload).await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn private_club_needs_an_invite() {
        let app = TestApp::new();
        let (_, owner) = app.signup("owner");
        let (guest_id, guest) = app.signup("guest");

        let (status, club) = app
            .post("/clubs", Some(&owner), json!({ "name": "Pipe Night", "is_private": true }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(club["member_count"], 1);
        let club_id = club["id"].as_str().unwrap().to_string();

        let (status, _) = app.post(&format!("/clubs/{}/join", club_id), Some(&guest), json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .post(&format!("/clubs/{}/invite", club_id), Some(&owner), json!({ "user_id": guest_id }))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(app.state.db.count_notifications(guest_id).unwrap(), 1);

        let (status, _) = app.post(&format!("/clubs/{}/join", club_id), Some(&guest), json!({})).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, members) = app.get(&format!("/clubs/{}/members", club_id), Some(&guest)).await;
        assert_eq!(members.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn members_cannot_invite_and_owner_cannot_leave() {
        let app = TestApp::new();
        let (_, owner) = app.signup("owner");
        let (_, member) = app.signup("member");
        let (other_id, _) = app.signup("other");

        let (_, club) = app.post("/clubs", Some(&owner), json!({ "name": "Open Bowl" })).await;
        let club_id = club["id"].as_str().unwrap().to_string();
        app.post(&format!("/clubs/{}/join", club_id), Some(&member), json!({})).await;

        let (status, _) = app
            .post(&format!("/clubs/{}/invite", club_id), Some(&member), json!({ "user_id": other_id }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.post(&format!("/clubs/{}/leave", club_id), Some(&owner), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.post(&format!("/clubs/{}/leave", club_id), Some(&member), json!({})).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn duplicate_club_name_conflicts() {
        let app = TestApp::new();
        let (_, token) = app.signup("owner");
        app.post("/clubs", Some(&token), json!({ "name": "Briar Patch" })).await;
        let (status, _) = app.post("/clubs", Some(&token), json!({ "name": "Briar Patch" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
