use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use ember_db::models::{CommentRow, PostRow};
use ember_types::api::{Claims, CommentResponse, CreateCommentRequest, CreatePostRequest, Page, PostResponse};
use ember_types::models::{NotificationCategory, NotificationPayload};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_POST_CHARS: usize = 5000;
const MAX_COMMENT_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct PostFilter {
    pub club_id: Option<Uuid>,
}

fn post_response(row: PostRow) -> PostResponse {
    PostResponse {
        id: row.id,
        author: row.author,
        club_id: row.club_id,
        content: row.content,
        comment_count: row.comment_count,
        created_at: row.created_at,
    }
}

fn comment_response(row: CommentRow) -> CommentResponse {
    CommentResponse {
        id: row.id,
        post_id: row.post_id,
        author: row.author,
        parent_id: row.parent_id,
        content: row.content,
        created_at: row.created_at,
    }
}

/// Trimmed content, or 400 when empty or over `max` characters.
pub(crate) fn validated_text(raw: &str, what: &str, max: usize) -> ApiResult<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ApiError::bad_request(format!("{} cannot be empty", what)));
    }
    if text.chars().count() > max {
        return Err(ApiError::bad_request(format!("{} is too long", what)));
    }
    Ok(text.to_string())
}

/// Fire-and-forget POST_MENTION fan-out for freshly written text.
/// Content inside a private club only notifies mentioned members of `members_of`.
pub(crate) fn spawn_mentions(
    state: &AppState,
    author: &Claims,
    text: String,
    what: &str,
    link: String,
    members_of: Option<Uuid>,
) {
    let payload = NotificationPayload::new(
        NotificationCategory::PostMention,
        "You were mentioned",
        format!("{} mentioned you in a {}", author.username, what),
    )
    .with_link(link);

    let notifier = state.notifier.clone();
    let author_id = author.sub;
    state.notifier.best_effort().spawn("mention fan-out", async move {
        notifier.notify_mentions(author_id, &text, members_of, payload).await;
        Ok(())
    });
}

/// Club posts are visible to everyone for public clubs and to members only
/// for private ones. Returns the private club the content is confined to.
pub(crate) async fn ensure_visible(state: &AppState, club_id: Option<Uuid>, viewer: Uuid) -> ApiResult<Option<Uuid>> {
    let Some(club_id) = club_id else {
        return Ok(None);
    };
    let (club, role) = state
        .blocking(move |db| Ok((db.get_club(club_id)?, db.club_member_role(club_id, viewer)?)))
        .await?;
    let club = club.ok_or_else(|| ApiError::not_found("Club"))?;
    if club.is_private && role.is_none() {
        return Err(ApiError::forbidden("This club is private"));
    }
    Ok(club.is_private.then_some(club_id))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = validated_text(&req.content, "Post", MAX_POST_CHARS)?;
    let author_id = claims.sub;

    let club = match req.club_id {
        Some(club_id) => {
            let (club, role) = state
                .blocking(move |db| Ok((db.get_club(club_id)?, db.club_member_role(club_id, author_id)?)))
                .await?;
            let club = club.ok_or_else(|| ApiError::not_found("Club"))?;
            if role.is_none() {
                return Err(ApiError::forbidden("Only members can post in this club"));
            }
            Some(club)
        }
        None => None,
    };

    let post_id = Uuid::new_v4();
    let club_id = req.club_id;
    let stored = content.clone();
    let post = state
        .blocking(move |db| {
            db.create_post(post_id, author_id, club_id, &stored)?;
            db.get_post(post_id)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("Post"))?;

    let link = format!("/posts/{}", post_id);
    let private_club = club.as_ref().filter(|c| c.is_private).map(|c| c.id);
    if let Some(club) = club {
        let payload = NotificationPayload::new(
            NotificationCategory::NewPostInClub,
            format!("New post in {}", club.name),
            format!("{} posted in {}", claims.username, club.name),
        )
        .with_link(link.clone());
        let notifier = state.notifier.clone();
        state.notifier.best_effort().spawn("club post fan-out", async move {
            notifier.notify_club_members(club.id, author_id, payload).await;
            Ok(())
        });
    }
    spawn_mentions(&state, &claims, content, "post", link, private_club);

    Ok((StatusCode::CREATED, Json(post_response(post))))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(filter): Query<PostFilter>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<PostResponse>>> {
    ensure_visible(&state, filter.club_id, claims.sub).await?;

    let page = page.clamped();
    let posts = state
        .blocking(move |db| db.list_posts(filter.club_id, page.limit, page.offset))
        .await?;
    Ok(Json(posts.into_iter().map(post_response).collect()))
}

pub async fn get_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> ApiResult<Json<PostResponse>> {
    let post = state
        .blocking(move |db| db.get_post(post_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Post"))?;
    ensure_visible(&state, post.club_id, claims.sub).await?;
    Ok(Json(post_response(post)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let post = state
        .blocking(move |db| db.get_post(post_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Post"))?;

    if post.author.id != claims.sub {
        return Err(ApiError::forbidden("Only the author can delete this post"));
    }

    state.blocking(move |db| db.delete_post(post_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = validated_text(&req.content, "Comment", MAX_COMMENT_CHARS)?;

    let parent_id = req.parent_id;
    let (post, parent) = state
        .blocking(move |db| {
            let post = db.get_post(post_id)?;
            let parent = match parent_id {
                Some(id) => db.get_comment(id)?,
                None => None,
            };
            Ok((post, parent))
        })
        .await?;

    let post = post.ok_or_else(|| ApiError::not_found("Post"))?;
    let private_club = ensure_visible(&state, post.club_id, claims.sub).await?;
    if parent_id.is_some() && !parent.as_ref().is_some_and(|p| p.post_id == post_id) {
        return Err(ApiError::bad_request("Parent comment does not belong to this post"));
    }

    let comment_id = Uuid::new_v4();
    let author_id = claims.sub;
    let stored = content.clone();
    let comment = state
        .blocking(move |db| {
            db.create_comment(comment_id, post_id, author_id, parent_id, &stored)?;
            db.get_comment(comment_id)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("Comment"))?;

    let link = format!("/posts/{}", post_id);
    let (recipient, payload) = match &parent {
        Some(parent) => (
            parent.author.id,
            NotificationPayload::new(
                NotificationCategory::NewReply,
                "New reply",
                format!("{} replied to your comment", claims.username),
            ),
        ),
        None => (
            post.author.id,
            NotificationPayload::new(
                NotificationCategory::NewComment,
                "New comment",
                format!("{} commented on your post", claims.username),
            ),
        ),
    };
    if recipient != author_id {
        state
            .notifier
            .dispatch(recipient, payload.with_link(link.clone()))
            .await;
    }
    spawn_mentions(&state, &claims, content, "comment", link, private_club);

    Ok((StatusCode::CREATED, Json(comment_response(comment))))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<CommentResponse>>> {
    let post = state
        .blocking(move |db| db.get_post(post_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Post"))?;
    ensure_visible(&state, post.club_id, claims.sub).await?;

    let page = page.clamped();
    let comments = state
        .blocking(move |db| db.list_comments(post_id, page.limit, page.offset))
        .await?;
    Ok(Json(comments.into_iter().map(comment_response).collect()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn club_post_notifies_other_members_and_mentions() {
        let app = TestApp::new();
        let (owner_id, owner) = app.signup("owner");
        let (member_id, member) = app.signup("member");
        let (outsider_id, _) = app.signup("outsider");

        let (_, club) = app.post("/clubs", Some(&owner), json!({ "name": "Cob Corner" })).await;
        let club_id = club["id"].as_str().unwrap().to_string();
        app.post(&format!("/clubs/{}/join", club_id), Some(&member), json!({})).await;

        let (status, post) = app
            .post(
                "/posts",
                Some(&member),
                json!({ "content": "Fresh tin opened, come over @outsider", "club_id": club_id }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(post["author"]["username"], "member");

        app.wait_for_notifications(owner_id, 1).await;
        app.wait_for_notifications(outsider_id, 1).await;
        assert_eq!(app.state.db.count_notifications(member_id).unwrap(), 0);
    }

    #[tokio::test]
    async fn mentions_in_private_clubs_skip_non_members() {
        let app = TestApp::new();
        let (_, owner) = app.signup("owner");
        let (member_id, member) = app.signup("member");
        let (outsider_id, _) = app.signup("outsider");

        let (_, club) = app
            .post("/clubs", Some(&owner), json!({ "name": "Back Room", "is_private": true }))
            .await;
        let club_id = club["id"].as_str().unwrap().to_string();
        app.post(&format!("/clubs/{}/invite", club_id), Some(&owner), json!({ "user_id": member_id }))
            .await;
        let (status, _) = app.post(&format!("/clubs/{}/join", club_id), Some(&member), json!({})).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .post(
                "/posts",
                Some(&owner),
                json!({ "content": "Cellar night, @member and @outsider", "club_id": club_id }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        // Invite, club post and mention
        app.wait_for_notifications(member_id, 3).await;
        assert_eq!(app.state.db.count_notifications(outsider_id).unwrap(), 0);
    }

    #[tokio::test]
    async fn non_members_cannot_post_in_a_club() {
        let app = TestApp::new();
        let (_, owner) = app.signup("owner");
        let (_, stranger) = app.signup("stranger");
        let (_, club) = app.post("/clubs", Some(&owner), json!({ "name": "Closed Circle" })).await;

        let (status, _) = app
            .post("/posts", Some(&stranger), json!({ "content": "hello", "club_id": club["id"] }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.post("/posts", Some(&stranger), json!({ "content": "   " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn comments_and_replies_notify_the_right_author() {
        let app = TestApp::new();
        let (author_id, author) = app.signup("author");
        let (commenter_id, commenter) = app.signup("commenter");

        let (_, post) = app.post("/posts", Some(&author), json!({ "content": "Thoughts on burley?" })).await;
        let post_id = post["id"].as_str().unwrap().to_string();

        let (status, comment) = app
            .post(&format!("/posts/{}/comments", post_id), Some(&commenter), json!({ "content": "Love it" }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(app.state.db.count_notifications(author_id).unwrap(), 1);

        // Author replying to the commenter notifies the commenter only
        app.post(
            &format!("/posts/{}/comments", post_id),
            Some(&author),
            json!({ "content": "Agreed", "parent_id": comment["id"] }),
        )
        .await;
        assert_eq!(app.state.db.count_notifications(commenter_id).unwrap(), 1);
        assert_eq!(app.state.db.count_notifications(author_id).unwrap(), 1);

        // Commenting on your own post notifies nobody
        app.post(&format!("/posts/{}/comments", post_id), Some(&author), json!({ "content": "bump" }))
            .await;
        assert_eq!(app.state.db.count_notifications(author_id).unwrap(), 1);

        let (_, comments) = app.get(&format!("/posts/{}/comments", post_id), Some(&author)).await;
        assert_eq!(comments.as_array().unwrap().len(), 3);
        assert_eq!(comments[0]["content"], "Love it");
    }

    #[tokio::test]
    async fn only_the_author_deletes() {
        let app = TestApp::new();
        let (_, author) = app.signup("author");
        let (_, other) = app.signup("other");
        let (_, post) = app.post("/posts", Some(&author), json!({ "content": "ephemeral" })).await;
        let path = format!("/posts/{}", post["id"].as_str().unwrap());

        let (status, _) = app.delete(&path, Some(&other)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.delete(&path, Some(&author)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.get(&path, Some(&author)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
