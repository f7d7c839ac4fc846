use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use ember_db::models::ReviewRow;
use ember_types::api::{Claims, CreateReviewRequest, Page, ReviewResponse};

use crate::error::{ApiError, ApiResult};
use crate::posts::{spawn_mentions, validated_text};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ReviewFilter {
    pub author_id: Option<Uuid>,
}

fn review_response(row: ReviewRow) -> ReviewResponse {
    ReviewResponse {
        id: row.id,
        author: row.author,
        product_name: row.product_name,
        product_kind: row.product_kind,
        rating: row.rating,
        content: row.content,
        created_at: row.created_at,
    }
}

pub async fn create_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    if !(1..=5).contains(&req.rating) {
        return Err(ApiError::bad_request("Rating must be between 1 and 5"));
    }
    let product_name = validated_text(&req.product_name, "Product name", 120)?;
    let content = validated_text(&req.content, "Review", 5000)?;

    let review_id = Uuid::new_v4();
    let author_id = claims.sub;
    let stored = content.clone();
    let review = state
        .blocking(move |db| {
            db.create_review(review_id, author_id, &product_name, req.product_kind, req.rating, &stored)?;
            db.get_review(review_id)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("Review"))?;

    spawn_mentions(&state, &claims, content, "review", format!("/reviews/{}", review_id), None);

    Ok((StatusCode::CREATED, Json(review_response(review))))
}

pub async fn list_reviews(
    State(state): State<AppState>,
    Query(filter): Query<ReviewFilter>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<ReviewResponse>>> {
    let page = page.clamped();
    let reviews = state
        .blocking(move |db| db.list_reviews(filter.author_id, page.limit, page.offset))
        .await?;
    Ok(Json(reviews.into_iter().map(review_response).collect()))
}
