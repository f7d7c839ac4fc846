use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use ember_db::models::ReportRow;
use ember_types::api::{Claims, CreateReportRequest, ReportResponse};

use crate::error::ApiResult;
use crate::posts::validated_text;
use crate::state::AppState;

fn report_response(row: ReportRow) -> ReportResponse {
    ReportResponse {
        id: row.id,
        target_kind: row.target_kind,
        target_id: row.target_id,
        reason: row.reason,
        status: row.status,
        created_at: row.created_at,
    }
}

pub async fn create_report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateReportRequest>,
) -> ApiResult<impl IntoResponse> {
    let reason = validated_text(&req.reason, "Reason", 1000)?;

    let report_id = Uuid::new_v4();
    let reporter_id = claims.sub;
    let report = state
        .blocking(move |db| db.create_report(report_id, reporter_id, req.target_kind, req.target_id, &reason))
        .await?;

    info!(
        "Report {} filed against {} {}",
        report.id,
        report.target_kind,
        report.target_id
    );
    Ok((StatusCode::CREATED, Json(report_response(report))))
}

pub async fn my_reports(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ReportResponse>>> {
    let reporter_id = claims.sub;
    let reports = state.blocking(move |db| db.reports_by(reporter_id)).await?;
    Ok(Json(reports.into_iter().map(report_response).collect()))
}
