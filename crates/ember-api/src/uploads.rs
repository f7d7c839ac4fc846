use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use axum_extra::TypedHeader;
use axum_extra::headers::ContentType;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use ember_types::api::{Claims, UploadResponse};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 10 MB upload limit for images
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

const ALLOWED_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

fn image_type(content_type: Option<&ContentType>) -> Option<&'static str> {
    let raw = content_type?.to_string();
    let essence = raw.split(';').next()?.trim().to_ascii_lowercase();
    ALLOWED_TYPES.iter().copied().find(|allowed| *allowed == essence)
}

/// POST /uploads accepts a raw image body, stores it under its SHA-256 and
/// returns the public URL.
pub async fn upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    content_type: Option<TypedHeader<ContentType>>,
    bytes: Bytes,
) -> ApiResult<impl IntoResponse> {
    let content_type = image_type(content_type.as_ref().map(|TypedHeader(ct)| ct))
        .ok_or_else(|| ApiError::bad_request("Only PNG, JPEG, GIF and WebP images are accepted"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("Upload is empty"));
    }
    if bytes.len() > MAX_UPLOAD_SIZE {
        return Err(ApiError::PayloadTooLarge("Uploads are limited to 10 MB".into()));
    }

    let sha256 = hex::encode(Sha256::digest(&bytes));
    let path = state.upload_dir.join(&sha256);

    // Identical content is stored once
    if !tokio::fs::try_exists(&path).await.map_err(anyhow::Error::from)? {
        tokio::fs::create_dir_all(&state.upload_dir)
            .await
            .map_err(|e| anyhow::anyhow!("creating {}: {}", state.upload_dir.display(), e))?;
        write_atomically(&state.upload_dir, &sha256, &bytes).await?;
    } else {
        debug!("Upload {} already stored", sha256);
    }

    let upload_id = Uuid::new_v4();
    let owner_id = claims.sub;
    let size = bytes.len() as u64;
    let digest = sha256.clone();
    state
        .blocking(move |db| db.insert_upload(upload_id, owner_id, &digest, content_type, size))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            id: upload_id,
            url: format!("/uploads/{}", upload_id),
            content_type: content_type.to_string(),
            size,
        }),
    ))
}

/// Writes `bytes` to a private `.part` file and renames it onto `dir/name`,
/// so readers never see a partial blob under its final name.
async fn write_atomically(dir: &std::path::Path, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
    let temp_path = dir.join(format!("{}.{}.part", name, Uuid::new_v4()));
    let final_path = dir.join(name);

    let result = async {
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| anyhow::anyhow!("creating {}: {}", temp_path.display(), e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| anyhow::anyhow!("writing {}: {}", temp_path.display(), e))?;
        file.sync_all().await.map_err(anyhow::Error::from)?;
        drop(file);
        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| anyhow::anyhow!("moving upload to {}: {}", final_path.display(), e))
    }
    .await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&temp_path).await {
            debug!("Could not remove {}: {}", temp_path.display(), e);
        }
    }
    result
}

/// GET /uploads/{id} is public so images can be embedded directly.
pub async fn download(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let upload = state
        .blocking(move |db| db.get_upload(upload_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Upload"))?;

    let path = state.upload_dir.join(&upload.sha256);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;

    Ok((
        [
            (header::CONTENT_TYPE, upload.content_type),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        bytes,
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::write_atomically;
    use crate::testing::TestApp;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot really a png";

    #[tokio::test]
    async fn images_round_trip_and_dedupe_on_disk() {
        let app = TestApp::new();
        let (_, token) = app.signup("uploader");

        let (status, first) = app.post_bytes("/uploads", Some(&token), "image/png", PNG.to_vec()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["size"], PNG.len());
        let (_, second) = app.post_bytes("/uploads", Some(&token), "image/png", PNG.to_vec()).await;
        assert_ne!(first["id"], second["id"]);

        let stored = std::fs::read_dir(&app.state.upload_dir).unwrap().count();
        assert_eq!(stored, 1);

        let (status, content_type, body) = app.get_raw(first["url"].as_str().unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("image/png"));
        assert_eq!(body, PNG);
    }

    #[tokio::test]
    async fn concurrent_identical_uploads_leave_one_intact_blob() {
        let app = TestApp::new();
        let (_, token) = app.signup("uploader");

        let (a, b) = tokio::join!(
            app.post_bytes("/uploads", Some(&token), "image/png", PNG.to_vec()),
            app.post_bytes("/uploads", Some(&token), "image/png", PNG.to_vec()),
        );
        assert_eq!(a.0, StatusCode::CREATED);
        assert_eq!(b.0, StatusCode::CREATED);

        let names: Vec<String> = std::fs::read_dir(&app.state.upload_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].ends_with(".part"));

        for upload in [a.1, b.1] {
            let (_, _, body) = app.get_raw(upload["url"].as_str().unwrap()).await;
            assert_eq!(body, PNG);
        }
    }

    #[tokio::test]
    async fn failed_store_leaves_nothing_under_the_final_name() {
        let dir = tempfile::tempdir().unwrap();
        // A directory squatting on the target name makes the final rename fail
        std::fs::create_dir_all(dir.path().join("blob").join("inner")).unwrap();

        assert!(write_atomically(dir.path(), "blob", PNG).await.is_err());

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["blob".to_string()]);
        assert!(dir.path().join("blob").is_dir());
    }

    #[tokio::test]
    async fn rejects_non_images_and_anonymous_uploads() {
        let app = TestApp::new();
        let (_, token) = app.signup("uploader");

        let (status, _) = app
            .post_bytes("/uploads", Some(&token), "application/pdf", b"%PDF-1.7".to_vec())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.post_bytes("/uploads", None, "image/png", PNG.to_vec()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = app.get_raw(&format!("/uploads/{}", uuid::Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
