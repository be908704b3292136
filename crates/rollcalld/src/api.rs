//! HTTP API for enrollment and recognition.
//!
//! Payloads are validated here, once, into plain typed values; nothing past
//! the handlers looks at raw fields. Errors map onto the wire as:
//! validation → 400, unknown class or output → 404, anything unexpected →
//! 500 with an opaque body (full detail goes to the log only).

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::gallery::{Gallery, GalleryError};
use crate::pipeline::{PipelineError, RecognitionPipeline};

pub struct AppState {
    pub gallery: Arc<Gallery>,
    pub pipeline: Arc<RecognitionPipeline>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/classes", post(create_class))
        .route("/api/enroll", post(enroll_student_image))
        .route("/api/recognize", post(recognize))
        .route("/api/annotated/:name", get(download_annotated))
        .with_state(state)
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("cannot decode the uploaded image")]
    InvalidImage,
    #[error("internal error")]
    Internal,
}

impl From<GalleryError> for ApiError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::InvalidName { .. } => ApiError::Validation(err.to_string()),
            GalleryError::ClassNotFound(_) => ApiError::NotFound(err.to_string()),
            GalleryError::InvalidImage(_) => ApiError::InvalidImage,
            GalleryError::Io(err) => {
                tracing::error!(error = %err, "gallery io failure");
                ApiError::Internal
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidImage(_) => ApiError::InvalidImage,
            PipelineError::Gallery(err) => err.into(),
            other => {
                tracing::error!(error = %other, "recognition pipeline failure");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) | ApiError::InvalidImage => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Internal details never reach the wire.
        let message = match &self {
            ApiError::Internal => "an error occurred while processing the request".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn health() -> &'static str {
    "rollcalld ok"
}

#[derive(Deserialize)]
pub struct CreateClassRequest {
    pub class_name: Option<String>,
}

async fn create_class(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateClassRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let class_name = payload
        .class_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::Validation("class_name is required".to_string()))?;

    let created = state.gallery.create_class(&class_name).await?;
    if created {
        Ok((
            StatusCode::CREATED,
            Json(json!({ "message": format!("class {class_name:?} registered") })),
        ))
    } else {
        Ok((
            StatusCode::OK,
            Json(json!({ "message": format!("class {class_name:?} already exists") })),
        ))
    }
}

/// Typed view of the enrollment multipart body.
struct EnrollUpload {
    class_name: String,
    student_id: String,
    image: Vec<u8>,
}

async fn enroll_student_image(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = read_enroll_upload(multipart).await?;

    state
        .gallery
        .enroll_image(&upload.class_name, &upload.student_id, &upload.image)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!(
                "student image registered with id {:?} in class {:?}",
                upload.student_id, upload.class_name
            )
        })),
    ))
}

#[derive(Serialize)]
struct RecognizeResponse {
    identities: Vec<String>,
    annotated_image_path: String,
    summary: String,
}

async fn recognize(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let (class_name, image) = read_recognize_upload(multipart).await?;

    let result = state.pipeline.recognize(&image, &class_name).await?;

    if result.faces_detected == 0 {
        return Ok(Json(json!({ "message": "no faces detected" })).into_response());
    }

    Ok(Json(RecognizeResponse {
        identities: result.identities,
        annotated_image_path: format!("/api/annotated/{}", result.output_name),
        summary: result.summary,
    })
    .into_response())
}

async fn download_annotated(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let name = sanitize_output_name(&name)?;

    let path = state.pipeline.output_dir().join(name);
    let bytes = tokio::fs::read(&path).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound(format!("no annotated image named {name:?}"))
        } else {
            tracing::error!(error = %err, path = %path.display(), "annotated image unreadable");
            ApiError::Internal
        }
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    ))
}

/// Annotated outputs are served by bare file name only — nothing resembling
/// a path escapes the output directory.
fn sanitize_output_name(name: &str) -> Result<&str, ApiError> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains("..");
    if plain {
        Ok(name)
    } else {
        Err(ApiError::Validation(format!("invalid image name {name:?}")))
    }
}

async fn read_enroll_upload(multipart: Multipart) -> Result<EnrollUpload, ApiError> {
    let mut class_name = None;
    let mut student_id = None;
    let mut image = None;

    collect_fields(multipart, |name, value| {
        match name {
            "class_name" => class_name = Some(text_field(value)?),
            "id" => student_id = Some(text_field(value)?),
            "image" => image = Some(value),
            _ => {}
        }
        Ok(())
    })
    .await?;

    Ok(EnrollUpload {
        class_name: class_name.ok_or_else(|| missing("class_name"))?,
        student_id: student_id.ok_or_else(|| missing("id"))?,
        image: image.ok_or_else(|| missing("image"))?,
    })
}

async fn read_recognize_upload(multipart: Multipart) -> Result<(String, Vec<u8>), ApiError> {
    let mut class_name = None;
    let mut image = None;

    collect_fields(multipart, |name, value| {
        match name {
            "class_name" => class_name = Some(text_field(value)?),
            "image" => image = Some(value),
            _ => {}
        }
        Ok(())
    })
    .await?;

    Ok((
        class_name.ok_or_else(|| missing("class_name"))?,
        image.ok_or_else(|| missing("image"))?,
    ))
}

/// Drain a multipart body, handing each known field's bytes to `store`.
async fn collect_fields<F>(mut multipart: Multipart, mut store: F) -> Result<(), ApiError>
where
    F: FnMut(&str, Vec<u8>) -> Result<(), ApiError>,
{
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::Validation(format!("malformed multipart body: {err}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::Validation(format!("unreadable field {name:?}: {err}")))?;
        store(&name, bytes.to_vec())?;
    }
    Ok(())
}

fn text_field(bytes: Vec<u8>) -> Result<String, ApiError> {
    let text = String::from_utf8(bytes)
        .map_err(|_| ApiError::Validation("text field is not valid UTF-8".to_string()))?;
    if text.is_empty() {
        return Err(ApiError::Validation("text field is empty".to_string()));
    }
    Ok(text)
}

fn missing(field: &str) -> ApiError {
    ApiError::Validation(format!("{field} is required"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_accepts_plain_names() {
        assert!(sanitize_output_name("abc-123.jpg").is_ok());
        assert!(sanitize_output_name("5f0c.jpg").is_ok());
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        for bad in ["", "..", "../etc/passwd", "a/b.jpg", "a\\b.jpg", ".hidden"] {
            assert!(sanitize_output_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_gallery_errors_map_to_statuses() {
        let not_found: ApiError = GalleryError::ClassNotFound("CS101".into()).into();
        assert!(matches!(not_found, ApiError::NotFound(_)));

        let invalid: ApiError = GalleryError::InvalidName {
            field: "class name",
            value: "a/b".into(),
        }
        .into();
        assert!(matches!(invalid, ApiError::Validation(_)));
    }

    #[test]
    fn test_text_field_rejects_empty_and_binary() {
        assert!(text_field(b"CS101".to_vec()).is_ok());
        assert!(text_field(Vec::new()).is_err());
        assert!(text_field(vec![0xff, 0xfe]).is_err());
    }
}
