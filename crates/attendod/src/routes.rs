use crate::error::AppError;
use crate::service::{AttendanceService, FaceListing, Health, Recognition, SessionClosed};
use attendo_core::SessionId;
use attendo_store::{DailySummary, ExportDocument};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

/// Build the API router.
pub fn router(service: AttendanceService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/recognize", post(recognize))
        .route("/faces", get(list_faces).post(enroll))
        .route("/faces/{label}", delete(remove_face))
        .route("/sessions", post(start_session))
        .route("/sessions/{id}", delete(end_session))
        .route("/statistics", get(statistics))
        .route("/export", get(export))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

#[derive(Deserialize)]
struct RecognizeRequest {
    image: String,
    #[serde(default)]
    session_id: Option<SessionId>,
}

#[derive(Deserialize)]
struct EnrollRequest {
    name: String,
    image: String,
}

#[derive(Serialize)]
struct SessionStarted {
    session_id: SessionId,
}

#[derive(Deserialize)]
struct StatisticsQuery {
    /// `YYYY-MM-DD`; today (UTC) when absent.
    date: Option<NaiveDate>,
}

#[derive(Serialize)]
struct Removed {
    removed: String,
}

async fn health(State(service): State<AttendanceService>) -> Json<Health> {
    Json(service.health().await)
}

async fn recognize(
    State(service): State<AttendanceService>,
    Json(req): Json<RecognizeRequest>,
) -> Result<Json<Recognition>, AppError> {
    let session = req.session_id.unwrap_or(SessionId::DEFAULT);
    Ok(Json(service.recognize(session, &req.image).await?))
}

async fn enroll(
    State(service): State<AttendanceService>,
    Json(req): Json<EnrollRequest>,
) -> Result<(StatusCode, Json<FaceListing>), AppError> {
    let face = service.enroll(&req.name, &req.image).await?;
    Ok((StatusCode::CREATED, Json(face)))
}

async fn list_faces(State(service): State<AttendanceService>) -> Json<Vec<FaceListing>> {
    Json(service.list_faces().await)
}

async fn remove_face(
    State(service): State<AttendanceService>,
    Path(label): Path<String>,
) -> Result<Json<Removed>, AppError> {
    service.remove(&label).await?;
    Ok(Json(Removed { removed: label }))
}

async fn start_session(State(service): State<AttendanceService>) -> (StatusCode, Json<SessionStarted>) {
    let session_id = service.start_session().await;
    (StatusCode::CREATED, Json(SessionStarted { session_id }))
}

async fn end_session(
    State(service): State<AttendanceService>,
    Path(id): Path<String>,
) -> Result<Json<SessionClosed>, AppError> {
    let id: SessionId = id
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid session id {id:?}")))?;
    Ok(Json(service.end_session(id).await?))
}

async fn statistics(
    State(service): State<AttendanceService>,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<DailySummary>, AppError> {
    Ok(Json(service.statistics(query.date).await?))
}

async fn export(State(service): State<AttendanceService>) -> Result<impl IntoResponse, AppError> {
    let doc: ExportDocument = service.export().await?;
    let filename = format!(
        "attachment; filename=\"face_records_export_{}.json\"",
        doc.export_time.format("%Y%m%d_%H%M%S")
    );
    Ok(([(header::CONTENT_DISPOSITION, filename)], Json(doc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{face, fixture, png_data_url, Fixture};
    use attendo_core::UnknownPolicy;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(f: &Fixture, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let app = router(f.service.clone());
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture(UnknownPolicy::Ignore).await;
        let (status, body) = send(&f, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["registered_faces"], 0);
    }

    #[tokio::test]
    async fn test_enroll_recognize_and_list() {
        let f = fixture(UnknownPolicy::Ignore).await;
        let image = png_data_url();
        f.extractor.set_faces(vec![face(&[0.1, 0.2, 0.3])]);

        let (status, body) = send(&f, "POST", "/faces", Some(json!({"name": "Alice", "image": image}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "Alice");

        let (status, _) = send(&f, "POST", "/faces", Some(json!({"name": "Alice", "image": image}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&f, "POST", "/recognize", Some(json!({"image": image}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["faces"][0]["name"], "Alice");
        assert!(body["faces"][0].get("bbox").is_some());
        assert_eq!(body["present"], json!(["Alice"]));

        let (status, body) = send(&f, "GET", "/faces", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enroll_without_face_is_bad_request() {
        let f = fixture(UnknownPolicy::Ignore).await;
        let (status, body) = send(
            &f,
            "POST",
            "/faces",
            Some(json!({"name": "Bob", "image": png_data_url()})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "no_face");
    }

    #[tokio::test]
    async fn test_bad_image_is_bad_request() {
        let f = fixture(UnknownPolicy::Ignore).await;
        let (status, body) = send(&f, "POST", "/recognize", Some(json!({"image": "%%%"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_input");
    }

    #[tokio::test]
    async fn test_remove_unknown_label_is_not_found() {
        let f = fixture(UnknownPolicy::Ignore).await;
        let (status, body) = send(&f, "DELETE", "/faces/nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let f = fixture(UnknownPolicy::Ignore).await;
        let (status, body) = send(&f, "POST", "/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["session_id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &f,
            "POST",
            "/recognize",
            Some(json!({"image": png_data_url(), "session_id": id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["present"], json!([]));

        let (status, _) = send(&f, "DELETE", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&f, "DELETE", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "unknown_session");

        let (status, _) = send(&f, "DELETE", "/sessions/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_statistics_and_export() {
        let f = fixture(UnknownPolicy::Ignore).await;
        let (status, body) = send(&f, "GET", "/statistics?date=1970-01-01", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["today_count"], 0);
        assert!(body["person_stats"].as_array().unwrap().is_empty());

        let app = router(f.service.clone());
        let response = app
            .oneshot(Request::get("/export").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"face_records_export_"));
    }
}
