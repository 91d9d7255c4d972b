use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::error::{ChatbotError, Result};
use crate::evaluation::evaluate_accuracy;
use crate::indexer::source::{load_sheet_url, PublishedSheet};
use crate::indexer::{replace_catalog, IngestOptions, IngestReport};
use crate::models::{AccEval, AccuracyResponse, UploadQuery, UploadResponse, UserRequest};
use crate::proxy::{http_client, ChatCompletionClient};
use crate::rag::DocumentStore;
use crate::responder::Responder;
use crate::retry::RetryPolicy;

pub struct AppState {
    pub settings: Arc<Settings>,
    pub responder: Responder,
    pub http: reqwest::Client,
    pub retry: RetryPolicy,
}

impl AppState {
    /// Connect the store and the provider clients described by `settings`.
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let http = http_client(&settings.openai)?;
        let retry = RetryPolicy::from(&settings.retry);

        let store = DocumentStore::from_settings(&settings, http.clone()).await?;
        let completer = ChatCompletionClient::new(http.clone(), &settings.openai, retry)?;
        let responder = Responder::new(store, Arc::new(completer), settings.retrieval.top_k);

        Ok(Self {
            settings: Arc::new(settings),
            responder,
            http,
            retry,
        })
    }
}

impl IntoResponse for ChatbotError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatbotError::Usage(_) => StatusCode::BAD_REQUEST,
            ChatbotError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatbotError::TransientService { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ChatbotError::PermanentService { .. } => StatusCode::BAD_GATEWAY,
            ChatbotError::Database(_) | ChatbotError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/upload_data/upload", post(upload_handler))
        .route("/api/generate_text/gen_response", post(gen_response_handler))
        .route("/api/generate_text/acc_eval", post(acc_eval_handler))
        .route("/api/monitoring/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Replace the whole catalog with the rows of a published sheet.
async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
) -> Result<Json<UploadResponse>> {
    if query.url_str.is_empty() {
        return Err(ChatbotError::usage("No input provided. Please provide a valid URL."));
    }

    let sheet = PublishedSheet::parse(&query.url_str)?
        .fetch(&state.http, &state.retry)
        .await?;

    let options = IngestOptions::from(&state.settings.ingest);
    let report = replace_catalog(state.responder.store(), &sheet, &options).await?;

    Ok(Json(UploadResponse {
        message: upload_message(&report).to_string(),
        rows_total: report.rows_total,
        ingested: report.ingested(),
        skipped: report.skipped(),
    }))
}

fn upload_message(report: &IngestReport) -> &'static str {
    match (report.nothing_to_do(), report.rows_failed) {
        (false, _) => "File uploaded and processed successfully.",
        (true, 0) => "File processed, but it contained no valid rows.",
        (true, _) => "File processed, but no row could be embedded. See the server logs.",
    }
}

async fn gen_response_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UserRequest>,
) -> Result<Json<String>> {
    let reply = state.responder.respond(&request.input_user).await?;
    Ok(Json(reply))
}

async fn acc_eval_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AccEval>,
) -> Result<Json<AccuracyResponse>> {
    if request.path_url.is_empty() {
        tracing::info!("Input required");
        return Err(ChatbotError::usage("No input provided. Please provide a valid input."));
    }

    tracing::info!("Loading data from {}", request.path_url);
    let sheet = load_sheet_url(&request.path_url, &state.http, &state.retry).await?;

    let report = evaluate_accuracy(
        state.responder.store(),
        &sheet,
        &state.settings.evaluation,
        state.responder.top_k(),
    )
    .await?;

    Ok(Json(match report.accuracy() {
        Some(accuracy) => AccuracyResponse { accuracy, message: None },
        None => AccuracyResponse {
            accuracy: 0.0,
            message: Some("No valid rows found to evaluate.".to_string()),
        },
    }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let table = state.responder.store().schema_exists().await;
    if let Err(e) = &table {
        tracing::warn!("Health check could not reach the store: {}", e);
    }

    Json(serde_json::json!({
        "status": if table.is_ok() { "healthy" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339(),
        "services": {
            "database": table.is_ok(),
            "documents_table": table.unwrap_or(false),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, Metadata};
    use crate::rag::memory::InMemoryVectorStore;
    use crate::rag::vector_store::{DeleteSelector, Neighbor, UpsertReport, VectorBackend};
    use crate::testing::{KeywordEmbedder, RecordingCompleter};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    /// A database that refuses every connection.
    struct UnreachableBackend;

    fn refused() -> ChatbotError {
        ChatbotError::Storage("connection refused".to_string())
    }

    #[async_trait]
    impl VectorBackend for UnreachableBackend {
        async fn ensure_schema(&self) -> Result<()> {
            Err(refused())
        }

        async fn schema_exists(&self) -> Result<bool> {
            Err(refused())
        }

        async fn drop_schema(&self) -> Result<()> {
            Err(refused())
        }

        async fn upsert(&self, _: &[Document]) -> Result<UpsertReport> {
            Err(refused())
        }

        async fn nearest(&self, _: &[f32], _: usize, _: Option<&Metadata>) -> Result<Vec<Neighbor>> {
            Err(refused())
        }

        async fn delete(&self, _: &DeleteSelector) -> Result<u64> {
            Err(refused())
        }
    }

    fn app_with(backend: Arc<dyn VectorBackend>, completer: Arc<RecordingCompleter>) -> Router {
        let settings = Settings::defaults().unwrap();
        let store = DocumentStore::new(Arc::new(KeywordEmbedder::catalog()), backend);
        let state = AppState {
            responder: Responder::new(store, completer, settings.retrieval.top_k),
            settings: Arc::new(settings),
            http: reqwest::Client::new(),
            retry: RetryPolicy::none(),
        };
        router(Arc::new(state))
    }

    async fn app(documents: &[Document]) -> (Router, Arc<InMemoryVectorStore>, Arc<RecordingCompleter>) {
        let backend = Arc::new(InMemoryVectorStore::new(4));
        backend.ensure_schema().await.unwrap();
        backend.upsert(documents).await.unwrap();
        let completer = Arc::new(RecordingCompleter::new("Có, chúng tôi có lọc dầu Toyota."));
        (app_with(backend.clone(), completer.clone()), backend, completer)
    }

    fn toyota() -> Document {
        Document {
            id: Uuid::new_v4(),
            metadata: Metadata::new(),
            contents: "Lọc dầu Toyota".to_string(),
            embedding: vec![1.0, 0.0, 0.0, 0.0],
        }
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_gen_response_returns_completion_string() {
        let (app, _, completer) = app(&[toyota()]).await;
        let response = app
            .oneshot(post_json("/api/generate_text/gen_response", json!({"input_user": "Lọc dầu Toyota"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!("Có, chúng tôi có lọc dầu Toyota."));
        assert_eq!(completer.calls(), 1);
    }

    #[tokio::test]
    async fn test_gen_response_empty_input_is_400() {
        let (app, _, completer) = app(&[toyota()]).await;
        let response = app
            .oneshot(post_json("/api/generate_text/gen_response", json!({"input_user": ""})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["detail"].as_str().unwrap().contains("No input"));
        assert_eq!(completer.calls(), 0);
    }

    #[tokio::test]
    async fn test_gen_response_without_documents_is_404() {
        let (app, _, completer) = app(&[]).await;
        let response = app
            .oneshot(post_json("/api/generate_text/gen_response", json!({"input_user": "Lọc dầu Toyota"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(completer.calls(), 0);
    }

    #[tokio::test]
    async fn test_upload_rejects_invalid_url_without_touching_store() {
        let (app, backend, _) = app(&[toyota()]).await;
        let response = app
            .oneshot(
                Request::post("/api/upload_data/upload?url_str=https://example.com/sheet")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_upload_requires_url() {
        let (app, _, _) = app(&[]).await;
        let response = app
            .oneshot(Request::post("/api/upload_data/upload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_acc_eval_rejects_empty_and_malformed_urls() {
        let (app, _, _) = app(&[]).await;
        let empty = app
            .clone()
            .oneshot(post_json("/api/generate_text/acc_eval", json!({"path_url": ""})))
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

        let malformed = app
            .oneshot(post_json("/api/generate_text/acc_eval", json!({"path_url": "not a sheet"})))
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_table() {
        let (app, _, _) = app(&[]).await;
        let response = app
            .oneshot(Request::get("/api/monitoring/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["documents_table"], true);
    }

    #[tokio::test]
    async fn test_health_degraded_without_database() {
        let app = app_with(Arc::new(UnreachableBackend), Arc::new(RecordingCompleter::new("")));
        let response = app
            .oneshot(Request::get("/api/monitoring/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["services"]["database"], false);
        assert_eq!(body["services"]["documents_table"], false);
    }

    #[test]
    fn test_upload_message_tells_empty_rows_from_embedding_failures() {
        let empty = IngestReport { rows_total: 2, rows_empty: 2, ..IngestReport::default() };
        assert!(upload_message(&empty).contains("no valid rows"));

        let failed = IngestReport { rows_total: 2, rows_failed: 2, ..IngestReport::default() };
        assert!(upload_message(&failed).contains("no row could be embedded"));

        let ingested = IngestReport {
            rows_total: 2,
            upsert: Some(UpsertReport { upserted: 2, skipped: 0 }),
            ..IngestReport::default()
        };
        assert_eq!(upload_message(&ingested), "File uploaded and processed successfully.");
    }

    #[test]
    fn test_error_status_mapping() {
        let transient = ChatbotError::TransientService { service: "embeddings", message: "429".into() };
        assert_eq!(transient.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
        let permanent = ChatbotError::PermanentService { service: "completion", message: "401".into() };
        assert_eq!(permanent.into_response().status(), StatusCode::BAD_GATEWAY);
        let storage = ChatbotError::Storage("gone".into());
        assert_eq!(storage.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
