//! HTTP boundary.
//!
//! Exposes evidence assembly and classification over a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/evidence` | Similar incidents for `{question}` |
//! | `POST` | `/classify` | Classification for `{text, taxonomy}` |
//!
//! # Error Contract
//!
//! Errors are structured JSON, never a raw stack trace:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::classify::Classifier;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::evidence::EvidenceAssembler;
use crate::generation;
use crate::index::EmbeddingIndex;
use crate::migrate;
use crate::resolver::EntityResolver;

#[derive(Clone)]
struct AppState {
    assembler: Arc<EvidenceAssembler>,
    classifier: Arc<Classifier>,
}

/// Start the HTTP server on `[server].bind`. Provider and generator
/// credentials are resolved here, so a missing key fails startup instead of
/// the first request.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let provider = embedding::create_provider(&config.embedding, config.retry)?;
    let provider: Arc<dyn embedding::EmbeddingProvider> = Arc::from(provider);
    let generator: Arc<dyn generation::TextGenerator> =
        Arc::from(generation::create_generator(&config.generation, config.retry)?);

    let index = EmbeddingIndex::new(pool.clone());
    let resolver = EntityResolver::new(pool, config.retrieval.join_batch_size);

    let assembler = Arc::new(EvidenceAssembler::new(
        Arc::clone(&provider),
        index.clone(),
        resolver.clone(),
        config.retrieval.clone(),
    ));
    let classifier = Arc::new(Classifier::new(
        EvidenceAssembler::new(provider, index, resolver.clone(), config.retrieval.clone()),
        resolver,
        generator,
        config.generation.concurrency,
    ));

    let app = router(AppState {
        assembler,
        classifier,
    });

    let bind_addr = &config.server.bind;
    println!("Server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/evidence", post(handle_evidence))
        .route("/classify", post(handle_classify))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map an operation error to a status without leaking internals: unknown
/// taxonomy becomes 404, everything else 500 with the message only.
fn classify_error(err: anyhow::Error) -> AppError {
    let message = err.to_string();
    if message.contains("not found") {
        not_found(message)
    } else {
        internal(message)
    }
}

/// Requires a present, non-blank string field.
fn required_field<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, AppError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(bad_request(format!("{} must not be empty", name))),
    }
}

// ============ Handlers ============

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
struct EvidenceRequest {
    question: Option<String>,
    #[serde(default)]
    include_classifications: bool,
    limit: Option<usize>,
    report_text_depth: Option<usize>,
}

async fn handle_evidence(
    State(state): State<AppState>,
    Json(request): Json<EvidenceRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let question = required_field(&request.question, "question")?;

    let incidents = state
        .assembler
        .find_similar_incidents_by_text(
            question,
            request.include_classifications,
            request.limit.unwrap_or(10),
            request.report_text_depth.unwrap_or(0),
        )
        .await
        .map_err(classify_error)?;

    Ok(Json(serde_json::json!({ "incidents": incidents })))
}

#[derive(Deserialize)]
struct ClassifyRequest {
    text: Option<String>,
    taxonomy: Option<String>,
    /// When set, classify these attributes independently and merge.
    attributes: Option<Vec<String>>,
}

async fn handle_classify(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let text = required_field(&request.text, "text")?;
    let taxonomy = required_field(&request.taxonomy, "taxonomy")?;

    match &request.attributes {
        None => {
            let outcome = state
                .classifier
                .classify(text, taxonomy)
                .await
                .map_err(classify_error)?;
            Ok(Json(serde_json::json!({
                "classification": outcome.result.classification,
                "explanation": outcome.result.explanation,
                "confidence": outcome.result.confidence,
            })))
        }
        Some(attributes) => {
            let outcomes = state
                .classifier
                .classify_attributes(text, taxonomy, attributes)
                .await
                .map_err(classify_error)?;
            let merged = crate::classify::merge_attribute_outcomes(taxonomy, &outcomes);
            let explanations: Vec<serde_json::Value> = outcomes
                .iter()
                .map(|o| {
                    serde_json::json!({
                        "short_name": o.short_name,
                        "explanation": o.result.explanation,
                    })
                })
                .collect();
            Ok(Json(serde_json::json!({
                "classification": merged,
                "explanations": explanations,
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embedding::DisabledProvider;
    use axum::body::Body;
    use axum::http::Request;
    use sqlx::SqlitePool;
    use tower::ServiceExt;

    struct StubGenerator;

    #[async_trait::async_trait]
    impl generation::TextGenerator for StubGenerator {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("no generation configured")
        }
        fn model_name(&self) -> &str {
            "stub"
        }
    }

    async fn test_app() -> Router {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        let provider: Arc<dyn embedding::EmbeddingProvider> = Arc::new(DisabledProvider);
        let index = EmbeddingIndex::new(pool.clone());
        let resolver = EntityResolver::new(pool, 10);
        let retrieval = RetrievalConfig::default();

        let assembler = Arc::new(EvidenceAssembler::new(
            Arc::clone(&provider),
            index.clone(),
            resolver.clone(),
            retrieval.clone(),
        ));
        let classifier = Arc::new(Classifier::new(
            EvidenceAssembler::new(provider, index, resolver.clone(), retrieval),
            resolver,
            Arc::new(StubGenerator),
            1,
        ));

        router(AppState {
            assembler,
            classifier,
        })
    }

    async fn post_json(app: Router, path: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_reports_version() {
        let response = test_app()
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_evidence_missing_question_is_bad_request() {
        let (status, json) = post_json(test_app().await, "/evidence", "{}").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");
        assert_eq!(json["error"]["message"], "question must not be empty");
    }

    #[tokio::test]
    async fn test_evidence_blank_question_is_bad_request() {
        let (status, json) =
            post_json(test_app().await, "/evidence", r#"{"question": "   "}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_classify_missing_fields_are_bad_request() {
        let (status, json) =
            post_json(test_app().await, "/classify", r#"{"taxonomy": "MIT"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["message"], "text must not be empty");

        let (status, json) =
            post_json(test_app().await, "/classify", r#"{"text": "a robot fell over"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["message"], "taxonomy must not be empty");
    }

    #[tokio::test]
    async fn test_classify_unknown_taxonomy_is_not_found() {
        let (status, json) = post_json(
            test_app().await,
            "/classify",
            r#"{"text": "a robot fell over", "taxonomy": "NOPE"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
        assert!(json["error"]["message"].as_str().unwrap().contains("NOPE"));
    }

    #[tokio::test]
    async fn test_internal_error_body_is_structured() {
        // The disabled embedding provider fails the search; the response must
        // still be the structured error shape, not a bare string.
        let (status, json) = post_json(
            test_app().await,
            "/evidence",
            r#"{"question": "a robot fell over"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["code"], "internal");
        assert!(json["error"]["message"].is_string());
    }
}
