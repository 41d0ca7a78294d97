mod assembler;
mod batcher;
mod cell;
mod config;
mod engine;
mod error;
mod gemini_engine;
mod loader;
mod markdown;
mod pipeline;
mod retry;
mod types;
mod writer;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use config::{BatchConfig, Config};
use engine::Classifier;
use error::PipelineError;
use gemini_engine::{DEFAULT_SYSTEM_PROMPT, GeminiClassifier};
use loader::{LoadError, load_table, supported_extension};
use pipeline::Pipeline;
use retry::RetryingClassifier;
use types::{ErrorResponse, TableContext, TableSummary};
use writer::{WriteError, XLSX_CONTENT_TYPE, output_filename, write_workbook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,keyword_classifier=debug".into());
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        model = %config.model,
        batch_size = config.batch_size,
        max_in_flight = config.max_in_flight,
        max_retries = config.max_retries,
        "Starting keyword classification server"
    );

    let batch_config = BatchConfig::from(&config);
    batch_config.validate()?;

    let gemini = GeminiClassifier::new(config.gemini_config())?;
    let classifier = RetryingClassifier::new(gemini, config.retry_config());

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = router(
        AppState::new(Arc::new(classifier), batch_config),
        config.max_upload_bytes,
    )
    .route("/metrics", get(|| async move { metric_handle.render() }))
    .layer(prometheus_layer)
    .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    classifier: Arc<dyn Classifier>,
    batch_config: BatchConfig,
}

impl AppState {
    fn new(classifier: Arc<dyn Classifier>, batch_config: BatchConfig) -> Self {
        Self {
            classifier,
            batch_config,
        }
    }
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/prompt", get(prompt_handler))
        .route("/preview", post(preview_handler))
        .route("/classify", post(classify_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

#[derive(Error, Debug)]
enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("upload error: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Load(_) => StatusCode::BAD_REQUEST,
            AppError::Multipart(err) => err.status(),
            AppError::Pipeline(err) => match err {
                PipelineError::Configuration(_) => StatusCode::BAD_REQUEST,
                PipelineError::Classification { .. } | PipelineError::MalformedResponse { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                PipelineError::Assembly(_) | PipelineError::IncompleteAssembly { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::Write(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Multipart(_) => "upload",
            AppError::Load(_) => "load",
            AppError::Pipeline(err) => err.kind(),
            AppError::Write(_) => "write",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }
        let rows = match &self {
            AppError::Pipeline(err) => err.rows().map(|rows| [rows.start, rows.end]),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
            rows,
        };
        (status, Json(body)).into_response()
    }
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
    fields: HashMap<String, String>,
}

impl Upload {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    let mut file = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            file = Some((filename, bytes.to_vec()));
        } else {
            fields.insert(name, field.text().await?);
        }
    }

    let (filename, bytes) = file
        .filter(|(filename, _)| !filename.is_empty())
        .ok_or_else(|| AppError::BadRequest("No file selected".to_string()))?;
    if supported_extension(&filename).is_none() {
        return Err(AppError::BadRequest(
            "Unsupported file type. Please upload CSV, XLS, or XLSX files.".to_string(),
        ));
    }

    Ok(Upload {
        filename,
        bytes,
        fields,
    })
}

async fn prompt_handler() -> &'static str {
    DEFAULT_SYSTEM_PROMPT
}

#[tracing::instrument(skip_all)]
async fn preview_handler(multipart: Multipart) -> Result<Json<TableSummary>, AppError> {
    let upload = read_upload(multipart).await?;
    let table = load_table(&upload.filename, &upload.bytes)?;
    tracing::info!(filename = %upload.filename, rows = table.rows.len(), "Upload previewed");
    Ok(Json(TableSummary::from(&table)))
}

#[tracing::instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4().simple()))]
async fn classify_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    counter!("classification_requests_total").increment(1);

    let upload = read_upload(multipart).await?;
    let table = load_table(&upload.filename, &upload.bytes)?;
    tracing::info!(filename = %upload.filename, rows = table.rows.len(), "Processing classification request");

    let batch_config = match upload.field("batch_size") {
        Some(raw) => {
            let batch_size = raw.parse::<usize>().map_err(|_| {
                PipelineError::Configuration(format!("invalid batch_size '{raw}'"))
            })?;
            state.batch_config.with_batch_size(batch_size)
        }
        None => state.batch_config.clone(),
    };

    let mut context = TableContext::from_table(&table);
    context.system_prompt = upload.field("system_prompt").map(str::to_string);
    for column in 0..context.columns.len() {
        if let Some(text) = upload.field(&format!("instruction_{column}")) {
            context.set_instructions(column, text);
        }
    }
    tracing::debug!(
        instruction_columns = context
            .columns
            .iter()
            .filter(|column| column.is_instruction_only())
            .count(),
        custom_prompt = context.system_prompt.is_some(),
        "Classification context prepared"
    );

    let output = Pipeline::new(batch_config, state.classifier.as_ref())
        .run(&table, &context)
        .await?;
    let workbook = write_workbook(&output)?;
    let filename = output_filename(&upload.filename, &chrono::Local::now());
    tracing::info!(%filename, rows = output.len(), "Classification workbook ready");

    let headers = [
        (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
        (header::X_FRAME_OPTIONS, "DENY".to_string()),
        (
            header::REFERRER_POLICY,
            "strict-origin-when-cross-origin".to_string(),
        ),
        (
            header::CONTENT_SECURITY_POLICY,
            "default-src 'self'".to_string(),
        ),
    ];
    Ok((headers, workbook).into_response())
}
