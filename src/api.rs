//! HTTP API over the record store.
//!
//! Rows in a collection response carry their index in the full set; writes
//! address records by that index, never by position in the filtered view.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::metadata::{Metadata, MetadataSource};
use crate::records::{Collection, Record};
use crate::store::Store;
use crate::summary::Summary;
use crate::transition::{Selection, Target};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub metadata: Arc<dyn MetadataSource>,
}

impl AppState {
    pub fn new(store: Store, metadata: Arc<dyn MetadataSource>) -> Self {
        Self {
            store: Arc::new(store),
            metadata,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/collections/:name", get(get_collection))
        .route("/api/collections/:name/records", post(create_record))
        .route("/api/collections/:name/records/:index", put(update_record))
        .route("/api/collections/:name/transition", post(transition))
        .route("/api/storage-locations", get(storage_locations))
        .route("/api/field-options/:field", get(field_options))
        .route("/api/summary", get(summary))
        .route("/api/save", post(save_file))
        .route("/api/save/:filename", post(append_row))
        .route("/api/fetch-metadata", post(fetch_metadata))
        .with_state(state)
}

/// Error response for API handlers
#[derive(Debug)]
pub enum ApiError {
    Store(Error),
    /// A transition needs input the caller has not supplied yet.
    NeedsInput {
        field: &'static str,
        storage_locations: Vec<String>,
    },
    /// The request itself could not be extracted (bad JSON, bad path segment).
    Rejected(StatusCode, String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Store(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

fn status_of(e: &Error) -> StatusCode {
    match e {
        Error::InvalidInput(_) | Error::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict { .. } => StatusCode::CONFLICT,
        Error::MissingInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Http(_) => StatusCode::BAD_GATEWAY,
        Error::Io(_) | Error::Csv(_) | Error::SaveFailed { .. } | Error::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Store(e) => {
                let status = status_of(&e);
                if status.is_server_error() {
                    error!("Request failed: {}", e);
                }
                let mut body = json!({ "success": false, "error": e.to_string() });
                if let Error::MissingInput(required) = &e {
                    body["field"] = json!(required.field());
                }
                if let Error::Conflict { current, .. } = &e {
                    body["revision"] = json!(current);
                }
                (status, Json(body)).into_response()
            }
            ApiError::NeedsInput {
                field,
                storage_locations,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "success": false,
                    "error": format!("Missing required input: {}", field),
                    "field": field,
                    "storage_locations": storage_locations,
                })),
            )
                .into_response(),
            ApiError::Rejected(status, message) => {
                warn!("Rejected request: {}", message);
                (status, Json(json!({ "success": false, "error": message }))).into_response()
            }
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn collection(name: &str) -> Result<Collection, ApiError> {
    Ok(name.parse::<Collection>()?)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Row {
    pub index: usize,
    pub record: Record,
}

#[derive(Debug, Serialize)]
pub struct CollectionResponse {
    pub collection: Collection,
    pub columns: Vec<String>,
    pub revision: u64,
    pub total: usize,
    pub query: Option<String>,
    pub rows: Vec<Row>,
}

/// GET /api/collections/:name?q=
pub async fn get_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<CollectionResponse> {
    let Query(query) = query?;
    let collection = collection(&name)?;
    let session = state.store.session(collection, query.q.as_deref()).await?;
    let rows = session
        .view()
        .map(|(index, record)| Row {
            index,
            record: record.clone(),
        })
        .collect();
    Ok(Json(CollectionResponse {
        collection,
        columns: session.columns.clone(),
        revision: session.revision,
        total: session.full().len(),
        query: session.query().map(str::to_owned),
        rows,
    }))
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub fields: Record,
    pub expected_revision: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub success: bool,
    pub index: usize,
    pub revision: u64,
}

/// POST /api/collections/:name/records
pub async fn create_record(
    State(state): State<AppState>,
    Path(name): Path<String>,
    req: Result<Json<WriteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<WriteResponse>), ApiError> {
    let Json(req) = req?;
    let collection = collection(&name)?;
    let committed = state
        .store
        .create(collection, &req.fields, req.expected_revision)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(WriteResponse {
            success: true,
            index: committed.index,
            revision: committed.revision,
        }),
    ))
}

/// PUT /api/collections/:name/records/:index
pub async fn update_record(
    State(state): State<AppState>,
    path: Result<Path<(String, usize)>, PathRejection>,
    req: Result<Json<WriteRequest>, JsonRejection>,
) -> ApiResult<WriteResponse> {
    let Path((name, index)) = path?;
    let Json(req) = req?;
    let collection = collection(&name)?;
    let committed = state
        .store
        .update(collection, index, &req.fields, req.expected_revision)
        .await?;
    Ok(Json(WriteResponse {
        success: true,
        index: committed.index,
        revision: committed.revision,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub target: Target,
    /// Full-set indices of the selected records.
    pub indices: Vec<usize>,
    /// Batch mode: the selection is treated as a batch even with one index.
    #[serde(default)]
    pub batch: bool,
    pub storage_location: Option<String>,
    pub expected_revision: Option<u64>,
}

impl TransitionRequest {
    fn selection(&self) -> Result<Selection, Error> {
        match (self.batch, self.indices.as_slice()) {
            (false, [idx]) => Ok(Selection::Single(*idx)),
            (false, _) => Err(Error::InvalidInput(
                "a single transition takes exactly one index".to_string(),
            )),
            (true, _) => Ok(Selection::Batch(self.indices.clone())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub success: bool,
    pub affected: usize,
    pub source_revision: u64,
    pub target_revision: Option<u64>,
}

/// POST /api/collections/:name/transition
///
/// A storage move without a usable location answers 422 and lists the
/// locations already in use so the client can prompt and retry.
pub async fn transition(
    State(state): State<AppState>,
    Path(name): Path<String>,
    req: Result<Json<TransitionRequest>, JsonRejection>,
) -> ApiResult<TransitionResponse> {
    let Json(req) = req?;
    let source = collection(&name)?;
    let selection = req.selection()?;
    let location = req
        .storage_location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned);

    let result = state
        .store
        .transition(source, req.target, &selection, location, req.expected_revision)
        .await;

    match result {
        Ok(receipt) => Ok(Json(TransitionResponse {
            success: true,
            affected: receipt.affected,
            source_revision: receipt.source_revision,
            target_revision: receipt.target_revision,
        })),
        Err(Error::MissingInput(required)) => {
            info!("Transition from {} needs {}", source, required.field());
            Err(ApiError::NeedsInput {
                field: required.field(),
                storage_locations: state.store.storage_locations().await?,
            })
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Serialize)]
pub struct ValuesResponse {
    pub values: Vec<String>,
}

/// GET /api/storage-locations
pub async fn storage_locations(State(state): State<AppState>) -> ApiResult<ValuesResponse> {
    Ok(Json(ValuesResponse {
        values: state.store.storage_locations().await?,
    }))
}

/// GET /api/field-options/:field
pub async fn field_options(
    State(state): State<AppState>,
    Path(field): Path<String>,
) -> ApiResult<ValuesResponse> {
    Ok(Json(ValuesResponse {
        values: state.store.field_options(&field).await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub year: Option<i32>,
}

/// GET /api/summary?year=
pub async fn summary(
    State(state): State<AppState>,
    query: Result<Query<SummaryQuery>, QueryRejection>,
) -> ApiResult<Summary> {
    let Query(query) = query?;
    Ok(Json(state.store.summary(query.year).await?))
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub filename: String,
    pub content: String,
}

/// POST /api/save
pub async fn save_file(
    State(state): State<AppState>,
    req: Result<Json<SaveRequest>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(req) = req?;
    state.store.save_raw(&req.filename, &req.content).await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/save/:filename
pub async fn append_row(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    row: Result<Json<Record>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(row) = row?;
    state.store.append_row(&filename, &row).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRequest {
    pub target_url: Option<String>,
}

/// POST /api/fetch-metadata
pub async fn fetch_metadata(
    State(state): State<AppState>,
    req: Result<Json<MetadataRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Metadata>), ApiError> {
    let Json(req) = req?;
    let url = req
        .target_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::InvalidInput("URL required".to_string()))?;

    let metadata = state.metadata.fetch(&url).await;
    if !metadata.success {
        warn!("No metadata for {}", url);
        return Ok((StatusCode::BAD_GATEWAY, Json(metadata)));
    }
    Ok((StatusCode::OK, Json(metadata)))
}
