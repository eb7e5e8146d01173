use crate::admission::{AdmissionOutcome, AdmissionPolicy};
use crate::config::{ApiConfig, RemoteConfig, RemoteConfigStore};
use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::gateway::{ObjectTransport, RemoteMedia, UploadGateway};
use crate::media::MediaRecord;
use crate::queue::{MediaQueue, PendingMedia};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
pub struct AppState<T: ObjectTransport> {
    pub queue: Arc<MediaQueue>,
    pub gateway: Arc<UploadGateway<T>>,
    pub admission: Arc<AdmissionPolicy<T>>,
    pub connectivity: Arc<Connectivity>,
    pub remote_config: Arc<RwLock<RemoteConfig>>,
    pub remote_config_store: Arc<RemoteConfigStore>,
    /// Wakes the reconciliation driver when a complete config is saved.
    pub reconcile_trigger: Arc<Notify>,
}

impl<T: ObjectTransport> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            gateway: self.gateway.clone(),
            admission: self.admission.clone(),
            connectivity: self.connectivity.clone(),
            remote_config: self.remote_config.clone(),
            remote_config_store: self.remote_config_store.clone(),
            reconcile_trigger: self.reconcile_trigger.clone(),
        }
    }
}

/// Capture intake request. Payload and thumbnail travel base64-encoded
/// on the wire and are decoded at ingress; only binary is stored.
#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    /// Remote object key; generated from the capture time when absent.
    pub key: Option<String>,
    /// MIME type; `video/*` marks the record as a video.
    pub content_type: String,
    /// Capture timestamp; defaults to now.
    pub captured_at: Option<DateTime<Utc>>,
    /// Base64-encoded media bytes.
    pub payload: String,
    /// Video duration; ignored for photos.
    pub duration_seconds: Option<i64>,
    /// Base64-encoded poster frame; ignored for photos.
    pub thumbnail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub key: String,
    pub status: &'static str,
    /// User-visible notice when the record was buffered instead of
    /// uploaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct MediaListResponse {
    pub items: Vec<RemoteMedia>,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub count: i64,
    pub items: Vec<PendingMedia>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    /// Whether the object is a video, so the derived thumbnail is
    /// cleaned up too.
    #[serde(default)]
    pub video: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConnectivitySignal {
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct RemoteConfigResponse {
    pub complete: bool,
    /// Whether a list call against the store succeeded with this
    /// config. Always false while the config is incomplete.
    pub reachable: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn sync_error_response(e: &SyncError) -> ApiError {
    let (status, code) = match e {
        SyncError::ConfigIncomplete { .. } => {
            (StatusCode::PRECONDITION_FAILED, "CONFIG_INCOMPLETE")
        }
        SyncError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
        SyncError::LocalPersistence(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR")
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: code.to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
            code: "BAD_REQUEST".to_string(),
        }),
    )
}

/// Create the API router
pub fn create_router<T: ObjectTransport + 'static>(
    state: AppState<T>,
    config: &ApiConfig,
) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/media", post(capture_media::<T>).get(list_media::<T>))
        .route("/api/v1/media/pending", get(list_pending::<T>))
        .route("/api/v1/media/:key", delete(delete_media::<T>))
        .route("/api/v1/remote-config", put(put_remote_config::<T>))
        .route("/api/v1/connectivity", post(post_connectivity::<T>))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "snapvault"
    }))
}

/// Capture intake: route a freshly produced record through the
/// admission policy.
#[instrument(skip(state, request))]
async fn capture_media<T: ObjectTransport>(
    State(state): State<AppState<T>>,
    Json(request): Json<CaptureRequest>,
) -> Result<(StatusCode, Json<CaptureResponse>), ApiError> {
    let record = build_record(request)?;
    let key = record.key.clone();

    let config = state.remote_config.read().await.clone();
    let outcome = state
        .admission
        .admit(record, state.connectivity.is_online(), &config)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to admit captured record");
            sync_error_response(&e)
        })?;

    let (status, response) = match outcome {
        AdmissionOutcome::Uploaded => (
            StatusCode::CREATED,
            CaptureResponse {
                key,
                status: "uploaded",
                notice: None,
            },
        ),
        AdmissionOutcome::PendingOffline => (
            StatusCode::ACCEPTED,
            CaptureResponse {
                key,
                status: "pending",
                notice: Some("will upload when a connection is available"),
            },
        ),
        AdmissionOutcome::PendingRetry => (
            StatusCode::ACCEPTED,
            CaptureResponse {
                key,
                status: "pending",
                notice: Some("upload failed, will retry"),
            },
        ),
    };

    Ok((status, Json(response)))
}

/// List remote media with signed access URLs.
#[instrument(skip(state))]
async fn list_media<T: ObjectTransport>(
    State(state): State<AppState<T>>,
) -> Result<Json<MediaListResponse>, ApiError> {
    let config = state.remote_config.read().await.clone();
    let items = state.gateway.list_records(&config).await.map_err(|e| {
        error!(error = %e, "Failed to list remote media");
        sync_error_response(&e)
    })?;

    Ok(Json(MediaListResponse { items }))
}

/// List buffered records awaiting upload (metadata only).
#[instrument(skip(state))]
async fn list_pending<T: ObjectTransport>(
    State(state): State<AppState<T>>,
) -> Result<Json<PendingResponse>, ApiError> {
    let items = state.queue.list_pending().await.map_err(|e| {
        error!(error = %e, "Failed to list pending media");
        sync_error_response(&e)
    })?;

    Ok(Json(PendingResponse {
        count: items.len() as i64,
        items,
    }))
}

/// Delete a remote record (and its thumbnail for videos).
#[instrument(skip(state))]
async fn delete_media<T: ObjectTransport>(
    State(state): State<AppState<T>>,
    Path(key): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    let config = state.remote_config.read().await.clone();
    state
        .gateway
        .delete_record(&key, query.video, &config)
        .await
        .map_err(|e| {
            error!(error = %e, key, "Failed to delete remote media");
            sync_error_response(&e)
        })?;

    Ok(StatusCode::NO_CONTENT)
}

/// Save the remote store configuration. A complete config wakes the
/// reconciliation driver.
#[instrument(skip(state, config))]
async fn put_remote_config<T: ObjectTransport>(
    State(state): State<AppState<T>>,
    Json(config): Json<RemoteConfig>,
) -> Result<Json<RemoteConfigResponse>, ApiError> {
    state.remote_config_store.save(&config).await.map_err(|e| {
        error!(error = %e, "Failed to persist remote config");
        sync_error_response(&e)
    })?;

    let complete = config.is_complete();
    let reachable = complete && state.gateway.verify(&config).await.is_ok();
    *state.remote_config.write().await = config;

    if complete {
        state.reconcile_trigger.notify_one();
    }

    Ok(Json(RemoteConfigResponse {
        complete,
        reachable,
    }))
}

/// External online/offline signal source. A transition to online wakes
/// the reconciliation driver through the connectivity watch.
#[instrument(skip(state))]
async fn post_connectivity<T: ObjectTransport>(
    State(state): State<AppState<T>>,
    Json(signal): Json<ConnectivitySignal>,
) -> StatusCode {
    state.connectivity.set_online(signal.online);
    StatusCode::NO_CONTENT
}

fn build_record(request: CaptureRequest) -> Result<MediaRecord, ApiError> {
    let payload = BASE64
        .decode(request.payload.as_bytes())
        .map_err(|e| bad_request(format!("payload is not valid base64: {e}")))?;

    let captured_at = request.captured_at.unwrap_or_else(Utc::now);
    let is_video = request.content_type.starts_with("video/");
    let key = match request.key {
        Some(key) if !key.trim().is_empty() => {
            // Keys are single path segments: a `/` would make the
            // object unaddressable through the delete route.
            if key.contains('/') {
                return Err(bad_request("key must not contain `/`"));
            }
            key
        }
        _ => default_key(is_video, &request.content_type, captured_at),
    };

    if is_video {
        let thumbnail = request
            .thumbnail
            .map(|t| BASE64.decode(t.as_bytes()))
            .transpose()
            .map_err(|e| bad_request(format!("thumbnail is not valid base64: {e}")))?;

        Ok(MediaRecord::video(
            key,
            request.content_type,
            captured_at,
            payload,
            request.duration_seconds.unwrap_or(0),
            thumbnail,
        ))
    } else {
        Ok(MediaRecord::photo(
            key,
            request.content_type,
            captured_at,
            payload,
        ))
    }
}

/// Generate a unique object key from the capture time:
/// `photo_<millis>_<uuid>.jpeg`. The millis prefix keeps keys sortable
/// by capture time; the UUID guarantees uniqueness.
fn default_key(is_video: bool, content_type: &str, captured_at: DateTime<Utc>) -> String {
    let prefix = if is_video { "video" } else { "photo" };
    format!(
        "{prefix}_{millis}_{id}.{ext}",
        millis = captured_at.timestamp_millis(),
        id = Uuid::new_v4().simple(),
        ext = extension_for_content_type(content_type)
    )
}

fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpeg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/webm" => "webm",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        _ => "bin",
    }
}

/// Start the API server
pub async fn start_api_server<T: ObjectTransport + 'static>(
    state: AppState<T>,
    config: &ApiConfig,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
