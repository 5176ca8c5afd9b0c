#![forbid(unsafe_code)]

//! HTTP backend: accepts image/video uploads, lists them and serves the
//! stored files. It holds no catalog state.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use anistream_tools::{
    config::{DEFAULT_CONFIG_PATH, RuntimeConfig, load_runtime_config_from},
    upload::{
        MediaKind, PendingUpload, StoredUpload, UploadError, UploadedFile, ensure_upload_dirs,
        list_uploads, stored_path,
    },
};
use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path as AxumPath, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::{fs::File, signal, task};
use tokio_util::io::ReaderStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve anistream uploads.")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the env config file")]
    config: PathBuf,
}

#[derive(Clone)]
struct AppState {
    config: Arc<RuntimeConfig>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::StorageWriteFailed(_) => {
                error!(error = %err, "upload write failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_runtime_config_from(&cli.config)?;
    ensure_upload_dirs(&config.upload_root).await?;
    info!(upload_root = %config.upload_root.display(), "upload directories ready");

    let addr = SocketAddr::new(
        config
            .host
            .parse()
            .with_context(|| format!("parsing host {}", config.host))?,
        config.port,
    );

    let app = router(AppState {
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(%addr, "upload server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running upload server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/upload/{kind}",
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/uploads", get(list_stored))
        .route("/uploads/{kind}/{file}", get(download_stored))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

fn parse_kind(segment: &str) -> ApiResult<MediaKind> {
    MediaKind::from_segment(segment)
        .ok_or_else(|| ApiError::not_found(format!("unknown media kind: {segment}")))
}

/// Stores the first multipart field that carries a file name.
async fn upload_file(
    State(state): State<AppState>,
    AxumPath(kind): AxumPath<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadedFile>> {
    let kind = parse_kind(&kind)?;
    let config = &state.config;

    while let Some(mut field) = multipart.next_field().await.map_err(|err| ApiError {
        status: err.status(),
        message: err.body_text(),
    })? {
        let Some(original_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_owned);

        let mut pending = PendingUpload::create(
            &config.upload_root,
            &config.public_base_url,
            kind,
            &original_name,
            content_type.as_deref(),
            &config.limits,
        )
        .await?;

        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(err) = pending.write_chunk(&chunk).await {
                        pending.abort().await;
                        return Err(err.into());
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    pending.abort().await;
                    return Err(ApiError {
                        status: err.status(),
                        message: err.body_text(),
                    });
                }
            }
        }

        let uploaded = pending.finish().await?;
        info!(
            %kind,
            url = %uploaded.url,
            size_bytes = uploaded.size_bytes,
            episode = ?uploaded.detected_episode_number,
            "upload stored"
        );
        return Ok(Json(uploaded));
    }

    Err(ApiError::bad_request("no file field in upload"))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    kind: Option<String>,
}

async fn list_stored(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<StoredUpload>>> {
    let kind = match query.kind.as_deref() {
        Some(segment) => Some(
            MediaKind::from_segment(segment)
                .ok_or_else(|| ApiError::bad_request(format!("unknown media kind: {segment}")))?,
        ),
        None => None,
    };

    let config = state.config.clone();
    let uploads = task::spawn_blocking(move || {
        list_uploads(&config.upload_root, &config.public_base_url, kind)
    })
    .await
    .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
    .map_err(|err| ApiError::internal(err.to_string()))?;

    Ok(Json(uploads))
}

async fn download_stored(
    State(state): State<AppState>,
    AxumPath((kind, file)): AxumPath<(String, String)>,
) -> ApiResult<Response> {
    let kind = parse_kind(&kind)?;
    let path = stored_path(&state.config.upload_root, kind, &file)
        .ok_or_else(|| ApiError::not_found("file not found"))?;
    stream_file(path).await
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);
    let mut response = body.into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first() {
        if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_errors_map_to_http_statuses() {
        let unsupported: ApiError = UploadError::UnsupportedMediaType("text/plain".into()).into();
        assert_eq!(unsupported.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let too_large: ApiError = UploadError::PayloadTooLarge { limit: 10 }.into();
        assert_eq!(too_large.status, StatusCode::PAYLOAD_TOO_LARGE);

        let io = std::io::Error::other("disk full");
        let failed: ApiError = UploadError::StorageWriteFailed(io).into();
        assert_eq!(failed.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(failed.message.contains("disk full"));
    }

    #[test]
    fn unknown_kind_is_not_found() {
        assert_eq!(parse_kind("audio").unwrap_err().status, StatusCode::NOT_FOUND);
        assert_eq!(parse_kind("videos").unwrap(), MediaKind::Video);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = stream_file(dir.path().join("absent.mp4")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
