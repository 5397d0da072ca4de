use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use permit_storage::{PermitStore, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::fallback::SqliteFallback;
use crate::logging::{LogLevel, SyncLogger};
use crate::sync::SyncService;

pub const SUCCESS_MESSAGE: &str = "Permit data processed successfully";
pub const INTERNAL_ERROR: &str = "Internal server error";
pub const METHOD_NOT_ALLOWED: &str = "Method not allowed";

#[derive(Clone)]
pub struct AppState {
    service: Arc<SyncService>,
    logger: SyncLogger,
    process_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(
        service: Arc<SyncService>,
        logger: SyncLogger,
        process_timeout: Option<Duration>,
    ) -> Self {
        Self {
            service,
            logger,
            process_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SubmissionResponse {
    fn accepted(permit_id: Option<String>) -> Self {
        Self {
            success: true,
            message: Some(SUCCESS_MESSAGE.to_string()),
            permit_id,
            errors: Vec::new(),
        }
    }

    fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            message: None,
            permit_id: None,
            errors,
        }
    }
}

type Reply = (StatusCode, Json<SubmissionResponse>);

pub fn router(state: AppState, path: &str) -> Router {
    Router::new()
        .route(path, post(submit_permit).fallback(method_not_allowed))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

async fn submit_permit(State(state): State<AppState>, body: Bytes) -> Reply {
    handle_submission(&state, &body).await
}

async fn method_not_allowed() -> Reply {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(SubmissionResponse::failure(vec![METHOD_NOT_ALLOWED.to_string()])),
    )
}

/// Decode the body and run it through the sync service. Unexpected failures
/// are logged and answered with a generic 500; their detail is not echoed.
pub async fn handle_submission(state: &AppState, body: &[u8]) -> Reply {
    let candidate: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => {
            state.logger.emit(LogLevel::Error, || {
                error!(event = "invalid_body", error = %err, bytes = body.len())
            });
            return internal_error();
        }
    };

    let service = state.service.clone();
    let task = tokio::spawn(async move { service.process(&candidate).await });
    let joined = match state.process_timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                state.logger.emit(LogLevel::Error, || {
                    error!(event = "process_timeout", timeout = ?limit)
                });
                return internal_error();
            }
        },
        None => task.await,
    };

    let result = match joined {
        Ok(result) => result,
        Err(err) => {
            state.logger.emit(LogLevel::Error, || {
                error!(event = "process_panicked", error = %err)
            });
            return internal_error();
        }
    };

    state.logger.emit(LogLevel::Info, || {
        info!(
            event = "permit_processed",
            outcome = %result.outcome,
            permit_id = result.permit_id.as_deref().unwrap_or("-"),
            error_count = result.errors.len()
        )
    });

    if result.success {
        (
            StatusCode::OK,
            Json(SubmissionResponse::accepted(result.permit_id)),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(SubmissionResponse::failure(result.errors)),
        )
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid listen address {addr}: {source}")]
    InvalidAddr {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("failed to open fallback database {database}: {source}")]
    Storage {
        database: String,
        source: StorageError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Open the fallback store, bind the listener and serve until `shutdown`
/// resolves.
pub async fn serve<F>(
    config: &Config,
    logger: SyncLogger,
    shutdown: F,
) -> Result<(), StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|source| StartupError::InvalidAddr {
            addr: config.addr.clone(),
            source,
        })?;

    let store = PermitStore::open(&config.database).map_err(|source| StartupError::Storage {
        database: config.database.clone(),
        source,
    })?;

    let service = Arc::new(SyncService::new(
        config.channel_set(),
        Arc::new(SqliteFallback::new(store)),
        logger.clone(),
    ));
    let app = router(
        AppState::new(service, logger.clone(), config.process_timeout),
        &config.path,
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    logger.emit(LogLevel::Info, || {
        info!(
            event = "server_start",
            addr = %addr,
            path = %config.path,
            level = %config.log_level
        )
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(StartupError::Serve)
}

fn internal_error() -> Reply {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(SubmissionResponse::failure(vec![INTERNAL_ERROR.to_string()])),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelError, ChannelSet, DispatchEnvelope, TransportChannel};
    use crate::fallback::{FallbackError, FallbackStore};
    use crate::logging::tests::CaptureWriter;
    use async_trait::async_trait;
    use permit_core::PermitRecord;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct FixedChannel {
        accept: bool,
    }

    #[async_trait]
    impl TransportChannel for FixedChannel {
        async fn send(&self, _envelope: &DispatchEnvelope) -> Result<(), ChannelError> {
            if self.accept {
                Ok(())
            } else {
                Err(ChannelError::Rejected("stream throttled".to_string()))
            }
        }
    }

    struct SlowChannel;

    #[async_trait]
    impl TransportChannel for SlowChannel {
        async fn send(&self, _envelope: &DispatchEnvelope) -> Result<(), ChannelError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    struct FixedFallback {
        accept: bool,
    }

    #[async_trait]
    impl FallbackStore for FixedFallback {
        async fn upsert(&self, _record: &PermitRecord) -> Result<(), FallbackError> {
            if self.accept {
                Ok(())
            } else {
                Err(FallbackError::Unavailable("database offline".to_string()))
            }
        }
    }

    fn state_with(
        channels: ChannelSet,
        fallback_ok: bool,
        logger: SyncLogger,
        timeout: Option<Duration>,
    ) -> AppState {
        let service = SyncService::new(
            channels,
            Arc::new(FixedFallback {
                accept: fallback_ok,
            }),
            logger.clone(),
        );
        AppState::new(Arc::new(service), logger, timeout)
    }

    fn uniform(accept: bool) -> ChannelSet {
        ChannelSet::new(
            Arc::new(FixedChannel { accept }),
            Arc::new(FixedChannel { accept }),
            Arc::new(FixedChannel { accept }),
        )
    }

    fn permit_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "202305106789",
            "application_number": "202305106789",
            "permit_type": "sign - erect",
            "status": "filed",
            "filed_date": "2023-05-10",
            "description": "install projecting sign",
            "location": {
                "address": "500 Castro St",
                "block": "2623",
                "lot": "014",
                "zipcode": "94114"
            }
        }))
        .expect("body")
    }

    #[tokio::test]
    async fn clean_submission_echoes_permit_id() {
        let state = state_with(uniform(true), true, SyncLogger::silent(), None);

        let (status, Json(response)) = handle_submission(&state, &permit_body()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            response,
            SubmissionResponse {
                success: true,
                message: Some(SUCCESS_MESSAGE.to_string()),
                permit_id: Some("202305106789".to_string()),
                errors: Vec::new(),
            }
        );
    }

    #[tokio::test]
    async fn invalid_permit_is_a_client_error_with_all_errors() {
        let state = state_with(uniform(true), true, SyncLogger::silent(), None);

        let (status, Json(response)) = handle_submission(&state, br#"{"id": "p-1"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!response.success);
        assert_eq!(response.errors.len(), 6);
    }

    #[tokio::test]
    async fn null_body_reports_missing_permit_data() {
        let state = state_with(uniform(true), true, SyncLogger::silent(), None);

        let (status, Json(response)) = handle_submission(&state, b"null").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.errors, vec!["Permit data is required"]);
    }

    #[tokio::test]
    async fn malformed_json_is_a_generic_server_error() {
        let capture = CaptureWriter::default();
        let state = state_with(uniform(true), true, capture.logger(LogLevel::Error), None);

        let (status, Json(response)) = handle_submission(&state, b"{not json").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.errors, vec![INTERNAL_ERROR]);
        assert!(capture.contents().contains("invalid_body"));
    }

    #[tokio::test]
    async fn degraded_success_still_answers_ok() {
        let channels = ChannelSet::new(
            Arc::new(FixedChannel { accept: true }),
            Arc::new(FixedChannel { accept: false }),
            Arc::new(FixedChannel { accept: true }),
        );
        let state = state_with(channels, true, SyncLogger::silent(), None);

        let (status, Json(response)) = handle_submission(&state, &permit_body()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        assert!(response.errors.is_empty());
    }

    #[tokio::test]
    async fn total_failure_is_a_client_error() {
        let state = state_with(uniform(false), false, SyncLogger::silent(), None);

        let (status, Json(response)) = handle_submission(&state, &permit_body()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.errors.len(), 4);
    }

    #[tokio::test]
    async fn caller_deadline_turns_into_server_error() {
        let channels = ChannelSet::new(
            Arc::new(SlowChannel),
            Arc::new(FixedChannel { accept: true }),
            Arc::new(FixedChannel { accept: true }),
        );
        let capture = CaptureWriter::default();
        let state = state_with(
            channels,
            true,
            capture.logger(LogLevel::Error),
            Some(Duration::from_millis(50)),
        );

        let (status, Json(response)) = handle_submission(&state, &permit_body()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.errors, vec![INTERNAL_ERROR]);
        let logged = capture.contents();
        assert!(logged.contains("process_timeout"), "{logged}");
        assert!(logged.contains("timeout=50ms"), "{logged}");
    }

    async fn raw_request(app: Router, request: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(request.as_bytes())
            .await
            .expect("write request");
        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .await
            .expect("read response");
        response
    }

    #[tokio::test]
    async fn non_post_methods_are_rejected() {
        let state = state_with(uniform(true), true, SyncLogger::silent(), None);
        let app = router(state, "/api/permits");

        let response = raw_request(
            app,
            "GET /api/permits HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
                .to_string(),
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 405"), "{response}");
        assert!(response.contains(METHOD_NOT_ALLOWED));
    }

    #[tokio::test]
    async fn post_route_processes_the_body() {
        let state = state_with(uniform(true), true, SyncLogger::silent(), None);
        let app = router(state, "/api/permits");
        let body = String::from_utf8(permit_body()).expect("utf8");

        let response = raw_request(
            app,
            format!(
                "POST /api/permits HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            ),
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("\"permit_id\":\"202305106789\""));
    }

    fn startup_config(addr: &str, database: &std::path::Path) -> Config {
        let args = crate::config::Args {
            addr: addr.to_string(),
            database: database.display().to_string(),
            ..crate::config::Args::default()
        };
        Config::resolve(&args, crate::config::FileConfig::default(), |_| None).expect("config")
    }

    #[tokio::test]
    async fn serve_reports_each_startup_failure() {
        let dir = tempfile::tempdir().expect("temp dir");
        let database = dir.path().join("fallback.db");

        let err = serve(
            &startup_config("not-an-address", &database),
            SyncLogger::silent(),
            async {},
        )
        .await
        .expect_err("bad address");
        assert!(matches!(err, StartupError::InvalidAddr { .. }), "{err}");

        let err = serve(
            &startup_config("127.0.0.1:0", dir.path()),
            SyncLogger::silent(),
            async {},
        )
        .await
        .expect_err("directory is not a database");
        assert!(matches!(err, StartupError::Storage { .. }), "{err}");

        let taken = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = taken.local_addr().expect("local addr").to_string();
        let err = serve(&startup_config(&addr, &database), SyncLogger::silent(), async {})
            .await
            .expect_err("port in use");
        assert!(matches!(err, StartupError::Bind { .. }), "{err}");
    }

    #[tokio::test]
    async fn serve_returns_cleanly_on_shutdown() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = startup_config("127.0.0.1:0", &dir.path().join("fallback.db"));

        serve(&config, SyncLogger::silent(), async {})
            .await
            .expect("clean shutdown");
        assert!(dir.path().join("fallback.db").exists());
    }
}
