use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use binbot_common::config::Config;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

struct AppState {
    /// `None` when no detection log is configured.
    db_path: Option<PathBuf>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Detection {
    id: i64,
    received_at_ms: i64,
    kind: String,
    x: Option<i64>,
    y: Option<i64>,
    width: Option<i64>,
    height: Option<i64>,
    changed_pixels: Option<i64>,
    zone: Option<String>,
    command: String,
}

#[derive(Debug, Default, Deserialize)]
struct DetectionQuery {
    limit: Option<i64>,
    since_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    detection_log: bool,
}

// DB helpers (sync, wrapped in spawn_blocking)

fn open_log(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

fn row_to_detection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Detection> {
    Ok(Detection {
        id: row.get(0)?,
        received_at_ms: row.get(1)?,
        kind: row.get(2)?,
        x: row.get(3)?,
        y: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        changed_pixels: row.get(7)?,
        zone: row.get(8)?,
        command: row.get(9)?,
    })
}

const SELECT_DETECTIONS: &str =
    "SELECT id, received_at_ms, kind, x, y, width, height, changed_pixels, zone, command
     FROM detections";

/// Newest first, at most `limit` rows, optionally only rows at or after `since_ms`.
fn query_detections(conn: &Connection, q: &DetectionQuery) -> rusqlite::Result<Vec<Detection>> {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let sql = format!(
        "{SELECT_DETECTIONS}
         WHERE received_at_ms >= ?1
         ORDER BY received_at_ms DESC, id DESC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![q.since_ms.unwrap_or(i64::MIN), limit],
        row_to_detection,
    )?;
    rows.collect()
}

fn query_latest(conn: &Connection) -> rusqlite::Result<Option<Detection>> {
    let sql = format!("{SELECT_DETECTIONS} ORDER BY received_at_ms DESC, id DESC LIMIT 1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map([], row_to_detection)?;
    rows.next().transpose()
}

// Handlers

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        detection_log: state.db_path.is_some(),
    })
}

/// GET /detections?limit=&since_ms=
async fn list_detections(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DetectionQuery>,
) -> impl IntoResponse {
    let Some(db_path) = state.db_path.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "detection log not configured").into_response();
    };
    let result = tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<Detection>> {
        let conn = open_log(&db_path)?;
        query_detections(&conn, &q)
    })
    .await;

    match result {
        Ok(Ok(detections)) => Json(detections).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "SQLite query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /detections/latest
async fn latest_detection(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(db_path) = state.db_path.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "detection log not configured").into_response();
    };
    let result = tokio::task::spawn_blocking(move || -> rusqlite::Result<Option<Detection>> {
        let conn = open_log(&db_path)?;
        query_latest(&conn)
    })
    .await;

    match result {
        Ok(Ok(Some(detection))) => Json(detection).into_response(),
        Ok(Ok(None)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "SQLite query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/detections", get(list_detections))
        .route("/detections/latest", get(latest_detection))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let state = Arc::new(AppState {
        db_path: config.database.path.as_ref().map(PathBuf::from),
    });
    if state.db_path.is_none() {
        info!("no [database].path configured, detection endpoints will return 503");
    }

    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(addr, "binbot API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, router(state)).await {
        error!(error = %e, "API server stopped");
        std::process::exit(1);
    }
}
