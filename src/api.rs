//! HTTP handlers for `/api/system/summary`.

use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use fleetscan_broadcast::{ExportFormat, Frame, updates};
use fleetscan_cache::{CacheStats, ScanDiff, ScanHistoryEntry};
use fleetscan_scan::{SummaryFilter, SystemSummary};
use futures::{Stream, StreamExt, future};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use time::OffsetDateTime;

type AppResult<T> = Result<T, ApiError>;

/// Error response body: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Logs the full error tree; the client only sees `message`.
    fn internal(message: &str, err: impl std::fmt::Debug) -> Self {
        tracing::error!(error = ?err, "{message}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body {
            error: String,
        }
        (self.status, Json(Body { error: self.message })).into_response()
    }
}

fn wants_csv(query: &[(String, String)], headers: &HeaderMap) -> bool {
    match query.iter().find(|(key, _)| key == "format") {
        Some((_, format)) => format.eq_ignore_ascii_case("csv"),
        None => headers
            .get(header::ACCEPT)
            .and_then(|accept| accept.to_str().ok())
            .is_some_and(|accept| accept.contains("text/csv")),
    }
}

/// Rendered summary as a file download.
fn attachment(summary: &SystemSummary, format: ExportFormat) -> AppResult<Response> {
    let body = format.render(summary).map_err(|err| ApiError::internal("Failed to render summary", err))?;
    let mut response = ([(header::CONTENT_TYPE, format.content_type())], body).into_response();
    let disposition = format!("attachment; filename=\"{}\"", format.file_name(OffsetDateTime::now_utc()));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn respond(summary: &SystemSummary, query: &[(String, String)], headers: &HeaderMap) -> AppResult<Response> {
    let filtered = SummaryFilter::from_query(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let filtered = filtered.map(|filter| filter.apply(summary));
    let summary = filtered.as_ref().unwrap_or(summary);
    if wants_csv(query, headers) {
        attachment(summary, ExportFormat::Csv)
    } else {
        Ok(Json(summary).into_response())
    }
}

/// `GET /api/system/summary`
///
/// Serves the cached summary while it is fresh. Otherwise scans; if that
/// fails, the last known summary is served instead, however old.
pub async fn summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let summary = match state.cache().get().await {
        Some(cached) => cached,
        None => match state.refresh().await {
            Ok(summary) => summary,
            Err(err) => match state.cache().peek().await {
                Some(stale) => {
                    tracing::warn!(error = ?err, "Scan failed; serving stale summary");
                    stale
                },
                None => return Err(ApiError::internal("Failed to scan system", err)),
            },
        },
    };
    respond(&summary, &query, &headers)
}

/// `POST /api/system/summary/scan`
pub async fn scan(
    State(state): State<Arc<AppState>>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let summary = state.refresh().await.map_err(|err| ApiError::internal("Failed to scan system", err))?;
    respond(&summary, &query, &headers)
}

fn to_event(frame: Frame) -> Option<Event> {
    match frame {
        Frame::Heartbeat => Some(Event::default().comment("heartbeat")),
        Frame::Event(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Event::default().data(json)),
            Err(err) => {
                tracing::warn!(error = ?err, "Dropping unserializable stream event");
                None
            },
        },
    }
}

/// SSE events for a frame sequence. A panic while producing frames ends the
/// sequence after the frames already produced; headers have been sent by then.
pub(crate) fn sse_events<S>(frames: S) -> impl Stream<Item = Result<Event, Infallible>>
where
    S: Stream<Item = Frame>,
{
    AssertUnwindSafe(frames)
        .catch_unwind()
        .scan((), |(), frame| {
            future::ready(match frame {
                Ok(frame) => Some(frame),
                Err(_) => {
                    tracing::error!("Summary stream panicked; closing connection");
                    None
                },
            })
        })
        .filter_map(|frame| future::ready(to_event(frame).map(Ok)))
}

/// `GET /api/system/summary/stream`
///
/// The stream ends when the client disconnects (axum drops it) or the server
/// shuts down.
pub async fn stream(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("Summary stream opened");
    let frames = updates(Arc::clone(state.cache()), state.intervals(), state.shutdown().clone());
    Sse::new(sse_events(frames))
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    format: Option<String>,
}

/// `GET /api/system/summary/export?format=csv|json`
///
/// Renders whatever the cache holds (an empty summary if nothing) without
/// scanning.
pub async fn export(State(state): State<Arc<AppState>>, Query(params): Query<ExportParams>) -> AppResult<Response> {
    let format = match params.format.as_deref() {
        None | Some("") => ExportFormat::default(),
        Some(raw) => raw.parse::<ExportFormat>().map_err(|err| ApiError::bad_request(err.to_string()))?,
    };
    let summary = state.cache().peek().await.unwrap_or_default();
    attachment(&summary, format)
}

/// `GET /api/system/summary/cache/stats`
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.cache().stats().await)
}

/// `POST /api/system/summary/cache/invalidate`
pub async fn invalidate_cache(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    state.cache().invalidate().await;
    Json(state.cache().stats().await)
}

/// `POST /api/system/summary/cache/clear`
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    state.cache().clear().await;
    Json(state.cache().stats().await)
}

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    cache: CacheStats,
    history_enabled: bool,
}

/// `GET /api/system/summary/health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        timestamp: OffsetDateTime::now_utc(),
        cache: state.cache().stats().await,
        history_enabled: state.history().is_some(),
    })
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    count: usize,
    history: Vec<ScanHistoryEntry>,
}

fn history_disabled() -> ApiError {
    ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "Scan history is not enabled")
}

/// `GET /api/system/summary/history?limit=`
pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<HistoryPage>> {
    let repository = state.history().ok_or_else(history_disabled)?;
    let history = repository
        .history(Some(params.limit.unwrap_or(state.history_limit())))
        .await
        .map_err(|err| ApiError::internal("Failed to read scan history", err))?;
    Ok(Json(HistoryPage { count: history.len(), history }))
}

#[derive(Debug, Deserialize)]
pub struct CompareParams {
    old_id: Option<i64>,
    new_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ScanRef {
    id: i64,
    #[serde(with = "time::serde::rfc3339")]
    scan_time: OffsetDateTime,
}
impl From<&ScanHistoryEntry> for ScanRef {
    fn from(entry: &ScanHistoryEntry) -> Self {
        Self { id: entry.id, scan_time: entry.scan_time }
    }
}

#[derive(Debug, Serialize)]
pub struct Comparison {
    old_scan: ScanRef,
    new_scan: ScanRef,
    changes: ScanDiff,
}

/// `GET /api/system/summary/compare?old_id=&new_id=`
///
/// Without ids, compares the two most recent successful scans.
pub async fn compare(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CompareParams>,
) -> AppResult<Json<Comparison>> {
    let repository = state.history().ok_or_else(history_disabled)?;
    let lookup = |id: i64| async move {
        repository
            .get(id)
            .await
            .map_err(|err| ApiError::internal("Failed to read scan history", err))?
            .ok_or_else(|| ApiError::not_found(format!("Scan {id} not found")))
    };
    let (old, new) = match (params.old_id, params.new_id) {
        (Some(old_id), Some(new_id)) => (lookup(old_id).await?, lookup(new_id).await?),
        (None, None) => {
            let mut recent = repository
                .history(None)
                .await
                .map_err(|err| ApiError::internal("Failed to read scan history", err))?
                .into_iter()
                .filter(|entry| entry.success);
            match (recent.next(), recent.next()) {
                (Some(new), Some(old)) => (old, new),
                _ => return Err(ApiError::bad_request("Need at least two scans to compare")),
            }
        },
        _ => return Err(ApiError::bad_request("Provide both old_id and new_id, or neither")),
    };
    Ok(Json(Comparison {
        old_scan: ScanRef::from(&old),
        new_scan: ScanRef::from(&new),
        changes: ScanDiff::between(&old.summary, &new.summary),
    }))
}
