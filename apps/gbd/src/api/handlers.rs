//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers. Every handler
//! takes the session lock for the duration of one query.

use super::{
    AppState,
    types::{HealthResponse, PAGE_SIZE, QueryParams, QueryResponse, query_to_name},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use gbd_core::{Collapse, Context, GbdError, QueryResult, QuerySpec, Session, Value};
use std::fmt::Write as _;

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// HTTP status for an engine error.
fn status_of(err: &GbdError) -> StatusCode {
    match err {
        GbdError::Parser { .. }
        | GbdError::Resolution(_)
        | GbdError::Configuration(_)
        | GbdError::Schema(_) => StatusCode::BAD_REQUEST,
        GbdError::Storage(_) | GbdError::Task(_) | GbdError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    let msg = msg.into();
    tracing::warn!(status = status.as_u16(), "{msg}");
    (status, [(header::CONTENT_TYPE, "text/plain")], msg).into_response()
}

/// Attachment response with the given media type.
fn attachment(body: Vec<u8>, filename: &str, mime: &str) -> Response {
    let headers = [
        (header::CONTENT_TYPE, mime.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    (StatusCode::OK, headers, body).into_response()
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.lock().await;
    let databases = session.databases().into_iter().map(str::to_string).collect();
    Json(HealthResponse::new(databases))
}

// =============================================================================
// QUERY HANDLER
// =============================================================================

/// Run a query and return the result as JSON.
pub async fn query_handler(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> impl IntoResponse {
    let session = state.session.lock().await;
    match params.to_spec().and_then(|spec| session.query(&spec)) {
        Ok(result) => (StatusCode::OK, Json(QueryResponse::from_result(result))),
        Err(e) => (status_of(&e), Json(QueryResponse::error(e.to_string()))),
    }
}

// =============================================================================
// INDEX PAGE
// =============================================================================

/// Catalog shown for context `ctx`: the requested one if it belongs to
/// `ctx`, else the first catalog of `ctx`.
fn select_database(session: &Session, ctx: Context, requested: Option<&str>) -> Option<String> {
    let candidates = session.database().databases_of(ctx);
    requested
        .filter(|r| candidates.contains(r))
        .or_else(|| candidates.first().copied())
        .map(str::to_string)
}

/// HTML index page with paginated results.
pub async fn index_handler(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> impl IntoResponse {
    let session = state.session.lock().await;
    let page = params.page.unwrap_or(0);
    let outcome = params.context().and_then(|ctx| {
        let db = select_database(&session, ctx, params.database.as_deref()).ok_or_else(|| {
            GbdError::Configuration(format!("No catalog of context '{ctx}' attached"))
        })?;
        let features: Vec<String> = session
            .features(Some(&db))?
            .into_iter()
            .filter(|f| f != "hash")
            .collect();
        let spec = QuerySpec {
            resolve: features.iter().map(|f| format!("{db}:{f}")).collect(),
            ..params.to_spec()?
        };
        let mut result = session.query(&spec)?;
        result.columns = std::iter::once("hash".to_string()).chain(features).collect();
        Ok(result)
    });
    let contexts: Vec<Context> = session.database().contexts().iter().collect();
    Html(render_index(&params, &contexts, page, outcome))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Percent-encode a query-string value.
fn encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

fn render_index(
    params: &QueryParams,
    contexts: &[Context],
    page: usize,
    outcome: Result<QueryResult, GbdError>,
) -> String {
    let query = params.query_text();
    let selected = params.context.as_deref().unwrap_or("cnf");
    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>GBD</title></head><body>\n",
    );
    let _ = writeln!(html, "<h1>GBD Benchmark Database</h1>");
    let _ = write!(
        html,
        "<form method=\"get\" action=\"/\"><input name=\"query\" size=\"80\" value=\"{}\"> <select name=\"context\">",
        escape(query)
    );
    for ctx in contexts {
        let mark = if ctx.name() == selected { " selected" } else { "" };
        let _ = write!(html, "<option value=\"{ctx}\"{mark}>{ctx}</option>");
    }
    let _ = writeln!(html, "</select> <input type=\"submit\" value=\"Search\"></form>");

    match outcome {
        Err(e) => {
            let _ = writeln!(html, "<p class=\"error\">{}</p>", escape(&e.to_string()));
        }
        Ok(result) => {
            let total = result.len();
            let pages = total.div_ceil(PAGE_SIZE).max(1);
            let link = format!(
                "/getinstances?query={}&context={}",
                encode(query),
                encode(selected)
            );
            let _ = writeln!(
                html,
                "<p>{total} instances, page {} of {pages}. <a href=\"{}\">Download URL list ({}.uri)</a></p>",
                page + 1,
                escape(&link),
                escape(&query_to_name(query))
            );
            html.push_str("<table><tr>");
            for column in &result.columns {
                let _ = write!(html, "<th>{}</th>", escape(column));
            }
            html.push_str("</tr>\n");
            for row in result.rows.iter().skip(page * PAGE_SIZE).take(PAGE_SIZE) {
                html.push_str("<tr>");
                for value in row {
                    let _ = write!(html, "<td>{}</td>", escape(&value.to_string()));
                }
                html.push_str("</tr>\n");
            }
            html.push_str("</table>\n<p>");
            for p in 0..pages {
                if p == page {
                    let _ = write!(html, " <b>{}</b>", p + 1);
                } else {
                    let href = format!(
                        "/?query={}&context={}&page={p}",
                        encode(query),
                        encode(selected)
                    );
                    let _ = write!(html, " <a href=\"{}\">{}</a>", escape(&href), p + 1);
                }
            }
            html.push_str("</p>\n");
        }
    }
    html.push_str("</body></html>\n");
    html
}

// =============================================================================
// INSTANCE LIST
// =============================================================================

/// Text list of download URLs for the instances matching a query.
pub async fn instances_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<QueryParams>,
) -> Response {
    let session = state.session.lock().await;
    let result = params.to_spec().and_then(|spec| {
        session.query(&QuerySpec {
            resolve: vec![],
            collapse: Collapse::None,
            ..spec
        })
    });
    let result = match result {
        Ok(r) => r,
        Err(e) => return error_response(status_of(&e), e.to_string()),
    };
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let suffix = match params.context.as_deref() {
        Some(ctx) if !ctx.is_empty() && ctx != "cnf" => format!("?context={}", encode(ctx)),
        _ => String::new(),
    };
    let mut body = String::new();
    for hash in result.first_column() {
        let _ = writeln!(body, "http://{host}/file/{hash}{suffix}");
    }
    let filename = format!("{}.uri", query_to_name(params.query_text()));
    tracing::info!(count = result.len(), %filename, "Sending instance list");
    attachment(body.into_bytes(), &filename, "text/uri-list")
}

// =============================================================================
// FILE DOWNLOADS
// =============================================================================

/// Media type of a benchmark file by its compression suffix.
fn benchmark_mime(path: &str) -> &'static str {
    if path.ends_with(".xz") || path.ends_with(".lzma") {
        "application/x-xz"
    } else if path.ends_with(".gz") {
        "application/gzip"
    } else if path.ends_with(".bz2") {
        "application/x-bzip2"
    } else {
        "text/plain"
    }
}

/// Raw benchmark file of one hash.
pub async fn file_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(params): Query<QueryParams>,
) -> Response {
    let located = {
        let session = state.session.lock().await;
        params.context().and_then(|ctx| {
            let spec = QuerySpec::default()
                .hashes([hash.clone()])
                .resolve([format!("{ctx}:local"), format!("{ctx}:filename")])
                .group_by(format!("{ctx}:hash"))
                .collapse(Collapse::Min);
            session.query(&spec)
        })
    };
    let result = match located {
        Ok(r) => r,
        Err(e) => return error_response(status_of(&e), e.to_string()),
    };
    let Some(row) = result.rows.first() else {
        return error_response(StatusCode::NOT_FOUND, format!("Hash '{hash}' not found"));
    };
    let (Some(local), Some(filename)) = (
        row.get(1).and_then(Value::as_text),
        row.get(2).and_then(Value::as_text),
    ) else {
        return error_response(StatusCode::NOT_FOUND, format!("Hash '{hash}' has no file"));
    };
    match tokio::fs::read(&local).await {
        Ok(bytes) => {
            tracing::info!(%hash, path = %local, "Sending benchmark file");
            attachment(bytes, &format!("{hash}-{filename}"), benchmark_mime(&local))
        }
        Err(e) => {
            tracing::warn!(path = %local, error = %e, "Benchmark file not readable");
            error_response(StatusCode::NOT_FOUND, "Files temporarily not accessible")
        }
    }
}

/// The first catalog file.
pub async fn database_handler(State(state): State<AppState>) -> Response {
    send_database(&state, None).await
}

/// Catalog file `name`, or the first catalog for unknown names.
pub async fn named_database_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    send_database(&state, Some(&name)).await
}

async fn send_database(state: &AppState, name: Option<&str>) -> Response {
    let path = {
        let session = state.session.lock().await;
        let databases = session.databases();
        let chosen = name
            .filter(|n| databases.contains(n))
            .or_else(|| databases.first().copied());
        match chosen.map(|db| session.database_path(db)) {
            Some(Ok(Some(path))) => path.to_path_buf(),
            Some(Err(e)) => return error_response(status_of(&e), e.to_string()),
            _ => {
                return error_response(StatusCode::NOT_FOUND, "No catalog file available");
            }
        }
    };
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "gbd.db".to_string());
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            tracing::info!(path = %path.display(), "Sending catalog file");
            attachment(bytes, &filename, "application/x-sqlite3")
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unable to read catalog: {e}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn encodes_query_values() {
        assert_eq!(encode("family = a%"), "family%20%3D%20a%25");
    }

    #[test]
    fn mime_follows_compression() {
        assert_eq!(benchmark_mime("/b/x.cnf.xz"), "application/x-xz");
        assert_eq!(benchmark_mime("/b/x.cnf.gz"), "application/gzip");
        assert_eq!(benchmark_mime("/b/x.cnf"), "text/plain");
    }

    #[test]
    fn engine_errors_map_to_status() {
        assert_eq!(
            status_of(&GbdError::Resolution("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&GbdError::Storage("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
