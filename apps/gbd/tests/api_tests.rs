//! Integration tests for the GBD HTTP API.
//!
//! Uses axum-test to test the API handlers without starting a real server.
//! Every test works on its own catalog in a temporary directory.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum_test::TestServer;
use gbd::api::{AppState, HealthResponse, QueryResponse, create_router};
use gbd_core::{Contexts, Session, Value};
use std::path::PathBuf;
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn hashes(items: &[&str]) -> Vec<String> {
    items.iter().map(|h| (*h).to_string()).collect()
}

fn open(dir: &TempDir) -> Session {
    Session::open(&[dir.path().join("meta.db")], Contexts::builtin()).unwrap()
}

fn server(session: Session) -> TestServer {
    let state = AppState::with_rate_limit(session, 0);
    TestServer::new(create_router(state)).unwrap()
}

/// Catalog with `family` over three hashes and `runtime` over two.
fn create_populated_test_server(dir: &TempDir) -> TestServer {
    let mut session = open(dir);
    session.create_feature("family", Some("unknown"), None).unwrap();
    session.create_feature("runtime", Some("inf"), None).unwrap();
    session
        .set_values("family", "crypto", &hashes(&["H1", "H2"]), None)
        .unwrap();
    session
        .set_values("family", "planning", &hashes(&["H3"]), None)
        .unwrap();
    session
        .set_values("runtime", "12", &hashes(&["H1"]), None)
        .unwrap();
    session
        .set_values("runtime", "45", &hashes(&["H2"]), None)
        .unwrap();
    server(session)
}

/// Catalog with one registered benchmark file; returns its hash.
fn create_file_test_server(dir: &TempDir) -> (TestServer, PathBuf) {
    let bench = dir.path().join("a.cnf");
    std::fs::write(&bench, "p cnf 2 1\n1 -2 0\n").unwrap();
    let mut session = open(dir);
    session
        .database_mut()
        .create_feature("local", None, None, true)
        .unwrap();
    session
        .set_values("local", &bench.to_string_lossy(), &hashes(&["H1"]), None)
        .unwrap();
    (server(session), bench)
}

fn text(value: &Value) -> String {
    value.to_string()
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let server = server(open(&dir));

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(health.databases, vec!["meta".to_string()]);
}

// =============================================================================
// QUERY ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_query_filters_and_resolves() {
    let dir = TempDir::new().unwrap();
    let server = create_populated_test_server(&dir);

    let response = server
        .get("/query")
        .add_query_param("query", "family = crypto and runtime < 30")
        .add_query_param("resolve", "family,runtime")
        .await;

    response.assert_status_ok();
    let result: QueryResponse = response.json();
    assert!(result.success);
    assert_eq!(
        result.columns,
        vec!["cnf:hash".to_string(), "family".to_string(), "runtime".to_string()]
    );
    assert_eq!(result.total, 1);
    let row: Vec<String> = result.rows[0].iter().map(text).collect();
    assert_eq!(row, vec!["H1", "crypto", "12"]);
}

#[tokio::test]
async fn test_query_without_text_lists_everything() {
    let dir = TempDir::new().unwrap();
    let server = create_populated_test_server(&dir);

    let response = server.get("/query").await;

    response.assert_status_ok();
    let result: QueryResponse = response.json();
    assert_eq!(result.total, 3);
}

#[tokio::test]
async fn test_query_parse_error_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let server = create_populated_test_server(&dir);

    let response = server
        .get("/query")
        .add_query_param("query", "family = ")
        .await;

    response.assert_status_bad_request();
    let result: QueryResponse = response.json();
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("ParserError"));
}

#[tokio::test]
async fn test_query_unknown_feature_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let server = create_populated_test_server(&dir);

    let response = server
        .get("/query")
        .add_query_param("query", "nosuchfeature = 1")
        .await;

    response.assert_status_bad_request();
    let result: QueryResponse = response.json();
    assert!(result.error.unwrap().starts_with("ResolutionError"));
}

// =============================================================================
// INSTANCE LIST TESTS
// =============================================================================

#[tokio::test]
async fn test_getinstances_lists_file_urls() {
    let dir = TempDir::new().unwrap();
    let server = create_populated_test_server(&dir);

    let response = server
        .get("/getinstances")
        .add_query_param("query", "family = crypto")
        .await;

    response.assert_status_ok();
    let disposition = response.header("content-disposition");
    assert_eq!(
        disposition.to_str().unwrap(),
        "attachment; filename=\"family___crypto.uri\""
    );
    let body = response.text();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("/file/H1"));
    assert!(lines[1].ends_with("/file/H2"));
}

// =============================================================================
// FILE DOWNLOAD TESTS
// =============================================================================

#[tokio::test]
async fn test_file_download() {
    let dir = TempDir::new().unwrap();
    let (server, bench) = create_file_test_server(&dir);

    let response = server.get("/file/H1").await;

    response.assert_status_ok();
    assert_eq!(response.text(), std::fs::read_to_string(bench).unwrap());
    let disposition = response.header("content-disposition");
    assert_eq!(
        disposition.to_str().unwrap(),
        "attachment; filename=\"H1-a.cnf\""
    );
}

#[tokio::test]
async fn test_file_unknown_hash_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (server, _) = create_file_test_server(&dir);

    let response = server.get("/file/NOPE").await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn test_file_missing_on_disk_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (server, bench) = create_file_test_server(&dir);
    std::fs::remove_file(bench).unwrap();

    let response = server.get("/file/H1").await;

    response.assert_status_not_found();
}

// =============================================================================
// DATABASE DOWNLOAD TESTS
// =============================================================================

#[tokio::test]
async fn test_getdatabase_sends_first_catalog() {
    let dir = TempDir::new().unwrap();
    let server = create_populated_test_server(&dir);

    let response = server.get("/getdatabase").await;

    response.assert_status_ok();
    assert!(response.as_bytes().starts_with(b"SQLite format 3"));
    let disposition = response.header("content-disposition");
    assert_eq!(
        disposition.to_str().unwrap(),
        "attachment; filename=\"meta.db\""
    );
}

#[tokio::test]
async fn test_getdatabase_unknown_name_falls_back_to_first() {
    let dir = TempDir::new().unwrap();
    let server = create_populated_test_server(&dir);

    let response = server.get("/getdatabase/unknown").await;

    response.assert_status_ok();
    assert!(response.as_bytes().starts_with(b"SQLite format 3"));
}

// =============================================================================
// INDEX PAGE TESTS
// =============================================================================

#[tokio::test]
async fn test_index_renders_table() {
    let dir = TempDir::new().unwrap();
    let server = create_populated_test_server(&dir);

    let response = server
        .get("/")
        .add_query_param("query", "family = planning")
        .await;

    response.assert_status_ok();
    let html = response.text();
    assert!(html.contains("<th>family</th>"));
    assert!(html.contains("<td>H3</td>"));
    assert!(!html.contains("<td>H1</td>"));
    assert!(html.contains("1 instances"));
}

#[tokio::test]
async fn test_index_shows_errors_inline() {
    let dir = TempDir::new().unwrap();
    let server = create_populated_test_server(&dir);

    let response = server
        .get("/")
        .add_query_param("query", "family = ")
        .await;

    response.assert_status_ok();
    assert!(response.text().contains("class=\"error\""));
}

// =============================================================================
// RATE LIMIT TESTS
// =============================================================================

#[tokio::test]
async fn test_rate_limit_rejects_burst() {
    let dir = TempDir::new().unwrap();
    let state = AppState::with_rate_limit(open(&dir), 1);
    let server = TestServer::new(create_router(state)).unwrap();

    server.get("/health").await.assert_status_ok();
    let response = server.get("/health").await;

    response.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
}
