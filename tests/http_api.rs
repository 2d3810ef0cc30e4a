use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use semdex::error::{NOT_UPLOADED_MESSAGE, NO_MATCH_MESSAGE};
use semdex::{build_router, AppState, CollectionStore, Config, Embedder, HashingEmbedder, Indexer, QueryService};

const DIMS: usize = 256;

fn app(root: &std::path::Path) -> Router {
    let config = Config::default();
    let store = Arc::new(CollectionStore::new(root, DIMS, "hashing-256", 64));
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(DIMS));
    let state = AppState::new(
        Indexer::new(store.clone(), embedder.clone(), &config),
        QueryService::new(store, embedder, &config),
    );
    build_router(state, 8 * 1024 * 1024)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn search_body(project: &str, query: &str) -> Value {
    json!({ "machineId": "m1", "projectName": project, "query": query })
}

#[tokio::test]
async fn upload_search_delete_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    let (status, body) = post(
        &app,
        "/upload-folder",
        json!({
            "machineId": "m1",
            "projectName": "p1",
            "files": [{ "path": "a.py", "content": "def foo():\n    return 1\n" }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "uploaded_full", "chunks": 1 }));

    let (status, body) = post(&app, "/semantic-search", search_body("p1", "foo function")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "matches": [{ "file_path": "a.py", "line_number": 1 }] }));

    let (status, body) = post(
        &app,
        "/upload-folder",
        json!({
            "machineId": "m1",
            "projectName": "p1",
            "files": [],
            "incremental": true,
            "deleted": ["a.py"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "status": "uploaded_incremental",
            "changed_files": 0,
            "deleted_files": 1,
            "chunks_added": 0
        })
    );

    let (_, body) = post(&app, "/semantic-search", search_body("p1", "foo function")).await;
    assert_eq!(body, json!({ "error": NO_MATCH_MESSAGE }));
}

#[tokio::test]
async fn full_upload_replaces_previous_files() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    for (path, content) in [("old.rs", "fn old_thing() {}"), ("new.rs", "fn new_thing() {}")] {
        let (status, _) = post(
            &app,
            "/upload-folder",
            json!({
                "machineId": "m1",
                "projectName": "p1",
                "files": [{ "path": path, "content": content }]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = post(&app, "/semantic-search", search_body("p1", "old thing")).await;
    assert_eq!(body, json!({ "matches": [{ "file_path": "new.rs", "line_number": 1 }] }));
}

#[tokio::test]
async fn search_without_upload_reports_not_uploaded() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    let (status, body) = post(&app, "/semantic-search", search_body("never", "anything")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "error": NOT_UPLOADED_MESSAGE }));
}

#[tokio::test]
async fn projects_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    post(
        &app,
        "/upload-folder",
        json!({
            "machineId": "m1",
            "projectName": "p1",
            "files": [{ "path": "a.py", "content": "def foo():\n    return 1\n" }]
        }),
    )
    .await;
    post(
        &app,
        "/upload-folder",
        json!({
            "machineId": "m1",
            "projectName": "p2",
            "files": [{ "path": "b.py", "content": "def bar():\n    return 2\n" }]
        }),
    )
    .await;

    let (_, body) = post(&app, "/semantic-search", search_body("p2", "foo")).await;
    assert_eq!(body, json!({ "matches": [{ "file_path": "b.py", "line_number": 1 }] }));
}
