// tests/persistence_test.rs
use std::sync::Arc;

use flowboard::client::FlowClient;
use flowboard::config::{ClientConfig, StaticToken, DEFAULT_NAMESPACE};
use flowboard::error::FlowError;
use flowboard::flow::{Document, DocumentId, EdgeStyle, NodeKind};
use flowboard::server::{self, REST_ROOT};
use flowboard::store::MemoryBackingStore;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

const EDITOR: &str = "editor-nonce";

struct Fixture {
    store: Arc<MemoryBackingStore>,
    base_url: String,
    handle: JoinHandle<()>,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn doc_id(n: u64) -> DocumentId {
    DocumentId::new(n).unwrap()
}

/// Backing store on an ephemeral port with document 1 published and
/// document 2 a draft.
async fn start_store() -> Fixture {
    let store = MemoryBackingStore::new();
    store.create_document(doc_id(1), true);
    store.create_document(doc_id(2), false);
    store.grant_editor(EDITOR);

    let (addr, handle) = server::spawn("127.0.0.1:0".parse().unwrap(), store.clone(), DEFAULT_NAMESPACE)
        .await
        .unwrap();
    Fixture { store, base_url: format!("http://{addr}{REST_ROOT}"), handle }
}

fn client(fixture: &Fixture, token: Option<&str>) -> FlowClient {
    let token = match token {
        Some(t) => StaticToken::new(t),
        None => StaticToken::none(),
    };
    let config = ClientConfig::new(&fixture.base_url).unwrap().with_token(Arc::new(token));
    FlowClient::new(config).unwrap()
}

fn sample_flow() -> Value {
    json!({
        "nodes": [
            {
                "id": "node_1",
                "type": "editable",
                "position": {"x": 100, "y": 50},
                "data": {"label": "**Start**\\nsecond line", "textStyle": {"fontSize": 16}},
                "width": 150,
                "height": 40,
                "selected": false
            },
            {
                "id": "node_2",
                "type": "someFutureKind",
                "position": {"x": 100, "y": 250},
                "data": {"label": "End", "infoLink": "https://example.com/info", "custom": [1, 2]}
            }
        ],
        "edges": [
            {
                "id": "xy-edge__node_1bottom-source-node_2top",
                "source": "node_1",
                "sourceHandle": "bottom-source",
                "target": "node_2",
                "targetHandle": "top",
                "type": "custom",
                "data": {"edgeStyle": "dashed", "strokeDasharray": "8 4"},
                "markerEnd": {"type": "arrowclosed"}
            }
        ],
        "viewport": {"x": -20, "y": 10, "zoom": 1.5}
    })
}

#[tokio::test]
async fn test_fetch_never_saved_document_is_empty() {
    let fixture = start_store().await;
    let doc = client(&fixture, None).fetch_document(doc_id(1)).await.unwrap();
    assert_eq!(doc, Document::default());
    assert_eq!(doc.viewport.zoom, 1.0);
}

#[tokio::test]
async fn test_save_then_fetch_returns_same_document() {
    let fixture = start_store().await;
    let editor = client(&fixture, Some(EDITOR));

    let saved = editor.save_document(doc_id(1), &sample_flow()).await.unwrap();
    let fetched = client(&fixture, None).fetch_document(doc_id(1)).await.unwrap();
    assert_eq!(saved, fetched);

    assert_eq!(fetched.nodes.len(), 2);
    assert_eq!(fetched.nodes[0].extra["width"], json!(150));
    assert_eq!(fetched.nodes[1].kind(), NodeKind::Other("someFutureKind".into()));
    assert_eq!(fetched.nodes[1].data.extra["custom"], json!([1, 2]));
    assert_eq!(fetched.edges[0].style(), EdgeStyle::Dashed);
    assert_eq!(fetched.edges[0].extra["markerEnd"], json!({"type": "arrowclosed"}));
    assert_eq!(fetched.viewport.zoom, 1.5);
}

#[tokio::test]
async fn test_save_fills_missing_collections() {
    let fixture = start_store().await;
    let editor = client(&fixture, Some(EDITOR));

    let saved = editor
        .save_document(doc_id(1), &json!({"nodes": [{"id": "a", "position": {"x": 0, "y": 0}, "data": {}}]}))
        .await
        .unwrap();
    assert_eq!(saved.nodes.len(), 1);
    assert!(saved.edges.is_empty());
    assert_eq!(saved.viewport.zoom, 1.0);
}

#[tokio::test]
async fn test_non_ascii_labels_are_stored_unescaped() {
    let fixture = start_store().await;
    let editor = client(&fixture, Some(EDITOR));
    let flow = json!({
        "nodes": [{"id": "n", "position": {"x": 0, "y": 0}, "data": {"label": "第一線治療 ✓"}}]
    });

    editor.save_document(doc_id(1), &flow).await.unwrap();
    let raw = fixture.store.stored_json(doc_id(1)).unwrap();
    assert!(raw.contains("第一線治療 ✓"));
    assert!(!raw.contains("\\u"));

    let fetched = editor.fetch_document(doc_id(1)).await.unwrap();
    assert_eq!(fetched.nodes[0].data.label.as_deref(), Some("第一線治療 ✓"));
}

#[tokio::test]
async fn test_invalid_payload_leaves_stored_value_untouched() {
    let fixture = start_store().await;
    let editor = client(&fixture, Some(EDITOR));
    editor.save_document(doc_id(1), &sample_flow()).await.unwrap();
    let before = fixture.store.stored_json(doc_id(1));

    let err = editor.save_document(doc_id(1), &json!("nodes")).await.unwrap_err();
    assert!(matches!(err, FlowError::Validation(_)));
    let err = editor.save_document(doc_id(1), &json!({"nodes": "oops"})).await.unwrap_err();
    assert!(matches!(err, FlowError::Schema(_)));

    assert_eq!(fixture.store.stored_json(doc_id(1)), before);
}

#[tokio::test]
async fn test_permissions_and_missing_documents() {
    let fixture = start_store().await;
    let anonymous = client(&fixture, None);
    let editor = client(&fixture, Some(EDITOR));

    // drafts are hidden from anonymous readers
    let err = anonymous.fetch_document(doc_id(2)).await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert!(editor.fetch_document(doc_id(2)).await.is_ok());

    let err = anonymous.save_document(doc_id(1), &sample_flow()).await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert!(fixture.store.stored_json(doc_id(1)).is_none());

    let err = editor.fetch_document(doc_id(404)).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    let err = editor.save_document(doc_id(404), &sample_flow()).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_raw_endpoint_contract() {
    let fixture = start_store().await;
    let http = reqwest::Client::new();
    let url = |id: &str| format!("{}/{}/flow/{}", fixture.base_url, DEFAULT_NAMESPACE, id);

    let response = http.get(url("abc")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = http
        .post(url("1"))
        .header("X-WP-Nonce", EDITOR)
        .json(&json!({"other": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Flow data is required");
    assert_eq!(body["data"]["status"], 400);

    let response = http
        .post(url("1"))
        .header("X-WP-Nonce", EDITOR)
        .json(&json!({"flow_data": {"nodes": []}}))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Flow data saved successfully");
    assert_eq!(body["data"]["post_id"], 1);
    assert_eq!(body["data"]["flow_data"]["edges"], json!([]));
}

#[tokio::test]
async fn test_invalid_json_body_is_rejected() {
    let fixture = start_store().await;
    let http = reqwest::Client::new();
    let response = http
        .post(format!("{}/{}/flow/1", fixture.base_url, DEFAULT_NAMESPACE))
        .header("X-WP-Nonce", EDITOR)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "rest_invalid_json");
}
