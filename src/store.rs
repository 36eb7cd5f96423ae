// src/store.rs

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::{
    error::FlowError,
    flow::model::{normalize_document, Document, DocumentId, Viewport},
};

pub type DocumentStore = Arc<dyn DocumentStoreType>;

/// Somewhere documents can be fetched from and saved to.
#[async_trait]
pub trait DocumentStoreType: Send + Sync + Debug {
    /// Read a document; nothing stored yet is the empty document.
    async fn fetch(&self, id: DocumentId) -> Result<Document, FlowError>;

    /// Persist `doc` and return what was actually stored.
    async fn save(&self, id: DocumentId, doc: &Document) -> Result<Document, FlowError>;
}

/// Rejection from the backing store, shaped like a REST error body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

impl StoreError {
    fn new(status: u16, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    pub fn not_found() -> Self {
        Self::new(404, "not_found", "Post not found")
    }

    pub fn body(&self) -> Value {
        json!({
            "code": self.code,
            "message": self.message,
            "data": { "status": self.status },
        })
    }
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        FlowError::from_status(err.status, err.message)
    }
}

#[derive(Debug, Clone, Default)]
struct StoredDocument {
    published: bool,
    /// Serialized flow data, as the host keeps it in post meta.
    flow_json: Option<String>,
}

/// In-memory stand-in for the host CMS: one JSON string per document, a
/// published flag deciding anonymous read access, and a set of tokens that
/// carry edit permission.
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    documents: DashMap<DocumentId, StoredDocument>,
    editor_tokens: DashSet<String>,
}

impl MemoryBackingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a document so it can be read and written.
    pub fn create_document(&self, id: DocumentId, published: bool) {
        self.documents.entry(id).or_default().published = published;
    }

    pub fn grant_editor(&self, token: impl Into<String>) {
        self.editor_tokens.insert(token.into());
    }

    pub fn is_editor(&self, token: Option<&str>) -> bool {
        token.is_some_and(|t| self.editor_tokens.contains(t))
    }

    /// Raw stored string, exactly as it was written.
    pub fn stored_json(&self, id: DocumentId) -> Option<String> {
        self.documents.get(&id).and_then(|doc| doc.flow_json.clone())
    }

    /// Handle a read by a caller presenting `token`.
    pub fn read(&self, id: DocumentId, token: Option<&str>) -> Result<Value, StoreError> {
        let editor = self.is_editor(token);
        self.read_as(id, editor, false)
    }

    /// Handle a write of request `body` (`{"flow_data": ...}`) by a caller
    /// presenting `token`.
    pub fn write(&self, id: DocumentId, token: Option<&str>, body: &Value) -> Result<Value, StoreError> {
        let editor = self.is_editor(token);
        self.write_as(id, editor, body)
    }

    fn read_as(&self, id: DocumentId, editor: bool, trusted: bool) -> Result<Value, StoreError> {
        let stored = self.documents.get(&id).ok_or_else(StoreError::not_found)?;
        if !(trusted || stored.published || editor) {
            return Err(StoreError::new(
                403,
                "forbidden",
                "You do not have permission to access this resource",
            ));
        }

        let flow_data = match stored.flow_json.as_deref() {
            None | Some("") => default_flow_data(),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                warn!(document = %id, "stored flow data is corrupt: {e}");
                StoreError::new(500, "corrupt_data", "Stored flow data could not be decoded")
            })?,
        };

        Ok(json!({
            "success": true,
            "data": { "post_id": id.get(), "flow_data": flow_data },
        }))
    }

    fn write_as(&self, id: DocumentId, editor: bool, body: &Value) -> Result<Value, StoreError> {
        if !self.documents.contains_key(&id) {
            return Err(StoreError::not_found());
        }
        if !editor {
            return Err(StoreError::new(
                403,
                "forbidden",
                "You do not have permission to edit this resource",
            ));
        }

        let flow_data = body
            .get("flow_data")
            .ok_or_else(|| StoreError::new(400, "invalid_data", "Flow data is required"))?;
        let mut flow_data = flow_data
            .as_object()
            .cloned()
            .ok_or_else(|| StoreError::new(400, "invalid_data", "Flow data must be an object"))?;
        fill_defaults(&mut flow_data);

        // serde_json writes non-ASCII text as is
        let encoded = serde_json::to_string(&flow_data)
            .map_err(|e| StoreError::new(500, "save_failed", format!("Failed to save flow data: {e}")))?;
        match self.documents.get_mut(&id) {
            Some(mut stored) => {
                if stored.flow_json.as_deref() == Some(encoded.as_str()) {
                    info!(document = %id, "flow data unchanged");
                }
                stored.flow_json = Some(encoded);
            }
            None => return Err(StoreError::not_found()),
        }

        Ok(json!({
            "success": true,
            "message": "Flow data saved successfully",
            "data": { "post_id": id.get(), "flow_data": Value::Object(flow_data) },
        }))
    }
}

fn default_flow_data() -> Value {
    json!({
        "nodes": [],
        "edges": [],
        "viewport": Viewport::default(),
    })
}

/// Top-level keys only; anything present, even `null`, is kept.
fn fill_defaults(flow_data: &mut Map<String, Value>) {
    if let Value::Object(defaults) = default_flow_data() {
        for (key, value) in defaults {
            flow_data.entry(key).or_insert(value);
        }
    }
}

fn flow_data_of(envelope: &Value) -> &Value {
    envelope.pointer("/data/flow_data").unwrap_or(&Value::Null)
}

/// Local access with full rights, for tools running next to the store.
#[async_trait]
impl DocumentStoreType for MemoryBackingStore {
    async fn fetch(&self, id: DocumentId) -> Result<Document, FlowError> {
        let envelope = self.read_as(id, true, true)?;
        Document::from_flow_data(flow_data_of(&envelope))
    }

    async fn save(&self, id: DocumentId, doc: &Document) -> Result<Document, FlowError> {
        let flow_data = normalize_document(&doc.to_value()?)?.to_value()?;
        let envelope = self.write_as(id, true, &json!({ "flow_data": flow_data }))?;
        Document::from_flow_data(flow_data_of(&envelope))
    }
}
