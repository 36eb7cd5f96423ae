use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
    error::FlowError,
    flow::{
        controller::{EditMode, FlowController},
        model::{Document, DocumentId},
    },
    store::DocumentStore,
};

/// How the host mounts an editor instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountConfig {
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub document_id: Option<DocumentId>,
}

impl MountConfig {
    pub fn editable(document_id: DocumentId) -> Self {
        Self { read_only: false, document_id: Some(document_id) }
    }

    pub fn read_only(document_id: DocumentId) -> Self {
        Self { read_only: true, document_id: Some(document_id) }
    }

    pub fn mode(&self) -> EditMode {
        if self.read_only { EditMode::ReadOnly } else { EditMode::Editable }
    }
}

/// What a toolbar needs to render itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolbarState {
    pub is_saving: bool,
    pub is_loading: bool,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Requests a session has in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Activity {
    pub is_loading: bool,
    pub is_saving: bool,
}

#[derive(Debug, Clone, Copy)]
enum Busy {
    Loading,
    Saving,
}

impl Busy {
    fn set(self, activity: &mut Activity, value: bool) {
        match self {
            Busy::Loading => activity.is_loading = value,
            Busy::Saving => activity.is_saving = value,
        }
    }
}

// Raises a flag for as long as it lives, so a dropped request future clears it too.
struct BusyGuard<'a> {
    tx: &'a watch::Sender<Activity>,
    busy: Busy,
}

impl<'a> BusyGuard<'a> {
    fn raise(tx: &'a watch::Sender<Activity>, busy: Busy) -> Self {
        tx.send_modify(|a| busy.set(a, true));
        Self { tx, busy }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let busy = self.busy;
        self.tx.send_modify(|a| busy.set(a, false));
    }
}

/// One mounted editor: a controller plus the store it loads from and saves to.
#[derive(Debug)]
pub struct FlowSession {
    mount: MountConfig,
    controller: FlowController,
    store: DocumentStore,
    activity: watch::Sender<Activity>,
}

impl FlowSession {
    pub fn new(mount: MountConfig, store: DocumentStore) -> Self {
        Self {
            mount,
            controller: FlowController::new(mount.mode()),
            store,
            activity: watch::Sender::new(Activity::default()),
        }
    }

    /// Live view of the loading/saving flags, readable while `load` or `save`
    /// is awaiting the store.
    pub fn activity(&self) -> watch::Receiver<Activity> {
        self.activity.subscribe()
    }

    pub fn mount(&self) -> &MountConfig {
        &self.mount
    }

    pub fn controller(&self) -> &FlowController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut FlowController {
        &mut self.controller
    }

    pub fn toolbar_state(&self) -> ToolbarState {
        let activity = *self.activity.borrow();
        ToolbarState {
            is_saving: activity.is_saving,
            is_loading: activity.is_loading,
            node_count: self.controller.node_count(),
            edge_count: self.controller.edge_count(),
        }
    }

    /// Replace the controller's contents with the stored document.
    ///
    /// Returns `false` when there is no document to load. On failure the
    /// controller keeps what it had.
    pub async fn load(&mut self) -> Result<bool, FlowError> {
        let Some(id) = self.mount.document_id else {
            return Ok(false);
        };

        let busy = BusyGuard::raise(&self.activity, Busy::Loading);
        let fetched = self.store.fetch(id).await;
        drop(busy);

        let doc = fetched.inspect_err(|err| error!(document = %id, "load failed: {err}"))?;
        self.controller.load_document(doc)?;
        info!(
            document = %id,
            nodes = self.controller.node_count(),
            edges = self.controller.edge_count(),
            "document loaded"
        );
        Ok(true)
    }

    /// Save the current diagram and return what the store kept.
    ///
    /// Read-only sessions never write and get `Ok(None)`.
    pub async fn save(&mut self) -> Result<Option<Document>, FlowError> {
        if self.controller.is_read_only() {
            warn!("save ignored in read-only mode");
            return Ok(None);
        }
        let id = self
            .mount
            .document_id
            .ok_or_else(|| FlowError::Validation("no document to save to".into()))?;

        let doc = self.controller.export_document();
        let busy = BusyGuard::raise(&self.activity, Busy::Saving);
        let saved = self.store.save(id, &doc).await;
        drop(busy);

        let saved = saved.inspect_err(|err| error!(document = %id, "save failed: {err}"))?;
        info!(document = %id, "document saved");
        Ok(Some(saved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::model::Position;
    use crate::store::{DocumentStoreType, MemoryBackingStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Holds every request until the test lets it through.
    #[derive(Debug)]
    struct GatedStore {
        inner: Arc<MemoryBackingStore>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl DocumentStoreType for GatedStore {
        async fn fetch(&self, id: DocumentId) -> Result<Document, FlowError> {
            self.gate.notified().await;
            self.inner.fetch(id).await
        }

        async fn save(&self, id: DocumentId, doc: &Document) -> Result<Document, FlowError> {
            self.gate.notified().await;
            self.inner.save(id, doc).await
        }
    }

    fn gated(id: DocumentId) -> (Arc<GatedStore>, Arc<Notify>) {
        let inner = MemoryBackingStore::new();
        inner.create_document(id, true);
        let gate = Arc::new(Notify::new());
        (Arc::new(GatedStore { inner, gate: gate.clone() }), gate)
    }

    fn doc_id(n: u64) -> DocumentId {
        DocumentId::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_load_without_document_is_noop() {
        let store = MemoryBackingStore::new();
        let mut session = FlowSession::new(MountConfig::default(), store);
        assert!(!session.load().await.unwrap());
        assert_eq!(session.toolbar_state(), ToolbarState::default());
    }

    #[tokio::test]
    async fn test_save_then_reload_in_new_session() {
        let store = MemoryBackingStore::new();
        store.create_document(doc_id(5), true);

        let mut session = FlowSession::new(MountConfig::editable(doc_id(5)), store.clone());
        session.load().await.unwrap();
        session.controller_mut().add_node(Position::new(10.0, 20.0), None).unwrap();
        let saved = session.save().await.unwrap().unwrap();
        assert_eq!(saved.nodes.len(), 1);
        assert!(!session.toolbar_state().is_saving);

        let mut viewer = FlowSession::new(MountConfig::read_only(doc_id(5)), store);
        assert!(viewer.load().await.unwrap());
        assert_eq!(viewer.toolbar_state().node_count, 1);
        assert_eq!(viewer.save().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_state() {
        let store: DocumentStore = MemoryBackingStore::new();
        let mut session = FlowSession::new(MountConfig::editable(doc_id(99)), store);
        session.controller_mut().add_node(Position::new(0.0, 0.0), None).unwrap();

        let err = session.load().await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(session.controller().node_count(), 1);
        assert!(!session.toolbar_state().is_loading);
    }

    #[tokio::test]
    async fn test_save_without_document_id() {
        let store = Arc::new(MemoryBackingStore::default());
        let mut session = FlowSession::new(MountConfig::default(), store);
        assert!(matches!(session.save().await, Err(FlowError::Validation(_))));
    }

    #[tokio::test]
    async fn test_saving_flag_visible_while_request_pending() {
        let (store, gate) = gated(doc_id(3));
        let mut session = FlowSession::new(MountConfig::editable(doc_id(3)), store);
        session.controller_mut().add_node(Position::new(0.0, 0.0), None).unwrap();

        let mut activity = session.activity();
        let toolbar = async {
            let seen = *activity.wait_for(|a| a.is_saving).await.unwrap();
            gate.notify_one();
            seen
        };
        let (saved, seen) = tokio::join!(session.save(), toolbar);

        assert_eq!(seen, Activity { is_loading: false, is_saving: true });
        assert_eq!(saved.unwrap().unwrap().nodes.len(), 1);
        assert!(!session.toolbar_state().is_saving);
        assert!(!session.activity().borrow().is_saving);
    }

    #[tokio::test]
    async fn test_loading_flag_visible_while_request_pending() {
        let (store, gate) = gated(doc_id(4));
        let mut session = FlowSession::new(MountConfig::read_only(doc_id(4)), store);

        let mut activity = session.activity();
        let toolbar = async {
            let seen = *activity.wait_for(|a| a.is_loading).await.unwrap();
            gate.notify_one();
            seen
        };
        let (loaded, seen) = tokio::join!(session.load(), toolbar);

        assert!(seen.is_loading && !seen.is_saving);
        assert!(loaded.unwrap());
        assert!(!session.toolbar_state().is_loading);
    }
}
