// src/flow/controller.rs

use std::collections::HashSet;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    color::{self, NodeColor},
    error::{EntityKind, FlowError},
    flow::model::{
        handles, Document, Edge, EdgeData, EdgeKind, EdgeStyle, Node, NodeData, NodeKind, Position,
        TextStyle, Viewport,
    },
};

/// Label given to nodes added without initial data.
pub const NEW_NODE_LABEL: &str = "new node";

/// Whether the canvas accepts edits. Chosen once, at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditMode {
    #[default]
    Editable,
    ReadOnly,
}

/// A free standing line: two endpoint nodes joined by one edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub start: Node,
    pub end: Node,
    pub edge: Edge,
}

/// Owns the nodes, edges and viewport of the open document.
///
/// Every mutator either applies completely or returns an error with the
/// collections untouched. In read-only mode mutators are silent no-ops; only
/// `load_document` and `export_document` keep working.
#[derive(Debug, Clone, Default)]
pub struct FlowController {
    mode: EditMode,
    allow_self_loops: bool,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    viewport: Viewport,
}

impl FlowController {
    pub fn new(mode: EditMode) -> Self {
        Self { mode, ..Default::default() }
    }

    pub fn editable() -> Self {
        Self::new(EditMode::Editable)
    }

    pub fn read_only() -> Self {
        Self::new(EditMode::ReadOnly)
    }

    /// Accept edges whose source and target are the same node.
    pub fn with_self_loops(mut self, allow: bool) -> Self {
        self.allow_self_loops = allow;
        self
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == EditMode::ReadOnly
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Edges with at least one endpoint that names no node. They stay in the
    /// document and simply do not render.
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        self.edges
            .iter()
            .filter(|e| !ids.contains(e.source.as_str()) || !ids.contains(e.target.as_str()))
            .collect()
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, FlowError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| FlowError::node_not_found(id))
    }

    fn edge_mut(&mut self, id: &str) -> Result<&mut Edge, FlowError> {
        self.edges
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| FlowError::edge_not_found(id))
    }

    fn fresh_id(&self, prefix: &str, taken: impl Fn(&str) -> bool) -> String {
        let base = format!("{prefix}_{}", Utc::now().timestamp_millis());
        let mut candidate = base.clone();
        let mut n = 1;
        while taken(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        candidate
    }

    /// Append a new editable node. `None` only when the canvas is read-only.
    pub fn add_node(&mut self, position: Position, data: Option<NodeData>) -> Option<Node> {
        if self.is_read_only() {
            return None;
        }
        let id = self.fresh_id("node", |c| self.node(c).is_some());
        let data = data.unwrap_or_else(|| NodeData::with_label(NEW_NODE_LABEL));
        let node = Node::new(id, position, NodeKind::Editable, data);
        debug!(node = %node.id, "node added");
        self.nodes.push(node.clone());
        Some(node)
    }

    /// Remove a node. Edges pointing at it are left in place.
    pub fn delete_node(&mut self, id: &str) -> Result<Option<Node>, FlowError> {
        if self.is_read_only() {
            return Ok(None);
        }
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| FlowError::node_not_found(id))?;
        let removed = self.nodes.remove(index);
        let orphaned = self.edges.iter().filter(|e| e.touches(id)).count();
        debug!(node = %id, orphaned, "node deleted");
        Ok(Some(removed))
    }

    /// Shallow-merge `partial` into the node's data: every key given replaces
    /// the stored one, every other key is kept. A recognized key holding a
    /// value of the wrong type rejects the whole update.
    pub fn update_node_data(&mut self, id: &str, partial: Map<String, Value>) -> Result<(), FlowError> {
        if self.is_read_only() {
            return Ok(());
        }
        NodeData::check_patch(&partial)?;
        let current = &self.node(id).ok_or_else(|| FlowError::node_not_found(id))?.data;
        let mut merged = match serde_json::to_value(current) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => return Err(FlowError::Validation(e.to_string())),
        };
        merged.extend(partial);
        let data: NodeData = serde_json::from_value(Value::Object(merged))
            .map_err(|e| FlowError::Validation(format!("node `{id}` data: {e}")))?;
        self.node_mut(id)?.data = data;
        Ok(())
    }

    pub fn move_node(&mut self, id: &str, position: Position) -> Result<(), FlowError> {
        if self.is_read_only() {
            return Ok(());
        }
        self.node_mut(id)?.position = position;
        Ok(())
    }

    /// Assign a color as is, typically one of the presets.
    pub fn set_node_color(&mut self, id: &str, color: NodeColor) -> Result<(), FlowError> {
        if self.is_read_only() {
            return Ok(());
        }
        self.node_mut(id)?.data.color = Some(color);
        Ok(())
    }

    /// Derive a full color from `hex`, keeping the node's current opacity.
    pub fn set_node_custom_color(&mut self, id: &str, hex: &str) -> Result<(), FlowError> {
        if self.is_read_only() {
            return Ok(());
        }
        let node = self.node(id).ok_or_else(|| FlowError::node_not_found(id))?;
        let alpha = node.data.color_or_default().alpha();
        let color = color::derive_color(hex, alpha)?;
        self.node_mut(id)?.data.color = Some(color);
        Ok(())
    }

    /// Change the opacity, keeping the node's current base color.
    pub fn set_node_alpha(&mut self, id: &str, alpha: f64) -> Result<(), FlowError> {
        if self.is_read_only() {
            return Ok(());
        }
        let node = self.node(id).ok_or_else(|| FlowError::node_not_found(id))?;
        let base = color::extract_base_hex(&node.data.color_or_default().bg);
        let color = color::derive_color(&base, alpha)?;
        self.node_mut(id)?.data.color = Some(color);
        Ok(())
    }

    pub fn set_text_style(&mut self, id: &str, style: TextStyle) -> Result<(), FlowError> {
        if self.is_read_only() {
            return Ok(());
        }
        self.node_mut(id)?.data.text_style = Some(style);
        Ok(())
    }

    /// Connect two handles with a solid edge.
    ///
    /// The edge id is derived from both endpoints, so connecting the same
    /// handles twice is reported as a duplicate.
    pub fn connect(
        &mut self,
        source: &str,
        source_handle: Option<&str>,
        target: &str,
        target_handle: Option<&str>,
    ) -> Result<Option<Edge>, FlowError> {
        if self.is_read_only() {
            return Ok(None);
        }
        if source == target && !self.allow_self_loops {
            return Err(FlowError::InvalidConnection(format!(
                "node `{source}` cannot connect to itself"
            )));
        }
        let id = format!(
            "xy-edge__{source}{}-{target}{}",
            source_handle.unwrap_or_default(),
            target_handle.unwrap_or_default()
        );
        if self.edge(&id).is_some() {
            return Err(FlowError::DuplicateId { kind: EntityKind::Edge, id });
        }
        let edge = Edge {
            id,
            source: source.to_string(),
            target: target.to_string(),
            source_handle: source_handle.map(str::to_string),
            target_handle: target_handle.map(str::to_string),
            kind: Some(EdgeKind::Custom),
            data: Some(EdgeData::styled(EdgeStyle::Solid)),
            extra: Map::new(),
        };
        debug!(edge = %edge.id, "edge connected");
        self.edges.push(edge.clone());
        Ok(Some(edge))
    }

    /// Add a free line from `start` to `end`.
    pub fn add_line(&mut self, start: Position, end: Position) -> Option<Line> {
        if self.is_read_only() {
            return None;
        }
        let base = self.fresh_id("line", |c| {
            self.edge(c).is_some()
                || self.node(&format!("{c}-start")).is_some()
                || self.node(&format!("{c}-end")).is_some()
        });
        let (start_id, end_id) = (format!("{base}-start"), format!("{base}-end"));

        let endpoint = |id: &str, paired: &str, is_start: bool, position: Position| {
            let data = NodeData {
                paired_endpoint_id: Some(paired.to_string()),
                edge_id: Some(base.clone()),
                is_start: Some(is_start),
                ..Default::default()
            };
            Node::new(id, position, NodeKind::LineEndpoint, data)
        };
        let line = Line {
            start: endpoint(&start_id, &end_id, true, start),
            end: endpoint(&end_id, &start_id, false, end),
            edge: Edge {
                id: base.clone(),
                source: start_id.clone(),
                target: end_id.clone(),
                source_handle: Some(handles::ENDPOINT_SOURCE.to_string()),
                target_handle: Some(handles::ENDPOINT_TARGET.to_string()),
                kind: Some(EdgeKind::Custom),
                data: Some(EdgeData::styled(EdgeStyle::Solid)),
                extra: Map::new(),
            },
        };

        self.nodes.push(line.start.clone());
        self.nodes.push(line.end.clone());
        self.edges.push(line.edge.clone());
        Some(line)
    }

    pub fn delete_edge(&mut self, id: &str) -> Result<Option<Edge>, FlowError> {
        if self.is_read_only() {
            return Ok(None);
        }
        let index = self
            .edges
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| FlowError::edge_not_found(id))?;
        Ok(Some(self.edges.remove(index)))
    }

    /// Set the stroke style; `edgeStyle` and `strokeDasharray` always change
    /// together, and the inline `style.strokeDasharray` follows them.
    pub fn set_edge_style(&mut self, id: &str, style: EdgeStyle) -> Result<(), FlowError> {
        if self.is_read_only() {
            return Ok(());
        }
        let edge = self.edge_mut(id)?;
        let data = edge.data.get_or_insert_with(EdgeData::default);
        data.edge_style = Some(style);
        data.stroke_dasharray = style.dasharray().map(str::to_string);

        if let Some(Value::Object(inline)) = edge.extra.get_mut("style") {
            match style.dasharray() {
                Some(dash) => {
                    inline.insert("strokeDasharray".into(), Value::String(dash.into()));
                }
                None => {
                    inline.remove("strokeDasharray");
                }
            }
        }
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.is_read_only() {
            return;
        }
        self.viewport = viewport;
    }

    /// Drop every node and edge. Callers confirm with the user first.
    pub fn clear(&mut self) {
        if self.is_read_only() {
            return;
        }
        info!(nodes = self.nodes.len(), edges = self.edges.len(), "canvas cleared");
        self.nodes.clear();
        self.edges.clear();
    }

    pub fn export_document(&self) -> Document {
        Document {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            viewport: self.viewport,
        }
    }

    /// Replace the whole canvas with `doc`, which is expected to be normalized
    /// already. A document repeating a node or edge id is refused.
    pub fn load_document(&mut self, doc: Document) -> Result<(), FlowError> {
        if let Some(id) = first_duplicate(doc.nodes.iter().map(|n| n.id.as_str())) {
            return Err(FlowError::DuplicateId { kind: EntityKind::Node, id });
        }
        if let Some(id) = first_duplicate(doc.edges.iter().map(|e| e.id.as_str())) {
            return Err(FlowError::DuplicateId { kind: EntityKind::Edge, id });
        }

        self.nodes = doc.nodes;
        self.edges = doc.edges;
        self.viewport = doc.viewport;

        let dangling = self.dangling_edges().len();
        if dangling > 0 {
            warn!(dangling, "document has edges with missing endpoints");
        }
        info!(nodes = self.nodes.len(), edges = self.edges.len(), "document loaded");
        Ok(())
    }
}

fn first_duplicate<'a>(ids: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut seen = HashSet::new();
    ids.into_iter().find(|id| !seen.insert(*id)).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::model::normalize_document;
    use serde_json::json;

    fn with_two_nodes() -> (FlowController, String, String) {
        let mut ctl = FlowController::editable();
        let a = ctl.add_node(Position::new(0.0, 0.0), None).unwrap().id;
        let b = ctl.add_node(Position::new(200.0, 0.0), None).unwrap().id;
        (ctl, a, b)
    }

    #[test]
    fn test_add_node_ids_are_unique() {
        let mut ctl = FlowController::editable();
        let ids: HashSet<String> = (0..20)
            .map(|i| ctl.add_node(Position::new(f64::from(i), 0.0), None).unwrap().id)
            .collect();
        assert_eq!(ids.len(), 20);
        assert_eq!(ctl.node_count(), 20);
        assert!(ctl.nodes().iter().all(|n| n.kind() == NodeKind::Editable));
        assert!(ids.iter().all(|id| id.starts_with("node_")));
    }

    #[test]
    fn test_add_then_delete_restores_state() {
        let (mut ctl, _, _) = with_two_nodes();
        let before = ctl.nodes().to_vec();
        let node = ctl.add_node(Position::new(5.0, 5.0), Some(NodeData::with_label("tmp"))).unwrap();
        assert_eq!(ctl.nodes().last().unwrap().data.label.as_deref(), Some("tmp"));
        let removed = ctl.delete_node(&node.id).unwrap().unwrap();
        assert_eq!(removed.id, node.id);
        assert_eq!(ctl.nodes(), before.as_slice());
    }

    #[test]
    fn test_delete_does_not_cascade() {
        let (mut ctl, a, b) = with_two_nodes();
        ctl.connect(&a, Some("right-source"), &b, Some("left")).unwrap();
        ctl.delete_node(&a).unwrap();
        assert_eq!(ctl.edge_count(), 1);
        assert_eq!(ctl.dangling_edges().len(), 1);
        assert!(ctl.edges()[0].touches(&a));
        assert!(matches!(ctl.delete_node(&a), Err(FlowError::NotFound { kind: EntityKind::Node, .. })));
    }

    #[test]
    fn test_update_node_data_merges() {
        let (mut ctl, a, _) = with_two_nodes();
        ctl.update_node_data(&a, json!({"label": "Start", "link": "https://example.com"}).as_object().unwrap().clone())
            .unwrap();
        ctl.update_node_data(&a, json!({"infoLink": "https://info.example.com", "badge": 3}).as_object().unwrap().clone())
            .unwrap();

        let data = &ctl.node(&a).unwrap().data;
        assert_eq!(data.label.as_deref(), Some("Start"));
        assert_eq!(data.link.as_deref(), Some("https://example.com"));
        assert_eq!(data.info_link.as_deref(), Some("https://info.example.com"));
        assert_eq!(data.extra.get("badge"), Some(&json!(3)));

        let err = ctl.update_node_data("missing", Map::new()).unwrap_err();
        assert!(matches!(err, FlowError::NotFound { .. }));
    }

    #[test]
    fn test_update_node_data_rejects_wrong_types() {
        let (mut ctl, a, _) = with_two_nodes();
        ctl.update_node_data(&a, json!({"label": "keep me"}).as_object().unwrap().clone())
            .unwrap();
        ctl.set_node_color(&a, color::preset("green").unwrap().color.clone()).unwrap();
        let before = ctl.node(&a).unwrap().data.clone();

        let err = ctl
            .update_node_data(&a, json!({"label": 7, "color": "red"}).as_object().unwrap().clone())
            .unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
        assert_eq!(ctl.node(&a).unwrap().data, before);
        assert_eq!(ctl.node(&a).unwrap().data.label.as_deref(), Some("keep me"));
    }

    #[test]
    fn test_connect_rejects_self_loops() {
        let (mut ctl, a, _) = with_two_nodes();
        let err = ctl.connect(&a, None, &a, None).unwrap_err();
        assert!(matches!(err, FlowError::InvalidConnection(_)));
        assert_eq!(ctl.edge_count(), 0);

        let mut permissive = FlowController::editable().with_self_loops(true);
        let n = permissive.add_node(Position::default(), None).unwrap().id;
        assert!(permissive.connect(&n, None, &n, None).unwrap().is_some());
    }

    #[test]
    fn test_connect_defaults_and_duplicates() {
        let (mut ctl, a, b) = with_two_nodes();
        let edge = ctl.connect(&a, Some("bottom-source"), &b, Some("top")).unwrap().unwrap();
        assert_eq!(edge.id, format!("xy-edge__{a}bottom-source-{b}top"));
        assert_eq!(edge.style(), EdgeStyle::Solid);
        assert_eq!(edge.dasharray(), None);

        let err = ctl.connect(&a, Some("bottom-source"), &b, Some("top")).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateId { kind: EntityKind::Edge, .. }));
        assert_eq!(ctl.edge_count(), 1);
    }

    #[test]
    fn test_set_edge_style_keeps_pairing() {
        let (mut ctl, a, b) = with_two_nodes();
        let id = ctl.connect(&a, None, &b, None).unwrap().unwrap().id;

        ctl.set_edge_style(&id, EdgeStyle::Dashed).unwrap();
        assert_eq!(ctl.edge(&id).unwrap().dasharray(), Some("8 4"));
        assert_eq!(ctl.edge(&id).unwrap().style(), EdgeStyle::Dashed);

        ctl.set_edge_style(&id, EdgeStyle::Solid).unwrap();
        assert_eq!(ctl.edge(&id).unwrap().dasharray(), None);

        assert!(matches!(ctl.set_edge_style("nope", EdgeStyle::Dotted), Err(FlowError::NotFound { .. })));
    }

    #[test]
    fn test_set_edge_style_syncs_inline_style() {
        let mut ctl = FlowController::editable();
        let doc = normalize_document(&json!({
            "edges": [{"id": "e1", "source": "a", "target": "b", "style": {"stroke": "#830050"}}]
        }))
        .unwrap();
        ctl.load_document(doc).unwrap();

        ctl.set_edge_style("e1", EdgeStyle::Dotted).unwrap();
        let edge = ctl.edge("e1").unwrap();
        assert_eq!(edge.extra["style"], json!({"stroke": "#830050", "strokeDasharray": "2 2"}));

        ctl.set_edge_style("e1", EdgeStyle::Solid).unwrap();
        assert_eq!(ctl.edge("e1").unwrap().extra["style"], json!({"stroke": "#830050"}));
    }

    #[test]
    fn test_color_operations() {
        let (mut ctl, a, _) = with_two_nodes();
        ctl.set_node_custom_color(&a, "#830050").unwrap();
        assert_eq!(ctl.node(&a).unwrap().data.color.as_ref().unwrap().bg, "#830050");

        ctl.set_node_alpha(&a, 0.5).unwrap();
        let color = ctl.node(&a).unwrap().data.color.clone().unwrap();
        assert_eq!(color.bg, "rgba(131, 0, 80, 0.5)");

        // a new base color keeps the chosen opacity
        ctl.set_node_custom_color(&a, "#ffffff").unwrap();
        assert_eq!(ctl.node(&a).unwrap().data.color.as_ref().unwrap().bg, "rgba(255, 255, 255, 0.5)");

        let before = ctl.node(&a).unwrap().clone();
        assert!(matches!(ctl.set_node_custom_color(&a, "red"), Err(FlowError::InvalidColor(_))));
        assert_eq!(ctl.node(&a).unwrap(), &before);

        let blue = color::preset("blue").unwrap().color.clone();
        ctl.set_node_color(&a, blue.clone()).unwrap();
        assert_eq!(ctl.node(&a).unwrap().data.color, Some(blue));
    }

    #[test]
    fn test_add_line() {
        let mut ctl = FlowController::editable();
        let line = ctl.add_line(Position::new(0.0, 0.0), Position::new(100.0, 0.0)).unwrap();
        assert_eq!(ctl.node_count(), 2);
        assert_eq!(ctl.edge_count(), 1);
        assert!(line.start.kind().is_line_endpoint());
        assert_eq!(line.start.data.paired_endpoint_id.as_deref(), Some(line.end.id.as_str()));
        assert_eq!(line.end.data.is_start, Some(false));
        assert_eq!(line.edge.source, line.start.id);
        assert_eq!(line.edge.target, line.end.id);
        assert!(ctl.dangling_edges().is_empty());
    }

    #[test]
    fn test_read_only_ignores_mutations() {
        let mut ctl = FlowController::read_only();
        let doc = normalize_document(&json!({
            "nodes": [{"id": "n1", "position": {"x": 0, "y": 0}, "data": {}}],
            "edges": [{"id": "e1", "source": "n1", "target": "n2"}]
        }))
        .unwrap();
        ctl.load_document(doc.clone()).unwrap();

        assert!(ctl.add_node(Position::default(), None).is_none());
        assert!(ctl.add_line(Position::default(), Position::default()).is_none());
        assert_eq!(ctl.delete_node("n1").unwrap(), None);
        assert_eq!(ctl.delete_node("missing").unwrap(), None);
        ctl.update_node_data("n1", json!({"label": "x"}).as_object().unwrap().clone()).unwrap();
        ctl.move_node("n1", Position::new(9.0, 9.0)).unwrap();
        assert!(ctl.connect("n1", None, "n1", None).unwrap().is_none());
        ctl.set_edge_style("e1", EdgeStyle::Dashed).unwrap();
        ctl.set_node_alpha("n1", 7.0).unwrap();
        ctl.clear();

        assert_eq!(ctl.export_document(), doc);
    }

    #[test]
    fn test_export_load_round_trip() {
        let (mut ctl, a, b) = with_two_nodes();
        ctl.connect(&a, None, &b, None).unwrap();
        ctl.set_viewport(Viewport { x: 12.0, y: -4.0, zoom: 1.5 });
        ctl.update_node_data(&a, json!({"label": "**Start**\\nhere"}).as_object().unwrap().clone())
            .unwrap();

        let exported = ctl.export_document();
        let normalized = normalize_document(&exported.to_value().unwrap()).unwrap();
        ctl.load_document(normalized).unwrap();
        assert_eq!(ctl.export_document(), exported);
    }

    #[test]
    fn test_load_rejects_duplicate_ids() {
        let (mut ctl, _, _) = with_two_nodes();
        let before = ctl.export_document();
        let doc = normalize_document(&json!({
            "nodes": [
                {"id": "n1", "position": {"x": 0, "y": 0}},
                {"id": "n1", "position": {"x": 1, "y": 1}}
            ]
        }))
        .unwrap();
        let err = ctl.load_document(doc).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateId { kind: EntityKind::Node, .. }));
        assert_eq!(ctl.export_document(), before);
    }

    #[test]
    fn test_clear() {
        let (mut ctl, a, b) = with_two_nodes();
        ctl.connect(&a, None, &b, None).unwrap();
        ctl.clear();
        assert_eq!(ctl.node_count(), 0);
        assert_eq!(ctl.edge_count(), 0);
    }
}
