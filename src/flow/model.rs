// src/flow/model.rs

use std::{fmt, num::NonZeroU64, str::FromStr};

use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::{color::NodeColor, error::FlowError};

/// Positive integer naming one stored document (the host content item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct DocumentId(NonZeroU64);

impl DocumentId {
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = FlowError;

    /// Only a plain run of ASCII digits names a document.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FlowError::Validation(format!("`{s}` is not a document id")));
        }
        s.parse::<u64>()
            .ok()
            .and_then(DocumentId::new)
            .ok_or_else(|| FlowError::Validation(format!("`{s}` is not a positive document id")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Pan and zoom of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

/// Font sizes the editor offers.
pub const FONT_SIZES: [u32; 10] = [10, 12, 13, 14, 16, 18, 20, 24, 28, 32];
pub const DEFAULT_FONT_SIZE: u32 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    #[serde(default = "default_font_size", deserialize_with = "font_size_or_default")]
    pub font_size: u32,
    #[serde(default, deserialize_with = "or_default")]
    pub bold: bool,
    #[serde(default, deserialize_with = "or_default")]
    pub italic: bool,
    #[serde(default, deserialize_with = "or_default")]
    pub underline: bool,
    #[serde(default, deserialize_with = "or_default")]
    pub text_align: TextAlign,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: DEFAULT_FONT_SIZE,
            bold: false,
            italic: false,
            underline: false,
            text_align: TextAlign::default(),
        }
    }
}

fn default_font_size() -> u32 {
    DEFAULT_FONT_SIZE
}

fn font_size_or_default<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(raw
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| FONT_SIZES.contains(n))
        .unwrap_or(DEFAULT_FONT_SIZE))
}

// Malformed optional values fall back to their default instead of failing the
// whole document.
fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).unwrap_or_default())
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| serde_json::from_value(v).ok()))
}

/// Node payload. Keys the editor does not know about are kept as they came.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub color: Option<NodeColor>,
    /// Opened in the same tab.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub link: Option<String>,
    /// Opened in a new tab.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub info_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub text_style: Option<TextStyle>,

    // line endpoints only
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub paired_endpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub edge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub is_start: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeData {
    pub fn with_label(label: impl Into<String>) -> Self {
        Self { label: Some(label.into()), ..Default::default() }
    }

    /// The assigned color, or the palette default.
    pub fn color_or_default(&self) -> NodeColor {
        self.color.clone().unwrap_or_default()
    }

    /// Check that every recognized key of a partial update holds a value of
    /// the right shape. Unknown keys are free form; `null` clears a key.
    pub fn check_patch(patch: &Map<String, Value>) -> Result<(), FlowError> {
        fn fits<T: DeserializeOwned>(value: &Value) -> bool {
            serde_json::from_value::<T>(value.clone()).is_ok()
        }

        for (key, value) in patch.iter().filter(|(_, v)| !v.is_null()) {
            let ok = match key.as_str() {
                "label" | "link" | "infoLink" | "pairedEndpointId" | "edgeId" => value.is_string(),
                "isStart" => value.is_boolean(),
                "color" => fits::<NodeColor>(value),
                "textStyle" => fits::<TextStyle>(value),
                _ => true,
            };
            if !ok {
                return Err(FlowError::Validation(format!("node data `{key}` has the wrong type: {value}")));
            }
        }
        Ok(())
    }
}

/// Node `type` discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Editable,
    ReadOnly,
    LineEndpoint,
    #[default]
    Default,
    /// Unrecognized types survive a round trip and render as `Default`.
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Editable => "editable",
            NodeKind::ReadOnly => "readOnly",
            NodeKind::LineEndpoint => "lineEndpoint",
            NodeKind::Default => "default",
            NodeKind::Other(other) => other,
        }
    }

    pub fn is_line_endpoint(&self) -> bool {
        matches!(self, NodeKind::LineEndpoint)
    }
}

impl From<String> for NodeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "editable" => NodeKind::Editable,
            "readOnly" => NodeKind::ReadOnly,
            "lineEndpoint" => NodeKind::LineEndpoint,
            "default" => NodeKind::Default,
            _ => NodeKind::Other(value),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub kind: Option<NodeKind>,
    pub position: Position,
    #[serde(default, deserialize_with = "or_default")]
    pub data: NodeData,
    /// Everything else the canvas stored on the node (size, selection, style).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, position: Position, kind: NodeKind, data: NodeData) -> Self {
        Self { id: id.into(), kind: Some(kind), position, data, extra: Map::new() }
    }

    /// Effective kind; an absent `type` is `Default`.
    pub fn kind(&self) -> NodeKind {
        self.kind.clone().unwrap_or_default()
    }
}

/// Stroke pattern of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
    DashDot,
}

impl EdgeStyle {
    pub const ALL: [EdgeStyle; 4] = [EdgeStyle::Solid, EdgeStyle::Dashed, EdgeStyle::Dotted, EdgeStyle::DashDot];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeStyle::Solid => "solid",
            EdgeStyle::Dashed => "dashed",
            EdgeStyle::Dotted => "dotted",
            EdgeStyle::DashDot => "dash-dot",
        }
    }

    /// SVG `stroke-dasharray` for the style; solid lines have none.
    pub fn dasharray(self) -> Option<&'static str> {
        match self {
            EdgeStyle::Solid => None,
            EdgeStyle::Dashed => Some("8 4"),
            EdgeStyle::Dotted => Some("2 2"),
            EdgeStyle::DashDot => Some("8 4 2 4"),
        }
    }
}

impl fmt::Display for EdgeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeStyle {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| FlowError::Validation(format!("unknown edge style `{s}`")))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub edge_style: Option<EdgeStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub stroke_dasharray: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EdgeData {
    pub fn styled(style: EdgeStyle) -> Self {
        Self {
            edge_style: Some(style),
            stroke_dasharray: style.dasharray().map(str::to_string),
            extra: Map::new(),
        }
    }

    pub fn style(&self) -> EdgeStyle {
        self.edge_style.unwrap_or_default()
    }
}

/// Edge `type` discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeKind {
    Custom,
    SmoothStep,
    #[default]
    Default,
    Other(String),
}

impl EdgeKind {
    pub fn as_str(&self) -> &str {
        match self {
            EdgeKind::Custom => "custom",
            EdgeKind::SmoothStep => "smoothstep",
            EdgeKind::Default => "default",
            EdgeKind::Other(other) => other,
        }
    }
}

impl From<String> for EdgeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "custom" => EdgeKind::Custom,
            "smoothstep" => EdgeKind::SmoothStep,
            "default" => EdgeKind::Default,
            _ => EdgeKind::Other(value),
        }
    }
}

impl From<EdgeKind> for String {
    fn from(kind: EdgeKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Directed connection between two node handles. `source` and `target` are
/// plain id strings; a missing node is a normal miss, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    #[serde(default, deserialize_with = "or_default")]
    pub source: String,
    #[serde(default, deserialize_with = "or_default")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub kind: Option<EdgeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub data: Option<EdgeData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Edge {
    pub fn style(&self) -> EdgeStyle {
        self.data.as_ref().map(EdgeData::style).unwrap_or_default()
    }

    pub fn dasharray(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.stroke_dasharray.as_deref())
    }

    /// Whether either endpoint names the given node.
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// Named connection points on a node's border.
pub mod handles {
    pub const TOP: &str = "top";
    pub const BOTTOM: &str = "bottom";
    pub const LEFT: &str = "left";
    pub const RIGHT: &str = "right";
    pub const TOP_SOURCE: &str = "top-source";
    pub const BOTTOM_SOURCE: &str = "bottom-source";
    pub const LEFT_SOURCE: &str = "left-source";
    pub const RIGHT_SOURCE: &str = "right-source";
    /// Line endpoints expose a single handle each.
    pub const ENDPOINT_SOURCE: &str = "source";
    pub const ENDPOINT_TARGET: &str = "target";
}

/// The persisted payload for one document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Document {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub viewport: Viewport,
}

impl Document {
    /// Interpret a stored or transmitted `flow_data` value. Nothing stored
    /// (null, empty string, empty object) is the empty document; a JSON string
    /// is decoded first.
    pub fn from_flow_data(flow_data: &Value) -> Result<Self, FlowError> {
        match flow_data {
            Value::Null => Ok(Document::default()),
            Value::String(s) if s.trim().is_empty() => Ok(Document::default()),
            Value::String(s) => {
                let decoded: Value = serde_json::from_str(s)
                    .map_err(|e| FlowError::Schema(format!("stored flow data is not JSON: {e}")))?;
                normalize_document(&decoded)
            }
            Value::Object(map) if map.is_empty() => Ok(Document::default()),
            Value::Array(items) if items.is_empty() => Ok(Document::default()),
            other => normalize_document(other),
        }
    }

    pub fn to_value(&self) -> Result<Value, FlowError> {
        serde_json::to_value(self).map_err(|e| FlowError::Schema(e.to_string()))
    }
}

/// Fill defaults into a raw document.
///
/// Missing collections become empty, a missing or unreadable viewport becomes
/// the default one. Only a non-object payload or a present `nodes`/`edges`
/// that is not a list of identifiable entries is rejected.
pub fn normalize_document(raw: &Value) -> Result<Document, FlowError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| FlowError::Schema("document must be a JSON object".into()))?;

    let nodes = match obj.get("nodes") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| parse_node(index, item))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(FlowError::Schema("`nodes` must be an array".into())),
    };

    let edges = match obj.get("edges") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| parse_edge(index, item))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(FlowError::Schema("`edges` must be an array".into())),
    };

    let viewport = match obj.get("viewport") {
        None | Some(Value::Null) => Viewport::default(),
        Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
            warn!("unreadable viewport replaced by default: {e}");
            Viewport::default()
        }),
    };

    Ok(Document { nodes, edges, viewport })
}

fn parse_node(index: usize, item: &Value) -> Result<Node, FlowError> {
    let obj = item
        .as_object()
        .ok_or_else(|| FlowError::Schema(format!("node #{index} is not an object")))?;
    if !obj.get("id").is_some_and(Value::is_string) {
        return Err(FlowError::Schema(format!("node #{index} has no string `id`")));
    }
    let has_position = obj
        .get("position")
        .and_then(Value::as_object)
        .is_some_and(|p| p.get("x").is_some_and(Value::is_number) && p.get("y").is_some_and(Value::is_number));
    if !has_position {
        return Err(FlowError::Schema(format!("node #{index} has no numeric `position`")));
    }
    serde_json::from_value(item.clone()).map_err(|e| FlowError::Schema(format!("node #{index}: {e}")))
}

fn parse_edge(index: usize, item: &Value) -> Result<Edge, FlowError> {
    let obj = item
        .as_object()
        .ok_or_else(|| FlowError::Schema(format!("edge #{index} is not an object")))?;
    if !obj.get("id").is_some_and(Value::is_string) {
        return Err(FlowError::Schema(format!("edge #{index} has no string `id`")));
    }
    serde_json::from_value(item.clone()).map_err(|e| FlowError::Schema(format!("edge #{index}: {e}")))
}
