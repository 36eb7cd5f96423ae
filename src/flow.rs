// src/flow.rs

pub mod controller;
pub mod model;
pub mod session;

pub use controller::{EditMode, FlowController, Line, NEW_NODE_LABEL};
pub use model::{
    normalize_document, Document, DocumentId, Edge, EdgeData, EdgeKind, EdgeStyle, Node, NodeData, NodeKind,
    Position, TextAlign, TextStyle, Viewport,
};
pub use session::{Activity, FlowSession, MountConfig, ToolbarState};
