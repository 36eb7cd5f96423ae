pub mod client;
pub mod color;
pub mod config;
pub mod error;
pub mod flow;
pub mod label;
pub mod logger;
pub mod schema;
pub mod server;
pub mod store;

pub use client::FlowClient;
pub use config::ClientConfig;
pub use error::FlowError;
pub use flow::{Document, DocumentId, FlowController, FlowSession};
pub use store::{DocumentStore, DocumentStoreType, MemoryBackingStore};
