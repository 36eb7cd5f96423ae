// src/client.rs

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{
    config::{ClientConfig, NONCE_HEADER},
    error::FlowError,
    flow::model::{normalize_document, Document, DocumentId},
    logger::RequestTelemetry,
    store::DocumentStoreType,
};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    flow_data: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Stateless transport to the backing store endpoint.
///
/// Holds no document state; two saves in flight race and the last response
/// to arrive is what the store keeps.
#[derive(Debug, Clone)]
pub struct FlowClient {
    http: Client,
    config: ClientConfig,
    telemetry: RequestTelemetry,
}

impl FlowClient {
    pub fn new(config: ClientConfig) -> Result<Self, FlowError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FlowError::Config(format!("cannot build http client: {e}")))?;
        Ok(Self { http, config, telemetry: RequestTelemetry::new("flowboard-client") })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.token.token() {
            Some(token) => request.header(NONCE_HEADER, token),
            None => request,
        }
    }

    /// Fetch a document. A document that was never saved comes back empty.
    #[instrument(skip(self), fields(document = %id))]
    pub async fn fetch_document(&self, id: DocumentId) -> Result<Document, FlowError> {
        let request = self
            .authorize(self.http.get(self.config.flow_url(id)?))
            .header(CONTENT_TYPE, "application/json");
        self.telemetry
            .instrument_request("fetch_document", move || async move {
                let response = request.send().await?;
                let envelope = read_envelope(response).await?;
                let flow_data = envelope.data.map(|d| d.flow_data).unwrap_or(Value::Null);
                Document::from_flow_data(&flow_data)
            })
            .await
    }

    /// Normalize and save `doc`, returning the document the store echoed back.
    ///
    /// `doc` may be anything serializable; if it is not a JSON object nothing
    /// is sent and a validation error is returned.
    #[instrument(skip(self, doc), fields(document = %id))]
    pub async fn save_document<T>(&self, id: DocumentId, doc: &T) -> Result<Document, FlowError>
    where
        T: Serialize + ?Sized,
    {
        let raw = serde_json::to_value(doc).map_err(|e| FlowError::Validation(e.to_string()))?;
        if !raw.is_object() {
            return Err(FlowError::Validation("flow data must be an object".into()));
        }
        let normalized = normalize_document(&raw)?;
        let payload = json!({ "flow_data": normalized.to_value()? });
        let request = self.authorize(self.http.post(self.config.flow_url(id)?)).json(&payload);
        debug!(nodes = normalized.nodes.len(), edges = normalized.edges.len(), "saving document");

        self.telemetry
            .instrument_request("save_document", move || async move {
                let response = request.send().await?;
                let envelope = read_envelope(response).await?;
                match envelope.data {
                    Some(data) => Document::from_flow_data(&data.flow_data),
                    None => Ok(normalized),
                }
            })
            .await
    }
}

async fn read_envelope(response: Response) -> Result<Envelope, FlowError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| format!("backing store answered {status}"));
        return Err(FlowError::from_status(status.as_u16(), message));
    }

    let envelope: Envelope = response.json().await.map_err(|e| FlowError::Transport {
        status: Some(status.as_u16()),
        message: format!("unreadable response body: {e}"),
    })?;
    if !envelope.success {
        return Err(FlowError::Transport {
            status: Some(status.as_u16()),
            message: envelope.message.unwrap_or_else(|| "backing store reported failure".into()),
        });
    }
    Ok(envelope)
}

#[async_trait]
impl DocumentStoreType for FlowClient {
    async fn fetch(&self, id: DocumentId) -> Result<Document, FlowError> {
        self.fetch_document(id).await
    }

    async fn save(&self, id: DocumentId, doc: &Document) -> Result<Document, FlowError> {
        self.save_document(id, doc).await
    }
}
