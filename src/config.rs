use std::{env, fmt::Debug, path::Path, sync::Arc, time::Duration};

use tracing::{info, warn};
use url::Url;

use crate::{error::FlowError, flow::model::DocumentId};

pub const DEFAULT_BASE_URL: &str = "http://localhost/wp-json/";
pub const DEFAULT_NAMESPACE: &str = "bcst-xyflow/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Header carrying the caller's edit token.
pub const NONCE_HEADER: &str = "X-WP-Nonce";

pub const ENV_API_URL: &str = "FLOWBOARD_API_URL";
pub const ENV_NAMESPACE: &str = "FLOWBOARD_NAMESPACE";
pub const ENV_NONCE: &str = "FLOWBOARD_NONCE";
pub const ENV_TIMEOUT_SECS: &str = "FLOWBOARD_TIMEOUT_SECS";

/// Supplies the auth token sent with every request, asked again per request
/// so that a rotated token is picked up.
pub trait TokenProvider: Send + Sync + Debug {
    fn token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token from an environment variable at request time.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenProvider for EnvToken {
    fn token(&self) -> Option<String> {
        env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}

/// Everything the persistence client needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub namespace: String,
    pub timeout: Duration,
    pub token: Arc<dyn TokenProvider>,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, FlowError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            token: Arc::new(StaticToken::none()),
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_token(mut self, token: Arc<dyn TokenProvider>) -> Self {
        self.token = token;
        self
    }

    /// Build from the process environment, after loading `env_file` when it
    /// exists. Variables already set win over the file.
    pub fn from_env(env_file: Option<&Path>) -> Result<Self, FlowError> {
        if let Some(path) = env_file {
            if path.exists() {
                dotenvy::from_path(path)
                    .map_err(|e| FlowError::Config(format!("{}: {e}", path.display())))?;
                info!("Loaded .env from {}", path.display());
            } else {
                warn!("could not load .env from {}", path.display());
            }
        }

        let base_url = env::var(ENV_API_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let mut config = ClientConfig::new(&base_url)?.with_token(Arc::new(EnvToken::new(ENV_NONCE)));
        if let Ok(namespace) = env::var(ENV_NAMESPACE) {
            config = config.with_namespace(namespace);
        }
        if let Ok(raw) = env::var(ENV_TIMEOUT_SECS) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|e| FlowError::Config(format!("{ENV_TIMEOUT_SECS}=`{raw}`: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// `{base}/{namespace}/flow/{id}`
    pub fn flow_url(&self, id: DocumentId) -> Result<Url, FlowError> {
        let path = format!("{}/flow/{}", self.namespace.trim_matches('/'), id);
        self.base_url
            .join(&path)
            .map_err(|e| FlowError::Config(format!("cannot build flow url: {e}")))
    }
}

// A base without a trailing slash would lose its last segment on join.
fn parse_base_url(raw: &str) -> Result<Url, FlowError> {
    let with_slash = if raw.ends_with('/') { raw.to_string() } else { format!("{raw}/") };
    Url::parse(&with_slash).map_err(|e| FlowError::Config(format!("invalid base url `{raw}`: {e}")))
}
