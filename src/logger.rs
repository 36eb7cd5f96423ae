use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub const LOG_FILE: &str = "flowboard.log";
pub const EVENT_FILE: &str = "flowboard-requests.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn new(log_level: impl Into<String>, log_dir: Option<PathBuf>) -> Self {
        Self { log_level: log_level.into(), log_dir }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info", None)
    }
}

/// Install the global subscriber.
///
/// Without a log dir everything goes to stderr. With one, a daily rolling
/// text log and a JSON log of `request` events are written there instead.
/// Installing twice is not an error; the first subscriber stays.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .or_else(|_| EnvFilter::try_new("info"))?
        .add_directive("hyper=off".parse()?)
        .add_directive("reqwest=off".parse()?);

    let installed = match &config.log_dir {
        None => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let txt_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
            let txt_layer = fmt::layer().with_writer(txt_appender).with_ansi(false);

            let json_appender = RollingFileAppender::new(Rotation::DAILY, dir, EVENT_FILE);
            let json_layer = fmt::layer()
                .json()
                .with_writer(json_appender)
                .with_target(true)
                .with_filter(EnvFilter::new("request=info"));

            Registry::default()
                .with(env_filter)
                .with(txt_layer)
                .with(json_layer)
                .try_init()
        }
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

/// Latency, outcome counters and one `request` event per backing store call.
#[derive(Clone)]
pub struct RequestTelemetry {
    requests_started: Counter<u64>,
    requests_succeeded: Counter<u64>,
    requests_failed: Counter<u64>,
    request_latency_ms: Histogram<f64>,
}

impl std::fmt::Debug for RequestTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RequestTelemetry")
    }
}

impl RequestTelemetry {
    pub fn new(scope: &'static str) -> Self {
        let meter = global::meter(scope);
        Self {
            requests_started: meter
                .u64_counter("requests_started")
                .with_description("Total requests started")
                .build(),
            requests_succeeded: meter.u64_counter("requests_succeeded").build(),
            requests_failed: meter.u64_counter("requests_failed").build(),
            request_latency_ms: meter
                .f64_histogram("request_latency_ms")
                .with_description("Latency per request in ms")
                .with_unit("ms")
                .build(),
        }
    }

    /// Run `handler`, logging how it went and how long it took.
    pub async fn instrument_request<F, Fut, T, E>(&self, name: &str, handler: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.requests_started.add(1, &[]);
        let start = Instant::now();

        let result = handler().await;

        let elapsed = start.elapsed().as_secs_f64() * 1_000.0;
        self.request_latency_ms.record(elapsed, &[]);

        match &result {
            Ok(_) => {
                self.requests_succeeded.add(1, &[]);
                info!("request `{}` succeeded in {:.1} ms", name, elapsed);
            }
            Err(err) => {
                self.requests_failed.add(1, &[]);
                error!(error = %err, "request `{}` failed in {:.1} ms", name, elapsed);
            }
        }

        tracing::event!(
            target: "request",
            tracing::Level::INFO,
            request = name,
            latency_ms = elapsed,
            status = if result.is_ok() { "ok" } else { "error" },
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_instrument_request_passes_result_through() {
        let telemetry = RequestTelemetry::new("flowboard-test");
        let ok: Result<u8, String> = telemetry.instrument_request("ok", || async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let failed: Result<u8, String> = telemetry
            .instrument_request("fail", || async { Err("boom".to_string()) })
            .await;
        assert_eq!(failed, Err("boom".to_string()));
    }

    #[test]
    fn test_init_tracing_with_log_dir() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        init_tracing(&LogConfig::new("debug", Some(logs.clone()))).unwrap();
        assert!(logs.is_dir());
        // a second install is tolerated
        init_tracing(&LogConfig::default()).unwrap();
    }
}
