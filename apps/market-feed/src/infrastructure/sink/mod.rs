//! HTTP ingestion sink.
//!
//! Posts tick batches as JSON to an ingestion endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::application::ports::{SinkError, TickSink};
use crate::domain::market::TickRecord;

#[derive(Debug, Serialize)]
struct InsertTicksRequest<'a> {
    ticks: &'a [TickRecord],
}

/// Tick sink that POSTs `{"ticks": [...]}` to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpTickSink {
    client: reqwest::Client,
    url: String,
}

impl HttpTickSink {
    /// Create a sink posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::ConnectionError` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::ConnectionError {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TickSink for HttpTickSink {
    async fn insert_ticks(&self, ticks: &[TickRecord]) -> Result<(), SinkError> {
        if ticks.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(&self.url)
            .json(&InsertTicksRequest { ticks })
            .send()
            .await
            .map_err(|e| SinkError::ConnectionError {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                message: format!("{status}: {body}"),
            });
        }

        tracing::debug!(ticks = ticks.len(), "Forwarded tick batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::market::Symbol;

    fn tick() -> TickRecord {
        TickRecord {
            symbol: Symbol::parse("BTC-USD").unwrap(),
            timestamp: 1_700_000_000,
            bid: Some(64_990.0),
            ask: None,
            mid: 64_990.0,
        }
    }

    #[tokio::test]
    async fn posts_ticks_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .and(body_json(json!({
                "ticks": [
                    {"symbol": "BTC-USD", "timestamp": 1_700_000_000, "bid": 64_990.0, "mid": 64_990.0}
                ]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpTickSink::new(format!("{}/ingest", server.uri()), Duration::from_secs(2)).unwrap();

        sink.insert_ticks(&[tick()]).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_batch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let sink = HttpTickSink::new(server.uri(), Duration::from_secs(2)).unwrap();

        let err = sink.insert_ticks(&[tick()]).await.unwrap_err();

        assert!(matches!(err, SinkError::Rejected { .. }));
    }

    #[tokio::test]
    async fn unreachable_sink_is_connection_error() {
        let sink = HttpTickSink::new("http://127.0.0.1:9/ingest", Duration::from_millis(500)).unwrap();

        let err = sink.insert_ticks(&[tick()]).await.unwrap_err();

        assert!(matches!(err, SinkError::ConnectionError { .. }));
    }
}
