//! Harvest data sources
//!
//! A [`DataSource`] produces the record appended to the harvest batch on
//! every harvest tick.

use crate::models::HarvestRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Produces one record per harvest tick
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn collect(&self) -> Result<HarvestRecord>;
}

/// Source that always yields an empty object
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySource;

#[async_trait]
impl DataSource for EmptySource {
    async fn collect(&self) -> Result<HarvestRecord> {
        Ok(HarvestRecord::new(json!({})))
    }
}

/// Source that GETs a JSON document from a sensor endpoint
///
/// The request duration is attached as the record's collector time.
pub struct HttpSource {
    client: Client,
    url: Url,
}

impl HttpSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid sensor URL: {}", url))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl DataSource for HttpSource {
    async fn collect(&self) -> Result<HarvestRecord> {
        let start = Instant::now();
        let payload: Value = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .context("Sensor request failed")?
            .error_for_status()
            .context("Sensor returned an error status")?
            .json()
            .await
            .context("Sensor response is not JSON")?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(HarvestRecord::new(payload).with_collector_time(elapsed_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_source() {
        let record = EmptySource.collect().await.unwrap();
        assert_eq!(record.payload, json!({}));
        assert_eq!(record.collector_request_time, None);
    }

    #[tokio::test]
    async fn test_http_source_measures_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sensors/4")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"cars": 12, "sensor": 4}"#)
            .create_async()
            .await;

        let source =
            HttpSource::new(&format!("{}/sensors/4", server.url()), Duration::from_secs(5)).unwrap();
        let record = source.collect().await.unwrap();

        mock.assert_async().await;
        assert_eq!(record.payload["cars"], json!(12));
        assert!(record.collector_request_time.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_http_source_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/down")
            .with_status(503)
            .create_async()
            .await;

        let source = HttpSource::new(&format!("{}/down", server.url()), Duration::from_secs(5)).unwrap();
        assert!(source.collect().await.is_err());
    }

    #[test]
    fn test_http_source_rejects_bad_url() {
        assert!(HttpSource::new("not a url", Duration::from_secs(1)).is_err());
    }
}
