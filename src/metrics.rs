//! Scrape-time translation of a rate-limit snapshot into Prometheus gauges.
//!
//! Every scrape builds its own registry, so nothing survives between scrapes
//! and a failed fetch can never surface stale values.

use crate::config::Credentials;
use crate::http::{FetchError, RateLimitFetcher, RateLimitSnapshot};
use log::{debug, error};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::time::Duration;
use thiserror::Error;

pub const PULLS_REMAINING: &str = "dockerhub_pulls_remaining";
pub const PULLS_TOTAL: &str = "dockerhub_pulls_total";
const LABELS: [&str; 2] = ["interval", "source"];

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("rate limit retrieval failed at {}: {0}", .0.stage())]
    Fetch(#[from] FetchError),
    #[error("metric encoding failed: {0}")]
    Encode(#[from] prometheus::Error),
}

/// Content type of the text exposition format produced by [`render_snapshot`].
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}

/// Render the remaining and total gauges for one snapshot, followed by the
/// exporter's own process metrics where the platform supports them.
pub fn render_snapshot(snapshot: &RateLimitSnapshot) -> Result<String, prometheus::Error> {
    let registry = Registry::new();
    register_process_collector(&registry)?;
    let interval = snapshot.interval_seconds.to_string();
    let labels = [interval.as_str(), snapshot.source.as_str()];

    let remaining = GaugeVec::new(
        Opts::new(PULLS_REMAINING, "Remaining pulls for Docker Hub"),
        &LABELS,
    )?;
    registry.register(Box::new(remaining.clone()))?;
    // Gauges are f64; counts above 2^53 lose precision.
    remaining
        .get_metric_with_label_values(&labels)?
        .set(snapshot.remaining as f64);

    let total = GaugeVec::new(
        Opts::new(PULLS_TOTAL, "Total allowed pulls for Docker Hub"),
        &LABELS,
    )?;
    registry.register(Box::new(total.clone()))?;
    total
        .get_metric_with_label_values(&labels)?
        .set(snapshot.limit as f64);

    TextEncoder::new().encode_to_string(&registry.gather())
}

#[cfg(target_os = "linux")]
fn register_process_collector(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))
}

#[cfg(not(target_os = "linux"))]
fn register_process_collector(_registry: &Registry) -> Result<(), prometheus::Error> {
    Ok(())
}

/// Runs one fetch per scrape with the configured credentials and timeout.
#[derive(Debug, Clone)]
pub struct MetricsAdapter {
    fetcher: RateLimitFetcher,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl MetricsAdapter {
    pub fn new(
        fetcher: RateLimitFetcher,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            credentials,
            timeout,
        }
    }

    pub async fn collect(&self) -> Result<String, CollectError> {
        let snapshot = match self
            .fetcher
            .fetch(self.credentials.as_ref(), self.timeout)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                error!("Rate limit retrieval failed at {}: {}", e.stage(), e);
                return Err(e.into());
            }
        };
        let body = render_snapshot(&snapshot).map_err(|e| {
            error!("Failed to encode metrics: {}", e);
            e
        })?;
        debug!("Rendered {} bytes of metrics", body.len());
        Ok(body)
    }
}
