//! Outbound delivery of chunk records.
//!
//! Every send goes through a small admission limiter (at most
//! [`MAX_CONCURRENT_SENDS`] requests in flight) and is retried with
//! exponential backoff: attempt `n >= 2` waits `2^(n-2)` seconds first.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::time::Instant;
use worldmap_metrics::PipelineMetrics;
use worldmap_world::ChunkKey;

use crate::config::Config;
use crate::record::ChunkRecord;

pub const MAX_CONCURRENT_SENDS: usize = 5;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// Posts one JSON body and reports the HTTP status.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, body: &[u8]) -> Result<u16, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, body: &[u8]) -> Result<u16, TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Request(e.to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered { attempts: u32 },
    /// Every attempt failed.
    Exhausted { attempts: u32 },
    /// Shutdown interrupted the send; no further attempts were made.
    Cancelled,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        matches!(self, Delivery::Delivered { .. })
    }
}

/// Delay before the 1-based `attempt`.
pub fn backoff_delay(attempt: u32) -> Duration {
    if attempt < 2 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
    BACKOFF_BASE.saturating_mul(factor)
}

pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    limiter: Semaphore,
    max_retries: u32,
    metrics: Arc<PipelineMetrics>,
    cancel: watch::Sender<bool>,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn Transport>, max_retries: u32, metrics: Arc<PipelineMetrics>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            transport,
            limiter: Semaphore::new(MAX_CONCURRENT_SENDS),
            max_retries: max_retries.max(1),
            metrics,
            cancel,
        }
    }

    /// Client posting to the configured API over HTTP.
    pub fn from_config(config: &Config, metrics: Arc<PipelineMetrics>) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), config.max_retries, metrics))
    }

    /// Abort waiting and in-flight sends. Irreversible.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub async fn send(&self, record: &ChunkRecord) -> Delivery {
        let key = record.key();
        let body = match serde_json::to_vec(record) {
            Ok(body) => body,
            Err(e) => {
                log::error!("Failed to serialize chunk ({}): {}", key, e);
                return Delivery::Exhausted { attempts: 0 };
            }
        };

        let mut cancel = self.cancel.subscribe();
        let _permit = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                log::debug!("Request interrupted for chunk ({})", key);
                return Delivery::Cancelled;
            }
            permit = self.limiter.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Delivery::Cancelled,
            },
        };

        self.send_with_retry(key, &body, &mut cancel).await
    }

    async fn send_with_retry(
        &self,
        key: ChunkKey,
        body: &[u8],
        cancel: &mut watch::Receiver<bool>,
    ) -> Delivery {
        let attempts = self.max_retries;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::select! {
                    biased;
                    _ = cancelled(cancel) => {
                        log::debug!("Retry of chunk ({}) interrupted", key);
                        return Delivery::Cancelled;
                    }
                    _ = tokio::time::sleep(backoff_delay(attempt)) => {}
                }
            }

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancelled(cancel) => {
                    log::debug!("Request interrupted for chunk ({})", key);
                    return Delivery::Cancelled;
                }
                result = self.transport.post_json(body) => result,
            };
            self.metrics.record_send_attempt(attempt, started.elapsed(), body.len());

            let failure = match result {
                Ok(status) if (200..300).contains(&status) => {
                    log::debug!("Successfully sent chunk ({}) - Status: {}", key, status);
                    return Delivery::Delivered { attempts: attempt };
                }
                Ok(status) => format!("API returned error status {}", status),
                Err(e) => e.to_string(),
            };

            if attempt == attempts {
                log::warn!("Sending chunk ({}) failed on attempt {}/{}: {}", key, attempt, attempts, failure);
            } else {
                log::debug!("Sending chunk ({}) failed on attempt {}/{}: {}", key, attempt, attempts, failure);
            }
        }

        Delivery::Exhausted { attempts }
    }
}

/// Resolves once cancellation has been requested.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|&cancelled| cancelled).await.is_err();
    if closed {
        // Sender gone: cancellation can no longer happen
        std::future::pending::<()>().await;
    }
}
