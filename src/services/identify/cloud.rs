//! Tier-2 cloud OCR client. Called only when the local grid read is not
//! confident enough. A circuit breaker keeps a flapping provider from
//! stalling the identification queue.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::config::Settings;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CloudHeader {
    pub(crate) last_name: String,
    pub(crate) first_name: String,
    pub(crate) date_of_birth: String,
    pub(crate) confidence: f64,
}

#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { until: Instant },
}

/// Counts consecutive failures; once the threshold is hit the client
/// refuses calls until the cooldown elapses.
#[derive(Debug)]
struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self { state: Mutex::new(BreakerState::Closed { failures: 0 }), failure_threshold, cooldown }
    }

    fn allows(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match *state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { until } => {
                if Instant::now() >= until {
                    *state = BreakerState::Closed { failures: 0 };
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = BreakerState::Closed { failures: 0 };
    }

    fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let failures = match *state {
            BreakerState::Closed { failures } => failures + 1,
            BreakerState::Open { .. } => return,
        };
        if failures >= self.failure_threshold {
            *state = BreakerState::Open { until: Instant::now() + self.cooldown };
        } else {
            *state = BreakerState::Closed { failures };
        }
    }
}

#[derive(Debug)]
pub(crate) struct CloudOcrService {
    client: Client,
    base_url: String,
    api_key: String,
    breaker: CircuitBreaker,
}

impl CloudOcrService {
    /// Returns `None` when no provider is configured; the cascade then
    /// falls through to manual identification.
    pub(crate) fn from_settings(settings: &Settings) -> Result<Option<Self>> {
        let ocr = settings.ocr();
        if ocr.cloud_base_url.trim().is_empty() {
            return Ok(None);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(ocr.cloud_timeout_seconds))
            .build()
            .context("Failed to build cloud OCR HTTP client")?;

        Ok(Some(Self {
            client,
            base_url: ocr.cloud_base_url.trim_end_matches('/').to_string(),
            api_key: ocr.cloud_api_key.clone(),
            breaker: CircuitBreaker::new(
                ocr.breaker_failure_threshold,
                Duration::from_secs(ocr.breaker_cooldown_seconds),
            ),
        }))
    }

    pub(crate) fn available(&self) -> bool {
        self.breaker.allows()
    }

    /// Sends the header crop as base64 PNG and expects the provider to
    /// return the three identity fields with a confidence.
    pub(crate) async fn read_header(&self, header_png: &[u8]) -> Result<CloudHeader> {
        if !self.breaker.allows() {
            anyhow::bail!("cloud OCR circuit breaker is open");
        }

        let endpoint = format!("{}/v1/header", self.base_url);
        let body = json!({
            "image": base64::engine::general_purpose::STANDARD.encode(header_png),
            "format": "png",
        });

        let outcome = self.call(&endpoint, &body).await;
        match &outcome {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        outcome
    }

    async fn call(&self, endpoint: &str, body: &Value) -> Result<CloudHeader> {
        let response = self
            .client
            .post(endpoint)
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .context("Failed to call cloud OCR API")?;

        let status = response.status();
        let raw_body = response.text().await.context("Failed to read cloud OCR response")?;

        if !status.is_success() {
            let parsed: Value = serde_json::from_str(&raw_body).unwrap_or(Value::Null);
            anyhow::bail!(
                "Cloud OCR request failed (status {}): {}",
                status,
                extract_error_message(&parsed)
            );
        }

        serde_json::from_str::<CloudHeader>(&raw_body)
            .with_context(|| format!("Cloud OCR returned an unexpected body: {raw_body}"))
    }
}

fn extract_error_message(payload: &Value) -> String {
    payload
        .get("detail")
        .and_then(Value::as_str)
        .or_else(|| payload.get("message").and_then(Value::as_str))
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_and_recovers() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(10));
        assert!(breaker.allows());

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allows());
        breaker.record_failure();
        assert!(!breaker.allows());

        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.allows());
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.allows());
    }

    #[test]
    fn error_message_prefers_detail() {
        let payload = json!({"detail": "quota exceeded", "message": "other"});
        assert_eq!(extract_error_message(&payload), "quota exceeded");
        assert_eq!(extract_error_message(&Value::Null), "unknown_error");
    }
}
