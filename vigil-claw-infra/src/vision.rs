//! HTTP vision client.
//!
//! Speaks the OpenAI-compatible `/chat/completions` shape most local model
//! servers (ollama, vLLM, OpenRouter) expose: one text prompt carrying the
//! condition, one base64 JPEG of the frame. The reply text goes back to the
//! engine's verdict parser untouched.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, warn};

use vigil_claw_engine::{EngineError, Frame, VisionAdapter};

/// Model upload ceiling; enough resolution for a yes/no condition check.
const FRAME_MAX_DIM: u32 = 960;
const FRAME_JPEG_QUALITY: u8 = 72;
const MAX_REPLY_TOKENS: u32 = 300;

const SYSTEM_INSTRUCTIONS: &str = "You are a visual condition evaluator for GUI and terminal \
screenshots. Look at the screenshot and decide if the stated condition is met. Be decisive: \
answer YES if the evidence is reasonably clear. Only answer NO if the evidence is genuinely \
absent or contradicts the condition. Follow the output format in the user prompt exactly.";

/// Where and what to ask.
#[derive(Debug, Clone)]
pub struct VisionEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_retries: u32,
}

/// Trips open after consecutive failures so a dead model server doesn't eat
/// a retry storm every poll tick.
struct CircuitBreaker {
    consecutive_failures: AtomicUsize,
    breaker_open: AtomicBool,
    opened_at: Mutex<Option<Instant>>,
    failure_threshold: usize,
    cooldown: Duration,
}

impl CircuitBreaker {
    fn new(failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: AtomicUsize::new(0),
            breaker_open: AtomicBool::new(false),
            opened_at: Mutex::new(None),
            failure_threshold,
            cooldown,
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.breaker_open.store(false, Ordering::SeqCst);
        *self.opened_at.lock() = None;
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            self.breaker_open.store(true, Ordering::SeqCst);
            *self.opened_at.lock() = Some(Instant::now());
        }
    }

    fn should_allow_request(&self) -> Result<(), EngineError> {
        if !self.breaker_open.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(opened_at) = *self.opened_at.lock() {
            if opened_at.elapsed() >= self.cooldown {
                // Allow one trial request through.
                return Ok(());
            }
        }
        Err(EngineError::Vision(
            "circuit breaker open: vision service unavailable".to_string(),
        ))
    }
}

pub struct HttpVisionAdapter {
    endpoint: VisionEndpoint,
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

impl HttpVisionAdapter {
    pub fn new(endpoint: VisionEndpoint) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint,
            client,
            breaker: Arc::new(CircuitBreaker::new(5, Duration::from_secs(30))),
        }
    }

    /// Probe the backend. Used by the app's health command.
    pub async fn check_health(&self) -> Result<(), EngineError> {
        let url = format!("{}/models", self.endpoint.base_url);
        let mut request = self.client.get(&url);
        if let Some(api_key) = &self.endpoint.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Vision(format!("health probe failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Vision(format!(
                "health probe returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn call_once(&self, jpeg_b64: &str, condition: &str) -> Result<String, EngineError> {
        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let body = json!({
            "model": self.endpoint.model,
            "max_tokens": MAX_REPLY_TOKENS,
            "messages": [
                {"role": "system", "content": SYSTEM_INSTRUCTIONS},
                {"role": "user", "content": [
                    {"type": "text", "text": build_prompt(condition)},
                    {"type": "image_url", "image_url": {
                        "url": format!("data:image/jpeg;base64,{jpeg_b64}")
                    }},
                ]},
            ],
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.endpoint.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Vision(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = match status.as_u16() {
                401 => "invalid API key (401 Unauthorized)".to_string(),
                429 => "rate limit exceeded (429 Too Many Requests)".to_string(),
                _ => format!("HTTP error: {status}"),
            };
            return Err(EngineError::Vision(message));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Vision(format!("failed to parse response: {e}")))?;
        let content = payload["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| EngineError::Vision("no choices in response".to_string()))?;
        Ok(content.to_string())
    }
}

#[async_trait]
impl VisionAdapter for HttpVisionAdapter {
    async fn evaluate(&self, frame: &Frame, condition: &str) -> Result<String, EngineError> {
        self.breaker.should_allow_request()?;

        let jpeg = encode_jpeg(frame)?;
        let jpeg_b64 = BASE64.encode(&jpeg);
        debug!(bytes = jpeg.len(), "frame encoded for vision call");

        let mut last_error = None;
        for attempt in 0..=self.endpoint.max_retries {
            match self.call_once(&jpeg_b64, condition).await {
                Ok(reply) => {
                    self.breaker.record_success();
                    return Ok(reply);
                }
                Err(e) => {
                    warn!("vision call failed (attempt {}): {e}", attempt + 1);
                    last_error = Some(e);
                    if attempt < self.endpoint.max_retries {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
        self.breaker.record_failure();

        Err(last_error
            .unwrap_or_else(|| EngineError::Vision("vision call failed".to_string())))
    }
}

fn build_prompt(condition: &str) -> String {
    format!(
        "Look at this screenshot and tell me if the following condition is met.\n\n\
         CONDITION: {condition}\n\n\
         Reply with ONLY one of these two formats:\n\
         YES: <one sentence of visible evidence confirming the condition is met>\n\
         NO: <one sentence explaining what is missing or not yet visible>"
    )
}

/// Resize to the upload ceiling and JPEG-compress.
fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>, EngineError> {
    let img = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
        .ok_or_else(|| EngineError::Vision("frame buffer does not match dimensions".into()))?;

    let wider = frame.width.max(frame.height);
    let img = if wider > FRAME_MAX_DIM {
        let scale = f64::from(FRAME_MAX_DIM) / f64::from(wider);
        let new_w = (f64::from(frame.width) * scale).round().max(1.0) as u32;
        let new_h = (f64::from(frame.height) * scale).round().max(1.0) as u32;
        image::imageops::resize(&img, new_w, new_h, FilterType::Triangle)
    } else {
        img
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(Cursor::new(&mut jpeg), FRAME_JPEG_QUALITY)
        .encode_image(&img)
        .map_err(|e| EngineError::Vision(format!("JPEG encode failed: {e}")))?;
    Ok(jpeg)
}
