//! Core type definitions for the smart-wait engine.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::interfaces::EngineError;

/// What to capture on a display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum WaitTarget {
    /// The whole display.
    Screen,
    /// A specific window, by `0x...` hex id or title substring.
    Window(String),
    /// A pty session. Captured like `Screen`; the session id is advisory.
    PtySession(String),
}

impl FromStr for WaitTarget {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "screen" {
            return Ok(Self::Screen);
        }
        match s.split_once(':') {
            Some(("window", id)) if !id.is_empty() => Ok(Self::Window(id.to_string())),
            Some(("pty", id)) if !id.is_empty() => Ok(Self::PtySession(id.to_string())),
            _ => Err(EngineError::InvalidArg(format!(
                "invalid target '{s}': use screen, window:<id-or-name>, or pty:<session>"
            ))),
        }
    }
}

impl std::fmt::Display for WaitTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Screen => write!(f, "screen"),
            Self::Window(id) => write!(f, "window:{id}"),
            Self::PtySession(id) => write!(f, "pty:{id}"),
        }
    }
}

/// Lifecycle state of a wait job. Everything except `Watching` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStatus {
    Watching,
    Resolved,
    Timeout,
    Cancelled,
    Error,
}

impl WaitStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Watching)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Watching => "watching",
            Self::Resolved => "resolved",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for WaitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaitStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watching" => Ok(Self::Watching),
            "resolved" => Ok(Self::Resolved),
            "timeout" => Ok(Self::Timeout),
            "cancelled" => Ok(Self::Cancelled),
            "error" => Ok(Self::Error),
            other => Err(EngineError::InvalidArg(format!("unknown status '{other}'"))),
        }
    }
}

/// Outcome of one vision evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictState {
    Resolved,
    Watching,
}

/// Parsed form of a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub state: VerdictState,
    pub detail: String,
}

/// A captured frame, tightly packed RGB8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width as usize) * (height as usize) * 3);
        Self {
            width,
            height,
            pixels,
        }
    }
}

/// Read-only view of a job, as returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitSnapshot {
    pub id: String,
    pub status: WaitStatus,
    pub elapsed_s: u64,
    pub target: String,
    pub criteria: String,
    pub last_detail: String,
    pub timeout_s: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Fields accepted by `Engine::update`.
#[derive(Debug, Clone, Default)]
pub struct WaitUpdate {
    /// Replace the condition being watched for.
    pub criteria: Option<String>,
    /// Reset the deadline to `now + timeout_s`.
    pub timeout_s: Option<u64>,
    /// Append a note to the job's history.
    pub note: Option<String>,
}

/// Engine tuning knobs. Every semantic knob lives here; anything not listed
/// does not affect engine behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Downsample frames so the wider dimension is at most this many pixels
    /// before diffing.
    pub diff_downsample_width: u32,
    /// Per-channel intensity delta (0-255) counted as a changed pixel.
    pub diff_pixel_threshold: u8,
    /// Fraction of changed pixels (0-1) that makes a frame worth evaluating.
    pub diff_change_ratio: f64,
    /// Lower clamp for per-job polling intervals, seconds.
    pub min_poll_s: f64,
    /// Upper clamp for per-job polling intervals, seconds.
    pub max_poll_s: f64,
    /// Timeout applied when a registration does not supply one, seconds.
    pub default_timeout_s: u64,
    /// Wall-clock cap on a single wake notification, seconds.
    pub wake_notify_timeout_s: u64,
    /// Tag used in wake messages, e.g. `[smart_wait resolved]`.
    pub wake_state_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            diff_downsample_width: 320,
            diff_pixel_threshold: 10,
            diff_change_ratio: 0.01,
            min_poll_s: 0.5,
            max_poll_s: 5.0,
            default_timeout_s: 300,
            wake_notify_timeout_s: 10,
            wake_state_prefix: "smart_wait".to_string(),
        }
    }
}

impl EngineConfig {
    /// Build a config from `VIGIL_*` environment variables, falling back to
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            diff_downsample_width: env_parse("VIGIL_DIFF_MAX_WIDTH", base.diff_downsample_width),
            diff_pixel_threshold: env_parse("VIGIL_DIFF_PIXEL_THRESHOLD", base.diff_pixel_threshold),
            diff_change_ratio: env_parse("VIGIL_DIFF_CHANGE_RATIO", base.diff_change_ratio),
            min_poll_s: env_parse("VIGIL_MIN_POLL_S", base.min_poll_s),
            max_poll_s: env_parse("VIGIL_MAX_POLL_S", base.max_poll_s),
            default_timeout_s: env_parse("VIGIL_DEFAULT_TIMEOUT_S", base.default_timeout_s),
            wake_notify_timeout_s: env_parse("VIGIL_WAKE_TIMEOUT_S", base.wake_notify_timeout_s),
            wake_state_prefix: std::env::var("VIGIL_WAKE_PREFIX")
                .unwrap_or(base.wake_state_prefix),
        }
    }

    /// Clamp a requested polling interval into `[min_poll, max_poll]`.
    /// Degenerate configuration (inverted or negative bounds) and
    /// non-finite requests still yield a usable interval.
    #[must_use]
    pub fn clamp_poll(&self, requested_s: f64) -> Duration {
        let lo = self.min_poll_s.min(self.max_poll_s).max(0.0);
        let hi = self.max_poll_s.max(lo);
        let requested = if requested_s.is_finite() { requested_s } else { hi };
        Duration::from_secs_f64(requested.clamp(lo, hi))
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse_screen() {
        assert_eq!("screen".parse::<WaitTarget>().unwrap(), WaitTarget::Screen);
    }

    #[test]
    fn test_target_parse_window_by_name() {
        let target = "window:Mozilla Firefox".parse::<WaitTarget>().unwrap();
        assert_eq!(target, WaitTarget::Window("Mozilla Firefox".to_string()));
    }

    #[test]
    fn test_target_parse_window_by_hex_id() {
        let target = "window:0x3c00007".parse::<WaitTarget>().unwrap();
        assert_eq!(target, WaitTarget::Window("0x3c00007".to_string()));
    }

    #[test]
    fn test_target_parse_pty() {
        let target = "pty:build-7".parse::<WaitTarget>().unwrap();
        assert_eq!(target, WaitTarget::PtySession("build-7".to_string()));
    }

    #[test]
    fn test_target_parse_unknown_prefix() {
        let err = "webcam:0".parse::<WaitTarget>().unwrap_err();
        assert!(matches!(err, EngineError::InvalidArg(_)));
    }

    #[test]
    fn test_target_parse_empty_id() {
        assert!("window:".parse::<WaitTarget>().is_err());
    }

    #[test]
    fn test_target_display_round_trip() {
        for raw in ["screen", "window:xterm", "pty:sess-1"] {
            let target = raw.parse::<WaitTarget>().unwrap();
            assert_eq!(target.to_string(), raw);
        }
    }

    #[test]
    fn test_status_terminal() {
        assert!(!WaitStatus::Watching.is_terminal());
        assert!(WaitStatus::Resolved.is_terminal());
        assert!(WaitStatus::Timeout.is_terminal());
        assert!(WaitStatus::Cancelled.is_terminal());
        assert!(WaitStatus::Error.is_terminal());
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&WaitStatus::Resolved).unwrap();
        assert_eq!(json, r#""resolved""#);
    }

    #[test]
    fn test_clamp_poll_below_min() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_poll(0.1), Duration::from_secs_f64(0.5));
    }

    #[test]
    fn test_clamp_poll_above_max() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_poll(60.0), Duration::from_secs_f64(5.0));
    }

    #[test]
    fn test_clamp_poll_in_range() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_poll(2.0), Duration::from_secs_f64(2.0));
    }

    #[test]
    fn test_clamp_poll_survives_bad_input() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_poll(f64::NAN), Duration::from_secs_f64(5.0));

        let inverted = EngineConfig {
            min_poll_s: 5.0,
            max_poll_s: 0.5,
            ..EngineConfig::default()
        };
        let clamped = inverted.clamp_poll(2.0);
        assert!(clamped >= Duration::from_secs_f64(0.5));
        assert!(clamped <= Duration::from_secs_f64(5.0));
    }
}
