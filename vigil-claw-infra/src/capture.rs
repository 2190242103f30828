//! X11 frame capture via external tooling.
//!
//! Captures shell out to whichever screenshot backend is installed (`maim`,
//! then ImageMagick's `import`), with `DISPLAY` set per call so one source
//! serves any number of X servers. Window names resolve to ids through
//! `xdotool search --name` on every capture, so a window that is recreated
//! under the same title keeps working.

use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use vigil_claw_engine::{EngineError, Frame, FrameSource, WaitTarget};

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
pub struct X11FrameSource;

impl X11FrameSource {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// True when at least one capture backend is installed. Used by the
    /// app's health command.
    pub async fn backend_available() -> bool {
        command_exists("maim").await || command_exists("import").await
    }
}

#[async_trait]
impl FrameSource for X11FrameSource {
    async fn capture(&self, display: &str, target: &WaitTarget) -> Result<Frame, EngineError> {
        let png = match target {
            WaitTarget::Screen | WaitTarget::PtySession(_) => capture_root(display).await?,
            WaitTarget::Window(spec) => {
                let window_id = resolve_window(display, spec).await?;
                capture_window(display, window_id).await?
            }
        };
        decode_png(&png)
    }
}

/// Turn a window spec into an X window id: `0x...` hex ids pass through,
/// anything else is treated as a title substring.
async fn resolve_window(display: &str, spec: &str) -> Result<u64, EngineError> {
    if let Some(id) = parse_window_id(spec) {
        return Ok(id);
    }

    let output = run_with_display(
        display,
        "xdotool",
        &["search", "--name", spec],
        RESOLVE_TIMEOUT,
    )
    .await?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| EngineError::Capture(format!("window '{spec}' not found")))?;
    let id = first
        .trim()
        .parse::<u64>()
        .map_err(|_| EngineError::Capture(format!("unparseable window id '{first}'")))?;
    debug!("resolved window '{spec}' to {id}");
    Ok(id)
}

fn parse_window_id(spec: &str) -> Option<u64> {
    let hex = spec.strip_prefix("0x").or_else(|| spec.strip_prefix("0X"))?;
    u64::from_str_radix(hex, 16).ok()
}

async fn capture_root(display: &str) -> Result<Vec<u8>, EngineError> {
    if command_exists("maim").await {
        let output =
            run_with_display(display, "maim", &["/dev/stdout"], CAPTURE_TIMEOUT).await?;
        return Ok(output.stdout);
    }
    if command_exists("import").await {
        let output = run_with_display(
            display,
            "import",
            &["-window", "root", "png:-"],
            CAPTURE_TIMEOUT,
        )
        .await?;
        return Ok(output.stdout);
    }
    Err(EngineError::Capture(
        "no screenshot backend found (install 'maim' or ImageMagick 'import')".to_string(),
    ))
}

async fn capture_window(display: &str, window_id: u64) -> Result<Vec<u8>, EngineError> {
    let id = window_id.to_string();
    if command_exists("maim").await {
        let output = run_with_display(
            display,
            "maim",
            &["-i", &id, "/dev/stdout"],
            CAPTURE_TIMEOUT,
        )
        .await?;
        return Ok(output.stdout);
    }
    if command_exists("import").await {
        let output = run_with_display(
            display,
            "import",
            &["-window", &id, "png:-"],
            CAPTURE_TIMEOUT,
        )
        .await?;
        return Ok(output.stdout);
    }
    Err(EngineError::Capture(
        "no screenshot backend found (install 'maim' or ImageMagick 'import')".to_string(),
    ))
}

async fn command_exists(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

async fn run_with_display(
    display: &str,
    command: &str,
    args: &[&str],
    cap: Duration,
) -> Result<Output, EngineError> {
    let run = Command::new(command)
        .args(args)
        .env("DISPLAY", display)
        .output();
    let output = tokio::time::timeout(cap, run)
        .await
        .map_err(|_| EngineError::Capture(format!("{command} timed out after {}s", cap.as_secs())))?
        .map_err(|e| EngineError::Capture(format!("{command} failed to start: {e}")))?;

    if !output.status.success() {
        return Err(EngineError::Capture(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(output)
}

fn decode_png(png: &[u8]) -> Result<Frame, EngineError> {
    let img = image::load_from_memory(png)
        .map_err(|e| EngineError::Capture(format!("PNG decode failed: {e}")))?
        .to_rgb8();
    let (width, height) = img.dimensions();
    Ok(Frame::new(width, height, img.into_raw()))
}
