use super::{param, Tool, ToolError, ToolExecutionResult, ToolParameters};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A controllable torch LED
#[async_trait::async_trait]
pub trait Torch: Send + Sync {
    async fn set(&self, on: bool) -> Result<(), ToolError>;

    async fn is_on(&self) -> Result<bool, ToolError>;
}

/// Torch exposed through the Linux LED class (`/sys/class/leds/<name>`)
pub struct SysfsTorch {
    path: PathBuf,
}

impl SysfsTorch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_number(&self, file: &str) -> Result<u32, ToolError> {
        let raw = tokio::fs::read_to_string(self.path.join(file)).await?;
        raw.trim()
            .parse()
            .map_err(|_| ToolError::Device(format!("unexpected {} value '{}'", file, raw.trim())))
    }
}

#[async_trait::async_trait]
impl Torch for SysfsTorch {
    async fn set(&self, on: bool) -> Result<(), ToolError> {
        let level = if on {
            // LEDs without max_brightness are plain on/off
            self.read_number("max_brightness").await.unwrap_or(1)
        } else {
            0
        };
        tokio::fs::write(self.path.join("brightness"), level.to_string())
            .await
            .map_err(|e| ToolError::Device(format!("{}: {}", self.path.display(), e)))?;
        log::debug!("Torch brightness set to {}", level);
        Ok(())
    }

    async fn is_on(&self) -> Result<bool, ToolError> {
        Ok(self.read_number("brightness").await? > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashlightAction {
    On,
    Off,
    Toggle,
}

impl FlashlightAction {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            "toggle" => Some(Self::Toggle),
            _ => None,
        }
    }
}

pub struct FlashlightTool {
    torch: Arc<dyn Torch>,
}

impl FlashlightTool {
    pub const NAME: &'static str = "flashlight";

    pub fn new(torch: Arc<dyn Torch>) -> Self {
        Self { torch }
    }
}

#[async_trait::async_trait]
impl Tool for FlashlightTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Turn the phone flashlight on or off"
    }

    fn parameter_help(&self) -> &str {
        "action: on|off|toggle"
    }

    fn validate(&self, parameters: &ToolParameters) -> bool {
        param(parameters, "action")
            .and_then(FlashlightAction::parse)
            .is_some()
    }

    async fn execute(&self, parameters: &ToolParameters) -> Result<ToolExecutionResult, ToolError> {
        let action = param(parameters, "action")
            .and_then(FlashlightAction::parse)
            .ok_or_else(|| ToolError::InvalidParameters("action must be on, off or toggle".into()))?;

        let on = match action {
            FlashlightAction::On => true,
            FlashlightAction::Off => false,
            FlashlightAction::Toggle => !self.torch.is_on().await?,
        };
        self.torch.set(on).await?;

        let state = if on { "on" } else { "off" };
        Ok(ToolExecutionResult::success(format!("Flashlight turned {}", state))
            .with_data("on", on))
    }
}
