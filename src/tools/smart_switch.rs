use super::{param, Tool, ToolError, ToolExecutionResult, ToolParameters};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const DEFAULT_DEVICE: &str = "light";

/// Simulated smart plug. There is no vendor protocol behind it: every
/// command succeeds after a short delay and the state is only kept in memory.
pub struct SmartSwitchTool {
    delay: Duration,
    states: Mutex<HashMap<String, bool>>,
}

impl SmartSwitchTool {
    pub const NAME: &'static str = "smart_switch";

    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Last state set for `device`, if any
    pub fn state(&self, device: &str) -> Option<bool> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(&device.to_lowercase()).copied())
    }
}

impl Default for SmartSwitchTool {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

fn parse_action(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

#[async_trait::async_trait]
impl Tool for SmartSwitchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Switch a smart light or plug on or off"
    }

    fn parameter_help(&self) -> &str {
        "action: on|off, device: name of the light or plug (optional)"
    }

    fn validate(&self, parameters: &ToolParameters) -> bool {
        param(parameters, "action").and_then(parse_action).is_some()
    }

    async fn execute(&self, parameters: &ToolParameters) -> Result<ToolExecutionResult, ToolError> {
        let on = param(parameters, "action")
            .and_then(parse_action)
            .ok_or_else(|| ToolError::InvalidParameters("action must be on or off".into()))?;
        let device = param(parameters, "device").unwrap_or(DEFAULT_DEVICE).to_lowercase();

        tokio::time::sleep(self.delay).await;
        self.states
            .lock()
            .map_err(|_| ToolError::ExecutionFailed("switch state poisoned".into()))?
            .insert(device.clone(), on);

        let state = if on { "on" } else { "off" };
        log::info!("💡 Smart switch '{}' set {}", device, state);
        Ok(ToolExecutionResult::success(format!("Turned {} the {}", state, device)))
    }
}
