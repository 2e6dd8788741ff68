//! Device-control tools the model can invoke by name.

pub mod flashlight;
pub mod phone;
pub mod smart_switch;

pub use flashlight::{FlashlightTool, SysfsTorch, Torch};
pub use phone::{lookup_contact, CommandDialer, Contact, ContactsProvider, Dialer, JsonContacts, PhoneTool};
pub use smart_switch::SmartSwitchTool;

use futures_util::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Invalid tool parameters: {0}")]
    InvalidParameters(String),
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Device error: {0}")]
    Device(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat parameter map as produced by the response interpreter
pub type ToolParameters = HashMap<String, String>;

/// A request to run one tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub parameters: ToolParameters,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, parameters: ToolParameters) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// Case-insensitive, trimmed parameter value
    pub fn param(&self, key: &str) -> Option<&str> {
        param(&self.parameters, key)
    }
}

/// Look up a trimmed, non-empty parameter value
pub fn param<'a>(parameters: &'a ToolParameters, key: &str) -> Option<&'a str> {
    parameters
        .iter()
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

/// What a tool reports back. `message` is what gets spoken, `data` holds
/// structured details keyed by name (empty when there are none).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionResult {
    pub success: bool,
    pub message: String,
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl ToolExecutionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: serde_json::Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: serde_json::Map::new(),
        }
    }

    pub fn with_data(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Parameter summary shown to the model, e.g. `action: on|off`
    fn parameter_help(&self) -> &str;

    /// Check parameters before execution
    fn validate(&self, parameters: &ToolParameters) -> bool;

    async fn execute(&self, parameters: &ToolParameters) -> Result<ToolExecutionResult, ToolError>;
}

/// Tool description for prompt construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: String,
}

/// Name-keyed registry of tools
#[derive(Default)]
pub struct Toolbox {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl Toolbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            log::warn!("Tool '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn catalogue(&self) -> Vec<ToolInfo> {
        self.tools
            .values()
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameter_help().to_string(),
            })
            .collect()
    }

    /// Run a tool by name. Never fails: every problem becomes an unsuccessful result.
    pub async fn execute(&self, name: &str, parameters: &ToolParameters) -> ToolExecutionResult {
        let Some(tool) = self.tools.get(name.trim()) else {
            log::warn!("🔧 Unknown tool requested: {}", name);
            return ToolExecutionResult::failure(format!("Tool '{}' not found", name.trim()));
        };

        if !tool.validate(parameters) {
            log::warn!("🔧 Rejected parameters for {}: {:?}", tool.name(), parameters);
            return ToolExecutionResult::failure(format!(
                "Invalid parameters for {}. Expected {}",
                tool.name(),
                tool.parameter_help()
            ));
        }

        log::info!("🔧 Executing {} with {:?}", tool.name(), parameters);
        match AssertUnwindSafe(tool.execute(parameters)).catch_unwind().await {
            Ok(Ok(result)) => {
                log::info!("🔧 {} -> {} ({})", tool.name(), result.message, result.success);
                result
            }
            Ok(Err(e)) => {
                log::error!("🔧 {} failed: {}", tool.name(), e);
                ToolExecutionResult::failure(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("🔧 {} panicked: {}", tool.name(), message);
                ToolExecutionResult::failure(message)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "tool panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Repeats the text parameter"
        }

        fn parameter_help(&self) -> &str {
            "text: anything"
        }

        fn validate(&self, parameters: &ToolParameters) -> bool {
            param(parameters, "text").is_some()
        }

        async fn execute(&self, parameters: &ToolParameters) -> Result<ToolExecutionResult, ToolError> {
            match param(parameters, "text") {
                Some("fail") => Err(ToolError::ExecutionFailed("echo refused".to_string())),
                Some("panic") => panic!("echo exploded"),
                Some(text) => Ok(ToolExecutionResult::success(text)),
                None => unreachable!(),
            }
        }
    }

    fn params(pairs: &[(&str, &str)]) -> ToolParameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn toolbox() -> Toolbox {
        Toolbox::new().with_tool(Arc::new(EchoTool))
    }

    #[tokio::test]
    async fn test_execute_success() {
        let result = toolbox().execute("echo", &params(&[("text", "hi")])).await;
        assert!(result.success);
        assert_eq!(result.message, "hi");
        assert!(result.data.is_empty());
    }

    #[test]
    fn test_result_data_is_keyed() {
        let result = ToolExecutionResult::success("Calling Mom")
            .with_data("number", "+15550100")
            .with_data("attempts", 1);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data["number"], "+15550100");
        assert_eq!(result.data["attempts"], 1);
        assert!(ToolExecutionResult::failure("nope").data.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let result = toolbox().execute("teleport", &params(&[])).await;
        assert!(!result.success);
        assert!(result.message.contains("not found"));
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let result = toolbox().execute("echo", &params(&[("volume", "11")])).await;
        assert!(!result.success);
        assert!(result.message.contains("Invalid parameters"));
    }

    #[tokio::test]
    async fn test_execution_error_becomes_failure() {
        let result = toolbox().execute("echo", &params(&[("text", "fail")])).await;
        assert!(!result.success);
        assert!(result.message.contains("echo refused"));
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let result = toolbox().execute("echo", &params(&[("text", "panic")])).await;
        assert!(!result.success);
        assert_eq!(result.message, "echo exploded");
    }

    #[test]
    fn test_param_lookup_is_case_insensitive() {
        let p = params(&[("Action", "  on ")]);
        assert_eq!(param(&p, "action"), Some("on"));
        assert_eq!(param(&params(&[("action", " ")]), "action"), None);
    }

    #[test]
    fn test_catalogue_lists_tools() {
        let catalogue = toolbox().catalogue();
        assert_eq!(catalogue.len(), 1);
        assert_eq!(catalogue[0].name, "echo");
        assert_eq!(catalogue[0].parameters, "text: anything");
    }
}
