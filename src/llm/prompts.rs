// System prompt with the tool catalogue and the sentinel reply format

use super::interpret::{PARAMETERS_PREFIX, REASON_PREFIX, TOOL_PREFIX};
use crate::tools::ToolInfo;

pub struct SystemPrompt;

impl SystemPrompt {
    const PERSONA: &'static str = "You are Omar, a helpful voice assistant running on the user's device.

VOICE RESPONSE GUIDELINES:
- Keep responses concise and natural - aim for 1-2 sentences
- Use contractions and casual language
- Never use markdown, lists or emoji - everything you write is spoken aloud";

    /// Build the full prompt for the given tools
    pub fn build(tools: &[ToolInfo]) -> String {
        let mut prompt = String::from(Self::PERSONA);
        prompt.push_str("\n\n");

        if tools.is_empty() {
            prompt.push_str("You have no device tools available. Answer conversationally.\n");
            return prompt;
        }

        prompt.push_str("AVAILABLE TOOLS:\n");
        for tool in tools {
            prompt.push_str(&format!(
                "- {}: {} (parameters: {})\n",
                tool.name, tool.description, tool.parameters
            ));
        }

        prompt.push_str(&format!(
            "
TOOL USAGE:
When the user asks for something a tool can do, reply with exactly these lines and nothing else:
{tool} <tool name>
{params} {{\"<parameter>\": \"<value>\"}}
{reason} <one short sentence to say to the user>

PARAMETERS must be a single flat JSON object with string values.
To use several tools, repeat the three lines once per tool, in the order they should run.
If no tool is needed, just answer conversationally without these lines.
",
            tool = TOOL_PREFIX,
            params = PARAMETERS_PREFIX,
            reason = REASON_PREFIX,
        ));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_tools_and_format() {
        let tools = vec![ToolInfo {
            name: "flashlight".to_string(),
            description: "Turn the phone flashlight on or off".to_string(),
            parameters: "action: on|off|toggle".to_string(),
        }];
        let prompt = SystemPrompt::build(&tools);
        assert!(prompt.contains("- flashlight: Turn the phone flashlight on or off"));
        assert!(prompt.contains("USE_TOOL: <tool name>"));
        assert!(prompt.contains("PARAMETERS: {\"<parameter>\": \"<value>\"}"));
        assert!(prompt.contains("REASON:"));
    }

    #[test]
    fn test_prompt_without_tools() {
        let prompt = SystemPrompt::build(&[]);
        assert!(!prompt.contains("USE_TOOL:"));
        assert!(prompt.contains("no device tools"));
    }
}
