use super::{api_error, ConversationMessage, LlmConfig, LlmError, LlmProvider, Role};
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

/// Google Gemini through the `generateContent` REST endpoint
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    config: LlmConfig,
}

impl GeminiProvider {
    pub fn new(api_key: String, config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            config,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Carries no credentials. The key goes in the `x-goog-api-key` header.
    fn endpoint(&self) -> Result<Url, LlmError> {
        Url::parse(&format!(
            "{}/models/{}:generateContent",
            self.base_url, self.config.model
        ))
        .map_err(|e| LlmError::Config(format!("invalid Gemini URL: {}", e)))
    }

    fn payload(&self, system_prompt: &str, history: &[ConversationMessage], transcript: &str) -> Value {
        // Gemini has no system turns, so system notes join the instruction
        let mut instruction = system_prompt.to_string();
        let mut contents: Vec<Value> = Vec::with_capacity(history.len() + 1);
        for msg in history {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => {
                    instruction.push_str("\n\n");
                    instruction.push_str(&msg.content);
                    continue;
                }
            };
            contents.push(json!({ "role": role, "parts": [{ "text": msg.content }] }));
        }
        contents.push(json!({ "role": "user", "parts": [{ "text": transcript }] }));

        let mut generation_config = json!({ "temperature": self.config.temperature });
        if let Some(max_tokens) = self.config.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }

        json!({
            "systemInstruction": { "parts": [{ "text": instruction }] },
            "contents": contents,
            "generationConfig": generation_config
        })
    }

    fn parse_response(response_text: &str) -> Result<String, LlmError> {
        let json: Value = serde_json::from_str(response_text)
            .map_err(|e| LlmError::ParseError(format!("Invalid JSON: {}", e)))?;

        let candidate = json["candidates"]
            .as_array()
            .and_then(|candidates| candidates.first())
            .ok_or_else(|| {
                let reason = json["promptFeedback"]["blockReason"].as_str().unwrap_or("none");
                LlmError::ParseError(format!("No candidates (block reason: {})", reason))
            })?;

        let parts = candidate["content"]["parts"]
            .as_array()
            .ok_or_else(|| LlmError::ParseError("Missing 'content.parts' field".to_string()))?;

        Ok(parts
            .iter()
            .filter_map(|part| part["text"].as_str())
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait::async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ConversationMessage],
        transcript: &str,
    ) -> Result<String, LlmError> {
        let response = self
            .client
            .post(self.endpoint()?)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.payload(system_prompt, history, transcript))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let response_text = response.text().await?;
        Self::parse_response(&response_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GeminiProvider {
        GeminiProvider::new("AIzaTest".to_string(), LlmConfig::for_model("gemini-1.5-flash")).unwrap()
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            provider().endpoint().unwrap().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_transport_error_does_not_reveal_key() {
        // Nothing listens on the discard port
        let provider = GeminiProvider::new(
            "AIzaSECRETKEY123".to_string(),
            LlmConfig::for_model("gemini-1.5-flash"),
        )
        .unwrap()
        .with_base_url("http://127.0.0.1:9/v1beta");

        let error = provider
            .complete("be brief", &[], "hello")
            .await
            .expect_err("request should fail");
        assert!(matches!(error, LlmError::Request(_)));
        assert!(!error.to_string().contains("AIzaSECRETKEY123"));
        assert!(!format!("{:?}", error).contains("AIzaSECRETKEY123"));
    }

    #[test]
    fn test_payload_maps_roles() {
        let history = vec![
            ConversationMessage::user("hi"),
            ConversationMessage::assistant("hello"),
        ];
        let payload = provider().payload("be brief", &history, "what time is it");
        let contents = payload["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "what time is it");
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_system_messages_join_instruction() {
        let history = vec![
            ConversationMessage::system("The user is driving"),
            ConversationMessage::user("hi"),
        ];
        let payload = provider().payload("be brief", &history, "call home");
        assert_eq!(payload["contents"].as_array().unwrap().len(), 2);
        assert_eq!(
            payload["systemInstruction"]["parts"][0]["text"],
            "be brief\n\nThe user is driving"
        );
    }

    #[test]
    fn test_parse_response_joins_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"USE_TOOL: flashlight\n"},{"text":"PARAMETERS: {}"}]}}]}"#;
        assert_eq!(
            GeminiProvider::parse_response(body).unwrap(),
            "USE_TOOL: flashlight\nPARAMETERS: {}"
        );
    }

    #[test]
    fn test_blocked_prompt() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        match GeminiProvider::parse_response(body) {
            Err(LlmError::ParseError(message)) => assert!(message.contains("SAFETY")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
