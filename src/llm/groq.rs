use super::{api_error, ConversationMessage, LlmConfig, LlmError, LlmProvider};
use reqwest::Client;
use serde_json::{json, Value};

/// OpenAI-compatible chat completions on Groq
pub struct GroqProvider {
    client: Client,
    api_key: String,
    base_url: String,
    config: LlmConfig,
}

impl GroqProvider {
    pub fn new(api_key: String, config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            config,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn payload(&self, system_prompt: &str, history: &[ConversationMessage], transcript: &str) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": system_prompt })];
        messages.extend(history.iter().map(|msg| {
            json!({
                "role": msg.role.to_string(),
                "content": msg.content
            })
        }));
        messages.push(json!({ "role": "user", "content": transcript }));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "stream": false
        });
        if let Some(max_tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        payload
    }

    fn parse_response(response_text: &str) -> Result<String, LlmError> {
        let json: Value = serde_json::from_str(response_text)
            .map_err(|e| LlmError::ParseError(format!("Invalid JSON: {}", e)))?;

        let choices = json["choices"]
            .as_array()
            .ok_or_else(|| LlmError::ParseError("Missing 'choices' field".to_string()))?;
        let first_choice = choices
            .first()
            .ok_or_else(|| LlmError::ParseError("Empty choices array".to_string()))?;

        Ok(first_choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string())
    }
}

#[async_trait::async_trait]
impl LlmProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
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
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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

    fn provider() -> GroqProvider {
        GroqProvider::new("gsk_test".to_string(), LlmConfig::for_model("llama-3.3-70b-versatile"))
            .unwrap()
    }

    #[test]
    fn test_payload_orders_messages() {
        let history = vec![
            ConversationMessage::user("hi"),
            ConversationMessage::assistant("hello"),
        ];
        let payload = provider().payload("be brief", &history, "turn on the light");
        let messages = payload["messages"].as_array().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[3]["content"], "turn on the light");
        assert_eq!(payload["model"], "llama-3.3-70b-versatile");
        assert_eq!(payload["max_tokens"], 1024);
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hi there"}}]}"#;
        assert_eq!(GroqProvider::parse_response(body).unwrap(), "Hi there");

        assert!(matches!(
            GroqProvider::parse_response(r#"{"choices":[]}"#),
            Err(LlmError::ParseError(_))
        ));
        assert!(GroqProvider::parse_response("not json").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let provider = provider().with_base_url("http://127.0.0.1:9/v1");
        let result = provider.complete("sys", &[], "hello").await;
        assert!(matches!(result, Err(LlmError::Request(_))));
    }

    #[cfg(feature = "test-api")]
    #[tokio::test]
    async fn test_live_completion() {
        dotenvy::dotenv().ok();
        let key = std::env::var("GROQ_API_KEY").expect("GROQ_API_KEY required");
        let provider =
            GroqProvider::new(key, LlmConfig::for_model("llama-3.3-70b-versatile")).unwrap();
        let text = provider
            .complete("Answer with one word.", &[], "Say hello")
            .await
            .unwrap();
        assert!(!text.is_empty());
    }
}
