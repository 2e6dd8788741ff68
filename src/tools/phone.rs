//! Phone calls by contact name or number.

use super::{param, Tool, ToolError, ToolExecutionResult, ToolParameters};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Contact {
    pub name: String,
    pub number: String,
}

impl Contact {
    pub fn new(name: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: number.into(),
        }
    }
}

/// Read-only address book
#[async_trait::async_trait]
pub trait ContactsProvider: Send + Sync {
    /// Contacts whose name contains `fragment`, case-insensitively, in provider order
    async fn query(&self, fragment: &str) -> Result<Vec<Contact>, ToolError>;
}

/// Places or prepares a call
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, number: &str) -> Result<(), ToolError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContactsFile {
    List(Vec<Contact>),
    Map(BTreeMap<String, String>),
}

/// Contacts stored in a JSON file, either a list of `{"name", "number"}`
/// objects or a `{"name": "number"}` map. Re-read on every query.
pub struct JsonContacts {
    path: PathBuf,
}

impl JsonContacts {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Vec<Contact>, ToolError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let file: ContactsFile = serde_json::from_str(&raw).map_err(|e| {
            ToolError::ExecutionFailed(format!("invalid contacts file {}: {}", self.path.display(), e))
        })?;
        Ok(match file {
            ContactsFile::List(contacts) => contacts,
            ContactsFile::Map(map) => map
                .into_iter()
                .map(|(name, number)| Contact { name, number })
                .collect(),
        })
    }
}

#[async_trait::async_trait]
impl ContactsProvider for JsonContacts {
    async fn query(&self, fragment: &str) -> Result<Vec<Contact>, ToolError> {
        let needle = fragment.to_lowercase();
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|contact| contact.name.to_lowercase().contains(&needle))
            .collect())
    }
}

/// Hands a `tel:` URI to an external command such as `xdg-open`
pub struct CommandDialer {
    command: String,
}

impl CommandDialer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait::async_trait]
impl Dialer for CommandDialer {
    async fn dial(&self, number: &str) -> Result<(), ToolError> {
        let status = tokio::process::Command::new(&self.command)
            .arg(format!("tel:{}", number))
            .status()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("{}: {}", self.command, e)))?;
        if !status.success() {
            return Err(ToolError::ExecutionFailed(format!(
                "{} exited with {}",
                self.command, status
            )));
        }
        Ok(())
    }
}

/// Lowercased words longer than two characters
fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|word| word.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Find the best contact for a spoken name.
///
/// The provider is queried with the whole name, then with each token when
/// that finds nothing. An exact case-insensitive match wins; otherwise the
/// first candidate that contains the query or shares a token with it.
pub async fn lookup_contact(
    contacts: &dyn ContactsProvider,
    query: &str,
) -> Result<Option<Contact>, ToolError> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(None);
    }

    let mut candidates = contacts.query(query).await?;
    let query_tokens = tokens(query);
    if candidates.is_empty() {
        for token in &query_tokens {
            for contact in contacts.query(token).await? {
                if !candidates.contains(&contact) {
                    candidates.push(contact);
                }
            }
        }
    }

    let lowered = query.to_lowercase();
    if let Some(exact) = candidates.iter().find(|c| c.name.to_lowercase() == lowered) {
        return Ok(Some(exact.clone()));
    }

    Ok(candidates.into_iter().find(|contact| {
        let name = contact.name.to_lowercase();
        name.contains(&lowered) || tokens(&name).iter().any(|t| query_tokens.contains(t))
    }))
}

/// Keep only characters a dialer understands
fn sanitize_number(number: &str) -> String {
    number
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '*' | '#'))
        .collect()
}

pub struct PhoneTool {
    contacts: Arc<dyn ContactsProvider>,
    dialer: Arc<dyn Dialer>,
}

impl PhoneTool {
    pub const NAME: &'static str = "phone";

    pub fn new(contacts: Arc<dyn ContactsProvider>, dialer: Arc<dyn Dialer>) -> Self {
        Self { contacts, dialer }
    }
}

#[async_trait::async_trait]
impl Tool for PhoneTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Call a contact by name or dial a phone number"
    }

    fn parameter_help(&self) -> &str {
        "action: call|dial (optional), contact: contact name, or number: phone number"
    }

    fn validate(&self, parameters: &ToolParameters) -> bool {
        let action_ok = match param(parameters, "action") {
            Some(action) => matches!(action.to_ascii_lowercase().as_str(), "call" | "dial"),
            None => true,
        };
        let target_ok =
            param(parameters, "contact").is_some() || param(parameters, "number").is_some();
        action_ok && target_ok
    }

    async fn execute(&self, parameters: &ToolParameters) -> Result<ToolExecutionResult, ToolError> {
        let (label, number) = if let Some(raw) = param(parameters, "number") {
            (raw.to_string(), sanitize_number(raw))
        } else {
            let name = param(parameters, "contact")
                .ok_or_else(|| ToolError::InvalidParameters("contact or number required".into()))?;
            match lookup_contact(self.contacts.as_ref(), name).await? {
                Some(contact) => {
                    log::info!("📇 '{}' matched contact {}", name, contact.name);
                    (contact.name, sanitize_number(&contact.number))
                }
                None => {
                    return Ok(ToolExecutionResult::failure(format!(
                        "I couldn't find {} in your contacts",
                        name
                    )))
                }
            }
        };

        if number.is_empty() {
            return Ok(ToolExecutionResult::failure(format!(
                "I don't have a usable number for {}",
                label
            )));
        }

        self.dialer.dial(&number).await?;
        let verb = match param(parameters, "action").map(str::to_ascii_lowercase).as_deref() {
            Some("dial") => "Dialing",
            _ => "Calling",
        };
        Ok(ToolExecutionResult::success(format!("{} {}", verb, label))
            .with_data("number", number))
    }
}
