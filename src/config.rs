use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use strum::{Display, EnumString};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Which hosted model answers the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    Gemini,
    Groq,
}

/// API keys for the hosted services. Keys are optional at load time so the
/// assistant can run with whichever provider is configured.
#[derive(Debug)]
pub struct ApiConfig {
    pub gemini_key: Option<SecretBox<String>>,
    pub groq_key: Option<SecretBox<String>>,
    pub elevenlabs_key: Option<SecretBox<String>>,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        Ok(Self {
            gemini_key: Self::load_api_key("GEMINI_API_KEY", "Gemini")?,
            groq_key: Self::load_api_key("GROQ_API_KEY", "Groq")?,
            elevenlabs_key: Self::load_api_key("ELEVENLABS_API_KEY", "ElevenLabs")?,
        })
    }

    /// Load and validate a single API key. An unset variable is not an error.
    fn load_api_key(
        env_var: &str,
        service_name: &str,
    ) -> Result<Option<SecretBox<String>>, ConfigError> {
        let key = match env::var(env_var) {
            Ok(key) => key,
            Err(env::VarError::NotPresent) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service_name.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }

        Self::validate_key_format(&key, service_name)?;

        Ok(Some(SecretBox::new(Box::new(key))))
    }

    /// Validate API key format for each service
    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        match service {
            "Gemini" => {
                // Google API keys start with "AIza"
                if !key.starts_with("AIza") {
                    return Err(ConfigError::InvalidKeyFormat {
                        service: service.to_string(),
                        reason: "Gemini keys should start with 'AIza'".to_string(),
                    });
                }
            }
            "Groq" => {
                if !key.starts_with("gsk_") {
                    return Err(ConfigError::InvalidKeyFormat {
                        service: service.to_string(),
                        reason: "Groq keys should start with 'gsk_'".to_string(),
                    });
                }
            }
            "ElevenLabs" => {
                if key.len() < 10 {
                    return Err(ConfigError::InvalidKeyFormat {
                        service: service.to_string(),
                        reason: "ElevenLabs keys should be at least 10 characters".to_string(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Get Gemini API key (use only when making API calls)
    pub fn gemini_key(&self) -> Option<&str> {
        self.gemini_key.as_ref().map(|k| k.expose_secret().as_str())
    }

    /// Get Groq API key (use only when making API calls)
    pub fn groq_key(&self) -> Option<&str> {
        self.groq_key.as_ref().map(|k| k.expose_secret().as_str())
    }

    /// Get ElevenLabs API key (use only when making API calls)
    pub fn elevenlabs_key(&self) -> Option<&str> {
        self.elevenlabs_key.as_ref().map(|k| k.expose_secret().as_str())
    }

    /// Key for the selected provider, or a missing-variable error naming it
    pub fn require_provider_key(&self, provider: ProviderKind) -> Result<&str, ConfigError> {
        match provider {
            ProviderKind::Gemini => self
                .gemini_key()
                .ok_or_else(|| ConfigError::MissingEnvVar("GEMINI_API_KEY".to_string())),
            ProviderKind::Groq => self
                .groq_key()
                .ok_or_else(|| ConfigError::MissingEnvVar("GROQ_API_KEY".to_string())),
        }
    }
}

/// Runtime settings for the assistant. Read from `OMAR_*` environment
/// variables, every field has a usable default.
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub provider: ProviderKind,
    pub gemini_model: String,
    pub groq_model: String,
    /// Label reported on wake events
    pub wake_keyword: String,
    /// 0.0 (hard to trigger) to 1.0 (hair trigger)
    pub wake_sensitivity: f32,
    /// 0.0 (needs loud speech) to 1.0 (picks up whispers)
    pub vad_sensitivity: f32,
    pub language: String,
    pub input_device: Option<String>,
    pub voice_id: String,
    /// LED class device directory used as the torch
    pub torch_path: PathBuf,
    pub contacts_path: PathBuf,
    /// Program invoked with a `tel:` URI to place calls
    pub dial_command: String,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            gemini_model: "gemini-1.5-flash".to_string(),
            groq_model: "llama-3.3-70b-versatile".to_string(),
            wake_keyword: "omar".to_string(),
            wake_sensitivity: 0.5,
            vad_sensitivity: 0.5,
            language: "en".to_string(),
            input_device: None,
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(), // Rachel voice
            torch_path: PathBuf::from("/sys/class/leds/flashlight"),
            contacts_path: PathBuf::from("contacts.json"),
            dial_command: "xdg-open".to_string(),
        }
    }
}

impl AssistantSettings {
    /// Build settings from the environment on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut settings = Self::default();

        if let Some(provider) = env_value::<ProviderKind>("OMAR_PROVIDER")? {
            settings.provider = provider;
        }
        if let Some(model) = env_string("OMAR_GEMINI_MODEL") {
            settings.gemini_model = model;
        }
        if let Some(model) = env_string("OMAR_GROQ_MODEL") {
            settings.groq_model = model;
        }
        if let Some(keyword) = env_string("OMAR_WAKE_KEYWORD") {
            settings.wake_keyword = keyword;
        }
        if let Some(sensitivity) = env_value::<f32>("OMAR_WAKE_SENSITIVITY")? {
            settings.wake_sensitivity = check_unit("OMAR_WAKE_SENSITIVITY", sensitivity)?;
        }
        if let Some(sensitivity) = env_value::<f32>("OMAR_VAD_SENSITIVITY")? {
            settings.vad_sensitivity = check_unit("OMAR_VAD_SENSITIVITY", sensitivity)?;
        }
        if let Some(language) = env_string("OMAR_LANGUAGE") {
            settings.language = language;
        }
        settings.input_device = env_string("OMAR_INPUT_DEVICE");
        if let Some(voice) = env_string("OMAR_VOICE_ID") {
            settings.voice_id = voice;
        }
        if let Some(path) = env_string("OMAR_TORCH_PATH") {
            settings.torch_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("OMAR_CONTACTS_PATH") {
            settings.contacts_path = PathBuf::from(path);
        }
        if let Some(command) = env_string("OMAR_DIAL_COMMAND") {
            settings.dial_command = command;
        }

        Ok(settings)
    }
}

fn env_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_value<T>(var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(var) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                var: var.to_string(),
                reason: format!("'{}': {}", raw, e),
            }),
        None => Ok(None),
    }
}

fn check_unit(var: &str, value: f32) -> Result<f32, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            var: var.to_string(),
            reason: format!("{} is outside 0.0..=1.0", value),
        })
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<(ApiConfig, AssistantSettings), ConfigError> {
    let loaded = ApiConfig::load().and_then(|api| Ok((api, AssistantSettings::from_env()?)));
    match loaded {
        Ok(config) => {
            log::info!("Successfully loaded configuration");
            Ok(config)
        }
        Err(ConfigError::InvalidKeyFormat { service, reason }) => {
            log::error!("Invalid API key for {}: {}", service, reason);
            log::error!("Check the key in your .env file or environment");
            Err(ConfigError::InvalidKeyFormat { service, reason })
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}
