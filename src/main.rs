use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use omar_assistant::{
    audio::{AudioManager, CaptureConfig, CpalAudioInput},
    config::{load_config, ApiConfig, AssistantSettings, ProviderKind},
    detection::{VadConfig, WakeWordConfig, WakeWordListener},
    llm::{GeminiProvider, GroqProvider, LlmConfig, LlmProvider},
    stt::{CloudRecognizer, CloudRecognizerConfig, SpeechToTextManager, SttConfig},
    tools::{CommandDialer, FlashlightTool, JsonContacts, PhoneTool, SmartSwitchTool, SysfsTorch, Toolbox},
    tts::{ElevenLabsConfig, ElevenLabsSynthesizer, TextToSpeechManager, TtsConfig},
    AssistantComponents, AssistantOrchestrator, OrchestratorConfig,
};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Language model provider (gemini or groq)
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,

    /// Input device name
    #[arg(long, global = true)]
    device: Option<String>,

    /// Wake sensitivity from 0.0 to 1.0
    #[arg(long, global = true)]
    wake_sensitivity: Option<f32>,

    /// Recognition language, e.g. "en"
    #[arg(long, global = true)]
    language: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen for the wake word and handle voice commands (default)
    Run,
    /// Send one typed request through the assistant and print the reply
    Ask {
        /// The request text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// List the device tools the model can use
    Tools,
    /// List audio input devices
    Devices,
}

fn apply_overrides(settings: &mut AssistantSettings, args: &Args) -> Result<()> {
    if let Some(provider) = args.provider {
        settings.provider = provider;
    }
    if let Some(device) = &args.device {
        settings.input_device = Some(device.clone());
    }
    if let Some(sensitivity) = args.wake_sensitivity {
        anyhow::ensure!(
            (0.0..=1.0).contains(&sensitivity),
            "--wake-sensitivity must be between 0.0 and 1.0"
        );
        settings.wake_sensitivity = sensitivity;
    }
    if let Some(language) = &args.language {
        settings.language = language.clone();
    }
    Ok(())
}

fn build_toolbox(settings: &AssistantSettings) -> Toolbox {
    Toolbox::new()
        .with_tool(Arc::new(FlashlightTool::new(Arc::new(SysfsTorch::new(
            &settings.torch_path,
        )))))
        .with_tool(Arc::new(SmartSwitchTool::default()))
        .with_tool(Arc::new(PhoneTool::new(
            Arc::new(JsonContacts::new(&settings.contacts_path)),
            Arc::new(CommandDialer::new(settings.dial_command.clone())),
        )))
}

fn build_llm(api: &ApiConfig, settings: &AssistantSettings) -> Result<Arc<dyn LlmProvider>> {
    let key = api
        .require_provider_key(settings.provider)
        .context("No API key for the selected provider")?
        .to_string();
    let provider: Arc<dyn LlmProvider> = match settings.provider {
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(
            key,
            LlmConfig::for_model(settings.gemini_model.clone()),
        )?),
        ProviderKind::Groq => Arc::new(GroqProvider::new(
            key,
            LlmConfig::for_model(settings.groq_model.clone()),
        )?),
    };
    Ok(provider)
}

/// Composition root. Voice input needs a Groq key for transcription, typed
/// input does not.
fn build_components(
    api: &ApiConfig,
    settings: &AssistantSettings,
    voice_input: bool,
) -> Result<AssistantComponents> {
    let capture = CaptureConfig {
        device_id: settings.input_device.clone(),
        ..Default::default()
    };
    let audio = AudioManager::new(Arc::new(CpalAudioInput::new(capture)));

    let wake_config = WakeWordConfig {
        keyword: settings.wake_keyword.clone(),
        ..Default::default()
    }
    .with_sensitivity(settings.wake_sensitivity);
    let wake_word = Arc::new(WakeWordListener::new(audio.clone(), wake_config));

    let stt_key = match (voice_input, api.groq_key()) {
        (_, Some(key)) => key.to_string(),
        (true, None) => anyhow::bail!("GROQ_API_KEY is required for speech recognition"),
        (false, None) => String::new(),
    };
    let recognizer = CloudRecognizer::new(
        audio.clone(),
        stt_key,
        CloudRecognizerConfig {
            language: Some(settings.language.clone()),
            vad: VadConfig::default().with_sensitivity(settings.vad_sensitivity),
            ..Default::default()
        },
    )?;
    let stt = Arc::new(SpeechToTextManager::new(
        Arc::new(recognizer),
        audio.microphone().clone(),
        SttConfig::default(),
    ));

    let tts_key = match (voice_input, api.elevenlabs_key()) {
        (_, Some(key)) => key.to_string(),
        (true, None) => anyhow::bail!("ELEVENLABS_API_KEY is required for speech output"),
        (false, None) => {
            log::warn!("ELEVENLABS_API_KEY not set, replies will only be printed");
            String::new()
        }
    };
    let synthesizer = ElevenLabsSynthesizer::new(
        tts_key,
        ElevenLabsConfig {
            voice_id: settings.voice_id.clone(),
            ..Default::default()
        },
    )?;
    let tts = Arc::new(TextToSpeechManager::new(
        Arc::new(synthesizer),
        TtsConfig::default(),
    ));

    Ok(AssistantComponents {
        wake_word,
        stt,
        tts,
        llm: build_llm(api, settings)?,
        toolbox: Arc::new(build_toolbox(settings)),
    })
}

async fn run(api: &ApiConfig, settings: &AssistantSettings) -> Result<()> {
    let components = build_components(api, settings, true)?;
    let assistant = AssistantOrchestrator::new(components, OrchestratorConfig::default());

    let mut states = assistant.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            log::info!("📍 {}", state);
        }
    });

    assistant
        .start()
        .await
        .context("Failed to start the assistant")?;

    println!("🎧 Listening for '{}'...", settings.wake_keyword);
    println!("   Press Ctrl+C to exit");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    println!("\n👋 Shutting down");
    assistant.stop().await?;
    Ok(())
}

async fn ask(api: &ApiConfig, settings: &AssistantSettings, text: &str) -> Result<()> {
    let components = build_components(api, settings, false)?;
    let assistant = AssistantOrchestrator::new(components, OrchestratorConfig::default());
    let reply = assistant.process_text_input(text).await?;
    println!("{}", reply);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Some(Command::Tools) => {
            let settings = AssistantSettings::from_env()?;
            for tool in build_toolbox(&settings).catalogue() {
                println!("{:<14} {}", tool.name, tool.description);
                println!("{:<14} parameters: {}", "", tool.parameters);
            }
            Ok(())
        }
        Some(Command::Devices) => {
            for device in CpalAudioInput::list_devices()? {
                let marker = if device.is_default { "*" } else { " " };
                println!("{} {} ({} channels)", marker, device.name, device.channel_count);
            }
            Ok(())
        }
        Some(Command::Ask { ref text }) => {
            let (api, mut settings) = load_config()?;
            apply_overrides(&mut settings, &args)?;
            ask(&api, &settings, &text.join(" ")).await
        }
        Some(Command::Run) | None => {
            log::info!("🚀 Initializing omar-assistant");
            let (api, mut settings) = load_config()?;
            apply_overrides(&mut settings, &args)?;
            run(&api, &settings).await
        }
    }
}
