//! Fakes shared by the integration tests. Real wake detection, recognition
//! management and tool dispatch run against scripted audio, a scripted
//! recognizer, a scripted model and a recording speaker.

#![allow(dead_code)]

use omar_assistant::audio::{AudioManager, MicrophoneLease, ScriptedAudioInput};
use omar_assistant::detection::{WakeWordConfig, WakeWordListener};
use omar_assistant::llm::{ConversationMessage, LlmError, LlmProvider};
use omar_assistant::stt::{
    RecognitionErrorKind, RecognitionEvent, Recognizer, SpeechToTextManager, SttConfig, SttError,
};
use omar_assistant::tools::{
    FlashlightTool, SmartSwitchTool, Tool, ToolError, ToolExecutionResult, ToolParameters,
    Toolbox, Torch,
};
use omar_assistant::tts::{TextToSpeech, TtsError};
use omar_assistant::{AssistantComponents, AssistantState};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub const QUIET: i16 = 0;
pub const LOUD: i16 = 12000;

/// A few quiet frames followed by one loud burst
pub fn wake_session() -> Vec<Vec<i16>> {
    vec![vec![QUIET; 1600], vec![QUIET; 1600], vec![LOUD; 1600]]
}

/// Recognizer that answers each start with the next scripted outcome and
/// drops the lease straight away
pub struct ScriptedRecognizer {
    outcomes: Mutex<VecDeque<RecognitionEvent>>,
}

impl ScriptedRecognizer {
    pub fn new(outcomes: Vec<RecognitionEvent>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
        }
    }

    pub fn transcripts(transcripts: &[&str]) -> Self {
        Self::new(
            transcripts
                .iter()
                .map(|t| RecognitionEvent::Final(t.to_string()))
                .collect(),
        )
    }
}

#[async_trait::async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn start(
        &self,
        lease: MicrophoneLease,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, SttError> {
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RecognitionEvent::Error(RecognitionErrorKind::NoMatch));
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx.send(RecognitionEvent::Ready).await;
            drop(lease);
            let _ = tx.send(outcome).await;
        });
        Ok(rx)
    }
}

/// Recognizer whose service cannot be reached
pub struct FailingRecognizer;

#[async_trait::async_trait]
impl Recognizer for FailingRecognizer {
    async fn start(
        &self,
        _lease: MicrophoneLease,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, SttError> {
        Err(SttError::Recognizer("service unreachable".to_string()))
    }
}

/// Recognizer that reports ready and then never hears anything
#[derive(Default)]
pub struct StallingRecognizer {
    open: Mutex<Vec<mpsc::Sender<RecognitionEvent>>>,
}

#[async_trait::async_trait]
impl Recognizer for StallingRecognizer {
    async fn start(
        &self,
        lease: MicrophoneLease,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, SttError> {
        drop(lease);
        let (tx, rx) = mpsc::channel(4);
        let _ = tx.try_send(RecognitionEvent::Ready);
        self.open.lock().unwrap().push(tx);
        Ok(rx)
    }
}

/// Tool that panics whenever it runs
pub struct PanickingTool;

#[async_trait::async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "volume"
    }

    fn description(&self) -> &str {
        "Changes the speaker volume"
    }

    fn parameter_help(&self) -> &str {
        "level: 0-10"
    }

    fn validate(&self, _parameters: &ToolParameters) -> bool {
        true
    }

    async fn execute(&self, _parameters: &ToolParameters) -> Result<ToolExecutionResult, ToolError> {
        panic!("mixer went away")
    }
}

/// Speaker that records every utterance
#[derive(Default)]
pub struct RecordingTts {
    spoken: Mutex<Vec<String>>,
    fail_init: bool,
    initialized: AtomicBool,
}

impl RecordingTts {
    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Default::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TextToSpeech for RecordingTts {
    async fn initialize(&self) -> Result<(), TtsError> {
        if self.fail_init {
            return Err(TtsError::Config("no output device".to_string()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<(), TtsError> {
        if cancel.is_cancelled() {
            return Err(TtsError::Cancelled);
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(TtsError::NotInitialized);
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn stop(&self) -> Result<(), TtsError> {
        Ok(())
    }
}

/// Model that returns scripted raw completions and records the history it saw
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    histories: Mutex<Vec<Vec<ConversationMessage>>>,
    delay: Option<Duration>,
    panics: bool,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(
                vec![Err(LlmError::ApiError {
                    status: 503,
                    message: "overloaded".to_string(),
                })]
                .into(),
            ),
            ..Default::default()
        }
    }

    /// Panics on the first request, answers normally afterwards
    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Default::default()
        }
    }

    /// Take this long over every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn histories(&self) -> Vec<Vec<ConversationMessage>> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        history: &[ConversationMessage],
        _transcript: &str,
    ) -> Result<String, LlmError> {
        let first = {
            let mut histories = self.histories.lock().unwrap();
            histories.push(history.to_vec());
            histories.len() == 1
        };
        if self.panics && first {
            panic!("model client blew up");
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Okay.".to_string()))
    }
}

#[derive(Default)]
pub struct FakeTorch {
    on: AtomicBool,
    broken: bool,
}

impl FakeTorch {
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    pub fn lit(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Torch for FakeTorch {
    async fn set(&self, on: bool) -> Result<(), ToolError> {
        if self.broken {
            return Err(ToolError::Device("torch is unavailable".to_string()));
        }
        self.on.store(on, Ordering::SeqCst);
        Ok(())
    }

    async fn is_on(&self) -> Result<bool, ToolError> {
        Ok(self.lit())
    }
}

/// Handles to the fakes behind a set of components
pub struct Harness {
    pub components: AssistantComponents,
    pub audio: AudioManager,
    pub input: Arc<ScriptedAudioInput>,
    pub tts: Arc<RecordingTts>,
    pub llm: Arc<ScriptedLlm>,
    pub torch: Arc<FakeTorch>,
}

pub struct HarnessBuilder {
    sessions: Vec<Vec<Vec<i16>>>,
    recognizer: Arc<dyn Recognizer>,
    tts: RecordingTts,
    llm: ScriptedLlm,
    torch: FakeTorch,
    extra_tools: Vec<Arc<dyn Tool>>,
    probe_error: Option<String>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
            recognizer: Arc::new(ScriptedRecognizer::new(Vec::new())),
            tts: RecordingTts::default(),
            llm: ScriptedLlm::new(Vec::new()),
            torch: FakeTorch::default(),
            extra_tools: Vec::new(),
            probe_error: None,
        }
    }

    /// Make the microphone probe fail
    pub fn no_microphone(mut self) -> Self {
        self.probe_error = Some("no capture device".to_string());
        self
    }

    /// One wake burst for the first listen. Later listens hear silence.
    pub fn wake_once(mut self) -> Self {
        self.sessions = vec![wake_session()];
        self
    }

    pub fn recognizer(mut self, recognizer: impl Recognizer + 'static) -> Self {
        self.recognizer = Arc::new(recognizer);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    pub fn tts(mut self, tts: RecordingTts) -> Self {
        self.tts = tts;
        self
    }

    pub fn llm(mut self, llm: ScriptedLlm) -> Self {
        self.llm = llm;
        self
    }

    pub fn torch(mut self, torch: FakeTorch) -> Self {
        self.torch = torch;
        self
    }

    pub fn build(self) -> Harness {
        let mut input = ScriptedAudioInput::with_sessions(self.sessions);
        if let Some(message) = self.probe_error {
            input = input.with_probe_error(message);
        }
        let input = Arc::new(input);
        let audio = AudioManager::new(input.clone());
        let wake_word = Arc::new(WakeWordListener::new(audio.clone(), WakeWordConfig::default()));
        let stt = Arc::new(SpeechToTextManager::new(
            self.recognizer,
            audio.microphone().clone(),
            SttConfig {
                retry_backoff: Duration::from_millis(10),
                watchdog: Duration::from_secs(2),
                ..Default::default()
            },
        ));
        let tts = Arc::new(self.tts);
        let llm = Arc::new(self.llm);
        let torch = Arc::new(self.torch);

        let flashlight: Arc<dyn Tool> = Arc::new(FlashlightTool::new(torch.clone()));
        let toolbox = self.extra_tools.into_iter().fold(
            Toolbox::new()
                .with_tool(flashlight)
                .with_tool(Arc::new(SmartSwitchTool::new(Duration::from_millis(5)))),
            |toolbox, tool| toolbox.with_tool(tool),
        );

        Harness {
            components: AssistantComponents {
                wake_word,
                stt,
                tts: tts.clone(),
                llm: llm.clone(),
                toolbox: Arc::new(toolbox),
            },
            audio,
            input,
            tts,
            llm,
            torch,
        }
    }
}

/// Wait until the state matches, failing after two seconds
pub async fn wait_for(states: &mut watch::Receiver<AssistantState>, target: AssistantState) {
    tokio::time::timeout(Duration::from_secs(2), states.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", target))
        .expect("state channel closed");
}

/// Poll `check` until it holds, failing after two seconds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
