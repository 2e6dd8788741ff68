use super::{AssistantComponents, AssistantState, OrchestratorConfig};
use crate::error::{AssistantError, Result};
use crate::llm::{ConversationHistory, ConversationMessage, LlmResponse};
use crate::tts::TtsError;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Who a turn came from. Voice turns move the voice loop's phase along,
/// typed turns only borrow the published state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Voice,
    Typed,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs the wake → listen → think → speak loop.
///
/// The microphone moves between wake-word listening and command capture
/// through leases, so the loop never needs to sleep for the device to settle.
/// Turns are serialized: direct text input waits for any voice turn in
/// progress and the other way round.
pub struct AssistantOrchestrator {
    inner: Arc<Inner>,
    supervisor: Mutex<Option<Supervisor>>,
}

struct Inner {
    components: AssistantComponents,
    config: OrchestratorConfig,
    state: watch::Sender<AssistantState>,
    /// Where the voice loop is, restored after a typed turn
    voice_phase: watch::Sender<AssistantState>,
    history: Mutex<ConversationHistory>,
    turn: Mutex<()>,
}

impl AssistantOrchestrator {
    pub fn new(components: AssistantComponents, config: OrchestratorConfig) -> Self {
        let (state, _) = watch::channel(AssistantState::Idle);
        let (voice_phase, _) = watch::channel(AssistantState::Idle);
        let history = ConversationHistory::new(config.history_len);
        Self {
            inner: Arc::new(Inner {
                components,
                config,
                state,
                voice_phase,
                history: Mutex::new(history),
                turn: Mutex::new(()),
            }),
            supervisor: Mutex::new(None),
        }
    }

    pub fn state(&self) -> AssistantState {
        *self.inner.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<AssistantState> {
        self.inner.state.subscribe()
    }

    pub async fn history(&self) -> Vec<ConversationMessage> {
        self.inner.history.lock().await.messages()
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_some()
    }

    /// Initialize speech output and the microphone, then start listening
    pub async fn start(&self) -> Result<()> {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_some() {
            return Err(AssistantError::InvalidState(
                "assistant is already running".to_string(),
            ));
        }

        log::info!("🚀 Starting assistant");
        if let Err(e) = self.inner.components.tts.initialize().await {
            log::error!("❌ Text-to-speech failed to initialize: {}", e);
            self.inner.set_voice_state(AssistantState::Error);
            return Err(e.into());
        }
        if let Err(e) = self.inner.components.wake_word.initialize().await {
            log::error!("❌ Wake word listener failed to initialize: {}", e);
            self.inner.set_voice_state(AssistantState::Error);
            return Err(e.into());
        }

        let cancel = CancellationToken::new();
        self.inner.set_voice_state(AssistantState::ListeningForWakeWord);
        let handle = tokio::spawn(Arc::clone(&self.inner).supervise(cancel.clone()));
        *supervisor = Some(Supervisor { cancel, handle });
        Ok(())
    }

    /// Cancel whatever is in flight and return to `Idle`
    pub async fn stop(&self) -> Result<()> {
        let Some(supervisor) = self.supervisor.lock().await.take() else {
            self.inner.set_voice_state(AssistantState::Idle);
            return Ok(());
        };

        log::info!("🛑 Stopping assistant");
        self.inner.set_voice_state(AssistantState::Stopping);
        supervisor.cancel.cancel();
        if let Err(e) = supervisor.handle.await {
            log::error!("Supervisor task ended abnormally: {}", e);
        }
        if let Err(e) = self.inner.components.tts.stop().await {
            log::warn!("Failed to stop speech output: {}", e);
        }
        self.inner.set_voice_state(AssistantState::Idle);
        Ok(())
    }

    /// Handle typed input as if it had been spoken. Returns the reply.
    ///
    /// Afterwards the published state goes back to wherever the voice loop
    /// is, or `Idle` when the assistant is not running.
    pub async fn process_text_input(&self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AssistantError::InvalidState("no text to process".to_string()));
        }

        let cancel = match self.supervisor.lock().await.as_ref() {
            Some(supervisor) => supervisor.cancel.child_token(),
            None => CancellationToken::new(),
        };
        if let Err(e) = self.inner.components.tts.initialize().await {
            log::warn!("Speech output unavailable: {}", e);
        }

        self.inner.handle_utterance(text, &cancel, Turn::Typed).await
    }
}

impl Inner {
    fn set_state(&self, state: AssistantState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("State: {} -> {}", previous, state);
        }
    }

    fn set_voice_state(&self, state: AssistantState) {
        self.voice_phase.send_replace(state);
        self.set_state(state);
    }

    fn enter(&self, state: AssistantState, turn: Turn) {
        match turn {
            Turn::Voice => self.set_voice_state(state),
            Turn::Typed => self.set_state(state),
        }
    }

    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        log::info!("👂 Assistant loop running");
        while !cancel.is_cancelled() {
            self.set_voice_state(AssistantState::ListeningForWakeWord);

            let failure = match AssertUnwindSafe(self.cycle(&cancel)).catch_unwind().await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) if e.is_cancelled() => break,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "assistant cycle panicked".to_string(),
            };
            if cancel.is_cancelled() {
                break;
            }

            log::error!("❌ Assistant cycle failed: {}", failure);
            self.set_voice_state(AssistantState::Speaking);
            if self.speak(&self.config.generic_error, &cancel).await.is_err() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.error_backoff) => {}
                _ = cancel.cancelled() => break,
            }
        }
        log::info!("Assistant loop stopped");
    }

    /// One wake → command → reply round
    async fn cycle(&self, cancel: &CancellationToken) -> Result<()> {
        let wake = self.components.wake_word.listen(cancel).await?;
        log::info!(
            "🎤 Wake word '{}' detected (confidence {:.2})",
            wake.keyword,
            wake.confidence
        );

        self.set_voice_state(AssistantState::ListeningForCommand);
        let transcript = self.components.stt.recognize(cancel).await?;

        match transcript.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => {
                self.handle_utterance(text, cancel, Turn::Voice).await?;
            }
            None => {
                log::info!("🤷 Nothing understood");
                self.set_voice_state(AssistantState::Speaking);
                self.speak(&self.config.not_understood, cancel).await?;
            }
        }
        Ok(())
    }

    async fn handle_utterance(
        &self,
        text: &str,
        cancel: &CancellationToken,
        turn: Turn,
    ) -> Result<String> {
        let _turn = self.turn.lock().await;
        let result = self.take_turn(text, cancel, turn).await;
        if turn == Turn::Typed {
            let resting = *self.voice_phase.borrow();
            self.set_state(resting);
        }
        result
    }

    async fn take_turn(
        &self,
        text: &str,
        cancel: &CancellationToken,
        turn: Turn,
    ) -> Result<String> {
        self.enter(AssistantState::Processing, turn);
        log::info!("💬 User: {}", text);

        let reply = self.respond(text, cancel).await?;
        log::info!("💬 Assistant: {}", reply);

        self.enter(AssistantState::Speaking, turn);
        self.speak(&reply, cancel).await?;
        Ok(reply)
    }

    async fn respond(&self, text: &str, cancel: &CancellationToken) -> Result<String> {
        let prior = {
            let mut history = self.history.lock().await;
            let prior = history.recent(self.config.history_len);
            history.add_user_message(text);
            prior
        };

        let catalogue = self.components.toolbox.catalogue();
        let response = tokio::select! {
            response = self.components.llm.generate(text, &catalogue, &prior) => response,
            _ = cancel.cancelled() => {
                log::info!("Dropping model request, turn cancelled");
                return Err(AssistantError::Cancelled);
            }
        };

        let reply = if response.should_use_tools && !response.tool_calls.is_empty() {
            self.run_tools(&response, cancel).await?
        } else {
            response.text
        };
        let reply = if reply.trim().is_empty() {
            "Okay.".to_string()
        } else {
            reply
        };

        self.history.lock().await.add_assistant_message(reply.clone());
        Ok(reply)
    }

    /// Run the requested tools in order. Each outcome replaces the model's text.
    async fn run_tools(
        &self,
        response: &LlmResponse,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut messages = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            let result = tokio::select! {
                result = self.components.toolbox.execute(&call.name, &call.parameters) => result,
                _ = cancel.cancelled() => {
                    log::info!("Abandoning tool '{}', turn cancelled", call.name);
                    return Err(AssistantError::Cancelled);
                }
            };
            if result.success {
                messages.push(result.message);
            } else {
                messages.push(format!(
                    "Sorry, I couldn't complete the {} request. {}",
                    call.name.replace('_', " "),
                    result.message
                ));
            }
        }
        Ok(messages.join(" "))
    }

    /// Speak, treating everything but cancellation as best effort
    async fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        match self.components.tts.speak(text, cancel).await {
            Ok(()) => Ok(()),
            Err(TtsError::Cancelled) => Err(AssistantError::Cancelled),
            Err(e) => {
                log::warn!("🔇 Could not speak: {}", e);
                Ok(())
            }
        }
    }
}
