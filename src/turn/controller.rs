//! The turn-taking controller.
//!
//! A single task owns the [`SessionContext`] and is the only place the turn
//! state changes. Commands, timer expiries, generation results, synthesizer
//! and recognizer events and barge-ins are all funnelled into it, one at a
//! time, through `tokio::select!`.

use super::events::{SessionUpdate, TurnCommand, TurnEvent};
use super::session::{SessionContext, VoiceSession};
use super::state::TurnState;
use crate::capture::Microphone;
use crate::chat::{ChatBackend, ChatError, Message, TextGenerator};
use crate::config::{SessionConfig, TimingConfig, MAX_REPLY_WORDS};
use crate::error::{Result, TurnError};
use crate::gate::SendGate;
use crate::stt::{RecognitionEvent, SpeechInput, SpeechRecognizer};
use crate::timer::PendingTimer;
use crate::tts::{SpeechConfig, SpeechOutput, SpeechSynthesizer, SynthesisEvent, UtteranceId};
use crate::vad::{BargeInMonitor, VadConfig};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 32;
const UPDATE_BUFFER: usize = 64;

/// Settings the controller needs, independent of where they came from.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub speech: SpeechConfig,
    pub vad: VadConfig,
    pub timing: TimingConfig,
    pub max_reply_words: usize,
}

impl ControllerConfig {
    pub fn from_session(config: &SessionConfig) -> Self {
        Self {
            speech: config.speech.clone(),
            vad: config.vad.clone(),
            timing: config.timing,
            max_reply_words: config.chat.max_reply_words,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            speech: SpeechConfig::default(),
            vad: VadConfig::default(),
            timing: TimingConfig::default(),
            max_reply_words: MAX_REPLY_WORDS,
        }
    }
}

/// Platform services the controller drives.
#[derive(Clone)]
pub struct Capabilities {
    pub chat: Arc<dyn ChatBackend>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub microphone: Arc<dyn Microphone>,
}

pub struct TurnController {
    ctx: SessionContext,
    generator: TextGenerator,
    microphone: Arc<dyn Microphone>,
    vad: VadConfig,
    timing: TimingConfig,
    timer: PendingTimer,
    commands: mpsc::Receiver<TurnCommand>,
    events_tx: mpsc::UnboundedSender<TurnEvent>,
    events_rx: mpsc::UnboundedReceiver<TurnEvent>,
    synthesis_rx: broadcast::Receiver<SynthesisEvent>,
    recognition_rx: broadcast::Receiver<RecognitionEvent>,
    state_tx: watch::Sender<TurnState>,
    updates_tx: broadcast::Sender<SessionUpdate>,
    shutdown: CancellationToken,
}

impl TurnController {
    pub fn new(config: ControllerConfig, capabilities: Capabilities) -> (Self, TurnHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TurnState::Idle);
        let (updates_tx, _) = broadcast::channel(UPDATE_BUFFER);
        let shutdown = CancellationToken::new();

        // Subscribe before anything can speak or listen so no event is missed
        let synthesis_rx = capabilities.synthesizer.subscribe();
        let recognition_rx = capabilities.recognizer.subscribe();

        let language = config.speech.language.clone();
        let ctx = SessionContext::new(
            SendGate::new(config.timing.min_send_spacing),
            SpeechOutput::new(capabilities.synthesizer, config.speech),
            SpeechInput::new(capabilities.recognizer, language),
        );

        let handle = TurnHandle {
            commands: commands_tx,
            state: state_rx,
            updates: updates_tx.clone(),
        };

        let controller = Self {
            ctx,
            generator: TextGenerator::new(capabilities.chat, config.max_reply_words),
            microphone: capabilities.microphone,
            vad: config.vad,
            timing: config.timing,
            timer: PendingTimer::new(shutdown.clone()),
            commands,
            events_tx,
            events_rx,
            synthesis_rx,
            recognition_rx,
            state_tx,
            updates_tx,
            shutdown,
        };

        (controller, handle)
    }

    /// Run the controller on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        log::info!("🔄 Turn controller started");
        let mut synthesis_open = true;
        let mut recognition_open = true;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(TurnCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                Some(event) = self.events_rx.recv() => self.handle_event(event),

                result = self.synthesis_rx.recv(), if synthesis_open => match result {
                    Ok(event) => self.handle_synthesis(event),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Lagged behind synthesizer events, skipped {}", skipped);
                    }
                    Err(RecvError::Closed) => {
                        log::error!("🔊 Synthesizer event stream closed");
                        synthesis_open = false;
                    }
                },

                result = self.recognition_rx.recv(), if recognition_open => match result {
                    Ok(event) => self.handle_recognition(event),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Lagged behind recognizer events, skipped {}", skipped);
                    }
                    Err(RecvError::Closed) => {
                        log::error!("🎤 Recognizer event stream closed");
                        recognition_open = false;
                    }
                },
            }
        }

        self.teardown();
        log::info!("🔄 Turn controller stopped");
    }

    async fn handle_command(&mut self, command: TurnCommand) {
        match command {
            TurnCommand::Submit(text) => self.submit_typed(text),
            TurnCommand::FocusInput => {
                if self.ctx.state == TurnState::Speaking || self.ctx.active_utterance.is_some() {
                    log::info!("⌨️ Input focused, cutting speech");
                    self.interrupt_speech();
                }
            }
            TurnCommand::StartVoice => self.start_voice().await,
            TurnCommand::StopVoice => self.stop_voice(),
            TurnCommand::ToggleVoice => {
                if self.ctx.voice.is_some() {
                    self.stop_voice();
                } else {
                    self.start_voice().await;
                }
            }
            TurnCommand::SetSpeechEnabled(enabled) => self.set_speech_enabled(enabled),
            TurnCommand::SetSpeechRate(rate) => {
                self.ctx.speech.set_rate(rate);
                log::info!("🔊 Speech rate set to {:.2}", self.ctx.speech.rate());
            }
            TurnCommand::History(reply) => {
                let _ = reply.send(self.ctx.history.messages().to_vec());
            }
            // Handled by the run loop
            TurnCommand::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::TranscriptReady(transcript) => {
                if !self.try_send(transcript)
                    && self.ctx.state == TurnState::Thinking
                    && !self.ctx.gate.in_flight()
                {
                    self.settle();
                }
            }
            TurnEvent::ReplyFinished(result) => self.finish_reply(result),
            TurnEvent::RestartRecognition => {
                if self.ctx.voice_enabled()
                    && self.ctx.state == TurnState::Listening
                    && !self.ctx.input.is_active()
                {
                    if let Err(e) = self.ctx.input.start() {
                        log::warn!("🎤 Could not restart recognition: {}", e);
                        self.set_state(TurnState::Idle);
                    }
                }
            }
            TurnEvent::ClearanceElapsed => {
                if self.ctx.state == TurnState::Interrupted && self.ctx.voice_enabled() {
                    self.listen_or_idle();
                }
            }
            TurnEvent::QuietPeriodElapsed => self.finish_quiet_period(),
            TurnEvent::BargeIn { rms } => self.barge_in(rms),
        }
    }

    fn handle_synthesis(&mut self, event: SynthesisEvent) {
        match event {
            SynthesisEvent::Started(id) => {
                if self.ctx.active_utterance == Some(id) && self.ctx.state == TurnState::Thinking {
                    self.set_state(TurnState::Speaking);
                } else {
                    log::debug!("🔊 Ignoring start of utterance {}", id);
                }
            }
            SynthesisEvent::Ended(id) => self.finish_utterance(id),
            SynthesisEvent::Failed { id, reason } => {
                if self.ctx.active_utterance == Some(id) {
                    log::warn!("🔊 Speech failed: {}", reason);
                }
                self.finish_utterance(id);
            }
            SynthesisEvent::VoicesChanged => self.ctx.speech.refresh_voice(),
        }
    }

    fn handle_recognition(&mut self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Final { session, text } => {
                if self.ctx.input.is_current(session) {
                    self.accept_transcript(&text);
                } else {
                    log::debug!("🎤 Transcript from stale session {} dropped", session);
                }
            }
            RecognitionEvent::Ended(session) => {
                if self.ctx.input.mark_ended(session)
                    && self.ctx.voice_enabled()
                    && self.ctx.state == TurnState::Listening
                {
                    self.timer.arm(
                        self.timing.restart_debounce,
                        self.events_tx.clone(),
                        TurnEvent::RestartRecognition,
                    );
                }
            }
            RecognitionEvent::Error(reason) => {
                log::warn!("🎤 Recognition error: {}", reason);
            }
        }
    }

    fn accept_transcript(&mut self, text: &str) {
        if self.ctx.state != TurnState::Listening {
            log::debug!("🎤 Transcript arrived while {}, dropped", self.ctx.state);
            return;
        }
        let Some(voice) = self.ctx.voice.as_mut() else {
            log::debug!("🎤 Transcript arrived without a voice session, dropped");
            return;
        };
        let Some(transcript) = voice.accept_transcript(text) else {
            log::debug!("🎤 Empty or repeated transcript dropped");
            return;
        };

        log::info!("🎤 Heard: \"{}\"", transcript);
        self.set_state(TurnState::Thinking);
        self.timer.arm(
            self.timing.transcript_delay,
            self.events_tx.clone(),
            TurnEvent::TranscriptReady(transcript),
        );
    }

    fn submit_typed(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        self.interrupt_speech();
        if !self.try_send(text) && self.ctx.state == TurnState::Interrupted {
            // Nothing else will move us out of Interrupted
            self.settle();
        }
    }

    /// Pass a message through the send gate and start generating a reply.
    ///
    /// Returns whether the message was accepted. Rejections are silent.
    fn try_send(&mut self, text: String) -> bool {
        let decision = self.ctx.gate.try_acquire(Instant::now());
        if !decision.is_accepted() {
            log::debug!("🚦 Send dropped: {:?}", decision);
            return false;
        }

        self.ctx.history.add_user_message(text.clone());
        self.publish(SessionUpdate::Message(Message::user(text)));
        self.set_state(TurnState::Thinking);

        let generator = self.generator.clone();
        let messages = self.ctx.history.messages().to_vec();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = generator.generate(&messages).await;
            let _ = events.send(TurnEvent::ReplyFinished(result));
        });
        true
    }

    fn finish_reply(&mut self, result: std::result::Result<String, ChatError>) {
        self.ctx.gate.release();

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("💬 Generation failed: {}", e);
                self.publish(SessionUpdate::Error(e.to_string()));
                if self.ctx.state == TurnState::Thinking {
                    self.settle();
                }
                return;
            }
        };

        self.ctx.history.add_assistant_message(reply.clone());
        self.publish(SessionUpdate::Message(Message::assistant(reply.clone())));
        log::debug!("💬 {}", self.ctx.history.summary());

        if self.ctx.state != TurnState::Thinking {
            log::debug!("💬 Reply arrived while {}, not speaking it", self.ctx.state);
            return;
        }
        if !self.ctx.speech.is_enabled() {
            self.settle();
            return;
        }

        match self.ctx.speech.speak(&reply) {
            // Speaking starts when the synthesizer reports it
            Ok(Some(id)) => self.ctx.active_utterance = Some(id),
            Ok(None) => self.settle(),
            Err(e) => {
                log::warn!("🔊 Could not speak reply: {}", e);
                self.settle();
            }
        }
    }

    fn finish_utterance(&mut self, id: UtteranceId) {
        if self.ctx.active_utterance != Some(id) {
            log::debug!("🔊 Ignoring end of utterance {}", id);
            return;
        }
        self.ctx.active_utterance = None;

        match self.ctx.state {
            TurnState::Speaking if self.ctx.voice_enabled() => {
                self.set_state(TurnState::Waiting);
                self.timer.arm(
                    self.timing.quiet_period,
                    self.events_tx.clone(),
                    TurnEvent::QuietPeriodElapsed,
                );
            }
            TurnState::Speaking => self.set_state(TurnState::Idle),
            // Ended before the start was ever reported
            TurnState::Thinking => self.settle(),
            _ => {}
        }
    }

    fn finish_quiet_period(&mut self) {
        if self.ctx.state != TurnState::Waiting {
            return;
        }
        if !self.ctx.voice_enabled() {
            self.set_state(TurnState::Idle);
            return;
        }
        if self.ctx.speech.is_speaking() {
            log::debug!("🔇 Still speaking after quiet period, waiting again");
            self.timer.arm(
                self.timing.quiet_period,
                self.events_tx.clone(),
                TurnEvent::QuietPeriodElapsed,
            );
            return;
        }
        self.listen_or_idle();
    }

    fn barge_in(&mut self, rms: f32) {
        // Queued detections can outlive the voice session that produced them
        if !self.ctx.voice_enabled()
            || self.ctx.state != TurnState::Speaking
            || !self.ctx.speech.is_speaking()
        {
            log::debug!("🗣️ Barge-in ignored while {}", self.ctx.state);
            return;
        }

        log::info!("🗣️ Barge-in (rms: {:.3})", rms);
        self.interrupt_speech();
        self.timer.arm(
            self.timing.barge_in_clearance,
            self.events_tx.clone(),
            TurnEvent::ClearanceElapsed,
        );
    }

    /// Cut any speech short. Speaking becomes Interrupted.
    ///
    /// A reply still waiting for the synthesizer to start is dropped and the
    /// turn settles, since none of its events will be acted on. Returns
    /// whether the state moved to Interrupted.
    fn interrupt_speech(&mut self) -> bool {
        let pending = self.ctx.active_utterance.take();
        self.ctx.speech.cancel();
        match self.ctx.state {
            TurnState::Speaking => {
                self.set_state(TurnState::Interrupted);
                true
            }
            TurnState::Thinking if pending.is_some() => {
                log::debug!("🔊 Reply dropped before speech started");
                self.settle();
                false
            }
            _ => false,
        }
    }

    async fn start_voice(&mut self) {
        if self.ctx.voice.is_some() {
            log::debug!("🎤 Voice session already running");
            return;
        }
        if !self.ctx.input.is_supported() {
            let error = TurnError::Unsupported(
                "speech recognition is not available on this platform".to_string(),
            );
            log::warn!("🎤 {}", error);
            self.publish(SessionUpdate::Notice(error.to_string()));
            return;
        }

        self.ctx.voice = Some(VoiceSession::new());
        if self.ctx.state.can_start_listening() {
            if let Err(e) = self.start_listening() {
                log::warn!("🎤 Could not start listening: {}", e);
                self.publish(SessionUpdate::Notice(e.to_string()));
                self.ctx.voice = None;
                return;
            }
        }
        log::info!("🎤 Voice session started");
        self.publish(SessionUpdate::VoiceToggled(true));

        match self.microphone.open().await {
            Ok(source) => {
                let events = self.events_tx.clone();
                let monitor = BargeInMonitor::spawn(
                    source,
                    self.ctx.speech.synthesizer(),
                    self.vad.clone(),
                    self.shutdown.child_token(),
                    Box::new(move |rms| {
                        let _ = events.send(TurnEvent::BargeIn { rms });
                    }),
                );
                if let Some(voice) = self.ctx.voice.as_mut() {
                    voice.attach_monitor(monitor);
                }
            }
            Err(e) => {
                log::warn!("🎙️ Barge-in detection unavailable: {}", e);
                self.publish(SessionUpdate::Notice(format!(
                    "Barge-in detection unavailable: {}",
                    e
                )));
            }
        }
    }

    fn stop_voice(&mut self) {
        let Some(mut voice) = self.ctx.voice.take() else {
            return;
        };
        voice.close();
        self.ctx.input.stop();

        if matches!(
            self.ctx.state,
            TurnState::Listening | TurnState::Waiting | TurnState::Interrupted
        ) {
            self.set_state(TurnState::Idle);
        }
        log::info!("🎤 Voice session stopped");
        self.publish(SessionUpdate::VoiceToggled(false));
    }

    fn set_speech_enabled(&mut self, enabled: bool) {
        self.ctx.speech.set_enabled(enabled);
        log::info!("🔊 Speech output {}", if enabled { "on" } else { "off" });
        if !enabled && self.interrupt_speech() {
            self.settle();
        }
    }

    fn start_listening(&mut self) -> Result<()> {
        if !self.ctx.input.is_active() {
            self.ctx.input.start()?;
        }
        self.set_state(TurnState::Listening);
        Ok(())
    }

    fn listen_or_idle(&mut self) {
        if let Err(e) = self.start_listening() {
            log::warn!("🎤 Could not reopen listening: {}", e);
            self.set_state(TurnState::Idle);
        }
    }

    /// Come to rest after a turn: Idle, then straight back to Listening when a
    /// voice session is on.
    fn settle(&mut self) {
        self.set_state(TurnState::Idle);
        if self.ctx.voice_enabled() {
            self.listen_or_idle();
        }
    }

    fn set_state(&mut self, next: TurnState) {
        let previous = self.ctx.state;
        if previous == next {
            return;
        }

        self.timer.cancel();
        if previous == TurnState::Listening {
            self.ctx.input.stop();
        }
        if !previous.can_transition_to(next) {
            log::warn!("⚠️ Unexpected transition {} → {}", previous, next);
        }

        log::info!("🔄 {} → {}", previous, next);
        self.ctx.state = next;
        self.state_tx.send_replace(next);
        self.publish(SessionUpdate::StateChanged {
            from: previous,
            to: next,
        });
    }

    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates_tx.send(update);
    }

    fn teardown(&mut self) {
        self.timer.cancel();
        if let Some(mut voice) = self.ctx.voice.take() {
            voice.close();
        }
        self.ctx.input.stop();
        self.ctx.speech.cancel();
        self.shutdown.cancel();
    }
}

/// Cheap, cloneable front door to a running [`TurnController`].
#[derive(Clone)]
pub struct TurnHandle {
    commands: mpsc::Sender<TurnCommand>,
    state: watch::Receiver<TurnState>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl TurnHandle {
    async fn send(&self, command: TurnCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TurnError::ControllerClosed)
    }

    /// Submit a typed message.
    pub async fn submit(&self, text: impl Into<String>) -> Result<()> {
        self.send(TurnCommand::Submit(text.into())).await
    }

    pub async fn focus_input(&self) -> Result<()> {
        self.send(TurnCommand::FocusInput).await
    }

    pub async fn start_voice(&self) -> Result<()> {
        self.send(TurnCommand::StartVoice).await
    }

    pub async fn stop_voice(&self) -> Result<()> {
        self.send(TurnCommand::StopVoice).await
    }

    pub async fn toggle_voice(&self) -> Result<()> {
        self.send(TurnCommand::ToggleVoice).await
    }

    pub async fn set_speech_enabled(&self, enabled: bool) -> Result<()> {
        self.send(TurnCommand::SetSpeechEnabled(enabled)).await
    }

    pub async fn set_speech_rate(&self, rate: f32) -> Result<()> {
        self.send(TurnCommand::SetSpeechRate(rate)).await
    }

    /// Snapshot of the conversation so far.
    pub async fn history(&self) -> Result<Vec<Message>> {
        let (tx, rx) = oneshot::channel();
        self.send(TurnCommand::History(tx)).await?;
        rx.await.map_err(|_| TurnError::ControllerClosed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(TurnCommand::Shutdown).await
    }

    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    /// Resolve once the controller is in `target`.
    pub async fn wait_for_state(&self, target: TurnState) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| TurnError::ControllerClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }
}
