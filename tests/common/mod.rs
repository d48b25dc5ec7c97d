//! In-memory capabilities for driving the turn controller in tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use voice_turn_rs::capture::{AudioFrameSource, Microphone};
use voice_turn_rs::chat::{ChatBackend, ChatError, Message};
use voice_turn_rs::error::{Result, TurnError};
use voice_turn_rs::stt::{RecognitionEvent, SessionId, SpeechRecognizer};
use voice_turn_rs::tts::{SynthesisEvent, SpeechSynthesizer, Utterance, UtteranceId, VoiceInfo};
use voice_turn_rs::turn::{
    Capabilities, ControllerConfig, SessionUpdate, TurnController, TurnHandle, TurnState,
};

/// Synthesizer that starts speaking immediately and ends only when told to.
pub struct MockSynthesizer {
    tx: broadcast::Sender<SynthesisEvent>,
    current: AtomicU64,
    held: AtomicBool,
    refuse: AtomicBool,
    deferred: AtomicBool,
    spoken: Mutex<Vec<Utterance>>,
    cancels: AtomicUsize,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self {
            tx,
            current: AtomicU64::new(0),
            held: AtomicBool::new(false),
            refuse: AtomicBool::new(false),
            deferred: AtomicBool::new(false),
            spoken: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        }
    }

    /// Finish the current utterance normally.
    pub fn finish(&self) {
        let id = self.current.swap(0, Ordering::SeqCst);
        if id != 0 {
            let _ = self.tx.send(SynthesisEvent::Ended(id));
        }
    }

    /// Report an engine error for the current utterance.
    pub fn fail(&self, reason: &str) {
        let id = self.current.swap(0, Ordering::SeqCst);
        if id != 0 {
            let _ = self.tx.send(SynthesisEvent::Failed {
                id,
                reason: reason.to_string(),
            });
        }
    }

    /// Keep reporting playback after the utterance ended (trailing audio).
    pub fn hold_playback(&self, held: bool) {
        self.held.store(held, Ordering::SeqCst);
    }

    pub fn refuse_to_speak(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Hold back `Started` until [`begin`](Self::begin) is called.
    pub fn defer_start(&self, deferred: bool) {
        self.deferred.store(deferred, Ordering::SeqCst);
    }

    /// Report the most recent utterance as started, even if it was cancelled.
    pub fn begin(&self) {
        if let Some(utterance) = self.last_utterance() {
            let _ = self.tx.send(SynthesisEvent::Started(utterance.id));
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.text.clone())
            .collect()
    }

    pub fn last_utterance(&self) -> Option<Utterance> {
        self.spoken.lock().unwrap().last().cloned()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl SpeechSynthesizer for MockSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![
            VoiceInfo::new("Samantha", "en-US"),
            VoiceInfo::new("Emily (Enhanced)", "en-GB"),
        ]
    }

    fn speak(&self, utterance: Utterance) -> Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TurnError::Synthesis("engine unavailable".to_string()));
        }
        let id = utterance.id;
        self.spoken.lock().unwrap().push(utterance);
        self.current.store(id, Ordering::SeqCst);
        if !self.deferred.load(Ordering::SeqCst) {
            let _ = self.tx.send(SynthesisEvent::Started(id));
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        let id: UtteranceId = self.current.swap(0, Ordering::SeqCst);
        if id != 0 {
            let _ = self.tx.send(SynthesisEvent::Failed {
                id,
                reason: "interrupted".to_string(),
            });
        }
    }

    fn is_speaking(&self) -> bool {
        self.current.load(Ordering::SeqCst) != 0 || self.held.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<SynthesisEvent> {
        self.tx.subscribe()
    }
}

/// Recognizer whose results are injected by the test.
pub struct MockRecognizer {
    supported: bool,
    tx: broadcast::Sender<RecognitionEvent>,
    running: AtomicBool,
    session: AtomicU64,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl MockRecognizer {
    pub fn new(supported: bool) -> Self {
        let (tx, _) = broadcast::channel(32);
        Self {
            supported,
            tx,
            running: AtomicBool::new(false),
            session: AtomicU64::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// The user said `text`; the session finalizes it and ends.
    pub fn hear(&self, text: &str) {
        let _ = self.tx.send(RecognitionEvent::Final {
            session: self.current_session(),
            text: text.to_string(),
        });
        self.end_session();
    }

    /// The session ended without a result (silence timeout).
    pub fn end_session(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.tx.send(RecognitionEvent::Ended(self.current_session()));
    }

    /// Deliver a late end event for an earlier, already stopped session.
    pub fn end_stale_session(&self, session: SessionId) {
        let _ = self.tx.send(RecognitionEvent::Ended(session));
    }

    /// Id of the most recently started session.
    pub fn current_session(&self) -> SessionId {
        self.session.load(Ordering::SeqCst)
    }

    pub fn report_error(&self, reason: &str) {
        let _ = self.tx.send(RecognitionEvent::Error(reason.to_string()));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl SpeechRecognizer for MockRecognizer {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn start(&self, session: SessionId, _language: &str) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TurnError::Capture("recognition already started".to_string()));
        }
        self.session.store(session, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<RecognitionEvent> {
        self.tx.subscribe()
    }
}

/// Microphone producing a constant level that the test can change.
pub struct MockMicrophone {
    available: bool,
    level: Arc<AtomicU32>,
    open_streams: Arc<AtomicUsize>,
}

impl MockMicrophone {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            level: Arc::new(AtomicU32::new(0f32.to_bits())),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_level(&self, level: f32) {
        self.level.store(level.to_bits(), Ordering::SeqCst);
    }

    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

struct LevelSource {
    level: Arc<AtomicU32>,
    open_streams: Arc<AtomicUsize>,
    closed: bool,
}

impl AudioFrameSource for LevelSource {
    fn read_frame(&mut self, frame: &mut [f32]) -> Result<()> {
        let level = f32::from_bits(self.level.load(Ordering::SeqCst));
        // Alternate sign so the signal looks like audio rather than DC
        for (i, sample) in frame.iter_mut().enumerate() {
            *sample = if i % 2 == 0 { level } else { -level };
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Microphone for MockMicrophone {
    async fn open(&self) -> Result<Box<dyn AudioFrameSource>> {
        if !self.available {
            return Err(TurnError::Capture("permission denied".to_string()));
        }
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LevelSource {
            level: self.level.clone(),
            open_streams: self.open_streams.clone(),
            closed: false,
        }))
    }
}

/// Chat backend answering from a queue of canned replies.
pub struct MockBackend {
    replies: Mutex<VecDeque<std::result::Result<String, ChatError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
    latency: Duration,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            latency,
        }
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, status: u16, message: &str) -> Self {
        self.replies.lock().unwrap().push_back(Err(ChatError::Remote {
            status,
            message: message.to_string(),
        }));
        self
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn complete(&self, messages: &[Message]) -> std::result::Result<String, ChatError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Okay.".to_string()))
    }
}

pub struct Options {
    pub speech_enabled: bool,
    pub recognizer_supported: bool,
    pub microphone_available: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            speech_enabled: true,
            recognizer_supported: true,
            microphone_available: true,
        }
    }
}

pub struct Harness {
    pub handle: TurnHandle,
    pub updates: broadcast::Receiver<SessionUpdate>,
    pub synth: Arc<MockSynthesizer>,
    pub recognizer: Arc<MockRecognizer>,
    pub microphone: Arc<MockMicrophone>,
    pub backend: Arc<MockBackend>,
    pub task: JoinHandle<()>,
}

pub fn start(backend: MockBackend, options: Options) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let synth = Arc::new(MockSynthesizer::new());
    let recognizer = Arc::new(MockRecognizer::new(options.recognizer_supported));
    let microphone = Arc::new(MockMicrophone::new(options.microphone_available));
    let backend = Arc::new(backend);

    let mut config = ControllerConfig::default();
    config.speech.enabled = options.speech_enabled;

    let (controller, handle) = TurnController::new(
        config,
        Capabilities {
            chat: backend.clone(),
            synthesizer: synth.clone(),
            recognizer: recognizer.clone(),
            microphone: microphone.clone(),
        },
    );
    let updates = handle.subscribe();
    let task = controller.spawn();

    Harness {
        handle,
        updates,
        synth,
        recognizer,
        microphone,
        backend,
        task,
    }
}

const WAIT_LIMIT: Duration = Duration::from_secs(60);

impl Harness {
    /// Next state the controller moved to.
    pub async fn next_state(&mut self) -> TurnState {
        loop {
            let update = tokio::time::timeout(WAIT_LIMIT, self.updates.recv())
                .await
                .expect("timed out waiting for a state change")
                .expect("update stream closed");
            if let SessionUpdate::StateChanged { to, .. } = update {
                return to;
            }
        }
    }

    /// Collect the next `count` states.
    pub async fn states(&mut self, count: usize) -> Vec<TurnState> {
        let mut states = Vec::with_capacity(count);
        for _ in 0..count {
            states.push(self.next_state().await);
        }
        states
    }

    pub async fn wait_for(&self, state: TurnState) {
        tokio::time::timeout(WAIT_LIMIT, self.handle.wait_for_state(state))
            .await
            .expect("timed out waiting for state")
            .expect("controller stopped");
    }

    /// Drain queued updates and return the non-state ones.
    pub fn drain_updates(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            if !matches!(update, SessionUpdate::StateChanged { .. }) {
                updates.push(update);
            }
        }
        updates
    }

    /// Voice session on, reply spoken, assistant currently speaking.
    pub async fn speak_reply_to(&mut self, transcript: &str) {
        self.recognizer.hear(transcript);
        self.wait_for(TurnState::Speaking).await;
    }
}

/// Let spawned tasks run without moving the paused clock much.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
