//! Console stand-ins for the platform speech services.
//!
//! The terminal has no speech engine, so "speaking" prints the reply word by
//! word at the configured rate. Recognition and microphone access are
//! reported as unavailable, which exercises the degraded paths.

use crate::capture::{AudioFrameSource, Microphone};
use crate::error::{Result, TurnError};
use crate::stt::{RecognitionEvent, SessionId, SpeechRecognizer};
use crate::tts::{SpeechSynthesizer, SynthesisEvent, Utterance, UtteranceId, VoiceInfo};
use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Time to "say" one word at rate 1.0
const WORD_DURATION: Duration = Duration::from_millis(280);
const EVENT_BUFFER: usize = 16;
const NOT_SPEAKING: UtteranceId = 0;

pub struct ConsoleSynthesizer {
    events: broadcast::Sender<SynthesisEvent>,
    /// Id of the utterance being printed, or `NOT_SPEAKING`
    speaking: Arc<AtomicU64>,
    current: Mutex<Option<CancellationToken>>,
}

impl ConsoleSynthesizer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            events,
            speaking: Arc::new(AtomicU64::new(NOT_SPEAKING)),
            current: Mutex::new(None),
        }
    }

    fn word_delay(rate: f32) -> Duration {
        WORD_DURATION.div_f32(rate.max(0.1))
    }
}

impl Default for ConsoleSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSynthesizer for ConsoleSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![VoiceInfo::new("Console Narrator", "en-US")]
    }

    fn speak(&self, utterance: Utterance) -> Result<()> {
        let cancel = CancellationToken::new();
        {
            let mut current = self
                .current
                .lock()
                .map_err(|_| TurnError::Synthesis("synthesizer lock poisoned".to_string()))?;
            if let Some(previous) = current.replace(cancel.clone()) {
                previous.cancel();
            }
        }

        let id = utterance.id;
        let delay = Self::word_delay(utterance.rate);
        let events = self.events.clone();
        let speaking = self.speaking.clone();
        speaking.store(id, Ordering::SeqCst);

        tokio::spawn(async move {
            let _ = events.send(SynthesisEvent::Started(id));
            print!("🔊 ");
            let mut completed = true;
            for word in utterance.text.split_whitespace() {
                print!("{} ", word);
                let _ = std::io::stdout().flush();
                if !crate::timer::wait(delay, &cancel).await {
                    completed = false;
                    break;
                }
            }
            println!();

            let _ = speaking.compare_exchange(id, NOT_SPEAKING, Ordering::SeqCst, Ordering::SeqCst);
            let event = if completed {
                SynthesisEvent::Ended(id)
            } else {
                SynthesisEvent::Failed {
                    id,
                    reason: "interrupted".to_string(),
                }
            };
            let _ = events.send(event);
        });

        Ok(())
    }

    fn cancel(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(token) = current.take() {
                token.cancel();
            }
        }
        self.speaking.store(NOT_SPEAKING, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst) != NOT_SPEAKING
    }

    fn subscribe(&self) -> broadcast::Receiver<SynthesisEvent> {
        self.events.subscribe()
    }
}

/// Recognizer for platforms without speech-to-text.
pub struct UnsupportedRecognizer {
    events: broadcast::Sender<RecognitionEvent>,
}

impl UnsupportedRecognizer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

impl Default for UnsupportedRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechRecognizer for UnsupportedRecognizer {
    fn is_supported(&self) -> bool {
        false
    }

    fn start(&self, _session: SessionId, _language: &str) -> Result<()> {
        Err(TurnError::Unsupported(
            "no speech recognizer on the console".to_string(),
        ))
    }

    fn stop(&self) {}

    fn subscribe(&self) -> broadcast::Receiver<RecognitionEvent> {
        self.events.subscribe()
    }
}

/// Microphone that is never available.
pub struct UnavailableMicrophone;

#[async_trait]
impl Microphone for UnavailableMicrophone {
    async fn open(&self) -> Result<Box<dyn AudioFrameSource>> {
        Err(TurnError::Capture("no microphone on the console".to_string()))
    }
}
