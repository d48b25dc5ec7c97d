pub mod capture;
pub mod chat;
pub mod config;
pub mod error;
pub mod gate;
pub mod platform;
pub mod stt;
pub mod timer;
pub mod tts;
pub mod turn;
pub mod vad;

pub use error::{Result, TurnError};
pub use turn::{Capabilities, ControllerConfig, SessionUpdate, TurnController, TurnHandle, TurnState};
