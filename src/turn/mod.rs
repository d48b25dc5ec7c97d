//! Turn-taking state machine: decides who talks when.

pub mod controller;
pub mod events;
pub mod session;
pub mod state;

pub use controller::{Capabilities, ControllerConfig, TurnController, TurnHandle};
pub use events::{SessionUpdate, TurnCommand};
pub use session::{SessionContext, VoiceSession};
pub use state::TurnState;
