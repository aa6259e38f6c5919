//! Conversation engine for Parley.
//!
//! Provides the session memory manager, the turn state machine, the
//! collaborator traits for speech and model services, and the controller
//! that runs one listen, think, speak cycle at a time.

pub mod controller;
pub mod error;
pub mod memory;
pub mod state;
pub mod voice;

pub use controller::{ControllerSettings, TurnController, TurnOutcome, TurnReport};
pub use error::ChatError;
pub use memory::{MemoryManager, SaveOutcome, SessionStats};
pub use state::{StateMachine, TurnState};
pub use voice::{
    ListenError, Listener, ModelClient, ModelError, RecordingSpeech, ScriptedListener,
    ScriptedModel, SpeechError, SpeechOutput,
};
