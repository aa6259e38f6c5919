//! Boundaries to the external speech and model services.
//!
//! The controller only sees these traits. Each call reports failure through
//! its own error type so the controller can tell a transient miss from an
//! outage. Scripted implementations are provided for tests and dry runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use parley_core::types::ContextMessage;

// =============================================================================
// Errors
// =============================================================================

/// Failure to obtain a transcript.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenError {
    #[error("no speech detected (timeout)")]
    Timeout,
    #[error("speech was not recognized")]
    Unrecognized,
    #[error("speech recognition service unavailable: {0}")]
    Unavailable(String),
    #[error("listener failed: {0}")]
    Failed(String),
}

impl ListenError {
    /// Timeouts and unrecognized speech are expected and not worth reporting.
    pub fn is_transient(&self) -> bool {
        matches!(self, ListenError::Timeout | ListenError::Unrecognized)
    }
}

/// Failure of the language model call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("model service unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected model response: {0}")]
    BadResponse(String),
}

/// Failure of speech synthesis.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("speech engine error: {0}")]
    Engine(String),
}

// =============================================================================
// Traits
// =============================================================================

/// Captures one utterance and returns its transcript.
#[async_trait]
pub trait Listener: Send {
    /// Wait up to `timeout` for speech to start and at most `phrase_limit`
    /// for the phrase itself. An empty string means nothing was heard.
    async fn capture(
        &mut self,
        timeout: Duration,
        phrase_limit: Duration,
    ) -> Result<String, ListenError>;
}

/// Produces the assistant reply for an ordered message list.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, messages: &[ContextMessage]) -> Result<String, ModelError>;
}

/// Speaks text aloud.
#[async_trait]
pub trait SpeechOutput: Send {
    async fn speak(&mut self, text: &str) -> Result<(), SpeechError>;
}

// =============================================================================
// Scripted implementations
// =============================================================================

/// Listener that replays a fixed list of results, then times out.
#[derive(Debug, Default)]
pub struct ScriptedListener {
    script: VecDeque<Result<String, ListenError>>,
}

impl ScriptedListener {
    pub fn new<I, T>(utterances: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            script: utterances.into_iter().map(|u| Ok(u.into())).collect(),
        }
    }

    /// Queue an arbitrary result, including errors.
    pub fn push(&mut self, result: Result<String, ListenError>) {
        self.script.push_back(result);
    }
}

#[async_trait]
impl Listener for ScriptedListener {
    async fn capture(
        &mut self,
        _timeout: Duration,
        _phrase_limit: Duration,
    ) -> Result<String, ListenError> {
        self.script.pop_front().unwrap_or(Err(ListenError::Timeout))
    }
}

/// Model that replays scripted replies and records every request.
///
/// Once the script is exhausted it answers `"You said: <last message>"`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<Result<String, ModelError>>>>,
    requests: Arc<Mutex<Vec<Vec<ContextMessage>>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, T>(replies: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let model = Self::default();
        for reply in replies {
            model.push(Ok(reply.into()));
        }
        model
    }

    pub fn push(&self, reply: Result<String, ModelError>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Every message list the model has been asked to complete.
    pub fn requests(&self) -> Vec<Vec<ContextMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, messages: &[ContextMessage]) -> Result<String, ModelError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        let scripted = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match scripted {
            Some(reply) => reply,
            None => Ok(format!(
                "You said: {}",
                messages.last().map(|m| m.content.as_str()).unwrap_or("")
            )),
        }
    }
}

/// Speech output that records what it was asked to say.
#[derive(Debug, Clone, Default)]
pub struct RecordingSpeech {
    spoken: Arc<Mutex<Vec<String>>>,
    failing: bool,
}

impl RecordingSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// A speech output whose every call fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SpeechOutput for RecordingSpeech {
    async fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        if self.failing {
            return Err(SpeechError::Engine("audio device missing".to_string()));
        }
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(text.to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::Role;

    fn user(content: &str) -> ContextMessage {
        ContextMessage {
            role: Role::User,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_listen_error_transience() {
        assert!(ListenError::Timeout.is_transient());
        assert!(ListenError::Unrecognized.is_transient());
        assert!(!ListenError::Unavailable("offline".into()).is_transient());
        assert!(!ListenError::Failed("boom".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ListenError::Unavailable("offline".into()).to_string(),
            "speech recognition service unavailable: offline"
        );
        assert_eq!(
            ModelError::Unavailable("connection refused".into()).to_string(),
            "model service unavailable: connection refused"
        );
        assert_eq!(
            SpeechError::Engine("no voices".into()).to_string(),
            "speech engine error: no voices"
        );
    }

    #[tokio::test]
    async fn test_scripted_listener_replays_then_times_out() {
        let mut listener = ScriptedListener::new(["hello"]);
        listener.push(Err(ListenError::Unrecognized));
        let t = Duration::from_secs(1);

        assert_eq!(listener.capture(t, t).await.unwrap(), "hello");
        assert_eq!(
            listener.capture(t, t).await,
            Err(ListenError::Unrecognized)
        );
        assert_eq!(listener.capture(t, t).await, Err(ListenError::Timeout));
    }

    #[tokio::test]
    async fn test_scripted_model_records_and_echoes() {
        let model = ScriptedModel::with_replies(["first"]);
        assert_eq!(model.complete(&[user("a")]).await.unwrap(), "first");
        assert_eq!(model.complete(&[user("b")]).await.unwrap(), "You said: b");

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1][0].content, "b");
    }

    #[tokio::test]
    async fn test_recording_speech() {
        let mut speech = RecordingSpeech::new();
        let observer = speech.clone();
        speech.speak("hi there").await.unwrap();
        assert_eq!(observer.spoken(), vec!["hi there"]);

        let mut broken = RecordingSpeech::failing();
        assert!(broken.speak("hi").await.is_err());
        assert!(broken.spoken().is_empty());
    }
}
