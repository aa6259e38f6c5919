//! Console speech adapters.
//!
//! Typed lines stand in for recognized speech. One background task reads
//! stdin; the REPL and the listener share its line channel and take turns,
//! since the REPL is always awaiting the controller while the listener runs.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use parley_chat::{ListenError, Listener, SpeechError, SpeechOutput};

/// Shared stdin line source.
#[derive(Clone)]
pub struct ConsoleInput {
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
    pending: Arc<StdMutex<Option<String>>>,
}

impl ConsoleInput {
    /// Spawn the stdin reader. The channel closes at end of input.
    pub fn spawn_stdin() -> Self {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        });
        Self::from_receiver(rx)
    }

    pub fn from_receiver(rx: mpsc::Receiver<String>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(rx)),
            pending: Arc::new(StdMutex::new(None)),
        }
    }

    /// Next typed line, or `None` once input is closed.
    pub async fn next_line(&self) -> Option<String> {
        self.lines.lock().await.recv().await
    }

    /// Hand `text` to the listener as the next utterance.
    pub fn queue_utterance(&self, text: String) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(text);
        }
    }

    fn take_pending(&self) -> Option<String> {
        self.pending.lock().ok().and_then(|mut p| p.take())
    }
}

/// Listener returning a queued utterance, or the next typed line within
/// the listen timeout.
pub struct ConsoleListener {
    input: ConsoleInput,
}

impl ConsoleListener {
    pub fn new(input: ConsoleInput) -> Self {
        Self { input }
    }
}

#[async_trait]
impl Listener for ConsoleListener {
    async fn capture(
        &mut self,
        timeout: Duration,
        _phrase_limit: Duration,
    ) -> Result<String, ListenError> {
        if let Some(text) = self.input.take_pending() {
            return Ok(text);
        }
        println!("Listening... (type within {}s)", timeout.as_secs());
        match tokio::time::timeout(timeout, self.input.next_line()).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(ListenError::Unavailable("input closed".to_string())),
            Err(_) => Err(ListenError::Timeout),
        }
    }
}

/// Prints replies and, when configured, speaks them through an external
/// program invoked as `<command> -s <rate> <text>`.
pub struct ConsoleSpeaker {
    command: Option<String>,
    rate: u32,
}

impl ConsoleSpeaker {
    pub fn new(command: Option<String>, rate: u32) -> Self {
        Self { command, rate }
    }
}

#[async_trait]
impl SpeechOutput for ConsoleSpeaker {
    async fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        println!("Assistant: {}", text);
        let Some(ref program) = self.command else {
            return Ok(());
        };
        let status = tokio::process::Command::new(program)
            .arg("-s")
            .arg(self.rate.to_string())
            .arg(text)
            .status()
            .await
            .map_err(|e| SpeechError::Engine(format!("{}: {}", program, e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(SpeechError::Engine(format!("{} exited with {}", program, status)))
        }
    }
}
