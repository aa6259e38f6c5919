//! Parley application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the session store (JSON file, or in-memory with `--no-persist`)
//! 4. Run the interactive conversation loop or a `sessions` subcommand

mod cli;
mod console;
mod ollama;

use std::io::Write;

use clap::Parser;

use parley_chat::{
    ChatError, ControllerSettings, MemoryManager, SaveOutcome, TurnController, TurnOutcome,
    TurnReport, TurnState,
};
use parley_core::config::ParleyConfig;
use parley_core::types::format_duration;
use parley_storage::{InMemoryStore, JsonFileStore, SessionStore};

use cli::{CliArgs, Command, SessionsCommand};
use console::{ConsoleInput, ConsoleListener, ConsoleSpeaker};
use ollama::OllamaClient;

type Store = Box<dyn SessionStore>;
type ConsoleController = TurnController<ConsoleListener, OllamaClient, ConsoleSpeaker, Store>;

const HELP: &str = "\
Type what you would say and press Enter. An empty line listens for the next typed line.
Commands:
  /save            save the current session
  /new             start a new session without saving
  /reset           save, then start a new session
  /load <id>       resume a saved session
  /delete <id>     delete a saved session
  /sessions        list recent saved sessions
  /stats           show counters for the current session
  /clear           delete all saved sessions
  /memory on|off   toggle conversation memory
  /stop            save and quit
  /help            show this help";

/// Whether the REPL keeps going after a command.
enum Flow {
    Continue,
    Quit,
}

fn open_store(args: &CliArgs, config: &ParleyConfig) -> Store {
    if args.no_persist {
        tracing::info!("Session persistence disabled; using in-memory store");
        Box::new(InMemoryStore::new())
    } else {
        let path = config.store_path();
        tracing::info!(path = %path.display(), "Using session store");
        Box::new(JsonFileStore::new(path))
    }
}

fn describe_save(outcome: &SaveOutcome) -> String {
    match outcome {
        SaveOutcome::Saved { id, stored } => {
            format!("Session {} saved ({} stored).", id, stored)
        }
        SaveOutcome::SkippedEmpty => "Nothing to save yet.".to_string(),
    }
}

fn print_sessions(memory: &MemoryManager<Store>, limit: usize) {
    let sessions = memory.list_sessions(limit);
    if sessions.is_empty() {
        println!("No saved sessions.");
        return;
    }
    for summary in sessions {
        println!(
            "{}  {}  {}",
            summary.id,
            summary.label(),
            format_duration(summary.duration_secs)
        );
    }
}

fn print_report(report: &TurnReport) {
    for notice in &report.notices {
        println!("! {}", notice);
    }
    if report.outcome == TurnOutcome::NoInput && report.notices.is_empty() {
        println!("(no speech detected)");
    }
}

fn stats_lines<S: SessionStore>(
    memory: &MemoryManager<S>,
    settings: &ControllerSettings,
    state: TurnState,
) -> Vec<String> {
    let stats = memory.stats();
    let memory_label = if memory.is_enabled() {
        format!("on (last {} messages as context)", memory.context_window())
    } else {
        "off".to_string()
    };
    vec![
        format!("Session:        {}", stats.session_id.as_deref().unwrap_or("-")),
        format!("User messages:  {}", stats.user_turns),
        format!("AI responses:   {}", stats.assistant_turns),
        format!("Saved sessions: {}", stats.saved_sessions),
        format!("Duration:       {}", stats.duration_label()),
        format!("Memory:         {}", memory_label),
        format!("Exit words:     {}", settings.exit_keywords.join(", ")),
        format!("Status:         {}", state.label()),
    ]
}

fn handle_command(controller: &mut ConsoleController, command: &str) -> Flow {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or("");
    let arg = parts.next();

    match (name, arg) {
        ("save", _) => match controller.save() {
            Ok(outcome) => println!("{}", describe_save(&outcome)),
            Err(e) => println!("! Error saving memory: {}", e),
        },
        ("new", _) => {
            controller.new_session();
            println!("Started a new session.");
        }
        ("reset", _) => match controller.reset() {
            Ok(outcome) => println!("{} Conversation reset.", describe_save(&outcome)),
            Err(e) => println!("! Reset failed, session kept: {}", e),
        },
        ("load", Some(id)) => match controller.load_session(id) {
            Ok(()) => {
                if let Some(session) = controller.memory().active() {
                    println!("Loaded {} ({} messages).", session.id, session.turns.len());
                    for turn in &session.turns {
                        println!("  {}: {}", turn.role, turn.content);
                    }
                }
            }
            Err(e) => println!("! {}", e),
        },
        ("delete", Some(id)) => match controller.memory_mut().delete_session(id) {
            Ok(true) => println!("Deleted {}.", id),
            Ok(false) => println!("No saved session {}.", id),
            Err(e) => println!("! {}", e),
        },
        ("sessions", _) => print_sessions(controller.memory(), 10),
        ("stats", _) => {
            for line in stats_lines(controller.memory(), controller.settings(), controller.state()) {
                println!("{}", line);
            }
        }
        ("clear", _) => match controller.clear_all() {
            Ok(()) => println!("All conversation history cleared."),
            Err(e) => println!("! {}", e),
        },
        ("memory", Some("on")) => {
            controller.memory_mut().set_enabled(true);
            println!("Memory on.");
        }
        ("memory", Some("off")) => {
            controller.memory_mut().set_enabled(false);
            println!("Memory off.");
        }
        ("stop", _) => {
            let save_first = controller.memory().is_enabled();
            if let Err(e) = controller.stop(save_first) {
                println!("! Error saving memory: {}", e);
            }
            return Flow::Quit;
        }
        ("help", _) => println!("{}", HELP),
        _ => println!("Unknown command /{}. Type /help for commands.", command),
    }
    Flow::Continue
}

async fn run_chat(config: &ParleyConfig, store: Store) -> Result<(), Box<dyn std::error::Error>> {
    let input = ConsoleInput::spawn_stdin();
    let model = OllamaClient::new(&config.model)?;
    tracing::info!(model = %model.model(), endpoint = %config.model.endpoint, "Model client ready");

    let mut controller = TurnController::new(
        MemoryManager::new(store, &config.memory),
        ConsoleListener::new(input.clone()),
        model,
        ConsoleSpeaker::new(config.voice.speech_command.clone(), config.voice.speech_rate),
        ControllerSettings::from_config(config),
    );

    println!("{}", HELP);
    controller.greet().await;

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = input.next_line().await else {
            let save_first = controller.memory().is_enabled();
            if let Err(e) = controller.stop(save_first) {
                println!("! Error saving memory: {}", e);
            }
            break;
        };
        let line = line.trim();

        if let Some(command) = line.strip_prefix('/') {
            match handle_command(&mut controller, command) {
                Flow::Continue => continue,
                Flow::Quit => break,
            }
        }

        if !line.is_empty() {
            input.queue_utterance(line.to_string());
        }
        match controller.run_turn().await {
            Ok(report) => {
                print_report(&report);
                if matches!(report.outcome, TurnOutcome::Ended { .. }) {
                    break;
                }
            }
            Err(ChatError::ConversationEnded) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Turn failed");
                println!("! {}", e);
            }
        }
    }

    tracing::info!("Conversation loop finished");
    Ok(())
}

fn run_sessions(
    command: SessionsCommand,
    config: &ParleyConfig,
    store: Store,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut memory = MemoryManager::new(store, &config.memory);
    match command {
        SessionsCommand::List { limit } => print_sessions(&memory, limit),
        SessionsCommand::Show { id } => {
            let session = memory
                .find_session(&id)
                .ok_or(ChatError::SessionNotFound(id))?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        SessionsCommand::Delete { id } => {
            if memory.delete_session(&id)? {
                println!("Deleted {}.", id);
            } else {
                return Err(ChatError::SessionNotFound(id).into());
            }
        }
        SessionsCommand::Clear => {
            memory.clear_all()?;
            println!("All conversation history cleared.");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = ParleyConfig::load_or_default(&config_file);
    args.apply_overrides(&mut config);

    // Tracing. RUST_LOG wins over the configured level; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    let config = config.sanitized();
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    let store = open_store(&args, &config);
    match args.command() {
        Command::Chat => run_chat(&config, store).await,
        Command::Sessions(command) => run_sessions(command, &config, store),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_save() {
        let saved = SaveOutcome::Saved {
            id: "20240101_120000".to_string(),
            stored: 3,
        };
        assert_eq!(describe_save(&saved), "Session 20240101_120000 saved (3 stored).");
        assert_eq!(describe_save(&SaveOutcome::SkippedEmpty), "Nothing to save yet.");
    }

    #[test]
    fn test_stats_lines() {
        let config = ParleyConfig::default();
        let mut memory = MemoryManager::new(InMemoryStore::new(), &config.memory);
        let settings = ControllerSettings::from_config(&config);

        let lines = stats_lines(&memory, &settings, TurnState::Idle);
        assert!(lines.contains(&"Session:        -".to_string()));
        assert!(lines.contains(&"Duration:       Not started".to_string()));
        assert!(lines.contains(&"Memory:         on (last 10 messages as context)".to_string()));
        assert!(lines.contains(&"Exit words:     exit, stop, quit".to_string()));

        memory.append_turn(parley_core::types::Role::User, "hi");
        memory.set_enabled(false);
        let lines = stats_lines(&memory, &settings, TurnState::Listening);
        assert!(lines.contains(&"User messages:  1".to_string()));
        assert!(lines.contains(&"Memory:         off".to_string()));
        assert!(lines.contains(&"Status:         Listening...".to_string()));
    }

    #[test]
    fn test_open_store_honors_no_persist() {
        let dir = std::env::temp_dir().join("parley-no-persist-test");
        let args = CliArgs::parse_from([
            "parley",
            "--no-persist",
            "--data-dir",
            dir.to_str().unwrap_or("."),
        ]);
        let mut config = ParleyConfig::default();
        args.apply_overrides(&mut config);

        let store = open_store(&args, &config);
        assert!(store.load().is_empty());
        store.save(&[]).unwrap();
        assert!(!config.store_path().exists());
    }
}
