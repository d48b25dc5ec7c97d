use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use url::Url;
use voice_turn_rs::chat::{ChatClient, Role};
use voice_turn_rs::config::load_config;
use voice_turn_rs::platform::{ConsoleSynthesizer, UnavailableMicrophone, UnsupportedRecognizer};
use voice_turn_rs::turn::{Capabilities, ControllerConfig, SessionUpdate, TurnController, TurnHandle};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the chat service (overrides CHAT_BASE_URL)
    #[arg(long)]
    endpoint: Option<Url>,

    /// Speech rate, 0.1 to 10.0 (overrides SPEECH_RATE)
    #[arg(long)]
    rate: Option<f32>,

    /// Recognition and voice language (overrides SPEECH_LANGUAGE)
    #[arg(long)]
    language: Option<String>,

    /// Preferred voice name (overrides SPEECH_VOICE)
    #[arg(long)]
    voice: Option<String>,

    /// Start with spoken replies turned off
    #[arg(long)]
    mute: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    log::info!("🚀 Initializing voice-turn");

    let mut config = load_config().context("Failed to load configuration")?;
    if let Some(endpoint) = args.endpoint {
        config.chat.base_url = endpoint;
    }
    if let Some(rate) = args.rate {
        config.speech.rate = rate;
    }
    if let Some(language) = args.language {
        config.speech.language = language;
    }
    if let Some(voice) = args.voice {
        config.speech.preferred_voice = voice;
    }
    if args.mute {
        config.speech.enabled = false;
    }
    config.validate().context("Invalid command line override")?;

    let controller_config = ControllerConfig::from_session(&config);
    let client = ChatClient::new(config.chat).context("Failed to create chat client")?;
    log::info!("💬 Chat endpoint: {}", client.endpoint());

    let capabilities = Capabilities {
        chat: Arc::new(client),
        synthesizer: Arc::new(ConsoleSynthesizer::new()),
        recognizer: Arc::new(UnsupportedRecognizer::new()),
        microphone: Arc::new(UnavailableMicrophone),
    };
    let (controller, handle) = TurnController::new(controller_config, capabilities);
    let controller_task = controller.spawn();
    let printer = tokio::spawn(print_updates(handle.subscribe()));

    println!("💬 Type a message and press Enter.");
    println!("   /voice toggles voice input, /speak on|off, /rate <x>, /history, /quit");
    println!("   Press Ctrl+C to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        if !handle_line(&handle, line.trim()).await? {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    // The controller may already be gone
    let _ = handle.shutdown().await;
    controller_task.await.context("Turn controller panicked")?;
    printer.abort();
    println!("\n👋 Goodbye!");
    Ok(())
}

/// Run one line of user input. Returns `false` when the user asked to quit.
async fn handle_line(handle: &TurnHandle, line: &str) -> Result<bool> {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    match (command, arg.trim()) {
        ("", _) => {}
        ("/quit", _) => return Ok(false),
        ("/voice", _) => handle.toggle_voice().await?,
        ("/speak", "on") => handle.set_speech_enabled(true).await?,
        ("/speak", "off") => handle.set_speech_enabled(false).await?,
        ("/rate", value) => match value.parse::<f32>() {
            Ok(rate) => handle.set_speech_rate(rate).await?,
            Err(_) => println!("❌ Usage: /rate <number>"),
        },
        ("/history", _) => {
            for message in handle.history().await? {
                println!("  {:>9}: {}", message.role, message.content);
            }
        }
        (command, _) if command.starts_with('/') => {
            println!("❌ Unknown command: {}", line);
        }
        _ => {
            // Typing counts as focusing the input, which cuts any speech
            handle.focus_input().await?;
            handle.submit(line).await?;
        }
    }
    Ok(true)
}

async fn print_updates(mut updates: broadcast::Receiver<SessionUpdate>) {
    loop {
        match updates.recv().await {
            Ok(SessionUpdate::Message(message)) if message.role == Role::Assistant => {
                println!("🤖 {}", message.content);
            }
            Ok(SessionUpdate::Message(_)) => {}
            Ok(SessionUpdate::StateChanged { to, .. }) => log::debug!("state: {}", to),
            Ok(SessionUpdate::Error(error)) => println!("❌ [error] {}", error),
            Ok(SessionUpdate::Notice(notice)) => println!("ℹ️  {}", notice),
            Ok(SessionUpdate::VoiceToggled(on)) => {
                println!("🎤 Voice input {}", if on { "on" } else { "off" });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Update printer lagged, skipped {}", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
