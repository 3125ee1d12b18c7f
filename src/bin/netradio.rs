//! Internet radio client
//!
//! Plays the configured stream and joins the station chat. Lines typed
//! on stdin are sent as chat messages; `/help` lists the commands.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netradio::{
    audio::list_output_devices,
    chat::{generate_username, sanitize_username},
    config::AppConfig,
    Radio,
};

const HELP: &str = "\
Commands:
  /nick <name>            change (and remember) your chat name
  /react <id> <emoji>     add a reaction to a message
  /unreact <id> <emoji>   remove your reaction
  /np                     show the current track
  /status                 pipeline status
  /quit                   exit
Anything else is sent as a chat message.";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if std::env::args().any(|arg| arg == "--list-devices") {
        println!("\n=== Available Output Devices ===");
        for device in list_output_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    ID: {}", device.id);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        return Ok(());
    }

    let config_path = AppConfig::default_path();
    let mut config = match &config_path {
        Some(path) => AppConfig::load(path).context("loading config")?,
        None => AppConfig::default(),
    };

    if config.chat.username.is_empty() {
        config.chat.username = generate_username();
        save_config(&config, config_path.as_deref());
    }

    tracing::info!("Starting netradio, stream {}", config.stream.url);
    let mut radio = Radio::start(config.clone()).context("starting radio")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    let mut now_playing_rev = 0;

    println!("{}", HELP);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                if !handle_line(&radio, &mut config, config_path.as_deref(), line.trim()) {
                    break;
                }
            }
            _ = stats_interval.tick() => {
                let status = radio.status();
                tracing::debug!(
                    "Stream {:?}: {} bytes, ring {:.0}%, pcm {:.0}%, {} frames decoded ({} errors), {} slots played",
                    status.source_state,
                    status.bytes_received,
                    status.stream_fill * 100.0,
                    status.pcm_fill * 100.0,
                    status.frames_decoded,
                    status.decode_errors,
                    status.slots_submitted
                );
                let state = radio.now_playing_state();
                if state.revision() != now_playing_rev {
                    now_playing_rev = state.revision();
                    let np = state.get();
                    println!("♪ {} - {}", np.artist, np.title);
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || radio.shutdown())
        .await
        .context("joining radio threads")?;
    Ok(())
}

/// Returns false when the user asked to quit.
fn handle_line(
    radio: &Radio,
    config: &mut AppConfig,
    config_path: Option<&std::path::Path>,
    line: &str,
) -> bool {
    if line.is_empty() {
        return true;
    }

    let mut words = line.splitn(3, ' ');
    let command = words.next().unwrap_or_default();

    match command {
        "/quit" => return false,
        "/help" => println!("{}", HELP),
        "/np" => {
            let np = radio.now_playing();
            println!("♪ {} - {}", np.artist, np.title);
            if !np.art.is_empty() {
                println!("  art: {}", np.art);
            }
        }
        "/status" => println!("{:#?}", radio.status()),
        "/nick" => {
            let requested = line["/nick".len()..].trim();
            match (radio.chat(), sanitize_username(requested)) {
                (Some(chat), Some(name)) => {
                    chat.set_username(&name);
                    config.chat.username = name.clone();
                    save_config(config, config_path);
                    println!("You are now {}", name);
                }
                (None, _) => println!("Chat is disabled"),
                (_, None) => println!("Usage: /nick <name>"),
            }
        }
        "/react" | "/unreact" => {
            let (Some(id), Some(emoji)) = (words.next(), words.next()) else {
                println!("Usage: {} <message id> <emoji>", command);
                return true;
            };
            if let Some(chat) = radio.chat() {
                let result = if command == "/react" {
                    chat.add_reaction(id, emoji.trim())
                } else {
                    chat.remove_reaction(id, emoji.trim())
                };
                if let Err(e) = result {
                    tracing::debug!("Reaction dropped: {}", e);
                }
            }
        }
        _ if command.starts_with('/') => println!("Unknown command {}; try /help", command),
        _ => match radio.chat() {
            Some(chat) => {
                if let Err(e) = chat.send_message(line, None) {
                    tracing::debug!("Chat message dropped: {}", e);
                    println!("(not connected, message not sent)");
                }
            }
            None => println!("Chat is disabled"),
        },
    }
    true
}

fn save_config(config: &AppConfig, path: Option<&std::path::Path>) {
    let Some(path) = path else {
        return;
    };
    if let Err(e) = config.save(path) {
        tracing::warn!("Could not save config to {}: {}", path.display(), e);
    }
}
