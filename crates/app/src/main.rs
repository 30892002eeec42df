//! hcrelay - hack.chat to Telegram relay
//!
//! Mirrors a hack.chat channel into a Telegram chat and posts Telegram
//! messages back into the channel. The chat connection is supervised and
//! reconnects on its own after a crash.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hcrelay_core::{ChatConfig, ChatLog, Messenger, RelayConfig};
use hcrelay_net::SessionConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod relay;
mod shell;
mod telegram;

use relay::Relay;
use shell::OperatorCommand;
use telegram::{TelegramApi, TelegramMessenger, TelegramSettings};

/// Relay a hack.chat channel to a Telegram chat.
#[derive(Parser, Debug)]
#[command(name = "hcrelay", version, about)]
struct Cli {
    /// Path to the config file. Defaults to hcrelay.toml in the user config directory.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

fn session_config(chat: &ChatConfig) -> SessionConfig {
    let mut config = SessionConfig::new(&chat.url, &chat.channel, &chat.nick);
    config.password = chat.password.clone();
    config.read_timeout = chat.read_timeout();
    config.ping_interval = chat.ping_interval();
    config.connect_timeout = chat.connect_timeout();
    config
}

fn load_config(cli: &Cli) -> Result<RelayConfig, hcrelay_core::Error> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => RelayConfig::default_path()?,
    };
    tracing::info!(path = %path.display(), "Loading config");
    Ok(RelayConfig::load(&path)?)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting hcrelay");

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let log = match ChatLog::open(&config.log.path) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            tracing::error!("Failed to open chat log {}: {}", config.log.path.display(), e);
            std::process::exit(1);
        }
    };

    let api = TelegramApi::new(&config.telegram.api_base, &config.telegram.token);
    let (messenger, messenger_events) =
        TelegramMessenger::start(api, TelegramSettings::from(&config.telegram));
    let messenger = Arc::new(messenger);

    let (relay, chat_events) = match Relay::start(
        session_config(&config.chat),
        config.chat.reconnect_delay(),
        log,
        messenger.clone(),
    )
    .await
    {
        Ok(started) => started,
        Err(e) => {
            tracing::error!("Failed to connect to chat: {}", e);
            messenger.stop();
            messenger.join().await;
            std::process::exit(1);
        }
    };

    let relay_task = tokio::spawn(relay.clone().run(chat_events, messenger_events));
    let mut commands = shell::spawn();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupt received. Shutting down...");
                break;
            }
            command = commands.recv() => match command {
                Some(OperatorCommand::Kill) => relay.kill().await,
                Some(OperatorCommand::Quit) | None => break,
            },
        }
    }

    relay.stop().await;
    if let Err(e) = relay_task.await {
        tracing::warn!(error = %e, "Relay task ended abnormally");
    }
    messenger.join().await;
    tracing::info!("hcrelay stopped");
}
