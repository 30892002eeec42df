//! Relay between the chat room and the messenger
//!
//! Chat-room events are mirrored to the chat log and the messenger. Messenger
//! text goes into the room, `/active` and `/online` are answered directly, and
//! supervisor milestones are announced on both sides.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hcrelay_core::format::{self, Relayed};
use hcrelay_core::{ChatLog, Messenger, MessengerEvent};
use hcrelay_net::{Handlers, SessionConfig, Supervisor, SupervisorEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Writes relayed lines to the log and the messenger
#[derive(Clone)]
struct Mirror {
    log: Arc<ChatLog>,
    messenger: Arc<dyn Messenger>,
}

impl Mirror {
    fn relay(&self, line: Relayed) {
        self.record(&line.log);
        self.messenger.send(&line.messenger);
    }

    /// Notices go to the console as well as the log
    fn announce(&self, text: &str) {
        if let Err(e) = self.log.announce(text) {
            warn!(error = %e, "Failed to write chat log");
        }
        self.messenger.send(text);
    }

    fn record(&self, text: &str) {
        if let Err(e) = self.log.record(text) {
            warn!(error = %e, "Failed to write chat log");
        }
    }
}

/// Chat-room handlers that mirror every event
fn mirror_handlers(mirror: &Mirror) -> Handlers {
    let mut handlers = Handlers::new();

    let m = mirror.clone();
    handlers.on_message(move |who, text| {
        m.relay(Relayed::chat(who.nick(), who.trip(), text));
        Ok(())
    });
    let m = mirror.clone();
    handlers.on_join(move |who| {
        m.relay(Relayed::joined(&who.to_string()));
        Ok(())
    });
    let m = mirror.clone();
    handlers.on_leave(move |who| {
        m.relay(Relayed::left(&who.to_string()));
        Ok(())
    });
    let m = mirror.clone();
    handlers.on_emote(move |text| {
        m.relay(Relayed::emote(text));
        Ok(())
    });
    let m = mirror.clone();
    handlers.on_invite(move |from, channel| {
        m.relay(Relayed::invite(from, channel));
        Ok(())
    });

    handlers
}

/// Text announced for a supervisor milestone, if any
fn notice_for(event: &SupervisorEvent) -> Option<String> {
    match event {
        SupervisorEvent::Crashed { retry_in } => Some(format::crashed(retry_in.as_secs())),
        SupervisorEvent::Reconnecting => Some(format::RECONNECTING.to_string()),
        SupervisorEvent::Reconnected => Some(format::RECONNECTED.to_string()),
        SupervisorEvent::StateChanged(_) | SupervisorEvent::ConnectFailed(_) => None,
    }
}

/// Rebuild the text of a command the relay does not handle itself
fn command_text(name: &str, args: &[String]) -> String {
    if args.is_empty() {
        format!("/{}", name)
    } else {
        format!("/{} {}", name, args.join(" "))
    }
}

pub struct Relay {
    supervisor: Supervisor,
    mirror: Mirror,
    own_nick: String,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl Relay {
    /// Register the mirroring handlers and connect to the chat room
    pub async fn start(
        config: SessionConfig,
        reconnect_delay: Duration,
        log: Arc<ChatLog>,
        messenger: Arc<dyn Messenger>,
    ) -> hcrelay_net::Result<(Arc<Self>, mpsc::UnboundedReceiver<SupervisorEvent>)> {
        let mirror = Mirror { log, messenger };
        let own_nick = config.nick.clone();
        let channel = config.channel.clone();

        let (supervisor, events) =
            Supervisor::start(config, reconnect_delay, mirror_handlers(&mirror)).await?;
        info!(channel = %channel, nick = %own_nick, "Relay connected");

        Ok((
            Arc::new(Self {
                supervisor,
                mirror,
                own_nick,
                shutdown: CancellationToken::new(),
                stopped: AtomicBool::new(false),
            }),
            events,
        ))
    }

    /// Handle supervisor and messenger events until [`Relay::stop`]
    pub async fn run(
        self: Arc<Self>,
        mut chat_events: mpsc::UnboundedReceiver<SupervisorEvent>,
        mut messenger_events: mpsc::UnboundedReceiver<MessengerEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(event) = chat_events.recv() => self.on_supervisor_event(event),
                Some(event) = messenger_events.recv() => self.on_messenger_event(event).await,
            }
        }
        debug!("Relay loop finished");
    }

    fn on_supervisor_event(&self, event: SupervisorEvent) {
        match &event {
            SupervisorEvent::StateChanged(state) => debug!(state = ?state, "Chat session state"),
            SupervisorEvent::ConnectFailed(error) => {
                self.mirror.record(&format!("=!= Reconnect failed: {}", error));
            }
            _ => {}
        }
        if let Some(notice) = notice_for(&event) {
            self.mirror.announce(&notice);
        }
    }

    async fn on_messenger_event(&self, event: MessengerEvent) {
        match event {
            MessengerEvent::Text(text) => self.forward(text).await,
            MessengerEvent::Command { name, args } => match name.as_str() {
                "active" => self
                    .mirror
                    .messenger
                    .send(format::active_status(self.supervisor.is_alive())),
                "online" => self
                    .mirror
                    .messenger
                    .send(&format::online_list(&self.supervisor.online_users())),
                _ => self.forward(command_text(&name, &args)).await,
            },
        }
    }

    /// Post messenger text into the room
    async fn forward(&self, text: String) {
        match self.supervisor.send_chat(text.clone()).await {
            Ok(()) => self.mirror.record(&format::outgoing(&self.own_nick, &text)),
            Err(e) => warn!(error = %e, "Could not forward message to chat"),
        }
    }

    /// Drop the chat connection; the supervisor reconnects
    pub async fn kill(&self) {
        info!("Killing chat connection");
        if let Err(e) = self.supervisor.kill().await {
            warn!(error = %e, "Kill failed");
        }
    }

    /// Stop the supervisor and the messenger. Only the first call does anything.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down relay");
        self.shutdown.cancel();
        self.supervisor.stop().await;
        self.mirror.messenger.stop();
    }
}
