//! Event dispatch
//!
//! Maps decoded server events onto registered handlers and keeps the roster
//! in step with presence events. Handlers run synchronously on the receive
//! loop, in registration order; the first handler error aborts the dispatch
//! and is returned to the caller.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::protocol::{Identity, Inbound};
use crate::roster::Roster;

/// Handler outcome
pub type HandlerResult = std::result::Result<(), HandlerError>;

type MessageHandler = Box<dyn Fn(&Identity, &str) -> HandlerResult + Send + Sync>;
type PresenceHandler = Box<dyn Fn(&Identity) -> HandlerResult + Send + Sync>;
type EmoteHandler = Box<dyn Fn(&str) -> HandlerResult + Send + Sync>;
type InviteHandler = Box<dyn Fn(&str, &str) -> HandlerResult + Send + Sync>;

/// Handler registry, filled once before the session starts
#[derive(Default)]
pub struct Handlers {
    message: Vec<MessageHandler>,
    join: Vec<PresenceHandler>,
    leave: Vec<PresenceHandler>,
    emote: Vec<EmoteHandler>,
    invite: Vec<InviteHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the sender and text of every chat line not sent by us
    pub fn on_message<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&Identity, &str) -> HandlerResult + Send + Sync + 'static,
    {
        self.message.push(Box::new(handler));
        self
    }

    pub fn on_join<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&Identity) -> HandlerResult + Send + Sync + 'static,
    {
        self.join.push(Box::new(handler));
        self
    }

    pub fn on_leave<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&Identity) -> HandlerResult + Send + Sync + 'static,
    {
        self.leave.push(Box::new(handler));
        self
    }

    pub fn on_emote<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&str) -> HandlerResult + Send + Sync + 'static,
    {
        self.emote.push(Box::new(handler));
        self
    }

    /// Called with the inviting nick and the target channel
    pub fn on_invite<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&str, &str) -> HandlerResult + Send + Sync + 'static,
    {
        self.invite.push(Box::new(handler));
        self
    }
}

/// Routes events for one bot identity
pub struct Dispatcher {
    own_nick: String,
    handlers: Arc<Handlers>,
    roster: Roster,
}

impl Dispatcher {
    pub fn new(own_nick: impl Into<String>, handlers: Arc<Handlers>, roster: Roster) -> Self {
        Self {
            own_nick: own_nick.into(),
            handlers,
            roster,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Apply one event
    pub fn dispatch(&self, event: Inbound) -> HandlerResult {
        match event {
            Inbound::Message { identity, text } => {
                if identity.nick() == self.own_nick {
                    return Ok(());
                }
                for handler in &self.handlers.message {
                    handler(&identity, &text)?;
                }
            }
            Inbound::Join { identity } => {
                self.roster.add(identity.clone());
                for handler in &self.handlers.join {
                    handler(&identity)?;
                }
            }
            Inbound::Leave { identity } => {
                if let Err(e) = self.roster.remove(identity.nick()) {
                    warn!(error = %e, "Roster out of sync with server");
                }
                for handler in &self.handlers.leave {
                    handler(&identity)?;
                }
            }
            Inbound::Emote { text } => {
                for handler in &self.handlers.emote {
                    handler(&text)?;
                }
            }
            Inbound::Invite { from, channel } => {
                for handler in &self.handlers.invite {
                    handler(&from, &channel)?;
                }
            }
            Inbound::RosterSnapshot { nicks } => {
                debug!(count = nicks.len(), "Received roster snapshot");
                self.roster.replace(nicks);
            }
            Inbound::Ignored => {}
        }
        Ok(())
    }
}
