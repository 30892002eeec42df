//! Chat room protocol types
//!
//! Frames are JSON objects tagged by a `cmd` field, one per WebSocket text
//! message. Outbound field order is fixed by the service and must not change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A participant as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    nick: String,
    trip: Option<String>,
}

impl Identity {
    /// Build an identity. The service sends the literal string `"null"` (or
    /// nothing) for users without a trip code; both normalize to `None`.
    pub fn new(nick: impl Into<String>, trip: Option<String>) -> Self {
        let trip = trip.filter(|t| !t.is_empty() && t != "null");
        Self {
            nick: nick.into(),
            trip,
        }
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn trip(&self) -> Option<&str> {
        self.trip.as_deref()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.trip {
            Some(trip) => write!(f, "{}#{}", self.nick, trip),
            None => f.write_str(&self.nick),
        }
    }
}

/// Frames sent to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Outbound {
    /// Enter a channel under a nickname (`nick#password` for a trip code)
    #[serde(rename = "join")]
    JoinChannel { channel: String, nick: String },

    /// Post a chat line
    Chat { text: String },

    /// Keep the connection alive
    Ping,
}

impl Outbound {
    /// Serialize to the JSON text sent on the socket
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))
    }
}

/// Decoded server event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Someone posted to the channel
    Message { identity: Identity, text: String },
    /// Someone joined
    Join { identity: Identity },
    /// Someone left
    Leave { identity: Identity },
    /// An action line (`/me`)
    Emote { text: String },
    /// Someone invited the bot to another channel
    Invite { from: String, channel: String },
    /// Full list of users present, sent once after joining
    RosterSnapshot { nicks: Vec<String> },
    /// A well-formed command with no meaning for the relay
    Ignored,
}

impl Inbound {
    /// Decode one text frame. Malformed JSON, a missing `cmd` or a known
    /// command missing required fields is a protocol error.
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawInbound =
            serde_json::from_str(text).map_err(|e| Error::Protocol(format!("Invalid JSON: {}", e)))?;
        Ok(raw.into())
    }
}

/// Wire shape of inbound frames
#[derive(Deserialize)]
#[serde(tag = "cmd")]
enum RawInbound {
    #[serde(rename = "chat")]
    Chat {
        nick: String,
        trip: Option<String>,
        text: String,
    },
    #[serde(rename = "onlineAdd")]
    OnlineAdd { nick: String, trip: Option<String> },
    #[serde(rename = "onlineRemove")]
    OnlineRemove { nick: String, trip: Option<String> },
    #[serde(rename = "onlineSet")]
    OnlineSet { nicks: Vec<String> },
    #[serde(rename = "emote")]
    Emote { text: String },
    #[serde(rename = "invite")]
    Invite { from: String, invite: String },
    #[serde(other)]
    Other,
}

impl From<RawInbound> for Inbound {
    fn from(raw: RawInbound) -> Self {
        match raw {
            RawInbound::Chat { nick, trip, text } => Inbound::Message {
                identity: Identity::new(nick, trip),
                text,
            },
            RawInbound::OnlineAdd { nick, trip } => Inbound::Join {
                identity: Identity::new(nick, trip),
            },
            RawInbound::OnlineRemove { nick, trip } => Inbound::Leave {
                identity: Identity::new(nick, trip),
            },
            RawInbound::OnlineSet { nicks } => Inbound::RosterSnapshot { nicks },
            RawInbound::Emote { text } => Inbound::Emote { text },
            RawInbound::Invite { from, invite } => Inbound::Invite {
                from,
                channel: invite,
            },
            RawInbound::Other => Inbound::Ignored,
        }
    }
}
