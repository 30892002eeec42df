//! Presence roster
//!
//! Literal list of who the server says is in the channel. Written by the
//! receive loop, read from anywhere.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::error;

use crate::protocol::Identity;

/// Roster errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("Nickname not in roster: {0}")]
    NotPresent(String),
}

/// Shared, ordered list of present users. Cloning shares the same list.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Arc<RwLock<Vec<Identity>>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Identity>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("Roster lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Identity>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("Roster lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Drop everyone (fresh session)
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Append a user. Duplicates are kept as sent.
    pub fn add(&self, identity: Identity) {
        self.write().push(identity);
    }

    /// Remove the first entry with this nickname
    pub fn remove(&self, nick: &str) -> Result<Identity, RosterError> {
        let mut entries = self.write();
        match entries.iter().position(|i| i.nick() == nick) {
            Some(idx) => Ok(entries.remove(idx)),
            None => Err(RosterError::NotPresent(nick.to_string())),
        }
    }

    /// Replace the contents with a full snapshot from the server
    pub fn replace(&self, nicks: impl IntoIterator<Item = String>) {
        let mut entries = self.write();
        entries.clear();
        entries.extend(nicks.into_iter().map(|nick| Identity::new(nick, None)));
    }

    /// Display identities in insertion order
    pub fn snapshot(&self) -> Vec<String> {
        self.read().iter().map(|i| i.to_string()).collect()
    }

    #[cfg(test)]
    pub fn contains(&self, nick: &str) -> bool {
        self.read().iter().any(|i| i.nick() == nick)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
