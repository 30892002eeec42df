//! Relay line formats
//!
//! Every chat-room event produces two renderings: plain text for the chat
//! log and HTML for the messenger.

/// Escape text for the messenger's HTML parse mode
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// One event rendered for both outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relayed {
    pub log: String,
    pub messenger: String,
}

impl Relayed {
    /// Chat line from `nick`, with an optional trip code
    pub fn chat(nick: &str, trip: Option<&str>, text: &str) -> Self {
        let sender = match trip {
            Some(trip) => format!("{}#{}", nick, trip),
            None => nick.to_string(),
        };
        let messenger = match trip {
            Some(trip) => format!(
                "[<b>{}</b>#{}] {}",
                escape_html(nick),
                escape_html(trip),
                escape_html(text)
            ),
            None => format!("[<b>{}</b>] {}", escape_html(nick), escape_html(text)),
        };
        Self {
            log: format!("[{}] {}", sender, text),
            messenger,
        }
    }

    pub fn joined(user: &str) -> Self {
        Self {
            log: format!("# {} joined", user),
            messenger: format!("# {} joined", escape_html(user)),
        }
    }

    pub fn left(user: &str) -> Self {
        Self {
            log: format!("# {} left", user),
            messenger: format!("# {} left", escape_html(user)),
        }
    }

    pub fn emote(text: &str) -> Self {
        Self {
            log: format!("* {}", text),
            messenger: format!("* {}", escape_html(text)),
        }
    }

    pub fn invite(from: &str, channel: &str) -> Self {
        Self {
            log: format!(">>> {} invited you to hack.chat/?{}", from, channel),
            messenger: format!(
                ">>> {} invited you to hack.chat/?{}",
                escape_html(from),
                escape_html(channel)
            ),
        }
    }
}

/// Log line for text the relay posted on the messenger's behalf
pub fn outgoing(own_nick: &str, text: &str) -> String {
    format!("[{}] {}", own_nick, text)
}

/// Notice after the chat session died
pub fn crashed(retry_in_secs: u64) -> String {
    format!(
        "=!= Bot crashed / lost connection. Retrying in {} seconds...",
        retry_in_secs
    )
}

pub const RECONNECTING: &str = "Reconnecting...";
pub const RECONNECTED: &str = "Reconnected!";

/// Reply to `/active`
pub fn active_status(alive: bool) -> &'static str {
    if alive {
        "+++ ACTIVE"
    } else {
        "--- <i>not</i> active"
    }
}

/// Reply to `/online`: sorted, comma separated, escaped
pub fn online_list(users: &[String]) -> String {
    let mut users = users.to_vec();
    users.sort();
    format!("Users online:\n{}", escape_html(&users.join(", ")))
}
