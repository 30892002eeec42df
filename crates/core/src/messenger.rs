//! Messenger contract
//!
//! The relay talks to the bot side through [`Messenger`]; incoming traffic
//! arrives as [`MessengerEvent`]s on a channel owned by the implementation.

/// Something the bot side received from its chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessengerEvent {
    /// Plain text to forward into the room
    Text(String),
    /// `/name arg1 arg2`, with any `@botname` suffix stripped from the name
    Command { name: String, args: Vec<String> },
}

impl MessengerEvent {
    /// Classify an incoming message. Returns `None` for blank text.
    pub fn parse(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }

        let rest = match text.strip_prefix('/') {
            Some(rest) if !rest.starts_with(char::is_whitespace) => rest,
            _ => return Some(MessengerEvent::Text(text.to_string())),
        };

        let mut words = rest.split_whitespace();
        let head = words.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default();
        if name.is_empty() {
            return Some(MessengerEvent::Text(text.to_string()));
        }

        Some(MessengerEvent::Command {
            name: name.to_string(),
            args: words.map(str::to_string).collect(),
        })
    }
}

/// Outbound side of the bot
pub trait Messenger: Send + Sync {
    /// Queue text for delivery. Formatting follows the implementation's
    /// markup mode; callers escape untrusted content.
    fn send(&self, text: &str);

    /// Stop delivering and polling. Idempotent.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        assert_eq!(
            MessengerEvent::parse("hello room"),
            Some(MessengerEvent::Text("hello room".into()))
        );
    }

    #[test]
    fn test_blank_text_ignored() {
        assert_eq!(MessengerEvent::parse(""), None);
        assert_eq!(MessengerEvent::parse("   \n"), None);
    }

    #[test]
    fn test_command_with_args() {
        assert_eq!(
            MessengerEvent::parse("/online now please"),
            Some(MessengerEvent::Command {
                name: "online".into(),
                args: vec!["now".into(), "please".into()],
            })
        );
    }

    #[test]
    fn test_command_bot_suffix_stripped() {
        assert_eq!(
            MessengerEvent::parse("/active@relay_bot"),
            Some(MessengerEvent::Command {
                name: "active".into(),
                args: vec![],
            })
        );
    }

    #[test]
    fn test_lone_slash_is_text() {
        assert_eq!(MessengerEvent::parse("/"), Some(MessengerEvent::Text("/".into())));
        assert_eq!(
            MessengerEvent::parse("/ spaced"),
            Some(MessengerEvent::Text("/ spaced".into()))
        );
    }

    #[test]
    fn test_text_keeps_whitespace() {
        assert_eq!(
            MessengerEvent::parse("  indented\nsecond line"),
            Some(MessengerEvent::Text("  indented\nsecond line".into()))
        );
    }
}
