//! hcrelay core library
//!
//! Configuration, the chat log, line formatting and the messenger contract
//! shared by the relay binary.

pub mod chatlog;
pub mod config;
pub mod error;
pub mod format;
pub mod messenger;

pub use chatlog::ChatLog;
pub use config::{ChatConfig, ConfigError, LogConfig, RelayConfig, TelegramConfig};
pub use error::{Error, Result};
pub use format::{escape_html, Relayed};
pub use messenger::{Messenger, MessengerEvent};
