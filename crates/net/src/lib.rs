//! hcrelay network library
//!
//! Connection lifecycle and event dispatch for the chat room side of the
//! relay.
//!
//! # Architecture
//!
//! - **Session**: one WebSocket connection with a receive loop and a keepalive loop
//! - **Dispatcher**: routes decoded frames to registered handlers, maintains the roster
//! - **Supervisor**: reconnects after a session dies, owns the "alive" flag
//! - **Protocol**: JSON frames tagged by `cmd`
//!
//! # Usage
//!
//! ```ignore
//! let mut handlers = Handlers::new();
//! handlers.on_message(|who, text| {
//!     println!("[{}] {}", who, text);
//!     Ok(())
//! });
//!
//! let config = SessionConfig::new("wss://hack.chat/chat-ws", "programming", "relaybot");
//! let (supervisor, mut events) =
//!     Supervisor::start(config, DEFAULT_RECONNECT_DELAY, handlers).await?;
//!
//! supervisor.send_chat("hello").await?;
//! while let Some(event) = events.recv().await {
//!     // Crashed / Reconnecting / Reconnected / StateChanged
//! }
//! ```

pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod roster;
pub mod session;
pub mod supervisor;

pub use dispatch::{Dispatcher, HandlerResult, Handlers};
pub use error::{Error, HandlerError, Result};
pub use protocol::{Identity, Inbound, Outbound};
pub use roster::{Roster, RosterError};
pub use session::{
    Session, SessionConfig, SessionFailure, DEFAULT_CLOSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PING_INTERVAL,
    DEFAULT_READ_TIMEOUT,
};
pub use supervisor::{SessionState, Supervisor, SupervisorEvent, DEFAULT_RECONNECT_DELAY};
