//! WebSocket session with the chat server
//!
//! One `Session` owns one connection. Connecting sends the join frame and
//! starts two background tasks:
//!
//! - **receive loop**: reads with a short timeout, decodes each text frame and
//!   hands it to the dispatcher before reading the next one. Any decode error,
//!   handler fault or loss of the connection is reported once on the failure
//!   channel and ends the loop.
//! - **keepalive loop**: sends a ping every `ping_interval` while the
//!   connection is open.
//!
//! Both loops watch a cancellation token, so `close` returns within one read
//! timeout at worst. Sessions are never reused; reconnecting builds a new one.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{Error, HandlerError, Result};
use crate::protocol::{Inbound, Outbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Default bound on a single read before retrying
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Default time between keepalive pings
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on dialing plus the WebSocket handshake and join
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on waiting for a background task or the socket during close
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and as whom to connect
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub channel: String,
    pub nick: String,
    /// Appended to the nick on join; the server derives the trip code from it
    pub password: Option<String>,
    pub read_timeout: Duration,
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, channel: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            channel: channel.into(),
            nick: nick.into(),
            password: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Nick as sent in the join frame
    pub fn join_nick(&self) -> String {
        match self.password.as_deref() {
            Some(password) if !password.is_empty() => format!("{}#{}", self.nick, password),
            _ => self.nick.clone(),
        }
    }
}

/// Reported by the receive loop when the session dies
#[derive(Debug)]
pub struct SessionFailure {
    pub session_id: u64,
    pub error: Error,
}

/// A live connection to the chat server
pub struct Session {
    id: u64,
    writer: Arc<Mutex<WsSink>>,
    open: Arc<AtomicBool>,
    stopped: AtomicBool,
    stop: CancellationToken,
    killed: CancellationToken,
    close_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Dial, join the channel and start the background loops
    pub async fn connect(
        id: u64,
        config: &SessionConfig,
        dispatcher: Arc<Dispatcher>,
        failures: mpsc::UnboundedSender<SessionFailure>,
    ) -> Result<Self> {
        info!(session_id = id, url = %config.url, channel = %config.channel, "Connecting to chat server");

        let join = Outbound::JoinChannel {
            channel: config.channel.clone(),
            nick: config.join_nick(),
        }
        .encode()?;

        let handshake = async {
            let (stream, _response) = connect_async(config.url.as_str())
                .await
                .map_err(Error::Connect)?;
            let (mut sink, source) = stream.split();
            sink.send(Message::text(join)).await.map_err(Error::Connect)?;
            Ok::<_, Error>((sink, source))
        };
        let (sink, source) = tokio::time::timeout(config.connect_timeout, handshake)
            .await
            .map_err(|_| Error::ConnectTimeout(config.connect_timeout))??;

        // Fresh session, fresh presence
        dispatcher.roster().clear();

        let writer = Arc::new(Mutex::new(sink));
        let open = Arc::new(AtomicBool::new(true));
        let stop = CancellationToken::new();
        let killed = CancellationToken::new();

        let receiver = tokio::spawn(receive_loop(ReceiveLoop {
            session_id: id,
            source,
            dispatcher,
            read_timeout: config.read_timeout,
            open: open.clone(),
            stop: stop.clone(),
            killed: killed.clone(),
            failures,
        }));
        let keepalive = tokio::spawn(keepalive_loop(
            id,
            writer.clone(),
            open.clone(),
            stop.clone(),
            config.ping_interval,
        ));

        info!(session_id = id, "Joined channel");

        Ok(Self {
            id,
            writer,
            open,
            stopped: AtomicBool::new(false),
            stop,
            killed,
            close_timeout: config.close_timeout,
            tasks: Mutex::new(vec![receiver, keepalive]),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the socket is still believed to be usable
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Post a chat line to the channel
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        self.send_raw(&Outbound::Chat { text: text.into() }).await
    }

    /// Send any outbound frame. A write still pending when the session is
    /// closed gives up with [`Error::Stopped`].
    pub async fn send_raw(&self, frame: &Outbound) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        write_frame(&self.writer, frame, &self.stop).await
    }

    /// Drop the connection under the running loops. The receive loop reports
    /// a failure exactly as for a server-side drop, even when a stuck write
    /// keeps the socket from closing cleanly.
    pub async fn kill(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        warn!(session_id = self.id, "Force-dropping connection");
        self.open.store(false, Ordering::SeqCst);
        let result = close_sink(&self.writer, self.close_timeout).await;
        self.killed.cancel();
        result
    }

    /// Stop both loops, wait for them, then close the socket. Idempotent.
    pub async fn close(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(session_id = self.id, "Stopping session");
        self.stop.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.close_timeout, task).await.is_err() {
                warn!(session_id = self.id, "Background task did not stop in time, aborting");
                abort.abort();
            }
        }

        self.open.store(false, Ordering::SeqCst);
        if let Err(e) = close_sink(&self.writer, self.close_timeout).await {
            debug!(session_id = self.id, error = %e, "Socket did not close cleanly");
        }
        info!(session_id = self.id, "Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn write_frame(writer: &Mutex<WsSink>, frame: &Outbound, stop: &CancellationToken) -> Result<()> {
    let text = frame.encode()?;
    let write = async {
        let mut sink = writer.lock().await;
        sink.send(Message::text(text)).await
    };
    tokio::select! {
        biased;
        _ = stop.cancelled() => Err(Error::Stopped),
        result = write => Ok(result?),
    }
}

/// Send a Close frame. Waiting for the writer counts against the timeout.
async fn close_sink(writer: &Mutex<WsSink>, timeout: Duration) -> Result<()> {
    let close = async {
        let mut sink = writer.lock().await;
        sink.close().await
    };
    match tokio::time::timeout(timeout, close).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::CloseTimeout(timeout)),
    }
}

struct ReceiveLoop {
    session_id: u64,
    source: WsSource,
    dispatcher: Arc<Dispatcher>,
    read_timeout: Duration,
    open: Arc<AtomicBool>,
    stop: CancellationToken,
    killed: CancellationToken,
    failures: mpsc::UnboundedSender<SessionFailure>,
}

async fn receive_loop(mut rx: ReceiveLoop) {
    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = rx.stop.cancelled() => break Ok(()),
            _ = rx.killed.cancelled() => break Err(Error::ConnectionClosed),
            next = tokio::time::timeout(rx.read_timeout, rx.source.next()) => next,
        };

        let message = match next {
            // Nothing arrived within the read timeout
            Err(_) => continue,
            Ok(None) => break Err(Error::ConnectionClosed),
            Ok(Some(Err(e))) => break Err(Error::WebSocket(e)),
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if let Err(e) = handle_frame(&rx.dispatcher, text.as_str()) {
                    break Err(e);
                }
            }
            Message::Close(frame) => {
                debug!(session_id = rx.session_id, frame = ?frame, "Server closed connection");
                break Err(Error::ConnectionClosed);
            }
            Message::Binary(data) => {
                debug!(session_id = rx.session_id, len = data.len(), "Ignoring binary frame");
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    };

    rx.open.store(false, Ordering::SeqCst);

    match outcome {
        Ok(()) => debug!(session_id = rx.session_id, "Receive loop shut down"),
        Err(error) => {
            warn!(session_id = rx.session_id, error = %error, "Connection lost");
            let _ = rx.failures.send(SessionFailure {
                session_id: rx.session_id,
                error,
            });
        }
    }
}

/// Decode and dispatch one text frame. A panicking handler counts as a
/// handler fault.
fn handle_frame(dispatcher: &Dispatcher, text: &str) -> Result<()> {
    let event = Inbound::decode(text)?;
    match std::panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(event))) {
        Ok(result) => result.map_err(Error::from),
        Err(panic) => Err(Error::Handler(HandlerError::new(panic_message(&*panic)))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", msg)
    } else {
        "handler panicked".to_string()
    }
}

async fn keepalive_loop(
    session_id: u64,
    writer: Arc<Mutex<WsSink>>,
    open: Arc<AtomicBool>,
    stop: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if stop.is_cancelled() || !open.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = write_frame(&writer, &Outbound::Ping, &stop).await {
            debug!(session_id, error = %e, "Ping failed");
            break;
        }
        debug!(session_id, "Sent ping");
    }
    debug!(session_id, "Keepalive loop shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_nick_with_password() {
        let mut config = SessionConfig::new("ws://localhost", "lobby", "relay");
        assert_eq!(config.join_nick(), "relay");

        config.password = Some("hunter2".to_string());
        assert_eq!(config.join_nick(), "relay#hunter2");

        config.password = Some(String::new());
        assert_eq!(config.join_nick(), "relay");
    }

    #[test]
    fn test_panic_message_extraction() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*caught), "handler panicked: boom");

        let caught = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*caught), "handler panicked: code 7");
    }
}
