//! In-process chat server for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Generous bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Accepts WebSocket clients on a random local port
pub struct TestServer {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<TestConn>,
    accept_task: JoinHandle<()>,
    stall: Arc<AtomicBool>,
}

enum Outgoing {
    Frame(Message),
    PauseReading,
    Drop,
}

/// Server side of one accepted client
pub struct TestConn {
    frames: mpsc::UnboundedReceiver<Message>,
    out: mpsc::UnboundedSender<Outgoing>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conns) = mpsc::unbounded_channel();
        let stall = Arc::new(AtomicBool::new(false));
        let stalling = stall.clone();

        let accept_task = tokio::spawn(async move {
            // Accepted but never answered while stalling
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                if stalling.load(Ordering::SeqCst) {
                    held.push(stream);
                    continue;
                }
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (frame_tx, frames) = mpsc::unbounded_channel();
                let (out, mut out_rx) = mpsc::unbounded_channel();
                tokio::spawn(async move {
                    let (mut sink, mut source) = ws.split();
                    let mut reading = true;
                    loop {
                        tokio::select! {
                            incoming = source.next(), if reading => match incoming {
                                Some(Ok(msg)) => {
                                    let _ = frame_tx.send(msg);
                                }
                                _ => break,
                            },
                            outgoing = out_rx.recv() => match outgoing {
                                Some(Outgoing::Frame(msg)) => {
                                    if sink.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Outgoing::PauseReading) => reading = false,
                                Some(Outgoing::Drop) | None => break,
                            },
                        }
                    }
                });
                if conn_tx.send(TestConn { frames, out }).is_err() {
                    break;
                }
            }
        });

        Self {
            addr,
            conns,
            accept_task,
            stall,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Accept later TCP connections but never complete their handshake
    pub fn stall_handshakes(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    /// Wait for the next client to connect
    pub async fn accept(&mut self) -> TestConn {
        tokio::time::timeout(WAIT, self.conns.recv())
            .await
            .expect("no client connected")
            .expect("server stopped")
    }

    /// Assert no client connects within `within`
    pub async fn expect_no_connection(&mut self, within: Duration) {
        if let Ok(Some(_)) = tokio::time::timeout(within, self.conns.recv()).await {
            panic!("unexpected connection");
        }
    }
}

impl Drop for TestServer {
    /// Stops listening; already accepted connections stay up
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl TestConn {
    /// Next frame from the client, any kind
    pub async fn next_frame(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.frames.recv()).await.ok().flatten()
    }

    /// Next text frame from the client, skipping control frames
    pub async fn next_text(&mut self) -> String {
        loop {
            match self.next_frame().await {
                Some(Message::Text(text)) => return text.as_str().to_string(),
                Some(_) => continue,
                None => panic!("client sent no text frame"),
            }
        }
    }

    /// Everything the client sent within `window`
    pub async fn collect_for(&mut self, window: Duration) -> Vec<Message> {
        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, self.frames.recv()).await {
            frames.push(frame);
        }
        frames
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.out.send(Outgoing::Frame(Message::text(text.to_string())));
    }

    pub fn send_close(&self) {
        let _ = self.out.send(Outgoing::Frame(Message::Close(None)));
    }

    /// Stop reading from the client so its writes eventually block
    pub fn pause_reading(&self) {
        let _ = self.out.send(Outgoing::PauseReading);
    }

    /// Drop the TCP connection without a close handshake
    pub fn drop_connection(&self) {
        let _ = self.out.send(Outgoing::Drop);
    }
}

/// Port that refuses connections
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

pub fn is_ping(frame: &Message) -> bool {
    matches!(frame, Message::Text(text) if text.as_str() == r#"{"cmd":"ping"}"#)
}
