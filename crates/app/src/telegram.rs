//! Telegram bot adapter
//!
//! A sender task delivers queued text with `sendMessage`; a poller task
//! long-polls `getUpdates` and turns messages from the configured chat into
//! [`MessengerEvent`]s.

use std::sync::Mutex;
use std::time::Duration;

use hcrelay_core::{Messenger, MessengerEvent, TelegramConfig};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a failed poll before trying again
pub const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long queued text may take to drain after a stop
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Slack on top of the long-poll timeout before the HTTP request gives up
const REQUEST_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error: {0}")]
    Api(String),
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Thin Bot API client
#[derive(Clone)]
pub struct TelegramApi {
    client: reqwest::Client,
    endpoint: String,
}

impl TelegramApi {
    pub fn new(api_base: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        let _: serde_json::Value = self.call("sendMessage", &body, None).await?;
        Ok(())
    }

    /// Long-poll for updates at or after `offset`
    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>, TelegramError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &body, Some(timeout + REQUEST_GRACE)).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T, TelegramError> {
        let mut request = self
            .client
            .post(format!("{}/{}", self.endpoint, method))
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        // Failed calls still carry an `ok: false` body with a description
        let parsed: ApiResponse<T> = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(TelegramError::Api(format!("{} returned malformed body: {}", method, e)))
            }
            Err(_) => return Err(TelegramError::Api(format!("{} failed: HTTP {}", method, status))),
        };

        if !parsed.ok {
            return Err(TelegramError::Api(
                parsed
                    .description
                    .unwrap_or_else(|| format!("{} failed: HTTP {}", method, status)),
            ));
        }
        parsed
            .result
            .ok_or_else(|| TelegramError::Api(format!("{} returned no result", method)))
    }
}

/// Polling and delivery settings
#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub chat_id: i64,
    pub poll_timeout: Duration,
    pub retry_delay: Duration,
}

impl From<&TelegramConfig> for TelegramSettings {
    fn from(config: &TelegramConfig) -> Self {
        Self {
            chat_id: config.chat_id,
            poll_timeout: config.poll_timeout(),
            retry_delay: POLL_RETRY_DELAY,
        }
    }
}

pub struct TelegramMessenger {
    outbox: mpsc::UnboundedSender<String>,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TelegramMessenger {
    /// Spawn the sender and poller tasks
    pub fn start(
        api: TelegramApi,
        settings: TelegramSettings,
    ) -> (Self, mpsc::UnboundedReceiver<MessengerEvent>) {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let sender = tokio::spawn(sender_task(
            api.clone(),
            settings.chat_id,
            outbox_rx,
            stop.clone(),
        ));
        let poller = tokio::spawn(poller_task(api, settings, event_tx, stop.clone()));

        info!("Telegram messenger started");
        (
            Self {
                outbox,
                stop,
                tasks: Mutex::new(vec![sender, poller]),
            },
            event_rx,
        )
    }

    /// Wait for both tasks to finish after [`Messenger::stop`]
    pub async fn join(&self) {
        let tasks: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            tasks.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Telegram task ended abnormally");
            }
        }
    }
}

impl Messenger for TelegramMessenger {
    fn send(&self, text: &str) {
        if self.stop.is_cancelled() {
            debug!("Messenger stopped, dropping outgoing text");
            return;
        }
        if self.outbox.send(text.to_string()).is_err() {
            debug!("Telegram sender gone, dropping outgoing text");
        }
    }

    fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for TelegramMessenger {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn sender_task(
    api: TelegramApi,
    chat_id: i64,
    mut outbox: mpsc::UnboundedReceiver<String>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            text = outbox.recv() => {
                let Some(text) = text else { return };
                deliver(&api, chat_id, &text).await;
            }
        }
    }

    // Deliver whatever was queued before the stop
    let flush = async {
        while let Ok(text) = outbox.try_recv() {
            deliver(&api, chat_id, &text).await;
        }
    };
    if tokio::time::timeout(FLUSH_TIMEOUT, flush).await.is_err() {
        warn!("Gave up flushing queued Telegram messages");
    }
    debug!("Telegram sender stopped");
}

async fn deliver(api: &TelegramApi, chat_id: i64, text: &str) {
    if let Err(e) = api.send_message(chat_id, text).await {
        warn!(error = %e, "Failed to send Telegram message");
    }
}

async fn poller_task(
    api: TelegramApi,
    settings: TelegramSettings,
    events: mpsc::UnboundedSender<MessengerEvent>,
    stop: CancellationToken,
) {
    let mut offset = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            result = api.get_updates(offset, settings.poll_timeout) => result,
        };

        match result {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(message) = update.message else { continue };
                    if message.chat.id != settings.chat_id {
                        debug!(chat_id = message.chat.id, "Ignoring message from other chat");
                        continue;
                    }
                    let Some(event) = message.text.as_deref().and_then(MessengerEvent::parse) else {
                        continue;
                    };
                    if events.send(event).is_err() {
                        debug!("Event receiver dropped, poller exiting");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?settings.retry_delay, "Telegram poll failed");
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(settings.retry_delay) => {}
                }
            }
        }
    }
    debug!("Telegram poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123:abc";

    fn settings() -> TelegramSettings {
        TelegramSettings {
            chat_id: 42,
            poll_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_millis(50),
        }
    }

    async fn mount_empty_updates(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/bot123:abc/getUpdates"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "result": []}))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(server)
            .await;
    }

    async fn requests_to(server: &MockServer, method_name: &str) -> Vec<serde_json::Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path().ends_with(method_name))
            .filter_map(|r| serde_json::from_slice(&r.body).ok())
            .collect()
    }

    #[tokio::test]
    async fn test_send_message_uses_html_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_json(json!({
                "chat_id": 42,
                "text": "[<b>alice</b>] hi",
                "parse_mode": "HTML",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {"message_id": 1}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = TelegramApi::new(&server.uri(), TOKEN);
        api.send_message(42, "[<b>alice</b>] hi").await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_description_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found",
            })))
            .mount(&server)
            .await;

        let api = TelegramApi::new(&server.uri(), TOKEN);
        let err = api.send_message(7, "hello").await.unwrap_err();
        assert!(matches!(err, TelegramError::Api(ref msg) if msg == "Bad Request: chat not found"));
    }

    #[tokio::test]
    async fn test_non_json_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let api = TelegramApi::new(&server.uri(), TOKEN);
        let err = api.get_updates(0, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_get_updates_parses_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {"update_id": 10, "message": {"message_id": 1, "chat": {"id": 42, "type": "group"}, "text": "hi"}},
                    {"update_id": 11, "edited_message": {"message_id": 1}},
                ],
            })))
            .mount(&server)
            .await;

        let api = TelegramApi::new(&server.uri(), TOKEN);
        let updates = api.get_updates(0, Duration::from_secs(1)).await.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].update_id, 10);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, 42);
        assert_eq!(message.text.as_deref(), Some("hi"));
        assert!(updates[1].message.is_none());
    }

    #[tokio::test]
    async fn test_poller_filters_chat_and_advances_offset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {"update_id": 10, "message": {"chat": {"id": 42}, "text": "hello room"}},
                    {"update_id": 11, "message": {"chat": {"id": 7}, "text": "not for us"}},
                    {"update_id": 12, "message": {"chat": {"id": 42}, "text": "/online@relay_bot"}},
                    {"update_id": 13, "message": {"chat": {"id": 42}}},
                ],
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_empty_updates(&server).await;

        let (messenger, mut events) =
            TelegramMessenger::start(TelegramApi::new(&server.uri(), TOKEN), settings());

        let first = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(first, Some(MessengerEvent::Text("hello room".into())));
        assert_eq!(
            second,
            Some(MessengerEvent::Command {
                name: "online".into(),
                args: vec![],
            })
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let offsets: Vec<i64> = requests_to(&server, "getUpdates")
                .await
                .iter()
                .filter_map(|body| body["offset"].as_i64())
                .collect();
            if offsets.contains(&14) {
                assert_eq!(offsets[0], 0);
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "offset never advanced: {:?}", offsets);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(events.try_recv().is_err());

        messenger.stop();
        tokio::time::timeout(Duration::from_secs(5), messenger.join()).await.unwrap();
    }

    #[tokio::test]
    async fn test_poller_retries_after_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/getUpdates"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [{"update_id": 1, "message": {"chat": {"id": 42}, "text": "made it"}}],
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_empty_updates(&server).await;

        let (messenger, mut events) =
            TelegramMessenger::start(TelegramApi::new(&server.uri(), TOKEN), settings());

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(event, Some(MessengerEvent::Text("made it".into())));

        messenger.stop();
        tokio::time::timeout(Duration::from_secs(5), messenger.join()).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_is_delivered_and_flushed_on_stop() {
        let server = MockServer::start().await;
        mount_empty_updates(&server).await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .mount(&server)
            .await;

        let (messenger, _events) =
            TelegramMessenger::start(TelegramApi::new(&server.uri(), TOKEN), settings());

        messenger.send("one");
        messenger.send("two");
        messenger.stop();
        messenger.send("after stop");
        tokio::time::timeout(Duration::from_secs(5), messenger.join()).await.unwrap();

        let texts: Vec<String> = requests_to(&server, "sendMessage")
            .await
            .iter()
            .filter_map(|body| body["text"].as_str().map(str::to_string))
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_send_after_sender_exit_is_dropped() {
        let server = MockServer::start().await;
        mount_empty_updates(&server).await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .mount(&server)
            .await;

        let (messenger, _events) =
            TelegramMessenger::start(TelegramApi::new(&server.uri(), TOKEN), settings());

        // End the sender without a stop so the outbox is closed
        let sender = messenger.tasks.lock().unwrap().remove(0);
        sender.abort();
        assert!(sender.await.unwrap_err().is_cancelled());
        assert!(messenger.outbox.is_closed());

        messenger.send("lost");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(requests_to(&server, "sendMessage").await.is_empty());

        messenger.stop();
        tokio::time::timeout(Duration::from_secs(5), messenger.join()).await.unwrap();
    }
}
