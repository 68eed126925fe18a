//! Asterisk Manager Interface (AMI) client.
//!
//! Wire protocol: CRLF-terminated `Key: Value` header lines, blank line
//! terminates a block. One reader task owns the socket's read half and
//! demultiplexes blocks: responses carrying an `ActionID` resolve the
//! matching pending send, everything else fans out as an event. Writes
//! are serialized by the writer mutex. On disconnect, every in-flight
//! send fails with a retryable error and the supervisor reconnects with
//! backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use omnihub_core::config::AsteriskConfig;
use omnihub_channels::error::{ChannelError, Result};

/// Response wait cap per action.
const ACTION_TIMEOUT_SECS: u64 = 10;
/// Reconnect backoff bounds.
const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_MAX_SECS: u64 = 300;

/// One parsed AMI block.
#[derive(Debug, Clone, Default)]
pub struct AmiMessage {
    pub headers: HashMap<String, String>,
}

impl AmiMessage {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.get("Response").is_some_and(|r| r.eq_ignore_ascii_case("success"))
    }

    pub fn is_event(&self, name: &str) -> bool {
        self.get("Event").is_some_and(|e| e == name)
    }
}

/// Parse one complete header block (without the terminating blank line).
pub fn parse_block(lines: &[String]) -> AmiMessage {
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    AmiMessage { headers }
}

/// Serialize an action frame. Caller-supplied params come after the
/// Action and ActionID headers.
pub fn serialize_action(action: &str, action_id: &str, params: &[(&str, &str)]) -> String {
    let mut out = format!("Action: {action}\r\nActionID: {action_id}\r\n");
    for (k, v) in params {
        out.push_str(k);
        out.push_str(": ");
        out.push_str(v);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out
}

pub struct AmiClient {
    host: String,
    port: u16,
    user: String,
    password: String,
    writer: Mutex<Option<OwnedWriteHalf>>,
    pending: Arc<DashMap<String, oneshot::Sender<AmiMessage>>>,
    events: broadcast::Sender<AmiMessage>,
    connected: Arc<AtomicBool>,
}

impl AmiClient {
    pub fn new(config: &AsteriskConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            host: config.ami_host.clone(),
            port: config.ami_port,
            user: config.ami_user.clone(),
            password: config.ami_password.clone(),
            writer: Mutex::new(None),
            pending: Arc::new(DashMap::new()),
            events,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribe to the unsolicited event stream.
    pub fn events(&self) -> broadcast::Receiver<AmiMessage> {
        self.events.subscribe()
    }

    /// Connect, authenticate, and subscribe to the call event set.
    pub async fn connect(&self) -> Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let (read_half, write_half) = stream.into_split();

        let mut reader = BufReader::new(read_half);
        let mut banner = String::new();
        reader.read_line(&mut banner).await?;
        if !banner.contains("Asterisk Call Manager") {
            return Err(ChannelError::Validation(format!(
                "unexpected AMI banner: {}",
                banner.trim()
            )));
        }
        debug!(banner = %banner.trim(), "AMI banner received");

        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);
        self.spawn_reader(reader);

        let login = self
            .send_action("Login", &[("Username", &self.user), ("Secret", &self.password)])
            .await?;
        if !login.is_success() {
            self.mark_disconnected().await;
            return Err(ChannelError::Validation(format!(
                "AMI login refused: {}",
                login.get("Message").unwrap_or("no message")
            )));
        }

        self.send_action("Events", &[("EventMask", "call,dtmf,cdr")])
            .await?;
        info!(host = %self.host, port = self.port, "AMI connected");
        Ok(())
    }

    /// Send an action and wait for its correlated response.
    pub async fn send_action(&self, action: &str, params: &[(&str, &str)]) -> Result<AmiMessage> {
        let action_id = uuid::Uuid::new_v4().to_string();
        let frame = serialize_action(action, &action_id, params);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(action_id.clone(), tx);

        {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                self.pending.remove(&action_id);
                return Err(ChannelError::Disconnected {
                    adapter: "asterisk-ami".to_string(),
                });
            };
            if let Err(e) = writer.write_all(frame.as_bytes()).await {
                self.pending.remove(&action_id);
                drop(guard);
                self.mark_disconnected().await;
                return Err(e.into());
            }
        }

        match tokio::time::timeout(Duration::from_secs(ACTION_TIMEOUT_SECS), rx).await {
            Ok(Ok(msg)) => Ok(msg),
            // Sender dropped: the reader died, connection is gone.
            Ok(Err(_)) => Err(ChannelError::Disconnected {
                adapter: "asterisk-ami".to_string(),
            }),
            Err(_) => {
                self.pending.remove(&action_id);
                Err(ChannelError::Transient {
                    status: None,
                    message: format!("AMI action {action} timed out"),
                    retry_after: None,
                })
            }
        }
    }

    fn spawn_reader(&self, mut reader: BufReader<OwnedReadHalf>) {
        let pending = self.pending.clone();
        let events = self.events.clone();
        let connected = self.connected.clone();

        tokio::spawn(async move {
            let mut block: Vec<String> = Vec::new();
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "AMI read error");
                        break;
                    }
                }
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed.is_empty() {
                    if block.is_empty() {
                        continue;
                    }
                    let msg = parse_block(&block);
                    block.clear();
                    route(&pending, &events, msg);
                } else {
                    block.push(trimmed.to_string());
                }
            }
            connected.store(false, Ordering::SeqCst);
            // Dropping the pending senders fails every in-flight send.
            pending.clear();
            warn!("AMI connection closed");
        });
    }

    async fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.writer.lock().await = None;
        self.pending.clear();
    }

    /// Supervisor loop: keep the connection alive with backoff until
    /// shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut delay = BACKOFF_BASE_SECS;
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            if !self.is_connected() {
                match self.connect().await {
                    Ok(()) => delay = BACKOFF_BASE_SECS,
                    Err(e) => {
                        error!(error = %e, retry_in_secs = delay, "AMI connect failed");
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        }
                        delay = (delay * 2).min(BACKOFF_MAX_SECS);
                        continue;
                    }
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
    }
}

fn route(
    pending: &DashMap<String, oneshot::Sender<AmiMessage>>,
    events: &broadcast::Sender<AmiMessage>,
    msg: AmiMessage,
) {
    if let Some(action_id) = msg.get("ActionID") {
        if let Some((_, tx)) = pending.remove(action_id) {
            let _ = tx.send(msg);
            return;
        }
    }
    // No receiver is fine; events are best-effort fan-out.
    let _ = events.send(msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_parsing_trims_and_maps() {
        let lines = vec![
            "Response: Success".to_string(),
            "ActionID: 42".to_string(),
            "Message:  Authentication accepted ".to_string(),
        ];
        let msg = parse_block(&lines);
        assert!(msg.is_success());
        assert_eq!(msg.get("ActionID"), Some("42"));
        assert_eq!(msg.get("Message"), Some("Authentication accepted"));
    }

    #[test]
    fn action_serialization_is_crlf_terminated() {
        let frame = serialize_action("Originate", "id-1", &[("Channel", "SIP/100")]);
        assert_eq!(
            frame,
            "Action: Originate\r\nActionID: id-1\r\nChannel: SIP/100\r\n\r\n"
        );
    }

    #[test]
    fn responses_route_by_action_id() {
        let pending: DashMap<String, oneshot::Sender<AmiMessage>> = DashMap::new();
        let (events, mut events_rx) = broadcast::channel(4);

        let (tx, mut rx) = oneshot::channel();
        pending.insert("a1".to_string(), tx);

        let mut response = AmiMessage::default();
        response.headers.insert("ActionID".to_string(), "a1".to_string());
        response.headers.insert("Response".to_string(), "Success".to_string());
        route(&pending, &events, response);
        assert!(rx.try_recv().unwrap().is_success());
        assert!(pending.is_empty());

        let mut event = AmiMessage::default();
        event.headers.insert("Event".to_string(), "Hangup".to_string());
        route(&pending, &events, event);
        assert!(events_rx.try_recv().unwrap().is_event("Hangup"));
    }

    #[tokio::test]
    async fn send_while_disconnected_is_retryable() {
        let client = AmiClient::new(&AsteriskConfig {
            ami_host: "127.0.0.1".to_string(),
            ami_port: 5038,
            ami_user: "admin".to_string(),
            ami_password: "secret".to_string(),
            context: "default".to_string(),
            webhook_secret: None,
        });
        let err = client.send_action("Ping", &[]).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, ChannelError::Disconnected { .. }));
    }
}
