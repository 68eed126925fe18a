//! FreeSWITCH Event Socket Layer (ESL) client.
//!
//! Frames are `Key: Value` header blocks terminated by a blank line,
//! with an optional body sized by `Content-Length`. ESL has no action
//! id, so command replies correlate FIFO: the reader resolves the
//! oldest pending sender on each `command/reply` / `api/response`
//! frame. A single reader task owns the read half; the writer mutex
//! serializes commands.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use omnihub_core::config::FreeswitchConfig;
use omnihub_channels::error::{ChannelError, Result};

const COMMAND_TIMEOUT_SECS: u64 = 10;
const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_MAX_SECS: u64 = 300;

/// One parsed ESL frame.
#[derive(Debug, Clone, Default)]
pub struct EslFrame {
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl EslFrame {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.get("Content-Type").unwrap_or_default()
    }

    pub fn reply_ok(&self) -> bool {
        self.get("Reply-Text")
            .map(|r| r.starts_with("+OK"))
            .or_else(|| self.body.as_deref().map(|b| b.starts_with("+OK")))
            .unwrap_or(false)
    }
}

/// Parse header lines (no body) into a frame skeleton.
pub fn parse_headers(lines: &[String]) -> EslFrame {
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    EslFrame {
        headers,
        body: None,
    }
}

pub struct EslClient {
    host: String,
    port: u16,
    password: String,
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// FIFO of waiters for command replies.
    pending: Arc<Mutex<VecDeque<oneshot::Sender<EslFrame>>>>,
    events: broadcast::Sender<EslFrame>,
    connected: Arc<AtomicBool>,
}

impl EslClient {
    pub fn new(config: &FreeswitchConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            host: config.esl_host.clone(),
            port: config.esl_port,
            password: config.esl_password.clone(),
            writer: Mutex::new(None),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            events,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> broadcast::Receiver<EslFrame> {
        self.events.subscribe()
    }

    /// Connect, authenticate, and subscribe to the channel event set.
    pub async fn connect(&self) -> Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // The server opens with an auth/request frame.
        let greeting = read_frame(&mut reader).await?;
        if greeting.content_type() != "auth/request" {
            return Err(ChannelError::Validation(format!(
                "unexpected ESL greeting: {}",
                greeting.content_type()
            )));
        }

        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);
        self.spawn_reader(reader);

        let reply = self.send_command(&format!("auth {}", self.password)).await?;
        if !reply.reply_ok() {
            self.mark_disconnected().await;
            return Err(ChannelError::Validation(
                "ESL authentication refused".to_string(),
            ));
        }

        let reply = self
            .send_command("event plain CHANNEL_ANSWER CHANNEL_HANGUP DTMF RECORD_STOP")
            .await?;
        if !reply.reply_ok() {
            warn!("ESL event subscription refused");
        }
        info!(host = %self.host, port = self.port, "ESL connected");
        Ok(())
    }

    /// Send one command and wait for its FIFO-correlated reply.
    pub async fn send_command(&self, command: &str) -> Result<EslFrame> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.push_back(tx);

        {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                self.pending.lock().await.pop_back();
                return Err(ChannelError::Disconnected {
                    adapter: "freeswitch-esl".to_string(),
                });
            };
            let frame = format!("{command}\n\n");
            if let Err(e) = writer.write_all(frame.as_bytes()).await {
                self.pending.lock().await.pop_back();
                drop(guard);
                self.mark_disconnected().await;
                return Err(e.into());
            }
        }

        match tokio::time::timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(ChannelError::Disconnected {
                adapter: "freeswitch-esl".to_string(),
            }),
            Err(_) => Err(ChannelError::Transient {
                status: None,
                message: format!("ESL command timed out: {command}"),
                retry_after: None,
            }),
        }
    }

    /// `api <cmd>` with the response body returned.
    pub async fn api(&self, command: &str) -> Result<String> {
        let reply = self.send_command(&format!("api {command}")).await?;
        Ok(reply.body.unwrap_or_default())
    }

    fn spawn_reader(&self, mut reader: BufReader<OwnedReadHalf>) {
        let pending = self.pending.clone();
        let events = self.events.clone();
        let connected = self.connected.clone();

        tokio::spawn(async move {
            loop {
                let frame = match read_frame(&mut reader).await {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(error = %e, "ESL read failed");
                        break;
                    }
                };
                match frame.content_type() {
                    "command/reply" | "api/response" => {
                        let waiter = pending.lock().await.pop_front();
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(frame);
                            }
                            None => debug!("ESL reply with no waiter"),
                        }
                    }
                    "text/disconnect-notice" => break,
                    _ => {
                        let _ = events.send(frame);
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            pending.lock().await.clear();
            warn!("ESL connection closed");
        });
    }

    async fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.writer.lock().await = None;
        self.pending.lock().await.clear();
    }

    /// Supervisor loop mirroring the AMI client's reconnect policy.
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
                        error!(error = %e, retry_in_secs = delay, "ESL connect failed");
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

/// Read one frame: headers to a blank line, then `Content-Length` body
/// bytes if declared.
async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Result<EslFrame> {
    let mut lines: Vec<String> = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ChannelError::Disconnected {
                adapter: "freeswitch-esl".to_string(),
            });
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if lines.is_empty() {
                continue;
            }
            break;
        }
        lines.push(trimmed.to_string());
    }

    let mut frame = parse_headers(&lines);
    if let Some(len) = frame.get("Content-Length").and_then(|v| v.parse::<usize>().ok()) {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        frame.body = Some(String::from_utf8_lossy(&body).into_owned());
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_parsing() {
        let frame = parse_headers(&[
            "Content-Type: command/reply".to_string(),
            "Reply-Text: +OK accepted".to_string(),
        ]);
        assert_eq!(frame.content_type(), "command/reply");
        assert!(frame.reply_ok());
    }

    #[test]
    fn reply_ok_checks_body_for_api_responses() {
        let mut frame = parse_headers(&["Content-Type: api/response".to_string()]);
        frame.body = Some("+OK 3f2a".to_string());
        assert!(frame.reply_ok());

        frame.body = Some("-ERR no such channel".to_string());
        assert!(!frame.reply_ok());
    }

    #[tokio::test]
    async fn send_while_disconnected_is_retryable() {
        let client = EslClient::new(&FreeswitchConfig {
            esl_host: "127.0.0.1".to_string(),
            esl_port: 8021,
            esl_password: "ClueCon".to_string(),
            gateway: None,
            recordings_url: None,
            webhook_secret: None,
        });
        let err = client.send_command("status").await.unwrap_err();
        assert!(matches!(err, ChannelError::Disconnected { .. }));
    }
}
