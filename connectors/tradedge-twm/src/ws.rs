//! Broadcast-channel adapter speaking the Pusher channels protocol.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use tradedge_core::{ChannelEvent, ChannelUpdate, ConnectionState};
use tradedge_gateway::{GatewayError, GatewayErrorKind, GatewayResult, LiveChannel};

const PROTOCOL_VERSION: u8 = 7;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Capped exponential backoff with a bounded number of consecutive attempts.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PusherSettings {
    /// Cluster host, e.g. `wss://ws-ap2.pusher.com`.
    pub ws_url: String,
    pub app_key: String,
    pub channel: String,
    pub heartbeat: Duration,
    /// Upper bound for the TCP/TLS handshake plus channel subscription.
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub event_buffer: usize,
}

impl PusherSettings {
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}/app/{}?protocol={PROTOCOL_VERSION}&client=tradedge-rs&version={}",
            self.ws_url.trim_end_matches('/'),
            self.app_key,
            env!("CARGO_PKG_VERSION")
        )
    }
}

enum WsCommand {
    Shutdown,
}

/// Persistent subscription to one named channel.
///
/// The connection loop runs on its own task; state transitions and events are
/// buffered into a bounded queue read through [`LiveChannel::next_update`].
pub struct PusherChannel {
    settings: PusherSettings,
    command_tx: Option<mpsc::UnboundedSender<WsCommand>>,
    update_rx: mpsc::Receiver<ChannelUpdate>,
    task: Option<JoinHandle<()>>,
}

impl PusherChannel {
    /// Start connecting in the background. Must be called within a tokio runtime.
    pub fn spawn(settings: PusherSettings) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::channel(settings.event_buffer.max(1));
        let task = tokio::spawn(run_supervisor(settings.clone(), command_rx, update_tx));
        Self {
            settings,
            command_tx: Some(command_tx),
            update_rx,
            task: Some(task),
        }
    }

    fn signal_shutdown(&mut self) -> bool {
        match self.command_tx.take() {
            Some(tx) => {
                let _ = tx.send(WsCommand::Shutdown);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl LiveChannel for PusherChannel {
    fn name(&self) -> &str {
        &self.settings.channel
    }

    async fn next_update(&mut self) -> Option<ChannelUpdate> {
        self.update_rx.recv().await
    }

    async fn reconnect(&mut self) -> GatewayResult<()> {
        if self.settings.app_key.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "broadcast channel app key is not configured".into(),
            ));
        }
        self.signal_shutdown();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!(channel = %self.settings.channel, "restarting broadcast channel");
        *self = Self::spawn(self.settings.clone());
        Ok(())
    }

    async fn disconnect(&mut self) {
        if !self.signal_shutdown() {
            return;
        }
        if let Some(mut task) = self.task.take() {
            if timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!(channel = %self.settings.channel, "broadcast channel did not close in time");
                task.abort();
            }
        }
        debug!(channel = %self.settings.channel, "broadcast channel disconnected");
    }
}

impl Drop for PusherChannel {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    Shutdown,
    ReceiverGone,
    Dropped(String),
    Fatal(GatewayError),
}

async fn run_supervisor(
    settings: PusherSettings,
    mut commands: mpsc::UnboundedReceiver<WsCommand>,
    updates: mpsc::Sender<ChannelUpdate>,
) {
    let mut failures = 0u32;
    loop {
        if !emit(&updates, ConnectionState::Connecting).await {
            return;
        }
        let connected = tokio::select! {
            result = connect_and_subscribe(&settings) => result,
            _ = commands.recv() => {
                let _ = emit(&updates, ConnectionState::Disconnected).await;
                return;
            }
        };
        match connected {
            Ok(socket) => {
                failures = 0;
                info!(channel = %settings.channel, "subscribed to broadcast channel");
                if !emit(&updates, ConnectionState::Connected).await {
                    return;
                }
                match run_session(socket, &settings, &mut commands, &updates).await {
                    SessionEnd::Shutdown => {
                        let _ = emit(&updates, ConnectionState::Disconnected).await;
                        return;
                    }
                    SessionEnd::ReceiverGone => return,
                    SessionEnd::Dropped(reason) => {
                        warn!(channel = %settings.channel, reason = %reason, "broadcast channel dropped");
                    }
                    SessionEnd::Fatal(err) => {
                        error!(channel = %settings.channel, error = %err, "broadcast channel rejected the connection");
                        let _ = emit(&updates, ConnectionState::Error).await;
                        return;
                    }
                }
            }
            Err(err) if !err.is_retryable() => {
                error!(channel = %settings.channel, error = %err, "broadcast channel rejected the connection");
                let _ = emit(&updates, ConnectionState::Error).await;
                return;
            }
            Err(err) => {
                warn!(channel = %settings.channel, error = %err, "broadcast channel connection failed");
            }
        }
        if !emit(&updates, ConnectionState::Disconnected).await {
            return;
        }
        failures += 1;
        if failures > settings.reconnect.max_attempts {
            error!(
                channel = %settings.channel,
                attempts = failures,
                "giving up on broadcast channel until a manual reconnect"
            );
            let _ = emit(&updates, ConnectionState::Error).await;
            return;
        }
        let delay = settings.reconnect.delay_for(failures);
        debug!(attempt = failures, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = sleep(delay) => {}
            _ = commands.recv() => return,
        }
    }
}

async fn emit(updates: &mpsc::Sender<ChannelUpdate>, state: ConnectionState) -> bool {
    updates.send(ChannelUpdate::State(state)).await.is_ok()
}

async fn connect_and_subscribe(settings: &PusherSettings) -> GatewayResult<WsStream> {
    let endpoint = settings.endpoint();
    let (mut socket, _) = timeout(settings.handshake_timeout, connect_async(&endpoint))
        .await
        .map_err(|_| GatewayError::Network(format!("timed out connecting to {}", settings.ws_url)))?
        .map_err(|err| GatewayError::from_display(err, GatewayErrorKind::Network))?;
    timeout(
        settings.handshake_timeout,
        await_subscription(&mut socket, &settings.channel),
    )
    .await
    .map_err(|_| GatewayError::Network("timed out waiting for subscription".into()))??;
    Ok(socket)
}

async fn await_subscription(socket: &mut WsStream, channel: &str) -> GatewayResult<()> {
    while let Some(message) = socket.next().await {
        let message = message.map_err(|err| GatewayError::from_display(err, GatewayErrorKind::Network))?;
        let Some(frame) = PusherFrame::from_message(&message) else {
            continue;
        };
        match frame.event.as_str() {
            "pusher:connection_established" => {
                debug!("pusher connection established");
                send_json(
                    socket,
                    json!({"event": "pusher:subscribe", "data": {"channel": channel}}),
                )
                .await?;
            }
            "pusher_internal:subscription_succeeded" if frame.channel.as_deref() == Some(channel) => {
                return Ok(());
            }
            "pusher:ping" => send_json(socket, json!({"event": "pusher:pong", "data": {}})).await?,
            "pusher:error" => return Err(frame.error()),
            other => debug!(event = other, "ignoring frame received before subscription"),
        }
    }
    Err(GatewayError::Network(
        "connection closed during handshake".into(),
    ))
}

async fn run_session(
    mut socket: WsStream,
    settings: &PusherSettings,
    commands: &mut mpsc::UnboundedReceiver<WsCommand>,
    updates: &mpsc::Sender<ChannelUpdate>,
) -> SessionEnd {
    let mut heartbeat = interval(settings.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(WsCommand::Shutdown) | None => {
                        let unsubscribe = json!({
                            "event": "pusher:unsubscribe",
                            "data": {"channel": settings.channel},
                        });
                        let _ = send_json(&mut socket, unsubscribe).await;
                        let _ = socket.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                }
            }
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = socket.send(Message::Pong(payload)).await {
                            return SessionEnd::Dropped(err.to_string());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Dropped(format!("closed by server: {frame:?}"));
                    }
                    Some(Ok(message)) => {
                        if let Some(end) = handle_message(&mut socket, &message, settings, updates).await {
                            return end;
                        }
                    }
                    Some(Err(err)) => return SessionEnd::Dropped(err.to_string()),
                    None => return SessionEnd::Dropped("stream ended".into()),
                }
            }
            _ = heartbeat.tick() => {
                if let Err(err) = send_json(&mut socket, json!({"event": "pusher:ping", "data": {}})).await {
                    return SessionEnd::Dropped(err.to_string());
                }
            }
        }
    }
}

async fn handle_message(
    socket: &mut WsStream,
    message: &Message,
    settings: &PusherSettings,
    updates: &mpsc::Sender<ChannelUpdate>,
) -> Option<SessionEnd> {
    let frame = PusherFrame::from_message(message)?;
    match frame.event.as_str() {
        "pusher:ping" => {
            if let Err(err) = send_json(socket, json!({"event": "pusher:pong", "data": {}})).await {
                return Some(SessionEnd::Dropped(err.to_string()));
            }
        }
        "pusher:error" => {
            let err = frame.error();
            warn!(error = %err, "pusher reported an error");
            if !err.is_retryable() {
                return Some(SessionEnd::Fatal(err));
            }
        }
        event if event.starts_with("pusher:") || event.starts_with("pusher_internal:") => {
            debug!(event, "pusher control frame");
        }
        _ => {
            if frame
                .channel
                .as_deref()
                .is_some_and(|channel| channel != settings.channel)
            {
                debug!(event = %frame.event, channel = ?frame.channel, "event for another channel");
                return None;
            }
            let event = ChannelEvent::from_wire(&frame.event, decode_data(frame.data));
            if updates.send(ChannelUpdate::Event(event)).await.is_err() {
                return Some(SessionEnd::ReceiverGone);
            }
        }
    }
    None
}

async fn send_json(socket: &mut WsStream, payload: Value) -> GatewayResult<()> {
    socket
        .send(Message::Text(payload.to_string()))
        .await
        .map_err(|err| GatewayError::from_display(err, GatewayErrorKind::Network))
}

#[derive(Debug, Deserialize)]
struct PusherFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

impl PusherFrame {
    fn from_message(message: &Message) -> Option<Self> {
        let text = match message {
            Message::Text(text) => text.as_str(),
            Message::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("received non UTF-8 binary payload from pusher");
                    return None;
                }
            },
            _ => return None,
        };
        match serde_json::from_str(text) {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!(error = %err, payload = text, "failed to parse pusher frame");
                None
            }
        }
    }

    /// Codes 4000-4099 tell the client not to reconnect.
    fn error(&self) -> GatewayError {
        let data = decode_data(self.data.clone());
        let code = data.get("code").and_then(Value::as_u64).unwrap_or(0);
        let message = data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown pusher error");
        if (4000..4100).contains(&code) {
            GatewayError::Authentication(format!("{message} (code {code})"))
        } else {
            GatewayError::Network(format!("{message} (code {code})"))
        }
    }
}

/// Pusher delivers event `data` as a JSON-encoded string; undo that when possible.
#[must_use]
pub fn decode_data(data: Value) -> Value {
    match data {
        Value::String(text) => {
            serde_json::from_str::<Value>(&text).unwrap_or_else(|_| Value::String(text))
        }
        other => other,
    }
}
