use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use crate::scenario::{ScenarioAction, ScenarioTrigger};
use crate::state::MockGatewayState;

/// Minimal Pusher-compatible broadcast server.
pub struct MockChannelServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockChannelServer {
    pub async fn spawn(state: MockGatewayState) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _peer)) => {
                                let state = state.clone();
                                tokio::spawn(async move {
                                    if let Err(err) = handle_socket(state, stream).await {
                                        warn!(error = %err, "channel connection ended with error");
                                    }
                                });
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "failed to accept channel connection");
                                break;
                            }
                        }
                    }
                }
            }
        });
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for MockChannelServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn handle_socket(state: MockGatewayState, stream: TcpStream) -> Result<()> {
    let captured_path = Arc::new(StdMutex::new(String::new()));
    let path_clone = captured_path.clone();
    let ws_stream = accept_hdr_async(stream, move |req: &Request, resp: Response| {
        if let Ok(mut path) = path_clone.lock() {
            *path = req.uri().path().to_string();
        }
        Ok(resp)
    })
    .await?;
    let path = captured_path
        .lock()
        .map(|guard| guard.clone())
        .unwrap_or_default();

    let (mut sink, mut source) = ws_stream.split();
    let expected = format!("/app/{}", state.app_key().await);
    if path != expected {
        let frame = error_frame(4001, &format!("App key {path} not in this cluster"));
        sink.send(Message::Text(frame)).await?;
        let _ = sink.send(Message::Close(None)).await;
        return Ok(());
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });
    let established = json!({
        "event": "pusher:connection_established",
        "data": json!({"socket_id": "1234.5678", "activity_timeout": 120}).to_string(),
    });
    let _ = tx.send(Message::Text(established.to_string()));

    let mut subscription = None;
    while let Some(msg) = source.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, "mock channel connection failed");
                break;
            }
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8(bytes).unwrap_or_default(),
            Message::Ping(payload) => {
                let _ = tx.send(Message::Pong(payload));
                continue;
            }
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            warn!(payload = %text, "mock channel received invalid frame");
            continue;
        };
        match frame.get("event").and_then(Value::as_str) {
            Some("pusher:ping") => {
                let pong = json!({"event": "pusher:pong", "data": "{}"});
                let _ = tx.send(Message::Text(pong.to_string()));
            }
            Some("pusher:subscribe") => {
                let channel = frame
                    .pointer("/data/channel")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(ScenarioAction::RejectSubscription { code, message }) = state
                    .scenarios()
                    .take_for(ScenarioTrigger::ChannelConnect)
                    .await
                {
                    let _ = tx.send(Message::Text(error_frame(code, &message)));
                    let _ = tx.send(Message::Close(None));
                    break;
                }
                if channel == state.channel().await && subscription.is_none() {
                    subscription = Some(state.add_subscriber(tx.clone()).await);
                    let ack = json!({
                        "event": "pusher_internal:subscription_succeeded",
                        "channel": channel,
                        "data": "{}",
                    });
                    let _ = tx.send(Message::Text(ack.to_string()));
                }
            }
            Some("pusher:unsubscribe") => {
                if let Some(id) = subscription.take() {
                    state.remove_subscriber(id).await;
                }
            }
            _ => {}
        }
    }
    if let Some(id) = subscription {
        state.remove_subscriber(id).await;
    }
    drop(tx);
    let _ = writer.await;
    Ok(())
}

fn error_frame(code: u16, message: &str) -> String {
    json!({
        "event": "pusher:error",
        "data": {"code": code, "message": message},
    })
    .to_string()
}
