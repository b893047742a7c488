use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Result;
use hyper::body::to_bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::scenario::{ScenarioAction, ScenarioTrigger};
use crate::state::MockGatewayState;

/// Mock of the gateway REST endpoints, the transactions service, the
/// messaging provider and a notification webhook.
pub struct MockRestApi {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockRestApi {
    pub async fn spawn(state: MockGatewayState) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let std_listener = listener.into_std()?;
        std_listener.set_nonblocking(true)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let make_svc = make_service_fn(move |_| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(route(req, state).await) }
                }))
            }
        });
        let server = Server::from_tcp(std_listener)?.serve(make_svc);
        let handle = tokio::spawn(async move {
            if let Err(err) = server
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %err, "mock REST server exited with error");
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
        format!("http://{}", self.addr)
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for MockRestApi {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn route(req: Request<Body>, state: MockGatewayState) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();
    state.record_request(&path).await;
    let body = match to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {err}"),
            )
        }
    };

    match (parts.method.clone(), path.as_str()) {
        (Method::GET, "/trades") => handle_trades(&parts, state).await,
        (Method::GET, "/api/userTransactionsById") => handle_transactions(&parts, state).await,
        (Method::POST, "/v1/sendnotification") => handle_send_message(&parts, &body, state).await,
        (Method::POST, "/webhook") => handle_webhook(&body, state).await,
        _ => error_response(StatusCode::NOT_FOUND, "endpoint not found"),
    }
}

/// Applies the next scripted action for `trigger`. Returns a response when the
/// scenario short-circuits the request.
async fn apply_scenario(
    state: &MockGatewayState,
    trigger: ScenarioTrigger,
) -> Option<Response<Body>> {
    match state.scenarios().take_for(trigger).await? {
        ScenarioAction::Delay(duration) => {
            sleep(duration).await;
            None
        }
        ScenarioAction::Fail { status, reason } => Some(error_response(status, reason)),
        ScenarioAction::RespondWith(body) => Some(json_response(StatusCode::OK, body)),
        ScenarioAction::RejectSubscription { .. } => None,
    }
}

async fn authorize(
    parts: &http::request::Parts,
    state: &MockGatewayState,
) -> Result<(), Response<Body>> {
    let expected = format!("Bearer {}", state.access_token().await);
    let provided = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "missing or invalid bearer token",
        ))
    }
}

async fn handle_trades(parts: &http::request::Parts, state: MockGatewayState) -> Response<Body> {
    if let Err(resp) = authorize(parts, &state).await {
        return resp;
    }
    if let Some(resp) = apply_scenario(&state, ScenarioTrigger::TradesRequest).await {
        return resp;
    }
    if query_param(parts, "type").as_deref() != Some("all") {
        return error_response(StatusCode::BAD_REQUEST, "expected type=all");
    }
    json_response(StatusCode::OK, state.trades_body().await)
}

async fn handle_transactions(
    parts: &http::request::Parts,
    state: MockGatewayState,
) -> Response<Body> {
    if let Some(resp) = apply_scenario(&state, ScenarioTrigger::TransactionsRequest).await {
        return resp;
    }
    let Some(user_id) = query_param(parts, "user_id") else {
        return error_response(StatusCode::BAD_REQUEST, "user_id is required");
    };
    json_response(StatusCode::OK, state.transactions_body(&user_id).await)
}

async fn handle_send_message(
    parts: &http::request::Parts,
    body: &[u8],
    state: MockGatewayState,
) -> Response<Body> {
    let expected = state.messaging_api_key().await;
    let provided = parts
        .headers
        .get("API-KEY")
        .and_then(|value| value.to_str().ok());
    if provided != Some(expected.as_str()) {
        return error_response(StatusCode::UNAUTHORIZED, "invalid API-KEY");
    }
    if let Some(resp) = apply_scenario(&state, ScenarioTrigger::SendMessage).await {
        return resp;
    }
    let payload: Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid JSON payload: {err}"))
        }
    };
    state.record_message(payload).await;
    json_response(StatusCode::OK, json!({ "status": "queued" }))
}

async fn handle_webhook(body: &[u8], state: MockGatewayState) -> Response<Body> {
    if let Some(resp) = apply_scenario(&state, ScenarioTrigger::Notification).await {
        return resp;
    }
    let payload: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    state.record_notification(payload).await;
    json_response(StatusCode::OK, json!({ "ok": true }))
}

fn query_param(parts: &http::request::Parts, key: &str) -> Option<String> {
    parts.uri.query()?.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == key).then(|| value.to_string())
    })
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response<Body> {
    json_response(status, json!({ "status": "error", "message": msg.into() }))
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
