//! HTTP routes.
//!
//! Every route resolves to at most one coordinator operation. Responses use
//! the [`Envelope`] shape; errors carry the runtime's taxonomy tag as their
//! `code` and pick an HTTP status from it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tg_protocol::methods;
use tg_runtime::{Coordinator, Event, SessionState};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::envelope::Envelope;
use crate::error::{GatewayError, Result};
use crate::host::SessionHost;
use crate::webhook::{Webhook, WebhookSettings, WebhookStatus};

pub const API_KEY_HEADER: &str = "x-api-key";

const DEFAULT_UPDATE_LIMIT: usize = 100;
const MAX_UPDATE_WAIT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct GatewayState {
	pub host: Arc<SessionHost>,
	pub webhook: Arc<Webhook>,
	pub api_key: Option<Arc<str>>,
}

impl GatewayState {
	pub fn new(host: Arc<SessionHost>, webhook: Arc<Webhook>, api_key: Option<String>) -> Self {
		Self {
			host,
			webhook,
			api_key: api_key.filter(|key| !key.is_empty()).map(Arc::from),
		}
	}
}

pub fn router(state: GatewayState) -> Router {
	let protected = Router::new()
		.route("/auth/status", get(auth_status))
		.route("/auth/phone", post(auth_phone))
		.route("/auth/code", post(auth_code))
		.route("/auth/password", post(auth_password))
		.route("/auth/resend", post(auth_resend))
		.route("/auth/logout", post(auth_logout))
		.route("/session/restart", post(session_restart))
		.route("/updates", get(updates))
		.route("/api/{method}", post(call_method))
		.route("/me", get(me))
		.route("/chats", get(chats))
		.route("/messages", post(send_message))
		.route("/webhooks/config", post(webhook_config))
		.route("/webhooks/status", get(webhook_status))
		.route("/webhooks/test", post(webhook_test))
		.route("/webhooks/disable", post(webhook_disable))
		.route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

	Router::new()
		.route("/health", get(health))
		.merge(protected)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

pub async fn serve(state: GatewayState, host: &str, port: u16) -> anyhow::Result<()> {
	let addr: SocketAddr = format!("{host}:{port}")
		.parse()
		.with_context(|| format!("Invalid host/port combination: {host}:{port}"))?;

	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind gateway to {addr}"))?;

	tracing::info!(target = "tg.gateway", %addr, "gateway listening");

	let session = state.host.clone();
	let forwarder = tokio::spawn(state.webhook.clone().run(session.subscribe()));

	let served = axum::serve(listener, router(state).into_make_service())
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
			tracing::info!(target = "tg.gateway", "shutdown requested");
		})
		.await
		.context("Gateway server error");

	forwarder.abort();
	session.shutdown().await;
	served
}

async fn require_api_key(
	State(state): State<GatewayState>,
	headers: HeaderMap,
	request: Request,
	next: Next,
) -> Response {
	if let Some(expected) = &state.api_key {
		let supplied = headers.get(API_KEY_HEADER).and_then(|value| value.to_str().ok());
		if supplied != Some(expected.as_ref()) {
			return GatewayError::Unauthorized.into_response();
		}
	}
	next.run(request).await
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
	Json(Envelope::success(data))
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
	payload
		.map(|Json(value)| value)
		.map_err(|rejection| GatewayError::BadRequest(rejection.body_text()))
}

fn required(field: &str, value: &str) -> Result<()> {
	if value.trim().is_empty() {
		return Err(GatewayError::BadRequest(format!("`{field}` must not be empty")));
	}
	Ok(())
}

#[derive(Debug, Serialize)]
struct StateView {
	state: SessionState,
	ready: bool,
}

impl StateView {
	fn of(state: SessionState) -> Self {
		Self {
			state,
			ready: state == SessionState::Ready,
		}
	}
}

async fn health(State(state): State<GatewayState>) -> Response {
	let health = state.host.coordinator().await.health();
	let status = if health.connected {
		StatusCode::OK
	} else {
		StatusCode::SERVICE_UNAVAILABLE
	};
	let label = if health.is_degraded() { "degraded" } else { "ok" };
	(status, ok(json!({ "status": label, "session": health }))).into_response()
}

async fn auth_status(State(state): State<GatewayState>) -> Json<Envelope<Value>> {
	let coordinator = state.host.coordinator().await;
	let credentials = coordinator.credentials();
	ok(json!({
		"state": coordinator.current_state(),
		"ready": coordinator.is_ready(),
		"phone_number": credentials.phone_number,
	}))
}

#[derive(Debug, Deserialize)]
struct PhoneRequest {
	phone_number: String,
}

async fn auth_phone(
	State(state): State<GatewayState>,
	payload: std::result::Result<Json<PhoneRequest>, JsonRejection>,
) -> Result<Json<Envelope<StateView>>> {
	let request = body(payload)?;
	required("phone_number", &request.phone_number)?;
	let coordinator = state.host.coordinator().await;
	let next = coordinator.supply_phone_number(request.phone_number.trim()).await?;
	Ok(ok(StateView::of(next)))
}

#[derive(Debug, Deserialize)]
struct CodeRequest {
	code: String,
}

async fn auth_code(
	State(state): State<GatewayState>,
	payload: std::result::Result<Json<CodeRequest>, JsonRejection>,
) -> Result<Json<Envelope<StateView>>> {
	let request = body(payload)?;
	required("code", &request.code)?;
	let coordinator = state.host.coordinator().await;
	let next = coordinator.supply_code(request.code.trim()).await?;
	Ok(ok(StateView::of(next)))
}

#[derive(Debug, Deserialize)]
struct PasswordRequest {
	password: String,
}

async fn auth_password(
	State(state): State<GatewayState>,
	payload: std::result::Result<Json<PasswordRequest>, JsonRejection>,
) -> Result<Json<Envelope<StateView>>> {
	let request = body(payload)?;
	required("password", &request.password)?;
	let coordinator = state.host.coordinator().await;
	let next = coordinator.supply_password(&request.password).await?;
	Ok(ok(StateView::of(next)))
}

async fn auth_resend(State(state): State<GatewayState>) -> Result<Json<Envelope<StateView>>> {
	let coordinator = state.host.coordinator().await;
	coordinator.resend_code().await?;
	Ok(ok(StateView::of(coordinator.current_state())))
}

async fn auth_logout(State(state): State<GatewayState>) -> Result<Json<Envelope<StateView>>> {
	let coordinator = state.host.coordinator().await;
	let next = coordinator.logout().await?;
	Ok(ok(StateView::of(next)))
}

async fn session_restart(State(state): State<GatewayState>) -> Result<Json<Envelope<StateView>>> {
	let coordinator = state.host.restart().await?;
	Ok(ok(StateView::of(coordinator.current_state())))
}

#[derive(Debug, Deserialize)]
struct UpdatesQuery {
	limit: Option<usize>,
	wait_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct UpdatesView {
	updates: Vec<Event>,
	remaining: usize,
}

async fn updates(
	State(state): State<GatewayState>,
	Query(query): Query<UpdatesQuery>,
) -> Json<Envelope<UpdatesView>> {
	let coordinator = state.host.coordinator().await;
	let queue = coordinator.updates();
	let limit = query.limit.unwrap_or(DEFAULT_UPDATE_LIMIT).max(1);

	let mut updates = Vec::new();
	if queue.is_empty() {
		if let Some(wait_ms) = query.wait_ms {
			let wait = Duration::from_millis(wait_ms).min(MAX_UPDATE_WAIT);
			if let Ok(Some(event)) = tokio::time::timeout(wait, queue.next()).await {
				updates.push(event);
			}
		}
	}
	updates.extend(queue.drain(limit - updates.len()));

	ok(UpdatesView {
		updates,
		remaining: queue.len(),
	})
}

#[derive(Debug, Deserialize)]
struct CallQuery {
	timeout_ms: Option<u64>,
}

async fn call_method(
	State(state): State<GatewayState>,
	Path(method): Path<String>,
	Query(query): Query<CallQuery>,
	payload: Bytes,
) -> Result<Json<Envelope<Value>>> {
	if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphanumeric()) {
		return Err(GatewayError::BadRequest(format!("invalid method name `{method}`")));
	}
	let params = if payload.iter().all(u8::is_ascii_whitespace) {
		Value::Null
	} else {
		serde_json::from_slice(&payload)
			.map_err(|e| GatewayError::BadRequest(format!("request body is not JSON: {e}")))?
	};
	let timeout = query.timeout_ms.map(Duration::from_millis);

	let coordinator = state.host.coordinator().await;
	let result = coordinator.call(&method, params, timeout).await?;
	Ok(ok(result))
}

async fn me(State(state): State<GatewayState>) -> Result<Json<Envelope<Value>>> {
	let coordinator = state.host.coordinator().await;
	call(&coordinator, methods::GET_ME, json!({})).await
}

#[derive(Debug, Deserialize)]
struct ChatsQuery {
	limit: Option<u32>,
}

async fn chats(
	State(state): State<GatewayState>,
	Query(query): Query<ChatsQuery>,
) -> Result<Json<Envelope<Value>>> {
	let coordinator = state.host.coordinator().await;
	let params = json!({
		"chat_list": {"@type": "chatListMain"},
		"limit": query.limit.unwrap_or(100),
	});
	call(&coordinator, methods::GET_CHATS, params).await
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
	chat_id: i64,
	text: String,
	reply_to_message_id: Option<i64>,
}

async fn send_message(
	State(state): State<GatewayState>,
	payload: std::result::Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<Envelope<Value>>> {
	let request = body(payload)?;
	required("text", &request.text)?;

	let mut params = json!({
		"chat_id": request.chat_id,
		"input_message_content": {
			"@type": "inputMessageText",
			"text": {"@type": "formattedText", "text": request.text},
		},
	});
	if let Some(message_id) = request.reply_to_message_id {
		params["reply_to"] = json!({"@type": "inputMessageReplyToMessage", "message_id": message_id});
	}

	let coordinator = state.host.coordinator().await;
	call(&coordinator, methods::SEND_MESSAGE, params).await
}

async fn call(coordinator: &Coordinator, method: &str, params: Value) -> Result<Json<Envelope<Value>>> {
	let result = coordinator.call(method, params, None).await?;
	Ok(ok(result))
}

#[derive(Debug, Deserialize)]
struct WebhookConfigRequest {
	url: String,
	#[serde(default = "enabled_by_default")]
	enabled: bool,
	#[serde(default)]
	events: Vec<String>,
}

fn enabled_by_default() -> bool {
	true
}

async fn webhook_config(
	State(state): State<GatewayState>,
	payload: std::result::Result<Json<WebhookConfigRequest>, JsonRejection>,
) -> Result<Json<Envelope<WebhookSettings>>> {
	let request = body(payload)?;
	required("url", &request.url)?;
	let settings = state
		.webhook
		.configure(request.url.trim(), request.enabled, request.events)?;
	Ok(ok(settings))
}

async fn webhook_status(State(state): State<GatewayState>) -> Json<Envelope<WebhookStatus>> {
	ok(state.webhook.status())
}

async fn webhook_test(State(state): State<GatewayState>) -> Result<Json<Envelope<Value>>> {
	let status = state.webhook.send_test().await?;
	Ok(ok(json!({ "delivered": true, "status": status })))
}

async fn webhook_disable(State(state): State<GatewayState>) -> Json<Envelope<WebhookSettings>> {
	ok(state.webhook.disable())
}
