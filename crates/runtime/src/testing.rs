//! In-memory client engine for tests.
//!
//! [`FakeClient`] implements the transport contract without a process. It
//! walks the authorization ladder the way the real engine does, answers a
//! handful of ordinary methods, and can be told to stay silent, fail
//! transiently, push events, or drop the connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tg_protocol::{SessionState, methods};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

pub const TEST_USER_ID: i64 = 777_000_001;

/// Behaviour knobs for a [`FakeClient`].
#[derive(Debug, Clone)]
pub struct FakeClientConfig {
	/// Code accepted by `checkAuthenticationCode`.
	pub code: String,
	/// Two-factor password; `None` skips the password step.
	pub password: Option<String>,
	/// Skip the phone/code steps after the encryption key (persisted session).
	pub authorized: bool,
	/// Methods that never get a reply.
	pub silent_methods: HashSet<String>,
	/// Number of `500` failures to return per method before succeeding.
	pub transient_failures: HashMap<String, u32>,
	/// Acknowledge `logOut` without moving state; the test drives the states.
	pub manual_logout: bool,
}

impl Default for FakeClientConfig {
	fn default() -> Self {
		Self {
			code: "12345".to_string(),
			password: None,
			authorized: false,
			silent_methods: HashSet::new(),
			transient_failures: HashMap::new(),
			manual_logout: false,
		}
	}
}

impl FakeClientConfig {
	pub fn with_password(mut self, password: impl Into<String>) -> Self {
		self.password = Some(password.into());
		self
	}

	pub fn authorized(mut self) -> Self {
		self.authorized = true;
		self
	}

	pub fn silent(mut self, method: &str) -> Self {
		self.silent_methods.insert(method.to_string());
		self
	}

	pub fn manual_logout(mut self) -> Self {
		self.manual_logout = true;
		self
	}

	pub fn failing(mut self, method: &str, times: u32) -> Self {
		self.transient_failures.insert(method.to_string(), times);
		self
	}
}

enum Control {
	Frame(Value),
	State(SessionState),
	Disconnect,
}

/// Handle for steering a running fake engine.
#[derive(Clone)]
pub struct FakeClient {
	control_tx: mpsc::UnboundedSender<Control>,
	requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeClient {
	/// Starts the fake engine and returns the transport the coordinator uses.
	pub fn spawn(config: FakeClientConfig) -> (Self, TransportParts) {
		let (request_tx, request_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let (control_tx, control_rx) = mpsc::unbounded_channel();
		let requests = Arc::new(Mutex::new(Vec::new()));

		let engine = FakeEngine {
			config,
			state: SessionState::Uninitialized,
			phone_number: None,
			next_message_id: 1,
			request_rx,
			control_rx,
			message_tx,
			requests: Arc::clone(&requests),
		};
		let task = tokio::spawn(engine.run());

		let parts = TransportParts {
			sender: Box::new(FakeSender {
				request_tx: Some(request_tx),
			}),
			receiver: Box::new(FakeReceiver { task }),
			message_rx,
		};
		(Self { control_tx, requests }, parts)
	}

	/// Sends an arbitrary frame to the coordinator, as if the engine had.
	pub fn push_frame(&self, frame: Value) {
		let _ = self.control_tx.send(Control::Frame(frame));
	}

	/// Moves the engine to `state` and announces it.
	pub fn set_state(&self, state: SessionState) {
		let _ = self.control_tx.send(Control::State(state));
	}

	/// Ends the frame stream, as a crashed engine would.
	pub fn disconnect(&self) {
		let _ = self.control_tx.send(Control::Disconnect);
	}

	/// Every request frame received so far.
	pub fn requests(&self) -> Vec<Value> {
		self.requests.lock().clone()
	}

	pub fn requested_methods(&self) -> Vec<String> {
		self.requests
			.lock()
			.iter()
			.filter_map(|frame| frame["@type"].as_str().map(str::to_string))
			.collect()
	}

	pub fn request_count(&self, method: &str) -> usize {
		self.requested_methods()
			.iter()
			.filter(|name| *name == method)
			.count()
	}
}

struct FakeSender {
	request_tx: Option<mpsc::UnboundedSender<Value>>,
}

impl Transport for FakeSender {
	fn send(&mut self, frame: Value) -> BoxFuture<'_, Result<()>> {
		let sent = match &self.request_tx {
			Some(tx) => tx.send(frame).is_ok(),
			None => false,
		};
		Box::pin(async move {
			if sent {
				Ok(())
			} else {
				Err(Error::Transport("fake client is gone".to_string()))
			}
		})
	}

	fn shutdown(&mut self) -> BoxFuture<'_, Result<()>> {
		self.request_tx = None;
		Box::pin(async { Ok(()) })
	}
}

struct FakeReceiver {
	task: JoinHandle<()>,
}

impl TransportReceiver for FakeReceiver {
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		let FakeReceiver { task } = *self;
		Box::pin(async move {
			task.await
				.map_err(|e| Error::Transport(format!("fake client task failed: {e}")))
		})
	}
}

struct FakeEngine {
	config: FakeClientConfig,
	state: SessionState,
	phone_number: Option<String>,
	next_message_id: i64,
	request_rx: mpsc::UnboundedReceiver<Value>,
	control_rx: mpsc::UnboundedReceiver<Control>,
	message_tx: mpsc::UnboundedSender<Value>,
	requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeEngine {
	async fn run(mut self) {
		self.enter(SessionState::AwaitingParameters);

		loop {
			tokio::select! {
				request = self.request_rx.recv() => match request {
					Some(frame) => {
						if !self.handle(frame) {
							break;
						}
					}
					None => break,
				},
				Some(control) = self.control_rx.recv() => match control {
					Control::Frame(frame) => self.emit(frame),
					Control::State(state) => self.enter(state),
					Control::Disconnect => break,
				},
			}
		}
	}

	fn emit(&self, frame: Value) {
		let _ = self.message_tx.send(frame);
	}

	fn enter(&mut self, state: SessionState) {
		self.state = state;
		if let Some(name) = state.wire_name() {
			self.emit(json!({
				"@type": "updateAuthorizationState",
				"authorization_state": {"@type": name}
			}));
		}
	}

	fn reply(&self, extra: &Value, mut body: Value) {
		if let Value::Object(map) = &mut body {
			map.insert("@extra".to_string(), extra.clone());
		}
		self.emit(body);
	}

	fn fail(&self, extra: &Value, code: i32, message: &str) {
		self.reply(extra, json!({"@type": "error", "code": code, "message": message}));
	}

	/// Handles one request. Returns `false` once the engine has closed.
	fn handle(&mut self, frame: Value) -> bool {
		self.requests.lock().push(frame.clone());

		let method = frame["@type"].as_str().unwrap_or_default().to_string();
		let extra = frame["@extra"].clone();

		if self.config.silent_methods.contains(&method) {
			return true;
		}
		if let Some(remaining) = self.config.transient_failures.get_mut(&method) {
			if *remaining > 0 {
				*remaining -= 1;
				self.fail(&extra, 500, "INTERNAL_SERVER_ERROR");
				return true;
			}
		}

		let ok = json!({"@type": "ok"});
		match method.as_str() {
			methods::SET_LOG_VERBOSITY_LEVEL => self.reply(&extra, ok),
			methods::SET_TDLIB_PARAMETERS => {
				if self.state != SessionState::AwaitingParameters {
					self.fail(&extra, 400, "Unexpected setTdlibParameters");
				} else if frame["api_id"].as_i64().unwrap_or(0) <= 0 {
					self.fail(&extra, 400, "Valid api_id must be provided");
				} else {
					self.reply(&extra, ok);
					self.enter(SessionState::AwaitingEncryptionKey);
				}
			}
			methods::CHECK_DATABASE_ENCRYPTION_KEY => {
				if self.state != SessionState::AwaitingEncryptionKey {
					self.fail(&extra, 400, "Unexpected checkDatabaseEncryptionKey");
				} else {
					self.reply(&extra, ok);
					if self.config.authorized {
						self.enter(SessionState::Ready);
					} else {
						self.enter(SessionState::AwaitingPhoneNumber);
					}
				}
			}
			methods::SET_AUTHENTICATION_PHONE_NUMBER => {
				let phone = frame["phone_number"].as_str().unwrap_or_default();
				if self.state != SessionState::AwaitingPhoneNumber {
					self.fail(&extra, 400, "Unexpected setAuthenticationPhoneNumber");
				} else if phone.trim().is_empty() {
					self.fail(&extra, 400, "PHONE_NUMBER_INVALID");
				} else {
					self.phone_number = Some(phone.to_string());
					self.reply(&extra, ok);
					self.enter(SessionState::AwaitingCode);
				}
			}
			methods::RESEND_AUTHENTICATION_CODE => {
				if self.state != SessionState::AwaitingCode {
					self.fail(&extra, 400, "Unexpected resendAuthenticationCode");
				} else {
					self.reply(&extra, ok);
				}
			}
			methods::CHECK_AUTHENTICATION_CODE => {
				if self.state != SessionState::AwaitingCode {
					self.fail(&extra, 400, "Unexpected checkAuthenticationCode");
				} else if frame["code"].as_str() != Some(self.config.code.as_str()) {
					self.fail(&extra, 400, "PHONE_CODE_INVALID");
				} else {
					self.reply(&extra, ok);
					if self.config.password.is_some() {
						self.enter(SessionState::AwaitingPassword);
					} else {
						self.enter(SessionState::Ready);
					}
				}
			}
			methods::CHECK_AUTHENTICATION_PASSWORD => {
				if self.state != SessionState::AwaitingPassword {
					self.fail(&extra, 400, "Unexpected checkAuthenticationPassword");
				} else if frame["password"].as_str() != self.config.password.as_deref() {
					self.fail(&extra, 400, "PASSWORD_HASH_INVALID");
				} else {
					self.reply(&extra, ok);
					self.enter(SessionState::Ready);
				}
			}
			methods::GET_AUTHORIZATION_STATE => {
				let name = self.state.wire_name().unwrap_or("authorizationStateWaitTdlibParameters");
				self.reply(&extra, json!({"@type": name}));
			}
			methods::LOG_OUT if self.config.manual_logout => self.reply(&extra, ok),
			methods::LOG_OUT | methods::CLOSE => {
				self.reply(&extra, ok);
				if method == methods::LOG_OUT {
					self.enter(SessionState::LoggingOut);
				}
				self.enter(SessionState::Closing);
				self.enter(SessionState::Closed);
				return false;
			}
			_ if self.state != SessionState::Ready => {
				self.fail(&extra, 401, "Unauthorized");
			}
			methods::GET_ME => {
				let user = json!({
					"@type": "user",
					"id": TEST_USER_ID,
					"first_name": "Test",
					"last_name": "User",
					"phone_number": self.phone_number.clone().unwrap_or_default(),
				});
				self.reply(&extra, user);
			}
			methods::GET_CHATS => {
				let limit = frame["limit"].as_u64().unwrap_or(100).min(3);
				let chat_ids: Vec<i64> = (1..=limit as i64).collect();
				self.reply(
					&extra,
					json!({"@type": "chats", "total_count": chat_ids.len(), "chat_ids": chat_ids}),
				);
			}
			methods::SEND_MESSAGE => {
				let id = self.next_message_id;
				self.next_message_id += 1;
				let message = json!({
					"@type": "message",
					"id": id,
					"chat_id": frame["chat_id"].clone(),
					"content": frame["input_message_content"].clone(),
				});
				self.reply(&extra, message.clone());
				self.emit(json!({"@type": "updateNewMessage", "message": message}));
			}
			"getOption" => {
				self.reply(&extra, json!({"@type": "optionValueString", "value": "1.8.0"}));
			}
			_ => self.fail(&extra, 400, "Method not supported"),
		}
		true
	}
}
