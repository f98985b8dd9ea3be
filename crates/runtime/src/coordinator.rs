//! The session coordinator.
//!
//! [`Coordinator`] owns one engine link and everything attached to it: the
//! authorization state, the pending-call table and the event buffer. It is
//! the entry point for all outbound calls and for the credentials a person
//! supplies while the handshake is in progress.
//!
//! # Task layout
//!
//! [`Coordinator::initialize`] spawns four tasks and returns without waiting
//! for authorization:
//!
//! - writer: drains the outbound channel into the [`Transport`]
//! - receiver: runs the [`TransportReceiver`](crate::transport::TransportReceiver)
//! - dispatcher: routes inbound frames (see [`Dispatcher`])
//! - bootstrap: answers the engine's setup prompts
//!
//! [`Transport`]: crate::transport::Transport

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tg_protocol::{SessionState, methods};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bootstrap::Bootstrap;
use crate::config::{Credentials, RetryPolicy, SessionConfig, Timeouts};
use crate::correlator::Correlator;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::session::SessionMonitor;
use crate::transport::TransportParts;
use crate::updates::UpdateQueue;

/// How long [`Coordinator::shutdown`] waits for the engine to acknowledge `close`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time view of a coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
	pub state: SessionState,
	pub ready: bool,
	/// False once the engine link is gone.
	pub connected: bool,
	pub pending_calls: usize,
	pub oldest_pending_ms: Option<u64>,
	pub queued_updates: usize,
	pub received_updates: u64,
	pub lost_reason: Option<String>,
	pub uptime_secs: u64,
}

impl Health {
	/// Connected but not usable yet, or not connected at all.
	pub fn is_degraded(&self) -> bool {
		!self.connected || !self.ready
	}
}

pub struct Coordinator {
	session: Arc<SessionMonitor>,
	correlator: Arc<Correlator>,
	updates: Arc<UpdateQueue>,
	credentials: Mutex<Credentials>,
	timeouts: Timeouts,
	retry: RetryPolicy,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	started_at: Instant,
}

impl Coordinator {
	/// Validates `config`, starts the engine link and begins the handshake.
	///
	/// Returns as soon as the background tasks are running. Must be called
	/// from within a Tokio runtime.
	///
	/// # Errors
	///
	/// Returns [`Error::Configuration`] if the API identity is missing or the
	/// directories cannot be created.
	pub fn initialize(config: SessionConfig, parts: TransportParts) -> Result<Arc<Self>> {
		config.validate()?;
		config.prepare_directories()?;
		let parameters = serde_json::to_value(config.tdlib_parameters()?)?;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let session = Arc::new(SessionMonitor::new());
		let correlator = Arc::new(Correlator::new(outbound_tx));
		let updates = Arc::new(UpdateQueue::new());

		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;

		let writer = tokio::spawn(write_loop(sender, outbound_rx));
		let reader = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::warn!(target = "tg.client", error = %e, "client stream failed");
			}
		});
		let dispatcher = tokio::spawn(
			Dispatcher::new(session.clone(), correlator.clone(), updates.clone()).run(message_rx),
		);
		let bootstrap = tokio::spawn(
			Bootstrap {
				correlator: correlator.clone(),
				session: session.clone(),
				parameters,
				encryption_key: config.encryption_key.clone(),
				log_verbosity: config.log_verbosity,
				phone_number: config.credentials.phone_number.clone(),
				timeout: config.timeouts.call,
			}
			.run(),
		);

		tracing::info!(
			target = "tg.session",
			database = %config.database_directory.display(),
			test_dc = config.use_test_dc,
			"session coordinator started"
		);

		Ok(Arc::new(Self {
			session,
			correlator,
			updates,
			credentials: Mutex::new(config.credentials),
			timeouts: config.timeouts,
			retry: config.retry,
			tasks: Mutex::new(vec![writer, reader, dispatcher, bootstrap]),
			started_at: Instant::now(),
		}))
	}

	pub fn current_state(&self) -> SessionState {
		self.session.current()
	}

	pub fn is_ready(&self) -> bool {
		self.session.current() == SessionState::Ready
	}

	pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
		self.session.subscribe()
	}

	pub fn updates(&self) -> &Arc<UpdateQueue> {
		&self.updates
	}

	pub fn timeouts(&self) -> Timeouts {
		self.timeouts
	}

	/// Credentials supplied so far.
	pub fn credentials(&self) -> Credentials {
		self.credentials.lock().clone()
	}

	pub fn health(&self) -> Health {
		let state = self.session.current();
		let lost_reason = self.correlator.closed_reason();
		Health {
			state,
			ready: state == SessionState::Ready,
			connected: lost_reason.is_none(),
			pending_calls: self.correlator.pending_count(),
			oldest_pending_ms: self
				.correlator
				.oldest_pending_age()
				.map(|age| age.as_millis() as u64),
			queued_updates: self.updates.len(),
			received_updates: self.updates.received(),
			lost_reason,
			uptime_secs: self.started_at.elapsed().as_secs(),
		}
	}

	/// Issues `method` and returns the engine's reply.
	///
	/// Setup and authorization methods go out immediately. Anything else
	/// first waits for `Ready`, failing with [`Error::NotAuthorized`] once
	/// `timeout` elapses. The call itself then gets a fresh `timeout` budget,
	/// within which transient remote failures are retried.
	pub async fn call(&self, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value> {
		let timeout = timeout.unwrap_or(self.timeouts.call);
		if !methods::is_bootstrap(method) {
			self.wait_ready(timeout).await?;
		}

		let deadline = Instant::now() + timeout;
		let mut attempt = 1;
		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			let result = self.correlator.send(method, params.clone(), remaining).await;

			let err = match result {
				Ok(value) => return Ok(value),
				Err(err) if err.is_timeout() => {
					return Err(Error::Timeout {
						method: method.to_string(),
						timeout,
					});
				}
				Err(err) => err,
			};

			if !err.is_transient() || attempt >= self.retry.max_attempts {
				return Err(err);
			}
			let backoff = self.retry.backoff_for(attempt);
			if Instant::now() + backoff >= deadline {
				return Err(err);
			}

			tracing::warn!(
				target = "tg.session",
				method,
				attempt,
				backoff_ms = backoff.as_millis() as u64,
				error = %err,
				"transient failure, retrying"
			);
			tokio::time::sleep(backoff).await;
			attempt += 1;
		}
	}

	/// Waits up to `timeout` for the session to become `Ready`.
	pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
		self.wait_ready(timeout).await
	}

	async fn wait_ready(&self, timeout: Duration) -> Result<()> {
		match self.session.current() {
			SessionState::Ready => return Ok(()),
			SessionState::Closed => return Err(self.closed_error()),
			_ => {}
		}

		let outcome = self
			.session
			.wait_for(timeout, |state| {
				matches!(state, SessionState::Ready | SessionState::Closed)
			})
			.await;
		match outcome {
			Ok(SessionState::Ready) => Ok(()),
			Ok(_) => Err(self.closed_error()),
			Err(state) => Err(Error::NotAuthorized {
				state,
				waited: timeout,
			}),
		}
	}

	fn closed_error(&self) -> Error {
		Error::ConnectionLost(
			self.correlator
				.closed_reason()
				.unwrap_or_else(|| "session closed".to_string()),
		)
	}

	/// Submits the account's phone number. Valid in `AwaitingPhoneNumber`.
	///
	/// Returns the state the engine moved to.
	pub async fn supply_phone_number(&self, phone_number: &str) -> Result<SessionState> {
		let state = self
			.advance(
				"supply_phone_number",
				SessionState::AwaitingPhoneNumber,
				methods::SET_AUTHENTICATION_PHONE_NUMBER,
				json!({ "phone_number": phone_number }),
			)
			.await?;
		self.credentials.lock().phone_number = Some(phone_number.to_string());
		Ok(state)
	}

	/// Submits the verification code. Valid in `AwaitingCode`.
	///
	/// A rejected code leaves the session in `AwaitingCode` so the caller can
	/// try again.
	pub async fn supply_code(&self, code: &str) -> Result<SessionState> {
		let state = self
			.advance(
				"supply_code",
				SessionState::AwaitingCode,
				methods::CHECK_AUTHENTICATION_CODE,
				json!({ "code": code }),
			)
			.await?;
		self.credentials.lock().code = Some(code.to_string());
		Ok(state)
	}

	/// Submits the two-factor password. Valid in `AwaitingPassword`.
	pub async fn supply_password(&self, password: &str) -> Result<SessionState> {
		let state = self
			.advance(
				"supply_password",
				SessionState::AwaitingPassword,
				methods::CHECK_AUTHENTICATION_PASSWORD,
				json!({ "password": password }),
			)
			.await?;
		self.credentials.lock().password = Some(password.to_string());
		Ok(state)
	}

	/// Asks the engine to send the verification code again. Valid in `AwaitingCode`.
	pub async fn resend_code(&self) -> Result<()> {
		let state = self.session.current();
		if state != SessionState::AwaitingCode {
			return Err(Error::InvalidState {
				operation: "resend_code",
				state,
			});
		}
		self.correlator
			.send(
				methods::RESEND_AUTHENTICATION_CODE,
				Value::Null,
				self.timeouts.authorization,
			)
			.await?;
		tracing::info!(target = "tg.session", "verification code resent");
		Ok(())
	}

	/// Issues one authorization step and waits for the engine to confirm it
	/// with a state change.
	async fn advance(
		&self,
		operation: &'static str,
		expected: SessionState,
		method: &str,
		params: Value,
	) -> Result<SessionState> {
		let state = self.session.current();
		if state != expected {
			return Err(Error::InvalidState { operation, state });
		}

		let timeout = self.timeouts.authorization;
		let mut state_rx = self.session.subscribe();
		state_rx.borrow_and_update();

		tracing::debug!(target = "tg.session", operation, "submitting authorization step");
		self.correlator.send(method, params, timeout).await?;

		match tokio::time::timeout(timeout, state_rx.changed()).await {
			Ok(Ok(())) => Ok(*state_rx.borrow_and_update()),
			Ok(Err(_)) => Err(self.closed_error()),
			Err(_) => Err(Error::Timeout {
				method: method.to_string(),
				timeout,
			}),
		}
	}

	/// Logs the account out. Valid once the session has been `Ready`.
	///
	/// Returns once the engine reports the session leaving `Ready`. Repeated
	/// calls while the session is already on its way out succeed without
	/// sending anything.
	pub async fn logout(&self) -> Result<SessionState> {
		let state = self.session.current();
		if state.is_shutting_down() {
			return Ok(state);
		}
		if !self.session.has_been_ready() {
			return Err(Error::InvalidState {
				operation: "logout",
				state,
			});
		}

		let timeout = self.timeouts.authorization;
		let mut state_rx = self.session.subscribe();

		tracing::info!(target = "tg.session", "logging out");
		self.correlator
			.send(methods::LOG_OUT, Value::Null, self.timeouts.call)
			.await?;

		let left_ready = tokio::time::timeout(
			timeout,
			state_rx.wait_for(|state| {
				state.is_shutting_down() || *state == SessionState::AwaitingPhoneNumber
			}),
		)
		.await;
		match left_ready {
			Ok(Ok(state)) => Ok(*state),
			Ok(Err(_)) => Err(self.closed_error()),
			Err(_) => Err(Error::Timeout {
				method: methods::LOG_OUT.to_string(),
				timeout,
			}),
		}
	}

	/// Closes the engine and stops every background task.
	pub async fn shutdown(&self) {
		if !self.correlator.is_closed() {
			if let Err(e) = self.correlator.send(methods::CLOSE, Value::Null, CLOSE_TIMEOUT).await {
				tracing::debug!(target = "tg.session", error = %e, "close not acknowledged");
			}
		}

		let reason = "coordinator shut down";
		self.correlator.close(reason);
		self.session.force_closed(reason);
		self.updates.close();
		self.abort_tasks();
		tracing::info!(target = "tg.session", "session coordinator stopped");
	}

	fn abort_tasks(&self) {
		for task in self.tasks.lock().drain(..) {
			task.abort();
		}
	}
}

impl Drop for Coordinator {
	fn drop(&mut self) {
		self.abort_tasks();
	}
}

async fn write_loop(
	mut sender: Box<dyn crate::transport::Transport>,
	mut outbound_rx: mpsc::UnboundedReceiver<Value>,
) {
	while let Some(frame) = outbound_rx.recv().await {
		if let Err(e) = sender.send(frame).await {
			tracing::error!(target = "tg.client", error = %e, "failed to write frame");
			break;
		}
	}
	if let Err(e) = sender.shutdown().await {
		tracing::debug!(target = "tg.client", error = %e, "transport shutdown failed");
	}
}

#[cfg(test)]
mod tests;
