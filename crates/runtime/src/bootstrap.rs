//! Answers the engine's setup prompts without user involvement.
//!
//! The engine asks for its parameters and the database key before it asks
//! for anything a person has to type. This task watches the session state and
//! answers those prompts, plus the phone number prompt when a number was
//! configured up front. It runs beside the dispatcher because replies to its
//! own calls arrive through the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tg_protocol::{SessionState, methods};
use tokio::sync::watch;

use crate::correlator::Correlator;
use crate::error::Result;
use crate::session::SessionMonitor;

pub(crate) struct Bootstrap {
	pub correlator: Arc<Correlator>,
	pub session: Arc<SessionMonitor>,
	pub parameters: Value,
	pub encryption_key: String,
	pub log_verbosity: Option<i32>,
	pub phone_number: Option<String>,
	pub timeout: Duration,
}

impl Bootstrap {
	pub(crate) async fn run(self) {
		let mut state_rx = self.session.subscribe();
		state_rx.borrow_and_update();

		if let Some(level) = self.log_verbosity {
			self.request(
				methods::SET_LOG_VERBOSITY_LEVEL,
				json!({ "new_verbosity_level": level }),
			)
			.await;
		}

		let mut parameters_sent = self
			.request(methods::SET_TDLIB_PARAMETERS, self.parameters.clone())
			.await;

		// Handle whatever arrived while the first calls were in flight.
		let mut state = *state_rx.borrow_and_update();
		loop {
			match state {
				SessionState::AwaitingParameters if !parameters_sent => {
					parameters_sent = self
						.request(methods::SET_TDLIB_PARAMETERS, self.parameters.clone())
						.await;
				}
				SessionState::AwaitingEncryptionKey => {
					self.request(
						methods::CHECK_DATABASE_ENCRYPTION_KEY,
						json!({ "encryption_key": self.encryption_key }),
					)
					.await;
				}
				SessionState::AwaitingPhoneNumber => match &self.phone_number {
					Some(phone_number) => {
						tracing::info!(target = "tg.session", "submitting configured phone number");
						self.request(
							methods::SET_AUTHENTICATION_PHONE_NUMBER,
							json!({ "phone_number": phone_number }),
						)
						.await;
					}
					None => {
						tracing::info!(target = "tg.session", "waiting for a phone number to be supplied");
					}
				},
				SessionState::AwaitingCode => {
					tracing::info!(target = "tg.session", "verification code required");
				}
				SessionState::AwaitingPassword => {
					tracing::info!(target = "tg.session", "two-factor password required");
				}
				SessionState::Closed => break,
				_ => {}
			}

			if state_rx.changed().await.is_err() {
				break;
			}
			state = *state_rx.borrow_and_update();
		}
		tracing::debug!(target = "tg.session", "bootstrap finished");
	}

	/// Issues one setup call. Failures are logged; the engine re-prompts.
	async fn request(&self, method: &str, params: Value) -> bool {
		let result: Result<Value> = self.correlator.send(method, params, self.timeout).await;
		match result {
			Ok(_) => true,
			Err(e) => {
				tracing::warn!(target = "tg.session", method, error = %e, "setup call failed");
				false
			}
		}
	}
}
