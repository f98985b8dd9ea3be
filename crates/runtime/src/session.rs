//! Authorization state tracking.
//!
//! [`SessionMonitor`] holds the single live [`SessionState`] of a coordinator.
//! Only the dispatcher writes to it; readers take a snapshot without waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tg_protocol::SessionState;
use tokio::sync::watch;

pub struct SessionMonitor {
	state_tx: watch::Sender<SessionState>,
	reached_ready: AtomicBool,
}

impl Default for SessionMonitor {
	fn default() -> Self {
		Self::new()
	}
}

impl SessionMonitor {
	pub fn new() -> Self {
		let (state_tx, _) = watch::channel(SessionState::Uninitialized);
		Self {
			state_tx,
			reached_ready: AtomicBool::new(false),
		}
	}

	pub fn current(&self) -> SessionState {
		*self.state_tx.borrow()
	}

	pub fn subscribe(&self) -> watch::Receiver<SessionState> {
		self.state_tx.subscribe()
	}

	/// True once the session has been `Ready` at least once.
	pub fn has_been_ready(&self) -> bool {
		self.reached_ready.load(Ordering::Acquire)
	}

	/// Applies a state reported by the engine.
	///
	/// Repeats and out-of-order moves are logged and ignored. Returns whether
	/// the state changed.
	pub fn apply(&self, next: SessionState) -> bool {
		let mut previous = SessionState::Uninitialized;
		let changed = self.state_tx.send_if_modified(|current| {
			previous = *current;
			if current.can_transition_to(next) {
				*current = next;
				true
			} else {
				false
			}
		});

		if changed {
			if next == SessionState::Ready {
				self.reached_ready.store(true, Ordering::Release);
			}
			tracing::info!(target = "tg.session", from = %previous, to = %next, "authorization state changed");
		} else if previous == next {
			tracing::debug!(target = "tg.session", state = %next, "repeated authorization state ignored");
		} else {
			tracing::warn!(
				target = "tg.session",
				from = %previous,
				to = %next,
				"illegal authorization transition ignored"
			);
		}
		changed
	}

	/// Moves straight to `Closed` after the engine link is gone.
	pub fn force_closed(&self, reason: &str) {
		let changed = self.state_tx.send_if_modified(|current| {
			if current.is_terminal() {
				return false;
			}
			*current = SessionState::Closed;
			true
		});
		if changed {
			tracing::warn!(target = "tg.session", reason, "session closed");
		}
	}

	/// Waits until `predicate` holds for the current state.
	///
	/// On timeout returns the state observed last.
	pub async fn wait_for(
		&self,
		timeout: Duration,
		mut predicate: impl FnMut(SessionState) -> bool,
	) -> Result<SessionState, SessionState> {
		let mut state_rx = self.subscribe();
		let waited = tokio::time::timeout(timeout, state_rx.wait_for(|state| predicate(*state))).await;
		match waited {
			Ok(Ok(state)) => Ok(*state),
			_ => Err(self.current()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn starts_uninitialized() {
		let monitor = SessionMonitor::new();
		assert_eq!(monitor.current(), SessionState::Uninitialized);
		assert!(!monitor.has_been_ready());
	}

	#[test]
	fn legal_ladder_is_applied() {
		let monitor = SessionMonitor::new();
		for state in [
			SessionState::AwaitingParameters,
			SessionState::AwaitingEncryptionKey,
			SessionState::AwaitingPhoneNumber,
			SessionState::AwaitingCode,
			SessionState::AwaitingPassword,
			SessionState::Ready,
		] {
			assert!(monitor.apply(state), "{state} should apply");
		}
		assert!(monitor.has_been_ready());
		assert_eq!(monitor.current(), SessionState::Ready);
	}

	#[test]
	fn illegal_and_repeated_moves_are_ignored() {
		let monitor = SessionMonitor::new();
		monitor.apply(SessionState::AwaitingPhoneNumber);

		assert!(!monitor.apply(SessionState::AwaitingPhoneNumber));
		assert!(!monitor.apply(SessionState::AwaitingPassword));
		assert!(!monitor.apply(SessionState::AwaitingParameters));
		assert_eq!(monitor.current(), SessionState::AwaitingPhoneNumber);
	}

	#[test]
	fn closed_is_final() {
		let monitor = SessionMonitor::new();
		monitor.apply(SessionState::Ready);
		monitor.force_closed("eof");
		assert_eq!(monitor.current(), SessionState::Closed);

		assert!(!monitor.apply(SessionState::AwaitingPhoneNumber));
		assert!(!monitor.apply(SessionState::Ready));
		assert_eq!(monitor.current(), SessionState::Closed);
	}

	#[tokio::test]
	async fn wait_for_sees_later_transition() {
		let monitor = std::sync::Arc::new(SessionMonitor::new());
		let waiter = {
			let monitor = monitor.clone();
			tokio::spawn(async move {
				monitor
					.wait_for(Duration::from_secs(5), |state| state == SessionState::Ready)
					.await
			})
		};

		tokio::task::yield_now().await;
		monitor.apply(SessionState::AwaitingPhoneNumber);
		monitor.apply(SessionState::Ready);

		assert_eq!(waiter.await.unwrap(), Ok(SessionState::Ready));
	}

	#[tokio::test(start_paused = true)]
	async fn wait_for_times_out_with_last_state() {
		let monitor = SessionMonitor::new();
		monitor.apply(SessionState::AwaitingCode);

		let result = monitor
			.wait_for(Duration::from_secs(2), |state| state == SessionState::Ready)
			.await;
		assert_eq!(result, Err(SessionState::AwaitingCode));
	}
}
