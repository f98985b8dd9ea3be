//! Authorization states reported by the client engine.
//!
//! The engine announces progress through `updateAuthorizationState` frames
//! whose nested `authorization_state["@type"]` names one of the
//! `authorizationState*` objects. [`SessionState`] is the closed Rust view of
//! those names plus the `Uninitialized` state a session starts in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one authorized session.
///
/// The handshake ladder runs from [`Uninitialized`](Self::Uninitialized) to
/// [`Ready`](Self::Ready); the exit path runs from `Ready` through
/// [`LoggingOut`](Self::LoggingOut) and [`Closing`](Self::Closing) to
/// [`Closed`](Self::Closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	/// No authorization update has been received yet.
	#[default]
	Uninitialized,
	/// The engine waits for `setTdlibParameters`.
	AwaitingParameters,
	/// The engine waits for `checkDatabaseEncryptionKey`.
	AwaitingEncryptionKey,
	/// The engine waits for `setAuthenticationPhoneNumber`.
	AwaitingPhoneNumber,
	/// The engine waits for `checkAuthenticationCode`.
	AwaitingCode,
	/// Two-factor authentication is enabled; waits for `checkAuthenticationPassword`.
	AwaitingPassword,
	/// Authorized; ordinary calls may be issued.
	Ready,
	/// `logOut` is in progress.
	LoggingOut,
	/// The engine is shutting down.
	Closing,
	/// The engine is gone. Terminal.
	Closed,
}

impl SessionState {
	/// Every state, in handshake order.
	pub const ALL: [SessionState; 10] = [
		SessionState::Uninitialized,
		SessionState::AwaitingParameters,
		SessionState::AwaitingEncryptionKey,
		SessionState::AwaitingPhoneNumber,
		SessionState::AwaitingCode,
		SessionState::AwaitingPassword,
		SessionState::Ready,
		SessionState::LoggingOut,
		SessionState::Closing,
		SessionState::Closed,
	];

	/// Maps an engine `authorizationState*` type name to a state.
	///
	/// Returns `None` for names this crate does not model (for instance the
	/// QR-code or registration states), which callers treat as plain events.
	pub fn from_wire(type_name: &str) -> Option<Self> {
		let state = match type_name {
			"authorizationStateWaitTdlibParameters" => SessionState::AwaitingParameters,
			"authorizationStateWaitEncryptionKey" => SessionState::AwaitingEncryptionKey,
			"authorizationStateWaitPhoneNumber" => SessionState::AwaitingPhoneNumber,
			"authorizationStateWaitCode" => SessionState::AwaitingCode,
			"authorizationStateWaitPassword" => SessionState::AwaitingPassword,
			"authorizationStateReady" => SessionState::Ready,
			"authorizationStateLoggingOut" => SessionState::LoggingOut,
			"authorizationStateClosing" => SessionState::Closing,
			"authorizationStateClosed" => SessionState::Closed,
			_ => return None,
		};
		Some(state)
	}

	/// Engine type name for this state, if the engine has one.
	pub fn wire_name(self) -> Option<&'static str> {
		let name = match self {
			SessionState::Uninitialized => return None,
			SessionState::AwaitingParameters => "authorizationStateWaitTdlibParameters",
			SessionState::AwaitingEncryptionKey => "authorizationStateWaitEncryptionKey",
			SessionState::AwaitingPhoneNumber => "authorizationStateWaitPhoneNumber",
			SessionState::AwaitingCode => "authorizationStateWaitCode",
			SessionState::AwaitingPassword => "authorizationStateWaitPassword",
			SessionState::Ready => "authorizationStateReady",
			SessionState::LoggingOut => "authorizationStateLoggingOut",
			SessionState::Closing => "authorizationStateClosing",
			SessionState::Closed => "authorizationStateClosed",
		};
		Some(name)
	}

	/// Stable snake_case label, identical to the serde representation.
	pub fn as_str(self) -> &'static str {
		match self {
			SessionState::Uninitialized => "uninitialized",
			SessionState::AwaitingParameters => "awaiting_parameters",
			SessionState::AwaitingEncryptionKey => "awaiting_encryption_key",
			SessionState::AwaitingPhoneNumber => "awaiting_phone_number",
			SessionState::AwaitingCode => "awaiting_code",
			SessionState::AwaitingPassword => "awaiting_password",
			SessionState::Ready => "ready",
			SessionState::LoggingOut => "logging_out",
			SessionState::Closing => "closing",
			SessionState::Closed => "closed",
		}
	}

	fn rank(self) -> u8 {
		match self {
			SessionState::Uninitialized => 0,
			SessionState::AwaitingParameters => 1,
			SessionState::AwaitingEncryptionKey => 2,
			SessionState::AwaitingPhoneNumber => 3,
			SessionState::AwaitingCode => 4,
			SessionState::AwaitingPassword => 5,
			SessionState::Ready => 6,
			SessionState::LoggingOut => 7,
			SessionState::Closing => 8,
			SessionState::Closed => 9,
		}
	}

	/// True for the states before `Ready`.
	pub fn is_handshake(self) -> bool {
		self.rank() < SessionState::Ready.rank()
	}

	pub fn is_terminal(self) -> bool {
		self == SessionState::Closed
	}

	/// True while the session is on its way out (`LoggingOut`, `Closing`, `Closed`).
	pub fn is_shutting_down(self) -> bool {
		self.rank() > SessionState::Ready.rank()
	}

	/// Whether the engine may legally move from `self` to `next`.
	///
	/// Forward moves along the handshake ladder may skip steps (a persisted
	/// session goes straight from `AwaitingParameters` to `Ready`), except that
	/// `AwaitingPassword` is only reachable from `AwaitingCode`. Backward moves
	/// are limited to `AwaitingCode -> AwaitingPhoneNumber` and
	/// `LoggingOut -> AwaitingPhoneNumber`. `Closing` and `Closed` are reachable
	/// from anywhere; nothing leaves `Closed`.
	pub fn can_transition_to(self, next: SessionState) -> bool {
		use SessionState::*;

		if self == next || self == Closed {
			return false;
		}

		match (self, next) {
			(_, Closing) | (_, Closed) => true,
			(AwaitingCode, AwaitingPhoneNumber) => true,
			(LoggingOut, AwaitingPhoneNumber) => true,
			(Ready, LoggingOut) => true,
			(_, AwaitingPassword) => self == AwaitingCode,
			(from, to) if from.is_handshake() && (to.is_handshake() || to == Ready) => {
				to.rank() > from.rank()
			}
			_ => false,
		}
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
