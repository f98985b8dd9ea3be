//! Error types for the session runtime.

use std::time::Duration;

use tg_protocol::{EnvelopeError, RemoteError, SessionState};
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating a session.
#[derive(Debug, Error)]
pub enum Error {
	/// Missing or invalid identity or directories. Fatal; reconfigure and reinitialize.
	#[error("configuration error: {0}")]
	Configuration(String),

	/// The operation is not allowed in the current session state.
	#[error("`{operation}` is not valid in state {state}")]
	InvalidState {
		operation: &'static str,
		state: SessionState,
	},

	/// The session did not become ready within the call's timeout.
	#[error("session not authorized after {}ms (state: {state})", waited.as_millis())]
	NotAuthorized {
		state: SessionState,
		waited: Duration,
	},

	/// No reply to a specific call arrived in time.
	#[error("`{method}` timed out after {}ms", timeout.as_millis())]
	Timeout { method: String, timeout: Duration },

	/// The engine rejected the call.
	#[error("`{method}` failed with remote error {}: {}", error.code, error.message)]
	Remote {
		method: String,
		#[source]
		error: RemoteError,
	},

	/// The engine's update stream ended.
	#[error("connection to the client engine lost: {0}")]
	ConnectionLost(String),

	/// Failed to launch the client engine process.
	#[error("failed to launch client engine: {0}")]
	LaunchFailed(String),

	/// Transport-level error (framing, pipe I/O).
	#[error("transport error: {0}")]
	Transport(String),

	/// A frame could not be built or classified.
	#[error("protocol error: {0}")]
	Protocol(#[from] EnvelopeError),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Stable taxonomy tag for transports that map errors to their own codes.
	pub fn tag(&self) -> &'static str {
		match self {
			Error::Configuration(_) => "configuration_error",
			Error::InvalidState { .. } => "invalid_state",
			Error::NotAuthorized { .. } => "not_authorized",
			Error::Timeout { .. } => "timeout",
			Error::Remote { .. } => "remote_method_error",
			Error::ConnectionLost(_) => "connection_lost",
			Error::LaunchFailed(_) => "launch_failed",
			Error::Transport(_) => "transport_error",
			Error::Protocol(_) => "protocol_error",
			Error::Io(_) => "io_error",
			Error::Json(_) => "json_error",
		}
	}

	/// Returns the remote rejection, if the engine produced one.
	pub fn remote(&self) -> Option<&RemoteError> {
		match self {
			Error::Remote { error, .. } => Some(error),
			_ => None,
		}
	}

	/// Whether another attempt at the same call might succeed.
	///
	/// A timeout is not: it means the call's whole budget is spent.
	pub fn is_transient(&self) -> bool {
		match self {
			Error::Remote { error, .. } => error.is_transient(),
			_ => false,
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	pub fn is_connection_lost(&self) -> bool {
		matches!(self, Error::ConnectionLost(_))
	}
}
