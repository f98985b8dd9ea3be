//! JSON envelope shared by every gateway response.

use serde::Serialize;
use serde_json::Value;

/// `{"ok": true, "data": ...}` or `{"ok": false, "error": {...}}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
	pub ok: bool,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorBody>,
}

impl<T: Serialize> Envelope<T> {
	pub fn success(data: T) -> Self {
		Self {
			ok: true,
			data: Some(data),
			error: None,
		}
	}

	pub fn failure(error: ErrorBody) -> Self {
		Self {
			ok: false,
			data: None,
			error: Some(error),
		}
	}
}

/// Error information for failed requests.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
	/// Stable snake_case tag (e.g. `invalid_state`, `timeout`).
	pub code: &'static str,

	/// Human-readable message
	pub message: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<Value>,
}
