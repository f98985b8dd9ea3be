//! Outbound requests and inbound frame classification.
//!
//! The engine speaks flat JSON objects tagged by `@type`. A request is the
//! method name as `@type`, its parameters as sibling keys, and an `@extra`
//! value that the engine echoes back on the matching response. Everything the
//! engine emits is classified into one [`UpdateEnvelope`]:
//!
//! - a frame carrying `@extra` is a correlated response (`@type: "error"`
//!   marks a rejection)
//! - `updateAuthorizationState` with a known state is an authorization update
//! - anything else is an unsolicited [`Event`]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::authorization::SessionState;

const TYPE_KEY: &str = "@type";
const EXTRA_KEY: &str = "@extra";

/// Identifier attached to an outbound request and echoed on its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(pub u64);

impl fmt::Display for CorrelationToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Errors raised while building or classifying frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
	#[error("frame is not a JSON object")]
	NotAnObject,

	#[error("frame has no string `@type`")]
	MissingType,

	#[error("`@extra` is not a correlation token: {0}")]
	InvalidToken(String),

	#[error("request parameters must be a JSON object or null")]
	ParamsNotObject,

	#[error("request parameters may not set reserved key `{0}`")]
	ReservedKey(String),
}

/// Outbound method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
	pub token: CorrelationToken,
	pub method: String,
	pub params: Map<String, Value>,
}

impl Request {
	/// Builds a request; `params` must be an object (or `null` for none).
	pub fn new(
		token: CorrelationToken,
		method: impl Into<String>,
		params: Value,
	) -> Result<Self, EnvelopeError> {
		let params = match params {
			Value::Null => Map::new(),
			Value::Object(map) => map,
			_ => return Err(EnvelopeError::ParamsNotObject),
		};

		for reserved in [TYPE_KEY, EXTRA_KEY] {
			if params.contains_key(reserved) {
				return Err(EnvelopeError::ReservedKey(reserved.to_string()));
			}
		}

		Ok(Self {
			token,
			method: method.into(),
			params,
		})
	}

	/// Flattens the request into the engine's wire shape.
	pub fn into_frame(self) -> Value {
		let mut map = self.params;
		map.insert(TYPE_KEY.to_string(), Value::String(self.method));
		map.insert(EXTRA_KEY.to_string(), Value::from(self.token.0));
		Value::Object(map)
	}
}

/// Rejection reported by the engine for a specific request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
	pub code: i32,
	pub message: String,
}

impl RemoteError {
	/// Flood waits (420), rate limits (429) and server-side failures (5xx)
	/// are worth another attempt; everything else is the caller's fault.
	pub fn is_transient(&self) -> bool {
		matches!(self.code, 420 | 429) || self.code >= 500
	}
}

/// Unsolicited frame queued for consumers outside the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	/// The frame's `@type`.
	pub kind: String,
	/// The full frame.
	pub payload: Value,
}

/// One inbound frame after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEnvelope {
	/// The session moved to a new authorization state.
	Authorization(SessionState),
	/// Reply to the request carrying `token`.
	Response {
		token: CorrelationToken,
		outcome: Result<Value, RemoteError>,
	},
	/// Anything else.
	Event(Event),
}

impl UpdateEnvelope {
	/// Classifies a raw inbound frame.
	pub fn classify(frame: Value) -> Result<Self, EnvelopeError> {
		let Value::Object(mut map) = frame else {
			return Err(EnvelopeError::NotAnObject);
		};

		let kind = match map.get(TYPE_KEY) {
			Some(Value::String(kind)) => kind.clone(),
			_ => return Err(EnvelopeError::MissingType),
		};

		if let Some(extra) = map.remove(EXTRA_KEY) {
			let token = parse_token(&extra)?;
			let outcome = if kind == "error" {
				Err(RemoteError {
					code: map
						.get("code")
						.and_then(Value::as_i64)
						.and_then(|code| i32::try_from(code).ok())
						.unwrap_or(0),
					message: map
						.get("message")
						.and_then(Value::as_str)
						.unwrap_or_default()
						.to_string(),
				})
			} else {
				Ok(Value::Object(map))
			};
			return Ok(UpdateEnvelope::Response { token, outcome });
		}

		if kind == "updateAuthorizationState" {
			let state = map
				.get("authorization_state")
				.and_then(|state| state.get(TYPE_KEY))
				.and_then(Value::as_str)
				.and_then(SessionState::from_wire);
			if let Some(state) = state {
				return Ok(UpdateEnvelope::Authorization(state));
			}
		}

		Ok(UpdateEnvelope::Event(Event {
			kind,
			payload: Value::Object(map),
		}))
	}
}

fn parse_token(extra: &Value) -> Result<CorrelationToken, EnvelopeError> {
	let token = match extra {
		Value::Number(number) => number.as_u64(),
		Value::String(text) => text.parse().ok(),
		_ => None,
	};
	token
		.map(CorrelationToken)
		.ok_or_else(|| EnvelopeError::InvalidToken(extra.to_string()))
}
