use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use thiserror::Error;

use crate::envelope::{Envelope, ErrorBody};
use crate::webhook::WebhookError;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
	#[error(transparent)]
	Session(#[from] tg_runtime::Error),

	#[error("invalid request: {0}")]
	BadRequest(String),

	#[error("missing or invalid API key")]
	Unauthorized,

	#[error(transparent)]
	Webhook(#[from] WebhookError),
}

impl GatewayError {
	pub fn code(&self) -> &'static str {
		match self {
			GatewayError::Session(err) => err.tag(),
			GatewayError::BadRequest(_) => "invalid_input",
			GatewayError::Unauthorized => "unauthorized",
			GatewayError::Webhook(WebhookError::InvalidUrl { .. }) => "invalid_input",
			GatewayError::Webhook(WebhookError::NotConfigured) => "webhook_not_configured",
			GatewayError::Webhook(WebhookError::Delivery(_)) => "webhook_delivery_failed",
		}
	}

	pub fn status(&self) -> StatusCode {
		use tg_runtime::Error;

		match self {
			GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
			GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
			GatewayError::Webhook(err) => match err {
				WebhookError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
				WebhookError::NotConfigured => StatusCode::CONFLICT,
				WebhookError::Delivery(_) => StatusCode::BAD_GATEWAY,
			},
			GatewayError::Session(err) => match err {
				Error::InvalidState { .. } => StatusCode::CONFLICT,
				Error::NotAuthorized { .. } | Error::ConnectionLost(_) => {
					StatusCode::SERVICE_UNAVAILABLE
				}
				Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
				Error::Remote { error, .. } => u16::try_from(error.code)
					.ok()
					.filter(|code| (400..500).contains(code))
					.and_then(|code| StatusCode::from_u16(code).ok())
					.unwrap_or(StatusCode::BAD_GATEWAY),
				Error::Protocol(_) => StatusCode::BAD_REQUEST,
				_ => StatusCode::INTERNAL_SERVER_ERROR,
			},
		}
	}

	fn details(&self) -> Option<Value> {
		use tg_runtime::Error;

		let GatewayError::Session(err) = self else {
			return None;
		};
		match err {
			Error::InvalidState { operation, state } => {
				Some(json!({ "operation": operation, "state": state }))
			}
			Error::NotAuthorized { state, waited } => Some(json!({
				"state": state,
				"waited_ms": waited.as_millis() as u64,
			})),
			Error::Timeout { method, timeout } => Some(json!({
				"method": method,
				"timeout_ms": timeout.as_millis() as u64,
			})),
			Error::Remote { method, error } => Some(json!({
				"method": method,
				"remote_code": error.code,
				"remote_message": error.message,
			})),
			_ => None,
		}
	}

	pub fn to_body(&self) -> ErrorBody {
		ErrorBody {
			code: self.code(),
			message: self.to_string(),
			details: self.details(),
		}
	}
}

impl IntoResponse for GatewayError {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			tracing::warn!(target = "tg.gateway", code = self.code(), error = %self, "request failed");
		} else {
			tracing::debug!(target = "tg.gateway", code = self.code(), error = %self, "request rejected");
		}
		(status, axum::Json(Envelope::<()>::failure(self.to_body()))).into_response()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tg_protocol::{RemoteError, SessionState};
	use tg_runtime::Error;

	use super::*;

	fn remote(code: i32) -> GatewayError {
		GatewayError::Session(Error::Remote {
			method: "getChat".to_string(),
			error: RemoteError {
				code,
				message: "boom".to_string(),
			},
		})
	}

	#[test]
	fn statuses_follow_the_taxonomy() {
		assert_eq!(remote(400).status(), StatusCode::BAD_REQUEST);
		assert_eq!(remote(404).status(), StatusCode::NOT_FOUND);
		assert_eq!(remote(500).status(), StatusCode::BAD_GATEWAY);
		assert_eq!(remote(-1).status(), StatusCode::BAD_GATEWAY);

		let invalid = GatewayError::from(Error::InvalidState {
			operation: "supply_code",
			state: SessionState::AwaitingPhoneNumber,
		});
		assert_eq!(invalid.status(), StatusCode::CONFLICT);
		assert_eq!(invalid.code(), "invalid_state");

		let timeout = GatewayError::from(Error::Timeout {
			method: "sendMessage".to_string(),
			timeout: Duration::from_secs(5),
		});
		assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
		assert_eq!(
			GatewayError::from(Error::ConnectionLost("eof".to_string())).status(),
			StatusCode::SERVICE_UNAVAILABLE
		);
		assert_eq!(GatewayError::Unauthorized.status(), StatusCode::UNAUTHORIZED);

		let unconfigured = GatewayError::from(WebhookError::NotConfigured);
		assert_eq!(unconfigured.status(), StatusCode::CONFLICT);
		assert_eq!(unconfigured.code(), "webhook_not_configured");
		assert_eq!(
			GatewayError::from(WebhookError::Delivery("connection refused".to_string())).status(),
			StatusCode::BAD_GATEWAY
		);
	}

	#[test]
	fn body_carries_details() {
		let body = remote(400).to_body();
		assert_eq!(body.code, "remote_method_error");
		let details = body.details.unwrap();
		assert_eq!(details["remote_code"], 400);
		assert_eq!(details["method"], "getChat");

		let body = GatewayError::from(Error::InvalidState {
			operation: "supply_code",
			state: SessionState::AwaitingPhoneNumber,
		})
		.to_body();
		assert_eq!(body.details.unwrap()["state"], "awaiting_phone_number");
	}
}
