//! Pushes unsolicited updates to a configured URL.
//!
//! While a webhook is enabled, [`Webhook::run`] is the consumer of the live
//! session's update queue: each event whose kind passes the filter is POSTed
//! as `{"event": kind, "data": payload}`, and the rest are dropped. Disabled,
//! the queue is left to `/updates` pollers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tg_runtime::{Coordinator, Event};
use tokio::sync::watch;
use url::Url;

/// Per-request limit for a webhook POST.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub const TEST_EVENT: &str = "webhookTest";

#[derive(Debug, Error)]
pub enum WebhookError {
	#[error("invalid webhook url `{url}`: {reason}")]
	InvalidUrl { url: String, reason: String },

	#[error("no webhook url is configured")]
	NotConfigured,

	#[error("webhook delivery failed: {0}")]
	Delivery(String),
}

pub type Result<T> = std::result::Result<T, WebhookError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WebhookSettings {
	pub url: Option<String>,
	pub enabled: bool,
	/// Event filters; empty forwards everything.
	pub events: Vec<String>,
}

impl WebhookSettings {
	/// A filter matches an event kind exactly, or as a case-insensitive
	/// substring (`message` matches `updateNewMessage`).
	pub fn matches(&self, kind: &str) -> bool {
		if self.events.is_empty() {
			return true;
		}
		let kind_lower = kind.to_ascii_lowercase();
		self.events
			.iter()
			.any(|filter| filter == kind || kind_lower.contains(&filter.to_ascii_lowercase()))
	}

	fn target(&self) -> Option<&str> {
		self.url.as_deref().filter(|_| self.enabled)
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookStatus {
	#[serde(flatten)]
	pub settings: WebhookSettings,
	pub delivered: u64,
	pub failed: u64,
	pub last_error: Option<String>,
}

pub struct Webhook {
	client: reqwest::Client,
	settings_tx: watch::Sender<WebhookSettings>,
	delivered: AtomicU64,
	failed: AtomicU64,
	last_error: Mutex<Option<String>>,
}

impl Webhook {
	pub fn new() -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(DELIVERY_TIMEOUT)
			.build()
			.map_err(|e| WebhookError::Delivery(format!("failed to create HTTP client: {e}")))?;
		let (settings_tx, _) = watch::channel(WebhookSettings::default());
		Ok(Self {
			client,
			settings_tx,
			delivered: AtomicU64::new(0),
			failed: AtomicU64::new(0),
			last_error: Mutex::new(None),
		})
	}

	pub fn settings(&self) -> WebhookSettings {
		self.settings_tx.borrow().clone()
	}

	pub fn status(&self) -> WebhookStatus {
		WebhookStatus {
			settings: self.settings(),
			delivered: self.delivered.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
			last_error: self.last_error.lock().clone(),
		}
	}

	/// Replaces the target and filter. Only `http` and `https` URLs are accepted.
	pub fn configure(&self, url: &str, enabled: bool, events: Vec<String>) -> Result<WebhookSettings> {
		let parsed = Url::parse(url).map_err(|e| WebhookError::InvalidUrl {
			url: url.to_string(),
			reason: e.to_string(),
		})?;
		if !matches!(parsed.scheme(), "http" | "https") {
			return Err(WebhookError::InvalidUrl {
				url: url.to_string(),
				reason: format!("unsupported scheme `{}`", parsed.scheme()),
			});
		}

		let settings = WebhookSettings {
			url: Some(parsed.to_string()),
			enabled,
			events: events
				.into_iter()
				.map(|event| event.trim().to_string())
				.filter(|event| !event.is_empty())
				.collect(),
		};
		tracing::info!(
			target = "tg.gateway",
			url = %parsed,
			enabled,
			events = ?settings.events,
			"webhook configured"
		);
		self.settings_tx.send_replace(settings.clone());
		Ok(settings)
	}

	/// Stops forwarding; the URL and filter are kept.
	pub fn disable(&self) -> WebhookSettings {
		self.settings_tx.send_modify(|settings| settings.enabled = false);
		tracing::info!(target = "tg.gateway", "webhook disabled");
		self.settings()
	}

	/// Sends a test event to the configured URL, enabled or not. Returns the HTTP status.
	pub async fn send_test(&self) -> Result<u16> {
		let url = self.settings().url.ok_or(WebhookError::NotConfigured)?;
		let body = json!({
			"event": TEST_EVENT,
			"data": {"message": "webhook connection test"},
		});
		self.post(&url, &body).await
	}

	/// Forwards events from whichever coordinator `sessions` currently holds
	/// until the session host goes away.
	pub async fn run(self: Arc<Self>, mut sessions: watch::Receiver<Arc<Coordinator>>) {
		let mut settings_rx = self.settings_tx.subscribe();

		loop {
			let settings = settings_rx.borrow_and_update().clone();
			let coordinator = sessions.borrow_and_update().clone();

			let Some(url) = settings.target().map(str::to_string) else {
				tokio::select! {
					_ = settings_rx.changed() => {}
					changed = sessions.changed() => if changed.is_err() { break },
				}
				continue;
			};

			tokio::select! {
				event = coordinator.updates().next() => match event {
					Some(event) if settings.matches(&event.kind) => self.deliver(&url, &event).await,
					Some(event) => {
						tracing::trace!(target = "tg.gateway", kind = %event.kind, "event filtered out");
					}
					// Queue closed: the session ended. Wait for a restart or new settings.
					None => tokio::select! {
						_ = settings_rx.changed() => {}
						changed = sessions.changed() => if changed.is_err() { break },
					},
				},
				_ = settings_rx.changed() => {}
				changed = sessions.changed() => if changed.is_err() { break },
			}
		}
		tracing::debug!(target = "tg.gateway", "webhook forwarder stopped");
	}

	async fn deliver(&self, url: &str, event: &Event) {
		let body = json!({"event": event.kind, "data": event.payload});
		match self.post(url, &body).await {
			Ok(_) => {
				self.delivered.fetch_add(1, Ordering::Relaxed);
				tracing::debug!(target = "tg.gateway", kind = %event.kind, "event delivered");
			}
			Err(e) => {
				self.failed.fetch_add(1, Ordering::Relaxed);
				tracing::warn!(target = "tg.gateway", kind = %event.kind, error = %e, "webhook delivery failed");
				*self.last_error.lock() = Some(e.to_string());
			}
		}
	}

	async fn post(&self, url: &str, body: &Value) -> Result<u16> {
		let response = self
			.client
			.post(url)
			.json(body)
			.send()
			.await
			.map_err(|e| WebhookError::Delivery(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			return Err(WebhookError::Delivery(format!("unexpected status {status}")));
		}
		Ok(status.as_u16())
	}
}
