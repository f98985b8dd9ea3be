//! Single reader of the engine's frame stream.
//!
//! Frames are handled strictly in arrival order: authorization updates go to
//! the [`SessionMonitor`], replies to the [`Correlator`], everything else to
//! the [`UpdateQueue`]. When the stream ends every pending call fails with
//! `ConnectionLost` and the session is forced to `Closed`.

use std::sync::Arc;

use serde_json::Value;
use tg_protocol::UpdateEnvelope;
use tokio::sync::mpsc;

use crate::correlator::Correlator;
use crate::session::SessionMonitor;
use crate::updates::UpdateQueue;

pub const STREAM_ENDED: &str = "client update stream ended";

pub struct Dispatcher {
	session: Arc<SessionMonitor>,
	correlator: Arc<Correlator>,
	updates: Arc<UpdateQueue>,
}

impl Dispatcher {
	pub fn new(
		session: Arc<SessionMonitor>,
		correlator: Arc<Correlator>,
		updates: Arc<UpdateQueue>,
	) -> Self {
		Self {
			session,
			correlator,
			updates,
		}
	}

	/// Consumes frames until the channel closes, then tears the session down.
	pub async fn run(self, mut message_rx: mpsc::UnboundedReceiver<Value>) {
		tracing::debug!(target = "tg.dispatch", "dispatcher started");
		while let Some(frame) = message_rx.recv().await {
			self.dispatch(frame);
		}
		self.connection_lost(STREAM_ENDED);
	}

	/// Routes one frame.
	pub fn dispatch(&self, frame: Value) {
		let envelope = match UpdateEnvelope::classify(frame) {
			Ok(envelope) => envelope,
			Err(e) => {
				tracing::warn!(target = "tg.dispatch", error = %e, "dropping malformed frame");
				return;
			}
		};

		match envelope {
			UpdateEnvelope::Authorization(state) => {
				self.session.apply(state);
				if state.is_terminal() {
					let drained = self.correlator.close("session closed by the client");
					if drained > 0 {
						tracing::debug!(target = "tg.dispatch", drained, "pending calls failed on close");
					}
				}
			}
			UpdateEnvelope::Response { token, outcome } => {
				self.correlator.resolve(token, outcome);
			}
			UpdateEnvelope::Event(event) => {
				tracing::trace!(target = "tg.dispatch", kind = %event.kind, "queued event");
				self.updates.push(event);
			}
		}
	}

	fn connection_lost(&self, reason: &str) {
		let drained = self.correlator.close(reason);
		self.session.force_closed(reason);
		self.updates.close();
		tracing::warn!(target = "tg.dispatch", reason, drained, "connection to client lost");
	}
}
