//! Request/response correlation on top of the transport.
//!
//! Every outbound call gets a fresh [`CorrelationToken`] carried in the
//! request's `@extra`; the engine echoes it on the reply and the dispatcher
//! hands the reply to [`Correlator::resolve`].
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Correlator::send`] with method, params and timeout
//! 2. Correlator allocates a token and records a [`PendingCall`]
//! 3. The frame is queued to the single writer task
//! 4. Caller awaits the oneshot receiver, bounded by the timeout
//! 5. Dispatcher receives the reply and calls [`Correlator::resolve`]
//! 6. The pending call is removed and its sender completed
//!
//! Dropping the awaiting future (timeout or caller abandonment) removes the
//! pending entry, so a reply arriving later resolves an unknown token and is
//! ignored.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tg_protocol::{CorrelationToken, RemoteError, Request};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{Error, Result};

/// One outstanding request.
pub struct PendingCall {
	method: String,
	slot: oneshot::Sender<Result<Value>>,
	created_at: Instant,
	deadline: Option<Instant>,
}

#[derive(Default)]
struct PendingTable {
	calls: HashMap<CorrelationToken, PendingCall>,
	/// Set once the connection is gone; new calls fail fast.
	closed: Option<String>,
}

type SharedTable = Arc<Mutex<PendingTable>>;

/// RAII guard removing the pending entry when the awaiting future is dropped.
struct CancelGuard {
	token: CorrelationToken,
	table: SharedTable,
	completed: bool,
}

impl CancelGuard {
	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if let Some(call) = self.table.lock().calls.remove(&self.token) {
			tracing::debug!(
				target = "tg.correlator",
				token = %self.token,
				method = %call.method,
				"discarded abandoned call"
			);
		}
	}
}

/// Future returned by [`Correlator::send`] with cleanup on drop.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.unwrap_or_else(|_| {
					Err(Error::ConnectionLost(
						"pending call dropped without a reply".to_string(),
					))
				}))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Pairs outbound calls with their eventual replies.
pub struct Correlator {
	last_token: AtomicU64,
	table: SharedTable,
	outbound_tx: mpsc::UnboundedSender<Value>,
}

impl Correlator {
	/// Creates a correlator that queues frames on `outbound_tx`.
	///
	/// Whoever holds the receiving end is the only writer to the engine.
	pub fn new(outbound_tx: mpsc::UnboundedSender<Value>) -> Self {
		Self {
			last_token: AtomicU64::new(0),
			table: Arc::new(Mutex::new(PendingTable::default())),
			outbound_tx,
		}
	}

	fn next_token(&self) -> CorrelationToken {
		CorrelationToken(self.last_token.fetch_add(1, Ordering::Relaxed) + 1)
	}

	/// Sends `method` and waits up to `timeout` for its reply.
	pub async fn send(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
		let token = self.next_token();
		let frame = Request::new(token, method, params)?.into_frame();

		let (tx, rx) = oneshot::channel();
		let now = Instant::now();
		{
			let mut table = self.table.lock();
			if let Some(reason) = &table.closed {
				return Err(Error::ConnectionLost(reason.clone()));
			}
			debug_assert!(!table.calls.contains_key(&token));
			table.calls.insert(
				token,
				PendingCall {
					method: method.to_string(),
					slot: tx,
					created_at: now,
					deadline: now.checked_add(timeout),
				},
			);
		}

		let guard = CancelGuard {
			token,
			table: Arc::clone(&self.table),
			completed: false,
		};

		tracing::debug!(target = "tg.correlator", %token, method, "sending call");

		if self.outbound_tx.send(frame).is_err() {
			tracing::error!(target = "tg.correlator", %token, method, "outbound channel closed");
			return Err(Error::ConnectionLost("outbound channel closed".to_string()));
		}

		match tokio::time::timeout(timeout, ResponseFuture { rx, guard }).await {
			Ok(result) => result,
			Err(_) => {
				tracing::debug!(target = "tg.correlator", %token, method, "call timed out");
				Err(Error::Timeout {
					method: method.to_string(),
					timeout,
				})
			}
		}
	}

	/// Completes the call registered under `token`.
	///
	/// Returns `false` when no such call is outstanding (duplicate or late
	/// delivery); that case is logged and otherwise ignored.
	pub fn resolve(&self, token: CorrelationToken, outcome: std::result::Result<Value, RemoteError>) -> bool {
		let Some(call) = self.table.lock().calls.remove(&token) else {
			tracing::debug!(target = "tg.correlator", %token, "reply for unknown token ignored");
			return false;
		};

		let elapsed = call.created_at.elapsed();
		tracing::debug!(
			target = "tg.correlator",
			%token,
			method = %call.method,
			elapsed_ms = elapsed.as_millis() as u64,
			past_deadline = call.deadline.is_some_and(|deadline| Instant::now() > deadline),
			ok = outcome.is_ok(),
			"call resolved"
		);

		let result = outcome.map_err(|error| Error::Remote {
			method: call.method,
			error,
		});
		let _ = call.slot.send(result);
		true
	}

	/// Fails every outstanding call and refuses new ones.
	///
	/// Returns how many calls were drained.
	pub fn close(&self, reason: &str) -> usize {
		let drained: Vec<_> = {
			let mut table = self.table.lock();
			table.closed.get_or_insert_with(|| reason.to_string());
			table.calls.drain().collect()
		};

		let count = drained.len();
		for (token, call) in drained {
			tracing::debug!(
				target = "tg.correlator",
				%token,
				method = %call.method,
				"failing pending call on connection loss"
			);
			let _ = call
				.slot
				.send(Err(Error::ConnectionLost(reason.to_string())));
		}
		count
	}

	pub fn is_closed(&self) -> bool {
		self.table.lock().closed.is_some()
	}

	/// Why the correlator stopped accepting calls, if it did.
	pub fn closed_reason(&self) -> Option<String> {
		self.table.lock().closed.clone()
	}

	pub fn pending_count(&self) -> usize {
		self.table.lock().calls.len()
	}

	pub fn is_pending(&self, token: CorrelationToken) -> bool {
		self.table.lock().calls.contains_key(&token)
	}

	/// Tokens currently outstanding, oldest first.
	pub fn pending_tokens(&self) -> Vec<CorrelationToken> {
		let mut tokens: Vec<_> = self.table.lock().calls.keys().copied().collect();
		tokens.sort();
		tokens
	}

	/// Age of the oldest outstanding call.
	pub fn oldest_pending_age(&self) -> Option<Duration> {
		self.table
			.lock()
			.calls
			.values()
			.map(|call| call.created_at.elapsed())
			.max()
	}
}
