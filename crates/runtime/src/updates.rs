//! Buffer of unsolicited events for consumers outside the coordinator.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tg_protocol::Event;
use tokio::sync::Notify;

#[derive(Default)]
struct QueueInner {
	events: VecDeque<Event>,
	received: u64,
	closed: bool,
}

/// Unbounded FIFO of [`Event`]s with an observable length.
#[derive(Default)]
pub struct UpdateQueue {
	inner: Mutex<QueueInner>,
	notify: Notify,
}

impl UpdateQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&self, event: Event) {
		{
			let mut inner = self.inner.lock();
			inner.received += 1;
			inner.events.push_back(event);
		}
		self.notify.notify_one();
	}

	pub fn len(&self) -> usize {
		self.inner.lock().events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().events.is_empty()
	}

	/// Total number of events ever pushed.
	pub fn received(&self) -> u64 {
		self.inner.lock().received
	}

	/// Removes up to `limit` events, oldest first.
	pub fn drain(&self, limit: usize) -> Vec<Event> {
		let mut inner = self.inner.lock();
		let take = limit.min(inner.events.len());
		inner.events.drain(..take).collect()
	}

	/// Waits for the next event.
	///
	/// Returns `None` once the queue is closed and empty.
	pub async fn next(&self) -> Option<Event> {
		loop {
			let notified = self.notify.notified();
			{
				let mut inner = self.inner.lock();
				if let Some(event) = inner.events.pop_front() {
					return Some(event);
				}
				if inner.closed {
					return None;
				}
			}
			notified.await;
		}
	}

	/// Marks the queue closed. Buffered events stay readable.
	pub fn close(&self) {
		self.inner.lock().closed = true;
		self.notify.notify_waiters();
	}

	pub fn is_closed(&self) -> bool {
		self.inner.lock().closed
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use serde_json::json;

	use super::*;

	fn event(kind: &str, id: u64) -> Event {
		Event {
			kind: kind.to_string(),
			payload: json!({"@type": kind, "id": id}),
		}
	}

	#[test]
	fn drain_respects_limit_and_order() {
		let queue = UpdateQueue::new();
		for id in 0..5 {
			queue.push(event("updateNewMessage", id));
		}

		let first = queue.drain(3);
		assert_eq!(
			first.iter().map(|e| e.payload["id"].as_u64().unwrap()).collect::<Vec<_>>(),
			vec![0, 1, 2]
		);
		assert_eq!(queue.len(), 2);
		assert_eq!(queue.drain(10).len(), 2);
		assert!(queue.is_empty());
		assert_eq!(queue.received(), 5);
	}

	#[tokio::test]
	async fn next_waits_for_push() {
		let queue = Arc::new(UpdateQueue::new());
		let consumer = {
			let queue = queue.clone();
			tokio::spawn(async move { queue.next().await })
		};

		tokio::task::yield_now().await;
		queue.push(event("updateUser", 7));

		let received = consumer.await.unwrap().unwrap();
		assert_eq!(received.kind, "updateUser");
	}

	#[tokio::test]
	async fn close_wakes_consumers_after_draining() {
		let queue = Arc::new(UpdateQueue::new());
		queue.push(event("updateOption", 1));

		assert!(queue.next().await.is_some());

		let consumer = {
			let queue = queue.clone();
			tokio::spawn(async move { queue.next().await })
		};
		tokio::task::yield_now().await;
		queue.close();

		assert!(consumer.await.unwrap().is_none());
		assert!(queue.is_closed());
	}
}
