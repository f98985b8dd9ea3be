//! Transport to the client engine.
//!
//! The engine contract is split into two halves so the writer and reader can
//! live on separate tasks:
//!
//! - [`Transport`] sends frames (fire-and-forget) and stops the engine link
//! - [`TransportReceiver`] forwards inbound frames, in arrival order, to an
//!   unbounded channel until the stream ends
//!
//! [`PipeTransport`] implements both over any byte-stream pair using
//! little-endian `u32` length-prefixed JSON frames, which is how the engine
//! helper process talks over its stdio.

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Upper bound for a single inbound frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Outbound half of the engine link.
pub trait Transport: Send {
	/// Transmits one frame. Does not wait for any reply.
	fn send(&mut self, frame: Value) -> BoxFuture<'_, Result<()>>;

	/// Releases the link.
	fn shutdown(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Inbound half of the engine link.
pub trait TransportReceiver: Send {
	/// Reads frames until the stream ends, forwarding each one in order.
	///
	/// Returning (with or without an error) drops the forwarding channel,
	/// which is how the dispatcher learns the connection is gone.
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Both halves plus the channel the receiver forwards into.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

impl std::fmt::Debug for TransportParts {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransportParts")
			.field("message_rx", &self.message_rx)
			.finish_non_exhaustive()
	}
}

/// Length-prefixed JSON over a byte-stream pair.
pub struct PipeTransport<W, R> {
	stdin: W,
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `stdin` and reading from `stdout`.
	///
	/// Returns the transport and the receiving end of its frame channel.
	pub fn new(stdin: W, stdout: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				stdin,
				stdout,
				message_tx,
			},
			message_rx,
		)
	}

	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(
			PipeTransportSender { stdin: self.stdin },
			PipeTransportReceiver {
				stdout: self.stdout,
				message_tx: self.message_tx,
			},
		)
	}

	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}

	/// Reads frames in place, without splitting.
	pub async fn run(&mut self) -> Result<()> {
		read_loop(&mut self.stdout, &self.message_tx).await
	}
}

pub struct PipeTransportSender<W> {
	stdin: W,
}

impl<W> Transport for PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send + 'static,
{
	fn send(&mut self, frame: Value) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			let bytes = serde_json::to_vec(&frame)?;
			let length = u32::try_from(bytes.len())
				.map_err(|_| Error::Transport(format!("frame too large: {} bytes", bytes.len())))?;

			self.stdin
				.write_all(&length.to_le_bytes())
				.await
				.map_err(|e| Error::Transport(format!("Failed to write length prefix: {e}")))?;
			self.stdin
				.write_all(&bytes)
				.await
				.map_err(|e| Error::Transport(format!("Failed to write frame: {e}")))?;
			self.stdin
				.flush()
				.await
				.map_err(|e| Error::Transport(format!("Failed to flush frame: {e}")))
		})
	}

	fn shutdown(&mut self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			self.stdin
				.shutdown()
				.await
				.map_err(|e| Error::Transport(format!("Failed to close pipe: {e}")))
		})
	}
}

pub struct PipeTransportReceiver<R> {
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		let PipeTransportReceiver {
			mut stdout,
			message_tx,
		} = *self;
		Box::pin(async move { read_loop(&mut stdout, &message_tx).await })
	}
}

async fn read_loop<R>(stdout: &mut R, message_tx: &mpsc::UnboundedSender<Value>) -> Result<()>
where
	R: AsyncRead + Unpin,
{
	loop {
		let mut len_buf = [0u8; 4];
		stdout
			.read_exact(&mut len_buf)
			.await
			.map_err(|e| Error::Transport(format!("Failed to read length prefix: {e}")))?;

		let length = u32::from_le_bytes(len_buf) as usize;
		if length > MAX_FRAME_LEN {
			return Err(Error::Transport(format!(
				"frame of {length} bytes exceeds the {MAX_FRAME_LEN} byte limit"
			)));
		}

		let mut frame = vec![0u8; length];
		stdout
			.read_exact(&mut frame)
			.await
			.map_err(|e| Error::Transport(format!("Failed to read frame body: {e}")))?;

		let value: Value = match serde_json::from_slice(&frame) {
			Ok(value) => value,
			Err(e) => {
				tracing::warn!(target = "tg.client", error = %e, length, "dropping undecodable frame");
				continue;
			}
		};

		if message_tx.send(value).is_err() {
			tracing::debug!(target = "tg.client", "frame channel closed, stopping reader");
			return Ok(());
		}
	}
}
