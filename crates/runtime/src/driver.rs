//! Client engine process management.
//!
//! The engine runs as a helper process that speaks length-prefixed JSON
//! frames over its stdin/stdout (see [`PipeTransport`]). Its stderr is passed
//! through so engine diagnostics land next to ours.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{Error, Result};
use crate::transport::{PipeTransport, TransportParts};

/// How long a freshly spawned engine must survive before it counts as started.
const STARTUP_GRACE: Duration = Duration::from_millis(100);

/// Program and arguments that start the engine helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCommand {
	pub program: PathBuf,
	pub args: Vec<OsString>,
}

impl ClientCommand {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			args: Vec::new(),
		}
	}

	pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
		self.args.push(arg.into());
		self
	}

	/// Parses a whitespace-separated command line such as `tdjson-pipe --quiet`.
	pub fn parse(line: &str) -> Result<Self> {
		let mut words = line.split_whitespace();
		let program = words
			.next()
			.ok_or_else(|| Error::Configuration("client command is empty".to_string()))?;
		Ok(Self {
			program: PathBuf::from(program),
			args: words.map(OsString::from).collect(),
		})
	}
}

/// A running engine helper process.
#[derive(Debug)]
pub struct ClientProcess {
	process: Child,
}

impl ClientProcess {
	/// Spawns the helper and returns it together with a transport over its stdio.
	///
	/// # Errors
	///
	/// Returns [`Error::LaunchFailed`] if the process cannot be spawned or
	/// exits during the startup grace period.
	pub async fn launch(command: &ClientCommand) -> Result<(Self, TransportParts)> {
		tracing::info!(
			target = "tg.client",
			program = %command.program.display(),
			"launching client engine"
		);

		let mut child = Command::new(&command.program)
			.args(&command.args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("Failed to spawn {}: {e}", command.program.display())))?;

		tokio::time::sleep(STARTUP_GRACE).await;

		match child.try_wait() {
			Ok(Some(status)) => {
				return Err(Error::LaunchFailed(format!(
					"client process exited immediately with status: {status}"
				)));
			}
			Ok(None) => {}
			Err(e) => {
				return Err(Error::LaunchFailed(format!(
					"Failed to check process status: {e}"
				)));
			}
		}

		let (stdin, stdout) = take_pipes(&mut child)?;
		let (transport, message_rx) = PipeTransport::new(stdin, stdout);

		if let Some(pid) = child.id() {
			tracing::debug!(target = "tg.client", pid, "client engine started");
		}

		Ok((Self { process: child }, transport.into_transport_parts(message_rx)))
	}

	pub fn id(&self) -> Option<u32> {
		self.process.id()
	}

	/// Whether the process is still running.
	pub fn is_running(&mut self) -> bool {
		matches!(self.process.try_wait(), Ok(None))
	}

	/// Waits briefly for the engine to exit on its own, then kills it.
	///
	/// The engine stops by itself once its stdin closes, which happens when
	/// the coordinator shuts its transport down.
	pub async fn shutdown(mut self, grace: Duration) -> Result<()> {
		match tokio::time::timeout(grace, self.process.wait()).await {
			Ok(Ok(status)) => {
				tracing::debug!(target = "tg.client", %status, "client engine exited");
				Ok(())
			}
			Ok(Err(e)) => Err(Error::LaunchFailed(format!("Failed to wait for process: {e}"))),
			Err(_) => {
				tracing::warn!(target = "tg.client", "client engine did not exit, killing it");
				self.kill().await
			}
		}
	}

	/// Force kills the process.
	pub async fn kill(mut self) -> Result<()> {
		self.process
			.kill()
			.await
			.map_err(|e| Error::LaunchFailed(format!("Failed to kill process: {e}")))?;
		let _ = tokio::time::timeout(Duration::from_millis(500), self.process.wait()).await;
		Ok(())
	}
}

fn take_pipes(child: &mut Child) -> Result<(ChildStdin, ChildStdout)> {
	let stdin = child
		.stdin
		.take()
		.ok_or_else(|| Error::LaunchFailed("client stdin not captured".to_string()))?;
	let stdout = child
		.stdout
		.take()
		.ok_or_else(|| Error::LaunchFailed("client stdout not captured".to_string()))?;
	Ok((stdin, stdout))
}
