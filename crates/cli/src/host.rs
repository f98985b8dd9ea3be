//! Owns the live coordinator and the engine process behind it.
//!
//! The gateway never holds a coordinator across requests: handlers ask the
//! host for the current one, so `/session/restart` can swap in a fresh
//! engine without restarting the server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tg_runtime::{
	ClientCommand, ClientProcess, Coordinator, SessionConfig, TransportParts,
};
use tokio::sync::{RwLock, watch};

/// Grace period for the engine to exit after its stdin closes.
const PROCESS_EXIT_GRACE: Duration = Duration::from_secs(3);

/// A started engine: its transport and, for real engines, the process.
pub struct Engine {
	pub parts: TransportParts,
	pub process: Option<ClientProcess>,
}

/// Starts engines on demand.
#[async_trait]
pub trait Launcher: Send + Sync {
	async fn launch(&self) -> tg_runtime::Result<Engine>;
}

/// Launches the engine helper as a child process.
pub struct ProcessLauncher {
	command: ClientCommand,
}

impl ProcessLauncher {
	pub fn new(command: ClientCommand) -> Self {
		Self { command }
	}
}

#[async_trait]
impl Launcher for ProcessLauncher {
	async fn launch(&self) -> tg_runtime::Result<Engine> {
		let (process, parts) = ClientProcess::launch(&self.command).await?;
		tracing::debug!(target = "tg.gateway", pid = ?process.id(), "engine attached");
		Ok(Engine {
			parts,
			process: Some(process),
		})
	}
}

struct Active {
	coordinator: Arc<Coordinator>,
	process: Option<ClientProcess>,
}

pub struct SessionHost {
	config: SessionConfig,
	launcher: Box<dyn Launcher>,
	active: RwLock<Active>,
	current_tx: watch::Sender<Arc<Coordinator>>,
}

impl SessionHost {
	/// Launches an engine and starts a coordinator on it.
	pub async fn start(
		config: SessionConfig,
		launcher: Box<dyn Launcher>,
	) -> tg_runtime::Result<Self> {
		let active = start_active(&config, launcher.as_ref()).await?;
		let (current_tx, _) = watch::channel(active.coordinator.clone());
		Ok(Self {
			config,
			launcher,
			active: RwLock::new(active),
			current_tx,
		})
	}

	pub async fn coordinator(&self) -> Arc<Coordinator> {
		self.active.read().await.coordinator.clone()
	}

	/// Follows the live coordinator across restarts.
	pub fn subscribe(&self) -> watch::Receiver<Arc<Coordinator>> {
		self.current_tx.subscribe()
	}

	/// Shuts the current engine down and starts a new one with the same configuration.
	pub async fn restart(&self) -> tg_runtime::Result<Arc<Coordinator>> {
		let mut active = self.active.write().await;
		tracing::info!(target = "tg.gateway", "restarting session");

		stop_active(&mut active).await;
		*active = start_active(&self.config, self.launcher.as_ref()).await?;
		self.current_tx.send_replace(active.coordinator.clone());
		Ok(active.coordinator.clone())
	}

	pub async fn shutdown(&self) {
		let mut active = self.active.write().await;
		stop_active(&mut active).await;
	}
}

async fn start_active(config: &SessionConfig, launcher: &dyn Launcher) -> tg_runtime::Result<Active> {
	let Engine { parts, mut process } = launcher.launch().await?;
	match Coordinator::initialize(config.clone(), parts) {
		Ok(coordinator) => Ok(Active {
			coordinator,
			process,
		}),
		Err(e) => {
			if let Some(process) = process.take() {
				let _ = process.kill().await;
			}
			Err(e)
		}
	}
}

async fn stop_active(active: &mut Active) {
	active.coordinator.shutdown().await;
	if let Some(process) = active.process.take() {
		if let Err(e) = process.shutdown(PROCESS_EXIT_GRACE).await {
			tracing::warn!(target = "tg.gateway", error = %e, "engine process did not stop cleanly");
		}
	}
}
