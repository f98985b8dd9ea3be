use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tg_runtime::{ClientProcess, Coordinator};

use crate::cli::{Cli, Commands, LoginArgs, ServeArgs};
use crate::host::{ProcessLauncher, SessionHost};
use crate::server::{self, GatewayState};
use crate::webhook::Webhook;

/// Grace period for the engine to exit after a login.
const LOGIN_EXIT_GRACE: Duration = Duration::from_secs(3);

pub async fn run(cli: Cli) -> anyhow::Result<()> {
	match cli.command {
		Commands::Serve(args) => serve(args).await,
		Commands::Login(args) => login(args).await,
	}
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
	let config = args.session.session_config();
	config.validate().context("Invalid session configuration")?;
	let launcher = ProcessLauncher::new(args.session.client_command()?);

	let webhook = Webhook::new()?;
	if let Some(url) = &args.webhook_url {
		webhook
			.configure(url, true, args.webhook_events.clone())
			.context("Invalid webhook configuration")?;
	}

	let host = SessionHost::start(config, Box::new(launcher))
		.await
		.context("Failed to start the client session")?;

	let state = GatewayState::new(Arc::new(host), Arc::new(webhook), args.api_key);
	server::serve(state, &args.host, args.port).await
}

async fn login(args: LoginArgs) -> anyhow::Result<()> {
	let config = args.session.session_config();
	config.validate().context("Invalid session configuration")?;
	let command = args.session.client_command()?;

	let (process, parts) = ClientProcess::launch(&command)
		.await
		.with_context(|| format!("Failed to launch {}", command.program.display()))?;
	let coordinator = Coordinator::initialize(config, parts)?;

	let outcome = tokio::select! {
		outcome = crate::login::run(coordinator.clone()) => outcome,
		_ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("Interrupted")),
	};

	coordinator.shutdown().await;
	if let Err(e) = process.shutdown(LOGIN_EXIT_GRACE).await {
		tracing::warn!(target = "tg.gateway", error = %e, "engine process did not stop cleanly");
	}
	outcome
}
