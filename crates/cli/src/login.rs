//! Interactive authorization on a terminal.

use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::json;
use tg_protocol::methods;
use tg_runtime::{Coordinator, Error as SessionError, SessionState};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

/// Answers the engine's prompts from stdin until the session is ready.
pub async fn run(coordinator: Arc<Coordinator>) -> anyhow::Result<()> {
	let input = BufReader::new(tokio::io::stdin()).lines();
	run_with(&coordinator, input).await
}

/// Drives the login from `input`, one answer per line.
///
/// A rejected code or password is reported and asked for again; any other
/// failure ends the login. A configured phone number is submitted by the
/// session itself, so it is only asked for if the engine keeps waiting for
/// one past the authorization timeout.
pub async fn run_with<R>(coordinator: &Coordinator, mut input: Lines<R>) -> anyhow::Result<()>
where
	R: AsyncBufRead + Unpin,
{
	let mut states = coordinator.subscribe_state();
	let mut await_configured_phone = coordinator.credentials().phone_number.is_some();

	loop {
		let state = *states.borrow_and_update();
		match state {
			SessionState::Ready => break,
			SessionState::Closed => bail!("Session closed before authorization completed"),
			SessionState::AwaitingPhoneNumber if await_configured_phone => {
				await_configured_phone = false;
				let wait = coordinator.timeouts().authorization;
				match tokio::time::timeout(wait, states.changed()).await {
					Ok(Ok(())) => {}
					Ok(Err(_)) => bail!("Session stopped before authorization completed"),
					Err(_) => eprintln!("Configured phone number was not accepted"),
				}
			}
			SessionState::AwaitingPhoneNumber => {
				let phone = prompt(&mut input, "Phone number (international format): ").await?;
				report(coordinator.supply_phone_number(&phone).await)?;
			}
			SessionState::AwaitingCode => {
				let code = prompt(&mut input, "Login code (empty line to resend): ").await?;
				if code.is_empty() {
					report(coordinator.resend_code().await.map(|()| SessionState::AwaitingCode))?;
				} else {
					report(coordinator.supply_code(&code).await)?;
				}
			}
			SessionState::AwaitingPassword => {
				let password = prompt(&mut input, "Two-factor password: ").await?;
				report(coordinator.supply_password(&password).await)?;
			}
			_ => {
				if states.changed().await.is_err() {
					bail!("Session stopped before authorization completed");
				}
			}
		}
	}

	let me = coordinator
		.call(methods::GET_ME, json!({}), None)
		.await
		.context("Authorized, but getMe failed")?;
	let name = [&me["first_name"], &me["last_name"]]
		.iter()
		.filter_map(|part| part.as_str())
		.filter(|part| !part.is_empty())
		.collect::<Vec<_>>()
		.join(" ");
	println!("Logged in as {name} (id {})", me["id"]);
	Ok(())
}

async fn prompt<R>(input: &mut Lines<R>, label: &str) -> anyhow::Result<String>
where
	R: AsyncBufRead + Unpin,
{
	let mut stdout = tokio::io::stdout();
	stdout.write_all(label.as_bytes()).await?;
	stdout.flush().await?;

	let line = input
		.next_line()
		.await
		.context("Failed to read from stdin")?
		.context("stdin closed")?;
	Ok(line.trim().to_string())
}

/// Lets remote rejections through as a message so the prompt repeats.
fn report(outcome: tg_runtime::Result<SessionState>) -> anyhow::Result<()> {
	match outcome {
		Ok(_) => Ok(()),
		Err(SessionError::Remote { error, .. }) => {
			eprintln!("Rejected: {} ({})", error.message, error.code);
			Ok(())
		}
		Err(SessionError::InvalidState { .. }) => Ok(()),
		Err(e) => Err(e.into()),
	}
}
