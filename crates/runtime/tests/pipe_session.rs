//! Coordinator over a real length-prefixed pipe.

use std::time::Duration;

use serde_json::{Value, json};
use tg_runtime::{Coordinator, Credentials, PipeTransport, SessionConfig, SessionState};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Option<Value> {
	let mut len_buf = [0u8; 4];
	reader.read_exact(&mut len_buf).await.ok()?;
	let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
	reader.read_exact(&mut body).await.ok()?;
	serde_json::from_slice(&body).ok()
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: Value) {
	let bytes = serde_json::to_vec(&frame).unwrap();
	writer
		.write_all(&(bytes.len() as u32).to_le_bytes())
		.await
		.unwrap();
	writer.write_all(&bytes).await.unwrap();
	writer.flush().await.unwrap();
}

fn authorization(name: &str) -> Value {
	json!({"@type": "updateAuthorizationState", "authorization_state": {"@type": name}})
}

/// Minimal engine for an already authorized account. Exits when its stdin closes.
async fn scripted_engine(mut stdin: DuplexStream, mut stdout: DuplexStream) {
	write_frame(&mut stdout, authorization("authorizationStateWaitTdlibParameters")).await;

	while let Some(request) = read_frame(&mut stdin).await {
		let extra = request["@extra"].clone();
		match request["@type"].as_str() {
			Some("setTdlibParameters") => {
				write_frame(&mut stdout, json!({"@type": "ok", "@extra": extra})).await;
				write_frame(&mut stdout, authorization("authorizationStateWaitEncryptionKey")).await;
			}
			Some("checkDatabaseEncryptionKey") => {
				write_frame(&mut stdout, json!({"@type": "ok", "@extra": extra})).await;
				write_frame(&mut stdout, json!({"@type": "updateOption", "name": "version"})).await;
				write_frame(&mut stdout, authorization("authorizationStateReady")).await;
			}
			Some("getMe") => {
				write_frame(
					&mut stdout,
					json!({"@type": "user", "id": 42, "first_name": "Pipe", "@extra": extra}),
				)
				.await;
			}
			Some("crash") => return,
			_ => {
				write_frame(
					&mut stdout,
					json!({"@type": "error", "code": 400, "message": "Unknown method", "@extra": extra}),
				)
				.await;
			}
		}
	}
}

fn start() -> (std::sync::Arc<Coordinator>, tempfile::TempDir) {
	let dir = tempfile::tempdir().unwrap();
	let (engine_stdin, our_stdin) = tokio::io::duplex(64 * 1024);
	let (our_stdout, engine_stdout) = tokio::io::duplex(64 * 1024);
	tokio::spawn(scripted_engine(engine_stdin, engine_stdout));

	let (transport, message_rx) = PipeTransport::new(our_stdin, our_stdout);
	let config = SessionConfig::new(Credentials::new(94575, "a3406de8d171bb422bb6ddf3bbd800e2"))
		.with_directories(dir.path().join("db"), dir.path().join("files"));
	let coordinator =
		Coordinator::initialize(config, transport.into_transport_parts(message_rx)).unwrap();
	(coordinator, dir)
}

#[tokio::test]
async fn persisted_session_becomes_ready_over_pipe() {
	let (coordinator, _dir) = start();

	coordinator
		.wait_until_ready(Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(coordinator.current_state(), SessionState::Ready);

	let me = coordinator.call("getMe", json!({}), None).await.unwrap();
	assert_eq!(me["first_name"], "Pipe");

	let err = coordinator
		.call("getStory", json!({}), None)
		.await
		.unwrap_err();
	assert_eq!(err.remote().unwrap().message, "Unknown method");

	let event = coordinator.updates().next().await.unwrap();
	assert_eq!(event.kind, "updateOption");
}

#[tokio::test]
async fn engine_exit_is_reported_as_connection_loss() {
	let (coordinator, _dir) = start();
	coordinator
		.wait_until_ready(Duration::from_secs(5))
		.await
		.unwrap();

	let err = coordinator
		.call("crash", json!({}), Some(Duration::from_secs(30)))
		.await
		.unwrap_err();
	assert!(err.is_connection_lost(), "{err:?}");

	assert_eq!(coordinator.current_state(), SessionState::Closed);
	let health = coordinator.health();
	assert!(!health.connected);
}
