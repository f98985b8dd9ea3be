use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::testing::{FakeClient, FakeClientConfig, TEST_USER_ID};

const API_ID: i32 = 94575;
const API_HASH: &str = "a3406de8d171bb422bb6ddf3bbd800e2";

fn session_config(dir: &TempDir) -> SessionConfig {
	SessionConfig::new(Credentials::new(API_ID, API_HASH))
		.with_directories(dir.path().join("db"), dir.path().join("files"))
}

fn start(config: SessionConfig, fake: FakeClientConfig) -> (Arc<Coordinator>, FakeClient) {
	let (client, parts) = FakeClient::spawn(fake);
	let coordinator = Coordinator::initialize(config, parts).expect("coordinator starts");
	(coordinator, client)
}

async fn wait_for_state(coordinator: &Coordinator, expected: SessionState) {
	let mut state_rx = coordinator.subscribe_state();
	let reached = tokio::time::timeout(
		Duration::from_secs(5),
		state_rx.wait_for(|state| *state == expected),
	)
	.await;
	assert!(
		matches!(reached, Ok(Ok(_))),
		"state {expected} not reached, stuck in {}",
		coordinator.current_state()
	);
}

async fn wait_for_pending(coordinator: &Coordinator, count: usize) {
	for _ in 0..200 {
		if coordinator.health().pending_calls == count {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("expected {count} pending calls, found {}", coordinator.health().pending_calls);
}

#[tokio::test]
async fn test_missing_identity_is_a_configuration_error() {
	let dir = TempDir::new().unwrap();
	let config = SessionConfig::new(Credentials::default())
		.with_directories(dir.path().join("db"), dir.path().join("files"));
	let (_client, parts) = FakeClient::spawn(FakeClientConfig::default());

	let err = Coordinator::initialize(config, parts).err().expect("must fail");
	assert_eq!(err.tag(), "configuration_error");
	assert!(!dir.path().join("db").exists());
}

#[tokio::test]
async fn test_initialize_runs_setup_and_creates_directories() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(session_config(&dir), FakeClientConfig::default());

	wait_for_state(&coordinator, SessionState::AwaitingPhoneNumber).await;

	assert!(dir.path().join("db").is_dir());
	assert!(dir.path().join("files").is_dir());

	let requests = client.requests();
	assert_eq!(requests[0]["@type"], methods::SET_TDLIB_PARAMETERS);
	assert_eq!(requests[0]["api_id"], API_ID);
	assert_eq!(requests[0]["device_model"], "API Server");
	assert_eq!(client.request_count(methods::CHECK_DATABASE_ENCRYPTION_KEY), 1);
	assert!(!coordinator.is_ready());
}

#[tokio::test]
async fn test_plain_login_reaches_ready() {
	let dir = TempDir::new().unwrap();
	let (coordinator, _client) = start(session_config(&dir), FakeClientConfig::default());
	wait_for_state(&coordinator, SessionState::AwaitingPhoneNumber).await;

	let state = coordinator.supply_phone_number("+15551234567").await.unwrap();
	assert_eq!(state, SessionState::AwaitingCode);

	let state = coordinator.supply_code("12345").await.unwrap();
	assert_eq!(state, SessionState::Ready);
	assert!(coordinator.is_ready());

	let me = coordinator
		.call(methods::GET_ME, json!({}), Some(Duration::from_secs(5)))
		.await
		.unwrap();
	assert_eq!(me["id"], TEST_USER_ID);
	assert_eq!(me["phone_number"], "+15551234567");

	let credentials = coordinator.credentials();
	assert_eq!(credentials.phone_number.as_deref(), Some("+15551234567"));
	assert_eq!(credentials.code.as_deref(), Some("12345"));
}

#[tokio::test]
async fn test_two_factor_login_requires_password() {
	let dir = TempDir::new().unwrap();
	let (coordinator, _client) = start(
		session_config(&dir),
		FakeClientConfig::default().with_password("secret"),
	);
	wait_for_state(&coordinator, SessionState::AwaitingPhoneNumber).await;

	coordinator.supply_phone_number("+15551234567").await.unwrap();
	let state = coordinator.supply_code("12345").await.unwrap();
	assert_eq!(state, SessionState::AwaitingPassword);

	let err = coordinator.supply_password("wrong").await.unwrap_err();
	assert_eq!(err.remote().unwrap().message, "PASSWORD_HASH_INVALID");
	assert_eq!(coordinator.current_state(), SessionState::AwaitingPassword);

	let state = coordinator.supply_password("secret").await.unwrap();
	assert_eq!(state, SessionState::Ready);
}

#[tokio::test]
async fn test_configured_phone_number_is_submitted() {
	let dir = TempDir::new().unwrap();
	let mut config = session_config(&dir);
	config.credentials = config.credentials.with_phone_number("+15551234567");
	let (coordinator, client) = start(config, FakeClientConfig::default());

	wait_for_state(&coordinator, SessionState::AwaitingCode).await;
	assert_eq!(client.request_count(methods::SET_AUTHENTICATION_PHONE_NUMBER), 1);
}

#[tokio::test]
async fn test_supply_in_wrong_state_has_no_side_effect() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(session_config(&dir), FakeClientConfig::default());
	wait_for_state(&coordinator, SessionState::AwaitingPhoneNumber).await;

	let err = coordinator.supply_code("12345").await.unwrap_err();
	assert!(matches!(
		err,
		Error::InvalidState {
			operation: "supply_code",
			state: SessionState::AwaitingPhoneNumber
		}
	));
	assert!(coordinator.supply_password("secret").await.is_err());
	assert!(coordinator.resend_code().await.is_err());

	assert_eq!(client.request_count(methods::CHECK_AUTHENTICATION_CODE), 0);
	assert_eq!(client.request_count(methods::CHECK_AUTHENTICATION_PASSWORD), 0);
	assert_eq!(coordinator.current_state(), SessionState::AwaitingPhoneNumber);
	assert!(coordinator.credentials().code.is_none());
}

#[tokio::test]
async fn test_invalid_code_can_be_retried_in_place() {
	let dir = TempDir::new().unwrap();
	let (coordinator, _client) = start(session_config(&dir), FakeClientConfig::default());
	wait_for_state(&coordinator, SessionState::AwaitingPhoneNumber).await;
	coordinator.supply_phone_number("+15551234567").await.unwrap();

	let err = coordinator.supply_code("00000").await.unwrap_err();
	let remote = err.remote().expect("remote rejection");
	assert_eq!(remote.code, 400);
	assert_eq!(remote.message, "PHONE_CODE_INVALID");
	assert_eq!(coordinator.current_state(), SessionState::AwaitingCode);

	coordinator.resend_code().await.unwrap();
	assert_eq!(coordinator.supply_code("12345").await.unwrap(), SessionState::Ready);
}

#[tokio::test]
async fn test_calls_issued_before_ready_resolve_once_ready() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(session_config(&dir), FakeClientConfig::default());
	wait_for_state(&coordinator, SessionState::AwaitingPhoneNumber).await;

	let mut callers = Vec::new();
	for _ in 0..3 {
		let coordinator = coordinator.clone();
		callers.push(tokio::spawn(async move {
			coordinator
				.call(methods::GET_ME, json!({}), Some(Duration::from_secs(30)))
				.await
		}));
	}

	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(client.request_count(methods::GET_ME), 0);

	coordinator.supply_phone_number("+15551234567").await.unwrap();
	coordinator.supply_code("12345").await.unwrap();

	for caller in callers {
		assert_eq!(caller.await.unwrap().unwrap()["id"], TEST_USER_ID);
	}
	assert_eq!(client.request_count(methods::GET_ME), 3);
}

#[tokio::test(start_paused = true)]
async fn test_call_before_ready_fails_after_its_timeout() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(session_config(&dir), FakeClientConfig::default());
	wait_for_state(&coordinator, SessionState::AwaitingPhoneNumber).await;

	let started = Instant::now();
	let err = coordinator
		.call(methods::GET_CHATS, json!({"limit": 10}), Some(Duration::from_secs(3)))
		.await
		.unwrap_err();
	let waited = started.elapsed();

	assert!(
		matches!(
			err,
			Error::NotAuthorized {
				state: SessionState::AwaitingPhoneNumber,
				..
			}
		),
		"{err:?}"
	);
	assert!(waited >= Duration::from_secs(3));
	assert!(waited < Duration::from_millis(3100));
	assert_eq!(client.request_count(methods::GET_CHATS), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_times_out_and_is_forgotten() {
	let dir = TempDir::new().unwrap();
	let (coordinator, _client) = start(
		session_config(&dir),
		FakeClientConfig::default()
			.authorized()
			.silent(methods::SEND_MESSAGE),
	);
	wait_for_state(&coordinator, SessionState::Ready).await;

	let started = Instant::now();
	let err = coordinator
		.call(
			methods::SEND_MESSAGE,
			json!({
				"chat_id": 1,
				"input_message_content": {
					"@type": "inputMessageText",
					"text": {"@type": "formattedText", "text": "hello"}
				}
			}),
			Some(Duration::from_secs(5)),
		)
		.await
		.unwrap_err();

	assert!(err.is_timeout(), "{err:?}");
	assert_eq!(started.elapsed(), Duration::from_secs(5));
	assert_eq!(coordinator.health().pending_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(
		session_config(&dir),
		FakeClientConfig::default()
			.authorized()
			.failing(methods::GET_ME, 2)
			.failing(methods::GET_CHATS, 10),
	);
	wait_for_state(&coordinator, SessionState::Ready).await;

	let me = coordinator.call(methods::GET_ME, json!({}), None).await.unwrap();
	assert_eq!(me["id"], TEST_USER_ID);
	assert_eq!(client.request_count(methods::GET_ME), 3);

	let err = coordinator
		.call(methods::GET_CHATS, json!({"limit": 5}), None)
		.await
		.unwrap_err();
	assert_eq!(err.remote().unwrap().code, 500);
	assert_eq!(client.request_count(methods::GET_CHATS), 3);
}

#[tokio::test]
async fn test_permanent_remote_errors_are_not_retried() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(session_config(&dir), FakeClientConfig::default().authorized());
	wait_for_state(&coordinator, SessionState::Ready).await;

	let err = coordinator
		.call("getChatHistory", json!({"chat_id": 1}), None)
		.await
		.unwrap_err();
	assert_eq!(err.tag(), "remote_method_error");
	assert_eq!(client.request_count("getChatHistory"), 1);
}

#[tokio::test]
async fn test_connection_loss_fails_pending_calls_and_later_calls() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(
		session_config(&dir),
		FakeClientConfig::default()
			.authorized()
			.silent(methods::GET_CHATS),
	);
	wait_for_state(&coordinator, SessionState::Ready).await;

	let mut callers = Vec::new();
	for _ in 0..4 {
		let coordinator = coordinator.clone();
		callers.push(tokio::spawn(async move {
			coordinator
				.call(methods::GET_CHATS, json!({"limit": 10}), Some(Duration::from_secs(60)))
				.await
		}));
	}
	wait_for_pending(&coordinator, 4).await;

	client.disconnect();

	for caller in callers {
		let err = caller.await.unwrap().unwrap_err();
		assert!(err.is_connection_lost(), "{err:?}");
	}
	assert_eq!(coordinator.current_state(), SessionState::Closed);

	let started = std::time::Instant::now();
	let err = coordinator
		.call(methods::GET_ME, json!({}), Some(Duration::from_secs(60)))
		.await
		.unwrap_err();
	assert!(err.is_connection_lost());
	assert!(started.elapsed() < Duration::from_secs(1));

	let health = coordinator.health();
	assert!(!health.connected);
	assert!(health.is_degraded());
	assert_eq!(health.pending_calls, 0);
	assert!(health.lost_reason.is_some());
}

#[tokio::test]
async fn test_logout_requires_prior_ready_and_is_idempotent() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(session_config(&dir), FakeClientConfig::default());
	wait_for_state(&coordinator, SessionState::AwaitingPhoneNumber).await;

	let err = coordinator.logout().await.unwrap_err();
	assert_eq!(err.tag(), "invalid_state");
	assert_eq!(client.request_count(methods::LOG_OUT), 0);

	coordinator.supply_phone_number("+15551234567").await.unwrap();
	coordinator.supply_code("12345").await.unwrap();

	let state = coordinator.logout().await.unwrap();
	assert!(state.is_shutting_down(), "logout returned {state}");
	wait_for_state(&coordinator, SessionState::Closed).await;

	assert_eq!(coordinator.logout().await.unwrap(), SessionState::Closed);
	assert_eq!(client.request_count(methods::LOG_OUT), 1);
}

#[tokio::test]
async fn test_logout_waits_for_the_session_to_leave_ready() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(
		session_config(&dir),
		FakeClientConfig::default().authorized().manual_logout(),
	);
	wait_for_state(&coordinator, SessionState::Ready).await;

	let logout = tokio::spawn({
		let coordinator = Arc::clone(&coordinator);
		async move { coordinator.logout().await }
	});

	for _ in 0..200 {
		if client.request_count(methods::LOG_OUT) == 1 {
			break;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	assert_eq!(client.request_count(methods::LOG_OUT), 1);
	wait_for_pending(&coordinator, 0).await;

	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(!logout.is_finished(), "logout returned while still Ready");

	client.set_state(SessionState::LoggingOut);
	let state = logout.await.unwrap().unwrap();
	assert_eq!(state, SessionState::LoggingOut);
}

#[tokio::test]
async fn test_unsolicited_events_are_buffered() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(session_config(&dir), FakeClientConfig::default().authorized());
	wait_for_state(&coordinator, SessionState::Ready).await;

	client.push_frame(json!({"@type": "updateUser", "user": {"id": 3}}));
	client.push_frame(json!({"@type": "updateChatTitle", "chat_id": 9, "title": "x"}));

	let first = coordinator.updates().next().await.unwrap();
	assert_eq!(first.kind, "updateUser");
	let second = coordinator.updates().next().await.unwrap();
	assert_eq!(second.kind, "updateChatTitle");
	assert_eq!(coordinator.health().received_updates, 2);
}

#[tokio::test]
async fn test_backward_edge_from_code_to_phone_number() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(session_config(&dir), FakeClientConfig::default());
	wait_for_state(&coordinator, SessionState::AwaitingPhoneNumber).await;
	coordinator.supply_phone_number("+15551234567").await.unwrap();

	client.set_state(SessionState::AwaitingPhoneNumber);
	wait_for_state(&coordinator, SessionState::AwaitingPhoneNumber).await;

	let state = coordinator.supply_phone_number("+15557654321").await.unwrap();
	assert_eq!(state, SessionState::AwaitingCode);
}

#[tokio::test]
async fn test_shutdown_closes_session() {
	let dir = TempDir::new().unwrap();
	let (coordinator, client) = start(session_config(&dir), FakeClientConfig::default().authorized());
	wait_for_state(&coordinator, SessionState::Ready).await;

	coordinator.shutdown().await;

	assert_eq!(coordinator.current_state(), SessionState::Closed);
	assert_eq!(client.request_count(methods::CLOSE), 1);
	assert!(
		coordinator
			.call(methods::GET_ME, json!({}), None)
			.await
			.unwrap_err()
			.is_connection_lost()
	);
}
