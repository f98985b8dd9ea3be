//! Session configuration.
//!
//! [`SessionConfig`] carries everything the coordinator needs before the
//! engine starts: the API identity, the directories the engine persists to,
//! device information for the handshake, and the timeout/retry policy for
//! calls. Phone number, code and password may be supplied later through the
//! coordinator; [`Credentials`] keeps whatever has been supplied so far.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tg_protocol::{DeviceInfo, TdlibParameters};

use crate::error::{Error, Result};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// API identity and the secrets supplied during authorization.
#[derive(Clone, Default)]
pub struct Credentials {
	pub api_id: Option<i32>,
	pub api_hash: Option<String>,
	pub phone_number: Option<String>,
	pub code: Option<String>,
	pub password: Option<String>,
}

impl Credentials {
	pub fn new(api_id: i32, api_hash: impl Into<String>) -> Self {
		Self {
			api_id: Some(api_id),
			api_hash: Some(api_hash.into()),
			..Self::default()
		}
	}

	pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
		self.phone_number = Some(phone_number.into());
		self
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fn redact(value: &Option<String>) -> &'static str {
			if value.is_some() { "<redacted>" } else { "<unset>" }
		}

		f.debug_struct("Credentials")
			.field("api_id", &self.api_id)
			.field("api_hash", &redact(&self.api_hash))
			.field("phone_number", &self.phone_number)
			.field("code", &redact(&self.code))
			.field("password", &redact(&self.password))
			.finish()
	}
}

/// Per-call timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
	/// Default budget of an ordinary call, including retries.
	pub call: Duration,
	/// How long authorization steps wait for the engine's confirmation.
	pub authorization: Duration,
}

impl Default for Timeouts {
	fn default() -> Self {
		Self {
			call: DEFAULT_CALL_TIMEOUT,
			authorization: DEFAULT_AUTHORIZATION_TIMEOUT,
		}
	}
}

/// Bounded retry for transient failures of ordinary calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts including the first one.
	pub max_attempts: u32,
	/// Backoff before attempt `n + 1` is `backoff * n`.
	pub backoff: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: DEFAULT_MAX_ATTEMPTS,
			backoff: DEFAULT_RETRY_BACKOFF,
		}
	}
}

impl RetryPolicy {
	/// No retries at all.
	pub fn none() -> Self {
		Self {
			max_attempts: 1,
			backoff: Duration::ZERO,
		}
	}

	pub fn backoff_for(&self, attempt: u32) -> Duration {
		self.backoff.saturating_mul(attempt)
	}
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
	pub credentials: Credentials,
	pub database_directory: PathBuf,
	pub files_directory: PathBuf,
	pub encryption_key: String,
	pub use_test_dc: bool,
	pub device: DeviceInfo,
	/// Engine log verbosity sent before the handshake, if set.
	pub log_verbosity: Option<i32>,
	pub timeouts: Timeouts,
	pub retry: RetryPolicy,
}

impl SessionConfig {
	pub fn new(credentials: Credentials) -> Self {
		Self {
			credentials,
			database_directory: PathBuf::from("./td_db"),
			files_directory: PathBuf::from("./td_files"),
			encryption_key: String::new(),
			use_test_dc: false,
			device: DeviceInfo::default(),
			log_verbosity: None,
			timeouts: Timeouts::default(),
			retry: RetryPolicy::default(),
		}
	}

	pub fn with_directories(
		mut self,
		database_directory: impl Into<PathBuf>,
		files_directory: impl Into<PathBuf>,
	) -> Self {
		self.database_directory = database_directory.into();
		self.files_directory = files_directory.into();
		self
	}

	pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
		self.timeouts = timeouts;
		self
	}

	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	/// Checks the fields the engine cannot start without.
	pub fn validate(&self) -> Result<()> {
		match self.credentials.api_id {
			None => return Err(Error::Configuration("api id is not set".to_string())),
			Some(id) if id <= 0 => {
				return Err(Error::Configuration(format!(
					"api id must be positive, got {id}"
				)));
			}
			Some(_) => {}
		}

		match self.credentials.api_hash.as_deref().map(str::trim) {
			None | Some("") => {
				return Err(Error::Configuration("api hash is not set".to_string()));
			}
			Some(_) => {}
		}

		if self.database_directory.as_os_str().is_empty() {
			return Err(Error::Configuration(
				"database directory is empty".to_string(),
			));
		}
		if self.files_directory.as_os_str().is_empty() {
			return Err(Error::Configuration("files directory is empty".to_string()));
		}
		if self.retry.max_attempts == 0 {
			return Err(Error::Configuration(
				"retry policy needs at least one attempt".to_string(),
			));
		}

		Ok(())
	}

	/// Creates the database and files directories.
	pub fn prepare_directories(&self) -> Result<()> {
		for dir in [&self.database_directory, &self.files_directory] {
			std::fs::create_dir_all(dir).map_err(|e| {
				Error::Configuration(format!("cannot create {}: {e}", dir.display()))
			})?;
		}
		Ok(())
	}

	/// Builds the `setTdlibParameters` block. Call after [`validate`](Self::validate).
	pub fn tdlib_parameters(&self) -> Result<TdlibParameters> {
		let api_id = self
			.credentials
			.api_id
			.ok_or_else(|| Error::Configuration("api id is not set".to_string()))?;
		let api_hash = self
			.credentials
			.api_hash
			.clone()
			.ok_or_else(|| Error::Configuration("api hash is not set".to_string()))?;

		Ok(TdlibParameters {
			use_test_dc: self.use_test_dc,
			database_directory: self.database_directory.to_string_lossy().into_owned(),
			files_directory: self.files_directory.to_string_lossy().into_owned(),
			database_encryption_key: self.encryption_key.clone(),
			use_file_database: true,
			use_chat_info_database: true,
			use_message_database: true,
			use_secret_chats: false,
			api_id,
			api_hash,
			device: self.device.clone(),
			enable_storage_optimizer: true,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn valid() -> SessionConfig {
		SessionConfig::new(Credentials::new(94575, "a3406de8d171bb422bb6ddf3bbd800e2"))
	}

	#[test]
	fn valid_config_passes() {
		assert!(valid().validate().is_ok());
	}

	#[test]
	fn missing_identity_is_a_configuration_error() {
		let config = SessionConfig::new(Credentials::default());
		let err = config.validate().unwrap_err();
		assert_eq!(err.tag(), "configuration_error");
		assert!(err.to_string().contains("api id"));

		let mut config = valid();
		config.credentials.api_hash = Some("   ".to_string());
		assert!(config.validate().unwrap_err().to_string().contains("api hash"));

		let mut config = valid();
		config.credentials.api_id = Some(-4);
		assert!(config.validate().is_err());
	}

	#[test]
	fn zero_attempts_rejected() {
		let config = valid().with_retry(RetryPolicy {
			max_attempts: 0,
			backoff: Duration::ZERO,
		});
		assert!(config.validate().is_err());
	}

	#[test]
	fn debug_redacts_secrets() {
		let mut credentials =
			Credentials::new(1, "secret-hash").with_phone_number("+15551234567");
		credentials.password = Some("hunter2".to_string());

		let rendered = format!("{credentials:?}");
		assert!(!rendered.contains("secret-hash"));
		assert!(!rendered.contains("hunter2"));
		assert!(rendered.contains("+15551234567"));
	}

	#[test]
	fn parameters_carry_directories_and_identity() {
		let dir = tempfile::tempdir().unwrap();
		let config = valid().with_directories(dir.path().join("db"), dir.path().join("files"));
		config.prepare_directories().unwrap();
		assert!(dir.path().join("db").is_dir());
		assert!(dir.path().join("files").is_dir());

		let params = config.tdlib_parameters().unwrap();
		assert_eq!(params.api_id, 94575);
		assert!(params.database_directory.ends_with("db"));
		assert!(!params.use_secret_chats);
	}

	#[test]
	fn backoff_grows_linearly() {
		let policy = RetryPolicy::default();
		assert_eq!(policy.backoff_for(1), Duration::from_millis(250));
		assert_eq!(policy.backoff_for(2), Duration::from_millis(500));
	}
}
