//! Parameter block for `setTdlibParameters`.

use serde::{Deserialize, Serialize};

/// Device description reported to Telegram during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
	pub system_language_code: String,
	pub device_model: String,
	pub system_version: String,
	pub application_version: String,
}

impl Default for DeviceInfo {
	fn default() -> Self {
		Self {
			system_language_code: "en".to_string(),
			device_model: "API Server".to_string(),
			system_version: std::env::consts::OS.to_string(),
			application_version: "1.0.0".to_string(),
		}
	}
}

/// Parameters of the initial handshake call.
///
/// Field names match the engine's `setTdlibParameters` object; the device
/// fields are flattened into the same level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TdlibParameters {
	pub use_test_dc: bool,
	pub database_directory: String,
	pub files_directory: String,
	pub database_encryption_key: String,
	pub use_file_database: bool,
	pub use_chat_info_database: bool,
	pub use_message_database: bool,
	pub use_secret_chats: bool,
	pub api_id: i32,
	pub api_hash: String,
	#[serde(flatten)]
	pub device: DeviceInfo,
	pub enable_storage_optimizer: bool,
}
