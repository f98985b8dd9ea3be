//! Engine method names used by the coordinator.
//!
//! Methods listed in [`BOOTSTRAP`] drive the authorization handshake and are
//! issued without waiting for the session to become ready.

pub const SET_TDLIB_PARAMETERS: &str = "setTdlibParameters";
pub const CHECK_DATABASE_ENCRYPTION_KEY: &str = "checkDatabaseEncryptionKey";
pub const SET_AUTHENTICATION_PHONE_NUMBER: &str = "setAuthenticationPhoneNumber";
pub const CHECK_AUTHENTICATION_CODE: &str = "checkAuthenticationCode";
pub const CHECK_AUTHENTICATION_PASSWORD: &str = "checkAuthenticationPassword";
pub const RESEND_AUTHENTICATION_CODE: &str = "resendAuthenticationCode";
pub const GET_AUTHORIZATION_STATE: &str = "getAuthorizationState";
pub const SET_LOG_VERBOSITY_LEVEL: &str = "setLogVerbosityLevel";
pub const LOG_OUT: &str = "logOut";
pub const CLOSE: &str = "close";

pub const GET_ME: &str = "getMe";
pub const GET_CHATS: &str = "getChats";
pub const SEND_MESSAGE: &str = "sendMessage";

/// Methods exempt from the readiness gate.
pub const BOOTSTRAP: &[&str] = &[
	SET_TDLIB_PARAMETERS,
	CHECK_DATABASE_ENCRYPTION_KEY,
	SET_AUTHENTICATION_PHONE_NUMBER,
	CHECK_AUTHENTICATION_CODE,
	CHECK_AUTHENTICATION_PASSWORD,
	RESEND_AUTHENTICATION_CODE,
	GET_AUTHORIZATION_STATE,
	SET_LOG_VERBOSITY_LEVEL,
	LOG_OUT,
	CLOSE,
];

pub fn is_bootstrap(method: &str) -> bool {
	BOOTSTRAP.contains(&method)
}
