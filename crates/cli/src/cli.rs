use std::path::PathBuf;
use std::time::Duration;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};
use tg_protocol::DeviceInfo;
use tg_runtime::{ClientCommand, Credentials, RetryPolicy, SessionConfig, Timeouts};

/// Help output colored like cargo's.
fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.error(AnsiColor::Red.on_default().bold())
}

#[derive(Parser, Debug)]
#[command(name = "tgsession")]
#[command(about = "Telegram client session: HTTP gateway and interactive login")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the HTTP gateway
	Serve(ServeArgs),
	/// Authorize the account interactively, then exit
	Login(LoginArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
	#[command(flatten)]
	pub session: SessionArgs,

	/// Address to listen on
	#[arg(long, env = "GATEWAY_HOST", default_value = "127.0.0.1")]
	pub host: String,

	/// Port to listen on
	#[arg(long, env = "PORT", default_value_t = 8000)]
	pub port: u16,

	/// Require this value in the X-API-KEY header
	#[arg(long, env = "API_KEY", hide_env_values = true)]
	pub api_key: Option<String>,

	/// POST unsolicited updates to this URL
	#[arg(long, env = "WEBHOOK_URL")]
	pub webhook_url: Option<String>,

	/// Only forward events whose kind matches one of these (comma separated)
	#[arg(long, env = "WEBHOOK_EVENTS", value_delimiter = ',')]
	pub webhook_events: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct LoginArgs {
	#[command(flatten)]
	pub session: SessionArgs,
}

/// Settings shared by every command that opens a session.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
	/// Telegram API id from my.telegram.org
	#[arg(long, env = "TELEGRAM_API_ID")]
	pub api_id: Option<i32>,

	/// Telegram API hash from my.telegram.org
	#[arg(long, env = "TELEGRAM_API_HASH", hide_env_values = true)]
	pub api_hash: Option<String>,

	/// Phone number submitted automatically when the engine asks for one
	#[arg(long, env = "TELEGRAM_PHONE")]
	pub phone: Option<String>,

	/// Engine database directory [default: <data dir>/tgsession/td_db]
	#[arg(long, env = "TD_DATABASE_DIRECTORY", value_name = "DIR")]
	pub database_dir: Option<PathBuf>,

	/// Downloaded files directory [default: <data dir>/tgsession/td_files]
	#[arg(long, env = "TD_FILES_DIRECTORY", value_name = "DIR")]
	pub files_dir: Option<PathBuf>,

	/// Key for the engine's local database
	#[arg(long, env = "DATABASE_ENCRYPTION_KEY", hide_env_values = true, default_value = "")]
	pub encryption_key: String,

	/// Command line of the engine helper process
	#[arg(long, env = "TG_CLIENT_COMMAND", default_value = "tdjson-pipe")]
	pub client_command: String,

	/// Engine log verbosity (0-5)
	#[arg(long, env = "TD_LOG_VERBOSITY", default_value_t = 1)]
	pub engine_verbosity: i32,

	/// Use the Telegram test data centers
	#[arg(long)]
	pub test_dc: bool,

	/// System language code reported to Telegram
	#[arg(long, default_value = "en")]
	pub language: String,

	/// Default timeout of an ordinary call, in seconds
	#[arg(long, default_value_t = 10)]
	pub call_timeout: u64,

	/// How long authorization steps wait for confirmation, in seconds
	#[arg(long, default_value_t = 60)]
	pub auth_timeout: u64,

	/// Attempts per call for transient failures
	#[arg(long, default_value_t = 3)]
	pub max_attempts: u32,
}

impl SessionArgs {
	pub fn client_command(&self) -> tg_runtime::Result<ClientCommand> {
		ClientCommand::parse(&self.client_command)
	}

	/// Builds the session configuration. Validation happens when the session starts.
	pub fn session_config(&self) -> SessionConfig {
		let mut credentials = Credentials {
			api_id: self.api_id,
			api_hash: self.api_hash.clone(),
			..Credentials::default()
		};
		if let Some(phone) = &self.phone {
			credentials = credentials.with_phone_number(phone.clone());
		}

		let base = default_data_dir();
		let database_dir = self
			.database_dir
			.clone()
			.unwrap_or_else(|| base.join("td_db"));
		let files_dir = self
			.files_dir
			.clone()
			.unwrap_or_else(|| base.join("td_files"));

		let mut config = SessionConfig::new(credentials)
			.with_directories(database_dir, files_dir)
			.with_timeouts(Timeouts {
				call: Duration::from_secs(self.call_timeout),
				authorization: Duration::from_secs(self.auth_timeout),
			})
			.with_retry(RetryPolicy {
				max_attempts: self.max_attempts,
				..RetryPolicy::default()
			});
		config.encryption_key = self.encryption_key.clone();
		config.use_test_dc = self.test_dc;
		config.log_verbosity = Some(self.engine_verbosity);
		config.device = DeviceInfo {
			system_language_code: self.language.clone(),
			..DeviceInfo::default()
		};
		config
	}
}

fn default_data_dir() -> PathBuf {
	dirs::data_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join("tgsession")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(args: &[&str]) -> Cli {
		Cli::try_parse_from(args).expect("arguments parse")
	}

	#[test]
	fn serve_flags_build_session_config() {
		let cli = parse(&[
			"tgsession",
			"-vv",
			"serve",
			"--api-id",
			"94575",
			"--api-hash",
			"a3406de8d171bb422bb6ddf3bbd800e2",
			"--database-dir",
			"/tmp/tg/db",
			"--files-dir",
			"/tmp/tg/files",
			"--port",
			"9000",
			"--call-timeout",
			"5",
			"--webhook-url",
			"http://127.0.0.1:9100/hook",
			"--webhook-events",
			"message,chat",
		]);
		assert_eq!(cli.verbose, 2);

		let Commands::Serve(args) = cli.command else {
			panic!("expected serve");
		};
		assert_eq!(args.port, 9000);
		assert_eq!(args.webhook_url.as_deref(), Some("http://127.0.0.1:9100/hook"));
		assert_eq!(args.webhook_events, vec!["message", "chat"]);

		let config = args.session.session_config();
		assert_eq!(config.credentials.api_id, Some(94575));
		assert_eq!(config.database_directory, PathBuf::from("/tmp/tg/db"));
		assert_eq!(config.timeouts.call, Duration::from_secs(5));
		assert_eq!(config.timeouts.authorization, Duration::from_secs(60));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn login_uses_default_directories_and_phone() {
		let cli = parse(&[
			"tgsession",
			"login",
			"--api-id",
			"1",
			"--api-hash",
			"x",
			"--phone",
			"+15551234567",
			"--language",
			"pt-br",
		]);
		let Commands::Login(args) = cli.command else {
			panic!("expected login");
		};

		let config = args.session.session_config();
		assert!(config.database_directory.ends_with("tgsession/td_db"));
		assert_eq!(
			config.credentials.phone_number.as_deref(),
			Some("+15551234567")
		);
		assert_eq!(config.device.system_language_code, "pt-br");
	}

	#[test]
	fn client_command_is_split() {
		let cli = parse(&[
			"tgsession",
			"login",
			"--client-command",
			"/opt/td/tdjson-pipe --quiet",
		]);
		let Commands::Login(args) = cli.command else {
			panic!("expected login");
		};
		let command = args.session.client_command().unwrap();
		assert_eq!(command.program, PathBuf::from("/opt/td/tdjson-pipe"));
		assert_eq!(command.args.len(), 1);
	}
}
