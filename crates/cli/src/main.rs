use clap::Parser;
use tg_gateway::cli::Cli;
use tg_gateway::{commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::run(cli).await {
		eprintln!("Error: {err:#}");
		std::process::exit(1);
	}
}
