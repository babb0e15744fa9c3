
#[macro_use] extern crate log;
#[macro_use] extern crate invoicesd_log;

use std::io;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;

use invoicesd::{error, Config, Daemon};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
	/// path to the configuration file
	#[arg(long, short = 'C', global = true)]
	config: Option<PathBuf>,
	#[command(subcommand)]
	command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
	/// Run the daemon.
	#[command()]
	Start,
	/// Print the effective configuration.
	#[command()]
	Config,
}

#[tokio::main]
async fn main() {
	if let Err(e) = inner_main().await {
		eprintln!("An error occurred: {}", e);
		eprintln!("");
		eprintln!("{:?}", e);
		process::exit(error::setup_error(&e).map(|e| e.exit_code()).unwrap_or(1));
	}
}

fn init_logging() {
	let res = fern::Dispatch::new()
		.level(log::LevelFilter::Trace)
		.level_for("rusqlite", log::LevelFilter::Warn)
		.level_for("tokio", log::LevelFilter::Warn)
		.format(|out, msg, rec| {
			let now = chrono::Local::now();
			let stamp = now.format("%Y-%m-%d %H:%M:%S.%3f");
			out.finish(format_args!(
				"[{} {: >5} {}] {}",
				stamp, rec.level(), rec.module_path().unwrap_or(""), msg,
			))
		})
		.chain(std::io::stdout())
		.apply();
	if let Err(e) = res {
		eprintln!("error setting up logging: {}", e);
	}
}

async fn inner_main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let cfg = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

	match cli.command {
		Command::Config => {
			cfg.write_into(&mut io::stdout())?;
		},
		Command::Start => {
			init_logging();
			run(cfg).await?;
		},
	}

	Ok(())
}

async fn run(cfg: Config) -> anyhow::Result<()> {
	let daemon = Daemon::open(cfg).context("failed to open daemon")?;
	daemon.start();

	let tasks = daemon.tasks();
	tokio::select! {
		res = tokio::signal::ctrl_c() => {
			res.context("failed to listen for ctrl-c")?;
			info!("Received ctrl-c, shutting down...");
		},
		_ = tasks.shutdown_signal() => {
			warn!("A background task stopped, shutting down...");
		},
	}

	tasks.shutdown_wait().await;
	slog!(DaemonTerminated);
	Ok(())
}
