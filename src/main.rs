use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::io::Write;

mod cli;

use cli::Cli;
use tokio_util::sync::CancellationToken;
use upkeep::config::{AppConfig, ConfigWatcher, watch::DEFAULT_POLL_PERIOD};
use upkeep::process::CommandLauncher;
use upkeep::supervisor::{SupervisorConfig, SupervisorLoop};
use upkeep::{setup, shutdown};

fn setup_logging(cli: &Cli) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(filter) = cli.log_filter() {
        builder.parse_filters(filter);
    }

    builder
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "[upkeep] {} {:<5} {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        })
        .init();
}

async fn run_application(cli: &Cli, cancel: CancellationToken) -> Result<()> {
    info!("Starting upkeep {}", env!("CARGO_PKG_VERSION"));

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let (file_config, config_path) =
        AppConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let prepared = setup::prepare(file_config, &cli.setup_options(), &cancel)
        .await
        .context("Setup failed")?;
    info!("Prepared {}", prepared.app);

    let config = SupervisorConfig::with_update_interval(cli.update_interval);
    let mut supervisor = SupervisorLoop::new(prepared.app, CommandLauncher::new(), prepared.tracker, cancel.clone())
        .with_config(config);

    if cli.watch_config {
        let watcher = ConfigWatcher::new(&config_path, DEFAULT_POLL_PERIOD).with_overrides(prepared.overrides);
        let (updates, _watcher_task) = watcher.spawn(prepared.config, cancel.clone());
        supervisor = supervisor.with_config_updates(updates);
    }

    supervisor.run().await.context("Supervisor stopped")
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(&cli);

    let cancel = CancellationToken::new();
    let listener = shutdown::spawn_listener(cancel.clone());

    let result = run_application(&cli, cancel.clone()).await;
    cancel.cancel();
    let _ = listener.await;

    if let Err(e) = result {
        eprintln!("{} {:?}", "Fatal:".red().bold(), e);
        std::process::exit(1);
    }
    info!("Shut down cleanly");
}
