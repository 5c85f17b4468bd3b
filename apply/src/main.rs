use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use cdc_apply::config::{Cli, Config};
use cdc_apply::prefetch::read_source_system;
use cdc_apply::replay::ApplyContext;
use cdc_apply::sentinel::SentinelCoordinator;
use cdc_apply::source::PgSentinelClient;
use cdc_apply::target::PgTargetConnection;
use cdc_apply::wal_segment::CDCPaths;
use utils::signals::ShutdownFlags;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    utils::logging::init(config.default_log_filter());

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("apply engine exited with a fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> anyhow::Result<()> {
    let shutdown = ShutdownFlags::install()?;

    let context_path = config.dir.join("context.json");
    let system = read_source_system(&context_path)?;

    let mut target = PgTargetConnection::connect(&config.target_uri)?;
    let previous_lsn = target.setup_replication_origin(&config.origin)?;
    info!(origin = %config.origin, previous_lsn = %previous_lsn, "replication origin ready");

    let mut context = ApplyContext::new(
        system.system_identifier,
        system.timeline,
        system.wal_segment_size,
        CDCPaths::new(&config.dir),
        config.origin.clone(),
        previous_lsn,
    );

    let mut sentinel = SentinelCoordinator::new(
        PgSentinelClient::new(config.source_uri.clone()),
        config.poll_interval,
    );

    context.cli_endpos = config.cli_endpos;
    if let Some(cli_endpos) = config.cli_endpos {
        // Direct mode never talks to the sentinel, so nothing will call
        // `adopt_sentinel_snapshot` to pick this up before the first file;
        // prefetch mode's `wait_for_enable` will apply the same
        // precedence once it hears from the sentinel.
        context.endpos = cli_endpos;
    }

    cdc_apply::apply_loop::run(
        &mut context,
        &mut target,
        config.mode,
        &mut sentinel,
        &shutdown,
        config.poll_interval,
    )
}
