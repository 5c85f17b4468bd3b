//! CLI surface materializing the flags spec.md §6 describes as
//! "external, not specified here": `--source`, `--target`, `--origin`,
//! `--endpos`, and the mode selector.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use utils::lsn::Lsn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Wait on the sentinel's `apply` flag before replaying anything.
    Prefetch,
    /// Start replaying immediately, skipping the initial wait for the
    /// sentinel's `apply` flag. Progress is still reported to the
    /// sentinel after every file, and its `endpos` still overwrites
    /// `context.endpos` absent a `--endpos` override -- Direct mode
    /// only skips `wait_for_enable`, not ongoing sentinel coordination.
    Direct,
}

/// Replays prefetched logical-change SQL files against a target
/// Postgres, tracking progress through the target's replication origin.
#[derive(Debug, Parser)]
#[command(name = "cdc-apply", version, about)]
pub struct Cli {
    /// Connection string for the source database (sentinel row).
    #[arg(long)]
    pub source_uri: String,

    /// Connection string for the target database.
    #[arg(long)]
    pub target_uri: String,

    /// Name of the replication origin on the target.
    #[arg(long)]
    pub origin: String,

    /// Directory of prefetched `<wal_segment>.sql` files.
    #[arg(long)]
    pub dir: PathBuf,

    /// Explicit stop LSN, overriding the sentinel's `endpos` if both
    /// are set (spec.md §4.6, "End-position precedence").
    #[arg(long)]
    pub endpos: Option<String>,

    #[arg(long, value_enum, default_value_t = Mode::Prefetch)]
    pub mode: Mode,

    /// How long to sleep at each suspension point.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    pub poll_interval: Duration,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub struct Config {
    pub source_uri: String,
    pub target_uri: String,
    pub origin: String,
    pub dir: PathBuf,
    pub cli_endpos: Option<Lsn>,
    pub mode: Mode,
    pub poll_interval: Duration,
    pub verbose: u8,
}

impl Config {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let cli_endpos = cli
            .endpos
            .as_deref()
            .map(|s| s.parse::<Lsn>())
            .transpose()
            .map_err(|_| anyhow::anyhow!("--endpos {:?} is not a valid LSN", cli.endpos))?;

        Ok(Config {
            source_uri: cli.source_uri,
            target_uri: cli.target_uri,
            origin: cli.origin,
            dir: cli.dir,
            cli_endpos,
            mode: cli.mode,
            poll_interval: cli.poll_interval,
            verbose: cli.verbose,
        })
    }

    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
