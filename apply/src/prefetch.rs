//! The small structured file the prefetch stage drops inside
//! `paths.dir`, read once at startup (spec.md §3, §6).

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use utils::lsn::Lsn;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSystem {
    pub system_identifier: u64,
    pub timeline: u32,
    #[serde(default)]
    pub xlogpos: Lsn,
    pub wal_segment_size: u32,
}

pub fn read_source_system(path: &Path) -> anyhow::Result<SourceSystem> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading prefetch context file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parsing prefetch context file {}", path.display()))
}
