//! Maps an LSN to the path of the SQL file holding the WAL segment that
//! contains it. Deterministic and idempotent: a pure function of
//! `(previous_lsn, timeline, wal_segment_size, dir)`, recomputed
//! whenever `previous_lsn` changes (spec.md §4.2, §9).

use std::path::PathBuf;

use utils::lsn::Lsn;

/// On-disk layout of the prefetch output: a directory of
/// `<wal_segment_name>.sql` files.
#[derive(Debug, Clone)]
pub struct CDCPaths {
    pub dir: PathBuf,
}

impl CDCPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CDCPaths { dir: dir.into() }
    }
}

/// The canonical 24-hex-character Postgres WAL segment name for
/// `(timeline, segno)`.
pub fn wal_segment_name(timeline: u32, segno: u64) -> String {
    format!(
        "{:08X}{:08X}{:08X}",
        timeline,
        segno >> 32,
        segno & 0xffff_ffff
    )
}

/// Recompute the SQL file path that contains `previous_lsn`.
pub fn file_name_for(paths: &CDCPaths, previous_lsn: Lsn, timeline: u32, wal_segment_size: u64) -> PathBuf {
    let segno = previous_lsn.segment_number(wal_segment_size);
    let wal = wal_segment_name(timeline, segno);
    paths.dir.join(format!("{wal}.sql"))
}
