//! The real `TargetConnection`: a long-lived `postgres::Client` in
//! multi-statement mode, with the replication origin functions called
//! as plain SQL (spec.md §4.6, §9).
//!
//! A stock crates.io `postgres` client is enough here -- unlike the
//! upstream walreceiver, which needs the neondatabase `rust-postgres`
//! fork's physical-replication extensions, the apply engine only ever
//! issues ordinary statements and calls to `pg_replication_origin_*`
//! functions.

use postgres::{Client, NoTls};

use crate::error::OriginError;
use crate::replay::TargetConnection;
use utils::lsn::Lsn;

pub struct PgTargetConnection {
    client: Client,
}

impl PgTargetConnection {
    /// Opens the long-lived connection and puts it in multi-statement
    /// mode. The connection is never closed between transactions --
    /// callers issue the literal `COMMIT` text instead of a driver
    /// commit helper that would tear the session down.
    pub fn connect(target_uri: &str) -> anyhow::Result<Self> {
        let client = Client::connect(target_uri, NoTls)?;
        Ok(PgTargetConnection { client })
    }

    /// One-time setup at engine start (spec.md §4.6): resolve the
    /// origin's oid (fatal if it does not exist), read back its durably
    /// flushed progress, and bind the session to it.
    pub fn setup_replication_origin(&mut self, origin: &str) -> Result<Lsn, OriginError> {
        let oid = self.origin_oid(origin)?;
        if oid == 0 {
            return Err(OriginError::NotFound(origin.to_string()));
        }
        let previous_lsn = self.origin_progress(origin, true)?;
        self.origin_session_setup(origin)?;
        Ok(previous_lsn)
    }
}

impl TargetConnection for PgTargetConnection {
    fn begin(&mut self) -> anyhow::Result<()> {
        self.client.batch_execute("BEGIN")?;
        Ok(())
    }

    fn execute_raw(&mut self, sql: &str) -> anyhow::Result<()> {
        self.client.batch_execute(sql)?;
        Ok(())
    }

    fn commit_literal(&mut self) -> anyhow::Result<()> {
        self.client.batch_execute("COMMIT")?;
        Ok(())
    }

    fn origin_oid(&mut self, name: &str) -> Result<u32, OriginError> {
        let row = self
            .client
            .query_one("SELECT pg_replication_origin_oid($1)", &[&name])
            .map_err(|source| OriginError::Oid {
                name: name.to_string(),
                source,
            })?;
        let oid: Option<u32> = row.get(0);
        Ok(oid.unwrap_or(0))
    }

    fn origin_progress(&mut self, name: &str, flush: bool) -> Result<Lsn, OriginError> {
        let row = self
            .client
            .query_one(
                "SELECT pg_replication_origin_progress($1, $2)::text",
                &[&name, &flush],
            )
            .map_err(|source| OriginError::Progress {
                name: name.to_string(),
                source,
            })?;
        let lsn_text: Option<String> = row.get(0);
        Ok(lsn_text
            .and_then(|s| s.parse().ok())
            .unwrap_or(Lsn::INVALID))
    }

    fn origin_session_setup(&mut self, name: &str) -> Result<(), OriginError> {
        self.client
            .execute("SELECT pg_replication_origin_session_setup($1)", &[&name])
            .map_err(|source| OriginError::SessionSetup {
                name: name.to_string(),
                source,
            })?;
        Ok(())
    }

    fn origin_xact_setup(&mut self, name: &str, lsn: Lsn, timestamp: &str) -> Result<(), OriginError> {
        self.client
            .execute(
                "SELECT pg_replication_origin_xact_setup($1::pg_lsn, $2::timestamptz)",
                &[&lsn.to_string(), &timestamp],
            )
            .map_err(|source| OriginError::XactSetup {
                name: name.to_string(),
                lsn,
                source,
            })?;
        Ok(())
    }
}
