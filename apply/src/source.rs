//! The real `SentinelQuery`: a short-lived connection to the source
//! database opened fresh for every poll (spec.md §4.3).

use anyhow::Context;
use postgres::{Client, NoTls};

use crate::sentinel::{Sentinel, SentinelQuery};
use utils::lsn::Lsn;

/// Queries a `pgcopydb.sentinel`-style control row: one logical row
/// carrying `startpos`, `endpos`, and `apply`.
pub struct PgSentinelClient {
    source_uri: String,
}

impl PgSentinelClient {
    pub fn new(source_uri: impl Into<String>) -> Self {
        PgSentinelClient {
            source_uri: source_uri.into(),
        }
    }

    fn connect(&self) -> anyhow::Result<Client> {
        Client::connect(&self.source_uri, NoTls).context("connecting to source sentinel")
    }

    fn row_to_sentinel(row: &postgres::Row) -> anyhow::Result<Sentinel> {
        let startpos: String = row.try_get("startpos")?;
        let endpos: String = row.try_get("endpos")?;
        let apply: bool = row.try_get("apply")?;
        Ok(Sentinel {
            startpos: startpos.parse().context("parsing sentinel startpos")?,
            endpos: endpos.parse().context("parsing sentinel endpos")?,
            apply,
        })
    }
}

impl SentinelQuery for PgSentinelClient {
    fn get_sentinel(&mut self) -> anyhow::Result<Sentinel> {
        let mut client = self.connect()?;
        let row = client.query_one(
            "SELECT startpos::text, endpos::text, apply FROM pgcopydb.sentinel",
            &[],
        )?;
        Self::row_to_sentinel(&row)
    }

    fn sync_apply(&mut self, previous_lsn: Lsn) -> anyhow::Result<Sentinel> {
        let mut client = self.connect()?;
        let row = client.query_one(
            "SELECT startpos::text, endpos::text, apply \
             FROM pgcopydb.sync_apply($1::pg_lsn)",
            &[&previous_lsn.to_string()],
        )?;
        Self::row_to_sentinel(&row)
    }
}
