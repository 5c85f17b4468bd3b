//! Classifies a line of a prefetch SQL file into an [`Action`], parsing
//! the embedded JSON metadata for control lines.

use serde::Deserialize;

use crate::error::ParseError;
use utils::lsn::Lsn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Begin,
    Commit,
    Switch,
    Keepalive,
    Insert,
    Update,
    Delete,
    Truncate,
    Unknown,
}

/// Parsed from the JSON object embedded in a `BEGIN`/`COMMIT`/`SWITCH
/// WAL`/`KEEPALIVE` control line.
#[derive(Debug, Clone)]
pub struct LogicalMessageMetadata {
    pub action: Action,
    pub xid: Option<u64>,
    pub lsn: Lsn,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    xid: Option<u64>,
    lsn: String,
    #[serde(default)]
    timestamp: Option<String>,
}

const BEGIN_PREFIX: &str = "BEGIN ";
const COMMIT_PREFIX: &str = "COMMIT ";
const SWITCH_PREFIX: &str = "SWITCH WAL ";
const KEEPALIVE_PREFIX: &str = "KEEPALIVE ";

/// Classify one line of a prefetch SQL file.
///
/// Control lines (`BEGIN`/`COMMIT`/`SWITCH WAL`/`KEEPALIVE`) each strip
/// *their own* prefix before handing the remainder to `serde_json` --
/// not the length of the `BEGIN` prefix, which is the ambiguity spec.md
/// §4.1/§9 calls out in the original implementation this was distilled
/// from.
pub fn parse_action(
    line: &str,
) -> Result<(Action, Option<LogicalMessageMetadata>), ParseError> {
    if line.is_empty() {
        return Ok((Action::Unknown, None));
    }

    if let Some(rest) = line.strip_prefix(BEGIN_PREFIX) {
        return parse_control(Action::Begin, BEGIN_PREFIX, rest);
    }
    if let Some(rest) = line.strip_prefix(COMMIT_PREFIX) {
        return parse_control(Action::Commit, COMMIT_PREFIX, rest);
    }
    if let Some(rest) = line.strip_prefix(SWITCH_PREFIX) {
        return parse_control(Action::Switch, SWITCH_PREFIX, rest);
    }
    if let Some(rest) = line.strip_prefix(KEEPALIVE_PREFIX) {
        return parse_control(Action::Keepalive, KEEPALIVE_PREFIX, rest);
    }

    if let Some(action) = dml_action(line) {
        return Ok((action, None));
    }

    Ok((Action::Unknown, None))
}

fn parse_control(
    action: Action,
    prefix: &'static str,
    json: &str,
) -> Result<(Action, Option<LogicalMessageMetadata>), ParseError> {
    let raw: RawMetadata =
        serde_json::from_str(json).map_err(|source| ParseError::MalformedMetadata {
            prefix,
            source,
        })?;
    let lsn = raw
        .lsn
        .parse()
        .map_err(|_| ParseError::InvalidLsn { action })?;
    Ok((
        action,
        Some(LogicalMessageMetadata {
            action,
            xid: raw.xid,
            lsn,
            timestamp: raw.timestamp.unwrap_or_default(),
        }),
    ))
}

fn dml_action(line: &str) -> Option<Action> {
    if line.contains("INSERT INTO") {
        Some(Action::Insert)
    } else if line.contains("UPDATE ") {
        Some(Action::Update)
    } else if line.contains("DELETE FROM ") {
        Some(Action::Delete)
    } else if line.contains("TRUNCATE ") {
        Some(Action::Truncate)
    } else {
        None
    }
}
