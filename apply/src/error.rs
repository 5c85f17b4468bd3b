//! Error types for the parts of the engine where the caller needs to
//! distinguish *why* something failed, not just propagate `anyhow`.
//!
//! Everything fatal per spec.md §7 ("unparseable control JSON, unknown
//! action on a non-empty line, SWITCH not last, missing required
//! metadata fields, any target-SQL execution failure, any
//! origin-function failure") surfaces through one of these two enums;
//! `ApplyLoop` and `main` wrap them in `anyhow::Context` to attach the
//! file and line number at the point of failure.

use utils::lsn::Lsn;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed control-line JSON in {prefix:?} line: {source}")]
    MalformedMetadata {
        prefix: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{action:?} line is missing required field {field}")]
    MissingField {
        action: crate::action::Action,
        field: &'static str,
    },

    #[error("{action:?} line has an unparseable lsn field")]
    InvalidLsn { action: crate::action::Action },

    #[error("SWITCH WAL line found before end of file")]
    SwitchNotLast,

    #[error("line could not be classified as any known action: {0:?}")]
    UnknownAction(String),
}

#[derive(Debug, thiserror::Error)]
pub enum OriginError {
    #[error("replication origin {0:?} does not exist on the target; it must be provisioned before apply starts")]
    NotFound(String),

    #[error("failed to resolve replication origin oid for {name:?}: {source}")]
    Oid {
        name: String,
        #[source]
        source: postgres::Error,
    },

    #[error("failed to read replication origin progress for {name:?}: {source}")]
    Progress {
        name: String,
        #[source]
        source: postgres::Error,
    },

    #[error("failed to set up replication origin session for {name:?}: {source}")]
    SessionSetup {
        name: String,
        #[source]
        source: postgres::Error,
    },

    #[error("failed to set up replication origin transaction at lsn {lsn} for {name:?}: {source}")]
    XactSetup {
        name: String,
        lsn: Lsn,
        #[source]
        source: postgres::Error,
    },
}
