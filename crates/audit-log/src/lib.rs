//! Audit Log (C3): the hash-chained, tamper-evident record of every
//! enforcement decision.

mod chain;
mod store;

pub use chain::{compute_own_hash, hash_matches};
pub use store::{
    AppendFields, AuditLog, ExportFormat, Page, SessionFilters, Violation, ViolationKind,
    VerifyReport,
};

pub use reaper_core;
pub use reaper_core::entry::{EntryId, GENESIS_HASH, LogEntry, Outcome, OutcomeStatus, SessionId, SessionSummary};
pub use reaper_core::session::Session;
pub use reaper_core::{ReaperError, Result};
