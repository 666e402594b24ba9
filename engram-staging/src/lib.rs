//! Engram Staging - the staged-write pipeline
//!
//! Untrusted agent writes land as proposal commits and advance through a
//! compare-and-set state machine (PENDING → APPLYING → APPROVED | REJECTED,
//! with AUTO_STASHED for risky proposals). This crate owns the risk checks
//! (duplicates, identity invariants, PII), the conflict stash, write-time
//! conflict classification, and the trust guardrails behind auto-merge.

mod conflict;
mod invariants;
mod staging_store;
mod trust;

pub use conflict::{resolve_write_conflict, WriteConflictResolution};
pub use invariants::InvariantEngine;
pub use staging_store::StagingStore;
pub use trust::auto_merge_allowed;
