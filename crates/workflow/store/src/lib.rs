//! Template and Instance Stores for Caseflow
//!
//! Two shared mutable resources back the engine: the template store and
//! the instance store. Both are transactional in-memory maps guarded by
//! read-write locks, with the read-modify-write discipline the engine's
//! invariants require:
//!
//! - at most one non-terminal instance per governed entity;
//! - template rows are immutable once running instances reference them —
//!   the versioning coordinator forks instead of mutating;
//! - instance mutation goes through a compare-and-swap on a per-row
//!   revision counter, so concurrent writers cannot interleave.

#![deny(unsafe_code)]

mod instance_store;
mod template_store;
mod versioning;

pub use instance_store::*;
pub use template_store::*;
pub use versioning::*;
