//! Workflow Domain Types for Caseflow
//!
//! Caseflow workflows are **governance pipelines**: a versioned template
//! defines a directed graph of stages and transitions, and a running
//! instance tracks one compliance entity (a case, investigation,
//! disclosure, policy, or campaign) moving through that graph.
//!
//! # Key Concepts
//!
//! - **WorkflowTemplate**: A versioned blueprint of stages and transitions.
//!   Published versions are immutable; edits fork a new version when
//!   running instances depend on the old shape.
//! - **WorkflowInstance**: A running execution of a template, pinned to the
//!   exact template version it was started against.
//! - **Gate**: A policy check a transition must satisfy (required fields,
//!   approval, elapsed time, declarative condition). A closed sum type —
//!   unrecognized gate payloads fail closed.
//! - **Principal**: The acting identity, carrying the role set checked
//!   against a transition's allowed roles.
//! - **WorkflowEvent**: Fire-and-forget notifications emitted on every
//!   instance state change.
//!
//! # Design Principles
//!
//! 1. Template edits are never visible to instances created before the
//!    edit. Versioning is copy-on-write.
//! 2. Every transition is gate-checked. No implicit state changes.
//! 3. A failed operation leaves the instance exactly as it was.
//! 4. Terminal instances reject mutation loudly, never silently.

#![deny(unsafe_code)]

mod entity;
mod errors;
mod event;
mod gate;
mod ids;
mod instance;
mod template;

pub use entity::*;
pub use errors::*;
pub use event::*;
pub use gate::*;
pub use ids::*;
pub use instance::*;
pub use template::*;
