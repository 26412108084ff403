//! Workflow Instance Engine for Caseflow
//!
//! The engine owns every instance state change. A transition request
//! flows through three checks before anything mutates:
//!
//! 1. **TransitionValidator** — does the snapshotted template declare
//!    this edge, is the instance ACTIVE, may this principal take it?
//! 2. **GateEvaluator** — do the edge's gates and the target stage's
//!    entry gates pass against the supplied evidence?
//! 3. **Commit** — the mutated copy is written through an optimistic
//!    compare-and-swap; a conflicting writer forces a bounded retry
//!    with fresh state.
//!
//! A failed request leaves the instance indistinguishable from one that
//! never received the call. Events are emitted fire-and-forget after
//! the commit; consumers can never block a transition.

#![deny(unsafe_code)]

mod event_log;
mod gate_evaluator;
mod lifecycle;
mod validator;

pub use event_log::*;
pub use gate_evaluator::*;
pub use lifecycle::*;
pub use validator::*;
