//! `clrsnap-runtime` - managed-runtime debug surface for the snapshot agent.
//!
//! The agent core consumes the runtime's debug API through the traits in
//! [`surface`]: value inspection, metadata import, strong handles, native
//! breakpoint arming, function evaluation, and event delivery. This crate
//! also owns the [`coordinator`] that lets inspection code call managed
//! getters while a breakpoint event is held, and an in-memory [`harness`]
//! debuggee for tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Evaluation coordinator and per-hit context.
pub mod coordinator;
/// Debugger errors.
pub mod error;
/// Simulated debuggee for tests and demos.
pub mod harness;
/// Strong handles over managed objects.
pub mod handle;
/// Traits modelling the managed runtime's debug API.
pub mod surface;
/// Portable-PDB symbol view.
pub mod symbols;

pub use coordinator::{EvalContext, EvalCoordinator, EvalOutcome, DEFAULT_EVAL_TIMEOUT};
pub use error::DebugError;
pub use handle::{RawHandle, StrongHandle};
