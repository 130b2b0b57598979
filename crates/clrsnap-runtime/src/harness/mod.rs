//! In-memory simulated debuggee.
//!
//! Implements the [`crate::surface`] traits over plain data so the whole
//! breakpoint-to-snapshot pipeline can be exercised without a live runtime
//! attach. The simulation keeps the contract the real surface has at
//! suspension points: raw values are views, references must be followed
//! explicitly, heap objects are pinned through handles, and function
//! evaluations only make progress after the debugger callback returns.

#![allow(missing_docs)]

mod module;
mod process;
mod value;

pub use module::{ClassBuilder, SimBehavior, SimBodyFn, SimBreakpoint, SimClass, SimModule};
pub use process::{sample_debuggee, FrameBuilder, SimController, SimEval, SimProcess, SimThread};
pub use value::{indirect, SimArrayData, SimHeapRef, SimObjectData, SimString, SimType, SimValue};
