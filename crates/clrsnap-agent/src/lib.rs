//! `clrsnap-agent` - the snapshot debugger agent.
//!
//! Receives breakpoint requests over a sentinel-framed byte channel,
//! resolves them against portable-PDB symbols, arms native breakpoints,
//! and streams captured snapshots back. The managed runtime is reached
//! through the trait surface in `clrsnap-runtime`; nothing here talks to a
//! concrete debug ABI.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

/// Debugger event handler and agent assembly.
pub mod callback;
/// Breakpoint wire channel.
pub mod client;
/// Agent configuration.
pub mod config;
/// Wire message shapes.
pub mod protocol;
/// Breakpoint registry.
pub mod registry;
/// Breakpoint resolution against PDB symbols.
pub mod resolve;
/// Per-hit snapshot capture.
pub mod snapshot;

pub use callback::{serve, DebugAgent};
pub use client::BreakpointClient;
pub use config::AgentConfig;
pub use protocol::{Breakpoint, SourceLocation, StackFrame, Variable};
pub use registry::{BreakpointRegistry, BreakpointSpec, BreakpointState, DbgBreakpoint};
pub use resolve::{resolve_location, ResolvedSite};
