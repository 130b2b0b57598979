//! `clrsnap-object` - materialised runtime values.
//!
//! Turns abstract runtime values into self-describing [`object::DbgObject`]
//! trees: scalars are copied, heap objects are pinned behind strong handles,
//! classes are flattened into fields and properties, and everything
//! serialises uniformly to wire form with per-node failure statuses.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

/// Class materialisation and property dispatch.
pub mod class;
/// The object factory.
pub mod factory;
/// Stack-frame view.
pub mod frame;
/// The `DbgObject` hierarchy and wire form.
pub mod object;
/// Type signatures.
pub mod signature;

pub use class::{ClassField, ClassProperty, DbgClass};
pub use factory::{ObjectFactory, DEFAULT_DEREF_LIMIT};
pub use frame::{FrameVariable, MemberLookup, StackFrameView};
pub use object::{
    format_scalar, DbgArray, DbgObject, DbgObjectKind, DbgString, DescribeOptions, StatusMessage,
    VariableNode,
};
pub use signature::{keyword_type, primitive_equivalent, TypeSignature};
