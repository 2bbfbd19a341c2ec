//! # Types
//!
//! The decoded type model and the registry that owns it.
//!
//! Every type produced during a load lives in one [`TypeStore`] slot; the
//! rest of the engine refers to types only through [`TypeSlot`] indices, so a
//! forward reference can be filled in later without any holder noticing the
//! slot's content changed underneath it.

pub mod model;
pub mod store;

pub use model::{AggregateKind, BaseClass, Field, Method, MethodGroup, MethodKind, StructData, Type, TypeId, TypeSlot, Visibility};
pub use store::{BasicTypes, TypeMark, TypeStore};
