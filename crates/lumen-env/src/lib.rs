//! Namespace / Var model and dynamic binding frames.

pub mod dynamic;
pub mod namespace;

pub use dynamic::DynamicFrames;
pub use namespace::{Namespace, NamespaceTable};
