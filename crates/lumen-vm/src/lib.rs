//! The Lumen runtime: both evaluators (tree-walk and stack VM), the
//! unified call dispatcher they share, protocols and multimethods, lazy
//! sequences, the bootstrap loader, and the `Env` that owns a running
//! process. A minimal reader is included so the crate is drivable
//! end-to-end without an external front end.

pub mod bootstrap;
pub mod builtins;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod intrinsics;
pub mod lazy;
pub mod protocol;
pub mod reader;
pub mod treewalk;
pub mod vm;

pub use config::{Backend, EnvConfig};
pub use dispatch::call_fn_val;
pub use env::Env;
