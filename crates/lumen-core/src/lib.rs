//! Value representation, mark-sweep GC, node/bytecode substrate and
//! error plumbing shared by every Lumen evaluator.

pub mod arena;
pub mod bytecode;
pub mod error;
pub mod gc;
pub mod heap;
pub mod node;
pub mod value;
pub mod var;

pub use error::{Diagnostic, ErrorKind, Location, Phase};
pub use gc::{Gc, GcRef, GcStats, RootSource, SuppressGuard};
pub use heap::{AtomObj, DelayObj, FnBody, FnObj, HeapObject, LazySeqObj, MultiFnObj, ProtocolObj, TreeWalkArity};
pub use node::{Node, NodeArena, NodeId, NodeKind, SourceInfo};
pub use value::{value_eq, BuiltinFnData, HashKey, Ident, PersistentMap, RecordData, Value};
pub use var::{new_var, var_identical, VarCell, VarMeta, VarRc};
