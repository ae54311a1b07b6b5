//! Payloads for the mark-sweep-tracked Value kinds (see `value.rs`'s
//! module doc for which kinds those are and why).

use crate::bytecode::FnProto;
use crate::error::Diagnostic;
use crate::node::NodeId;
use crate::value::{HashKey, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct TreeWalkArity {
    pub params: Vec<Rc<str>>,
    pub variadic: Option<Rc<str>>,
    pub body: NodeId,
}

pub enum FnBody {
    TreeWalk(Vec<TreeWalkArity>),
    Bytecode(Rc<FnProto>),
}

/// A fn value of either shape. `defining_ns` is captured at creation and
/// restored around every invocation; `captures` is keyed by name so both
/// body shapes share one representation.
pub struct FnObj {
    pub name: Option<Rc<str>>,
    pub defining_ns: Rc<str>,
    pub captures: HashMap<Rc<str>, Value>,
    pub body: FnBody,
    pub meta: Option<Value>,
}

/// A multimethod: dispatch fn, method table, optional default and
/// hierarchy, plus a one-slot (dispatch-value, method) cache for repeat
/// calls.
pub struct MultiFnObj {
    pub name: Rc<str>,
    pub dispatch_fn: Value,
    pub methods: RefCell<HashMap<HashKey, Value>>,
    pub default: RefCell<Option<Value>>,
    pub hierarchy: RefCell<Option<Value>>,
    pub cache: RefCell<Option<(Value, Value)>>,
}

/// Protocol impl table: type-key -> method-name -> fn.
pub struct ProtocolObj {
    pub name: Rc<str>,
    pub method_names: Vec<Rc<str>>,
    pub impls: RefCell<HashMap<String, HashMap<String, Value>>>,
}

#[derive(Clone)]
pub struct FilterChainData {
    pub source: Value,
    pub preds: Vec<Value>,
}

/// Lazy seq: thunk + realized cache, with a collapsed filter chain
/// recorded alongside instead of as nested lazy-seq layers.
pub struct LazySeqObj {
    pub thunk: RefCell<Option<Value>>,
    pub realized: RefCell<Option<Value>>,
    pub filter_chain: RefCell<Option<FilterChainData>>,
}

pub struct DelayObj {
    pub thunk: RefCell<Option<Value>>,
    pub realized: RefCell<Option<Value>>,
    pub cached_exception: RefCell<Option<Diagnostic>>,
}

pub struct AtomObj {
    pub value: RefCell<Value>,
    pub meta: RefCell<Option<Value>>,
    pub watchers: RefCell<Vec<(Value, Value)>>,
}

pub enum HeapObject {
    Fn(FnObj),
    MultiFn(MultiFnObj),
    Protocol(ProtocolObj),
    LazySeq(LazySeqObj),
    Delay(DelayObj),
    Atom(AtomObj),
}

impl HeapObject {
    /// Every `Value` this object directly points at; the mark phase
    /// traces through these.
    pub fn children(&self) -> Vec<Value> {
        match self {
            HeapObject::Fn(f) => {
                let mut out: Vec<Value> = f.captures.values().cloned().collect();
                if let Some(m) = &f.meta {
                    out.push(m.clone());
                }
                out
            }
            HeapObject::MultiFn(m) => {
                let mut out = vec![m.dispatch_fn.clone()];
                out.extend(m.methods.borrow().values().cloned());
                if let Some(d) = &*m.default.borrow() {
                    out.push(d.clone());
                }
                if let Some(h) = &*m.hierarchy.borrow() {
                    out.push(h.clone());
                }
                if let Some((k, v)) = &*m.cache.borrow() {
                    out.push(k.clone());
                    out.push(v.clone());
                }
                out
            }
            HeapObject::Protocol(p) => p
                .impls
                .borrow()
                .values()
                .flat_map(|methods| methods.values().cloned())
                .collect(),
            HeapObject::LazySeq(l) => {
                let mut out = Vec::new();
                if let Some(t) = &*l.thunk.borrow() {
                    out.push(t.clone());
                }
                if let Some(r) = &*l.realized.borrow() {
                    out.push(r.clone());
                }
                if let Some(fc) = &*l.filter_chain.borrow() {
                    out.push(fc.source.clone());
                    out.extend(fc.preds.iter().cloned());
                }
                out
            }
            HeapObject::Delay(d) => {
                let mut out = Vec::new();
                if let Some(t) = &*d.thunk.borrow() {
                    out.push(t.clone());
                }
                if let Some(r) = &*d.realized.borrow() {
                    out.push(r.clone());
                }
                out
            }
            HeapObject::Atom(a) => {
                let mut out = vec![a.value.borrow().clone()];
                if let Some(m) = &*a.meta.borrow() {
                    out.push(m.clone());
                }
                out.extend(a.watchers.borrow().iter().flat_map(|(k, v)| [k.clone(), v.clone()]));
                out
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::Fn(_) => "fn",
            HeapObject::MultiFn(_) => "multi_fn",
            HeapObject::Protocol(_) => "protocol",
            HeapObject::LazySeq(_) => "lazy_seq",
            HeapObject::Delay(_) => "delay",
            HeapObject::Atom(_) => "atom",
        }
    }
}
