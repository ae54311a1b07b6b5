//! Lazy sequence realization.
//!
//! Two cell shapes coexist: `Cons` (first + rest, rest may be any seqable
//! including another lazy seq) and `LazySeq` (thunk + realized cache).
//! Realization is incremental — forcing a cell produces at most one
//! `Cons` and never walks the tail — so infinite generators like
//! `iterate` stay usable. The printing/equality boundary uses
//! `deep_realize`, which does walk the whole structure and therefore only
//! terminates on finite data.
//!
//! A `LazySeq` may instead carry a filter chain: a flat predicate list
//! over one source. `filter` applied to such a seq appends to the
//! predicate list rather than nesting another lazy layer, so a
//! sieve-style tower of filters costs one pass per element instead of one
//! stack frame per filter per element.

use lumen_core::heap::{FilterChainData, HeapObject, LazySeqObj};
use lumen_core::value::ConsCell;
use lumen_core::{Diagnostic, ErrorKind, Gc, GcRef, Location, NodeArena, Phase, Value};
use lumen_env::{DynamicFrames, NamespaceTable};
use std::cell::RefCell;
use std::rc::Rc;

fn type_err(msg: impl Into<String>) -> Diagnostic {
    Diagnostic::new(Phase::Eval, ErrorKind::TypeError, msg, Location::default())
}

fn index_err(msg: impl Into<String>) -> Diagnostic {
    Diagnostic::new(Phase::Eval, ErrorKind::IndexError, msg, Location::default())
}

pub fn new_lazy_seq(gc: &mut Gc, thunk: Value) -> Value {
    Value::LazySeq(gc.alloc(HeapObject::LazySeq(LazySeqObj {
        thunk: RefCell::new(Some(thunk)),
        realized: RefCell::new(None),
        filter_chain: RefCell::new(None),
    })))
}

pub fn new_filter_chain(gc: &mut Gc, source: Value, preds: Vec<Value>) -> Value {
    Value::LazySeq(gc.alloc(HeapObject::LazySeq(LazySeqObj {
        thunk: RefCell::new(None),
        realized: RefCell::new(None),
        filter_chain: RefCell::new(Some(FilterChainData { source, preds })),
    })))
}

/// Forces the outermost lazy layers of `v`: the result is never a
/// `LazySeq`. Each forced cell memoizes its result, so re-forcing is a
/// cache read.
pub fn force1(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    v: &Value,
) -> Result<Value, Diagnostic> {
    let mut cur = v.clone();
    while let Value::LazySeq(r) = cur {
        cur = force_cell(arena, namespaces, gc, dynamic, r)?;
    }
    Ok(cur)
}

fn force_cell(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    gcref: GcRef,
) -> Result<Value, Diagnostic> {
    let (cached, chain, thunk) = {
        let HeapObject::LazySeq(l) = gc.get(gcref) else {
            return Err(type_err("not a lazy seq"));
        };
        (
            l.realized.borrow().clone(),
            l.filter_chain.borrow().clone(),
            l.thunk.borrow().clone(),
        )
    };
    if let Some(v) = cached {
        return Ok(v);
    }
    let result = if let Some(chain) = chain {
        force_chain(arena, namespaces, gc, dynamic, chain)?
    } else if let Some(thunk_fn) = thunk {
        crate::dispatch::call_fn_val(arena, namespaces, gc, dynamic, &thunk_fn, vec![])?
    } else {
        Value::Nil
    };
    if let HeapObject::LazySeq(l) = gc.get(gcref) {
        *l.realized.borrow_mut() = Some(result.clone());
        *l.thunk.borrow_mut() = None;
    }
    Ok(result)
}

/// Runs every predicate in the chain over successive source elements
/// until one passes, then yields a single `Cons` whose tail is a fresh
/// chain over the remaining source. One flat pass per element, however
/// many `filter`s were stacked.
fn force_chain(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    chain: FilterChainData,
) -> Result<Value, Diagnostic> {
    let mut source = chain.source;
    loop {
        let s = seq(arena, namespaces, gc, dynamic, &source)?;
        if matches!(s, Value::Nil) {
            return Ok(Value::Nil);
        }
        let head = first_of_forced(&s);
        let tail = rest_of_forced(&s);
        let mut keep = true;
        for pred in &chain.preds {
            let r = crate::dispatch::call_fn_val(arena, namespaces, gc, dynamic, pred, vec![head.clone()])?;
            if !r.is_truthy() {
                keep = false;
                break;
            }
        }
        if keep {
            let rest = new_filter_chain(gc, tail, chain.preds.clone());
            return Ok(Value::Cons(Rc::new(ConsCell { first: head, rest })));
        }
        source = tail;
    }
}

/// The `filter` entry point. Collapses onto an existing chain when the
/// input already is one; otherwise starts a fresh single-predicate chain
/// over any seqable source.
pub fn filter_call(gc: &mut Gc, pred: Value, coll: &Value) -> Value {
    if let Value::LazySeq(r) = coll {
        if let HeapObject::LazySeq(l) = gc.get(*r) {
            let existing = l.filter_chain.borrow().clone();
            if let Some(chain) = existing {
                let mut preds = chain.preds;
                preds.push(pred);
                return new_filter_chain(gc, chain.source, preds);
            }
        }
    }
    new_filter_chain(gc, coll.clone(), vec![pred])
}

/// `(seq coll)`: `nil` when empty, otherwise a value whose head and tail
/// are O(1) to read (a `Cons` or non-empty `List`). Never returns a
/// `LazySeq`.
pub fn seq(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    v: &Value,
) -> Result<Value, Diagnostic> {
    let v = force1(arena, namespaces, gc, dynamic, v)?;
    Ok(match v {
        Value::Nil => Value::Nil,
        Value::Cons(_) => v,
        Value::List(ref items) | Value::Vector(ref items) => {
            if items.is_empty() {
                Value::Nil
            } else {
                Value::List(items.clone())
            }
        }
        Value::Str(s) => {
            let items: im::Vector<Value> = s.chars().map(Value::Char).collect();
            if items.is_empty() {
                Value::Nil
            } else {
                Value::List(items)
            }
        }
        Value::Map(m) => {
            let items: im::Vector<Value> = m
                .iter()
                .map(|(k, v)| Value::Vector(im::vector![k, v]))
                .collect();
            if items.is_empty() {
                Value::Nil
            } else {
                Value::List(items)
            }
        }
        Value::Set(s) => {
            let items: im::Vector<Value> = s.iter().map(|hk| hk.0.clone()).collect();
            if items.is_empty() {
                Value::Nil
            } else {
                Value::List(items)
            }
        }
        other => return Err(type_err(format!("cannot create a seq from {}", other.tag()))),
    })
}

fn first_of_forced(s: &Value) -> Value {
    match s {
        Value::Cons(c) => c.first.clone(),
        Value::List(items) => items.front().cloned().unwrap_or(Value::Nil),
        _ => Value::Nil,
    }
}

fn rest_of_forced(s: &Value) -> Value {
    match s {
        Value::Cons(c) => c.rest.clone(),
        Value::List(items) => {
            if items.len() <= 1 {
                Value::List(im::Vector::new())
            } else {
                Value::List(items.clone().split_off(1))
            }
        }
        _ => Value::List(im::Vector::new()),
    }
}

pub fn first(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    v: &Value,
) -> Result<Value, Diagnostic> {
    let s = seq(arena, namespaces, gc, dynamic, v)?;
    Ok(first_of_forced(&s))
}

/// `(rest coll)`: the tail, `()` when exhausted. The tail is handed back
/// unforced, which is what keeps infinite seqs traversable.
pub fn rest(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    v: &Value,
) -> Result<Value, Diagnostic> {
    let s = seq(arena, namespaces, gc, dynamic, v)?;
    if matches!(s, Value::Nil) {
        return Ok(Value::List(im::Vector::new()));
    }
    Ok(rest_of_forced(&s))
}

/// `(next coll)`: like `rest` but `nil` when the tail is empty.
pub fn next(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    v: &Value,
) -> Result<Value, Diagnostic> {
    let r = rest(arena, namespaces, gc, dynamic, v)?;
    seq(arena, namespaces, gc, dynamic, &r)
}

/// Index access that walks cons chains incrementally, forcing only the
/// cells up to `idx`.
pub fn nth(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    coll: &Value,
    idx: i64,
    default: Option<Value>,
) -> Result<Value, Diagnostic> {
    if idx < 0 {
        return default.ok_or_else(|| index_err("index out of bounds"));
    }
    let mut i = idx as usize;
    let mut s = seq(arena, namespaces, gc, dynamic, coll)?;
    loop {
        match s {
            Value::Nil => {
                return default.ok_or_else(|| index_err("index out of bounds"));
            }
            Value::List(items) => {
                return match items.get(i) {
                    Some(v) => Ok(v.clone()),
                    None => default.ok_or_else(|| index_err("index out of bounds")),
                };
            }
            Value::Cons(c) => {
                if i == 0 {
                    return Ok(c.first.clone());
                }
                i -= 1;
                let tail = c.rest.clone();
                s = seq(arena, namespaces, gc, dynamic, &tail)?;
            }
            _ => return default.ok_or_else(|| index_err("index out of bounds")),
        }
    }
}

pub fn count(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    v: &Value,
) -> Result<i64, Diagnostic> {
    match v {
        Value::Nil => return Ok(0),
        Value::Str(s) => return Ok(s.chars().count() as i64),
        Value::List(items) | Value::Vector(items) => return Ok(items.len() as i64),
        Value::Set(items) => return Ok(items.len() as i64),
        Value::Map(m) => return Ok(m.len() as i64),
        _ => {}
    }
    let mut n = 0i64;
    let mut s = seq(arena, namespaces, gc, dynamic, v)?;
    loop {
        match s {
            Value::Nil => return Ok(n),
            Value::List(items) => return Ok(n + items.len() as i64),
            Value::Cons(c) => {
                n += 1;
                let tail = c.rest.clone();
                s = seq(arena, namespaces, gc, dynamic, &tail)?;
            }
            _ => return Ok(n),
        }
    }
}

/// Fully realizes a seqable into a `Vec`. Diverges on infinite seqs; the
/// callers are the equality/printing boundary, which only makes sense on
/// finite data.
pub fn realize_all(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    v: &Value,
) -> Result<Vec<Value>, Diagnostic> {
    let mut out = Vec::new();
    let mut s = seq(arena, namespaces, gc, dynamic, v)?;
    loop {
        match s {
            Value::Nil => return Ok(out),
            Value::List(items) => {
                out.extend(items.iter().cloned());
                return Ok(out);
            }
            Value::Cons(c) => {
                out.push(c.first.clone());
                let tail = c.rest.clone();
                s = seq(arena, namespaces, gc, dynamic, &tail)?;
            }
            _ => return Ok(out),
        }
    }
}

/// Recursively replaces every lazy cell with realized lists, so the
/// result can be compared, hashed, or printed without further dispatch.
pub fn deep_realize(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    v: &Value,
) -> Result<Value, Diagnostic> {
    Ok(match v {
        Value::LazySeq(_) | Value::Cons(_) => {
            let items = realize_all(arena, namespaces, gc, dynamic, v)?;
            let realized: Result<im::Vector<Value>, Diagnostic> = items
                .iter()
                .map(|item| deep_realize(arena, namespaces, gc, dynamic, item))
                .collect();
            Value::List(realized?)
        }
        Value::List(items) => {
            let realized: Result<im::Vector<Value>, Diagnostic> = items
                .iter()
                .map(|item| deep_realize(arena, namespaces, gc, dynamic, item))
                .collect();
            Value::List(realized?)
        }
        Value::Vector(items) => {
            let realized: Result<im::Vector<Value>, Diagnostic> = items
                .iter()
                .map(|item| deep_realize(arena, namespaces, gc, dynamic, item))
                .collect();
            Value::Vector(realized?)
        }
        Value::Reduced(inner) => deep_realize(arena, namespaces, gc, dynamic, inner)?,
        other => other.clone(),
    })
}
