//! Builtins that need runtime context.
//!
//! A plain `BuiltinFnData` closure is stateless: it can't touch the GC,
//! the namespace table, or call back into user code. Every builtin that
//! needs any of those is interned as a stub and intercepted here by name
//! before the stub body would run — `call_fn_val` consults this table
//! first for any `BuiltinFn` callee. That covers the seq/lazy operations
//! (realization calls thunks), equality and printing (realize at the
//! boundary), atoms (watchers are user fns), `apply`, dynamic binding,
//! and the double-underscore forms the analyzer and compiler emit.

use lumen_core::heap::{AtomObj, DelayObj, HeapObject};
use lumen_core::{Diagnostic, ErrorKind, Gc, Location, NodeArena, Phase, Value};
use lumen_env::{DynamicFrames, NamespaceTable};
use std::cell::RefCell;
use std::rc::Rc;

use crate::builtins::{display_value, pr_str_value};
use crate::dispatch::{call_fn_val, resolve_var_cell};
use crate::lazy;

pub const INTRINSIC_NAMES: &[&str] = &[
    "__defprotocol",
    "__extend-type",
    "__reify",
    "__set!",
    "__the-var",
    "__java-method",
    "__interop-new",
    "__in-ns",
    "__with-bindings",
    "__delay",
    "first",
    "next",
    "rest",
    "seq",
    "nth",
    "count",
    "filter",
    "apply",
    "force",
    "deref",
    "atom",
    "reset!",
    "swap!",
    "add-watch",
    "isa?",
    "=",
    "not=",
    "str",
    "pr-str",
    "println",
    "prn",
    "with-meta",
    "meta",
    "__seq-to-map",
    "__letfn-patch",
];

fn type_err(msg: impl Into<String>) -> Diagnostic {
    Diagnostic::new(Phase::Eval, ErrorKind::TypeError, msg, Location::default())
}

fn name_err(msg: impl Into<String>) -> Diagnostic {
    Diagnostic::new(Phase::Eval, ErrorKind::NameError, msg, Location::default())
}

/// Routes one intercepted builtin call. Returns `None` when `name` is not
/// an intrinsic, so the caller falls through to the plain builtin body.
pub fn call_intrinsic(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, Diagnostic>> {
    let result = match name {
        "__defprotocol" => crate::protocol::define_protocol(namespaces, gc, args),
        "__extend-type" => crate::protocol::extend_type(namespaces, gc, args),
        "__reify" => crate::protocol::reify(namespaces, gc, args),
        "__set!" => set_bang(namespaces, dynamic, args),
        "__the-var" => the_var(namespaces, args),
        "__java-method" | "__interop-new" => Err(type_err("host interop is not available in this runtime")),
        "__in-ns" => in_ns(namespaces, args),
        "__with-bindings" => with_bindings(arena, namespaces, gc, dynamic, args),
        "__delay" => Ok(make_delay(gc, args.first().cloned().unwrap_or(Value::Nil))),
        "first" => lazy::first(arena, namespaces, gc, dynamic, &arg0(args)),
        "next" => lazy::next(arena, namespaces, gc, dynamic, &arg0(args)),
        "rest" => lazy::rest(arena, namespaces, gc, dynamic, &arg0(args)),
        "seq" => lazy::seq(arena, namespaces, gc, dynamic, &arg0(args)),
        "nth" => {
            let idx = match args.get(1) {
                Some(Value::Int(n)) => *n,
                _ => return Some(Err(type_err("nth index must be an integer"))),
            };
            lazy::nth(arena, namespaces, gc, dynamic, &arg0(args), idx, args.get(2).cloned())
        }
        "count" => lazy::count(arena, namespaces, gc, dynamic, &arg0(args)).map(Value::Int),
        "filter" => {
            let pred = args.first().cloned().unwrap_or(Value::Nil);
            Ok(lazy::filter_call(gc, pred, args.get(1).unwrap_or(&Value::Nil)))
        }
        "apply" => apply(arena, namespaces, gc, dynamic, args),
        "force" | "deref" => deref(arena, namespaces, gc, dynamic, &arg0(args)),
        "atom" => Ok(make_atom(gc, args.first().cloned().unwrap_or(Value::Nil))),
        "reset!" => reset_atom(arena, namespaces, gc, dynamic, args),
        "swap!" => swap_atom(arena, namespaces, gc, dynamic, args),
        "add-watch" => add_watch(gc, args),
        "isa?" => {
            let child = args.first().cloned().unwrap_or(Value::Nil);
            let parent = args.get(1).cloned().unwrap_or(Value::Nil);
            Ok(Value::Bool(crate::protocol::isa_rel(gc, namespaces, &child, &parent)))
        }
        "=" => equals(arena, namespaces, gc, dynamic, args).map(Value::Bool),
        "not=" => equals(arena, namespaces, gc, dynamic, args).map(|b| Value::Bool(!b)),
        "str" => strings(arena, namespaces, gc, dynamic, args, display_value).map(|parts| Value::string(parts.join(""))),
        "pr-str" => strings(arena, namespaces, gc, dynamic, args, pr_str_value).map(|parts| Value::string(parts.join(" "))),
        "println" => strings(arena, namespaces, gc, dynamic, args, display_value).map(|parts| {
            println!("{}", parts.join(" "));
            Value::Nil
        }),
        "prn" => strings(arena, namespaces, gc, dynamic, args, pr_str_value).map(|parts| {
            println!("{}", parts.join(" "));
            Value::Nil
        }),
        "with-meta" => with_meta(arena, namespaces, gc, dynamic, args),
        "meta" => Ok(meta_of(gc, &arg0(args))),
        "__seq-to-map" => seq_to_map(arena, namespaces, gc, dynamic, &arg0(args)),
        "__letfn-patch" => letfn_patch(gc, args),
        _ => return None,
    };
    Some(result)
}

fn arg0(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or(Value::Nil)
}

fn set_bang(namespaces: &mut NamespaceTable, dynamic: &mut DynamicFrames, args: &[Value]) -> Result<Value, Diagnostic> {
    let Value::Symbol(ident) = &args[0] else {
        return Err(type_err("set! target must resolve to a symbol"));
    };
    let value = args[1].clone();
    let var = resolve_var_cell(namespaces, ident.ns.as_deref(), &ident.name)
        .ok_or_else(|| name_err(format!("unable to resolve symbol: {}", ident.name)))?;
    if !var.borrow().meta.is_dynamic {
        return Err(type_err(format!("{} is not dynamic; set! requires a dynamic var binding", ident.name)));
    }
    if !dynamic.set_top(&var, value.clone()) {
        return Err(name_err(format!("{} has no active dynamic binding", ident.name)));
    }
    Ok(value)
}

fn the_var(namespaces: &NamespaceTable, args: &[Value]) -> Result<Value, Diagnostic> {
    let Value::Symbol(ident) = &args[0] else {
        return Err(type_err("(var x) expects a symbol"));
    };
    let var = resolve_var_cell(namespaces, ident.ns.as_deref(), &ident.name)
        .ok_or_else(|| name_err(format!("unable to resolve var: {}", ident.name)))?;
    Ok(Value::VarRef(var))
}

fn in_ns(namespaces: &mut NamespaceTable, args: &[Value]) -> Result<Value, Diagnostic> {
    let name = match args.first() {
        Some(Value::Str(s)) => s.to_string(),
        Some(Value::Symbol(id)) => id.name.to_string(),
        _ => return Err(type_err("__in-ns expects a namespace name")),
    };
    namespaces.set_current(&name);
    Ok(Value::Nil)
}

/// `binding` support: push one dynamic frame, run the thunk, pop on every
/// exit path. The frame resolves its target vars here so a non-dynamic
/// target fails before anything is pushed.
fn with_bindings(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    args: &[Value],
) -> Result<Value, Diagnostic> {
    let syms = match args.first() {
        Some(Value::Vector(items)) | Some(Value::List(items)) => items.clone(),
        _ => return Err(type_err("__with-bindings expects a vector of symbols")),
    };
    let vals = match args.get(1) {
        Some(Value::Vector(items)) => items.clone(),
        _ => return Err(type_err("__with-bindings expects a vector of values")),
    };
    let thunk = args.get(2).cloned().unwrap_or(Value::Nil);

    let mut frame = Vec::new();
    for (sym, val) in syms.iter().zip(vals.iter()) {
        let Value::Symbol(ident) = sym else {
            return Err(type_err("binding targets must be symbols"));
        };
        let var = resolve_var_cell(namespaces, ident.ns.as_deref(), &ident.name)
            .ok_or_else(|| name_err(format!("unable to resolve symbol: {}", ident.name)))?;
        if !var.borrow().meta.is_dynamic {
            return Err(type_err(format!("cannot dynamically bind non-dynamic var: {}", ident.name)));
        }
        frame.push((var, val.clone()));
    }

    dynamic.push(frame);
    let result = call_fn_val(arena, namespaces, gc, dynamic, &thunk, vec![]);
    dynamic.pop();
    result
}

fn make_delay(gc: &mut Gc, thunk: Value) -> Value {
    Value::Delay(gc.alloc(HeapObject::Delay(DelayObj {
        thunk: RefCell::new(Some(thunk)),
        realized: RefCell::new(None),
        cached_exception: RefCell::new(None),
    })))
}

fn make_atom(gc: &mut Gc, value: Value) -> Value {
    Value::Atom(gc.alloc(HeapObject::Atom(AtomObj {
        value: RefCell::new(value),
        meta: RefCell::new(None),
        watchers: RefCell::new(Vec::new()),
    })))
}

/// `deref`/`force`: atoms read their cell, delays run-and-cache (caching
/// a thrown error too, so re-forcing re-throws the same failure), var
/// refs honor the dynamic frame stack, `reduced` unwraps.
fn deref(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    v: &Value,
) -> Result<Value, Diagnostic> {
    match v {
        Value::Atom(r) => {
            let HeapObject::Atom(a) = gc.get(*r) else {
                return Err(type_err("corrupt atom"));
            };
            let out = a.value.borrow().clone();
            Ok(out)
        }
        Value::Delay(r) => {
            let (cached, cached_err, thunk) = {
                let HeapObject::Delay(d) = gc.get(*r) else {
                    return Err(type_err("corrupt delay"));
                };
                (
                    d.realized.borrow().clone(),
                    d.cached_exception.borrow().clone(),
                    d.thunk.borrow().clone(),
                )
            };
            if let Some(err) = cached_err {
                return Err(err);
            }
            if let Some(v) = cached {
                return Ok(v);
            }
            let thunk = thunk.ok_or_else(|| type_err("delay has no thunk"))?;
            let result = call_fn_val(arena, namespaces, gc, dynamic, &thunk, vec![]);
            if let HeapObject::Delay(d) = gc.get(*r) {
                match &result {
                    Ok(v) => *d.realized.borrow_mut() = Some(v.clone()),
                    Err(e) => *d.cached_exception.borrow_mut() = Some(e.clone()),
                }
                *d.thunk.borrow_mut() = None;
            }
            result
        }
        Value::VarRef(var) => dynamic
            .deref(var)
            .ok_or_else(|| name_err(format!("var {} is unbound", var.borrow().sym_name))),
        Value::Reduced(inner) => Ok((**inner).clone()),
        other => Err(type_err(format!("cannot deref a {}", other.tag()))),
    }
}

fn notify_watchers(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    atom: &Value,
    old: &Value,
    new: &Value,
) -> Result<(), Diagnostic> {
    let Value::Atom(r) = atom else { return Ok(()) };
    let watchers = {
        let HeapObject::Atom(a) = gc.get(*r) else { return Ok(()) };
        a.watchers.borrow().clone()
    };
    for (key, watch_fn) in watchers {
        call_fn_val(
            arena,
            namespaces,
            gc,
            dynamic,
            &watch_fn,
            vec![key, atom.clone(), old.clone(), new.clone()],
        )?;
    }
    Ok(())
}

fn reset_atom(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    args: &[Value],
) -> Result<Value, Diagnostic> {
    let Some(atom @ Value::Atom(r)) = args.first() else {
        return Err(type_err("reset! expects an atom"));
    };
    let new = args.get(1).cloned().unwrap_or(Value::Nil);
    let old = {
        let HeapObject::Atom(a) = gc.get(*r) else {
            return Err(type_err("corrupt atom"));
        };
        let old = a.value.borrow().clone();
        *a.value.borrow_mut() = new.clone();
        old
    };
    notify_watchers(arena, namespaces, gc, dynamic, atom, &old, &new)?;
    Ok(new)
}

/// `swap!`: read, apply, compare-and-store. Execution is single-threaded,
/// so the only way the compare fails is the update fn itself mutating the
/// atom; the loop retries against the fresh value in that case.
fn swap_atom(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    args: &[Value],
) -> Result<Value, Diagnostic> {
    let Some(atom @ Value::Atom(r)) = args.first() else {
        return Err(type_err("swap! expects an atom"));
    };
    let f = args.get(1).cloned().ok_or_else(|| type_err("swap! expects an update fn"))?;
    let r = *r;
    loop {
        let old = {
            let HeapObject::Atom(a) = gc.get(r) else {
                return Err(type_err("corrupt atom"));
            };
            a.value.borrow().clone()
        };
        let mut call_args = vec![old.clone()];
        call_args.extend(args[2..].iter().cloned());
        let new = call_fn_val(arena, namespaces, gc, dynamic, &f, call_args)?;
        let stored = {
            let HeapObject::Atom(a) = gc.get(r) else {
                return Err(type_err("corrupt atom"));
            };
            let current = a.value.borrow().clone();
            if lumen_core::value_eq(&current, &old) {
                *a.value.borrow_mut() = new.clone();
                true
            } else {
                false
            }
        };
        if stored {
            notify_watchers(arena, namespaces, gc, dynamic, atom, &old, &new)?;
            return Ok(new);
        }
    }
}

fn add_watch(gc: &mut Gc, args: &[Value]) -> Result<Value, Diagnostic> {
    let Some(Value::Atom(r)) = args.first() else {
        return Err(type_err("add-watch expects an atom"));
    };
    let key = args.get(1).cloned().unwrap_or(Value::Nil);
    let watch_fn = args.get(2).cloned().ok_or_else(|| type_err("add-watch expects a watch fn"))?;
    let HeapObject::Atom(a) = gc.get(*r) else {
        return Err(type_err("corrupt atom"));
    };
    a.watchers.borrow_mut().push((key, watch_fn));
    Ok(args[0].clone())
}

/// `(apply f a b coll)`: spreads the final seqable onto the argument
/// list. Realizes the spread (an `apply` over an infinite seq cannot
/// terminate anyway).
fn apply(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    args: &[Value],
) -> Result<Value, Diagnostic> {
    let f = args.first().cloned().ok_or_else(|| {
        Diagnostic::new(Phase::Eval, ErrorKind::ArityError, "apply expects a function", Location::default())
    })?;
    let mut call_args: Vec<Value> = args[1..args.len().saturating_sub(1)].to_vec();
    if let Some(last) = args.last() {
        if args.len() > 1 {
            call_args.extend(lazy::realize_all(arena, namespaces, gc, dynamic, last)?);
        }
    }
    call_fn_val(arena, namespaces, gc, dynamic, &f, call_args)
}

fn equals(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    args: &[Value],
) -> Result<bool, Diagnostic> {
    if args.len() < 2 {
        return Ok(true);
    }
    let mut prev = lazy::deep_realize(arena, namespaces, gc, dynamic, &args[0])?;
    for v in &args[1..] {
        let cur = lazy::deep_realize(arena, namespaces, gc, dynamic, v)?;
        if !lumen_core::value_eq(&prev, &cur) {
            return Ok(false);
        }
        prev = cur;
    }
    Ok(true)
}

fn strings(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    args: &[Value],
    render: fn(&Value) -> String,
) -> Result<Vec<String>, Diagnostic> {
    args.iter()
        .map(|v| lazy::deep_realize(arena, namespaces, gc, dynamic, v).map(|r| render(&r)))
        .collect()
}

/// `with-meta` produces a fresh fn value carrying the new meta; the
/// original is untouched. Non-fn values pass through unchanged after
/// realization (the value representation keeps meta on fns, atoms, and
/// vars only).
fn with_meta(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    args: &[Value],
) -> Result<Value, Diagnostic> {
    let target = lazy::deep_realize(arena, namespaces, gc, dynamic, &arg0(args))?;
    let meta = args.get(1).cloned().unwrap_or(Value::Nil);
    match &target {
        Value::Fn(r) => {
            let copy = {
                let HeapObject::Fn(f) = gc.get(*r) else {
                    return Err(type_err("corrupt fn"));
                };
                lumen_core::heap::FnObj {
                    name: f.name.clone(),
                    defining_ns: f.defining_ns.clone(),
                    captures: f.captures.clone(),
                    body: crate::dispatch::clone_fn_body(&f.body),
                    meta: if matches!(meta, Value::Nil) { None } else { Some(meta) },
                }
            };
            Ok(Value::Fn(gc.alloc(HeapObject::Fn(copy))))
        }
        Value::Atom(r) => {
            if let HeapObject::Atom(a) = gc.get(*r) {
                *a.meta.borrow_mut() = if matches!(meta, Value::Nil) { None } else { Some(meta) };
            }
            Ok(target)
        }
        _ => Ok(target),
    }
}

fn meta_of(gc: &Gc, v: &Value) -> Value {
    match v {
        Value::Fn(r) => {
            if let HeapObject::Fn(f) = gc.get(*r) {
                f.meta.clone().unwrap_or(Value::Nil)
            } else {
                Value::Nil
            }
        }
        Value::Atom(r) => {
            if let HeapObject::Atom(a) = gc.get(*r) {
                a.meta.borrow().clone().unwrap_or(Value::Nil)
            } else {
                Value::Nil
            }
        }
        Value::VarRef(var) => {
            let meta = &var.borrow().meta;
            let mut m = lumen_core::PersistentMap::new();
            if let Some(doc) = &meta.doc {
                m = m.assoc(Value::keyword(None, "doc"), Value::string(doc.clone()));
            }
            m = m.assoc(Value::keyword(None, "dynamic"), Value::Bool(meta.is_dynamic));
            m = m.assoc(Value::keyword(None, "macro"), Value::Bool(meta.is_macro));
            m = m.assoc(Value::keyword(None, "private"), Value::Bool(meta.is_private));
            if let Some(arglists) = &meta.arglists {
                m = m.assoc(Value::keyword(None, "arglists"), arglists.clone());
            }
            Value::Map(Rc::new(m))
        }
        _ => Value::Nil,
    }
}

/// `letfn*` support for compiled code: `args` is a flat list of
/// `name value` pairs, one per bound fn. Each closure was created while
/// its later siblings' slots still held nil, so every closure's capture
/// map is rewritten here with the finished sibling values — the same
/// pass the tree-walker runs after creating its closures.
fn letfn_patch(gc: &mut Gc, args: &[Value]) -> Result<Value, Diagnostic> {
    for pair in args.chunks(2) {
        let Some(Value::Fn(gcref)) = pair.get(1) else { continue };
        let gcref = *gcref;
        if let HeapObject::Fn(f) = gc.get_mut(gcref) {
            for sibling in args.chunks(2) {
                if let (Some(Value::Str(name)), Some(value)) = (sibling.first(), sibling.get(1)) {
                    if f.captures.contains_key(&**name) {
                        f.captures.insert(Rc::from(&**name), value.clone());
                    }
                }
            }
        }
    }
    Ok(Value::Nil)
}

/// Destructuring coercion: a map passes through, a sequence of k/v pairs
/// (the raw rest list of a variadic call) becomes a map.
fn seq_to_map(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    v: &Value,
) -> Result<Value, Diagnostic> {
    if matches!(v, Value::Map(_)) {
        return Ok(v.clone());
    }
    if matches!(v, Value::Nil) {
        return Ok(Value::Map(Rc::new(lumen_core::PersistentMap::new())));
    }
    let items = lazy::realize_all(arena, namespaces, gc, dynamic, v)?;
    if items.len() == 1 {
        if let Value::Map(_) = &items[0] {
            return Ok(items[0].clone());
        }
    }
    let mut m = lumen_core::PersistentMap::new();
    for pair in items.chunks(2) {
        if pair.len() == 2 {
            m = m.assoc(pair[0].clone(), pair[1].clone());
        }
    }
    Ok(Value::Map(Rc::new(m)))
}
