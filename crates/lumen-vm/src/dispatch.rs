//! Unified call dispatch: one entry point every caller goes through
//! regardless of what kind of callable it holds, and the `MacroInvoker`
//! implementation that lets the analyzer call back into it for macro
//! expansion.

use lumen_analyzer::MacroInvoker;
use lumen_core::heap::{FnBody, HeapObject};
use lumen_core::node::{NodeArena, SourceInfo};
use lumen_core::var::VarRc;
use lumen_core::{Diagnostic, ErrorKind, Gc, Location, Phase, Value};
use lumen_env::{DynamicFrames, NamespaceTable};

use crate::vm;

/// Resolves a callee symbol against the current namespace, honoring the
/// current dynamic binding if one is active.
pub fn resolve_var(namespaces: &NamespaceTable, dynamic: &DynamicFrames, ns: Option<&str>, name: &str) -> Option<Value> {
    let var = resolve_var_cell(namespaces, ns, name)?;
    dynamic.deref(&var)
}

pub fn resolve_var_cell(namespaces: &NamespaceTable, ns: Option<&str>, name: &str) -> Option<VarRc> {
    match ns {
        Some(ns) => namespaces.resolve_qualified(&namespaces.current.clone(), ns, name),
        None => namespaces.resolve_in_current(name),
    }
}

/// Everything a collection cycle must treat as live besides the calling
/// evaluator's own stack: namespace var roots and dynamic frame entries.
pub fn runtime_roots(namespaces: &NamespaceTable, dynamic: &DynamicFrames) -> Vec<Value> {
    let mut roots: Vec<Value> = namespaces
        .all_vars()
        .iter()
        .filter_map(|var| var.borrow().root.clone())
        .collect();
    roots.extend(dynamic.roots());
    roots
}

/// Arity dispatch: exact fixed arity first, else the first variadic
/// arity whose fixed part the call satisfies.
fn pick_treewalk_arity<'a>(
    arities: &'a [lumen_core::heap::TreeWalkArity],
    argc: usize,
) -> Result<&'a lumen_core::heap::TreeWalkArity, String> {
    arities
        .iter()
        .find(|a| a.variadic.is_none() && a.params.len() == argc)
        .or_else(|| arities.iter().find(|a| a.variadic.is_some() && argc >= a.params.len()))
        .ok_or_else(|| format!("no matching arity for {argc} argument(s)"))
}

pub(crate) fn pick_bytecode_proto(
    proto: &std::rc::Rc<lumen_core::bytecode::FnProto>,
    argc: usize,
) -> Result<std::rc::Rc<lumen_core::bytecode::FnProto>, String> {
    if !proto.is_variadic && proto.arity == argc {
        return Ok(proto.clone());
    }
    for alt in &proto.alternates {
        if !alt.is_variadic && alt.arity == argc {
            return Ok(alt.clone());
        }
    }
    if proto.is_variadic && argc >= proto.arity {
        return Ok(proto.clone());
    }
    for alt in &proto.alternates {
        if alt.is_variadic && argc >= alt.arity {
            return Ok(alt.clone());
        }
    }
    Err(format!("no matching arity for {argc} argument(s)"))
}

fn arity_error(message: String) -> Diagnostic {
    Diagnostic::new(Phase::Eval, ErrorKind::ArityError, message, Location::default())
}

/// The dispatch table for every callable `Value` kind. `arena` is
/// consulted for tree-walk fn bodies and passed through to nested calls;
/// bytecode closures never touch it directly.
pub fn call_fn_val(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    callee: &Value,
    args: Vec<Value>,
) -> Result<Value, Diagnostic> {
    match callee {
        Value::BuiltinFn(data) => {
            // Context-needing builtins are intercepted by name before the
            // stateless stub body would run.
            if let Some(result) = crate::intrinsics::call_intrinsic(arena, namespaces, gc, dynamic, data.name, &args) {
                return result;
            }
            if args.len() < data.min_arity || data.max_arity.is_some_and(|max| args.len() > max) {
                return Err(arity_error(format!(
                    "{}: expected {}..{} args, got {}",
                    data.name,
                    data.min_arity,
                    data.max_arity.map(|m| m.to_string()).unwrap_or_else(|| "*".to_string()),
                    args.len()
                )));
            }
            (data.func)(&args)
        }
        Value::Fn(gcref) => call_fn_object(arena, namespaces, gc, dynamic, *gcref, args),
        Value::MultiFn(gcref) => crate::protocol::call_multi_fn(arena, namespaces, gc, dynamic, *gcref, args),
        Value::Keyword(id) => {
            // `(:k m)` / `(:k m default)`: keywords are callable as getters.
            let m = args.first().cloned().unwrap_or(Value::Nil);
            let default = args.get(1).cloned().unwrap_or(Value::Nil);
            Ok(crate::builtins::map_get(&m, &Value::Keyword(id.clone()), default))
        }
        Value::Map(_) | Value::Record(_) => {
            let key = args.first().cloned().unwrap_or(Value::Nil);
            let default = args.get(1).cloned().unwrap_or(Value::Nil);
            Ok(crate::builtins::map_get(callee, &key, default))
        }
        Value::Set(items) => {
            let key = args.first().cloned().unwrap_or(Value::Nil);
            let found = items.iter().any(|hk| lumen_core::value_eq(&hk.0, &key));
            Ok(if found { key } else { Value::Nil })
        }
        Value::VarRef(var) => {
            let root = dynamic.deref(var).ok_or_else(|| {
                Diagnostic::new(
                    Phase::Eval,
                    ErrorKind::NameError,
                    format!("var {} is unbound", var.borrow().sym_name),
                    Location::default(),
                )
            })?;
            call_fn_val(arena, namespaces, gc, dynamic, &root, args)
        }
        Value::WasmFn(f) => Err(Diagnostic::new(
            Phase::Eval,
            ErrorKind::TypeError,
            format!("wasm export {}/{} cannot be called: no guest runtime is linked", f.module, f.export),
            Location::default(),
        )),
        other => Err(Diagnostic::new(
            Phase::Eval,
            ErrorKind::TypeError,
            format!("value of type {} is not callable", other.tag()),
            Location::default(),
        )),
    }
}

fn call_fn_object(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    gcref: lumen_core::GcRef,
    args: Vec<Value>,
) -> Result<Value, Diagnostic> {
    let (body, captures, defining_ns) = {
        let HeapObject::Fn(f) = gc.get(gcref) else {
            return Err(Diagnostic::new(Phase::Eval, ErrorKind::TypeError, "not a fn", Location::default()));
        };
        (clone_fn_body(&f.body), f.captures.clone(), f.defining_ns.clone())
    };
    // A closure runs in the namespace it was created in; the caller's
    // namespace is restored on every exit path.
    let prior_ns = namespaces.current.clone();
    namespaces.set_current(&defining_ns);
    let result = match body {
        FnBody::TreeWalk(arities) => match pick_treewalk_arity(&arities, args.len()) {
            Ok(arity) => crate::treewalk::call_arity(arena, namespaces, gc, dynamic, arity, &captures, args),
            Err(msg) => Err(arity_error(msg)),
        },
        FnBody::Bytecode(proto) => match pick_bytecode_proto(&proto, args.len()) {
            Ok(proto) => vm::run_proto(arena, namespaces, gc, dynamic, &proto, &captures, args),
            Err(msg) => Err(arity_error(msg)),
        },
    };
    namespaces.set_current(&prior_ns);
    result
}

pub(crate) fn clone_fn_body(body: &FnBody) -> FnBody {
    match body {
        FnBody::TreeWalk(arities) => FnBody::TreeWalk(arities.clone()),
        FnBody::Bytecode(proto) => FnBody::Bytecode(proto.clone()),
    }
}

/// The analyzer's window into evaluation, used only for macro expansion.
/// Holds no `NamespaceTable` or `NodeArena` of its own; the analyzer
/// lends both per call (see the trait doc in `lumen-analyzer`).
pub struct Invoker<'r> {
    pub gc: &'r mut Gc,
    pub dynamic: &'r mut DynamicFrames,
}

impl<'r> MacroInvoker for Invoker<'r> {
    fn invoke_macro(
        &mut self,
        var: &VarRc,
        args: Vec<Value>,
        source: &SourceInfo,
        arena: &NodeArena,
        namespaces: &mut NamespaceTable,
    ) -> Result<Value, Diagnostic> {
        let macro_fn = var.borrow().root.clone().ok_or_else(|| {
            Diagnostic::new(
                Phase::Macroexpand,
                ErrorKind::NameError,
                format!("macro var {} has no value", var.borrow().sym_name),
                location_of(source),
            )
        })?;
        // Collection never runs mid-expansion: macros build transient
        // sequences whose only reachability is through thunk closures the
        // analyzer cannot trace. `SuppressGuard` would need exclusive use
        // of `self.gc` for its whole lifetime, leaving nothing to pass
        // into the call below, so the pair is matched by hand — both the
        // Ok and Err paths fall through the same unsuppress.
        self.gc.suppress();
        let result = call_fn_val(arena, namespaces, self.gc, self.dynamic, &macro_fn, args)
            .and_then(|value| crate::lazy::deep_realize(arena, namespaces, self.gc, self.dynamic, &value));
        self.gc.unsuppress();
        result.map_err(|mut diag| {
            if diag.phase == Phase::Eval {
                diag.phase = Phase::Macroexpand;
            }
            if diag.location.line.is_none() {
                diag.location = location_of(source);
            }
            diag
        })
    }
}

fn location_of(source: &SourceInfo) -> Location {
    Location::new(source.file.to_string(), source.line, source.column)
}

thread_local! {
    /// Nesting depth across both evaluators. Serves two jobs: host-stack
    /// overflow detection (each level is bounded host recursion), and the
    /// "outermost evaluator" test that gates mid-run collection — only
    /// the outermost frame can enumerate a complete root set, so only it
    /// may trigger a sweep.
    static EVAL_DEPTH: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

// Each level costs a bounded run of host stack frames; the limit is set
// well under what a 2 MiB test-thread stack can absorb in debug builds.
const MAX_EVAL_DEPTH: usize = 400;

pub struct DepthGuard;

impl DepthGuard {
    pub fn enter() -> Result<DepthGuard, Diagnostic> {
        let depth = EVAL_DEPTH.with(|d| {
            let n = d.get() + 1;
            d.set(n);
            n
        });
        if depth > MAX_EVAL_DEPTH {
            // Undo this level's increment: no guard is handed out for it.
            // Not catchable; outer guards decrement as the error unwinds.
            EVAL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
            return Err(Diagnostic::new(
                Phase::Eval,
                ErrorKind::InternalError,
                "evaluation stack overflow",
                Location::default(),
            ));
        }
        Ok(DepthGuard)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// True when exactly one evaluator frame is live, i.e. the caller's own
/// stack plus the global tables form the complete GC root set.
pub fn at_outermost_eval() -> bool {
    EVAL_DEPTH.with(|d| d.get() <= 1)
}
