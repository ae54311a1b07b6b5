//! Protocol and multimethod dispatch.
//!
//! `Protocol.impls` maps a type key (a stable string such as `"string"`,
//! `"integer"`, or a record name) to a method map. Each protocol method
//! is also interned as a multimethod dispatching on the receiver's type
//! key, so protocol calls and multimethod calls share one code path.

use lumen_core::heap::{HeapObject, MultiFnObj, ProtocolObj};
use lumen_core::value::HashKey;
use lumen_core::{Diagnostic, ErrorKind, Gc, GcRef, Location, NodeArena, Phase, Value};
use lumen_env::{DynamicFrames, NamespaceTable};
use std::cell::RefCell;
use std::rc::Rc;

use crate::dispatch::resolve_var_cell;

fn type_err(msg: impl Into<String>) -> Diagnostic {
    Diagnostic::new(Phase::Eval, ErrorKind::TypeError, msg, Location::default())
}

fn name_err(msg: impl Into<String>) -> Diagnostic {
    Diagnostic::new(Phase::Eval, ErrorKind::NameError, msg, Location::default())
}

fn as_str(v: &Value) -> Result<String, Diagnostic> {
    match v {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(type_err(format!("expected a string, got {}", other.tag()))),
    }
}

/// `extend-type` accepts host-style class names for the built-in types;
/// they normalize to the runtime's own type keys at registration so
/// lookup never needs a second pass.
fn normalize_type_key(key: &str) -> &str {
    match key {
        "String" => "string",
        "Integer" | "Long" => "integer",
        "Double" | "Float" => "float",
        "Boolean" => "boolean",
        "Character" => "char",
        "Keyword" => "keyword",
        "Symbol" => "symbol",
        "PersistentVector" | "Vector" => "vector",
        "PersistentList" | "List" => "list",
        "PersistentMap" | "Map" => "map",
        "PersistentSet" | "Set" => "set",
        "Nil" => "nil",
        other => other,
    }
}

pub fn define_protocol(namespaces: &mut NamespaceTable, gc: &mut Gc, args: &[Value]) -> Result<Value, Diagnostic> {
    let name = as_str(args.first().ok_or_else(|| type_err("defprotocol requires a name"))?)?;
    let method_names: Vec<Rc<str>> = args[1..].iter().map(|v| as_str(v).map(Rc::from)).collect::<Result<_, _>>()?;

    let current_ns = namespaces.current.clone();
    let protocol_ref = gc.alloc(HeapObject::Protocol(ProtocolObj {
        name: Rc::from(name.as_str()),
        method_names: method_names.clone(),
        impls: RefCell::new(std::collections::HashMap::new()),
    }));
    let proto_var = namespaces.intern(&current_ns, &name);
    namespaces.bind_root(&proto_var, Value::Protocol(protocol_ref));

    for method_name in &method_names {
        let dispatch_ref = gc.alloc(HeapObject::MultiFn(MultiFnObj {
            name: method_name.clone(),
            dispatch_fn: first_arg_type_key_builtin(),
            methods: RefCell::new(std::collections::HashMap::new()),
            default: RefCell::new(None),
            hierarchy: RefCell::new(None),
            cache: RefCell::new(None),
        }));
        let method_var = namespaces.intern(&current_ns, method_name);
        namespaces.bind_root(&method_var, Value::MultiFn(dispatch_ref));
    }

    Ok(Value::Protocol(protocol_ref))
}

fn first_arg_type_key_builtin() -> Value {
    use lumen_core::value::BuiltinFnData;
    Value::BuiltinFn(Rc::new(BuiltinFnData {
        name: "__protocol-dispatch-key",
        min_arity: 1,
        max_arity: None,
        func: Box::new(|args| Ok(Value::string(args[0].type_key()))),
    }))
}

pub fn extend_type(namespaces: &mut NamespaceTable, gc: &mut Gc, args: &[Value]) -> Result<Value, Diagnostic> {
    let type_key = match &args[0] {
        Value::Nil => "nil".to_string(),
        v => normalize_type_key(&as_str(v)?).to_string(),
    };
    let protocol_name = as_str(&args[1])?;
    let protocol_var = resolve_var_cell(namespaces, None, &protocol_name)
        .ok_or_else(|| name_err(format!("unable to resolve protocol: {protocol_name}")))?;
    let Some(Value::Protocol(protocol_ref)) = protocol_var.borrow().root.clone() else {
        return Err(type_err(format!("{protocol_name} is not a protocol")));
    };

    let mut entries = Vec::new();
    let mut rest = &args[2..];
    while rest.len() >= 2 {
        entries.push((as_str(&rest[0])?, rest[1].clone()));
        rest = &rest[2..];
    }

    {
        let HeapObject::Protocol(p) = gc.get(protocol_ref) else {
            return Err(type_err("corrupt protocol object"));
        };
        let mut impls = p.impls.borrow_mut();
        let entry = impls.entry(type_key.clone()).or_default();
        for (method_name, fn_value) in &entries {
            entry.insert(method_name.clone(), fn_value.clone());
        }
    }

    for (method_name, fn_value) in entries {
        let method_var = resolve_var_cell(namespaces, None, &method_name)
            .ok_or_else(|| name_err(format!("unable to resolve protocol method: {method_name}")))?;
        let root = method_var.borrow().root.clone();
        if let Some(Value::MultiFn(method_ref)) = root {
            let HeapObject::MultiFn(m) = gc.get(method_ref) else {
                continue;
            };
            m.methods.borrow_mut().insert(HashKey(Value::string(type_key.clone())), fn_value);
            *m.cache.borrow_mut() = None;
        }
    }

    Ok(Value::Nil)
}

pub fn reify(namespaces: &mut NamespaceTable, gc: &mut Gc, args: &[Value]) -> Result<Value, Diagnostic> {
    let Value::Int(protocol_count) = args[0] else {
        return Err(type_err("reify expects a protocol count"));
    };
    let protocol_count = protocol_count as usize;
    let protocol_names: Vec<String> = args[1..1 + protocol_count].iter().map(as_str).collect::<Result<_, _>>()?;
    let method_pairs = &args[1 + protocol_count..];

    // Mints a unique type name by allocating a throwaway heap slot purely
    // for its generation-stamped identity.
    let marker = gc.alloc(HeapObject::Atom(lumen_core::heap::AtomObj {
        value: RefCell::new(Value::Nil),
        meta: RefCell::new(None),
        watchers: RefCell::new(Vec::new()),
    }));
    let type_name: Rc<str> = Rc::from(format!("reify#{}", marker.identity()));

    let mut rest = method_pairs;
    while rest.len() >= 2 {
        let method_name = as_str(&rest[0])?;
        let fn_value = rest[1].clone();
        rest = &rest[2..];

        for protocol_name in &protocol_names {
            let protocol_var = resolve_var_cell(namespaces, None, protocol_name)
                .ok_or_else(|| name_err(format!("unable to resolve protocol: {protocol_name}")))?;
            let root = protocol_var.borrow().root.clone();
            if let Some(Value::Protocol(protocol_ref)) = root {
                let HeapObject::Protocol(p) = gc.get(protocol_ref) else { continue };
                p.impls
                    .borrow_mut()
                    .entry(type_name.to_string())
                    .or_default()
                    .insert(method_name.clone(), fn_value.clone());
            }
        }
        if let Some(method_var) = resolve_var_cell(namespaces, None, &method_name) {
            if let Some(Value::MultiFn(method_ref)) = method_var.borrow().root.clone() {
                if let HeapObject::MultiFn(m) = gc.get(method_ref) {
                    m.methods.borrow_mut().insert(HashKey(Value::string(type_name.to_string())), fn_value);
                    *m.cache.borrow_mut() = None;
                }
            }
        }
    }

    let mut fields = lumen_core::PersistentMap::new();
    fields = fields.assoc(Value::keyword(None, "__reify_type"), Value::string(type_name.to_string()));
    Ok(Value::Record(Rc::new(lumen_core::value::RecordData {
        type_name,
        fields: Value::Map(Rc::new(fields)),
    })))
}

pub fn make_multi_fn(gc: &mut Gc, name: Rc<str>, dispatch_fn: Value, hierarchy: Option<Value>) -> GcRef {
    gc.alloc(HeapObject::MultiFn(MultiFnObj {
        name,
        dispatch_fn,
        methods: RefCell::new(std::collections::HashMap::new()),
        default: RefCell::new(None),
        hierarchy: RefCell::new(hierarchy),
        cache: RefCell::new(None),
    }))
}

pub fn install_method(gc: &mut Gc, gcref: GcRef, dispatch_val: Value, fn_value: Value) -> Result<(), Diagnostic> {
    let HeapObject::MultiFn(m) = gc.get(gcref) else {
        return Err(type_err("not a multimethod"));
    };
    if matches!(&dispatch_val, Value::Keyword(id) if id.ns.is_none() && &*id.name == "default") {
        *m.default.borrow_mut() = Some(fn_value.clone());
    }
    m.methods.borrow_mut().insert(HashKey(dispatch_val), fn_value);
    *m.cache.borrow_mut() = None;
    Ok(())
}

/// `isa?`: equal values, or an ancestry path through the hierarchy map
/// (`{child (parent ...)}` held in the `global-hierarchy` atom).
pub fn isa_rel(gc: &Gc, namespaces: &NamespaceTable, child: &Value, parent: &Value) -> bool {
    if lumen_core::value_eq(child, parent) {
        return true;
    }
    let Some(h) = hierarchy_map(gc, namespaces) else {
        return false;
    };
    let mut frontier = vec![child.clone()];
    let mut guard = 0;
    while let Some(cur) = frontier.pop() {
        guard += 1;
        if guard > 10_000 {
            break;
        }
        let Value::Map(m) = &h else { break };
        if let Some(parents) = m.get(&cur) {
            for p in iter_seqable(&parents) {
                if lumen_core::value_eq(&p, parent) {
                    return true;
                }
                frontier.push(p);
            }
        }
    }
    false
}

fn hierarchy_map(gc: &Gc, namespaces: &NamespaceTable) -> Option<Value> {
    let var = namespaces.resolve_in_current("global-hierarchy")?;
    let root = var.borrow().root.clone()?;
    match root {
        Value::Atom(r) => {
            let HeapObject::Atom(a) = gc.get(r) else { return None };
            Some(a.value.borrow().clone())
        }
        other => Some(other),
    }
}

fn iter_seqable(v: &Value) -> Vec<Value> {
    match v {
        Value::List(items) | Value::Vector(items) => items.iter().cloned().collect(),
        Value::Set(items) => items.iter().map(|hk| hk.0.clone()).collect(),
        Value::Nil => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Multimethod call: dispatch-fn, then cache, exact method, hierarchy
/// walk, `:default`, in that order.
pub fn call_multi_fn(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    gcref: GcRef,
    args: Vec<Value>,
) -> Result<Value, Diagnostic> {
    let (dispatch_fn, cached, default) = {
        let HeapObject::MultiFn(m) = gc.get(gcref) else {
            return Err(type_err("not a multimethod"));
        };
        (m.dispatch_fn.clone(), m.cache.borrow().clone(), m.default.borrow().clone())
    };
    let dispatch_val = crate::dispatch::call_fn_val(arena, namespaces, gc, dynamic, &dispatch_fn, args.clone())?;

    if let Some((cached_key, cached_method)) = &cached {
        if lumen_core::value_eq(cached_key, &dispatch_val) {
            return crate::dispatch::call_fn_val(arena, namespaces, gc, dynamic, cached_method, args);
        }
    }

    let method = {
        let HeapObject::MultiFn(m) = gc.get(gcref) else {
            return Err(type_err("not a multimethod"));
        };
        let methods = m.methods.borrow();
        methods.get(&HashKey(dispatch_val.clone())).cloned().or_else(|| {
            methods
                .iter()
                .find(|(k, _)| {
                    !matches!(&k.0, Value::Keyword(id) if id.ns.is_none() && &*id.name == "default")
                        && isa_rel(gc, namespaces, &dispatch_val, &k.0)
                })
                .map(|(_, v)| v.clone())
        })
    };

    let method = match method.or(default) {
        Some(m) => m,
        None => {
            let name = {
                let HeapObject::MultiFn(m) = gc.get(gcref) else { unreachable!() };
                m.name.clone()
            };
            return Err(Diagnostic::new(
                Phase::Eval,
                ErrorKind::ValueError,
                format!(
                    "no method in multimethod '{}' for dispatch value: {}",
                    name,
                    crate::builtins::display_value(&dispatch_val)
                ),
                Location::default(),
            ));
        }
    };

    {
        let HeapObject::MultiFn(m) = gc.get(gcref) else {
            unreachable!()
        };
        *m.cache.borrow_mut() = Some((dispatch_val, method.clone()));
    }

    crate::dispatch::call_fn_val(arena, namespaces, gc, dynamic, &method, args)
}
