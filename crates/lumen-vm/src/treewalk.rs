//! Direct Node -> Value interpreter.
//!
//! A `TreeWalk` frame exists per closure invocation; `recur` is modeled
//! as a second `Flow` arm that bubbles up to the nearest enclosing
//! `loop`/fn body, which rebinds and re-enters. Host-level recursion
//! depth is bounded through the shared evaluator depth counter, so a
//! runaway recursion surfaces as a non-catchable error instead of
//! overflowing the host stack.

use lumen_core::heap::{FnBody, FnObj, HeapObject, TreeWalkArity};
use lumen_core::node::{CatchClause, NodeArena, NodeId, NodeKind, SourceInfo};
use lumen_core::{Diagnostic, ErrorKind, Gc, Location, Phase, Value};
use lumen_env::{DynamicFrames, NamespaceTable};
use std::collections::HashMap;
use std::rc::Rc;

use crate::builtins;
use crate::dispatch::{self, DepthGuard};
use crate::lazy;

pub enum Flow {
    Value(Value),
    Recur(Vec<Value>),
}

macro_rules! value_of {
    ($self:ident, $id:expr) => {
        match $self.eval($id)? {
            Flow::Value(v) => v,
            Flow::Recur(args) => return Ok(Flow::Recur(args)),
        }
    };
}

pub struct TreeWalk<'a> {
    pub arena: &'a NodeArena,
    pub namespaces: &'a mut NamespaceTable,
    pub gc: &'a mut Gc,
    pub dynamic: &'a mut DynamicFrames,
    locals: Vec<(Rc<str>, Value)>,
}

/// Evaluates one top-level node with no enclosing closure frame.
pub fn eval_node(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    node: NodeId,
) -> Result<Value, Diagnostic> {
    let _depth = DepthGuard::enter()?;
    let mut tw = TreeWalk {
        arena,
        namespaces,
        gc,
        dynamic,
        locals: Vec::new(),
    };
    match tw.eval(node)? {
        Flow::Value(v) => Ok(v),
        Flow::Recur(_) => Err(Diagnostic::new(
            Phase::Eval,
            ErrorKind::SyntaxError,
            "recur used outside of a recur point",
            Location::default(),
        )),
    }
}

/// Runs one fn arity: binds captures and parameters, loops on `recur`.
pub fn call_arity(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    arity: &TreeWalkArity,
    captures: &HashMap<Rc<str>, Value>,
    args: Vec<Value>,
) -> Result<Value, Diagnostic> {
    let _depth = DepthGuard::enter()?;

    let fixed = arity.params.len();
    let mut args = args;
    let mut from_recur = false;
    loop {
        let mut locals: Vec<(Rc<str>, Value)> = captures.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (i, p) in arity.params.iter().enumerate() {
            locals.push((p.clone(), args.get(i).cloned().unwrap_or(Value::Nil)));
        }
        if let Some(v) = &arity.variadic {
            // A recur already hands the rest-parameter a single seq value;
            // an ordinary call packs the surplus arguments into one.
            let rest_val = if from_recur {
                args.get(fixed).cloned().unwrap_or(Value::Nil)
            } else if args.len() > fixed {
                Value::List(args[fixed..].iter().cloned().collect())
            } else {
                Value::Nil
            };
            locals.push((v.clone(), rest_val));
        }
        let mut tw = TreeWalk {
            arena,
            namespaces,
            gc,
            dynamic,
            locals,
        };
        match tw.eval(arity.body)? {
            Flow::Value(v) => return Ok(v),
            Flow::Recur(new_args) => {
                args = new_args;
                from_recur = true;
            }
        }
    }
}

impl<'a> TreeWalk<'a> {
    fn source(&self, id: NodeId) -> SourceInfo {
        self.arena.get(id).source.clone()
    }

    fn err(&self, id: NodeId, kind: ErrorKind, msg: impl Into<String>) -> Diagnostic {
        let s = self.source(id);
        Diagnostic::new(Phase::Eval, kind, msg, Location::new(s.file.to_string(), s.line, s.column))
    }

    fn lookup_local(&self, name: &str) -> Option<Value> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| &**n == name)
            .map(|(_, v)| v.clone())
    }

    fn eval(&mut self, id: NodeId) -> Result<Flow, Diagnostic> {
        let kind = self.arena.get(id).kind.clone();
        match kind {
            NodeKind::Constant(v) => Ok(Flow::Value(v)),
            NodeKind::Quote { value } => Ok(Flow::Value(value)),
            NodeKind::LocalRef { name } => match self.lookup_local(&name) {
                Some(v) => Ok(Flow::Value(v)),
                None => Err(self.err(id, ErrorKind::NameError, format!("unable to resolve local: {name}"))),
            },
            NodeKind::VarRef { ns, name } => {
                let var = dispatch::resolve_var_cell(self.namespaces, ns.as_deref(), &name)
                    .ok_or_else(|| self.err(id, ErrorKind::NameError, format!("unable to resolve symbol: {name}")))?;
                let value = self
                    .dynamic
                    .deref(&var)
                    .ok_or_else(|| self.err(id, ErrorKind::NameError, format!("var {name} is unbound")))?;
                Ok(Flow::Value(value))
            }
            NodeKind::VarForm { ns, name } => {
                let var = dispatch::resolve_var_cell(self.namespaces, ns.as_deref(), &name)
                    .ok_or_else(|| self.err(id, ErrorKind::NameError, format!("unable to resolve var: {name}")))?;
                Ok(Flow::Value(Value::VarRef(var)))
            }
            NodeKind::If { test, then, else_ } => {
                let test_val = value_of!(self, test);
                if test_val.is_truthy() {
                    self.eval(then)
                } else {
                    match else_ {
                        Some(e) => self.eval(e),
                        None => Ok(Flow::Value(Value::Nil)),
                    }
                }
            }
            NodeKind::Do { body } => self.eval_body(&body),
            NodeKind::Let { bindings, body } => {
                let base = self.locals.len();
                for b in &bindings {
                    let v = match self.eval(b.init)? {
                        Flow::Value(v) => v,
                        r @ Flow::Recur(_) => {
                            self.locals.truncate(base);
                            return Ok(r);
                        }
                    };
                    self.locals.push((b.name.clone(), v));
                }
                let result = self.eval_body(&body);
                self.locals.truncate(base);
                result
            }
            NodeKind::Letfn { names, inits, body } => self.eval_letfn(&names, &inits, &body),
            NodeKind::Loop { bindings, body } => {
                let base = self.locals.len();
                let mut slots = Vec::new();
                for b in &bindings {
                    let v = match self.eval(b.init)? {
                        Flow::Value(v) => v,
                        r @ Flow::Recur(_) => {
                            self.locals.truncate(base);
                            return Ok(r);
                        }
                    };
                    slots.push(self.locals.len());
                    self.locals.push((b.name.clone(), v));
                }
                let result = loop {
                    match self.eval_body(&body) {
                        Ok(Flow::Recur(new_vals)) => {
                            if new_vals.len() != slots.len() {
                                break Err(self.err(
                                    id,
                                    ErrorKind::ArityError,
                                    format!("recur expects {} args, got {}", slots.len(), new_vals.len()),
                                ));
                            }
                            for (slot, v) in slots.iter().zip(new_vals) {
                                self.locals[*slot].1 = v;
                            }
                        }
                        other => break other,
                    }
                };
                self.locals.truncate(base);
                result
            }
            NodeKind::Recur { args } => {
                let mut vals = Vec::new();
                for a in &args {
                    vals.push(value_of!(self, *a));
                }
                Ok(Flow::Recur(vals))
            }
            NodeKind::Fn { name, arities } => {
                let v = self.make_closure(&name, &arities);
                Ok(Flow::Value(v))
            }
            NodeKind::Call { callee, args } => {
                let callee_val = value_of!(self, callee);
                let mut arg_vals = Vec::new();
                for a in &args {
                    arg_vals.push(value_of!(self, *a));
                }
                let result =
                    dispatch::call_fn_val(self.arena, self.namespaces, self.gc, self.dynamic, &callee_val, arg_vals);
                result.map(Flow::Value).map_err(|mut diag| {
                    if diag.location.line.is_none() {
                        let s = self.source(id);
                        diag.location = Location::new(s.file.to_string(), s.line, s.column);
                    }
                    diag
                })
            }
            NodeKind::Def {
                name,
                init,
                doc,
                is_dynamic,
                is_private,
                is_const,
                is_macro,
            } => {
                let init_val = match init {
                    Some(i) => Some(value_of!(self, i)),
                    None => None,
                };
                let arglists = init.map(|i| self.arglists_of(i)).unwrap_or(None);
                let current = self.namespaces.current.to_string();
                let var = self.namespaces.intern(&current, &name);
                {
                    let mut cell = var.borrow_mut();
                    cell.meta.doc = doc;
                    cell.meta.is_dynamic |= is_dynamic;
                    cell.meta.is_private = is_private;
                    cell.meta.is_const = is_const;
                    cell.meta.is_macro |= is_macro;
                    if arglists.is_some() {
                        cell.meta.arglists = arglists;
                    }
                }
                if let Some(v) = init_val {
                    self.namespaces.bind_root(&var, v);
                }
                Ok(Flow::Value(Value::VarRef(var)))
            }
            NodeKind::Set { name, value } => {
                let v = value_of!(self, value);
                let var = dispatch::resolve_var_cell(self.namespaces, None, &name)
                    .ok_or_else(|| self.err(id, ErrorKind::NameError, format!("unable to resolve symbol: {name}")))?;
                if !var.borrow().meta.is_dynamic {
                    return Err(self.err(id, ErrorKind::TypeError, format!("{name} is not dynamic; set! requires a dynamic var binding")));
                }
                if !self.dynamic.set_top(&var, v.clone()) {
                    return Err(self.err(id, ErrorKind::NameError, format!("{name} has no active dynamic binding")));
                }
                Ok(Flow::Value(v))
            }
            NodeKind::Throw { value } => {
                let v = value_of!(self, value);
                let s = self.source(id);
                Err(Diagnostic::thrown(v, Location::new(s.file.to_string(), s.line, s.column)))
            }
            NodeKind::Try { body, catch, finally } => self.eval_try(body, catch, finally),
            NodeKind::Defprotocol { name, methods } => {
                let mut args = vec![Value::string(name.to_string())];
                args.extend(methods.iter().map(|m| Value::string(m.name.to_string())));
                let v = crate::protocol::define_protocol(self.namespaces, self.gc, &args)?;
                Ok(Flow::Value(v))
            }
            NodeKind::ExtendType { type_key, protocol, methods } => {
                let mut args = vec![match &type_key {
                    Some(tk) => Value::string(tk.to_string()),
                    None => Value::Nil,
                }];
                args.push(Value::string(protocol.to_string()));
                for (mname, fn_node) in &methods {
                    args.push(Value::string(mname.to_string()));
                    args.push(value_of!(self, *fn_node));
                }
                let v = crate::protocol::extend_type(self.namespaces, self.gc, &args)?;
                Ok(Flow::Value(v))
            }
            NodeKind::Reify { protocols, methods } => {
                let mut args = vec![Value::Int(protocols.len() as i64)];
                args.extend(protocols.iter().map(|p| Value::string(p.to_string())));
                for (mname, fn_node) in &methods {
                    args.push(Value::string(mname.to_string()));
                    args.push(value_of!(self, *fn_node));
                }
                let v = crate::protocol::reify(self.namespaces, self.gc, &args)?;
                Ok(Flow::Value(v))
            }
            NodeKind::Defmulti { name, dispatch_fn } => {
                let dispatch_val = value_of!(self, dispatch_fn);
                let gcref = crate::protocol::make_multi_fn(self.gc, name.clone(), dispatch_val, None);
                let current = self.namespaces.current.to_string();
                let var = self.namespaces.intern(&current, &name);
                self.namespaces.bind_root(&var, Value::MultiFn(gcref));
                Ok(Flow::Value(Value::VarRef(var)))
            }
            NodeKind::Defmethod {
                multi_name,
                dispatch_val,
                fn_node,
            } => {
                let dval = value_of!(self, dispatch_val);
                let fval = value_of!(self, fn_node);
                let var = dispatch::resolve_var_cell(self.namespaces, None, &multi_name)
                    .ok_or_else(|| self.err(id, ErrorKind::NameError, format!("unable to resolve multimethod: {multi_name}")))?;
                let Some(Value::MultiFn(gcref)) = var.borrow().root.clone() else {
                    return Err(self.err(id, ErrorKind::TypeError, format!("{multi_name} is not a multimethod")));
                };
                crate::protocol::install_method(self.gc, gcref, dval, fval)?;
                Ok(Flow::Value(Value::MultiFn(gcref)))
            }
            NodeKind::LazySeqNode { thunk_fn } => {
                let thunk = value_of!(self, thunk_fn);
                Ok(Flow::Value(lazy::new_lazy_seq(self.gc, thunk)))
            }
            NodeKind::CaseStar {
                discriminant,
                clauses,
                default,
                ..
            } => {
                let disc = value_of!(self, discriminant);
                let disc = lazy::deep_realize(self.arena, self.namespaces, self.gc, self.dynamic, &disc)?;
                for clause in &clauses {
                    if lumen_core::value_eq(&clause.test_value, &disc) {
                        return self.eval(clause.then);
                    }
                }
                self.eval(default)
            }
        }
    }

    fn eval_body(&mut self, body: &[NodeId]) -> Result<Flow, Diagnostic> {
        let mut result = Value::Nil;
        for n in body {
            match self.eval(*n)? {
                Flow::Value(v) => result = v,
                r @ Flow::Recur(_) => return Ok(r),
            }
        }
        Ok(Flow::Value(result))
    }

    /// `letfn`: create every closure first, then patch each closure's
    /// capture map with its siblings so mutual recursion resolves.
    fn eval_letfn(&mut self, names: &[Rc<str>], inits: &[NodeId], body: &[NodeId]) -> Result<Flow, Diagnostic> {
        let base = self.locals.len();
        for name in names {
            self.locals.push((name.clone(), Value::Nil));
        }
        let mut values = Vec::new();
        for (name, init) in names.iter().zip(inits.iter()) {
            let v = match self.eval(*init)? {
                Flow::Value(v) => v,
                r @ Flow::Recur(_) => {
                    self.locals.truncate(base);
                    return Ok(r);
                }
            };
            let slot = self
                .locals
                .iter()
                .rposition(|(n, _)| n == name)
                .expect("letfn name pre-bound");
            self.locals[slot].1 = v.clone();
            values.push(v);
        }
        for v in &values {
            if let Value::Fn(gcref) = v {
                if let HeapObject::Fn(f) = self.gc.get_mut(*gcref) {
                    for (name, sibling) in names.iter().zip(values.iter()) {
                        if f.captures.contains_key(name) {
                            f.captures.insert(name.clone(), sibling.clone());
                        }
                    }
                }
            }
        }
        let result = self.eval_body(body);
        self.locals.truncate(base);
        result
    }

    fn make_closure(&mut self, name: &Option<Rc<str>>, arities: &[lumen_core::node::FnArity]) -> Value {
        let mut captures: HashMap<Rc<str>, Value> = HashMap::new();
        for arity in arities {
            for c in &arity.captures {
                if !captures.contains_key(c) {
                    captures.insert(c.clone(), self.lookup_local(c).unwrap_or(Value::Nil));
                }
            }
        }
        let tw_arities: Vec<TreeWalkArity> = arities
            .iter()
            .map(|a| TreeWalkArity {
                params: a.params.clone(),
                variadic: a.variadic.clone(),
                body: a.body,
            })
            .collect();
        let gcref = self.gc.alloc(HeapObject::Fn(FnObj {
            name: name.clone(),
            defining_ns: self.namespaces.current.clone(),
            captures,
            body: FnBody::TreeWalk(tw_arities),
            meta: None,
        }));
        if let Some(n) = name {
            let self_val = Value::Fn(gcref);
            if let HeapObject::Fn(f) = self.gc.get_mut(gcref) {
                f.captures.insert(n.clone(), self_val);
            }
        }
        Value::Fn(gcref)
    }

    fn eval_try(
        &mut self,
        body: NodeId,
        catch: Option<CatchClause>,
        finally: Option<NodeId>,
    ) -> Result<Flow, Diagnostic> {
        let base = self.locals.len();
        let mut result = self.eval(body);

        if let (Err(diag), Some(catch)) = (&result, &catch) {
            if diag.is_catchable() && catch_matches(catch, diag) {
                let bound = builtins::diagnostic_to_value(diag);
                self.locals.push((catch.binding.clone(), bound));
                result = self.eval(catch.body);
                self.locals.truncate(base);
            }
        }

        if let Some(f) = finally {
            // The finally body runs on every path; its own failure wins
            // over the body's outcome, its value is discarded otherwise.
            match self.eval(f) {
                Ok(_) => {}
                Err(fin_err) => return Err(fin_err),
            }
        }
        result
    }

    fn arglists_of(&self, init: NodeId) -> Option<Value> {
        let NodeKind::Fn { arities, .. } = &self.arena.get(init).kind else {
            return None;
        };
        let lists: im::Vector<Value> = arities
            .iter()
            .map(|a| {
                let mut params: im::Vector<Value> =
                    a.params.iter().map(|p| Value::symbol(None, p)).collect();
                if let Some(v) = &a.variadic {
                    params.push_back(Value::symbol(None, "&"));
                    params.push_back(Value::symbol(None, v));
                }
                Value::Vector(params)
            })
            .collect();
        Some(Value::List(lists))
    }
}

fn catch_matches(catch: &CatchClause, diag: &Diagnostic) -> bool {
    if matches!(&*catch.class_name, "Exception" | "Throwable" | "Object" | "_") {
        return true;
    }
    let bound = builtins::diagnostic_to_value(diag);
    builtins::type_of(&bound) == *catch.class_name
}
