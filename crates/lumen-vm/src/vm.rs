//! Stack-based bytecode interpreter.
//!
//! One `Vm` value holds the operand stack, the locals slab, the call
//! frames, and the try-handler stack. A bytecode fn calling another
//! bytecode fn pushes a frame on the same `Vm`; only a call that leaves
//! bytecode (a builtin, a tree-walk closure, a multimethod) goes back out
//! through the dispatcher. Var-load sites keep a one-slot inline cache
//! keyed by the namespace table's version counter.

use lumen_core::bytecode::{FnProto, Opcode};
use lumen_core::heap::{FnBody, FnObj, HeapObject};
use lumen_core::value::HashKey;
use lumen_core::var::VarRc;
use lumen_core::{Diagnostic, ErrorKind, Gc, Location, NodeArena, Phase, Value};
use lumen_env::{DynamicFrames, NamespaceTable};
use std::collections::HashMap;
use std::rc::Rc;

use crate::builtins::{numeric_binop, numeric_cmp, numeric_mod, numeric_rem, ArithOp};
use crate::dispatch::{self, runtime_roots, DepthGuard};
use crate::lazy;

const MAX_FRAMES: usize = 256;
const STACK_LIMIT: usize = 65536;

struct Frame {
    proto: Rc<FnProto>,
    ip: usize,
    locals_base: usize,
    stack_base: usize,
    captures: HashMap<Rc<str>, Value>,
    saved_ns: Rc<str>,
}

struct Handler {
    frame_index: usize,
    handler_ip: usize,
    sp_snapshot: usize,
    locals_len: usize,
    saved_ns: Rc<str>,
}

pub struct Vm<'a> {
    arena: &'a NodeArena,
    namespaces: &'a mut NamespaceTable,
    gc: &'a mut Gc,
    dynamic: &'a mut DynamicFrames,
    stack: Vec<Value>,
    locals: Vec<Value>,
    frames: Vec<Frame>,
    handlers: Vec<Handler>,
    icache: HashMap<(usize, usize), (u64, VarRc)>,
}

/// Executes one fn proto to completion and returns its value.
pub fn run_proto(
    arena: &NodeArena,
    namespaces: &mut NamespaceTable,
    gc: &mut Gc,
    dynamic: &mut DynamicFrames,
    proto: &Rc<FnProto>,
    captures: &HashMap<Rc<str>, Value>,
    args: Vec<Value>,
) -> Result<Value, Diagnostic> {
    let _depth = DepthGuard::enter()?;
    let mut vm = Vm {
        arena,
        namespaces,
        gc,
        dynamic,
        stack: Vec::with_capacity(64),
        locals: Vec::with_capacity(32),
        frames: Vec::with_capacity(8),
        handlers: Vec::new(),
        icache: HashMap::new(),
    };
    vm.push_frame(proto.clone(), captures.clone(), args)?;
    vm.run()
}

fn internal_err(msg: impl Into<String>, location: Location) -> Diagnostic {
    Diagnostic::new(Phase::Eval, ErrorKind::InternalError, msg, location)
}

impl<'a> Vm<'a> {
    fn loc(&self) -> Location {
        match self.frames.last() {
            Some(f) => {
                let s = f.proto.source_at(f.ip.saturating_sub(1));
                Location::new(s.file.to_string(), s.line, s.column)
            }
            None => Location::default(),
        }
    }

    fn push_frame(
        &mut self,
        proto: Rc<FnProto>,
        captures: HashMap<Rc<str>, Value>,
        args: Vec<Value>,
    ) -> Result<(), Diagnostic> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(internal_err("call frame overflow", self.loc()));
        }
        let locals_base = self.locals.len();
        self.locals
            .resize(locals_base + proto.local_count as usize, Value::Nil);
        for i in 0..proto.arity {
            self.locals[locals_base + i] = args.get(i).cloned().unwrap_or(Value::Nil);
        }
        if proto.is_variadic {
            let rest = if args.len() > proto.arity {
                Value::List(args[proto.arity..].iter().cloned().collect())
            } else {
                Value::Nil
            };
            self.locals[locals_base + proto.arity] = rest;
        }
        let saved_ns = self.namespaces.current.clone();
        if let Some(ns) = &proto.defining_ns {
            self.namespaces.set_current(ns);
        }
        self.frames.push(Frame {
            proto,
            ip: 0,
            locals_base,
            stack_base: self.stack.len(),
            captures,
            saved_ns,
        });
        Ok(())
    }

    fn run(&mut self) -> Result<Value, Diagnostic> {
        loop {
            match self.step() {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(mut diag) => {
                    if diag.location.line.is_none() {
                        diag.location = self.loc();
                    }
                    if diag.is_catchable() && !self.handlers.is_empty() {
                        self.unwind_to_handler(&diag);
                    } else {
                        return Err(diag);
                    }
                }
            }
        }
    }

    /// Errors are caught at instruction granularity: discard the stack
    /// above the handler's snapshot, bind the exception value, continue
    /// at the handler's catch code.
    fn unwind_to_handler(&mut self, diag: &Diagnostic) {
        let handler = self.handlers.pop().expect("handler stack checked non-empty");
        self.frames.truncate(handler.frame_index + 1);
        self.stack.truncate(handler.sp_snapshot);
        self.locals.truncate(handler.locals_len);
        self.namespaces.set_current(&handler.saved_ns);
        self.stack.push(crate::builtins::diagnostic_to_value(diag));
        self.frames
            .last_mut()
            .expect("handler frame still live")
            .ip = handler.handler_ip;
    }

    fn pop(&mut self) -> Result<Value, Diagnostic> {
        self.stack
            .pop()
            .ok_or_else(|| internal_err("operand stack underflow", self.loc()))
    }

    fn push(&mut self, v: Value) -> Result<(), Diagnostic> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(internal_err("operand stack overflow", self.loc()));
        }
        self.stack.push(v);
        Ok(())
    }

    fn constant(&self, operand: u16) -> Result<Value, Diagnostic> {
        let frame = self.frames.last().expect("live frame");
        frame
            .proto
            .constants
            .get(operand as usize)
            .cloned()
            .ok_or_else(|| internal_err("constant index out of range", self.loc()))
    }

    fn step(&mut self) -> Result<Option<Value>, Diagnostic> {
        let (instr, frame_idx) = {
            let frame = self.frames.last().expect("live frame");
            let Some(instr) = frame.proto.code.get(frame.ip).copied() else {
                return Err(internal_err("instruction pointer past end of code", self.loc()));
            };
            (instr, self.frames.len() - 1)
        };
        self.frames[frame_idx].ip += 1;

        match instr.op {
            Opcode::ConstLoad => {
                let v = self.constant(instr.operand)?;
                self.push(v)?;
            }
            Opcode::Nil => self.push(Value::Nil)?,
            Opcode::True => self.push(Value::Bool(true))?,
            Opcode::False => self.push(Value::Bool(false))?,

            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::PopUnder => {
                let top = self.pop()?;
                self.pop()?;
                self.push(top)?;
            }
            Opcode::Dup => {
                let top = self.pop()?;
                self.push(top.clone())?;
                self.push(top)?;
            }

            Opcode::LocalLoad => {
                let base = self.frames[frame_idx].locals_base;
                let v = self
                    .locals
                    .get(base + instr.operand as usize)
                    .cloned()
                    .ok_or_else(|| internal_err("local slot out of range", self.loc()))?;
                self.push(v)?;
            }
            Opcode::LocalStore => {
                let v = self.pop()?;
                let base = self.frames[frame_idx].locals_base;
                let slot = base + instr.operand as usize;
                if slot >= self.locals.len() {
                    return Err(internal_err("local slot out of range", self.loc()));
                }
                self.locals[slot] = v;
            }

            Opcode::UpvalueLoad => {
                let frame = &self.frames[frame_idx];
                let name = frame
                    .proto
                    .capture_names
                    .get(instr.operand as usize)
                    .cloned()
                    .ok_or_else(|| internal_err("upvalue index out of range", self.loc()))?;
                let v = frame.captures.get(&name).cloned().unwrap_or(Value::Nil);
                self.push(v)?;
            }
            Opcode::UpvalueStore => {
                let v = self.pop()?;
                let frame = &mut self.frames[frame_idx];
                if let Some(name) = frame.proto.capture_names.get(instr.operand as usize).cloned() {
                    frame.captures.insert(name, v);
                }
            }

            Opcode::VarLoad => self.op_var_load(instr.operand, true)?,
            Opcode::VarLoadDynamic => self.op_var_load(instr.operand, false)?,
            Opcode::Def => self.op_def(instr.operand, false)?,
            Opcode::DefMacro => self.op_def(instr.operand, true)?,
            Opcode::Defmulti => {
                let dispatch_fn = self.pop()?;
                let Value::Symbol(ident) = self.constant(instr.operand)? else {
                    return Err(internal_err("defmulti constant must be a symbol", self.loc()));
                };
                let gcref = crate::protocol::make_multi_fn(self.gc, ident.name.clone(), dispatch_fn, None);
                let current = self.namespaces.current.to_string();
                let var = self.namespaces.intern(&current, &ident.name);
                self.namespaces.bind_root(&var, Value::MultiFn(gcref));
                self.push(Value::VarRef(var))?;
            }
            Opcode::Defmethod => {
                let fn_value = self.pop()?;
                let dispatch_val = self.pop()?;
                let Value::Symbol(ident) = self.constant(instr.operand)? else {
                    return Err(internal_err("defmethod constant must be a symbol", self.loc()));
                };
                let var = dispatch::resolve_var_cell(self.namespaces, ident.ns.as_deref(), &ident.name)
                    .ok_or_else(|| {
                        Diagnostic::new(
                            Phase::Eval,
                            ErrorKind::NameError,
                            format!("unable to resolve multimethod: {}", ident.name),
                            self.loc(),
                        )
                    })?;
                let Some(Value::MultiFn(gcref)) = var.borrow().root.clone() else {
                    return Err(Diagnostic::new(
                        Phase::Eval,
                        ErrorKind::TypeError,
                        format!("{} is not a multimethod", ident.name),
                        self.loc(),
                    ));
                };
                crate::protocol::install_method(self.gc, gcref, dispatch_val, fn_value)?;
                self.push(Value::MultiFn(gcref))?;
            }
            Opcode::LazySeq => {
                let thunk = self.pop()?;
                let v = lazy::new_lazy_seq(self.gc, thunk);
                self.push(v)?;
            }

            Opcode::Jump => {
                let frame = &mut self.frames[frame_idx];
                frame.ip = (frame.ip as i64 + instr.signed_operand() as i64) as usize;
            }
            Opcode::JumpIfFalse => {
                let cond = self.pop()?;
                if !cond.is_truthy() {
                    let frame = &mut self.frames[frame_idx];
                    frame.ip = (frame.ip as i64 + instr.signed_operand() as i64) as usize;
                }
            }
            Opcode::JumpBack | Opcode::Recur => {
                let frame = &mut self.frames[frame_idx];
                frame.ip -= instr.operand as usize;
            }

            Opcode::Call | Opcode::TailCall => return self.op_call(instr.operand as usize).map(|_| None),
            Opcode::Ret => {
                let result = self.pop()?;
                let frame = self.frames.pop().expect("live frame");
                self.locals.truncate(frame.locals_base);
                self.stack.truncate(frame.stack_base);
                if self.frames.is_empty() {
                    // The outermost frame keeps its namespace effects: a
                    // top-level `(ns a)` must survive the form's return.
                    return Ok(Some(result));
                }
                self.namespaces.set_current(&frame.saved_ns);
                self.push(result)?;
            }
            Opcode::Closure => self.op_closure(instr.operand)?,

            Opcode::ListNew => {
                let items = self.pop_n(instr.operand as usize)?;
                self.push(Value::List(items.into_iter().collect()))?;
            }
            Opcode::VectorNew => {
                let items = self.pop_n(instr.operand as usize)?;
                self.push(Value::Vector(items.into_iter().collect()))?;
            }
            Opcode::MapNew => {
                let items = self.pop_n(instr.operand as usize)?;
                let mut m = lumen_core::PersistentMap::new();
                for pair in items.chunks(2) {
                    if pair.len() == 2 {
                        m = m.assoc(pair[0].clone(), pair[1].clone());
                    }
                }
                self.push(Value::Map(Rc::new(m)))?;
            }
            Opcode::SetNew => {
                let items = self.pop_n(instr.operand as usize)?;
                self.push(Value::Set(items.into_iter().map(HashKey).collect()))?;
            }

            Opcode::TryBegin => {
                let frame = &self.frames[frame_idx];
                let handler_ip = (frame.ip as i64 + instr.signed_operand() as i64) as usize;
                self.handlers.push(Handler {
                    frame_index: frame_idx,
                    handler_ip,
                    sp_snapshot: self.stack.len(),
                    locals_len: self.locals.len(),
                    saved_ns: self.namespaces.current.clone(),
                });
            }
            Opcode::TryEnd => {
                self.handlers.pop();
            }
            Opcode::Throw => {
                let v = self.pop()?;
                return Err(Diagnostic::thrown(v, self.loc()));
            }

            Opcode::Add => self.op_arith(ArithOp::Add)?,
            Opcode::Sub => self.op_arith(ArithOp::Sub)?,
            Opcode::Mul => self.op_arith(ArithOp::Mul)?,
            Opcode::Div => self.op_arith(ArithOp::Div)?,
            Opcode::Mod => {
                let (a, b) = self.pop_pair()?;
                let r = numeric_mod(&a, &b)?;
                self.push(r)?;
            }
            Opcode::Rem => {
                let (a, b) = self.pop_pair()?;
                let r = numeric_rem(&a, &b)?;
                self.push(r)?;
            }
            Opcode::Lt => self.op_cmp(std::cmp::Ordering::is_lt)?,
            Opcode::Le => self.op_cmp(std::cmp::Ordering::is_le)?,
            Opcode::Gt => self.op_cmp(std::cmp::Ordering::is_gt)?,
            Opcode::Ge => self.op_cmp(std::cmp::Ordering::is_ge)?,
            Opcode::Eq => {
                let eq = self.op_eq()?;
                self.push(Value::Bool(eq))?;
            }
            Opcode::Neq => {
                let eq = self.op_eq()?;
                self.push(Value::Bool(!eq))?;
            }

            Opcode::Trap => {
                return Err(internal_err("unsupported construct reached at run time", self.loc()));
            }
        }
        Ok(None)
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Diagnostic> {
        if self.stack.len() < n {
            return Err(internal_err("operand stack underflow", self.loc()));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_pair(&mut self) -> Result<(Value, Value), Diagnostic> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    fn op_arith(&mut self, op: ArithOp) -> Result<(), Diagnostic> {
        let (a, b) = self.pop_pair()?;
        let r = numeric_binop(&a, &b, op)?;
        self.push(r)
    }

    fn op_cmp(&mut self, keep: fn(std::cmp::Ordering) -> bool) -> Result<(), Diagnostic> {
        let (a, b) = self.pop_pair()?;
        let ord = numeric_cmp(&a, &b)?;
        self.push(Value::Bool(keep(ord)))
    }

    /// Equality realizes lazy operands first, so `(= (map inc xs) ys)`
    /// compares values rather than cell identities.
    fn op_eq(&mut self) -> Result<bool, Diagnostic> {
        let (a, b) = self.pop_pair()?;
        let (a, b) = if matches!(a, Value::LazySeq(_) | Value::Cons(_)) || matches!(b, Value::LazySeq(_) | Value::Cons(_)) {
            (
                lazy::deep_realize(self.arena, self.namespaces, self.gc, self.dynamic, &a)?,
                lazy::deep_realize(self.arena, self.namespaces, self.gc, self.dynamic, &b)?,
            )
        } else {
            (a, b)
        };
        Ok(lumen_core::value_eq(&a, &b))
    }

    fn op_var_load(&mut self, operand: u16, use_cache: bool) -> Result<(), Diagnostic> {
        let frame = self.frames.last().expect("live frame");
        let site = (Rc::as_ptr(&frame.proto) as usize, frame.ip - 1);
        let Value::Symbol(ident) = self.constant(operand)? else {
            return Err(internal_err("var-load constant must be a symbol", self.loc()));
        };

        let version = self.namespaces.version();
        let cached = if use_cache {
            self.icache
                .get(&site)
                .filter(|(v, _)| *v == version)
                .map(|(_, var)| var.clone())
        } else {
            None
        };
        let var = match cached {
            Some(var) => var,
            None => {
                let var = dispatch::resolve_var_cell(self.namespaces, ident.ns.as_deref(), &ident.name)
                    .ok_or_else(|| {
                        Diagnostic::new(
                            Phase::Eval,
                            ErrorKind::NameError,
                            format!("unable to resolve symbol: {ident}"),
                            self.loc(),
                        )
                    })?;
                if use_cache {
                    self.icache.insert(site, (version, var.clone()));
                }
                var
            }
        };
        let value = self.dynamic.deref(&var).ok_or_else(|| {
            Diagnostic::new(
                Phase::Eval,
                ErrorKind::NameError,
                format!("var {ident} is unbound"),
                self.loc(),
            )
        })?;
        self.push(value)
    }

    fn op_def(&mut self, operand: u16, is_macro: bool) -> Result<(), Diagnostic> {
        let Value::Vector(parts) = self.constant(operand)? else {
            return Err(internal_err("def constant must be a [symbol flags] vector", self.loc()));
        };
        let (Some(Value::Symbol(ident)), Some(Value::Int(flags))) = (parts.get(0), parts.get(1)) else {
            return Err(internal_err("def constant must be a [symbol flags] vector", self.loc()));
        };
        let value = self.pop()?;
        let current = self.namespaces.current.to_string();
        let var = self.namespaces.intern(&current, &ident.name);
        {
            let mut cell = var.borrow_mut();
            cell.meta.is_dynamic |= flags & 1 != 0;
            cell.meta.is_private = flags & 2 != 0;
            cell.meta.is_const = flags & 4 != 0;
            cell.meta.is_macro |= is_macro;
        }
        self.namespaces.bind_root(&var, value);
        self.push(Value::VarRef(var))
    }

    fn op_closure(&mut self, operand: u16) -> Result<(), Diagnostic> {
        let template = {
            let frame = self.frames.last().expect("live frame");
            frame
                .proto
                .child_protos
                .get(operand as usize)
                .cloned()
                .ok_or_else(|| internal_err("closure proto index out of range", self.loc()))?
        };
        let popped_count = template.capture_names.len() - usize::from(template.captures_self);
        let values = self.pop_n(popped_count)?;
        let mut captures: HashMap<Rc<str>, Value> = HashMap::new();
        for (name, value) in template.capture_names.iter().zip(values) {
            captures.insert(name.clone(), value);
        }
        let gcref = self.gc.alloc(HeapObject::Fn(FnObj {
            name: template.name.clone(),
            defining_ns: self.namespaces.current.clone(),
            captures,
            body: FnBody::Bytecode(template.clone()),
            meta: None,
        }));
        if template.captures_self {
            if let Some(self_name) = template.capture_names.last() {
                let self_val = Value::Fn(gcref);
                if let HeapObject::Fn(f) = self.gc.get_mut(gcref) {
                    f.captures.insert(self_name.clone(), self_val);
                }
            }
        }
        self.push(Value::Fn(gcref))
    }

    fn op_call(&mut self, argc: usize) -> Result<(), Diagnostic> {
        if dispatch::at_outermost_eval() && self.gc.should_collect() {
            let mut roots = runtime_roots(self.namespaces, self.dynamic);
            roots.extend(self.stack.iter().cloned());
            roots.extend(self.locals.iter().cloned());
            for frame in &self.frames {
                roots.extend(frame.captures.values().cloned());
            }
            self.gc.collect(&roots);
        }

        let args = self.pop_n(argc)?;
        let callee = self.pop()?;

        // Bytecode-to-bytecode calls stay inside this interpreter: push a
        // frame instead of recursing through the dispatcher.
        if let Value::Fn(gcref) = &callee {
            let is_bytecode = matches!(
                self.gc.get(*gcref),
                HeapObject::Fn(FnObj { body: FnBody::Bytecode(_), .. })
            );
            if is_bytecode {
                let (proto, captures) = {
                    let HeapObject::Fn(f) = self.gc.get(*gcref) else { unreachable!() };
                    let FnBody::Bytecode(proto) = &f.body else { unreachable!() };
                    (proto.clone(), f.captures.clone())
                };
                let proto = dispatch::pick_bytecode_proto(&proto, args.len()).map_err(|msg| {
                    Diagnostic::new(Phase::Eval, ErrorKind::ArityError, msg, self.loc())
                })?;
                return self.push_frame(proto, captures, args);
            }
        }

        let result = dispatch::call_fn_val(self.arena, self.namespaces, self.gc, self.dynamic, &callee, args)?;
        self.push(result)
    }
}
