//! Node -> bytecode lowering: walks a `NodeArena` subtree and
//! produces an `FnProto` tree. One `Compiler` instance compiles one fn
//! arity (or the top-level form); nested `fn`/`reify`/`defmethod` bodies
//! recurse into fresh `Compiler`s and are stitched back in via
//! `FnProto::child_protos` and `Closure`.
//!
//! Anything the bytecode table has no dedicated opcode for (`set!`,
//! `defprotocol`, `extend-type`, `reify`, `(var x)`) lowers to a call
//! against a double-underscore runtime builtin, the same convention the
//! analyzer already uses for Java-interop rewrites (`__java-method`).
//! `lumen-vm` is responsible for interning these.

use lumen_core::bytecode::{disassemble, FnProto, Instr, Opcode};
use lumen_core::node::{CaseClause, FnArity, LocalBinding, NodeArena, NodeId, NodeKind, SourceInfo};
use lumen_core::value::Value;
use std::rc::Rc;

#[derive(Clone)]
struct LoopCtx {
    start: usize,
    slots: Vec<u16>,
}

struct Compiler<'a> {
    arena: &'a NodeArena,
    defining_ns: Option<Rc<str>>,
    constants: Vec<Value>,
    code: Vec<Instr>,
    source_map: Vec<SourceInfo>,
    scopes: Vec<Vec<(Rc<str>, u16)>>,
    next_slot: u16,
    capture_names: Vec<Rc<str>>,
    child_protos: Vec<Rc<FnProto>>,
    loop_stack: Vec<LoopCtx>,
}

fn arith_opcode(name: &str) -> Option<Opcode> {
    Some(match name {
        "+" => Opcode::Add,
        "-" => Opcode::Sub,
        "*" => Opcode::Mul,
        "/" => Opcode::Div,
        "mod" => Opcode::Mod,
        "rem" => Opcode::Rem,
        "<" => Opcode::Lt,
        "<=" => Opcode::Le,
        ">" => Opcode::Gt,
        ">=" => Opcode::Ge,
        "=" => Opcode::Eq,
        "not=" => Opcode::Neq,
        _ => return None,
    })
}

/// Catch-all class names that never re-throw (mirrors `Exception`/`_` in
/// host try/catch syntax).
fn is_catch_all(class_name: &str) -> bool {
    matches!(class_name, "Exception" | "Throwable" | "_" | ":default" | "Object")
}

impl<'a> Compiler<'a> {
    fn new(arena: &'a NodeArena, defining_ns: Option<Rc<str>>) -> Self {
        Compiler {
            arena,
            defining_ns,
            constants: Vec::new(),
            code: Vec::new(),
            source_map: Vec::new(),
            scopes: Vec::new(),
            next_slot: 0,
            capture_names: Vec::new(),
            child_protos: Vec::new(),
            loop_stack: Vec::new(),
        }
    }

    fn source_at(&self, id: NodeId) -> SourceInfo {
        self.arena.get(id).source.clone()
    }

    fn add_const(&mut self, v: Value) -> u16 {
        self.constants.push(v);
        (self.constants.len() - 1) as u16
    }

    fn emit(&mut self, op: Opcode, operand: u16, source: SourceInfo) -> usize {
        self.code.push(Instr::new(op, operand));
        self.source_map.push(source);
        self.code.len() - 1
    }

    /// Patches a forward `Jump`/`JumpIfFalse` placeholder at `offset` to
    /// land at `target`: a signed 16-bit offset measured from the
    /// instruction following the jump.
    fn patch_forward(&mut self, offset: usize, target: usize) {
        let diff = target as i64 - (offset as i64 + 1);
        self.code[offset].operand = diff as i16 as u16;
    }

    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }
    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn alloc_local(&mut self, name: Rc<str>) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.scopes.last_mut().expect("scope stack empty").push((name, slot));
        slot
    }

    fn resolve_local(&self, name: &str) -> Option<u16> {
        for scope in self.scopes.iter().rev() {
            for (n, slot) in scope.iter().rev() {
                if &**n == name {
                    return Some(*slot);
                }
            }
        }
        None
    }

    fn compile_seq(&mut self, body: &[NodeId]) {
        if body.is_empty() {
            self.emit(Opcode::Nil, 0, SourceInfo::unknown());
            return;
        }
        for (i, n) in body.iter().enumerate() {
            self.compile_node(*n);
            if i + 1 != body.len() {
                self.emit(Opcode::Pop, 0, self.source_at(*n));
            }
        }
    }

    fn compile_bindings(&mut self, bindings: &[LocalBinding]) -> Vec<u16> {
        let mut slots = Vec::new();
        for b in bindings {
            let source = self.source_at(b.init);
            self.compile_node(b.init);
            let slot = self.alloc_local(b.name.clone());
            self.emit(Opcode::LocalStore, slot, source);
            slots.push(slot);
        }
        slots
    }

    /// Pushes the builtin fn named `name` as the current call's callee,
    /// mirroring ordinary `Call` lowering (callee first, args after).
    fn push_builtin_ref(&mut self, name: &str, source: SourceInfo) {
        let idx = self.add_const(Value::symbol(None, name));
        self.emit(Opcode::VarLoad, idx, source);
    }

    fn compile_node(&mut self, id: NodeId) {
        let source = self.source_at(id);
        match self.arena.get(id).kind.clone() {
            NodeKind::Constant(v) => {
                let idx = self.add_const(v);
                self.emit(Opcode::ConstLoad, idx, source);
            }
            NodeKind::VarRef { ns, name } => {
                let idx = self.add_const(Value::symbol(ns.as_deref(), &name));
                self.emit(Opcode::VarLoad, idx, source);
            }
            NodeKind::LocalRef { name } => {
                if let Some(slot) = self.resolve_local(&name) {
                    self.emit(Opcode::LocalLoad, slot, source);
                } else {
                    // Not bound locally at compile time: treat as a dynamic
                    // var lookup rather than fail the whole compile.
                    let idx = self.add_const(Value::symbol(None, &name));
                    self.emit(Opcode::VarLoadDynamic, idx, source);
                }
            }
            NodeKind::If { test, then, else_ } => {
                self.compile_node(test);
                let jf = self.emit(Opcode::JumpIfFalse, 0, source.clone());
                self.compile_node(then);
                let j = self.emit(Opcode::Jump, 0, source.clone());
                let else_start = self.code.len();
                self.patch_forward(jf, else_start);
                match else_ {
                    Some(e) => self.compile_node(e),
                    None => {
                        self.emit(Opcode::Nil, 0, source);
                    }
                }
                let end = self.code.len();
                self.patch_forward(j, end);
            }
            NodeKind::Do { body } => self.compile_seq(&body),
            NodeKind::Let { bindings, body } => {
                self.push_scope();
                self.compile_bindings(&bindings);
                self.compile_seq(&body);
                self.pop_scope();
            }
            NodeKind::Letfn { names, inits, body } => {
                self.push_scope();
                for name in &names {
                    self.alloc_local(name.clone());
                }
                for (name, init) in names.iter().zip(inits.iter()) {
                    let init_source = self.source_at(*init);
                    self.compile_node(*init);
                    let slot = self.resolve_local(name).expect("letfn slot pre-allocated");
                    self.emit(Opcode::LocalStore, slot, init_source);
                }
                // Each closure captured its sibling slots before the later
                // ones were stored, so forward references hold nil at this
                // point. Rewrite every closure's sibling captures now that
                // all of them exist, which is what makes mutual recursion
                // resolve.
                if !names.is_empty() {
                    self.push_builtin_ref("__letfn-patch", source.clone());
                    for name in &names {
                        let nidx = self.add_const(Value::string(name.to_string()));
                        self.emit(Opcode::ConstLoad, nidx, source.clone());
                        let slot = self.resolve_local(name).expect("letfn slot pre-allocated");
                        self.emit(Opcode::LocalLoad, slot, source.clone());
                    }
                    self.emit(Opcode::Call, names.len() as u16 * 2, source.clone());
                    self.emit(Opcode::Pop, 0, source.clone());
                }
                self.compile_seq(&body);
                self.pop_scope();
            }
            NodeKind::Loop { bindings, body } => {
                self.push_scope();
                let slots = self.compile_bindings(&bindings);
                let start = self.code.len();
                self.loop_stack.push(LoopCtx { start, slots });
                self.compile_seq(&body);
                self.loop_stack.pop();
                self.pop_scope();
            }
            NodeKind::Recur { args } => {
                let Some(ctx) = self.loop_stack.last().cloned() else {
                    // No enclosing recur point in this compilation unit:
                    // emit a trap the VM raises with this node's source.
                    self.emit(Opcode::Trap, 0, source);
                    return;
                };
                for a in &args {
                    self.compile_node(*a);
                }
                for slot in ctx.slots.iter().rev() {
                    self.emit(Opcode::LocalStore, *slot, source.clone());
                }
                let here = self.code.len();
                let back = (here + 1 - ctx.start) as u16;
                self.emit(Opcode::JumpBack, back, source.clone());
                // Stack-balance filler: control never actually reaches past
                // here in a well-formed tail position, but every node must
                // leave exactly one value for whatever called compile_node.
                self.emit(Opcode::Nil, 0, source);
            }
            NodeKind::Fn { name, arities } => self.compile_fn_value(&name, &arities, source),
            NodeKind::Call { callee, args } => self.compile_call(callee, &args, source),
            NodeKind::Def {
                name,
                init,
                doc: _,
                is_dynamic,
                is_private,
                is_const,
                is_macro,
            } => {
                match init {
                    Some(i) => self.compile_node(i),
                    None => {
                        self.emit(Opcode::Nil, 0, source.clone());
                    }
                }
                let flags = (is_dynamic as i64) | ((is_private as i64) << 1) | ((is_const as i64) << 2);
                let idx = self.add_const(Value::Vector(im::vector![Value::symbol(None, &name), Value::Int(flags)]));
                let op = if is_macro { Opcode::DefMacro } else { Opcode::Def };
                self.emit(op, idx, source);
            }
            NodeKind::Set { name, value } => {
                self.push_builtin_ref("__set!", source.clone());
                let nidx = self.add_const(Value::symbol(None, &name));
                self.emit(Opcode::ConstLoad, nidx, source.clone());
                self.compile_node(value);
                self.emit(Opcode::Call, 2, source);
            }
            NodeKind::Quote { value } => {
                let idx = self.add_const(value);
                self.emit(Opcode::ConstLoad, idx, source);
            }
            NodeKind::Throw { value } => {
                self.compile_node(value);
                self.emit(Opcode::Throw, 0, source);
            }
            NodeKind::Try { body, catch, finally } => self.compile_try(body, catch, finally, source),
            NodeKind::Defprotocol { name, methods } => {
                self.push_builtin_ref("__defprotocol", source.clone());
                let nidx = self.add_const(Value::string(name.to_string()));
                self.emit(Opcode::ConstLoad, nidx, source.clone());
                for m in &methods {
                    let midx = self.add_const(Value::string(m.name.to_string()));
                    self.emit(Opcode::ConstLoad, midx, source.clone());
                }
                self.emit(Opcode::Call, 1 + methods.len() as u16, source);
            }
            NodeKind::ExtendType { type_key, protocol, methods } => {
                self.push_builtin_ref("__extend-type", source.clone());
                match &type_key {
                    Some(tk) => {
                        let idx = self.add_const(Value::string(tk.to_string()));
                        self.emit(Opcode::ConstLoad, idx, source.clone());
                    }
                    None => {
                        self.emit(Opcode::Nil, 0, source.clone());
                    }
                }
                let pidx = self.add_const(Value::string(protocol.to_string()));
                self.emit(Opcode::ConstLoad, pidx, source.clone());
                for (mname, fn_node) in &methods {
                    let midx = self.add_const(Value::string(mname.to_string()));
                    self.emit(Opcode::ConstLoad, midx, source.clone());
                    self.compile_node(*fn_node);
                }
                self.emit(Opcode::Call, 2 + methods.len() as u16 * 2, source);
            }
            NodeKind::Reify { protocols, methods } => {
                self.push_builtin_ref("__reify", source.clone());
                let cidx = self.add_const(Value::Int(protocols.len() as i64));
                self.emit(Opcode::ConstLoad, cidx, source.clone());
                for p in &protocols {
                    let idx = self.add_const(Value::string(p.to_string()));
                    self.emit(Opcode::ConstLoad, idx, source.clone());
                }
                for (mname, fn_node) in &methods {
                    let midx = self.add_const(Value::string(mname.to_string()));
                    self.emit(Opcode::ConstLoad, midx, source.clone());
                    self.compile_node(*fn_node);
                }
                self.emit(
                    Opcode::Call,
                    1 + protocols.len() as u16 + methods.len() as u16 * 2,
                    source,
                );
            }
            NodeKind::Defmulti { name, dispatch_fn } => {
                self.compile_node(dispatch_fn);
                let idx = self.add_const(Value::symbol(None, &name));
                self.emit(Opcode::Defmulti, idx, source);
            }
            NodeKind::Defmethod {
                multi_name,
                dispatch_val,
                fn_node,
            } => {
                self.compile_node(dispatch_val);
                self.compile_node(fn_node);
                let idx = self.add_const(Value::symbol(None, &multi_name));
                self.emit(Opcode::Defmethod, idx, source);
            }
            NodeKind::LazySeqNode { thunk_fn } => {
                self.compile_node(thunk_fn);
                self.emit(Opcode::LazySeq, 0, source);
            }
            NodeKind::CaseStar {
                discriminant,
                clauses,
                default,
                ..
            } => self.compile_case(discriminant, &clauses, default, source),
            NodeKind::VarForm { ns, name } => {
                self.push_builtin_ref("__the-var", source.clone());
                let sidx = self.add_const(Value::symbol(ns.as_deref(), &name));
                self.emit(Opcode::ConstLoad, sidx, source.clone());
                self.emit(Opcode::Call, 1, source);
            }
        }
    }

    fn compile_call(&mut self, callee: NodeId, args: &[NodeId], source: SourceInfo) {
        if let NodeKind::VarRef { ns: None, name } = &self.arena.get(callee).kind {
            let coll_op = match &**name {
                "list" => Some(Opcode::ListNew),
                "vector" => Some(Opcode::VectorNew),
                "hash-map" => Some(Opcode::MapNew),
                "hash-set" => Some(Opcode::SetNew),
                _ => None,
            };
            if let Some(op) = coll_op {
                for a in args {
                    self.compile_node(*a);
                }
                self.emit(op, args.len() as u16, source);
                return;
            }
            if args.len() == 2 {
                if let Some(op) = arith_opcode(name) {
                    self.compile_node(args[0]);
                    self.compile_node(args[1]);
                    self.emit(op, 0, source);
                    return;
                }
            }
        }
        self.compile_node(callee);
        for a in args {
            self.compile_node(*a);
        }
        self.emit(Opcode::Call, args.len() as u16, source);
    }

    fn compile_try(
        &mut self,
        body: NodeId,
        catch: Option<lumen_core::node::CatchClause>,
        finally: Option<NodeId>,
        source: SourceInfo,
    ) {
        if let Some(catch) = catch {
            let try_begin = self.emit(Opcode::TryBegin, 0, source.clone());
            self.compile_node(body);
            // Normal path pops its own handler before jumping past the
            // catch block; the exception path's handler is popped by the
            // VM when it transfers control to catch_start.
            self.emit(Opcode::TryEnd, 0, source.clone());
            let jump_over_catch = self.emit(Opcode::Jump, 0, source.clone());
            let catch_start = self.code.len();
            self.patch_forward(try_begin, catch_start);

            self.push_scope();
            let slot = self.alloc_local(catch.binding.clone());
            self.emit(Opcode::LocalStore, slot, source.clone());
            if is_catch_all(&catch.class_name) {
                self.compile_node(catch.body);
            } else {
                self.push_builtin_ref("__type-of", source.clone());
                self.emit(Opcode::LocalLoad, slot, source.clone());
                self.emit(Opcode::Call, 1, source.clone());
                let cidx = self.add_const(Value::string(catch.class_name.to_string()));
                self.emit(Opcode::ConstLoad, cidx, source.clone());
                self.emit(Opcode::Eq, 0, source.clone());
                let jf = self.emit(Opcode::JumpIfFalse, 0, source.clone());
                self.compile_node(catch.body);
                let j = self.emit(Opcode::Jump, 0, source.clone());
                let rethrow_start = self.code.len();
                self.patch_forward(jf, rethrow_start);
                self.emit(Opcode::LocalLoad, slot, source.clone());
                self.emit(Opcode::Throw, 0, source.clone());
                let after = self.code.len();
                self.patch_forward(j, after);
            }
            self.pop_scope();

            let end = self.code.len();
            self.patch_forward(jump_over_catch, end);
        } else {
            self.compile_node(body);
        }

        if let Some(f) = finally {
            self.push_scope();
            let tmp = self.alloc_local(Rc::from("__finally_result__"));
            self.emit(Opcode::LocalStore, tmp, source.clone());
            self.compile_node(f);
            self.emit(Opcode::Pop, 0, source.clone());
            self.emit(Opcode::LocalLoad, tmp, source);
            self.pop_scope();
        }
    }

    fn compile_case(&mut self, discriminant: NodeId, clauses: &[CaseClause], default: NodeId, source: SourceInfo) {
        self.compile_node(discriminant);
        self.push_scope();
        let slot = self.alloc_local(Rc::from("__case_disc__"));
        self.emit(Opcode::LocalStore, slot, source.clone());
        let mut end_jumps = Vec::new();
        for clause in clauses {
            self.emit(Opcode::LocalLoad, slot, source.clone());
            let cidx = self.add_const(clause.test_value.clone());
            self.emit(Opcode::ConstLoad, cidx, source.clone());
            self.emit(Opcode::Eq, 0, source.clone());
            let jf = self.emit(Opcode::JumpIfFalse, 0, source.clone());
            self.compile_node(clause.then);
            end_jumps.push(self.emit(Opcode::Jump, 0, source.clone()));
            let next = self.code.len();
            self.patch_forward(jf, next);
        }
        self.compile_node(default);
        let end = self.code.len();
        for j in end_jumps {
            self.patch_forward(j, end);
        }
        self.pop_scope();
    }

    fn compile_fn_value(&mut self, name: &Option<Rc<str>>, arities: &[FnArity], source: SourceInfo) {
        let mut captures: Vec<Rc<str>> = Vec::new();
        for arity in arities {
            for c in &arity.captures {
                if !captures.contains(c) {
                    captures.push(c.clone());
                }
            }
        }
        // A named fn sees itself through a synthetic final capture that
        // the closure op fills in with the closure it just built.
        let captures_self = name.is_some();
        let mut all_names = captures.clone();
        if let Some(n) = name {
            all_names.push(n.clone());
        }

        let mut protos: Vec<FnProto> = arities
            .iter()
            .map(|a| self.compile_fn_standalone(name, a, &all_names, captures_self))
            .collect();
        let alt_protos: Vec<Rc<FnProto>> = protos.split_off(1.min(protos.len())).into_iter().map(Rc::new).collect();
        let mut main = protos.remove(0);
        main.alternates = alt_protos;
        let main_rc = Rc::new(main);

        for cname in &captures {
            if let Some(slot) = self.resolve_local(cname) {
                self.emit(Opcode::LocalLoad, slot, source.clone());
            } else if let Some(idx) = self.capture_names.iter().position(|n| n == cname) {
                self.emit(Opcode::UpvalueLoad, idx as u16, source.clone());
            } else {
                self.emit(Opcode::Nil, 0, source.clone());
            }
        }
        let child_idx = self.child_protos.len() as u16;
        self.child_protos.push(main_rc);
        self.emit(Opcode::Closure, child_idx, source);
    }

    fn compile_fn_standalone(&self, name: &Option<Rc<str>>, arity: &FnArity, captures: &[Rc<str>], captures_self: bool) -> FnProto {
        let mut sub = Compiler::new(self.arena, self.defining_ns.clone());
        sub.capture_names = captures.to_vec();
        sub.push_scope();
        let mut param_slots = Vec::new();
        for p in &arity.params {
            param_slots.push(sub.alloc_local(p.clone()));
        }
        if let Some(v) = &arity.variadic {
            param_slots.push(sub.alloc_local(v.clone()));
        }
        for (i, cname) in captures.iter().enumerate() {
            sub.emit(Opcode::UpvalueLoad, i as u16, SourceInfo::unknown());
            let slot = sub.alloc_local(cname.clone());
            sub.emit(Opcode::LocalStore, slot, SourceInfo::unknown());
        }
        // The fn body is itself a recur point: a tail `recur` rebinds the
        // parameter slots and jumps back past the capture prologue.
        let body_start = sub.code.len();
        sub.loop_stack.push(LoopCtx {
            start: body_start,
            slots: param_slots,
        });
        sub.compile_node(arity.body);
        sub.loop_stack.pop();
        sub.emit(Opcode::Ret, 0, SourceInfo::unknown());
        sub.pop_scope();
        FnProto {
            name: name.clone(),
            code: sub.code,
            constants: sub.constants,
            local_count: sub.next_slot,
            capture_slots: (0..captures.len() as u16).collect(),
            arity: arity.params.len(),
            is_variadic: arity.variadic.is_some(),
            source_map: sub.source_map,
            defining_ns: sub.defining_ns,
            alternates: Vec::new(),
            child_protos: sub.child_protos,
            capture_names: captures.to_vec(),
            captures_self,
        }
    }
}

/// Compiles a whole top-level form into a zero-arity `FnProto`; the
/// caller invokes it once for its value, the way `lumen-vm`'s eval loop
/// and bootstrap both do.
pub fn compile_toplevel(arena: &NodeArena, node: NodeId, ns: Option<Rc<str>>) -> Rc<FnProto> {
    let mut c = Compiler::new(arena, ns);
    c.push_scope();
    c.compile_node(node);
    c.emit(Opcode::Ret, 0, SourceInfo::unknown());
    c.pop_scope();
    Rc::new(FnProto {
        name: None,
        code: c.code,
        constants: c.constants,
        local_count: c.next_slot,
        capture_slots: Vec::new(),
        arity: 0,
        is_variadic: false,
        source_map: c.source_map,
        defining_ns: c.defining_ns,
        alternates: Vec::new(),
        child_protos: c.child_protos,
        capture_names: Vec::new(),
        captures_self: false,
    })
}

/// Re-exported for tooling (`lumen-cli --disassemble`).
pub fn disassemble_toplevel(proto: &FnProto) -> String {
    disassemble(proto)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::node::{Node, NodeArena};

    fn arena_with(kind: NodeKind) -> (NodeArena, NodeId) {
        let mut arena = NodeArena::new();
        let id = arena.alloc(Node::new(kind, SourceInfo::unknown()));
        (arena, id)
    }

    #[test]
    fn constant_compiles_to_single_const_load() {
        let (arena, id) = arena_with(NodeKind::Constant(Value::Int(42)));
        let proto = compile_toplevel(&arena, id, None);
        assert!(matches!(proto.code[0].op, Opcode::ConstLoad));
        assert!(matches!(proto.code.last().unwrap().op, Opcode::Ret));
    }

    #[test]
    fn two_arg_plus_call_uses_add_intrinsic() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(Node::new(NodeKind::Constant(Value::Int(1)), SourceInfo::unknown()));
        let b = arena.alloc(Node::new(NodeKind::Constant(Value::Int(2)), SourceInfo::unknown()));
        let callee = arena.alloc(Node::new(
            NodeKind::VarRef { ns: None, name: Rc::from("+") },
            SourceInfo::unknown(),
        ));
        let call = arena.alloc(Node::new(NodeKind::Call { callee, args: vec![a, b] }, SourceInfo::unknown()));
        let proto = compile_toplevel(&arena, call, None);
        assert!(proto.code.iter().any(|i| matches!(i.op, Opcode::Add)));
        assert!(!proto.code.iter().any(|i| matches!(i.op, Opcode::Call)));
    }

    #[test]
    fn if_without_else_falls_back_to_nil_branch() {
        let mut arena = NodeArena::new();
        let test = arena.alloc(Node::new(NodeKind::Constant(Value::Bool(true)), SourceInfo::unknown()));
        let then = arena.alloc(Node::new(NodeKind::Constant(Value::Int(1)), SourceInfo::unknown()));
        let if_node = arena.alloc(Node::new(NodeKind::If { test, then, else_: None }, SourceInfo::unknown()));
        let proto = compile_toplevel(&arena, if_node, None);
        assert!(proto.code.iter().any(|i| matches!(i.op, Opcode::JumpIfFalse)));
        assert!(proto.code.iter().any(|i| matches!(i.op, Opcode::Nil)));
    }

    #[test]
    fn loop_recur_jumps_backward() {
        let mut arena = NodeArena::new();
        let init = arena.alloc(Node::new(NodeKind::Constant(Value::Int(0)), SourceInfo::unknown()));
        let recur_arg = arena.alloc(Node::new(NodeKind::Constant(Value::Int(1)), SourceInfo::unknown()));
        let recur = arena.alloc(Node::new(NodeKind::Recur { args: vec![recur_arg] }, SourceInfo::unknown()));
        let loop_node = arena.alloc(Node::new(
            NodeKind::Loop {
                bindings: vec![LocalBinding { name: Rc::from("i"), init }],
                body: vec![recur],
            },
            SourceInfo::unknown(),
        ));
        let proto = compile_toplevel(&arena, loop_node, None);
        assert!(proto.code.iter().any(|i| matches!(i.op, Opcode::JumpBack)));
    }

    #[test]
    fn fn_with_capture_emits_closure_and_upvalue_load() {
        let mut arena = NodeArena::new();
        let body = arena.alloc(Node::new(NodeKind::LocalRef { name: Rc::from("x") }, SourceInfo::unknown()));
        let fn_node = arena.alloc(Node::new(
            NodeKind::Fn {
                name: None,
                arities: vec![FnArity {
                    params: vec![],
                    variadic: None,
                    body,
                    captures: vec![Rc::from("x")],
                }],
            },
            SourceInfo::unknown(),
        ));
        let init = arena.alloc(Node::new(NodeKind::Constant(Value::Int(9)), SourceInfo::unknown()));
        let let_node = arena.alloc(Node::new(
            NodeKind::Let {
                bindings: vec![LocalBinding {
                    name: Rc::from("x"),
                    init,
                }],
                body: vec![fn_node],
            },
            SourceInfo::unknown(),
        ));
        let proto = compile_toplevel(&arena, let_node, None);
        assert!(proto.code.iter().any(|i| matches!(i.op, Opcode::Closure)));
        assert_eq!(proto.child_protos.len(), 1);
        assert!(proto.child_protos[0].code.iter().any(|i| matches!(i.op, Opcode::UpvalueLoad)));
    }
}
