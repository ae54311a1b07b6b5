//! Form -> Node analyzer: special-form dispatch, local-shadowing,
//! destructuring, macro expansion, and `for`/`case`/`defrecord` desugaring.
//! Everything here is pure with respect to evaluation: invoking a macro
//! is the only point that reaches out of this crate, through
//! `MacroInvoker`, which `lumen-vm` implements on top of its unified
//! dispatch entry point — that indirection is what breaks the
//! analyzer/evaluator cycle.

pub mod conv;
pub mod destructure;
pub mod for_desugar;
pub mod form;
pub mod locals;
pub mod special_forms;

use form::{Form, FormData};
use locals::Locals;
use lumen_core::node::SourceInfo;
use lumen_core::{Diagnostic, ErrorKind, Location, Node, NodeArena, NodeId, NodeKind, Phase, Value};
use lumen_core::var::VarRc;
use lumen_env::NamespaceTable;
use std::rc::Rc;

/// Breaks the analyzer <-> evaluator dependency cycle: macro expansion
/// needs to *call* a function (the macro), which only the runtime's
/// unified dispatch knows how to do.
///
/// `namespaces` and `arena` are handed in per-call (reborrows of the
/// Analyzer's own fields) rather than stored on the invoker: the Analyzer
/// already holds `&mut NamespaceTable` and `&mut NodeArena` for its whole
/// lifetime, so an invoker that tried to keep its own handles would alias
/// them. A macro body still needs live var resolution and, when the macro
/// is a tree-walk closure, read access to the node tree it was built from,
/// so both are lent for the duration of this one call instead.
pub trait MacroInvoker {
    fn invoke_macro(
        &mut self,
        var: &VarRc,
        args: Vec<Value>,
        source: &SourceInfo,
        arena: &NodeArena,
        namespaces: &mut NamespaceTable,
    ) -> Result<Value, Diagnostic>;
}

pub struct Analyzer<'a> {
    pub arena: &'a mut NodeArena,
    pub namespaces: &'a mut NamespaceTable,
    pub locals: Locals,
    pub file: Rc<str>,
    pub invoker: &'a mut dyn MacroInvoker,
}

impl<'a> Analyzer<'a> {
    pub fn new(
        arena: &'a mut NodeArena,
        namespaces: &'a mut NamespaceTable,
        file: impl Into<Rc<str>>,
        invoker: &'a mut dyn MacroInvoker,
    ) -> Self {
        Analyzer {
            arena,
            namespaces,
            locals: Locals::new(),
            file: file.into(),
            invoker,
        }
    }

    pub(crate) fn source_at(&self, form: &Form) -> SourceInfo {
        SourceInfo::new(self.file.clone(), form.line, form.column)
    }

    pub(crate) fn push(&mut self, kind: NodeKind, source: SourceInfo) -> NodeId {
        self.arena.alloc(Node::new(kind, source))
    }

    pub(crate) fn err(&self, form: &Form, kind: ErrorKind, message: impl Into<String>) -> Diagnostic {
        let src = self.source_at(form);
        Diagnostic::new(Phase::Analysis, kind, message, Location::new(src.file.to_string(), src.line, src.column))
    }

    pub fn analyze(&mut self, form: &Form) -> Result<NodeId, Diagnostic> {
        match &form.data {
            FormData::List(items) => self.analyze_list(form, items),
            FormData::Vector(items) => self.analyze_literal_collection(form, "vector", items),
            FormData::Set(items) => self.analyze_literal_collection(form, "hash-set", items),
            FormData::Map(items) => self.analyze_map_literal(form, items),
            FormData::Symbol(ns, name) => self.analyze_symbol(form, ns.as_deref(), name),
            FormData::Tag { inner, .. } => self.analyze(inner),
            _ => self.analyze_atom(form),
        }
    }

    fn analyze_atom(&mut self, form: &Form) -> Result<NodeId, Diagnostic> {
        let source = self.source_at(form);
        let value = match &form.data {
            FormData::Nil => Value::Nil,
            FormData::Bool(b) => Value::Bool(*b),
            FormData::Int(n) => Value::Int(*n),
            FormData::Float(f) => Value::Float(*f),
            FormData::Char(c) => Value::Char(*c),
            FormData::Str(s) => Value::string(s.clone()),
            FormData::Keyword(ns, name, _) => Value::keyword(ns.as_deref(), name),
            FormData::BigInt(digits) => {
                let parsed = digits
                    .parse::<num_bigint::BigInt>()
                    .map_err(|_| self.err(form, ErrorKind::NumberError, format!("invalid integer literal: {digits}")))?;
                Value::BigInt(Rc::new(parsed))
            }
            FormData::Regex(src) => {
                let r = regex::Regex::new(src)
                    .map_err(|e| self.err(form, ErrorKind::SyntaxError, format!("invalid regex: {e}")))?;
                Value::Regex(Rc::new(r))
            }
            // BigDecimal/Ratio literal syntax belongs to a full textual
            // reader; the shapes exist so one can hand them in, but
            // nothing produces them here.
            FormData::BigDecimal(_) | FormData::Ratio(_, _) => Value::Nil,
            other => unreachable!("analyze_atom called on non-atomic form: {other:?}"),
        };
        Ok(self.push(NodeKind::Constant(value), source))
    }

    /// Literal vectors/sets compile to constructor calls so nested
    /// expressions are evaluated in position, matching `let`-bound
    /// collection-literal semantics.
    fn analyze_literal_collection(&mut self, form: &Form, ctor: &str, items: &[Form]) -> Result<NodeId, Diagnostic> {
        let args = items.iter().map(|f| self.analyze(f)).collect::<Result<Vec<_>, _>>()?;
        let callee = self.resolve_or_error(form, None, ctor)?;
        Ok(self.push(NodeKind::Call { callee, args }, self.source_at(form)))
    }

    fn analyze_map_literal(&mut self, form: &Form, entries: &[Form]) -> Result<NodeId, Diagnostic> {
        let args = entries.iter().map(|f| self.analyze(f)).collect::<Result<Vec<_>, _>>()?;
        let callee = self.resolve_or_error(form, None, "hash-map")?;
        Ok(self.push(NodeKind::Call { callee, args }, self.source_at(form)))
    }

    fn resolve_or_error(&mut self, form: &Form, ns: Option<&str>, name: &str) -> Result<NodeId, Diagnostic> {
        let source = self.source_at(form);
        let var = match ns {
            Some(ns) => self.namespaces.resolve_qualified(&self.namespaces.current.clone(), ns, name),
            None => self.namespaces.resolve_in_current(name),
        };
        if var.is_none() {
            return Err(self.err(form, ErrorKind::NameError, format!("unable to resolve symbol: {name}")));
        }
        Ok(self.push(
            NodeKind::VarRef {
                ns: ns.map(Rc::from).or_else(|| Some(self.namespaces.current.clone())),
                name: Rc::from(name),
            },
            source,
        ))
    }

    fn analyze_symbol(&mut self, form: &Form, ns: Option<&str>, name: &str) -> Result<NodeId, Diagnostic> {
        let source = self.source_at(form);
        if ns.is_none() && self.locals.resolve(name) {
            return Ok(self.push(NodeKind::LocalRef { name: Rc::from(name) }, source));
        }
        self.resolve_or_error(form, ns, name)
    }

    fn analyze_list(&mut self, form: &Form, items: &[Form]) -> Result<NodeId, Diagnostic> {
        if items.is_empty() {
            return Ok(self.push(NodeKind::Constant(Value::List(im::Vector::new())), self.source_at(form)));
        }

        let head = &items[0];
        let args = &items[1..];

        // with-meta {:tag sym} stripping.
        if let Some(name) = head.as_symbol_name() {
            if name == "with-meta" && args.len() == 2 {
                if is_tag_only_meta(&args[1]) {
                    return self.analyze(&args[0]);
                }
            }
        }

        if let FormData::Symbol(head_ns, head_name) = &head.data {
            let head_ns = head_ns.clone();
            let head_name = head_name.clone();
            let shadowed = head_ns.is_none() && self.locals.is_bound(&head_name);

            if !shadowed {
                if let Some(result) = special_forms::try_special(self, form, &head_name, args) {
                    return result;
                }
                if let Some(result) = self.try_expand_macro(form, head_ns.as_deref(), &head_name, args) {
                    return result;
                }
                if let Some(result) = self.try_interop_rewrite(form, head_ns.as_deref(), &head_name, args) {
                    return result;
                }
            }
        }

        let callee = self.analyze(head)?;
        let args = args.iter().map(|f| self.analyze(f)).collect::<Result<Vec<_>, _>>()?;
        Ok(self.push(NodeKind::Call { callee, args }, self.source_at(form)))
    }

    /// Resolves `head` to a macro Var and, if found, expands.
    fn try_expand_macro(&mut self, form: &Form, head_ns: Option<&str>, head_name: &str, args: &[Form]) -> Option<Result<NodeId, Diagnostic>> {
        let var = match head_ns {
            Some(ns) => self.namespaces.resolve_qualified(&self.namespaces.current.clone(), ns, head_name),
            None => self.namespaces.resolve_in_current(head_name),
        }?;
        if !var.borrow().meta.is_macro {
            return None;
        }
        let arg_values: Vec<Value> = args.iter().map(conv::form_to_value).collect();
        let source = self.source_at(form);
        match self.invoker.invoke_macro(&var, arg_values, &source, self.arena, self.namespaces) {
            Ok(value) => {
                let mut expanded = conv::value_to_form(&value);
                if expanded.line == 0 {
                    expanded.line = form.line;
                    expanded.column = form.column;
                }
                Some(self.analyze(&expanded))
            }
            Err(diag) => Some(Err(diag)),
        }
    }

    /// Host-interop syntactic sugar. There is no JVM classpath to resolve
    /// against, so `(.method obj ...)`, `(Klass. ...)` and `(new Klass ...)`
    /// rewrite to `__java-method`/`__interop-new` builtin-call indirections
    /// purely syntactically; the runtime supplies (or rejects) them.
    /// `Math/name` calls route to the in-tree `__math` builtin.
    fn try_interop_rewrite(&mut self, form: &Form, head_ns: Option<&str>, head_name: &str, args: &[Form]) -> Option<Result<NodeId, Diagnostic>> {
        if head_ns == Some("Math") {
            let rewritten = Form::list({
                let mut items = vec![Form::sym("__math"), Form::at(FormData::Str(head_name.to_string()))];
                items.extend(args.to_vec());
                items
            });
            return Some(self.analyze(&rewritten));
        }
        if let Some(method) = head_name.strip_prefix('.') {
            if !method.is_empty() && !args.is_empty() {
                let rewritten = Form::list({
                    let mut items = vec![Form::sym("__java-method"), Form::at(FormData::Str(method.to_string()))];
                    items.extend(args.to_vec());
                    items
                });
                return Some(self.analyze(&rewritten));
            }
        }
        if head_name == "new" && !args.is_empty() {
            if let Some(class_name) = args[0].as_symbol_name() {
                let rewritten = Form::list({
                    let mut items = vec![Form::sym("__interop-new"), Form::at(FormData::Str(class_name))];
                    items.extend(args[1..].to_vec());
                    items
                });
                return Some(self.analyze(&rewritten));
            }
        }
        if let Some(class_name) = head_name.strip_suffix('.') {
            if !class_name.is_empty() {
                let rewritten = Form::list({
                    let mut items = vec![Form::sym("__interop-new"), Form::at(FormData::Str(class_name.to_string()))];
                    items.extend(args.to_vec());
                    items
                });
                return Some(self.analyze(&rewritten));
            }
        }
        None
    }
}

fn is_tag_only_meta(meta_form: &Form) -> bool {
    match &meta_form.data {
        FormData::Map(entries) if entries.len() == 2 => {
            matches!(&entries[0].data, FormData::Keyword(None, k, _) if &**k == "tag")
                && matches!(&entries[1].data, FormData::Symbol(..))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::NodeArena;

    struct NoopInvoker;
    impl MacroInvoker for NoopInvoker {
        fn invoke_macro(
            &mut self,
            _var: &VarRc,
            _args: Vec<Value>,
            _source: &SourceInfo,
            _arena: &NodeArena,
            _namespaces: &mut NamespaceTable,
        ) -> Result<Value, Diagnostic> {
            Err(Diagnostic::new(Phase::Macroexpand, ErrorKind::InternalError, "no macros bound in test", Location::default()))
        }
    }

    fn analyzer<'a>(arena: &'a mut NodeArena, ns: &'a mut NamespaceTable, invoker: &'a mut NoopInvoker) -> Analyzer<'a> {
        Analyzer::new(arena, ns, "test", invoker)
    }

    #[test]
    fn if_with_two_args_has_no_else() {
        let mut arena = NodeArena::new();
        let mut ns = NamespaceTable::new("user");
        let mut invoker = NoopInvoker;
        let mut a = analyzer(&mut arena, &mut ns, &mut invoker);
        let form = Form::list(vec![Form::sym("if"), Form::at(FormData::Bool(true)), Form::at(FormData::Int(1))]);
        let id = a.analyze(&form).unwrap();
        match &arena.get(id).kind {
            NodeKind::If { else_, .. } => assert!(else_.is_none()),
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn local_shadows_special_form_name() {
        let mut arena = NodeArena::new();
        let mut ns = NamespaceTable::new("user");
        ns.intern("user", "if");
        let mut invoker = NoopInvoker;
        let mut a = analyzer(&mut arena, &mut ns, &mut invoker);
        a.locals.push_scope();
        a.locals.bind("if");
        let form = Form::list(vec![Form::sym("if"), Form::at(FormData::Int(1))]);
        let id = a.analyze(&form).unwrap();
        match &arena.get(id).kind {
            NodeKind::Call { .. } => {}
            other => panic!("expected Call (shadowed), got {other:?}"),
        }
    }

    #[test]
    fn let_destructures_vector_pattern() {
        let mut arena = NodeArena::new();
        let mut ns = NamespaceTable::new("user");
        ns.intern("user", "nth");
        ns.intern("user", "vector");
        let mut invoker = NoopInvoker;
        let mut a = analyzer(&mut arena, &mut ns, &mut invoker);
        let bindings = Form::at(FormData::Vector(vec![
            Form::at(FormData::Vector(vec![Form::sym("a"), Form::sym("b")])),
            Form::at(FormData::Vector(vec![Form::at(FormData::Int(1)), Form::at(FormData::Int(2))])),
        ]));
        let form = Form::list(vec![Form::sym("let*"), bindings, Form::sym("a")]);
        let id = a.analyze(&form).unwrap();
        match &arena.get(id).kind {
            NodeKind::Let { bindings, .. } => assert_eq!(bindings.len(), 3), // t, a, b
            other => panic!("expected Let, got {other:?}"),
        }
    }

    #[test]
    fn recur_arity_must_match_loop() {
        let mut arena = NodeArena::new();
        let mut ns = NamespaceTable::new("user");
        let mut invoker = NoopInvoker;
        let mut a = analyzer(&mut arena, &mut ns, &mut invoker);
        let bindings = Form::at(FormData::Vector(vec![Form::sym("i"), Form::at(FormData::Int(0))]));
        let recur = Form::list(vec![Form::sym("recur"), Form::at(FormData::Int(1)), Form::at(FormData::Int(2))]);
        let form = Form::list(vec![Form::sym("loop*"), bindings, recur]);
        assert!(a.analyze(&form).is_err());
    }

    #[test]
    fn quote_captures_form_verbatim() {
        let mut arena = NodeArena::new();
        let mut ns = NamespaceTable::new("user");
        let mut invoker = NoopInvoker;
        let mut a = analyzer(&mut arena, &mut ns, &mut invoker);
        let form = Form::list(vec![Form::sym("quote"), Form::list(vec![Form::sym("a"), Form::sym("b")])]);
        let id = a.analyze(&form).unwrap();
        match &arena.get(id).kind {
            NodeKind::Quote { value } => assert!(matches!(value, Value::List(_))),
            other => panic!("expected Quote, got {other:?}"),
        }
    }
}
