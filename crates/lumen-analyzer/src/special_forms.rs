//! Special-form dispatch table. Each handler receives the
//! already-split `(head args...)` list and returns `None` only when the
//! head name isn't a special form at all, letting `Analyzer::analyze_list`
//! fall through to macro expansion / interop rewriting / a plain call.

use crate::destructure::{self, Binding};
use crate::form::{Form, FormData};
use crate::Analyzer;
use lumen_core::node::{CaseClause, CaseTestType, CatchClause, FnArity, LocalBinding, MethodSig};
use lumen_core::{Diagnostic, ErrorKind, NodeId, NodeKind, Value};
use std::rc::Rc;

pub fn try_special(a: &mut Analyzer, form: &Form, head: &str, args: &[Form]) -> Option<Result<NodeId, Diagnostic>> {
    let result = match head {
        "if" => analyze_if(a, form, args),
        "do" => analyze_do(a, form, args),
        "let" | "let*" => analyze_let(a, form, args),
        "loop" | "loop*" => analyze_loop(a, form, args),
        "recur" => analyze_recur(a, form, args),
        "letfn*" => analyze_letfn(a, form, args),
        "fn" | "fn*" => analyze_fn(a, form, args),
        "def" => analyze_def(a, form, args, false),
        "defmacro" => analyze_defmacro(a, form, args),
        "ns" => analyze_ns(a, form, args),
        "binding" => analyze_binding(a, form, args),
        "instance?" => analyze_instance(a, form, args),
        "quote" => Ok(analyze_quote(a, form, args)),
        "var" => analyze_var_form(a, form, args),
        "set!" => analyze_set(a, form, args),
        "throw" => analyze_throw(a, form, args),
        "try" => analyze_try(a, form, args),
        "defprotocol" => analyze_defprotocol(a, form, args),
        "extend-type" => analyze_extend_type(a, form, args),
        "reify" => analyze_reify(a, form, args),
        "defrecord" => analyze_defrecord(a, form, args),
        "defmulti" => analyze_defmulti(a, form, args),
        "defmethod" => analyze_defmethod(a, form, args),
        "lazy-seq" => analyze_lazy_seq(a, form, args),
        "case*" | "case" => analyze_case(a, form, args),
        "for" => analyze_for(a, form, args),
        _ => return None,
    };
    Some(result)
}

fn arity_error(a: &Analyzer, form: &Form, what: &str) -> Diagnostic {
    a.err(form, ErrorKind::ArityError, format!("wrong number of arguments to {what}"))
}

fn analyze_if(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    if args.len() < 2 || args.len() > 3 {
        return Err(arity_error(a, form, "if"));
    }
    let test = a.analyze(&args[0])?;
    let then = a.analyze(&args[1])?;
    let else_ = if args.len() == 3 { Some(a.analyze(&args[2])?) } else { None };
    Ok(a.push(NodeKind::If { test, then, else_ }, a.source_at(form)))
}

fn analyze_do(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let body = args.iter().map(|f| a.analyze(f)).collect::<Result<Vec<_>, _>>()?;
    Ok(a.push(NodeKind::Do { body }, a.source_at(form)))
}

/// Shared by `let`/`let*`/`loop`/`loop*`: flattens every `[pattern init]`
/// pair through destructuring, analyzing and binding each resulting
/// simple name left-to-right.
fn analyze_binding_pairs(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<(Vec<LocalBinding>, usize), Diagnostic> {
    let bindings_vec = args
        .first()
        .and_then(|f| match &f.data {
            FormData::Vector(v) => Some(v),
            _ => None,
        })
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "binding form must start with a vector"))?;
    if bindings_vec.len() % 2 != 0 {
        return Err(a.err(form, ErrorKind::SyntaxError, "binding vector must have an even number of forms"));
    }
    let pair_count = bindings_vec.len() / 2;
    let mut out = Vec::new();
    let mut i = 0;
    while i < bindings_vec.len() {
        let pattern = &bindings_vec[i];
        let init_form = bindings_vec[i + 1].clone();
        let expanded: Vec<Binding> = destructure::expand_binding_pair(pattern, init_form);
        for (name, binding_form) in expanded {
            let init = a.analyze(&binding_form)?;
            a.locals.bind(&name);
            out.push(LocalBinding { name: Rc::from(name.as_str()), init });
        }
        i += 2;
    }
    Ok((out, pair_count))
}

fn analyze_let(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    a.locals.push_scope();
    let (bindings, _) = analyze_binding_pairs(a, form, args)?;
    let body = args[1..].iter().map(|f| a.analyze(f)).collect::<Result<Vec<_>, _>>();
    a.locals.pop_scope();
    Ok(a.push(NodeKind::Let { bindings, body: body? }, a.source_at(form)))
}

/// `loop` gets exactly one binding (and one recur target) per written
/// pair. A destructuring pattern binds a synthetic `__loop_{n}__` name at
/// the loop level, and the body is wrapped in a `let*` that destructures
/// it, so every `recur` re-runs the destructuring against fresh values.
fn analyze_loop(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let bindings_vec = args
        .first()
        .and_then(|f| match &f.data {
            FormData::Vector(v) => Some(v.clone()),
            _ => None,
        })
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "binding form must start with a vector"))?;
    if bindings_vec.len() % 2 != 0 {
        return Err(a.err(form, ErrorKind::SyntaxError, "binding vector must have an even number of forms"));
    }

    a.locals.push_scope();
    let mut bindings = Vec::new();
    let mut inner_pairs: Vec<Form> = Vec::new();
    for (n, pair) in bindings_vec.chunks(2).enumerate() {
        let (pattern, init_form) = (&pair[0], &pair[1]);
        let name = match &pattern.data {
            FormData::Symbol(None, sym) => sym.to_string(),
            _ => {
                let synthetic = format!("__loop_{n}__");
                inner_pairs.push(pattern.clone());
                inner_pairs.push(Form::sym(&synthetic));
                synthetic
            }
        };
        let init = a.analyze(init_form);
        let init = match init {
            Ok(i) => i,
            Err(e) => {
                a.locals.pop_scope();
                return Err(e);
            }
        };
        a.locals.bind(&name);
        bindings.push(LocalBinding { name: Rc::from(name.as_str()), init });
    }

    a.locals.push_recur_point(bindings.len());
    let body_forms: Vec<Form> = if inner_pairs.is_empty() {
        args[1..].to_vec()
    } else {
        let mut let_form = vec![Form::sym("let*"), Form::at(FormData::Vector(inner_pairs))];
        let_form.extend(args[1..].to_vec());
        vec![Form::new(FormData::List(let_form), form.line, form.column)]
    };
    let body = body_forms.iter().map(|f| a.analyze(f)).collect::<Result<Vec<_>, _>>();
    a.locals.pop_recur_point();
    a.locals.pop_scope();
    Ok(a.push(NodeKind::Loop { bindings, body: body? }, a.source_at(form)))
}

fn analyze_recur(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let expected = a
        .locals
        .current_recur_arity()
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "recur used outside of a recur point"))?;
    if args.len() != expected {
        return Err(a.err(form, ErrorKind::ArityError, format!("recur expects {expected} args, got {}", args.len())));
    }
    let args = args.iter().map(|f| a.analyze(f)).collect::<Result<Vec<_>, _>>()?;
    Ok(a.push(NodeKind::Recur { args }, a.source_at(form)))
}

fn analyze_letfn(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let specs = args
        .first()
        .and_then(|f| match &f.data {
            FormData::Vector(v) => Some(v),
            _ => None,
        })
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "letfn* requires a vector of fn specs"))?;
    a.locals.push_scope();
    let mut names = Vec::new();
    for spec in specs {
        if let Some(list) = spec.as_list() {
            if let Some(n) = list.first().and_then(|f| f.as_symbol_name()) {
                a.locals.bind(&n);
                names.push(n);
            }
        }
    }
    let mut inits = Vec::new();
    for spec in specs {
        let Some(list) = spec.as_list() else { continue };
        let Some(name) = list.first().and_then(|f| f.as_symbol_name()) else { continue };
        let arity = analyze_fn_arity(a, Some(&name), &Form::new(FormData::List(list[1..].to_vec()), spec.line, spec.column))?;
        let fn_node = a.push(
            NodeKind::Fn {
                name: Some(Rc::from(name.as_str())),
                arities: vec![arity],
            },
            a.source_at(spec),
        );
        inits.push(fn_node);
    }
    let body = args[1..].iter().map(|f| a.analyze(f)).collect::<Result<Vec<_>, _>>();
    a.locals.pop_scope();
    Ok(a.push(
        NodeKind::Letfn {
            names: names.into_iter().map(|n| Rc::from(n.as_str())).collect(),
            inits,
            body: body?,
        },
        a.source_at(form),
    ))
}

/// One `fn`/`fn*` arity clause: `([params...] body...)`.
fn analyze_fn_arity(a: &mut Analyzer, self_name: Option<&str>, clause: &Form) -> Result<FnArity, Diagnostic> {
    let items = clause
        .as_list()
        .ok_or_else(|| a.err(clause, ErrorKind::SyntaxError, "fn arity must be a list"))?;
    let params_form = items
        .first()
        .ok_or_else(|| a.err(clause, ErrorKind::SyntaxError, "fn arity missing parameter vector"))?;
    let params = match &params_form.data {
        FormData::Vector(v) => v.clone(),
        _ => return Err(a.err(clause, ErrorKind::SyntaxError, "fn arity parameters must be a vector")),
    };

    a.locals.push_fn_boundary();
    a.locals.push_scope();
    if let Some(n) = self_name {
        a.locals.bind(n);
    }

    let (param_names, extra_bindings) = destructure::expand_params(&params);
    let (fixed, variadic) = match param_names.iter().position(|n| n == "&") {
        Some(idx) => (param_names[..idx].to_vec(), param_names.get(idx + 1).cloned()),
        None => (param_names, None),
    };

    let recur_arity = fixed.len() + if variadic.is_some() { 1 } else { 0 };
    a.locals.push_recur_point(recur_arity);
    for n in &fixed {
        a.locals.bind(n);
    }
    if let Some(v) = &variadic {
        a.locals.bind(v);
    }

    a.locals.push_scope();
    let mut extra_local_bindings = Vec::new();
    for (name, init_form) in &extra_bindings {
        let init = a.analyze(init_form)?;
        a.locals.bind(name);
        extra_local_bindings.push(LocalBinding { name: Rc::from(name.as_str()), init });
    }
    let body_forms = &items[1..];
    let body_nodes_result = body_forms.iter().map(|f| a.analyze(f)).collect::<Result<Vec<_>, _>>();
    a.locals.pop_scope();

    let source = a.source_at(clause);
    let body = body_nodes_result.map(|body_nodes| {
        if extra_local_bindings.is_empty() {
            a.push(NodeKind::Do { body: body_nodes }, source.clone())
        } else {
            a.push(
                NodeKind::Let {
                    bindings: extra_local_bindings,
                    body: body_nodes,
                },
                source.clone(),
            )
        }
    });

    a.locals.pop_recur_point();
    a.locals.pop_scope();
    let captures = a.locals.pop_fn_boundary();

    Ok(FnArity {
        params: fixed.into_iter().map(|n| Rc::from(n.as_str())).collect(),
        variadic: variadic.map(|v| Rc::from(v.as_str())),
        body: body?,
        captures,
    })
}

fn analyze_fn(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let mut idx = 0;
    let name = match args.first().map(|f| &f.data) {
        Some(FormData::Symbol(None, n)) => {
            idx += 1;
            Some(n.to_string())
        }
        _ => None,
    };
    // optional docstring between name and arities, only meaningful with a name.
    if name.is_some() {
        if let Some(FormData::Str(_)) = args.get(idx).map(|f| &f.data) {
            idx += 1;
        }
    }
    let rest = &args[idx..];
    if rest.is_empty() {
        return Err(arity_error(a, form, "fn"));
    }
    let clauses: Vec<Form> = match &rest[0].data {
        FormData::Vector(_) => vec![Form::new(FormData::List(rest.to_vec()), form.line, form.column)],
        _ => rest.to_vec(),
    };
    let mut arities = Vec::new();
    for clause in &clauses {
        arities.push(analyze_fn_arity(a, name.as_deref(), clause)?);
    }
    Ok(a.push(
        NodeKind::Fn {
            name: name.map(|n| Rc::from(n.as_str())),
            arities,
        },
        a.source_at(form),
    ))
}

struct DefFlags {
    is_dynamic: bool,
    is_private: bool,
    is_const: bool,
}

fn unwrap_def_flags(form: &Form) -> (DefFlags, &Form) {
    let mut flags = DefFlags {
        is_dynamic: false,
        is_private: false,
        is_const: false,
    };
    let mut current = form;
    while let FormData::Tag { tag_name, inner } = &current.data {
        match tag_name.as_str() {
            "dynamic" => flags.is_dynamic = true,
            "private" => flags.is_private = true,
            "const" => flags.is_const = true,
            _ => {}
        }
        current = inner;
    }
    (flags, current)
}

fn analyze_def(a: &mut Analyzer, form: &Form, args: &[Form], is_macro: bool) -> Result<NodeId, Diagnostic> {
    let name_form = args.first().ok_or_else(|| arity_error(a, form, "def"))?;
    let (flags, name_form) = unwrap_def_flags(name_form);
    let name = name_form
        .as_symbol_name()
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "def requires a symbol name"))?;

    let (doc, init_form) = match args.len() {
        1 => (None, None),
        2 => (None, Some(&args[1])),
        3 => match &args[1].data {
            FormData::Str(s) => (Some(s.clone()), Some(&args[2])),
            _ => (None, Some(&args[1])),
        },
        _ => return Err(arity_error(a, form, "def")),
    };

    let ns_name = a.namespaces.current.to_string();
    a.namespaces.intern(&ns_name, &name);

    let init = match init_form {
        Some(f) => Some(a.analyze(f)?),
        None => None,
    };

    Ok(a.push(
        NodeKind::Def {
            name: Rc::from(name.as_str()),
            init,
            doc,
            is_dynamic: flags.is_dynamic,
            is_private: flags.is_private,
            is_const: flags.is_const,
            is_macro,
        },
        a.source_at(form),
    ))
}

/// `(defmacro name [params] body...)` is `def` of a named fn whose var is
/// flagged as a macro. A docstring between the name and the first
/// parameter vector is accepted and dropped into the var's doc field by
/// the evaluators.
fn analyze_defmacro(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let name_form = args.first().ok_or_else(|| arity_error(a, form, "defmacro"))?;
    let name = name_form
        .as_symbol_name()
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "defmacro requires a symbol name"))?;
    let mut rest = &args[1..];
    let doc = match rest.first().map(|f| &f.data) {
        Some(FormData::Str(s)) if rest.len() > 1 => {
            let doc = s.clone();
            rest = &rest[1..];
            Some(doc)
        }
        _ => None,
    };
    let mut fn_args = vec![name_form.clone()];
    fn_args.extend(rest.to_vec());
    let ns_name = a.namespaces.current.to_string();
    a.namespaces.intern(&ns_name, &name);
    let init = analyze_fn(a, form, &fn_args)?;
    Ok(a.push(
        NodeKind::Def {
            name: Rc::from(name.as_str()),
            init: Some(init),
            doc,
            is_dynamic: false,
            is_private: false,
            is_const: false,
            is_macro: true,
        },
        a.source_at(form),
    ))
}

/// `(ns name)` switches the current namespace at analysis time (so the
/// rest of the source resolves against it) and emits an `__in-ns` call so
/// evaluation makes the same switch.
fn analyze_ns(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let name = args
        .first()
        .and_then(|f| f.as_symbol_name())
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "ns requires a symbol name"))?;
    a.namespaces.set_current(&name);
    let rewritten = Form::list(vec![Form::sym("__in-ns"), Form::at(FormData::Str(name))]);
    a.analyze(&rewritten)
}

/// `(binding [sym val ...] body...)` rewrites to an `__with-bindings`
/// call: the runtime pushes one dynamic frame, runs the body thunk, and
/// pops the frame on every exit path including unwind.
fn analyze_binding(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let pairs = args
        .first()
        .and_then(|f| match &f.data {
            FormData::Vector(v) => Some(v.clone()),
            _ => None,
        })
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "binding requires a vector of sym/value pairs"))?;
    if pairs.len() % 2 != 0 {
        return Err(a.err(form, ErrorKind::SyntaxError, "binding vector must have an even number of forms"));
    }
    let mut syms = Vec::new();
    let mut vals = Vec::new();
    let mut i = 0;
    while i + 1 < pairs.len() {
        syms.push(pairs[i].clone());
        vals.push(pairs[i + 1].clone());
        i += 2;
    }
    let thunk = Form::list({
        let mut items = vec![Form::sym("fn*"), Form::at(FormData::Vector(vec![]))];
        items.extend(args[1..].to_vec());
        items
    });
    let rewritten = Form::list(vec![
        Form::sym("__with-bindings"),
        Form::list(vec![Form::sym("quote"), Form::at(FormData::Vector(syms))]),
        Form::at(FormData::Vector(vals)),
        thunk,
    ]);
    a.analyze(&rewritten)
}

/// `(instance? ClassName x)` rewrites to `(__instance? "ClassName" x)`:
/// the class name is syntax, not a resolvable value.
fn analyze_instance(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    if args.len() != 2 {
        return Err(arity_error(a, form, "instance?"));
    }
    let class_name = args[0]
        .as_symbol_name()
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "instance? requires a class name symbol"))?;
    let rewritten = Form::list(vec![
        Form::sym("__instance?"),
        Form::at(FormData::Str(class_name)),
        args[1].clone(),
    ]);
    a.analyze(&rewritten)
}

fn analyze_quote(a: &mut Analyzer, form: &Form, args: &[Form]) -> NodeId {
    let value = args.first().map(crate::conv::form_to_value).unwrap_or(Value::Nil);
    a.push(NodeKind::Quote { value }, a.source_at(form))
}

fn analyze_var_form(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let sym = args.first().ok_or_else(|| arity_error(a, form, "var"))?;
    let (ns, name) = match &sym.data {
        FormData::Symbol(ns, name) => (ns.clone(), name.clone()),
        _ => return Err(a.err(form, ErrorKind::SyntaxError, "var requires a symbol")),
    };
    // auto-intern an unqualified target in the current ns if absent.
    if ns.is_none() {
        let current = a.namespaces.current.to_string();
        a.namespaces.intern(&current, &name);
    }
    Ok(a.push(NodeKind::VarForm { ns, name }, a.source_at(form)))
}

fn analyze_set(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    if args.len() != 2 {
        return Err(arity_error(a, form, "set!"));
    }
    let name = args[0]
        .as_symbol_name()
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "set! target must be a symbol"))?;
    let value = a.analyze(&args[1])?;
    Ok(a.push(NodeKind::Set { name: Rc::from(name.as_str()), value }, a.source_at(form)))
}

fn analyze_throw(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    if args.len() != 1 {
        return Err(arity_error(a, form, "throw"));
    }
    let value = a.analyze(&args[0])?;
    Ok(a.push(NodeKind::Throw { value }, a.source_at(form)))
}

fn analyze_try(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let mut body_forms = Vec::new();
    let mut catches: Vec<CatchClause> = Vec::new();
    let mut finally = None;

    for item in args {
        if let Some(list) = item.as_list() {
            if let Some(head) = list.first().and_then(|f| f.as_symbol_name()) {
                if head == "catch" && list.len() >= 3 {
                    let class_name = list[1].as_symbol_name().unwrap_or_else(|| "Exception".to_string());
                    let binding = list[2]
                        .as_symbol_name()
                        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "catch binding must be a symbol"))?;
                    a.locals.push_scope();
                    a.locals.bind(&binding);
                    let body_nodes = list[3..].iter().map(|f| a.analyze(f)).collect::<Result<Vec<_>, _>>();
                    a.locals.pop_scope();
                    let body_id = a.push(NodeKind::Do { body: body_nodes? }, a.source_at(item));
                    catches.push(CatchClause {
                        class_name: Rc::from(class_name.as_str()),
                        binding: Rc::from(binding.as_str()),
                        body: body_id,
                    });
                    continue;
                } else if head == "finally" {
                    let body_nodes = list[1..].iter().map(|f| a.analyze(f)).collect::<Result<Vec<_>, _>>()?;
                    finally = Some(a.push(NodeKind::Do { body: body_nodes }, a.source_at(item)));
                    continue;
                }
            }
        }
        body_forms.push(item.clone());
    }

    let body_nodes = body_forms.iter().map(|f| a.analyze(f)).collect::<Result<Vec<_>, _>>()?;
    let body = a.push(NodeKind::Do { body: body_nodes }, a.source_at(form));

    // Nest multiple catch clauses so every Try node carries exactly one
    // catch: the first-written catch stays innermost (tested
    // first), later catches wrap progressively outward, and the finally
    // attaches only to the outermost Try.
    let catch_count = catches.len();
    let mut result = body;
    let mut wrapped_any = false;
    for (idx, catch) in catches.into_iter().enumerate() {
        let is_last = idx + 1 == catch_count;
        result = a.push(
            NodeKind::Try {
                body: result,
                catch: Some(catch),
                finally: if is_last { finally.take() } else { None },
            },
            a.source_at(form),
        );
        wrapped_any = true;
    }
    if !wrapped_any && finally.is_some() {
        result = a.push(
            NodeKind::Try {
                body: result,
                catch: None,
                finally: finally.take(),
            },
            a.source_at(form),
        );
    }
    Ok(result)
}

fn analyze_defprotocol(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let name = args
        .first()
        .and_then(|f| f.as_symbol_name())
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "defprotocol requires a name"))?;
    let mut methods = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for spec in &args[1..] {
        let Some(list) = spec.as_list() else { continue };
        let Some(method_name) = list.first().and_then(|f| f.as_symbol_name()) else { continue };
        if !seen.insert(method_name.clone()) {
            return Err(a.err(form, ErrorKind::SyntaxError, format!("duplicate protocol method: {method_name}")));
        }
        let params = list
            .get(1)
            .and_then(|f| match &f.data {
                FormData::Vector(v) => Some(v.clone()),
                _ => None,
            })
            .unwrap_or_default();
        if params.is_empty() {
            return Err(a.err(form, ErrorKind::SyntaxError, "protocol method needs at least a `this` parameter"));
        }
        methods.push(MethodSig {
            name: Rc::from(method_name.as_str()),
            params: params.iter().filter_map(|f| f.as_symbol_name()).map(|s| Rc::from(s.as_str())).collect(),
        });
    }
    Ok(a.push(NodeKind::Defprotocol { name: Rc::from(name.as_str()), methods }, a.source_at(form)))
}

fn analyze_extend_type(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let type_key = match args.first().map(|f| &f.data) {
        Some(FormData::Nil) => None,
        Some(FormData::Symbol(_, name)) => Some(name.clone()),
        _ => return Err(a.err(form, ErrorKind::SyntaxError, "extend-type requires a type or nil")),
    };
    let protocol = args
        .get(1)
        .and_then(|f| f.as_symbol_name())
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "extend-type requires a protocol name"))?;
    let mut methods = Vec::new();
    for spec in &args[2..] {
        let Some(list) = spec.as_list() else { continue };
        let Some(method_name) = list.first().and_then(|f| f.as_symbol_name()) else { continue };
        let fn_id = analyze_fn_arity(a, None, &Form::new(FormData::List(list[1..].to_vec()), spec.line, spec.column))?;
        let fn_node = a.push(
            NodeKind::Fn {
                name: Some(Rc::from(method_name.as_str())),
                arities: vec![fn_id],
            },
            a.source_at(spec),
        );
        methods.push((Rc::from(method_name.as_str()), fn_node));
    }
    Ok(a.push(
        NodeKind::ExtendType {
            type_key,
            protocol: Rc::from(protocol.as_str()),
            methods,
        },
        a.source_at(form),
    ))
}

fn analyze_reify(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let mut protocols = Vec::new();
    let mut methods = Vec::new();
    for item in args {
        if let Some(name) = item.as_symbol_name() {
            protocols.push(Rc::from(name.as_str()));
            continue;
        }
        if let Some(list) = item.as_list() {
            if let Some(method_name) = list.first().and_then(|f| f.as_symbol_name()) {
                let fn_id = analyze_fn_arity(a, None, &Form::new(FormData::List(list[1..].to_vec()), item.line, item.column))?;
                let fn_node = a.push(
                    NodeKind::Fn {
                        name: Some(Rc::from(method_name.as_str())),
                        arities: vec![fn_id],
                    },
                    a.source_at(item),
                );
                methods.push((Rc::from(method_name.as_str()), fn_node));
            }
        }
    }
    Ok(a.push(NodeKind::Reify { protocols, methods }, a.source_at(form)))
}

/// `defrecord` desugars to two `def`s: `->Name` builds a map
/// tagged `:__reify_type`, `map->Name` is the identity on an existing map.
fn analyze_defrecord(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let name = args
        .first()
        .and_then(|f| f.as_symbol_name())
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "defrecord requires a name"))?;
    let fields: Vec<Form> = args
        .get(1)
        .and_then(|f| match &f.data {
            FormData::Vector(v) => Some(v.clone()),
            _ => None,
        })
        .unwrap_or_default();
    let field_names: Vec<String> = fields.iter().filter_map(|f| f.as_symbol_name()).collect();

    let kw = |s: &str| Form::at(FormData::Keyword(None, s.into(), false));
    let mut map_items = vec![kw("__reify_type"), Form::at(FormData::Str(name.clone()))];
    for fname in &field_names {
        map_items.push(kw(fname));
        map_items.push(Form::sym(fname));
    }
    let ctor_body = Form::at(FormData::Map(map_items));
    let ctor_def = Form::list(vec![
        Form::sym("def"),
        Form::sym(&format!("->{name}")),
        Form::list(vec![Form::sym("fn*"), Form::at(FormData::Vector(fields)), ctor_body]),
    ]);
    let map_arg = Form::sym("m");
    let identity_def = Form::list(vec![
        Form::sym("def"),
        Form::sym(&format!("map->{name}")),
        Form::list(vec![
            Form::sym("fn*"),
            Form::at(FormData::Vector(vec![map_arg.clone()])),
            map_arg,
        ]),
    ]);
    analyze_do(a, form, &[ctor_def, identity_def])
}

fn analyze_defmulti(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let name = args
        .first()
        .and_then(|f| f.as_symbol_name())
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "defmulti requires a name"))?;
    let dispatch_form = args.get(1).ok_or_else(|| arity_error(a, form, "defmulti"))?;
    let dispatch_fn = a.analyze(dispatch_form)?;
    let ns_name = a.namespaces.current.to_string();
    a.namespaces.intern(&ns_name, &name);
    Ok(a.push(NodeKind::Defmulti { name: Rc::from(name.as_str()), dispatch_fn }, a.source_at(form)))
}

fn analyze_defmethod(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let multi_name = args
        .first()
        .and_then(|f| f.as_symbol_name())
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "defmethod requires a multimethod name"))?;
    let dispatch_val_form = args.get(1).ok_or_else(|| arity_error(a, form, "defmethod"))?;
    let dispatch_val = a.analyze(dispatch_val_form)?;
    let fn_clause = Form::new(FormData::List(args[2..].to_vec()), form.line, form.column);
    let arity = analyze_fn_arity(a, None, &fn_clause)?;
    let fn_node = a.push(
        NodeKind::Fn {
            name: Some(Rc::from(multi_name.as_str())),
            arities: vec![arity],
        },
        a.source_at(form),
    );
    Ok(a.push(
        NodeKind::Defmethod {
            multi_name: Rc::from(multi_name.as_str()),
            dispatch_val,
            fn_node,
        },
        a.source_at(form),
    ))
}

fn analyze_lazy_seq(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let thunk_clause = Form::new(
        FormData::List({
            let mut items = vec![Form::at(FormData::Vector(vec![]))];
            items.extend(args.to_vec());
            items
        }),
        form.line,
        form.column,
    );
    let arity = analyze_fn_arity(a, None, &thunk_clause)?;
    let thunk_fn = a.push(NodeKind::Fn { name: None, arities: vec![arity] }, a.source_at(form));
    Ok(a.push(NodeKind::LazySeqNode { thunk_fn }, a.source_at(form)))
}

/// `case`/`case*`: test values are literal Forms read directly as
/// `Value`s, never evaluated. Clauses are stored for a linear `value_eq`
/// scan (`skip_check: true`); the shift/mask hash-table optimization
/// described for `case*` is a compiler-side concern this analyzer leaves
/// for `lumen-compiler` to apply when profitable, not a correctness
/// requirement of the Node it emits.
fn analyze_case(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let discriminant_form = args.first().ok_or_else(|| arity_error(a, form, "case"))?;
    let discriminant = a.analyze(discriminant_form)?;
    let rest = &args[1..];
    let has_default = rest.len() % 2 == 1;
    let pair_slice = if has_default { &rest[..rest.len() - 1] } else { rest };

    let mut clauses = Vec::new();
    let mut i = 0;
    let mut hash_key = 0i64;
    while i + 1 < pair_slice.len() {
        let test_value = crate::conv::form_to_value(&pair_slice[i]);
        let then = a.analyze(&pair_slice[i + 1])?;
        clauses.push(CaseClause { hash_key, test_value, then });
        hash_key += 1;
        i += 2;
    }

    let default = if has_default {
        a.analyze(&rest[rest.len() - 1])?
    } else {
        let throw_form = Form::list(vec![
            Form::sym("throw"),
            Form::at(FormData::Str("no matching clause".to_string())),
        ]);
        a.analyze(&throw_form)?
    };

    Ok(a.push(
        NodeKind::CaseStar {
            shift: 0,
            mask: 0,
            test_type: CaseTestType::HashEquiv,
            discriminant,
            clauses,
            default,
            skip_check: true,
        },
        a.source_at(form),
    ))
}

fn analyze_for(a: &mut Analyzer, form: &Form, args: &[Form]) -> Result<NodeId, Diagnostic> {
    let clauses = args
        .first()
        .and_then(|f| match &f.data {
            FormData::Vector(v) => Some(v.clone()),
            _ => None,
        })
        .ok_or_else(|| a.err(form, ErrorKind::SyntaxError, "for requires a binding vector"))?;
    let body = if args.len() == 2 {
        args[1].clone()
    } else {
        Form::new(FormData::List({
            let mut items = vec![Form::sym("do")];
            items.extend(args[1..].to_vec());
            items
        }), form.line, form.column)
    };
    let desugared = crate::for_desugar::desugar_for(&clauses, body);
    let wrapped = Form::list(vec![Form::sym("lazy-seq"), desugared]);
    a.analyze(&wrapped)
}
