//! Destructuring expansion: rewrites binding patterns into plain
//! `name = init` pairs plus `get`/`nth`/`first`/`next`/`seq`/
//! `__seq-to-map` calls, operating purely on `Form`s before any Node is
//! produced.

use crate::form::{split_symbol, Form, FormData};
use std::cell::Cell;

thread_local! {
    static GENSYM_COUNTER: Cell<u64> = const { Cell::new(0) };
}

fn gensym(prefix: &str) -> String {
    GENSYM_COUNTER.with(|c| {
        let n = c.get();
        c.set(n + 1);
        format!("__{prefix}{n}__")
    })
}

fn call(name: &str, args: Vec<Form>) -> Form {
    let mut items = vec![Form::sym(name)];
    items.extend(args);
    Form::list(items)
}

fn int_form(n: i64) -> Form {
    Form::at(FormData::Int(n))
}
fn nil_form() -> Form {
    Form::at(FormData::Nil)
}
fn kw(name: &str) -> Form {
    Form::at(FormData::Keyword(None, name.into(), false))
}

/// One `(name init)` binding pair, after pattern expansion.
pub type Binding = (String, Form);

/// Expands a single `[pattern init]` `let`/`loop` pair into zero-or-more
/// simple bindings. `init` is the Form producing the value to destructure.
pub fn expand_binding_pair(pattern: &Form, init: Form) -> Vec<Binding> {
    match &pattern.data {
        FormData::Symbol(None, name) => vec![(name.to_string(), init)],
        FormData::Symbol(Some(ns), name) => vec![(format!("{ns}/{name}"), init)],
        FormData::Vector(elements) => expand_vector_pattern(elements, init),
        FormData::Map(entries) => expand_map_pattern(entries, init),
        _ => vec![],
    }
}

fn is_as_marker(form: &Form) -> bool {
    matches!(&form.data, FormData::Keyword(None, n, _) if &**n == "as")
}

fn expand_vector_pattern(elements: &[Form], init: Form) -> Vec<Binding> {
    let has_amp = elements
        .iter()
        .any(|f| matches!(&f.data, FormData::Symbol(None, n) if &**n == "&"));
    let t = gensym("t");
    let mut out = vec![(t.clone(), init)];

    if !has_amp {
        let mut as_name = None;
        let mut index = 0i64;
        let mut i = 0;
        while i < elements.len() {
            if is_as_marker(&elements[i]) {
                if let Some(FormData::Symbol(None, name)) = elements.get(i + 1).map(|f| &f.data) {
                    as_name = Some(name.to_string());
                }
                i += 2;
                continue;
            }
            let nth = call("nth", vec![Form::sym(&t), int_form(index), nil_form()]);
            out.extend(expand_binding_pair(&elements[i], nth));
            index += 1;
            i += 1;
        }
        if let Some(name) = as_name {
            out.push((name, Form::sym(&t)));
        }
        return out;
    }

    // Vector pattern with `&`: bind s = (seq t); advance through a
    // fresh shadowing slot per positional; rest pattern consumes remaining
    // s; `:as` binds the original `t`, not `s`.
    let mut s = gensym("s");
    out.push((s.clone(), call("seq", vec![Form::sym(&t)])));
    let mut i = 0;
    let mut as_name = None;
    while i < elements.len() {
        match &elements[i].data {
            FormData::Symbol(None, n) if &**n == "&" => {
                if let Some(rest_pattern) = elements.get(i + 1) {
                    out.extend(expand_binding_pair(rest_pattern, Form::sym(&s)));
                }
                i += 2;
            }
            FormData::Keyword(None, n, _) if &**n == "as" => {
                if let Some(FormData::Symbol(None, name)) = elements.get(i + 1).map(|f| &f.data) {
                    as_name = Some(name.to_string());
                }
                i += 2;
            }
            _ => {
                let first = call("first", vec![Form::sym(&s)]);
                out.extend(expand_binding_pair(&elements[i], first));
                let next_s = gensym("s");
                out.push((next_s.clone(), call("next", vec![Form::sym(&s)])));
                s = next_s;
                i += 1;
            }
        }
    }
    if let Some(name) = as_name {
        out.push((name, Form::sym(&t)));
    }
    out
}

fn expand_map_pattern(entries: &[Form], init: Form) -> Vec<Binding> {
    // Bind m = (__seq-to-map coll) so variadic/seq inputs coerce.
    let m = gensym("m");
    let mut out = vec![(m.clone(), call("__seq-to-map", vec![init]))];

    let mut or_defaults: Vec<(String, Form)> = Vec::new();
    let mut as_name = None;
    let mut plain_entries: Vec<(Form, Form)> = Vec::new(); // (binding-pattern, key-form)

    let mut i = 0;
    while i < entries.len() {
        let key_form = &entries[i];
        if let FormData::Keyword(None, kname, _) = &key_form.data {
            match &**kname {
                "keys" => {
                    if let Some(FormData::Vector(names)) = entries.get(i + 1).map(|f| &f.data) {
                        for n in names {
                            if let FormData::Symbol(None, name) = &n.data {
                                plain_entries.push((n.clone(), kw(name)));
                            }
                        }
                    }
                    i += 2;
                    continue;
                }
                "strs" => {
                    if let Some(FormData::Vector(names)) = entries.get(i + 1).map(|f| &f.data) {
                        for n in names {
                            if let FormData::Symbol(None, name) = &n.data {
                                plain_entries.push((n.clone(), Form::at(FormData::Str(name.to_string()))));
                            }
                        }
                    }
                    i += 2;
                    continue;
                }
                "syms" => {
                    if let Some(FormData::Vector(names)) = entries.get(i + 1).map(|f| &f.data) {
                        for n in names {
                            if let FormData::Symbol(None, name) = &n.data {
                                plain_entries.push((n.clone(), Form::list(vec![Form::sym("quote"), n.clone()])));
                            }
                        }
                    }
                    i += 2;
                    continue;
                }
                "or" => {
                    if let Some(FormData::Map(or_entries)) = entries.get(i + 1).map(|f| &f.data) {
                        let mut j = 0;
                        while j + 1 < or_entries.len() {
                            if let FormData::Symbol(None, name) = &or_entries[j].data {
                                or_defaults.push((name.to_string(), or_entries[j + 1].clone()));
                            }
                            j += 2;
                        }
                    }
                    i += 2;
                    continue;
                }
                "as" => {
                    if let Some(FormData::Symbol(None, name)) = entries.get(i + 1).map(|f| &f.data) {
                        as_name = Some(name.to_string());
                    }
                    i += 2;
                    continue;
                }
                _ => {}
            }
        }
        // Plain `{pattern lookup-key}` entry.
        if let Some(lookup_key) = entries.get(i + 1) {
            plain_entries.push((key_form.clone(), lookup_key.clone()));
        }
        i += 2;
    }

    for (pattern, key_form) in plain_entries {
        if let FormData::Symbol(None, bound_name) = &pattern.data {
            let default = or_defaults
                .iter()
                .find(|(n, _)| n == &**bound_name)
                .map(|(_, d)| d.clone());
            let get_args = if let Some(d) = default {
                vec![Form::sym(&m), key_form, d]
            } else {
                vec![Form::sym(&m), key_form, nil_form()]
            };
            out.push((bound_name.to_string(), call("get", get_args)));
        } else {
            // Nested pattern in binding position, `{[x y] :point}`:
            // destructure the looked-up value recursively.
            let get_args = vec![Form::sym(&m), key_form, nil_form()];
            out.extend(expand_binding_pair(&pattern, call("get", get_args)));
        }
    }

    if let Some(name) = as_name {
        out.push((name, Form::sym(&m)));
    }
    out
}

/// Function parameters: non-symbol patterns get synthetic `__p{n}__`
/// names and an outer `let` that destructures each.
pub fn expand_params(params: &[Form]) -> (Vec<String>, Vec<Binding>) {
    let mut names = Vec::new();
    let mut extra_bindings = Vec::new();
    for p in params {
        match &p.data {
            FormData::Symbol(None, n) if &**n == "&" => names.push("&".to_string()),
            FormData::Symbol(None, name) => names.push(name.to_string()),
            _ => {
                let synthetic = gensym("p");
                extra_bindings.extend(expand_binding_pair(p, Form::sym(&synthetic)));
                names.push(synthetic);
            }
        }
    }
    (names, extra_bindings)
}

pub fn parse_symbol_ns(name: &str) -> (Option<String>, String) {
    let (ns, n) = split_symbol(name);
    (ns.map(|s| s.to_string()), n.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_symbol_binds_directly() {
        let b = expand_binding_pair(&Form::sym("x"), Form::sym("init"));
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].0, "x");
    }

    #[test]
    fn vector_pattern_without_amp_uses_nth() {
        let pattern = Form::at(FormData::Vector(vec![Form::sym("a"), Form::sym("b")]));
        let bindings = expand_binding_pair(&pattern, Form::sym("coll"));
        // t, a, b
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[1].0, "a");
        assert_eq!(bindings[2].0, "b");
    }

    #[test]
    fn vector_pattern_with_amp_and_as() {
        let pattern = Form::at(FormData::Vector(vec![
            Form::sym("a"),
            Form::sym("b"),
            Form::sym("&"),
            Form::sym("rest"),
            Form::at(FormData::Keyword(None, "as".into(), false)),
            Form::sym("all"),
        ]));
        let bindings = expand_binding_pair(&pattern, Form::sym("coll"));
        let names: Vec<_> = bindings.iter().map(|(n, _)| n.clone()).collect();
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));
        assert!(names.contains(&"rest".to_string()));
        assert!(names.contains(&"all".to_string()));
    }

    #[test]
    fn map_pattern_with_keys_and_or() {
        let pattern = Form::at(FormData::Map(vec![
            Form::at(FormData::Keyword(None, "keys".into(), false)),
            Form::at(FormData::Vector(vec![Form::sym("a"), Form::sym("b")])),
            Form::at(FormData::Keyword(None, "or".into(), false)),
            Form::at(FormData::Map(vec![Form::sym("a"), int_form(0), Form::sym("b"), int_form(0)])),
        ]));
        let bindings = expand_binding_pair(&pattern, nil_form());
        let names: Vec<_> = bindings.iter().map(|(n, _)| n.clone()).collect();
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));
    }
}
