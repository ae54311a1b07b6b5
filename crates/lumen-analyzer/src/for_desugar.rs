//! `for` desugaring: a `for` comprehension with `:let`/`:when`/`:while`
//! modifiers rewrites to nested `mapcat`/`take-while` calls, entirely at
//! the `Form` level so the analyzer never needs a dedicated comprehension
//! node.

use crate::form::{Form, FormData};

fn sym(name: &str) -> Form {
    Form::sym(name)
}

fn call(name: &str, args: Vec<Form>) -> Form {
    let mut items = vec![sym(name)];
    items.extend(args);
    Form::list(items)
}

fn fn_of(params: Vec<Form>, body: Form) -> Form {
    Form::list(vec![sym("fn*"), Form::at(FormData::Vector(params)), body])
}

enum Modifier {
    Let(Form),
    When(Form),
    While(Form),
}

/// `(for [pattern coll ...mods... ...] body)` expands recursively per
/// binding pair. Modifiers attach to the pair immediately preceding them:
/// `:let` wraps the inner body in a `let*`, `:when` wraps it in an `if`
/// producing `()` on failure, and `:while` wraps the pair's *collection*
/// in a `take-while`. When `:when` precedes `:while` on the same pair the
/// `take-while` predicate is guarded with the `:when` test, so elements
/// the `:when` rejects still pass through the `take-while` and get
/// filtered by the inner `if` instead of truncating the sequence.
pub fn desugar_for(clauses: &[Form], body: Form) -> Form {
    expand_clauses(clauses, body)
}

fn expand_clauses(clauses: &[Form], body: Form) -> Form {
    if clauses.is_empty() {
        return call("list", vec![body]);
    }

    let pattern = clauses[0].clone();
    let seq_expr = clauses.get(1).cloned().unwrap_or_else(|| Form::at(FormData::Nil));

    let mut modifiers = Vec::new();
    let mut idx = 2;
    loop {
        let Some(kw) = clauses.get(idx) else { break };
        let FormData::Keyword(None, name, _) = &kw.data else { break };
        let arg = clauses.get(idx + 1).cloned().unwrap_or_else(|| Form::at(FormData::Nil));
        match &**name {
            "let" => modifiers.push(Modifier::Let(arg)),
            "when" => modifiers.push(Modifier::When(arg)),
            "while" => modifiers.push(Modifier::While(arg)),
            _ => break,
        }
        idx += 2;
    }

    let mut inner = expand_clauses(&clauses[idx..], body);

    // Wrap the body with :let/:when in reverse order of appearance so a
    // later modifier can see names a `:let` before it introduced.
    let mut while_test: Option<Form> = None;
    let mut when_before_while: Option<Form> = None;
    for (pos, m) in modifiers.iter().enumerate() {
        if let Modifier::While(t) = m {
            while_test = Some(t.clone());
            when_before_while = modifiers[..pos].iter().rev().find_map(|m| match m {
                Modifier::When(w) => Some(w.clone()),
                _ => None,
            });
        }
    }
    for m in modifiers.iter().rev() {
        match m {
            Modifier::Let(bindings) => {
                inner = Form::list(vec![sym("let*"), bindings.clone(), inner]);
            }
            Modifier::When(test) => {
                inner = call("if", vec![test.clone(), inner, call("list", vec![])]);
            }
            Modifier::While(_) => {}
        }
    }

    let seq_expr = match while_test {
        Some(test) => {
            let pred_body = match when_before_while {
                Some(when_test) => call("if", vec![when_test, test, Form::at(FormData::Bool(true))]),
                None => test,
            };
            call("take-while", vec![fn_of(vec![pattern.clone()], pred_body), seq_expr])
        }
        None => seq_expr,
    };

    call("mapcat", vec![fn_of(vec![pattern], inner), seq_expr])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(name: &str) -> Form {
        Form::at(FormData::Keyword(None, name.into(), false))
    }

    #[test]
    fn plain_binding_produces_mapcat() {
        let clauses = vec![sym("x"), sym("coll")];
        let result = desugar_for(&clauses, call("list", vec![sym("x")]));
        let items = result.as_list().unwrap();
        assert_eq!(items[0].as_symbol_name().unwrap(), "mapcat");
    }

    #[test]
    fn when_modifier_wraps_in_if() {
        let clauses = vec![sym("x"), sym("coll"), kw("when"), sym("pred")];
        let result = desugar_for(&clauses, call("list", vec![sym("x")]));
        // mapcat (fn* [x] (if pred (list x) (list))) coll
        let items = result.as_list().unwrap();
        let fn_form = items[1].as_list().unwrap();
        let if_form = fn_form[2].as_list().unwrap();
        assert_eq!(if_form[0].as_symbol_name().unwrap(), "if");
    }

    #[test]
    fn while_modifier_wraps_the_collection() {
        let clauses = vec![sym("x"), sym("coll"), kw("while"), sym("pred")];
        let result = desugar_for(&clauses, call("list", vec![sym("x")]));
        // mapcat (fn* [x] (list (list x))) (take-while (fn* [x] pred) coll)
        let items = result.as_list().unwrap();
        let seq_form = items[2].as_list().unwrap();
        assert_eq!(seq_form[0].as_symbol_name().unwrap(), "take-while");
    }

    #[test]
    fn when_before_while_guards_the_take_while_predicate() {
        let clauses = vec![sym("x"), sym("coll"), kw("when"), sym("wtest"), kw("while"), sym("utest")];
        let result = desugar_for(&clauses, call("list", vec![sym("x")]));
        let items = result.as_list().unwrap();
        let tw = items[2].as_list().unwrap();
        let pred_fn = tw[1].as_list().unwrap();
        let guard = pred_fn[2].as_list().unwrap();
        assert_eq!(guard[0].as_symbol_name().unwrap(), "if");
        assert_eq!(guard[1].as_symbol_name().unwrap(), "wtest");
    }
}
