//! `Form` <-> `Value` conversion, needed only at the macro-expansion
//! boundary: a macro call's argument forms are quoted
//! into `Value`s, invoked through `MacroInvoker`, and the resulting
//! `Value` is read back as a `Form` for re-analysis.

use crate::form::{Form, FormData};
use lumen_core::{Ident, Value};
use std::rc::Rc;

pub fn form_to_value(form: &Form) -> Value {
    match &form.data {
        FormData::Nil => Value::Nil,
        FormData::Bool(b) => Value::Bool(*b),
        FormData::Int(n) => Value::Int(*n),
        FormData::Float(f) => Value::Float(*f),
        FormData::Char(c) => Value::Char(*c),
        FormData::Str(s) => Value::string(s),
        FormData::BigInt(digits) => digits
            .parse::<num_bigint::BigInt>()
            .map(|b| Value::BigInt(Rc::new(b)))
            .unwrap_or(Value::Nil),
        FormData::BigDecimal(_) | FormData::Ratio(_, _) => Value::Nil,
        FormData::Symbol(ns, name) => Value::Symbol(Rc::new(Ident::new(ns.as_deref(), name))),
        FormData::Keyword(ns, name, _) => Value::Keyword(Rc::new(Ident::new(ns.as_deref(), name))),
        FormData::List(items) => {
            Value::List(items.iter().map(form_to_value).collect())
        }
        FormData::Vector(items) => Value::Vector(items.iter().map(form_to_value).collect()),
        FormData::Map(entries) => {
            let mut m = lumen_core::PersistentMap::new();
            let mut i = 0;
            while i + 1 < entries.len() {
                m = m.assoc(form_to_value(&entries[i]), form_to_value(&entries[i + 1]));
                i += 2;
            }
            Value::Map(Rc::new(m))
        }
        FormData::Set(items) => Value::Set(
            items
                .iter()
                .map(|f| lumen_core::HashKey(form_to_value(f)))
                .collect(),
        ),
        FormData::Regex(src) => regex::Regex::new(src)
            .map(|r| Value::Regex(Rc::new(r)))
            .unwrap_or(Value::Nil),
        FormData::Tag { inner, .. } => form_to_value(inner),
    }
}

pub fn value_to_form(value: &Value) -> Form {
    let data = match value {
        Value::Nil => FormData::Nil,
        Value::Bool(b) => FormData::Bool(*b),
        Value::Int(n) => FormData::Int(*n),
        Value::Float(f) => FormData::Float(*f),
        Value::Char(c) => FormData::Char(*c),
        Value::Str(s) => FormData::Str(s.to_string()),
        Value::BigInt(b) => FormData::BigInt(b.to_string()),
        Value::Symbol(ident) => FormData::Symbol(ident.ns.clone(), ident.name.clone()),
        Value::Keyword(ident) => FormData::Keyword(ident.ns.clone(), ident.name.clone(), false),
        Value::List(items) => FormData::List(items.iter().map(value_to_form).collect()),
        Value::Vector(items) => FormData::Vector(items.iter().map(value_to_form).collect()),
        // Macros assemble forms with `cons`; the invoker realizes any lazy
        // tails before handing the value back, so a plain chain walk is
        // enough here.
        Value::Cons(_) => {
            let mut items = Vec::new();
            let mut cur = value.clone();
            loop {
                match cur {
                    Value::Cons(cell) => {
                        items.push(value_to_form(&cell.first));
                        cur = cell.rest.clone();
                    }
                    Value::Nil => break,
                    Value::List(rest_items) => {
                        items.extend(rest_items.iter().map(value_to_form));
                        break;
                    }
                    Value::Vector(rest_items) => {
                        items.extend(rest_items.iter().map(value_to_form));
                        break;
                    }
                    other => {
                        items.push(value_to_form(&other));
                        break;
                    }
                }
            }
            FormData::List(items)
        }
        Value::Map(m) => {
            let mut entries = Vec::new();
            for (k, v) in m.iter() {
                entries.push(value_to_form(&k));
                entries.push(value_to_form(&v));
            }
            FormData::Map(entries)
        }
        Value::Set(items) => FormData::Set(items.iter().map(|k| value_to_form(&k.0)).collect()),
        Value::Regex(r) => FormData::Regex(r.as_str().to_string()),
        _ => FormData::Nil,
    };
    Form::at(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_list() {
        let form = Form::list(vec![Form::sym("a"), Form::at(FormData::Int(1))]);
        let value = form_to_value(&form);
        let back = value_to_form(&value);
        match back.data {
            FormData::List(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].as_symbol_name().unwrap(), "a");
            }
            _ => panic!("expected list"),
        }
    }
}
