//! Reader output consumed by the analyzer. The textual Reader
//! itself (tokenization, reader macros, syntax-quote) is an external
//! collaborator; this module only defines the shape it
//! hands to `analyze`.

use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum FormData {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    BigInt(String),
    BigDecimal(String),
    Ratio(String, String),
    Char(char),
    Str(String),
    Symbol(Option<Rc<str>>, Rc<str>),
    Keyword(Option<Rc<str>>, Rc<str>, bool),
    List(Vec<Form>),
    Vector(Vec<Form>),
    Map(Vec<Form>),
    Set(Vec<Form>),
    Regex(String),
    Tag { tag_name: String, inner: Box<Form> },
}

#[derive(Debug, Clone)]
pub struct Form {
    pub data: FormData,
    pub line: u32,
    pub column: u32,
}

impl Form {
    pub fn new(data: FormData, line: u32, column: u32) -> Self {
        Form { data, line, column }
    }

    pub fn at(data: FormData) -> Self {
        Form { data, line: 0, column: 0 }
    }

    pub fn sym(name: &str) -> Self {
        let (ns, n) = split_symbol(name);
        Form::at(FormData::Symbol(ns, n))
    }

    pub fn list(items: Vec<Form>) -> Self {
        Form::at(FormData::List(items))
    }

    pub fn as_symbol_name(&self) -> Option<String> {
        match &self.data {
            FormData::Symbol(Some(ns), name) => Some(format!("{ns}/{name}")),
            FormData::Symbol(None, name) => Some(name.to_string()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Form]> {
        match &self.data {
            FormData::List(items) => Some(items),
            _ => None,
        }
    }
}

pub fn split_symbol(name: &str) -> (Option<Rc<str>>, Rc<str>) {
    if let Some((ns, n)) = name.split_once('/') {
        if !ns.is_empty() && n != "" {
            return (Some(Rc::from(ns)), Rc::from(n));
        }
    }
    (None, Rc::from(name))
}
