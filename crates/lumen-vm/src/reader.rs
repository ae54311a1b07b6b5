//! A minimal in-tree reader: just enough textual syntax to drive
//! `Env::eval_str`, the CLI, and the bootstrap loader's core-library
//! source. A full reader (syntax-quote, reader conditionals, tagged
//! literals beyond `^:flag`) belongs to an external front end and is
//! deliberately not grown here.

use lumen_analyzer::form::{Form, FormData};
use lumen_core::{Diagnostic, ErrorKind, Location, Phase};

pub struct Reader<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    file: &'a str,
}

impl<'a> Reader<'a> {
    pub fn new(src: &'a str, file: &'a str) -> Self {
        Reader {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            file,
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<Form>, Diagnostic> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.at_end() {
                break;
            }
            out.push(self.read_form()?);
        }
        Ok(out)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn err(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(
            Phase::Parse,
            ErrorKind::SyntaxError,
            message,
            Location::new(self.file.to_string(), self.line, self.column),
        )
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() || c == ',' => {
                    self.advance();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_form(&mut self) -> Result<Form, Diagnostic> {
        self.skip_whitespace_and_comments();
        let (line, column) = (self.line, self.column);
        let c = self.peek().ok_or_else(|| self.err("unexpected end of input"))?;
        let data = match c {
            '(' => {
                self.advance();
                FormData::List(self.read_seq(')')?)
            }
            '[' => {
                self.advance();
                FormData::Vector(self.read_seq(']')?)
            }
            '{' => {
                self.advance();
                FormData::Map(self.read_seq('}')?)
            }
            '#' => {
                self.advance();
                match self.peek() {
                    Some('{') => {
                        self.advance();
                        FormData::Set(self.read_seq('}')?)
                    }
                    Some('"') => {
                        let s = self.read_string_literal()?;
                        FormData::Regex(s)
                    }
                    Some('\'') => {
                        self.advance();
                        let inner = self.read_form()?;
                        FormData::List(vec![Form::sym("var"), inner])
                    }
                    _ => return Err(self.err("unsupported # reader macro")),
                }
            }
            '\'' => {
                self.advance();
                let inner = self.read_form()?;
                FormData::List(vec![Form::sym("quote"), inner])
            }
            '@' => {
                self.advance();
                let inner = self.read_form()?;
                FormData::List(vec![Form::sym("deref"), inner])
            }
            '^' => {
                self.advance();
                let tag_form = self.read_form()?;
                let inner = self.read_form()?;
                let tag_name = match &tag_form.data {
                    FormData::Keyword(None, name, _) => name.to_string(),
                    FormData::Symbol(None, name) => name.to_string(),
                    _ => "meta".to_string(),
                };
                FormData::Tag {
                    tag_name,
                    inner: Box::new(inner),
                }
            }
            '"' => {
                let s = self.read_string_literal()?;
                FormData::Str(unescape(&s))
            }
            '\\' => {
                self.advance();
                FormData::Char(self.read_char_literal()?)
            }
            ':' => {
                self.advance();
                let token = self.read_token();
                let (ns, name) = lumen_analyzer::form::split_symbol(&token);
                FormData::Keyword(ns, name, false)
            }
            ')' | ']' | '}' => return Err(self.err("unexpected closing delimiter")),
            _ => {
                let token = self.read_token();
                parse_atom(&token)
            }
        };
        Ok(Form::new(data, line, column))
    }

    fn read_seq(&mut self, close: char) -> Result<Vec<Form>, Diagnostic> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                Some(c) if c == close => {
                    self.advance();
                    return Ok(out);
                }
                None => return Err(self.err(format!("unterminated collection, expected '{close}'"))),
                _ => out.push(self.read_form()?),
            }
        }
    }

    fn read_string_literal(&mut self) -> Result<String, Diagnostic> {
        self.advance(); // opening quote
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(self.err("unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => {
                    let escaped = self.advance().ok_or_else(|| self.err("unterminated string escape"))?;
                    out.push('\\');
                    out.push(escaped);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn read_char_literal(&mut self) -> Result<char, Diagnostic> {
        let token = self.read_token();
        match token.as_str() {
            "newline" => Ok('\n'),
            "space" => Ok(' '),
            "tab" => Ok('\t'),
            "return" => Ok('\r'),
            "" => self.advance().ok_or_else(|| self.err("unterminated char literal")),
            s => s.chars().next().ok_or_else(|| self.err("empty char literal")),
        }
    }

    fn read_token(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';' | ',') {
                break;
            }
            out.push(c);
            self.advance();
        }
        out
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_atom(token: &str) -> FormData {
    match token {
        "nil" => return FormData::Nil,
        "true" => return FormData::Bool(true),
        "false" => return FormData::Bool(false),
        _ => {}
    }
    if let Ok(n) = token.parse::<i64>() {
        return FormData::Int(n);
    }
    if token.ends_with('N') && token[..token.len() - 1].parse::<i64>().is_ok() {
        return FormData::BigInt(token[..token.len() - 1].to_string());
    }
    if let Ok(f) = token.parse::<f64>() {
        return FormData::Float(f);
    }
    let (ns, name) = lumen_analyzer::form::split_symbol(token);
    FormData::Symbol(ns, name)
}

pub fn read_all(src: &str, file: &str) -> Result<Vec<Form>, Diagnostic> {
    Reader::new(src, file).read_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_nested_list_and_vector() {
        let forms = read_all("(+ 1 [2 3])", "<test>").unwrap();
        assert_eq!(forms.len(), 1);
        match &forms[0].data {
            FormData::List(items) => assert_eq!(items.len(), 3),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn reads_keyword_and_string() {
        let forms = read_all(r#":foo "bar""#, "<test>").unwrap();
        assert!(matches!(&forms[0].data, FormData::Keyword(None, name, _) if &**name == "foo"));
        assert!(matches!(&forms[1].data, FormData::Str(s) if s == "bar"));
    }

    #[test]
    fn reads_dynamic_tag() {
        let forms = read_all("^:dynamic *x*", "<test>").unwrap();
        match &forms[0].data {
            FormData::Tag { tag_name, .. } => assert_eq!(tag_name, "dynamic"),
            other => panic!("expected tag, got {other:?}"),
        }
    }
}
