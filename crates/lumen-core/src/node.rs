//! Executable AST: 24 Node variants, each carrying `SourceInfo`.
//!
//! Nodes live in a `lumen_core::arena::Arena<Node>` owned by the `Env`
//!, so this module
//! only defines the *shape*; allocation and re-analysis is the analyzer's
//! job (`lumen-analyzer`).

use crate::arena::Id;
use crate::value::{Ident, Value};
use std::rc::Rc;

pub type NodeId = Id<Node>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceInfo {
    pub line: u32,
    pub column: u32,
    pub file: Rc<str>,
}

impl SourceInfo {
    pub fn new(file: impl Into<Rc<str>>, line: u32, column: u32) -> Self {
        SourceInfo {
            line,
            column,
            file: file.into(),
        }
    }

    pub fn unknown() -> Self {
        SourceInfo {
            line: 0,
            column: 0,
            file: Rc::from("<unknown>"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalBinding {
    pub name: Rc<str>,
    pub init: NodeId,
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub class_name: Rc<str>,
    pub binding: Rc<str>,
    pub body: NodeId,
}

#[derive(Debug, Clone)]
pub struct FnArity {
    pub params: Vec<Rc<str>>,
    pub variadic: Option<Rc<str>>,
    pub body: NodeId,
    /// Locals captured from the enclosing scope, recorded by the analyzer
    /// so the compiler/tree-walker don't have to re-derive free variables.
    pub captures: Vec<Rc<str>>,
}

#[derive(Debug, Clone)]
pub struct CaseClause {
    pub hash_key: i64,
    pub test_value: Value,
    pub then: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseTestType {
    Int,
    HashEquiv,
    HashIdentity,
}

#[derive(Debug, Clone)]
pub struct MethodSig {
    pub name: Rc<str>,
    pub params: Vec<Rc<str>>,
}

/// The full set of executable node shapes.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Constant(Value),
    VarRef {
        ns: Option<Rc<str>>,
        name: Rc<str>,
    },
    LocalRef {
        name: Rc<str>,
    },
    If {
        test: NodeId,
        then: NodeId,
        else_: Option<NodeId>,
    },
    Do {
        body: Vec<NodeId>,
    },
    Let {
        bindings: Vec<LocalBinding>,
        body: Vec<NodeId>,
    },
    Letfn {
        names: Vec<Rc<str>>,
        inits: Vec<NodeId>,
        body: Vec<NodeId>,
    },
    Loop {
        bindings: Vec<LocalBinding>,
        body: Vec<NodeId>,
    },
    Recur {
        args: Vec<NodeId>,
    },
    Fn {
        name: Option<Rc<str>>,
        arities: Vec<FnArity>,
    },
    Call {
        callee: NodeId,
        args: Vec<NodeId>,
    },
    Def {
        name: Rc<str>,
        init: Option<NodeId>,
        doc: Option<String>,
        is_dynamic: bool,
        is_private: bool,
        is_const: bool,
        is_macro: bool,
    },
    Set {
        name: Rc<str>,
        value: NodeId,
    },
    Quote {
        value: Value,
    },
    Throw {
        value: NodeId,
    },
    Try {
        body: NodeId,
        catch: Option<CatchClause>,
        finally: Option<NodeId>,
    },
    Defprotocol {
        name: Rc<str>,
        methods: Vec<MethodSig>,
    },
    ExtendType {
        type_key: Option<Rc<str>>,
        protocol: Rc<str>,
        methods: Vec<(Rc<str>, NodeId)>,
    },
    Reify {
        protocols: Vec<Rc<str>>,
        methods: Vec<(Rc<str>, NodeId)>,
    },
    Defmulti {
        name: Rc<str>,
        dispatch_fn: NodeId,
    },
    Defmethod {
        multi_name: Rc<str>,
        dispatch_val: NodeId,
        fn_node: NodeId,
    },
    LazySeqNode {
        thunk_fn: NodeId,
    },
    CaseStar {
        shift: u32,
        mask: u32,
        test_type: CaseTestType,
        discriminant: NodeId,
        clauses: Vec<CaseClause>,
        default: NodeId,
        skip_check: bool,
    },
    VarForm {
        ns: Option<Rc<str>>,
        name: Rc<str>,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub source: SourceInfo,
}

impl Node {
    pub fn new(kind: NodeKind, source: SourceInfo) -> Self {
        Node { kind, source }
    }
}

pub type NodeArena = crate::arena::Arena<Node>;

pub fn ident_from(name: &str) -> Ident {
    if let Some((ns, n)) = name.split_once('/') {
        if !ns.is_empty() {
            return Ident::new(Some(ns), n);
        }
    }
    Ident::unqualified(name)
}
