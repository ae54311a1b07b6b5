//! The uniform Value datum shared by both evaluators.
//!
//! A plain tagged enum rather than a NaN-boxed word: every switch site
//! stays ordinary Rust, and the accessor surface (`tag()`, `type_key()`,
//! the constructors) keeps call sites stable if a packed representation
//! ever replaces it.
//!
//! Mark-sweep tracking (the `GcRef` variants, see `gc.rs`) is applied
//! only to the heap kinds that are mutable and identity-bearing — `Fn`,
//! `MultiFn`, `Protocol`, `LazySeq`, `Delay`, `Atom` — because those are
//! the only kinds that can form a reference cycle or need revocable
//! shared identity. Immutable, value-semantics kinds (strings, symbols,
//! keywords, the numeric tower, list/vector/map/set, regex, records,
//! `reduced`) are `Rc`/persistent-structure backed: they are cycle-free
//! by construction (nothing in an immutable value can point back at
//! something that isn't fully built yet), so reference counting already
//! frees them exactly when unreachable, and routing them through
//! mark-sweep too would just be duplicate bookkeeping for no behavioral
//! difference.

use crate::gc::GcRef;
use num_bigint::BigInt;
use num_rational::BigRational;
use std::fmt;
use std::rc::Rc;

/// A namespace-qualified or bare identifier payload shared by `Symbol` and
/// `Keyword`, keyword (ns? + name)").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    pub ns: Option<Rc<str>>,
    pub name: Rc<str>,
}

impl Ident {
    pub fn new(ns: Option<&str>, name: &str) -> Self {
        Ident {
            ns: ns.map(Rc::from),
            name: Rc::from(name),
        }
    }

    pub fn unqualified(name: &str) -> Self {
        Ident::new(None, name)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// `big_decimal`: arbitrary-precision decimal as (unscaled BigInt, scale).
/// Printed as `<unscaled with decimal point inserted at scale>M`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigDecimalVal {
    pub unscaled: BigInt,
    pub scale: u32,
}

/// Persistent map: a small array map up to eight entries, promoted to a
/// HAMT beyond that.
#[derive(Debug, Clone)]
pub enum PersistentMap {
    Array(im::Vector<(Value, Value)>),
    Hamt(im::HashMap<HashKey, Value>),
}

const ARRAY_MAP_MAX: usize = 8;

impl PersistentMap {
    pub fn new() -> Self {
        PersistentMap::Array(im::Vector::new())
    }

    pub fn len(&self) -> usize {
        match self {
            PersistentMap::Array(v) => v.len(),
            PersistentMap::Hamt(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        match self {
            PersistentMap::Array(v) => v
                .iter()
                .find(|(k, _)| value_eq(k, key))
                .map(|(_, v)| v.clone()),
            PersistentMap::Hamt(m) => m.get(&HashKey(key.clone())).cloned(),
        }
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn assoc(&self, key: Value, value: Value) -> PersistentMap {
        match self {
            PersistentMap::Array(v) => {
                if let Some(idx) = v.iter().position(|(k, _)| value_eq(k, &key)) {
                    let mut v2 = v.clone();
                    v2[idx] = (key, value);
                    PersistentMap::Array(v2)
                } else if v.len() < ARRAY_MAP_MAX {
                    let mut v2 = v.clone();
                    v2.push_back((key, value));
                    PersistentMap::Array(v2)
                } else {
                    let mut m: im::HashMap<HashKey, Value> = v
                        .iter()
                        .cloned()
                        .map(|(k, v)| (HashKey(k), v))
                        .collect();
                    m.insert(HashKey(key), value);
                    PersistentMap::Hamt(m)
                }
            }
            PersistentMap::Hamt(m) => {
                let mut m2 = m.clone();
                m2.insert(HashKey(key), value);
                PersistentMap::Hamt(m2)
            }
        }
    }

    pub fn dissoc(&self, key: &Value) -> PersistentMap {
        match self {
            PersistentMap::Array(v) => {
                PersistentMap::Array(v.iter().filter(|(k, _)| !value_eq(k, key)).cloned().collect())
            }
            PersistentMap::Hamt(m) => {
                let mut m2 = m.clone();
                m2.remove(&HashKey(key.clone()));
                PersistentMap::Hamt(m2)
            }
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = (Value, Value)> + '_> {
        match self {
            PersistentMap::Array(v) => Box::new(v.iter().cloned()),
            PersistentMap::Hamt(m) => Box::new(m.iter().map(|(k, v)| (k.0.clone(), v.clone()))),
        }
    }
}

impl Default for PersistentMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a `Value` for use as a hash-map/hash-set key. Equality and hash
/// follow Lumen value equality; `Float` hashes by bit pattern since
/// IEEE-754 equality is not reflexive for NaN but map keys need a total
/// order-independent partition.
#[derive(Debug, Clone)]
pub struct HashKey(pub Value);

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        value_eq(&self.0, &other.0)
    }
}
impl Eq for HashKey {}

impl std::hash::Hash for HashKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        value_hash(&self.0, state);
    }
}

fn value_hash<H: std::hash::Hasher>(v: &Value, state: &mut H) {
    use std::hash::Hash;
    match v {
        Value::Nil => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Char(c) => {
            2u8.hash(state);
            c.hash(state);
        }
        Value::Int(n) => {
            3u8.hash(state);
            n.hash(state);
        }
        Value::Float(f) => {
            3u8.hash(state); // numeric tower hashes like Int when integral (cross-type equality)
            f.to_bits().hash(state);
        }
        Value::BigInt(n) => {
            3u8.hash(state);
            n.hash(state);
        }
        Value::Ratio(r) => {
            3u8.hash(state);
            r.hash(state);
        }
        Value::Str(s) => {
            4u8.hash(state);
            s.hash(state);
        }
        Value::Symbol(id) => {
            5u8.hash(state);
            id.hash(state);
        }
        Value::Keyword(id) => {
            6u8.hash(state);
            id.hash(state);
        }
        Value::List(items) | Value::Vector(items) => {
            7u8.hash(state);
            for item in items.iter() {
                value_hash(item, state);
            }
        }
        Value::Set(items) => {
            8u8.hash(state);
            let mut hashes: Vec<u64> = items
                .iter()
                .map(|hk| {
                    let mut h = std::collections::hash_map::DefaultHasher::new();
                    value_hash(&hk.0, &mut h);
                    std::hash::Hasher::finish(&h)
                })
                .collect();
            hashes.sort_unstable();
            hashes.hash(state);
        }
        Value::Map(m) => {
            9u8.hash(state);
            let mut hashes: Vec<u64> = m
                .iter()
                .map(|(k, v)| {
                    let mut h = std::collections::hash_map::DefaultHasher::new();
                    value_hash(&k, &mut h);
                    value_hash(&v, &mut h);
                    std::hash::Hasher::finish(&h)
                })
                .collect();
            hashes.sort_unstable();
            hashes.hash(state);
        }
        // Identity-bearing / non-value-semantics kinds hash by pointer identity.
        other => {
            10u8.hash(state);
            (other.heap_identity()).hash(state);
        }
    }
}

/// Value equality: numeric variants compare across types by numeric
/// value; collections compare element-wise in order except `set`
/// (unordered). Lazy-seq realization at the equality boundary is
/// implemented one layer up in `lumen-vm`, which has access to the
/// dispatcher needed to force thunks; this function handles every
/// already-realized/non-lazy case.
pub fn value_eq(a: &Value, b: &Value) -> bool {
    use Value::*;
    match (a, b) {
        (Nil, Nil) => true,
        (Bool(x), Bool(y)) => x == y,
        (Char(x), Char(y)) => x == y,
        (Int(x), Float(y)) | (Float(y), Int(x)) => *x as f64 == *y,
        (Int(x), Int(y)) => x == y,
        (Float(x), Float(y)) => x == y,
        (BigInt(x), BigInt(y)) => x == y,
        (BigInt(x), Int(y)) | (Int(y), BigInt(x)) => x.as_ref() == &num_bigint::BigInt::from(*y),
        (Ratio(x), Ratio(y)) => x == y,
        (Str(x), Str(y)) => x == y,
        (Symbol(x), Symbol(y)) => x == y,
        (Keyword(x), Keyword(y)) => x == y,
        (List(x), List(y)) | (Vector(x), Vector(y)) | (List(x), Vector(y)) | (Vector(x), List(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| value_eq(a, b))
        }
        (Set(x), Set(y)) => x.len() == y.len() && x.iter().all(|item| y.contains(item)),
        (Map(x), Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(&k).map(|v2| value_eq(&v, &v2)).unwrap_or(false))
        }
        (Record(x), Record(y)) => x.type_name == y.type_name && value_eq(&x.fields, &y.fields),
        (Regex(x), Regex(y)) => x.as_str() == y.as_str(),
        (Reduced(x), Reduced(y)) => value_eq(x, y),
        _ => a.heap_identity() == b.heap_identity() && a.tag() == b.tag(),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        value_eq(self, other)
    }
}

/// A builtin function: name (for arity/error messages) plus the Rust
/// closure implementing it. Builtins never capture Lumen-level state;
/// anything stateful goes through `Var`s or `Atom`s instead.
pub struct BuiltinFnData {
    pub name: &'static str,
    pub min_arity: usize,
    pub max_arity: Option<usize>,
    pub func: Box<dyn Fn(&[Value]) -> Result<Value, crate::error::Diagnostic>>,
}

impl fmt::Debug for BuiltinFnData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuiltinFnData({})", self.name)
    }
}

/// A `defrecord`-produced type-tagged map: behaves
/// like a map but carries its type name for `instance?`/protocol dispatch.
#[derive(Debug, Clone)]
pub struct RecordData {
    pub type_name: Rc<str>,
    pub fields: Value, // always a Value::Map
}

/// Stand-in for the Wasm guest FFI boundary: `Value::WasmModule`/`WasmFn`
/// exist and round-trip through the dispatcher, but no guest runtime is
/// linked here.
#[derive(Debug)]
pub struct WasmModuleStub {
    pub name: String,
}
#[derive(Debug)]
pub struct WasmFnStub {
    pub module: String,
    pub export: String,
}

#[derive(Debug, Clone)]
pub struct ConsCell {
    pub first: Value,
    pub rest: Value,
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Char(char),
    Int(i64),
    Float(f64),
    BigInt(Rc<BigInt>),
    BigDecimal(Rc<BigDecimalVal>),
    Ratio(Rc<BigRational>),
    Str(Rc<str>),
    Symbol(Rc<Ident>),
    Keyword(Rc<Ident>),
    List(im::Vector<Value>),
    Vector(im::Vector<Value>),
    Map(Rc<PersistentMap>),
    Set(im::HashSet<HashKey>),
    Cons(Rc<ConsCell>),
    LazySeq(GcRef),
    Fn(GcRef),
    BuiltinFn(Rc<BuiltinFnData>),
    MultiFn(GcRef),
    Protocol(GcRef),
    Record(Rc<RecordData>),
    Atom(GcRef),
    Delay(GcRef),
    Regex(Rc<regex::Regex>),
    VarRef(crate::var::VarRc),
    WasmModule(Rc<WasmModuleStub>),
    WasmFn(Rc<WasmFnStub>),
    Reduced(Rc<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(Rc::from(s.into()))
    }

    pub fn symbol(ns: Option<&str>, name: &str) -> Value {
        Value::Symbol(Rc::new(Ident::new(ns, name)))
    }

    pub fn keyword(ns: Option<&str>, name: &str) -> Value {
        Value::Keyword(Rc::new(Ident::new(ns, name)))
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Char(_) => "char",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::BigInt(_) => "big_int",
            Value::BigDecimal(_) => "big_decimal",
            Value::Ratio(_) => "ratio",
            Value::Str(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Cons(_) => "cons",
            Value::LazySeq(_) => "lazy_seq",
            Value::Fn(_) => "fn",
            Value::BuiltinFn(_) => "builtin_fn",
            Value::MultiFn(_) => "multi_fn",
            Value::Protocol(_) => "protocol",
            Value::Record(_) => "record",
            Value::Atom(_) => "atom",
            Value::Delay(_) => "delay",
            Value::Regex(_) => "regex",
            Value::VarRef(_) => "var_ref",
            Value::WasmModule(_) => "wasm_module",
            Value::WasmFn(_) => "wasm_fn",
            Value::Reduced(_) => "reduced",
        }
    }

    /// Type key for protocol dispatch: a stable string per runtime
    /// type, with records keyed by their declared type name.
    pub fn type_key(&self) -> String {
        match self {
            Value::Record(r) => r.type_name.to_string(),
            other => other.tag().to_string(),
        }
    }

    /// Identity used for non-value-semantics equality/hashing fallback.
    pub fn heap_identity(&self) -> usize {
        match self {
            Value::LazySeq(r) | Value::Fn(r) | Value::MultiFn(r) | Value::Protocol(r) | Value::Atom(r) | Value::Delay(r) => {
                r.identity()
            }
            Value::Cons(c) => Rc::as_ptr(c) as usize,
            Value::BuiltinFn(f) => Rc::as_ptr(f) as usize,
            Value::VarRef(v) => Rc::as_ptr(v) as usize,
            Value::WasmModule(m) => Rc::as_ptr(m) as usize,
            Value::WasmFn(f) => Rc::as_ptr(f) as usize,
            _ => 0,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Fn(_)
                | Value::BuiltinFn(_)
                | Value::MultiFn(_)
                | Value::Keyword(_)
                | Value::Map(_)
                | Value::Set(_)
        )
    }

    pub fn is_seqable(&self) -> bool {
        matches!(
            self,
            Value::Nil
                | Value::List(_)
                | Value::Vector(_)
                | Value::Map(_)
                | Value::Set(_)
                | Value::Cons(_)
                | Value::LazySeq(_)
                | Value::Str(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_cross_type_equality() {
        assert!(value_eq(&Value::Int(3), &Value::Float(3.0)));
        assert!(!value_eq(&Value::Int(3), &Value::Float(3.1)));
    }

    #[test]
    fn list_and_vector_compare_order_sensitively() {
        let l = Value::List(im::vector![Value::Int(1), Value::Int(2)]);
        let v = Value::Vector(im::vector![Value::Int(1), Value::Int(2)]);
        assert!(value_eq(&l, &v));
        let v2 = Value::Vector(im::vector![Value::Int(2), Value::Int(1)]);
        assert!(!value_eq(&l, &v2));
    }

    #[test]
    fn sets_compare_unordered() {
        let a: im::HashSet<HashKey> = [Value::Int(1), Value::Int(2)]
            .into_iter()
            .map(HashKey)
            .collect();
        let b: im::HashSet<HashKey> = [Value::Int(2), Value::Int(1)]
            .into_iter()
            .map(HashKey)
            .collect();
        assert!(value_eq(&Value::Set(a), &Value::Set(b)));
    }

    #[test]
    fn array_map_promotes_to_hamt_past_eight_entries() {
        let mut m = PersistentMap::new();
        for i in 0..8 {
            m = m.assoc(Value::Int(i), Value::Int(i * 10));
        }
        assert!(matches!(m, PersistentMap::Array(_)));
        m = m.assoc(Value::Int(8), Value::Int(80));
        assert!(matches!(m, PersistentMap::Hamt(_)));
        assert_eq!(m.get(&Value::Int(8)), Some(Value::Int(80)));
    }
}
