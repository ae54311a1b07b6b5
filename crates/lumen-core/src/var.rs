//! `Var` cell data. Lives in `lumen-core`, not `lumen-env`,
//! because `Value::VarRef` embeds it directly: Vars are "process-lived;
//! not freed by GC", so they are plain `Rc<RefCell<..>>` cells
//! rather than GC-heap objects, and every crate that needs to hold a
//! `Value` therefore needs `VarCell` in scope without depending on the
//! namespace table that owns the interning.

use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub struct VarMeta {
    pub doc: Option<String>,
    pub arglists: Option<Value>,
    pub is_dynamic: bool,
    pub is_macro: bool,
    pub is_private: bool,
    pub is_const: bool,
    pub generic: Option<Value>,
}

pub struct VarCell {
    pub sym_name: String,
    pub ns_name: String,
    pub root: Option<Value>,
    pub meta: VarMeta,
}

impl fmt::Debug for VarCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#'{}/{}", self.ns_name, self.sym_name)
    }
}

pub type VarRc = Rc<RefCell<VarCell>>;

pub fn new_var(ns_name: &str, sym_name: &str) -> VarRc {
    Rc::new(RefCell::new(VarCell {
        sym_name: sym_name.to_string(),
        ns_name: ns_name.to_string(),
        root: None,
        meta: VarMeta::default(),
    }))
}

/// `(identical? #'x #'x)`: identity is the
/// `Rc` pointer, stable across `bind_root` because rebind only mutates the
/// `RefCell`'s contents.
pub fn var_identical(a: &VarRc, b: &VarRc) -> bool {
    Rc::ptr_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_survives_rebind() {
        let v = new_var("user", "x");
        let v2 = v.clone();
        v.borrow_mut().root = Some(Value::Int(1));
        assert!(var_identical(&v, &v2));
        v.borrow_mut().root = Some(Value::Int(2));
        assert!(var_identical(&v, &v2));
        assert_eq!(v2.borrow().root, Some(Value::Int(2)));
    }
}
