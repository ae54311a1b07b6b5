//! Namespace and its operations.

use lumen_core::{new_var, var::VarRc, Value};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

pub struct Namespace {
    pub name: Rc<str>,
    pub mappings: HashMap<String, VarRc>,
    pub refers: HashMap<String, VarRc>,
    pub aliases: HashMap<String, Rc<str>>,
}

impl Namespace {
    fn new(name: Rc<str>) -> Self {
        Namespace {
            name,
            mappings: HashMap::new(),
            refers: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn resolve_unqualified(&self, sym: &str) -> Option<VarRc> {
        self.mappings
            .get(sym)
            .or_else(|| self.refers.get(sym))
            .cloned()
    }
}

/// Owns every `Namespace` in an `Env`.
pub struct NamespaceTable {
    namespaces: HashMap<Rc<str>, Namespace>,
    pub current: Rc<str>,
    /// Bumped on every mutation that can change what a symbol resolves
    /// to. Inline caches at VM call sites compare against this and fall
    /// back to a full resolve on mismatch.
    version: std::cell::Cell<u64>,
}

impl NamespaceTable {
    pub fn new(initial_ns: &str) -> Self {
        let mut table = NamespaceTable {
            namespaces: HashMap::new(),
            current: Rc::from(initial_ns),
            version: std::cell::Cell::new(0),
        };
        table.find_or_create_namespace(initial_ns);
        table
    }

    pub fn version(&self) -> u64 {
        self.version.get()
    }

    fn bump_version(&self) {
        self.version.set(self.version.get().wrapping_add(1));
    }

    /// Idempotent; a new namespace inherits the current one's refers on
    /// creation so `ns`-boundary macros that rely on referred symbols
    /// keep working.
    pub fn find_or_create_namespace(&mut self, name: &str) -> Rc<str> {
        if let Some(ns) = self.namespaces.get(name) {
            return ns.name.clone();
        }
        let interned: Rc<str> = Rc::from(name);
        let inherited_refers = self
            .namespaces
            .get(&self.current)
            .map(|ns| ns.refers.clone())
            .unwrap_or_default();
        let mut ns = Namespace::new(interned.clone());
        ns.refers = inherited_refers;
        debug!(name, "creating namespace");
        self.namespaces.insert(interned.clone(), ns);
        interned
    }

    pub fn set_current(&mut self, name: &str) {
        if &*self.current == name {
            return;
        }
        self.current = self.find_or_create_namespace(name);
        // Unqualified and alias resolution depend on the current
        // namespace, so cached call-site resolutions must re-check.
        self.bump_version();
    }

    pub fn get(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Namespace> {
        self.namespaces.get_mut(name)
    }

    /// Returns the existing Var or creates a fresh one; preserves
    /// identity across re-def (the `VarRc` is looked up first, never
    /// replaced).
    pub fn intern(&mut self, ns_name: &str, sym: &str) -> VarRc {
        let ns_name = self.find_or_create_namespace(ns_name);
        let ns = self.namespaces.get_mut(&ns_name).expect("just created");
        self.version.set(self.version.get().wrapping_add(1));
        ns.mappings
            .entry(sym.to_string())
            .or_insert_with(|| new_var(&ns_name, sym))
            .clone()
    }

    /// Mappings then refers, within the given namespace.
    pub fn resolve(&self, ns_name: &str, sym: &str) -> Option<VarRc> {
        self.namespaces.get(ns_name)?.resolve_unqualified(sym)
    }

    pub fn resolve_in_current(&self, sym: &str) -> Option<VarRc> {
        self.resolve(&self.current, sym)
    }

    /// Alias first, then the namespace name directly, then that
    /// namespace's refers.
    pub fn resolve_qualified(&self, ns_name: &str, alias_or_name: &str, sym: &str) -> Option<VarRc> {
        let ns = self.namespaces.get(ns_name)?;
        let target_ns = ns
            .aliases
            .get(alias_or_name)
            .cloned()
            .unwrap_or_else(|| Rc::from(alias_or_name));
        self.resolve(&target_ns, sym)
    }

    pub fn add_alias(&mut self, ns_name: &str, alias: &str, target: &str) {
        if let Some(ns) = self.namespaces.get_mut(ns_name) {
            ns.aliases.insert(alias.to_string(), Rc::from(target));
            self.bump_version();
        }
    }

    pub fn add_refer(&mut self, ns_name: &str, sym: &str, var: VarRc) {
        if let Some(ns) = self.namespaces.get_mut(ns_name) {
            ns.refers.insert(sym.to_string(), var);
            self.bump_version();
        }
    }

    /// Atomic root replacement; unaffected by any currently pushed
    /// dynamic frame. Bumps the version so cached resolutions re-check.
    pub fn bind_root(&self, var: &VarRc, value: Value) {
        var.borrow_mut().root = Some(value);
        self.bump_version();
    }

    /// Every interned var across every namespace; their roots seed the
    /// GC mark phase.
    pub fn all_vars(&self) -> Vec<VarRc> {
        self.namespaces.values().flat_map(|ns| ns.mappings.values().cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent_and_preserves_identity() {
        let mut table = NamespaceTable::new("user");
        let v1 = table.intern("user", "x");
        let v2 = table.intern("user", "x");
        assert!(lumen_core::var_identical(&v1, &v2));
    }

    #[test]
    fn new_namespace_inherits_current_refers() {
        let mut table = NamespaceTable::new("user");
        let v = table.intern("core", "map");
        table.add_refer("user", "map", v.clone());
        let b = table.find_or_create_namespace("B");
        assert!(table.get(&b).unwrap().refers.contains_key("map"));
    }

    #[test]
    fn resolve_prefers_mappings_over_refers() {
        let mut table = NamespaceTable::new("user");
        let own = table.intern("user", "x");
        table.bind_root(&own, Value::Int(1));
        let other = table.intern("core", "x");
        table.bind_root(&other, Value::Int(2));
        table.add_refer("user", "x", other);
        let resolved = table.resolve_in_current("x").unwrap();
        assert!(lumen_core::var_identical(&resolved, &own));
    }
}
