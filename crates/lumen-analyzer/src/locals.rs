//! Local-binding stack — a local binding shadows a special-form name or
//! macro of the same textual name for the remainder of its scope — plus
//! closure capture recording for `fn`/`fn*` bodies.

use std::collections::HashSet;
use std::rc::Rc;

struct Scope {
    names: Vec<Rc<str>>,
}

/// One `fn`/`fn*` arity's capture set, built up as local references
/// resolve to names bound outside the current fn boundary.
struct CaptureFrame {
    boundary: usize,
    captured: HashSet<Rc<str>>,
    order: Vec<Rc<str>>,
}

pub struct Locals {
    scopes: Vec<Scope>,
    capture_frames: Vec<CaptureFrame>,
    recur_arities: Vec<usize>,
}

impl Default for Locals {
    fn default() -> Self {
        Locals::new()
    }
}

impl Locals {
    pub fn new() -> Self {
        Locals {
            scopes: Vec::new(),
            capture_frames: Vec::new(),
            recur_arities: Vec::new(),
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope { names: Vec::new() });
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn bind(&mut self, name: &str) {
        self.scopes
            .last_mut()
            .expect("bind called with no active scope")
            .names
            .push(Rc::from(name));
    }

    /// True if `name` resolves to a local in any currently-open scope,
    /// implementing the shadow-special-forms rule.
    pub fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.names.iter().any(|n| &**n == name))
    }

    /// Resolves `name` to a local, recording it as a capture in every
    /// open `CaptureFrame` whose fn boundary sits above the scope that
    /// bound it.
    pub fn resolve(&mut self, name: &str) -> bool {
        let mut defining_scope = None;
        for (idx, scope) in self.scopes.iter().enumerate().rev() {
            if scope.names.iter().any(|n| &**n == name) {
                defining_scope = Some(idx);
                break;
            }
        }
        let Some(defining_scope) = defining_scope else {
            return false;
        };
        for frame in self.capture_frames.iter_mut().rev() {
            if defining_scope < frame.boundary {
                if frame.captured.insert(Rc::from(name)) {
                    frame.order.push(Rc::from(name));
                }
            } else {
                break;
            }
        }
        true
    }

    /// Opens a new fn boundary: anything the body resolves to from an
    /// outer scope becomes a recorded capture.
    pub fn push_fn_boundary(&mut self) {
        self.capture_frames.push(CaptureFrame {
            boundary: self.scopes.len(),
            captured: HashSet::new(),
            order: Vec::new(),
        });
    }

    pub fn pop_fn_boundary(&mut self) -> Vec<Rc<str>> {
        self.capture_frames
            .pop()
            .map(|f| f.order)
            .unwrap_or_default()
    }

    pub fn push_recur_point(&mut self, arity: usize) {
        self.recur_arities.push(arity);
    }

    pub fn pop_recur_point(&mut self) {
        self.recur_arities.pop();
    }

    pub fn current_recur_arity(&self) -> Option<usize> {
        self.recur_arities.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_name_shadows_special_form() {
        let mut locals = Locals::new();
        assert!(!locals.is_bound("if"));
        locals.push_scope();
        locals.bind("if");
        assert!(locals.is_bound("if"));
        locals.pop_scope();
        assert!(!locals.is_bound("if"));
    }

    #[test]
    fn resolve_across_fn_boundary_records_capture() {
        let mut locals = Locals::new();
        locals.push_scope();
        locals.bind("x");
        locals.push_fn_boundary();
        locals.push_scope();
        assert!(locals.resolve("x"));
        locals.pop_scope();
        let captures = locals.pop_fn_boundary();
        assert_eq!(captures.len(), 1);
        assert_eq!(&*captures[0], "x");
    }

    #[test]
    fn resolve_within_same_fn_boundary_is_not_a_capture() {
        let mut locals = Locals::new();
        locals.push_fn_boundary();
        locals.push_scope();
        locals.bind("y");
        assert!(locals.resolve("y"));
        locals.pop_scope();
        let captures = locals.pop_fn_boundary();
        assert!(captures.is_empty());
    }

    #[test]
    fn recur_arity_tracks_nesting() {
        let mut locals = Locals::new();
        locals.push_recur_point(2);
        locals.push_recur_point(1);
        assert_eq!(locals.current_recur_arity(), Some(1));
        locals.pop_recur_point();
        assert_eq!(locals.current_recur_arity(), Some(2));
    }
}
