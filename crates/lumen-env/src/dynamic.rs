//! Dynamic binding frames: a stack of `Var -> Value` overrides for
//! `binding`. LIFO by construction; callers are responsible for popping
//! on every exit path of the wrapping form, including exception unwind
//! and `recur`.

use lumen_core::var::VarRc;
use lumen_core::Value;
use std::collections::HashMap;
use std::rc::Rc;

fn var_key(var: &VarRc) -> usize {
    Rc::as_ptr(var) as usize
}

#[derive(Default)]
pub struct DynamicFrames {
    frames: Vec<HashMap<usize, (VarRc, Value)>>,
}

impl DynamicFrames {
    pub fn new() -> Self {
        DynamicFrames { frames: Vec::new() }
    }

    pub fn push(&mut self, bindings: Vec<(VarRc, Value)>) {
        let frame = bindings
            .into_iter()
            .map(|(var, value)| (var_key(&var), (var, value)))
            .collect();
        self.frames.push(frame);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Walks frames top-down for dynamic vars, falling back to the
    /// root. Non-dynamic vars ignore frames entirely.
    pub fn deref(&self, var: &VarRc) -> Option<Value> {
        if !var.borrow().meta.is_dynamic {
            return var.borrow().root.clone();
        }
        let key = var_key(var);
        for frame in self.frames.iter().rev() {
            if let Some((_, value)) = frame.get(&key) {
                return Some(value.clone());
            }
        }
        var.borrow().root.clone()
    }

    /// `set!`: mutates the binding at the top of the frame stack.
    /// Returns `false` if `var` has no active dynamic binding; the
    /// caller turns that into an error.
    pub fn set_top(&mut self, var: &VarRc, value: Value) -> bool {
        let key = var_key(var);
        for frame in self.frames.iter_mut().rev() {
            if let Some(entry) = frame.get_mut(&key) {
                entry.1 = value;
                return true;
            }
        }
        false
    }

    /// All `Value`s in every frame; each is a GC root while bound.
    pub fn roots(&self) -> Vec<Value> {
        self.frames
            .iter()
            .flat_map(|frame| frame.values().map(|(_, v)| v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::new_var;

    fn dynamic_var(name: &str) -> VarRc {
        let v = new_var("user", name);
        v.borrow_mut().meta.is_dynamic = true;
        v.borrow_mut().root = Some(Value::Int(0));
        v
    }

    #[test]
    fn binding_is_lifo_and_restores_on_pop() {
        let mut frames = DynamicFrames::new();
        let v = dynamic_var("x");
        assert_eq!(frames.deref(&v), Some(Value::Int(0)));
        frames.push(vec![(v.clone(), Value::Int(1))]);
        assert_eq!(frames.deref(&v), Some(Value::Int(1)));
        frames.push(vec![(v.clone(), Value::Int(2))]);
        assert_eq!(frames.deref(&v), Some(Value::Int(2)));
        frames.pop();
        assert_eq!(frames.deref(&v), Some(Value::Int(1)));
        frames.pop();
        assert_eq!(frames.deref(&v), Some(Value::Int(0)));
    }

    #[test]
    fn set_top_only_affects_innermost_frame() {
        let mut frames = DynamicFrames::new();
        let v = dynamic_var("x");
        frames.push(vec![(v.clone(), Value::Int(1))]);
        frames.push(vec![(v.clone(), Value::Int(2))]);
        assert!(frames.set_top(&v, Value::Int(99)));
        assert_eq!(frames.deref(&v), Some(Value::Int(99)));
        frames.pop();
        assert_eq!(frames.deref(&v), Some(Value::Int(1)));
    }

    #[test]
    fn non_dynamic_var_ignores_frames() {
        let mut frames = DynamicFrames::new();
        let v = new_var("user", "y");
        v.borrow_mut().root = Some(Value::Int(7));
        frames.push(vec![(v.clone(), Value::Int(1))]);
        assert_eq!(frames.deref(&v), Some(Value::Int(7)));
    }
}
