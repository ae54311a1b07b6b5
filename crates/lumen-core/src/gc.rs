//! Mark-sweep GC.
//!
//! Only the mutable/identity-bearing heap kinds (`Fn`, `MultiFn`,
//! `Protocol`, `LazySeq`, `Delay`, `Atom`) are tracked here; see
//! `value.rs`'s module doc for the split. The table is keyed by a
//! generation-checked index (`GcRef`) rather than a raw address: it is
//! non-intrusive (no header padding on the objects themselves) and a
//! stale handle is a checked panic instead of a wild pointer, all in
//! safe Rust.
//!
//! Allocation happens in three tiers: this module (Value-bearing heap
//! objects, swept), the infrastructure allocator (plain Rust heap for
//! `Env`, `Namespace`, `Var`, hash-table backings — nothing to wrap,
//! but counted for `GcStats` via `note_infra_alloc`), and the node
//! arena (`crate::arena`, bump-allocated, never swept mid-run).

use crate::heap::HeapObject;
use crate::value::Value;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    pub fn identity(&self) -> usize {
        (self.index as usize) | ((self.generation as usize) << 32)
    }
}

struct Slot {
    generation: u32,
    marked: bool,
    object: Option<HeapObject>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub collections: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
    pub live_objects: u64,
    pub infra_allocations: u64,
    pub node_allocations: u64,
}

/// Roots that must survive a collection: every namespace var
/// root, every dynamic frame entry, every VM operand-stack/call-frame
/// register, every live tree-walk local, the active try stacks, and the
/// in-flight call-arguments buffer. The GC itself doesn't know about
/// namespaces or VM frames (that would invert the dependency graph); the
/// caller supplies them at collection time through this trait.
pub trait RootSource {
    fn roots(&self) -> Vec<Value>;
}

pub struct Gc {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    bytes_since_sweep: u64,
    threshold_bytes: u64,
    suppressed: u32,
    stats: GcStats,
}

/// Rough per-kind size estimate used only for the allocation-threshold
/// heuristic (`shouldCollect`), not for real memory accounting.
fn approx_size(obj: &HeapObject) -> u64 {
    match obj {
        HeapObject::Fn(_) => 96,
        HeapObject::MultiFn(_) => 80,
        HeapObject::Protocol(_) => 64,
        HeapObject::LazySeq(_) => 48,
        HeapObject::Delay(_) => 48,
        HeapObject::Atom(_) => 40,
    }
}

impl Gc {
    pub fn new(threshold_bytes: u64) -> Self {
        Gc {
            slots: Vec::new(),
            free_list: Vec::new(),
            bytes_since_sweep: 0,
            threshold_bytes,
            suppressed: 0,
            stats: GcStats::default(),
        }
    }

    pub fn alloc(&mut self, object: HeapObject) -> GcRef {
        let size = approx_size(&object);
        self.bytes_since_sweep += size;
        self.stats.bytes_allocated += size;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.marked = false;
            self.stats.live_objects += 1;
            return GcRef {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            marked: false,
            object: Some(object),
        });
        self.stats.live_objects += 1;
        GcRef { index, generation: 0 }
    }

    pub fn get(&self, r: GcRef) -> &HeapObject {
        let slot = &self.slots[r.index as usize];
        assert_eq!(slot.generation, r.generation, "use of freed GcRef");
        slot.object.as_ref().expect("use of freed GcRef")
    }

    pub fn get_mut(&mut self, r: GcRef) -> &mut HeapObject {
        let slot = &mut self.slots[r.index as usize];
        assert_eq!(slot.generation, r.generation, "use of freed GcRef");
        slot.object.as_mut().expect("use of freed GcRef")
    }

    /// A collection is due once the bytes allocated since the last
    /// sweep exceed the threshold, unless suppressed.
    pub fn should_collect(&self) -> bool {
        self.suppressed == 0 && self.bytes_since_sweep >= self.threshold_bytes
    }

    /// Enters a suppression window: `collect()` is a no-op until the
    /// matching `unsuppress`. Macro expansion holds one open so the
    /// transient sequences a macro builds survive until their data is
    /// copied into the node arena. Nestable, so a macro expanding
    /// another macro doesn't prematurely unsuppress.
    pub fn suppress(&mut self) {
        self.suppressed += 1;
    }

    pub fn unsuppress(&mut self) {
        self.suppressed = self.suppressed.saturating_sub(1);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed > 0
    }

    pub fn note_infra_alloc(&mut self) {
        self.stats.infra_allocations += 1;
    }

    pub fn note_node_alloc(&mut self) {
        self.stats.node_allocations += 1;
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// One full mark-sweep cycle, called at a safe point with the live
    /// root set. A no-op while suppressed or under threshold.
    pub fn collect(&mut self, roots: &[Value]) {
        if self.is_suppressed() {
            trace!("collect() called while suppressed; no-op");
            return;
        }
        if !self.should_collect() {
            return;
        }
        debug!(slots = self.slots.len(), "gc: starting mark-sweep cycle");
        for slot in &mut self.slots {
            slot.marked = false;
        }
        let mut worklist: Vec<Value> = roots.to_vec();
        while let Some(v) = worklist.pop() {
            self.mark_value(&v, &mut worklist);
        }
        let mut freed_bytes = 0u64;
        let mut freed_count = 0u64;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_some() && !slot.marked {
                freed_bytes += approx_size(slot.object.as_ref().unwrap());
                slot.object = None;
                slot.generation = slot.generation.wrapping_add(1);
                freed_count += 1;
                self.free_list.push(index as u32);
            }
        }
        self.stats.collections += 1;
        self.stats.bytes_freed += freed_bytes;
        self.stats.live_objects = self.stats.live_objects.saturating_sub(freed_count);
        self.bytes_since_sweep = 0;
        debug!(freed = freed_count, "gc: sweep complete");
    }

    fn mark_value(&mut self, v: &Value, worklist: &mut Vec<Value>) {
        let r = match v {
            Value::Fn(r) | Value::MultiFn(r) | Value::Protocol(r) | Value::LazySeq(r) | Value::Delay(r) | Value::Atom(r) => *r,
            Value::List(items) | Value::Vector(items) => {
                worklist.extend(items.iter().cloned());
                return;
            }
            Value::Map(m) => {
                worklist.extend(m.iter().flat_map(|(k, v)| [k, v]));
                return;
            }
            Value::Set(s) => {
                worklist.extend(s.iter().map(|hk| hk.0.clone()));
                return;
            }
            Value::Cons(c) => {
                worklist.push(c.first.clone());
                worklist.push(c.rest.clone());
                return;
            }
            Value::Reduced(inner) => {
                worklist.push((**inner).clone());
                return;
            }
            _ => return,
        };
        let slot = &mut self.slots[r.index as usize];
        if slot.generation != r.generation || slot.marked {
            return;
        }
        slot.marked = true;
        let children = slot.object.as_ref().expect("marking freed slot").children();
        worklist.extend(children);
    }
}

/// RAII guard around `Gc::suppress`/`unsuppress`, used by macro expansion
/// so every exit path — including an early `?`-propagated error —
/// unsuppresses exactly once.
pub struct SuppressGuard<'a> {
    gc: &'a mut Gc,
}

impl<'a> SuppressGuard<'a> {
    pub fn new(gc: &'a mut Gc) -> Self {
        gc.suppress();
        SuppressGuard { gc }
    }
}

impl<'a> Drop for SuppressGuard<'a> {
    fn drop(&mut self) {
        self.gc.unsuppress();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::AtomObj;
    use std::cell::RefCell;

    fn atom(v: Value) -> HeapObject {
        HeapObject::Atom(AtomObj {
            value: RefCell::new(v),
            meta: RefCell::new(None),
            watchers: RefCell::new(Vec::new()),
        })
    }

    #[test]
    fn unreachable_object_is_swept() {
        let mut gc = Gc::new(1);
        let r1 = gc.alloc(atom(Value::Int(1)));
        let _r2 = gc.alloc(atom(Value::Int(2)));
        // Only r1 is rooted.
        gc.collect(&[Value::Atom(r1)]);
        assert_eq!(gc.stats().live_objects, 1);
        // r1 must still be usable.
        assert!(matches!(gc.get(r1), HeapObject::Atom(_)));
    }

    #[test]
    fn suppression_makes_collect_a_no_op() {
        let mut gc = Gc::new(1);
        let _r1 = gc.alloc(atom(Value::Int(1)));
        gc.suppress();
        gc.collect(&[]);
        assert_eq!(gc.stats().collections, 0);
        gc.unsuppress();
        gc.collect(&[]);
        assert_eq!(gc.stats().collections, 1);
    }

    #[test]
    fn nested_suppression_requires_matching_unsuppress() {
        let mut gc = Gc::new(1);
        gc.suppress();
        gc.suppress();
        gc.unsuppress();
        assert!(gc.is_suppressed());
        gc.unsuppress();
        assert!(!gc.is_suppressed());
    }

    #[test]
    fn reachable_through_another_atom_survives() {
        let mut gc = Gc::new(1);
        let inner = gc.alloc(atom(Value::Int(42)));
        let outer = gc.alloc(atom(Value::Atom(inner)));
        gc.collect(&[Value::Atom(outer)]);
        assert_eq!(gc.stats().live_objects, 2);
    }
}
