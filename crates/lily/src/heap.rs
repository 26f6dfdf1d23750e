//! The refcounted heap plus its mark-style cycle collector (spec.md §4.7).
//!
//! Every heap slot carries a strong-reference count. `retain`/`release` are
//! the only two operations that ever change it; `release` hitting zero
//! destroys the value immediately, outside of a collection. Values whose
//! type is `maybe-circular` (spec.md §3) additionally get a gc-entry
//! chained into [`Heap::gc_list`]; [`Heap::collect_cycles`] walks a mark
//! pass rooted at the caller-supplied live registers/globals and frees any
//! gc-tracked entry the mark pass didn't reach.

use ahash::AHashSet;

use crate::symtab::ClassId;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(pub u32);

#[derive(Debug)]
pub struct Instance {
    pub class: ClassId,
    pub properties: Vec<Value>,
}

#[derive(Debug)]
pub struct VariantInstance {
    pub enum_class: ClassId,
    pub variant: ClassId,
    pub fields: Vec<Value>,
}

/// A `hash` value's backing store: an insertion-ordered, append-only
/// element chain (spec.md §5: "new elements are appended"), with a
/// precomputed key hash per entry for a cheap negative comparison before
/// the spec-mandated value-equality tie-break.
#[derive(Debug, Default)]
pub struct HashObj {
    pub entries: Vec<(u64, Value, Value)>,
}

impl HashObj {
    pub fn find(&self, hash: u64, key_eq: impl Fn(&Value) -> bool) -> Option<usize> {
        self.entries.iter().position(|(h, k, _)| *h == hash && key_eq(k))
    }
}

#[derive(Debug)]
pub enum HeapData {
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Hash(HashObj),
    Any(Value),
    Instance(Instance),
    Variant(VariantInstance),
}

impl HeapData {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::List(_) => "List",
            Self::Tuple(_) => "Tuple",
            Self::Hash(_) => "Hash",
            Self::Any(_) => "Any",
            Self::Instance(_) => "Instance",
            Self::Variant(_) => "Variant",
        }
    }
}

struct Entry {
    data: HeapData,
    refcount: u32,
    /// A literal's baseline reference: retain/release never touch it, and
    /// it is never freed (spec.md §3 "protected value").
    pinned: bool,
    gc_tracked: bool,
}

pub struct Heap {
    slots: Vec<Option<Entry>>,
    free: Vec<u32>,
    gc_list: Vec<HeapId>,
    gc_threshold: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), gc_list: Vec::new(), gc_threshold: 64 }
    }

    fn insert(&mut self, entry: Entry) -> HeapId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(entry);
            HeapId(idx)
        } else {
            self.slots.push(Some(entry));
            HeapId((self.slots.len() - 1) as u32)
        }
    }

    /// Allocates a new heap value. `gc_tracked` should be `true` exactly
    /// when the value's static type is `maybe-circular`.
    pub fn alloc(&mut self, data: HeapData, gc_tracked: bool) -> HeapId {
        let id = self.insert(Entry { data, refcount: 1, pinned: false, gc_tracked });
        if gc_tracked {
            self.gc_list.push(id);
        }
        id
    }

    /// Allocates a literal value (interned strings): never refcount-
    /// adjusted, never collected.
    pub fn alloc_pinned(&mut self, data: HeapData) -> HeapId {
        self.insert(Entry { data, refcount: 1, pinned: true, gc_tracked: false })
    }

    fn entry(&self, id: HeapId) -> &Entry {
        self.slots[id.0 as usize].as_ref().expect("use of freed HeapId")
    }

    fn entry_mut(&mut self, id: HeapId) -> &mut Entry {
        self.slots[id.0 as usize].as_mut().expect("use of freed HeapId")
    }

    pub fn is_live(&self, id: HeapId) -> bool {
        self.slots.get(id.0 as usize).is_some_and(Option::is_some)
    }

    pub fn data(&self, id: HeapId) -> &HeapData {
        &self.entry(id).data
    }

    pub fn data_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.entry_mut(id).data
    }

    pub fn refcount(&self, id: HeapId) -> u32 {
        self.entry(id).refcount
    }

    pub fn class_id_of(&self, id: HeapId) -> ClassId {
        use crate::symtab::class::*;
        match &self.entry(id).data {
            HeapData::Str(_) => CLS_STRING,
            HeapData::List(_) => CLS_LIST,
            HeapData::Tuple(_) => CLS_TUPLE,
            HeapData::Hash(_) => CLS_HASH,
            HeapData::Any(_) => CLS_ANY,
            HeapData::Instance(i) => i.class,
            HeapData::Variant(v) => v.variant,
        }
    }

    pub fn truthy(&self, id: HeapId) -> bool {
        match &self.entry(id).data {
            HeapData::Str(s) => !s.is_empty(),
            HeapData::List(v) | HeapData::Tuple(v) => !v.is_empty(),
            HeapData::Hash(h) => !h.entries.is_empty(),
            HeapData::Any(_) | HeapData::Instance(_) | HeapData::Variant(_) => true,
        }
    }

    pub fn retain(&mut self, id: HeapId) {
        let e = self.entry_mut(id);
        if !e.pinned {
            e.refcount += 1;
        }
    }

    pub fn release(&mut self, id: HeapId) {
        let e = self.entry_mut(id);
        if e.pinned {
            return;
        }
        debug_assert!(e.refcount > 0, "refcount underflow on HeapId({})", id.0);
        e.refcount -= 1;
        if e.refcount == 0 {
            self.destroy(id);
        }
    }

    /// Destroys a heap value immediately: releases every value it
    /// contains, detaches its gc-entry if tracked, and frees the slot.
    fn destroy(&mut self, id: HeapId) {
        let Some(mut entry) = self.slots[id.0 as usize].take() else { return };
        if entry.gc_tracked {
            self.gc_list.retain(|gc_id| *gc_id != id);
        }
        release_contents(self, &mut entry.data);
        self.free.push(id.0);
    }

    pub fn gc_entry_count(&self) -> usize {
        self.gc_list.len()
    }

    pub fn should_collect(&self) -> bool {
        self.gc_list.len() > self.gc_threshold
    }

    /// Runs a mark pass rooted at `roots` (every live register slot of
    /// every live frame, plus globals, per spec.md §4.7) and destroys any
    /// gc-tracked entry the pass did not reach. Grows the soft threshold
    /// geometrically so collection frequency backs off as live cycles
    /// accumulate.
    pub fn collect_cycles(&mut self, roots: impl Iterator<Item = HeapId>) {
        let mut visited: AHashSet<HeapId> = AHashSet::new();
        let mut stack: Vec<HeapId> = roots.collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if !self.is_live(id) {
                continue;
            }
            mark_contents(self, id, &mut stack);
        }
        let unreached: Vec<HeapId> = self.gc_list.iter().copied().filter(|id| !visited.contains(id)).collect();
        for id in unreached {
            self.destroy(id);
        }
        self.gc_threshold = (self.gc_list.len() * 2).max(64);
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn mark_contents(heap: &Heap, id: HeapId, stack: &mut Vec<HeapId>) {
    match heap.data(id) {
        HeapData::Str(_) => {}
        HeapData::List(items) | HeapData::Tuple(items) => push_refs(items.iter(), stack),
        HeapData::Hash(h) => {
            for (_, k, v) in &h.entries {
                push_ref(k, stack);
                push_ref(v, stack);
            }
        }
        HeapData::Any(v) => push_ref(v, stack),
        HeapData::Instance(i) => push_refs(i.properties.iter(), stack),
        HeapData::Variant(v) => push_refs(v.fields.iter(), stack),
    }
}

fn push_refs<'a>(values: impl Iterator<Item = &'a Value>, stack: &mut Vec<HeapId>) {
    for v in values {
        push_ref(v, stack);
    }
}

fn push_ref(v: &Value, stack: &mut Vec<HeapId>) {
    if let Value::Ref(id) = v {
        stack.push(*id);
    }
}

/// Releases every value a container holds, used when destroying it either
/// immediately (refcount hit zero) or during a cycle sweep.
fn release_contents(heap: &mut Heap, data: &mut HeapData) {
    match data {
        HeapData::Str(_) => {}
        HeapData::List(items) | HeapData::Tuple(items) => {
            for v in items.drain(..) {
                v.drop_with_heap(heap);
            }
        }
        HeapData::Hash(h) => {
            for (_, k, v) in h.entries.drain(..) {
                k.drop_with_heap(heap);
                v.drop_with_heap(heap);
            }
        }
        HeapData::Any(v) => {
            let v = std::mem::replace(v, Value::Nil);
            v.drop_with_heap(heap);
        }
        HeapData::Instance(i) => {
            for v in i.properties.drain(..) {
                v.drop_with_heap(heap);
            }
        }
        HeapData::Variant(v) => {
            for f in v.fields.drain(..) {
                f.drop_with_heap(heap);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_releases_nested_contents() {
        let mut heap = Heap::new();
        let inner = heap.alloc(HeapData::Str("x".to_string()), false);
        let outer = heap.alloc(HeapData::List(vec![Value::Ref(inner)]), true);
        assert_eq!(heap.refcount(inner), 1);
        heap.release(outer);
        assert!(!heap.is_live(outer));
        assert!(!heap.is_live(inner));
    }

    #[test]
    fn cycle_collected_when_unreachable() {
        let mut heap = Heap::new();
        // Two instances that reference each other, forming a cycle with no
        // root (register/global) reference once the "stack" copies drop.
        let a = heap.alloc(HeapData::Instance(Instance { class: ClassId(20), properties: vec![Value::Nil] }), true);
        let b = heap.alloc(HeapData::Instance(Instance { class: ClassId(20), properties: vec![Value::Nil] }), true);
        heap.retain(b);
        if let HeapData::Instance(inst) = heap.data_mut(a) {
            inst.properties[0] = Value::Ref(b);
        }
        heap.retain(a);
        if let HeapData::Instance(inst) = heap.data_mut(b) {
            inst.properties[0] = Value::Ref(a);
        }
        // Drop the two "stack" references the caller held; only the cycle remains.
        heap.release(a);
        heap.release(b);
        assert!(heap.is_live(a));
        assert!(heap.is_live(b));
        heap.collect_cycles(std::iter::empty());
        assert!(!heap.is_live(a));
        assert!(!heap.is_live(b));
    }
}
