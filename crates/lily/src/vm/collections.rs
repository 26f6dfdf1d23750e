//! Aggregate and class opcodes: list/hash/tuple construction, subscripts,
//! properties, instances, and variant decomposition (spec.md §4.5 "Aggregate"
//! and "Class" opcode families).

use smallvec::SmallVec;

use super::exceptions::{Raised, VmResult};
use super::VM;
use crate::bytecode::Reg;
use crate::heap::{HashObj, HeapData, Instance, VariantInstance};
use crate::hashing::hash_value;
use crate::symtab::{ClassId, Symtab};
use crate::value::Value;

impl VM {
    /// Completes the retain half of a prior [`shallow_copy`]: bumps the
    /// heap refcount if `v` is a `Ref`, otherwise a no-op.
    fn retain(&mut self, v: Value) -> Value {
        if let Value::Ref(id) = &v {
            self.heap.retain(*id);
        }
        v
    }

    pub(crate) fn exec_build_list(&mut self, items: &[Reg]) -> Value {
        let values: Vec<Value> = items.iter().map(|r| self.reg(*r)).collect();
        let gc = values.iter().any(|v| matches!(v, Value::Ref(_)));
        Value::Ref(self.heap.alloc(HeapData::List(values), gc))
    }

    pub(crate) fn exec_build_tuple(&mut self, items: &[Reg]) -> Value {
        let values: Vec<Value> = items.iter().map(|r| self.reg(*r)).collect();
        let gc = values.iter().any(|v| matches!(v, Value::Ref(_)));
        Value::Ref(self.heap.alloc(HeapData::Tuple(values), gc))
    }

    pub(crate) fn exec_build_hash(&mut self, pairs: &[(Reg, Reg)]) -> Value {
        let mut entries = Vec::with_capacity(pairs.len());
        let mut gc = false;
        for (k, v) in pairs {
            let key = self.reg(*k);
            let val = self.reg(*v);
            gc |= matches!(key, Value::Ref(_)) || matches!(val, Value::Ref(_));
            let h = hash_value(&key, &self.heap);
            entries.push((h, key, val));
        }
        Value::Ref(self.heap.alloc(HeapData::Hash(HashObj { entries }), gc))
    }

    pub(crate) fn exec_subscript_get(&mut self, symtab: &Symtab, base: Value, index: Value, line: u32) -> VmResult<Value> {
        let Value::Ref(id) = &base else {
            let r = self.raise_builtin(symtab, crate::symtab::class::CLS_VALUEERROR, "cannot subscript this value", line);
            base.drop_with_heap(&mut self.heap);
            index.drop_with_heap(&mut self.heap);
            return Err(r);
        };
        let id = *id;
        let result = match self.heap.data(id) {
            HeapData::List(items) | HeapData::Tuple(items) => {
                let Value::Integer(i) = index else {
                    return Err(self.bad_index(symtab, base, index, line));
                };
                let idx = normalize_index(i, items.len());
                match idx.and_then(|i| items.get(i)) {
                    Some(v) => Ok(shallow_copy(v)),
                    None => Err(self.raise_builtin(symtab, crate::symtab::class::CLS_INDEXERROR, format!("index {i} out of range"), line)),
                }
            }
            HeapData::Hash(h) => {
                let hash = hash_value(&index, &self.heap);
                match h.find(hash, |k| values_equal(k, &index, &self.heap)) {
                    Some(pos) => Ok(shallow_copy(&h.entries[pos].2)),
                    None => Err(self.raise_builtin(symtab, crate::symtab::class::CLS_KEYERROR, "key not found", line)),
                }
            }
            _ => Err(self.raise_builtin(symtab, crate::symtab::class::CLS_VALUEERROR, "cannot subscript this value", line)),
        };
        let result = result.map(|v| self.retain(v));
        base.drop_with_heap(&mut self.heap);
        index.drop_with_heap(&mut self.heap);
        result
    }

    fn bad_index(&mut self, symtab: &Symtab, base: Value, index: Value, line: u32) -> Raised {
        let r = self.raise_builtin(symtab, crate::symtab::class::CLS_INDEXERROR, "list/tuple index must be an integer", line);
        base.drop_with_heap(&mut self.heap);
        index.drop_with_heap(&mut self.heap);
        r
    }

    pub(crate) fn exec_subscript_set(&mut self, symtab: &Symtab, base: Value, index: Value, value: Value, line: u32) -> VmResult<()> {
        let Value::Ref(id) = base else {
            let r = self.raise_builtin(symtab, crate::symtab::class::CLS_VALUEERROR, "cannot subscript this value", line);
            index.drop_with_heap(&mut self.heap);
            value.drop_with_heap(&mut self.heap);
            return Err(r);
        };
        // Hashing/lookup only needs an immutable heap borrow, so it must
        // happen before `data_mut` below grabs a mutable one.
        let hash_pos = match self.heap.data(id) {
            HeapData::Hash(_) => {
                let hash = hash_value(&index, &self.heap);
                let pos = match self.heap.data(id) {
                    HeapData::Hash(h) => h.find(hash, |k| values_equal(k, &index, &self.heap)),
                    _ => unreachable!(),
                };
                Some((hash, pos))
            }
            _ => None,
        };
        match self.heap.data_mut(id) {
            HeapData::List(items) => {
                let Value::Integer(i) = index else {
                    return Err(self.raise_builtin(symtab, crate::symtab::class::CLS_INDEXERROR, "list index must be an integer", line));
                };
                let len = items.len();
                match normalize_index(i, len) {
                    Some(pos) => {
                        let old = std::mem::replace(&mut items[pos], value);
                        old.drop_with_heap(&mut self.heap);
                        Ok(())
                    }
                    None => {
                        value.drop_with_heap(&mut self.heap);
                        Err(self.raise_builtin(symtab, crate::symtab::class::CLS_INDEXERROR, format!("index {i} out of range"), line))
                    }
                }
            }
            HeapData::Hash(h) => {
                let (hash, pos) = hash_pos.expect("hash_pos computed for Hash heap data");
                if let Some(pos) = pos {
                    let old = std::mem::replace(&mut h.entries[pos].2, value);
                    old.drop_with_heap(&mut self.heap);
                    index.drop_with_heap(&mut self.heap);
                } else {
                    h.entries.push((hash, index, value));
                }
                Ok(())
            }
            _ => {
                index.drop_with_heap(&mut self.heap);
                value.drop_with_heap(&mut self.heap);
                Err(self.raise_builtin(symtab, crate::symtab::class::CLS_VALUEERROR, "cannot subscript this value", line))
            }
        }
    }

    pub(crate) fn exec_get_property(&mut self, base: &Value, slot: u16) -> Value {
        let copy = match base {
            Value::Ref(id) => match self.heap.data(*id) {
                HeapData::Instance(i) => shallow_copy(&i.properties[slot as usize]),
                HeapData::Variant(v) => shallow_copy(&v.fields[slot as usize]),
                _ => Value::Nil,
            },
            _ => Value::Nil,
        };
        self.retain(copy)
    }

    pub(crate) fn exec_set_property(&mut self, base: &Value, slot: u16, value: Value) {
        if let Value::Ref(id) = base {
            if let HeapData::Instance(i) = self.heap.data_mut(*id) {
                let old = std::mem::replace(&mut i.properties[slot as usize], value);
                old.drop_with_heap(&mut self.heap);
                return;
            }
        }
        value.drop_with_heap(&mut self.heap);
    }

    pub(crate) fn exec_new_instance(&mut self, class: ClassId, args: SmallVec<[Reg; 4]>, gc_tracked: bool) -> Value {
        let properties: Vec<Value> = args.iter().map(|r| self.reg(*r)).collect();
        Value::Ref(self.heap.alloc(HeapData::Instance(Instance { class, properties }), gc_tracked))
    }

    pub(crate) fn exec_build_variant(&mut self, symtab: &Symtab, variant: ClassId, args: SmallVec<[Reg; 4]>, gc_tracked: bool) -> Value {
        let enum_class = symtab.class_by_id(variant).parent.expect("variant class always has an enum parent");
        let fields: Vec<Value> = args.iter().map(|r| self.reg(*r)).collect();
        Value::Ref(self.heap.alloc(HeapData::Variant(VariantInstance { enum_class, variant, fields }), gc_tracked))
    }

    pub(crate) fn exec_variant_decompose(&mut self, subject: &Value, field: u16) -> Value {
        let copy = match subject {
            Value::Ref(id) => match self.heap.data(*id) {
                HeapData::Variant(v) => shallow_copy(&v.fields[field as usize]),
                _ => Value::Nil,
            },
            _ => Value::Nil,
        };
        self.retain(copy)
    }

    /// `UnwrapAny`: checked downcast out of an `any`-boxed value. `value` is
    /// always the `any` box itself (moved out of its register), never the
    /// inner value directly.
    pub(crate) fn exec_unwrap_any(&mut self, symtab: &Symtab, value: Value, target: ClassId, line: u32) -> VmResult<Value> {
        let Value::Ref(id) = &value else {
            let r = self.raise_builtin(symtab, crate::symtab::class::CLS_BADTCERROR, "value is not an any", line);
            value.drop_with_heap(&mut self.heap);
            return Err(r);
        };
        let id = *id;
        if !matches!(self.heap.data(id), HeapData::Any(_)) {
            let r = self.raise_builtin(symtab, crate::symtab::class::CLS_BADTCERROR, "value is not an any", line);
            value.drop_with_heap(&mut self.heap);
            return Err(r);
        }
        let inner = if let HeapData::Any(v) = self.heap.data_mut(id) {
            std::mem::replace(v, Value::Nil)
        } else {
            unreachable!()
        };
        value.drop_with_heap(&mut self.heap);
        let inner_class = inner.class_id(&self.heap);
        if self.class_is_a(symtab, inner_class, target) {
            Ok(inner)
        } else {
            let name = symtab.class_by_id(inner_class).name.clone();
            let r = self.raise_builtin(symtab, crate::symtab::class::CLS_BADTCERROR, format!("cannot cast any holding {name} to the requested type"), line);
            inner.drop_with_heap(&mut self.heap);
            Err(r)
        }
    }
}

/// Copies a `Value`'s bits without bumping any heap refcount; callers must
/// follow up with `VM::retain` once the source borrow has ended, so the two
/// halves of `Value::retain_clone` can run without overlapping the heap
/// borrow that produced `v`.
fn shallow_copy(v: &Value) -> Value {
    match v {
        Value::Nil => Value::Nil,
        Value::Integer(n) => Value::Integer(*n),
        Value::Double(n) => Value::Double(*n),
        Value::Function(f) => Value::Function(*f),
        Value::Package(p) => Value::Package(*p),
        Value::Ref(id) => Value::Ref(*id),
    }
}

/// Normalizes a (possibly negative) language index against `len`, the way
/// list/tuple subscripts accept negative-from-end indices.
fn normalize_index(i: i64, len: usize) -> Option<usize> {
    if i >= 0 {
        let i = i as usize;
        if i < len { Some(i) } else { None }
    } else {
        let from_end = (-i) as usize;
        if from_end <= len { Some(len - from_end) } else { None }
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value, heap: &crate::heap::Heap) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Double(x), Value::Double(y)) => x == y,
        (Value::Integer(x), Value::Double(y)) | (Value::Double(y), Value::Integer(x)) => *x as f64 == *y,
        (Value::Nil, Value::Nil) => true,
        (Value::Ref(x), Value::Ref(y)) => match (heap.data(*x), heap.data(*y)) {
            (HeapData::Str(a), HeapData::Str(b)) => a == b,
            _ => x == y,
        },
        _ => false,
    }
}
