//! Hash-key computation for the `hash` builtin (spec.md §5): only classes
//! flagged `VALID_HASH_KEY` (integer, double, string) may appear as a key,
//! enforced by the emitter/typechecker, not here — this module only
//! computes the digest once a value is already known-valid.
//!
//! spec.md §3 pins this to a 64-bit SipHash-2-4 over the key's bytes, kept
//! distinct from `ahash` (reserved for the interpreter's own internal
//! lookup maps — symtab type interning, function-value memoization, and
//! so on). A fixed all-zero key keeps the digest reproducible across runs,
//! matching the language's value-equality-based key semantics rather than
//! `ahash`'s process-randomized seed.

use std::hash::{Hash, Hasher};

use siphasher::sip::SipHasher24;

use crate::heap::{Heap, HeapData};
use crate::value::Value;

pub fn hash_value(value: &Value, heap: &Heap) -> u64 {
    let mut hasher = SipHasher24::new();
    match value {
        Value::Integer(i) => i.hash(&mut hasher),
        Value::Double(d) => d.to_bits().hash(&mut hasher),
        Value::Ref(id) => match heap.data(*id) {
            HeapData::Str(s) => s.hash(&mut hasher),
            _ => id.hash(&mut hasher),
        },
        Value::Nil => 0u8.hash(&mut hasher),
        Value::Function(_) | Value::Package(_) => 0u8.hash(&mut hasher),
    }
    hasher.finish()
}
