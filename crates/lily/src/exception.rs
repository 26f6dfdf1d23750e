//! Bootstraps the exception class hierarchy (spec.md §6): class id 10 is
//! the base `Exception`, and ids 11-19 are its built-in subclasses, in the
//! fixed order `symtab::class`'s `CLS_*` constants assume.

use crate::symtab::class::{
    CLS_BADTCERROR, CLS_DBZEROERROR, CLS_EXCEPTION, CLS_FORMATERROR, CLS_INDEXERROR, CLS_KEYERROR, CLS_NOMEMORYERROR, CLS_NORETURNERROR,
    CLS_RECURSIONERROR, CLS_STRING, CLS_VALUEERROR,
};
use crate::symtab::{ClassId, Property, Symtab};

/// Names in the exact id order 10..=19, matched against the `CLS_*` constants
/// by the assertions at the end of this function.
const SUBCLASS_NAMES: &[&str] = &[
    "NoMemoryError",
    "DivisionByZeroError",
    "IndexError",
    "BadTypecastError",
    "NoReturnError",
    "ValueError",
    "RecursionError",
    "KeyError",
    "FormatError",
];

/// Installs `Exception` and its nine subclasses, each carrying a single
/// `string message` property inherited by every subclass.
pub fn bootstrap(symtab: &mut Symtab) {
    let message_ty = symtab.build_ensure_type(CLS_STRING, false, Vec::new(), -1);
    let base = symtab.new_class("Exception", None, 0);
    assert_eq!(base, CLS_EXCEPTION, "Exception must be the first class installed after the builtins");
    symtab.class_by_id_mut(base).properties.push(Property { name: "message".to_string(), ty: message_ty, slot: 0 });

    let expected = [
        CLS_NOMEMORYERROR,
        CLS_DBZEROERROR,
        CLS_INDEXERROR,
        CLS_BADTCERROR,
        CLS_NORETURNERROR,
        CLS_VALUEERROR,
        CLS_RECURSIONERROR,
        CLS_KEYERROR,
        CLS_FORMATERROR,
    ];
    for (name, expected_id) in SUBCLASS_NAMES.iter().zip(expected) {
        let id = symtab.new_class(*name, Some(base), 0);
        assert_eq!(id, expected_id, "exception subclass '{name}' installed out of order");
        symtab.class_by_id_mut(id).properties.push(Property { name: "message".to_string(), ty: message_ty, slot: 0 });
    }
}

/// Every exception class id, base first, in declaration order.
pub fn all_ids() -> [ClassId; 10] {
    [
        CLS_EXCEPTION,
        CLS_NOMEMORYERROR,
        CLS_DBZEROERROR,
        CLS_INDEXERROR,
        CLS_BADTCERROR,
        CLS_NORETURNERROR,
        CLS_VALUEERROR,
        CLS_RECURSIONERROR,
        CLS_KEYERROR,
        CLS_FORMATERROR,
    ]
}
