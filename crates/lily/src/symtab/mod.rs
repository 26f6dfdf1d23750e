//! The symbol/type table: canonical interning of types, the class
//! hierarchy, and variable scoping (spec.md §4.3).

pub mod class;
pub mod ty;
pub mod var;

use ahash::AHashMap;

pub use class::{Callable, Class, ClassFlags, ClassId, Property};
pub use ty::{Type, TypeFlags, TypeId};
pub use var::{Storage, Var, VarFlags, VarId};

use crate::intern::{DoubleLitId, IntegerLitId, Interner, StringLitId};

/// Names and arities of the nine builtin classes created before the
/// exception bootstrap runs, in stable-id order (spec.md §6).
const BUILTIN_CLASSES: &[(&str, i32)] =
    &[("integer", 0), ("double", 0), ("string", 0), ("function", -1), ("any", 0), ("list", 1), ("hash", 2), ("tuple", -1), ("", 0)];

pub struct Symtab {
    pub classes: Vec<Class>,
    pub types: Vec<Type>,
    type_flags: Vec<TypeFlags>,
    type_cache: AHashMap<(ClassId, bool, i32, Vec<TypeId>), TypeId>,
    pub vars: Vec<Var>,
    pub storages: Vec<Storage>,
    pub string_lits: Interner<String, StringLitId>,
    pub integer_lits: Interner<i64, IntegerLitId>,
    /// Doubles are interned by bit pattern (`f64` is not `Eq`).
    double_bits: Interner<u64, DoubleLitId>,
    /// Count of generic slots (`A..`) currently visible to the emitter.
    generic_visible: u8,
    /// The class context generics are being resolved against, if any.
    generic_class: Option<ClassId>,
}

impl Symtab {
    #[must_use]
    pub fn new() -> Self {
        let mut symtab = Self {
            classes: Vec::new(),
            types: Vec::new(),
            type_flags: Vec::new(),
            type_cache: AHashMap::new(),
            vars: Vec::new(),
            storages: Vec::new(),
            string_lits: Interner::new(),
            integer_lits: Interner::new(),
            double_bits: Interner::new(),
            generic_visible: 0,
            generic_class: None,
        };
        for (idx, (name, arity)) in BUILTIN_CLASSES.iter().enumerate() {
            let id = ClassId(idx as u32);
            let mut flags = ClassFlags::default();
            match id {
                class::CLS_INTEGER | class::CLS_DOUBLE | class::CLS_STRING => {
                    flags = flags.with(ClassFlags::VALID_HASH_KEY).with(ClassFlags::IS_BUILTIN);
                }
                class::CLS_ANY => flags = flags.with(ClassFlags::GC_TAGGED).with(ClassFlags::IS_BUILTIN),
                class::CLS_LIST | class::CLS_HASH | class::CLS_TUPLE => {
                    flags = flags.with(ClassFlags::GC_SPECULATIVE).with(ClassFlags::IS_BUILTIN);
                }
                _ => flags = flags.with(ClassFlags::IS_BUILTIN),
            }
            symtab.classes.push(Class::new(id, *name, None, *arity, flags));
        }
        // class id 9, package: holds global vars, never directly instantiated by user code.
        symtab.classes.push(Class::new(class::CLS_PACKAGE, "package", None, 0, ClassFlags::default().with(ClassFlags::IS_BUILTIN)));
        let ids: Vec<ClassId> = symtab.classes.iter().map(|c| c.id).collect();
        for id in ids {
            symtab.set_default_type(id);
        }
        symtab
    }

    /// Builds and records a class's canonical "default" type: the open
    /// generic form (`class[A, B, ...]`) for a generic class, the bare type
    /// otherwise.
    fn set_default_type(&mut self, id: ClassId) {
        let arity = self.classes[id.index()].template_arity.max(0) as u8;
        let subs: Vec<TypeId> = (0..arity).map(|i| self.generic_type(i)).collect();
        let default = self.build_ensure_type(id, false, subs, -1);
        self.classes[id.index()].default_type = Some(default);
    }

    pub fn class_by_id(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    pub fn class_by_id_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.index()]
    }

    /// Shorthash-gated lookup by name.
    pub fn class_by_name(&self, name: &str) -> Option<ClassId> {
        let hash = crate::intern::shorthash(name);
        self.classes.iter().find(|c| c.shorthash == hash && c.name == name).map(|c| c.id)
    }

    pub fn new_class(&mut self, name: impl Into<String>, parent: Option<ClassId>, template_arity: i32) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        let class = Class::new(id, name, parent, template_arity, ClassFlags::default());
        self.classes.push(class);
        self.set_default_type(id);
        id
    }

    /// Registers a variant sub-class of `enum_id`. `field_types` are the
    /// variant's own stated field types (already resolved against the
    /// enum's generic slots by the caller's `parse_type`); the variant's
    /// `template_arity` is the count of *distinct* generic slots those
    /// field types reference, not the enclosing enum's arity — spec.md
    /// §4.4's "`inner_type_collector` restarts its generic map per variant"
    /// (e.g. `enum class E[A, B]` with variant `V(A)` gets arity 1).
    pub fn new_variant_class(&mut self, enum_id: ClassId, name: impl Into<String>, field_types: &[TypeId]) -> ClassId {
        let mut slots = Vec::new();
        for &ty in field_types {
            self.collect_template_slots(ty, &mut slots);
        }
        slots.sort_unstable();
        slots.dedup();
        let arity = slots.len() as i32;
        let id = self.new_class(name, Some(enum_id), arity);
        let class = self.class_by_id_mut(id);
        class.flags = class.flags.with(ClassFlags::VARIANT);
        self.classes[enum_id.index()].variants.push(id);
        id
    }

    /// Recursively collects the distinct generic-slot positions (`CLS_TEMPLATE`
    /// types) reachable from `ty`, walking into container/function subtypes
    /// (e.g. `list[A]`).
    fn collect_template_slots(&self, ty: TypeId, out: &mut Vec<u8>) {
        let t = &self.types[ty.index()];
        if t.class == class::CLS_TEMPLATE {
            out.push(t.template_pos as u8);
        }
        for sub in &t.subtypes {
            self.collect_template_slots(*sub, out);
        }
    }

    /// Canonical type interning: structurally identical `(class, varargs,
    /// template_pos, subtypes)` tuples always return the same `TypeId`.
    pub fn build_ensure_type(&mut self, class: ClassId, varargs: bool, subtypes: Vec<TypeId>, template_pos: i32) -> TypeId {
        let key = (class, varargs, template_pos, subtypes.clone());
        if let Some(id) = self.type_cache.get(&key) {
            return *id;
        }
        let maybe_circular = self.compute_maybe_circular(class, &subtypes);
        let unresolved = class == class::CLS_TEMPLATE || subtypes.iter().any(|s| self.type_flags[s.index()].has(TypeFlags::UNRESOLVED));
        let mut flags = TypeFlags::default();
        if varargs {
            flags = flags.with(TypeFlags::VARARGS);
        }
        if maybe_circular {
            flags = flags.with(TypeFlags::MAYBE_CIRCULAR);
        }
        if unresolved {
            flags = flags.with(TypeFlags::UNRESOLVED);
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(Type { class, subtypes, template_pos, varargs });
        self.type_flags_storage_push(flags);
        self.type_cache.insert(key, id);
        id
    }

    fn compute_maybe_circular(&self, class: ClassId, subtypes: &[TypeId]) -> bool {
        if class == class::CLS_ANY || class == class::CLS_TEMPLATE {
            return true;
        }
        let c = &self.classes[class.index()];
        if c.flags.has(ClassFlags::GC_TAGGED) {
            return true;
        }
        if c.flags.has(ClassFlags::GC_SPECULATIVE) {
            return subtypes.iter().any(|s| self.type_flags(*s).has(TypeFlags::MAYBE_CIRCULAR));
        }
        // User-defined classes (ids >= 20, beyond the bootstrap exception
        // hierarchy) may hold `self`-referencing properties, so treat any
        // instance type conservatively as cycle-capable.
        class.index() >= 20
    }

    pub fn type_flags(&self, id: TypeId) -> TypeFlags {
        self.type_flags_storage_get(id)
    }

    // `Type` itself carries no flags field (flags are derived, not stored on
    // the struct, to keep hash-consing keyed on structure alone); keep a
    // parallel flags vector indexed the same way.
    fn type_flags_storage_push(&mut self, flags: TypeFlags) {
        self.type_flags.push(flags);
    }
    fn type_flags_storage_get(&self, id: TypeId) -> TypeFlags {
        self.type_flags[id.index()]
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    /// Appends to the var chain with an already-computed register spot.
    /// Duplicate-name checking is the parser's responsibility.
    pub fn try_new_var(&mut self, ty: TypeId, name: impl Into<String>, flags: VarFlags, depth: u16, reg_spot: u16) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(Var::new(name, ty, reg_spot, depth, flags));
        id
    }

    pub fn var(&self, id: VarId) -> &Var {
        &self.vars[id.0 as usize]
    }

    /// Finds a var by name visible at or above `min_depth` (innermost-first).
    pub fn find_var(&self, name: &str, from_len: usize) -> Option<VarId> {
        let hash = crate::intern::shorthash(name);
        self.vars[..from_len].iter().enumerate().rev().find(|(_, v)| v.shorthash == hash && v.name == name).map(|(i, _)| VarId(i as u32))
    }

    pub fn get_string_literal(&mut self, value: impl Into<String>) -> StringLitId {
        self.string_lits.intern(value.into())
    }

    pub fn get_integer_literal(&mut self, value: i64) -> IntegerLitId {
        self.integer_lits.intern(value)
    }

    pub fn get_double_literal(&mut self, value: f64) -> DoubleLitId {
        self.double_bits.intern(value.to_bits()).into()
    }

    pub fn double_value(&self, id: DoubleLitId) -> f64 {
        f64::from_bits(*self.double_bits.get(id))
    }

    /// Walks `class` and its ancestors looking for a named property.
    pub fn find_property(&self, class: ClassId, name: &str) -> Option<&Property> {
        let mut cur = Some(class);
        while let Some(c) = cur {
            let class_data = &self.classes[c.index()];
            if let Some(p) = class_data.properties.iter().find(|p| p.name == name) {
                return Some(p);
            }
            cur = class_data.parent;
        }
        None
    }

    /// Walks the per-class callable list, then ancestors.
    pub fn find_class_callable(&self, class: ClassId, name: &str) -> Option<&Callable> {
        let mut cur = Some(class);
        while let Some(c) = cur {
            let class_data = &self.classes[c.index()];
            if let Some(callable) = class_data.callables.iter().find(|m| m.name() == name) {
                return Some(callable);
            }
            cur = class_data.parent;
        }
        None
    }

    /// Called at each function entry: hides generic slots beyond position
    /// `n` and records the visible count against `cls`.
    pub fn update_symtab_generics(&mut self, cls: Option<ClassId>, n: u8) {
        self.generic_visible = n;
        self.generic_class = cls;
    }

    pub fn generics_visible(&self) -> u8 {
        self.generic_visible
    }

    /// Builds `class[A, B, ...]` using the generics currently in scope: the
    /// canonical `self` type for method bodies.
    pub fn self_type_for_class(&mut self, class: ClassId) -> TypeId {
        let arity = self.classes[class.index()].template_arity.max(0) as u8;
        let subs: Vec<TypeId> = (0..arity).map(|i| self.generic_type(i)).collect();
        self.build_ensure_type(class, false, subs, -1)
    }

    pub fn generic_type(&mut self, slot: u8) -> TypeId {
        self.build_ensure_type(class::CLS_TEMPLATE, false, Vec::new(), i32::from(slot))
    }

    pub fn class_id(&self, class: ClassId) -> ClassId {
        class
    }
}

impl Default for Symtab {
    fn default() -> Self {
        Self::new()
    }
}
