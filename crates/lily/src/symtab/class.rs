//! Classes: named, unique-by-id type definitions (spec.md §3 Class).

use super::ty::TypeId;
use crate::intern::shorthash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The twenty stable builtin class ids, preserved across the whole crate
/// since the emitter and VM special-case them (spec.md §6).
pub const CLS_INTEGER: ClassId = ClassId(0);
pub const CLS_DOUBLE: ClassId = ClassId(1);
pub const CLS_STRING: ClassId = ClassId(2);
pub const CLS_FUNCTION: ClassId = ClassId(3);
pub const CLS_ANY: ClassId = ClassId(4);
pub const CLS_LIST: ClassId = ClassId(5);
pub const CLS_HASH: ClassId = ClassId(6);
pub const CLS_TUPLE: ClassId = ClassId(7);
pub const CLS_TEMPLATE: ClassId = ClassId(8);
pub const CLS_PACKAGE: ClassId = ClassId(9);
pub const CLS_EXCEPTION: ClassId = ClassId(10);
pub const CLS_NOMEMORYERROR: ClassId = ClassId(11);
pub const CLS_DBZEROERROR: ClassId = ClassId(12);
pub const CLS_INDEXERROR: ClassId = ClassId(13);
pub const CLS_BADTCERROR: ClassId = ClassId(14);
pub const CLS_NORETURNERROR: ClassId = ClassId(15);
pub const CLS_VALUEERROR: ClassId = ClassId(16);
pub const CLS_RECURSIONERROR: ClassId = ClassId(17);
pub const CLS_KEYERROR: ClassId = ClassId(18);
pub const CLS_FORMATERROR: ClassId = ClassId(19);

/// Class flags, spec.md §3 plus `original_source/src/lily_core_types.h`'s
/// `CLS_GC_SPECULATIVE`/`CLS_IS_BUILTIN` (see SPEC_FULL.md §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassFlags(pub u16);

impl ClassFlags {
    pub const VALID_HASH_KEY: u16 = 1 << 0;
    pub const ENUM: u16 = 1 << 1;
    pub const VARIANT: u16 = 1 << 2;
    pub const ENUM_IS_SCOPED: u16 = 1 << 3;
    /// Instances of this class are always gc-tagged on creation (`any`).
    pub const GC_TAGGED: u16 = 1 << 4;
    /// Whether this class's instances are gc-tagged depends on its generic
    /// arguments (containers: list/hash/tuple; user generic classes).
    pub const GC_SPECULATIVE: u16 = 1 << 5;
    pub const IS_BUILTIN: u16 = 1 << 6;

    #[must_use]
    pub fn has(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    #[must_use]
    pub fn with(mut self, bit: u16) -> Self {
        self.0 |= bit;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub ty: TypeId,
    /// Index into the instance's property slot vector.
    pub slot: u16,
}

/// A method or a native (foreign) function attached to a class.
#[derive(Debug, Clone)]
pub enum Callable {
    Method { name: String, function: crate::bytecode::code::FunctionId },
    Foreign { name: String, native: crate::vm::call::NativeFn },
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Self::Method { name, .. } | Self::Foreign { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub id: ClassId,
    pub name: String,
    pub shorthash: u64,
    pub parent: Option<ClassId>,
    pub properties: Vec<Property>,
    pub callables: Vec<Callable>,
    /// Number of generic parameters the class declares; -1 marks a class
    /// whose arity is not fixed (spec.md §3).
    pub template_arity: i32,
    pub flags: ClassFlags,
    /// Ordered variant sub-classes, populated only for enum classes.
    pub variants: Vec<ClassId>,
    /// The canonical "default" type for this class: the open generic form
    /// (`class[A, B, ...]`) for a generic class, or the bare class type
    /// otherwise. Filled in once the type table exists.
    pub default_type: Option<TypeId>,
}

impl Class {
    pub fn new(id: ClassId, name: impl Into<String>, parent: Option<ClassId>, template_arity: i32, flags: ClassFlags) -> Self {
        let name = name.into();
        Self {
            id,
            shorthash: shorthash(&name),
            name,
            parent,
            properties: Vec::new(),
            callables: Vec::new(),
            template_arity,
            flags,
            variants: Vec::new(),
            default_type: None,
        }
    }

    pub fn is_enum(&self) -> bool {
        self.flags.has(ClassFlags::ENUM)
    }

    pub fn is_variant(&self) -> bool {
        self.flags.has(ClassFlags::VARIANT)
    }
}
