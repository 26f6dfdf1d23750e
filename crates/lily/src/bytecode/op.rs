//! Opcodes: 16-bit-operand register machine instructions (spec.md §4.5).
//!
//! Operands are register spots (indices into the current frame's register
//! window), literal-table spots, or jump offsets into the same function's
//! code vector. Represented here as a typed enum rather than a raw packed
//! `u16` stream — the VM still dispatches on opcode identity and reads
//! "inline operands" the same way, just without manual (de)serialization.

use smallvec::SmallVec;

use crate::intern::{DoubleLitId, IntegerLitId, StringLitId};
use crate::symtab::{ClassId, VarId};

/// A register spot: an index into the current frame's register window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub u16);

/// A jump target: an index into the owning function's code vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePos(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    Integer,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// A static catch-class arm of a `try`/`except` chain.
#[derive(Debug, Clone)]
pub struct CatchArm {
    pub class: ClassId,
    /// Register the caught exception is bound to, if `as name` was used.
    pub bind: Option<Reg>,
    pub body: CodePos,
}

/// One arm of a `match`: the variant class and where its body starts.
#[derive(Debug, Clone)]
pub struct MatchArm {
    pub variant: ClassId,
    pub body: CodePos,
}

#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum Opcode {
    LoadInteger { lit: IntegerLitId, dest: Reg },
    LoadDouble { lit: DoubleLitId, dest: Reg },
    LoadString { lit: StringLitId, dest: Reg },
    /// Loads a `readonly` var's inline function value (a top-level `define`
    /// or a class method) as a first-class function.
    LoadReadonly { var: VarId, dest: Reg },
    LoadGlobal { global: VarId, dest: Reg },
    LoadLocal { src: Reg, dest: Reg },
    LoadBuiltinNone { dest: Reg },

    AssignLocal { src: Reg, dest: Reg },
    AssignGlobal { src: Reg, global: VarId },
    /// Declared but never legally reachable (spec.md §9 open question (b));
    /// the parser rejects any construct that would emit it.
    AssignUpvalueNotSupported,

    Arith { op: ArithOp, kind: NumKind, a: Reg, b: Reg, dest: Reg },
    Concat { a: Reg, b: Reg, dest: Reg },
    Negate { kind: NumKind, src: Reg, dest: Reg },
    LogicalNot { src: Reg, dest: Reg },
    BitNot { src: Reg, dest: Reg },
    Bitwise { op: BitOp, a: Reg, b: Reg, dest: Reg },

    Compare { op: CmpOp, a: Reg, b: Reg, dest: Reg },
    Jump { target: CodePos },
    JumpIfFalse { cond: Reg, target: CodePos },
    JumpIfTrue { cond: Reg, target: CodePos },

    BuildList { items: SmallVec<[Reg; 4]>, dest: Reg },
    BuildHash { pairs: SmallVec<[(Reg, Reg); 4]>, dest: Reg },
    BuildTuple { items: SmallVec<[Reg; 4]>, dest: Reg },
    SubscriptGet { base: Reg, index: Reg, dest: Reg },
    SubscriptSet { base: Reg, index: Reg, value: Reg },

    GetProperty { base: Reg, slot: u16, dest: Reg },
    SetProperty { base: Reg, slot: u16, value: Reg },
    NewInstance { class: ClassId, args: SmallVec<[Reg; 4]>, dest: Reg },
    /// Widens an instance register to a parent (or `any`) static type
    /// without changing its `true_class`.
    Upcast { src: Reg, dest: Reg },
    WrapAny { src: Reg, dest: Reg },
    UnwrapAny { src: Reg, dest: Reg, target: ClassId, line: u32 },

    /// Calls a function value held in `callee` (a user-defined function,
    /// method, or lambda).
    CallNative { callee: Reg, args: SmallVec<[Reg; 4]>, dest: Option<Reg> },
    /// Calls a native/builtin function identified at compile time.
    CallForeign { native: crate::vm::call::NativeFn, args: SmallVec<[Reg; 4]>, dest: Option<Reg> },
    ReturnVal { src: Reg },
    ReturnVoid,

    TryEnter { catch_table: Vec<CatchArm>, finally: Option<CodePos> },
    TryLeave,
    Raise { src: Reg },

    BuildVariant { class: ClassId, args: SmallVec<[Reg; 4]>, dest: Reg },
    MatchDispatch { subject: Reg, arms: Vec<MatchArm>, default: Option<CodePos> },
    VariantDecompose { subject: Reg, field: u16, dest: Reg },

    ForIntegerSetup { var: Reg, start: Reg, stop: Reg, step: Reg },
    ForIntegerStep { var: Reg, stop: Reg, step: Reg, target: CodePos },

    Show { src: Reg },
}
