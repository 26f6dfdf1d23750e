//! `Code`: one function's compiled bytecode and register layout
//! (spec.md §3 Storage, §4.6 frame).

use super::op::Opcode;
use crate::symtab::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone)]
pub struct Code {
    pub name: String,
    pub ops: Vec<Opcode>,
    /// Number of registers this function's frame needs.
    pub register_count: u16,
    /// Number of leading registers that are call arguments (including an
    /// implicit `self` for methods).
    pub arg_count: u16,
    /// The function's declared type (subtypes[0] = return, rest = params).
    pub ty: TypeId,
    /// Whether this function declares a return type, so a fallthrough to
    /// the end of the function without `return` is a `NoReturnError`.
    pub requires_return: bool,
}

impl Code {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self { name: name.into(), ops: Vec::new(), register_count: 0, arg_count: 0, ty, requires_return: false }
    }

    pub fn here(&self) -> u32 {
        self.ops.len() as u32
    }

    pub fn push(&mut self, op: Opcode) -> u32 {
        let pos = self.here();
        self.ops.push(op);
        pos
    }
}
