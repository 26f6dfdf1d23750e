//! `CodeBuilder`: per-function register allocation and jump patching used
//! while emitting one function's bytecode (spec.md §4.5, §9 design notes).
//!
//! Registers are a scoped bump allocator: entering a block (`if`, `while`,
//! …) marks the current high-water mark, and leaving it rewinds to that
//! mark so storages and block-local vars are reused by later sibling
//! blocks, mirroring the source's slot-reuse allocator.

use super::code::Code;
use super::op::{CodePos, Opcode, Reg};
use crate::symtab::TypeId;

pub struct CodeBuilder {
    pub code: Code,
    next_reg: u16,
    scopes: Vec<u16>,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self { code: Code::new(name, ty), next_reg: 0, scopes: Vec::new() }
    }

    /// Allocates a fresh register (a storage or a named local) and bumps
    /// the function's recorded register count if this is a new high-water
    /// mark.
    pub fn alloc_reg(&mut self) -> Reg {
        let r = Reg(self.next_reg);
        self.next_reg += 1;
        if self.next_reg > self.code.register_count {
            self.code.register_count = self.next_reg;
        }
        r
    }

    /// Allocates `n` contiguous leading registers as call arguments.
    pub fn alloc_args(&mut self, n: u16) -> Vec<Reg> {
        let regs: Vec<Reg> = (0..n).map(|_| self.alloc_reg()).collect();
        self.code.arg_count = n;
        regs
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(self.next_reg);
    }

    /// Rewinds the register bump pointer to the saved mark, releasing every
    /// storage and local declared since `enter_scope`, for reuse.
    pub fn leave_scope(&mut self) {
        self.next_reg = self.scopes.pop().expect("leave_scope without matching enter_scope");
    }

    pub fn here(&self) -> u32 {
        self.code.here()
    }

    pub fn emit(&mut self, op: Opcode) -> u32 {
        self.code.push(op)
    }

    /// Emits a forward jump with a placeholder target, returning its code
    /// position for later patching.
    pub fn emit_jump(&mut self, target: u32) -> u32 {
        self.emit(Opcode::Jump { target: CodePos(target) })
    }

    pub fn emit_jump_if_false(&mut self, cond: Reg, target: u32) -> u32 {
        self.emit(Opcode::JumpIfFalse { cond, target: CodePos(target) })
    }

    pub fn emit_jump_if_true(&mut self, cond: Reg, target: u32) -> u32 {
        self.emit(Opcode::JumpIfTrue { cond, target: CodePos(target) })
    }

    /// Resolves a previously-emitted jump's placeholder target to `target`
    /// (usually the current code position, on block close).
    pub fn patch_jump(&mut self, pos: u32, target: u32) {
        match &mut self.code.ops[pos as usize] {
            Opcode::Jump { target: t } | Opcode::JumpIfFalse { target: t, .. } | Opcode::JumpIfTrue { target: t, .. } => {
                *t = CodePos(target);
            }
            other => panic!("patch_jump: code position {pos} is not a jump ({other:?})"),
        }
    }

    pub fn patch_jump_here(&mut self, pos: u32) {
        let here = self.here();
        self.patch_jump(pos, here);
    }

    pub fn finish(self) -> Code {
        self.code
    }
}
