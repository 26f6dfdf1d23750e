//! Calling convention: pushing/popping frames and invoking native
//! (foreign) functions (spec.md §4.6).

use smallvec::SmallVec;

use super::exceptions::{Raised, VmResult};
use super::VM;
use crate::bytecode::FunctionId;
use crate::diagnostics::ErrorKind;
use crate::symtab::Symtab;
use crate::value::Value;

/// Identifies a builtin/foreign function at compile time. The stock
/// language has exactly one free (non-method) native: `show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFn {
    Show,
}

impl VM {
    /// Calls a user function and runs it to completion: pushes a frame via
    /// [`VM::push_call_frame`], then drives [`VM::run_frame`] until exactly
    /// that frame (and anything it calls) unwinds back off the stack.
    pub(crate) fn call_native(&mut self, symtab: &Symtab, func: FunctionId, args: &[Value], line: u32) -> VmResult<Value> {
        self.push_call_frame(symtab, func, args, None, line)?;
        self.run_frame(symtab)
    }

    pub(crate) fn call_foreign(&mut self, symtab: &Symtab, native: NativeFn, args: &[Value], line: u32) -> VmResult<Value> {
        match native {
            NativeFn::Show => {
                let text = self.display_value(symtab, &args[0]);
                (self.sink)(&text);
                (self.sink)("\n");
                Ok(Value::Nil)
            }
        }
    }

    /// Entry point used by the embedder: runs a top-level function
    /// (the compiled root, or any function value) to completion.
    pub fn run_function(&mut self, symtab: &Symtab, func: FunctionId, args: Vec<Value>) -> Result<Value, Raised> {
        let result = self.call_native(symtab, func, &args, 0);
        for a in args {
            a.drop_with_heap(&mut self.heap);
        }
        result
    }

    /// Reads each argument register, one freshly retained copy per entry —
    /// `push_call_frame`/`call_foreign` treat the result as borrowed and
    /// retain again when installing it into the callee's own registers, so
    /// the caller is responsible for dropping these temporaries afterward.
    pub(crate) fn collect_call_args(&mut self, regs: &[crate::bytecode::Reg]) -> SmallVec<[Value; 4]> {
        regs.iter().map(|r| self.reg(*r)).collect()
    }

    pub(crate) fn raise_builtin(&mut self, symtab: &Symtab, class: crate::symtab::ClassId, message: impl Into<String>, line: u32) -> Raised {
        self.make_exception(symtab, class, message.into(), line)
    }

    pub(crate) fn kind_for_class(&self, class: crate::symtab::ClassId) -> ErrorKind {
        use crate::symtab::class::*;
        match class {
            c if c == CLS_NOMEMORYERROR => ErrorKind::NoMemoryError,
            c if c == CLS_DBZEROERROR => ErrorKind::DivisionByZeroError,
            c if c == CLS_INDEXERROR => ErrorKind::IndexError,
            c if c == CLS_BADTCERROR => ErrorKind::BadTypecastError,
            c if c == CLS_NORETURNERROR => ErrorKind::NoReturnError,
            c if c == CLS_VALUEERROR => ErrorKind::ValueError,
            c if c == CLS_RECURSIONERROR => ErrorKind::RecursionError,
            c if c == CLS_KEYERROR => ErrorKind::KeyError,
            c if c == CLS_FORMATERROR => ErrorKind::FormatError,
            _ => ErrorKind::ValueError,
        }
    }
}
