//! Exception propagation: raising, unwinding, and `try`/`except` dispatch
//! (spec.md §4.6, §7).

use crate::diagnostics::TraceFrame;
use crate::heap::{HeapData, Instance};
use crate::symtab::{ClassId, Symtab};
use crate::value::Value;

use super::VM;

/// A language-level raised exception propagating up the frame stack. Carries
/// the live exception value (so a `catch` can bind it) plus the traceback
/// accumulated as frames unwind, top-first per spec.md §7.
pub struct Raised {
    pub value: Value,
    pub class: ClassId,
    pub trace: Vec<TraceFrame>,
}

pub type VmResult<T> = Result<T, Raised>;

/// Walks `class`'s ancestor chain looking for `target`, matching spec.md
/// §4.6's "class inheritance chain and `true_class`" rule. Free function
/// (rather than a `&self` method) so it can be called from inside a
/// closure that already holds a mutable borrow of another `VM` field.
fn class_is_a(symtab: &Symtab, class: ClassId, target: ClassId) -> bool {
    let mut cur = Some(class);
    while let Some(c) = cur {
        if c == target {
            return true;
        }
        cur = symtab.class_by_id(c).parent;
    }
    false
}

impl VM {
    /// Allocates an instance of a builtin exception class with `message`
    /// set, the shape every VM-detected error (division by zero, bad
    /// index, ...) raises through (spec.md §7).
    pub(crate) fn make_exception(&mut self, symtab: &Symtab, class: ClassId, message: String, line: u32) -> Raised {
        let msg_value = Value::Ref(self.heap.alloc(HeapData::Str(message), false));
        let id = self.heap.alloc(HeapData::Instance(Instance { class, properties: vec![msg_value] }), true);
        let _ = symtab; // class hierarchy already fixed at bootstrap time
        Raised { value: Value::Ref(id), class, trace: vec![TraceFrame { function_name: "[builtin]".to_string(), line: Some(line) }] }
    }

    /// `raise`: the register holds a live exception instance already built
    /// by a `ClassName(message)` constructor call.
    pub(crate) fn exec_raise(&mut self, value: Value, line: u32) -> Raised {
        let class = value.class_id(&self.heap);
        Raised { value, class, trace: vec![TraceFrame { function_name: self.current_function_name(), line: Some(line) }] }
    }

    fn current_function_name(&self) -> String {
        self.frames.last().map_or_else(|| "<root>".to_string(), |f| self.functions[f.func.0 as usize].name.clone())
    }

    /// `a isinstance-of b`: walks `class`'s ancestor chain looking for
    /// `target`, matching spec.md §4.6's "class inheritance chain and
    /// `true_class`" rule.
    pub fn class_is_a(&self, symtab: &Symtab, class: ClassId, target: ClassId) -> bool {
        class_is_a(symtab, class, target)
    }

    /// Attempts to find a handler for `raised` within the current frame's
    /// active try regions, walking outward through enclosing frames on a
    /// miss (spec.md §4.6). Returns `Ok(())` and leaves the matching
    /// frame's PC at the handler body if caught; re-returns the error
    /// (popping every frame it walked through) if unhandled.
    pub(crate) fn dispatch_raise(&mut self, symtab: &Symtab, mut raised: Raised) -> VmResult<()> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Err(raised);
            };
            while let Some(region) = frame.try_stack.pop() {
                if let Some(arm) = region.catch_table.iter().find(|arm| class_is_a(symtab, raised.class, arm.class)) {
                    if let Some(bind) = arm.bind {
                        let offset = frame.reg_offset;
                        let old = std::mem::replace(&mut self.registers[offset + bind.0 as usize], Value::Nil);
                        old.drop_with_heap(&mut self.heap);
                        self.registers[offset + bind.0 as usize] = raised.value;
                    } else {
                        raised.value.drop_with_heap(&mut self.heap);
                    }
                    frame.pc = arm.body.0;
                    return Ok(());
                }
            }
            // No region in this frame handled it: release this frame's
            // locals and continue searching the caller.
            let frame = self.frames.pop().expect("checked Some above");
            let reg_count = self.functions[frame.func.0 as usize].register_count as usize;
            for i in 0..reg_count {
                let v = std::mem::replace(&mut self.registers[frame.reg_offset + i], Value::Nil);
                v.drop_with_heap(&mut self.heap);
            }
            self.registers.truncate(frame.reg_offset);
            raised.trace.push(TraceFrame { function_name: self.functions[frame.func.0 as usize].name.clone(), line: Some(frame.call_line) });
        }
    }
}
