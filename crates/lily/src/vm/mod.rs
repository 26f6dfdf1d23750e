//! The bytecode VM: a register-per-frame interpreter over [`Opcode`]
//! (spec.md §4.6, §4.7).
//!
//! Dispatch lives here; each opcode family's actual behavior is split into
//! a sibling module the way the opcode table in spec.md §4.5 groups them:
//! [`binary`] (arithmetic/bitwise/concat), [`compare`], [`collections`]
//! (lists/hashes/tuples/properties/instances/variants), [`call`] (calling
//! convention, native dispatch), and [`exceptions`] (raise/unwind).

pub mod binary;
pub mod call;
pub mod collections;
pub mod compare;
pub mod exceptions;

use crate::bytecode::{CatchArm, Code, CodePos, FunctionId, Opcode, Reg};
use crate::diagnostics::{ErrorKind, RunError};
use crate::heap::{Heap, HeapData, HeapId};
use crate::symtab::Symtab;
use crate::value::Value;

pub use call::NativeFn;
pub use exceptions::{Raised, VmResult};

/// An active `try` region within one frame: the catch arms a `Raise`
/// propagating through this point in the function may match against.
#[derive(Debug, Clone)]
pub struct ActiveTry {
    pub catch_table: Vec<CatchArm>,
    pub finally: Option<CodePos>,
}

/// One call frame: a window into [`VM::registers`] plus the bookkeeping
/// needed to resume the caller after a return or to unwind it on a raise.
pub struct Frame {
    pub func: FunctionId,
    pub pc: u32,
    pub reg_offset: usize,
    pub call_line: u32,
    pub try_stack: Vec<ActiveTry>,
    /// Register in the *caller's* frame to store this call's return value
    /// into, `None` for a call whose result is discarded (and meaningless
    /// for the outermost frame, whose return leaves the VM entirely).
    pub dest: Option<Reg>,
}

pub struct VM {
    pub heap: Heap,
    pub functions: Vec<Code>,
    pub globals: Vec<Value>,
    registers: Vec<Value>,
    frames: Vec<Frame>,
    string_lit_cache: Vec<Option<HeapId>>,
    sink: Box<dyn FnMut(&str)>,
}

impl VM {
    /// Matches `lily_vm_state`'s hardcoded call-depth ceiling: deep enough
    /// for legitimate recursion, shallow enough to fail fast on infinite
    /// recursion instead of exhausting the host stack.
    pub(crate) const MAX_FRAME_DEPTH: usize = 1000;

    pub fn new(functions: Vec<Code>, sink: Box<dyn FnMut(&str)>) -> Self {
        Self {
            heap: Heap::new(),
            functions,
            globals: Vec::new(),
            registers: Vec::new(),
            frames: Vec::new(),
            string_lit_cache: Vec::new(),
            sink,
        }
    }

    fn ensure_global_capacity(&mut self, idx: usize) {
        if idx >= self.globals.len() {
            self.globals.resize_with(idx + 1, || Value::Nil);
        }
    }

    /// Reads a register, producing a fresh retained copy: safe to hold onto
    /// independently of the register it came from (spec.md §4.7 — every
    /// copy of a heap value is a distinct strong reference).
    fn reg(&mut self, r: Reg) -> Value {
        let offset = self.frames.last().expect("reg access outside a frame").reg_offset;
        let idx = offset + r.0 as usize;
        let heap = &mut self.heap;
        self.registers[idx].retain_clone(heap)
    }

    fn reg_mut_slot(&mut self, r: Reg) -> &mut Value {
        let offset = self.frames.last().expect("reg access outside a frame").reg_offset;
        &mut self.registers[offset + r.0 as usize]
    }

    fn take_reg(&mut self, r: Reg) -> Value {
        std::mem::replace(self.reg_mut_slot(r), Value::Nil)
    }

    fn set_reg(&mut self, r: Reg, value: Value) {
        let old = std::mem::replace(self.reg_mut_slot(r), value);
        old.drop_with_heap(&mut self.heap);
    }

    /// Looks up (allocating + pinning on first use) the heap string for a
    /// string literal. Literals are protected values per spec.md §3: never
    /// refcounted, shared by every `LoadString` of the same literal id.
    fn string_literal_heap(&mut self, symtab: &Symtab, lit: crate::intern::StringLitId) -> HeapId {
        let idx = lit.index();
        if idx >= self.string_lit_cache.len() {
            self.string_lit_cache.resize(idx + 1, None);
        }
        if let Some(id) = self.string_lit_cache[idx] {
            return id;
        }
        let text = symtab.string_lits.get(lit).clone();
        let id = self.heap.alloc_pinned(HeapData::Str(text));
        self.string_lit_cache[idx] = Some(id);
        id
    }

    pub(crate) fn should_collect(&self) -> bool {
        self.heap.should_collect()
    }

    /// Runs a full mark pass rooted at every live register of every live
    /// frame, plus globals (spec.md §4.7).
    pub(crate) fn run_gc(&mut self) {
        let roots: Vec<HeapId> = self
            .registers
            .iter()
            .chain(self.globals.iter())
            .filter_map(|v| if let Value::Ref(id) = v { Some(*id) } else { None })
            .collect();
        self.heap.collect_cycles(roots.into_iter());
    }

    /// Renders a value the way the `show`/`string()` builtins do (spec.md
    /// §6): primitives print literally, containers recurse, instances show
    /// `ClassName(...)`.
    pub(crate) fn display_value(&self, symtab: &Symtab, value: &Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Double(d) => crate::diagnostics::format_double_g(*d),
            Value::Function(_) => "function".to_string(),
            Value::Package(_) => "package".to_string(),
            Value::Ref(id) => self.display_heap(symtab, *id),
        }
    }

    fn display_heap(&self, symtab: &Symtab, id: HeapId) -> String {
        match self.heap.data(id) {
            HeapData::Str(s) => s.clone(),
            HeapData::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| self.display_value(symtab, v)).collect();
                format!("[{}]", inner.join(", "))
            }
            HeapData::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(|v| self.display_value(symtab, v)).collect();
                format!("<[{}]>", inner.join(", "))
            }
            HeapData::Hash(h) => {
                let inner: Vec<String> =
                    h.entries.iter().map(|(_, k, v)| format!("{}: {}", self.display_value(symtab, k), self.display_value(symtab, v))).collect();
                format!("[{}]", inner.join(", "))
            }
            HeapData::Any(v) => self.display_value(symtab, v),
            HeapData::Instance(i) => format!("{}(...)", symtab.class_by_id(i.class).name),
            HeapData::Variant(v) => {
                let inner: Vec<String> = v.fields.iter().map(|f| self.display_value(symtab, f)).collect();
                if inner.is_empty() {
                    symtab.class_by_id(v.variant).name.clone()
                } else {
                    format!("{}({})", symtab.class_by_id(v.variant).name, inner.join(", "))
                }
            }
        }
    }

    /// Runs until the frame on top of the stack when this call began (the
    /// "root" of this invocation) itself returns. Nested `CallNative` calls
    /// just push another frame onto the same stack and let this one loop
    /// pick it up on the next iteration — there is no recursive Rust call
    /// per Lily call, which keeps `dispatch_raise`'s unwind a single flat
    /// walk over [`VM::frames`] regardless of how deep the call chain is.
    pub(crate) fn run_frame(&mut self, symtab: &Symtab) -> VmResult<Value> {
        let root_depth = self.frames.len();
        loop {
            let (func, pc, call_line) = {
                let f = self.frames.last().expect("run_frame requires an active frame");
                (f.func, f.pc as usize, f.call_line)
            };
            if pc >= self.functions[func.0 as usize].ops.len() {
                if self.functions[func.0 as usize].requires_return {
                    let raised = self.raise_builtin(
                        symtab,
                        crate::symtab::class::CLS_NORETURNERROR,
                        "function completed without returning a value",
                        call_line,
                    );
                    self.dispatch_raise(symtab, raised)?;
                } else if let Some(v) = self.perform_return(Value::Nil, root_depth) {
                    return Ok(v);
                }
                continue;
            }
            match self.step(symtab, root_depth) {
                Ok(Some(v)) => return Ok(v),
                Ok(None) => {}
                Err(raised) => self.dispatch_raise(symtab, raised)?,
            }
        }
    }

    /// Pops the current frame, releasing every register it owned. Returns
    /// `Some(value)` when the popped frame was this invocation's root (the
    /// whole call is finished); otherwise stores `value` into the now-top
    /// (caller) frame's `dest` register, if any, and returns `None`.
    fn perform_return(&mut self, value: Value, root_depth: usize) -> Option<Value> {
        let frame = self.frames.pop().expect("return executed without a frame");
        let reg_count = self.functions[frame.func.0 as usize].register_count as usize;
        for i in 0..reg_count {
            let v = std::mem::replace(&mut self.registers[frame.reg_offset + i], Value::Nil);
            v.drop_with_heap(&mut self.heap);
        }
        self.registers.truncate(frame.reg_offset);
        if self.frames.len() < root_depth {
            return Some(value);
        }
        match frame.dest {
            Some(d) => self.set_reg(d, value),
            None => value.drop_with_heap(&mut self.heap),
        }
        None
    }

    /// Executes exactly one opcode at the current frame's `pc`, advancing it
    /// (or branching it, for jumps/calls/returns). `root_depth` is this
    /// `run_frame` invocation's own base, needed so `ReturnVal`/`ReturnVoid`
    /// know whether popping just finished the whole call.
    fn step(&mut self, symtab: &Symtab, root_depth: usize) -> VmResult<Option<Value>> {
        let frame_idx = self.frames.len() - 1;
        let func = self.frames[frame_idx].func;
        let pc = self.frames[frame_idx].pc as usize;
        let line = self.frames[frame_idx].call_line;
        let op = self.functions[func.0 as usize].ops[pc].clone();
        self.frames[frame_idx].pc += 1;

        match op {
            Opcode::LoadInteger { lit, dest } => {
                let v = *symtab.integer_lits.get(lit);
                self.set_reg(dest, Value::Integer(v));
            }
            Opcode::LoadDouble { lit, dest } => {
                let v = symtab.double_value(lit);
                self.set_reg(dest, Value::Double(v));
            }
            Opcode::LoadString { lit, dest } => {
                let id = self.string_literal_heap(symtab, lit);
                self.set_reg(dest, Value::Ref(id));
            }
            Opcode::LoadReadonly { var, dest } => {
                let v = symtab.var(var);
                let value = match v.inline_function {
                    Some(f) => Value::Function(crate::value::FunctionRef::User(f)),
                    None => Value::Nil,
                };
                self.set_reg(dest, value);
            }
            Opcode::LoadGlobal { global, dest } => {
                let idx = symtab.var(global).reg_spot as usize;
                self.ensure_global_capacity(idx);
                let value = self.globals[idx].retain_clone(&mut self.heap);
                self.set_reg(dest, value);
            }
            Opcode::LoadLocal { src, dest } => {
                let value = self.reg(src);
                self.set_reg(dest, value);
            }
            Opcode::LoadBuiltinNone { dest } => self.set_reg(dest, Value::Nil),

            Opcode::AssignLocal { src, dest } => {
                let value = self.reg(src);
                self.set_reg(dest, value);
            }
            Opcode::AssignGlobal { src, global } => {
                let idx = symtab.var(global).reg_spot as usize;
                self.ensure_global_capacity(idx);
                let value = self.reg(src);
                let old = std::mem::replace(&mut self.globals[idx], value);
                old.drop_with_heap(&mut self.heap);
            }
            Opcode::AssignUpvalueNotSupported => unreachable!("parser never emits this (spec.md open question b)"),

            Opcode::Arith { op, a, b, dest, .. } => {
                let lhs = self.take_reg(a);
                let rhs = self.take_reg(b);
                let result = self.exec_arith(symtab, op, lhs, rhs, line)?;
                self.set_reg(dest, result);
            }
            Opcode::Concat { a, b, dest } => {
                let lhs = self.take_reg(a);
                let rhs = self.take_reg(b);
                let result = self.exec_concat(lhs, rhs);
                self.set_reg(dest, result);
            }
            Opcode::Negate { src, dest, .. } => {
                let value = self.take_reg(src);
                let result = self.exec_negate(symtab, value, line)?;
                self.set_reg(dest, result);
            }
            Opcode::LogicalNot { src, dest } => {
                let value = self.take_reg(src);
                let result = self.exec_logical_not(value);
                self.set_reg(dest, result);
            }
            Opcode::BitNot { src, dest } => {
                let value = self.take_reg(src);
                let result = self.exec_bitnot(symtab, value, line)?;
                self.set_reg(dest, result);
            }
            Opcode::Bitwise { op, a, b, dest } => {
                let lhs = self.take_reg(a);
                let rhs = self.take_reg(b);
                let result = self.exec_bitwise(symtab, op, lhs, rhs, line)?;
                self.set_reg(dest, result);
            }

            Opcode::Compare { op, a, b, dest } => {
                let lhs = self.take_reg(a);
                let rhs = self.take_reg(b);
                let result = self.exec_compare(symtab, op, lhs, rhs, line)?;
                self.set_reg(dest, result);
            }
            Opcode::Jump { target } => self.frames[frame_idx].pc = target.0,
            Opcode::JumpIfFalse { cond, target } => {
                let v = self.reg(cond);
                let truthy = v.truthy(&self.heap);
                v.drop_with_heap(&mut self.heap);
                if !truthy {
                    self.frames[frame_idx].pc = target.0;
                }
            }
            Opcode::JumpIfTrue { cond, target } => {
                let v = self.reg(cond);
                let truthy = v.truthy(&self.heap);
                v.drop_with_heap(&mut self.heap);
                if truthy {
                    self.frames[frame_idx].pc = target.0;
                }
            }

            Opcode::BuildList { items, dest } => {
                let v = self.exec_build_list(&items);
                self.set_reg(dest, v);
            }
            Opcode::BuildHash { pairs, dest } => {
                let v = self.exec_build_hash(&pairs);
                self.set_reg(dest, v);
            }
            Opcode::BuildTuple { items, dest } => {
                let v = self.exec_build_tuple(&items);
                self.set_reg(dest, v);
            }
            Opcode::SubscriptGet { base, index, dest } => {
                let base_v = self.take_reg(base);
                let index_v = self.take_reg(index);
                let result = self.exec_subscript_get(symtab, base_v, index_v, line)?;
                self.set_reg(dest, result);
            }
            Opcode::SubscriptSet { base, index, value } => {
                let base_v = self.take_reg(base);
                let index_v = self.take_reg(index);
                let value_v = self.take_reg(value);
                self.exec_subscript_set(symtab, base_v, index_v, value_v, line)?;
            }

            Opcode::GetProperty { base, slot, dest } => {
                let base_v = self.reg(base);
                let result = self.exec_get_property(&base_v, slot);
                base_v.drop_with_heap(&mut self.heap);
                self.set_reg(dest, result);
            }
            Opcode::SetProperty { base, slot, value } => {
                let base_v = self.reg(base);
                let value_v = self.take_reg(value);
                self.exec_set_property(&base_v, slot, value_v);
                base_v.drop_with_heap(&mut self.heap);
            }
            Opcode::NewInstance { class, args, dest } => {
                let gc_tracked = class.index() >= 20;
                let v = self.exec_new_instance(class, args, gc_tracked);
                self.set_reg(dest, v);
            }
            Opcode::Upcast { src, dest } => {
                let v = self.reg(src);
                self.set_reg(dest, v);
            }
            Opcode::WrapAny { src, dest } => {
                let v = self.take_reg(src);
                let id = self.heap.alloc(HeapData::Any(v), true);
                self.set_reg(dest, Value::Ref(id));
            }
            Opcode::UnwrapAny { src, dest, target, line: unwrap_line } => {
                let v = self.take_reg(src);
                let result = self.exec_unwrap_any(symtab, v, target, unwrap_line)?;
                self.set_reg(dest, result);
            }

            Opcode::CallNative { callee, args, dest } => {
                let callee_v = self.reg(callee);
                let arg_values = self.collect_call_args(&args);
                match callee_v {
                    Value::Function(crate::value::FunctionRef::User(f)) => {
                        callee_v.drop_with_heap(&mut self.heap);
                        self.push_call_frame(symtab, f, &arg_values, dest, line)?;
                        for a in arg_values {
                            a.drop_with_heap(&mut self.heap);
                        }
                    }
                    Value::Function(crate::value::FunctionRef::Native(n)) => {
                        callee_v.drop_with_heap(&mut self.heap);
                        let result = self.call_foreign(symtab, n, &arg_values, line);
                        for a in arg_values {
                            a.drop_with_heap(&mut self.heap);
                        }
                        let result = result?;
                        match dest {
                            Some(d) => self.set_reg(d, result),
                            None => result.drop_with_heap(&mut self.heap),
                        }
                    }
                    _ => {
                        let err = self.raise_builtin(symtab, crate::symtab::class::CLS_VALUEERROR, "value is not callable", line);
                        callee_v.drop_with_heap(&mut self.heap);
                        for a in arg_values {
                            a.drop_with_heap(&mut self.heap);
                        }
                        return Err(err);
                    }
                }
            }
            Opcode::CallForeign { native, args, dest } => {
                let arg_values = self.collect_call_args(&args);
                let result = self.call_foreign(symtab, native, &arg_values, line);
                for a in arg_values {
                    a.drop_with_heap(&mut self.heap);
                }
                let result = result?;
                match dest {
                    Some(d) => self.set_reg(d, result),
                    None => result.drop_with_heap(&mut self.heap),
                }
            }
            Opcode::ReturnVal { src } => {
                let v = self.take_reg(src);
                return Ok(self.perform_return(v, root_depth));
            }
            Opcode::ReturnVoid => return Ok(self.perform_return(Value::Nil, root_depth)),

            Opcode::TryEnter { catch_table, finally } => {
                self.frames[frame_idx].try_stack.push(ActiveTry { catch_table, finally });
            }
            Opcode::TryLeave => {
                self.frames[frame_idx].try_stack.pop();
            }
            Opcode::Raise { src } => {
                let v = self.take_reg(src);
                return Err(self.exec_raise(v, line));
            }

            Opcode::BuildVariant { class, args, dest } => {
                let v = self.exec_build_variant(symtab, class, args, true);
                self.set_reg(dest, v);
            }
            Opcode::MatchDispatch { subject, arms, default } => {
                let v = self.reg(subject);
                let variant = v.class_id(&self.heap);
                v.drop_with_heap(&mut self.heap);
                let target = arms.iter().find(|a| a.variant == variant).map(|a| a.body).or(default);
                match target {
                    Some(pos) => self.frames[frame_idx].pc = pos.0,
                    None => {
                        return Err(self.raise_builtin(symtab, crate::symtab::class::CLS_VALUEERROR, "match did not cover this variant", line))
                    }
                }
            }
            Opcode::VariantDecompose { subject, field, dest } => {
                let subject_v = self.reg(subject);
                let result = self.exec_variant_decompose(&subject_v, field);
                subject_v.drop_with_heap(&mut self.heap);
                self.set_reg(dest, result);
            }

            Opcode::ForIntegerSetup { var, start, stop, step } => {
                let _ = (stop, step);
                let v = self.reg(start);
                self.set_reg(var, v);
            }
            Opcode::ForIntegerStep { var, stop, step, target } => {
                let cur = self.reg(var);
                let stop_v = self.reg(stop);
                let step_v = self.reg(step);
                if let (Value::Integer(c), Value::Integer(s), Value::Integer(st)) = (&cur, &stop_v, &step_v) {
                    let next = c + st;
                    let continues = if *st >= 0 { next <= *s } else { next >= *s };
                    if continues {
                        self.set_reg(var, Value::Integer(next));
                        self.frames[frame_idx].pc = target.0;
                    }
                }
                cur.drop_with_heap(&mut self.heap);
                stop_v.drop_with_heap(&mut self.heap);
                step_v.drop_with_heap(&mut self.heap);
            }

            Opcode::Show { src } => {
                let v = self.reg(src);
                let text = self.display_value(symtab, &v);
                v.drop_with_heap(&mut self.heap);
                (self.sink)(&text);
                (self.sink)("\n");
            }
        }
        Ok(None)
    }

    /// Pushes a new frame for a user function call without running it —
    /// the enclosing `run_frame` loop picks it up on its next iteration.
    /// Used both for nested `CallNative` opcodes and, via [`call::VM::call_native`],
    /// the embedder's top-level entry point.
    pub(crate) fn push_call_frame(
        &mut self,
        symtab: &Symtab,
        func: FunctionId,
        args: &[Value],
        dest: Option<Reg>,
        line: u32,
    ) -> VmResult<()> {
        if self.frames.len() >= Self::MAX_FRAME_DEPTH {
            return Err(self.raise_builtin(symtab, crate::symtab::class::CLS_RECURSIONERROR, "maximum recursion depth exceeded", line));
        }
        let code_idx = func.0 as usize;
        let reg_count = self.functions[code_idx].register_count as usize;
        let reg_offset = self.registers.len();
        self.registers.resize_with(reg_offset + reg_count, || Value::Nil);
        for (i, arg) in args.iter().enumerate() {
            self.registers[reg_offset + i] = arg.retain_clone(&mut self.heap);
        }
        self.frames.push(Frame { func, pc: 0, reg_offset, call_line: line, try_stack: Vec::new(), dest });
        if self.should_collect() {
            self.run_gc();
        }
        Ok(())
    }
}

impl RunError {
    /// Converts a VM-phase [`Raised`] into the uniform [`RunError`] the CLI
    /// front end reports, reading the `message` property every builtin
    /// exception class's constructor sets (spec.md §6).
    pub(crate) fn from_raised(raised: &Raised, heap: &Heap, class_kind: ErrorKind) -> Self {
        let message = match &raised.value {
            Value::Ref(id) => match heap.data(*id) {
                HeapData::Instance(i) => match i.properties.first() {
                    Some(Value::Ref(msg_id)) => match heap.data(*msg_id) {
                        HeapData::Str(s) => s.clone(),
                        _ => String::new(),
                    },
                    _ => String::new(),
                },
                _ => String::new(),
            },
            _ => String::new(),
        };
        let line = raised.trace.first().and_then(|t| t.line).unwrap_or(0);
        let mut err = RunError::new(class_kind, line, message);
        err.trace = raised.trace.clone();
        err
    }
}
