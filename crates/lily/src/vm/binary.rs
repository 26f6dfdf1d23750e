//! Arithmetic, bitwise, concat, and unary opcode execution (spec.md §4.5
//! "Arithmetic"/"Bitwise" families, §5 numeric promotion rules).

use super::exceptions::{Raised, VmResult};
use super::VM;
use crate::bytecode::{ArithOp, BitOp};
use crate::heap::HeapData;
use crate::symtab::{class, Symtab};
use crate::value::Value;

impl VM {
    /// `integer`/`double` arithmetic: same-kind ops stay in that kind;
    /// mixed integer/double promotes to double, per spec.md §5.
    pub(crate) fn exec_arith(&mut self, symtab: &Symtab, op: ArithOp, lhs: Value, rhs: Value, line: u32) -> VmResult<Value> {
        let result = match (&lhs, &rhs) {
            (Value::Integer(a), Value::Integer(b)) => {
                if op == ArithOp::Div && *b == 0 {
                    Err(self.raise_builtin(symtab, class::CLS_DBZEROERROR, "attempt to divide by zero", line))
                } else if op == ArithOp::Mod && *b == 0 {
                    Err(self.raise_builtin(symtab, class::CLS_DBZEROERROR, "attempt to modulo by zero", line))
                } else {
                    Ok(Value::Integer(apply_int(op, *a, *b)))
                }
            }
            (Value::Integer(a), Value::Double(b)) => apply_double_checked(self, symtab, op, *a as f64, *b, line),
            (Value::Double(a), Value::Integer(b)) => apply_double_checked(self, symtab, op, *a, *b as f64, line),
            (Value::Double(a), Value::Double(b)) => apply_double_checked(self, symtab, op, *a, *b, line),
            _ => Err(self.raise_builtin(symtab, class::CLS_VALUEERROR, "arithmetic requires integer or double operands", line)),
        };
        lhs.drop_with_heap(&mut self.heap);
        rhs.drop_with_heap(&mut self.heap);
        result
    }

    pub(crate) fn exec_concat(&mut self, lhs: Value, rhs: Value) -> Value {
        let text = match (&lhs, &rhs) {
            (Value::Ref(a), Value::Ref(b)) => match (self.heap.data(*a), self.heap.data(*b)) {
                (HeapData::Str(x), HeapData::Str(y)) => format!("{x}{y}"),
                _ => String::new(),
            },
            _ => String::new(),
        };
        lhs.drop_with_heap(&mut self.heap);
        rhs.drop_with_heap(&mut self.heap);
        Value::Ref(self.heap.alloc(HeapData::Str(text), false))
    }

    pub(crate) fn exec_negate(&mut self, symtab: &Symtab, value: Value, line: u32) -> VmResult<Value> {
        let result = match &value {
            Value::Integer(v) => Ok(Value::Integer(-v)),
            Value::Double(v) => Ok(Value::Double(-v)),
            _ => Err(self.raise_builtin(symtab, class::CLS_VALUEERROR, "cannot negate this value", line)),
        };
        value.drop_with_heap(&mut self.heap);
        result
    }

    pub(crate) fn exec_logical_not(&mut self, value: Value) -> Value {
        let result = Value::Integer(i64::from(!value.truthy(&self.heap)));
        value.drop_with_heap(&mut self.heap);
        result
    }

    pub(crate) fn exec_bitwise(&mut self, symtab: &Symtab, op: BitOp, lhs: Value, rhs: Value, line: u32) -> VmResult<Value> {
        let result = match (&lhs, &rhs) {
            (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(apply_bit(op, *a, *b))),
            _ => Err(self.raise_builtin(symtab, class::CLS_VALUEERROR, "bitwise operators require integer operands", line)),
        };
        lhs.drop_with_heap(&mut self.heap);
        rhs.drop_with_heap(&mut self.heap);
        result
    }

    pub(crate) fn exec_bitnot(&mut self, symtab: &Symtab, value: Value, line: u32) -> VmResult<Value> {
        let result = match &value {
            Value::Integer(v) => Ok(Value::Integer(!v)),
            _ => Err(self.raise_builtin(symtab, class::CLS_VALUEERROR, "bitwise not requires an integer operand", line)),
        };
        value.drop_with_heap(&mut self.heap);
        result
    }
}

fn apply_int(op: ArithOp, a: i64, b: i64) -> i64 {
    match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Div => a.wrapping_div(b),
        ArithOp::Mod => a.wrapping_rem(b),
    }
}

fn apply_double_checked(vm: &mut VM, symtab: &Symtab, op: ArithOp, a: f64, b: f64, line: u32) -> Result<Value, Raised> {
    if matches!(op, ArithOp::Div | ArithOp::Mod) && b == 0.0 {
        return Err(vm.raise_builtin(symtab, class::CLS_DBZEROERROR, "attempt to divide by zero", line));
    }
    Ok(Value::Double(match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => a % b,
    }))
}

fn apply_bit(op: BitOp, a: i64, b: i64) -> i64 {
    match op {
        BitOp::And => a & b,
        BitOp::Or => a | b,
        BitOp::Xor => a ^ b,
        BitOp::Shl => a.wrapping_shl(b as u32),
        BitOp::Shr => a.wrapping_shr(b as u32),
    }
}
