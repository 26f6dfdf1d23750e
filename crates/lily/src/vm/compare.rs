//! `Compare` opcode execution (spec.md §4.5, §5 comparison typing rules:
//! same class, both numeric, or instance-vs-ancestor).

use std::cmp::Ordering;

use super::collections::values_equal;
use super::exceptions::VmResult;
use super::VM;
use crate::bytecode::CmpOp;
use crate::heap::HeapData;
use crate::symtab::{class, Symtab};
use crate::value::Value;

impl VM {
    pub(crate) fn exec_compare(&mut self, symtab: &Symtab, op: CmpOp, lhs: Value, rhs: Value, line: u32) -> VmResult<Value> {
        let result = if matches!(op, CmpOp::Eq | CmpOp::Neq) {
            let eq = values_equal(&lhs, &rhs, &self.heap);
            Ok(Value::Integer(i64::from(if op == CmpOp::Eq { eq } else { !eq })))
        } else {
            match ordering(&lhs, &rhs, &self.heap) {
                Some(ord) => Ok(Value::Integer(i64::from(matches_order(op, ord)))),
                None => Err(self.raise_builtin(symtab, class::CLS_VALUEERROR, "values are not ordered-comparable", line)),
            }
        };
        lhs.drop_with_heap(&mut self.heap);
        rhs.drop_with_heap(&mut self.heap);
        result
    }
}

fn ordering(a: &Value, b: &Value, heap: &crate::heap::Heap) -> Option<Ordering> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        (Value::Integer(x), Value::Double(y)) => (*x as f64).partial_cmp(y),
        (Value::Double(x), Value::Integer(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Ref(x), Value::Ref(y)) => match (heap.data(*x), heap.data(*y)) {
            (HeapData::Str(a), HeapData::Str(b)) => Some(a.cmp(b)),
            _ => None,
        },
        _ => None,
    }
}

fn matches_order(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
        CmpOp::Eq | CmpOp::Neq => unreachable!("handled by caller"),
    }
}
