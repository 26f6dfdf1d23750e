//! Class constructor compilation (spec.md §8 scenario 5: single-inheritance
//! property initialization).
//!
//! A constructor's property initializers (`@x = expr`) and its `< Parent(args)`
//! superclass call are recorded as a small standalone re-evaluable IR
//! ([`StoredExpr`]) rather than kept as live [`crate::ast::ExprId`]s, because
//! the per-statement [`crate::ast::AstPool`] is cleared right after the class
//! declaration is parsed. When a subclass is constructed, the parent's
//! initializers are inlined against the subclass's own argument registers
//! instead of performing a real nested call — there is exactly one
//! constructor "frame" per `new`, matching how the rest of the VM has no
//! super-call opcode.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::ast::{BinaryOp, UnaryOp};
use crate::bytecode::{ArithOp, NumKind, Opcode, Reg};
use crate::diagnostics::{ErrorKind, RunError, RunResult};
use crate::symtab::class::{CLS_DOUBLE, CLS_INTEGER};
use crate::symtab::ClassId;

use super::Parser;

/// A small, self-contained expression IR that survives past the AST pool's
/// per-statement reset, used only for constructor field initializers.
#[derive(Debug, Clone)]
pub(super) enum StoredExpr {
    Integer(i64),
    Double(f64),
    Str(String),
    Param(String),
    Binary(BinaryOp, Box<StoredExpr>, Box<StoredExpr>),
    Unary(UnaryOp, Box<StoredExpr>),
}

#[derive(Debug, Clone)]
pub(super) struct CtorField {
    pub slot: u16,
    pub init: StoredExpr,
}

#[derive(Debug, Clone)]
pub(super) struct ClassCtor {
    pub params: Vec<String>,
    pub field_inits: Vec<CtorField>,
    pub parent: Option<(ClassId, Vec<StoredExpr>)>,
}

impl Parser {
    /// Evaluates a [`StoredExpr`] in the *current* function context,
    /// looking up `Param` names in `env`.
    pub(super) fn eval_stored_expr(&mut self, expr: &StoredExpr, env: &AHashMap<String, Reg>) -> RunResult<(Reg, ClassId)> {
        match expr {
            StoredExpr::Integer(v) => {
                let lit = self.symtab.get_integer_literal(*v);
                let dest = self.alloc_reg();
                self.emit(Opcode::LoadInteger { lit, dest });
                Ok((dest, CLS_INTEGER))
            }
            StoredExpr::Double(v) => {
                let lit = self.symtab.get_double_literal(*v);
                let dest = self.alloc_reg();
                self.emit(Opcode::LoadDouble { lit, dest });
                Ok((dest, CLS_DOUBLE))
            }
            StoredExpr::Str(s) => {
                let lit = self.string_literal(s.clone());
                let dest = self.alloc_reg();
                self.emit(Opcode::LoadString { lit, dest });
                Ok((dest, crate::symtab::class::CLS_STRING))
            }
            StoredExpr::Param(name) => {
                let reg = *env.get(name).ok_or_else(|| self.err(format!("unbound constructor parameter '{name}'")))?;
                let dest = self.alloc_reg();
                self.emit(Opcode::LoadLocal { src: reg, dest });
                Ok((dest, crate::symtab::class::CLS_ANY))
            }
            StoredExpr::Unary(op, inner) => {
                let (src, class) = self.eval_stored_expr(inner, env)?;
                let dest = self.alloc_reg();
                match op {
                    UnaryOp::Not => self.emit(Opcode::LogicalNot { src, dest }),
                    UnaryOp::BitNot => self.emit(Opcode::BitNot { src, dest }),
                    UnaryOp::Neg => {
                        let kind = if class == CLS_DOUBLE { NumKind::Double } else { NumKind::Integer };
                        self.emit(Opcode::Negate { kind, src, dest })
                    }
                };
                Ok((dest, class))
            }
            StoredExpr::Binary(op, left, right) => {
                let (a, class_a) = self.eval_stored_expr(left, env)?;
                let (b, class_b) = self.eval_stored_expr(right, env)?;
                let dest = self.alloc_reg();
                let result_class = if class_a == CLS_DOUBLE || class_b == CLS_DOUBLE { CLS_DOUBLE } else { CLS_INTEGER };
                let kind = if result_class == CLS_DOUBLE { NumKind::Double } else { NumKind::Integer };
                let arith = match op {
                    BinaryOp::Add => ArithOp::Add,
                    BinaryOp::Sub => ArithOp::Sub,
                    BinaryOp::Mul => ArithOp::Mul,
                    BinaryOp::Div => ArithOp::Div,
                    BinaryOp::Mod => ArithOp::Mod,
                    BinaryOp::Concat => {
                        self.emit(Opcode::Concat { a, b, dest });
                        return Ok((dest, crate::symtab::class::CLS_STRING));
                    }
                    _ => return Err(self.err("unsupported expression in constructor field initializer")),
                };
                self.emit(Opcode::Arith { op: arith, kind, a, b, dest });
                Ok((dest, result_class))
            }
        }
    }

    /// Builds a fresh instance of `class`, evaluating `args` as the
    /// constructor call's argument expressions, then inlining its (and
    /// every ancestor's) field initializers.
    pub(super) fn emit_construct(&mut self, class: ClassId, args: &[crate::ast::ExprId], line: u32) -> RunResult<(Reg, ClassId)> {
        let ctor = self.ctors.get(&class).cloned().ok_or_else(|| {
            RunError::new(ErrorKind::SyntaxError, line, format!("class '{}' has no constructor", self.symtab.class_by_id(class).name))
        })?;
        if args.len() != ctor.params.len() {
            return Err(RunError::new(ErrorKind::SyntaxError, line, "wrong number of arguments to constructor"));
        }
        let mut env = AHashMap::new();
        for (param, arg) in ctor.params.iter().zip(args) {
            let (reg, _) = self.emit_expr(*arg)?;
            env.insert(param.clone(), reg);
        }

        let slot_count = self.total_property_count(class);
        let nil_reg = self.alloc_reg();
        self.emit(Opcode::LoadBuiltinNone { dest: nil_reg });
        let placeholder_args: SmallVec<[Reg; 4]> = std::iter::repeat(nil_reg).take(slot_count).collect();
        let inst = self.alloc_reg();
        self.emit(Opcode::NewInstance { class, args: placeholder_args, dest: inst });

        self.inline_ctor_chain(class, &ctor, &env, inst)?;
        Ok((inst, class))
    }

    fn total_property_count(&self, class: ClassId) -> usize {
        self.symtab.class_by_id(class).properties.len()
    }

    /// Runs `ctor`'s own field initializers against `inst`, then recurses
    /// into its recorded `Parent(args)` call (if any), re-binding `env` to
    /// the parent's own parameter names before inlining its initializers.
    fn inline_ctor_chain(&mut self, class: ClassId, ctor: &ClassCtor, env: &AHashMap<String, Reg>, inst: Reg) -> RunResult<()> {
        for field in &ctor.field_inits {
            let (value_reg, _) = self.eval_stored_expr(&field.init, env)?;
            self.emit(Opcode::SetProperty { base: inst, slot: field.slot, value: value_reg });
        }
        let _ = class;
        if let Some((parent_class, parent_arg_exprs)) = &ctor.parent {
            let parent_ctor = self
                .ctors
                .get(parent_class)
                .cloned()
                .ok_or_else(|| self.err(format!("class '{}' has no constructor", self.symtab.class_by_id(*parent_class).name)))?;
            let mut parent_env = AHashMap::new();
            for (param, expr) in parent_ctor.params.iter().zip(parent_arg_exprs) {
                let (reg, _) = self.eval_stored_expr(expr, env)?;
                parent_env.insert(param.clone(), reg);
            }
            self.inline_ctor_chain(*parent_class, &parent_ctor, &parent_env, inst)?;
        }
        Ok(())
    }

    pub(super) fn register_ctor(&mut self, class: ClassId, ctor: ClassCtor) {
        self.ctors.insert(class, ctor);
    }

    /// Gives every bootstrap exception class a `(string message)`
    /// constructor: the base `Exception` sets its own `message` slot,
    /// subclasses inline the same field init through the parent chain
    /// (`new ValueError("...")` has no body of its own to parse).
    pub(super) fn register_exception_ctors(&mut self) {
        let mut ids = crate::exception::all_ids().into_iter();
        let base = ids.next().expect("at least the base class");
        self.register_ctor(base, ClassCtor { params: vec!["message".to_string()], field_inits: vec![CtorField { slot: 0, init: StoredExpr::Param("message".to_string()) }], parent: None });
        for sub in ids {
            self.register_ctor(
                sub,
                ClassCtor { params: vec!["message".to_string()], field_inits: Vec::new(), parent: Some((base, vec![StoredExpr::Param("message".to_string())])) },
            );
        }
    }
}
