//! Expression parsing (precedence climbing) and expression emission
//! (spec.md §4.4 "expression-parsing state machine", §4.5 type inference).
//!
//! Static types are tracked here only down to [`ClassId`] granularity:
//! enough to pick arithmetic/comparison opcodes, check `is-a` on assignment,
//! and resolve method dispatch. Class/enum declarations parse a real
//! `[A, B]` generic parameter list (`Parser::active_generics`,
//! `parse_type`'s `generic_slot` lookup) so field, property, and method
//! signatures can reference `A`/`B` as template types. What is *not*
//! tracked is a generic argument list per expression result — method calls
//! and variant decomposition resolve against a class's declared (open)
//! generic form rather than a concrete instantiation substituted from the
//! receiver, so call-site unification across concrete argument types (the
//! `list::map[A=>B](list[A], function(A=>B))` style from spec.md §4.5) is
//! not attempted (see DESIGN.md's "Generics" entry).

use smallvec::SmallVec;

use crate::ast::{BinaryOp, ExprId, ExprKind, UnaryOp};
use crate::bytecode::{ArithOp, BitOp, CmpOp, NumKind, Opcode, Reg};
use crate::diagnostics::{ErrorKind, RunError, RunResult};
use crate::symtab::class::{self, CLS_ANY, CLS_DOUBLE, CLS_FUNCTION, CLS_INTEGER, CLS_LIST, CLS_STRING, CLS_TUPLE};
use crate::symtab::{ClassId, TypeId};
use crate::token::{Keyword, Token};
use crate::value::FunctionRef;

use super::Parser;

impl Parser {
    // ---- type syntax ---------------------------------------------------

    /// `Name`, `Name[T1, T2]`, or `function(T1, T2 => R)`.
    pub(super) fn parse_type(&mut self) -> RunResult<TypeId> {
        if self.eat(&Token::Keyword(Keyword::Self_))? {
            let (class, _) = self.cur_self().ok_or_else(|| self.err("'self' type outside a method"))?;
            return Ok(self.symtab.self_type_for_class(class));
        }
        let name = self.expect_ident()?;
        if let Some(slot) = self.generic_slot(&name) {
            return Ok(self.symtab.generic_type(slot));
        }
        if name == "function" {
            let mut subtypes = vec![self.type_of_class(CLS_ANY)];
            self.expect(Token::LParen)?;
            let mut varargs = false;
            if self.cur != Token::Arrow && self.cur != Token::RParen {
                loop {
                    if self.eat(&Token::ThreeDots)? {
                        varargs = true;
                        break;
                    }
                    subtypes.push(self.parse_type()?);
                    if !self.eat(&Token::Comma)? {
                        break;
                    }
                }
            }
            if self.eat(&Token::Arrow)? {
                subtypes[0] = self.parse_type()?;
            }
            self.expect(Token::RParen)?;
            return Ok(self.symtab.build_ensure_type(CLS_FUNCTION, varargs, subtypes, -1));
        }
        let class = self.symtab.class_by_name(&name).ok_or_else(|| self.err(format!("unknown type '{name}'")))?;
        let mut subs = Vec::new();
        if self.eat(&Token::LBracket)? {
            loop {
                subs.push(self.parse_type()?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
            self.expect(Token::RBracket)?;
        }
        Ok(self.symtab.build_ensure_type(class, false, subs, -1))
    }

    pub(super) fn cur_self(&self) -> Option<(ClassId, Reg)> {
        self.ctx.iter().rev().find_map(|c| c.self_ctx)
    }

    // ---- expression parsing --------------------------------------------

    pub(super) fn parse_expr(&mut self) -> RunResult<ExprId> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> RunResult<ExprId> {
        let left = self.parse_or()?;
        let op = match &self.cur {
            Token::Eq => Some(None),
            Token::PlusEq => Some(Some(BinaryOp::Add)),
            Token::MinusEq => Some(Some(BinaryOp::Sub)),
            Token::StarEq => Some(Some(BinaryOp::Mul)),
            Token::SlashEq => Some(Some(BinaryOp::Div)),
            Token::PercentEq => Some(Some(BinaryOp::Mod)),
            _ => None,
        };
        let Some(op) = op else { return Ok(left) };
        let line = self.cur_line;
        self.advance()?;
        let value = self.parse_assign()?;
        Ok(self.ast.alloc(ExprKind::Assign { target: left, op, value }, line))
    }

    fn parse_or(&mut self) -> RunResult<ExprId> {
        let mut left = self.parse_and()?;
        while self.cur == Token::OrOr {
            let line = self.cur_line;
            self.advance()?;
            let right = self.parse_and()?;
            left = self.ast.alloc(ExprKind::Binary { op: BinaryOp::Or, left, right }, line);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> RunResult<ExprId> {
        let mut left = self.parse_cmp()?;
        while self.cur == Token::AndAnd {
            let line = self.cur_line;
            self.advance()?;
            let right = self.parse_cmp()?;
            left = self.ast.alloc(ExprKind::Binary { op: BinaryOp::And, left, right }, line);
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> RunResult<ExprId> {
        let left = self.parse_bitor()?;
        let op = match self.cur {
            Token::EqEq => BinaryOp::Eq,
            Token::Neq => BinaryOp::Neq,
            Token::LAngle => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::RAngle => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            _ => return Ok(left),
        };
        let line = self.cur_line;
        self.advance()?;
        let right = self.parse_bitor()?;
        Ok(self.ast.alloc(ExprKind::Binary { op, left, right }, line))
    }

    fn parse_bitor(&mut self) -> RunResult<ExprId> {
        let mut left = self.parse_bitxor()?;
        while self.cur == Token::Pipe {
            let line = self.cur_line;
            self.advance()?;
            let right = self.parse_bitxor()?;
            left = self.ast.alloc(ExprKind::Binary { op: BinaryOp::BitOr, left, right }, line);
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> RunResult<ExprId> {
        let mut left = self.parse_bitand()?;
        while self.cur == Token::Caret {
            let line = self.cur_line;
            self.advance()?;
            let right = self.parse_bitand()?;
            left = self.ast.alloc(ExprKind::Binary { op: BinaryOp::BitXor, left, right }, line);
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> RunResult<ExprId> {
        let mut left = self.parse_shift()?;
        while self.cur == Token::Amp {
            let line = self.cur_line;
            self.advance()?;
            let right = self.parse_shift()?;
            left = self.ast.alloc(ExprKind::Binary { op: BinaryOp::BitAnd, left, right }, line);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> RunResult<ExprId> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.cur {
                Token::Shl => BinaryOp::Shl,
                Token::Shr => BinaryOp::Shr,
                _ => break,
            };
            let line = self.cur_line;
            self.advance()?;
            let right = self.parse_additive()?;
            left = self.ast.alloc(ExprKind::Binary { op, left, right }, line);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> RunResult<ExprId> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.cur {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            let line = self.cur_line;
            self.advance()?;
            let right = self.parse_mul()?;
            left = self.ast.alloc(ExprKind::Binary { op, left, right }, line);
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> RunResult<ExprId> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.cur {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            let line = self.cur_line;
            self.advance()?;
            let right = self.parse_unary()?;
            left = self.ast.alloc(ExprKind::Binary { op, left, right }, line);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> RunResult<ExprId> {
        let line = self.cur_line;
        let op = match self.cur {
            Token::Minus => Some(UnaryOp::Neg),
            Token::Not => Some(UnaryOp::Not),
            Token::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance()?;
            let value = self.parse_unary()?;
            return Ok(self.ast.alloc(ExprKind::Unary { op, value }, line));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> RunResult<ExprId> {
        let mut expr = self.parse_primary()?;
        loop {
            let line = self.cur_line;
            match &self.cur {
                Token::LParen => {
                    self.advance()?;
                    let mut args = Vec::new();
                    if self.cur != Token::RParen {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma)? {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    expr = self.ast.alloc(ExprKind::Call { callee: expr, args }, line);
                }
                Token::LBracket => {
                    self.advance()?;
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    expr = self.ast.alloc(ExprKind::Subscript { base: expr, index }, line);
                }
                Token::Dot => {
                    self.advance()?;
                    let name = self.expect_ident()?;
                    expr = self.ast.alloc(ExprKind::OoAccess { value: expr, name }, line);
                }
                Token::TypecastParenth => {
                    self.advance()?;
                    let target = self.expect_ident()?;
                    self.expect(Token::RParen)?;
                    expr = self.ast.alloc(ExprKind::Typecast { value: expr, target }, line);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> RunResult<ExprId> {
        let line = self.cur_line;
        match std::mem::replace(&mut self.cur, Token::FinalEof) {
            Token::Integer(v) => {
                self.advance()?;
                Ok(self.ast.alloc(ExprKind::Integer(v), line))
            }
            Token::Double(v) => {
                self.advance()?;
                Ok(self.ast.alloc(ExprKind::Double(v), line))
            }
            Token::String(s) => {
                self.advance()?;
                Ok(self.ast.alloc(ExprKind::Str(s), line))
            }
            Token::Keyword(Keyword::True) => {
                self.advance()?;
                Ok(self.ast.alloc(ExprKind::Integer(1), line))
            }
            Token::Keyword(Keyword::False) => {
                self.advance()?;
                Ok(self.ast.alloc(ExprKind::Integer(0), line))
            }
            Token::Keyword(Keyword::Self_) => {
                self.advance()?;
                Ok(self.ast.alloc(ExprKind::Ident("self".to_string()), line))
            }
            Token::Identifier(name) => {
                self.advance()?;
                if self.cur == Token::ColonColon {
                    self.advance()?;
                    let member = self.expect_ident()?;
                    Ok(self.ast.alloc(ExprKind::Package { package: name, name: member }, line))
                } else if self.cur == Token::LParen && name.chars().next().is_some_and(|c| c.is_uppercase()) {
                    // `Variant(args...)`: only bare uppercase identifiers are
                    // ever enum variant constructors in this grammar.
                    self.advance()?;
                    let mut args = Vec::new();
                    if self.cur != Token::RParen {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma)? {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    Ok(self.ast.alloc(ExprKind::Variant { name, args }, line))
                } else {
                    Ok(self.ast.alloc(ExprKind::Ident(name), line))
                }
            }
            Token::LParen => {
                self.advance()?;
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(self.ast.alloc(ExprKind::Parenth(inner), line))
            }
            Token::LBracket => {
                self.advance()?;
                let mut items = Vec::new();
                let mut is_hash = false;
                let mut hash_pairs = Vec::new();
                if self.cur != Token::RBracket {
                    loop {
                        let first = self.parse_expr()?;
                        if self.cur == Token::Arrow {
                            is_hash = true;
                            self.advance()?;
                            let val = self.parse_expr()?;
                            hash_pairs.push((first, val));
                        } else {
                            items.push(first);
                        }
                        if !self.eat(&Token::Comma)? {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket)?;
                if is_hash {
                    Ok(self.ast.alloc(ExprKind::Hash(hash_pairs), line))
                } else {
                    Ok(self.ast.alloc(ExprKind::List(items), line))
                }
            }
            Token::TupleOpen => {
                self.advance()?;
                let mut items = Vec::new();
                if self.cur != Token::TupleClose {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma)? {
                            break;
                        }
                    }
                }
                self.expect(Token::TupleClose)?;
                Ok(self.ast.alloc(ExprKind::Tuple(items), line))
            }
            Token::Lambda { params, raw_body } => {
                self.advance()?;
                Ok(self.ast.alloc(ExprKind::Lambda { params, raw_body }, line))
            }
            other => {
                self.cur = other;
                Err(self.err(format!("unexpected token in expression: {:?}", self.cur)))
            }
        }
    }

    // ---- expression emission --------------------------------------------

    /// Walks one AST node, emitting bytecode that leaves its value in a
    /// fresh register, and returns that register plus the value's static
    /// class.
    pub(super) fn emit_expr(&mut self, id: crate::ast::ExprId) -> RunResult<(Reg, ClassId)> {
        let line = self.ast.get(id).line;
        match self.ast.get(id).kind.clone() {
            ExprKind::Integer(v) => {
                let lit = self.symtab.get_integer_literal(v);
                let dest = self.alloc_reg();
                self.emit(Opcode::LoadInteger { lit, dest });
                Ok((dest, CLS_INTEGER))
            }
            ExprKind::Double(v) => {
                let lit = self.symtab.get_double_literal(v);
                let dest = self.alloc_reg();
                self.emit(Opcode::LoadDouble { lit, dest });
                Ok((dest, CLS_DOUBLE))
            }
            ExprKind::Str(s) => {
                let lit = self.string_literal(s);
                let dest = self.alloc_reg();
                self.emit(Opcode::LoadString { lit, dest });
                Ok((dest, CLS_STRING))
            }
            ExprKind::Ident(name) => self.emit_ident(&name, line),
            ExprKind::Package { package, name } => self.emit_package_access(&package, &name, line),
            ExprKind::Unary { op, value } => self.emit_unary(op, value, line),
            ExprKind::Binary { op, left, right } => self.emit_binary(op, left, right, line),
            ExprKind::Assign { target, op, value } => self.emit_assign(target, op, value, line),
            ExprKind::Parenth(inner) => self.emit_expr(inner),
            ExprKind::Call { callee, args } => self.emit_call(callee, &args, line),
            ExprKind::Subscript { base, index } => self.emit_subscript_get(base, index, line),
            ExprKind::List(items) => self.emit_list(&items, line),
            ExprKind::Hash(pairs) => self.emit_hash(&pairs, line),
            ExprKind::Tuple(items) => self.emit_tuple(&items, line),
            ExprKind::Typecast { value, target } => self.emit_typecast(value, &target, line),
            ExprKind::OoAccess { value, name } => self.emit_oo_access(value, &name, line),
            ExprKind::Variant { name, args } => self.emit_variant_literal(&name, &args, line),
            ExprKind::Lambda { params, raw_body } => self.emit_lambda(&params, &raw_body, line),
        }
    }

    fn emit_ident(&mut self, name: &str, line: u32) -> RunResult<(Reg, ClassId)> {
        if name == "self" {
            let (class, reg) = self.cur_self().ok_or_else(|| self.err("'self' used outside a method"))?;
            let dest = self.alloc_reg();
            self.emit(Opcode::LoadLocal { src: reg, dest });
            return Ok((dest, class));
        }
        let var_id = self.resolve_name(name).ok_or_else(|| self.err(format!("undeclared variable '{name}'")))?;
        let var = self.symtab.var(var_id).clone();
        let dest = self.alloc_reg();
        if var.flags.has(crate::symtab::VarFlags::READONLY) {
            self.emit(Opcode::LoadReadonly { var: var_id, dest });
        } else if var.is_global() {
            self.emit(Opcode::LoadGlobal { global: var_id, dest });
        } else {
            self.emit(Opcode::LoadLocal { src: Reg(var.reg_spot), dest });
        }
        Ok((dest, self.symtab.get(var.ty).class))
    }

    /// Only `sys::argv` is a recognized package member; its value is known
    /// entirely at compile time (the interpreter's own command-line tail).
    fn emit_package_access(&mut self, package: &str, name: &str, line: u32) -> RunResult<(Reg, ClassId)> {
        if package != "sys" || name != "argv" {
            return Err(RunError::new(ErrorKind::SyntaxError, line, format!("unknown package member '{package}::{name}'")));
        }
        let argv = self.argv.clone();
        let mut items = SmallVec::<[Reg; 4]>::new();
        for a in argv {
            let lit = self.string_literal(a);
            let reg = self.alloc_reg();
            self.emit(Opcode::LoadString { lit, dest: reg });
            items.push(reg);
        }
        let dest = self.alloc_reg();
        self.emit(Opcode::BuildList { items, dest });
        Ok((dest, CLS_LIST))
    }

    fn emit_unary(&mut self, op: UnaryOp, value: ExprId, line: u32) -> RunResult<(Reg, ClassId)> {
        let (src, class) = self.emit_expr(value)?;
        let dest = self.alloc_reg();
        match op {
            UnaryOp::Not => {
                self.emit(Opcode::LogicalNot { src, dest });
                Ok((dest, class::CLS_INTEGER))
            }
            UnaryOp::BitNot => {
                self.expect_class(class, CLS_INTEGER, line)?;
                self.emit(Opcode::BitNot { src, dest });
                Ok((dest, CLS_INTEGER))
            }
            UnaryOp::Neg => {
                let kind = self.num_kind(class, line)?;
                self.emit(Opcode::Negate { kind, src, dest });
                Ok((dest, class))
            }
        }
    }

    fn num_kind(&self, class: ClassId, line: u32) -> RunResult<NumKind> {
        if class == CLS_INTEGER {
            Ok(NumKind::Integer)
        } else if class == CLS_DOUBLE {
            Ok(NumKind::Double)
        } else {
            Err(RunError::new(ErrorKind::SyntaxError, line, "expected a numeric value"))
        }
    }

    fn expect_class(&self, actual: ClassId, expected: ClassId, line: u32) -> RunResult<()> {
        if actual == expected || actual == CLS_ANY {
            Ok(())
        } else {
            let name = self.symtab.class_by_id(expected).name.clone();
            Err(RunError::new(ErrorKind::SyntaxError, line, format!("expected a value of type {name}")))
        }
    }

    fn emit_binary(&mut self, op: BinaryOp, left: ExprId, right: ExprId, line: u32) -> RunResult<(Reg, ClassId)> {
        match op {
            BinaryOp::And | BinaryOp::Or => return self.emit_short_circuit(op, left, right, line),
            _ => {}
        }
        let (a, class_a) = self.emit_expr(left)?;
        let (b, class_b) = self.emit_expr(right)?;
        let dest = self.alloc_reg();
        match op {
            BinaryOp::Concat => {
                self.emit(Opcode::Concat { a, b, dest });
                Ok((dest, CLS_STRING))
            }
            // `+` does double duty: numeric add, or string concatenation
            // when either side is a string (spec.md §4.5).
            BinaryOp::Add if class_a == CLS_STRING || class_b == CLS_STRING => {
                self.emit(Opcode::Concat { a, b, dest });
                Ok((dest, CLS_STRING))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let arith = match op {
                    BinaryOp::Add => ArithOp::Add,
                    BinaryOp::Sub => ArithOp::Sub,
                    BinaryOp::Mul => ArithOp::Mul,
                    BinaryOp::Div => ArithOp::Div,
                    BinaryOp::Mod => ArithOp::Mod,
                    _ => unreachable!(),
                };
                let result_class = if class_a == CLS_DOUBLE || class_b == CLS_DOUBLE { CLS_DOUBLE } else { CLS_INTEGER };
                let kind = if result_class == CLS_DOUBLE { NumKind::Double } else { NumKind::Integer };
                self.emit(Opcode::Arith { op: arith, kind, a, b, dest });
                Ok((dest, result_class))
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr => {
                self.expect_class(class_a, CLS_INTEGER, line)?;
                self.expect_class(class_b, CLS_INTEGER, line)?;
                let bit = match op {
                    BinaryOp::BitAnd => BitOp::And,
                    BinaryOp::BitOr => BitOp::Or,
                    BinaryOp::BitXor => BitOp::Xor,
                    BinaryOp::Shl => BitOp::Shl,
                    BinaryOp::Shr => BitOp::Shr,
                    _ => unreachable!(),
                };
                self.emit(Opcode::Bitwise { op: bit, a, b, dest });
                Ok((dest, CLS_INTEGER))
            }
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let cmp = match op {
                    BinaryOp::Eq => CmpOp::Eq,
                    BinaryOp::Neq => CmpOp::Neq,
                    BinaryOp::Lt => CmpOp::Lt,
                    BinaryOp::Le => CmpOp::Le,
                    BinaryOp::Gt => CmpOp::Gt,
                    BinaryOp::Ge => CmpOp::Ge,
                    _ => unreachable!(),
                };
                self.emit(Opcode::Compare { op: cmp, a, b, dest });
                Ok((dest, CLS_INTEGER))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    /// `&&`/`||` short-circuit: the right side is only evaluated, and its
    /// register only live, when the left side didn't already decide it.
    fn emit_short_circuit(&mut self, op: BinaryOp, left: ExprId, right: ExprId, line: u32) -> RunResult<(Reg, ClassId)> {
        let (a, _) = self.emit_expr(left)?;
        let dest = self.alloc_reg();
        self.emit(Opcode::AssignLocal { src: a, dest });
        let skip = if op == BinaryOp::And {
            self.emit(Opcode::JumpIfFalse { cond: dest, target: crate::bytecode::CodePos(0) })
        } else {
            self.emit(Opcode::JumpIfTrue { cond: dest, target: crate::bytecode::CodePos(0) })
        };
        let (b, _) = self.emit_expr(right)?;
        self.emit(Opcode::AssignLocal { src: b, dest });
        let here = self.here();
        self.cur_builder_mut().patch_jump(skip, here);
        let _ = line;
        Ok((dest, CLS_INTEGER))
    }

    fn emit_assign(&mut self, target: ExprId, op: Option<BinaryOp>, value: ExprId, line: u32) -> RunResult<(Reg, ClassId)> {
        let rhs_id = if let Some(op) = op { self.ast.alloc(ExprKind::Binary { op, left: target, right: value }, line) } else { value };
        match self.ast.get(target).kind.clone() {
            ExprKind::Ident(name) => {
                let var_id = self.resolve_name(&name).ok_or_else(|| self.err(format!("undeclared variable '{name}'")))?;
                let var = self.symtab.var(var_id).clone();
                let (src, class) = self.emit_expr(rhs_id)?;
                if var.is_global() {
                    self.emit(Opcode::AssignGlobal { src, global: var_id });
                } else {
                    self.emit(Opcode::AssignLocal { src, dest: Reg(var.reg_spot) });
                }
                Ok((src, class))
            }
            ExprKind::Subscript { base, index } => {
                let (base_reg, _) = self.emit_expr(base)?;
                let (index_reg, _) = self.emit_expr(index)?;
                let (value_reg, class) = self.emit_expr(rhs_id)?;
                self.emit(Opcode::SubscriptSet { base: base_reg, index: index_reg, value: value_reg });
                Ok((value_reg, class))
            }
            ExprKind::OoAccess { value: base, name } => {
                let (base_reg, base_class) = self.emit_expr(base)?;
                let slot = self
                    .symtab
                    .find_property(base_class, &name)
                    .map(|p| p.slot)
                    .ok_or_else(|| self.err(format!("class has no property '{name}'")))?;
                let (value_reg, class) = self.emit_expr(rhs_id)?;
                self.emit(Opcode::SetProperty { base: base_reg, slot, value: value_reg });
                Ok((value_reg, class))
            }
            _ => Err(self.err("invalid assignment target")),
        }
    }

    fn emit_call(&mut self, callee: ExprId, args: &[ExprId], line: u32) -> RunResult<(Reg, ClassId)> {
        // `show(expr)`: the single builtin free function, called by name.
        if let ExprKind::Ident(name) = &self.ast.get(callee).kind {
            if name == "show" && args.len() == 1 && self.resolve_name(name).is_none() {
                let (src, _) = self.emit_expr(args[0])?;
                self.emit(Opcode::Show { src });
                let dest = self.alloc_reg();
                self.emit(Opcode::LoadBuiltinNone { dest });
                return Ok((dest, CLS_ANY));
            }
        }
        // `ClassName::new(args...)`: direct construction via the class's
        // registered constructor, not a value-producing callee expression.
        if let ExprKind::Package { package, name } = &self.ast.get(callee).kind {
            if name == "new" {
                let package = package.clone();
                let class = self
                    .symtab
                    .class_by_name(&package)
                    .filter(|c| c.index() >= 20)
                    .ok_or_else(|| self.err(format!("'{package}' is not a constructible class")))?;
                return self.emit_construct(class, args, line);
            }
        }
        // `expr.method(args...)`: static (compile-time class) method
        // dispatch — resolved once here rather than through a runtime
        // vtable, since the language has no virtual override story tested
        // by this implementation (see DESIGN.md).
        if let ExprKind::OoAccess { value, name } = self.ast.get(callee).kind.clone() {
            let (base_reg, base_class) = self.emit_expr(value)?;
            if let Some(prop) = self.symtab.find_property(base_class, &name) {
                let slot = prop.slot;
                let fn_reg = self.alloc_reg();
                self.emit(Opcode::GetProperty { base: base_reg, slot, dest: fn_reg });
                let mut arg_regs = SmallVec::<[Reg; 4]>::new();
                for a in args {
                    let (r, _) = self.emit_expr(*a)?;
                    arg_regs.push(r);
                }
                let dest = self.alloc_reg();
                self.emit(Opcode::CallNative { callee: fn_reg, args: arg_regs, dest: Some(dest) });
                return Ok((dest, CLS_ANY));
            }
            let callable = self
                .symtab
                .find_class_callable(base_class, &name)
                .cloned()
                .ok_or_else(|| self.err(format!("class has no property or method '{name}'")))?;
            let crate::symtab::Callable::Method { function, .. } = callable else {
                return Err(self.err(format!("'{name}' is not callable from script code")));
            };
            let callee_reg = self.emit_function_value(function);
            let mut arg_regs = SmallVec::<[Reg; 4]>::new();
            arg_regs.push(base_reg);
            for a in args {
                let (r, _) = self.emit_expr(*a)?;
                arg_regs.push(r);
            }
            let dest = self.alloc_reg();
            self.emit(Opcode::CallNative { callee: callee_reg, args: arg_regs, dest: Some(dest) });
            return Ok((dest, CLS_ANY));
        }
        let (callee_reg, callee_class) = self.emit_expr(callee)?;
        self.expect_class(callee_class, CLS_FUNCTION, line)?;
        let mut arg_regs = SmallVec::<[Reg; 4]>::new();
        for a in args {
            let (r, _) = self.emit_expr(*a)?;
            arg_regs.push(r);
        }
        let dest = self.alloc_reg();
        self.emit(Opcode::CallNative { callee: callee_reg, args: arg_regs, dest: Some(dest) });
        Ok((dest, CLS_ANY))
    }

    fn emit_subscript_get(&mut self, base: ExprId, index: ExprId, line: u32) -> RunResult<(Reg, ClassId)> {
        let (base_reg, base_class) = self.emit_expr(base)?;
        let (index_reg, _) = self.emit_expr(index)?;
        let dest = self.alloc_reg();
        self.emit(Opcode::SubscriptGet { base: base_reg, index: index_reg, dest });
        let elem_class = self.element_class(base_class);
        let _ = line;
        Ok((dest, elem_class))
    }

    fn element_class(&self, _base_class: ClassId) -> ClassId {
        CLS_ANY
    }

    fn emit_list(&mut self, items: &[ExprId], _line: u32) -> RunResult<(Reg, ClassId)> {
        let mut regs = SmallVec::<[Reg; 4]>::new();
        for it in items {
            let (r, _) = self.emit_expr(*it)?;
            regs.push(r);
        }
        let dest = self.alloc_reg();
        self.emit(Opcode::BuildList { items: regs, dest });
        Ok((dest, CLS_LIST))
    }

    fn emit_hash(&mut self, pairs: &[(ExprId, ExprId)], _line: u32) -> RunResult<(Reg, ClassId)> {
        let mut regs = SmallVec::<[(Reg, Reg); 4]>::new();
        for (k, v) in pairs {
            let (kr, _) = self.emit_expr(*k)?;
            let (vr, _) = self.emit_expr(*v)?;
            regs.push((kr, vr));
        }
        let dest = self.alloc_reg();
        self.emit(Opcode::BuildHash { pairs: regs, dest });
        Ok((dest, class::CLS_HASH))
    }

    fn emit_tuple(&mut self, items: &[ExprId], _line: u32) -> RunResult<(Reg, ClassId)> {
        let mut regs = SmallVec::<[Reg; 4]>::new();
        for it in items {
            let (r, _) = self.emit_expr(*it)?;
            regs.push(r);
        }
        let dest = self.alloc_reg();
        self.emit(Opcode::BuildTuple { items: regs, dest });
        Ok((dest, CLS_TUPLE))
    }

    fn emit_typecast(&mut self, value: ExprId, target: &str, line: u32) -> RunResult<(Reg, ClassId)> {
        let (src, src_class) = self.emit_expr(value)?;
        let target_class = self.symtab.class_by_name(target).ok_or_else(|| self.err(format!("unknown type '{target}'")))?;
        let dest = self.alloc_reg();
        if src_class == CLS_ANY {
            self.emit(Opcode::UnwrapAny { src, dest, target: target_class, line });
        } else {
            self.emit(Opcode::WrapAny { src, dest });
        }
        Ok((dest, target_class))
    }

    /// `expr.name`: a zero-arg property read, or (followed immediately by a
    /// call) a method invocation — `parse_postfix` only ever emits the bare
    /// `OoAccess` node; a trailing `(...)` becomes a `Call` whose callee is
    /// this `OoAccess`, which `emit_call` special-cases below.
    fn emit_oo_access(&mut self, value: ExprId, name: &str, line: u32) -> RunResult<(Reg, ClassId)> {
        let (base_reg, base_class) = self.emit_expr(value)?;
        if let Some(prop) = self.symtab.find_property(base_class, name) {
            let (slot, ty) = (prop.slot, prop.ty);
            let dest = self.alloc_reg();
            self.emit(Opcode::GetProperty { base: base_reg, slot, dest });
            return Ok((dest, self.symtab.get(ty).class));
        }
        Err(RunError::new(ErrorKind::SyntaxError, line, format!("class has no property or method '{name}'")))
    }

    fn emit_variant_literal(&mut self, name: &str, args: &[ExprId], line: u32) -> RunResult<(Reg, ClassId)> {
        let variant = self.symtab.class_by_name(name).filter(|c| self.symtab.class_by_id(*c).is_variant()).ok_or_else(|| {
            RunError::new(ErrorKind::SyntaxError, line, format!("'{name}' is not an enum variant"))
        })?;
        let mut regs = SmallVec::<[Reg; 4]>::new();
        for a in args {
            let (r, _) = self.emit_expr(*a)?;
            regs.push(r);
        }
        let enum_class = self.symtab.class_by_id(variant).parent.expect("variant always has an enum parent");
        let dest = self.alloc_reg();
        self.emit(Opcode::BuildVariant { class: variant, args: regs, dest });
        Ok((dest, enum_class))
    }

    /// Lambdas get a reduced treatment (spec.md §9, DESIGN.md): parameters
    /// are untyped (`any`), and the body is compiled immediately by
    /// re-entering the lexer over the raw captured text rather than being
    /// deferred until a call-site type is known.
    fn emit_lambda(&mut self, params: &[String], raw_body: &str, line: u32) -> RunResult<(Reg, ClassId)> {
        self.lambda_counter += 1;
        let name = format!("<lambda#{}>", self.lambda_counter);
        let any_ty = self.type_of_class(CLS_ANY);
        let mut subtypes = vec![any_ty];
        subtypes.extend(std::iter::repeat(any_ty).take(params.len()));
        let fn_ty = self.symtab.build_ensure_type(CLS_FUNCTION, false, subtypes, -1);

        let params = params.to_vec();
        let body_src = raw_body.to_string();
        let func_id = self.compile_function(name, fn_ty, None, false, false, move |p| {
            for param in &params {
                p.declare_local(param.clone(), any_ty)?;
            }
            p.lexer.push_source(body_src.clone(), "<lambda>");
            let saved = std::mem::replace(&mut p.cur, Token::FinalEof);
            let saved_line = p.cur_line;
            p.cur_line = p.lexer.current_line();
            p.cur = p.lexer.next_token()?;
            loop {
                if matches!(p.cur, Token::InnerEof) {
                    p.advance()?;
                    break;
                }
                if matches!(p.cur, Token::FinalEof) {
                    break;
                }
                p.parse_stmt_in_block()?;
            }
            p.cur = saved;
            p.cur_line = saved_line;
            p.emit(Opcode::ReturnVoid);
            Ok(())
        })?;
        let dest = self.emit_function_value(func_id);
        let _ = line;
        Ok((dest, CLS_FUNCTION))
    }
}
