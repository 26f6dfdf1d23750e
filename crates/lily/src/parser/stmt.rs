//! Statement parsing: declarations and control flow (spec.md §4.4).
//!
//! Control-flow headers use `header : body`, where `body` is either one
//! statement or a `{ ... }` block (spec.md §8's `for i in 0..2: show(...)`
//! and the negative scenario `if 1: }`, which is a syntax error precisely
//! because `}` alone is neither). `class`/`enum`/`define` bodies are bare
//! `{ ... }` blocks with no leading colon.

use crate::bytecode::{CatchArm, CodePos, MatchArm, Opcode, Reg};
use crate::diagnostics::{ErrorKind, RunError, RunResult};
use crate::symtab::class::{CLS_ANY, CLS_DOUBLE, CLS_INTEGER, CLS_LIST, CLS_STRING};
use crate::symtab::{ClassFlags, ClassId, TypeFlags, TypeId};
use crate::token::{Keyword, Token};

use super::ctor::{ClassCtor, CtorField, StoredExpr};
use super::{Block, BlockKind, Parser};

impl Parser {
    pub(super) fn parse_top_level_stmt(&mut self) -> RunResult<()> {
        match self.cur {
            Token::Keyword(Keyword::Class) => self.parse_class_decl(),
            Token::Keyword(Keyword::Enum) => self.parse_enum_decl(),
            Token::Keyword(Keyword::Define) => {
                let (name, func_id) = self.parse_define(None)?;
                let reg = self.emit_function_value(func_id);
                let ty = self.functions[func_id.0 as usize].ty;
                let var_id = self.declare_global(name, ty)?;
                self.emit(Opcode::AssignGlobal { src: reg, global: var_id });
                Ok(())
            }
            _ => self.parse_stmt_in_block(),
        }
    }

    /// One statement inside a function body (also used for the top-level
    /// program outside class/enum/define declarations).
    pub(super) fn parse_stmt_in_block(&mut self) -> RunResult<()> {
        if !matches!(self.cur, Token::LBrace | Token::Keyword(_)) && self.starts_typed_decl()? {
            return self.parse_typed_var_decl();
        }
        match &self.cur {
            Token::LBrace => {
                self.advance()?;
                while self.cur != Token::RBrace {
                    self.parse_stmt_in_block()?;
                }
                self.advance()
            }
            Token::Keyword(Keyword::Var) => self.parse_var_decl_keyword(),
            Token::Keyword(Keyword::If) => self.parse_if(),
            Token::Keyword(Keyword::While) => self.parse_while(),
            Token::Keyword(Keyword::Do) => self.parse_do_while(),
            Token::Keyword(Keyword::For) => self.parse_for(),
            Token::Keyword(Keyword::Try) => self.parse_try(),
            Token::Keyword(Keyword::Match) => self.parse_match(),
            Token::Keyword(Keyword::Break) => self.parse_break(),
            Token::Keyword(Keyword::Continue) => self.parse_continue(),
            Token::Keyword(Keyword::Return) => self.parse_return(),
            Token::Keyword(Keyword::Raise) => self.parse_raise(),
            _ => self.parse_expr_stmt(),
        }
    }

    /// `Type name = expr` vs. a bare expression statement both start with
    /// an identifier; a known class name immediately followed by *another*
    /// identifier disambiguates the declaration (spec.md §4.4).
    fn starts_typed_decl(&mut self) -> RunResult<bool> {
        let Token::Identifier(name) = &self.cur else {
            return Ok(false);
        };
        if self.symtab.class_by_name(name).is_none() {
            return Ok(false);
        }
        match self.peek()? {
            Token::Identifier(_) => Ok(true),
            Token::LBracket => self.looks_like_generic_decl(),
            _ => Ok(false),
        }
    }

    /// `Name[...] ident`: `peek()` only sees one token past `Name`, which
    /// lands inside the bracketed generic argument list (e.g.
    /// `list[integer] xs`). Scans a cloned lexer forward past the balanced
    /// `[...]` to see what follows, without moving the parser's real
    /// position — `self.peek()` has already consumed the opening `[` into
    /// `self.peeked`, so the clone starts one bracket level deep.
    fn looks_like_generic_decl(&mut self) -> RunResult<bool> {
        let mut lexer = self.lexer.clone();
        let mut depth = 1i32;
        loop {
            match lexer.next_token()? {
                Token::LBracket => depth += 1,
                Token::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Token::FinalEof | Token::InnerEof => return Ok(false),
                _ => {}
            }
        }
        Ok(matches!(lexer.next_token()?, Token::Identifier(_)))
    }

    // ---- body / block helpers -------------------------------------------

    /// `: body`, where `body` is one statement or a brace-delimited list
    /// (both handled uniformly by `parse_stmt_in_block`'s `LBrace` arm).
    fn parse_body(&mut self) -> RunResult<()> {
        self.expect(Token::Colon)?;
        self.parse_stmt_in_block()
    }

    fn parse_brace_block(&mut self) -> RunResult<()> {
        self.expect(Token::LBrace)?;
        while self.cur != Token::RBrace {
            self.parse_stmt_in_block()?;
        }
        self.advance()
    }

    fn eat_keyword(&mut self, kw: Keyword) -> RunResult<bool> {
        if self.cur == Token::Keyword(kw) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ---- var declarations -------------------------------------------------

    fn parse_var_decl_keyword(&mut self) -> RunResult<()> {
        self.advance()?;
        let name = self.expect_ident()?;
        self.expect(Token::Eq)?;
        let value = self.parse_expr()?;
        let (reg, class) = self.emit_expr(value)?;
        let ty = self.type_of_class(class);
        self.declare_and_bind(name, ty, reg)
    }

    fn parse_typed_var_decl(&mut self) -> RunResult<()> {
        let ty = self.parse_type()?;
        loop {
            let name = self.expect_ident()?;
            self.expect(Token::Eq)?;
            let line = self.cur_line;
            let value = self.parse_expr()?;
            let list_literal = self.list_literal_items(value);
            let (reg, actual) = self.emit_expr(value)?;
            self.check_assignable(ty, actual, line)?;
            if let Some(items) = list_literal {
                self.check_list_literal_assignable(ty, &items, line)?;
            }
            self.declare_and_bind(name, ty, reg)?;
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        Ok(())
    }

    /// Extracts a list literal's item ids without emitting anything, so the
    /// caller can inspect them for a subtype check before (and regardless
    /// of) emission.
    fn list_literal_items(&self, id: crate::ast::ExprId) -> Option<Vec<crate::ast::ExprId>> {
        match &self.ast.get(id).kind {
            crate::ast::ExprKind::List(items) => Some(items.clone()),
            _ => None,
        }
    }

    /// Catches spec.md §8's negative scenario 4 for the literal case: a
    /// `list[T]`-typed declaration whose literal items are statically
    /// known (integer/double/string constants) but don't match `T`. Only
    /// handles items simple enough to classify without emitting them
    /// twice — anything else is left to `check_assignable`'s class-level
    /// check, per the "Generics" entry's documented limitation.
    fn check_list_literal_assignable(&mut self, expected: TypeId, items: &[crate::ast::ExprId], line: u32) -> RunResult<()> {
        let expected_type = self.symtab.get(expected).clone();
        if expected_type.class != CLS_LIST {
            return Ok(());
        }
        let Some(&elem_ty) = expected_type.subtypes.first() else { return Ok(()) };
        let elem_class = self.symtab.get(elem_ty).class;
        if elem_class == CLS_ANY {
            return Ok(());
        }
        for &item in items {
            let item_class = match &self.ast.get(item).kind {
                crate::ast::ExprKind::Integer(_) => CLS_INTEGER,
                crate::ast::ExprKind::Double(_) => CLS_DOUBLE,
                crate::ast::ExprKind::Str(_) => CLS_STRING,
                _ => continue,
            };
            if item_class != elem_class {
                let mut msg = crate::diagnostics::MsgBuf::new();
                let item_ty = self.type_of_class(item_class);
                msg.add_fmt(
                    "cannot assign a value of type %T to a list of type %T",
                    &[
                        crate::diagnostics::FmtArg::Type(&crate::diagnostics::DisplayType { symtab: &self.symtab, ty: item_ty }),
                        crate::diagnostics::FmtArg::Type(&crate::diagnostics::DisplayType { symtab: &self.symtab, ty: expected }),
                    ],
                );
                return Err(RunError::new(ErrorKind::SyntaxError, line, msg.into_string()));
            }
        }
        Ok(())
    }

    /// Spec.md §4.5's assignment rule, down to class granularity: `actual`
    /// must equal `expected`'s class, widen to `any`, or upcast to one of
    /// its ancestors. Generic subtype mismatches (`list[integer]` passed
    /// where `list[string]` is expected) aren't caught here — expressions
    /// are only tracked down to `ClassId`, not a full `TypeId` with
    /// concrete subtypes (see DESIGN.md's "Generics" entry) — so this
    /// covers spec.md §8's class-level mismatches, not its subtype one.
    fn check_assignable(&mut self, expected: TypeId, actual: ClassId, line: u32) -> RunResult<()> {
        let expected_class = self.symtab.get(expected).class;
        if expected_class == CLS_ANY {
            return Ok(());
        }
        let mut cur = Some(actual);
        while let Some(c) = cur {
            if c == expected_class {
                return Ok(());
            }
            cur = self.symtab.class_by_id(c).parent;
        }
        let actual_ty = self.type_of_class(actual);
        let mut msg = crate::diagnostics::MsgBuf::new();
        msg.add_fmt(
            "cannot assign a value of type %T to a variable of type %T",
            &[
                crate::diagnostics::FmtArg::Type(&crate::diagnostics::DisplayType { symtab: &self.symtab, ty: actual_ty }),
                crate::diagnostics::FmtArg::Type(&crate::diagnostics::DisplayType { symtab: &self.symtab, ty: expected }),
            ],
        );
        Err(RunError::new(ErrorKind::SyntaxError, line, msg.into_string()))
    }

    fn declare_and_bind(&mut self, name: String, ty: TypeId, src: Reg) -> RunResult<()> {
        if self.ctx.len() == 1 {
            let var_id = self.declare_global(name, ty)?;
            self.emit(Opcode::AssignGlobal { src, global: var_id });
        } else {
            let (_, dest) = self.declare_local(name, ty)?;
            self.emit(Opcode::AssignLocal { src, dest });
        }
        Ok(())
    }

    fn parse_expr_stmt(&mut self) -> RunResult<()> {
        let expr = self.parse_expr()?;
        self.emit_expr(expr)?;
        Ok(())
    }

    // ---- if / elif / else --------------------------------------------------

    fn parse_if(&mut self) -> RunResult<()> {
        self.advance()?;
        let mut end_patches = Vec::new();
        let cond = self.parse_expr()?;
        let (cond_reg, _) = self.emit_expr(cond)?;
        let mut jf = self.emit(Opcode::JumpIfFalse { cond: cond_reg, target: CodePos(0) });
        self.parse_body()?;
        loop {
            if self.eat_keyword(Keyword::Elif)? {
                end_patches.push(self.emit(Opcode::Jump { target: CodePos(0) }));
                self.patch_jump_here(jf);
                let cond = self.parse_expr()?;
                let (cond_reg, _) = self.emit_expr(cond)?;
                jf = self.emit(Opcode::JumpIfFalse { cond: cond_reg, target: CodePos(0) });
                self.parse_body()?;
            } else if self.eat_keyword(Keyword::Else)? {
                end_patches.push(self.emit(Opcode::Jump { target: CodePos(0) }));
                self.patch_jump_here(jf);
                self.parse_body()?;
                break;
            } else {
                self.patch_jump_here(jf);
                break;
            }
        }
        for p in end_patches {
            self.patch_jump_here(p);
        }
        Ok(())
    }

    fn patch_jump_here(&mut self, pos: u32) {
        self.cur_builder_mut().patch_jump_here(pos);
    }

    // ---- loops -------------------------------------------------------------

    fn push_loop_block(&mut self, continue_target: Option<u32>) {
        self.cur_ctx_mut().blocks.push(Block { kind: BlockKind::Loop, end_patches: Vec::new(), continue_patches: Vec::new(), continue_target });
    }

    fn pop_loop_block(&mut self, end: u32) {
        let block = self.cur_ctx_mut().blocks.pop().expect("matching push_loop_block");
        let target = block.continue_target.unwrap_or(end);
        for p in block.continue_patches {
            self.cur_builder_mut().patch_jump(p, target);
        }
        for p in block.end_patches {
            self.cur_builder_mut().patch_jump(p, end);
        }
    }

    fn innermost_loop_present(&self) -> bool {
        self.cur_ctx().blocks.iter().any(|b| b.kind == BlockKind::Loop)
    }

    fn parse_while(&mut self) -> RunResult<()> {
        self.advance()?;
        let loop_start = self.here();
        let cond = self.parse_expr()?;
        let (cond_reg, _) = self.emit_expr(cond)?;
        let jf = self.emit(Opcode::JumpIfFalse { cond: cond_reg, target: CodePos(0) });
        self.push_loop_block(Some(loop_start));
        self.parse_body()?;
        self.emit(Opcode::Jump { target: CodePos(loop_start) });
        let end = self.here();
        self.cur_builder_mut().patch_jump(jf, end);
        self.pop_loop_block(end);
        Ok(())
    }

    fn parse_do_while(&mut self) -> RunResult<()> {
        self.advance()?;
        let loop_start = self.here();
        self.push_loop_block(None);
        self.parse_body()?;
        self.expect_keyword(Keyword::While)?;
        let cond_pos = self.here();
        self.cur_ctx_mut().blocks.last_mut().expect("just pushed").continue_target = Some(cond_pos);
        let cond = self.parse_expr()?;
        let (cond_reg, _) = self.emit_expr(cond)?;
        self.emit(Opcode::JumpIfTrue { cond: cond_reg, target: CodePos(loop_start) });
        let end = self.here();
        self.pop_loop_block(end);
        Ok(())
    }

    /// `for name in start..stop: body`. A guard skips the loop entirely
    /// when `start > stop`, since `ForIntegerStep` otherwise runs its body
    /// once unconditionally before its first range check (a do-while
    /// shape) — see DESIGN.md.
    fn parse_for(&mut self) -> RunResult<()> {
        self.advance()?;
        let name = self.expect_ident()?;
        self.expect_keyword(Keyword::In)?;
        let start_expr = self.parse_expr()?;
        let (start_reg, _) = self.emit_expr(start_expr)?;
        self.expect(Token::Range)?;
        let stop_expr = self.parse_expr()?;
        let (stop_reg, _) = self.emit_expr(stop_expr)?;
        let step_reg = self.alloc_reg();
        let one = self.symtab.get_integer_literal(1);
        self.emit(Opcode::LoadInteger { lit: one, dest: step_reg });

        let int_ty = self.type_of_class(CLS_INTEGER);
        let (_, var_reg) = self.declare_local(name, int_ty)?;

        let guard_reg = self.alloc_reg();
        self.emit(Opcode::Compare { op: crate::bytecode::CmpOp::Gt, a: start_reg, b: stop_reg, dest: guard_reg });
        let skip = self.emit(Opcode::JumpIfTrue { cond: guard_reg, target: CodePos(0) });

        self.emit(Opcode::ForIntegerSetup { var: var_reg, start: start_reg, stop: stop_reg, step: step_reg });
        let body_start = self.here();
        self.push_loop_block(None);
        self.parse_body()?;
        let step_pos = self.here();
        self.cur_ctx_mut().blocks.last_mut().expect("just pushed").continue_target = Some(step_pos);
        self.emit(Opcode::ForIntegerStep { var: var_reg, stop: stop_reg, step: step_reg, target: CodePos(body_start) });
        let end = self.here();
        self.pop_loop_block(end);
        self.cur_builder_mut().patch_jump(skip, end);
        Ok(())
    }

    fn parse_break(&mut self) -> RunResult<()> {
        if !self.innermost_loop_present() {
            return Err(self.err("'break' outside a loop"));
        }
        self.advance()?;
        let pos = self.emit(Opcode::Jump { target: CodePos(0) });
        self.cur_ctx_mut().blocks.iter_mut().rev().find(|b| b.kind == BlockKind::Loop).expect("checked above").end_patches.push(pos);
        Ok(())
    }

    fn parse_continue(&mut self) -> RunResult<()> {
        if !self.innermost_loop_present() {
            return Err(self.err("'continue' outside a loop"));
        }
        self.advance()?;
        let pos = self.emit(Opcode::Jump { target: CodePos(0) });
        self.cur_ctx_mut().blocks.iter_mut().rev().find(|b| b.kind == BlockKind::Loop).expect("checked above").continue_patches.push(pos);
        Ok(())
    }

    // ---- return / raise ----------------------------------------------------

    fn parse_return(&mut self) -> RunResult<()> {
        let line = self.cur_line;
        if self.cur_ctx().in_ctor {
            return Err(RunError::new(ErrorKind::SyntaxError, line, "'return' is not allowed in a constructor"));
        }
        self.advance()?;
        if self.at_stmt_end() {
            self.emit(Opcode::ReturnVoid);
        } else {
            let value = self.parse_expr()?;
            let (src, _) = self.emit_expr(value)?;
            self.emit(Opcode::ReturnVal { src });
        }
        Ok(())
    }

    fn at_stmt_end(&self) -> bool {
        matches!(self.cur, Token::RBrace | Token::FinalEof | Token::InnerEof)
    }

    fn parse_raise(&mut self) -> RunResult<()> {
        self.advance()?;
        let value = self.parse_expr()?;
        let (src, _) = self.emit_expr(value)?;
        self.emit(Opcode::Raise { src });
        Ok(())
    }

    // ---- try / except --------------------------------------------------------

    fn parse_try(&mut self) -> RunResult<()> {
        self.advance()?;
        let try_enter_pos = self.emit(Opcode::TryEnter { catch_table: Vec::new(), finally: None });
        self.cur_ctx_mut().blocks.push(Block { kind: BlockKind::Try, end_patches: Vec::new(), continue_patches: Vec::new(), continue_target: None });
        self.parse_body()?;
        self.emit(Opcode::TryLeave);
        let mut end_patches = vec![self.emit(Opcode::Jump { target: CodePos(0) })];

        let mut arms = Vec::new();
        self.expect_keyword(Keyword::Except)?;
        loop {
            let class_name = self.expect_ident()?;
            let class = self.symtab.class_by_name(&class_name).ok_or_else(|| self.err(format!("unknown exception class '{class_name}'")))?;
            let bind_name = if self.eat_keyword(Keyword::As)? { Some(self.expect_ident()?) } else { None };
            let body = self.here();
            let bind = if let Some(bind_name) = bind_name {
                let any_ty = self.type_of_class(CLS_ANY);
                let (_, reg) = self.declare_local(bind_name, any_ty)?;
                Some(reg)
            } else {
                None
            };
            self.parse_body()?;
            end_patches.push(self.emit(Opcode::Jump { target: CodePos(0) }));
            arms.push(CatchArm { class, bind, body: CodePos(body) });
            if !self.eat_keyword(Keyword::Except)? {
                break;
            }
        }

        let end = self.here();
        for p in end_patches {
            self.cur_builder_mut().patch_jump(p, end);
        }
        self.cur_ctx_mut().blocks.pop();
        self.cur_ctx_mut().builder.code.ops[try_enter_pos as usize] = Opcode::TryEnter { catch_table: arms, finally: None };
        Ok(())
    }

    // ---- match / case --------------------------------------------------------

    fn parse_match(&mut self) -> RunResult<()> {
        self.advance()?;
        let subject_expr = self.parse_expr()?;
        let (subject_reg, subject_class) = self.emit_expr(subject_expr)?;
        let enum_class = self.symtab.class_by_id(subject_class).clone();
        if !enum_class.is_enum() {
            return Err(self.err("'match' subject is not an enum value"));
        }
        self.expect(Token::Colon)?;
        self.expect(Token::LBrace)?;

        let match_pos = self.emit(Opcode::MatchDispatch { subject: subject_reg, arms: Vec::new(), default: None });
        let mut arms = Vec::new();
        let mut end_patches = Vec::new();
        let mut covered: Vec<ClassId> = Vec::new();

        while self.cur != Token::RBrace {
            self.expect_keyword(Keyword::Case)?;
            let variant_name = self.expect_ident()?;
            let variant = enum_class
                .variants
                .iter()
                .copied()
                .find(|v| self.symtab.class_by_id(*v).name == variant_name)
                .ok_or_else(|| self.err(format!("'{variant_name}' is not a variant of {}", enum_class.name)))?;
            if covered.contains(&variant) {
                return Err(self.err(format!("duplicate case for variant '{variant_name}'")));
            }
            covered.push(variant);

            let mut bindings = Vec::new();
            if self.eat(&Token::LParen)? {
                if self.cur != Token::RParen {
                    loop {
                        bindings.push(self.expect_ident()?);
                        if !self.eat(&Token::Comma)? {
                            break;
                        }
                    }
                }
                self.expect(Token::RParen)?;
            }
            let body = self.here();
            let any_ty = self.type_of_class(CLS_ANY);
            let variant_properties = self.symtab.class_by_id(variant).properties.clone();
            for (field, binding) in bindings.into_iter().enumerate() {
                // Bind to the variant's own declared field type (spec.md §4.5)
                // rather than a blanket `any`. A field type that still
                // references one of the enum's generic slots can't be
                // substituted to a concrete type here — the emitter only
                // tracks expression results down to `ClassId`, with no
                // per-expression generic-argument list for the match subject
                // to substitute from (see DESIGN.md's "Generics" entry) — so
                // it widens to `any` in that case instead of binding to an
                // unresolved template type.
                let field_ty = variant_properties
                    .get(field)
                    .map(|p| p.ty)
                    .filter(|ty| !self.symtab.type_flags(*ty).has(TypeFlags::UNRESOLVED))
                    .unwrap_or(any_ty);
                let (_, reg) = self.declare_local(binding, field_ty)?;
                self.emit(Opcode::VariantDecompose { subject: subject_reg, field: field as u16, dest: reg });
            }
            self.parse_body()?;
            end_patches.push(self.emit(Opcode::Jump { target: CodePos(0) }));
            arms.push(MatchArm { variant, body: CodePos(body) });
        }
        self.advance()?;

        if covered.len() != enum_class.variants.len() {
            return Err(self.err(format!("'match' on {} does not cover every variant", enum_class.name)));
        }

        let end = self.here();
        for p in end_patches {
            self.cur_builder_mut().patch_jump(p, end);
        }
        self.cur_ctx_mut().builder.code.ops[match_pos as usize] = Opcode::MatchDispatch { subject: subject_reg, arms, default: None };
        Ok(())
    }

    // ---- class / enum declarations -------------------------------------------

    fn parse_class_decl(&mut self) -> RunResult<()> {
        self.advance()?;
        let name = self.expect_ident()?;
        let mut generic_names = Vec::new();
        if self.eat(&Token::LBracket)? {
            loop {
                generic_names.push(self.expect_ident()?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
            self.expect(Token::RBracket)?;
        }
        let saved_generics = std::mem::replace(&mut self.active_generics, generic_names.clone());
        let result = self.parse_class_decl_body(name, generic_names.len() as i32);
        self.active_generics = saved_generics;
        result
    }

    fn parse_class_decl_body(&mut self, name: String, arity: i32) -> RunResult<()> {
        // `class C { ... }` (spec.md §8 scenario 8) omits the parameter
        // list entirely for a no-arg constructor; `class A(integer x) { ... }`
        // always has it when there's at least one param.
        let mut ctor_params: Vec<(String, TypeId)> = Vec::new();
        if self.eat(&Token::LParen)? {
            if self.cur != Token::RParen {
                loop {
                    let ty = self.parse_type()?;
                    let pname = self.expect_ident()?;
                    ctor_params.push((pname, ty));
                    if !self.eat(&Token::Comma)? {
                        break;
                    }
                }
            }
            self.expect(Token::RParen)?;
        }

        let (parent, parent_args) = if self.eat(&Token::LAngle)? {
            let parent_name = self.expect_ident()?;
            let parent_class = self.symtab.class_by_name(&parent_name).ok_or_else(|| self.err(format!("unknown parent class '{parent_name}'")))?;
            self.expect(Token::LParen)?;
            let mut args = Vec::new();
            if self.cur != Token::RParen {
                loop {
                    args.push(self.parse_stored_expr(&ctor_params)?);
                    if !self.eat(&Token::Comma)? {
                        break;
                    }
                }
            }
            self.expect(Token::RParen)?;
            (Some(parent_class), args)
        } else {
            (None, Vec::new())
        };

        let class = self.symtab.new_class(name, parent, arity);
        if let Some(parent) = parent {
            let inherited = self.symtab.class_by_id(parent).properties.clone();
            self.symtab.class_by_id_mut(class).properties = inherited;
        }

        self.expect(Token::LBrace)?;
        let self_ty = self.symtab.self_type_for_class(class);
        let mut field_inits = Vec::new();
        let ctor_param_names: Vec<String> = ctor_params.iter().map(|(n, _)| n.clone()).collect();
        loop {
            match &self.cur {
                Token::Keyword(Keyword::Define) => {
                    self.parse_method(class, self_ty)?;
                }
                Token::RBrace => break,
                _ => {
                    let ty = self.parse_type()?;
                    let prop_name = self.expect_prop_word()?;
                    self.expect(Token::Eq)?;
                    let init = self.parse_stored_expr(&ctor_params)?;
                    let slot = self.symtab.class_by_id(class).properties.len() as u16;
                    self.symtab.class_by_id_mut(class).properties.push(crate::symtab::class::Property { name: prop_name, ty, slot });
                    field_inits.push(CtorField { slot, init });
                }
            }
        }
        self.expect(Token::RBrace)?;

        self.register_ctor(class, ClassCtor { params: ctor_param_names, field_inits, parent: parent.map(|p| (p, parent_args)) });
        Ok(())
    }

    fn expect_prop_word(&mut self) -> RunResult<String> {
        match std::mem::replace(&mut self.cur, Token::FinalEof) {
            Token::PropWord(name) => {
                self.advance()?;
                Ok(name)
            }
            other => {
                self.cur = other;
                Err(self.err("expected a '@name' property initializer"))
            }
        }
    }

    /// A constructor field initializer expression, restricted to the tiny
    /// [`StoredExpr`] grammar: literals, constructor parameters, and
    /// arithmetic over them — enough for spec.md §8 scenario 5's
    /// `integer @x = x` / `< A(x)`.
    fn parse_stored_expr(&mut self, params: &[(String, TypeId)]) -> RunResult<StoredExpr> {
        self.parse_stored_additive(params)
    }

    fn parse_stored_additive(&mut self, params: &[(String, TypeId)]) -> RunResult<StoredExpr> {
        let mut left = self.parse_stored_mul(params)?;
        loop {
            let op = match self.cur {
                Token::Plus => crate::ast::BinaryOp::Add,
                Token::Minus => crate::ast::BinaryOp::Sub,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_stored_mul(params)?;
            left = StoredExpr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_stored_mul(&mut self, params: &[(String, TypeId)]) -> RunResult<StoredExpr> {
        let mut left = self.parse_stored_unary(params)?;
        loop {
            let op = match self.cur {
                Token::Star => crate::ast::BinaryOp::Mul,
                Token::Slash => crate::ast::BinaryOp::Div,
                Token::Percent => crate::ast::BinaryOp::Mod,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_stored_unary(params)?;
            left = StoredExpr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_stored_unary(&mut self, params: &[(String, TypeId)]) -> RunResult<StoredExpr> {
        if self.eat(&Token::Minus)? {
            return Ok(StoredExpr::Unary(crate::ast::UnaryOp::Neg, Box::new(self.parse_stored_unary(params)?)));
        }
        match std::mem::replace(&mut self.cur, Token::FinalEof) {
            Token::Integer(v) => {
                self.advance()?;
                Ok(StoredExpr::Integer(v))
            }
            Token::Double(v) => {
                self.advance()?;
                Ok(StoredExpr::Double(v))
            }
            Token::String(s) => {
                self.advance()?;
                Ok(StoredExpr::Str(s))
            }
            Token::Identifier(name) => {
                self.advance()?;
                if params.iter().any(|(n, _)| *n == name) {
                    Ok(StoredExpr::Param(name))
                } else {
                    Err(self.err(format!("'{name}' is not a constructor parameter")))
                }
            }
            Token::LParen => {
                self.advance()?;
                let inner = self.parse_stored_additive(params)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => {
                self.cur = other;
                Err(self.err("expected a literal, parameter, or parenthesized expression"))
            }
        }
    }

    fn parse_method(&mut self, class: ClassId, self_ty: TypeId) -> RunResult<()> {
        let (name, func_id) = self.parse_define(Some((class, self_ty)))?;
        self.symtab.class_by_id_mut(class).callables.push(crate::symtab::Callable::Method { name, function: func_id });
        Ok(())
    }

    /// `define name(Type param, ... => RetType) { body }`; `self_info` is
    /// `Some` for a method (an implicit leading `self` parameter).
    fn parse_define(&mut self, self_info: Option<(ClassId, TypeId)>) -> RunResult<(String, crate::bytecode::FunctionId)> {
        self.advance()?;
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let mut params: Vec<(String, TypeId)> = Vec::new();
        let any_ty = self.type_of_class(CLS_ANY);
        let mut ret_ty = any_ty;
        let mut declares_return = false;
        if self.cur != Token::RParen {
            loop {
                if self.cur == Token::Arrow {
                    break;
                }
                let ty = self.parse_type()?;
                let pname = self.expect_ident()?;
                params.push((pname, ty));
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }
        if self.eat(&Token::Arrow)? {
            ret_ty = self.parse_type()?;
            declares_return = true;
        }
        self.expect(Token::RParen)?;

        let mut subtypes = vec![ret_ty];
        subtypes.extend(params.iter().map(|(_, t)| *t));
        if self_info.is_some() {
            subtypes.insert(1, self_info.unwrap().1);
        }
        let fn_ty = self.symtab.build_ensure_type(crate::symtab::class::CLS_FUNCTION, false, subtypes, -1);

        let func_id = self.compile_function(name.clone(), fn_ty, None, declares_return, false, move |p| {
            let self_ctx = if let Some((class, self_ty)) = self_info {
                let (_, reg) = p.declare_local("self".to_string(), self_ty)?;
                Some((class, reg))
            } else {
                None
            };
            p.cur_ctx_mut().self_ctx = self_ctx;
            for (pname, pty) in &params {
                p.declare_local(pname.clone(), *pty)?;
            }
            p.parse_brace_block()?;
            if !declares_return {
                p.emit(Opcode::ReturnVoid);
            } else {
                p.emit(Opcode::ReturnVoid);
            }
            Ok(())
        })?;
        Ok((name, func_id))
    }

    // ---- enum declarations ----------------------------------------------------

    fn parse_enum_decl(&mut self) -> RunResult<()> {
        self.advance()?;
        self.expect_keyword(Keyword::Class)?;
        let name = self.expect_ident()?;
        let mut generic_names = Vec::new();
        if self.eat(&Token::LBracket)? {
            loop {
                generic_names.push(self.expect_ident()?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
            self.expect(Token::RBracket)?;
        }
        let enum_class = self.symtab.new_class(name, None, generic_names.len() as i32);
        self.symtab.class_by_id_mut(enum_class).flags = self.symtab.class_by_id(enum_class).flags.with(ClassFlags::ENUM);

        let saved_generics = std::mem::replace(&mut self.active_generics, generic_names);
        let result = self.parse_enum_variants(enum_class);
        self.active_generics = saved_generics;
        result
    }

    /// Parses the `{ Variant1, Variant2(T), ... }` body. Each variant's
    /// `template_count` (spec.md §4.4) is derived from the distinct generic
    /// slots its own field types reference, restarting the generic map per
    /// variant rather than inheriting the enum's full arity — `new_variant_class`
    /// does the actual slot-counting once `field_types` is known.
    fn parse_enum_variants(&mut self, enum_class: ClassId) -> RunResult<()> {
        self.expect(Token::LBrace)?;
        loop {
            let variant_name = self.expect_ident()?;
            let mut field_types = Vec::new();
            if self.eat(&Token::LParen)? {
                loop {
                    field_types.push(self.parse_type()?);
                    if !self.eat(&Token::Comma)? {
                        break;
                    }
                }
                self.expect(Token::RParen)?;
            }
            let variant = self.symtab.new_variant_class(enum_class, variant_name, &field_types);
            let params: Vec<String> = (0..field_types.len()).map(|i| format!("f{i}")).collect();
            for (slot, (pname, ty)) in params.iter().zip(&field_types).enumerate() {
                self.symtab.class_by_id_mut(variant).properties.push(crate::symtab::class::Property { name: pname.clone(), ty: *ty, slot: slot as u16 });
            }
            let field_inits =
                params.iter().enumerate().map(|(i, p)| CtorField { slot: i as u16, init: StoredExpr::Param(p.clone()) }).collect();
            self.register_ctor(variant, ClassCtor { params, field_inits, parent: None });
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(())
    }
}
