//! Recursive-descent parser, interleaved with emission (spec.md §4.4, §4.5).
//!
//! There is no separate "parse, then compile" pass: each top-level statement
//! is parsed into [`AstPool`] nodes and immediately walked by the emitter
//! methods below, the way spec.md §2's data flow describes it. The AST pool
//! is cleared after every top-level statement.

use ahash::AHashMap;

use crate::ast::AstPool;
use crate::bytecode::{Code, CodeBuilder, FunctionId, Opcode, Reg};
use crate::diagnostics::{ErrorKind, RunError, RunResult};
use crate::intern::StringLitId;
use crate::lexer::{LexMode, Lexer};
use crate::symtab::class::CLS_ANY;
use crate::symtab::{ClassId, Symtab, TypeId, VarFlags};
use crate::token::{Keyword, Token};

mod ctor;
mod expr;
mod stmt;

use ctor::ClassCtor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    Loop,
    Try,
    Match,
}

struct Block {
    kind: BlockKind,
    /// Forward jumps that land just past this construct.
    end_patches: Vec<u32>,
    /// `continue` target (loops only): re-test position for `while`, the
    /// `ForIntegerStep`/condition-recheck position for `for`/`do-while`.
    continue_patches: Vec<u32>,
    continue_target: Option<u32>,
}

/// One function currently being compiled: its own register allocator, block
/// stack, and the point in the var chain where its locals begin.
struct FnCtx {
    builder: CodeBuilder,
    blocks: Vec<Block>,
    var_base: usize,
    /// `Some` while compiling a method or constructor: the class `self`
    /// refers to, and the register holding it.
    self_ctx: Option<(ClassId, Reg)>,
    declares_return: bool,
    in_ctor: bool,
}

pub struct Parser {
    lexer: Lexer,
    pub symtab: Symtab,
    ast: AstPool,
    cur: Token,
    cur_line: u32,
    peeked: Option<Token>,
    peeked_line: u32,
    /// Completed functions. Index 0 is reserved for the root/top-level
    /// function and filled in once parsing finishes.
    functions: Vec<Code>,
    ctx: Vec<FnCtx>,
    ctors: AHashMap<ClassId, ClassCtor>,
    lambda_counter: u32,
    argv: Vec<String>,
    /// One memoized `readonly` global var per compiled function, used to
    /// load it as a first-class value into a register (`LoadReadonly`)
    /// whether it's a top-level `define`, a method, or a lambda.
    fn_vars: AHashMap<FunctionId, crate::symtab::VarId>,
    /// Generic parameter names (`A`, `B`, ...) visible while parsing the
    /// body of the `class[...]`/`enum class[...]` currently being declared;
    /// consulted by `parse_type` before falling back to `class_by_name`.
    /// Empty outside a generic declaration's body (spec.md §4.3's symtab
    /// generic slots, threaded through the parser instead of the emitter's
    /// per-function `update_symtab_generics` since class/enum bodies are
    /// parsed before any function context for them exists).
    active_generics: Vec<String>,
}

pub const ROOT_FUNCTION: FunctionId = FunctionId(0);

impl Parser {
    /// Installs the builtin class table and the exception hierarchy, the
    /// way `new_parser` does in spec.md §6.
    pub fn new(source: String, name: impl Into<String>, mode: LexMode, argv: Vec<String>) -> RunResult<Self> {
        let mut symtab = Symtab::new();
        crate::exception::bootstrap(&mut symtab);
        let mut lexer = Lexer::new(source, name, mode);
        let cur_line = lexer.current_line();
        let cur = lexer.next_token()?;
        let none_ty = symtab.build_ensure_type(CLS_ANY, false, Vec::new(), -1);
        let mut parser = Parser {
            lexer,
            symtab,
            ast: AstPool::new(),
            cur,
            cur_line,
            peeked: None,
            peeked_line: 0,
            functions: vec![Code::new("<root>", none_ty)],
            ctx: vec![FnCtx {
                builder: CodeBuilder::new("<root>", none_ty),
                blocks: Vec::new(),
                var_base: 0,
                self_ctx: None,
                declares_return: false,
                in_ctor: false,
            }],
            ctors: AHashMap::new(),
            lambda_counter: 0,
            argv,
            fn_vars: AHashMap::new(),
            active_generics: Vec::new(),
        };
        parser.register_exception_ctors();
        Ok(parser)
    }

    /// Parses the entire source and compiles it into the root function plus
    /// any nested function/class bodies declared along the way.
    pub fn parse_program(&mut self) -> RunResult<()> {
        loop {
            if matches!(self.cur, Token::FinalEof) {
                break;
            }
            if matches!(self.cur, Token::InnerEof) {
                self.advance()?;
                continue;
            }
            self.parse_top_level_stmt()?;
            self.ast.clear();
        }
        let root_ctx = self.ctx.pop().expect("root context always present");
        self.functions[ROOT_FUNCTION.0 as usize] = root_ctx.builder.finish();
        Ok(())
    }

    pub fn into_functions(self) -> (Vec<Code>, Symtab, Vec<String>) {
        (self.functions, self.symtab, self.argv)
    }

    // ---- token stream -------------------------------------------------

    fn advance(&mut self) -> RunResult<()> {
        if let Some(tok) = self.peeked.take() {
            self.cur_line = self.peeked_line;
            self.cur = tok;
        } else {
            self.cur_line = self.lexer.current_line();
            self.cur = self.lexer.next_token()?;
        }
        Ok(())
    }

    /// One token beyond `cur`, without consuming it.
    fn peek(&mut self) -> RunResult<Token> {
        if self.peeked.is_none() {
            self.peeked_line = self.lexer.current_line();
            self.peeked = Some(self.lexer.next_token()?);
        }
        Ok(self.peeked.clone().expect("just filled"))
    }

    fn err(&self, message: impl Into<String>) -> RunError {
        RunError::new(ErrorKind::SyntaxError, self.cur_line, message)
    }

    fn expect_keyword(&mut self, kw: Keyword) -> RunResult<()> {
        if self.cur == Token::Keyword(kw) {
            self.advance()
        } else {
            Err(self.err(format!("expected keyword {kw:?}, found {:?}", self.cur)))
        }
    }

    fn expect(&mut self, tok: Token) -> RunResult<()> {
        if self.cur == tok {
            self.advance()
        } else {
            Err(self.err(format!("expected {tok:?}, found {:?}", self.cur)))
        }
    }

    fn eat(&mut self, tok: &Token) -> RunResult<bool> {
        if &self.cur == tok {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_ident(&mut self) -> RunResult<String> {
        match std::mem::replace(&mut self.cur, Token::FinalEof) {
            Token::Identifier(name) => {
                self.advance()?;
                Ok(name)
            }
            other => {
                self.cur = other;
                Err(self.err(format!("expected an identifier, found {:?}", self.cur)))
            }
        }
    }

    // ---- function-context helpers --------------------------------------

    fn cur_ctx(&self) -> &FnCtx {
        self.ctx.last().expect("function context stack never empty while parsing")
    }

    fn cur_ctx_mut(&mut self) -> &mut FnCtx {
        self.ctx.last_mut().expect("function context stack never empty while parsing")
    }

    fn cur_builder_mut(&mut self) -> &mut CodeBuilder {
        &mut self.cur_ctx_mut().builder
    }

    fn emit(&mut self, op: Opcode) -> u32 {
        self.cur_builder_mut().emit(op)
    }

    fn here(&self) -> u32 {
        self.cur_ctx().builder.here()
    }

    fn alloc_reg(&mut self) -> Reg {
        self.cur_builder_mut().alloc_reg()
    }

    /// Enters a new function scope (for `define`, a method, or a ctor),
    /// compiling it to completion and returning its [`FunctionId`].
    fn compile_function(
        &mut self,
        name: String,
        ty: TypeId,
        self_ctx: Option<(ClassId, Reg)>,
        declares_return: bool,
        in_ctor: bool,
        body: impl FnOnce(&mut Self) -> RunResult<()>,
    ) -> RunResult<FunctionId> {
        let var_base = self.symtab.vars.len();
        self.ctx.push(FnCtx { builder: CodeBuilder::new(name, ty), blocks: Vec::new(), var_base, self_ctx, declares_return, in_ctor });
        let result = body(self);
        let ctx = self.ctx.pop().expect("pushed above");
        result?;
        let mut code = ctx.builder.finish();
        code.requires_return = declares_return;
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(code);
        Ok(id)
    }

    // ---- name resolution -------------------------------------------------

    /// Locals of the current function (any register spot >= `var_base`),
    /// innermost (most recently declared) first, then globals declared
    /// anywhere (depth 1), which persist across the whole program.
    fn resolve_name(&self, name: &str) -> Option<crate::symtab::VarId> {
        let base = self.cur_ctx().var_base;
        for (idx, var) in self.symtab.vars.iter().enumerate().skip(base).rev() {
            if var.name == name {
                return Some(crate::symtab::VarId(idx as u32));
            }
        }
        for (idx, var) in self.symtab.vars.iter().enumerate().rev() {
            if var.is_global() && var.name == name {
                return Some(crate::symtab::VarId(idx as u32));
            }
        }
        None
    }

    fn declare_local(&mut self, name: String, ty: TypeId) -> RunResult<(crate::symtab::VarId, Reg)> {
        let reg = self.alloc_reg();
        let depth = self.ctx.len() as u16 + 1;
        let id = self.symtab.try_new_var(ty, name, VarFlags::default(), depth, reg.0);
        Ok((id, reg))
    }

    fn declare_global(&mut self, name: String, ty: TypeId) -> RunResult<crate::symtab::VarId> {
        let reg_spot = self.symtab.vars.len() as u16;
        Ok(self.symtab.try_new_var(ty, name, VarFlags::default().with(VarFlags::GLOBAL), 1, reg_spot))
    }

    fn string_literal(&mut self, s: String) -> StringLitId {
        self.symtab.get_string_literal(s)
    }

    fn type_of_class(&mut self, class: ClassId) -> TypeId {
        self.symtab.build_ensure_type(class, false, Vec::new(), -1)
    }

    /// Position of `name` in the generic parameter list of the class/enum
    /// currently being declared, if any (spec.md §4.3's generic slots).
    pub(super) fn generic_slot(&self, name: &str) -> Option<u8> {
        self.active_generics.iter().position(|g| g == name).map(|p| p as u8)
    }

    /// Loads `func_id` as a first-class function value into a fresh
    /// register, creating (and memoizing) a `readonly` global var for it
    /// the first time it's referenced.
    pub(super) fn emit_function_value(&mut self, func_id: FunctionId) -> Reg {
        let var_id = if let Some(v) = self.fn_vars.get(&func_id) {
            *v
        } else {
            let ty = self.functions[func_id.0 as usize].ty;
            let var_id = self.declare_global(format!("<fn#{}>", func_id.0), ty).expect("global decl never fails");
            self.symtab.vars[var_id.0 as usize].flags = self.symtab.vars[var_id.0 as usize].flags.with(VarFlags::READONLY);
            self.symtab.vars[var_id.0 as usize].inline_function = Some(func_id);
            self.fn_vars.insert(func_id, var_id);
            var_id
        };
        let dest = self.alloc_reg();
        self.emit(Opcode::LoadReadonly { var: var_id, dest });
        dest
    }
}
