//! lily: a small statically-typed scripting language (spec.md §1, §2).
//!
//! The embedder API mirrors `lily_parser.c`'s shape: build a [`Interpreter`]
//! over a byte sink, feed it a source via [`Interpreter::parse_string`] /
//! [`Interpreter::parse_file`] / [`Interpreter::parse_special`], then run the
//! compiled root function. Parsing and running are split so a host can parse
//! once and invoke the result repeatedly (spec.md §6).

pub mod ast;
pub mod bytecode;
pub mod diagnostics;
pub mod exception;
pub mod hashing;
pub mod heap;
pub mod intern;
pub mod lexer;
pub mod parser;
pub mod symtab;
pub mod token;
pub mod value;
pub mod vm;

use diagnostics::{RunError, RunResult};
use lexer::LexMode;
use vm::VM;

/// A byte sink for `show`'s output, the Rust analogue of `lily_stdout`: by
/// default writes to stdout, but an embedder can redirect it (tests do, to
/// capture output instead of asserting against the terminal).
pub type PutsSink = Box<dyn FnMut(&str)>;

pub fn stdout_sink() -> PutsSink {
    Box::new(|s: &str| {
        use std::io::Write as _;
        let _ = std::io::stdout().write_all(s.as_bytes());
    })
}

/// Parses a complete lily program and holds everything needed to run it:
/// the compiled functions, the finished symbol table, and the captured
/// `sys::argv` strings.
pub struct Interpreter {
    functions: Vec<bytecode::Code>,
    symtab: symtab::Symtab,
    sink: Option<PutsSink>,
}

impl Interpreter {
    /// Parses `source` as a complete program in the given lex mode (tagged
    /// `<?lily ... ?>` templating, or plain code), with `argv` exposed as
    /// `sys::argv`.
    fn parse(source: String, name: impl Into<String>, mode: LexMode, argv: Vec<String>) -> RunResult<Self> {
        let mut parser = parser::Parser::new(source, name, mode, argv)?;
        parser.parse_program()?;
        let (functions, symtab, _argv) = parser.into_functions();
        Ok(Self { functions, symtab, sink: None })
    }

    /// Parses `source` as plain (untagged) lily code — `lily_parse_string`.
    pub fn parse_string(source: impl Into<String>, argv: Vec<String>) -> RunResult<Self> {
        Self::parse(source.into(), "<string>", LexMode::Untagged, argv)
    }

    /// Parses the file at `path`, choosing tagged mode when its contents
    /// contain a `<?lily` open tag and untagged mode otherwise — the same
    /// sniffing `lily_parse_file` does.
    pub fn parse_file(path: impl AsRef<std::path::Path>, argv: Vec<String>) -> RunResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            RunError::new(diagnostics::ErrorKind::ImportError, 0, format!("could not read '{}': {e}", path.display()))
        })?;
        let mode = if source.contains("<?lily") { LexMode::Tagged } else { LexMode::Untagged };
        let name = path.to_string_lossy().into_owned();
        Self::parse(source, name, mode, argv)
    }

    /// Parses `source` in an explicitly chosen mode, for embedders that
    /// already know whether their input is templated (`lily_parse_special`).
    pub fn parse_special(source: impl Into<String>, name: impl Into<String>, mode: LexMode, argv: Vec<String>) -> RunResult<Self> {
        Self::parse(source.into(), name, mode, argv)
    }

    /// Redirects `show`'s output; defaults to stdout if never called.
    pub fn set_sink(&mut self, sink: PutsSink) {
        self.sink = Some(sink);
    }

    /// Runs the compiled root function to completion, producing the
    /// formatted traceback (spec.md §7) on an unhandled raise.
    pub fn run(mut self, file: &str) -> Result<(), String> {
        let sink = self.sink.take().unwrap_or_else(stdout_sink);
        let mut vm = VM::new(self.functions, sink);
        match vm.run_function(&self.symtab, parser::ROOT_FUNCTION, Vec::new()) {
            Ok(_) => Ok(()),
            Err(raised) => {
                let kind = vm.kind_for_class(raised.class);
                let err = RunError::from_raised(&raised, &vm.heap, kind);
                Err(err.format_traceback(file))
            }
        }
    }
}
