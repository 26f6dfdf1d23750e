//! The diagnostics buffer and the non-local error type.
//!
//! lily has no setjmp/longjmp equivalent in Rust: raising is modeled as
//! returning `Err(RunError)` and propagating it with `?`. The embedder entry
//! points (`Parser::parse_file`/`parse_string`/`parse_special`) are the only
//! places that turn a `RunError` into the formatted traceback the CLI prints.

use std::fmt::Write as _;

use strum::{Display, EnumString, IntoStaticStr};

/// The distinct error kinds lily can raise, per spec.md §4.1/§7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    SyntaxError,
    ImportError,
    EncodingError,
    NoMemoryError,
    DivisionByZeroError,
    IndexError,
    BadTypecastError,
    NoReturnError,
    ValueError,
    RecursionError,
    KeyError,
    FormatError,
}

/// A single frame of the traceback shown on an unhandled error.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub function_name: String,
    /// `None` for a native/builtin frame (printed as `[builtin]`).
    pub line: Option<u32>,
}

/// The non-local error. Every fallible operation in the core pipeline returns
/// `Result<T, RunError>`; the `?` operator stands in for the source's
/// `longjmp`-based raise.
#[derive(Debug, Clone)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    /// The line the lexer/parser/emitter/VM believed was current when the
    /// error was raised.
    pub line: u32,
    /// Set when the raiser discovered the error away from the lexer's
    /// current line (e.g. a bad token nested inside `type[...]`); overrides
    /// `line` for reporting purposes.
    pub line_adjust: Option<u32>,
    /// Populated only for VM-phase errors: the call stack, most recent frame
    /// last, per spec.md §7.
    pub trace: Vec<TraceFrame>,
}

pub type RunResult<T> = Result<T, RunError>;

impl RunError {
    pub fn new(kind: ErrorKind, line: u32, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), line, line_adjust: None, trace: Vec::new() }
    }

    /// The effective line to report: `line_adjust` if set, else `line`.
    pub fn reported_line(&self) -> u32 {
        self.line_adjust.unwrap_or(self.line)
    }

    #[must_use]
    pub fn with_line_adjust(mut self, line: u32) -> Self {
        self.line_adjust = Some(line);
        self
    }

    /// Formats `kind: message\n` followed by a top-first frame trace, the
    /// shape the CLI front end prints on an unhandled error.
    pub fn format_traceback(&self, file: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}: {}", self.kind, self.message);
        let _ = writeln!(out, "Traceback (most recent call first):");
        for frame in self.trace.iter().rev() {
            match frame.line {
                Some(line) => {
                    let _ = writeln!(out, "    {file}:{line}: in {}", frame.function_name);
                }
                None => {
                    let _ = writeln!(out, "    [builtin]: in {}", frame.function_name);
                }
            }
        }
        out
    }
}

/// Anything that can be rendered by the `%T` directive.
pub trait PrettyType {
    fn pretty(&self) -> String;
}

/// The `%T` directive's one real implementor: a type plus the symtab that
/// owns its hash-consed subtypes, rendered as `Name` or `Name[T1, T2]`
/// (spec.md §3's `Type` shape).
pub struct DisplayType<'a> {
    pub symtab: &'a crate::symtab::Symtab,
    pub ty: crate::symtab::TypeId,
}

impl PrettyType for DisplayType<'_> {
    fn pretty(&self) -> String {
        render_type(self.symtab, self.ty)
    }
}

fn render_type(symtab: &crate::symtab::Symtab, ty: crate::symtab::TypeId) -> String {
    let t = symtab.get(ty);
    let class = symtab.class_by_id(t.class);
    if t.subtypes.is_empty() {
        return class.name.clone();
    }
    let subs: Vec<String> = t.subtypes.iter().map(|s| render_type(symtab, *s)).collect();
    format!("{}[{}]", class.name, subs.join(", "))
}

/// A growable formatted message buffer, the Rust analogue of
/// `lily_msgbuf.c`'s `lily_msgbuf`.
///
/// Supports the standard `%s %d %ld %g %c` directives plus lily's own
/// `%T` (pretty-print a type), `%I` (indentation, argument is an indent
/// depth), `%E` (escape a string for display), and `%R` (errno to message).
#[derive(Debug, Default, Clone)]
pub struct MsgBuf {
    buf: String,
}

/// One formatting argument accepted by [`MsgBuf::add_fmt`].
pub enum FmtArg<'a> {
    Str(&'a str),
    Int(i64),
    Double(f64),
    Char(char),
    /// Pretty-printed via `%T`.
    Type(&'a dyn PrettyType),
    /// Indent depth for `%I`.
    Indent(u32),
    /// String to escape for `%E`.
    Escape(&'a str),
    /// errno for `%R`.
    Errno(i32),
}

impl MsgBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }

    /// Appends `fmt` to the buffer, consuming one `args` entry per directive
    /// encountered in source order. Panics (a programmer error, not a user
    /// error) if the directive count and argument count disagree.
    pub fn add_fmt(&mut self, fmt: &str, args: &[FmtArg<'_>]) {
        let mut args = args.iter();
        let mut chars = fmt.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                self.buf.push(c);
                continue;
            }
            let Some(directive) = chars.next() else {
                self.buf.push('%');
                break;
            };
            let arg = args.next();
            match (directive, arg) {
                ('s', Some(FmtArg::Str(s))) => self.buf.push_str(s),
                ('d', Some(FmtArg::Int(v))) => {
                    let _ = write!(self.buf, "{v}");
                }
                ('g', Some(FmtArg::Double(v))) => {
                    let _ = write!(self.buf, "{}", format_double_g(*v));
                }
                ('c', Some(FmtArg::Char(v))) => self.buf.push(*v),
                ('T', Some(FmtArg::Type(t))) => self.buf.push_str(&t.pretty()),
                ('I', Some(FmtArg::Indent(n))) => {
                    for _ in 0..*n {
                        self.buf.push_str("    ");
                    }
                }
                ('E', Some(FmtArg::Escape(s))) => escape_into(&mut self.buf, s),
                ('R', Some(FmtArg::Errno(e))) => {
                    let _ = write!(self.buf, "errno {e}");
                }
                ('%', _) => self.buf.push('%'),
                (other, _) => {
                    self.buf.push('%');
                    self.buf.push(other);
                }
            }
        }
    }
}

/// Formats a double the way lily's literal round-trip test expects: the
/// shortest `%g`-style representation that still parses back to the same
/// value, always containing a decimal point or exponent so it round-trips
/// as a double rather than an integer literal.
pub fn format_double_g(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    let mut s = format!("{v}");
    if !s.contains('.') && !s.contains('e') {
        s.push_str(".0");
    }
    s
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_basic_directives() {
        let mut mb = MsgBuf::new();
        mb.add_fmt("%s got %d items", &[FmtArg::Str("list"), FmtArg::Int(3)]);
        assert_eq!(mb.as_str(), "list got 3 items");
    }

    #[test]
    fn escape_directive_quotes_control_chars() {
        let mut mb = MsgBuf::new();
        mb.add_fmt("%E", &[FmtArg::Escape("a\nb")]);
        assert_eq!(mb.as_str(), "a\\nb");
    }

    #[test]
    fn double_round_trips_with_decimal_point() {
        assert_eq!(format_double_g(1.0), "1.0");
        assert_eq!(format_double_g(1.5), "1.5");
    }
}
