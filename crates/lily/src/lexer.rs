//! Byte stream to token stream (spec.md §4.2).
//!
//! Supports the two input modes from the source: **tagged**, where default
//! input is literal text echoed verbatim until a `<?lily` switches into
//! code (and `?>` switches back), and **untagged**, where the entire input
//! is code. A small entry stack lets the lexer descend into a loaded
//! sub-source (a lambda body captured as raw text, or the bootstrap
//! exception source) and resume the parent afterward.

use crate::diagnostics::{ErrorKind, RunError, RunResult};
use crate::token::{Token, keyword_from_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    Tagged,
    Untagged,
}

#[derive(Clone)]
struct Entry {
    source: String,
    pos: usize,
    line: u32,
    name: String,
    /// Whether ending this entry should continue the previous one
    /// (`inner_eof`) rather than signal true end of input (`final_eof`).
    has_parent: bool,
}

/// Cloneable so the parser can scan a tentative lookahead (past a bracketed
/// generic argument list) on a throwaway copy without disturbing real
/// lexing position.
#[derive(Clone)]
pub struct Lexer {
    mode: LexMode,
    /// `true` while scanning literal (non-code) text in tagged mode.
    in_literal_text: bool,
    stack: Vec<Entry>,
}

impl Lexer {
    pub fn new(source: String, name: impl Into<String>, mode: LexMode) -> Self {
        Self {
            mode,
            in_literal_text: mode == LexMode::Tagged,
            stack: vec![Entry { source, pos: 0, line: 1, name: name.into(), has_parent: false }],
        }
    }

    /// Descends into a sub-source (a lambda's raw body, or a bootstrap
    /// source fragment). The current entry resumes once the sub-source
    /// reaches its own end (spec.md §9 open question (c)).
    pub fn push_source(&mut self, source: String, name: impl Into<String>) {
        self.stack.push(Entry { source, pos: 0, line: 1, name: name.into(), has_parent: true });
    }

    pub fn current_line(&self) -> u32 {
        self.stack.last().map_or(1, |e| e.line)
    }

    pub fn current_name(&self) -> &str {
        self.stack.last().map_or("<input>", |e| e.name.as_str())
    }

    fn entry(&mut self) -> &mut Entry {
        self.stack.last_mut().expect("lexer entry stack never empty while lexing")
    }

    fn peek_char(&self) -> Option<char> {
        let e = self.stack.last()?;
        e.source[e.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        let e = self.stack.last()?;
        e.source[e.pos..].chars().nth(offset)
    }

    fn bump(&mut self) -> Option<char> {
        let e = self.entry();
        let c = e.source[e.pos..].chars().next()?;
        e.pos += c.len_utf8();
        if c == '\n' {
            e.line += 1;
        }
        Some(c)
    }

    fn starts_with(&self, pat: &str) -> bool {
        self.stack.last().is_some_and(|e| e.source[e.pos..].starts_with(pat))
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn at_entry_end(&self) -> bool {
        self.stack.last().is_some_and(|e| e.pos >= e.source.len())
    }

    /// Scans one token. Returns `InnerEof`/`FinalEof` at end of input per
    /// the entry stack's current depth.
    pub fn next_token(&mut self) -> RunResult<Token> {
        if self.mode == LexMode::Tagged && self.in_literal_text {
            return self.scan_literal_text();
        }
        self.skip_code_whitespace_and_comments();
        if self.at_entry_end() {
            return Ok(self.handle_entry_end());
        }
        if self.mode == LexMode::Tagged && self.starts_with("?>") {
            self.advance_by(2);
            self.in_literal_text = true;
            return Ok(Token::EndTag);
        }
        let line = self.current_line();
        let Some(c) = self.peek_char() else {
            return Ok(self.handle_entry_end());
        };
        if c == '"' {
            return self.scan_string();
        }
        if c.is_ascii_digit() {
            return self.scan_number();
        }
        if c == '_' || c.is_alphabetic() {
            return self.scan_ident_or_keyword();
        }
        if c == '@' {
            self.bump();
            if self.peek_char().is_some_and(|c| c == '_' || c.is_alphabetic()) {
                let name = self.scan_plain_ident();
                return Ok(Token::PropWord(name));
            }
            return Ok(Token::At);
        }
        self.scan_operator(line)
    }

    fn handle_entry_end(&mut self) -> Token {
        let has_parent = self.stack.last().is_some_and(|e| e.has_parent);
        if has_parent {
            self.stack.pop();
            Token::InnerEof
        } else {
            Token::FinalEof
        }
    }

    fn scan_literal_text(&mut self) -> RunResult<Token> {
        let mut text = String::new();
        loop {
            if self.at_entry_end() {
                if text.is_empty() {
                    return Ok(self.handle_entry_end());
                }
                break;
            }
            if self.starts_with("<?lily") {
                self.advance_by(6);
                self.in_literal_text = false;
                break;
            }
            text.push(self.bump().expect("checked not at end"));
        }
        Ok(Token::String(text))
    }

    fn skip_code_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_string(&mut self) -> RunResult<Token> {
        let line = self.current_line();
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(RunError::new(ErrorKind::SyntaxError, line, "unterminated string literal")),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('b') => out.push('\u{8}'),
                    Some('a') => out.push('\u{7}'),
                    Some(other) => {
                        return Err(RunError::new(ErrorKind::SyntaxError, line, format!("invalid escape '\\{other}'")));
                    }
                    None => return Err(RunError::new(ErrorKind::SyntaxError, line, "unterminated string literal")),
                },
                Some(c) => out.push(c),
            }
        }
        Ok(Token::String(out))
    }

    fn scan_number(&mut self) -> RunResult<Token> {
        let mut digits = String::new();
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            digits.push(self.bump().unwrap());
        }
        // `1+1` vs `1 +1`: record no lookahead state here, the parser
        // replays ambiguous adjacency itself using raw source positions
        // (spec.md §4.2); this lexer only needs to stop at the last digit.
        if self.peek_char() == Some('.') && self.peek_char_at(1).is_some_and(|c| c.is_ascii_digit()) {
            digits.push(self.bump().unwrap());
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                digits.push(self.bump().unwrap());
            }
            let value: f64 = digits.parse().map_err(|_| {
                RunError::new(ErrorKind::SyntaxError, self.current_line(), format!("invalid double literal '{digits}'"))
            })?;
            return Ok(Token::Double(value));
        }
        let value: i64 = digits
            .parse()
            .map_err(|_| RunError::new(ErrorKind::SyntaxError, self.current_line(), format!("invalid integer literal '{digits}'")))?;
        Ok(Token::Integer(value))
    }

    fn scan_plain_ident(&mut self) -> String {
        let mut s = String::new();
        while self.peek_char().is_some_and(|c| c == '_' || c.is_alphanumeric()) {
            s.push(self.bump().unwrap());
        }
        s
    }

    fn scan_ident_or_keyword(&mut self) -> RunResult<Token> {
        if self.starts_with("true") && !is_ident_continue(self.peek_char_at(4)) {
            self.advance_by(4);
            return Ok(Token::Keyword(crate::token::Keyword::True));
        }
        if self.starts_with("false") && !is_ident_continue(self.peek_char_at(5)) {
            self.advance_by(5);
            return Ok(Token::Keyword(crate::token::Keyword::False));
        }
        let name = self.scan_plain_ident();
        if let Some(kw) = keyword_from_str(&name) {
            return Ok(Token::Keyword(kw));
        }
        Ok(Token::Identifier(name))
    }

    fn scan_operator(&mut self, line: u32) -> RunResult<Token> {
        macro_rules! two {
            ($a:expr, $b:expr, $tok:expr) => {
                if self.peek_char() == Some($a) && self.peek_char_at(1) == Some($b) {
                    self.advance_by(2);
                    return Ok($tok);
                }
            };
        }
        if self.starts_with("<[") {
            self.advance_by(2);
            return Ok(Token::TupleOpen);
        }
        if self.starts_with("]>") {
            self.advance_by(2);
            return Ok(Token::TupleClose);
        }
        if self.starts_with(".@(") {
            self.advance_by(3);
            return Ok(Token::TypecastParenth);
        }
        if self.starts_with("...") {
            self.advance_by(3);
            return Ok(Token::ThreeDots);
        }
        two!('.', '.', Token::Range);
        if self.starts_with("{|") {
            return self.scan_lambda();
        }
        two!('=', '=', Token::EqEq);
        two!('!', '=', Token::Neq);
        two!('<', '=', Token::Le);
        two!('>', '=', Token::Ge);
        two!('&', '&', Token::AndAnd);
        two!('|', '|', Token::OrOr);
        two!('<', '<', Token::Shl);
        two!('>', '>', Token::Shr);
        two!('+', '=', Token::PlusEq);
        two!('-', '=', Token::MinusEq);
        two!('*', '=', Token::StarEq);
        two!('/', '=', Token::SlashEq);
        two!('%', '=', Token::PercentEq);
        two!('=', '>', Token::Arrow);
        two!(':', ':', Token::ColonColon);
        let c = self.bump().ok_or_else(|| RunError::new(ErrorKind::SyntaxError, line, "unexpected end of input"))?;
        Ok(match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' => Token::Eq,
            '<' => Token::LAngle,
            '>' => Token::RAngle,
            '!' => Token::Not,
            '&' => Token::Amp,
            '|' => Token::Pipe,
            '^' => Token::Caret,
            '~' => Token::Tilde,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            '.' => Token::Dot,
            ':' => Token::Colon,
            ';' => Token::Semicolon,
            other => return Err(RunError::new(ErrorKind::SyntaxError, line, format!("unexpected character '{other}'"))),
        })
    }

    /// Lambdas are captured as raw source substrings at lex time; the body
    /// is parsed later once the emitter knows the lambda's expected type
    /// (spec.md §4.2, §4.5, §9).
    fn scan_lambda(&mut self) -> RunResult<Token> {
        let line = self.current_line();
        self.advance_by(2); // `{|`
        let mut params = Vec::new();
        loop {
            self.skip_code_whitespace_and_comments();
            match self.peek_char() {
                Some('|') => {
                    self.bump();
                    break;
                }
                Some(',') => {
                    self.bump();
                }
                Some(c) if c == '_' || c.is_alphabetic() => {
                    params.push(self.scan_plain_ident());
                }
                _ => return Err(RunError::new(ErrorKind::SyntaxError, line, "malformed lambda parameter list")),
            }
        }
        let mut depth = 1i32;
        let mut body = String::new();
        loop {
            match self.bump() {
                None => return Err(RunError::new(ErrorKind::SyntaxError, line, "unterminated lambda body")),
                Some('{') => {
                    depth += 1;
                    body.push('{');
                }
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    body.push('}');
                }
                Some(c) => body.push(c),
            }
        }
        Ok(Token::Lambda { params, raw_body: body })
    }
}

fn is_ident_continue(c: Option<char>) -> bool {
    c.is_some_and(|c| c == '_' || c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src.to_string(), "<test>", LexMode::Untagged);
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token().unwrap();
            if matches!(t, Token::FinalEof) {
                break;
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn lexes_integer_arithmetic() {
        let toks = tokens("1 + 2 * 3");
        assert_eq!(toks, vec![Token::Integer(1), Token::Plus, Token::Integer(2), Token::Star, Token::Integer(3)]);
    }

    #[test]
    fn lexes_tuple_brackets_distinct_from_comparisons() {
        let toks = tokens("<[1, 2]>");
        assert_eq!(toks[0], Token::TupleOpen);
        assert_eq!(*toks.last().unwrap(), Token::TupleClose);
    }

    #[test]
    fn lexes_string_escapes() {
        let toks = tokens("\"a\\nb\"");
        assert_eq!(toks, vec![Token::String("a\nb".to_string())]);
    }

    #[test]
    fn lexes_lambda_raw_body() {
        let toks = tokens("{|x| x + 1 }");
        match &toks[0] {
            Token::Lambda { params, raw_body } => {
                assert_eq!(params, &vec!["x".to_string()]);
                assert_eq!(raw_body.trim(), "x + 1");
            }
            other => panic!("expected lambda token, got {other:?}"),
        }
    }

    #[test]
    fn inner_eof_resumes_parent_source() {
        let mut lexer = Lexer::new("1".to_string(), "parent", LexMode::Untagged);
        lexer.push_source("2".to_string(), "child");
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(2));
        assert_eq!(lexer.next_token().unwrap(), Token::InnerEof);
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(1));
        assert_eq!(lexer.next_token().unwrap(), Token::FinalEof);
    }
}
