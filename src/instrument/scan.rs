//! Statement boundaries and line layout of a Ruby program.

use super::lexer::{Lexer, Token, TokenKind};
use super::SyntaxError;

/// A wrappable statement: `start..end` in bytes, `line` is its last line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub depth: usize,
}

/// A `#` comment: `start..end` in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

/// What the merger needs to know about each line.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    /// Indexed by `line - 1`; false when the line ends inside a literal.
    ends_in_code: Vec<bool>,
    pub comments: Vec<Comment>,
}

impl Layout {
    pub fn ends_in_code(&self, line: usize) -> bool {
        line >= 1 && self.ends_in_code.get(line - 1).copied().unwrap_or(false)
    }

    pub fn comment_on(&self, line: usize) -> Option<&Comment> {
        self.comments.iter().find(|c| c.line == line)
    }
}

#[derive(Debug, Default)]
pub struct Scan {
    pub statements: Vec<Statement>,
    pub layout: Layout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Program,
    Def,
    Class,
    Module,
    Begin,
    Do,
    Brace,
    If,
    Unless,
    While,
    Until,
    For,
    Case,
}

impl FrameKind {
    fn name(self) -> &'static str {
        match self {
            FrameKind::Program => "program",
            FrameKind::Def => "def",
            FrameKind::Class => "class",
            FrameKind::Module => "module",
            FrameKind::Begin => "begin",
            FrameKind::Do => "do",
            FrameKind::Brace => "{",
            FrameKind::If => "if",
            FrameKind::Unless => "unless",
            FrameKind::While => "while",
            FrameKind::Until => "until",
            FrameKind::For => "for",
            FrameKind::Case => "case",
        }
    }

    fn accepts_rescue(self) -> bool {
        matches!(
            self,
            FrameKind::Def | FrameKind::Begin | FrameKind::Do | FrameKind::Class | FrameKind::Module
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    Body,
    /// Until newline, `;` or `then` (and `do` for loops).
    Line,
    /// Right after `do` or a block brace: `|params|` or the body.
    BlockStart,
    DefName,
    DefAfterName,
    DefParams(usize),
    DefAfterParams,
}

#[derive(Debug, Clone, Copy)]
struct Open {
    start: usize,
    end: usize,
    line: usize,
    wrappable: bool,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    line: usize,
    bracket_base: usize,
    header: Header,
    stmt: Option<Open>,
}

impl Frame {
    fn new(kind: FrameKind, line: usize, bracket_base: usize, header: Header) -> Self {
        Self { kind, line, bracket_base, header, stmt: None }
    }
}

/// Keywords that make wrapping a statement unsafe.
const UNWRAPPABLE: &[&str] = &["return", "break", "next", "redo", "retry", "alias", "undef", "BEGIN", "END"];

/// Keywords after which `if`/`while`/... is a modifier, not an opener.
const MODIFIER_AFTER: &[&str] = &[
    "end", "self", "nil", "true", "false", "return", "break", "next", "redo", "retry", "super",
    "yield", "__FILE__", "__LINE__", "__ENCODING__",
];

/// Keywords that take a condition or fallback on their right when used as modifiers.
const MODIFIERS: &[&str] = &["if", "unless", "while", "until", "rescue"];

const CONTINUATION_OPS: &[&str] = &[
    ",", ".", "&.", "::", "+", "-", "*", "/", "%", "**", "=", "==", "!=", "<", ">", "<=", ">=",
    "<=>", "===", "=~", "!~", "&&", "||", "&", "|", "^", "<<", ">>", "+=", "-=", "*=", "/=", "%=",
    "**=", "|=", "&=", "^=", "<<=", ">>=", "&&=", "||=", "?", ":", "=>", "->", "!", "~", "..", "...",
];

#[derive(Debug, Clone, Copy)]
struct Last {
    kind: TokenKind,
    keyword: bool,
    text_is_pipe: bool,
    continues: bool,
    modifier_position: bool,
    ends_call: bool,
}

struct Scanner<'a> {
    src: &'a str,
    frames: Vec<Frame>,
    brackets: Vec<(&'a str, usize)>,
    last: Option<Last>,
    out: Scan,
}

/// Scan `src`, returning statement spans and layout, or the first syntax error.
pub fn scan(src: &str) -> Result<Scan, SyntaxError> {
    let mut lexer = Lexer::new(src);
    let mut scanner = Scanner {
        src,
        frames: vec![Frame::new(FrameKind::Program, 1, 0, Header::Body)],
        brackets: Vec::new(),
        last: None,
        out: Scan::default(),
    };
    let mut opaque: Vec<(usize, usize)> = Vec::new();
    loop {
        let tok = lexer.next_token()?;
        if tok.kind == TokenKind::Literal && tok.end_line > tok.line {
            opaque.push((tok.line, tok.end_line - 1));
        }
        if tok.kind == TokenKind::Eof {
            scanner.finish(tok)?;
            break;
        }
        scanner.feed(tok)?;
    }
    opaque.extend(lexer.opaque_lines.iter().copied());

    let line_count = src.lines().count().max(1);
    let mut ends_in_code = vec![true; line_count];
    for (from, to) in opaque {
        for line in from..=to.min(line_count) {
            ends_in_code[line - 1] = false;
        }
    }
    scanner.out.layout.ends_in_code = ends_in_code;
    Ok(scanner.out)
}

impl<'a> Scanner<'a> {
    fn top(&mut self) -> &mut Frame {
        let idx = self.frames.len() - 1;
        &mut self.frames[idx]
    }

    fn error(&self, line: usize, explanation: impl Into<String>) -> SyntaxError {
        SyntaxError { line_number: line, explanation: explanation.into(), filename: None }
    }

    fn at_frame_level(&self) -> bool {
        self.frames
            .last()
            .map(|f| self.brackets.len() == f.bracket_base)
            .unwrap_or(true)
    }

    fn feed(&mut self, tok: Token<'a>) -> Result<(), SyntaxError> {
        match tok.kind {
            TokenKind::Comment => {
                self.out.layout.comments.push(Comment { line: tok.line, start: tok.start, end: tok.end });
                Ok(())
            }
            TokenKind::Newline => {
                self.newline(&tok);
                Ok(())
            }
            TokenKind::Semicolon => {
                if self.at_frame_level() {
                    self.end_header_or_statement();
                    self.last = None;
                }
                Ok(())
            }
            _ => {
                let trailing_modifier = tok.keyword
                    && MODIFIERS.contains(&tok.text)
                    && self.last.map(|last| last.modifier_position).unwrap_or(false);
                self.code(tok)?;
                self.last = Some(Last {
                    kind: tok.kind,
                    keyword: tok.keyword,
                    text_is_pipe: tok.is_punct("|"),
                    continues: trailing_modifier || continues_line(&tok),
                    modifier_position: modifier_position(&tok),
                    ends_call: tok.is_punct(")") || tok.is_punct("->"),
                });
                Ok(())
            }
        }
    }

    fn end_header_or_statement(&mut self) {
        let top = self.top();
        if top.header == Header::Body {
            self.finish_statement();
        } else {
            top.header = Header::Body;
        }
    }

    fn newline(&mut self, tok: &Token<'a>) {
        if !self.at_frame_level() {
            return;
        }
        let top = self.frames.last().map(|f| (f.kind, f.header));
        let in_block_params = matches!(top, Some((FrameKind::Do | FrameKind::Brace, Header::Line)));
        if let Some(last) = self.last {
            let params_closed = in_block_params && last.text_is_pipe;
            if last.continues && !params_closed {
                return;
            }
        }
        if self.leading_dot_follows(tok.end) {
            return;
        }
        self.end_header_or_statement();
        self.last = None;
    }

    /// A following line that starts with `.meth` or `&.meth` continues the statement.
    fn leading_dot_follows(&self, from: usize) -> bool {
        for line in self.src[from.min(self.src.len())..].split('\n') {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                continue;
            }
            return (trimmed.starts_with('.') && !trimmed.starts_with("..")) || trimmed.starts_with("&.");
        }
        false
    }

    fn touch(&mut self, tok: &Token<'a>) {
        let top = self.top();
        if top.header != Header::Body {
            return;
        }
        let open = top.stmt.get_or_insert(Open {
            start: tok.start,
            end: tok.end,
            line: tok.end_line,
            wrappable: true,
        });
        open.end = tok.end;
        open.line = tok.end_line;
        if tok.keyword && UNWRAPPABLE.contains(&tok.text) {
            open.wrappable = false;
        }
        if open.start == tok.start && tok.kind == TokenKind::Ident && tok.text == "using" {
            open.wrappable = false;
        }
    }

    fn finish_statement(&mut self) {
        let depth = self.frames.len();
        let top = self.top();
        if let Some(open) = top.stmt.take() {
            if open.wrappable {
                self.out.statements.push(Statement {
                    start: open.start,
                    end: open.end,
                    line: open.line,
                    depth,
                });
            }
        }
    }

    fn push_frame(&mut self, kind: FrameKind, tok: &Token<'a>, header: Header) {
        self.touch(tok);
        let base = self.brackets.len();
        self.frames.push(Frame::new(kind, tok.line, base, header));
    }

    fn pop_frame(&mut self, tok: &Token<'a>) -> Result<(), SyntaxError> {
        let top = self.frames.last().map(|f| f.kind).unwrap_or(FrameKind::Program);
        if let Some((open, line)) = self.brackets.last().copied() {
            if self.brackets.len() > self.frames.last().map(|f| f.bracket_base).unwrap_or(0) {
                return Err(self.error(
                    tok.line,
                    format!("unexpected '{}', expecting closing for '{}' opened on line {}", tok.text, open, line),
                ));
            }
        }
        if top == FrameKind::Program {
            return Err(self.error(tok.line, format!("unexpected '{}'", tok.text)));
        }
        self.finish_statement();
        self.frames.pop();
        self.touch(tok);
        Ok(())
    }

    /// `if`, `unless`, `while`, `until` open a block only at expression start.
    fn opens_block(&self) -> bool {
        match self.last {
            None => true,
            Some(last) => !last.modifier_position,
        }
    }

    fn is_brace_block(&self, tok: &Token<'a>) -> bool {
        let after_call = match self.last {
            Some(last) => match last.kind {
                TokenKind::Ident => !last.keyword,
                TokenKind::Punct => last.ends_call,
                _ => false,
            },
            None => false,
        };
        after_call && self.block_body_on_next_line(tok.end)
    }

    fn block_body_on_next_line(&self, from: usize) -> bool {
        let rest = &self.src[from..];
        let line = rest.split('\n').next().unwrap_or("");
        let mut tail = line.trim_start();
        if let Some(params) = tail.strip_prefix('|') {
            match params.find('|') {
                Some(close) => tail = params[close + 1..].trim_start(),
                None => return false,
            }
        }
        let tail = tail.trim_end_matches('\r');
        tail.is_empty() || tail.starts_with('#')
    }

    fn clause(&mut self, tok: &Token<'a>, header: Header) -> Result<(), SyntaxError> {
        let kind = self.frames.last().map(|f| f.kind).unwrap_or(FrameKind::Program);
        if matches!(kind, FrameKind::Program | FrameKind::Brace) || !self.at_frame_level() {
            return Err(self.error(tok.line, format!("unexpected '{}'", tok.text)));
        }
        self.finish_statement();
        self.top().header = header;
        Ok(())
    }

    fn close_bracket(&mut self, tok: &Token<'a>) -> Result<(), SyntaxError> {
        let expected = match tok.text {
            ")" => "(",
            "]" => "[",
            _ => "{",
        };
        let base = self.frames.last().map(|f| f.bracket_base).unwrap_or(0);
        match self.brackets.last().copied() {
            Some((open, _)) if self.brackets.len() > base && open == expected => {
                self.brackets.pop();
                Ok(())
            }
            Some((open, line)) if self.brackets.len() > base => Err(self.error(
                tok.line,
                format!("unexpected '{}', expecting closing for '{}' opened on line {}", tok.text, open, line),
            )),
            _ => {
                let top = self.frames.last().map(|f| (f.kind, f.line));
                match top {
                    Some((FrameKind::Program, _)) | None => {
                        Err(self.error(tok.line, format!("unexpected '{}'", tok.text)))
                    }
                    Some((kind, line)) => Err(self.error(
                        tok.line,
                        format!("unexpected '{}', expecting 'end' for '{}' opened on line {}", tok.text, kind.name(), line),
                    )),
                }
            }
        }
    }

    fn code(&mut self, tok: Token<'a>) -> Result<(), SyntaxError> {
        if self.def_header(&tok)? {
            return Ok(());
        }
        if self.top().header == Header::BlockStart {
            if tok.is_punct("|") {
                self.top().header = Header::Line;
                return Ok(());
            }
            self.top().header = Header::Body;
        }

        if tok.keyword {
            match tok.text {
                "end" => return self.pop_frame(&tok),
                "else" | "ensure" => return self.clause(&tok, Header::Body),
                "elsif" | "when" => return self.clause(&tok, Header::Line),
                "rescue" => {
                    let top = self.frames.last();
                    let is_clause = top
                        .map(|f| f.kind.accepts_rescue() && f.stmt.is_none() && f.header == Header::Body)
                        .unwrap_or(false);
                    if is_clause && self.at_frame_level() {
                        return self.clause(&tok, Header::Line);
                    }
                }
                "in" => {
                    let top = self.frames.last();
                    let is_clause = top
                        .map(|f| f.kind == FrameKind::Case && f.stmt.is_none() && f.header == Header::Body)
                        .unwrap_or(false);
                    if is_clause && self.at_frame_level() {
                        return self.clause(&tok, Header::Line);
                    }
                }
                "then" => {
                    if self.top().header == Header::Line && self.at_frame_level() {
                        self.top().header = Header::Body;
                    }
                    return Ok(());
                }
                "do" => {
                    let top = self.frames.last().map(|f| (f.kind, f.header));
                    if let Some((FrameKind::While | FrameKind::Until | FrameKind::For, Header::Line)) = top {
                        if self.at_frame_level() {
                            self.top().header = Header::Body;
                            return Ok(());
                        }
                    }
                    self.push_frame(FrameKind::Do, &tok, Header::BlockStart);
                    return Ok(());
                }
                "if" | "unless" | "while" | "until" if self.opens_block() => {
                    let kind = match tok.text {
                        "if" => FrameKind::If,
                        "unless" => FrameKind::Unless,
                        "while" => FrameKind::While,
                        _ => FrameKind::Until,
                    };
                    self.push_frame(kind, &tok, Header::Line);
                    return Ok(());
                }
                "def" => {
                    self.push_frame(FrameKind::Def, &tok, Header::DefName);
                    return Ok(());
                }
                "class" | "module" | "case" | "for" => {
                    let kind = match tok.text {
                        "class" => FrameKind::Class,
                        "module" => FrameKind::Module,
                        "case" => FrameKind::Case,
                        _ => FrameKind::For,
                    };
                    self.push_frame(kind, &tok, Header::Line);
                    return Ok(());
                }
                "begin" => {
                    self.push_frame(FrameKind::Begin, &tok, Header::Body);
                    return Ok(());
                }
                _ => {}
            }
        }

        if tok.kind == TokenKind::Punct {
            match tok.text {
                "{" if self.is_brace_block(&tok) => {
                    self.touch(&tok);
                    self.brackets.push(("{", tok.line));
                    let base = self.brackets.len();
                    self.frames.push(Frame::new(FrameKind::Brace, tok.line, base, Header::BlockStart));
                    return Ok(());
                }
                "}" if self.frames.last().map(|f| f.kind == FrameKind::Brace).unwrap_or(false)
                    && self.at_frame_level() =>
                {
                    self.finish_statement();
                    self.frames.pop();
                    self.brackets.pop();
                    self.touch(&tok);
                    return Ok(());
                }
                "(" | "[" | "{" => {
                    self.touch(&tok);
                    self.brackets.push((tok.text, tok.line));
                    return Ok(());
                }
                ")" | "]" | "}" => {
                    self.close_bracket(&tok)?;
                    self.touch(&tok);
                    return Ok(());
                }
                _ => {}
            }
        }

        self.touch(&tok);
        Ok(())
    }

    /// Track `def name(params)`; returns true when the token was consumed.
    fn def_header(&mut self, tok: &Token<'a>) -> Result<bool, SyntaxError> {
        let header = self.top().header;
        match header {
            Header::DefName => {
                if tok.def_name {
                    self.top().header = Header::DefAfterName;
                }
                Ok(true)
            }
            Header::DefAfterName | Header::DefAfterParams => {
                if tok.is_punct("(") && header == Header::DefAfterName {
                    self.brackets.push(("(", tok.line));
                    let depth = self.brackets.len();
                    self.top().header = Header::DefParams(depth);
                    return Ok(true);
                }
                if tok.is_punct("=") {
                    // Endless method: no `end`, the def is an expression of the enclosing statement.
                    self.frames.pop();
                    return Ok(false);
                }
                self.top().header = Header::Line;
                Ok(false)
            }
            Header::DefParams(depth) => {
                if tok.is_punct(")") && self.brackets.len() == depth {
                    self.brackets.pop();
                    self.top().header = Header::DefAfterParams;
                    return Ok(true);
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn finish(&mut self, tok: Token<'a>) -> Result<(), SyntaxError> {
        if let Some((open, line)) = self.brackets.last().copied() {
            return Err(self.error(line, format!("unexpected end-of-input, unclosed '{}'", open)));
        }
        if self.frames.len() > 1 {
            let frame = &self.frames[self.frames.len() - 1];
            return Err(self.error(
                frame.line,
                format!("unexpected end-of-input, missing 'end' for '{}'", frame.kind.name()),
            ));
        }
        if self.last.map(|last| last.continues).unwrap_or(false) {
            return Err(self.error(tok.line.saturating_sub(1).max(1), "unexpected end-of-input"));
        }
        self.end_header_or_statement();
        Ok(())
    }
}

fn continues_line(tok: &Token<'_>) -> bool {
    match tok.kind {
        TokenKind::Punct => CONTINUATION_OPS.contains(&tok.text),
        TokenKind::Ident if tok.keyword => matches!(tok.text, "and" | "or" | "not"),
        _ => false,
    }
}

/// Whether a following `if`/`while`/... would be a modifier.
fn modifier_position(tok: &Token<'_>) -> bool {
    match tok.kind {
        TokenKind::Ident if tok.keyword => MODIFIER_AFTER.contains(&tok.text),
        TokenKind::Ident | TokenKind::Const | TokenKind::Var | TokenKind::Number | TokenKind::Literal => true,
        TokenKind::Punct => matches!(tok.text, ")" | "]" | "}" | "->"),
        _ => false,
    }
}
