//! Ruby tokenizer, precise enough to find statement boundaries.
//!
//! It does not build an AST. It only has to know where literals start and end
//! (so nothing inside them is ever touched), which words are keywords, and
//! which punctuation opens or closes a bracket.

use std::collections::HashSet;

use super::SyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident,
    Const,
    Var,
    Number,
    Literal,
    Label,
    Punct,
    Newline,
    Semicolon,
    Comment,
    Eof,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub end_line: usize,
    pub keyword: bool,
    /// Name of the method in a `def` header.
    pub def_name: bool,
}

impl Token<'_> {
    pub fn is_punct(&self, text: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == text
    }
}

const KEYWORDS: &[&str] = &[
    "alias", "and", "begin", "BEGIN", "break", "case", "class", "def", "defined?", "do", "else",
    "elsif", "end", "END", "ensure", "false", "for", "if", "in", "module", "next", "nil", "not",
    "or", "redo", "rescue", "retry", "return", "self", "super", "then", "true", "undef", "unless",
    "until", "when", "while", "yield", "__FILE__", "__LINE__", "__ENCODING__",
];

/// Keywords after which an operator-looking character is a binary operator.
const VALUE_KEYWORDS: &[&str] = &[
    "end", "self", "nil", "true", "false", "__FILE__", "__LINE__", "__ENCODING__",
];

const OPERATORS: &[&str] = &[
    "**=", "<=>", "===", "...", "<<=", ">>=", "&&=", "||=", "&.", "**", "==", "!=", ">=", "<=",
    "&&", "||", "<<", ">>", "=~", "!~", "..", "::", "->", "=>", "+=", "-=", "*=", "/=", "%=", "|=",
    "&=", "^=",
];

/// Operators that assign to the identifier on their left.
const ASSIGNMENTS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "|=", "&=", "^=", "<<=", ">>=", "&&=", "||=",
];

const METHOD_OPERATORS: &[&str] = &[
    "[]=", "[]", "<=>", "===", "==", "=~", "!=", "!~", "+@", "-@", "**", "<<", ">>", "<=", ">=",
    "+", "-", "*", "/", "%", "<", ">", "!", "~", "&", "|", "^",
];

#[derive(Debug)]
struct Heredoc {
    id: String,
    indented: bool,
    line: usize,
}

pub(crate) struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    prev_value: bool,
    prev_ident: bool,
    prev_dot: bool,
    def_name_pending: bool,
    /// Names assigned so far or bound as block and method parameters.
    locals: HashSet<&'a str>,
    /// Previous token, when it was a bare identifier (no receiver, not a keyword).
    prev_bare: Option<&'a str>,
    prev_local: bool,
    prev_keyword: Option<&'a str>,
    prev_opens_block: bool,
    in_block_params: bool,
    /// Paren depth inside a `def` parameter list.
    def_params: Option<usize>,
    heredocs: Vec<Heredoc>,
    /// Inclusive line ranges whose line ends are not code.
    pub opaque_lines: Vec<(usize, usize)>,
    done: bool,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn closing_delimiter(open: u8) -> Option<u8> {
    match open {
        b'(' => Some(b')'),
        b'[' => Some(b']'),
        b'{' => Some(b'}'),
        b'<' => Some(b'>'),
        _ => None,
    }
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            prev_value: false,
            prev_ident: false,
            prev_dot: false,
            def_name_pending: false,
            locals: HashSet::new(),
            prev_bare: None,
            prev_local: false,
            prev_keyword: None,
            prev_opens_block: false,
            in_block_params: false,
            def_params: None,
            heredocs: Vec::new(),
            opaque_lines: Vec::new(),
            done: false,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn at_line_start(&self) -> bool {
        self.pos == 0 || self.bytes[self.pos - 1] == b'\n'
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn error(&self, line: usize, explanation: impl Into<String>) -> SyntaxError {
        SyntaxError {
            line_number: line,
            explanation: explanation.into(),
            filename: None,
        }
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    /// Whether an ambiguous character (`/`, `%`, `<<`, `?`) starts a literal.
    ///
    /// After a known local variable it is always an operator: `x /2` divides.
    fn literal_position(&self, space_before: bool, next: Option<u8>) -> bool {
        if !self.prev_value {
            return true;
        }
        if self.prev_local {
            return false;
        }
        let spaced_arg = matches!(next, Some(b) if !b.is_ascii_whitespace() && b != b'=');
        self.prev_ident && space_before && spaced_arg
    }

    fn make(&self, kind: TokenKind, start: usize, line: usize) -> Token<'a> {
        Token {
            kind,
            text: &self.src[start..self.pos],
            start,
            end: self.pos,
            line,
            end_line: self.line,
            keyword: false,
            def_name: false,
        }
    }

    pub fn next_token(&mut self) -> Result<Token<'a>, SyntaxError> {
        let token = self.lex()?;
        self.remember(&token);
        Ok(token)
    }

    fn remember(&mut self, token: &Token<'a>) {
        if token.kind == TokenKind::Comment {
            return;
        }
        self.bind_locals(token);
        let bare = token.kind == TokenKind::Ident && !token.keyword && !token.def_name && !self.prev_dot;
        self.prev_local = bare && self.locals.contains(token.text);
        self.prev_bare = bare.then_some(token.text);
        self.prev_keyword = token.keyword.then_some(token.text);
        self.prev_opens_block = (token.keyword && token.text == "do") || token.is_punct("{");
        match token.kind {
            TokenKind::Ident if token.keyword => {
                self.prev_value = VALUE_KEYWORDS.contains(&token.text);
                self.prev_ident = false;
            }
            TokenKind::Ident => {
                self.prev_value = true;
                self.prev_ident = true;
            }
            TokenKind::Const | TokenKind::Var | TokenKind::Number | TokenKind::Literal => {
                self.prev_value = true;
                self.prev_ident = false;
            }
            TokenKind::Punct => {
                self.prev_value = matches!(token.text, ")" | "]" | "}");
                self.prev_ident = false;
            }
            _ => {
                self.prev_value = false;
                self.prev_ident = false;
            }
        }
        self.prev_dot = token.kind == TokenKind::Punct && matches!(token.text, "." | "&." | "::");
    }

    /// Record names that become local variables: assignment targets, block
    /// parameters, and method parameters. Scopes are not tracked.
    fn bind_locals(&mut self, token: &Token<'a>) {
        let param = match token.kind {
            TokenKind::Ident if !token.keyword && !self.prev_dot => Some(token.text),
            TokenKind::Label => Some(token.text.trim_end_matches(':')),
            _ => None,
        };
        if self.in_block_params {
            if token.is_punct("|") {
                self.in_block_params = false;
            } else if let Some(name) = param {
                self.locals.insert(name);
            }
            return;
        }
        if self.prev_opens_block && token.is_punct("|") {
            self.in_block_params = true;
            return;
        }
        if let Some(depth) = self.def_params {
            match token.kind {
                TokenKind::Punct if token.text == "(" => self.def_params = Some(depth + 1),
                TokenKind::Punct if token.text == ")" => self.def_params = (depth > 1).then(|| depth - 1),
                TokenKind::Newline | TokenKind::Semicolon if depth == 0 => self.def_params = None,
                _ => {
                    if let Some(name) = param {
                        self.locals.insert(name);
                    }
                }
            }
        }
        if token.def_name {
            self.def_params = Some(0);
        }
        if token.kind == TokenKind::Punct && ASSIGNMENTS.contains(&token.text) {
            if let Some(name) = self.prev_bare {
                self.locals.insert(name);
            }
        }
    }

    fn lex(&mut self) -> Result<Token<'a>, SyntaxError> {
        let mut space_before = false;
        loop {
            if self.done {
                return Ok(self.make(TokenKind::Eof, self.pos, self.line));
            }
            if self.at_line_start() {
                if self.rest().starts_with("=begin") && self.word_ends_at(self.pos + 6) {
                    self.skip_embedded_doc()?;
                    continue;
                }
                if self.rest().starts_with("__END__") && self.line_ends_at(self.pos + 7) {
                    let last = self.src.lines().count().max(self.line);
                    self.opaque_lines.push((self.line, last));
                    self.done = true;
                    continue;
                }
            }
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | 0x0c) => {
                    self.pos += 1;
                    space_before = true;
                }
                Some(b'\\') if matches!(self.peek_at(1), Some(b'\n')) => {
                    self.opaque_lines.push((self.line, self.line));
                    self.pos += 1;
                    self.bump();
                    space_before = true;
                }
                Some(b'\\') if self.peek_at(1) == Some(b'\r') && self.peek_at(2) == Some(b'\n') => {
                    self.opaque_lines.push((self.line, self.line));
                    self.pos += 2;
                    self.bump();
                    space_before = true;
                }
                None => {
                    if let Some(doc) = self.heredocs.first() {
                        return Err(self.error(doc.line, format!("unterminated heredoc '{}'", doc.id)));
                    }
                    self.done = true;
                }
                Some(_) => break,
            }
        }

        let start = self.pos;
        let line = self.line;
        let b = self.bytes[self.pos];

        if self.def_name_pending {
            return self.lex_def_name(start, line);
        }

        match b {
            b'\n' => {
                self.bump();
                self.read_heredoc_bodies()?;
                let mut tok = self.make(TokenKind::Newline, start, line);
                tok.text = "\n";
                Ok(tok)
            }
            b'#' => {
                while !matches!(self.peek(), None | Some(b'\n')) {
                    self.pos += 1;
                }
                Ok(self.make(TokenKind::Comment, start, line))
            }
            b';' => {
                self.pos += 1;
                Ok(self.make(TokenKind::Semicolon, start, line))
            }
            b'"' | b'`' => {
                self.pos += 1;
                self.skip_delimited(line, b, None, true)?;
                Ok(self.make(TokenKind::Literal, start, line))
            }
            b'\'' => {
                self.pos += 1;
                self.skip_delimited(line, b'\'', None, false)?;
                Ok(self.make(TokenKind::Literal, start, line))
            }
            b':' => self.lex_colon(start, line),
            b'@' => {
                self.pos += 1;
                if self.peek() == Some(b'@') {
                    self.pos += 1;
                }
                self.skip_ident_chars();
                Ok(self.make(TokenKind::Var, start, line))
            }
            b'$' => {
                self.pos += 1;
                match self.peek() {
                    Some(c) if is_ident_char(c) => self.skip_ident_chars(),
                    Some(b'-') => self.pos += 2.min(self.bytes.len() - self.pos),
                    Some(c) if !c.is_ascii_whitespace() => self.pos += 1,
                    _ => {}
                }
                Ok(self.make(TokenKind::Var, start, line))
            }
            b'0'..=b'9' => {
                self.lex_number();
                Ok(self.make(TokenKind::Number, start, line))
            }
            c if is_ident_start(c) => self.lex_word(start, line),
            b'%' if self.literal_position(space_before, self.peek_at(1)) && self.percent_literal_ahead() => {
                self.skip_percent_literal(line)?;
                Ok(self.make(TokenKind::Literal, start, line))
            }
            b'/' if self.literal_position(space_before, self.peek_at(1)) => {
                self.pos += 1;
                self.skip_delimited(line, b'/', None, true)?;
                self.skip_flags();
                Ok(self.make(TokenKind::Literal, start, line))
            }
            b'?' if !self.prev_value && self.char_literal_ahead() => {
                self.pos += 1;
                if self.peek() == Some(b'\\') {
                    self.skip_char_escape();
                } else {
                    self.skip_char();
                }
                Ok(self.make(TokenKind::Literal, start, line))
            }
            b'<' if self.rest().starts_with("<<") && self.heredoc_ahead(space_before) => {
                self.lex_heredoc_start(line)?;
                Ok(self.make(TokenKind::Literal, start, line))
            }
            _ => {
                let op = OPERATORS
                    .iter()
                    .find(|op| self.rest().starts_with(**op))
                    .map(|op| op.len())
                    .unwrap_or(1);
                self.pos += op;
                Ok(self.make(TokenKind::Punct, start, line))
            }
        }
    }

    fn word_ends_at(&self, at: usize) -> bool {
        matches!(self.bytes.get(at), None | Some(b' ' | b'\t' | b'\r' | b'\n'))
    }

    fn line_ends_at(&self, at: usize) -> bool {
        matches!(self.bytes.get(at), None | Some(b'\r' | b'\n'))
    }

    fn skip_ident_chars(&mut self) {
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.pos += 1;
        }
    }

    /// Skip one whole character, however many bytes it takes.
    fn skip_char(&mut self) {
        self.bump();
        while matches!(self.peek(), Some(c) if (0x80..0xC0).contains(&c)) {
            self.pos += 1;
        }
    }

    /// `\n`, `\é`, `\u00e9`, `\u{1F600}`, `\C-a`, `\M-\C-a` after a `?`.
    fn skip_char_escape(&mut self) {
        self.pos += 1;
        match self.peek() {
            Some(b'u') if self.peek_at(1) == Some(b'{') => {
                while !matches!(self.peek(), None | Some(b'}' | b'\n')) {
                    self.pos += 1;
                }
                if self.peek() == Some(b'}') {
                    self.pos += 1;
                }
            }
            Some(b'u') => {
                self.pos += 1;
                let mut digits = 0;
                while digits < 4 && matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                    self.pos += 1;
                    digits += 1;
                }
            }
            Some(b'C' | b'M') if self.peek_at(1) == Some(b'-') => {
                self.pos += 2;
                if self.peek() == Some(b'\\') {
                    self.skip_char_escape();
                } else {
                    self.skip_char();
                }
            }
            Some(_) => self.skip_char(),
            None => {}
        }
    }

    fn skip_flags(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
    }

    fn skip_embedded_doc(&mut self) -> Result<(), SyntaxError> {
        let first = self.line;
        loop {
            while !matches!(self.peek(), None | Some(b'\n')) {
                self.pos += 1;
            }
            if self.bump().is_none() {
                return Err(self.error(first, "embedded document meets end of file"));
            }
            if self.rest().starts_with("=end") && self.word_ends_at(self.pos + 4) {
                while !matches!(self.peek(), None | Some(b'\n')) {
                    self.pos += 1;
                }
                self.opaque_lines.push((first, self.line));
                return Ok(());
            }
        }
    }

    fn lex_number(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_alphanumeric() || c == b'_' => {
                    let exponent = matches!(c, b'e' | b'E');
                    self.pos += 1;
                    if exponent && matches!(self.peek(), Some(b'+' | b'-')) {
                        self.pos += 1;
                    }
                }
                Some(b'.') if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => {
                    self.pos += 1;
                }
                _ => break,
            }
        }
    }

    fn lex_word(&mut self, start: usize, line: usize) -> Result<Token<'a>, SyntaxError> {
        self.skip_ident_chars();
        if matches!(self.peek(), Some(b'?' | b'!')) {
            let after = self.peek_at(1);
            let assign = after == Some(b'=') && !matches!(self.peek_at(2), Some(b'=' | b'~'));
            if !assign {
                self.pos += 1;
            }
        }
        if self.peek() == Some(b':') && self.peek_at(1) != Some(b':') && !self.prev_dot {
            let text = &self.src[start..self.pos];
            if !text.ends_with('?') || self.peek_at(1) == Some(b' ') {
                self.pos += 1;
                return Ok(self.make(TokenKind::Label, start, line));
            }
        }
        let text = &self.src[start..self.pos];
        let kind = if self.bytes[start].is_ascii_uppercase() {
            TokenKind::Const
        } else {
            TokenKind::Ident
        };
        let mut token = self.make(kind, start, line);
        token.keyword = !self.prev_dot && KEYWORDS.contains(&text);
        if token.keyword {
            token.kind = TokenKind::Ident;
            if text == "def" {
                self.def_name_pending = true;
            }
        }
        Ok(token)
    }

    /// `def name`, `def self.name`, `def name=`, `def ==`.
    fn lex_def_name(&mut self, start: usize, line: usize) -> Result<Token<'a>, SyntaxError> {
        let b = self.bytes[start];
        if is_ident_start(b) {
            self.skip_ident_chars();
            if self.peek() == Some(b'.') {
                return Ok(self.make(TokenKind::Ident, start, line));
            }
            match self.peek() {
                Some(b'?' | b'!') => self.pos += 1,
                Some(b'=') if !matches!(self.peek_at(1), Some(b'=' | b'~' | b'>' | b' ' | b'\t')) => {
                    self.pos += 1
                }
                _ => {}
            }
            self.def_name_pending = false;
            let mut token = self.make(TokenKind::Ident, start, line);
            token.def_name = true;
            return Ok(token);
        }
        if b == b'.' {
            self.pos += 1;
            return Ok(self.make(TokenKind::Punct, start, line));
        }
        self.def_name_pending = false;
        match METHOD_OPERATORS.iter().find(|op| self.rest().starts_with(**op)) {
            Some(op) => {
                self.pos += op.len();
                let mut token = self.make(TokenKind::Ident, start, line);
                token.def_name = true;
                Ok(token)
            }
            None => self.lex(),
        }
    }

    fn lex_colon(&mut self, start: usize, line: usize) -> Result<Token<'a>, SyntaxError> {
        self.pos += 1;
        match self.peek() {
            Some(b':') => {
                self.pos += 1;
                Ok(self.make(TokenKind::Punct, start, line))
            }
            Some(q @ (b'"' | b'\'')) => {
                self.pos += 1;
                self.skip_delimited(line, q, None, q == b'"')?;
                Ok(self.make(TokenKind::Literal, start, line))
            }
            Some(c) if is_ident_start(c) || c == b'@' || c == b'$' => {
                while matches!(self.peek(), Some(b'@' | b'$')) {
                    self.pos += 1;
                }
                self.skip_ident_chars();
                if matches!(self.peek(), Some(b'?' | b'!' | b'='))
                    && !matches!(self.peek_at(1), Some(b'=' | b'>' | b'~'))
                {
                    self.pos += 1;
                }
                Ok(self.make(TokenKind::Literal, start, line))
            }
            Some(_) if !self.prev_value => {
                if let Some(op) = METHOD_OPERATORS.iter().find(|op| self.rest().starts_with(**op)) {
                    self.pos += op.len();
                    return Ok(self.make(TokenKind::Literal, start, line));
                }
                Ok(self.make(TokenKind::Punct, start, line))
            }
            _ => Ok(self.make(TokenKind::Punct, start, line)),
        }
    }

    fn char_literal_ahead(&self) -> bool {
        match self.peek_at(1) {
            None => false,
            Some(c) if c.is_ascii_whitespace() => false,
            Some(b'\\') => true,
            Some(c) if c >= 0x80 => true,
            Some(_) => !matches!(self.peek_at(2), Some(c) if is_ident_char(c)),
        }
    }

    fn percent_literal_ahead(&self) -> bool {
        match self.peek_at(1) {
            Some(b'q' | b'Q' | b'w' | b'W' | b'i' | b'I' | b'r' | b's' | b'x') => {
                matches!(self.peek_at(2), Some(d) if !d.is_ascii_alphanumeric() && !d.is_ascii_whitespace())
            }
            Some(d) => !d.is_ascii_alphanumeric() && !d.is_ascii_whitespace() && d != b'=',
            None => false,
        }
    }

    fn skip_percent_literal(&mut self, line: usize) -> Result<(), SyntaxError> {
        self.pos += 1;
        let kind = match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => {
                self.pos += 1;
                c
            }
            _ => b'Q',
        };
        let open = self.bump().unwrap_or(b'(');
        let interpolate = matches!(kind, b'Q' | b'W' | b'I' | b'r' | b'x');
        match closing_delimiter(open) {
            Some(close) => self.skip_delimited(line, close, Some(open), interpolate)?,
            None => self.skip_delimited(line, open, None, interpolate)?,
        }
        if kind == b'r' {
            self.skip_flags();
        }
        Ok(())
    }

    /// Skip past the closing delimiter of a literal whose opener was consumed.
    fn skip_delimited(
        &mut self,
        line: usize,
        close: u8,
        open: Option<u8>,
        interpolate: bool,
    ) -> Result<(), SyntaxError> {
        let mut depth = 0usize;
        let mut in_class = false;
        loop {
            let Some(b) = self.bump() else {
                return Err(self.error(line, "unterminated literal meets end of file"));
            };
            match b {
                b'\\' => {
                    self.bump();
                }
                b'#' if interpolate && self.peek() == Some(b'{') => {
                    self.pos += 1;
                    self.skip_interpolation(line)?;
                }
                b'[' if close == b'/' => in_class = true,
                b']' if close == b'/' => in_class = false,
                _ if Some(b) == open => depth += 1,
                _ if b == close && !in_class => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
    }

    fn skip_interpolation(&mut self, line: usize) -> Result<(), SyntaxError> {
        let saved = (self.prev_value, self.prev_ident, self.prev_dot);
        let pending = std::mem::take(&mut self.heredocs);
        self.prev_value = false;
        self.prev_ident = false;
        self.prev_dot = false;
        let mut depth = 0usize;
        loop {
            let token = self.next_token()?;
            match token.kind {
                TokenKind::Eof => {
                    return Err(self.error(line, "unterminated string interpolation"));
                }
                TokenKind::Punct if token.text == "{" => depth += 1,
                TokenKind::Punct if token.text == "}" => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        self.heredocs = pending;
        (self.prev_value, self.prev_ident, self.prev_dot) = saved;
        Ok(())
    }

    fn heredoc_ahead(&self, space_before: bool) -> bool {
        // `class <<self` opens a singleton class
        if self.prev_keyword == Some("class") {
            return false;
        }
        let mut at = 2;
        if matches!(self.peek_at(at), Some(b'~' | b'-')) {
            at += 1;
        }
        let starts_id = matches!(self.peek_at(at), Some(c) if is_ident_start(c) || matches!(c, b'"' | b'\'' | b'`'));
        starts_id && self.literal_position(space_before, self.peek_at(2))
    }

    fn lex_heredoc_start(&mut self, line: usize) -> Result<(), SyntaxError> {
        self.pos += 2;
        let indented = matches!(self.peek(), Some(b'~' | b'-'));
        if indented {
            self.pos += 1;
        }
        let id = match self.peek() {
            Some(q @ (b'"' | b'\'' | b'`')) => {
                self.pos += 1;
                let from = self.pos;
                while !matches!(self.peek(), None | Some(b'\n')) && self.peek() != Some(q) {
                    self.pos += 1;
                }
                if self.peek() != Some(q) {
                    return Err(self.error(line, "unterminated heredoc identifier"));
                }
                let id = self.src[from..self.pos].to_string();
                self.pos += 1;
                id
            }
            _ => {
                let from = self.pos;
                self.skip_ident_chars();
                self.src[from..self.pos].to_string()
            }
        };
        self.heredocs.push(Heredoc { id, indented, line });
        Ok(())
    }

    fn read_heredoc_bodies(&mut self) -> Result<(), SyntaxError> {
        let docs = std::mem::take(&mut self.heredocs);
        for doc in docs {
            let first = self.line;
            loop {
                if self.pos >= self.bytes.len() {
                    return Err(self.error(doc.line, format!("unterminated heredoc '{}'", doc.id)));
                }
                let end = self.rest().find('\n').map(|i| self.pos + i).unwrap_or(self.bytes.len());
                let content = self.src[self.pos..end].trim_end_matches('\r');
                let terminated = if doc.indented {
                    content.trim() == doc.id
                } else {
                    content == doc.id
                };
                let body_line = self.line;
                self.pos = end;
                if self.bump().is_none() {
                    self.line = body_line + 1;
                }
                if terminated {
                    self.opaque_lines.push((first, body_line));
                    break;
                }
            }
        }
        Ok(())
    }
}
