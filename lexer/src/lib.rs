use std::collections::VecDeque;

use token::{Token, TokenKind};

pub const DEFAULT_LEFT_DELIM: &str = "{{";
pub const DEFAULT_RIGHT_DELIM: &str = "}}";

const LEFT_COMMENT: &str = "/*";
const RIGHT_COMMENT: &str = "*/";

const DECIMAL_DIGITS: &str = "0123456789";
const HEX_DIGITS: &str = "0123456789abcdefABCDEF";

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    /// Scanning literal text up to the next left delimiter
    Text,
    /// Scanning the tokens of one action
    Action,
    /// Input exhausted or a lexing error reported; only `Eof` from here
    Done,
}

/// Streaming lexer over one template source.
///
/// Tokens are produced on demand by [`Lexer::next_token`]. After the end
/// of input (or an error token) `Eof` tokens are returned forever. The
/// `Iterator` impl yields every token before `Eof`, which is what the
/// tests want; the parser pulls tokens itself.
pub struct Lexer {
    input: String,
    left_delim: String,
    right_delim: String,
    /// Start of the token being scanned (byte offset)
    start: usize,
    /// Current scan position (byte offset)
    pos: usize,
    /// One-based line at `pos`
    line: usize,
    /// One-based line at `start`
    start_line: usize,
    paren_depth: isize,
    state: State,
    pending: VecDeque<Token>,
    eof_yielded: bool,
}

impl Lexer {
    /// Create a lexer for `input`. Empty or absent delimiters fall back
    /// to `{{` and `}}`.
    pub fn new(input: impl Into<String>, left_delim: Option<&str>, right_delim: Option<&str>) -> Self {
        let left = match left_delim {
            Some(delim) if !delim.is_empty() => delim.to_string(),
            _ => DEFAULT_LEFT_DELIM.to_string(),
        };
        let right = match right_delim {
            Some(delim) if !delim.is_empty() => delim.to_string(),
            _ => DEFAULT_RIGHT_DELIM.to_string(),
        };

        Self {
            input: input.into(),
            left_delim: left,
            right_delim: right,
            start: 0,
            pos: 0,
            line: 1,
            start_line: 1,
            paren_depth: 0,
            state: State::Text,
            pending: VecDeque::new(),
            eof_yielded: false,
        }
    }

    /// Return the next token, running the state machine as far as needed
    pub fn next_token(&mut self) -> Token {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return token;
            }
            match self.state {
                State::Text => self.lex_text(),
                State::Action => self.lex_action(),
                State::Done => return Token::eof(self.input.len(), self.line),
            }
        }
    }

    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.rest().chars().next()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn backup(&mut self, c: char) {
        self.pos -= c.len_utf8();
        if c == '\n' {
            self.line -= 1;
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Advance over `n` bytes, keeping the line count in step
    fn advance(&mut self, n: usize) {
        self.line += self.input[self.pos..self.pos + n].matches('\n').count();
        self.pos += n;
    }

    fn accept(&mut self, want: char) -> bool {
        if self.peek_char() == Some(want) {
            self.next_char();
            return true;
        }
        false
    }

    fn accept_any(&mut self, set: &str) -> bool {
        match self.peek_char() {
            Some(c) if set.contains(c) => {
                self.next_char();
                true
            }
            _ => false,
        }
    }

    fn accept_run(&mut self, set: &str) {
        while self.accept_any(set) {}
    }

    fn emit(&mut self, kind: TokenKind) {
        let token = Token::new(kind, &self.input[self.start..self.pos], self.start, self.start_line);
        self.pending.push_back(token);
        self.start = self.pos;
        self.start_line = self.line;
    }

    /// Drop the pending input without emitting anything
    fn ignore(&mut self) {
        self.start = self.pos;
        self.start_line = self.line;
    }

    /// Report a lexing error and halt; the parser treats this as fatal
    fn errorf(&mut self, message: impl Into<String>) {
        let token = Token::new(TokenKind::Error, message, self.start, self.start_line);
        self.pending.push_back(token);
        self.state = State::Done;
    }

    fn lex_text(&mut self) {
        match self.rest().find(&self.left_delim) {
            Some(offset) => {
                self.advance(offset);
                if self.pos > self.start {
                    self.emit(TokenKind::Text);
                }
                let after_delim = self.pos + self.left_delim.len();
                if self.input[after_delim..].starts_with(LEFT_COMMENT) {
                    self.advance(self.left_delim.len());
                    self.ignore();
                    self.lex_comment();
                } else {
                    self.advance(self.left_delim.len());
                    self.emit(TokenKind::LeftDelim);
                    self.state = State::Action;
                }
            }
            None => {
                self.advance(self.rest().len());
                if self.pos > self.start {
                    self.emit(TokenKind::Text);
                }
                self.state = State::Done;
            }
        }
    }

    /// The left delimiter is consumed and `pos` sits at `/*`
    fn lex_comment(&mut self) {
        match self.rest().find(RIGHT_COMMENT) {
            Some(offset) => {
                self.advance(offset + RIGHT_COMMENT.len());
                if !self.rest().starts_with(&self.right_delim) {
                    self.errorf("comment ends before closing delimiter");
                    return;
                }
                let len = self.right_delim.len();
                self.advance(len);
                self.ignore();
            }
            None => self.errorf("unclosed comment"),
        }
    }

    fn lex_action(&mut self) {
        if self.rest().starts_with(&self.right_delim) {
            if self.paren_depth != 0 {
                self.errorf("unclosed left paren");
                return;
            }
            let len = self.right_delim.len();
            self.advance(len);
            self.emit(TokenKind::RightDelim);
            self.state = State::Text;
            return;
        }

        let c = match self.next_char() {
            None => {
                self.errorf("unclosed action");
                return;
            }
            Some(c) => c,
        };
        match c {
            '\r' | '\n' => self.errorf("unclosed action"),
            ' ' | '\t' => self.lex_space(),
            ':' => {
                if self.accept('=') {
                    self.emit(TokenKind::Declare);
                } else {
                    self.errorf("expected :=");
                }
            }
            '=' => self.emit(TokenKind::Assign),
            '|' => self.emit(TokenKind::Pipe),
            '"' => self.lex_quote(),
            '`' => self.lex_raw_quote(),
            '$' => self.lex_variable(),
            '\'' => self.lex_char(),
            '.' => {
                // ".5" starts a number; a lone or chained dot does not
                if self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                    self.backup('.');
                    self.lex_number();
                } else {
                    self.lex_field();
                }
            }
            '+' | '-' => {
                self.backup(c);
                self.lex_number();
            }
            c if c.is_ascii_digit() => {
                self.backup(c);
                self.lex_number();
            }
            c if is_alpha_numeric(c) => {
                self.backup(c);
                self.lex_identifier();
            }
            '(' => {
                self.paren_depth += 1;
                self.emit(TokenKind::LeftParen);
            }
            ')' => {
                self.paren_depth -= 1;
                if self.paren_depth < 0 {
                    self.errorf("unexpected right paren");
                } else {
                    self.emit(TokenKind::RightParen);
                }
            }
            c => self.errorf(format!("unrecognized character in action: {c:?}")),
        }
    }

    fn lex_space(&mut self) {
        while matches!(self.peek_char(), Some(' ') | Some('\t')) {
            self.next_char();
        }
        self.emit(TokenKind::Space);
    }

    fn lex_identifier(&mut self) {
        while let Some(c) = self.next_char() {
            if !is_alpha_numeric(c) {
                self.backup(c);
                break;
            }
        }
        if !self.at_terminator() {
            let c = self.peek_char().unwrap_or('\u{0}');
            self.errorf(format!("bad character {c:?}"));
            return;
        }
        let kind = match &self.input[self.start..self.pos] {
            "define" => TokenKind::Define,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "for" => TokenKind::For,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "with" => TokenKind::With,
            "template" => TokenKind::Template,
            "true" | "false" => TokenKind::Bool,
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier,
        };
        self.emit(kind);
    }

    /// The leading `.` is already consumed
    fn lex_field(&mut self) {
        self.lex_field_or_variable(TokenKind::Field, TokenKind::Dot);
    }

    /// The leading `$` is already consumed
    fn lex_variable(&mut self) {
        self.lex_field_or_variable(TokenKind::Variable, TokenKind::Variable);
    }

    fn lex_field_or_variable(&mut self, kind: TokenKind, bare_kind: TokenKind) {
        if self.at_terminator() {
            // "." is the cursor, "$" the root datum
            self.emit(bare_kind);
            return;
        }
        while let Some(c) = self.next_char() {
            if !is_alpha_numeric(c) {
                self.backup(c);
                break;
            }
        }
        if !self.at_terminator() {
            let c = self.peek_char().unwrap_or('\u{0}');
            self.errorf(format!("bad character {c:?}"));
            return;
        }
        self.emit(kind);
    }

    /// Reports whether the current position can legally follow an
    /// identifier-like token
    fn at_terminator(&self) -> bool {
        match self.peek_char() {
            None => true,
            Some(c) if c.is_whitespace() => true,
            Some('.') | Some(',') | Some('|') | Some(':') | Some('=') | Some('(') | Some(')') => {
                true
            }
            Some(c) => self.right_delim.starts_with(c),
        }
    }

    fn lex_char(&mut self) {
        loop {
            match self.next_char() {
                Some('\\') => match self.next_char() {
                    Some(c) if c != '\n' => {}
                    _ => {
                        self.errorf("unterminated character constant");
                        return;
                    }
                },
                Some('\'') => break,
                Some('\n') | None => {
                    self.errorf("unterminated character constant");
                    return;
                }
                Some(_) => {}
            }
        }
        self.emit(TokenKind::CharConstant);
    }

    fn lex_quote(&mut self) {
        loop {
            match self.next_char() {
                Some('\\') => match self.next_char() {
                    Some(c) if c != '\n' => {}
                    _ => {
                        self.errorf("unterminated quoted string");
                        return;
                    }
                },
                Some('"') => break,
                Some('\n') | None => {
                    self.errorf("unterminated quoted string");
                    return;
                }
                Some(_) => {}
            }
        }
        self.emit(TokenKind::String);
    }

    fn lex_raw_quote(&mut self) {
        loop {
            match self.next_char() {
                Some('`') => break,
                None => {
                    self.errorf("unterminated raw quoted string");
                    return;
                }
                Some(_) => {}
            }
        }
        self.emit(TokenKind::RawString);
    }

    fn lex_number(&mut self) {
        if !self.scan_number() {
            let text = &self.input[self.start..self.pos];
            self.errorf(format!("bad number syntax: {text:?}"));
            return;
        }
        self.emit(TokenKind::Number);
    }

    fn scan_number(&mut self) -> bool {
        self.accept_any("+-");
        let mut digits = DECIMAL_DIGITS;
        if self.accept('0') && self.accept_any("xX") {
            digits = HEX_DIGITS;
        }
        self.accept_run(digits);
        if self.accept('.') {
            self.accept_run(digits);
        }
        if digits.len() == DECIMAL_DIGITS.len() && self.accept_any("eE") {
            self.accept_any("+-");
            self.accept_run(DECIMAL_DIGITS);
        }
        // the next character must not glue onto the number
        if self.peek_char().is_some_and(is_alpha_numeric) {
            self.next_char();
            return false;
        }
        true
    }
}

impl Iterator for Lexer {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.eof_yielded {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::Eof {
            self.eof_yielded = true;
            return None;
        }
        Some(token)
    }
}

fn is_alpha_numeric(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect(input: &str) -> Vec<Token> {
        Lexer::new(input, None, None).collect()
    }

    fn kinds_and_vals(input: &str) -> Vec<(TokenKind, String)> {
        collect(input)
            .into_iter()
            .map(|t| (t.kind, t.val))
            .collect()
    }

    #[test]
    fn lex_plain_text() {
        let exp = vec![Token::new(TokenKind::Text, "hello world", 0, 1)];

        assert_eq!(exp, collect("hello world"));
    }

    #[test]
    fn lex_field_action() {
        let exp = vec![
            Token::new(TokenKind::Text, "hello ", 0, 1),
            Token::new(TokenKind::LeftDelim, "{{", 6, 1),
            Token::new(TokenKind::Field, ".name", 8, 1),
            Token::new(TokenKind::RightDelim, "}}", 13, 1),
        ];

        assert_eq!(exp, collect("hello {{.name}}"));
    }

    #[test]
    fn lex_declaration_keeps_space_tokens() {
        let exp = vec![
            Token::new(TokenKind::LeftDelim, "{{", 0, 1),
            Token::new(TokenKind::Variable, "$x", 2, 1),
            Token::new(TokenKind::Space, " ", 4, 1),
            Token::new(TokenKind::Declare, ":=", 5, 1),
            Token::new(TokenKind::Space, " ", 7, 1),
            Token::new(TokenKind::Number, "3", 8, 1),
            Token::new(TokenKind::RightDelim, "}}", 9, 1),
        ];

        assert_eq!(exp, collect("{{$x := 3}}"));
    }

    #[test]
    fn lex_chained_field_is_one_token_per_segment() {
        let got = kinds_and_vals("{{.a.b.c}}");

        assert_eq!(
            vec![
                (TokenKind::LeftDelim, "{{".to_string()),
                (TokenKind::Field, ".a".to_string()),
                (TokenKind::Field, ".b".to_string()),
                (TokenKind::Field, ".c".to_string()),
                (TokenKind::RightDelim, "}}".to_string()),
            ],
            got
        );
    }

    #[test]
    fn lex_keywords_and_literals() {
        let got = kinds_and_vals("{{if true}}{{else}}{{end}}{{null}}");
        let kinds: Vec<TokenKind> = got.iter().map(|(k, _)| *k).collect();

        assert_eq!(
            vec![
                TokenKind::LeftDelim,
                TokenKind::If,
                TokenKind::Space,
                TokenKind::Bool,
                TokenKind::RightDelim,
                TokenKind::LeftDelim,
                TokenKind::Else,
                TokenKind::RightDelim,
                TokenKind::LeftDelim,
                TokenKind::End,
                TokenKind::RightDelim,
                TokenKind::LeftDelim,
                TokenKind::Null,
                TokenKind::RightDelim,
            ],
            kinds
        );
    }

    #[test]
    fn lex_punctuation_and_parens() {
        let got = kinds_and_vals("{{(len .x) | printf}}");
        let kinds: Vec<TokenKind> = got.iter().map(|(k, _)| *k).collect();

        assert_eq!(
            vec![
                TokenKind::LeftDelim,
                TokenKind::LeftParen,
                TokenKind::Identifier,
                TokenKind::Space,
                TokenKind::Field,
                TokenKind::RightParen,
                TokenKind::Space,
                TokenKind::Pipe,
                TokenKind::Space,
                TokenKind::Identifier,
                TokenKind::RightDelim,
            ],
            kinds
        );
    }

    #[test]
    fn lex_numbers() {
        let got = kinds_and_vals("{{1 -2.5 0x1F 1e3 'a'}}");
        let numbers: Vec<String> = got
            .into_iter()
            .filter(|(k, _)| matches!(k, TokenKind::Number | TokenKind::CharConstant))
            .map(|(_, v)| v)
            .collect();

        assert_eq!(vec!["1", "-2.5", "0x1F", "1e3", "'a'"], numbers);
    }

    #[test]
    fn lex_strings() {
        let got = kinds_and_vals(r#"{{"hi\n" `raw`}}"#);

        assert_eq!(
            vec![
                (TokenKind::LeftDelim, "{{".to_string()),
                (TokenKind::String, r#""hi\n""#.to_string()),
                (TokenKind::Space, " ".to_string()),
                (TokenKind::RawString, "`raw`".to_string()),
                (TokenKind::RightDelim, "}}".to_string()),
            ],
            got
        );
    }

    #[test]
    fn lex_comment_is_consumed() {
        let exp = vec![
            Token::new(TokenKind::Text, "a", 0, 1),
            Token::new(TokenKind::Text, "b", 15, 1),
        ];

        assert_eq!(exp, collect("a{{/* note */}}b"));
    }

    #[test]
    fn lex_unclosed_comment() {
        let got = collect("a{{/* note ");

        assert_eq!(TokenKind::Error, got.last().unwrap().kind);
        assert_eq!("unclosed comment", got.last().unwrap().val);
    }

    #[test]
    fn lex_comment_must_close_the_action() {
        let got = collect("{{/* note */ .x}}");

        assert_eq!(
            "comment ends before closing delimiter",
            got.last().unwrap().val
        );
    }

    #[test]
    fn lex_custom_delimiters() {
        let got: Vec<(TokenKind, String)> = Lexer::new("<<.msg>><<\"<<\">>", Some("<<"), Some(">>"))
            .map(|t| (t.kind, t.val))
            .collect();

        assert_eq!(
            vec![
                (TokenKind::LeftDelim, "<<".to_string()),
                (TokenKind::Field, ".msg".to_string()),
                (TokenKind::RightDelim, ">>".to_string()),
                (TokenKind::LeftDelim, "<<".to_string()),
                (TokenKind::String, "\"<<\"".to_string()),
                (TokenKind::RightDelim, ">>".to_string()),
            ],
            got
        );
    }

    #[test]
    fn lex_unclosed_action() {
        let got = collect("{{.x");

        assert_eq!(TokenKind::Error, got.last().unwrap().kind);
        assert_eq!("unclosed action", got.last().unwrap().val);
    }

    #[test]
    fn lex_newline_in_action() {
        let got = collect("{{.x\n}}");

        assert_eq!("unclosed action", got.last().unwrap().val);
    }

    #[test]
    fn lex_bad_character() {
        let got = collect("{{.x@}}");

        assert_eq!(TokenKind::Error, got.last().unwrap().kind);
        assert_eq!("bad character '@'", got.last().unwrap().val);
    }

    #[test]
    fn lex_unbalanced_parens() {
        let got = collect("{{(.x}}");

        assert_eq!("unclosed left paren", got.last().unwrap().val);

        let got = collect("{{.x)}}");

        assert_eq!("unexpected right paren", got.last().unwrap().val);
    }

    #[test]
    fn lex_tracks_lines() {
        let got = collect("line one\nline two\n{{.x}}");

        assert_eq!(1, got[0].line);
        assert_eq!(3, got[1].line);

        let eof_forever = &mut Lexer::new("", None, None);
        assert_eq!(TokenKind::Eof, eof_forever.next_token().kind);
        assert_eq!(TokenKind::Eof, eof_forever.next_token().kind);
    }
}
