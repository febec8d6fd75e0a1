//! Tokenizer for argument and datum expressions
//!
//! Covers the small grammar accepted inside brackets and operator
//! arguments: numbers, identifiers, quoted strings, arithmetic operators,
//! parentheses, brackets, commas and dots.

use std::fmt;

/// Byte range of a token within its source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.offset, self.end())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Identifier(String),
    Str(String),
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Identifier(name) => write!(f, "{}", name),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::LeftBracket => write!(f, "["),
            Token::RightBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Caret => write!(f, "^"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.position).map(|(_, c)| *c)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position + 1).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.position)
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn read_number(&mut self) -> Result<f64, String> {
        let start = self.offset();
        while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        if self.current() == Some('.') && matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        } else if self.current() == Some('.')
            && !matches!(self.peek(), Some(c) if c.is_alphabetic() || c == '_')
        {
            // trailing dot as in "1."
            self.advance();
        }
        if matches!(self.current(), Some('e') | Some('E'))
            && matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '-' || c == '+')
        {
            self.advance();
            if matches!(self.current(), Some('-') | Some('+')) {
                self.advance();
            }
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = &self.input[start..self.offset()];
        text.trim_end_matches('.')
            .parse::<f64>()
            .map_err(|_| format!("Invalid number '{}'", text))
    }

    fn read_identifier(&mut self) -> String {
        let start = self.offset();
        while matches!(self.current(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        self.input[start..self.offset()].to_string()
    }

    fn read_string(&mut self, quote: char) -> Result<String, String> {
        self.advance();
        let start = self.offset();
        while let Some(c) = self.current() {
            if c == quote {
                let text = self.input[start..self.offset()].to_string();
                self.advance();
                return Ok(text);
            }
            self.advance();
        }
        Err("Unterminated string".to_string())
    }

    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, String> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let start = self.offset();
            let Some(c) = self.current() else {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    span: Span::new(start, 0),
                });
                return Ok(tokens);
            };

            let token = if c.is_ascii_digit()
                || (c == '.' && matches!(self.peek(), Some(d) if d.is_ascii_digit()))
            {
                Token::Number(self.read_number()?)
            } else if c.is_alphabetic() || c == '_' {
                Token::Identifier(self.read_identifier())
            } else if c == '\'' || c == '"' {
                Token::Str(self.read_string(c)?)
            } else {
                let token = match c {
                    '(' => Token::LeftParen,
                    ')' => Token::RightParen,
                    '[' => Token::LeftBracket,
                    ']' => Token::RightBracket,
                    ',' => Token::Comma,
                    '.' => Token::Dot,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Caret,
                    other => return Err(format!("Unexpected character '{}'", other)),
                };
                self.advance();
                token
            };

            tokens.push(SpannedToken {
                token,
                span: Span::new(start, self.offset() - start),
            });
        }
    }
}
