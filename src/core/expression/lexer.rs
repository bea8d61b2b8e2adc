use crate::core::data::FieldPath;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Field(FieldPath),
    Dot,
    Comma,
    LParen,
    RParen,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(crate) fn parse_error(text: &str, offset: usize, message: impl AsRef<str>) -> AppError {
    let mut error = AppError::new(
        ErrorCategory::ParseError,
        format!(
            "{} at offset {} in expression '{}'",
            message.as_ref(),
            offset,
            text
        ),
    );
    error.add_context("expression", text);
    error
}

/// Split expression text into tokens, always terminated by `Token::Eof`.
pub fn tokenize(text: &str) -> Result<Vec<Spanned>, AppError> {
    Lexer { text, pos: 0 }.run()
}

struct Lexer<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.text[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn run(mut self) -> Result<Vec<Spanned>, AppError> {
        let mut tokens = Vec::new();
        loop {
            while matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.bump();
            }
            let offset = self.pos;
            let Some(c) = self.peek() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    offset,
                });
                return Ok(tokens);
            };
            let token = match c {
                '$' => self.field()?,
                '"' | '\'' => self.string(c)?,
                '0'..='9' => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.ident(),
                _ => self.operator()?,
            };
            tokens.push(Spanned { token, offset });
        }
    }

    fn field(&mut self) -> Result<Token, AppError> {
        let start = self.pos;
        self.bump();
        if self.peek() == Some('{') {
            self.bump();
            let inner_start = self.pos;
            let mut quote: Option<char> = None;
            loop {
                match self.bump() {
                    None => return Err(parse_error(self.text, start, "unterminated '${'")),
                    Some('\\') if quote.is_some() => {
                        self.bump();
                    }
                    Some(c @ ('"' | '\'')) => match quote {
                        Some(open) if open == c => quote = None,
                        None => quote = Some(c),
                        _ => {}
                    },
                    Some('}') if quote.is_none() => break,
                    Some(_) => {}
                }
            }
            let inner = &self.text[inner_start..self.pos - 1];
            let path = FieldPath::parse(inner)
                .map_err(|err| parse_error(self.text, inner_start, err.message))?;
            return Ok(Token::Field(path));
        }
        let (path, consumed) = FieldPath::parse_prefix(&self.text[self.pos..], false)
            .map_err(|err| parse_error(self.text, self.pos, err.message))?;
        self.pos += consumed;
        Ok(Token::Field(path))
    }

    fn string(&mut self, quote: char) -> Result<Token, AppError> {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(parse_error(self.text, start, "unterminated string literal")),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(other) => value.push(other),
                    None => {
                        return Err(parse_error(self.text, start, "unterminated string literal"))
                    }
                },
                Some(c) if c == quote => return Ok(Token::Str(value)),
                Some(c) => value.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Token, AppError> {
        let start = self.pos;
        let mut is_float = false;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && matches!(self.peek_second(), Some(c) if c.is_ascii_digit())
        {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let checkpoint = self.pos;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                self.pos = checkpoint;
            }
        }
        let literal = &self.text[start..self.pos];
        if !is_float {
            if let Ok(i) = literal.parse::<i64>() {
                return Ok(Token::Int(i));
            }
        }
        literal
            .parse::<f64>()
            .map(Token::Float)
            .map_err(|_| parse_error(self.text, start, format!("invalid number '{}'", literal)))
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        Token::Ident(self.text[start..self.pos].to_string())
    }

    fn operator(&mut self) -> Result<Token, AppError> {
        let start = self.pos;
        let c = self.bump().unwrap_or_default();
        let next = self.peek();
        let two = |lexer: &mut Self, token: Token| {
            lexer.bump();
            token
        };
        let token = match (c, next) {
            ('=', Some('=')) => two(self, Token::EqEq),
            ('!', Some('=')) => two(self, Token::NotEq),
            ('<', Some('=')) => two(self, Token::LtEq),
            ('>', Some('=')) => two(self, Token::GtEq),
            ('&', Some('&')) => two(self, Token::AndAnd),
            ('|', Some('|')) => two(self, Token::OrOr),
            ('<', _) => Token::Lt,
            ('>', _) => Token::Gt,
            ('!', _) => Token::Bang,
            ('+', _) => Token::Plus,
            ('-', _) => Token::Minus,
            ('*', _) => Token::Star,
            ('/', _) => Token::Slash,
            ('%', _) => Token::Percent,
            ('?', _) => Token::Question,
            (':', _) => Token::Colon,
            (',', _) => Token::Comma,
            ('(', _) => Token::LParen,
            (')', _) => Token::RParen,
            ('.', _) => Token::Dot,
            ('=', _) => return Err(parse_error(self.text, start, "use '==' for comparison")),
            (other, _) => {
                return Err(parse_error(
                    self.text,
                    start,
                    format!("unexpected character '{}'", other),
                ))
            }
        };
        Ok(token)
    }
}
