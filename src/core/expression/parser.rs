use crate::core::error::AppError;
use crate::core::expression::ast::{BinaryOp, Expr, UnaryOp};
use crate::core::expression::lexer::{parse_error, tokenize, Spanned, Token};
use serde_json::Value;

/// Parse expression text into an [`Expr`] tree.
///
/// Grammar, lowest precedence first:
///
/// ```text
/// ternary  := or ( '?' ternary ':' ternary )?
/// or       := and ( '||' and )*
/// and      := equality ( '&&' equality )*
/// equality := compare ( ( '==' | '!=' ) compare )*
/// compare  := additive ( ( '<' | '<=' | '>' | '>=' ) additive )*
/// additive := term ( ( '+' | '-' ) term )*
/// term     := unary ( ( '*' | '/' | '%' ) unary )*
/// unary    := ( '!' | '-' ) unary | primary
/// primary  := literal | field | call | bare-word | '(' ternary ')'
/// ```
///
/// A bare identifier that is not a keyword and not followed by `(` is a string literal,
/// so `${status} == ok` compares against `"ok"`.
pub fn parse(text: &str) -> Result<Expr, AppError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        text,
        tokens,
        pos: 0,
    };
    let expr = parser.ternary()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected {}", describe(other)))),
    }
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|spanned| &spanned.token)
            .unwrap_or(&Token::Eof)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|spanned| spanned.offset)
            .unwrap_or(self.text.len())
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), AppError> {
        if self.eat(&expected) {
            return Ok(());
        }
        let found = describe(self.peek());
        Err(self.error(format!("expected {}, found {}", describe(&expected), found)))
    }

    fn error(&self, message: impl AsRef<str>) -> AppError {
        parse_error(self.text, self.offset(), message)
    }

    fn ternary(&mut self) -> Result<Expr, AppError> {
        let cond = self.or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let if_true = self.ternary()?;
        self.expect(Token::Colon)?;
        let if_false = self.ternary()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        })
    }

    fn or(&mut self) -> Result<Expr, AppError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, AppError> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, AppError> {
        let mut lhs = self.compare()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.compare()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn compare(&mut self) -> Result<Expr, AppError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::LtEq => BinaryOp::LtEq,
                Token::Gt => BinaryOp::Gt,
                Token::GtEq => BinaryOp::GtEq,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<Expr, AppError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, AppError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, AppError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.primary(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn primary(&mut self) -> Result<Expr, AppError> {
        let offset = self.offset();
        match self.advance() {
            Token::Int(i) => Ok(Expr::Literal(Value::from(i))),
            Token::Float(f) => serde_json::Number::from_f64(f)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| parse_error(self.text, offset, "non-finite number literal")),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Field(path) => Ok(Expr::Field(path)),
            Token::LParen => {
                let inner = self.ternary()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(first) => self.ident_chain(first),
            Token::Eof => Err(parse_error(
                self.text,
                offset,
                "unexpected end of expression",
            )),
            other => Err(parse_error(
                self.text,
                offset,
                format!("unexpected {}", describe(&other)),
            )),
        }
    }

    fn ident_chain(&mut self, first: String) -> Result<Expr, AppError> {
        let mut name = first;
        while self.peek() == &Token::Dot {
            let Some(Spanned {
                token: Token::Ident(next),
                ..
            }) = self.tokens.get(self.pos + 1)
            else {
                break;
            };
            name.push('.');
            name.push_str(next);
            self.pos += 2;
        }
        if self.eat(&Token::LParen) {
            let mut args = Vec::new();
            if !self.eat(&Token::RParen) {
                loop {
                    args.push(self.ternary()?);
                    if self.eat(&Token::RParen) {
                        break;
                    }
                    self.expect(Token::Comma)?;
                }
            }
            return Ok(Expr::Call { name, args });
        }
        Ok(match name.as_str() {
            "true" => Expr::Literal(Value::Bool(true)),
            "false" => Expr::Literal(Value::Bool(false)),
            "null" | "nil" => Expr::Literal(Value::Null),
            _ => Expr::Literal(Value::String(name)),
        })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Int(i) => format!("number {}", i),
        Token::Float(f) => format!("number {}", f),
        Token::Str(s) => format!("string '{}'", s),
        Token::Ident(name) => format!("identifier '{}'", name),
        Token::Field(path) => format!("field '{}'", path),
        Token::Dot => "'.'".into(),
        Token::Comma => "','".into(),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::Question => "'?'".into(),
        Token::Colon => "':'".into(),
        Token::Plus => "'+'".into(),
        Token::Minus => "'-'".into(),
        Token::Star => "'*'".into(),
        Token::Slash => "'/'".into(),
        Token::Percent => "'%'".into(),
        Token::Bang => "'!'".into(),
        Token::EqEq => "'=='".into(),
        Token::NotEq => "'!='".into(),
        Token::Lt => "'<'".into(),
        Token::LtEq => "'<='".into(),
        Token::Gt => "'>'".into(),
        Token::GtEq => "'>='".into(),
        Token::AndAnd => "'&&'".into(),
        Token::OrOr => "'||'".into(),
        Token::Eof => "end of expression".into(),
    }
}
