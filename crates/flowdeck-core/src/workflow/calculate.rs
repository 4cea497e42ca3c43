//! Arithmetic for the `calculate_value` action.
//!
//! A small recursive-descent parser over numbers, context paths and
//! `+ - * / % ^` with parentheses, unary minus and the functions
//! `min max abs round floor ceil`. Nothing is evaluated dynamically.
//!
//! Precedence, lowest first: `+ -`, then `* / %`, then unary `-`, then `^`
//! (right associative), so `-2^2 == -4` and `2^3^2 == 512`.

use super::definition::WorkflowError;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn err(msg: impl Into<String>) -> WorkflowError {
    WorkflowError::ExpressionError(msg.into())
}

fn tokenize(input: &str) -> Result<Vec<Token>, WorkflowError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent suffix: 1e3, 2.5E-2
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| err(format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(err(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

struct Parser<'a, F> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    lookup: &'a F,
}

impl<F> Parser<'_, F>
where
    F: Fn(&str) -> Option<f64>,
{
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), WorkflowError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(err(format!("expected {expected:?}, found {t:?}"))),
            None => Err(err(format!("expected {expected:?}, found end of expression"))),
        }
    }

    fn descend(&mut self) -> Result<(), WorkflowError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(err("expression is nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<f64, WorkflowError> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, WorkflowError> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err(err("division by zero")),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, WorkflowError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                self.descend()?;
                let v = self.unary()?;
                self.depth -= 1;
                Ok(-v)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.descend()?;
                let v = self.unary()?;
                self.depth -= 1;
                Ok(v)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, WorkflowError> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            self.descend()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, WorkflowError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                self.descend()?;
                let v = self.expression()?;
                self.depth -= 1;
                self.expect(Token::RParen)?;
                Ok(v)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    self.call(&name)
                } else {
                    (self.lookup)(&name)
                        .ok_or_else(|| err(format!("'{name}' does not resolve to a number")))
                }
            }
            Some(t) => Err(err(format!("unexpected token {t:?}"))),
            None => Err(err("unexpected end of expression")),
        }
    }

    fn call(&mut self, name: &str) -> Result<f64, WorkflowError> {
        self.descend()?;
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.pos += 1;
        } else {
            loop {
                args.push(self.expression()?);
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => return Err(err(format!("malformed arguments to '{name}'"))),
                }
            }
        }
        self.depth -= 1;

        let single = |args: &[f64]| -> Result<f64, WorkflowError> {
            match args {
                [x] => Ok(*x),
                _ => Err(err(format!("'{name}' takes exactly one argument"))),
            }
        };

        match name {
            "min" | "max" => {
                if args.is_empty() {
                    return Err(err(format!("'{name}' needs at least one argument")));
                }
                let fold = if name == "min" { f64::min } else { f64::max };
                Ok(args.iter().copied().fold(args[0], fold))
            }
            "abs" => single(&args).map(f64::abs),
            "round" => single(&args).map(f64::round),
            "floor" => single(&args).map(f64::floor),
            "ceil" => single(&args).map(f64::ceil),
            other => Err(err(format!("unknown function '{other}'"))),
        }
    }
}

/// Evaluate `input`, resolving identifiers through `lookup`.
pub fn evaluate<F>(input: &str, lookup: &F) -> Result<f64, WorkflowError>
where
    F: Fn(&str) -> Option<f64>,
{
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(err("empty expression"));
    }

    let mut parser = Parser { tokens, pos: 0, depth: 0, lookup };
    let value = parser.expression()?;
    if let Some(extra) = parser.peek() {
        return Err(err(format!("unexpected trailing token {extra:?}")));
    }
    if !value.is_finite() {
        return Err(err("result is not a finite number"));
    }
    Ok(value)
}
