//! Recursive-descent parser for the rendered artifact notation.
//!
//! Top level is a sequence of `name = <expr>` bindings; expressions cover
//! literals, arrays, object literals, member/index/call chains, unary and
//! binary operators, the ternary operator, and arrow closures. This parser is
//! only ever fed renderer output and is the syntax phase of the runtime
//! checker; generator-authored strings never reach it directly.

use crate::ast::{BinOp, Expr, Module, UnOp};
use crate::error::ExprError;
use crate::lexer::{tokenize, TokKind, Token};

pub fn parse_module(src: &str) -> Result<Module, ExprError> {
    let toks = tokenize(src)?;
    let mut p = Parser { toks, pos: 0 };
    let mut bindings = Vec::new();
    while !p.at_end() {
        let name = p.expect_ident()?;
        p.expect_punct("=")?;
        let expr = p.expr()?;
        if p.peek_punct(";") {
            p.pos += 1;
        }
        bindings.push((name, expr));
    }
    Ok(Module { bindings })
}

/// Parses a single expression (used by tests and the checker's diagnostics).
pub fn parse_expr(src: &str) -> Result<Expr, ExprError> {
    let toks = tokenize(src)?;
    let mut p = Parser { toks, pos: 0 };
    let expr = p.expr()?;
    if !p.at_end() {
        let t = &p.toks[p.pos];
        return Err(ExprError::parse(t.line, t.col, "trailing input"));
    }
    Ok(expr)
}

struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn here(&self) -> (u32, u32) {
        self.toks
            .get(self.pos)
            .or_else(|| self.toks.last())
            .map(|t| (t.line, t.col))
            .unwrap_or((1, 1))
    }

    fn err(&self, message: impl Into<String>) -> ExprError {
        let (line, col) = self.here();
        ExprError::parse(line, col, message)
    }

    fn peek_punct(&self, p: &str) -> bool {
        matches!(self.toks.get(self.pos), Some(Token { kind: TokKind::Punct(q), .. }) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ExprError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.err(format!("expected `{p}`")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ExprError> {
        match self.toks.get(self.pos) {
            Some(Token {
                kind: TokKind::Ident(s),
                ..
            }) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.err("expected identifier")),
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        self.ternary()
    }

    fn ternary(&mut self) -> Result<Expr, ExprError> {
        let cond = self.binary(0)?;
        if self.eat_punct("?") {
            let then = self.expr()?;
            self.expect_punct(":")?;
            let otherwise = self.expr()?;
            return Ok(Expr::Ternary(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    fn binary(&mut self, min_level: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let (op, level) = match self.toks.get(self.pos) {
                Some(Token {
                    kind: TokKind::Punct(p),
                    ..
                }) => match *p {
                    "||" => (BinOp::Or, 1),
                    "&&" => (BinOp::And, 2),
                    "==" => (BinOp::Eq, 3),
                    "!=" => (BinOp::Ne, 3),
                    "<" => (BinOp::Lt, 4),
                    "<=" => (BinOp::Le, 4),
                    ">" => (BinOp::Gt, 4),
                    ">=" => (BinOp::Ge, 4),
                    "+" => (BinOp::Add, 5),
                    "-" => (BinOp::Sub, 5),
                    "*" => (BinOp::Mul, 6),
                    "/" => (BinOp::Div, 6),
                    "%" => (BinOp::Rem, 6),
                    _ => break,
                },
                _ => break,
            };
            if level < min_level {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat_punct("-") {
            return Ok(Expr::Unary(UnOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat_punct("!") {
            return Ok(Expr::Unary(UnOp::Not, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let field = self.expect_ident()?;
                expr = Expr::Member(Box::new(expr), field);
            } else if self.eat_punct("[") {
                let index = self.expr()?;
                self.expect_punct("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_punct("(") {
                let mut args = Vec::new();
                if !self.peek_punct(")") {
                    loop {
                        args.push(self.expr()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                }
                self.expect_punct(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Looks ahead from a `(` already consumed at `start` to decide whether
    /// the parenthesized token run is an arrow-closure parameter list.
    fn is_arrow_params(&self, start: usize) -> Option<usize> {
        let mut i = start;
        loop {
            match self.toks.get(i).map(|t| &t.kind) {
                Some(TokKind::Punct(")")) => break,
                Some(TokKind::Ident(_)) => {
                    i += 1;
                    match self.toks.get(i).map(|t| &t.kind) {
                        Some(TokKind::Punct(",")) => i += 1,
                        Some(TokKind::Punct(")")) => break,
                        _ => return None,
                    }
                }
                _ => return None,
            }
        }
        match self.toks.get(i + 1).map(|t| &t.kind) {
            Some(TokKind::Punct("=>")) => Some(i),
            _ => None,
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let tok = self
            .toks
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.err("unexpected end of input"))?;
        match tok.kind {
            TokKind::Num(n) => {
                self.pos += 1;
                Ok(Expr::Num(n))
            }
            TokKind::Str(s) => {
                self.pos += 1;
                Ok(Expr::Str(s))
            }
            TokKind::Ident(name) => {
                if name == "true" || name == "false" {
                    self.pos += 1;
                    return Ok(Expr::Bool(name == "true"));
                }
                // Single-parameter arrow without parentheses: `x => e`.
                if matches!(
                    self.toks.get(self.pos + 1).map(|t| &t.kind),
                    Some(TokKind::Punct("=>"))
                ) {
                    self.pos += 2;
                    let body = self.expr()?;
                    return Ok(Expr::Arrow(vec![name], Box::new(body)));
                }
                self.pos += 1;
                Ok(Expr::Ident(name))
            }
            TokKind::Punct("(") => {
                if let Some(close) = self.is_arrow_params(self.pos + 1) {
                    let mut params = Vec::new();
                    for t in &self.toks[self.pos + 1..close] {
                        if let TokKind::Ident(p) = &t.kind {
                            params.push(p.clone());
                        }
                    }
                    self.pos = close + 2; // past `)` and `=>`
                    let body = self.expr()?;
                    return Ok(Expr::Arrow(params, Box::new(body)));
                }
                self.pos += 1;
                let inner = self.expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            TokKind::Punct("[") => {
                self.pos += 1;
                let mut items = Vec::new();
                while !self.peek_punct("]") {
                    items.push(self.expr()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(items))
            }
            TokKind::Punct("{") => {
                self.pos += 1;
                let mut fields = Vec::new();
                while !self.peek_punct("}") {
                    let key = match self.toks.get(self.pos).map(|t| t.kind.clone()) {
                        Some(TokKind::Ident(k)) => {
                            self.pos += 1;
                            k
                        }
                        Some(TokKind::Str(k)) => {
                            self.pos += 1;
                            k
                        }
                        _ => return Err(self.err("expected object key")),
                    };
                    self.expect_punct(":")?;
                    let value = self.expr()?;
                    fields.push((key, value));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("}")?;
                Ok(Expr::Object(fields))
            }
            _ => Err(self.err("expected expression")),
        }
    }
}
