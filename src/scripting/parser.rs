//! Recursive-descent parser producing an [`ast::Chunk`](super::ast::Chunk).
//!
//! Binary operators use precedence climbing with the usual Lua priorities:
//!
//! ```text
//! or < and < comparison < .. (right) < + - < * / % < unary < ^ (right)
//! ```

use super::ast::{BinOp, Block, Chunk, Expr, Field, FuncBody, Stmt, StmtKind, UnOp};
use super::lexer::{Lexer, SyntaxError, Token};
use bytes::Bytes;
use std::sync::Arc;

const UNARY_PRIORITY: u8 = 8;

/// Parses a whole source text.
pub fn parse(source: &[u8]) -> Result<Chunk, SyntaxError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let body = parser.block()?;
    if !parser.check(&Token::Eof) {
        return Err(parser.unexpected("'<eof>' expected"));
    }
    Ok(Chunk { body })
}

fn binary_op(token: &Token) -> Option<(BinOp, u8, u8)> {
    let op = match token {
        Token::Or => (BinOp::Or, 1, 1),
        Token::And => (BinOp::And, 2, 2),
        Token::Lt => (BinOp::Lt, 3, 3),
        Token::Gt => (BinOp::Gt, 3, 3),
        Token::LtEq => (BinOp::Le, 3, 3),
        Token::GtEq => (BinOp::Ge, 3, 3),
        Token::NotEq => (BinOp::Ne, 3, 3),
        Token::EqEq => (BinOp::Eq, 3, 3),
        Token::Concat => (BinOp::Concat, 5, 4),
        Token::Plus => (BinOp::Add, 6, 6),
        Token::Minus => (BinOp::Sub, 6, 6),
        Token::Star => (BinOp::Mul, 7, 7),
        Token::Slash => (BinOp::Div, 7, 7),
        Token::Percent => (BinOp::Mod, 7, 7),
        Token::Caret => (BinOp::Pow, 10, 9),
        _ => return None,
    };
    Some(op)
}

struct Parser {
    tokens: Vec<(Token, u32)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |(t, _)| t)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |(_, l)| *l)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, message: &str) -> SyntaxError {
        SyntaxError {
            line: self.line(),
            message: format!("{} near {}", message, self.peek().describe()),
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), SyntaxError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("{} expected", token.describe())))
        }
    }

    fn name(&mut self) -> Result<String, SyntaxError> {
        match self.peek() {
            Token::Name(n) => {
                let n = n.clone();
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected("<name> expected")),
        }
    }

    fn block_ends(&self) -> bool {
        matches!(
            self.peek(),
            Token::End | Token::Else | Token::ElseIf | Token::Until | Token::Eof
        )
    }

    fn block(&mut self) -> Result<Block, SyntaxError> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&Token::Semi) {}
            if self.block_ends() {
                return Ok(stmts);
            }
            let line = self.line();
            if self.eat(&Token::Return) {
                let values = if self.block_ends() || self.check(&Token::Semi) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.eat(&Token::Semi);
                stmts.push(Stmt {
                    line,
                    kind: StmtKind::Return(values),
                });
                if !self.block_ends() {
                    return Err(self.unexpected("'end' expected"));
                }
                return Ok(stmts);
            }
            let kind = self.statement()?;
            stmts.push(Stmt { line, kind });
        }
    }

    fn statement(&mut self) -> Result<StmtKind, SyntaxError> {
        match self.peek() {
            Token::If => self.if_stmt(),
            Token::While => {
                self.advance();
                let cond = self.expr()?;
                self.expect(Token::Do)?;
                let body = self.block()?;
                self.expect(Token::End)?;
                Ok(StmtKind::While(cond, body))
            }
            Token::Do => {
                self.advance();
                let body = self.block()?;
                self.expect(Token::End)?;
                Ok(StmtKind::Do(body))
            }
            Token::For => self.for_stmt(),
            Token::Repeat => {
                self.advance();
                let body = self.block()?;
                self.expect(Token::Until)?;
                let cond = self.expr()?;
                Ok(StmtKind::Repeat(body, cond))
            }
            Token::Function => self.function_stmt(),
            Token::Local => {
                self.advance();
                if self.eat(&Token::Function) {
                    let name = self.name()?;
                    let body = self.func_body(false)?;
                    return Ok(StmtKind::LocalFunction(name, body));
                }
                let mut names = vec![self.name()?];
                while self.eat(&Token::Comma) {
                    names.push(self.name()?);
                }
                let values = if self.eat(&Token::Assign) {
                    self.expr_list()?
                } else {
                    Vec::new()
                };
                Ok(StmtKind::Local(names, values))
            }
            Token::Break => {
                self.advance();
                Ok(StmtKind::Break)
            }
            _ => self.expr_stmt(),
        }
    }

    fn if_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        self.advance();
        let mut branches = Vec::new();
        let cond = self.expr()?;
        self.expect(Token::Then)?;
        branches.push((cond, self.block()?));

        let mut otherwise = None;
        loop {
            if self.eat(&Token::ElseIf) {
                let cond = self.expr()?;
                self.expect(Token::Then)?;
                branches.push((cond, self.block()?));
            } else if self.eat(&Token::Else) {
                otherwise = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        self.expect(Token::End)?;
        Ok(StmtKind::If(branches, otherwise))
    }

    fn for_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        self.advance();
        let first = self.name()?;
        if self.eat(&Token::Assign) {
            let start = self.expr()?;
            self.expect(Token::Comma)?;
            let limit = self.expr()?;
            let step = if self.eat(&Token::Comma) {
                Some(self.expr()?)
            } else {
                None
            };
            self.expect(Token::Do)?;
            let body = self.block()?;
            self.expect(Token::End)?;
            return Ok(StmtKind::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
            });
        }

        let mut vars = vec![first];
        while self.eat(&Token::Comma) {
            vars.push(self.name()?);
        }
        self.expect(Token::In)?;
        let exprs = self.expr_list()?;
        self.expect(Token::Do)?;
        let body = self.block()?;
        self.expect(Token::End)?;
        Ok(StmtKind::GenericFor { vars, exprs, body })
    }

    fn function_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        self.advance();
        let mut target = Expr::Name(self.name()?);
        let mut is_method = false;
        loop {
            if self.eat(&Token::Dot) {
                let key = self.name()?;
                target = Expr::Index(Box::new(target), Box::new(Expr::Str(Bytes::from(key))));
            } else if self.eat(&Token::Colon) {
                let key = self.name()?;
                target = Expr::Index(Box::new(target), Box::new(Expr::Str(Bytes::from(key))));
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let body = self.func_body(is_method)?;
        Ok(StmtKind::Function(target, body))
    }

    fn func_body(&mut self, is_method: bool) -> Result<Arc<FuncBody>, SyntaxError> {
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if is_method {
            params.push("self".to_string());
        }
        let mut variadic = false;
        if !self.check(&Token::RParen) {
            loop {
                if self.eat(&Token::Dots) {
                    variadic = true;
                    break;
                }
                params.push(self.name()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        let body = self.block()?;
        self.expect(Token::End)?;
        Ok(Arc::new(FuncBody {
            params,
            variadic,
            body,
        }))
    }

    fn expr_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        let first = self.suffixed_expr()?;
        if self.check(&Token::Assign) || self.check(&Token::Comma) {
            let mut targets = vec![first];
            while self.eat(&Token::Comma) {
                targets.push(self.suffixed_expr()?);
            }
            if !targets.iter().all(|t| matches!(t, Expr::Name(_) | Expr::Index(..))) {
                return Err(self.unexpected("syntax error"));
            }
            self.expect(Token::Assign)?;
            let values = self.expr_list()?;
            return Ok(StmtKind::Assign(targets, values));
        }
        match first {
            Expr::Call(..) | Expr::Method(..) => Ok(StmtKind::Call(first)),
            _ => Err(self.unexpected("syntax error")),
        }
    }

    fn expr_list(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut list = vec![self.expr()?];
        while self.eat(&Token::Comma) {
            list.push(self.expr()?);
        }
        Ok(list)
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.sub_expr(0)
    }

    fn sub_expr(&mut self, limit: u8) -> Result<Expr, SyntaxError> {
        let unary = match self.peek() {
            Token::Not => Some(UnOp::Not),
            Token::Minus => Some(UnOp::Neg),
            Token::Hash => Some(UnOp::Len),
            _ => None,
        };
        let mut left = match unary {
            Some(op) => {
                self.advance();
                let operand = self.sub_expr(UNARY_PRIORITY)?;
                Expr::Unary(op, Box::new(operand))
            }
            None => self.simple_expr()?,
        };

        while let Some((op, left_prio, right_prio)) = binary_op(self.peek()) {
            if left_prio <= limit {
                break;
            }
            self.advance();
            let right = self.sub_expr(right_prio)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn simple_expr(&mut self) -> Result<Expr, SyntaxError> {
        let expr = match self.peek() {
            Token::Number(n) => Expr::Number(*n),
            Token::Str(s) => Expr::Str(s.clone()),
            Token::Nil => Expr::Nil,
            Token::True => Expr::True,
            Token::False => Expr::False,
            Token::Dots => Expr::VarArgs,
            Token::LBrace => return self.table(),
            Token::Function => {
                self.advance();
                return Ok(Expr::Function(self.func_body(false)?));
            }
            _ => return self.suffixed_expr(),
        };
        self.advance();
        Ok(expr)
    }

    fn primary_expr(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek() {
            Token::Name(_) => Ok(Expr::Name(self.name()?)),
            Token::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            _ => Err(self.unexpected("unexpected symbol")),
        }
    }

    fn suffixed_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary_expr()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let key = self.name()?;
                    expr = Expr::Index(Box::new(expr), Box::new(Expr::Str(Bytes::from(key))));
                }
                Token::LBracket => {
                    self.advance();
                    let key = self.expr()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(key));
                }
                Token::Colon => {
                    self.advance();
                    let method = self.name()?;
                    let args = self.call_args()?;
                    expr = Expr::Method(Box::new(expr), method, args);
                }
                Token::LParen | Token::LBrace | Token::Str(_) => {
                    let args = self.call_args()?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        match self.peek() {
            Token::LParen => {
                self.advance();
                let args = if self.check(&Token::RParen) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.expect(Token::RParen)?;
                Ok(args)
            }
            Token::LBrace => Ok(vec![self.table()?]),
            Token::Str(s) => {
                let arg = Expr::Str(s.clone());
                self.advance();
                Ok(vec![arg])
            }
            _ => Err(self.unexpected("function arguments expected")),
        }
    }

    fn table(&mut self) -> Result<Expr, SyntaxError> {
        self.expect(Token::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.eat(&Token::LBracket) {
                let key = self.expr()?;
                self.expect(Token::RBracket)?;
                self.expect(Token::Assign)?;
                fields.push(Field::Keyed(key, self.expr()?));
            } else if matches!(self.peek(), Token::Name(_))
                && self.tokens.get(self.pos + 1).map(|(t, _)| t) == Some(&Token::Assign)
            {
                let key = self.name()?;
                self.advance();
                fields.push(Field::Keyed(Expr::Str(Bytes::from(key)), self.expr()?));
            } else {
                fields.push(Field::Positional(self.expr()?));
            }

            if !self.eat(&Token::Comma) && !self.eat(&Token::Semi) {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Expr::Table(fields))
    }
}
