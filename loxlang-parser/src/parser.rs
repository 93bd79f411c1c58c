// loxlang-parser - Scanner, AST, and parser for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Recursive-descent parser producing the tree-walker's AST.
//!
//! The parser pulls tokens lazily from the [`Scanner`] and collects every
//! error it encounters; after an error it enters panic mode and discards
//! tokens until a statement boundary, so one mistake does not cascade into
//! a wall of spurious diagnostics.

use std::fmt;

use crate::ast::{BinaryOp, Expr, ExprId, FunctionDecl, Literal, LogicalOp, Param, Stmt, UnaryOp};
use crate::lexer::Scanner;
use crate::token::{Token, TokenKind};

/// Maximum parameters/arguments per function, matching the bytecode limits.
const MAX_ARITY: usize = 255;

/// A parse error with its source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parser state over a lazily-scanned token stream.
pub struct Parser<'src> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    errors: Vec<ParseError>,
    panic_mode: bool,
}

impl<'src> Parser<'src> {
    /// Create a parser over the given source.
    pub fn new(source: &'src str) -> Self {
        let mut parser = Parser {
            scanner: Scanner::new(source),
            previous: Token::synthetic(""),
            current: Token::synthetic(""),
            errors: Vec::new(),
            panic_mode: false,
        };
        parser.advance();
        parser
    }

    /// Parse a whole program.
    ///
    /// Returns the statement list, or every error encountered.
    pub fn parse(mut self) -> Result<Vec<Stmt>, Vec<ParseError>> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::Eof) {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }
        if self.errors.is_empty() {
            Ok(statements)
        } else {
            Err(self.errors)
        }
    }

    fn fresh_id(&mut self) -> ExprId {
        ExprId::fresh()
    }

    // =========================================================================
    // Declarations & statements
    // =========================================================================

    fn declaration(&mut self) -> Option<Stmt> {
        let stmt = if self.match_kind(TokenKind::Class) {
            self.class_declaration()
        } else if self.match_kind(TokenKind::Fun) {
            self.function("function").map(Stmt::Function)
        } else if self.match_kind(TokenKind::Var) {
            self.var_declaration()
        } else {
            self.statement()
        };

        match stmt {
            Some(stmt) => Some(stmt),
            None => {
                self.synchronize();
                None
            }
        }
    }

    fn class_declaration(&mut self) -> Option<Stmt> {
        self.consume(TokenKind::Identifier, "Expect class name.")?;
        let name = self.previous.lexeme.to_string();
        let line = self.previous.line;

        let superclass = if self.match_kind(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.")?;
            Some(Expr::Variable {
                id: self.fresh_id(),
                name: self.previous.lexeme.to_string(),
                line: self.previous.line,
            })
        } else {
            None
        };

        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.")?;
        let mut methods = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            methods.push(self.function("method")?);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.")?;

        Some(Stmt::Class {
            name,
            line,
            superclass,
            methods,
        })
    }

    fn function(&mut self, kind: &str) -> Option<FunctionDecl> {
        self.consume(TokenKind::Identifier, &format!("Expect {} name.", kind))?;
        let name = self.previous.lexeme.to_string();
        let line = self.previous.line;

        self.consume(
            TokenKind::LeftParen,
            &format!("Expect '(' after {} name.", kind),
        )?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if params.len() >= MAX_ARITY {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                self.consume(TokenKind::Identifier, "Expect parameter name.")?;
                params.push(Param {
                    name: self.previous.lexeme.to_string(),
                    line: self.previous.line,
                });
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.")?;

        self.consume(
            TokenKind::LeftBrace,
            &format!("Expect '{{' before {} body.", kind),
        )?;
        let body = self.block()?;

        Some(FunctionDecl {
            name,
            line,
            params,
            body,
        })
    }

    fn var_declaration(&mut self) -> Option<Stmt> {
        self.consume(TokenKind::Identifier, "Expect variable name.")?;
        let name = self.previous.lexeme.to_string();
        let line = self.previous.line;

        let initializer = if self.match_kind(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        )?;
        Some(Stmt::Var {
            name,
            line,
            initializer,
        })
    }

    fn statement(&mut self) -> Option<Stmt> {
        if self.match_kind(TokenKind::Print) {
            self.print_statement()
        } else if self.match_kind(TokenKind::If) {
            self.if_statement()
        } else if self.match_kind(TokenKind::While) {
            self.while_statement()
        } else if self.match_kind(TokenKind::For) {
            self.for_statement()
        } else if self.match_kind(TokenKind::Return) {
            self.return_statement()
        } else if self.match_kind(TokenKind::LeftBrace) {
            Some(Stmt::Block(self.block()?))
        } else {
            self.expression_statement()
        }
    }

    fn print_statement(&mut self) -> Option<Stmt> {
        let value = self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after value.")?;
        Some(Stmt::Print(value))
    }

    fn if_statement(&mut self) -> Option<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "Expect ')' after condition.")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_kind(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Some(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Option<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "Expect ')' after condition.")?;
        let body = Box::new(self.statement()?);

        Some(Stmt::While { condition, body })
    }

    /// `for` desugars to a block containing the initializer and a `while`
    /// whose body runs the original body followed by the increment.
    fn for_statement(&mut self) -> Option<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.")?;

        let initializer = if self.match_kind(TokenKind::Semicolon) {
            None
        } else if self.match_kind(TokenKind::Var) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if self.check(TokenKind::Semicolon) {
            Expr::Literal(Literal::Bool(true))
        } else {
            self.expression()?
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.")?;

        let increment = if self.check(TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;

        if let Some(increment) = increment {
            body = Stmt::Block(vec![body, Stmt::Expression(increment)]);
        }

        body = Stmt::While {
            condition,
            body: Box::new(body),
        };

        if let Some(initializer) = initializer {
            body = Stmt::Block(vec![initializer, body]);
        }

        Some(body)
    }

    fn return_statement(&mut self) -> Option<Stmt> {
        let line = self.previous.line;
        let value = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
        Some(Stmt::Return { line, value })
    }

    fn block(&mut self) -> Option<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.")?;
        Some(statements)
    }

    fn expression_statement(&mut self) -> Option<Stmt> {
        let expr = self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        Some(Stmt::Expression(expr))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expression(&mut self) -> Option<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> Option<Expr> {
        let expr = self.or()?;

        if self.match_kind(TokenKind::Equal) {
            let line = self.previous.line;
            let value = Box::new(self.assignment()?);

            return match expr {
                Expr::Variable { name, line, .. } => Some(Expr::Assign {
                    id: self.fresh_id(),
                    name,
                    line,
                    value,
                }),
                Expr::Get { object, name, line } => Some(Expr::Set {
                    object,
                    name,
                    line,
                    value,
                }),
                _ => {
                    // Report but keep parsing; assignment targets don't
                    // need panic-mode recovery.
                    self.error_at_line(line, "Invalid assignment target.");
                    Some(*value)
                }
            };
        }

        Some(expr)
    }

    fn or(&mut self) -> Option<Expr> {
        let mut expr = self.and()?;
        while self.match_kind(TokenKind::Or) {
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::Or,
                right: Box::new(right),
            };
        }
        Some(expr)
    }

    fn and(&mut self) -> Option<Expr> {
        let mut expr = self.equality()?;
        while self.match_kind(TokenKind::And) {
            let right = self.equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::And,
                right: Box::new(right),
            };
        }
        Some(expr)
    }

    fn equality(&mut self) -> Option<Expr> {
        let mut expr = self.comparison()?;
        loop {
            let op = if self.match_kind(TokenKind::EqualEqual) {
                BinaryOp::Equal
            } else if self.match_kind(TokenKind::BangEqual) {
                BinaryOp::NotEqual
            } else {
                return Some(expr);
            };
            let line = self.previous.line;
            let right = self.comparison()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                line,
                right: Box::new(right),
            };
        }
    }

    fn comparison(&mut self) -> Option<Expr> {
        let mut expr = self.term()?;
        loop {
            let op = if self.match_kind(TokenKind::Greater) {
                BinaryOp::Greater
            } else if self.match_kind(TokenKind::GreaterEqual) {
                BinaryOp::GreaterEqual
            } else if self.match_kind(TokenKind::Less) {
                BinaryOp::Less
            } else if self.match_kind(TokenKind::LessEqual) {
                BinaryOp::LessEqual
            } else {
                return Some(expr);
            };
            let line = self.previous.line;
            let right = self.term()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                line,
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> Option<Expr> {
        let mut expr = self.factor()?;
        loop {
            let op = if self.match_kind(TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_kind(TokenKind::Minus) {
                BinaryOp::Subtract
            } else {
                return Some(expr);
            };
            let line = self.previous.line;
            let right = self.factor()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                line,
                right: Box::new(right),
            };
        }
    }

    fn factor(&mut self) -> Option<Expr> {
        let mut expr = self.unary()?;
        loop {
            let op = if self.match_kind(TokenKind::Star) {
                BinaryOp::Multiply
            } else if self.match_kind(TokenKind::Slash) {
                BinaryOp::Divide
            } else {
                return Some(expr);
            };
            let line = self.previous.line;
            let right = self.unary()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                line,
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> Option<Expr> {
        let op = if self.match_kind(TokenKind::Minus) {
            UnaryOp::Negate
        } else if self.match_kind(TokenKind::Bang) {
            UnaryOp::Not
        } else {
            return self.call();
        };
        let line = self.previous.line;
        let operand = Box::new(self.unary()?);
        Some(Expr::Unary { op, line, operand })
    }

    fn call(&mut self) -> Option<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.match_kind(TokenKind::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if self.match_kind(TokenKind::Dot) {
                self.consume(TokenKind::Identifier, "Expect property name after '.'.")?;
                expr = Expr::Get {
                    object: Box::new(expr),
                    name: self.previous.lexeme.to_string(),
                    line: self.previous.line,
                };
            } else {
                return Some(expr);
            }
        }
    }

    fn finish_call(&mut self, callee: Expr) -> Option<Expr> {
        let line = self.previous.line;
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if args.len() >= MAX_ARITY {
                    self.error_at_current("Can't have more than 255 arguments.");
                }
                args.push(self.expression()?);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.")?;
        Some(Expr::Call {
            callee: Box::new(callee),
            line,
            args,
        })
    }

    fn primary(&mut self) -> Option<Expr> {
        if self.match_kind(TokenKind::False) {
            return Some(Expr::Literal(Literal::Bool(false)));
        }
        if self.match_kind(TokenKind::True) {
            return Some(Expr::Literal(Literal::Bool(true)));
        }
        if self.match_kind(TokenKind::Nil) {
            return Some(Expr::Literal(Literal::Nil));
        }
        if self.match_kind(TokenKind::Number) {
            let value: f64 = self
                .previous
                .lexeme
                .parse()
                .expect("scanner produced an unparsable number");
            return Some(Expr::Literal(Literal::Number(value)));
        }
        if self.match_kind(TokenKind::String) {
            let lexeme = self.previous.lexeme;
            // Strip the quotes; there are no escape sequences.
            let value = lexeme[1..lexeme.len() - 1].to_string();
            return Some(Expr::Literal(Literal::String(value)));
        }
        if self.match_kind(TokenKind::This) {
            return Some(Expr::This {
                id: self.fresh_id(),
                line: self.previous.line,
            });
        }
        if self.match_kind(TokenKind::Super) {
            let line = self.previous.line;
            self.consume(TokenKind::Dot, "Expect '.' after 'super'.")?;
            self.consume(TokenKind::Identifier, "Expect superclass method name.")?;
            return Some(Expr::Super {
                id: self.fresh_id(),
                method: self.previous.lexeme.to_string(),
                line,
            });
        }
        if self.match_kind(TokenKind::Identifier) {
            return Some(Expr::Variable {
                id: self.fresh_id(),
                name: self.previous.lexeme.to_string(),
                line: self.previous.line,
            });
        }
        if self.match_kind(TokenKind::LeftParen) {
            let expr = self.expression()?;
            self.consume(TokenKind::RightParen, "Expect ')' after expression.")?;
            return Some(Expr::Grouping(Box::new(expr)));
        }

        self.error_at_current("Expect expression.");
        None
    }

    // =========================================================================
    // Token plumbing & error recovery
    // =========================================================================

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_line(self.current.line, &message);
        }
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Option<()> {
        if self.check(kind) {
            self.advance();
            Some(())
        } else {
            self.error_at_current(message);
            None
        }
    }

    fn error_at_current(&mut self, message: &str) {
        let line = self.current.line;
        let location = match self.current.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", self.current.lexeme),
        };
        self.report(line, &format!("Error{}: {}", location, message));
    }

    fn error_at_line(&mut self, line: u32, message: &str) {
        self.report(line, &format!("Error: {}", message));
    }

    fn report(&mut self, line: u32, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.errors.push(ParseError {
            line,
            message: message.to_string(),
        });
    }

    /// Discard tokens until a statement boundary, then leave panic mode.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }
}
