// loxlang-parser - Scanner, AST, and parser for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! # loxlang-parser
//!
//! Shared frontend for the Lox programming language: the lazy scanner, the
//! AST, and the recursive-descent parser.
//!
//! Both execution backends consume this crate. The bytecode compiler in
//! `loxlang-vm` drives the [`Scanner`] directly (it compiles in a single
//! pass and never builds a tree); the tree-walking interpreter in
//! `loxlang-core` works from the [`ast`] produced by [`Parser`].

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{Expr, ExprId, FunctionDecl, Literal, Stmt};
pub use lexer::Scanner;
pub use parser::{ParseError, Parser};
pub use token::{Token, TokenKind};
