// loxlang-core - Tree-walking interpreter for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! # loxlang-core
//!
//! Tree-walking interpreter for the Lox programming language: a static
//! resolver that precomputes scope distances, an environment chain, and an
//! AST-walking evaluator.
//!
//! This is the reference-semantics twin of the bytecode pipeline in
//! `loxlang-vm`; both run the same surface language.
//!
//! # Quick Start
//!
//! ```
//! use loxlang_core::{resolve, Interpreter};
//! use loxlang_parser::Parser;
//!
//! let statements = Parser::new("print 1 + 2;").parse().unwrap();
//! let locals = resolve(&statements).unwrap();
//!
//! let mut interpreter = Interpreter::new();
//! interpreter.interpret(&statements, locals).unwrap();
//! ```

pub mod env;
pub mod error;
pub mod interpreter;
pub mod resolver;
pub mod value;

pub use env::Env;
pub use error::{Error, ResolveError, Result};
pub use interpreter::Interpreter;
pub use resolver::resolve;
pub use value::{LoxClass, LoxFunction, LoxInstance, NativeFunction, Value};
