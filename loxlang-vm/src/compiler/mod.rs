// loxlang-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode compiler: transforms Lox source to bytecode in a single pass.
//!
//! There is no AST. Tokens flow from the scanner straight into the Pratt
//! expression parser in [`codegen`], which emits instructions as it goes,
//! resolving every name (local, upvalue, or global) at the point of use.

pub mod codegen;
pub mod types;

pub use codegen::compile;
pub use types::{CompileError, FunctionKind, Precedence};
