// loxlang-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! # loxlang-vm
//!
//! Bytecode compiler and stack-based virtual machine for Lox, with a
//! precise mark-sweep garbage collector.
//!
//! This crate is the alternative execution model to the AST-walking
//! interpreter in `loxlang-core`. Source is compiled in a single pass
//! straight to bytecode, then executed by the VM; every heap object
//! (strings, functions, closures, upvalues, classes, instances, bound
//! methods, natives) lives in the VM's [`heap::Heap`] and is reclaimed by
//! the collector when unreachable.
//!
//! ```
//! use loxlang_vm::VM;
//!
//! let mut vm = VM::new();
//! vm.interpret("print 1 + 2;").unwrap();
//! ```

pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod heap;
pub mod object;
pub mod opcode;
pub mod table;
pub mod value;
pub mod vm;

pub use chunk::Chunk;
pub use compiler::{compile, CompileError};
pub use heap::Heap;
pub use object::{Obj, ObjHandle};
pub use opcode::OpCode;
pub use table::Table;
pub use value::Value;
pub use vm::{InterpretError, RuntimeError, VM};
