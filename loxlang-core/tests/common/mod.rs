// loxlang-core - Common test utilities
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Shared test helpers for the tree-walker integration tests.
//!
//! In your test file, add:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

pub use loxlang_core::{resolve, Error, Interpreter};
pub use loxlang_parser::Parser;

/// A `Write` sink that can be read back after the interpreter is done.
#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("non-utf8 program output")
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// An interpreter wired to a capturable output buffer.
pub fn interpreter_with_buf() -> (Interpreter, SharedBuf) {
    let buf = SharedBuf::default();
    let interpreter = Interpreter::with_output(Box::new(buf.clone()));
    (interpreter, buf)
}

/// Parse, resolve, and evaluate; return the result and captured stdout.
pub fn run(source: &str) -> (Result<(), Error>, String) {
    let (mut interpreter, buf) = interpreter_with_buf();
    let result = eval_in(&mut interpreter, source);
    (result, buf.contents())
}

/// Evaluate a program in an existing interpreter (REPL-style).
pub fn eval_in(interpreter: &mut Interpreter, source: &str) -> Result<(), Error> {
    let statements = Parser::new(source).parse().expect("parse error");
    let locals = resolve(&statements).expect("resolve error");
    interpreter.interpret(&statements, locals)
}

/// Evaluate a program that must succeed; return its output lines.
#[track_caller]
pub fn run_lines(source: &str) -> Vec<String> {
    let (result, output) = run(source);
    if let Err(error) = result {
        panic!("program failed: {}\noutput so far: {}", error, output);
    }
    output.lines().map(str::to_string).collect()
}

/// Evaluate a program that must fail at runtime; return the message line.
#[track_caller]
pub fn runtime_message(source: &str) -> String {
    let (result, _) = run(source);
    match result {
        Err(Error::Runtime { message, .. }) => message,
        Err(other) => panic!("expected runtime error, got: {:?}", other),
        Ok(()) => panic!("expected runtime error, program succeeded"),
    }
}

/// Assert that a program prints exactly the given lines.
#[macro_export]
macro_rules! assert_eval {
    ($source:expr, $($line:expr),+ $(,)?) => {
        assert_eq!($crate::common::run_lines($source), vec![$($line.to_string()),+]);
    };
}
