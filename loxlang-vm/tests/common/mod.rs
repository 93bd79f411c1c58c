// loxlang-vm - Common test utilities
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Shared test helpers for the VM integration tests.
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

pub use loxlang_vm::vm::VM;
pub use loxlang_vm::InterpretError;

/// A `Write` sink that can be read back after the VM is done with it.
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

/// A VM wired to a capturable output buffer.
pub fn vm_with_buf() -> (VM, SharedBuf) {
    let buf = SharedBuf::default();
    let vm = VM::with_output(Box::new(buf.clone()));
    (vm, buf)
}

/// Interpret a program, returning the result and captured stdout.
pub fn run(source: &str) -> (Result<(), InterpretError>, String) {
    let (mut vm, buf) = vm_with_buf();
    let result = vm.interpret(source);
    (result, buf.contents())
}

/// Interpret a program that must succeed; return its output lines.
#[track_caller]
pub fn run_lines(source: &str) -> Vec<String> {
    let (result, output) = run(source);
    if let Err(error) = result {
        panic!("program failed: {}\noutput so far: {}", error, output);
    }
    output.lines().map(str::to_string).collect()
}

/// Interpret a program that must fail at runtime; return the error.
#[track_caller]
pub fn run_runtime_error(source: &str) -> loxlang_vm::RuntimeError {
    let (result, _) = run(source);
    match result {
        Err(InterpretError::Runtime(error)) => error,
        Err(InterpretError::Compile(errors)) => {
            panic!("expected runtime error, got compile errors: {:?}", errors)
        }
        Ok(()) => panic!("expected runtime error, program succeeded"),
    }
}

/// Compile a program that must fail; return the diagnostic messages.
#[track_caller]
pub fn compile_errors(source: &str) -> Vec<String> {
    let (result, _) = run(source);
    match result {
        Err(InterpretError::Compile(errors)) => {
            errors.into_iter().map(|e| e.to_string()).collect()
        }
        Err(InterpretError::Runtime(error)) => {
            panic!("expected compile errors, got runtime error: {}", error)
        }
        Ok(()) => panic!("expected compile errors, program succeeded"),
    }
}

/// Assert that a program prints exactly the given lines.
#[macro_export]
macro_rules! assert_prints {
    ($source:expr, $($line:expr),+ $(,)?) => {
        assert_eq!($crate::common::run_lines($source), vec![$($line.to_string()),+]);
    };
}
