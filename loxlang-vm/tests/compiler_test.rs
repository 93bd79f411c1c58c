// loxlang-vm - Compiler tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;
use common::*;

use loxlang_vm::heap::Heap;
use loxlang_vm::opcode::OpCode;
use loxlang_vm::{compile, Obj};

fn compile_ok(source: &str) -> (Heap, loxlang_vm::ObjHandle) {
    let mut heap = Heap::new();
    let function = compile(source, &mut heap).expect("compile error");
    (heap, function)
}

fn script_code(source: &str) -> Vec<OpCode> {
    let (heap, function) = compile_ok(source);
    heap.function(function).chunk.code.clone()
}

#[track_caller]
fn first_error(source: &str) -> String {
    compile_errors(source)[0].clone()
}

// =============================================================================
// Diagnostics
// =============================================================================

#[test]
fn test_unexpected_token() {
    assert_eq!(
        first_error("print ;"),
        "[line 1] Error at ';': Expect expression."
    );
}

#[test]
fn test_missing_semicolon() {
    assert!(first_error("print 1").contains("Expect ';' after value."));
}

#[test]
fn test_invalid_assignment_target() {
    assert!(first_error("1 + 2 = 3;").contains("Invalid assignment target."));
    assert!(first_error("a + b = c;").contains("Invalid assignment target."));
}

#[test]
fn test_duplicate_local() {
    assert!(
        first_error("{ var a = 1; var a = 2; }")
            .contains("Already a variable with this name in this scope.")
    );
}

#[test]
fn test_shadowing_in_inner_scope_is_fine() {
    compile_ok("{ var a = 1; { var a = 2; } }");
}

#[test]
fn test_read_local_in_own_initializer() {
    assert!(
        first_error("{ var a = 1; { var a = a; } }")
            .contains("Can't read local variable in its own initializer.")
    );
}

#[test]
fn test_global_self_initializer_is_runtime_not_compile() {
    // At global scope the reference resolves by name at runtime instead.
    let error = run_runtime_error("var a = a;");
    assert_eq!(error.message, "Undefined variable 'a'.");
}

#[test]
fn test_too_many_constants() {
    // 257 distinct number literals overflow the one-byte constant pool.
    let mut source = String::from("print 0");
    for i in 1..=256 {
        source.push_str(&format!(" + {}", i));
    }
    source.push(';');
    assert!(first_error(&source).contains("Too many constants in one chunk."));
}

#[test]
fn test_too_many_locals() {
    let mut source = String::from("{\n");
    for i in 0..=256 {
        source.push_str(&format!("var l{} = {};\n", i, i));
    }
    source.push('}');
    assert!(first_error(&source).contains("Too many local variables in function."));
}

#[test]
fn test_return_outside_function() {
    assert!(first_error("return 1;").contains("Can't return from top-level code."));
}

#[test]
fn test_return_value_from_initializer() {
    assert!(
        first_error("class C { init() { return 1; } }")
            .contains("Can't return a value from an initializer.")
    );
}

#[test]
fn test_bare_return_in_initializer_is_fine() {
    compile_ok("class C { init() { return; } }");
}

#[test]
fn test_this_outside_class() {
    assert!(first_error("print this;").contains("Can't use 'this' outside of a class."));
    assert!(
        first_error("fun f() { return this; }")
            .contains("Can't use 'this' outside of a class.")
    );
}

#[test]
fn test_super_outside_class() {
    assert!(first_error("print super.x;").contains("Can't use 'super' outside of a class."));
}

#[test]
fn test_super_without_superclass() {
    assert!(
        first_error("class C { m() { super.m(); } }")
            .contains("Can't use 'super' in a class with no superclass.")
    );
}

#[test]
fn test_class_inherits_from_itself() {
    assert!(first_error("class C < C {}").contains("A class can't inherit from itself."));
}

#[test]
fn test_panic_mode_reports_once_per_statement() {
    // The garbage after the first error is swallowed until the ';'
    // boundary; the second statement reports independently.
    let errors = compile_errors("print + + +; var 2;");
    assert_eq!(errors.len(), 2);
}

// =============================================================================
// Code shape
// =============================================================================

#[test]
fn test_script_ends_with_implicit_nil_return() {
    let code = script_code("1;");
    let n = code.len();
    assert_eq!(code[n - 2], OpCode::Nil);
    assert_eq!(code[n - 1], OpCode::Return);
}

#[test]
fn test_initializer_returns_slot_zero() {
    let (heap, function) = compile_ok("class C { init() {} }");
    // Find the nested init function among the script's constants.
    let script = heap.function(function);
    let init = script
        .chunk
        .constants
        .iter()
        .find_map(|value| match value {
            loxlang_vm::Value::Obj(handle) => match heap.get(*handle) {
                Obj::Function(f) if f.name.is_some() => Some(f),
                _ => None,
            },
            _ => None,
        })
        .expect("init function not in constant pool");
    let code = &init.chunk.code;
    let n = code.len();
    assert_eq!(code[n - 2], OpCode::GetLocal(0));
    assert_eq!(code[n - 1], OpCode::Return);
}

#[test]
fn test_end_scope_pops_each_local() {
    // Two plain locals: scope exit must emit exactly two pops.
    let code = script_code("{ var a = 1; var b = 2; }");
    let pops = code.iter().filter(|op| **op == OpCode::Pop).count();
    assert_eq!(pops, 2);
    assert!(!code.contains(&OpCode::CloseUpvalue));
}

#[test]
fn test_end_scope_closes_captured_local() {
    // `a` is captured by the nested function, `b` is not: one
    // CloseUpvalue and one Pop for the locals, plus one Pop for the
    // expression statement's discarded call result.
    let code = script_code("{ var a = 1; fun f() { return a; } f(); }");
    let closes = code.iter().filter(|op| **op == OpCode::CloseUpvalue).count();
    let pops = code.iter().filter(|op| **op == OpCode::Pop).count();
    assert_eq!(closes, 1);
    assert_eq!(pops, 2);
}

#[test]
fn test_closure_capture_descriptors() {
    // `inner` reaches `x` through `outer`, so outer captures a local and
    // inner captures outer's upvalue.
    let (heap, function) = compile_ok(
        "{ var x = 1; fun outer() { fun inner() { return x; } return inner; } }",
    );

    let mut saw_capture_local = false;
    let mut saw_capture_upvalue = false;
    let mut stack = vec![function];
    while let Some(handle) = stack.pop() {
        let f = heap.function(handle);
        for op in &f.chunk.code {
            match op {
                OpCode::CaptureLocal(_) => saw_capture_local = true,
                OpCode::CaptureUpvalue(_) => saw_capture_upvalue = true,
                _ => {}
            }
        }
        for value in &f.chunk.constants {
            if let loxlang_vm::Value::Obj(h) = value {
                if matches!(heap.get(*h), Obj::Function(_)) {
                    stack.push(*h);
                }
            }
        }
    }
    assert!(saw_capture_local, "outer should capture the local x");
    assert!(saw_capture_upvalue, "inner should capture outer's upvalue");
}

#[test]
fn test_upvalue_count_matches_descriptors() {
    let (heap, function) = compile_ok("{ var x = 1; fun f() { return x; } }");
    let script = heap.function(function);
    let nested = script
        .chunk
        .constants
        .iter()
        .find_map(|value| match value {
            loxlang_vm::Value::Obj(handle) => match heap.get(*handle) {
                Obj::Function(f) if f.name.is_some() => Some(f),
                _ => None,
            },
            _ => None,
        })
        .expect("nested function not in constant pool");
    assert_eq!(nested.upvalue_count, 1);

    let captures = script
        .chunk
        .code
        .iter()
        .filter(|op| matches!(op, OpCode::CaptureLocal(_) | OpCode::CaptureUpvalue(_)))
        .count();
    assert_eq!(captures, 1);
}

#[test]
fn test_identifier_constants_are_shared() {
    // Three reads of one global share a single constant-pool entry.
    let (heap, function) = compile_ok("print g; print g; print g;");
    let script = heap.function(function);
    let strings = script
        .chunk
        .constants
        .iter()
        .filter(|value| matches!(value, loxlang_vm::Value::Obj(h) if matches!(heap.get(*h), Obj::Str(_))))
        .count();
    assert_eq!(strings, 1);
}

#[test]
fn test_jump_if_false_peeks() {
    // The condition is popped by explicit Pop instructions on both edges,
    // never by the jump itself.
    let code = script_code("if (true) 1; else 2;");
    let jumps = code
        .iter()
        .filter(|op| matches!(op, OpCode::JumpIfFalse(_)))
        .count();
    assert_eq!(jumps, 1);
    // Pops: condition on each branch + two discarded expression results.
    let pops = code.iter().filter(|op| **op == OpCode::Pop).count();
    assert_eq!(pops, 4);
}
