// loxlang-vm - Disassembler round-trip tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Compiling then disassembling must produce a listing whose reassembly
//! (opcodes only) matches the original chunk instruction-for-instruction.

use loxlang_vm::debug::disassemble_chunk;
use loxlang_vm::heap::Heap;
use loxlang_vm::opcode::OpCode;
use loxlang_vm::{compile, Chunk};

/// Parse a disassembly listing back into an instruction sequence.
///
/// Only the mnemonic and numeric operands matter; constant annotations and
/// jump-target arrows are display sugar and are ignored.
fn reassemble(listing: &str) -> Vec<OpCode> {
    let mut code = Vec::new();
    for line in listing.lines() {
        if line.starts_with("==") || line.trim().is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let _offset = parts.next().expect("offset column");
        let _line = parts.next().expect("line column");
        let mnemonic = parts.next().expect("mnemonic column");
        let mut operand = || -> u16 {
            parts
                .next()
                .expect("numeric operand")
                .parse()
                .expect("operand is a number")
        };

        let op = match mnemonic {
            "CONSTANT" => OpCode::Constant(operand() as u8),
            "NIL" => OpCode::Nil,
            "TRUE" => OpCode::True,
            "FALSE" => OpCode::False,
            "POP" => OpCode::Pop,
            "GET_LOCAL" => OpCode::GetLocal(operand() as u8),
            "SET_LOCAL" => OpCode::SetLocal(operand() as u8),
            "GET_GLOBAL" => OpCode::GetGlobal(operand() as u8),
            "DEFINE_GLOBAL" => OpCode::DefineGlobal(operand() as u8),
            "SET_GLOBAL" => OpCode::SetGlobal(operand() as u8),
            "GET_UPVALUE" => OpCode::GetUpvalue(operand() as u8),
            "SET_UPVALUE" => OpCode::SetUpvalue(operand() as u8),
            "GET_PROPERTY" => OpCode::GetProperty(operand() as u8),
            "SET_PROPERTY" => OpCode::SetProperty(operand() as u8),
            "GET_SUPER" => OpCode::GetSuper(operand() as u8),
            "EQUAL" => OpCode::Equal,
            "GREATER" => OpCode::Greater,
            "LESS" => OpCode::Less,
            "ADD" => OpCode::Add,
            "SUBTRACT" => OpCode::Subtract,
            "MULTIPLY" => OpCode::Multiply,
            "DIVIDE" => OpCode::Divide,
            "NOT" => OpCode::Not,
            "NEGATE" => OpCode::Negate,
            "PRINT" => OpCode::Print,
            "JUMP" => OpCode::Jump(operand()),
            "JUMP_IF_FALSE" => OpCode::JumpIfFalse(operand()),
            "LOOP" => OpCode::Loop(operand()),
            "CALL" => OpCode::Call(operand() as u8),
            "INVOKE" => OpCode::Invoke(operand() as u8, operand() as u8),
            "SUPER_INVOKE" => OpCode::SuperInvoke(operand() as u8, operand() as u8),
            "CLOSURE" => OpCode::Closure(operand() as u8),
            "CAPTURE_LOCAL" => OpCode::CaptureLocal(operand() as u8),
            "CAPTURE_UPVALUE" => OpCode::CaptureUpvalue(operand() as u8),
            "CLOSE_UPVALUE" => OpCode::CloseUpvalue,
            "RETURN" => OpCode::Return,
            "CLASS" => OpCode::Class(operand() as u8),
            "INHERIT" => OpCode::Inherit,
            "METHOD" => OpCode::Method(operand() as u8),
            other => panic!("unknown mnemonic: {}", other),
        };
        code.push(op);
    }
    code
}

fn assert_round_trip(source: &str) {
    let mut heap = Heap::new();
    let function = compile(source, &mut heap).expect("compile error");

    // Round-trip every chunk in the program: the script and every nested
    // function in any constant pool.
    let mut pending = vec![function];
    while let Some(handle) = pending.pop() {
        let chunk: &Chunk = &heap.function(handle).chunk;
        let listing = disassemble_chunk(chunk, "test", &heap);
        assert_eq!(
            reassemble(&listing),
            chunk.code,
            "listing did not reassemble:\n{}",
            listing
        );

        for value in &chunk.constants {
            if let loxlang_vm::Value::Obj(h) = value {
                if matches!(heap.get(*h), loxlang_vm::Obj::Function(_)) {
                    pending.push(*h);
                }
            }
        }
    }
}

#[test]
fn test_round_trip_expressions() {
    assert_round_trip("print 1 + 2 * 3 - 4 / -5;");
    assert_round_trip("print !(1 == 2) != (3 >= 4);");
    assert_round_trip("print \"a\" + \"b\";");
}

#[test]
fn test_round_trip_control_flow() {
    assert_round_trip("if (1 < 2) print \"t\"; else print \"f\";");
    assert_round_trip("var i = 0; while (i < 10) i = i + 1;");
    assert_round_trip("for (var i = 0; i < 3; i = i + 1) print i;");
    assert_round_trip("print true and false or nil;");
}

#[test]
fn test_round_trip_functions_and_closures() {
    assert_round_trip("fun add(a, b) { return a + b; } print add(1, 2);");
    assert_round_trip(
        "fun mk() { var x = 0; fun inc() { x = x + 1; return x; } return inc; } mk()();",
    );
}

#[test]
fn test_round_trip_classes() {
    assert_round_trip(
        "class A { init(v) { this.v = v; } get() { return this.v; } }\n\
         class B < A { get() { return super.get() + 1; } }\n\
         print B(1).get();",
    );
}
