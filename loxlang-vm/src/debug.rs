// loxlang-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Chunk disassembler.
//!
//! Produces a stable listing: one instruction per line as
//! `offset line MNEMONIC operands`, with constant operands annotated with
//! the value they reference. The mnemonics and operand order are fixed so
//! a listing can be reassembled instruction-for-instruction.

use std::fmt::Write;

use crate::chunk::Chunk;
use crate::heap::Heap;
use crate::opcode::OpCode;

/// Disassemble a whole chunk under a header.
pub fn disassemble_chunk(chunk: &Chunk, name: &str, heap: &Heap) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", name);
    for offset in 0..chunk.code.len() {
        out.push_str(&disassemble_instruction(chunk, offset, heap));
        out.push('\n');
    }
    out
}

/// Disassemble the instruction at `offset`.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, heap: &Heap) -> String {
    let op = chunk.code[offset];
    let mut line = String::new();

    // Offset column, then the source line, elided when unchanged.
    let _ = write!(line, "{:04} ", offset);
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        line.push_str("   | ");
    } else {
        let _ = write!(line, "{:4} ", chunk.line_at(offset));
    }

    let _ = write!(line, "{:<16}", op.mnemonic());

    match op {
        OpCode::Constant(index)
        | OpCode::GetGlobal(index)
        | OpCode::DefineGlobal(index)
        | OpCode::SetGlobal(index)
        | OpCode::GetProperty(index)
        | OpCode::SetProperty(index)
        | OpCode::GetSuper(index)
        | OpCode::Closure(index)
        | OpCode::Class(index)
        | OpCode::Method(index) => {
            let value = chunk.constants[index as usize];
            let _ = write!(line, " {} '{}'", index, heap.value_to_string(value));
        }
        OpCode::GetLocal(slot)
        | OpCode::SetLocal(slot)
        | OpCode::GetUpvalue(slot)
        | OpCode::SetUpvalue(slot)
        | OpCode::CaptureLocal(slot)
        | OpCode::CaptureUpvalue(slot)
        | OpCode::Call(slot) => {
            let _ = write!(line, " {}", slot);
        }
        OpCode::Jump(distance) | OpCode::JumpIfFalse(distance) => {
            let _ = write!(line, " {} -> {}", distance, offset + 1 + distance as usize);
        }
        OpCode::Loop(distance) => {
            let _ = write!(line, " {} -> {}", distance, offset + 1 - distance as usize);
        }
        OpCode::Invoke(index, arg_count) | OpCode::SuperInvoke(index, arg_count) => {
            let value = chunk.constants[index as usize];
            let _ = write!(
                line,
                " {} {} '{}'",
                index,
                arg_count,
                heap.value_to_string(value)
            );
        }
        _ => {}
    }

    line
}
