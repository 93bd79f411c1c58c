// loxlang - A Lox interpreter written in Rust
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::process;

use loxlang_core::{resolve, Interpreter};
use loxlang_vm::{InterpretError, VM};

/// Exit codes: usage, compile error, runtime error, I/O error.
const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_IOERR: i32 = 74;

/// Which execution backend to run.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Backend {
    /// Bytecode compiler + VM (the default).
    Vm,
    /// AST-walking interpreter with the static resolver.
    Ast,
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut backend = Backend::Vm;
    let mut paths: Vec<&str> = Vec::new();
    for arg in &args {
        match arg.as_str() {
            "--version" | "-v" => {
                println!("loxlang v0.1.0");
                return;
            }
            "--ast" => backend = Backend::Ast,
            path => paths.push(path),
        }
    }

    match paths.as_slice() {
        [] => run_repl(backend),
        [path] => run_file(path, backend),
        _ => {
            eprintln!("Usage: loxlang [--ast] [path]");
            process::exit(EX_USAGE);
        }
    }
}

/// Run a source file once; the exit code reports how it went.
fn run_file(path: &str, backend: Backend) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read '{}': {}", path, error);
            process::exit(EX_IOERR);
        }
    };

    match backend {
        Backend::Vm => {
            let mut vm = VM::new();
            if let Err(error) = vm.interpret(&source) {
                report(&error);
                process::exit(exit_code(&error));
            }
        }
        Backend::Ast => {
            let mut interpreter = Interpreter::new();
            if let Err(code) = run_ast(&mut interpreter, &source) {
                process::exit(code);
            }
        }
    }
}

/// Read a line, interpret it, loop. Errors print to stderr and the
/// session continues; globals persist across lines.
fn run_repl(backend: Backend) {
    let mut vm = VM::new();
    let mut interpreter = Interpreter::new();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => {
                println!();
                return;
            }
            Ok(_) => {}
            Err(error) => {
                eprintln!("Read error: {}", error);
                return;
            }
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match backend {
            Backend::Vm => {
                if let Err(error) = vm.interpret(line) {
                    report(&error);
                }
            }
            Backend::Ast => {
                let _ = run_ast(&mut interpreter, line);
            }
        }
    }
}

/// Parse, resolve, and evaluate on the tree-walking backend, reporting
/// errors to stderr. Returns the exit code on failure.
fn run_ast(interpreter: &mut Interpreter, source: &str) -> Result<(), i32> {
    let statements = match loxlang_parser::Parser::new(source).parse() {
        Ok(statements) => statements,
        Err(errors) => {
            for error in errors {
                eprintln!("{}", error);
            }
            return Err(EX_DATAERR);
        }
    };

    let locals = match resolve(&statements) {
        Ok(locals) => locals,
        Err(errors) => {
            for error in errors {
                eprintln!("{}", error);
            }
            return Err(EX_DATAERR);
        }
    };

    if let Err(error) = interpreter.interpret(&statements, locals) {
        eprintln!("{}", error);
        return Err(EX_SOFTWARE);
    }
    Ok(())
}

fn report(error: &InterpretError) {
    match error {
        InterpretError::Compile(errors) => {
            for error in errors {
                eprintln!("{}", error);
            }
        }
        InterpretError::Runtime(error) => eprintln!("{}", error),
    }
}

fn exit_code(error: &InterpretError) -> i32 {
    match error {
        InterpretError::Compile(_) => EX_DATAERR,
        InterpretError::Runtime(_) => EX_SOFTWARE,
    }
}
