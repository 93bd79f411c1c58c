// loxlang-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Stack-based virtual machine for executing Lox bytecode.

pub mod frame;
pub mod stack;

use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Instant;

use crate::compiler::{compile, CompileError};
use crate::heap::Heap;
use crate::object::{Obj, ObjHandle, UpvalueObj};
use crate::opcode::OpCode;
use crate::table::Table;
use crate::value::Value;

pub use frame::CallFrame;
pub use stack::ValueStack;

/// Maximum call depth.
pub const FRAMES_MAX: usize = 64;

/// Maximum value-stack depth: every frame's window is at most 256 slots.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// One line of a runtime stack trace, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: u32,
    /// `"name()"` for functions and methods, `"script"` at top level.
    pub function: String,
}

/// Runtime error with its stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for frame in &self.trace {
            write!(f, "\n[line {}] in {}", frame.line, frame.function)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Failure of a whole interpret call.
#[derive(Debug)]
pub enum InterpretError {
    Compile(Vec<CompileError>),
    Runtime(RuntimeError),
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpretError::Compile(errors) => {
                let mut first = true;
                for error in errors {
                    if !first {
                        writeln!(f)?;
                    }
                    write!(f, "{}", error)?;
                    first = false;
                }
                Ok(())
            }
            InterpretError::Runtime(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for InterpretError {}

/// Result type for VM operations.
type OpResult = Result<(), RuntimeError>;

/// Shallow classification of a callee, copied out of the heap so call
/// dispatch can mutate the VM freely.
enum Callee {
    Closure,
    Class,
    Bound(Value, ObjHandle),
    Native(Rc<dyn Fn(&[Value]) -> Value>),
    NotCallable,
}

/// The Lox virtual machine.
///
/// All interpreter state lives here: the value stack, the call frames, the
/// object heap (with its intern table), the globals, and the open-upvalue
/// list. One VM can run any number of `interpret` calls; globals persist
/// between them, which is what the REPL relies on.
pub struct VM {
    stack: ValueStack,
    frames: Vec<CallFrame>,
    heap: Heap,
    globals: Table,
    /// Open upvalues, sorted by stack slot, highest first.
    open_upvalues: Vec<ObjHandle>,
    /// Interned `"init"`, looked up on every class instantiation.
    init_string: ObjHandle,
    stdout: Box<dyn Write>,
}

impl VM {
    /// Create a VM printing to standard output.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Create a VM printing to the given sink (used by tests).
    pub fn with_output(stdout: Box<dyn Write>) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");
        let mut vm = VM {
            stack: ValueStack::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            heap,
            globals: Table::new(),
            open_upvalues: Vec::new(),
            init_string,
            stdout,
        };

        let start = Instant::now();
        vm.define_native("clock", Rc::new(move |_args: &[Value]| {
            Value::Number(start.elapsed().as_secs_f64())
        }));

        vm
    }

    fn define_native(&mut self, name: &'static str, function: Rc<dyn Fn(&[Value]) -> Value>) {
        let name_handle = self.heap.intern(name);
        let hash = self.heap.str_hash(name_handle);
        let native = self.heap.alloc_native(name, function);
        self.globals.set(name_handle, hash, Value::Obj(native));
    }

    /// Compile and run a program.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = compile(source, &mut self.heap).map_err(InterpretError::Compile)?;

        // Root the function on the stack while the closure allocates.
        self.stack.push(Value::Obj(function));
        let closure = self.heap.alloc_closure(function);
        self.stack.pop();
        self.stack.push(Value::Obj(closure));

        let result = self
            .call_closure(closure, 0)
            .and_then(|_| self.run());

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                self.reset();
                Err(InterpretError::Runtime(error))
            }
        }
    }

    /// Discard all execution state after a runtime error.
    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    // =========================================================================
    // Introspection (tests, GC statistics)
    // =========================================================================

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn open_upvalue_count(&self) -> usize {
        self.open_upvalues.len()
    }

    // =========================================================================
    // Errors
    // =========================================================================

    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let line = frame.chunk.line_at(frame.ip.saturating_sub(1));
            let function = match self.heap.closure_name(frame.closure) {
                Some(name) => format!("{}()", name),
                None => "script".to_string(),
            };
            trace.push(TraceFrame { line, function });
        }
        RuntimeError {
            message: message.into(),
            trace,
        }
    }

    // =========================================================================
    // Stack helpers
    // =========================================================================

    fn push(&mut self, value: Value) -> OpResult {
        if self.stack.len() >= STACK_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.runtime_error("Stack underflow.")),
        }
    }

    fn peek(&self, distance: usize) -> Result<Value, RuntimeError> {
        match self.stack.peek(distance) {
            Some(value) => Ok(value),
            None => Err(self.runtime_error("Stack underflow.")),
        }
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Collect if the heap's schedule says so. Called before every runtime
    /// allocation, so every allocation site is a safe point; under
    /// `gc-stress` this collects every time.
    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    /// Mark the roots, trace, purge dead intern entries, sweep.
    pub fn collect_garbage(&mut self) {
        #[cfg(feature = "gc-log")]
        eprintln!("-- gc begin ({} bytes)", self.heap.bytes_allocated());

        for value in self.stack.iter() {
            self.heap.mark_value(*value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        for &upvalue in &self.open_upvalues {
            self.heap.mark_object(upvalue);
        }
        for (key, value) in self.globals.iter() {
            self.heap.mark_object(key);
            self.heap.mark_value(value);
        }
        self.heap.mark_object(self.init_string);

        self.heap.trace_references();
        self.heap.remove_white_strings();
        let freed = self.heap.sweep();

        #[cfg(feature = "gc-log")]
        eprintln!(
            "-- gc end ({} freed, {} bytes live)",
            freed,
            self.heap.bytes_allocated()
        );
        #[cfg(not(feature = "gc-log"))]
        let _ = freed;
    }

    // =========================================================================
    // Dispatch loop
    // =========================================================================

    fn read_op(&mut self) -> Result<OpCode, RuntimeError> {
        let frame = self
            .frames
            .last_mut()
            .expect("dispatch with no active frame");
        if let Some(&op) = frame.chunk.code.get(frame.ip) {
            frame.ip += 1;
            return Ok(op);
        }
        Err(self.runtime_error("Instruction pointer out of range."))
    }

    fn read_constant(&self, index: u8) -> Value {
        let frame = self.frames.last().expect("dispatch with no active frame");
        frame.chunk.constants[index as usize]
    }

    /// Read a constant the compiler guaranteed to be an interned string.
    fn read_string_constant(&self, index: u8) -> Result<ObjHandle, RuntimeError> {
        match self.read_constant(index) {
            Value::Obj(handle) if matches!(self.heap.get(handle), Obj::Str(_)) => Ok(handle),
            _ => Err(self.runtime_error("Constant is not a string.")),
        }
    }

    fn run(&mut self) -> OpResult {
        loop {
            let op = self.read_op()?;
            match op {
                OpCode::Constant(index) => {
                    let value = self.read_constant(index);
                    self.push(value)?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop()?;
                }

                OpCode::GetLocal(slot) => {
                    let base = self.frames.last().expect("no frame").base;
                    let value = match self.stack.get(base + slot as usize) {
                        Some(value) => value,
                        None => return Err(self.runtime_error("Local slot out of range.")),
                    };
                    self.push(value)?;
                }
                OpCode::SetLocal(slot) => {
                    let base = self.frames.last().expect("no frame").base;
                    let value = self.peek(0)?;
                    if !self.stack.set(base + slot as usize, value) {
                        return Err(self.runtime_error("Local slot out of range."));
                    }
                }

                OpCode::GetGlobal(index) => {
                    let name = self.read_string_constant(index)?;
                    let hash = self.heap.str_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value)?,
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                self.heap.as_str(name)
                            )));
                        }
                    }
                }
                OpCode::DefineGlobal(index) => {
                    let name = self.read_string_constant(index)?;
                    let hash = self.heap.str_hash(name);
                    let value = self.peek(0)?;
                    self.globals.set(name, hash, value);
                    self.pop()?;
                }
                OpCode::SetGlobal(index) => {
                    let name = self.read_string_constant(index)?;
                    let hash = self.heap.str_hash(name);
                    let value = self.peek(0)?;
                    if self.globals.set(name, hash, value) {
                        // Assignment never creates a global.
                        self.globals.delete(name, hash);
                        return Err(self.runtime_error(format!(
                            "Undefined variable '{}'.",
                            self.heap.as_str(name)
                        )));
                    }
                }

                OpCode::GetUpvalue(slot) => {
                    let closure = self.frames.last().expect("no frame").closure;
                    let upvalue = self.heap.closure(closure).upvalues[slot as usize];
                    let value = match *self.heap.upvalue(upvalue) {
                        UpvalueObj::Open(location) => match self.stack.get(location) {
                            Some(value) => value,
                            None => {
                                return Err(self.runtime_error("Upvalue slot out of range."));
                            }
                        },
                        UpvalueObj::Closed(value) => value,
                    };
                    self.push(value)?;
                }
                OpCode::SetUpvalue(slot) => {
                    let closure = self.frames.last().expect("no frame").closure;
                    let upvalue = self.heap.closure(closure).upvalues[slot as usize];
                    let value = self.peek(0)?;
                    match *self.heap.upvalue(upvalue) {
                        UpvalueObj::Open(location) => {
                            if !self.stack.set(location, value) {
                                return Err(self.runtime_error("Upvalue slot out of range."));
                            }
                        }
                        UpvalueObj::Closed(_) => {
                            *self.heap.upvalue_mut(upvalue) = UpvalueObj::Closed(value);
                        }
                    }
                }

                OpCode::GetProperty(index) => self.get_property(index)?,
                OpCode::SetProperty(index) => self.set_property(index)?,
                OpCode::GetSuper(index) => {
                    let name = self.read_string_constant(index)?;
                    let superclass = self.pop()?;
                    let class = match superclass.as_obj() {
                        Some(handle) if matches!(self.heap.get(handle), Obj::Class(_)) => handle,
                        _ => return Err(self.runtime_error("Superclass is not a class.")),
                    };
                    self.bind_method(class, name)?;
                }

                OpCode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b))?;
                }
                OpCode::Greater => self.binary_number_op(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.binary_number_op(|a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_number_op(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.binary_number_op(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.binary_number_op(|a, b| Value::Number(a / b))?,
                OpCode::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsey()))?;
                }
                OpCode::Negate => {
                    match self.peek(0)?.as_number() {
                        Some(n) => {
                            self.pop()?;
                            self.push(Value::Number(-n))?;
                        }
                        None => {
                            return Err(self.runtime_error("Operand must be a number."));
                        }
                    }
                }

                OpCode::Print => {
                    let value = self.pop()?;
                    let text = self.heap.value_to_string(value);
                    let _ = writeln!(self.stdout, "{}", text);
                }

                OpCode::Jump(offset) => {
                    self.frames.last_mut().expect("no frame").ip += offset as usize;
                }
                OpCode::JumpIfFalse(offset) => {
                    if self.peek(0)?.is_falsey() {
                        self.frames.last_mut().expect("no frame").ip += offset as usize;
                    }
                }
                OpCode::Loop(offset) => {
                    self.frames.last_mut().expect("no frame").ip -= offset as usize;
                }

                OpCode::Call(arg_count) => {
                    let callee = self.peek(arg_count as usize)?;
                    self.call_value(callee, arg_count as usize)?;
                }
                OpCode::Invoke(name_index, arg_count) => {
                    self.invoke(name_index, arg_count as usize)?;
                }
                OpCode::SuperInvoke(name_index, arg_count) => {
                    let name = self.read_string_constant(name_index)?;
                    let superclass = self.pop()?;
                    let class = match superclass.as_obj() {
                        Some(handle) if matches!(self.heap.get(handle), Obj::Class(_)) => handle,
                        _ => return Err(self.runtime_error("Superclass is not a class.")),
                    };
                    self.invoke_from_class(class, name, arg_count as usize)?;
                }

                OpCode::Closure(index) => self.make_closure(index)?,
                OpCode::CaptureLocal(_) | OpCode::CaptureUpvalue(_) => {
                    // Only legal immediately after a Closure instruction,
                    // where make_closure consumes them.
                    return Err(self.runtime_error("Malformed closure capture."));
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop()?;
                }

                OpCode::Return => {
                    let result = self.pop()?;
                    let frame = self.frames.pop().expect("return with no frame");
                    self.close_upvalues(frame.base);
                    if self.frames.is_empty() {
                        // Pop the script closure; a clean run leaves the
                        // stack empty.
                        self.stack.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.push(result)?;
                }

                OpCode::Class(index) => {
                    let name = self.read_string_constant(index)?;
                    self.maybe_collect();
                    let class = self.heap.alloc_class(name);
                    self.push(Value::Obj(class))?;
                }
                OpCode::Inherit => {
                    let superclass = self.peek(1)?;
                    let superclass = match superclass.as_obj() {
                        Some(handle) if matches!(self.heap.get(handle), Obj::Class(_)) => handle,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    let subclass = match self.peek(0)?.as_obj() {
                        Some(handle) => handle,
                        None => return Err(self.runtime_error("Subclass slot is not a class.")),
                    };
                    // Copy-down inheritance: the subclass starts with its
                    // superclass's methods and overrides land afterwards.
                    let mut methods = std::mem::take(&mut self.heap.class_mut(subclass).methods);
                    self.heap.class(superclass).methods.add_all_to(&mut methods);
                    self.heap.class_mut(subclass).methods = methods;
                    self.pop()?;
                }
                OpCode::Method(index) => {
                    let name = self.read_string_constant(index)?;
                    let method = self.peek(0)?;
                    let class = match self.peek(1)?.as_obj() {
                        Some(handle) => handle,
                        None => return Err(self.runtime_error("Method outside class body.")),
                    };
                    let hash = self.heap.str_hash(name);
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop()?;
                }
            }
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn binary_number_op(&mut self, op: fn(f64, f64) -> Value) -> OpResult {
        let b = self.peek(0)?;
        let a = self.peek(1)?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop()?;
                self.pop()?;
                self.push(op(a, b))
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    /// `+` is numeric addition or string concatenation.
    ///
    /// Concatenation peeks its operands and only pops after the result is
    /// built: interning allocates, allocation may collect, and the
    /// operands must stay rooted on the stack until then.
    fn add(&mut self) -> OpResult {
        let b = self.peek(0)?;
        let a = self.peek(1)?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop()?;
                self.pop()?;
                self.push(Value::Number(a + b))
            }
            (Value::Obj(ha), Value::Obj(hb))
                if matches!(self.heap.get(ha), Obj::Str(_))
                    && matches!(self.heap.get(hb), Obj::Str(_)) =>
            {
                self.maybe_collect();
                let result = format!("{}{}", self.heap.as_str(ha), self.heap.as_str(hb));
                let handle = self.heap.intern(&result);
                self.pop()?;
                self.pop()?;
                self.push(Value::Obj(handle))
            }
            _ => Err(self.runtime_error("Operands must be two numbers or two strings.")),
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call_value(&mut self, callee: Value, arg_count: usize) -> OpResult {
        let handle = match callee.as_obj() {
            Some(handle) => handle,
            None => return Err(self.runtime_error("Can only call functions and classes.")),
        };

        let kind = match self.heap.get(handle) {
            Obj::Closure(_) => Callee::Closure,
            Obj::Class(_) => Callee::Class,
            Obj::BoundMethod(bound) => Callee::Bound(bound.receiver, bound.method),
            Obj::Native(native) => Callee::Native(Rc::clone(&native.function)),
            _ => Callee::NotCallable,
        };

        match kind {
            Callee::Closure => self.call_closure(handle, arg_count),
            Callee::Class => {
                self.maybe_collect();
                let instance = self.heap.alloc_instance(handle);
                let slot = self.stack.len() - arg_count - 1;
                self.stack.set(slot, Value::Obj(instance));

                let hash = self.heap.str_hash(self.init_string);
                match self.heap.class(handle).methods.get(self.init_string, hash) {
                    Some(Value::Obj(initializer)) => self.call_closure(initializer, arg_count),
                    Some(_) => Err(self.runtime_error("Class initializer is not a closure.")),
                    None if arg_count != 0 => Err(self.runtime_error(format!(
                        "Expected 0 arguments but got {}.",
                        arg_count
                    ))),
                    None => Ok(()),
                }
            }
            Callee::Bound(receiver, method) => {
                let slot = self.stack.len() - arg_count - 1;
                self.stack.set(slot, receiver);
                self.call_closure(method, arg_count)
            }
            Callee::Native(function) => {
                let args_start = self.stack.len() - arg_count;
                let result = function(self.stack.slice_from(args_start));
                self.stack.truncate(args_start - 1);
                self.push(result)
            }
            Callee::NotCallable => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call_closure(&mut self, closure: ObjHandle, arg_count: usize) -> OpResult {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity as usize;
        if arg_count != arity {
            return Err(self.runtime_error(format!(
                "Expected {} arguments but got {}.",
                arity, arg_count
            )));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let chunk = self.heap.closure_chunk(closure);
        let base = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame::new(closure, chunk, base));
        Ok(())
    }

    /// `Invoke`: fused property access + call. When the receiver is an
    /// instance whose name resolves to a method, the method runs without a
    /// bound-method allocation; a callable field falls back to the full
    /// call path.
    fn invoke(&mut self, name_index: u8, arg_count: usize) -> OpResult {
        let name = self.read_string_constant(name_index)?;
        let receiver = self.peek(arg_count)?;

        let instance = match receiver.as_obj() {
            Some(handle) if matches!(self.heap.get(handle), Obj::Instance(_)) => handle,
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };

        let hash = self.heap.str_hash(name);
        let (field, class) = {
            let instance = self.heap.instance(instance);
            (instance.fields.get(name, hash), instance.class)
        };

        if let Some(field) = field {
            let slot = self.stack.len() - arg_count - 1;
            self.stack.set(slot, field);
            return self.call_value(field, arg_count);
        }

        self.invoke_from_class(class, name, arg_count)
    }

    fn invoke_from_class(&mut self, class: ObjHandle, name: ObjHandle, arg_count: usize) -> OpResult {
        let hash = self.heap.str_hash(name);
        match self.heap.class(class).methods.get(name, hash) {
            Some(Value::Obj(method)) => self.call_closure(method, arg_count),
            _ => Err(self.runtime_error(format!(
                "Undefined property '{}'.",
                self.heap.as_str(name)
            ))),
        }
    }

    // =========================================================================
    // Properties
    // =========================================================================

    fn get_property(&mut self, name_index: u8) -> OpResult {
        let name = self.read_string_constant(name_index)?;
        let receiver = self.peek(0)?;

        let instance = match receiver.as_obj() {
            Some(handle) if matches!(self.heap.get(handle), Obj::Instance(_)) => handle,
            _ => return Err(self.runtime_error("Only instances have properties.")),
        };

        let hash = self.heap.str_hash(name);
        let (field, class) = {
            let instance = self.heap.instance(instance);
            (instance.fields.get(name, hash), instance.class)
        };

        // Fields shadow methods.
        if let Some(value) = field {
            self.pop()?;
            return self.push(value);
        }

        self.bind_method(class, name)
    }

    fn set_property(&mut self, name_index: u8) -> OpResult {
        let name = self.read_string_constant(name_index)?;
        let receiver = self.peek(1)?;

        let instance = match receiver.as_obj() {
            Some(handle) if matches!(self.heap.get(handle), Obj::Instance(_)) => handle,
            _ => return Err(self.runtime_error("Only instances have fields.")),
        };

        let value = self.peek(0)?;
        let hash = self.heap.str_hash(name);
        self.heap.instance_mut(instance).fields.set(name, hash, value);

        // The assignment is an expression: pop value and receiver, leave
        // the value.
        let value = self.pop()?;
        self.pop()?;
        self.push(value)
    }

    /// Wrap the method `name` of `class` around the receiver on top of the
    /// stack, replacing it with the bound method.
    fn bind_method(&mut self, class: ObjHandle, name: ObjHandle) -> OpResult {
        let hash = self.heap.str_hash(name);
        let method = match self.heap.class(class).methods.get(name, hash) {
            Some(Value::Obj(method)) => method,
            _ => {
                return Err(self.runtime_error(format!(
                    "Undefined property '{}'.",
                    self.heap.as_str(name)
                )));
            }
        };

        self.maybe_collect();
        let receiver = self.peek(0)?;
        let bound = self.heap.alloc_bound_method(receiver, method);
        self.pop()?;
        self.push(Value::Obj(bound))
    }

    // =========================================================================
    // Upvalues
    // =========================================================================

    fn make_closure(&mut self, function_index: u8) -> OpResult {
        let function = match self.read_constant(function_index) {
            Value::Obj(handle) => handle,
            _ => return Err(self.runtime_error("Closure constant is not a function.")),
        };

        self.maybe_collect();
        let closure = self.heap.alloc_closure(function);
        // Push before capturing: every capture may allocate, and the
        // closure must be reachable throughout.
        self.push(Value::Obj(closure))?;

        let upvalue_count = self.heap.function(function).upvalue_count as usize;
        for _ in 0..upvalue_count {
            let upvalue = match self.read_op()? {
                OpCode::CaptureLocal(index) => {
                    let base = self.frames.last().expect("no frame").base;
                    self.capture_upvalue(base + index as usize)
                }
                OpCode::CaptureUpvalue(index) => {
                    let enclosing = self.frames.last().expect("no frame").closure;
                    self.heap.closure(enclosing).upvalues[index as usize]
                }
                _ => return Err(self.runtime_error("Malformed closure capture.")),
            };
            self.heap.closure_mut(closure).upvalues.push(upvalue);
        }
        Ok(())
    }

    /// Find or create the open upvalue for a stack slot. The open list is
    /// ordered by slot, highest first, and holds at most one upvalue per
    /// slot, so closures capturing the same variable share one cell.
    fn capture_upvalue(&mut self, slot: usize) -> ObjHandle {
        let mut index = 0;
        while index < self.open_upvalues.len() {
            let existing = self.open_upvalues[index];
            let location = self
                .heap
                .upvalue(existing)
                .location()
                .expect("open-upvalue list holds a closed upvalue");
            if location == slot {
                return existing;
            }
            if location < slot {
                break;
            }
            index += 1;
        }

        self.maybe_collect();
        let created = self.heap.alloc_upvalue(slot);
        self.open_upvalues.insert(index, created);
        created
    }

    /// Close every open upvalue at or above `from`: copy the stack value
    /// into the cell and drop it from the open list.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(&upvalue) = self.open_upvalues.first() {
            let location = self
                .heap
                .upvalue(upvalue)
                .location()
                .expect("open-upvalue list holds a closed upvalue");
            if location < from {
                break;
            }
            let value = self
                .stack
                .get(location)
                .expect("open upvalue points into the live stack");
            *self.heap.upvalue_mut(upvalue) = UpvalueObj::Closed(value);
            self.open_upvalues.remove(0);
        }
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}
