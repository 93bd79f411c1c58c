// loxlang-core - AST-walking evaluator for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The tree-walking evaluator.
//!
//! Works hand in hand with the [`resolver`](crate::resolver): variable
//! references that resolved to a scope distance are read with
//! `Env::get_at`, everything else goes to the globals. `return` unwinds
//! through [`Error::Return`], caught at call boundaries.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Instant;

use loxlang_parser::ast::{
    BinaryOp, Expr, ExprId, FunctionDecl, Literal, LogicalOp, Stmt, UnaryOp,
};

use crate::env::Env;
use crate::error::{Error, Result};
use crate::value::{LoxClass, LoxFunction, LoxInstance, NativeFunction, Value};

/// The tree-walking interpreter.
///
/// One interpreter can evaluate any number of programs; globals persist
/// between calls, which is what the REPL relies on. Resolver distances
/// accumulate across calls for the same reason: closures made by earlier
/// programs stay resolvable.
pub struct Interpreter {
    globals: Env,
    locals: HashMap<ExprId, usize>,
    stdout: Box<dyn Write>,
}

impl Interpreter {
    /// Create an interpreter printing to standard output.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Create an interpreter printing to the given sink (used by tests).
    pub fn with_output(stdout: Box<dyn Write>) -> Self {
        let globals = Env::new();

        let start = Instant::now();
        globals.define(
            "clock".to_string(),
            Value::Native(Rc::new(NativeFunction {
                name: "clock",
                arity: 0,
                function: Box::new(move |_args| {
                    Value::Number(start.elapsed().as_secs_f64())
                }),
            })),
        );

        Interpreter {
            globals,
            locals: HashMap::new(),
            stdout,
        }
    }

    /// Evaluate a resolved program.
    pub fn interpret(
        &mut self,
        statements: &[Stmt],
        locals: HashMap<ExprId, usize>,
    ) -> Result<()> {
        self.locals.extend(locals);
        let env = self.globals.clone();
        for statement in statements {
            self.execute(statement, &env)?;
        }
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn execute(&mut self, statement: &Stmt, env: &Env) -> Result<()> {
        match statement {
            Stmt::Expression(expr) => {
                self.evaluate(expr, env)?;
                Ok(())
            }
            Stmt::Print(expr) => {
                let value = self.evaluate(expr, env)?;
                let _ = writeln!(self.stdout, "{}", value);
                Ok(())
            }
            Stmt::Var {
                name, initializer, ..
            } => {
                let value = match initializer {
                    Some(initializer) => self.evaluate(initializer, env)?,
                    None => Value::Nil,
                };
                env.define(name.clone(), value);
                Ok(())
            }
            Stmt::Block(statements) => self.execute_block(statements, &env.child()),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                // Evaluate first, then test truthiness.
                if self.evaluate(condition, env)?.is_truthy() {
                    self.execute(then_branch, env)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch, env)
                } else {
                    Ok(())
                }
            }
            Stmt::While { condition, body } => {
                while self.evaluate(condition, env)?.is_truthy() {
                    self.execute(body, env)?;
                }
                Ok(())
            }
            Stmt::Function(declaration) => {
                let function = Value::Function(Rc::new(LoxFunction {
                    declaration: Rc::new(declaration.clone()),
                    closure: env.clone(),
                    is_initializer: false,
                }));
                env.define(declaration.name.clone(), function);
                Ok(())
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(value) => self.evaluate(value, env)?,
                    None => Value::Nil,
                };
                Err(Error::Return(value))
            }
            Stmt::Class {
                name,
                line,
                superclass,
                methods,
            } => self.execute_class(name, *line, superclass.as_ref(), methods, env),
        }
    }

    fn execute_block(&mut self, statements: &[Stmt], env: &Env) -> Result<()> {
        for statement in statements {
            self.execute(statement, env)?;
        }
        Ok(())
    }

    fn execute_class(
        &mut self,
        name: &str,
        line: u32,
        superclass_expr: Option<&Expr>,
        method_decls: &[FunctionDecl],
        env: &Env,
    ) -> Result<()> {
        let superclass = match superclass_expr {
            Some(expr) => match self.evaluate(expr, env)? {
                Value::Class(class) => Some(class),
                _ => return Err(Error::runtime(line, "Superclass must be a class.")),
            },
            None => None,
        };

        env.define(name.to_string(), Value::Nil);

        // Methods close over a scope holding `super` when there is a
        // superclass, matching the resolver's scope layout.
        let method_env = match &superclass {
            Some(superclass) => {
                let method_env = env.child();
                method_env.define("super".to_string(), Value::Class(Rc::clone(superclass)));
                method_env
            }
            None => env.clone(),
        };

        let mut methods = HashMap::new();
        for declaration in method_decls {
            let function = LoxFunction {
                declaration: Rc::new(declaration.clone()),
                closure: method_env.clone(),
                is_initializer: declaration.name == "init",
            };
            methods.insert(declaration.name.clone(), Rc::new(function));
        }

        let class = Value::Class(Rc::new(LoxClass {
            name: name.to_string(),
            superclass,
            methods,
        }));
        env.assign(name, class);
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn evaluate(&mut self, expr: &Expr, env: &Env) -> Result<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Nil => Value::Nil,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(Rc::from(s.as_str())),
            }),
            Expr::Grouping(inner) => self.evaluate(inner, env),
            Expr::Unary { op, line, operand } => {
                let value = self.evaluate(operand, env)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Negate => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(Error::runtime(*line, "Operand must be a number.")),
                    },
                }
            }
            Expr::Binary {
                left,
                op,
                line,
                right,
            } => {
                let left = self.evaluate(left, env)?;
                let right = self.evaluate(right, env)?;
                self.binary(left, *op, *line, right)
            }
            Expr::Logical { left, op, right } => {
                let left = self.evaluate(left, env)?;
                // Short-circuit: the left value is the result when it
                // decides; otherwise evaluate and return the right side.
                match op {
                    LogicalOp::Or if left.is_truthy() => Ok(left),
                    LogicalOp::And if !left.is_truthy() => Ok(left),
                    _ => self.evaluate(right, env),
                }
            }
            Expr::Variable { id, name, line } => self.look_up_variable(*id, name, *line, env),
            Expr::Assign {
                id,
                name,
                line,
                value,
            } => {
                let value = self.evaluate(value, env)?;
                let assigned = match self.locals.get(id) {
                    Some(&distance) => env.assign_at(distance, name, value.clone()),
                    None => self.globals.assign(name, value.clone()),
                };
                if !assigned {
                    return Err(Error::runtime(
                        *line,
                        format!("Undefined variable '{}'.", name),
                    ));
                }
                Ok(value)
            }
            Expr::Call { callee, line, args } => {
                let callee = self.evaluate(callee, env)?;
                let mut arguments = Vec::with_capacity(args.len());
                for arg in args {
                    arguments.push(self.evaluate(arg, env)?);
                }
                self.call_value(callee, arguments, *line)
            }
            Expr::Get { object, name, line } => {
                let object = self.evaluate(object, env)?;
                let Value::Instance(instance) = object else {
                    return Err(Error::runtime(*line, "Only instances have properties."));
                };

                // Fields shadow methods.
                if let Some(value) = instance.borrow().fields.get(name) {
                    return Ok(value.clone());
                }
                let method = instance.borrow().class.find_method(name);
                match method {
                    Some(method) => Ok(Value::Function(Rc::new(method.bind(instance)))),
                    None => Err(Error::runtime(
                        *line,
                        format!("Undefined property '{}'.", name),
                    )),
                }
            }
            Expr::Set {
                object,
                name,
                line,
                value,
            } => {
                let object = self.evaluate(object, env)?;
                let Value::Instance(instance) = object else {
                    return Err(Error::runtime(*line, "Only instances have fields."));
                };
                let value = self.evaluate(value, env)?;
                instance
                    .borrow_mut()
                    .fields
                    .insert(name.clone(), value.clone());
                Ok(value)
            }
            Expr::This { id, line } => self.look_up_variable(*id, "this", *line, env),
            Expr::Super { id, method, line } => {
                let distance = match self.locals.get(id) {
                    Some(&distance) => distance,
                    None => {
                        return Err(Error::runtime(*line, "Can't use 'super' here."));
                    }
                };
                let superclass = match env.get_at(distance, "super") {
                    Some(Value::Class(class)) => class,
                    _ => return Err(Error::runtime(*line, "Can't use 'super' here.")),
                };
                // `this` lives one scope inside the `super` scope.
                let instance = match env.get_at(distance - 1, "this") {
                    Some(Value::Instance(instance)) => instance,
                    _ => return Err(Error::runtime(*line, "Can't use 'super' here.")),
                };
                match superclass.find_method(method) {
                    Some(found) => Ok(Value::Function(Rc::new(found.bind(instance)))),
                    None => Err(Error::runtime(
                        *line,
                        format!("Undefined property '{}'.", method),
                    )),
                }
            }
        }
    }

    fn look_up_variable(&self, id: ExprId, name: &str, line: u32, env: &Env) -> Result<Value> {
        let value = match self.locals.get(&id) {
            Some(&distance) => env.get_at(distance, name),
            None => self.globals.get(name),
        };
        value.ok_or_else(|| Error::runtime(line, format!("Undefined variable '{}'.", name)))
    }

    fn binary(&mut self, left: Value, op: BinaryOp, line: u32, right: Value) -> Result<Value> {
        match op {
            BinaryOp::Equal => return Ok(Value::Bool(left == right)),
            BinaryOp::NotEqual => return Ok(Value::Bool(left != right)),
            _ => {}
        }

        if op == BinaryOp::Add {
            return match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(a), Value::String(b)) => {
                    Ok(Value::String(Rc::from(format!("{}{}", a, b))))
                }
                _ => Err(Error::runtime(
                    line,
                    "Operands must be two numbers or two strings.",
                )),
            };
        }

        let (Value::Number(a), Value::Number(b)) = (left, right) else {
            return Err(Error::runtime(line, "Operands must be numbers."));
        };
        Ok(match op {
            BinaryOp::Subtract => Value::Number(a - b),
            BinaryOp::Multiply => Value::Number(a * b),
            BinaryOp::Divide => Value::Number(a / b),
            BinaryOp::Greater => Value::Bool(a > b),
            BinaryOp::GreaterEqual => Value::Bool(a >= b),
            BinaryOp::Less => Value::Bool(a < b),
            BinaryOp::LessEqual => Value::Bool(a <= b),
            BinaryOp::Add | BinaryOp::Equal | BinaryOp::NotEqual => unreachable!("handled above"),
        })
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call_value(&mut self, callee: Value, arguments: Vec<Value>, line: u32) -> Result<Value> {
        match callee {
            Value::Function(function) => {
                self.check_arity(function.arity(), arguments.len(), line)?;
                self.call_function(&function, arguments)
            }
            Value::Native(native) => {
                self.check_arity(native.arity, arguments.len(), line)?;
                Ok((native.function)(&arguments))
            }
            Value::Class(class) => {
                self.check_arity(class.arity(), arguments.len(), line)?;
                let instance = Rc::new(RefCell::new(LoxInstance::new(Rc::clone(&class))));
                if let Some(initializer) = class.find_method("init") {
                    let bound = initializer.bind(Rc::clone(&instance));
                    self.call_function(&bound, arguments)?;
                }
                Ok(Value::Instance(instance))
            }
            _ => Err(Error::runtime(line, "Can only call functions and classes.")),
        }
    }

    fn check_arity(&self, expected: usize, got: usize, line: u32) -> Result<()> {
        if expected != got {
            return Err(Error::runtime(
                line,
                format!("Expected {} arguments but got {}.", expected, got),
            ));
        }
        Ok(())
    }

    fn call_function(&mut self, function: &LoxFunction, arguments: Vec<Value>) -> Result<Value> {
        let env = function.closure.child();
        for (param, argument) in function.declaration.params.iter().zip(arguments) {
            env.define(param.name.clone(), argument);
        }

        let result = self.execute_block(&function.declaration.body, &env);

        // An initializer always evaluates to its receiver, even through an
        // early bare `return`.
        let this = || {
            function
                .closure
                .get_at(0, "this")
                .expect("initializer without bound 'this'")
        };

        match result {
            Ok(()) => {
                if function.is_initializer {
                    Ok(this())
                } else {
                    Ok(Value::Nil)
                }
            }
            Err(Error::Return(value)) => {
                if function.is_initializer {
                    Ok(this())
                } else {
                    Ok(value)
                }
            }
            Err(error) => Err(error),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
