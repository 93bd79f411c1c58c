// loxlang-core - Static resolver for the Lox tree-walking interpreter
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Static resolution pass, run between parsing and evaluation.
//!
//! Walks the AST with a stack of scopes (name -> "fully defined yet"),
//! recording for every variable reference how many scope hops separate
//! the use from the declaration. The evaluator uses these distances to
//! index directly into the right environment, never searching by name.
//! Names not found in any scope are assumed global and left to runtime.
//!
//! The same pass enforces the static rules that need surrounding context:
//! where `return`, `this`, and `super` may appear, self-inheritance, and
//! self-referential initializers.

use std::collections::HashMap;

use loxlang_parser::ast::{Expr, ExprId, FunctionDecl, Stmt};

use crate::error::ResolveError;

/// What kind of function body encloses the current code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

/// What kind of class body encloses the current code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

/// Resolve a program, producing the scope-distance map for the evaluator.
pub fn resolve(statements: &[Stmt]) -> Result<HashMap<ExprId, usize>, Vec<ResolveError>> {
    let mut resolver = Resolver::new();
    resolver.resolve_stmts(statements);
    if resolver.errors.is_empty() {
        Ok(resolver.locals)
    } else {
        Err(resolver.errors)
    }
}

struct Resolver {
    /// Innermost scope last. Values flip to true once the name's
    /// initializer has been resolved.
    scopes: Vec<HashMap<String, bool>>,
    current_function: FunctionType,
    current_class: ClassType,
    locals: HashMap<ExprId, usize>,
    errors: Vec<ResolveError>,
}

impl Resolver {
    fn new() -> Self {
        Resolver {
            scopes: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            locals: HashMap::new(),
            errors: Vec::new(),
        }
    }

    fn error(&mut self, line: u32, message: impl Into<String>) {
        self.errors.push(ResolveError {
            line,
            message: message.into(),
        });
    }

    // =========================================================================
    // Scope bookkeeping
    // =========================================================================

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, line: u32) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        if scope.contains_key(name) {
            self.error(line, "Already a variable with this name in this scope.");
            return;
        }
        scope.insert(name.to_string(), false);
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    /// Record the hop count from the innermost scope to the one declaring
    /// `name`. Absent everywhere means global: no entry is recorded.
    fn resolve_local(&mut self, id: ExprId, name: &str) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(name) {
                self.locals.insert(id, depth);
                return;
            }
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn resolve_stmts(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.resolve_stmt(statement);
        }
    }

    fn resolve_stmt(&mut self, statement: &Stmt) {
        match statement {
            Stmt::Block(statements) => {
                self.begin_scope();
                self.resolve_stmts(statements);
                self.end_scope();
            }
            Stmt::Var {
                name,
                line,
                initializer,
            } => {
                // Declared before the initializer resolves, so a
                // self-reference inside it is caught; defined after.
                self.declare(name, *line);
                if let Some(initializer) = initializer {
                    self.resolve_expr(initializer);
                }
                self.define(name);
            }
            Stmt::Function(declaration) => {
                self.declare(&declaration.name, declaration.line);
                self.define(&declaration.name);
                self.resolve_function(declaration, FunctionType::Function);
            }
            Stmt::Expression(expr) | Stmt::Print(expr) => self.resolve_expr(expr),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }
            Stmt::While { condition, body } => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }
            Stmt::Return { line, value } => {
                if self.current_function == FunctionType::None {
                    self.error(*line, "Can't return from top-level code.");
                }
                if let Some(value) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(*line, "Can't return a value from an initializer.");
                    }
                    self.resolve_expr(value);
                }
            }
            Stmt::Class {
                name,
                line,
                superclass,
                methods,
            } => self.resolve_class(name, *line, superclass.as_ref(), methods),
        }
    }

    fn resolve_class(
        &mut self,
        name: &str,
        line: u32,
        superclass: Option<&Expr>,
        methods: &[FunctionDecl],
    ) {
        let enclosing_class = self.current_class;
        self.current_class = ClassType::Class;

        self.declare(name, line);
        self.define(name);

        if let Some(superclass_expr) = superclass {
            if let Expr::Variable {
                name: superclass_name,
                line: superclass_line,
                ..
            } = superclass_expr
            {
                if superclass_name == name {
                    self.error(*superclass_line, "A class can't inherit from itself.");
                }
            }
            self.current_class = ClassType::Subclass;
            self.resolve_expr(superclass_expr);

            // The scope holding `super`, wrapped around all methods.
            self.begin_scope();
            self.define("super");
        }

        self.begin_scope();
        self.define("this");
        for method in methods {
            let declaration = if method.name == "init" {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };
            self.resolve_function(method, declaration);
        }
        self.end_scope();

        if superclass.is_some() {
            self.end_scope();
        }

        self.current_class = enclosing_class;
    }

    fn resolve_function(&mut self, declaration: &FunctionDecl, function_type: FunctionType) {
        let enclosing = self.current_function;
        self.current_function = function_type;

        self.begin_scope();
        for param in &declaration.params {
            self.declare(&param.name, param.line);
            self.define(&param.name);
        }
        self.resolve_stmts(&declaration.body);
        self.end_scope();

        self.current_function = enclosing;
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Variable { id, name, line } => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(name) == Some(&false) {
                        self.error(*line, "Can't read local variable in its own initializer.");
                    }
                }
                self.resolve_local(*id, name);
            }
            Expr::Assign { id, name, value, .. } => {
                self.resolve_expr(value);
                self.resolve_local(*id, name);
            }
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            Expr::Unary { operand, .. } => self.resolve_expr(operand),
            Expr::Grouping(inner) => self.resolve_expr(inner),
            Expr::Literal(_) => {}
            Expr::Call { callee, args, .. } => {
                self.resolve_expr(callee);
                for arg in args {
                    self.resolve_expr(arg);
                }
            }
            Expr::Get { object, .. } => self.resolve_expr(object),
            Expr::Set { object, value, .. } => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }
            Expr::This { id, line } => {
                if self.current_class == ClassType::None {
                    self.error(*line, "Can't use 'this' outside of a class.");
                    return;
                }
                self.resolve_local(*id, "this");
            }
            Expr::Super { id, line, .. } => {
                match self.current_class {
                    ClassType::None => {
                        self.error(*line, "Can't use 'super' outside of a class.");
                    }
                    ClassType::Class => {
                        self.error(*line, "Can't use 'super' in a class with no superclass.");
                    }
                    ClassType::Subclass => {}
                }
                self.resolve_local(*id, "super");
            }
        }
    }
}
