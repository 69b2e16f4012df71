//! Capability-free evaluator for the rendered artifact notation.
//!
//! The evaluator has no I/O builtins and the language has no loops, so every
//! evaluation terminates; a fuel counter bounds pathological nesting anyway.
//! Synthetic stand-ins are plain maps with *total default-valued lookup*: a
//! member or index miss yields the interpreter's default number instead of an
//! error, so the checker never needs proxy/trap machinery. Bare identifier
//! misses, by contrast, are reference errors and fail the check.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{BinOp, Expr, Module, UnOp};
use crate::error::ExprError;
use crate::idents;

/// A runtime value. Maps and lists are reference-counted plain data.
#[derive(Debug, Clone)]
pub enum Value {
    Num(f64),
    Bool(bool),
    Str(String),
    List(Rc<Vec<Value>>),
    Map(Rc<HashMap<String, Value>>),
    Closure(Rc<ClosureVal>),
    Builtin(&'static str),
}

#[derive(Debug)]
pub struct ClosureVal {
    pub params: Vec<String>,
    pub body: Expr,
    pub scope: Rc<Scope>,
}

/// Lexical scope chain. Bindings are inserted as a module evaluates so later
/// bindings can reference earlier ones.
#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope::default())
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }
}

const BUILTINS: &[&str] = &["dmg", "rawdmg", "total", "pct", "min", "max", "floor", "abs"];

pub struct Interpreter {
    /// Value produced by a member/index miss on synthetic stand-ins.
    pub default_num: f64,
    fuel: u64,
}

impl Interpreter {
    pub fn new(default_num: f64) -> Self {
        Interpreter {
            default_num,
            fuel: 100_000,
        }
    }

    fn burn(&mut self) -> Result<(), ExprError> {
        if self.fuel == 0 {
            return Err(ExprError::FuelExhausted);
        }
        self.fuel -= 1;
        Ok(())
    }

    pub fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, ExprError> {
        self.burn()?;
        match expr {
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Ident(name) => {
                if let Some(v) = scope.lookup(name) {
                    return Ok(v);
                }
                if let Some(b) = BUILTINS.iter().copied().find(|b| *b == name.as_str()) {
                    return Ok(Value::Builtin(b));
                }
                Err(ExprError::eval(format!(
                    "reference to unknown identifier `{name}`"
                )))
            }
            Expr::Member(base, field) => {
                let base = self.eval(base, scope)?;
                self.member(&base, field)
            }
            Expr::Index(base, index) => {
                let base = self.eval(base, scope)?;
                let index = self.eval(index, scope)?;
                self.index(&base, &index)
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(callee, scope)?;
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(self.eval(a, scope)?);
                }
                self.call(&callee, &vals)
            }
            Expr::Unary(op, inner) => {
                let v = self.eval(inner, scope)?;
                match op {
                    UnOp::Neg => Ok(Value::Num(-self.as_num(&v)?)),
                    UnOp::Not => Ok(Value::Bool(!truthy(&v))),
                }
            }
            Expr::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, scope),
            Expr::Ternary(cond, then, otherwise) => {
                let c = self.eval(cond, scope)?;
                if truthy(&c) {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, scope)?);
                }
                Ok(Value::List(Rc::new(out)))
            }
            Expr::Object(fields) => {
                let mut out = HashMap::with_capacity(fields.len());
                for (k, v) in fields {
                    out.insert(k.clone(), self.eval(v, scope)?);
                }
                Ok(Value::Map(Rc::new(out)))
            }
            Expr::Arrow(params, body) => Ok(Value::Closure(Rc::new(ClosureVal {
                params: params.clone(),
                body: (**body).clone(),
                scope: Rc::clone(scope),
            }))),
        }
    }

    fn binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        scope: &Rc<Scope>,
    ) -> Result<Value, ExprError> {
        match op {
            BinOp::And => {
                let l = self.eval(lhs, scope)?;
                if !truthy(&l) {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval(rhs, scope)?;
                Ok(Value::Bool(truthy(&r)))
            }
            BinOp::Or => {
                let l = self.eval(lhs, scope)?;
                if truthy(&l) {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval(rhs, scope)?;
                Ok(Value::Bool(truthy(&r)))
            }
            BinOp::Eq | BinOp::Ne => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                let eq = values_equal(&l, &r);
                Ok(Value::Bool(if op == BinOp::Eq { eq } else { !eq }))
            }
            _ => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                let (a, b) = (self.as_num(&l)?, self.as_num(&r)?);
                Ok(match op {
                    BinOp::Lt => Value::Bool(a < b),
                    BinOp::Le => Value::Bool(a <= b),
                    BinOp::Gt => Value::Bool(a > b),
                    BinOp::Ge => Value::Bool(a >= b),
                    BinOp::Add => Value::Num(a + b),
                    BinOp::Sub => Value::Num(a - b),
                    BinOp::Mul => Value::Num(a * b),
                    BinOp::Div => Value::Num(a / b),
                    BinOp::Rem => Value::Num(a % b),
                    BinOp::And | BinOp::Or | BinOp::Eq | BinOp::Ne => unreachable!(),
                })
            }
        }
    }

    fn member(&self, base: &Value, field: &str) -> Result<Value, ExprError> {
        match base {
            Value::Map(m) => Ok(m
                .get(field)
                .cloned()
                .unwrap_or(Value::Num(self.default_num))),
            _ => Err(ExprError::eval(format!(
                "cannot access field `{field}` on a non-object value"
            ))),
        }
    }

    fn index(&mut self, base: &Value, index: &Value) -> Result<Value, ExprError> {
        match (base, index) {
            (Value::List(items), idx) => {
                let i = self.as_num(idx)? as usize;
                Ok(items
                    .get(i)
                    .cloned()
                    .unwrap_or(Value::Num(self.default_num)))
            }
            (Value::Map(m), Value::Str(k)) => Ok(m
                .get(k)
                .cloned()
                .unwrap_or(Value::Num(self.default_num))),
            _ => Err(ExprError::eval("illegal index operation".to_string())),
        }
    }

    pub fn call(&mut self, callee: &Value, args: &[Value]) -> Result<Value, ExprError> {
        self.burn()?;
        match callee {
            Value::Closure(c) => {
                let scope = Scope::child(&c.scope);
                for (i, p) in c.params.iter().enumerate() {
                    let v = args.get(i).cloned().unwrap_or(Value::Num(self.default_num));
                    scope.define(p.clone(), v);
                }
                self.eval(&c.body, &scope)
            }
            Value::Builtin(name) => self.builtin(name, args),
            _ => Err(ExprError::eval("attempted to call a non-function value".to_string())),
        }
    }

    fn builtin(&mut self, name: &str, args: &[Value]) -> Result<Value, ExprError> {
        match name {
            "dmg" | "rawdmg" => {
                if args.len() < 2 || args.len() > 3 {
                    return Err(ExprError::eval(format!(
                        "`{name}` takes 2 or 3 arguments, got {}",
                        args.len()
                    )));
                }
                let base = self.as_num(&args[0])?;
                let element = self.as_str(&args[1])?;
                if !idents::is_element(&element) {
                    return Err(ExprError::eval(format!(
                        "unrecognized element `{element}` in `{name}` call"
                    )));
                }
                if let Some(third) = args.get(2) {
                    let tag = self.as_str(third)?;
                    if !idents::is_amplifier(&tag) {
                        return Err(ExprError::eval(format!(
                            "unrecognized reaction tag `{tag}` in `{name}` call"
                        )));
                    }
                }
                Ok(Value::Num(base))
            }
            "total" => {
                if args.len() != 1 {
                    return Err(ExprError::eval("`total` takes exactly one argument".to_string()));
                }
                Ok(Value::Num(self.as_num(&args[0])?))
            }
            "pct" => {
                if args.len() != 1 {
                    return Err(ExprError::eval("`pct` takes exactly one argument".to_string()));
                }
                Ok(Value::Num(self.as_num(&args[0])? / 100.0))
            }
            "min" | "max" => {
                if args.is_empty() {
                    return Err(ExprError::eval(format!("`{name}` needs at least one argument")));
                }
                let mut acc = self.as_num(&args[0])?;
                for a in &args[1..] {
                    let n = self.as_num(a)?;
                    acc = if name == "min" { acc.min(n) } else { acc.max(n) };
                }
                Ok(Value::Num(acc))
            }
            "floor" => Ok(Value::Num(self.as_num(args.first().ok_or_else(|| {
                ExprError::eval("`floor` needs an argument".to_string())
            })?)?
            .floor())),
            "abs" => Ok(Value::Num(self.as_num(args.first().ok_or_else(|| {
                ExprError::eval("`abs` needs an argument".to_string())
            })?)?
            .abs())),
            _ => Err(ExprError::eval(format!("unknown builtin `{name}`"))),
        }
    }

    fn as_num(&self, v: &Value) -> Result<f64, ExprError> {
        match v {
            Value::Num(n) => Ok(*n),
            // Booleans in arithmetic are a strong type-confusion signal.
            Value::Bool(_) => Err(ExprError::eval("boolean used as a number".to_string())),
            Value::Str(s) => Err(ExprError::eval(format!("string `{s}` used as a number"))),
            _ => Err(ExprError::eval("non-numeric value used as a number".to_string())),
        }
    }

    fn as_str(&self, v: &Value) -> Result<String, ExprError> {
        match v {
            Value::Str(s) => Ok(s.clone()),
            _ => Err(ExprError::eval("expected a string literal argument".to_string())),
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Num(n) => *n != 0.0,
        Value::Str(s) => !s.is_empty(),
        _ => true,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        // Comparing a flag (default-valued number) against a boolean literal
        // is common in guards; treat 0/1 as false/true there.
        (Value::Num(x), Value::Bool(y)) | (Value::Bool(y), Value::Num(x)) => (*x != 0.0) == *y,
        _ => false,
    }
}

/// Evaluates every top-level binding of a module against `scope`, inserting
/// each result so later bindings can see earlier ones. Returns the bindings
/// in order.
pub fn eval_module(
    module: &Module,
    interp: &mut Interpreter,
    scope: &Rc<Scope>,
) -> Result<Vec<(String, Value)>, ExprError> {
    let mut out = Vec::with_capacity(module.bindings.len());
    for (name, expr) in &module.bindings {
        let value = interp.eval(expr, scope)?;
        scope.define(name.clone(), value.clone());
        out.push((name.clone(), value));
    }
    Ok(out)
}
