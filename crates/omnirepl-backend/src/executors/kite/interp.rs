//! Tree-walking evaluator.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;
use tokio_util::sync::CancellationToken;

use super::ast::{BinOp, Expr, FunctionDef, Stmt, UnaryOp};
use super::error::{ErrorKind, KiteError, KiteResult};
use super::modules;
use super::parser::{parse_source, Parsed};
use super::value::Value;
use crate::executors::OutputSink;

const MAX_CALL_DEPTH: usize = 200;
/// Nested statement and expression evaluations across all active calls.
const MAX_EVAL_DEPTH: usize = 2_000;
const MAX_SEQUENCE_LEN: usize = 10_000_000;

enum Flow {
    Normal,
    Return(Value),
}

pub struct Interpreter<'a> {
    globals: BTreeMap<String, Value>,
    frames: Vec<BTreeMap<String, Value>>,
    depth: usize,
    sink: &'a dyn OutputSink,
    cancel: &'a CancellationToken,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        globals: BTreeMap<String, Value>,
        sink: &'a dyn OutputSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            globals,
            frames: Vec::new(),
            depth: 0,
            sink,
            cancel,
        }
    }

    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }

    pub fn into_globals(self) -> BTreeMap<String, Value> {
        self.globals
    }

    /// Run one submission. A lone expression has its value echoed unless it is nil.
    pub fn run_source(&mut self, source: &str) -> KiteResult<()> {
        match parse_source(source)? {
            Parsed::Expression(expr) => {
                let value = self.eval(&expr)?;
                if !matches!(value, Value::Nil) {
                    self.sink.stdout(&format!("{}\n", value.repr()));
                }
            }
            Parsed::Program(body) => {
                self.exec_block(&body)?;
            }
        }
        Ok(())
    }

    fn check_cancel(&self) -> KiteResult<()> {
        if self.cancel.is_cancelled() {
            Err(KiteError::interrupted())
        } else {
            Ok(())
        }
    }

    fn enter(&mut self) -> KiteResult<()> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(recursion_limit());
        }
        self.depth += 1;
        Ok(())
    }

    fn scope_mut(&mut self) -> &mut BTreeMap<String, Value> {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.globals,
        }
    }

    fn lookup(&self, name: &str) -> KiteResult<Value> {
        if let Some(value) = self.frames.last().and_then(|frame| frame.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        modules::builtin("", name)
            .map(Value::Builtin)
            .ok_or_else(|| KiteError::name(name))
    }

    fn exec_block(&mut self, body: &[Stmt]) -> KiteResult<Flow> {
        for stmt in body {
            if let Flow::Return(value) = self.exec(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> KiteResult<Flow> {
        self.check_cancel()?;
        self.enter()?;
        let flow = self.exec_stmt(stmt);
        self.depth -= 1;
        flow
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> KiteResult<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Assign { name, value } => {
                let value = self.eval(value)?;
                self.scope_mut().insert(name.clone(), value);
            }
            Stmt::Print { args, stderr } => {
                let mut parts = Vec::with_capacity(args.len());
                for arg in args {
                    parts.push(self.eval(arg)?.to_string());
                }
                let line = format!("{}\n", parts.join(" "));
                if *stderr {
                    self.sink.stderr(&line);
                } else {
                    self.sink.stdout(&line);
                }
            }
            Stmt::FnDef(def) => {
                let function = Value::Function(Rc::new(def.clone()));
                self.scope_mut().insert(def.name.clone(), function);
            }
            Stmt::Import(name) => {
                let module = modules::module(name).ok_or_else(|| {
                    KiteError::new(ErrorKind::ImportError, format!("No module named '{}'", name))
                })?;
                self.scope_mut().insert(name.clone(), Value::Module(module));
            }
            Stmt::Del(name) => {
                if self.scope_mut().remove(name).is_none() {
                    return Err(KiteError::name(name));
                }
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let branch = if self.eval(cond)?.is_truthy() {
                    then_body
                } else {
                    else_body
                };
                return self.exec_block(branch);
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.is_truthy() {
                    self.check_cancel()?;
                    if let Flow::Return(value) = self.exec_block(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn eval(&mut self, expr: &Expr) -> KiteResult<Value> {
        self.check_cancel()?;
        self.enter()?;
        let value = self.eval_expr(expr);
        self.depth -= 1;
        value
    }

    fn eval_expr(&mut self, expr: &Expr) -> KiteResult<Value> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Value::list(values)
            }
            Expr::Name(name) => self.lookup(name),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(KiteError::overflow),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        Value::Bool(b) => Ok(Value::Int(-(b as i64))),
                        other => Err(KiteError::type_error(format!(
                            "bad operand type for unary -: '{}'",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::And { left, right } => {
                let left = self.eval(left)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or { left, right } => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, left, right)
            }
            Expr::Call { callee, args } => {
                let callee = self.eval(callee)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(callee, values)
            }
            Expr::Attr { object, name } => match self.eval(object)? {
                Value::Module(module) => modules::module_attr(module, name),
                other => Err(KiteError::new(
                    ErrorKind::AttributeError,
                    format!("'{}' object has no attribute '{}'", other.type_name(), name),
                )),
            },
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                subscript(object, index)
            }
        }
    }

    fn call(&mut self, callee: Value, args: Vec<Value>) -> KiteResult<Value> {
        self.check_cancel()?;
        match callee {
            Value::Function(def) => self.call_function(&def, args),
            Value::Builtin(builtin) => modules::call(builtin, args, self.cancel),
            other => Err(KiteError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, def: &FunctionDef, args: Vec<Value>) -> KiteResult<Value> {
        if args.len() != def.params.len() {
            return Err(KiteError::type_error(format!(
                "{}() takes {} arguments ({} given)",
                def.name,
                def.params.len(),
                args.len()
            )));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(recursion_limit());
        }

        self.frames
            .push(def.params.iter().cloned().zip(args).collect());
        let result = self.exec_block(&def.body);
        self.frames.pop();

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
        }
    }
}

fn recursion_limit() -> KiteError {
    KiteError::new(ErrorKind::RecursionError, "maximum recursion depth exceeded")
}

fn type_mismatch(op: BinOp, left: &Value, right: &Value) -> KiteError {
    KiteError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(*b as i64 as f64),
        _ => None,
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) => Some(*n),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn repeat_len(len: usize, times: i64) -> KiteResult<usize> {
    if len == 0 || times <= 0 {
        return Ok(0);
    }
    let times = times as usize;
    match len.checked_mul(times) {
        Some(total) if total <= MAX_SEQUENCE_LEN => Ok(times),
        _ => Err(KiteError::value_error("repeated sequence is too long")),
    }
}

fn floor_div(a: i64, b: i64) -> KiteResult<i64> {
    if b == 0 {
        return Err(KiteError::zero_division("integer division or modulo by zero"));
    }
    let q = a.checked_div(b).ok_or_else(KiteError::overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floor_mod(a: i64, b: i64) -> KiteResult<i64> {
    if b == 0 {
        return Err(KiteError::zero_division("integer division or modulo by zero"));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> KiteResult<Ordering> {
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        _ => match (as_float(left), as_float(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        KiteError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    })
}

fn binary(op: BinOp, left: Value, right: Value) -> KiteResult<Value> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(left.equals(&right))),
        BinOp::Ne => return Ok(Value::Bool(!left.equals(&right))),
        BinOp::Lt => return Ok(Value::Bool(compare(op, &left, &right)? == Ordering::Less)),
        BinOp::Le => return Ok(Value::Bool(compare(op, &left, &right)? != Ordering::Greater)),
        BinOp::Gt => return Ok(Value::Bool(compare(op, &left, &right)? == Ordering::Greater)),
        BinOp::Ge => return Ok(Value::Bool(compare(op, &left, &right)? != Ordering::Less)),
        _ => {}
    }

    match (op, &left, &right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{}{}", a, b))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.clone();
            items.extend(b.iter().cloned());
            return Ok(Value::List(items));
        }
        (BinOp::Mul, Value::Str(s), other) | (BinOp::Mul, other, Value::Str(s)) => {
            if let Some(times) = as_int(other) {
                return Ok(Value::Str(s.repeat(repeat_len(s.len(), times)?)));
            }
        }
        (BinOp::Mul, Value::List(items), other) | (BinOp::Mul, other, Value::List(items)) => {
            if let Some(times) = as_int(other) {
                let times = repeat_len(items.len(), times)?;
                let mut out = Vec::with_capacity(items.len() * times);
                for _ in 0..times {
                    out.extend(items.iter().cloned());
                }
                return Ok(Value::List(out));
            }
        }
        _ => {}
    }

    if let (Some(a), Some(b)) = (as_int(&left), as_int(&right)) {
        return match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(KiteError::overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(KiteError::overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(KiteError::overflow),
            BinOp::Div => {
                if b == 0 {
                    Err(KiteError::zero_division("division by zero"))
                } else {
                    Ok(Value::Float(a as f64 / b as f64))
                }
            }
            BinOp::FloorDiv => floor_div(a, b).map(Value::Int),
            BinOp::Mod => floor_mod(a, b).map(Value::Int),
            _ => Err(type_mismatch(op, &left, &right)),
        };
    }

    if let (Some(a), Some(b)) = (as_float(&left), as_float(&right)) {
        return match op {
            BinOp::Add => Ok(Value::Float(a + b)),
            BinOp::Sub => Ok(Value::Float(a - b)),
            BinOp::Mul => Ok(Value::Float(a * b)),
            BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
                Err(KiteError::zero_division("division by zero"))
            }
            BinOp::Div => Ok(Value::Float(a / b)),
            BinOp::FloorDiv => Ok(Value::Float((a / b).floor())),
            BinOp::Mod => Ok(Value::Float(a - b * (a / b).floor())),
            _ => Err(type_mismatch(op, &left, &right)),
        };
    }

    Err(type_mismatch(op, &left, &right))
}

fn subscript(object: Value, index: Value) -> KiteResult<Value> {
    let Some(index) = as_int(&index) else {
        return Err(KiteError::type_error(format!(
            "indices must be integers, not '{}'",
            index.type_name()
        )));
    };

    let resolve = |len: usize, what: &str| -> KiteResult<usize> {
        let len = len as i64;
        let position = if index < 0 { index + len } else { index };
        if position < 0 || position >= len {
            Err(KiteError::new(
                ErrorKind::IndexError,
                format!("{} index out of range", what),
            ))
        } else {
            Ok(position as usize)
        }
    };

    match object {
        Value::List(items) => {
            let position = resolve(items.len(), "list")?;
            Ok(items[position].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let position = resolve(chars.len(), "string")?;
            Ok(Value::Str(chars[position].to_string()))
        }
        other => Err(KiteError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}
