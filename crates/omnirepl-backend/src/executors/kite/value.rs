use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::rc::Rc;

use super::ast::FunctionDef;
use super::error::{KiteError, KiteResult};

/// Lists may contain lists at most this deep.
pub const MAX_LIST_DEPTH: usize = 100;

/// A native function, addressed by module and name so snapshots can name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    /// Empty for global builtins such as `len`.
    pub module: &'static str,
    pub name: &'static str,
}

/// An open file. Lives only as long as the run that opened it.
#[derive(Debug)]
pub struct FileHandle {
    pub path: String,
    pub reader: Option<BufReader<File>>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Function(Rc<FunctionDef>),
    Builtin(Builtin),
    Module(&'static str),
    Handle(Rc<RefCell<FileHandle>>),
}

impl Value {
    /// Build a list, refusing nesting beyond [`MAX_LIST_DEPTH`].
    pub fn list(items: Vec<Value>) -> KiteResult<Value> {
        let depth = 1 + items.iter().map(Value::list_depth).max().unwrap_or(0);
        if depth > MAX_LIST_DEPTH {
            return Err(KiteError::value_error("list nested too deeply"));
        }
        Ok(Value::List(items))
    }

    pub fn list_depth(&self) -> usize {
        match self {
            Value::List(items) => 1 + items.iter().map(Value::list_depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin",
            Value::Module(_) => "module",
            Value::Handle(_) => "handle",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// Source-like rendering used when echoing expression results.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for ch in s.chars() {
                    match ch {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        '\r' => out.push_str("\\r"),
                        ch => out.push(ch),
                    }
                }
                out.push('\'');
                out
            }
            other => other.to_string(),
        }
    }

    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Handle(a), Value::Handle(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&item.repr())?;
                }
                f.write_str("]")
            }
            Value::Function(def) => write!(f, "<function {}>", def.name),
            Value::Builtin(builtin) if builtin.module.is_empty() => {
                write!(f, "<builtin {}>", builtin.name)
            }
            Value::Builtin(builtin) => write!(f, "<builtin {}.{}>", builtin.module, builtin.name),
            Value::Module(name) => write!(f, "<module '{}'>", name),
            Value::Handle(handle) => write!(f, "<handle '{}'>", handle.borrow().path),
        }
    }
}
