//! Native builtins and importable modules.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use super::error::{ErrorKind, KiteError, KiteResult};
use super::value::{Builtin, FileHandle, Value};

const GLOBALS: &[&str] = &[
    "len", "str", "int", "float", "type", "range", "append", "open", "readline", "close",
];

/// Importable modules and their callable members.
const MODULES: &[(&str, &[&str])] = &[
    ("math", &["sqrt", "floor", "ceil", "abs", "pow"]),
    ("text", &["upper", "lower", "split", "join", "trim"]),
    ("time", &["now", "sleep"]),
];

const MAX_RANGE: i64 = 1_000_000;

/// Resolve a builtin by module (empty for globals) and name.
pub fn builtin(module: &str, name: &str) -> Option<Builtin> {
    if module.is_empty() {
        return GLOBALS
            .iter()
            .copied()
            .find(|global| *global == name)
            .map(|global| Builtin { module: "", name: global });
    }
    let &(module, members) = MODULES.iter().find(|(m, _)| *m == module)?;
    members
        .iter()
        .copied()
        .find(|member| *member == name)
        .map(|member| Builtin { module, name: member })
}

pub fn module(name: &str) -> Option<&'static str> {
    MODULES.iter().find(|(m, _)| *m == name).map(|(m, _)| *m)
}

pub fn module_attr(module: &'static str, name: &str) -> KiteResult<Value> {
    match (module, name) {
        ("math", "pi") => return Ok(Value::Float(std::f64::consts::PI)),
        ("math", "e") => return Ok(Value::Float(std::f64::consts::E)),
        _ => {}
    }
    builtin(module, name).map(Value::Builtin).ok_or_else(|| {
        KiteError::new(
            ErrorKind::AttributeError,
            format!("module '{}' has no attribute '{}'", module, name),
        )
    })
}

fn arity(builtin: &Builtin, args: &[Value], min: usize, max: usize) -> KiteResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(KiteError::type_error(format!(
            "{}() takes {} arguments ({} given)",
            builtin.name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn number(builtin: &Builtin, value: &Value) -> KiteResult<f64> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(KiteError::type_error(format!(
            "{}() expects a number, not '{}'",
            builtin.name,
            other.type_name()
        ))),
    }
}

fn string<'a>(builtin: &Builtin, value: &'a Value) -> KiteResult<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(KiteError::type_error(format!(
            "{}() expects a str, not '{}'",
            builtin.name,
            other.type_name()
        ))),
    }
}

fn int(builtin: &Builtin, value: &Value) -> KiteResult<i64> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Bool(b) => Ok(*b as i64),
        other => Err(KiteError::type_error(format!(
            "{}() expects an int, not '{}'",
            builtin.name,
            other.type_name()
        ))),
    }
}

fn handle(builtin: &Builtin, value: &Value) -> KiteResult<Rc<RefCell<FileHandle>>> {
    match value {
        Value::Handle(handle) => Ok(handle.clone()),
        other => Err(KiteError::type_error(format!(
            "{}() expects a handle, not '{}'",
            builtin.name,
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> KiteResult<i64> {
    if !f.is_finite() {
        return Err(KiteError::value_error(format!(
            "cannot convert float {} to integer",
            f
        )));
    }
    if f >= i64::MAX as f64 || f < i64::MIN as f64 {
        return Err(KiteError::overflow());
    }
    Ok(f as i64)
}

pub fn call(builtin: Builtin, args: Vec<Value>, cancel: &CancellationToken) -> KiteResult<Value> {
    let b = &builtin;
    match (builtin.module, builtin.name) {
        ("", "len") => {
            arity(b, &args, 1, 1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(KiteError::type_error(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                ))),
            }
        }
        ("", "str") => {
            arity(b, &args, 1, 1)?;
            Ok(Value::Str(args[0].to_string()))
        }
        ("", "int") => {
            arity(b, &args, 1, 1)?;
            match &args[0] {
                Value::Int(n) => Ok(Value::Int(*n)),
                Value::Bool(v) => Ok(Value::Int(*v as i64)),
                Value::Float(f) => Ok(Value::Int(float_to_int(f.trunc())?)),
                Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    KiteError::value_error(format!("invalid literal for int(): '{}'", s))
                }),
                other => Err(KiteError::type_error(format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            }
        }
        ("", "float") => {
            arity(b, &args, 1, 1)?;
            match &args[0] {
                Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    KiteError::value_error(format!("could not convert string to float: '{}'", s))
                }),
                other => Ok(Value::Float(number(b, other)?)),
            }
        }
        ("", "type") => {
            arity(b, &args, 1, 1)?;
            Ok(Value::Str(args[0].type_name().to_string()))
        }
        ("", "range") => {
            arity(b, &args, 1, 2)?;
            let (start, end) = if args.len() == 1 {
                (0, int(b, &args[0])?)
            } else {
                (int(b, &args[0])?, int(b, &args[1])?)
            };
            if end.saturating_sub(start) > MAX_RANGE {
                return Err(KiteError::value_error(format!(
                    "range() is limited to {} items",
                    MAX_RANGE
                )));
            }
            Ok(Value::List((start..end.max(start)).map(Value::Int).collect()))
        }
        ("", "append") => {
            arity(b, &args, 2, 2)?;
            let mut args = args.into_iter();
            match (args.next(), args.next()) {
                (Some(Value::List(mut items)), Some(item)) => {
                    items.push(item);
                    Value::list(items)
                }
                (Some(other), _) => Err(KiteError::type_error(format!(
                    "append() expects a list, not '{}'",
                    other.type_name()
                ))),
                _ => Err(KiteError::type_error("append() takes 2 arguments")),
            }
        }
        ("", "open") => {
            arity(b, &args, 1, 1)?;
            let path = string(b, &args[0])?;
            let file = File::open(path).map_err(|e| {
                KiteError::new(ErrorKind::OSError, format!("{}: '{}'", e, path))
            })?;
            Ok(Value::Handle(Rc::new(RefCell::new(FileHandle {
                path: path.to_string(),
                reader: Some(BufReader::new(file)),
            }))))
        }
        ("", "readline") => {
            arity(b, &args, 1, 1)?;
            let handle = handle(b, &args[0])?;
            let mut handle = handle.borrow_mut();
            let path = handle.path.clone();
            let reader = handle.reader.as_mut().ok_or_else(|| {
                KiteError::value_error(format!("I/O operation on closed file '{}'", path))
            })?;
            let mut line = String::new();
            reader
                .read_line(&mut line)
                .map_err(|e| KiteError::new(ErrorKind::OSError, format!("{}: '{}'", e, path)))?;
            Ok(Value::Str(line))
        }
        ("", "close") => {
            arity(b, &args, 1, 1)?;
            handle(b, &args[0])?.borrow_mut().reader = None;
            Ok(Value::Nil)
        }
        ("math", "sqrt") => {
            arity(b, &args, 1, 1)?;
            let x = number(b, &args[0])?;
            if x < 0.0 {
                return Err(KiteError::value_error("math domain error"));
            }
            Ok(Value::Float(x.sqrt()))
        }
        ("math", "floor") => {
            arity(b, &args, 1, 1)?;
            Ok(Value::Int(float_to_int(number(b, &args[0])?.floor())?))
        }
        ("math", "ceil") => {
            arity(b, &args, 1, 1)?;
            Ok(Value::Int(float_to_int(number(b, &args[0])?.ceil())?))
        }
        ("math", "abs") => {
            arity(b, &args, 1, 1)?;
            match &args[0] {
                Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(KiteError::overflow),
                other => Ok(Value::Float(number(b, other)?.abs())),
            }
        }
        ("math", "pow") => {
            arity(b, &args, 2, 2)?;
            Ok(Value::Float(number(b, &args[0])?.powf(number(b, &args[1])?)))
        }
        ("text", "upper") => {
            arity(b, &args, 1, 1)?;
            Ok(Value::Str(string(b, &args[0])?.to_uppercase()))
        }
        ("text", "lower") => {
            arity(b, &args, 1, 1)?;
            Ok(Value::Str(string(b, &args[0])?.to_lowercase()))
        }
        ("text", "trim") => {
            arity(b, &args, 1, 1)?;
            Ok(Value::Str(string(b, &args[0])?.trim().to_string()))
        }
        ("text", "split") => {
            arity(b, &args, 1, 2)?;
            let s = string(b, &args[0])?;
            let parts: Vec<Value> = match args.get(1) {
                Some(sep) => {
                    let sep = string(b, sep)?;
                    if sep.is_empty() {
                        return Err(KiteError::value_error("empty separator"));
                    }
                    s.split(sep).map(|part| Value::Str(part.to_string())).collect()
                }
                None => s.split_whitespace().map(|part| Value::Str(part.to_string())).collect(),
            };
            Ok(Value::List(parts))
        }
        ("text", "join") => {
            arity(b, &args, 2, 2)?;
            let sep = string(b, &args[0])?;
            let Value::List(items) = &args[1] else {
                return Err(KiteError::type_error(format!(
                    "join() expects a list, not '{}'",
                    args[1].type_name()
                )));
            };
            let parts: Vec<String> = items.iter().map(|item| item.to_string()).collect();
            Ok(Value::Str(parts.join(sep)))
        }
        ("time", "now") => {
            arity(b, &args, 0, 0)?;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            Ok(Value::Float(now))
        }
        ("time", "sleep") => {
            arity(b, &args, 1, 1)?;
            let secs = number(b, &args[0])?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(KiteError::value_error("sleep length must be non-negative"));
            }
            let deadline = Instant::now() + Duration::from_secs_f64(secs.min(86_400.0));
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    return Err(KiteError::interrupted());
                }
                let left = deadline.saturating_duration_since(Instant::now());
                std::thread::sleep(left.min(Duration::from_millis(10)));
            }
            Ok(Value::Nil)
        }
        (module, name) => Err(KiteError::new(
            ErrorKind::NameError,
            format!("unknown builtin {}.{}", module, name),
        )),
    }
}
