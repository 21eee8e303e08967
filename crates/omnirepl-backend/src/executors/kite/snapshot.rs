//! Session snapshots: the interpreter's global bindings as base64-wrapped JSON.
//!
//! Each binding is encoded on its own so one value that cannot be represented
//! (an open file, a non-finite float) costs only that binding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

use super::ast::FunctionDef;
use super::modules;
use super::value::Value;
use crate::error::{BackendError, Result};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    bindings: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Encoded {
    Nil,
    Bool { value: bool },
    Int { value: i64 },
    Float { value: f64 },
    Str { value: String },
    List { items: Vec<Encoded> },
    Function { def: FunctionDef },
    Module { name: String },
    Builtin { module: String, name: String },
}

fn encode_value(value: &Value) -> Option<Encoded> {
    Some(match value {
        Value::Nil => Encoded::Nil,
        Value::Bool(value) => Encoded::Bool { value: *value },
        Value::Int(value) => Encoded::Int { value: *value },
        Value::Float(value) if value.is_finite() => Encoded::Float { value: *value },
        Value::Float(_) => return None,
        Value::Str(value) => Encoded::Str {
            value: value.clone(),
        },
        Value::List(items) => Encoded::List {
            items: items.iter().map(encode_value).collect::<Option<Vec<_>>>()?,
        },
        Value::Function(def) => Encoded::Function {
            def: def.as_ref().clone(),
        },
        Value::Module(name) => Encoded::Module {
            name: name.to_string(),
        },
        Value::Builtin(builtin) => Encoded::Builtin {
            module: builtin.module.to_string(),
            name: builtin.name.to_string(),
        },
        Value::Handle(_) => return None,
    })
}

fn decode_value(encoded: Encoded) -> Option<Value> {
    Some(match encoded {
        Encoded::Nil => Value::Nil,
        Encoded::Bool { value } => Value::Bool(value),
        Encoded::Int { value } => Value::Int(value),
        Encoded::Float { value } => Value::Float(value),
        Encoded::Str { value } => Value::Str(value),
        Encoded::List { items } => Value::List(
            items
                .into_iter()
                .map(decode_value)
                .collect::<Option<Vec<_>>>()?,
        ),
        Encoded::Function { def } => Value::Function(Rc::new(def)),
        Encoded::Module { name } => Value::Module(modules::module(&name)?),
        Encoded::Builtin { module, name } => Value::Builtin(modules::builtin(&module, &name)?),
    })
}

/// Serialize `globals`, skipping bindings that cannot be carried across runs.
pub fn encode(globals: &BTreeMap<String, Value>) -> Result<String> {
    let mut bindings = BTreeMap::new();
    for (name, value) in globals {
        let Some(encoded) = encode_value(value) else {
            log::warn!(
                "Dropping binding '{}' of type {} from snapshot",
                name,
                value.type_name()
            );
            continue;
        };
        let json = serde_json::to_value(encoded)
            .map_err(|e| BackendError::Snapshot(format!("failed to encode '{}': {}", name, e)))?;
        bindings.insert(name.clone(), json);
    }

    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        bindings,
    };
    let json = serde_json::to_vec(&snapshot)
        .map_err(|e| BackendError::Snapshot(format!("failed to encode snapshot: {}", e)))?;
    Ok(STANDARD.encode(json))
}

/// Restore globals from `data`. Bindings that no longer decode are dropped.
pub fn decode(data: &str) -> Result<BTreeMap<String, Value>> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| BackendError::Snapshot(format!("snapshot is not valid base64: {}", e)))?;
    let snapshot: Snapshot = serde_json::from_slice(&bytes)
        .map_err(|e| BackendError::Snapshot(format!("snapshot is not valid JSON: {}", e)))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(BackendError::Snapshot(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }

    let mut globals = BTreeMap::new();
    for (name, json) in snapshot.bindings {
        let decoded = serde_json::from_value::<Encoded>(json)
            .ok()
            .and_then(decode_value);
        match decoded {
            Some(value) => {
                globals.insert(name, value);
            }
            None => log::warn!("Dropping undecodable binding '{}' from snapshot", name),
        }
    }
    Ok(globals)
}
