//! `x-variables` entry parsing

use super::as_text;
use crate::error::{Result, StackError};
use crate::model::{ConnectionEngine, VariableDefinition, VariableType, compile_anchored};
use serde::Deserialize;
use serde_yaml::Value;

/// Attributes accepted on an `x-variables` entry
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVariable {
    #[serde(rename = "type")]
    kind: Option<String>,
    default: Option<Value>,
    required: Option<bool>,
    label: Option<String>,
    description: Option<String>,
    group: Option<String>,
    pattern: Option<String>,
    min: Option<f64>,
    max: Option<f64>,
    options: Option<Vec<Value>>,
    min_length: Option<usize>,
}

/// Explicit declaration, before merging with detected placeholders
#[derive(Debug, Clone)]
pub struct DeclaredVariable {
    pub definition: VariableDefinition,
    /// `required` was written out rather than inferred
    pub explicit_required: bool,
}

pub fn parse_variable(name: &str, value: &Value) -> Result<DeclaredVariable> {
    let raw: RawVariable = match value {
        Value::Null => RawVariable::default(),
        Value::Mapping(_) => serde_yaml::from_value(value.clone())
            .map_err(|e| malformed(name, e))?,
        _ => return Err(malformed(name, "must be a mapping")),
    };

    let kind = variable_type(name, &raw)?;

    let default = match &raw.default {
        None | Some(Value::Null) => None,
        Some(v) => Some(as_text(v).ok_or_else(|| malformed(name, "default must be a scalar"))?),
    };

    let definition = VariableDefinition {
        name: name.to_string(),
        kind,
        required: raw.required.unwrap_or(default.is_none()),
        default,
        label: raw.label,
        description: raw.description,
        group: raw.group,
    };

    if let Some(default) = &definition.default
        && let Err(e) = definition.validate(default)
    {
        return Err(malformed(name, format!("default does not validate: {e}")));
    }

    Ok(DeclaredVariable {
        definition,
        explicit_required: raw.required.is_some(),
    })
}

fn variable_type(name: &str, raw: &RawVariable) -> Result<VariableType> {
    let tag = raw.kind.as_deref().unwrap_or("string").to_lowercase();

    if let Some(pattern) = &raw.pattern {
        compile_anchored(pattern).map_err(|e| malformed(name, format!("invalid pattern: {e}")))?;
    }

    let kind = match tag.as_str() {
        "string" | "text" => VariableType::String {
            pattern: raw.pattern.clone(),
        },
        "number" | "integer" => {
            if let (Some(min), Some(max)) = (raw.min, raw.max)
                && min > max
            {
                return Err(malformed(name, format!("min {min} is greater than max {max}")));
            }
            VariableType::Number {
                min: raw.min,
                max: raw.max,
            }
        }
        "boolean" | "bool" => VariableType::Boolean,
        "select" => {
            let options = raw
                .options
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|o| as_text(o).ok_or_else(|| malformed(name, "options must be scalars")))
                .collect::<Result<Vec<_>>>()?;
            if options.is_empty() {
                return Err(malformed(name, "select requires at least one option"));
            }
            VariableType::Select { options }
        }
        "password" | "secret" => VariableType::Password {
            min_length: raw.min_length,
            pattern: raw.pattern.clone(),
        },
        "port" => VariableType::Port,
        "url" => VariableType::Url,
        "email" => VariableType::Email,
        "path" => VariableType::Path,
        "multi_line" | "multiline" => VariableType::MultiLine,
        other => match connection_engine(other) {
            Some(engine) => VariableType::ConnectionString { engine },
            None => return Err(malformed(name, format!("unknown type `{other}`"))),
        },
    };

    Ok(kind)
}

fn connection_engine(tag: &str) -> Option<ConnectionEngine> {
    let engine = match tag {
        "connection_string" => ConnectionEngine::Generic,
        "sql_server_connection_string" | "sqlserver_connection_string" => {
            ConnectionEngine::SqlServer
        }
        "postgres_connection_string" | "postgresql_connection_string" => {
            ConnectionEngine::Postgres
        }
        "mysql_connection_string" => ConnectionEngine::MySql,
        "mongodb_connection_string" => ConnectionEngine::MongoDb,
        "redis_connection_string" => ConnectionEngine::Redis,
        _ => return None,
    };
    Some(engine)
}

fn malformed(name: &str, what: impl std::fmt::Display) -> StackError {
    StackError::malformed(format!("x-variables `{name}`: {what}"))
}
