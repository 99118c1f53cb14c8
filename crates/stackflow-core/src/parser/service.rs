//! Service entry parsing
//!
//! Both the compose short syntax and the long (mapping) syntax are accepted.
//! Everything is normalised to the short textual form so that placeholders
//! survive until plan time.

use super::{as_text, mapping_keys};
use crate::error::{Result, StackError};
use crate::model::ServiceSpec;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// Parse a single `services.<name>` entry.
///
/// The image is checked by the caller once duplicate entries are merged.
pub fn parse_service(name: &str, value: &Value) -> Result<ServiceSpec> {
    let mut service = ServiceSpec {
        name: name.to_string(),
        ..Default::default()
    };

    let body = match value {
        Value::Mapping(map) => map,
        Value::Null => return Ok(service),
        _ => {
            return Err(StackError::malformed(format!(
                "service `{name}` must be a mapping"
            )));
        }
    };

    for (key, field) in body {
        let Some(key) = key.as_str() else {
            return Err(StackError::malformed(format!(
                "service `{name}` has a non-string key"
            )));
        };
        let ctx = FieldContext { service: name, key };

        match key {
            "image" => service.image = ctx.scalar(field)?,
            "ports" => service.ports = ctx.list(field, port_entry)?,
            "environment" | "env" => service.environment = ctx.key_values(field)?,
            "volumes" => service.volumes = ctx.list(field, mount_entry)?,
            "networks" => service.networks = ctx.names(field)?,
            "depends_on" => service.depends_on = ctx.names(field)?,
            "command" => service.command = Some(ctx.command(field)?),
            "restart" => service.restart = Some(ctx.scalar(field)?),
            "labels" => service.labels = ctx.key_values(field)?,
            // Other compose keys are not managed by stackflow
            _ => {}
        }
    }

    Ok(service)
}

struct FieldContext<'a> {
    service: &'a str,
    key: &'a str,
}

impl FieldContext<'_> {
    fn error(&self, what: impl std::fmt::Display) -> StackError {
        StackError::malformed(format!(
            "service `{}`: `{}` {what}",
            self.service, self.key
        ))
    }

    fn scalar(&self, value: &Value) -> Result<String> {
        as_text(value).ok_or_else(|| self.error("must be a scalar"))
    }

    /// Sequence whose items are either scalars or long-syntax mappings
    fn list(
        &self,
        value: &Value,
        long_form: fn(&Mapping) -> std::result::Result<String, String>,
    ) -> Result<Vec<String>> {
        let Value::Sequence(items) = value else {
            return Err(self.error("must be a list"));
        };

        items
            .iter()
            .map(|item| match item {
                Value::Mapping(map) => long_form(map).map_err(|e| self.error(e)),
                other => as_text(other).ok_or_else(|| self.error("contains a nested list")),
            })
            .collect()
    }

    /// Mapping of scalars, or a list of `KEY=VALUE` strings
    fn key_values(&self, value: &Value) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        match value {
            Value::Mapping(map) => {
                for (k, v) in map {
                    let k = as_text(k).ok_or_else(|| self.error("has a non-scalar key"))?;
                    let v = as_text(v).ok_or_else(|| self.error(format!("`{k}` must be a scalar")))?;
                    out.insert(k, v);
                }
            }
            Value::Sequence(items) => {
                for item in items {
                    let entry = as_text(item).ok_or_else(|| self.error("must contain strings"))?;
                    let (k, v) = match entry.split_once('=') {
                        Some((k, v)) => (k.to_string(), v.to_string()),
                        None => (entry.clone(), String::new()),
                    };
                    out.insert(k, v);
                }
            }
            Value::Null => {}
            _ => return Err(self.error("must be a mapping or a list")),
        }
        Ok(out)
    }

    /// List of names, or a mapping whose keys are the names
    fn names(&self, value: &Value) -> Result<Vec<String>> {
        match value {
            Value::Sequence(items) => items
                .iter()
                .map(|item| as_text(item).ok_or_else(|| self.error("must contain names")))
                .collect(),
            Value::Mapping(map) => mapping_keys(map).map_err(|e| self.error(e)),
            Value::Null => Ok(Vec::new()),
            _ => Err(self.error("must be a list or a mapping")),
        }
    }

    fn command(&self, value: &Value) -> Result<Vec<String>> {
        match value {
            Value::Sequence(items) => items
                .iter()
                .map(|item| as_text(item).ok_or_else(|| self.error("must contain strings")))
                .collect(),
            other => {
                let line = self.scalar(other)?;
                Ok(line.split_whitespace().map(str::to_string).collect())
            }
        }
    }
}

/// `{target, published, protocol, host_ip}` → `[host_ip:]published:target[/protocol]`
fn port_entry(map: &Mapping) -> std::result::Result<String, String> {
    let field = |name: &str| map.get(name).and_then(as_text);

    let target = field("target").ok_or("port entry requires `target`")?;
    let mut spec = match field("published") {
        Some(published) => format!("{published}:{target}"),
        None => target,
    };
    if let Some(host_ip) = field("host_ip") {
        spec = format!("{host_ip}:{spec}");
    }
    if let Some(protocol) = field("protocol") {
        spec = format!("{spec}/{protocol}");
    }
    Ok(spec)
}

/// `{source, target, read_only}` → `source:target[:ro]`
fn mount_entry(map: &Mapping) -> std::result::Result<String, String> {
    let field = |name: &str| map.get(name).and_then(as_text);

    let target = field("target").ok_or("volume entry requires `target`")?;
    let read_only = map
        .get("read_only")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match field("source") {
        Some(source) if !source.is_empty() => {
            let mode = if read_only { ":ro" } else { "" };
            Ok(format!("{source}:{target}{mode}"))
        }
        _ => Ok(target),
    }
}
