//! Manifest parser
//!
//! Reads compose-style YAML into a `StackDefinition`. Placeholders are only
//! detected here; substitution happens when a plan is built.

mod service;
mod variable;

use service::parse_service;
use variable::{DeclaredVariable, parse_variable};

use crate::error::{Result, StackError};
use crate::model::{NetworkSpec, ServiceSpec, StackDefinition, ValidationReport, VariableDefinition, VolumeSpec};
use crate::template::VariableResolver;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, instrument, warn};

/// Network every service joins when it declares none
pub const DEFAULT_NETWORK: &str = "default";

/// Top-level manifest layout. Unknown keys (`version`, other `x-*`) are ignored.
#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    services: Option<Entries>,
    #[serde(default)]
    volumes: Option<Entries>,
    #[serde(default)]
    networks: Option<Entries>,
    #[serde(default, rename = "x-variables")]
    variables: Option<Entries>,
}

/// Mapping kept as ordered entries so that duplicate keys reach the parser
#[derive(Debug, Default)]
struct Entries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for Entries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Entries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Entries, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    entries.push((key, value));
                }
                Ok(Entries(entries))
            }

            fn visit_unit<E>(self) -> std::result::Result<Entries, E> {
                Ok(Entries::default())
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Everything learned from a manifest, including findings that are not errors
struct ParsedManifest {
    definition: StackDefinition,
    duplicate_services: Vec<String>,
    unused_variables: Vec<String>,
}

pub struct ManifestParser {
    resolver: VariableResolver,
}

impl ManifestParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            resolver: VariableResolver::new()?,
        })
    }

    /// Parse manifest text into a stack definition
    #[instrument(skip(self, text))]
    pub fn parse(&self, text: &str) -> Result<StackDefinition> {
        let parsed = self.parse_manifest(text)?;
        for name in &parsed.duplicate_services {
            warn!(service = %name, "Service defined more than once; definitions merged");
        }
        debug!(
            services = parsed.definition.services.len(),
            variables = parsed.definition.variables.len(),
            "Parsed manifest"
        );
        Ok(parsed.definition)
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<StackDefinition> {
        let content = fs::read_to_string(path.as_ref())?;
        self.parse(&content)
    }

    /// Variables referenced or declared by the manifest, first-seen order.
    ///
    /// Placeholders are collected from every service field, then volume and
    /// network declarations. `x-variables` metadata takes precedence;
    /// declarations that are never referenced are appended last.
    #[instrument(skip(self, text))]
    pub fn detect_variables(&self, text: &str) -> Result<Vec<VariableDefinition>> {
        Ok(self.parse_manifest(text)?.definition.variables)
    }

    /// Check a manifest without building a plan
    #[instrument(skip(self, text))]
    pub fn validate(&self, text: &str) -> ValidationReport {
        let parsed = match self.parse_manifest(text) {
            Ok(parsed) => parsed,
            Err(e) => return ValidationReport::from_findings(vec![e.to_string()], Vec::new()),
        };

        let errors = parsed
            .definition
            .variables
            .iter()
            .filter(|v| v.needs_value())
            .map(|v| format!("variable `{}` is required and has no default", v.name))
            .collect();

        let mut warnings: Vec<String> = parsed
            .unused_variables
            .iter()
            .map(|name| format!("variable `{name}` is declared but never used"))
            .collect();
        warnings.extend(
            parsed
                .duplicate_services
                .iter()
                .map(|name| format!("service `{name}` is defined more than once; definitions were merged")),
        );

        ValidationReport::from_findings(errors, warnings)
    }

    fn parse_manifest(&self, text: &str) -> Result<ParsedManifest> {
        let raw: RawManifest = match serde_yaml::from_str(text) {
            Ok(raw) => raw,
            Err(e) => return Err(StackError::malformed(e.to_string())),
        };

        let (services, duplicate_services) = parse_services(raw.services)?;
        let volumes = raw
            .volumes
            .unwrap_or_default()
            .0
            .iter()
            .map(|(name, value)| parse_volume(name, value))
            .collect::<Result<Vec<_>>>()?;
        let networks = raw
            .networks
            .unwrap_or_default()
            .0
            .iter()
            .map(|(name, value)| parse_network(name, value))
            .collect::<Result<Vec<_>>>()?;
        let declared = raw
            .variables
            .unwrap_or_default()
            .0
            .iter()
            .map(|(name, value)| parse_variable(name, value))
            .collect::<Result<Vec<_>>>()?;

        check_references(&services, &networks)?;

        let (variables, unused_variables) =
            self.merge_variables(&services, &volumes, &networks, declared)?;

        Ok(ParsedManifest {
            definition: StackDefinition {
                name: raw.name,
                services,
                variables,
                volumes,
                networks,
            },
            duplicate_services,
            unused_variables,
        })
    }

    fn merge_variables(
        &self,
        services: &[ServiceSpec],
        volumes: &[VolumeSpec],
        networks: &[NetworkSpec],
        declared: Vec<DeclaredVariable>,
    ) -> Result<(Vec<VariableDefinition>, Vec<String>)> {
        let mut texts: Vec<&str> = services.iter().flat_map(ServiceSpec::text_fields).collect();
        texts.extend(volumes.iter().filter_map(|v| v.driver.as_deref()));
        texts.extend(networks.iter().filter_map(|n| n.driver.as_deref()));

        let detected = self.resolver.detect_all(texts);
        let mut variables = Vec::with_capacity(detected.len() + declared.len());

        for placeholder in &detected {
            let definition = match declared
                .iter()
                .find(|d| d.definition.name == placeholder.name)
            {
                Some(declared) => {
                    let mut definition = declared.definition.clone();
                    if definition.default.is_none() {
                        definition.default = placeholder.default.clone();
                    }
                    if !declared.explicit_required {
                        definition.required = definition.default.is_none();
                    }
                    if let Some(default) = &definition.default
                        && let Err(e) = definition.validate(default)
                    {
                        return Err(StackError::malformed(format!(
                            "inline default for `{}` does not validate: {e}",
                            definition.name
                        )));
                    }
                    definition
                }
                None => VariableDefinition::detected(&placeholder.name, placeholder.default.clone()),
            };
            variables.push(definition);
        }

        let mut unused = Vec::new();
        for declared in declared {
            if !detected.iter().any(|p| p.name == declared.definition.name) {
                unused.push(declared.definition.name.clone());
                variables.push(declared.definition);
            }
        }

        Ok((variables, unused))
    }
}

/// Services in first-seen order; later duplicates are merged into earlier ones
fn parse_services(entries: Option<Entries>) -> Result<(Vec<ServiceSpec>, Vec<String>)> {
    let entries = entries.unwrap_or_default().0;
    if entries.is_empty() {
        return Err(StackError::malformed(
            "manifest must declare at least one service under `services`",
        ));
    }

    let mut services: Vec<ServiceSpec> = Vec::with_capacity(entries.len());
    let mut duplicates = Vec::new();

    for (name, value) in &entries {
        let service = parse_service(name, value)?;
        if let Some(existing) = services.iter_mut().find(|s| s.name == *name) {
            existing.merge(service);
            if !duplicates.contains(name) {
                duplicates.push(name.clone());
            }
        } else {
            services.push(service);
        }
    }

    if let Some(service) = services.iter().find(|s| s.image.trim().is_empty()) {
        return Err(StackError::malformed(format!(
            "service `{}` has no image",
            service.name
        )));
    }

    Ok((services, duplicates))
}

fn check_references(services: &[ServiceSpec], networks: &[NetworkSpec]) -> Result<()> {
    for service in services {
        for dependency in &service.depends_on {
            if !services.iter().any(|s| s.name == *dependency) {
                return Err(StackError::malformed(format!(
                    "service `{}` depends on undeclared service `{dependency}`",
                    service.name
                )));
            }
        }
        for network in &service.networks {
            if network != DEFAULT_NETWORK && !networks.iter().any(|n| n.name == *network) {
                return Err(StackError::malformed(format!(
                    "service `{}` references undeclared network `{network}`",
                    service.name
                )));
            }
        }
    }
    Ok(())
}

fn parse_volume(name: &str, value: &Value) -> Result<VolumeSpec> {
    let (driver, external) = resource_options("volume", name, value)?;
    Ok(VolumeSpec {
        name: name.to_string(),
        driver,
        external,
    })
}

fn parse_network(name: &str, value: &Value) -> Result<NetworkSpec> {
    let (driver, external) = resource_options("network", name, value)?;
    Ok(NetworkSpec {
        name: name.to_string(),
        driver,
        external,
    })
}

/// `driver` and `external` of a top-level volume or network entry
fn resource_options(kind: &str, name: &str, value: &Value) -> Result<(Option<String>, bool)> {
    let map = match value {
        Value::Null => return Ok((None, false)),
        Value::Mapping(map) => map,
        _ => {
            return Err(StackError::malformed(format!(
                "{kind} `{name}` must be a mapping"
            )));
        }
    };

    let driver = map.get("driver").and_then(as_text);
    let external = match map.get("external") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        // Legacy `external: { name: ... }`
        Some(Value::Mapping(_)) => true,
        Some(_) => {
            return Err(StackError::malformed(format!(
                "{kind} `{name}`: `external` must be a boolean"
            )));
        }
    };

    Ok((driver, external))
}

/// Scalar as text; `None` for sequences and mappings
pub(crate) fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Tagged(tagged) => as_text(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

pub(crate) fn mapping_keys(map: &Mapping) -> std::result::Result<Vec<String>, String> {
    map.keys()
        .map(|k| as_text(k).ok_or_else(|| "has a non-scalar key".to_string()))
        .collect()
}
