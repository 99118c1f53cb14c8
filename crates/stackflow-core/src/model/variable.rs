//! Variable definitions
//!
//! A variable is either detected from a `${NAME}` placeholder or declared
//! explicitly in the manifest's `x-variables` block. The type tag carries the
//! validation metadata that applies to it.

use crate::error::{Result, StackError};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    #[serde(flatten)]
    pub kind: VariableType,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Display group used by front ends to cluster related variables
    #[serde(default)]
    pub group: Option<String>,
}

/// Variable type with its type-specific constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableType {
    String {
        #[serde(default)]
        pattern: Option<String>,
    },
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Boolean,
    Select {
        options: Vec<String>,
    },
    Password {
        #[serde(default)]
        min_length: Option<usize>,
        #[serde(default)]
        pattern: Option<String>,
    },
    Port,
    Url,
    Email,
    Path,
    MultiLine,
    ConnectionString {
        #[serde(default)]
        engine: ConnectionEngine,
    },
}

/// Database engine of a connection-string variable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEngine {
    #[default]
    Generic,
    SqlServer,
    Postgres,
    MySql,
    MongoDb,
    Redis,
}

impl Default for VariableType {
    fn default() -> Self {
        VariableType::String { pattern: None }
    }
}

impl VariableType {
    /// Tag as written in manifests
    pub fn tag(&self) -> &'static str {
        match self {
            VariableType::String { .. } => "string",
            VariableType::Number { .. } => "number",
            VariableType::Boolean => "boolean",
            VariableType::Select { .. } => "select",
            VariableType::Password { .. } => "password",
            VariableType::Port => "port",
            VariableType::Url => "url",
            VariableType::Email => "email",
            VariableType::Path => "path",
            VariableType::MultiLine => "multi_line",
            VariableType::ConnectionString { engine } => match engine {
                ConnectionEngine::Generic => "connection_string",
                ConnectionEngine::SqlServer => "sql_server_connection_string",
                ConnectionEngine::Postgres => "postgres_connection_string",
                ConnectionEngine::MySql => "mysql_connection_string",
                ConnectionEngine::MongoDb => "mongodb_connection_string",
                ConnectionEngine::Redis => "redis_connection_string",
            },
        }
    }
}

impl VariableDefinition {
    /// Definition inferred from a placeholder alone
    pub fn detected(name: impl Into<String>, default: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariableType::default(),
            required: default.is_none(),
            default,
            label: None,
            description: None,
            group: None,
        }
    }

    /// Required and impossible to satisfy without a caller-supplied value
    pub fn needs_value(&self) -> bool {
        self.required && self.default.is_none()
    }

    pub fn is_secret(&self) -> bool {
        matches!(self.kind, VariableType::Password { .. })
            || matches!(self.kind, VariableType::ConnectionString { .. })
    }

    /// Check a concrete value against the type constraints.
    pub fn validate(&self, value: &str) -> Result<()> {
        if value.is_empty() {
            return if self.required {
                Err(self.invalid("a value is required"))
            } else {
                Ok(())
            };
        }

        match &self.kind {
            VariableType::String { pattern } => self.check_pattern(pattern.as_deref(), value),
            VariableType::Number { min, max } => {
                let number = value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| self.invalid(format!("`{value}` is not a number")))?;
                if let Some(min) = min
                    && number < *min
                {
                    return Err(self.invalid(format!("{number} is below the minimum {min}")));
                }
                if let Some(max) = max
                    && number > *max
                {
                    return Err(self.invalid(format!("{number} is above the maximum {max}")));
                }
                Ok(())
            }
            VariableType::Boolean => match value.to_lowercase().as_str() {
                "true" | "false" | "1" | "0" | "yes" | "no" => Ok(()),
                _ => Err(self.invalid(format!("`{value}` is not a boolean"))),
            },
            VariableType::Select { options } => {
                if options.iter().any(|o| o == value) {
                    Ok(())
                } else {
                    Err(self.invalid(format!(
                        "`{value}` is not one of: {}",
                        options.join(", ")
                    )))
                }
            }
            VariableType::Password {
                min_length,
                pattern,
            } => {
                if let Some(min) = min_length
                    && value.chars().count() < *min
                {
                    return Err(self.invalid(format!("must be at least {min} characters")));
                }
                self.check_pattern(pattern.as_deref(), value)
            }
            VariableType::Port => match value.trim().parse::<u16>() {
                Ok(port) if port > 0 => Ok(()),
                _ => Err(self.invalid(format!("`{value}` is not a valid port (1-65535)"))),
            },
            VariableType::Url => self.check_builtin(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^\s/]+\S*$", value, "URL"),
            VariableType::Email => self.check_builtin(r"^[^@\s]+@[^@\s]+\.[^@\s]+$", value, "email address"),
            VariableType::Path => {
                if value.contains('\0') {
                    Err(self.invalid("path contains a NUL byte"))
                } else {
                    Ok(())
                }
            }
            VariableType::MultiLine => Ok(()),
            VariableType::ConnectionString { engine } => {
                if connection_string_matches(*engine, value) {
                    Ok(())
                } else {
                    Err(self.invalid(format!(
                        "not a valid {} connection string",
                        engine_display(*engine)
                    )))
                }
            }
        }
    }

    fn check_pattern(&self, pattern: Option<&str>, value: &str) -> Result<()> {
        let Some(pattern) = pattern else {
            return Ok(());
        };
        let re = compile_anchored(pattern).map_err(|source| StackError::InvalidPattern {
            name: self.name.clone(),
            source,
        })?;
        if re.is_match(value) {
            Ok(())
        } else {
            Err(self.invalid(format!("`{value}` does not match pattern `{pattern}`")))
        }
    }

    fn check_builtin(&self, pattern: &str, value: &str, what: &str) -> Result<()> {
        let re = Regex::new(pattern).map_err(|source| StackError::InvalidPattern {
            name: self.name.clone(),
            source,
        })?;
        if re.is_match(value) {
            Ok(())
        } else {
            Err(self.invalid(format!("`{value}` is not a valid {what}")))
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> StackError {
        StackError::InvalidVariable {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Patterns match the whole value
pub(crate) fn compile_anchored(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

fn connection_string_matches(engine: ConnectionEngine, value: &str) -> bool {
    let lower = value.to_lowercase();
    let has_key = |key: &str| lower.contains(&format!("{key}="));
    match engine {
        ConnectionEngine::Generic => lower.contains("://") || lower.contains('='),
        ConnectionEngine::SqlServer => has_key("server") || has_key("data source"),
        ConnectionEngine::Postgres => {
            lower.starts_with("postgres://") || lower.starts_with("postgresql://") || has_key("host")
        }
        ConnectionEngine::MySql => lower.starts_with("mysql://") || has_key("server"),
        ConnectionEngine::MongoDb => {
            lower.starts_with("mongodb://") || lower.starts_with("mongodb+srv://")
        }
        ConnectionEngine::Redis => {
            lower.starts_with("redis://")
                || lower.starts_with("rediss://")
                || lower.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok())
        }
    }
}

fn engine_display(engine: ConnectionEngine) -> &'static str {
    match engine {
        ConnectionEngine::Generic => "generic",
        ConnectionEngine::SqlServer => "SQL Server",
        ConnectionEngine::Postgres => "PostgreSQL",
        ConnectionEngine::MySql => "MySQL",
        ConnectionEngine::MongoDb => "MongoDB",
        ConnectionEngine::Redis => "Redis",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(kind: VariableType) -> VariableDefinition {
        VariableDefinition {
            kind,
            ..VariableDefinition::detected("VAR", Some(String::new()))
        }
    }

    #[test]
    fn test_detected_required_without_default() {
        let var = VariableDefinition::detected("DB_PASSWORD", None);
        assert!(var.required);
        assert!(var.needs_value());
        assert_eq!(var.kind.tag(), "string");

        let var = VariableDefinition::detected("PORT", Some("8080".to_string()));
        assert!(!var.required);
        assert!(!var.needs_value());
    }

    #[test]
    fn test_validate_number_range() {
        let var = def(VariableType::Number {
            min: Some(1.0),
            max: Some(10.0),
        });
        assert!(var.validate("5").is_ok());
        assert!(var.validate("0").is_err());
        assert!(var.validate("11").is_err());
        assert!(var.validate("five").is_err());
    }

    #[test]
    fn test_validate_number_rejects_non_finite() {
        let bounded = def(VariableType::Number {
            min: Some(1.0),
            max: Some(10.0),
        });
        let unbounded = def(VariableType::Number {
            min: None,
            max: None,
        });
        for value in ["NaN", "inf", "-inf", "infinity"] {
            assert!(bounded.validate(value).is_err(), "{value} passed bounds");
            assert!(unbounded.validate(value).is_err(), "{value} accepted");
        }
        assert!(unbounded.validate("-2.5e3").is_ok());
    }

    #[test]
    fn test_validate_select() {
        let var = def(VariableType::Select {
            options: vec!["small".to_string(), "large".to_string()],
        });
        assert!(var.validate("small").is_ok());
        let err = var.validate("medium").unwrap_err();
        assert!(err.to_string().contains("small, large"));
    }

    #[test]
    fn test_validate_pattern_is_anchored() {
        let var = def(VariableType::String {
            pattern: Some("[a-z]+".to_string()),
        });
        assert!(var.validate("abc").is_ok());
        assert!(var.validate("abc1").is_err());
    }

    #[test]
    fn test_validate_port_url_email() {
        assert!(def(VariableType::Port).validate("8080").is_ok());
        assert!(def(VariableType::Port).validate("70000").is_err());
        assert!(def(VariableType::Url).validate("https://example.com/x").is_ok());
        assert!(def(VariableType::Url).validate("example.com").is_err());
        assert!(def(VariableType::Email).validate("ops@example.com").is_ok());
        assert!(def(VariableType::Email).validate("ops@").is_err());
    }

    #[test]
    fn test_validate_password_min_length() {
        let var = def(VariableType::Password {
            min_length: Some(8),
            pattern: None,
        });
        assert!(var.validate("s3cretpass").is_ok());
        assert!(var.validate("short").is_err());
        assert!(var.is_secret());
    }

    #[test]
    fn test_validate_connection_strings() {
        let pg = def(VariableType::ConnectionString {
            engine: ConnectionEngine::Postgres,
        });
        assert!(pg.validate("postgres://app@db:5432/app").is_ok());
        assert!(pg.validate("Host=db;Database=app").is_ok());
        assert!(pg.validate("db:5432").is_err());

        let sql = def(VariableType::ConnectionString {
            engine: ConnectionEngine::SqlServer,
        });
        assert!(sql.validate("Server=db;Database=app;User Id=sa").is_ok());
    }

    #[test]
    fn test_empty_value_only_fails_when_required() {
        let mut var = def(VariableType::Port);
        assert!(var.validate("").is_ok());
        var.required = true;
        assert!(var.validate("").is_err());
    }

    #[test]
    fn test_serde_tagged_representation() {
        let var = VariableDefinition {
            kind: VariableType::Select {
                options: vec!["a".to_string()],
            },
            ..VariableDefinition::detected("SIZE", Some("a".to_string()))
        };
        let json = serde_json::to_value(&var).unwrap();
        assert_eq!(json["type"], "select");
        assert_eq!(json["options"][0], "a");

        let back: VariableDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, var);
    }
}
