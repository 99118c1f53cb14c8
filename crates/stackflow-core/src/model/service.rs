//! Service definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Service as declared in a manifest.
///
/// Every textual field may still contain `${VAR}` placeholders; they are
/// substituted by the plan builder, which also parses ports and mounts.
///
/// ```yaml
/// services:
///   web:
///     image: wordpress:${WP_VERSION:-latest}
///     ports: ["${WP_PORT:-8080}:80"]
///     depends_on: [db]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    /// Services that must be applied before this one
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub restart: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Restart policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

impl RestartPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "no" => Some(Self::No),
            "always" => Some(Self::Always),
            "on-failure" | "on_failure" => Some(Self::OnFailure),
            "unless-stopped" | "unless_stopped" => Some(Self::UnlessStopped),
            _ => None,
        }
    }

    /// String used by the Docker API
    pub fn as_docker_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::OnFailure => "on-failure",
            Self::UnlessStopped => "unless-stopped",
        }
    }
}

impl ServiceSpec {
    /// Merge a later definition of the same service over this one.
    ///
    /// - `Option<T>` / non-empty strings: taken from `other` when set
    /// - `Vec<T>`: replaced when `other` is non-empty
    /// - maps: merged, `other` wins
    pub fn merge(&mut self, other: ServiceSpec) {
        if !other.image.is_empty() {
            self.image = other.image;
        }
        if other.command.is_some() {
            self.command = other.command;
        }
        if other.restart.is_some() {
            self.restart = other.restart;
        }

        if !other.ports.is_empty() {
            self.ports = other.ports;
        }
        if !other.volumes.is_empty() {
            self.volumes = other.volumes;
        }
        if !other.networks.is_empty() {
            self.networks = other.networks;
        }
        if !other.depends_on.is_empty() {
            self.depends_on = other.depends_on;
        }

        self.environment.extend(other.environment);
        self.labels.extend(other.labels);
    }

    /// All fields that may carry placeholders, in declaration order
    pub fn text_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.image.as_str()];
        fields.extend(self.ports.iter().map(String::as_str));
        fields.extend(self.environment.values().map(String::as_str));
        fields.extend(self.volumes.iter().map(String::as_str));
        fields.extend(self.networks.iter().map(String::as_str));
        if let Some(command) = &self.command {
            fields.extend(command.iter().map(String::as_str));
        }
        if let Some(restart) = &self.restart {
            fields.push(restart);
        }
        fields.extend(self.labels.values().map(String::as_str));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_parse() {
        assert_eq!(RestartPolicy::parse("always"), Some(RestartPolicy::Always));
        assert_eq!(
            RestartPolicy::parse("unless_stopped"),
            Some(RestartPolicy::UnlessStopped)
        );
        assert_eq!(RestartPolicy::parse("sometimes"), None);
        assert_eq!(RestartPolicy::OnFailure.as_docker_str(), "on-failure");
    }

    #[test]
    fn test_merge_overrides_and_extends() {
        let mut base = ServiceSpec {
            name: "api".to_string(),
            image: "api:1".to_string(),
            ports: vec!["8080:80".to_string()],
            environment: BTreeMap::from([
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string()),
            ]),
            ..Default::default()
        };

        base.merge(ServiceSpec {
            name: "api".to_string(),
            image: "api:2".to_string(),
            environment: BTreeMap::from([("B".to_string(), "3".to_string())]),
            ..Default::default()
        });

        assert_eq!(base.image, "api:2");
        assert_eq!(base.ports, vec!["8080:80"]);
        assert_eq!(base.environment["A"], "1");
        assert_eq!(base.environment["B"], "3");
    }

    #[test]
    fn test_text_fields_order() {
        let service = ServiceSpec {
            name: "web".to_string(),
            image: "nginx:${TAG}".to_string(),
            ports: vec!["${PORT}:80".to_string()],
            command: Some(vec!["serve".to_string(), "${MODE}".to_string()]),
            ..Default::default()
        };

        assert_eq!(
            service.text_fields(),
            vec!["nginx:${TAG}", "${PORT}:80", "serve", "${MODE}"]
        );
    }
}
