//! Volume declarations and service mounts

use serde::{Deserialize, Serialize};

/// Named volume declared in the top-level `volumes` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    #[serde(default)]
    pub driver: Option<String>,
    /// Pre-existing volume: used as is, never created with a stack prefix or removed
    #[serde(default)]
    pub external: bool,
}

/// Mount of a volume or host path into a service container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: MountSource,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MountSource {
    /// Named volume (as written in the manifest, before stack prefixing)
    Volume(String),
    /// Host path bind mount
    Bind(String),
    /// Anonymous volume managed by the runtime
    Anonymous,
}

impl Mount {
    /// Parse the compose short syntax: `source:target[:ro|rw]` or `target`
    pub fn parse(spec: &str) -> Result<Self, String> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (source, target, mode) = match parts.as_slice() {
            [target] => (None, *target, None),
            [source, target] => (Some(*source), *target, None),
            [source, target, mode] => (Some(*source), *target, Some(*mode)),
            _ => return Err(format!("invalid volume mount `{spec}`")),
        };

        if target.is_empty() {
            return Err(format!("volume mount `{spec}` has no target"));
        }

        let read_only = match mode {
            None | Some("rw") => false,
            Some("ro") => true,
            Some(other) => return Err(format!("unknown mount mode `{other}` in `{spec}`")),
        };

        Ok(Mount {
            source: source.map(MountSource::from_source).unwrap_or(MountSource::Anonymous),
            target: target.to_string(),
            read_only,
        })
    }

    /// Named volume referenced by this mount, if any
    pub fn volume_name(&self) -> Option<&str> {
        match &self.source {
            MountSource::Volume(name) => Some(name),
            _ => None,
        }
    }
}

impl MountSource {
    fn from_source(source: &str) -> Self {
        if source.starts_with('/') || source.starts_with('.') || source.starts_with('~') {
            MountSource::Bind(source.to_string())
        } else {
            MountSource::Volume(source.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_volume() {
        let mount = Mount::parse("db_data:/var/lib/mysql").unwrap();
        assert_eq!(mount.source, MountSource::Volume("db_data".to_string()));
        assert_eq!(mount.target, "/var/lib/mysql");
        assert!(!mount.read_only);
        assert_eq!(mount.volume_name(), Some("db_data"));
    }

    #[test]
    fn test_parse_bind_read_only() {
        let mount = Mount::parse("./config:/etc/app:ro").unwrap();
        assert_eq!(mount.source, MountSource::Bind("./config".to_string()));
        assert!(mount.read_only);
        assert_eq!(mount.volume_name(), None);
    }

    #[test]
    fn test_parse_anonymous() {
        let mount = Mount::parse("/cache").unwrap();
        assert_eq!(mount.source, MountSource::Anonymous);
    }

    #[test]
    fn test_parse_invalid_mode() {
        assert!(Mount::parse("data:/data:rx").is_err());
        assert!(Mount::parse("data:").is_err());
    }
}
