//! Port mappings

use serde::{Deserialize, Serialize};
use std::fmt;

/// A published port, compose short syntax: `[host_ip:][host:]container[/protocol]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// Host port; `None` publishes the container port only
    pub host: Option<u16>,
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
    pub host_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }

    /// String used by the Docker API (`80/tcp`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl Port {
    /// Parse the compose short syntax after variables have been substituted.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let spec = spec.trim();
        let (addr, protocol) = match spec.rsplit_once('/') {
            Some((addr, proto)) => (
                addr,
                Protocol::parse(proto).ok_or_else(|| format!("unknown protocol `{proto}`"))?,
            ),
            None => (spec, Protocol::Tcp),
        };

        let parts: Vec<&str> = addr.rsplitn(3, ':').collect();
        let parse_port = |s: &str| {
            s.parse::<u16>()
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| format!("invalid port number `{s}` in `{spec}`"))
        };

        match parts.as_slice() {
            [container] => Ok(Port {
                host: None,
                container: parse_port(container)?,
                protocol,
                host_ip: None,
            }),
            [container, host] => Ok(Port {
                host: Some(parse_port(host)?),
                container: parse_port(container)?,
                protocol,
                host_ip: None,
            }),
            [container, host, ip] => Ok(Port {
                host: if host.is_empty() {
                    None
                } else {
                    Some(parse_port(host)?)
                },
                container: parse_port(container)?,
                protocol,
                host_ip: Some(ip.to_string()),
            }),
            _ => Err(format!("invalid port mapping `{spec}`")),
        }
    }

    /// Docker API key for this port (`80/tcp`)
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container, self.protocol.as_str())
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ip) = &self.host_ip {
            write!(f, "{ip}:")?;
        }
        if let Some(host) = self.host {
            write!(f, "{host}:")?;
        }
        write!(f, "{}/{}", self.container, self.protocol.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_container() {
        let port = Port::parse("8080:80").unwrap();
        assert_eq!(port.host, Some(8080));
        assert_eq!(port.container, 80);
        assert_eq!(port.protocol, Protocol::Tcp);
        assert_eq!(port.host_ip, None);
    }

    #[test]
    fn test_parse_container_only() {
        let port = Port::parse("5432").unwrap();
        assert_eq!(port.host, None);
        assert_eq!(port.container, 5432);
    }

    #[test]
    fn test_parse_with_ip_and_protocol() {
        let port = Port::parse("127.0.0.1:53:53/udp").unwrap();
        assert_eq!(port.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(port.host, Some(53));
        assert_eq!(port.protocol, Protocol::Udp);
        assert_eq!(port.container_key(), "53/udp");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Port::parse("abc:80").is_err());
        assert!(Port::parse("8080:80/sctp").is_err());
        assert!(Port::parse("0").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Port::parse("8080:80").unwrap().to_string(), "8080:80/tcp");
    }
}
