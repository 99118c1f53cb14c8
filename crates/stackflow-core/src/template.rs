//! Placeholder substitution
//!
//! Manifest text may reference variables as `${NAME}` or `${NAME:-default}`.
//! `$$` produces a literal `$` and never starts a placeholder.

use crate::error::{Result, StackError};
use regex::{Captures, Regex};
use std::collections::HashMap;
use tracing::debug;

const PLACEHOLDER_PATTERN: &str = r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}";

/// Values supplied for substitution
pub type Variables = HashMap<String, String>;

/// A placeholder found in template text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub default: Option<String>,
}

/// Substitutes and detects placeholders. Pure: no I/O, no environment lookup.
pub struct VariableResolver {
    pattern: Regex,
}

impl VariableResolver {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(PLACEHOLDER_PATTERN)
            .map_err(|e| StackError::malformed(format!("placeholder pattern: {e}")))?;
        Ok(Self { pattern })
    }

    /// Replace every placeholder in `template`.
    ///
    /// A supplied value wins over the inline default, even when empty. A
    /// placeholder with neither fails with `UnresolvedVariable`.
    pub fn resolve(&self, template: &str, values: &Variables) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in self.pattern.captures_iter(template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            last = whole.end();

            match placeholder(&caps) {
                None => out.push('$'),
                Some(p) => match values.get(&p.name).or(p.default.as_ref()) {
                    Some(value) => out.push_str(value),
                    None => return Err(StackError::UnresolvedVariable { name: p.name }),
                },
            }
        }

        out.push_str(&template[last..]);
        Ok(out)
    }

    /// Placeholders in `template`, first-seen order, one per name.
    pub fn detect(&self, template: &str) -> Vec<Placeholder> {
        self.detect_all([template])
    }

    /// Placeholders across several texts, treated as one document.
    ///
    /// The first default seen for a name is kept.
    pub fn detect_all<'a, I>(&self, templates: I) -> Vec<Placeholder>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut found: Vec<Placeholder> = Vec::new();

        for template in templates {
            for caps in self.pattern.captures_iter(template) {
                let Some(p) = placeholder(&caps) else {
                    continue;
                };
                match found.iter_mut().find(|f| f.name == p.name) {
                    Some(existing) => {
                        if existing.default.is_none() {
                            existing.default = p.default;
                        }
                    }
                    None => {
                        debug!(name = %p.name, "Detected placeholder");
                        found.push(p);
                    }
                }
            }
        }

        found
    }

    pub fn has_placeholders(&self, template: &str) -> bool {
        self.pattern
            .captures_iter(template)
            .any(|caps| placeholder(&caps).is_some())
    }
}

/// `None` for the `$$` escape
fn placeholder(caps: &Captures<'_>) -> Option<Placeholder> {
    let name = caps.get(1)?;
    Some(Placeholder {
        name: name.as_str().to_string(),
        default: caps.get(2).map(|d| d.as_str().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> VariableResolver {
        VariableResolver::new().unwrap()
    }

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_supplied_value() {
        let out = resolver()
            .resolve("mysql:${VERSION}", &vars(&[("VERSION", "8.0")]))
            .unwrap();
        assert_eq!(out, "mysql:8.0");
    }

    #[test]
    fn test_resolve_default_when_absent() {
        let out = resolver()
            .resolve("${PORT:-8080}:80", &Variables::new())
            .unwrap();
        assert_eq!(out, "8080:80");
    }

    #[test]
    fn test_supplied_value_overrides_default() {
        let out = resolver()
            .resolve("${PORT:-8080}", &vars(&[("PORT", "9000")]))
            .unwrap();
        assert_eq!(out, "9000");

        // An empty value is still a value
        let out = resolver()
            .resolve("[${SUFFIX:-x}]", &vars(&[("SUFFIX", "")]))
            .unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_unresolved_is_an_error() {
        let err = resolver()
            .resolve("${DB_PASSWORD}", &Variables::new())
            .unwrap_err();
        assert!(matches!(err, StackError::UnresolvedVariable { name } if name == "DB_PASSWORD"));
    }

    #[test]
    fn test_empty_default_resolves_to_empty() {
        let out = resolver().resolve("a${X:-}b", &Variables::new()).unwrap();
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_dollar_escape() {
        let r = resolver();
        assert_eq!(
            r.resolve("cost $$5 and $${HOME}", &Variables::new()).unwrap(),
            "cost $5 and ${HOME}"
        );
        assert!(r.detect("$${HOME}").is_empty());
        assert!(!r.has_placeholders("$${HOME}"));
    }

    #[test]
    fn test_non_placeholders_are_left_alone() {
        let out = resolver()
            .resolve("$HOME ${ unterminated", &Variables::new())
            .unwrap();
        assert_eq!(out, "$HOME ${ unterminated");
    }

    #[test]
    fn test_detect_order_and_dedup() {
        let found = resolver().detect("${B} ${A:-1} ${B:-2} ${A:-3} ${C}");
        assert_eq!(
            found,
            vec![
                Placeholder {
                    name: "B".to_string(),
                    default: Some("2".to_string()),
                },
                Placeholder {
                    name: "A".to_string(),
                    default: Some("1".to_string()),
                },
                Placeholder {
                    name: "C".to_string(),
                    default: None,
                },
            ]
        );
    }

    #[test]
    fn test_detect_is_deterministic() {
        let r = resolver();
        let text = "${X} ${Y:-y} ${Z}";
        assert_eq!(r.detect(text), r.detect(text));
    }

    #[test]
    fn test_detect_all_spans_texts() {
        let found = resolver().detect_all(["${A}", "${B} ${A:-a}"]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].default.as_deref(), Some("a"));
    }
}
