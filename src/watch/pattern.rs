//! Log patterns and the hosts they are expected on

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;

use crate::common::{Error, Result};

/// Which hosts of a watch a pattern must be observed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostScope {
    /// Any host of the watch
    Any,
    /// Any host of the given set
    AnyOf(Vec<String>),
    /// One specific host
    Host(String),
    /// Every host still reachable by the watch
    All,
}

impl HostScope {
    /// Whether a line from `host` can satisfy this scope
    pub fn admits(&self, host: &str) -> bool {
        match self {
            HostScope::Any | HostScope::All => true,
            HostScope::AnyOf(hosts) => hosts.iter().any(|h| h == host),
            HostScope::Host(h) => h == host,
        }
    }
}

/// A compiled log regex with its host scope and a readable description
///
/// Named capture groups are reported with every match.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    scope: HostScope,
    description: String,
}

impl Pattern {
    /// Compile a pattern matching on any host of the watch
    pub fn new(regex: &str) -> Result<Self> {
        let compiled = Regex::new(regex).map_err(|e| Error::InvalidPattern {
            pattern: regex.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            regex: compiled,
            scope: HostScope::Any,
            description: regex.to_string(),
        })
    }

    /// Compile several patterns at once
    pub fn all<S: AsRef<str>>(regexes: &[S]) -> Result<Vec<Self>> {
        regexes.iter().map(|r| Self::new(r.as_ref())).collect()
    }

    /// Require the pattern on one host
    pub fn on_host(mut self, host: &str) -> Self {
        self.scope = HostScope::Host(host.to_string());
        self
    }

    /// Accept the pattern from any host of a set
    pub fn on_any_of<S: AsRef<str>>(mut self, hosts: &[S]) -> Self {
        self.scope = HostScope::AnyOf(hosts.iter().map(|h| h.as_ref().to_string()).collect());
        self
    }

    /// Require the pattern on every reachable host
    pub fn on_all_hosts(mut self) -> Self {
        self.scope = HostScope::All;
        self
    }

    /// Replace the description used in reports
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn scope(&self) -> &HostScope {
        &self.scope
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// Match a line, returning its named capture groups
    pub fn captures(&self, line: &str) -> Option<BTreeMap<String, String>> {
        let caps = self.regex.captures(line)?;
        Some(
            self.regex
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.to_string(), m.as_str().to_string()))
                })
                .collect(),
        )
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_captures() {
        let p = Pattern::new(r"(?P<node>node-\d+) promoted (?P<rsc>\w+)").unwrap();
        let caps = p.captures("Jan 1 node-2 promoted galera").unwrap();
        assert_eq!(caps["node"], "node-2");
        assert_eq!(caps["rsc"], "galera");
        assert!(p.captures("nothing here").is_none());
    }

    #[test]
    fn test_invalid_regex() {
        let err = Pattern::new("(unclosed").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_scopes() {
        let p = Pattern::new("x").unwrap().on_host("node-1");
        assert!(p.scope().admits("node-1"));
        assert!(!p.scope().admits("node-2"));

        let p = Pattern::new("x").unwrap().on_any_of(&["a", "b"]);
        assert!(p.scope().admits("b"));
        assert!(!p.scope().admits("c"));

        assert!(Pattern::new("x").unwrap().on_all_hosts().scope().admits("z"));
    }

    #[test]
    fn test_description_defaults_to_regex() {
        let p = Pattern::new("node-2.*promoted").unwrap();
        assert_eq!(p.to_string(), "node-2.*promoted");
        assert_eq!(p.described("promotion").to_string(), "promotion");
    }
}
