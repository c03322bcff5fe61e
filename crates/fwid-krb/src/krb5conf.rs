//! Kerberos library configuration (`krb5.conf`)
//!
//! Parses the profile format used by MIT Kerberos: `[section]` headers,
//! `tag = value` relations and nested `tag = { ... }` groups. Include
//! directives are recorded but not followed.

use std::collections::BTreeMap;

use crate::error::KrbError;

/// Value of a relation: either a string or a nested group of relations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfValue {
    Str(String),
    Group(Vec<(String, ConfValue)>),
}

impl ConfValue {
    /// The string value, if this is not a group
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfValue::Str(s) => Some(s),
            ConfValue::Group(_) => None,
        }
    }

    /// All string values of `tag` inside a group
    pub fn values<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let relations: &[(String, ConfValue)] = match self {
            ConfValue::Group(g) => g,
            ConfValue::Str(_) => &[],
        };
        relations
            .iter()
            .filter(move |(t, _)| t == tag)
            .filter_map(|(_, v)| v.as_str())
    }
}

/// A parsed krb5.conf
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Krb5Config {
    /// `include` and `includedir` directives, in file order
    pub includes: Vec<String>,
    sections: BTreeMap<String, Vec<(String, ConfValue)>>,
    source: String,
}

/// An open `tag = {` group while parsing
struct OpenGroup {
    tag: String,
    relations: Vec<(String, ConfValue)>,
}

impl Krb5Config {
    /// Parse configuration text. An empty input is a valid empty configuration.
    pub fn parse(text: &str) -> Result<Self, KrbError> {
        let mut config = Krb5Config {
            source: text.to_string(),
            ..Krb5Config::default()
        };
        let mut section: Option<String> = None;
        let mut stack: Vec<OpenGroup> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            let syntax = |reason: &str| KrbError::Syntax {
                line: line_no,
                reason: reason.to_string(),
            };

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if stack.is_empty() {
                if let Some(path) = line
                    .strip_prefix("includedir ")
                    .or_else(|| line.strip_prefix("include "))
                {
                    config.includes.push(path.trim().to_string());
                    continue;
                }
            }

            if let Some(rest) = line.strip_prefix('[') {
                if !stack.is_empty() {
                    return Err(syntax("section header inside a group"));
                }
                let name = rest
                    .trim_end_matches('*')
                    .strip_suffix(']')
                    .ok_or_else(|| syntax("unterminated section header"))?
                    .trim();
                if name.is_empty() {
                    return Err(syntax("empty section name"));
                }
                config.sections.entry(name.to_string()).or_default();
                section = Some(name.to_string());
                continue;
            }

            if line.trim_end_matches('*') == "}" {
                let group = stack.pop().ok_or_else(|| syntax("unmatched '}'"))?;
                let relation = (group.tag, ConfValue::Group(group.relations));
                match stack.last_mut() {
                    Some(parent) => parent.relations.push(relation),
                    None => config.push(section.as_deref(), relation),
                }
                continue;
            }

            let (tag, value) = line
                .split_once('=')
                .ok_or_else(|| syntax("expected 'tag = value'"))?;
            let tag = tag.trim();
            if tag.is_empty() || tag.chars().any(char::is_whitespace) {
                return Err(syntax("invalid tag"));
            }
            if section.is_none() {
                return Err(syntax("relation outside of a section"));
            }

            let value = value.trim();
            if value == "{" {
                stack.push(OpenGroup {
                    tag: tag.to_string(),
                    relations: Vec::new(),
                });
                continue;
            }

            let relation = (tag.to_string(), ConfValue::Str(unquote(value)));
            match stack.last_mut() {
                Some(group) => group.relations.push(relation),
                None => config.push(section.as_deref(), relation),
            }
        }

        if let Some(open) = stack.last() {
            return Err(KrbError::Syntax {
                line: text.lines().count(),
                reason: format!("unterminated group '{}'", open.tag),
            });
        }

        Ok(config)
    }

    fn push(&mut self, section: Option<&str>, relation: (String, ConfValue)) {
        if let Some(name) = section {
            self.sections
                .entry(name.to_string())
                .or_default()
                .push(relation);
        }
    }

    /// The text this configuration was parsed from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// All relations of a section
    pub fn section(&self, name: &str) -> Option<&[(String, ConfValue)]> {
        self.sections.get(name).map(Vec::as_slice)
    }

    /// First value of `tag` in `section`
    pub fn get(&self, section: &str, tag: &str) -> Option<&ConfValue> {
        self.section(section)?
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v)
    }

    /// `default_realm` from `[libdefaults]`
    pub fn default_realm(&self) -> Option<&str> {
        self.get("libdefaults", "default_realm")?.as_str()
    }

    /// KDCs configured for `realm` in `[realms]`
    pub fn realm_kdcs(&self, realm: &str) -> Vec<&str> {
        match self.get("realms", realm) {
            Some(group) => group.values("kdc").collect(),
            None => Vec::new(),
        }
    }

    /// Whether no section holds any relation
    pub fn is_empty(&self) -> bool {
        self.sections.values().all(Vec::is_empty) && self.includes.is_empty()
    }
}

fn unquote(value: &str) -> String {
    let value = value.trim_end_matches(" *").trim();
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# sample configuration
includedir /etc/krb5.conf.d/

[libdefaults]
    default_realm = EXAMPLE.COM
    dns_lookup_kdc = false
    ticket_lifetime = 24h

[realms]
    EXAMPLE.COM = {
        kdc = kdc1.example.com
        kdc = kdc2.example.com:88
        admin_server = kdc1.example.com
        auth_to_local = {
            rule = "RULE:[1:$1]"
        }
    }

[domain_realm]
    .example.com = EXAMPLE.COM
    example.com = EXAMPLE.COM
"#;

    #[test]
    fn test_parse_sample() {
        let config = Krb5Config::parse(SAMPLE).unwrap();

        assert_eq!(config.source(), SAMPLE);
        assert_eq!(config.includes, vec!["/etc/krb5.conf.d/".to_string()]);
        assert_eq!(config.default_realm(), Some("EXAMPLE.COM"));
        assert_eq!(
            config.realm_kdcs("EXAMPLE.COM"),
            vec!["kdc1.example.com", "kdc2.example.com:88"]
        );
        assert_eq!(
            config.get("domain_realm", ".example.com").and_then(ConfValue::as_str),
            Some("EXAMPLE.COM")
        );

        let realm = config.get("realms", "EXAMPLE.COM").unwrap();
        assert_eq!(realm.values("admin_server").count(), 1);
        assert_eq!(
            realm.values("auth_to_local").count(),
            0,
            "nested groups are not string values"
        );
    }

    #[test]
    fn test_nested_group_and_quotes() {
        let config = Krb5Config::parse(SAMPLE).unwrap();
        let ConfValue::Group(realm) = config.get("realms", "EXAMPLE.COM").unwrap() else {
            panic!("expected group");
        };
        let (_, atl) = realm.iter().find(|(t, _)| t == "auth_to_local").unwrap();
        assert_eq!(atl.values("rule").collect::<Vec<_>>(), vec!["RULE:[1:$1]"]);
    }

    #[test]
    fn test_empty_is_valid() {
        let config = Krb5Config::parse("").unwrap();
        assert!(config.is_empty());
        assert_eq!(config.default_realm(), None);
        assert!(config.realm_kdcs("EXAMPLE.COM").is_empty());
    }

    #[test]
    fn test_binary_garbage_is_rejected() {
        let garbage = "\0".repeat(512);
        assert!(matches!(
            Krb5Config::parse(&garbage),
            Err(KrbError::Syntax { line: 1, .. })
        ));
    }

    #[test]
    fn test_relation_outside_section() {
        assert!(Krb5Config::parse("default_realm = EXAMPLE.COM").is_err());
    }

    #[test]
    fn test_unbalanced_braces() {
        let unterminated = "[realms]\nEXAMPLE.COM = {\n kdc = a\n";
        assert!(matches!(
            Krb5Config::parse(unterminated),
            Err(KrbError::Syntax { .. })
        ));

        let unmatched = "[realms]\n}\n";
        assert!(matches!(
            Krb5Config::parse(unmatched),
            Err(KrbError::Syntax { line: 2, .. })
        ));
    }

    #[test]
    fn test_final_marker() {
        let config = Krb5Config::parse("[libdefaults]*\n default_realm = A.B *\n").unwrap();
        assert_eq!(config.default_realm(), Some("A.B"));
    }

    #[test]
    fn test_deep_compare() {
        let a = Krb5Config::parse(SAMPLE).unwrap();
        let b = Krb5Config::parse(SAMPLE).unwrap();
        let c = Krb5Config::parse("[libdefaults]\n default_realm = OTHER.COM\n").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
