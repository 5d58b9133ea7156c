//! Document-type identification.

use crate::value::{resolve, Path, Scalar, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag for a raw document, e.g. `ccd`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentType(pub String);

impl DocumentType {
    pub fn new(tag: impl Into<String>) -> Self {
        DocumentType(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tags a document as `document_type` when `path` resolves to a scalar
/// equal to `equals`, or to anything non-null when `equals` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationRule {
    pub document_type: String,
    pub path: Path,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
}

impl IdentificationRule {
    pub fn matches(&self, document: &Value) -> bool {
        let found = resolve(document, &self.path);
        if found.is_null() {
            return false;
        }
        let Some(expected) = &self.equals else {
            return true;
        };
        match found.as_scalar() {
            Some(Scalar::String(s)) => s == expected,
            Some(other) => other.to_string() == *expected,
            None => false,
        }
    }
}

/// Returns `None` for documents of unknown type.
pub trait DocumentIdentifier: Send + Sync {
    fn identify(&self, document: &Value) -> Option<DocumentType>;
}

/// First matching rule wins
#[derive(Debug, Clone, Default)]
pub struct RuleIdentifier {
    rules: Vec<IdentificationRule>,
}

impl RuleIdentifier {
    pub fn new(rules: Vec<IdentificationRule>) -> Self {
        RuleIdentifier { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl DocumentIdentifier for RuleIdentifier {
    fn identify(&self, document: &Value) -> Option<DocumentType> {
        self.rules
            .iter()
            .find(|rule| rule.matches(document))
            .map(|rule| DocumentType::new(rule.document_type.clone()))
    }
}

/// Tags every document with the same type. Used when a source holds a
/// single document type and no rules are configured.
#[derive(Debug, Clone)]
pub struct FixedIdentifier(pub DocumentType);

impl DocumentIdentifier for FixedIdentifier {
    fn identify(&self, _document: &Value) -> Option<DocumentType> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(doc_type: &str, path: &str, equals: Option<&str>) -> IdentificationRule {
        IdentificationRule {
            document_type: doc_type.to_string(),
            path: path.parse().unwrap(),
            equals: equals.map(str::to_string),
        }
    }

    #[test]
    fn test_rule_identifier_first_match_wins() {
        let identifier = RuleIdentifier::new(vec![
            rule("ccd", "templateId.root", Some("2.16.840.1.113883.10.20.22.1.2")),
            rule("discharge", "templateId.root", Some("2.16.840.1.113883.10.20.22.1.8")),
            rule("generic", "templateId", None),
        ]);

        let tagged = |root: &str| Value::from(json!({"templateId": {"root": root}}));
        let ccd = tagged("2.16.840.1.113883.10.20.22.1.2");
        let discharge = tagged("2.16.840.1.113883.10.20.22.1.8");
        let other = tagged("1.2.3");
        let bare = Value::from(json!({"title": "note"}));

        assert_eq!(identifier.identify(&ccd), Some(DocumentType::new("ccd")));
        assert_eq!(identifier.identify(&discharge), Some(DocumentType::new("discharge")));
        assert_eq!(identifier.identify(&other), Some(DocumentType::new("generic")));
        assert_eq!(identifier.identify(&bare), None);
    }

    #[test]
    fn test_rule_compares_rendered_scalars() {
        let r = rule("v2", "version", Some("2"));
        assert!(r.matches(&Value::from(json!({"version": 2}))));
        assert!(r.matches(&Value::from(json!({"version": "2"}))));
        assert!(!r.matches(&Value::from(json!({"version": [2]}))));
        assert!(!r.matches(&Value::from(json!({"version": null}))));
    }

    #[test]
    fn test_fixed_identifier() {
        let identifier = FixedIdentifier(DocumentType::new("ccd"));
        assert_eq!(identifier.identify(&Value::Null), Some(DocumentType::new("ccd")));
    }

    #[test]
    fn test_rule_deserializes() {
        let parsed: IdentificationRule =
            serde_json::from_value(json!({"document_type": "ccd", "path": "code.code"})).unwrap();
        assert_eq!(parsed, rule("ccd", "code.code", None));
    }
}
